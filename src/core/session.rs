//! 会话：UUID、命名空间与只追加的对话历史
//!
//! 会话是单写者：一轮结束后由调用方用 commit 追加该轮全部轮次，失败或取消的轮次从不写入。

use uuid::Uuid;

use crate::memory::{Turn, TurnLog, TurnLogError};
use crate::react::TurnOutcome;

#[derive(Debug, Clone)]
pub struct AgentSession {
    id: Uuid,
    namespace: String,
    log: TurnLog,
}

impl AgentSession {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            log: TurnLog::new(),
        }
    }

    /// 由持久化的历史重建；历史不满足配对约束时拒绝
    pub fn restore(id: Uuid, namespace: impl Into<String>, turns: Vec<Turn>) -> Result<Self, TurnLogError> {
        Ok(Self {
            id,
            namespace: namespace.into(),
            log: TurnLog::from_turns(turns)?,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn turns(&self) -> &[Turn] {
        self.log.turns()
    }

    /// 送入模型的最近历史
    pub fn prior(&self, history_turns: usize) -> &[Turn] {
        self.log.recent(history_turns)
    }

    /// 提交完整的一轮
    pub fn commit(&mut self, outcome: &TurnOutcome) -> Result<(), TurnLogError> {
        let mut turns = self.log.turns().to_vec();
        turns.extend(outcome.turns.iter().cloned());
        self.log = TurnLog::from_turns(turns)?;
        tracing::debug!(session = %self.id, turns = self.log.len(), "turn committed");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }
}
