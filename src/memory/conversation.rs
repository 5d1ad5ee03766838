//! 会话历史：Turn 与只追加的 TurnLog
//!
//! 角色三种：User / Assistant / ToolResult。ToolResult 只出现在 Assistant 工具调用声明之后，
//! 并由 finalize 产生的 Assistant 回答紧随其后；TurnLog::from_turns 对持久化历史做同样校验。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::{ToolCall, ToolResult};

/// 内部角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    ToolResult,
}

/// 文本或结构化内容
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TurnContent {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl TurnContent {
    /// 纯文本内容；结构化内容返回 None
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TurnContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// 单个对话单元
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: TurnContent,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }

    /// Assistant 的工具调用声明
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::ToolCall(call),
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: TurnRole::ToolResult,
            content: TurnContent::ToolResult(result),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// 历史不满足工具调用配对约束
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnLogError {
    #[error("tool result at {0} is not preceded by an assistant tool call")]
    OrphanToolResult(usize),

    #[error("tool call at {0} is not followed by its tool result")]
    DanglingToolCall(usize),

    #[error("tool result at {0} is not followed by an assistant answer")]
    UnansweredToolResult(usize),

    #[error("turn at {0} has role {1:?} with mismatched content")]
    RoleMismatch(usize, TurnRole),
}

/// 只追加的对话日志（最旧在前）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnLog {
    turns: Vec<Turn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由持久化历史重建；违反配对约束时拒绝
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self, TurnLogError> {
        validate(&turns)?;
        Ok(Self { turns })
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 只保留最近 max_turns 轮（以 User 起始的一轮为单位）
    pub fn recent(&self, max_turns: usize) -> &[Turn] {
        if max_turns == 0 {
            return &self.turns[self.turns.len()..];
        }
        let user_starts: Vec<usize> = self
            .turns
            .iter()
            .enumerate()
            .filter(|(_, t)| t.role == TurnRole::User)
            .map(|(i, _)| i)
            .collect();
        if user_starts.len() <= max_turns {
            return &self.turns;
        }
        &self.turns[user_starts[user_starts.len() - max_turns]..]
    }
}

/// 校验角色与内容匹配，以及 ToolCall → ToolResult → Assistant 文本 的配对
pub fn validate(turns: &[Turn]) -> Result<(), TurnLogError> {
    for (i, turn) in turns.iter().enumerate() {
        match (&turn.role, &turn.content) {
            (TurnRole::User, TurnContent::Text(_)) => {}
            (TurnRole::Assistant, TurnContent::Text(_)) => {}
            (TurnRole::Assistant, TurnContent::ToolCall(call)) => match turns.get(i + 1) {
                Some(Turn {
                    role: TurnRole::ToolResult,
                    content: TurnContent::ToolResult(_),
                }) => {
                    tracing::trace!(tool = %call.name(), index = i, "tool exchange");
                }
                _ => return Err(TurnLogError::DanglingToolCall(i)),
            },
            (TurnRole::ToolResult, TurnContent::ToolResult(_)) => {
                let preceded = i > 0
                    && matches!(
                        turns[i - 1],
                        Turn {
                            role: TurnRole::Assistant,
                            content: TurnContent::ToolCall(_),
                        }
                    );
                if !preceded {
                    return Err(TurnLogError::OrphanToolResult(i));
                }
                let answered = matches!(
                    turns.get(i + 1),
                    Some(Turn {
                        role: TurnRole::Assistant,
                        content: TurnContent::Text(_),
                    })
                );
                if !answered {
                    return Err(TurnLogError::UnansweredToolResult(i));
                }
            }
            (role, _) => return Err(TurnLogError::RoleMismatch(i, *role)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolResult};

    fn exchange() -> Vec<Turn> {
        vec![
            Turn::user("weather?"),
            Turn::tool_call(ToolCall::WebSearch {
                query: "weather".into(),
            }),
            Turn::tool_result(ToolResult::ToolError(ToolError::web_search_failed("down"))),
            Turn::assistant("Sorry, search is down."),
        ]
    }

    #[test]
    fn test_valid_exchange_accepted() {
        let log = TurnLog::from_turns(exchange()).unwrap();
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_orphan_tool_result_rejected() {
        let mut turns = exchange();
        turns.remove(1);
        assert_eq!(
            TurnLog::from_turns(turns).unwrap_err(),
            TurnLogError::OrphanToolResult(1)
        );
    }

    #[test]
    fn test_half_committed_exchange_rejected() {
        let mut turns = exchange();
        turns.pop();
        assert_eq!(
            TurnLog::from_turns(turns).unwrap_err(),
            TurnLogError::UnansweredToolResult(2)
        );
    }

    #[test]
    fn test_role_mismatch_rejected() {
        let turns = vec![Turn {
            role: TurnRole::User,
            content: TurnContent::ToolCall(ToolCall::WebSearch { query: "q".into() }),
        }];
        assert!(matches!(
            TurnLog::from_turns(turns),
            Err(TurnLogError::RoleMismatch(0, TurnRole::User))
        ));
    }

    #[test]
    fn test_recent_keeps_whole_rounds() {
        let mut turns = exchange();
        turns.push(Turn::user("second"));
        turns.push(Turn::assistant("ok"));
        let log = TurnLog::from_turns(turns).unwrap();
        let recent = log.recent(1);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text(), Some("second"));
        assert_eq!(log.recent(5).len(), 6);
    }
}
