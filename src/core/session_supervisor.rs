//! 会话监管：每个会话一把锁与一个取消令牌
//!
//! 同一会话的并发调用按到达顺序串行执行；不同会话互不共享可变状态。
//! 每轮开始时换一个新令牌，取消只影响正在进行的那一轮。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::AgentSession;

/// 单个会话的句柄
#[derive(Debug)]
pub struct SessionHandle {
    session: Arc<Mutex<AgentSession>>,
    cancel_token: std::sync::Mutex<CancellationToken>,
}

impl SessionHandle {
    fn new(session: AgentSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            cancel_token: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// 获取会话独占权；流式回答期间需持有到提交为止
    pub async fn lock(&self) -> OwnedMutexGuard<AgentSession> {
        self.session.clone().lock_owned().await
    }

    /// 开始新一轮：换一个未取消的令牌
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.cancel_token.lock() {
            *current = token.clone();
        }
        token
    }

    /// 取消当前轮（用户 Ctrl+C）
    pub fn cancel(&self) {
        if let Ok(current) = self.cancel_token.lock() {
            current.cancel();
        }
    }
}

/// 会话级生命周期管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建新会话并返回其句柄
    pub async fn create(&self, namespace: &str) -> (Uuid, Arc<SessionHandle>) {
        self.insert(AgentSession::new(namespace)).await
    }

    /// 登记已有会话（如由持久化历史重建的会话）
    pub async fn insert(&self, session: AgentSession) -> (Uuid, Arc<SessionHandle>) {
        let id = session.id();
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.write().await.insert(id, handle.clone());
        tracing::info!(session = %id, "session registered");
        (id, handle)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(h) = &removed {
            h.cancel();
        }
        removed
    }

    pub async fn cancel(&self, id: &Uuid) -> bool {
        match self.get(id).await {
            Some(h) => {
                h.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_remove() {
        let sup = SessionSupervisor::new();
        let (id, _) = sup.create("ws").await;
        assert_eq!(sup.get(&id).await.unwrap().lock().await.namespace(), "ws");
        assert_eq!(sup.len().await, 1);
        assert!(sup.remove(&id).await.is_some());
        assert!(!sup.cancel(&id).await);
    }

    #[tokio::test]
    async fn test_cancel_only_affects_current_turn() {
        let sup = SessionSupervisor::new();
        let (id, handle) = sup.create("ws").await;
        let first = handle.begin_turn();
        assert!(sup.cancel(&id).await);
        assert!(first.is_cancelled());
        let second = handle.begin_turn();
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_session() {
        let sup = SessionSupervisor::new();
        let (_, handle) = sup.create("ws").await;
        let guard = handle.lock().await;
        let h2 = handle.clone();
        let waiter = tokio::spawn(async move { h2.lock().await.namespace().to_string() });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        assert_eq!(waiter.await.unwrap(), "ws");
    }
}
