//! 会话存储
//!
//! 每个会话的 turns / checkpoints 放在一把 tokio Mutex 里：编排器在整轮对话期间持有
//! 它的 owned guard（单写者），guard 随 future 一起 drop，请求被取消时也会释放。
//! 会话表本身用 RwLock<HashMap> 管理，只在查找 / 创建 / 删除时短暂加锁。

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::session::rollback::Checkpoint;
use crate::session::turn::Turn;

/// 会话的可变部分（受会话锁保护）
#[derive(Debug)]
pub struct SessionData {
    pub turns: Vec<Turn>,
    pub checkpoints: Vec<Checkpoint>,
    last_active: Instant,
}

impl SessionData {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            checkpoints: Vec::new(),
            last_active: Instant::now(),
        }
    }

    /// 最近 max_turns 条（拷贝）
    pub fn recent(&self, max_turns: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(max_turns);
        self.turns[start..].to_vec()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// 单个会话
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    data: Arc<Mutex<SessionData>>,
    /// 当前请求的取消令牌
    cancel_token: std::sync::Mutex<Option<CancellationToken>>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            data: Arc::new(Mutex::new(SessionData::new())),
            cancel_token: std::sync::Mutex::new(None),
        }
    }

    /// 为新请求创建取消令牌（替换旧令牌）
    pub fn new_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.cancel_token.lock() {
            *slot = Some(token.clone());
        }
        token
    }

    /// 取消当前请求；没有进行中的请求时返回 false
    pub fn cancel(&self) -> bool {
        match self.cancel_token.lock().ok().and_then(|mut slot| slot.take()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 请求结束时清除令牌（令牌只在持有会话锁后创建，同一时刻至多一个）
    pub fn clear_cancel_token(&self) {
        if let Ok(mut slot) = self.cancel_token.lock() {
            *slot = None;
        }
    }

    /// 是否有请求正持有会话锁
    pub fn is_locked(&self) -> bool {
        self.data.try_lock().is_err()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// 持有期间独占会话；drop 时释放
pub struct SessionGuard {
    session: Arc<Session>,
    data: OwnedMutexGuard<SessionData>,
}

impl SessionGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }
}

impl Deref for SessionGuard {
    type Target = SessionData;

    fn deref(&self) -> &SessionData {
        &self.data
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }
}

/// 生成会话 ID：session_<UTC yyyymmdd_HHMMSS>_<8 位十六进制>
pub fn generate_session_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("session_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), suffix)
}

/// 会话存储：id → Arc<Session>
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已知 id 返回同一个会话；否则（未提供或未知）新建一个带新 id 的会话
    pub async fn get_or_create(&self, session_id: Option<&str>) -> Arc<Session> {
        if let Some(id) = session_id {
            if let Some(s) = self.sessions.read().await.get(id) {
                return s.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(s) = session_id.and_then(|id| sessions.get(id)) {
            return s.clone();
        }
        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }
        let session = Arc::new(Session::new(id.clone()));
        sessions.insert(id.clone(), session.clone());
        if let Some(requested) = session_id {
            tracing::info!(requested, session_id = %id, "unknown session id, created new session");
        } else {
            tracing::debug!(session_id = %id, "session created");
        }
        session
    }

    /// 按 id 查找；auto_create 时等同 get_or_create
    pub async fn get(&self, session_id: &str, auto_create: bool) -> Result<Arc<Session>, AgentError> {
        if auto_create {
            return Ok(self.get_or_create(Some(session_id)).await);
        }
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// 追加一条 turn，返回新长度；会话正被占用时返回 SessionBusy
    pub fn append_turn(&self, session: &Session, turn: Turn) -> Result<usize, AgentError> {
        let mut data = session
            .data
            .try_lock()
            .map_err(|_| AgentError::SessionBusy(session.id.clone()))?;
        data.turns.push(turn);
        data.touch();
        Ok(data.turns.len())
    }

    /// 最近 max_turns 条历史（拷贝）；会话正被占用时返回 SessionBusy
    pub fn get_history(&self, session: &Session, max_turns: usize) -> Result<Vec<Turn>, AgentError> {
        let data = session
            .data
            .try_lock()
            .map_err(|_| AgentError::SessionBusy(session.id.clone()))?;
        Ok(data.recent(max_turns))
    }

    /// 在 wait 内获取会话独占权，超时返回 SessionBusy
    pub async fn lock(&self, session: &Arc<Session>, wait: Duration) -> Result<SessionGuard, AgentError> {
        let data = tokio::time::timeout(wait, session.data.clone().lock_owned())
            .await
            .map_err(|_| AgentError::SessionBusy(session.id.clone()))?;
        Ok(SessionGuard {
            session: session.clone(),
            data,
        })
    }

    /// 删除会话（并取消其进行中的请求）
    pub async fn delete(&self, session_id: &str) -> bool {
        match self.sessions.write().await.remove(session_id) {
            Some(session) => {
                session.cancel();
                tracing::info!(session_id, "session deleted");
                true
            }
            None => false,
        }
    }

    /// 取消会话进行中的请求
    pub async fn cancel(&self, session_id: &str) -> Result<bool, AgentError> {
        let session = self.get(session_id, false).await?;
        Ok(session.cancel())
    }

    /// 清理空闲超过 ttl 的会话；正被占用的会话跳过
    pub async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| match s.data.try_lock() {
            Ok(data) => data.idle_for() < ttl,
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "expired sessions cleaned up");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_get_or_create_same_id_same_session() {
        let store = SessionStore::new();
        let a = store.get_or_create(None).await;
        let b = store.get_or_create(Some(&a.id)).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id_creates_fresh_session() {
        let store = SessionStore::new();
        let s = store.get_or_create(Some("session_bogus")).await;
        assert_ne!(s.id, "session_bogus");
        assert!(store.get("session_bogus", false).await.is_err());
        assert!(store.get(&s.id, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_append_and_history() {
        let store = SessionStore::new();
        let s = store.get_or_create(None).await;
        assert_eq!(store.append_turn(&s, Turn::user("q1")).unwrap(), 1);
        assert_eq!(store.append_turn(&s, Turn::assistant("a1")).unwrap(), 2);
        assert_eq!(store.append_turn(&s, Turn::user("q2")).unwrap(), 3);

        let history = store.get_history(&s, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a1");
        assert_eq!(history[1].content, "q2");
        assert_eq!(store.get_history(&s, 100).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_append_while_locked_is_busy() {
        let store = SessionStore::new();
        let s = store.get_or_create(None).await;
        let guard = store.lock(&s, Duration::from_millis(10)).await.unwrap();
        let err = store.append_turn(&s, Turn::user("q")).unwrap_err();
        assert!(matches!(err, AgentError::SessionBusy(_)));
        assert!(store.lock(&s, Duration::from_millis(10)).await.is_err());
        drop(guard);
        assert!(store.append_turn(&s, Turn::user("q")).is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_skips_locked_sessions() {
        let store = SessionStore::new();
        let idle = store.get_or_create(None).await;
        let busy = store.get_or_create(None).await;
        let _guard = store.lock(&busy, Duration::from_millis(10)).await.unwrap();

        let removed = store.cleanup_expired(Duration::ZERO).await;
        assert_eq!(removed, 1);
        assert!(store.get(&idle.id, false).await.is_err());
        assert!(store.get(&busy.id, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_and_delete() {
        let store = SessionStore::new();
        let s = store.get_or_create(None).await;
        assert!(!store.cancel(&s.id).await.unwrap());
        let token = s.new_cancel_token();
        assert!(store.cancel(&s.id).await.unwrap());
        assert!(token.is_cancelled());

        assert!(store.delete(&s.id).await);
        assert!(!store.delete(&s.id).await);
        assert!(matches!(
            store.cancel(&s.id).await,
            Err(AgentError::SessionNotFound(_))
        ));
    }
}
