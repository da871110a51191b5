//! 会话：turn 数据模型、会话存储与回滚

pub mod rollback;
pub mod store;
pub mod turn;

pub use rollback::{Checkpoint, RollbackManager, RollbackOutcome};
pub use store::{generate_session_id, Session, SessionData, SessionGuard, SessionStore};
pub use turn::{Turn, TurnRole};
