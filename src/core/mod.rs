//! 核心层：错误类型、会话与会话监管

pub mod error;
pub mod session;
pub mod session_supervisor;

pub use error::{AgentError, IndexError, IngestError, LlmError, SearchError};
pub use session::AgentSession;
pub use session_supervisor::{SessionHandle, SessionSupervisor};
