pub mod claude;
pub mod mock;
pub mod orchestrator;
pub mod session;

pub use claude::ClaudeProcessBackend;
pub use mock::MockBackend;
pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use session::{AgentBackend, AgentError, AgentEvent, AgentSession, SessionPurpose, SessionSpec};
