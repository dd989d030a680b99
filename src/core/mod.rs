//! 核心层：错误类型、重试策略、步骤阶段

pub mod error;
pub mod retry;
pub mod state;

pub use error::AgentError;
pub use retry::RetryPolicy;
pub use state::StepPhase;
