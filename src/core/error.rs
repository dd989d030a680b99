//! Agent 错误类型
//!
//! 步骤尝试内部产生的错误（计划解析、未知能力、能力执行、模型调用）统一走 RetryPolicy 重试；
//! 存储 / 配置 / 任务查找错误不在尝试内部产生，直接返回给调用方。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出无法解码为计划
    #[error("Malformed plan: {0}")]
    MalformedPlan(String),

    #[error("Unknown ability: {0}")]
    UnknownAbility(String),

    #[error("Duplicate ability name: {0}")]
    DuplicateAbility(String),

    /// 能力自身失败，携带能力名与原因
    #[error("Ability '{name}' failed: {cause}")]
    AbilityExecution { name: String, cause: String },

    #[error("Invalid arguments for ability '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 任务已结束（最后一步已完成或 Transcript 已达上限），不再执行新步骤
    #[error("Task already finished: {0}")]
    TaskFinished(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 重试耗尽；消息中带上最后一次尝试的错误
    #[error("Step failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AgentError>,
    },
}

impl AgentError {
    /// 是否属于「一次尝试」内的错误，可由 RetryPolicy 重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::MalformedPlan(_)
                | AgentError::UnknownAbility(_)
                | AgentError::AbilityExecution { .. }
                | AgentError::InvalidArguments { .. }
                | AgentError::Llm(_)
                | AgentError::PathEscape(_)
        )
    }

    /// 去掉 RetriesExhausted 包装，返回最后一次尝试的原始错误
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_ability() {
        let err = AgentError::RetriesExhausted {
            attempts: 3,
            source: Box::new(AgentError::UnknownAbility("fly_to_moon".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("fly_to_moon"));
        assert!(matches!(err.root(), AgentError::UnknownAbility(n) if n == "fly_to_moon"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::MalformedPlan("x".into()).is_retryable());
        assert!(AgentError::Llm(LlmError::Timeout).is_retryable());
        assert!(!AgentError::Store("disk".into()).is_retryable());
        assert!(!AgentError::TaskNotFound("t".into()).is_retryable());
        assert!(!AgentError::TaskFinished("t".into()).is_retryable());
    }
}
