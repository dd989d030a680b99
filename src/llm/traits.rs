//! LLM 客户端抽象
//!
//! 执行循环只依赖 LlmClient::complete：携带完整 Transcript、模型名与温度，返回一次完成结果。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Turn;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Empty response")]
    EmptyResponse,
}

/// 一次完成请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub turns: Vec<Turn>,
    pub model: String,
    pub temperature: f32,
}

/// 模型输出的主体内容：文本、字节或已经结构化的值
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Text(String),
    Bytes(Vec<u8>),
    Structured(Value),
}

impl From<&str> for ModelOutput {
    fn from(s: &str) -> Self {
        ModelOutput::Text(s.to_string())
    }
}

impl From<String> for ModelOutput {
    fn from(s: String) -> Self {
        ModelOutput::Text(s)
    }
}

impl From<Value> for ModelOutput {
    fn from(v: Value) -> Self {
        ModelOutput::Structured(v)
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelOutput, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
