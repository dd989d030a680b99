//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序回放预置的响应并记录每次请求；预置用完后回显最后一条 User 消息，
//! 以 finish 能力结束任务，便于本地跑通整个步骤流程。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{CompletionRequest, LlmClient, LlmError, ModelOutput};
use crate::memory::Role;

/// Mock 客户端：脚本化响应 + 请求记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ModelOutput, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组响应构造
    pub fn scripted(responses: impl IntoIterator<Item = Result<ModelOutput, LlmError>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<ModelOutput, LlmError>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(response);
        }
    }

    /// 追加一条响应，重复 n 次
    pub fn push_repeated(&self, response: Result<ModelOutput, LlmError>, n: usize) {
        for _ in 0..n {
            self.push(response.clone());
        }
    }

    /// 已收到的请求快照
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelOutput, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(response) = next {
            return response;
        }

        let last_user = request
            .turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_text())
            .unwrap_or_else(|| "(no input)".to_string());

        Ok(ModelOutput::Structured(json!({
            "speak": format!("Echo from Mock: {}", last_user),
            "abilities_sequence": [
                {"ability": {"name": "finish", "args": {
                    "reason": "mock model",
                    "final_output": last_user,
                }}}
            ]
        })))
    }
}
