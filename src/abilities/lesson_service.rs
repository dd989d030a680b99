//! 课程服务 HTTP 客户端
//!
//! 新闻 RAG、历年真题检索、教材问答三个能力共用：GET 请求携带 JSON body，
//! 超时由 reqwest Client 或单次请求覆盖。

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::abilities::AbilityFailure;

/// 服务端点的共享客户端
#[derive(Debug, Clone)]
pub struct LessonServiceClient {
    client: Client,
    base_url: String,
}

/// 一次调用的响应：状态码 + 原始文本
#[derive(Debug)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ServiceResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json(&self) -> Result<Value, AbilityFailure> {
        serde_json::from_str(&self.body)
            .map_err(|e| AbilityFailure::failed(format!("Invalid JSON response: {}", e)))
    }
}

impl LessonServiceClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET + JSON body；timeout 为 Some 时覆盖客户端默认超时
    pub async fn get_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse, AbilityFailure> {
        let url = self.endpoint(path);
        let mut req = self.client.get(&url).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AbilityFailure::failed(format!("Request failed: {}", e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AbilityFailure::failed(format!("Read body failed: {}", e)))?;
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, "Lesson service returned error status");
        }
        Ok(ServiceResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let c = LessonServiceClient::new("https://example.com/async/", 5);
        assert_eq!(c.endpoint("/news-rag/"), "https://example.com/async/news-rag/");
        assert_eq!(c.endpoint("book-rag/x/"), "https://example.com/async/book-rag/x/");
    }
}
