//! news_search：结合时事检索（新闻 RAG 服务）

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::abilities::{
    parse_args, Ability, AbilityFailure, AbilityKind, AbilityOutput, LessonServiceClient,
    ParameterSpec,
};

const NEWS_RAG_PATH: &str = "news-rag/";

#[derive(Debug, Deserialize)]
struct NewsArgs {
    query: String,
}

/// 新闻检索能力：返回服务响应中的 response 字段（Markdown 文本）
pub struct NewsSearchAbility {
    service: LessonServiceClient,
}

impl NewsSearchAbility {
    pub fn new(service: LessonServiceClient) -> Self {
        Self { service }
    }
}

/// 从服务 JSON 中取出 response 字段；非字符串时序列化输出
pub(crate) fn extract_response(body: &Value) -> Result<String, AbilityFailure> {
    match body.get("response") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(AbilityFailure::failed("Response missing 'response' field")),
    }
}

#[async_trait]
impl Ability for NewsSearchAbility {
    fn name(&self) -> &str {
        AbilityKind::NewsSearch.as_str()
    }

    fn description(&self) -> &str {
        "Use this to contextualize the user query with current affairs, an important part of the UPSC exam preparation. \
         Searches reliable news sources for the latest information, background, and how to use it for UPSC"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "query",
            "string",
            "The UPSC topic the user wants to learn about in the context of current affairs",
        )]
    }

    async fn execute(&self, _task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: NewsArgs = parse_args(args)?;
        let resp = self
            .service
            .get_json(NEWS_RAG_PATH, &json!({ "query": args.query }), None)
            .await?;
        if !resp.is_success() {
            return Err(AbilityFailure::failed(format!(
                "Failed to get data from the endpoint. Status Code: {}",
                resp.status.as_u16()
            )));
        }
        extract_response(&resp.json()?).map(AbilityOutput::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_response() {
        assert_eq!(
            extract_response(&json!({"response": "## Electoral Bonds"})).unwrap(),
            "## Electoral Bonds"
        );
        assert_eq!(extract_response(&json!({"response": {"a": 1}})).unwrap(), r#"{"a":1}"#);
        assert!(extract_response(&json!({"other": 1})).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_fails() {
        let ability = NewsSearchAbility::new(LessonServiceClient::new("http://127.0.0.1:1", 2));
        let err = ability
            .execute("t1", json!({"query": "Elephant corridors"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AbilityFailure::Failed(msg) if msg.starts_with("Request failed")));
    }
}
