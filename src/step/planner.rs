//! Planner：请求模型并把输出解析为计划
//!
//! normalize 把模型输出（结构化值 / 文本 / 字节）统一为一个 JSON 值，
//! Plan::from_value 再做结构提取；两步都不校验能力名，未知能力在执行时才报错。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::abilities::AbilityKind;
use crate::core::AgentError;
use crate::llm::{CompletionRequest, LlmClient, ModelOutput};
use crate::memory::Transcript;

/// 计划中的一次能力调用
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityInvocation {
    pub name: String,
    pub args: Map<String, Value>,
}

impl AbilityInvocation {
    pub fn kind(&self) -> Option<AbilityKind> {
        AbilityKind::from_name(&self.name)
    }

    pub fn is_finish(&self) -> bool {
        self.kind() == Some(AbilityKind::Finish)
    }
}

/// 一次模型调用得到的计划：speak 文本 + 有序能力调用
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub speak: String,
    pub abilities_sequence: Vec<AbilityInvocation>,
    /// 最后一个能力的文本输出（执行后填入，仅供外部查看）
    pub final_output: Option<String>,
    raw: Value,
}

impl Plan {
    /// 从已解码的 JSON 提取计划；缺少 abilities_sequence 视为空序列
    pub fn from_value(value: Value) -> Result<Self, AgentError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgentError::MalformedPlan(format!("expected a JSON object, got {}", value)))?;

        let speak = obj
            .get("speak")
            .or_else(|| obj.get("thoughts").and_then(|t| t.get("speak")))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let abilities_sequence = match obj.get("abilities_sequence") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_invocation(i, item))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(AgentError::MalformedPlan(format!(
                    "abilities_sequence must be a list, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            speak,
            abilities_sequence,
            final_output: None,
            raw: value,
        })
    }

    /// 模型的原始答复（已解码）
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// 写入 Transcript 的 assistant 内容：原始答复 + final_output
    pub fn answer_value(&self) -> Value {
        let mut answer = self.raw.clone();
        if let (Some(obj), Some(out)) = (answer.as_object_mut(), &self.final_output) {
            obj.insert("final_output".to_string(), Value::String(out.clone()));
        }
        answer
    }
}

/// 支持 {"ability": {"name", "args"}} 与扁平的 {"name", "args"} 两种写法
fn parse_invocation(index: usize, item: &Value) -> Result<AbilityInvocation, AgentError> {
    let body = item.get("ability").unwrap_or(item);
    let name = body
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            AgentError::MalformedPlan(format!("abilities_sequence[{}] has no ability name", index))
        })?
        .to_string();
    let args = match body.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(other) => {
            return Err(AgentError::MalformedPlan(format!(
                "args of '{}' must be an object, got {}",
                name, other
            )))
        }
    };
    Ok(AbilityInvocation { name, args })
}

/// 去掉 ```json ... ``` 代码块包裹；首行的语言标记（json、JSON 等）一并去掉
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(i) if !rest[..i].contains('{') => &rest[i + 1..],
        _ => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 统一模型输出为 JSON 值：结构化直接透传，字节按 UTF-8 解码，文本严格解析
pub fn normalize(output: &ModelOutput) -> Result<Value, AgentError> {
    match output {
        ModelOutput::Structured(v) => Ok(v.clone()),
        ModelOutput::Bytes(b) => {
            let text = std::str::from_utf8(b)
                .map_err(|e| AgentError::MalformedPlan(format!("response is not UTF-8: {}", e)))?;
            decode_text(text)
        }
        ModelOutput::Text(t) => decode_text(t),
    }
}

fn decode_text(text: &str) -> Result<Value, AgentError> {
    let json_str = strip_code_fence(text);
    serde_json::from_str(json_str).map_err(|e| AgentError::MalformedPlan(format!("{}: {}", e, json_str)))
}

/// 解析模型输出为计划
pub fn parse_plan(output: &ModelOutput) -> Result<Plan, AgentError> {
    Plan::from_value(normalize(output)?)
}

/// Planner：持有 LLM、模型名与温度，每次以完整 Transcript 发起一次完成请求
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn complete(&self, transcript: &Transcript) -> Result<ModelOutput, AgentError> {
        let request = CompletionRequest {
            turns: transcript.current().to_vec(),
            model: self.model.clone(),
            temperature: self.temperature,
        };
        Ok(self.llm.complete(&request).await?)
    }
}
