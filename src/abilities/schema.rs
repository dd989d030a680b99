//! 能力的声明式描述：参数 schema、输出类型、输出值、内置能力集合
//!
//! 内置能力以 AbilityKind 闭集合表示，按名称解析为枚举标签；每个能力的参数在执行时
//! 通过 parse_args 反序列化为显式的参数结构体。

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::abilities::AbilityFailure;

/// 调用链中上一个能力输出的保留参数名
pub const INPUT_ARG: &str = "input";

/// 字节型 input 的包装字段：`{"base64": "..."}`
pub const BYTES_TAG: &str = "base64";

/// 能力参数中的 input：文本、带标签的字节，或模型自行给出的其它 JSON
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PipedInput {
    Text(String),
    Bytes { base64: String },
    Other(Value),
}

impl PipedInput {
    /// 还原为原始字节；字节标签按 base64 解码
    pub fn into_bytes(self) -> Result<Vec<u8>, AbilityFailure> {
        match self {
            PipedInput::Text(s) => Ok(s.into_bytes()),
            PipedInput::Bytes { base64 } => base64::engine::general_purpose::STANDARD
                .decode(base64)
                .map_err(|e| AbilityFailure::InvalidArguments(format!("invalid base64 input: {}", e))),
            PipedInput::Other(v) => Ok(v.to_string().into_bytes()),
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// 输出类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Bytes,
    List,
}

/// 能力描述（供 prompt 展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub output_type: OutputType,
}

impl fmt::Display for AbilityDescriptor {
    /// 形如 `name: description. Params: (query: string, topics: list)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.param_type))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}: {}. Params: ({})", self.name, self.description, params)
    }
}

/// 能力输出：文本或字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbilityOutput {
    Text(String),
    Bytes(Vec<u8>),
}

impl AbilityOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AbilityOutput::Text(s) => Some(s),
            AbilityOutput::Bytes(_) => None,
        }
    }

    /// 作为下一个能力的 input 参数；字节包装为 `{"base64": ...}`，由 PipedInput 还原
    pub fn to_value(&self) -> Value {
        match self {
            AbilityOutput::Text(s) => Value::String(s.clone()),
            AbilityOutput::Bytes(b) => {
                let mut tagged = Map::new();
                tagged.insert(
                    BYTES_TAG.to_string(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
                );
                Value::Object(tagged)
            }
        }
    }

    /// 日志预览，最多 max_chars 个字符
    pub fn preview(&self, max_chars: usize) -> String {
        match self {
            AbilityOutput::Text(s) if s.chars().count() > max_chars => {
                format!("{}...", s.chars().take(max_chars).collect::<String>())
            }
            AbilityOutput::Text(s) => s.clone(),
            AbilityOutput::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<String> for AbilityOutput {
    fn from(s: String) -> Self {
        AbilityOutput::Text(s)
    }
}

impl From<&str> for AbilityOutput {
    fn from(s: &str) -> Self {
        AbilityOutput::Text(s.to_string())
    }
}

impl Serialize for AbilityOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AbilityOutput::Text(s) => serializer.serialize_str(s),
            AbilityOutput::Bytes(b) => serializer
                .serialize_str(&base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }
}

/// 内置能力的闭集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbilityKind {
    Finish,
    NewsSearch,
    PreviousYearQuestionsSearch,
    AskBook,
    WriteFile,
    ReadFile,
    ListFiles,
}

impl AbilityKind {
    pub const ALL: [AbilityKind; 7] = [
        AbilityKind::Finish,
        AbilityKind::NewsSearch,
        AbilityKind::PreviousYearQuestionsSearch,
        AbilityKind::AskBook,
        AbilityKind::WriteFile,
        AbilityKind::ReadFile,
        AbilityKind::ListFiles,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AbilityKind::Finish => "finish",
            AbilityKind::NewsSearch => "news_search",
            AbilityKind::PreviousYearQuestionsSearch => "previous_year_questions_search",
            AbilityKind::AskBook => "ask_book",
            AbilityKind::WriteFile => "write_file",
            AbilityKind::ReadFile => "read_file",
            AbilityKind::ListFiles => "list_files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl FromStr for AbilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("not a built-in ability: {s}"))
    }
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 将 JSON 参数反序列化为能力的参数结构体
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AbilityFailure> {
    serde_json::from_value(args).map_err(|e| AbilityFailure::InvalidArguments(e.to_string()))
}
