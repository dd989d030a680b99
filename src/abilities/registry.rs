//! 能力注册表
//!
//! 所有能力实现 Ability trait（name / description / parameters / execute），由 AbilityRegistry 按名注册与查找；
//! 注册顺序保留，用于生成 prompt 中的能力列表。invoke 时输出结构化审计日志（JSON），
//! 并将能力自身的失败统一转为 AgentError。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::abilities::{AbilityDescriptor, AbilityOutput, OutputType, ParameterSpec};
use crate::core::AgentError;

/// 能力执行失败：参数不符合声明，或执行本身失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbilityFailure {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

impl AbilityFailure {
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        AbilityFailure::Failed(cause.to_string())
    }
}

/// 能力 trait：名称、描述（供 LLM 理解）、参数声明、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Ability: Send + Sync {
    /// 能力名称（计划中 ability.name 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    fn output_type(&self) -> OutputType {
        OutputType::String
    }

    async fn execute(&self, task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure>;
}

/// 能力注册表：构造时注册，之后只读
#[derive(Default)]
pub struct AbilityRegistry {
    abilities: Vec<Arc<dyn Ability>>,
    index: HashMap<String, usize>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力；同名已存在时返回 DuplicateAbility
    pub fn register(&mut self, ability: impl Ability + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(ability))
    }

    pub fn register_arc(&mut self, ability: Arc<dyn Ability>) -> Result<(), AgentError> {
        let name = ability.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateAbility(name));
        }
        self.index.insert(name, self.abilities.len());
        self.abilities.push(ability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Ability>> {
        self.index.get(name).map(|&i| self.abilities[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按名调用能力：不存在返回 UnknownAbility，能力失败转为 AbilityExecution / InvalidArguments
    pub async fn invoke(
        &self,
        task_id: &str,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<AbilityOutput, AgentError> {
        let ability = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownAbility(name.to_string()))?;

        let start = Instant::now();
        let args_value = Value::Object(args.clone());
        let args_preview = args_preview(&args_value);
        let result = ability.execute(task_id, args_value).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AbilityFailure::InvalidArguments(_)) => "invalid_arguments",
            Err(AbilityFailure::Failed(_)) => "error",
        };
        let audit = serde_json::json!({
            "event": "ability_audit",
            "task_id": task_id,
            "ability": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "ability");

        result.map_err(|e| match e {
            AbilityFailure::InvalidArguments(reason) => AgentError::InvalidArguments {
                name: name.to_string(),
                reason,
            },
            AbilityFailure::Failed(cause) => AgentError::AbilityExecution {
                name: name.to_string(),
                cause,
            },
        })
    }

    /// 全部能力描述，按注册顺序
    pub fn describe_all(&self) -> Vec<AbilityDescriptor> {
        self.abilities
            .iter()
            .map(|a| AbilityDescriptor {
                name: a.name().to_string(),
                description: a.description().to_string(),
                parameters: a.parameters(),
                output_type: a.output_type(),
            })
            .collect()
    }

    /// 每行一个能力，拼入 system prompt
    pub fn prompt_listing(&self) -> String {
        self.describe_all()
            .iter()
            .map(|d| format!("- {}", d))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn names(&self) -> Vec<String> {
        self.abilities.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
