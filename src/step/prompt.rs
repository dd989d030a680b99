//! Prompt 模板与响应格式 Schema
//!
//! system 模板占位符：`{abilities}`、`{files}`、`{response_format}`；task 模板占位符：`{task}`。
//! 响应格式由 schemars 从 PlanFormat 生成，注入 system prompt 以减少模型输出格式错误。

use std::collections::HashMap;
use std::path::Path;

use schemars::{schema_for, JsonSchema};

use crate::core::AgentError;

const DEFAULT_SYSTEM_PROMPT: &str = "You are IASpire, an expert UPSC teacher. \
You craft factual and engaging lessons that answer a UPSC aspirant's query, \
grounded in current affairs, standard books and previous year questions.

You can use these abilities:
{abilities}

Files in your workspace:
{files}

Respond with a single JSON object and nothing else. It must follow this schema:
{response_format}

Abilities in abilities_sequence run in order; each one receives the output of the \
previous one as its `input` argument. When the lesson is complete, end the sequence \
with `finish` and put the full lesson in its final_output.";

const DEFAULT_TASK_PROMPT: &str = "Your task is:\n\n{task}\n\n\
Answer in the provided format.";

/// 计划的响应格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// 对学员说的话
    pub speak: String,
    /// 依次执行的能力调用
    pub abilities_sequence: Vec<AbilityCallFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct AbilityCallFormat {
    pub ability: AbilityCallBody,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct AbilityCallBody {
    /// 能力名，如 news_search、ask_book、write_file、finish
    pub name: String,
    /// 能力参数，依能力不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回计划响应格式的 JSON Schema 字符串，可拼入 system prompt
pub fn plan_format_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// system / task 两个模板
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplates {
    pub system: String,
    pub task: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            task: DEFAULT_TASK_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// 从目录加载 system.txt / task.txt，缺少的文件使用内置模板；目录本身不存在视为配置错误
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(AgentError::Config(format!(
                "prompts dir not found: {}",
                dir.display()
            )));
        }
        let defaults = Self::default();
        let read = |name: &str, fallback: String| -> Result<String, AgentError> {
            let path = dir.join(name);
            if path.exists() {
                std::fs::read_to_string(&path)
                    .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))
            } else {
                Ok(fallback)
            }
        };
        Ok(Self {
            system: read("system.txt", defaults.system)?,
            task: read("task.txt", defaults.task)?,
        })
    }

    /// 渲染 system prompt：能力清单、工作区文件列表、响应格式
    pub fn render_system(&self, abilities: &str, files: &[String]) -> String {
        let files = if files.is_empty() {
            "(none)".to_string()
        } else {
            files
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.system
            .replace("{abilities}", abilities)
            .replace("{files}", &files)
            .replace("{response_format}", &plan_format_schema_json())
    }

    /// 渲染 task prompt（作为第一条 User Turn）
    pub fn render_task(&self, task_input: &str) -> String {
        self.task.replace("{task}", task_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_plan_fields() {
        let schema = plan_format_schema_json();
        assert!(schema.contains("speak"));
        assert!(schema.contains("abilities_sequence"));
        assert!(schema.contains("args"));
    }

    #[test]
    fn test_render_default_templates() {
        let t = PromptTemplates::default();
        let system = t.render_system("- finish: Finish the task", &["notes.md".to_string()]);
        assert!(system.contains("- finish: Finish the task"));
        assert!(system.contains("- notes.md"));
        assert!(system.contains("abilities_sequence"));
        assert!(!system.contains("{abilities}"));
        assert!(!system.contains("{response_format}"));

        assert!(t.render_system("", &[]).contains("(none)"));
        assert!(t.render_task("Explain Article 14").contains("Explain Article 14"));
    }

    #[test]
    fn test_load_overrides_and_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("task.txt"), "Q: {task}").unwrap();
        let t = PromptTemplates::load(dir.path()).unwrap();
        assert_eq!(t.render_task("x"), "Q: x");
        assert_eq!(t.system, PromptTemplates::default().system);

        assert!(matches!(
            PromptTemplates::load(dir.path().join("missing")),
            Err(AgentError::Config(_))
        ));
    }
}
