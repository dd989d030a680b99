//! 任务对话记录（Transcript）
//!
//! 每个任务拥有一份按顺序增长的 Turn 列表：第 0 条总是 system；只追加、不删除。
//! start 会整体重置为 system + user 两条，调用方须保证每个任务只调用一次（长度 < 2 时）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Turn 内容：纯文本或结构化值（模型的解析后答复）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Structured(Value),
}

impl TurnContent {
    /// 发送给模型时的文本形式；结构化内容序列化为紧凑 JSON
    pub fn as_text(&self) -> String {
        match self {
            TurnContent::Text(s) => s.clone(),
            TurnContent::Structured(v) => v.to_string(),
        }
    }
}

/// 单条 Turn，追加后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: TurnContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(content.into()),
        }
    }

    pub fn assistant(content: TurnContent) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

/// 有序 Turn 序列
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重置为 [system, user(task_input)]，丢弃已有内容
    pub fn start(&mut self, task_input: impl Into<String>, system_prompt: impl Into<String>) {
        self.turns = vec![Turn::system(system_prompt), Turn::user(task_input)];
    }

    /// 是否仍需初始化（首个步骤）
    pub fn needs_start(&self) -> bool {
        self.turns.len() < 2
    }

    pub fn current(&self) -> &[Turn] {
        &self.turns
    }

    pub fn append_assistant(&mut self, content: TurnContent) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_resets_to_two_turns() {
        let mut t = Transcript::new();
        assert!(t.needs_start());
        t.start("Explain Article 14", "You are a teacher");
        assert_eq!(t.len(), 2);
        assert_eq!(t.current()[0].role, Role::System);
        assert_eq!(t.current()[1], Turn::user("Explain Article 14"));
        assert!(!t.needs_start());

        t.append_assistant(TurnContent::Text("ok".into()));
        t.start("again", "sys");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_append_assistant_structured() {
        let mut t = Transcript::new();
        t.start("q", "sys");
        t.append_assistant(TurnContent::Structured(json!({"speak": "hi"})));
        assert_eq!(t.len(), 3);
        let last = t.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content.as_text(), r#"{"speak":"hi"}"#);
    }

    #[test]
    fn test_serde_layout() {
        let mut t = Transcript::new();
        t.start("q", "sys");
        let s = serde_json::to_string(&t).unwrap();
        assert_eq!(
            s,
            r#"[{"role":"system","content":"sys"},{"role":"user","content":"q"}]"#
        );
        let back: Transcript = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }
}
