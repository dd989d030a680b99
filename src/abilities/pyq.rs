//! previous_year_questions_search：历年真题检索
//!
//! 服务只返回题目 id（高相关在前，低相关在后），题干与选项从本地题库 JSON 中查出，
//! 最多取 max_questions 道，渲染为 XML 交给模型。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::abilities::{
    parse_args, Ability, AbilityFailure, AbilityKind, AbilityOutput, LessonServiceClient,
    ParameterSpec,
};
use crate::core::AgentError;

const PYQ_RETRIEVAL_PATH: &str = "custom-pyq-retrieval/";
/// 无结果时的固定回复
pub const NO_QUESTIONS_FOUND: &str = "No Questions Found.";
const OPTION_LABELS: [&str; 10] = [
    "(a)", "(b)", "(c)", "(d)", "(e)", "(f)", "(g)", "(h)", "(i)", "(j)",
];

/// 题库中的一道题
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PyqQuestion {
    pub id: Value,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// 本地题库：id -> 题目
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: HashMap<String, PyqQuestion>,
}

fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl QuestionBank {
    pub fn from_questions(questions: Vec<PyqQuestion>) -> Self {
        Self {
            questions: questions.into_iter().map(|q| (id_key(&q.id), q)).collect(),
        }
    }

    /// 从 JSON 文件加载（数组，每项含 id / question / options）
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("question bank {}: {}", path.display(), e)))?;
        let questions: Vec<PyqQuestion> = serde_json::from_str(&data)
            .map_err(|e| AgentError::Config(format!("question bank {}: {}", path.display(), e)))?;
        Ok(Self::from_questions(questions))
    }

    pub fn get(&self, id: &Value) -> Option<&PyqQuestion> {
        self.questions.get(&id_key(id))
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// 题目列表渲染为 XML；题目 id 属性为结果中的序号
pub fn questions_to_xml(questions: &[&PyqQuestion]) -> String {
    let mut xml = String::from("<questions>\n");
    for (i, q) in questions.iter().enumerate() {
        xml.push_str(&format!("  <question id={}>\n", i));
        xml.push_str(&format!("    <text>{}</text>\n", q.question));
        xml.push_str("    <options>\n");
        for (label, option) in OPTION_LABELS.iter().zip(&q.options) {
            xml.push_str(&format!("      <option>{} {}</option>\n", label, option));
        }
        xml.push_str("    </options>\n");
        xml.push_str("  </question>\n");
    }
    xml.push_str("</questions>");
    xml
}

/// 从服务响应中按顺序取出题目 id：high_relevance_ids 在前，low_relevance_ids_scores 在后
pub(crate) fn collect_question_ids(body: &Value) -> Vec<Value> {
    let response = body.get("response").unwrap_or(&Value::Null);
    ["high_relevance_ids", "low_relevance_ids_scores"]
        .iter()
        .filter_map(|key| response.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter_map(|pair| match pair {
            Value::Array(items) => items.first().cloned(),
            _ => None,
        })
        .collect()
}

fn default_start_year() -> u32 {
    1993
}

fn default_end_year() -> u32 {
    2023
}

#[derive(Debug, Deserialize)]
struct PyqArgs {
    query: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default = "default_start_year")]
    start_year: u32,
    #[serde(default = "default_end_year")]
    end_year: u32,
}

/// 历年真题检索能力
pub struct PyqSearchAbility {
    service: LessonServiceClient,
    bank: QuestionBank,
    max_questions: usize,
}

impl PyqSearchAbility {
    pub fn new(service: LessonServiceClient, bank: QuestionBank, max_questions: usize) -> Self {
        Self {
            service,
            bank,
            max_questions,
        }
    }

    fn render(&self, ids: &[Value]) -> String {
        let questions: Vec<&PyqQuestion> = ids
            .iter()
            .filter_map(|id| self.bank.get(id))
            .take(self.max_questions)
            .collect();
        if questions.is_empty() {
            NO_QUESTIONS_FOUND.to_string()
        } else {
            questions_to_xml(&questions)
        }
    }
}

#[async_trait]
impl Ability for PyqSearchAbility {
    fn name(&self) -> &str {
        AbilityKind::PreviousYearQuestionsSearch.as_str()
    }

    fn description(&self) -> &str {
        "Searches for past year UPSC Prelims questions relevant to the query. Returns questions formatted in XML \
         in decreasing order of relevance. Example queries: Polity, agriculture, Chola Dynasty, Article 14 of the Constitution"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("query", "string", "Query to retrieve past year questions"),
            ParameterSpec::optional("topics", "list", "Topics to filter by"),
            ParameterSpec::optional("start_year", "integer", "Earliest exam year, default 1993"),
            ParameterSpec::optional("end_year", "integer", "Latest exam year, default 2023"),
        ]
    }

    async fn execute(&self, _task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: PyqArgs = parse_args(args)?;
        let body = json!({
            "query": args.query,
            "topics": args.topics,
            "start_year": args.start_year,
            "end_year": args.end_year,
        });
        let resp = self.service.get_json(PYQ_RETRIEVAL_PATH, &body, None).await?;
        if !resp.is_success() {
            return Ok(AbilityOutput::Text(NO_QUESTIONS_FOUND.to_string()));
        }
        let ids = collect_question_ids(&resp.json()?);
        Ok(AbilityOutput::Text(self.render(&ids)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> QuestionBank {
        QuestionBank::from_questions(vec![
            PyqQuestion {
                id: json!(7),
                question: "The provisions in the Fifth Schedule and Sixth Schedule are made in order to (2015)".into(),
                options: vec![
                    "protect the interests of Scheduled Tribes".into(),
                    "determine the boundaries between states".into(),
                ],
            },
            PyqQuestion {
                id: json!("q-9"),
                question: "Article 14 guarantees".into(),
                options: vec!["equality before law".into()],
            },
        ])
    }

    #[test]
    fn test_collect_ids_order() {
        let body = json!({"response": {
            "high_relevance_ids": [["q-9", 0.9]],
            "low_relevance_ids_scores": [[7, 0.2], [100, 0.1]],
        }});
        assert_eq!(collect_question_ids(&body), vec![json!("q-9"), json!(7), json!(100)]);
        assert!(collect_question_ids(&json!({})).is_empty());
    }

    #[test]
    fn test_xml_rendering() {
        let bank = bank();
        let q = bank.get(&json!(7)).unwrap();
        let xml = questions_to_xml(&[q]);
        assert!(xml.starts_with("<questions>\n  <question id=0>\n"));
        assert!(xml.contains("      <option>(a) protect the interests of Scheduled Tribes</option>\n"));
        assert!(xml.contains("      <option>(b) determine the boundaries between states</option>\n"));
        assert!(xml.ends_with("  </question>\n</questions>"));
    }

    #[test]
    fn test_render_limits_and_skips_unknown_ids() {
        let ability = PyqSearchAbility::new(LessonServiceClient::new("http://localhost", 1), bank(), 1);
        let out = ability.render(&[json!(100), json!("q-9"), json!(7)]);
        assert!(out.contains("Article 14 guarantees"));
        assert!(!out.contains("Fifth Schedule"));
        assert_eq!(ability.render(&[json!(100)]), NO_QUESTIONS_FOUND);
    }

    #[test]
    fn test_load_bank_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyqs.json");
        std::fs::write(&path, r#"[{"id": 1, "question": "Q?", "options": ["x", "y"]}]"#).unwrap();
        let bank = QuestionBank::load(&path).unwrap();
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.get(&json!(1)).unwrap().options.len(), 2);
        assert!(QuestionBank::load(&dir.path().join("missing.json")).is_err());
    }
}
