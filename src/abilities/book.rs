//! ask_book：针对 UPSC 教材提问（教材 RAG 服务）
//!
//! 模型给出的书名先与已知书目做模糊匹配（Ratcliff/Obershelp 相似度），再映射为服务端书目 id。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::abilities::{
    parse_args, Ability, AbilityFailure, AbilityKind, AbilityOutput, LessonServiceClient,
    ParameterSpec,
};

const BOOK_RAG_PATH: &str = "book-rag/book_rag_for_agent/";

/// 已知书目：(标题, 服务端 id)
pub const BOOKS: [(&str, &str); 6] = [
    ("Indian Polity for Civil Services Examinations", "polity_laxmikanth"),
    ("Brief History of Modern India", "india_ahir"),
    ("India After Ghandi", "democracy_guha"),
    ("Indian Art and Culture", "culture_singhania"),
    ("Indian Economy", "economy_singh"),
    ("PMF IAS Environment", "ias_thamminidi"),
];

/// 两个字符序列中匹配字符总数（递归取最长公共子串）
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (mut best, mut a_start, mut b_start) = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                cur[j] = prev[j - 1] + 1;
                if cur[j] > best {
                    best = cur[j];
                    a_start = i - best;
                    b_start = j - best;
                }
            }
        }
        prev = cur;
    }
    if best == 0 {
        return 0;
    }
    best + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + best..], &b[b_start + best..])
}

/// 相似度 2*M / (|a| + |b|)，范围 [0, 1]
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// 返回与输入最接近的书目 (标题, id)；相同分数取靠前者
pub fn closest_book(input: &str) -> (&'static str, &'static str) {
    let mut best = BOOKS[0];
    let mut best_ratio = similarity_ratio(input, best.0);
    for book in &BOOKS[1..] {
        let ratio = similarity_ratio(input, book.0);
        if ratio > best_ratio {
            best_ratio = ratio;
            best = *book;
        }
    }
    best
}

#[derive(Debug, Deserialize)]
struct AskBookArgs {
    book: String,
    query: String,
}

/// 教材问答能力
pub struct AskBookAbility {
    service: LessonServiceClient,
    timeout: Duration,
}

impl AskBookAbility {
    pub fn new(service: LessonServiceClient, timeout_secs: u64) -> Self {
        Self {
            service,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Ability for AskBookAbility {
    fn name(&self) -> &str {
        AbilityKind::AskBook.as_str()
    }

    fn description(&self) -> &str {
        "Ask a question about a book containing UPSC relevant content and get a well informed response with citations. \
         Books: Indian Polity for Civil Services Examinations; Brief History of Modern India; India After Ghandi; \
         Indian Art and Culture; Indian Economy; PMF IAS Environment"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "book",
                "string",
                "Name of the book to search. This should be the exact title that was listed.",
            ),
            ParameterSpec::required("query", "string", "The question"),
        ]
    }

    async fn execute(&self, _task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: AskBookArgs = parse_args(args)?;
        let (title, book_id) = closest_book(&args.book);
        tracing::debug!(requested = %args.book, matched = %title, "ask_book title match");
        let resp = self
            .service
            .get_json(
                BOOK_RAG_PATH,
                &json!({ "book": book_id, "query": args.query }),
                Some(self.timeout),
            )
            .await?;
        if !resp.is_success() {
            return Err(AbilityFailure::failed(format!(
                "Failed to get data from the endpoint. Status Code: {}",
                resp.status.as_u16()
            )));
        }
        Ok(AbilityOutput::Text(resp.body))
    }
}
