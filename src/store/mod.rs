//! 任务 / 步骤存储抽象层
//!
//! 定义统一的存储接口，支持内存和 SQLite 两种实现；返回的记录均已落盘（或已写入内存），
//! 执行循环不对存储调用做重试。

pub mod memory;
pub mod model;
pub mod sqlite;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::Transcript;

pub use memory::InMemoryStore;
pub use model::{Step, StepStatus, Task};
pub use sqlite::SqliteStore;

/// 存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 创建任务（Transcript 为空）
    async fn create_task(&self, input: &str) -> Result<Task, AgentError>;

    /// 获取任务；不存在返回 TaskNotFound
    async fn get_task(&self, task_id: &str) -> Result<Task, AgentError>;

    /// 创建步骤（分配 id，状态 pending）
    async fn create_step(&self, task_id: &str, input: Option<&str>) -> Result<Step, AgentError>;

    /// 保存步骤最终状态
    async fn save_step(&self, step: &Step) -> Result<(), AgentError>;

    /// 保存任务的 Transcript
    async fn save_transcript(&self, task_id: &str, transcript: &Transcript) -> Result<(), AgentError>;

    /// 按创建顺序列出任务的全部步骤
    async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, AgentError>;
}
