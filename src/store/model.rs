//! 任务与步骤记录

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Transcript;

/// 任务：原始输入 + 随步骤增长的 Transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub input: String,
    pub transcript: Transcript,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            input: input.into(),
            transcript: Transcript::new(),
            created_at: Utc::now(),
        }
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// 单个步骤记录：执行中原地修改，持久化后不再变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub task_id: String,
    pub step_id: String,
    pub input: Option<String>,
    pub output: Option<String>,
    /// 各能力输出轨迹等附加信息
    pub additional_output: Option<Value>,
    pub is_last: bool,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(task_id: impl Into<String>, input: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: uuid::Uuid::new_v4().to_string(),
            input,
            output: None,
            additional_output: None,
            is_last: false,
            status: StepStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
