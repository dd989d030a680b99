//! SQLite 存储
//!
//! tasks / steps 两张表；Transcript 与 additional_output 以 JSON 文本存储，时间为 UTC。
//! rusqlite 为同步接口，连接放在 Mutex 中，每次调用持锁时间很短。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::Transcript;
use crate::store::{Step, StepStatus, Task, TaskStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    task_id     TEXT PRIMARY KEY,
    input       TEXT NOT NULL,
    transcript  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS steps (
    step_id            TEXT PRIMARY KEY,
    task_id            TEXT NOT NULL REFERENCES tasks(task_id),
    input              TEXT,
    output             TEXT,
    additional_output  TEXT,
    is_last            INTEGER NOT NULL DEFAULT 0,
    status             TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    completed_at       TEXT
);
CREATE INDEX IF NOT EXISTS idx_steps_task ON steps(task_id);
";

impl ToSql for StepStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StepStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        task_id: row.get(0)?,
        input: row.get(1)?,
        transcript: json_column(row, 2)?,
        created_at: row.get(3)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        step_id: row.get(0)?,
        task_id: row.get(1)?,
        input: row.get(2)?,
        output: row.get(3)?,
        additional_output: opt_json_column(row, 4)?,
        is_last: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn to_json(value: &impl serde::Serialize) -> Result<String, AgentError> {
    serde_json::to_string(value).map_err(|e| AgentError::Store(e.to_string()))
}

/// SQLite 存储
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AgentError::Store(e.to_string()))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Store("sqlite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, input: &str) -> Result<Task, AgentError> {
        let task = Task::new(input);
        let transcript = to_json(&task.transcript)?;
        self.conn()?.execute(
            "INSERT INTO tasks (task_id, input, transcript, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task.task_id, task.input, transcript, task.created_at],
        )?;
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, AgentError> {
        self.conn()?
            .query_row(
                "SELECT task_id, input, transcript, created_at FROM tasks WHERE task_id = ?1",
                params![task_id],
                task_from_row,
            )
            .optional()?
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))
    }

    async fn create_step(&self, task_id: &str, input: Option<&str>) -> Result<Step, AgentError> {
        let conn = self.conn()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT task_id FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AgentError::TaskNotFound(task_id.to_string()));
        }
        let step = Step::new(task_id, input.map(String::from));
        conn.execute(
            "INSERT INTO steps (step_id, task_id, input, is_last, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                step.step_id,
                step.task_id,
                step.input,
                step.is_last,
                step.status,
                step.created_at
            ],
        )?;
        Ok(step)
    }

    async fn save_step(&self, step: &Step) -> Result<(), AgentError> {
        let additional = step.additional_output.as_ref().map(to_json).transpose()?;
        let updated = self.conn()?.execute(
            "UPDATE steps SET output = ?1, additional_output = ?2, is_last = ?3, status = ?4,
                              completed_at = ?5
             WHERE step_id = ?6",
            params![
                step.output,
                additional,
                step.is_last,
                step.status,
                step.completed_at,
                step.step_id
            ],
        )?;
        if updated == 0 {
            return Err(AgentError::Store(format!("step not found: {}", step.step_id)));
        }
        Ok(())
    }

    async fn save_transcript(&self, task_id: &str, transcript: &Transcript) -> Result<(), AgentError> {
        let json = to_json(transcript)?;
        let updated = self.conn()?.execute(
            "UPDATE tasks SET transcript = ?1 WHERE task_id = ?2",
            params![json, task_id],
        )?;
        if updated == 0 {
            return Err(AgentError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT step_id, task_id, input, output, additional_output, is_last, status,
                    created_at, completed_at
             FROM steps WHERE task_id = ?1 ORDER BY rowid",
        )?;
        let steps = stmt
            .query_map(params![task_id], step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(steps)
    }
}
