//! 内存存储（测试与单进程使用）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::memory::Transcript;
use crate::store::{Step, Task, TaskStore};

/// 内存存储：任务表 + 每个任务的步骤列表
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<String, Task>>,
    steps: RwLock<HashMap<String, Vec<Step>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, input: &str) -> Result<Task, AgentError> {
        let task = Task::new(input);
        self.tasks
            .write()
            .await
            .insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, AgentError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))
    }

    async fn create_step(&self, task_id: &str, input: Option<&str>) -> Result<Step, AgentError> {
        if !self.tasks.read().await.contains_key(task_id) {
            return Err(AgentError::TaskNotFound(task_id.to_string()));
        }
        let step = Step::new(task_id, input.map(String::from));
        self.steps
            .write()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push(step.clone());
        Ok(step)
    }

    async fn save_step(&self, step: &Step) -> Result<(), AgentError> {
        let mut steps = self.steps.write().await;
        let slot = steps
            .get_mut(&step.task_id)
            .and_then(|list| list.iter_mut().find(|s| s.step_id == step.step_id))
            .ok_or_else(|| AgentError::Store(format!("step not found: {}", step.step_id)))?;
        *slot = step.clone();
        Ok(())
    }

    async fn save_transcript(&self, task_id: &str, transcript: &Transcript) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
        task.transcript = transcript.clone();
        Ok(())
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, AgentError> {
        Ok(self
            .steps
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StepStatus;

    #[tokio::test]
    async fn test_task_and_step_lifecycle() {
        let store = InMemoryStore::new();
        let task = store.create_task("Explain Article 14").await.unwrap();
        assert!(task.transcript.is_empty());
        assert_eq!(store.get_task(&task.task_id).await.unwrap(), task);

        let mut step = store.create_step(&task.task_id, Some("go")).await.unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        step.status = StepStatus::Completed;
        step.output = Some("done".into());
        store.save_step(&step).await.unwrap();

        let steps = store.list_steps(&task.task_id).await.unwrap();
        assert_eq!(steps, vec![step]);
    }

    #[tokio::test]
    async fn test_missing_task() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_task("nope").await,
            Err(AgentError::TaskNotFound(_))
        ));
        assert!(store.create_step("nope", None).await.is_err());
        assert!(store.save_transcript("nope", &Transcript::new()).await.is_err());
    }
}
