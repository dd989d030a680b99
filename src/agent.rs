//! ForgeAgent：任务与步骤的对外入口
//!
//! create_task 创建任务，execute_step 对任务跑一个步骤：
//! 读取任务 -> 创建步骤 -> 状态机执行 -> 成功则保存步骤与 Transcript，失败则把步骤标记为 failed 后返回错误。
//! 同一任务的步骤通过任务级互斥锁串行执行，不同任务互不阻塞。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::abilities::{
    AbilityRegistry, AskBookAbility, FinishAbility, LessonServiceClient, ListFilesAbility,
    NewsSearchAbility, PyqSearchAbility, QuestionBank, ReadFileAbility, WriteFileAbility,
};
use crate::config::{AbilitiesSection, AppConfig, StoreBackend};
use crate::core::{AgentError, RetryPolicy};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::step::{run_step, Planner, PromptTemplates, StepContext, StepEvent, DEFAULT_TURN_LIMIT};
use crate::store::{InMemoryStore, SqliteStore, Step, StepStatus, Task, TaskStore};
use crate::workspace::{LocalWorkspace, Workspace};

/// 日志中任务输入的最大字符数
const INPUT_LOG_CHARS: usize = 40;

/// 每个步骤的模型设置
#[derive(Debug, Clone)]
pub struct StepSettings {
    pub model: String,
    pub temperature: f32,
    /// Transcript 达到此长度时强制 is_last
    pub turn_limit: usize,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4-0125-preview".to_string(),
            temperature: 0.1,
            turn_limit: DEFAULT_TURN_LIMIT,
        }
    }
}

/// 根据配置创建 LLM 客户端；openai 无 API Key 时退回 Mock
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                Some(&key),
                cfg.llm.timeouts.request,
            ))
        }
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        _ => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 只含本地能力的注册表：finish 与工作区文件读写
pub fn local_registry(workspace: Arc<dyn Workspace>) -> Result<AbilityRegistry, AgentError> {
    let mut registry = AbilityRegistry::new();
    registry.register(FinishAbility)?;
    registry.register(WriteFileAbility::new(workspace.clone()))?;
    registry.register(ReadFileAbility::new(workspace.clone()))?;
    registry.register(ListFilesAbility::new(workspace))?;
    Ok(registry)
}

/// 全部内置能力：本地能力 + 课程服务（新闻、真题、教材问答）
pub fn builtin_registry(
    cfg: &AbilitiesSection,
    workspace: Arc<dyn Workspace>,
    bank: QuestionBank,
) -> Result<AbilityRegistry, AgentError> {
    let mut registry = local_registry(workspace)?;
    let service = LessonServiceClient::new(cfg.base_url.clone(), cfg.timeout_secs);
    registry.register(NewsSearchAbility::new(service.clone()))?;
    registry.register(PyqSearchAbility::new(service.clone(), bank, cfg.max_questions))?;
    registry.register(AskBookAbility::new(service, cfg.book_timeout_secs))?;
    Ok(registry)
}

/// 构建 ForgeAgent；未设置的部件使用默认值（本地能力、内置模板、3 次 / 5 秒重试）
pub struct ForgeAgentBuilder {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn TaskStore>,
    workspace: Arc<dyn Workspace>,
    registry: Option<AbilityRegistry>,
    templates: PromptTemplates,
    retry: RetryPolicy,
    settings: StepSettings,
    event_tx: Option<UnboundedSender<StepEvent>>,
}

impl ForgeAgentBuilder {
    pub fn registry(mut self, registry: AbilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(mut self, settings: StepSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 设置事件推送通道
    pub fn event_tx(mut self, tx: UnboundedSender<StepEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<ForgeAgent, AgentError> {
        let registry = match self.registry {
            Some(r) => r,
            None => local_registry(self.workspace.clone())?,
        };
        Ok(ForgeAgent {
            planner: Planner::new(self.llm, self.settings.model, self.settings.temperature),
            registry,
            store: self.store,
            workspace: self.workspace,
            templates: self.templates,
            retry: self.retry,
            turn_limit: self.settings.turn_limit,
            event_tx: self.event_tx,
            task_locks: Mutex::new(HashMap::new()),
        })
    }
}

/// 任务驱动的 Agent
pub struct ForgeAgent {
    planner: Planner,
    registry: AbilityRegistry,
    store: Arc<dyn TaskStore>,
    workspace: Arc<dyn Workspace>,
    templates: PromptTemplates,
    retry: RetryPolicy,
    turn_limit: usize,
    event_tx: Option<UnboundedSender<StepEvent>>,
    task_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ForgeAgent {
    pub fn builder(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn TaskStore>,
        workspace: Arc<dyn Workspace>,
    ) -> ForgeAgentBuilder {
        ForgeAgentBuilder {
            llm,
            store,
            workspace,
            registry: None,
            templates: PromptTemplates::default(),
            retry: RetryPolicy::default(),
            settings: StepSettings::default(),
            event_tx: None,
        }
    }

    /// 从配置创建：LLM、存储后端、工作区、全部内置能力与 prompt 模板
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let llm = create_llm_from_config(cfg);

        let store: Arc<dyn TaskStore> = match cfg.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(
                SqliteStore::open(&cfg.store.sqlite_path).with_context(|| {
                    format!("open sqlite store {}", cfg.store.sqlite_path.display())
                })?,
            ),
        };

        std::fs::create_dir_all(&cfg.app.workspace_root).with_context(|| {
            format!("create workspace {}", cfg.app.workspace_root.display())
        })?;
        let workspace: Arc<dyn Workspace> = Arc::new(LocalWorkspace::new(&cfg.app.workspace_root));

        let bank = match &cfg.abilities.question_bank {
            Some(path) => QuestionBank::load(path)
                .with_context(|| format!("load question bank {}", path.display()))?,
            None => {
                tracing::warn!("No question bank configured, previous year question search returns nothing");
                QuestionBank::default()
            }
        };
        let registry = builtin_registry(&cfg.abilities, workspace.clone(), bank)?;

        let templates = match &cfg.app.prompts_dir {
            Some(dir) => PromptTemplates::load(dir)?,
            None => PromptTemplates::default(),
        };

        let settings = StepSettings {
            model: cfg.llm.model.clone(),
            temperature: cfg.llm.temperature,
            turn_limit: cfg.agent.turn_limit,
        };
        let retry = RetryPolicy::fixed(
            cfg.agent.max_attempts,
            std::time::Duration::from_secs(cfg.agent.retry_delay_secs),
        );

        Ok(Self::builder(llm, store, workspace)
            .registry(registry)
            .templates(templates)
            .retry(retry)
            .settings(settings)
            .build()?)
    }

    pub fn registry(&self) -> &AbilityRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// 创建任务（Transcript 为空，首个步骤时初始化）
    pub async fn create_task(&self, input: &str) -> Result<Task, AgentError> {
        let task = self.store.create_task(input).await?;
        let preview: String = input.chars().take(INPUT_LOG_CHARS).collect();
        tracing::info!(task_id = %task.task_id, input = %preview, "Task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, AgentError> {
        self.store.get_task(task_id).await
    }

    pub async fn list_steps(&self, task_id: &str) -> Result<Vec<Step>, AgentError> {
        self.store.list_steps(task_id).await
    }

    fn task_lock(&self, task_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.task_locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(task_id.to_string()).or_default().clone()
    }

    /// 没有其他调用方持有该任务锁时移除表项（表本身与 lock 各占一个引用）
    fn release_task_lock(&self, task_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.task_locks.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(task_id);
        }
    }

    /// 执行任务的下一个步骤；任务已结束时返回 TaskFinished
    pub async fn execute_step(&self, task_id: &str, input: Option<&str>) -> Result<Step, AgentError> {
        let lock = self.task_lock(task_id);
        let result = {
            let _guard = lock.lock().await;
            self.execute_step_locked(task_id, input).await
        };
        self.release_task_lock(task_id, lock);
        result
    }

    /// 任务是否已结束：Transcript 达到上限，或最近一个步骤标记了 is_last
    async fn is_finished(&self, task: &Task) -> Result<bool, AgentError> {
        if task.transcript.len() >= self.turn_limit {
            return Ok(true);
        }
        let steps = self.store.list_steps(&task.task_id).await?;
        Ok(steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Completed)
            .map(|s| s.is_last)
            .unwrap_or(false))
    }

    async fn execute_step_locked(&self, task_id: &str, input: Option<&str>) -> Result<Step, AgentError> {
        let task = self.store.get_task(task_id).await?;
        if self.is_finished(&task).await? {
            tracing::warn!(task_id, "Step requested for a finished task");
            return Err(AgentError::TaskFinished(task_id.to_string()));
        }
        let mut step = self.store.create_step(task_id, input).await?;

        let ctx = StepContext {
            planner: &self.planner,
            registry: &self.registry,
            workspace: self.workspace.as_ref(),
            templates: &self.templates,
            retry: &self.retry,
            turn_limit: self.turn_limit,
            event_tx: self.event_tx.as_ref(),
        };

        match run_step(&ctx, &task, &mut step).await {
            Ok(outcome) => {
                self.store.save_step(&step).await?;
                self.store.save_transcript(task_id, &outcome.transcript).await?;
                let (_, _, total_tokens) = self.planner.token_usage();
                tracing::info!(
                    task_id,
                    step_id = %step.step_id,
                    is_last = step.is_last,
                    attempts = outcome.attempts,
                    total_tokens,
                    "Step executed"
                );
                Ok(step)
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                if let Err(save_err) = self.store.save_step(&step).await {
                    tracing::warn!(step_id = %step.step_id, error = %save_err, "failed to save failed step");
                }
                tracing::error!(task_id, step_id = %step.step_id, error = %e, "Step failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelOutput;
    use serde_json::json;

    fn agent_with(llm: Arc<MockLlmClient>, dir: &std::path::Path) -> ForgeAgent {
        ForgeAgent::builder(
            llm,
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalWorkspace::new(dir)),
        )
        .retry(RetryPolicy::immediate(3))
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_step_persists_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new());
        let agent = agent_with(llm, dir.path());

        let task = agent.create_task("Explain Article 14").await.unwrap();
        let step = agent.execute_step(&task.task_id, None).await.unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.is_last);
        assert!(step.output.unwrap().starts_with("Echo from Mock"));

        let stored = agent.get_task(&task.task_id).await.unwrap();
        assert_eq!(stored.transcript.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_step_is_saved_and_transcript_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new());
        llm.push_repeated(Ok(ModelOutput::Structured(json!([1, 2]))), 3);
        let agent = agent_with(llm.clone(), dir.path());

        let task = agent.create_task("q").await.unwrap();
        let err = agent.execute_step(&task.task_id, None).await.unwrap_err();
        assert!(matches!(err, AgentError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(llm.call_count(), 3);

        let steps = agent.list_steps(&task.task_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert!(agent.get_task(&task.task_id).await.unwrap().transcript.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with(Arc::new(MockLlmClient::new()), dir.path());
        assert!(matches!(
            agent.execute_step("missing", None).await,
            Err(AgentError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finished_task_rejects_new_steps() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new());
        llm.push_repeated(Ok(ModelOutput::Structured(json!({"speak": "s", "abilities_sequence": []}))), 3);
        let agent = agent_with(llm.clone(), dir.path());

        let task = agent.create_task("q").await.unwrap();
        assert!(!agent.execute_step(&task.task_id, None).await.unwrap().is_last);
        assert!(agent.execute_step(&task.task_id, None).await.unwrap().is_last);
        assert!(matches!(
            agent.execute_step(&task.task_id, None).await,
            Err(AgentError::TaskFinished(_))
        ));

        assert_eq!(llm.call_count(), 2);
        assert_eq!(agent.get_task(&task.task_id).await.unwrap().transcript.len(), 4);
        assert_eq!(agent.list_steps(&task.task_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_finish_ability_ends_task() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with(Arc::new(MockLlmClient::new()), dir.path());

        let task = agent.create_task("q").await.unwrap();
        assert!(agent.execute_step(&task.task_id, None).await.unwrap().is_last);
        assert!(matches!(
            agent.execute_step(&task.task_id, None).await,
            Err(AgentError::TaskFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_task_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new());
        llm.push_repeated(Ok(ModelOutput::Structured(json!({"speak": "s", "abilities_sequence": []}))), 2);
        let agent = agent_with(llm, dir.path());

        let a = agent.create_task("a").await.unwrap();
        let b = agent.create_task("b").await.unwrap();
        let (ra, rb) = tokio::join!(
            agent.execute_step(&a.task_id, None),
            agent.execute_step(&b.task_id, None)
        );
        ra.unwrap();
        rb.unwrap();
        let _ = agent.execute_step("missing", None).await;

        assert!(agent.task_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_builtin_registry_names() {
        let dir = tempfile::tempdir().unwrap();
        let ws: Arc<dyn Workspace> = Arc::new(LocalWorkspace::new(dir.path()));
        let registry =
            builtin_registry(&AbilitiesSection::default(), ws, QuestionBank::default()).unwrap();
        for kind in crate::abilities::AbilityKind::ALL {
            assert!(registry.contains(kind.as_str()), "missing {}", kind);
        }
    }
}
