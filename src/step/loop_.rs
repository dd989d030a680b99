//! 步骤执行状态机
//!
//! BuildingContext（仅首步）-> [AwaitingModel -> Parsing -> Executing] 作为一次尝试整体重试 -> Finalizing。
//! Transcript 以值传入，只有成功时才带着新的 assistant Turn 返回；失败时调用方持久化的副本保持不变。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use crate::abilities::{is_file_written, AbilityOutput, AbilityRegistry, INPUT_ARG};
use crate::core::{AgentError, RetryPolicy, StepPhase};
use crate::memory::{Transcript, TurnContent};
use crate::step::{Plan, Planner, PromptTemplates, StepEvent};
use crate::store::{Step, StepStatus, Task};
use crate::workspace::Workspace;

/// 能力输出预览最大字符数
const OUTPUT_PREVIEW_CHARS: usize = 200;

/// 单个能力调用的执行记录，写入 Step.additional_output
#[derive(Debug, Clone, Serialize)]
pub struct AbilityTrace {
    pub name: String,
    pub output: AbilityOutput,
    pub finished_at: DateTime<Utc>,
}

/// 一次成功尝试的执行结果
#[derive(Debug)]
struct Execution {
    previous_output: Option<AbilityOutput>,
    is_last: bool,
    traces: Vec<AbilityTrace>,
}

/// 步骤成功的结果：更新后的 Transcript 与本步计划
#[derive(Debug)]
pub struct StepOutcome {
    pub transcript: Transcript,
    pub plan: Plan,
    pub attempts: u32,
}

/// 执行一个步骤所需的上下文
pub struct StepContext<'a> {
    pub planner: &'a Planner,
    pub registry: &'a AbilityRegistry,
    pub workspace: &'a dyn Workspace,
    pub templates: &'a PromptTemplates,
    pub retry: &'a RetryPolicy,
    /// Transcript 达到此长度时强制 is_last
    pub turn_limit: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<StepEvent>>,
}

impl<'a> StepContext<'a> {
    fn send(&self, ev: StepEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn phase(&self, step: &Step, phase: StepPhase, attempt: u32) {
        tracing::debug!(step_id = %step.step_id, phase = phase.as_str(), attempt, "step phase");
        self.send(StepEvent::PhaseChanged {
            step_id: step.step_id.clone(),
            phase,
            attempt,
        });
    }
}

/// 执行一个步骤；成功时 step 被填为 completed 并返回新的 Transcript
///
/// 失败时 step 保持 pending，由调用方标记为 failed 并持久化。
pub async fn run_step(
    ctx: &StepContext<'_>,
    task: &Task,
    step: &mut Step,
) -> Result<StepOutcome, AgentError> {
    let mut transcript = task.transcript.clone();
    if transcript.needs_start() {
        ctx.phase(step, StepPhase::BuildingContext, 0);
        build_context(ctx, task, &mut transcript).await;
    }

    let mut attempt: u32 = 0;
    let (mut plan, execution) = loop {
        attempt += 1;
        match attempt_once(ctx, task, step, &transcript, attempt).await {
            Ok(result) => break result,
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    task_id = %task.task_id,
                    step_id = %step.step_id,
                    attempt,
                    max_attempts = ctx.retry.max_attempts(),
                    error = %e,
                    "step attempt failed"
                );
                ctx.send(StepEvent::AttemptFailed {
                    attempt,
                    max_attempts: ctx.retry.max_attempts(),
                    reason: e.to_string(),
                });
                if !ctx.retry.should_retry(attempt) {
                    ctx.phase(step, StepPhase::Failed, attempt);
                    return Err(AgentError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                tokio::time::sleep(ctx.retry.delay_after(attempt)).await;
            }
        }
    };

    ctx.phase(step, StepPhase::Finalizing, attempt);
    if let Some(text) = execution.previous_output.as_ref().and_then(|o| o.as_text()) {
        plan.final_output = Some(text.to_string());
    }
    transcript.append_assistant(TurnContent::Structured(plan.answer_value()));

    step.output = Some(plan.speak.clone());
    step.is_last = execution.is_last || transcript.len() >= ctx.turn_limit;
    step.additional_output = Some(json!({
        "abilities": execution.traces,
        "attempts": attempt,
    }));
    step.status = StepStatus::Completed;
    step.completed_at = Some(Utc::now());

    tracing::info!(
        task_id = %task.task_id,
        step_id = %step.step_id,
        is_last = step.is_last,
        turns = transcript.len(),
        "step completed"
    );
    ctx.phase(step, StepPhase::Completed, attempt);
    ctx.send(StepEvent::StepFinished {
        step_id: step.step_id.clone(),
        is_last: step.is_last,
        output: plan.speak.clone(),
    });

    Ok(StepOutcome {
        transcript,
        plan,
        attempts: attempt,
    })
}

/// 首步：渲染 system / task prompt 并重置 Transcript
async fn build_context(ctx: &StepContext<'_>, task: &Task, transcript: &mut Transcript) {
    let files = match ctx.workspace.list(&task.task_id, ".").await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(task_id = %task.task_id, error = %e, "workspace listing failed");
            Vec::new()
        }
    };
    let system_prompt = ctx
        .templates
        .render_system(&ctx.registry.prompt_listing(), &files);
    transcript.start(ctx.templates.render_task(&task.input), system_prompt);
}

/// 一次尝试：模型调用 -> 解析 -> 顺序执行能力；任何一环失败都让整次尝试失败
async fn attempt_once(
    ctx: &StepContext<'_>,
    task: &Task,
    step: &Step,
    transcript: &Transcript,
    attempt: u32,
) -> Result<(Plan, Execution), AgentError> {
    ctx.phase(step, StepPhase::AwaitingModel, attempt);
    let output = ctx.planner.complete(transcript).await?;

    ctx.phase(step, StepPhase::Parsing, attempt);
    let plan = crate::step::parse_plan(&output)?;
    ctx.send(StepEvent::PlanReceived {
        speak: plan.speak.clone(),
        abilities: plan
            .abilities_sequence
            .iter()
            .map(|a| a.name.clone())
            .collect(),
    });

    ctx.phase(step, StepPhase::Executing, attempt);
    let execution = execute_plan(ctx, &task.task_id, &plan).await?;
    Ok((plan, execution))
}

/// 顺序执行计划：上一个能力的输出作为下一个能力的 input 参数（finish 除外）
async fn execute_plan(
    ctx: &StepContext<'_>,
    task_id: &str,
    plan: &Plan,
) -> Result<Execution, AgentError> {
    let mut previous_output: Option<AbilityOutput> = None;
    let mut is_last = false;
    let mut traces = Vec::with_capacity(plan.abilities_sequence.len());

    for invocation in &plan.abilities_sequence {
        let mut args = invocation.args.clone();
        if !invocation.is_finish() {
            if let Some(prev) = &previous_output {
                args.insert(INPUT_ARG.to_string(), prev.to_value());
            }
        }
        ctx.send(StepEvent::AbilityStarted {
            ability: invocation.name.clone(),
            args: serde_json::Value::Object(args.clone()),
        });

        let output = ctx.registry.invoke(task_id, &invocation.name, &args).await?;
        ctx.send(StepEvent::AbilityFinished {
            ability: invocation.name.clone(),
            preview: output.preview(OUTPUT_PREVIEW_CHARS),
        });

        if invocation.is_finish() || is_file_written(&output) {
            is_last = true;
        }
        traces.push(AbilityTrace {
            name: invocation.name.clone(),
            output: output.clone(),
            finished_at: Utc::now(),
        });
        previous_output = Some(output);
    }

    Ok(Execution {
        previous_output,
        is_last,
        traces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::abilities::{
        Ability, AbilityFailure, FinishAbility, OutputType, ParameterSpec, WriteFileAbility,
    };
    use crate::llm::{LlmError, MockLlmClient, ModelOutput};
    use crate::memory::Role;
    use crate::workspace::LocalWorkspace;

    /// 回显参数的测试能力
    struct EchoArgs;

    #[async_trait]
    impl Ability for EchoArgs {
        fn name(&self) -> &str {
            "echo_args"
        }
        fn description(&self) -> &str {
            "Echo the arguments back"
        }
        fn parameters(&self) -> Vec<ParameterSpec> {
            vec![ParameterSpec::optional("input", "string", "piped input")]
        }
        fn output_type(&self) -> OutputType {
            OutputType::String
        }
        async fn execute(&self, _task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
            Ok(AbilityOutput::Text(args.to_string()))
        }
    }

    /// 记录调用次数；fail_first 次之前的调用返回失败
    struct Counted {
        name: &'static str,
        fail_first: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Ability for Counted {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        async fn execute(&self, _task_id: &str, _args: Value) -> Result<AbilityOutput, AbilityFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(AbilityFailure::failed("lesson service unavailable"));
            }
            Ok(AbilityOutput::Text(format!("{} call {}", self.name, n + 1)))
        }
    }

    struct Fixture {
        llm: Arc<MockLlmClient>,
        planner: Planner,
        registry: AbilityRegistry,
        workspace: LocalWorkspace,
        templates: PromptTemplates,
        retry: RetryPolicy,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(responses: Vec<Result<ModelOutput, LlmError>>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let workspace = LocalWorkspace::new(dir.path());
            let llm = Arc::new(MockLlmClient::scripted(responses));
            let mut registry = AbilityRegistry::new();
            registry.register(FinishAbility).unwrap();
            registry.register(EchoArgs).unwrap();
            registry
                .register(WriteFileAbility::new(Arc::new(workspace.clone())))
                .unwrap();
            Self {
                planner: Planner::new(llm.clone(), "test-model", 0.1),
                llm,
                registry,
                workspace,
                templates: PromptTemplates::default(),
                retry: RetryPolicy::immediate(3),
                _dir: dir,
            }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                planner: &self.planner,
                registry: &self.registry,
                workspace: &self.workspace,
                templates: &self.templates,
                retry: &self.retry,
                turn_limit: crate::step::DEFAULT_TURN_LIMIT,
                event_tx: None,
            }
        }
    }

    fn plan(speak: &str, seq: Value) -> Result<ModelOutput, LlmError> {
        Ok(ModelOutput::Structured(json!({"speak": speak, "abilities_sequence": seq})))
    }

    #[tokio::test]
    async fn test_first_step_builds_context_and_pipes_input() {
        let fx = Fixture::new(vec![plan(
            "working",
            json!([
                {"ability": {"name": "echo_args", "args": {"n": 1}}},
                {"ability": {"name": "echo_args", "args": {}}}
            ]),
        )]);
        let task = Task::new("Explain Article 14");
        let mut step = Step::new(&task.task_id, None);

        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();

        let turns = outcome.transcript.current();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0].content.as_text().contains("echo_args"));
        assert!(turns[1].content.as_text().contains("Explain Article 14"));
        assert_eq!(turns[2].role, Role::Assistant);

        // 第二次调用收到第一次的输出作为 input
        let second = outcome.plan.final_output.clone().unwrap();
        let second: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["input"], json!(r#"{"n":1}"#));

        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output.as_deref(), Some("working"));
        assert!(!step.is_last);
        assert!(step.completed_at.is_some());
        let traces = &step.additional_output.as_ref().unwrap()["abilities"];
        assert_eq!(traces.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_uses_identical_transcript() {
        let fx = Fixture::new(vec![
            Ok(ModelOutput::Text("not json".into())),
            Err(LlmError::Timeout),
            plan("ok", json!([])),
        ]);
        let task = Task::new("q");
        let mut step = Step::new(&task.task_id, None);

        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        let requests = fx.llm.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].turns, requests[1].turns);
        assert_eq!(requests[1].turns, requests[2].turns);
        assert_eq!(requests[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_ability_failure_retries_whole_attempt() {
        let seq = json!([
            {"ability": {"name": "news_search", "args": {"query": "Article 14"}}},
            {"ability": {"name": "ask_book", "args": {"book": "Laxmikanth"}}}
        ]);
        let mut fx = Fixture::new(vec![plan("first", seq.clone()), plan("second", seq)]);
        let news_calls = Arc::new(AtomicUsize::new(0));
        let book_calls = Arc::new(AtomicUsize::new(0));
        fx.registry
            .register(Counted {
                name: "news_search",
                fail_first: 0,
                calls: news_calls.clone(),
            })
            .unwrap();
        fx.registry
            .register(Counted {
                name: "ask_book",
                fail_first: 1,
                calls: book_calls.clone(),
            })
            .unwrap();
        let task = Task::new("Explain Article 14");
        let mut step = Step::new(&task.task_id, None);

        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(news_calls.load(Ordering::SeqCst), 2);
        assert_eq!(book_calls.load(Ordering::SeqCst), 2);
        let requests = fx.llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].turns, requests[1].turns);

        assert_eq!(step.output.as_deref(), Some("second"));
        assert_eq!(outcome.plan.final_output.as_deref(), Some("ask_book call 2"));
        assert_eq!(step.additional_output.as_ref().unwrap()["attempts"], json!(2));
        assert_eq!(outcome.transcript.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_step_pending() {
        let fx = Fixture::new(vec![]);
        fx.llm.push_repeated(Ok(ModelOutput::Text("nope".into())), 3);
        let task = Task::new("q");
        let mut step = Step::new(&task.task_id, None);

        let err = run_step(&fx.ctx(), &task, &mut step).await.unwrap_err();
        match &err {
            AgentError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), AgentError::MalformedPlan(_)));
        assert_eq!(fx.llm.call_count(), 3);
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.output.is_none());
    }

    #[tokio::test]
    async fn test_finish_and_file_marker_set_is_last() {
        let fx = Fixture::new(vec![
            plan(
                "done",
                json!([{"ability": {"name": "finish", "args": {"reason": "r", "final_output": "lesson"}}}]),
            ),
            plan(
                "saved",
                json!([{"ability": {"name": "write_file", "args": {"filename": "a.md", "contents": "x"}}}]),
            ),
        ]);
        let task = Task::new("q");
        let mut step = Step::new(&task.task_id, None);
        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();
        assert!(step.is_last);
        assert_eq!(outcome.plan.final_output.as_deref(), Some("lesson"));

        let task = Task::new("q2");
        let mut step = Step::new(&task.task_id, None);
        run_step(&fx.ctx(), &task, &mut step).await.unwrap();
        assert!(step.is_last);
    }

    #[tokio::test]
    async fn test_turn_limit_forces_is_last() {
        let fx = Fixture::new(vec![plan("one", json!([])), plan("two", json!([]))]);
        let mut task = Task::new("q");

        let mut step = Step::new(&task.task_id, None);
        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();
        assert_eq!(outcome.transcript.len(), 3);
        assert!(!step.is_last);

        task.transcript = outcome.transcript;
        let mut step = Step::new(&task.task_id, None);
        let outcome = run_step(&fx.ctx(), &task, &mut step).await.unwrap();
        assert_eq!(outcome.transcript.len(), 4);
        assert!(step.is_last);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let fx = Fixture::new(vec![plan(
            "hi",
            json!([{"ability": {"name": "echo_args", "args": {}}}]),
        )]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut ctx = fx.ctx();
        ctx.event_tx = Some(&tx);
        let task = Task::new("q");
        let mut step = Step::new(&task.task_id, None);
        run_step(&ctx, &task, &mut step).await.unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].clone());
        }
        assert!(kinds.contains(&json!("plan_received")));
        assert!(kinds.contains(&json!("ability_started")));
        assert_eq!(kinds.last(), Some(&json!("step_finished")));
    }
}
