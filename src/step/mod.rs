//! 步骤执行：计划解析、Prompt 渲染、状态机与过程事件

pub mod events;
pub mod loop_;
pub mod planner;
pub mod prompt;

pub use events::StepEvent;
pub use loop_::{run_step, AbilityTrace, StepContext, StepOutcome};
pub use planner::{normalize, parse_plan, AbilityInvocation, Plan, Planner};
pub use prompt::{plan_format_schema_json, PromptTemplates};

/// Transcript 达到此长度时强制结束任务
pub const DEFAULT_TURN_LIMIT: usize = 4;
