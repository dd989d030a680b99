//! 步骤状态机的阶段定义
//!
//! BuildingContext -> AwaitingModel -> Parsing -> Executing -> Finalizing，终态 Completed / Failed。

use serde::Serialize;

/// 单个步骤所处阶段（用于日志与事件推送）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    BuildingContext,
    AwaitingModel,
    Parsing,
    Executing,
    Finalizing,
    Completed,
    Failed,
}

impl StepPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepPhase::Completed | StepPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepPhase::BuildingContext => "building_context",
            StepPhase::AwaitingModel => "awaiting_model",
            StepPhase::Parsing => "parsing",
            StepPhase::Executing => "executing",
            StepPhase::Finalizing => "finalizing",
            StepPhase::Completed => "completed",
            StepPhase::Failed => "failed",
        }
    }
}
