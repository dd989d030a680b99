//! 步骤过程事件：用于流式展示模型调用、能力调用与重试

use serde::Serialize;

use crate::core::StepPhase;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// 状态机进入新阶段
    PhaseChanged {
        step_id: String,
        phase: StepPhase,
        attempt: u32,
    },
    /// 模型给出计划（speak 文本 + 能力名列表）
    PlanReceived {
        speak: String,
        abilities: Vec<String>,
    },
    /// 调用能力
    AbilityStarted {
        ability: String,
        args: serde_json::Value,
    },
    /// 能力返回（预览，避免过长）
    AbilityFinished { ability: String, preview: String },
    /// 本次尝试失败，稍后重试或放弃
    AttemptFailed {
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    /// 步骤完成
    StepFinished {
        step_id: String,
        is_last: bool,
        output: String,
    },
}
