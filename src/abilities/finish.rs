//! finish：标记任务完成，原样返回 final_output

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::abilities::{
    parse_args, Ability, AbilityFailure, AbilityKind, AbilityOutput, ParameterSpec,
};

#[derive(Debug, Deserialize)]
struct FinishArgs {
    reason: String,
    final_output: String,
}

/// Finish 能力：记录 reason 日志并返回 final_output
pub struct FinishAbility;

#[async_trait]
impl Ability for FinishAbility {
    fn name(&self) -> &str {
        AbilityKind::Finish.as_str()
    }

    fn description(&self) -> &str {
        "Use this to indicate that task is complete and the program should exit with final output. \
         This is useful when you have finished your task successfully, or when there are \
         insurmountable problems that make it impossible for you to finish your task."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "reason",
                "string",
                "A summary to the user of how the goals were accomplished",
            ),
            ParameterSpec::required("final_output", "string", "The final output of the task"),
        ]
    }

    async fn execute(&self, task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: FinishArgs = parse_args(args)?;
        tracing::info!(task_id = %task_id, reason = %args.reason, "Shutting down...");
        Ok(AbilityOutput::Text(args.final_output))
    }
}
