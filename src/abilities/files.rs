//! 工作区文件能力：write_file / read_file / list_files
//!
//! write_file 未给 contents 时写入调用链传来的 input（上一个能力的输出），
//! 成功后返回 FILE_WRITTEN_MARKER 开头的文本，执行循环据此把步骤标记为最后一步。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::abilities::{
    parse_args, Ability, AbilityFailure, AbilityKind, AbilityOutput, OutputType, ParameterSpec,
    PipedInput,
};
use crate::workspace::Workspace;

/// 文件写入成功的标记前缀
pub const FILE_WRITTEN_MARKER: &str = "File written successfully";

/// 输出是否为文件写入成功标记
pub fn is_file_written(output: &AbilityOutput) -> bool {
    output
        .as_text()
        .map(|s| s.starts_with(FILE_WRITTEN_MARKER))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    filename: String,
    contents: Option<String>,
    input: Option<PipedInput>,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
}

/// 写文件
pub struct WriteFileAbility {
    workspace: Arc<dyn Workspace>,
}

impl WriteFileAbility {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for WriteFileAbility {
    fn name(&self) -> &str {
        AbilityKind::WriteFile.as_str()
    }

    fn description(&self) -> &str {
        "Write content to a file in the task workspace. If contents is omitted, the output of the previous ability is written"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("filename", "string", "Name of the file to write"),
            ParameterSpec::optional("contents", "string", "Text to write into the file"),
        ]
    }

    async fn execute(&self, task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: WriteFileArgs = parse_args(args)?;
        let data = match (args.contents, args.input) {
            (Some(contents), _) => contents.into_bytes(),
            (None, Some(input)) => input.into_bytes()?,
            (None, None) => {
                return Err(AbilityFailure::InvalidArguments(
                    "either contents or a piped input is required".to_string(),
                ))
            }
        };
        self.workspace
            .write(task_id, &args.filename, &data)
            .await
            .map_err(AbilityFailure::failed)?;
        Ok(AbilityOutput::Text(format!(
            "{}: {}",
            FILE_WRITTEN_MARKER, args.filename
        )))
    }
}

/// 读文件：UTF-8 返回文本，否则返回字节
pub struct ReadFileAbility {
    workspace: Arc<dyn Workspace>,
}

impl ReadFileAbility {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for ReadFileAbility {
    fn name(&self) -> &str {
        AbilityKind::ReadFile.as_str()
    }

    fn description(&self) -> &str {
        "Read a file from the task workspace"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required("filename", "string", "Name of the file to read")]
    }

    fn output_type(&self) -> OutputType {
        OutputType::Bytes
    }

    async fn execute(&self, task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: ReadFileArgs = parse_args(args)?;
        let bytes = self
            .workspace
            .read(task_id, &args.filename)
            .await
            .map_err(AbilityFailure::failed)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => AbilityOutput::Text(text),
            Err(e) => AbilityOutput::Bytes(e.into_bytes()),
        })
    }
}

/// 列出工作区文件
pub struct ListFilesAbility {
    workspace: Arc<dyn Workspace>,
}

impl ListFilesAbility {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for ListFilesAbility {
    fn name(&self) -> &str {
        AbilityKind::ListFiles.as_str()
    }

    fn description(&self) -> &str {
        "List files in a workspace directory"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::optional("path", "string", "Directory to list, default '.'")]
    }

    fn output_type(&self) -> OutputType {
        OutputType::List
    }

    async fn execute(&self, task_id: &str, args: Value) -> Result<AbilityOutput, AbilityFailure> {
        let args: ListFilesArgs = parse_args(args)?;
        let path = args.path.unwrap_or_else(|| ".".to_string());
        let files = self
            .workspace
            .list(task_id, &path)
            .await
            .map_err(AbilityFailure::failed)?;
        Ok(AbilityOutput::Text(files.join("\n")))
    }
}
