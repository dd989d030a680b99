//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `IASPIRE__*` 覆盖（双下划线表示嵌套，如 `IASPIRE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub abilities: AbilitiesSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、工作区根目录、prompt 模板目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 任务工作区根目录，未设置时用 ./workspace
    pub workspace_root: PathBuf,
    /// 可选：system.txt / task.txt 所在目录，缺省使用内置模板
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: PathBuf::from("workspace"),
            prompts_dir: None,
        }
    }
}

/// [llm] 段：后端选择、模型、温度与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 规划用低温度，偏向确定性输出
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4-0125-preview".to_string(),
            base_url: None,
            temperature: 0.1,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [agent] 段：步骤重试与 Transcript 轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Transcript 达到此长度时强制 is_last
    pub turn_limit: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_attempts: crate::core::retry::DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: crate::core::retry::DEFAULT_RETRY_DELAY_SECS,
            turn_limit: crate::step::DEFAULT_TURN_LIMIT,
        }
    }
}

/// [abilities] 段：课程服务地址、超时、真题数量与题库路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AbilitiesSection {
    pub base_url: String,
    pub timeout_secs: u64,
    /// 教材问答耗时较长，单独设置
    pub book_timeout_secs: u64,
    pub max_questions: usize,
    pub question_bank: Option<PathBuf>,
}

impl Default for AbilitiesSection {
    fn default() -> Self {
        Self {
            base_url: "https://dev-ai.server.sigiq.ai/async".to_string(),
            timeout_secs: 60,
            book_timeout_secs: 180,
            max_questions: 5,
            question_bank: None,
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [store] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: PathBuf::from("data/iaspire.sqlite"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 IASPIRE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 IASPIRE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("IASPIRE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
