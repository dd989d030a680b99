//! IASpire - 面向 UPSC 备考的工具增强型对话 Agent
//!
//! 模块划分：
//! - **agent**: ForgeAgent 入口（创建任务、执行步骤、任务级串行）
//! - **abilities**: 能力 trait、注册表与内置能力（finish、新闻、真题、教材问答、文件读写）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、重试策略、步骤阶段
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: Transcript（system / user / assistant 轮次）
//! - **step**: 计划解析、Prompt 渲染、步骤状态机与过程事件
//! - **store**: 任务 / 步骤存储（内存 / SQLite）
//! - **workspace**: 任务工作区（路径逃逸校验）

pub mod abilities;
pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod step;
pub mod store;
pub mod workspace;

pub use agent::{ForgeAgent, ForgeAgentBuilder, StepSettings};
pub use core::AgentError;
