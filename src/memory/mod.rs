//! 对话记忆：任务级 Transcript

pub mod transcript;

pub use transcript::{Role, Transcript, Turn, TurnContent};
