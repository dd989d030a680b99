//! 步骤级重试策略
//!
//! 一次步骤尝试（请求模型 -> 解析 -> 执行能力）作为一个整体重试：最多 max_attempts 次，
//! 两次尝试之间按 backoff(attempt) 等待。测试中用 RetryPolicy::immediate 去掉等待。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 默认尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 默认两次尝试间隔（秒）
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

/// 有界重试策略：最大尝试次数 + 退避函数（参数为刚失败的尝试序号，从 1 开始）
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<BackoffFn>,
}

impl RetryPolicy {
    /// 固定间隔
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, move |_| delay)
    }

    /// 无等待（测试用）
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    pub fn with_backoff(
        max_attempts: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 attempt 次尝试失败后、下一次尝试前的等待时长
    pub fn delay_after(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        )
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("first_delay", &self.delay_after(1))
            .finish()
    }
}
