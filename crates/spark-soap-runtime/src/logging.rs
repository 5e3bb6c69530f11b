//! 日志安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：运行时各阶段只通过 `tracing` 宏输出事件，宿主进程需要一次性注册全局 Subscriber；
//! - **逻辑（How）**：
//!   1. 若外部已设置全局 Subscriber，直接返回 [`LoggingError::SubscriberAlreadySet`]；
//!   2. 以调用方给出的指令构造 `EnvFilter`，指令为空时读取 `RUST_LOG`，再缺省为 `info`；
//!   3. 组装 `registry + EnvFilter + fmt` 层并设为全局默认；
//! - **契约（What）**：进程内只能成功一次，之后的调用返回错误而不是静默覆盖。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// 默认日志过滤指令。
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("failed to install the global subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装全局 `fmt` Subscriber。
pub fn install_tracing(directive: &str) -> Result<(), LoggingError> {
    if dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }
    let filter = build_filter(directive)?;
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    if directive.trim().is_empty() {
        return Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)));
    }
    EnvFilter::try_new(directive).map_err(|error| LoggingError::InvalidFilter {
        directive: directive.to_owned(),
        reason: error.to_string(),
    })
}
