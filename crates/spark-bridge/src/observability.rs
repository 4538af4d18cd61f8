//! 日志目标常量与 `tracing-subscriber` 安装入口。
//!
//! # 模块定位（Why）
//! - 桥接层所有事件都通过 `tracing` 发出，并固定使用下列 target，运维可按 target 单独调节级别，
//!   例如 `RUST_LOG=spark_bridge::dispatch=debug`；
//! - 库本身从不隐式安装 Subscriber；宿主若没有自己的日志栈，可调用 [`install_fmt_logging`] 一次性接入。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::EnvFilter;

/// 注册表构建事件。
pub const REGISTRY_TARGET: &str = "spark_bridge::registry";
/// 调用分发事件。
pub const DISPATCH_TARGET: &str = "spark_bridge::dispatch";
/// 完成契约结算事件。
pub const COMPLETION_TARGET: &str = "spark_bridge::completion";

static INSTALL_STATE: OnceLock<Result<(), LoggingError>> = OnceLock::new();

/// 日志安装失败。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoggingError {
    #[error("spark-bridge logging has already been installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
///
/// # 教案式说明
/// - **逻辑 (How)**：优先读取 `RUST_LOG`，缺省时使用 `default_directive`（如 `"spark_bridge=info"`）；
///   安装过程在 `INSTALL_STATE` 的 `get_or_init` 中执行，并发的首次调用者只有一个真正安装，
///   其余调用者等待同一次安装并得到 [`LoggingError::AlreadyInstalled`]；
/// - **契约 (What)**：
///   - 成功安装只发生一次，之后的调用返回 [`LoggingError::AlreadyInstalled`]；
///   - 若外部已设置全局 Subscriber，返回 [`LoggingError::SubscriberAlreadySet`]，不会覆盖宿主既有的日志栈；
///   - 首次安装失败的结果同样被记忆，之后的调用得到同一错误。
pub fn install_fmt_logging(default_directive: &str) -> Result<(), LoggingError> {
    let mut attempted_here = false;
    let state = INSTALL_STATE.get_or_init(|| {
        attempted_here = true;
        install_impl(default_directive)
    });

    match state {
        Ok(()) if attempted_here => Ok(()),
        Ok(()) => Err(LoggingError::AlreadyInstalled),
        Err(err) => Err(err.clone()),
    }
}

fn install_impl(default_directive: &str) -> Result<(), LoggingError> {
    if dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))
}
