//! 分发器配置。
//!
//! # 模块定位（Why）
//! - 宿主通常随应用配置一起下发桥接层行为开关，这里提供可直接从 TOML 片段加载的配置结构；
//! - 所有字段都有默认值，空文档即得到默认配置；未知字段直接拒绝，避免拼写错误被静默忽略。
//!
//! # 配置示例（How）
//! ```toml
//! settle_violation = "ignore"
//! catch_panics = true
//! log_arguments = false
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 完成契约被重复结算（或在已结算后又出现同步故障）时的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleViolationPolicy {
    /// 静默忽略后续结算。
    Ignore,
    /// 忽略后续结算，并以 `warn` 级别记录一次缺陷日志。
    #[default]
    Warn,
}

/// [`Dispatcher`](crate::dispatch::Dispatcher) 的行为开关。
///
/// # 契约说明（What）
/// - `settle_violation`：重复结算的报告方式，结算结果本身始终是“先到者生效”；
/// - `catch_panics`：是否把方法体 panic 转换为 `ExecutionFailed`，关闭后 panic 会沿调用栈继续传播；
/// - `log_arguments`：是否在 `debug` 日志中输出实参内容，实参可能含敏感数据，默认关闭。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    pub settle_violation: SettleViolationPolicy,
    pub catch_panics: bool,
    pub log_arguments: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            settle_violation: SettleViolationPolicy::Warn,
            catch_panics: true,
            log_arguments: false,
        }
    }
}

impl DispatcherConfig {
    /// 从 TOML 文本解析配置。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// 读取并解析 TOML 配置文件。
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid dispatcher configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read dispatcher configuration `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
