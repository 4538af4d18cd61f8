//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义桥接层对外暴露的全部错误语义：注册期缺陷、调用期拒绝、执行期故障；
//! - 每个变体都携带模块名与方法名，保证远端调用方与宿主日志都能精确定位出错的导出方法。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 生态；
//! - [`BridgeError`] 实现 `Clone`：注册失败会被 `ModuleHost` 记忆化，之后每个访问者都拿到同一份错误；
//! - [`BridgeError::code`] 提供稳定错误码（`bridge.*`），供传输层与告警规则引用。
//!
//! ## 扩展建议（How）
//! - 新增变体时同步补充 `code()` 与 `stage()`，两者使用穷尽匹配，遗漏会在编译期暴露。

use std::{any::Any, error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

use crate::types::TypeTag;

/// 错误发生的阶段。
///
/// - `Registration`：模块导出表本身有缺陷，属于编程错误，不可重试；
/// - `Invocation`：单次调用在执行前被拒绝，不影响其他调用；
/// - `Execution`：宿主方法体自身失败，原始原因保留在错误链中。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    Registration,
    Invocation,
    Execution,
}

/// 桥接层统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“找不到方法”“参数个数不符”“参数无法转换”“方法体失败”以及注册期缺陷
///   收敛到同一枚举，调用方只需处理一种错误类型；
/// - **契约 (What)**：
///   - 注册期变体（`EmptyModuleName`/`RegistrationConflict`/`InvalidSignature`/`DiscoveryPanicked`）
///     只会在构建注册表时出现；
///   - 调用期变体在调用真正执行前同步返回，此时宿主方法尚未产生任何副作用；
///   - `ExecutionFailed` 既可能由 `invoke` 同步返回，也可能经由完成契约异步送达，但同一次调用只会出现一次；
/// - **设计权衡 (Trade-offs)**：名称字段使用 `Arc<str>`，与注册表共享同一份字符串，构造错误时只增加引用计数。
#[derive(Clone, Debug, Error)]
pub enum BridgeError {
    /// 模块名为空，模块失去了可被远端寻址的身份。
    #[error("exported module name must not be empty")]
    EmptyModuleName,

    /// 同一模块内出现两个同名导出。
    #[error("module `{module}` method name already registered: `{method}`")]
    RegistrationConflict { module: Arc<str>, method: Arc<str> },

    /// 导出方法的签名形态不合法。
    #[error("method `{method}` of module `{module}` has an invalid signature: {defect}")]
    InvalidSignature {
        module: Arc<str>,
        method: Arc<str>,
        defect: SignatureDefect,
    },

    /// 导出方法发现（`exported_methods`）或注册表构建过程中发生 panic。
    #[error("discovering exported methods of module `{module}` panicked: {fault}")]
    DiscoveryPanicked {
        module: Arc<str>,
        #[source]
        fault: MethodFault,
    },

    /// 调用的方法不在注册表中。
    #[error("module `{module}` does not export method `{method}`")]
    UnknownMethod { module: Arc<str>, method: Arc<str> },

    /// 调用方提供的实参个数与声明不符（不含由分发器注入的完成契约）。
    #[error(
        "method `{method}` of module `{module}` expects {expected} arguments, whereas {actual} arguments have been provided"
    )]
    ArityMismatch {
        module: Arc<str>,
        method: Arc<str>,
        expected: usize,
        actual: usize,
    },

    /// 某个位置的实参无法转换为声明类型。
    #[error(
        "argument #{position} of `{module}.{method}` cannot be coerced to {expected}: {source}"
    )]
    ArgumentCoercionFailed {
        module: Arc<str>,
        method: Arc<str>,
        position: usize,
        expected: TypeTag,
        source: CoercionError,
    },

    /// 宿主方法体失败：同步返回错误、panic，或经由完成契约 reject。
    #[error("exception occurred while executing exported method `{method}` on module `{module}`: {fault}")]
    ExecutionFailed {
        module: Arc<str>,
        method: Arc<str>,
        #[source]
        fault: MethodFault,
    },
}

impl BridgeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::EmptyModuleName => "bridge.registry.empty_module_name",
            BridgeError::RegistrationConflict { .. } => "bridge.registry.conflict",
            BridgeError::InvalidSignature { .. } => "bridge.registry.invalid_signature",
            BridgeError::DiscoveryPanicked { .. } => "bridge.registry.discovery_panicked",
            BridgeError::UnknownMethod { .. } => "bridge.dispatch.unknown_method",
            BridgeError::ArityMismatch { .. } => "bridge.dispatch.arity_mismatch",
            BridgeError::ArgumentCoercionFailed { .. } => "bridge.dispatch.coercion_failed",
            BridgeError::ExecutionFailed { .. } => "bridge.execution.failed",
        }
    }

    /// 错误所处阶段。
    pub fn stage(&self) -> ErrorStage {
        match self {
            BridgeError::EmptyModuleName
            | BridgeError::RegistrationConflict { .. }
            | BridgeError::InvalidSignature { .. }
            | BridgeError::DiscoveryPanicked { .. } => ErrorStage::Registration,
            BridgeError::UnknownMethod { .. }
            | BridgeError::ArityMismatch { .. }
            | BridgeError::ArgumentCoercionFailed { .. } => ErrorStage::Invocation,
            BridgeError::ExecutionFailed { .. } => ErrorStage::Execution,
        }
    }

    /// 是否为注册期缺陷。
    pub fn is_registration_fault(&self) -> bool {
        self.stage() == ErrorStage::Registration
    }

    pub(crate) fn execution_failed(module: &Arc<str>, method: &Arc<str>, fault: MethodFault) -> Self {
        BridgeError::ExecutionFailed {
            module: Arc::clone(module),
            method: Arc::clone(method),
            fault,
        }
    }
}

/// 签名缺陷的具体原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SignatureDefect {
    #[error("method defines no parameters; a completion-contract parameter is mandatory")]
    MissingParameters,
    #[error("method's final parameter must accept a completion contract, found {found}")]
    FinalParameterNotCompletion { found: TypeTag },
}

/// 参数强制转换失败。
///
/// - `found` 为实参的 JSON 形态名称（`null`、`bool`、`number`、`string`、`array`、`object`）。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: TypeTag,
        found: &'static str,
    },
    #[error("{value} cannot be represented as {expected}")]
    OutOfRange { expected: TypeTag, value: String },
    #[error("completion contract is supplied by the dispatcher and cannot be passed by the caller")]
    CompletionNotCoercible,
}

/// 宿主方法体报告的故障。
///
/// # 教案式说明
/// - **意图 (Why)**：方法体失败的原因五花八门（业务校验、IO、panic），桥接层只需保留
///   “人类可读消息 + 可选的原始错误”两部分即可满足诊断需求；
/// - **契约 (What)**：`source()` 返回原始错误，错误链可一直追溯到宿主代码；
///   类型实现 `Clone`，原因以 `Arc` 共享。
#[derive(Clone, Debug)]
pub struct MethodFault {
    message: String,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl MethodFault {
    /// 仅携带消息的故障。
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// 以原始错误构造故障，消息取自其 `Display`。
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    /// 附加原始错误。
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 将 `catch_unwind` 捕获的 panic 载荷转换为故障。
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self::new(format!("method panicked: {}", panic_detail(&*payload)))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

/// 提取 panic 载荷中的文本。
pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl fmt::Display for MethodFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for MethodFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<String> for MethodFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for MethodFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for MethodFault {
    fn from(error: serde_json::Error) -> Self {
        Self::from_error(error)
    }
}
