//! 调用分发器：按名称解析、校验参数个数、逐位转换实参、执行方法体并统一翻译失败。
//!
//! # 模块定位（Why）
//! - 远端调用在进入宿主代码前必须经过与反射调用等价的形态检查，但这里所有检查都基于注册期
//!   已校验的签名完成，调用路径上不存在运行时类型推断；
//! - 分发器本身无状态（只持有配置与默认转换服务），可被任意线程并发使用，无需加锁。
//!
//! # 执行流程（How）
//! 1. 解析：注册表中不存在 → `UnknownMethod`；
//! 2. 参数个数：调用方实参个数必须等于签名长度减一 → 否则 `ArityMismatch`，不做任何转换；
//! 3. 转换：严格自左向右，首个失败即中止 → `ArgumentCoercionFailed`，方法体不会被调用；
//! 4. 执行：注入新的 [`Completion`]，同步故障（`Err` 或 panic）直接作为 `ExecutionFailed` 返回，
//!    并封存契约，使之后的 resolve/reject 全部失效；
//! 5. 成功返回后，结果经由 [`PendingInvocation`] 送达。

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, debug_span, warn};

use crate::{
    arguments::Arguments,
    coercion::{ArgumentCoercer, StandardCoercer},
    completion::{Completion, PendingInvocation},
    config::{DispatcherConfig, SettleViolationPolicy},
    error::{BridgeError, MethodFault},
    module::ExportedModule,
    observability::DISPATCH_TARGET,
    registry::{ExportedMethod, MethodRegistry},
};

/// 一次跨边界调用请求。
///
/// 线上形态为 `{"method": "add", "arguments": [2, 3]}`，`arguments` 缺省为空列表；
/// 完成契约不出现在 `arguments` 中。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    method: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

impl InvocationRequest {
    pub fn new(method: impl Into<String>, arguments: impl Into<Vec<Value>>) -> Self {
        Self {
            method: method.into(),
            arguments: arguments.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn into_arguments(self) -> Vec<Value> {
        self.arguments
    }
}

/// 调用分发器。
///
/// # 教案式说明
/// - **意图 (Why)**：把“解析 → 校验 → 转换 → 执行 → 翻译错误”收敛到一个入口，任何失败都落入
///   [`BridgeError`] 的同一分类，且不会污染注册表或影响其他调用；
/// - **契约 (What)**：
///   - `invoke` 返回 `Err` 时，本次调用的结果已经确定，调用方不会再从别处收到结果；
///   - 返回 `Ok(pending)` 时，结果只经由 `pending` 送达一次；
///   - 模块提供了自己的 [`ArgumentCoercer`] 时优先使用模块的实现；
/// - **风险 (Trade-offs)**：`catch_panics` 开启时使用 `AssertUnwindSafe` 包裹方法体，
///   panic 后模块内部状态是否一致由模块作者负责。
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    coercer: Arc<dyn ArgumentCoercer>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            coercer: Arc::new(StandardCoercer),
        }
    }

    /// 替换默认的参数转换服务。
    pub fn with_coercer(mut self, coercer: Arc<dyn ArgumentCoercer>) -> Self {
        self.coercer = coercer;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 针对已构建的注册表分发一次调用。
    pub fn invoke<M>(
        &self,
        registry: &MethodRegistry<M>,
        module: &M,
        request: InvocationRequest,
    ) -> Result<PendingInvocation, BridgeError>
    where
        M: ExportedModule,
    {
        let module_name = registry.module_arc();
        let span = debug_span!(
            target: DISPATCH_TARGET,
            "bridge.invoke",
            module = %module_name,
            method = %request.method()
        );
        let _entered = span.enter();

        if self.config.log_arguments {
            debug!(target: DISPATCH_TARGET, arguments = ?request.arguments(), "invocation received");
        }

        let method = registry.resolve(request.method()).ok_or_else(|| {
            let error = BridgeError::UnknownMethod {
                module: Arc::clone(module_name),
                method: Arc::from(request.method()),
            };
            debug!(target: DISPATCH_TARGET, code = error.code(), "{error}");
            error
        })?;

        let expected = method.caller_arity();
        let actual = request.arguments().len();
        if expected != actual {
            let error = BridgeError::ArityMismatch {
                module: Arc::clone(module_name),
                method: Arc::clone(method.name_arc()),
                expected,
                actual,
            };
            debug!(target: DISPATCH_TARGET, code = error.code(), "{error}");
            return Err(error);
        }

        let coercer = module.coercer().unwrap_or(&*self.coercer);
        let arguments = coerce_arguments(coercer, module_name, method, request.into_arguments())?;

        let (completion, pending) = Completion::channel(
            Arc::clone(module_name),
            Arc::clone(method.name_arc()),
            self.config.settle_violation,
        );
        let witness = completion.witness();

        match self.execute(method, module, arguments, completion) {
            Ok(()) => Ok(pending),
            Err(fault) if witness.seal_rejected() => {
                let error = BridgeError::execution_failed(module_name, method.name_arc(), fault);
                warn!(target: DISPATCH_TARGET, code = error.code(), "{error}");
                Err(error)
            }
            Err(fault) => {
                // 方法体先结算了契约再报告故障：先到的结果生效，故障只记录。
                if self.config.settle_violation == SettleViolationPolicy::Warn {
                    warn!(
                        target: DISPATCH_TARGET,
                        state = ?witness.state(),
                        %fault,
                        "method failed after settling its completion; keeping the settled outcome"
                    );
                }
                Ok(pending)
            }
        }
    }

    fn execute<M>(
        &self,
        method: &ExportedMethod<M>,
        module: &M,
        arguments: Arguments,
        completion: Completion,
    ) -> Result<(), MethodFault> {
        if !self.config.catch_panics {
            return method.call(module, arguments, completion);
        }
        panic::catch_unwind(AssertUnwindSafe(|| method.call(module, arguments, completion)))
            .unwrap_or_else(|payload| Err(MethodFault::from_panic(payload)))
    }
}

fn coerce_arguments<M>(
    coercer: &dyn ArgumentCoercer,
    module_name: &Arc<str>,
    method: &ExportedMethod<M>,
    values: Vec<Value>,
) -> Result<Arguments, BridgeError> {
    let mut coerced = Vec::with_capacity(values.len());
    for (position, (value, &expected)) in values
        .into_iter()
        .zip(method.caller_parameters())
        .enumerate()
    {
        let value = coercer.coerce(value, expected).map_err(|source| {
            let error = BridgeError::ArgumentCoercionFailed {
                module: Arc::clone(module_name),
                method: Arc::clone(method.name_arc()),
                position,
                expected,
                source,
            };
            debug!(target: DISPATCH_TARGET, code = error.code(), "{error}");
            error
        })?;
        coerced.push(value);
    }
    Ok(Arguments::new(coerced))
}
