//! 导出模块契约与宿主侧包装。
//!
//! # 模块定位（Why）
//! - [`ExportedModule`]：模块作者实现的契约，提供名称、常量与导出登记表；
//! - [`ModuleHost`]：宿主持有的包装，负责注册表的“构建一次、多次读取”，并把调用转交给分发器；
//! - [`DynModule`]：对象安全的模块句柄，传输层可以把异构模块统一保存为 `Arc<dyn DynModule>`。
//!
//! # 并发模型（What）
//! - 注册表保存在 [`OnceLock`] 中：首次并发访问被串行化，构建逻辑至多执行一次；
//!   构建完成后的读取不再阻塞；
//! - 构建失败同样被记忆化，注册期缺陷不会因为重试而被“修好”或被降级；
//!   发现阶段的 panic 也按失败记忆，不会让 `OnceLock` 停留在未初始化状态。

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, OnceLock},
};

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::{
    coercion::ArgumentCoercer,
    completion::PendingInvocation,
    dispatch::{Dispatcher, InvocationRequest},
    error::{BridgeError, MethodFault, panic_detail},
    observability::REGISTRY_TARGET,
    registry::{MethodCandidate, MethodDescriptor, MethodRegistry},
};

/// 宿主执行环境句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：模块往往需要访问宿主提供的资源（运行时句柄、存储、平台上下文），
///   但桥接核心既不理解也不应依赖这些资源的具体类型；
/// - **契约 (What)**：以类型擦除的 `Arc` 保存任意 `Send + Sync` 值，模块通过
///   [`downcast_ref`](Self::downcast_ref) 取回；注册表与分发器从不读取其中内容。
#[derive(Clone)]
pub struct HostContext {
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostContext {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext").finish_non_exhaustive()
    }
}

/// 模块发布的只读常量表。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Constants(BTreeMap<String, Value>);

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Constants
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// 导出模块契约。
///
/// # 教案式说明
/// - **意图 (Why)**：以显式登记表代替注解与反射，模块在构造期列出全部候选方法，
///   由 [`MethodRegistry`] 统一筛选与校验；
/// - **契约 (What)**：
///   - `name`：模块的稳定标识，不得为空；
///   - `constants`：可选的只读常量表，默认为空；
///   - `exported_methods`：候选方法登记表，[`ModuleHost`] 只会调用一次；
///   - `coercer`：可选的模块级参数转换服务，返回 `None` 时使用分发器的默认实现；
/// - **风险 (Trade-offs)**：`exported_methods` 要求 `Self: Sized`，因此 trait 本身仍可作为对象使用，
///   但对象层调用请经由 [`DynModule`]。
pub trait ExportedModule: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn constants(&self) -> Constants {
        Constants::default()
    }

    fn exported_methods(&self) -> Vec<MethodCandidate<Self>>
    where
        Self: Sized;

    fn coercer(&self) -> Option<&dyn ArgumentCoercer> {
        None
    }
}

/// 宿主侧的模块包装，持有模块实例与其记忆化的注册表。
pub struct ModuleHost<M: ExportedModule> {
    module: M,
    registry: OnceLock<Result<MethodRegistry<M>, BridgeError>>,
}

impl<M: ExportedModule> ModuleHost<M> {
    pub fn new(module: M) -> Self {
        Self {
            module,
            registry: OnceLock::new(),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn constants(&self) -> Constants {
        self.module.constants()
    }

    /// 返回注册表，首次访问时构建。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：`OnceLock::get_or_init` 保证构建闭包至多执行一次，并发的首次访问者等待同一次构建；
    /// - **契约 (What)**：成功时每次返回同一个引用；失败时每次返回同一错误的克隆，模块不再可用；
    ///   发现或构建过程中的 panic 被捕获并记忆为 [`BridgeError::DiscoveryPanicked`]，不会触发第二次发现。
    pub fn registry(&self) -> Result<&MethodRegistry<M>, BridgeError> {
        self.registry
            .get_or_init(|| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    MethodRegistry::build(self.module.name(), self.module.exported_methods())
                }))
                .unwrap_or_else(|payload| {
                    let error = BridgeError::DiscoveryPanicked {
                        module: Arc::from(self.module.name()),
                        fault: MethodFault::new(panic_detail(&*payload)),
                    };
                    error!(target: REGISTRY_TARGET, code = error.code(), "{error}");
                    Err(error)
                })
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// 分发一次调用。
    pub fn invoke(
        &self,
        dispatcher: &Dispatcher,
        request: InvocationRequest,
    ) -> Result<PendingInvocation, BridgeError> {
        let registry = self.registry()?;
        dispatcher.invoke(registry, &self.module, request)
    }

    /// 转换为对象层句柄。
    pub fn into_dyn(self) -> Arc<dyn DynModule> {
        Arc::new(self)
    }
}

impl<M: ExportedModule> fmt::Debug for ModuleHost<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHost")
            .field("name", &self.module.name())
            .field("registry", &self.registry.get())
            .finish()
    }
}

/// 对象安全的模块句柄。
pub trait DynModule: Send + Sync {
    fn name(&self) -> &str;

    fn constants(&self) -> Constants;

    /// 导出方法描述，触发（或复用）注册表构建。
    fn describe(&self) -> Result<Vec<MethodDescriptor>, BridgeError>;

    fn invoke(
        &self,
        dispatcher: &Dispatcher,
        request: InvocationRequest,
    ) -> Result<PendingInvocation, BridgeError>;
}

impl<M: ExportedModule> DynModule for ModuleHost<M> {
    fn name(&self) -> &str {
        ModuleHost::name(self)
    }

    fn constants(&self) -> Constants {
        ModuleHost::constants(self)
    }

    fn describe(&self) -> Result<Vec<MethodDescriptor>, BridgeError> {
        Ok(self.registry()?.descriptors())
    }

    fn invoke(
        &self,
        dispatcher: &Dispatcher,
        request: InvocationRequest,
    ) -> Result<PendingInvocation, BridgeError> {
        ModuleHost::invoke(self, dispatcher, request)
    }
}
