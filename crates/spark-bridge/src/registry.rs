//! 导出方法注册表：筛选、校验并索引模块希望暴露给远端的方法。
//!
//! # 模块定位（Why）
//! - 模块通过显式登记表（[`MethodCandidate`] 序列）声明自己的方法，注册表只接收其中标记为导出的条目；
//! - 签名缺陷属于模块作者的编程错误，必须在构建期一次性暴露，而不是拖到某次调用时才发现。
//!
//! # 行为契约（What）
//! - [`MethodRegistry::build`] 按输入顺序逐个校验：参数非空 → 末位为完成契约 → 名称未被占用；
//!   任一缺陷使整个构建失败；
//! - 构建成功的注册表不可变且完备：其中的每个名称都指向一个已通过校验的 [`ExportedMethod`]；
//! - 记忆化（构建一次、多次读取）由 [`ModuleHost`](crate::module::ModuleHost) 负责，本类型只表达一次构建的结果。

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    arguments::Arguments,
    completion::Completion,
    error::{BridgeError, MethodFault, SignatureDefect},
    observability::REGISTRY_TARGET,
    types::TypeTag,
};

/// 绑定到模块实例上的方法处理器。
///
/// 处理器同步返回 `Err` 表示方法体在返回前失败；返回 `Ok(())` 后，结果只经由 [`Completion`] 送达。
pub type MethodHandler<M> =
    Arc<dyn Fn(&M, Arguments, Completion) -> Result<(), MethodFault> + Send + Sync + 'static>;

/// 模块登记表中的一条候选方法。
///
/// # 教案式说明
/// - **意图 (Why)**：替代运行时反射与注解，模块在构造期列出 `(名称, 签名, 处理器)`，
///   并用 `exported` 标记区分对外导出与仅供内部使用的方法；
/// - **契约 (What)**：候选本身不做任何校验，所有结构性约束都在 [`MethodRegistry::build`] 中统一检查。
pub struct MethodCandidate<M> {
    name: Arc<str>,
    signature: Vec<TypeTag>,
    exported: bool,
    handler: MethodHandler<M>,
}

impl<M> MethodCandidate<M> {
    /// 标记为导出的候选方法。
    pub fn exported<F>(name: impl Into<Arc<str>>, signature: impl Into<Vec<TypeTag>>, handler: F) -> Self
    where
        F: Fn(&M, Arguments, Completion) -> Result<(), MethodFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature: signature.into(),
            exported: true,
            handler: Arc::new(handler),
        }
    }

    /// 未标记导出的候选方法，构建时会被过滤掉。
    pub fn internal<F>(name: impl Into<Arc<str>>, signature: impl Into<Vec<TypeTag>>, handler: F) -> Self
    where
        F: Fn(&M, Arguments, Completion) -> Result<(), MethodFault> + Send + Sync + 'static,
    {
        Self {
            exported: false,
            ..Self::exported(name, signature, handler)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &[TypeTag] {
        &self.signature
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }
}

impl<M> fmt::Debug for MethodCandidate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCandidate")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("exported", &self.exported)
            .finish_non_exhaustive()
    }
}

/// 已通过校验的导出方法。
pub struct ExportedMethod<M> {
    name: Arc<str>,
    signature: Arc<[TypeTag]>,
    handler: MethodHandler<M>,
}

impl<M> ExportedMethod<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// 完整的声明签名，末位恒为 [`TypeTag::Completion`]。
    pub fn signature(&self) -> &[TypeTag] {
        &self.signature
    }

    /// 调用方需提供的参数类型，即去掉末位完成契约后的签名。
    pub fn caller_parameters(&self) -> &[TypeTag] {
        &self.signature[..self.caller_arity()]
    }

    /// 声明的参数个数（含完成契约）。
    pub fn declared_arity(&self) -> usize {
        self.signature.len()
    }

    /// 调用方可见的参数个数。
    pub fn caller_arity(&self) -> usize {
        self.signature.len() - 1
    }

    pub fn describe(&self) -> MethodDescriptor {
        MethodDescriptor {
            name: self.name.to_string(),
            arity: self.caller_arity(),
            parameters: self.caller_parameters().to_vec(),
        }
    }

    pub(crate) fn call(&self, module: &M, arguments: Arguments, completion: Completion) -> Result<(), MethodFault> {
        (self.handler)(module, arguments, completion)
    }
}

impl<M> fmt::Debug for ExportedMethod<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedMethod")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// 发布给远端的导出方法描述。
///
/// - `arity` 与 `parameters` 均为调用方视角，不包含完成契约位。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub arity: usize,
    pub parameters: Vec<TypeTag>,
}

/// 模块的导出方法表。
///
/// # 教案式说明
/// - **意图 (Why)**：分发器按名称查表，查到的条目已保证签名合法，调用路径上无需再做结构性检查；
/// - **契约 (What)**：由 [`build`](Self::build) 一次性构造，之后只读；键为方法名，值为 [`ExportedMethod`]；
/// - **风险 (Trade-offs)**：内部使用 `HashMap`，需要稳定顺序的场景请使用 [`method_names`](Self::method_names)
///   或 [`descriptors`](Self::descriptors)，两者按名称排序。
pub struct MethodRegistry<M> {
    module: Arc<str>,
    methods: HashMap<Arc<str>, ExportedMethod<M>>,
}

impl<M> MethodRegistry<M> {
    /// 从候选序列构建注册表。
    pub fn build<I>(module: impl Into<Arc<str>>, candidates: I) -> Result<Self, BridgeError>
    where
        I: IntoIterator<Item = MethodCandidate<M>>,
    {
        let module = module.into();
        if module.is_empty() {
            error!(target: REGISTRY_TARGET, "refusing to build registry for a module without a name");
            return Err(BridgeError::EmptyModuleName);
        }

        let mut methods = HashMap::new();
        for candidate in candidates.into_iter().filter(MethodCandidate::is_exported) {
            let method = validate(&module, candidate, &methods).inspect_err(|err| {
                error!(target: REGISTRY_TARGET, module = %module, code = err.code(), "{err}");
            })?;
            debug!(
                target: REGISTRY_TARGET,
                module = %module,
                method = %method.name,
                arity = method.caller_arity(),
                "exported method registered"
            );
            methods.insert(Arc::clone(&method.name), method);
        }

        info!(
            target: REGISTRY_TARGET,
            module = %module,
            methods = methods.len(),
            "method registry built"
        );
        Ok(Self { module, methods })
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub(crate) fn module_arc(&self) -> &Arc<str> {
        &self.module
    }

    pub fn resolve(&self, name: &str) -> Option<&ExportedMethod<M>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// 按名称排序的导出方法名。
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(|name| &**name).collect();
        names.sort_unstable();
        names
    }

    /// 按名称排序的导出方法描述。
    pub fn descriptors(&self) -> Vec<MethodDescriptor> {
        let mut descriptors: Vec<MethodDescriptor> =
            self.methods.values().map(ExportedMethod::describe).collect();
        descriptors.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

impl<M> fmt::Debug for MethodRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("module", &self.module)
            .field("methods", &self.method_names())
            .finish()
    }
}

fn validate<M>(
    module: &Arc<str>,
    candidate: MethodCandidate<M>,
    registered: &HashMap<Arc<str>, ExportedMethod<M>>,
) -> Result<ExportedMethod<M>, BridgeError> {
    let MethodCandidate {
        name,
        signature,
        handler,
        ..
    } = candidate;

    let invalid = |defect| BridgeError::InvalidSignature {
        module: Arc::clone(module),
        method: Arc::clone(&name),
        defect,
    };
    match signature.last() {
        None => return Err(invalid(SignatureDefect::MissingParameters)),
        Some(&last) if !last.is_completion() => {
            return Err(invalid(SignatureDefect::FinalParameterNotCompletion { found: last }));
        }
        Some(_) => {}
    }

    if registered.contains_key(&*name) {
        return Err(BridgeError::RegistrationConflict {
            module: Arc::clone(module),
            method: name,
        });
    }

    Ok(ExportedMethod {
        name,
        signature: signature.into(),
        handler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    fn noop(_: &Probe, _: Arguments, completion: Completion) -> Result<(), MethodFault> {
        completion.resolve(serde_json::Value::Null);
        Ok(())
    }

    #[test]
    fn internal_candidates_are_filtered_out() {
        let registry = MethodRegistry::build(
            "Probe",
            vec![
                MethodCandidate::exported("visible", [TypeTag::Completion], noop),
                MethodCandidate::internal("hidden", [TypeTag::Completion], noop),
                // 未导出的候选即便签名非法也不参与校验。
                MethodCandidate::internal("broken", Vec::<TypeTag>::new(), noop),
            ],
        )
        .expect("合法导出应构建成功");

        assert_eq!(registry.method_names(), vec!["visible"]);
        assert!(registry.resolve("hidden").is_none());
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn candidates_expose_their_declaration() {
        let exported = MethodCandidate::exported("greet", [TypeTag::String, TypeTag::Completion], noop);
        let internal = MethodCandidate::internal("reset", [TypeTag::Completion], noop);

        assert_eq!(exported.name(), "greet");
        assert_eq!(exported.signature(), &[TypeTag::String, TypeTag::Completion]);
        assert!(exported.is_exported());
        assert_eq!(internal.name(), "reset");
        assert!(!internal.is_exported());
    }

    #[test]
    fn caller_view_excludes_completion_slot() {
        let registry = MethodRegistry::build(
            "Probe",
            vec![MethodCandidate::exported(
                "greet",
                [TypeTag::String, TypeTag::Integer, TypeTag::Completion],
                noop,
            )],
        )
        .expect("合法导出应构建成功");

        let method = registry.resolve("greet").expect("greet 应已注册");
        assert_eq!(method.declared_arity(), 3);
        assert_eq!(method.caller_arity(), 2);
        assert_eq!(method.caller_parameters(), &[TypeTag::String, TypeTag::Integer]);
        assert_eq!(
            registry.descriptors(),
            vec![MethodDescriptor {
                name: "greet".to_owned(),
                arity: 2,
                parameters: vec![TypeTag::String, TypeTag::Integer],
            }]
        );
    }

    #[test]
    fn empty_module_name_is_rejected() {
        let err = MethodRegistry::<Probe>::build("", Vec::new()).unwrap_err();
        assert!(matches!(err, BridgeError::EmptyModuleName));
    }
}
