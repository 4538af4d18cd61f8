//! 集成测试共享桩：`Example` 模块与计数型参数转换服务。
//!
//! - `Example` 覆盖同步结算、同步失败、异步 reject、依赖宿主上下文与宿主运行时的各类导出方法；
//! - 计数器让测试能够断言“发现只执行一次”“转换服务未被调用”“方法体未被执行”等负向性质。

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use serde_json::{Value, json};
use spark_bridge::{
    ArgumentCoercer, CoercionError, Constants, ExportedModule, HostContext, MethodCandidate,
    MethodFault, StandardCoercer, TypeTag,
};

/// 宿主交给 `Example` 的环境资源。
pub struct ExampleHost {
    pub greeting: String,
    pub runtime: Option<tokio::runtime::Handle>,
}

/// 测试观测点。
#[derive(Default)]
pub struct Probes {
    pub discoveries: AtomicUsize,
    pub executions: AtomicUsize,
}

impl Probes {
    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

pub struct Example {
    context: HostContext,
    probes: Arc<Probes>,
}

impl Example {
    pub fn new(probes: Arc<Probes>) -> Self {
        Self::with_host(
            ExampleHost {
                greeting: "Hello".to_owned(),
                runtime: None,
            },
            probes,
        )
    }

    pub fn with_host(host: ExampleHost, probes: Arc<Probes>) -> Self {
        Self {
            context: HostContext::new(host),
            probes,
        }
    }

    fn host(&self) -> Result<&ExampleHost, MethodFault> {
        self.context
            .downcast_ref::<ExampleHost>()
            .ok_or_else(|| MethodFault::new("example host context is missing"))
    }

    fn executed(&self) {
        self.probes.executions.fetch_add(1, Ordering::SeqCst);
    }
}

impl ExportedModule for Example {
    fn name(&self) -> &str {
        "Example"
    }

    fn constants(&self) -> Constants {
        [("version", json!("1.0.0"))].into_iter().collect()
    }

    fn exported_methods(&self) -> Vec<MethodCandidate<Self>> {
        self.probes.discoveries.fetch_add(1, Ordering::SeqCst);

        vec![
            MethodCandidate::exported(
                "add",
                [TypeTag::Integer, TypeTag::Integer, TypeTag::Completion],
                |module: &Example, args, completion| {
                    module.executed();
                    let sum = args
                        .integer(0)?
                        .checked_add(args.integer(1)?)
                        .ok_or_else(|| MethodFault::new("integer overflow"))?;
                    completion.resolve(sum);
                    Ok(())
                },
            ),
            MethodCandidate::exported(
                "greet",
                [TypeTag::String, TypeTag::Completion],
                |module: &Example, args, completion| {
                    module.executed();
                    let host = module.host()?;
                    completion.resolve(format!("{}, {}!", host.greeting, args.string(0)?));
                    Ok(())
                },
            ),
            MethodCandidate::exported(
                "record",
                [TypeTag::Integer, TypeTag::String, TypeTag::Bool, TypeTag::Completion],
                |module: &Example, args, completion| {
                    module.executed();
                    completion.resolve(json!({
                        "id": args.integer(0)?,
                        "label": args.string(1)?,
                        "active": args.boolean(2)?,
                    }));
                    Ok(())
                },
            ),
            MethodCandidate::exported(
                "failSync",
                [TypeTag::Completion],
                |module: &Example, _, completion| {
                    module.executed();
                    // 同步失败之后再尝试 reject，验证契约已被分发器封存。
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(10));
                        completion.reject("late asynchronous reject");
                    });
                    Err(MethodFault::new("synchronous failure"))
                },
            ),
            MethodCandidate::exported(
                "failAsync",
                [TypeTag::Completion],
                |module: &Example, _, completion| {
                    module.executed();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(10));
                        completion.reject(
                            MethodFault::new("asynchronous failure")
                                .with_cause(std::io::Error::other("backend offline")),
                        );
                    });
                    Ok(())
                },
            ),
            MethodCandidate::exported(
                "addLater",
                [TypeTag::Integer, TypeTag::Integer, TypeTag::Completion],
                |module: &Example, args, completion| {
                    module.executed();
                    let runtime = module
                        .host()?
                        .runtime
                        .clone()
                        .ok_or_else(|| MethodFault::new("no host runtime available"))?;
                    let sum = args.integer(0)? + args.integer(1)?;
                    runtime.spawn(async move {
                        tokio::task::yield_now().await;
                        completion.resolve(sum);
                    });
                    Ok(())
                },
            ),
            MethodCandidate::exported(
                "forget",
                [TypeTag::Completion],
                |module: &Example, _, completion| {
                    module.executed();
                    drop(completion);
                    Ok(())
                },
            ),
            MethodCandidate::internal(
                "reset",
                [TypeTag::Completion],
                |module: &Example, _, completion| {
                    module.executed();
                    completion.resolve(Value::Null);
                    Ok(())
                },
            ),
        ]
    }
}

/// 记录每次调用的转换服务，委托给 [`StandardCoercer`]。
#[derive(Default)]
pub struct CountingCoercer {
    calls: Mutex<Vec<(Value, TypeTag)>>,
}

impl CountingCoercer {
    pub fn calls(&self) -> Vec<(Value, TypeTag)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArgumentCoercer for CountingCoercer {
    fn coerce(&self, value: Value, target: TypeTag) -> Result<Value, CoercionError> {
        self.calls.lock().unwrap().push((value.clone(), target));
        StandardCoercer.coerce(value, target)
    }
}

/// 以“全部字符串都先尝试解析为数字”为规则的模块级转换服务。
pub struct LenientNumbers;

impl ArgumentCoercer for LenientNumbers {
    fn coerce(&self, value: Value, target: TypeTag) -> Result<Value, CoercionError> {
        match (&value, target) {
            (Value::String(text), TypeTag::Number) => text
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| CoercionError::OutOfRange {
                    expected: TypeTag::Number,
                    value: text.clone(),
                }),
            _ => StandardCoercer.coerce(value, target),
        }
    }
}

/// 使用 [`LenientNumbers`] 的模块。
pub struct Lenient;

impl ExportedModule for Lenient {
    fn name(&self) -> &str {
        "Lenient"
    }

    fn exported_methods(&self) -> Vec<MethodCandidate<Self>> {
        vec![MethodCandidate::exported(
            "double",
            [TypeTag::Number, TypeTag::Completion],
            |_: &Lenient, args, completion| {
                completion.resolve(args.number(0)? * 2.0);
                Ok(())
            },
        )]
    }

    fn coercer(&self) -> Option<&dyn ArgumentCoercer> {
        Some(&LenientNumbers)
    }
}
