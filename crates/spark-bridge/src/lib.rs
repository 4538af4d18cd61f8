#![deny(unsafe_code)]

//! # spark-bridge
//!
//! ## 定位与职责（Why）
//! - 宿主模块把一部分方法按名称暴露给远端调用方（脚本环境、客户端），本 crate 提供其中的核心：
//!   导出方法注册表与调用分发器；
//! - 注册期发现并校验模块声明的导出方法；调用期按名称与参数个数匹配、逐位强制转换松散实参、
//!   执行方法体，并把一切失败收敛到统一的错误分类，结果经由单次结算的完成契约送达。
//!
//! ## 架构嵌入（Where）
//! - `registry`：候选方法筛选、签名校验与名称索引；
//! - `dispatch`：调用请求与分发器；
//! - `completion`：完成契约与调用方侧的等待句柄；
//! - `module`：模块契约、宿主上下文、常量表与记忆化注册表的宿主包装；
//! - `coercion` / `arguments` / `types`：参数类型词汇、转换服务与转换后的实参序列；
//! - `config` / `observability` / `error`：配置、日志与错误分类。
//!
//! ## 使用示例（How）
//! ```
//! use futures::executor::block_on;
//! use serde_json::json;
//! use spark_bridge::{Dispatcher, ExportedModule, InvocationRequest, MethodCandidate, ModuleHost, TypeTag};
//!
//! struct Calculator;
//!
//! impl ExportedModule for Calculator {
//!     fn name(&self) -> &str {
//!         "Calculator"
//!     }
//!
//!     fn exported_methods(&self) -> Vec<MethodCandidate<Self>> {
//!         vec![MethodCandidate::exported(
//!             "add",
//!             [TypeTag::Number, TypeTag::Number, TypeTag::Completion],
//!             |_, args, completion| {
//!                 completion.resolve(args.number(0)? + args.number(1)?);
//!                 Ok(())
//!             },
//!         )]
//!     }
//! }
//!
//! let host = ModuleHost::new(Calculator);
//! let pending = host
//!     .invoke(&Dispatcher::default(), InvocationRequest::new("add", vec![json!(2), json!(3)]))
//!     .expect("dispatch succeeds");
//! assert_eq!(block_on(pending).unwrap(), json!(5.0));
//! ```

pub mod arguments;
pub mod coercion;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod module;
pub mod observability;
pub mod registry;
pub mod types;

pub use arguments::Arguments;
pub use coercion::{ArgumentCoercer, StandardCoercer};
pub use completion::{Completion, CompletionState, PendingInvocation};
pub use config::{ConfigError, DispatcherConfig, SettleViolationPolicy};
pub use dispatch::{Dispatcher, InvocationRequest};
pub use error::{BridgeError, CoercionError, ErrorStage, MethodFault, SignatureDefect};
pub use module::{Constants, DynModule, ExportedModule, HostContext, ModuleHost};
pub use registry::{ExportedMethod, MethodCandidate, MethodDescriptor, MethodHandler, MethodRegistry};
pub use types::TypeTag;
