//! 参数类型词汇表：导出方法签名中每个位置允许声明的类型标签。
//!
//! # 模块定位（Why）
//! - 远端调用方传入的实参是松散类型的 JSON 值，宿主方法却要求强类型参数；
//!   `TypeTag` 是两者之间的约定语言，注册表据此校验签名，分发器据此驱动强制转换。
//! - `Completion` 也作为一种类型标签出现在签名末尾，使“最后一个参数必须是完成契约”
//!   成为可在注册期检查的结构性约束。

use core::fmt;

use serde::{Deserialize, Serialize};

/// 导出方法参数的类型标签。
///
/// # 契约说明（What）
/// - 除 [`TypeTag::Completion`] 外，其余标签都对应一种可由调用方提供的 JSON 形态；
/// - `Completion` 只能出现在签名最后一位，由分发器自行注入，调用方永远不会传入；
/// - 序列化形式为 `snake_case` 字符串，便于随 [`MethodDescriptor`](crate::registry::MethodDescriptor)
///   发布给远端。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    /// 任意值，包括 `null`，不做转换。
    Any,
    /// 布尔值。
    Bool,
    /// 可无损落入 `i64` 的整数。
    Integer,
    /// 任意数值，统一归一化为 `f64`。
    Number,
    /// UTF-8 字符串。
    String,
    /// 有序列表（JSON 数组）。
    List,
    /// 字符串键映射（JSON 对象）。
    Map,
    /// 完成契约占位，见 [`Completion`](crate::completion::Completion)。
    Completion,
}

impl TypeTag {
    /// 返回稳定的可读名称，用于错误信息与日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            TypeTag::Any => "any",
            TypeTag::Bool => "bool",
            TypeTag::Integer => "integer",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::List => "list",
            TypeTag::Map => "map",
            TypeTag::Completion => "completion",
        }
    }

    /// 是否为完成契约标签。
    pub const fn is_completion(self) -> bool {
        matches!(self, TypeTag::Completion)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
