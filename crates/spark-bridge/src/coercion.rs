//! 参数强制转换服务。
//!
//! # 模块定位（Why）
//! - 分发器只关心“把第 i 个松散实参转换为第 i 个声明类型”，具体规则交给 [`ArgumentCoercer`]；
//! - 模块可以通过 [`ExportedModule::coercer`](crate::module::ExportedModule::coercer) 提供自己的实现，
//!   覆盖 [`StandardCoercer`] 的默认规则。
//!
//! # 契约（What）
//! - `coerce` 对控制流而言是全函数：要么返回转换后的值，要么返回 [`CoercionError`]，不挂起、不 panic。

use serde_json::{Number, Value};

use crate::{error::CoercionError, types::TypeTag};

/// 参数强制转换契约。
pub trait ArgumentCoercer: Send + Sync {
    /// 将 `value` 转换为 `target` 描述的形态。
    fn coerce(&self, value: Value, target: TypeTag) -> Result<Value, CoercionError>;
}

/// 默认转换规则。
///
/// # 教案式说明
/// - **意图 (Why)**：远端脚本环境通常把所有数字都编码为双精度浮点，宿主却经常声明整数参数；
///   默认规则在不丢精度的前提下完成这类收窄，其余形态保持严格匹配；
/// - **契约 (What)**：
///   - `Any` 原样透传（含 `null`）；
///   - `Integer` 接受整数，或小数部分为零且落在 `i64` 范围内的浮点数；
///   - `Number` 接受任意数字，统一归一化为 `f64`；
///   - `Bool`/`String`/`List`/`Map` 只接受同形态的 JSON 值；
///   - `Completion` 永远拒绝，完成契约只能由分发器注入。
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardCoercer;

impl ArgumentCoercer for StandardCoercer {
    fn coerce(&self, value: Value, target: TypeTag) -> Result<Value, CoercionError> {
        match (target, value) {
            (TypeTag::Any, value) => Ok(value),
            (TypeTag::Bool, value @ Value::Bool(_)) => Ok(value),
            (TypeTag::Integer, Value::Number(number)) => narrow_to_integer(number),
            (TypeTag::Number, Value::Number(number)) => widen_to_number(number),
            (TypeTag::String, value @ Value::String(_)) => Ok(value),
            (TypeTag::List, value @ Value::Array(_)) => Ok(value),
            (TypeTag::Map, value @ Value::Object(_)) => Ok(value),
            (TypeTag::Completion, _) => Err(CoercionError::CompletionNotCoercible),
            (expected, value) => Err(CoercionError::TypeMismatch {
                expected,
                found: json_kind(&value),
            }),
        }
    }
}

/// `i64` 可精确表示的浮点上界（2^63）。
const I64_UPPER_AS_F64: f64 = 9_223_372_036_854_775_808.0;

fn narrow_to_integer(number: Number) -> Result<Value, CoercionError> {
    if let Some(integer) = number.as_i64() {
        return Ok(Value::from(integer));
    }
    let out_of_range = || CoercionError::OutOfRange {
        expected: TypeTag::Integer,
        value: number.to_string(),
    };
    if number.is_u64() {
        return Err(out_of_range());
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float >= -I64_UPPER_AS_F64 && float < I64_UPPER_AS_F64 => {
            Ok(Value::from(float as i64))
        }
        _ => Err(out_of_range()),
    }
}

fn widen_to_number(number: Number) -> Result<Value, CoercionError> {
    number
        .as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CoercionError::OutOfRange {
            expected: TypeTag::Number,
            value: number.to_string(),
        })
}

/// JSON 值的形态名称。
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
