//! 已完成强制转换的位置参数序列。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{coercion::json_kind, error::MethodFault};

/// 交给导出方法处理器的实参序列。
///
/// # 教案式说明
/// - **意图 (Why)**：分发器已按签名逐位完成转换，处理器只需按位置取出强类型值；
/// - **契约 (What)**：序列长度等于调用方可见的参数个数（签名长度减一），完成契约不在其中；
///   类型化访问器在位置缺失或形态不符时返回 [`MethodFault`]，处理器可直接用 `?` 传播。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// 读取 `Integer` 位置。
    pub fn integer(&self, position: usize) -> Result<i64, MethodFault> {
        let value = self.require(position)?;
        value
            .as_i64()
            .ok_or_else(|| unexpected(position, "integer", value))
    }

    /// 读取 `Number` 位置。
    pub fn number(&self, position: usize) -> Result<f64, MethodFault> {
        let value = self.require(position)?;
        value
            .as_f64()
            .ok_or_else(|| unexpected(position, "number", value))
    }

    pub fn boolean(&self, position: usize) -> Result<bool, MethodFault> {
        let value = self.require(position)?;
        value
            .as_bool()
            .ok_or_else(|| unexpected(position, "bool", value))
    }

    pub fn string(&self, position: usize) -> Result<&str, MethodFault> {
        let value = self.require(position)?;
        value
            .as_str()
            .ok_or_else(|| unexpected(position, "string", value))
    }

    /// 以 serde 反序列化任意位置，适用于 `List`/`Map`/`Any` 参数承载的结构化数据。
    pub fn decode<T>(&self, position: usize) -> Result<T, MethodFault>
    where
        T: DeserializeOwned,
    {
        let value = self.require(position)?;
        T::deserialize(value).map_err(|error| {
            MethodFault::new(format!("argument #{position} could not be decoded: {error}"))
                .with_cause(error)
        })
    }

    fn require(&self, position: usize) -> Result<&Value, MethodFault> {
        self.values
            .get(position)
            .ok_or_else(|| MethodFault::new(format!("argument #{position} is missing")))
    }
}

fn unexpected(position: usize, expected: &str, value: &Value) -> MethodFault {
    MethodFault::new(format!(
        "argument #{position} is not {expected}, found {}",
        json_kind(value)
    ))
}
