//! Value marshaling between the host and the engine.
//!
//! Host code works with [`BridgeValue`], a structured value of nested
//! maps, arrays and scalars. It crosses into the engine as JSON text parsed
//! by the engine itself, and comes back out through the engine's
//! `JSON.stringify`, so both directions agree on number formatting.
//!
//! Supported scalars are `null`, booleans, finite numbers and strings.
//! Numbers are `f64` on both sides, so integers are exact up to 2^53.

use crate::error::{BridgeError, JsError, Result};
use rquickjs::{Ctx, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured value exchanged with the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BridgeValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (f64 for JS compatibility)
    Number(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<BridgeValue>),
    /// Object/map of values
    Object(HashMap<String, BridgeValue>),
}

impl BridgeValue {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, BridgeValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BridgeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            BridgeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BridgeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Vec<BridgeValue>> {
        match self {
            BridgeValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&HashMap<String, BridgeValue>> {
        match self {
            BridgeValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Name of the value's kind, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            BridgeValue::Null => "null",
            BridgeValue::Bool(_) => "bool",
            BridgeValue::Number(_) => "number",
            BridgeValue::String(_) => "string",
            BridgeValue::Array(_) => "array",
            BridgeValue::Object(_) => "object",
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<bool> for BridgeValue {
    fn from(b: bool) -> Self {
        BridgeValue::Bool(b)
    }
}

impl From<f64> for BridgeValue {
    fn from(n: f64) -> Self {
        BridgeValue::Number(n)
    }
}

impl From<i64> for BridgeValue {
    fn from(n: i64) -> Self {
        BridgeValue::Number(n as f64)
    }
}

impl From<u32> for BridgeValue {
    fn from(n: u32) -> Self {
        BridgeValue::Number(f64::from(n))
    }
}

impl From<String> for BridgeValue {
    fn from(s: String) -> Self {
        BridgeValue::String(s)
    }
}

impl From<&str> for BridgeValue {
    fn from(s: &str) -> Self {
        BridgeValue::String(s.to_string())
    }
}

impl<T: Into<BridgeValue>> From<Vec<T>> for BridgeValue {
    fn from(v: Vec<T>) -> Self {
        BridgeValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for BridgeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => BridgeValue::Null,
            serde_json::Value::Bool(b) => BridgeValue::Bool(b),
            serde_json::Value::Number(n) => BridgeValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => BridgeValue::String(s),
            serde_json::Value::Array(arr) => {
                BridgeValue::Array(arr.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                BridgeValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<BridgeValue> for serde_json::Value {
    fn from(value: BridgeValue) -> Self {
        match value {
            BridgeValue::Null => serde_json::Value::Null,
            BridgeValue::Bool(b) => serde_json::Value::Bool(b),
            BridgeValue::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            BridgeValue::String(s) => serde_json::Value::String(s),
            BridgeValue::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            BridgeValue::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl Default for BridgeValue {
    fn default() -> Self {
        BridgeValue::Null
    }
}

/// Build an engine value from a host value
pub fn to_js<'js>(ctx: &Ctx<'js>, value: &BridgeValue) -> Result<Value<'js>> {
    let json = value.to_json()?;
    json_to_js(ctx, &json)
}

/// Parse JSON text inside the engine
pub fn json_to_js<'js>(ctx: &Ctx<'js>, json: &str) -> Result<Value<'js>> {
    ctx.json_parse(json).map_err(|e| {
        let detail = crate::engine::exception_text(ctx, e);
        BridgeError::Js(
            JsError::new(crate::error::ErrorCode::SerializationError, "Engine rejected JSON payload")
                .with_cause(JsError::js_exception(detail)),
        )
    })
}

/// Stringify an engine value to JSON text.
///
/// Returns `None` for values `JSON.stringify` cannot represent (`undefined`,
/// functions, symbols).
pub fn js_to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Option<String>> {
    let text = ctx.json_stringify(value).map_err(|e| {
        let detail = crate::engine::exception_text(ctx, e);
        BridgeError::Js(
            JsError::new(crate::error::ErrorCode::SerializationError, "Failed to stringify value")
                .with_cause(JsError::js_exception(detail)),
        )
    })?;

    match text {
        Some(text) => {
            let text = text
                .to_string()
                .map_err(|e| BridgeError::Serialization(e.to_string()))?;
            Ok(Some(text))
        }
        None => Ok(None),
    }
}

/// Convert an engine value to a host value.
///
/// Returns `None` for values that have no JSON form.
pub fn from_js<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Option<BridgeValue>> {
    match js_to_json(ctx, value)? {
        Some(json) => Ok(Some(BridgeValue::from_json(&json)?)),
        None => Ok(None),
    }
}
