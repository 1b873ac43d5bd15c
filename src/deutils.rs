// src/deutils.rs
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Remote toggle settings come back as strings rather than booleans, so
/// anything other than empty or the literal "false" counts as set.
pub fn to_boolean(s: &str) -> bool {
    !s.is_empty() && s != "false"
}

/// The READY payload reports operation mode as "On"/"Off"; the bridge may
/// also forward a plain boolean.
pub fn deserialize_op_mode<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s == "On"),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Other(&other.to_string()),
            &"\"On\", \"Off\" or a boolean",
        )),
    }
}

/// Same leniency as the op-mode field, but using the toggle truthiness rule
/// for strings.
pub fn deserialize_bool_from_anything<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(to_boolean(&s)),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Other(&other.to_string()),
            &"expected boolean representation",
        )),
    }
}

pub fn deserialize_numeric_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let v = Value::deserialize(deserializer)?;
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| D::Error::custom("non-integer"))
}

/// Parses a seconds value typed into an IntegerInput. Negative or
/// unparseable input yields `None`.
pub fn parse_seconds(s: &str) -> Option<u32> {
    let t = s.trim();
    t.parse::<u32>()
        .ok()
        .or_else(|| t.parse::<f64>().ok().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u32))
}
