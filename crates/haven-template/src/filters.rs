//! Custom template filters
//!
//! Conversion and formatting filters templates lean on for sensor math and
//! service payload shaping.

use crate::states::json_to_value;
use minijinja::value::{Kwargs, Value, ValueKind};
use minijinja::{Error, ErrorKind};
use regex::Regex;
use std::convert::TryFrom;

fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

fn value_to_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value_to_f64(value).map(|f| f as i64))
}

// ==================== String Filters ====================

/// Turn a string into a slug, `separator` kwarg defaults to `_`.
pub fn slugify(value: &str, kwargs: Kwargs) -> Result<String, Error> {
    let separator: String = kwargs
        .get::<Option<String>>("separator")?
        .unwrap_or_else(|| "_".to_string());
    Ok(slug::slugify(value).replace('-', &separator))
}

/// Replace every match of a regex pattern.
pub fn regex_replace(value: &str, find: &str, replace: &str) -> Result<String, Error> {
    let re = Regex::new(find)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid regex: {}", e)))?;
    Ok(re.replace_all(value, replace).to_string())
}

// ==================== Type Conversion Filters ====================

/// Convert to float with an optional default.
///
/// Undefined, none and the empty string take the default (or 0.0). A value
/// that cannot be parsed errors unless a default was given.
pub fn to_float(value: Value, default: Option<Value>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() || value.as_str() == Some("") {
        let d = default.as_ref().and_then(value_to_f64).unwrap_or(0.0);
        return Ok(Value::from(d));
    }

    let parsed = value_to_f64(&value)
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()));

    match parsed {
        Some(f) => Ok(Value::from(f)),
        None => match default {
            Some(d) => Ok(Value::from(value_to_f64(&d).unwrap_or(0.0))),
            None => Err(Error::new(
                ErrorKind::InvalidOperation,
                "cannot convert to float",
            )),
        },
    }
}

/// Convert to integer with an optional default, truncating floats.
pub fn to_int(value: Value, default: Option<Value>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() || value.as_str() == Some("") {
        let d = default.as_ref().and_then(value_to_i64).unwrap_or(0);
        return Ok(Value::from(d));
    }

    let parsed = value_to_i64(&value).or_else(|| {
        value.as_str().and_then(|s| {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        })
    });

    match parsed {
        Some(i) => Ok(Value::from(i)),
        None => match default {
            Some(d) => Ok(Value::from(value_to_i64(&d).unwrap_or(0))),
            None => Err(Error::new(
                ErrorKind::InvalidOperation,
                "cannot convert to int",
            )),
        },
    }
}

/// Convert to boolean.
///
/// Strings match the usual affirmatives (true/yes/on/1/enable/enabled),
/// numbers are true when nonzero, undefined and none take the default.
pub fn to_bool(value: Value, default: Option<bool>) -> bool {
    if value.is_undefined() || value.is_none() {
        return default.unwrap_or(false);
    }

    if let Ok(b) = bool::try_from(value.clone()) {
        return b;
    }

    if let Some(s) = value.as_str() {
        return matches!(
            s.to_lowercase().as_str(),
            "true" | "yes" | "on" | "1" | "enable" | "enabled"
        );
    }

    if let Some(f) = value_to_f64(&value) {
        return f != 0.0;
    }

    value.is_true()
}

// ==================== Math Filters ====================

/// Round to a precision, `method` kwarg selects common/ceil/floor/half.
pub fn round_filter(value: f64, precision: Option<i32>, kwargs: Kwargs) -> Result<f64, Error> {
    let precision = precision.unwrap_or(0);
    let method: String = kwargs
        .get::<Option<String>>("method")?
        .unwrap_or_else(|| "common".to_string());

    let multiplier = 10_f64.powi(precision);
    let scaled = value * multiplier;

    let rounded = match method.as_str() {
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        "half" => (scaled * 2.0).round() / 2.0,
        _ => scaled.round(),
    };

    Ok(rounded / multiplier)
}

// ==================== JSON Filters ====================

/// Serialize a value as JSON, `pretty` kwarg for indented output.
pub fn to_json(value: Value, kwargs: Kwargs) -> Result<String, Error> {
    let pretty: bool = kwargs.get::<Option<bool>>("pretty")?.unwrap_or(false);

    let json = value_to_json(&value)?;

    if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("JSON error: {}", e)))
}

/// Parse a JSON string into a template value.
pub fn from_json(value: &str) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid JSON: {}", e)))?;

    Ok(json_to_value(&json))
}

fn value_to_json(value: &Value) -> Result<serde_json::Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(serde_json::Value::Null);
    }

    match value.kind() {
        ValueKind::Bool => Ok(serde_json::Value::Bool(value.is_true())),
        ValueKind::Number => {
            if let Some(i) = value.as_i64() {
                Ok(serde_json::json!(i))
            } else if let Some(f) = value_to_f64(value) {
                Ok(serde_json::json!(f))
            } else {
                Ok(serde_json::Value::String(value.to_string()))
            }
        }
        ValueKind::String => Ok(serde_json::Value::String(
            value.as_str().unwrap_or_default().to_string(),
        )),
        ValueKind::Seq | ValueKind::Iterable => {
            let mut arr = Vec::new();
            if let Ok(iter) = value.try_iter() {
                for item in iter {
                    arr.push(value_to_json(&item)?);
                }
            }
            Ok(serde_json::Value::Array(arr))
        }
        ValueKind::Map => {
            let mut map = serde_json::Map::new();
            if let Ok(keys) = value.try_iter() {
                for key in keys {
                    let k = key
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| key.to_string());
                    let v = value.get_item(&key).unwrap_or(Value::UNDEFINED);
                    map.insert(k, value_to_json(&v)?);
                }
            }
            Ok(serde_json::Value::Object(map))
        }
        _ => Ok(serde_json::Value::String(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Kwargs-taking filters (slugify, round, to_json) are exercised through
    // the engine tests where minijinja builds the kwargs itself.

    #[test]
    fn regex_replace_collapses() {
        assert_eq!(regex_replace("a  b   c", r"\s+", " ").unwrap(), "a b c");
        assert!(regex_replace("x", "(", "y").is_err());
    }

    #[test]
    fn float_parses_strings() {
        let v = to_float(Value::from("21.4"), None).unwrap();
        assert_eq!(f64::try_from(v).unwrap(), 21.4);
    }

    #[test]
    fn float_default_on_garbage() {
        let v = to_float(Value::from("toast"), Some(Value::from(0.5))).unwrap();
        assert_eq!(f64::try_from(v).unwrap(), 0.5);
        assert!(to_float(Value::from("toast"), None).is_err());
    }

    #[test]
    fn float_empty_string_is_zero() {
        let v = to_float(Value::from(""), None).unwrap();
        assert_eq!(f64::try_from(v).unwrap(), 0.0);
    }

    #[test]
    fn int_truncates() {
        assert_eq!(to_int(Value::from("3.9"), None).unwrap().as_i64(), Some(3));
        assert_eq!(to_int(Value::from(2.7), None).unwrap().as_i64(), Some(2));
        assert_eq!(
            to_int(Value::UNDEFINED, Some(Value::from(7)))
                .unwrap()
                .as_i64(),
            Some(7)
        );
        assert!(to_int(Value::from("toast"), None).is_err());
    }

    #[test]
    fn bool_affirmatives() {
        assert!(to_bool(Value::from("Yes"), None));
        assert!(to_bool(Value::from("on"), None));
        assert!(to_bool(Value::from(1), None));
        assert!(!to_bool(Value::from("off"), None));
        assert!(!to_bool(Value::from(0), None));
        assert!(to_bool(Value::UNDEFINED, Some(true)));
    }

    #[test]
    fn from_json_parses_objects() {
        let parsed = from_json(r#"{"host": "10.0.0.8", "port": 4000}"#).unwrap();
        assert_eq!(
            parsed.get_item(&Value::from("host")).unwrap().as_str(),
            Some("10.0.0.8")
        );
        assert_eq!(
            parsed.get_item(&Value::from("port")).unwrap().as_i64(),
            Some(4000)
        );
        assert!(from_json("{nope").is_err());
    }

    #[test]
    fn value_to_json_scalars() {
        assert_eq!(value_to_json(&Value::from(true)).unwrap(), serde_json::json!(true));
        assert_eq!(value_to_json(&Value::from(1.5)).unwrap(), serde_json::json!(1.5));
        assert_eq!(value_to_json(&Value::UNDEFINED).unwrap(), serde_json::Value::Null);
        assert_eq!(
            value_to_json(&Value::from(vec![1, 2])).unwrap(),
            serde_json::json!([1, 2])
        );
    }
}
