//! Global template functions
//!
//! Time helpers and the `iif` ternary.

use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike, Utc};
use minijinja::value::Value;
use minijinja::{Error, ErrorKind};

/// Current wall-clock time in the hub's local timezone.
pub fn now() -> Value {
    Value::from_object(DateTimeWrapper(Local::now().fixed_offset()))
}

/// Current time in UTC.
pub fn utcnow() -> Value {
    Value::from_object(DateTimeWrapper(Utc::now().fixed_offset()))
}

/// Inline if: `iif(condition, if_true, if_false, if_none)`.
///
/// A none or undefined condition picks `if_none` when given, otherwise
/// `if_false`. Omitted branches fall back to plain booleans.
pub fn iif(
    condition: Value,
    if_true: Option<Value>,
    if_false: Option<Value>,
    if_none: Option<Value>,
) -> Value {
    if condition.is_none() || condition.is_undefined() {
        return if_none.or(if_false).unwrap_or(Value::UNDEFINED);
    }

    if condition.is_true() {
        if_true.unwrap_or(Value::from(true))
    } else {
        if_false.unwrap_or(Value::from(false))
    }
}

/// Datetime exposed to templates.
///
/// Carries its offset so `now()` keeps local wall time while `utcnow()`
/// stays at +00:00. Fields mirror Python's datetime where templates expect
/// them (`now().hour`, `now().weekday`).
#[derive(Debug, Clone)]
pub struct DateTimeWrapper(pub DateTime<FixedOffset>);

impl std::fmt::Display for DateTimeWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.f%:z"))
    }
}

impl minijinja::value::Object for DateTimeWrapper {
    fn get_value(self: &std::sync::Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        match key {
            "year" => Some(Value::from(self.0.year())),
            "month" => Some(Value::from(self.0.month())),
            "day" => Some(Value::from(self.0.day())),
            "hour" => Some(Value::from(self.0.hour())),
            "minute" => Some(Value::from(self.0.minute())),
            "second" => Some(Value::from(self.0.second())),
            "weekday" => Some(Value::from(self.0.weekday().num_days_from_monday())),
            "timestamp" => Some(Value::from(self.0.timestamp())),
            _ => None,
        }
    }

    fn call_method(
        self: &std::sync::Arc<Self>,
        _state: &minijinja::State,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match name {
            "strftime" => {
                let format = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        "strftime requires a format string",
                    )
                })?;
                Ok(Value::from(self.0.format(format).to_string()))
            }
            "isoformat" => Ok(Value::from(self.0.to_rfc3339())),
            "timestamp" => Ok(Value::from(self.0.timestamp())),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("datetime has no method {}", name),
            )),
        }
    }

    fn render(self: &std::sync::Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.f%:z"))
    }

    fn repr(self: &std::sync::Arc<Self>) -> minijinja::value::ObjectRepr {
        minijinja::value::ObjectRepr::Plain
    }
}
