use std::{
    io::{self, Write},
    thread,
    time::Duration,
};

use crate::{Exception, NativeFn, NativeResult, Value, native};

pub fn print(args: &[Value]) -> NativeResult {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let mut out = io::stdout().lock();
    writeln!(out, "{line}").map_err(|e| Exception::runtime(format!("print failed: {e}")))?;
    Ok(Value::Null)
}

pub fn len(value: Value) -> NativeResult {
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Buffer(bytes) => bytes.len(),
        Value::Package(p) => p.len(),
        other => {
            return Err(Exception::type_error(format!(
                "value of type `{}` has no length",
                other.type_name()
            )));
        }
    };
    Ok(Value::float(len as f64))
}

pub fn str(value: Value) -> NativeResult {
    match value {
        Value::String(_) => Ok(value),
        other => Ok(Value::string(other.to_string())),
    }
}

pub fn type_of(value: Value) -> NativeResult {
    Ok(Value::from(value.type_name()))
}

pub fn array(items: &[Value]) -> NativeResult {
    Ok(Value::array(items))
}

/// Sleeps for the given number of milliseconds.
pub fn sleep(millis: Value) -> NativeResult {
    let Some(ms) = millis.as_float().filter(|ms| ms.is_finite() && *ms >= 0.0) else {
        return Err(Exception::type_error(format!(
            "sleep expects a non-negative number of milliseconds, got {}",
            millis.type_name()
        )));
    };
    thread::sleep(Duration::from_secs_f64(ms / 1000.0));
    Ok(Value::Null)
}

pub fn defaults() -> Vec<NativeFn> {
    vec![
        native!(crate::builtin::print),
        native!(crate::builtin::len),
        native!(crate::builtin::str),
        native!(crate::builtin::type_of),
        native!(crate::builtin::array),
        native!(crate::builtin::sleep).blocking(),
    ]
}
