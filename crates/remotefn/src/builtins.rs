//! Handlers shipped with the stock runner image.

use serde_json::{json, Value};

use crate::callable::{Handler, Registry};
use crate::error::Result;

/// Registry holding every built-in handler.
pub fn registry() -> Result<Registry> {
    Registry::new()
        .with_handler(add())?
        .with_handler(sum())?
        .with_handler(Handler::typed("concat", 2, |(a, b): (String, String)| a + &b))?
        .with_handler(Handler::new("echo", 1, |mut args| Ok(args.remove(0))))?
        .with_handler(len())
}

fn add() -> Handler {
    Handler::new("add", 2, |args| add_values(&args[0], &args[1]))
}

fn sum() -> Handler {
    Handler::new("sum", 1, |args| {
        let items = args[0].as_array().ok_or("sum expects an array")?;
        items
            .iter()
            .try_fold(json!(0), |acc, item| add_values(&acc, item))
    })
}

fn len() -> Handler {
    Handler::new("len", 1, |args| match &args[0] {
        Value::Array(items) => Ok(json!(items.len())),
        Value::Object(map) => Ok(json!(map.len())),
        Value::String(s) => Ok(json!(s.chars().count())),
        other => Err(format!("len is undefined for {}", other)),
    })
}

/// Integer addition when both sides are integers, float addition otherwise.
fn add_values(a: &Value, b: &Value) -> std::result::Result<Value, String> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or_else(|| "integer overflow".to_string());
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(x + y)),
        _ => Err(format!("cannot add {} and {}", a, b)),
    }
}
