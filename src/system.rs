//! Built-in functions exposed to expressions: the read-only array prototype
//! consulted when prototype access is enabled.

use crate::eval::EvalError;
use crate::ops::{same_value_zero, strict_equals, to_number, truthy};
use crate::value::{Array, Function, Object, Value};

type Builtin = fn(&Value, &[Value]) -> Result<Value, EvalError>;

const ARRAY_METHODS: [(&str, Builtin); 16] = [
    ("concat", concat),
    ("every", every),
    ("filter", filter),
    ("find", find),
    ("findIndex", find_index),
    ("forEach", for_each),
    ("includes", includes),
    ("indexOf", index_of),
    ("join", join),
    ("lastIndexOf", last_index_of),
    ("map", map),
    ("reduce", reduce),
    ("reduceRight", reduce_right),
    ("slice", slice),
    ("some", some),
    ("toString", to_string),
];

/// A frozen object holding the array methods expressions may call.
pub fn array_prototype() -> Object {
    let proto = Object::new();
    for (name, method) in ARRAY_METHODS {
        let body = move |this: &Value, args: &[Value]| {
            ensure_array(name, this)?;
            method(this, args)
        };
        proto.set(name, Function::new(name, body));
    }
    proto.freeze();
    proto
}

fn ensure_array(name: &str, this: &Value) -> Result<(), EvalError> {
    match this {
        Value::Array(_) => Ok(()),
        _ => Err(EvalError::Type(format!(
            "Array.prototype.{name} called on non-array value"
        ))),
    }
}

fn this_array(this: &Value) -> Array {
    this.as_array().cloned().unwrap_or_default()
}

fn callback(value: Option<&Value>) -> Result<Function, EvalError> {
    match value {
        Some(Value::Function(function)) => Ok(function.clone()),
        Some(other) => Err(EvalError::Type(format!("{other} is not a function"))),
        None => Err(EvalError::Type("undefined is not a function".to_string())),
    }
}

/// Resolves a possibly negative position against `len`, clamped to `0..=len`.
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    let Some(value) = value.filter(|value| !matches!(value, Value::Undefined)) else {
        return default;
    };
    let n = to_number(value);
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

/// Calls the callback in `args` with `(element, index, array)` for each
/// element until `visitor` returns a value.
fn visit(
    this: &Value,
    args: &[Value],
    mut visitor: impl FnMut(usize, &Value, Value) -> Option<Value>,
) -> Result<Option<Value>, EvalError> {
    let predicate = callback(args.first())?;
    for (index, item) in this_array(this).items().into_iter().enumerate() {
        let result = predicate.call(&[item.clone(), Value::from(index), this.clone()])?;
        if let Some(done) = visitor(index, &item, result) {
            return Ok(Some(done));
        }
    }
    Ok(None)
}

pub fn concat(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let array = this_array(this);
    let mut items = array.items();
    for arg in args {
        match arg {
            Value::Array(other) => items.extend(other.items()),
            other => items.push(other.clone()),
        }
    }
    Ok(Value::Array(Array::with_proto(items, array.proto())))
}

pub fn every(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let failed = visit(this, args, |_, _, result| (!truthy(&result)).then_some(Value::Null))?;
    Ok(Value::from(failed.is_none()))
}

pub fn some(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let found = visit(this, args, |_, _, result| truthy(&result).then_some(Value::Null))?;
    Ok(Value::from(found.is_some()))
}

pub fn filter(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let mut kept = Vec::new();
    visit(this, args, |_, item, result| {
        if truthy(&result) {
            kept.push(item.clone());
        }
        None
    })?;
    Ok(Value::Array(Array::with_proto(kept, this_array(this).proto())))
}

pub fn find(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let found = visit(this, args, |_, item, result| truthy(&result).then(|| item.clone()))?;
    Ok(found.unwrap_or_default())
}

pub fn find_index(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let found = visit(this, args, |index, _, result| {
        truthy(&result).then(|| Value::from(index))
    })?;
    Ok(found.unwrap_or(Value::Number(-1.0)))
}

pub fn for_each(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    visit(this, args, |_, _, _| None)?;
    Ok(Value::Undefined)
}

pub fn map(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let mut mapped = Vec::new();
    visit(this, args, |_, _, result| {
        mapped.push(result);
        None
    })?;
    Ok(Value::Array(Array::with_proto(mapped, this_array(this).proto())))
}

pub fn includes(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let mut input = args.iter();
    let needle = input.next().cloned().unwrap_or_default();
    let items = this_array(this).items();
    let start = relative_index(input.next(), items.len(), 0);
    Ok(Value::from(
        items[start..].iter().any(|item| same_value_zero(item, &needle)),
    ))
}

pub fn index_of(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let mut input = args.iter();
    let needle = input.next().cloned().unwrap_or_default();
    let items = this_array(this).items();
    let start = relative_index(input.next(), items.len(), 0);
    let position = items[start..]
        .iter()
        .position(|item| strict_equals(item, &needle))
        .map(|offset| start + offset);
    Ok(position.map_or(Value::Number(-1.0), Value::from))
}

pub fn last_index_of(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let mut input = args.iter();
    let needle = input.next().cloned().unwrap_or_default();
    let items = this_array(this).items();
    if items.is_empty() {
        return Ok(Value::Number(-1.0));
    }
    let end = match input.next() {
        None => items.len(),
        Some(from) => {
            let n = to_number(from);
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            let index = if n < 0.0 { items.len() as f64 + n } else { n };
            if index < 0.0 {
                return Ok(Value::Number(-1.0));
            }
            (index as usize).min(items.len() - 1) + 1
        }
    };
    let position = items[..end]
        .iter()
        .rposition(|item| strict_equals(item, &needle));
    Ok(position.map_or(Value::Number(-1.0), Value::from))
}

pub fn join(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let separator = match args.first() {
        None | Some(Value::Undefined) => ",".to_string(),
        Some(separator) => separator.to_string(),
    };
    Ok(Value::from(this_array(this).join(&separator)))
}

pub fn to_string(this: &Value, _: &[Value]) -> Result<Value, EvalError> {
    join(this, &[])
}

pub fn slice(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let array = this_array(this);
    let items = array.items();
    let mut input = args.iter();
    let start = relative_index(input.next(), items.len(), 0);
    let end = relative_index(input.next(), items.len(), items.len());
    let sliced = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Array(Array::with_proto(sliced, array.proto())))
}

fn fold(
    this: &Value,
    args: &[Value],
    mut items: impl Iterator<Item = (usize, Value)>,
) -> Result<Value, EvalError> {
    let reducer = callback(args.first())?;
    let mut accumulator = match args.get(1) {
        Some(initial) => initial.clone(),
        None => match items.next() {
            Some((_, first)) => first,
            None => {
                return Err(EvalError::Type(
                    "Reduce of empty array with no initial value".to_string(),
                ));
            }
        },
    };
    for (index, item) in items {
        accumulator = reducer.call(&[accumulator, item, Value::from(index), this.clone()])?;
    }
    Ok(accumulator)
}

pub fn reduce(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let items = this_array(this).items();
    fold(this, args, items.into_iter().enumerate())
}

pub fn reduce_right(this: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let items = this_array(this).items();
    fold(this, args, items.into_iter().enumerate().rev())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: serde_json::Value) -> Value {
        Value::from(values)
    }

    fn method(name: &str) -> Function {
        match array_prototype().get(name) {
            Some(Value::Function(function)) => function,
            _ => panic!("missing method {name}"),
        }
    }

    fn invoke(name: &str, this: &Value, args: &[Value]) -> Result<Value, EvalError> {
        method(name).bind(this.clone()).call(args)
    }

    fn double() -> Value {
        Value::Function(Function::from_fn("double", |args| {
            Ok(Value::Number(to_number(&args[0]) * 2.0))
        }))
    }

    fn is_even() -> Value {
        Value::Function(Function::from_fn("isEven", |args| {
            Ok(Value::from(to_number(&args[0]) % 2.0 == 0.0))
        }))
    }

    #[test]
    fn prototype_is_frozen() {
        let proto = array_prototype();
        assert!(proto.is_frozen());
        assert_eq!(proto.len(), ARRAY_METHODS.len());
        assert!(proto.try_set("map", Value::Null).is_err());
    }

    #[test]
    fn rejects_non_array_receivers() {
        let error = invoke("map", &Value::from(1), &[double()]).unwrap_err();
        assert_eq!(error.to_string(), "Array.prototype.map called on non-array value");
    }

    #[test]
    fn iteration_methods() {
        let numbers = list(serde_json::json!([1, 2, 3, 4]));
        assert_eq!(invoke("map", &numbers, &[double()]).unwrap(), list(serde_json::json!([2, 4, 6, 8])));
        assert_eq!(invoke("filter", &numbers, &[is_even()]).unwrap(), list(serde_json::json!([2, 4])));
        assert_eq!(invoke("find", &numbers, &[is_even()]).unwrap(), Value::from(2));
        assert_eq!(invoke("findIndex", &numbers, &[is_even()]).unwrap(), Value::from(1));
        assert_eq!(invoke("every", &numbers, &[is_even()]).unwrap(), Value::from(false));
        assert_eq!(invoke("some", &numbers, &[is_even()]).unwrap(), Value::from(true));
        assert_eq!(invoke("forEach", &numbers, &[is_even()]).unwrap(), Value::Undefined);
        assert_eq!(
            invoke("map", &numbers, &[Value::from(1)]).unwrap_err().to_string(),
            "1 is not a function"
        );
    }

    #[test]
    fn searching() {
        let values = list(serde_json::json!([1, 2, 1, null]));
        assert_eq!(invoke("indexOf", &values, &[Value::from(1)]).unwrap(), Value::from(0));
        assert_eq!(invoke("indexOf", &values, &[Value::from(1), Value::from(1)]).unwrap(), Value::from(2));
        assert_eq!(invoke("lastIndexOf", &values, &[Value::from(1)]).unwrap(), Value::from(2));
        assert_eq!(invoke("lastIndexOf", &values, &[Value::from(1), Value::from(-3)]).unwrap(), Value::from(0));
        assert_eq!(invoke("indexOf", &values, &[Value::from(7)]).unwrap(), Value::Number(-1.0));
        assert_eq!(invoke("includes", &values, &[Value::Null]).unwrap(), Value::from(true));
        let nan = Value::from(vec![Value::Number(f64::NAN)]);
        assert_eq!(invoke("includes", &nan, &[Value::Number(f64::NAN)]).unwrap(), Value::from(true));
        assert_eq!(invoke("indexOf", &nan, &[Value::Number(f64::NAN)]).unwrap(), Value::Number(-1.0));
    }

    #[test]
    fn reducing() {
        let sum = Value::Function(Function::from_fn("sum", |args| {
            Ok(crate::ops::add(&args[0], &args[1]))
        }));
        let letters = list(serde_json::json!(["a", "b", "c"]));
        assert_eq!(invoke("reduce", &letters, &[sum.clone()]).unwrap(), Value::from("abc"));
        assert_eq!(invoke("reduceRight", &letters, &[sum.clone()]).unwrap(), Value::from("cba"));
        assert_eq!(
            invoke("reduce", &letters, &[sum.clone(), Value::from(">")]).unwrap(),
            Value::from(">abc")
        );
        let empty = list(serde_json::json!([]));
        assert_eq!(
            invoke("reduce", &empty, &[sum]).unwrap_err().to_string(),
            "Reduce of empty array with no initial value"
        );
    }

    #[test]
    fn joining_skips_cycles() {
        let values = list(serde_json::json!([1, 2]));
        if let Value::Array(array) = &values {
            array.push(values.clone());
        }
        assert_eq!(invoke("join", &values, &[Value::from("-")]).unwrap(), Value::from("1-2-"));
        assert_eq!(invoke("toString", &values, &[]).unwrap(), Value::from("1,2,"));
    }

    #[test]
    fn slicing_and_joining() {
        let values = list(serde_json::json!([1, 2, 3, 4, 5]));
        assert_eq!(invoke("slice", &values, &[Value::from(1), Value::from(-1)]).unwrap(), list(serde_json::json!([2, 3, 4])));
        assert_eq!(invoke("slice", &values, &[Value::from(-2)]).unwrap(), list(serde_json::json!([4, 5])));
        assert_eq!(invoke("slice", &values, &[Value::from(3), Value::from(1)]).unwrap(), list(serde_json::json!([])));
        assert_eq!(invoke("join", &values, &[Value::from("-")]).unwrap(), Value::from("1-2-3-4-5"));
        assert_eq!(invoke("toString", &values, &[]).unwrap(), Value::from("1,2,3,4,5"));
        assert_eq!(
            invoke("concat", &values, &[Value::from(vec![6]), Value::from(7)]).unwrap(),
            list(serde_json::json!([1, 2, 3, 4, 5, 6, 7]))
        );
    }
}
