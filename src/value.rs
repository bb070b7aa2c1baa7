use std::cell::RefCell;
use std::fmt::{self, Display};
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use indexmap::IndexMap;

use crate::eval::EvalError;
use crate::ops::number_to_string;

/// Writes past the end of an array may grow it by at most this many slots.
const MAX_ARRAY_GROWTH: usize = 1 << 20;

/// Arrays nested deeper than this join as empty strings and convert to JSON
/// as `null`.
const MAX_JOIN_DEPTH: usize = 256;

thread_local! {
    /// Arrays whose elements are being joined, outermost first.
    static JOINING: RefCell<Vec<*const RefCell<ArrayData>>> = const { RefCell::new(Vec::new()) };
}

/// A runtime value. Arrays, objects, functions and promises are shared
/// references; cloning a `Value` never copies their contents.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
    Function(Function),
    Promise(Promise),
}

impl Value {
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Promise(_) => "promise",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Functions fetched from `receiver` keep it as their `this`.
    pub fn bind_receiver(self, receiver: &Value) -> Value {
        match self {
            Value::Function(function) => Value::Function(function.bind(receiver.clone())),
            other => other,
        }
    }

    /// The JSON form of the value. Functions, promises, and containers that
    /// contain themselves become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.json_within(&mut Vec::new())
    }

    fn json_within(&self, ancestors: &mut Vec<*const ()>) -> serde_json::Value {
        let container = match self {
            Value::Array(array) => Rc::as_ptr(&array.0).cast::<()>(),
            Value::Object(object) => Rc::as_ptr(&object.0).cast::<()>(),
            Value::Null | Value::Undefined | Value::Function(_) | Value::Promise(_) => {
                return serde_json::Value::Null;
            }
            Value::Boolean(b) => return serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                return serde_json::Value::from(*n as i64);
            }
            Value::Number(n) => {
                return serde_json::Number::from_f64(*n)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number);
            }
            Value::String(s) => return serde_json::Value::String(s.to_string()),
        };
        if ancestors.len() >= MAX_JOIN_DEPTH || ancestors.contains(&container) {
            return serde_json::Value::Null;
        }
        ancestors.push(container);
        let json: serde_json::Value = match self {
            Value::Array(array) => array
                .items()
                .iter()
                .map(|item| item.json_within(ancestors))
                .collect(),
            Value::Object(object) => serde_json::Value::Object(
                object
                    .entries()
                    .into_iter()
                    .map(|(key, value)| (key, value.json_within(ancestors)))
                    .collect(),
            ),
            _ => serde_json::Value::Null,
        };
        ancestors.pop();
        json
    }

    fn inspect(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", &**s),
            Value::Array(_) | Value::Object(_) if depth > 8 => {
                write!(f, "[{}]", self.type_name())
            }
            Value::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.inspect(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Value::Object(object) => {
                let entries = object.entries();
                if entries.is_empty() {
                    return f.write_str("{}");
                }
                f.write_str("{ ")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_identifier(key) {
                        write!(f, "{key}: ")?;
                    } else {
                        write!(f, "{key:?}: ")?;
                    }
                    value.inspect(f, depth + 1)?;
                }
                f.write_str(" }")
            }
            Value::Function(function) if function.name().is_empty() => {
                f.write_str("[Function (anonymous)]")
            }
            Value::Function(function) => write!(f, "[Function {}]", function.name()),
            Value::Promise(promise) => match promise.peek() {
                None => f.write_str("Promise { <pending> }"),
                Some(Ok(value)) => {
                    f.write_str("Promise { ")?;
                    value.inspect(f, depth + 1)?;
                    f.write_str(" }")
                }
                Some(Err(error)) => write!(f, "Promise {{ <rejected> {error} }}"),
            },
            other => Display::fmt(other, f),
        }
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// String conversion as performed by `+` and template-less concatenation.
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(array) => f.write_str(&array.join(",")),
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(function) => {
                write!(f, "function {}() {{ [native code] }}", function.name())
            }
            Value::Promise(_) => f.write_str("[object Promise]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inspect(f, 0)
    }
}

/// Structural equality for hosts and tests; reference values compare by
/// contents, functions and promises by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || a.items() == b.items(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b) || a.entries() == b.entries(),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

#[derive(Default)]
struct ObjectData {
    properties: IndexMap<String, Value>,
    proto: Option<Object>,
    frozen: bool,
}

/// An ordered property map with an optional prototype consulted on lookup.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<ObjectData>>);

impl Object {
    /// An empty object without prototype.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proto(proto: Option<Object>) -> Self {
        Object(Rc::new(RefCell::new(ObjectData {
            proto,
            ..ObjectData::default()
        })))
    }

    pub fn proto(&self) -> Option<Object> {
        self.0.borrow().proto.clone()
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.0.borrow().properties.get(key).cloned()
    }

    /// Own property, else the nearest one along the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            let data = object.0.borrow();
            if let Some(value) = data.properties.get(key) {
                return Some(value.clone());
            }
            current = data.proto.clone();
        }
        None
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.borrow().properties.contains_key(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets an own property, ignoring the frozen flag.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0
            .borrow_mut()
            .properties
            .insert(key.into(), value.into());
    }

    /// Sets an own property on behalf of an expression.
    pub fn try_set(&self, key: &str, value: Value) -> Result<(), EvalError> {
        let mut data = self.0.borrow_mut();
        if data.frozen {
            return Err(EvalError::ReadOnly(key.to_string()));
        }
        data.properties.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().properties.shift_remove(key)
    }

    pub fn freeze(&self) {
        self.0.borrow_mut().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().properties.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new, unfrozen object with the same own properties and prototype.
    pub fn snapshot(&self) -> Object {
        let data = self.0.borrow();
        Object(Rc::new(RefCell::new(ObjectData {
            properties: data.properties.clone(),
            proto: data.proto.clone(),
            frozen: false,
        })))
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        for (key, value) in iter {
            object.set(key, value);
        }
        object
    }
}

#[derive(Default)]
struct ArrayData {
    items: Vec<Value>,
    proto: Option<Object>,
}

/// A list of values. Indices and `length` are its own properties; anything
/// else resolves through its prototype.
#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<ArrayData>>);

impl Array {
    pub fn new(items: Vec<Value>) -> Self {
        Self::with_proto(items, None)
    }

    pub fn with_proto(items: Vec<Value>, proto: Option<Object>) -> Self {
        Array(Rc::new(RefCell::new(ArrayData { items, proto })))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().items.get(index).cloned()
    }

    /// Writes an element, padding with `undefined` when writing past the end.
    pub fn set(&self, index: usize, value: Value) -> Result<(), EvalError> {
        let mut data = self.0.borrow_mut();
        if index >= data.items.len() {
            if index - data.items.len() > MAX_ARRAY_GROWTH {
                return Err(EvalError::Type("Invalid array length".to_string()));
            }
            data.items.resize(index + 1, Value::Undefined);
        }
        data.items[index] = value;
        Ok(())
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().items.push(value);
    }

    /// Shrinks or pads the array to `len` elements.
    pub fn set_len(&self, len: usize) -> Result<(), EvalError> {
        let mut data = self.0.borrow_mut();
        if len > data.items.len() + MAX_ARRAY_GROWTH {
            return Err(EvalError::Type("Invalid array length".to_string()));
        }
        data.items.resize(len, Value::Undefined);
        Ok(())
    }

    /// A copy of the current elements.
    pub fn items(&self) -> Vec<Value> {
        self.0.borrow().items.clone()
    }

    pub fn proto(&self) -> Option<Object> {
        self.0.borrow().proto.clone()
    }

    pub fn set_proto(&self, proto: Option<Object>) {
        self.0.borrow_mut().proto = proto;
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The string forms of the elements, separated by `separator`. Nullish
    /// elements and arrays already being joined further out render as empty
    /// strings.
    pub fn join(&self, separator: &str) -> String {
        let this = Rc::as_ptr(&self.0);
        let entered = JOINING.with_borrow_mut(|joining| {
            if joining.len() >= MAX_JOIN_DEPTH || joining.contains(&this) {
                return false;
            }
            joining.push(this);
            true
        });
        if !entered {
            return String::new();
        }
        let joined = self
            .items()
            .iter()
            .map(|item| {
                if item.is_nullish() {
                    String::new()
                } else {
                    item.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(separator);
        JOINING.with_borrow_mut(|joining| joining.pop());
        joined
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Array::new(iter.into_iter().collect())
    }
}

pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, EvalError>;

/// A host closure taking `(this, args)`, optionally bound to a receiver.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    body: Rc<NativeFn>,
    receiver: Option<Box<Value>>,
}

impl Function {
    pub fn new(
        name: impl Into<Rc<str>>,
        body: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Function {
            name: name.into(),
            body: Rc::new(body),
            receiver: None,
        }
    }

    /// A function that ignores its receiver.
    pub fn from_fn(
        name: impl Into<Rc<str>>,
        body: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self::new(name, move |_, args| body(args))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_deref()
    }

    /// Binds `this`. A function that is already bound keeps its receiver.
    pub fn bind(&self, receiver: Value) -> Function {
        if self.receiver.is_some() {
            return self.clone();
        }
        Function {
            receiver: Some(Box::new(receiver)),
            ..self.clone()
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        let this = self.receiver.as_deref().unwrap_or(&Value::Undefined);
        (self.body)(this, args)
    }

    /// Same underlying closure, whatever the receiver.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Function(self.clone()), f)
    }
}

pub type Settlement = Result<Value, EvalError>;

/// A pending value shared between everyone awaiting it.
#[derive(Clone)]
pub struct Promise(Shared<LocalBoxFuture<'static, Settlement>>);

impl Promise {
    pub fn new(future: impl Future<Output = Settlement> + 'static) -> Self {
        Promise(future.boxed_local().shared())
    }

    pub fn resolved(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn rejected(error: EvalError) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// The settlement, if the promise has already been driven to completion.
    pub fn peek(&self) -> Option<&Settlement> {
        self.0.peek()
    }

    pub async fn settle(self) -> Settlement {
        self.0.await
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Promise(self.clone()), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_prototype_chain() {
        let base = Object::from_iter([("a", 1)]);
        let derived = Object::with_proto(Some(base));
        derived.set("b", 2);
        assert_eq!(derived.get_own("a"), None);
        assert_eq!(derived.get("a"), Some(Value::from(1)));
        assert!(derived.has("a"));
        assert!(!derived.has_own("a"));
    }

    #[test]
    fn frozen_objects_reject_expression_writes() {
        let object = Object::from_iter([("a", 1)]);
        object.freeze();
        assert_eq!(
            object.try_set("a", Value::from(2)).unwrap_err().to_string(),
            "Cannot assign to read only property 'a'"
        );
        assert_eq!(object.get("a"), Some(Value::from(1)));
    }

    #[test]
    fn bound_functions_keep_their_first_receiver() {
        let this = Function::new("this", |this, _| Ok(this.clone()));
        let bound = this.bind(Value::from("first")).bind(Value::from("second"));
        assert_eq!(bound.call(&[]).unwrap(), Value::from("first"));
        assert!(bound.ptr_eq(&this));
    }

    #[test]
    fn arrays_pad_with_undefined() {
        let array = Array::new(vec![Value::from(1)]);
        array.set(2, Value::from(3)).unwrap();
        assert_eq!(array.items(), vec![Value::from(1), Value::Undefined, Value::from(3)]);
        assert!(array.set(usize::MAX / 2, Value::Null).is_err());
    }

    #[test]
    fn display_matches_string_conversion() {
        let value = Value::from(vec![Value::from(1), Value::Null, Value::from("a")]);
        assert_eq!(value.to_string(), "1,,a");
        assert_eq!(Value::Object(Object::new()).to_string(), "[object Object]");
        assert_eq!(Value::from(0.1 + 0.2).to_string(), "0.30000000000000004");
    }

    #[test]
    fn debug_inspects_nested_values() {
        let value = Value::from(serde_json::json!({"a": [1, "x"], "b c": null}));
        assert_eq!(format!("{value:?}"), r#"{ a: [1, "x"], "b c": null }"#);
    }

    #[test]
    fn json_round_trip_keeps_integers() {
        let json = serde_json::json!({"n": 3, "f": 1.5, "list": [true, null]});
        assert_eq!(Value::from(json.clone()).to_json(), json);
    }

    #[test]
    fn joining_cyclic_arrays_terminates() {
        let array = Array::new(vec![Value::from(1)]);
        array.push(Value::Array(array.clone()));
        assert_eq!(Value::Array(array.clone()).to_string(), "1,");

        let outer = Array::new(vec![Value::from("a")]);
        let inner = Array::new(vec![Value::Array(outer.clone()), Value::from("b")]);
        outer.push(Value::Array(inner));
        assert_eq!(outer.join("-"), "a-,b");
    }

    #[test]
    fn json_conversion_cuts_cycles() {
        let object = Object::from_iter([("n", 1)]);
        object.set("me", object.clone());
        let list = Array::new(vec![Value::Object(object.clone())]);
        object.set("list", list);
        assert_eq!(
            Value::Object(object).to_json(),
            serde_json::json!({"n": 1, "me": null, "list": [null]})
        );
    }

    #[test]
    fn joining_deeply_nested_arrays_is_bounded() {
        let mut value = Value::from(1);
        for _ in 0..1_000 {
            value = Value::from(vec![value]);
        }
        assert_eq!(value.to_string(), "");
        let shallow = Value::from(vec![Value::from(vec![Value::from(1)])]);
        assert_eq!(shallow.to_string(), "1");
    }
}
