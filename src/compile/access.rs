use std::rc::Rc;

use crate::ast::Expr;
use crate::compile::{Compiler, CompilerOptions};
use crate::eval::{EvalError, Evaluator, Step};
use crate::ops;
use crate::value::Value;

const PROTO: &str = "__proto__";

/// Converts an evaluated key to a property name, refusing `__proto__`.
pub(crate) fn property_key(key: &Value) -> Result<String, EvalError> {
    let key = key.to_string();
    if key == PROTO {
        return Err(EvalError::CannotAccessProto);
    }
    Ok(key)
}

/// Canonical array indices only: `"1"` is an index, `"01"` and `"+1"` are not.
fn array_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

fn ensure_object(value: &Value, name: Option<&str>) -> Result<(), EvalError> {
    match value {
        Value::Array(_) | Value::Object(_) => Ok(()),
        other => Err(EvalError::cannot_access(other, name)),
    }
}

/// Reads `key` from an object or array under the sandbox policy. Missing
/// properties read as `undefined`; functions come back bound to `target`.
pub fn get_property(options: &CompilerOptions, target: &Value, key: &str) -> Value {
    if key == PROTO {
        return Value::Undefined;
    }
    let value = match target {
        Value::Object(object) if options.no_proto_access => object.get_own(key),
        Value::Object(object) => object.get(key),
        Value::Array(array) => match array_index(key) {
            Some(index) => array.get(index),
            None if key == "length" => Some(Value::from(array.len())),
            None if options.no_proto_access => None,
            None => options.array_proto_of(array).get(key),
        },
        _ => None,
    };
    value.unwrap_or_default().bind_receiver(target)
}

/// Writes `key` on an object or array. Arrays accept indices and `length`;
/// other keys are ignored.
pub fn set_property(target: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    if key == PROTO {
        return Err(EvalError::CannotAccessProto);
    }
    match target {
        Value::Object(object) => object.try_set(key, value),
        Value::Array(array) => match array_index(key) {
            Some(index) => array.set(index, value),
            None if key == "length" => {
                let len = ops::to_number(&value);
                if len < 0.0 || len.fract() != 0.0 || len > f64::from(u32::MAX) {
                    return Err(EvalError::Type("Invalid array length".to_string()));
                }
                array.set_len(len as usize)
            }
            None => Ok(()),
        },
        other => Err(EvalError::cannot_access(other, Some(key))),
    }
}

pub(super) fn identifier(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Identifier(name) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    if name == PROTO {
        return Ok(Evaluator::failing(EvalError::CannotAccessProto));
    }

    let options = compiler.options();
    if let Some(value) = options.constants.get_own(name) {
        let constants = Value::Object(options.constants.clone());
        return Ok(Evaluator::constant(value.bind_receiver(&constants)));
    }

    let name: Rc<str> = name.as_str().into();
    let own_only = options.no_proto_access;
    let strict = options.no_undefined_vars;
    Ok(Evaluator::new(move |context, _| {
        let found = if own_only {
            context.get_own(&name)
        } else {
            context.get(&name)
        };
        match found {
            Some(value) => Step::ok(value.bind_receiver(&Value::Object(context.clone()))),
            None if strict && !context.has(&name) => Step::err(EvalError::UndefinedIdentifier {
                name: name.to_string(),
            }),
            None => Step::ok(Value::Undefined),
        }
    }))
}

/// Whether reading from `target` can be done once at compile time. Arrays and
/// unfrozen objects may still change, including constants reached through
/// them.
fn fixed_target(target: &Evaluator) -> bool {
    match target.folded() {
        Some(Ok(Value::Array(_))) => false,
        Some(Ok(Value::Object(object))) => object.is_frozen(),
        Some(_) => true,
        None => false,
    }
}

pub(super) fn member(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::MemberAccess { object, name } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    if name == PROTO {
        return Ok(Evaluator::failing(EvalError::CannotAccessProto));
    }

    let target = compiler.compile(object)?;
    let options = compiler.shared_options();
    let name: Rc<str> = name.as_str().into();
    let (is_const, is_async) = (fixed_target(&target), target.is_async());

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        let options = Rc::clone(&options);
        let name = Rc::clone(&name);
        target.eval(context, stack).map(move |value| {
            ensure_object(&value, Some(&name))?;
            Ok(get_property(&options, &value, &name))
        })
    })
    .fold())
}

pub(super) fn computed_member(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::ComputedMemberAccess { object, property } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };

    let target = compiler.compile(object)?;
    let key = compiler.compile(property)?;
    let options = compiler.shared_options();
    let is_const = key.is_const() && fixed_target(&target);
    let is_async = target.is_async() || key.is_async();

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        let (options, key) = (Rc::clone(&options), key.clone());
        let (context, stack) = (context.clone(), stack.clone());
        target.eval(&context, &stack).then(move |value| {
            if let Err(error) = ensure_object(&value, None) {
                return Step::err(error);
            }
            key.eval(&context, &stack).map(move |key| {
                let key = property_key(&key)?;
                Ok(get_property(&options, &value, &key))
            })
        })
    })
    .fold())
}

/// Assignments to the context are never folded. Under an immutable context
/// every assignment compiles to an evaluator that fails.
pub(super) fn assignment(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Assignment { target, value } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    if compiler.options().immutable_context {
        return Ok(Evaluator::failing(EvalError::ImmutableContext));
    }

    match &**target {
        Expr::Identifier(name) => assign_variable(compiler, name, value),
        Expr::MemberAccess { object, name } => assign_member(compiler, object, name, value),
        Expr::ComputedMemberAccess { object, property } => {
            assign_computed(compiler, object, property, value)
        }
        other => Err(EvalError::UnknownExpression(other.kind())),
    }
}

fn assign_variable(compiler: &Compiler, name: &str, value: &Expr) -> Result<Evaluator, EvalError> {
    if name == PROTO {
        return Ok(Evaluator::failing(EvalError::CannotAccessProto));
    }

    let rhs = compiler.compile(value)?;
    let options = compiler.options();
    let no_new_vars = options.no_new_vars;
    // a constant value assigned to a constant's name replaces the constant
    if !no_new_vars && options.constants.has_own(name) {
        if let Some(folded) = rhs.folded() {
            let stored = folded.and_then(|value| {
                options.constants.try_set(name, value.clone())?;
                Ok(value)
            });
            return Ok(match stored {
                Ok(value) => Evaluator::constant(value),
                Err(error) => Evaluator::failing(error),
            });
        }
    }
    let name: Rc<str> = name.into();

    Ok(Evaluator::with_flags(false, rhs.is_async(), move |context, stack| {
        if no_new_vars && !context.has_own(&name) {
            return Step::err(EvalError::UndefinedIdentifier {
                name: name.to_string(),
            });
        }
        let (context, name) = (context.clone(), Rc::clone(&name));
        rhs.eval(&context, stack).map(move |value| {
            context.try_set(&name, value.clone())?;
            Ok(value)
        })
    }))
}

fn assign_member(
    compiler: &Compiler,
    object: &Expr,
    name: &str,
    value: &Expr,
) -> Result<Evaluator, EvalError> {
    if name == PROTO {
        return Ok(Evaluator::failing(EvalError::CannotAccessProto));
    }

    let target = compiler.compile(object)?;
    let rhs = compiler.compile(value)?;
    let is_async = target.is_async() || rhs.is_async();
    let name: Rc<str> = name.into();

    Ok(Evaluator::with_flags(false, is_async, move |context, stack| {
        let (rhs, name) = (rhs.clone(), Rc::clone(&name));
        let (context, stack) = (context.clone(), stack.clone());
        target.eval(&context, &stack).then(move |object| {
            if let Err(error) = ensure_object(&object, Some(&name)) {
                return Step::err(error);
            }
            rhs.eval(&context, &stack).map(move |value| {
                set_property(&object, &name, value.clone())?;
                Ok(value)
            })
        })
    }))
}

fn assign_computed(
    compiler: &Compiler,
    object: &Expr,
    property: &Expr,
    value: &Expr,
) -> Result<Evaluator, EvalError> {
    let target = compiler.compile(object)?;
    let key = compiler.compile(property)?;
    let rhs = compiler.compile(value)?;
    let is_async = target.is_async() || key.is_async() || rhs.is_async();

    Ok(Evaluator::with_flags(false, is_async, move |context, stack| {
        let (key, rhs) = (key.clone(), rhs.clone());
        let (context, stack) = (context.clone(), stack.clone());
        target.eval(&context, &stack).then(move |object| {
            if let Err(error) = ensure_object(&object, None) {
                return Step::err(error);
            }
            key.eval(&context, &stack).then(move |key| {
                let key = match property_key(&key) {
                    Ok(key) => key,
                    Err(error) => return Step::err(error),
                };
                rhs.eval(&context, &stack).map(move |value| {
                    set_property(&object, &key, value.clone())?;
                    Ok(value)
                })
            })
        })
    }))
}
