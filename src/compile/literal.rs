use crate::ast::Expr;
use crate::compile::{Compiler, all_const, any_async};
use crate::eval::{EvalError, Evaluator, eval_all};
use crate::value::{Array, Object, Value};

use super::access::property_key;

pub(super) fn number(_: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Evaluator::constant(Value::Number(*n))),
        _ => Err(EvalError::UnknownExpression(expr.kind())),
    }
}

pub(super) fn string(_: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    match expr {
        Expr::String(s) => Ok(Evaluator::constant(Value::from(s.as_str()))),
        _ => Err(EvalError::UnknownExpression(expr.kind())),
    }
}

pub(super) fn boolean(_: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    match expr {
        Expr::Boolean(b) => Ok(Evaluator::constant(Value::Boolean(*b))),
        _ => Err(EvalError::UnknownExpression(expr.kind())),
    }
}

pub(super) fn null(_: &Compiler, _: &Expr) -> Result<Evaluator, EvalError> {
    Ok(Evaluator::constant(Value::Null))
}

pub(super) fn undefined(_: &Compiler, _: &Expr) -> Result<Evaluator, EvalError> {
    Ok(Evaluator::constant(Value::Undefined))
}

/// Constant literals stay unfolded so every run builds a new container; their
/// elements are shared.
pub(super) fn array(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::ArrayLiteral(items) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let items = compiler.compile_all(items)?;
    let (is_const, is_async) = (all_const(&items), any_async(&items));

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        eval_all(&items, context, stack).map(|values| Ok(Value::Array(Array::new(values))))
    }))
}

/// Object literals are built on the configured object prototype. Keys are
/// evaluated before their values, entries left to right.
pub(super) fn object(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::ObjectLiteral(properties) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let entries = compiler.compile_all(
        properties
            .iter()
            .flat_map(|property| [&property.key, &property.value]),
    )?;
    let (is_const, is_async) = (all_const(&entries), any_async(&entries));
    let proto = compiler.options().object_prototype.clone();

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        let proto = proto.clone();
        eval_all(&entries, context, stack).map(move |values| {
            let object = Object::with_proto(proto);
            for pair in values.chunks_exact(2) {
                object.set(property_key(&pair[0])?, pair[1].clone());
            }
            Ok(Value::Object(object))
        })
    }))
}
