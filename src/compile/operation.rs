use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ExprKind};
use crate::compile::Compiler;
use crate::eval::{EvalError, Evaluator, Step, eval_all};
use crate::ops;
use crate::value::Value;

pub(super) fn binary(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::BinaryOperation { operator, lhs, rhs } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let lhs = compiler.compile(lhs)?;
    let rhs = compiler.compile(rhs)?;

    if matches!(operator, BinaryOp::And | BinaryOp::Or) {
        return Ok(logical(*operator, lhs, rhs));
    }

    let operator = *operator;
    let inherited = !compiler.options().no_proto_access;
    let is_const = lhs.is_const() && rhs.is_const();
    let is_async = lhs.is_async() || rhs.is_async();
    let operands = [lhs, rhs];

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        eval_all(&operands, context, stack).map(move |values| {
            let [a, b] = values.as_slice() else {
                return Err(EvalError::UnknownExpression(ExprKind::BinaryOperation));
            };
            Ok(match operator {
                BinaryOp::In => Value::from(ops::contains(b, a, inherited)),
                operator => ops::binary(operator, a, b),
            })
        })
    })
    .fold())
}

/// `&&` and `||`: the right operand only runs when the left one does not
/// decide the result. A constant left operand is decided at compile time.
fn logical(operator: BinaryOp, lhs: Evaluator, rhs: Evaluator) -> Evaluator {
    let decides = move |value: &Value| match operator {
        BinaryOp::And => !ops::truthy(value),
        _ => ops::truthy(value),
    };

    match lhs.folded() {
        Some(Ok(value)) if decides(&value) => return lhs,
        Some(Ok(_)) => return rhs,
        Some(Err(error)) => return Evaluator::failing(error),
        None => {}
    }

    let is_async = lhs.is_async() || rhs.is_async();
    let rhs = Rc::new(rhs);
    Evaluator::with_flags(false, is_async, move |context, stack| {
        let rhs = Rc::clone(&rhs);
        let (context, stack) = (context.clone(), stack.clone());
        lhs.eval(&context, &stack).then(move |value| {
            if decides(&value) {
                Step::ok(value)
            } else {
                rhs.eval(&context, &stack)
            }
        })
    })
}

pub(super) fn prefix(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::PrefixOperation { operator, operand } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let operator = *operator;
    let operand = compiler.compile(operand)?;
    let (is_const, is_async) = (operand.is_const(), operand.is_async());

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        operand
            .eval(context, stack)
            .map(move |value| Ok(ops::unary(operator, &value)))
    })
    .fold())
}

/// Compiles to the same push/update/pop sequence the parser emits for `x++`.
pub(super) fn postfix(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::PostfixOperation { operator, operand } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    compiler.compile(&Expr::postfix_update(*operator, (**operand).clone()))
}
