use std::rc::Rc;

use futures::FutureExt;
use futures::future::try_join_all;

use crate::ast::Expr;
use crate::compile::{Compiler, all_const, any_async};
use crate::eval::{EvalError, Evaluator, Stack, Step, eval_all};
use crate::ops;
use crate::value::{Array, Function, Object, Promise, Value};

pub(super) fn conditional(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Conditional {
        test,
        consequent,
        alternate,
    } = expr
    else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let test = compiler.compile(test)?;
    let consequent = compiler.compile(consequent)?;
    let alternate = compiler.compile(alternate)?;

    match test.folded() {
        Some(Ok(value)) if ops::truthy(&value) => return Ok(consequent),
        Some(Ok(_)) => return Ok(alternate),
        Some(Err(error)) => return Ok(Evaluator::failing(error)),
        None => {}
    }

    let is_async = test.is_async() || consequent.is_async() || alternate.is_async();
    let branches = Rc::new((consequent, alternate));
    Ok(Evaluator::with_flags(false, is_async, move |context, stack| {
        let branches = Rc::clone(&branches);
        let (context, stack) = (context.clone(), stack.clone());
        test.eval(&context, &stack).then(move |value| {
            let (consequent, alternate) = &*branches;
            if ops::truthy(&value) {
                consequent.eval(&context, &stack)
            } else {
                alternate.eval(&context, &stack)
            }
        })
    }))
}

/// Constant items before the last one are dropped unless evaluating them fails.
pub(super) fn sequence(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Sequence(items) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let mut items = compiler.compile_all(items)?;
    let Some(last) = items.pop() else {
        return Ok(Evaluator::constant(Value::Undefined));
    };
    items.retain(|item| !matches!(item.folded(), Some(Ok(_))));
    if items.is_empty() {
        return Ok(last);
    }
    items.push(last);

    let (is_const, is_async) = (all_const(&items), any_async(&items));
    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        eval_all(&items, context, stack).map(|mut values| Ok(values.pop().unwrap_or_default()))
    })
    .fold())
}

pub(super) fn stack_push(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::StackPush(value) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let value = compiler.compile(value)?;
    Ok(Evaluator::with_flags(false, value.is_async(), move |context, stack| {
        let stack = stack.clone();
        value.eval(context, &stack).map(move |value| {
            stack.push(value.clone());
            Ok(value)
        })
    }))
}

pub(super) fn stack_pop(_: &Compiler, _: &Expr) -> Result<Evaluator, EvalError> {
    Ok(Evaluator::new(|_, stack| Step::ok(stack.pop())))
}

pub(super) fn stack_ref(_: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::StackRef(depth) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let depth = *depth;
    Ok(Evaluator::new(move |_, stack| Step::ok(stack.peek(depth))))
}

/// The callee is checked before any argument runs. Constant callees with
/// constant arguments are invoked during compilation.
pub(super) fn call(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Call { callee, args } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let callee = compiler.compile(callee)?;
    let args: Rc<[Evaluator]> = compiler.compile_all(args)?.into();
    let is_const = callee.is_const() && all_const(&args);
    let is_async = callee.is_async() || any_async(&args);
    let options = compiler.shared_options();

    Ok(Evaluator::with_flags(is_const, is_async, move |context, stack| {
        let (args, options) = (Rc::clone(&args), Rc::clone(&options));
        let (context, stack) = (context.clone(), stack.clone());
        callee.eval(&context, &stack).then(move |callee| {
            let Value::Function(function) = callee else {
                return Step::err(EvalError::CannotInvoke);
            };
            eval_all(&args, &context, &stack).map(move |values| {
                let values: Vec<Value> = values.into_iter().map(|v| options.marshal(v)).collect();
                function.call(&values)
            })
        })
    })
    .fold())
}

/// Promises are awaited, arrays settle all their elements, anything else is
/// passed through.
pub(super) fn await_expression(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Await(value) = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let value = compiler.compile(value)?;
    Ok(Evaluator::with_flags(false, true, move |context, stack| {
        value.eval(context, stack).then(|value| match value {
            Value::Promise(promise) => Step::Suspended(promise.settle().boxed_local()),
            Value::Array(array) => settle_all(array),
            other => Step::ok(other),
        })
    }))
}

fn settle_all(array: Array) -> Step {
    let items = array.items();
    if !items.iter().any(|item| matches!(item, Value::Promise(_))) {
        return Step::ok(Value::Array(Array::new(items)));
    }
    let pending = items.into_iter().map(|item| async move {
        match item {
            Value::Promise(promise) => promise.settle().await,
            other => Ok(other),
        }
    });
    Step::Suspended(
        try_join_all(pending)
            .map(|settled| settled.map(|values| Value::Array(Array::new(values))))
            .boxed_local(),
    )
}

struct Parameter {
    name: Rc<str>,
    default: Option<Evaluator>,
}

/// Lambdas close over a snapshot of the context taken when the lambda value
/// is created. Each call starts from a fresh copy of that snapshot and a
/// fresh stack.
pub(super) fn lambda(compiler: &Compiler, expr: &Expr) -> Result<Evaluator, EvalError> {
    let Expr::Lambda { params, rest, body } = expr else {
        return Err(EvalError::UnknownExpression(expr.kind()));
    };
    let params: Rc<[Parameter]> = params
        .iter()
        .map(|param| {
            Ok(Parameter {
                name: param.name.as_str().into(),
                default: param
                    .default
                    .as_ref()
                    .map(|default| compiler.compile(default))
                    .transpose()?,
            })
        })
        .collect::<Result<Vec<_>, EvalError>>()?
        .into();
    let rest: Option<Rc<str>> = rest.as_deref().map(Rc::from);
    let body = compiler.compile(body)?;

    Ok(Evaluator::new(move |context, _| {
        let closure = context.snapshot();
        let (params, rest, body) = (Rc::clone(&params), rest.clone(), body.clone());
        let function = Function::new("", move |_, args| {
            let scope = closure.snapshot();
            let stack = Stack::new();
            if let Some(rest) = &rest {
                let collected = args.get(params.len()..).unwrap_or_default().to_vec();
                scope.set(&**rest, Value::Array(Array::new(collected)));
            }
            let args: Rc<[Value]> = args.into();
            let body = body.clone();
            let invocation = bind_parameters(Rc::clone(&params), args, scope.clone(), stack.clone(), 0)
                .then(move |()| body.eval(&scope, &stack));
            match invocation {
                Step::Ready(result) => result,
                Step::Suspended(pending) => Ok(Value::Promise(Promise::new(pending))),
            }
        });
        Step::ok(Value::Function(function))
    }))
}

/// Binds parameters from `from` on. Defaults run in the invocation scope, so
/// they see the parameters bound before them.
fn bind_parameters(
    params: Rc<[Parameter]>,
    args: Rc<[Value]>,
    scope: Object,
    stack: Stack,
    from: usize,
) -> Step<()> {
    for index in from..params.len() {
        let name = Rc::clone(&params[index].name);
        let default = params[index].default.clone();
        let value = match (args.get(index).cloned(), default) {
            (Some(arg), _) => arg,
            (None, None) => Value::Undefined,
            (None, Some(default)) => match default.eval(&scope, &stack) {
                Step::Ready(Ok(value)) => value,
                Step::Ready(Err(error)) => return Step::err(error),
                Step::Suspended(pending) => {
                    return Step::Suspended(
                        async move {
                            scope.set(&*name, pending.await?);
                            bind_parameters(params, args, scope, stack, index + 1).await
                        }
                        .boxed_local(),
                    );
                }
            },
        };
        scope.set(&*name, value);
    }
    Step::ok(())
}
