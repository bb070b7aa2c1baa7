//! Asynchronous evaluation: ordering of side effects around `await`, promise
//! settlement, and the transparency of constant folding.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Poll;

use futures::executor::block_on;
use futures::future::poll_fn;
use proptest::prelude::*;
use serde_json::json;

use sandbox_expr::{
    CompilerOptions, EvalError, Function, Object, Promise, Value, compile, evaluate,
    evaluate_async,
};

/// Completes on the second poll, waking itself in between.
fn yield_once() -> impl Future<Output = ()> {
    let mut yielded = false;
    poll_fn(move |cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
}

type Log = Rc<RefCell<Vec<String>>>;

/// A host function that logs its name and returns `value`, either directly
/// or as a promise settling after one yield.
fn host(log: &Log, name: &'static str, value: i32, delayed: bool) -> Function {
    let log = Rc::clone(log);
    Function::from_fn(name, move |_| {
        log.borrow_mut().push(name.to_string());
        if !delayed {
            return Ok(Value::from(value));
        }
        let log = Rc::clone(&log);
        Ok(Value::Promise(Promise::new(async move {
            yield_once().await;
            log.borrow_mut().push(format!("{name} settled"));
            Ok(Value::from(value))
        })))
    })
}

fn run(source: &str, ctx: &Object) -> Value {
    block_on(evaluate_async(source, ctx, CompilerOptions::default()))
        .unwrap_or_else(|e| panic!("{source:?} failed: {e}"))
}

// ---- Ordering ----------------------------------------------------------------

#[test]
fn test_array_elements_run_in_order_across_awaits() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("a", host(&log, "a", 1, true));
    ctx.set("b", host(&log, "b", 2, false));
    ctx.set("c", host(&log, "c", 3, true));

    let program = compile("[await a(), b(), await c()]", CompilerOptions::default()).unwrap();
    assert!(program.is_async());
    let value = block_on(program.call_async(&ctx)).unwrap();

    assert_eq!(value.to_json(), json!([1, 2, 3]));
    assert_eq!(
        *log.borrow(),
        vec!["a", "a settled", "b", "c", "c settled"]
    );
}

#[test]
fn test_arguments_after_await_wait_for_it() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 1, true));
    ctx.set("fast", host(&log, "fast", 2, false));
    ctx.set("pair", Function::from_fn("pair", |args| Ok(Value::from(args.to_vec()))));

    let value = run("pair(await slow(), fast())", &ctx);
    assert_eq!(value.to_json(), json!([1, 2]));
    assert_eq!(*log.borrow(), vec!["slow", "slow settled", "fast"]);
}

#[test]
fn test_stack_survives_suspension() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 5, true));
    assert_eq!(run("(await slow()) ?? 1", &ctx), Value::from(5));
    assert_eq!(run("null ?? await slow()", &ctx), Value::from(5));
    ctx.set("n", 1);
    assert_eq!(run("n++ + await slow()", &ctx), Value::from(6));
    assert_eq!(ctx.get_own("n"), Some(Value::from(2)));
}

#[test]
fn test_logical_operators_wait_for_left_operand() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 0, true));
    ctx.set("fast", host(&log, "fast", 7, false));
    assert_eq!(run("await slow() || fast()", &ctx), Value::from(7));
    assert_eq!(*log.borrow(), vec!["slow", "slow settled", "fast"]);
}

// ---- Await semantics -----------------------------------------------------------

#[test]
fn test_await_of_plain_values_is_immediate() {
    let program = compile("await 5", CompilerOptions::default()).unwrap();
    assert!(program.is_async());
    assert!(!program.is_const());
    assert_eq!(program.call(&Object::new()).unwrap(), Value::from(5));
}

#[test]
fn test_await_of_array_settles_elements() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("a", host(&log, "a", 1, true));
    ctx.set("c", host(&log, "c", 3, true));
    assert_eq!(run("await [a(), 2, c()]", &ctx).to_json(), json!([1, 2, 3]));
    // both promises exist before either settles
    assert_eq!(log.borrow()[..2], ["a".to_string(), "c".to_string()]);
}

#[test]
fn test_await_of_array_without_promises() {
    let value = run("await [1, [2]]", &Object::new());
    assert_eq!(value.to_json(), json!([1, [2]]));
}

#[test]
fn test_rejections_propagate() {
    let ctx = Object::new();
    ctx.set(
        "fail",
        Function::from_fn("fail", |_| {
            Ok(Value::Promise(Promise::new(async {
                yield_once().await;
                Err(EvalError::Thrown("boom".to_string()))
            })))
        }),
    );
    let error = block_on(evaluate_async("1 + await fail()", &ctx, CompilerOptions::default()))
        .unwrap_err();
    assert_eq!(error.to_string(), "boom");
}

#[test]
fn test_sync_evaluate_returns_pending_promise() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 4, true));
    let value = evaluate("await slow() * 2", &ctx, CompilerOptions::default()).unwrap();
    let promise = match value {
        Value::Promise(promise) => promise,
        other => panic!("expected a promise, got {other:?}"),
    };
    assert!(promise.peek().is_none());
    assert_eq!(block_on(promise.settle()).unwrap(), Value::from(8));
}

#[test]
fn test_async_lambda_returns_promise() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 4, true));
    ctx.set(
        "call",
        Function::from_fn("call", |args| match args {
            [Value::Function(f), rest @ ..] => f.call(rest),
            _ => Ok(Value::Undefined),
        }),
    );
    let value = run("call((x, y = await slow()) => x + y, 1)", &ctx);
    assert_eq!(value, Value::from(5));
    let value = run("call(x => [x, await slow()], 1)", &ctx);
    assert_eq!(value.to_json(), json!([1, 4]));
}

#[test]
fn test_shared_promises_settle_once() {
    let log = Log::default();
    let ctx = Object::new();
    ctx.set("slow", host(&log, "slow", 3, true));
    assert_eq!(run("(p = slow(), [await p, await p])", &ctx).to_json(), json!([3, 3]));
    assert_eq!(*log.borrow(), vec!["slow", "slow settled"]);
}

// ---- Folding transparency ------------------------------------------------------

/// Arithmetic over `a`, `b` and small integers, fully parenthesised.
fn arb_arithmetic() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        (0u8..10).prop_map(|n| n.to_string()),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        (
            inner.clone(),
            prop::sample::select(vec!["+", "-", "*", "/", "%", "**", "<", "==", "&&", "||"]),
            inner,
        )
            .prop_map(|(lhs, op, rhs)| format!("({lhs} {op} {rhs})"))
    })
}

proptest! {
    #[test]
    fn folding_matches_runtime_evaluation(source in arb_arithmetic()) {
        let folded = CompilerOptions {
            constants: Object::from_iter([("a", 2), ("b", 3)]),
            ..CompilerOptions::default()
        };
        let program = compile(&source, folded).unwrap();
        prop_assert!(program.is_const());
        let constant = program.call(&Object::new()).unwrap();

        let ctx = Object::from_iter([("a", 2), ("b", 3)]);
        let runtime = evaluate(&source, &ctx, CompilerOptions::default()).unwrap();

        let literal = source.replace('a', "2").replace('b', "3");
        let substituted = evaluate(&literal, &Object::new(), CompilerOptions::default()).unwrap();

        prop_assert_eq!(&constant, &runtime);
        prop_assert_eq!(&constant, &substituted);
    }
}
