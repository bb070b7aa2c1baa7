use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use miette::Diagnostic;
use thiserror::Error;

use crate::ast::ExprKind;
use crate::compile::CompilerOptions;
use crate::value::{Object, Promise, Value};

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unknown expression type {0}")]
    #[diagnostic(code(eval::unknown_expression))]
    UnknownExpression(ExprKind),

    #[error("{name} is not defined")]
    #[diagnostic(code(eval::undefined_identifier))]
    UndefinedIdentifier { name: String },

    #[error("Cannot access property {}of {value} value", property_prefix(.name))]
    #[diagnostic(code(eval::cannot_access_property))]
    CannotAccessProperty {
        value: &'static str,
        name: Option<String>,
    },

    #[error("Cannot access __proto__ member")]
    #[diagnostic(code(eval::proto_access))]
    CannotAccessProto,

    #[error("Cannot invoke non-function values")]
    #[diagnostic(code(eval::cannot_invoke))]
    CannotInvoke,

    #[error("Cannot mutate context")]
    #[diagnostic(code(eval::immutable_context), help("the context was marked immutable"))]
    ImmutableContext,

    #[error("Cannot assign to read only property '{0}'")]
    ReadOnly(String),

    #[error("{0}")]
    Type(String),

    #[error("Maximum call stack size exceeded")]
    #[diagnostic(code(eval::stack_overflow))]
    StackOverflow,

    /// Raised by host functions.
    #[error("{0}")]
    Thrown(String),
}

fn property_prefix(name: &Option<String>) -> String {
    name.as_ref().map(|name| format!("{name} ")).unwrap_or_default()
}

impl EvalError {
    pub fn cannot_access(value: &Value, name: Option<&str>) -> Self {
        EvalError::CannotAccessProperty {
            value: value.type_name(),
            name: name.map(str::to_string),
        }
    }
}

pub type EvalResult<T = Value> = Result<T, EvalError>;

/// The outcome of running an evaluator: an immediate result, or a task that
/// has to be awaited because an `await` was reached.
pub enum Step<T = Value> {
    Ready(EvalResult<T>),
    Suspended(LocalBoxFuture<'static, EvalResult<T>>),
}

impl<T: 'static> Step<T> {
    pub fn ok(value: T) -> Self {
        Step::Ready(Ok(value))
    }

    pub fn err(error: EvalError) -> Self {
        Step::Ready(Err(error))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Step::Ready(_))
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> EvalResult<U> + 'static) -> Step<U> {
        match self {
            Step::Ready(result) => Step::Ready(result.and_then(f)),
            Step::Suspended(pending) => Step::Suspended(async move { f(pending.await?) }.boxed_local()),
        }
    }

    /// Runs `f` on the value, inline when it is already available.
    pub fn then<U: 'static>(self, f: impl FnOnce(T) -> Step<U> + 'static) -> Step<U> {
        match self {
            Step::Ready(Ok(value)) => f(value),
            Step::Ready(Err(error)) => Step::Ready(Err(error)),
            Step::Suspended(pending) => {
                Step::Suspended(async move { f(pending.await?).await }.boxed_local())
            }
        }
    }
}

impl<T: 'static> IntoFuture for Step<T> {
    type Output = EvalResult<T>;
    type IntoFuture = LocalBoxFuture<'static, EvalResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Step::Ready(result) => future::ready(result).boxed_local(),
            Step::Suspended(pending) => pending,
        }
    }
}

impl<T> From<EvalResult<T>> for Step<T> {
    fn from(result: EvalResult<T>) -> Self {
        Step::Ready(result)
    }
}

/// Scratch values used by desugared expressions. A fresh stack is created for
/// every top-level evaluation and every lambda invocation.
#[derive(Clone, Default)]
pub struct Stack(Rc<RefCell<Vec<Value>>>);

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    /// Removes the top value; `undefined` when empty.
    pub fn pop(&self) -> Value {
        self.0.borrow_mut().pop().unwrap_or_default()
    }

    /// The value `depth` slots from the top (1 is the top); `undefined` when out of range.
    pub fn peek(&self, depth: usize) -> Value {
        let values = self.0.borrow();
        depth
            .checked_sub(1)
            .and_then(|offset| values.len().checked_sub(offset + 1))
            .and_then(|index| values.get(index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type Run = dyn Fn(&Object, &Stack) -> Step;

/// How many evaluators may run inside one another on a thread.
pub const MAX_EVAL_DEPTH: usize = 256;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A compiled expression together with what the compiler knows about it.
#[derive(Clone)]
pub struct Evaluator {
    run: Rc<Run>,
    is_const: bool,
    is_async: bool,
}

impl Evaluator {
    /// A synchronous evaluator that depends on the context.
    pub fn new(run: impl Fn(&Object, &Stack) -> Step + 'static) -> Self {
        Evaluator {
            run: Rc::new(run),
            is_const: false,
            is_async: false,
        }
    }

    pub fn with_flags(
        is_const: bool,
        is_async: bool,
        run: impl Fn(&Object, &Stack) -> Step + 'static,
    ) -> Self {
        Evaluator {
            run: Rc::new(run),
            is_const,
            is_async,
        }
    }

    pub fn constant(value: Value) -> Self {
        Self::with_flags(true, false, move |_, _| Step::ok(value.clone()))
    }

    /// A constant that raises `error` whenever it is evaluated.
    pub fn failing(error: EvalError) -> Self {
        Self::with_flags(true, false, move |_, _| Step::err(error.clone()))
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Runs the evaluator. Evaluators nested deeper than [`MAX_EVAL_DEPTH`]
    /// fail instead of running.
    pub fn eval(&self, context: &Object, stack: &Stack) -> Step {
        let depth = EVAL_DEPTH.get();
        if depth >= MAX_EVAL_DEPTH {
            return Step::err(EvalError::StackOverflow);
        }
        EVAL_DEPTH.set(depth + 1);
        let step = (self.run)(context, stack);
        EVAL_DEPTH.set(depth);
        step
    }

    /// The result of a constant, synchronous evaluator.
    pub fn folded(&self) -> Option<EvalResult> {
        if !self.is_const || self.is_async {
            return None;
        }
        match self.eval(&Object::new(), &Stack::new()) {
            Step::Ready(result) => Some(result),
            Step::Suspended(_) => None,
        }
    }

    /// Replaces a constant evaluator by its precomputed result. The result is
    /// shared by every run.
    pub fn fold(self) -> Evaluator {
        match self.folded() {
            Some(Ok(value)) => Self::constant(value),
            Some(Err(error)) => Self::failing(error),
            None => self,
        }
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("is_const", &self.is_const)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

/// Evaluates `evaluators` left to right. Synchronous results are collected
/// inline; from the first suspension on, the remaining evaluators run as
/// continuations in the same order.
pub fn eval_all(evaluators: &[Evaluator], context: &Object, stack: &Stack) -> Step<Vec<Value>> {
    let mut values = Vec::with_capacity(evaluators.len());
    for (i, evaluator) in evaluators.iter().enumerate() {
        match evaluator.eval(context, stack) {
            Step::Ready(Ok(value)) => values.push(value),
            Step::Ready(Err(error)) => return Step::err(error),
            Step::Suspended(pending) => {
                let rest = evaluators[i + 1..].to_vec();
                let context = context.clone();
                let stack = stack.clone();
                return Step::Suspended(
                    async move {
                        values.push(pending.await?);
                        for evaluator in rest {
                            values.push(evaluator.eval(&context, &stack).await?);
                        }
                        Ok(values)
                    }
                    .boxed_local(),
                );
            }
        }
    }
    Step::ok(values)
}

/// A compiled expression ready to run against host contexts.
#[derive(Clone, Debug)]
pub struct Program {
    evaluator: Evaluator,
    options: Rc<CompilerOptions>,
}

impl Program {
    pub fn new(evaluator: Evaluator, options: Rc<CompilerOptions>) -> Self {
        Program { evaluator, options }
    }

    pub fn is_const(&self) -> bool {
        self.evaluator.is_const()
    }

    pub fn is_async(&self) -> bool {
        self.evaluator.is_async()
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn run(&self, context: &Object) -> Step {
        let options = Rc::clone(&self.options);
        self.evaluator
            .eval(context, &Stack::new())
            .map(move |value| Ok(options.marshal(value)))
    }

    /// Runs the program; an asynchronous program yields a promise.
    pub fn call(&self, context: &Object) -> EvalResult {
        match self.run(context) {
            Step::Ready(result) => result,
            Step::Suspended(pending) => Ok(Value::Promise(Promise::new(pending))),
        }
    }

    /// Runs the program to completion, settling a promise result.
    pub async fn call_async(&self, context: &Object) -> EvalResult {
        match self.run(context).await? {
            Value::Promise(promise) => promise.settle().await,
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use futures::executor::block_on;

    use super::*;

    async fn yield_once() {
        let mut yielded = false;
        future::poll_fn(|cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    fn delayed(value: Value) -> Evaluator {
        Evaluator::with_flags(false, true, move |_, _| {
            let value = value.clone();
            Step::Suspended(
                async move {
                    yield_once().await;
                    Ok(value)
                }
                .boxed_local(),
            )
        })
    }

    #[test]
    fn stack_peeks_from_the_top() {
        let stack = Stack::new();
        stack.push(Value::from(1));
        stack.push(Value::from(2));
        assert_eq!(stack.peek(1), Value::from(2));
        assert_eq!(stack.peek(2), Value::from(1));
        assert_eq!(stack.peek(3), Value::Undefined);
        assert_eq!(stack.peek(0), Value::Undefined);
        assert_eq!(stack.pop(), Value::from(2));
        assert_eq!(stack.pop(), Value::from(1));
        assert_eq!(stack.pop(), Value::Undefined);
    }

    #[test]
    fn synchronous_evaluators_stay_ready() {
        let items = [Evaluator::constant(Value::from(1)), Evaluator::constant(Value::from(2))];
        let step = eval_all(&items, &Object::new(), &Stack::new());
        assert!(step.is_ready());
        assert_eq!(block_on(step.into_future()).unwrap(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn continuations_keep_evaluation_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let logged = |name: &'static str| {
            let log = Rc::clone(&log);
            Evaluator::new(move |_, _| {
                log.borrow_mut().push(name);
                Step::ok(Value::from(name))
            })
        };
        let items = [logged("a"), delayed(Value::from("b")), logged("c")];
        let step = eval_all(&items, &Object::new(), &Stack::new());
        assert!(!step.is_ready());
        assert_eq!(*log.borrow(), vec!["a"]);
        let values = block_on(step.into_future()).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "c"]);
        assert_eq!(values, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn failures_stop_evaluation() {
        let reached = Rc::new(Cell::new(false));
        let flag = Rc::clone(&reached);
        let items = [
            Evaluator::failing(EvalError::CannotInvoke),
            Evaluator::new(move |_, _| {
                flag.set(true);
                Step::ok(Value::Null)
            }),
        ];
        let step = eval_all(&items, &Object::new(), &Stack::new());
        assert!(matches!(step, Step::Ready(Err(EvalError::CannotInvoke))));
        assert!(!reached.get());
    }

    #[test]
    fn folding_captures_errors() {
        let evaluator = Evaluator::with_flags(true, false, |_, _| {
            Step::err(EvalError::Type("boom".to_string()))
        })
        .fold();
        assert!(evaluator.is_const());
        assert_eq!(
            evaluator.folded(),
            Some(Err(EvalError::Type("boom".to_string())))
        );
    }

    #[test]
    fn folded_values_keep_their_identity() {
        let object = Object::new();
        let evaluator = Evaluator::with_flags(true, false, {
            let object = object.clone();
            move |_, _| Step::ok(Value::Object(object.clone()))
        })
        .fold();
        let Some(Ok(Value::Object(folded))) = evaluator.folded() else {
            panic!("expected a folded object");
        };
        assert!(folded.ptr_eq(&object));
    }

    #[test]
    fn nesting_beyond_the_limit_fails() {
        fn nested(depth: usize) -> Evaluator {
            let mut evaluator = Evaluator::constant(Value::from(1));
            for _ in 0..depth {
                let inner = evaluator;
                evaluator = Evaluator::new(move |context, stack| inner.eval(context, stack));
            }
            evaluator
        }
        let run = |evaluator: Evaluator| match evaluator.eval(&Object::new(), &Stack::new()) {
            Step::Ready(result) => result,
            Step::Suspended(_) => panic!("synchronous evaluator suspended"),
        };
        assert_eq!(run(nested(MAX_EVAL_DEPTH - 1)), Ok(Value::from(1)));
        assert_eq!(run(nested(MAX_EVAL_DEPTH)), Err(EvalError::StackOverflow));
        // the counter unwinds with the evaluation
        assert_eq!(run(nested(10)), Ok(Value::from(1)));
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            EvalError::cannot_access(&Value::Undefined, Some("bar")).to_string(),
            "Cannot access property bar of undefined value"
        );
        assert_eq!(
            EvalError::cannot_access(&Value::Null, None).to_string(),
            "Cannot access property of null value"
        );
        assert_eq!(
            EvalError::UnknownExpression(ExprKind::Group).to_string(),
            "Unknown expression type Group"
        );
    }

    #[test]
    fn asynchronous_programs_return_promises() {
        let program = Program::new(delayed(Value::from(3)), Rc::new(CompilerOptions::default()));
        let context = Object::new();
        let Ok(Value::Promise(promise)) = program.call(&context) else {
            panic!("expected a promise");
        };
        assert_eq!(block_on(promise.settle()).unwrap(), Value::from(3));
        assert_eq!(block_on(program.call_async(&context)).unwrap(), Value::from(3));
    }
}
