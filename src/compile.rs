use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Expr, ExprKind};
use crate::eval::{EvalError, Evaluator, MAX_EVAL_DEPTH, Program};
use crate::system;
use crate::value::{Array, Object, Value};

mod access;
mod flow;
mod literal;
mod operation;

pub use access::{get_property, set_property};

/// Sandbox policy and environment for compiled programs.
#[derive(Clone, Debug)]
pub struct CompilerOptions {
    /// Reading a name that is absent from the context is an error.
    pub no_undefined_vars: bool,
    /// Assignment may only overwrite existing own properties of the context.
    pub no_new_vars: bool,
    /// Every assignment fails.
    pub immutable_context: bool,
    /// Lookups see own properties only; prototypes stay invisible.
    pub no_proto_access: bool,
    /// Prototype given to object literals.
    pub object_prototype: Option<Object>,
    /// Prototype consulted for array methods when prototype access is allowed.
    pub array_prototype: Object,
    /// Arguments and results get arrays stamped with `array_prototype`.
    pub enforce_marshalling: bool,
    /// Names resolved at compile time. Functions here may be called during
    /// compilation when all their arguments are constant.
    pub constants: Object,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            no_undefined_vars: false,
            no_new_vars: false,
            immutable_context: false,
            no_proto_access: true,
            object_prototype: None,
            array_prototype: system::array_prototype(),
            enforce_marshalling: false,
            constants: Object::new(),
        }
    }
}

impl CompilerOptions {
    /// Stamps arrays reachable through arrays with `array_prototype`. Values
    /// pass through unchanged unless marshalling is enforced.
    pub fn marshal(&self, value: Value) -> Value {
        if self.enforce_marshalling {
            self.stamp(&value);
        }
        value
    }

    fn stamp(&self, value: &Value) {
        let Value::Array(array) = value else {
            return;
        };
        if is_stamped(array, &self.array_prototype) {
            return;
        }
        array.set_proto(Some(self.array_prototype.clone()));
        for item in array.items() {
            self.stamp(&item);
        }
    }

    /// The prototype used for member lookups on `array`.
    pub fn array_proto_of(&self, array: &Array) -> Object {
        array
            .proto()
            .unwrap_or_else(|| self.array_prototype.clone())
    }
}

fn is_stamped(array: &Array, proto: &Object) -> bool {
    array.proto().is_some_and(|current| current.ptr_eq(proto))
}

pub type CompileFn = fn(&Compiler, &Expr) -> Result<Evaluator, EvalError>;

/// Turns expression trees into evaluators through a registry keyed by node
/// kind.
pub struct Compiler {
    compilers: HashMap<ExprKind, CompileFn>,
    options: Rc<CompilerOptions>,
    depth: Cell<usize>,
}

impl Compiler {
    /// A compiler for every node kind the parser produces.
    pub fn new(options: CompilerOptions) -> Self {
        let mut compiler = Self::empty(options);
        compiler
            .register(ExprKind::Number, literal::number)
            .register(ExprKind::String, literal::string)
            .register(ExprKind::Boolean, literal::boolean)
            .register(ExprKind::Null, literal::null)
            .register(ExprKind::Undefined, literal::undefined)
            .register(ExprKind::ArrayLiteral, literal::array)
            .register(ExprKind::ObjectLiteral, literal::object)
            .register(ExprKind::Identifier, access::identifier)
            .register(ExprKind::MemberAccess, access::member)
            .register(ExprKind::ComputedMemberAccess, access::computed_member)
            .register(ExprKind::Assignment, access::assignment)
            .register(ExprKind::BinaryOperation, operation::binary)
            .register(ExprKind::PrefixOperation, operation::prefix)
            .register(ExprKind::PostfixOperation, operation::postfix)
            .register(ExprKind::Conditional, flow::conditional)
            .register(ExprKind::Sequence, flow::sequence)
            .register(ExprKind::StackPush, flow::stack_push)
            .register(ExprKind::StackPop, flow::stack_pop)
            .register(ExprKind::StackRef, flow::stack_ref)
            .register(ExprKind::Call, flow::call)
            .register(ExprKind::Await, flow::await_expression)
            .register(ExprKind::Lambda, flow::lambda);
        compiler
    }

    /// A compiler that knows no node kinds yet.
    pub fn empty(options: CompilerOptions) -> Self {
        Compiler {
            compilers: HashMap::new(),
            options: Rc::new(options),
            depth: Cell::new(0),
        }
    }

    pub fn register(&mut self, kind: ExprKind, compile: CompileFn) -> &mut Self {
        self.compilers.insert(kind, compile);
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub(crate) fn shared_options(&self) -> Rc<CompilerOptions> {
        Rc::clone(&self.options)
    }

    /// Compiles `expr` and everything below it. Trees nested deeper than
    /// [`MAX_EVAL_DEPTH`] are rejected.
    pub fn compile(&self, expr: &Expr) -> Result<Evaluator, EvalError> {
        let kind = expr.kind();
        let Some(compile) = self.compilers.get(&kind) else {
            return Err(EvalError::UnknownExpression(kind));
        };
        let depth = self.depth.get();
        if depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::StackOverflow);
        }
        self.depth.set(depth + 1);
        let compiled = compile(self, expr);
        self.depth.set(depth);
        let evaluator = compiled?;
        trace!(
            %kind,
            is_const = evaluator.is_const(),
            is_async = evaluator.is_async(),
            "compiled"
        );
        Ok(evaluator)
    }

    pub fn compile_all<'a>(
        &self,
        exprs: impl IntoIterator<Item = &'a Expr>,
    ) -> Result<Vec<Evaluator>, EvalError> {
        exprs.into_iter().map(|expr| self.compile(expr)).collect()
    }

    pub fn program(&self, expr: &Expr) -> Result<Program, EvalError> {
        let evaluator = self.compile(expr)?;
        debug!(
            expression = %expr,
            is_const = evaluator.is_const(),
            is_async = evaluator.is_async(),
            "compiled program"
        );
        Ok(Program::new(evaluator, Rc::clone(&self.options)))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

/// Whether all of `evaluators` are constant.
fn all_const(evaluators: &[Evaluator]) -> bool {
    evaluators.iter().all(Evaluator::is_const)
}

fn any_async(evaluators: &[Evaluator]) -> bool {
    evaluators.iter().any(Evaluator::is_async)
}
