use std::fmt::{self, Display};

use crate::lex::TokenKind;
use crate::ops::number_to_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Shl,
    Shr,
    UShr,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_token(kind: TokenKind) -> Option<BinaryOp> {
        Some(match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            TokenKind::StarStar => BinaryOp::Pow,
            TokenKind::LessLess => BinaryOp::Shl,
            TokenKind::GreaterGreater => BinaryOp::Shr,
            TokenKind::GreaterGreaterGreater => BinaryOp::UShr,
            TokenKind::Less => BinaryOp::Lt,
            TokenKind::LessEqual => BinaryOp::Le,
            TokenKind::Greater => BinaryOp::Gt,
            TokenKind::GreaterEqual => BinaryOp::Ge,
            TokenKind::In => BinaryOp::In,
            TokenKind::EqualEqual => BinaryOp::Eq,
            TokenKind::BangEqual => BinaryOp::Ne,
            TokenKind::EqualEqualEqual => BinaryOp::StrictEq,
            TokenKind::BangEqualEqual => BinaryOp::StrictNe,
            TokenKind::Amp => BinaryOp::BitAnd,
            TokenKind::Caret => BinaryOp::BitXor,
            TokenKind::Pipe => BinaryOp::BitOr,
            TokenKind::AmpAmp => BinaryOp::And,
            TokenKind::PipePipe => BinaryOp::Or,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    BitNot,
    Plus,
    Minus,
}

impl UnaryOp {
    pub fn from_token(kind: TokenKind) -> Option<UnaryOp> {
        Some(match kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Minus,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

impl UpdateOp {
    pub fn binary(self) -> BinaryOp {
        match self {
            UpdateOp::Increment => BinaryOp::Add,
            UpdateOp::Decrement => BinaryOp::Sub,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UpdateOp::Increment => "++",
            UpdateOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: Expr,
    pub value: Expr,
}

/// Expression tree handed from the parser to the compiler.
///
/// `Group` and `Spread` only exist while parsing; a finished parse never
/// contains them and the compiler rejects them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
    Identifier(String),
    Assignment {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    BinaryOperation {
        operator: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    PrefixOperation {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
    PostfixOperation {
        operator: UpdateOp,
        operand: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Sequence(Vec<Expr>),
    ArrayLiteral(Vec<Expr>),
    ObjectLiteral(Vec<Property>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MemberAccess {
        object: Box<Expr>,
        name: String,
    },
    ComputedMemberAccess {
        object: Box<Expr>,
        property: Box<Expr>,
    },
    Await(Box<Expr>),
    Lambda {
        params: Vec<Param>,
        rest: Option<String>,
        body: Box<Expr>,
    },
    StackPush(Box<Expr>),
    StackPop,
    /// Peeks the value `n` places from the top, 1 being the top.
    StackRef(usize),
    Group(Box<Expr>),
    Spread(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Number,
    String,
    Boolean,
    Null,
    Undefined,
    Identifier,
    Assignment,
    BinaryOperation,
    PrefixOperation,
    PostfixOperation,
    Conditional,
    Sequence,
    ArrayLiteral,
    ObjectLiteral,
    Call,
    MemberAccess,
    ComputedMemberAccess,
    Await,
    Lambda,
    StackPush,
    StackPop,
    StackRef,
    Group,
    Spread,
}

impl Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Expr {
    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::Number(_) => ExprKind::Number,
            Expr::String(_) => ExprKind::String,
            Expr::Boolean(_) => ExprKind::Boolean,
            Expr::Null => ExprKind::Null,
            Expr::Undefined => ExprKind::Undefined,
            Expr::Identifier(_) => ExprKind::Identifier,
            Expr::Assignment { .. } => ExprKind::Assignment,
            Expr::BinaryOperation { .. } => ExprKind::BinaryOperation,
            Expr::PrefixOperation { .. } => ExprKind::PrefixOperation,
            Expr::PostfixOperation { .. } => ExprKind::PostfixOperation,
            Expr::Conditional { .. } => ExprKind::Conditional,
            Expr::Sequence(_) => ExprKind::Sequence,
            Expr::ArrayLiteral(_) => ExprKind::ArrayLiteral,
            Expr::ObjectLiteral(_) => ExprKind::ObjectLiteral,
            Expr::Call { .. } => ExprKind::Call,
            Expr::MemberAccess { .. } => ExprKind::MemberAccess,
            Expr::ComputedMemberAccess { .. } => ExprKind::ComputedMemberAccess,
            Expr::Await(_) => ExprKind::Await,
            Expr::Lambda { .. } => ExprKind::Lambda,
            Expr::StackPush(_) => ExprKind::StackPush,
            Expr::StackPop => ExprKind::StackPop,
            Expr::StackRef(_) => ExprKind::StackRef,
            Expr::Group(_) => ExprKind::Group,
            Expr::Spread(_) => ExprKind::Spread,
        }
    }

    /// Whether the node may stand on the left of `=` or be incremented.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Identifier(_) | Expr::MemberAccess { .. } | Expr::ComputedMemberAccess { .. }
        )
    }

    pub fn binary(operator: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::BinaryOperation {
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assignment {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn conditional(test: Expr, consequent: Expr, alternate: Expr) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        }
    }

    pub fn push(value: Expr) -> Expr {
        Expr::StackPush(Box::new(value))
    }

    fn top_is_present() -> Expr {
        Expr::binary(BinaryOp::Ne, Expr::StackRef(1), Expr::Null)
    }

    /// `lhs ?? rhs` as `(#push lhs, #ref1 != null ? #pop : (#pop, rhs))`.
    pub fn coalesce(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Sequence(vec![
            Expr::push(lhs),
            Expr::conditional(
                Expr::top_is_present(),
                Expr::StackPop,
                Expr::Sequence(vec![Expr::StackPop, rhs]),
            ),
        ])
    }

    /// Optional chaining. `access` reads its receiver with `#pop`, so `object`
    /// is evaluated once and the chain yields it unchanged when it is nullish.
    pub fn optional(object: Expr, access: Expr) -> Expr {
        Expr::Sequence(vec![
            Expr::push(object),
            Expr::conditional(Expr::top_is_present(), access, Expr::StackPop),
        ])
    }

    /// `target++` as `(#push +target, target = #ref1 + 1, #pop)`.
    pub fn postfix_update(operator: UpdateOp, target: Expr) -> Expr {
        Expr::Sequence(vec![
            Expr::push(Expr::PrefixOperation {
                operator: UnaryOp::Plus,
                operand: Box::new(target.clone()),
            }),
            Expr::assign(
                target,
                Expr::binary(operator.binary(), Expr::StackRef(1), Expr::Number(1.0)),
            ),
            Expr::StackPop,
        ])
    }

    /// `++target` as `target = +target + 1`.
    pub fn prefix_update(operator: UpdateOp, target: Expr) -> Expr {
        let current = Expr::PrefixOperation {
            operator: UnaryOp::Plus,
            operand: Box::new(target.clone()),
        };
        Expr::assign(
            target,
            Expr::binary(operator.binary(), current, Expr::Number(1.0)),
        )
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Number(_)
            | Expr::String(_)
            | Expr::Boolean(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::Identifier(_)
            | Expr::StackPop
            | Expr::StackRef(_) => Vec::new(),
            Expr::Assignment { target, value } => vec![&**target, &**value],
            Expr::BinaryOperation { lhs, rhs, .. } => vec![&**lhs, &**rhs],
            Expr::PrefixOperation { operand, .. } | Expr::PostfixOperation { operand, .. } => {
                vec![&**operand]
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => vec![&**test, &**consequent, &**alternate],
            Expr::Sequence(items) | Expr::ArrayLiteral(items) => items.iter().collect(),
            Expr::ObjectLiteral(properties) => properties
                .iter()
                .flat_map(|property| [&property.key, &property.value])
                .collect(),
            Expr::Call { callee, args } => std::iter::once(&**callee).chain(args).collect(),
            Expr::MemberAccess { object, .. } => vec![&**object],
            Expr::ComputedMemberAccess { object, property } => vec![&**object, &**property],
            Expr::Lambda { params, body, .. } => params
                .iter()
                .filter_map(|param| param.default.as_ref())
                .chain(std::iter::once(&**body))
                .collect(),
            Expr::Await(inner) | Expr::StackPush(inner) | Expr::Group(inner) | Expr::Spread(inner) => {
                vec![&**inner]
            }
        }
    }

    /// First transient node left in the tree, if any.
    pub fn find_transient(&self) -> Option<ExprKind> {
        match self {
            Expr::Group(_) | Expr::Spread(_) => Some(self.kind()),
            _ => self.children().into_iter().find_map(Expr::find_transient),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &str, items: &[Expr]) -> fmt::Result {
    write!(f, "({head}")?;
    for item in items {
        write!(f, " {item}")?;
    }
    write!(f, ")")
}

/// S-expression rendering, `(+ 1 (* 2 3))`.
impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&number_to_string(*n)),
            Expr::String(s) => write!(f, "{s:?}"),
            Expr::Boolean(b) => write!(f, "{b}"),
            Expr::Null => f.write_str("null"),
            Expr::Undefined => f.write_str("undefined"),
            Expr::Identifier(name) => f.write_str(name),
            Expr::Assignment { target, value } => write!(f, "(= {target} {value})"),
            Expr::BinaryOperation { operator, lhs, rhs } => {
                write!(f, "({} {lhs} {rhs})", operator.symbol())
            }
            Expr::PrefixOperation { operator, operand } => {
                write!(f, "({} {operand})", operator.symbol())
            }
            Expr::PostfixOperation { operator, operand } => {
                write!(f, "(post{} {operand})", operator.symbol())
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => write!(f, "(? {test} {consequent} {alternate})"),
            Expr::Sequence(items) => write_list(f, ",", items),
            Expr::ArrayLiteral(items) => write_list(f, "array", items),
            Expr::ObjectLiteral(properties) => {
                f.write_str("(object")?;
                for Property { key, value } in properties {
                    write!(f, " ({key} {value})")?;
                }
                f.write_str(")")
            }
            Expr::Call { callee, args } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
            Expr::MemberAccess { object, name } => write!(f, "(. {object} {name})"),
            Expr::ComputedMemberAccess { object, property } => {
                write!(f, "([] {object} {property})")
            }
            Expr::Await(inner) => write!(f, "(await {inner})"),
            Expr::Lambda { params, rest, body } => {
                f.write_str("(=> (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match &param.default {
                        Some(default) => write!(f, "{}={default}", param.name)?,
                        None => f.write_str(&param.name)?,
                    }
                }
                if let Some(rest) = rest {
                    if !params.is_empty() {
                        f.write_str(" ")?;
                    }
                    write!(f, "...{rest}")?;
                }
                write!(f, ") {body})")
            }
            Expr::StackPush(inner) => write!(f, "(#push {inner})"),
            Expr::StackPop => f.write_str("#pop"),
            Expr::StackRef(depth) => write!(f, "#ref{depth}"),
            Expr::Group(inner) => write!(f, "(group {inner})"),
            Expr::Spread(inner) => write!(f, "(... {inner})"),
        }
    }
}
