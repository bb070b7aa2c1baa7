use std::collections::HashMap;
use std::sync::LazyLock;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use tracing::trace;

use crate::ast::{Expr, ExprKind};
use crate::lex::{LexError, Lexer, Token, TokenKind};

mod grammar;

/// Binding powers; an infix rule only continues an expression whose minimum
/// precedence it exceeds.
/// How deeply parselets may nest, counting every operator that wraps an
/// already parsed operand.
pub const MAX_NESTING: usize = 128;

pub mod precedence {
    pub const LOWEST: u8 = 0;
    pub const SEQUENCE: u8 = 1;
    pub const ASSIGNMENT: u8 = 2;
    pub const CONDITIONAL: u8 = 3;
    pub const LOGICAL_OR: u8 = 4;
    pub const LOGICAL_AND: u8 = 5;
    pub const BITWISE_OR: u8 = 6;
    pub const BITWISE_XOR: u8 = 7;
    pub const BITWISE_AND: u8 = 8;
    pub const EQUALITY: u8 = 9;
    pub const RELATIONAL: u8 = 10;
    pub const SHIFT: u8 = 11;
    pub const ADDITIVE: u8 = 12;
    pub const MULTIPLICATIVE: u8 = 13;
    pub const POWER: u8 = 14;
    pub const PREFIX: u8 = 15;
    pub const POSTFIX: u8 = 16;
    pub const PRIMARY: u8 = 17;
}

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("Unexpected {found} at line {line}:{col}")]
    #[diagnostic(code(syntax::unexpected_token))]
    UnexpectedToken {
        found: String,
        line: usize,
        col: usize,
        #[label("unexpected here")]
        span: SourceSpan,
    },
    #[error("Expected {expected} but found {found} at line {line}:{col}")]
    #[diagnostic(code(syntax::expected_token))]
    ExpectedToken {
        expected: TokenKind,
        found: String,
        line: usize,
        col: usize,
        #[label("found this instead")]
        span: SourceSpan,
    },
    #[error("Invalid left-hand side in assignment")]
    #[diagnostic(
        code(syntax::invalid_assignment),
        help("only identifiers and member accesses can be assigned to")
    )]
    InvalidLeftHandSide {
        #[label("this operator")]
        span: SourceSpan,
    },
    #[error("Invalid argument list")]
    #[diagnostic(
        code(syntax::invalid_arguments),
        help("parameters are identifiers, optionally with `= default`, and at most one trailing `...rest`")
    )]
    InvalidArgumentList {
        #[label("in this parameter list")]
        span: SourceSpan,
    },
    #[error("{error}")]
    #[diagnostic(code(syntax::invalid_token))]
    InvalidToken {
        error: LexError,
        line: usize,
        col: usize,
        #[label("invalid token")]
        span: SourceSpan,
    },
    #[error("Maximum nesting depth exceeded at line {line}:{col}")]
    #[diagnostic(code(syntax::too_deep))]
    TooDeep {
        line: usize,
        col: usize,
        #[label("nested too deeply here")]
        span: SourceSpan,
    },
    #[error("Unexpected {0} expression")]
    #[diagnostic(code(syntax::transient_node))]
    TransientNode(ExprKind),
}

fn found(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ => format!("{:?}", token.lexeme),
    }
}

/// Hooks into a running parse.
///
/// `scope_enter`/`scope_leave` bracket every parselet with the token kinds of
/// the parselets currently running, innermost last. `node` sees each node as
/// soon as it is built and may return a replacement for it.
pub trait ParseObserver {
    fn scope_enter(&mut self, _kind: TokenKind, _scopes: &[TokenKind]) {}

    fn scope_leave(&mut self, _kind: TokenKind, _scopes: &[TokenKind]) {}

    fn node(&mut self, node: Expr) -> Expr {
        node
    }
}

impl<T: ParseObserver + ?Sized> ParseObserver for &mut T {
    fn scope_enter(&mut self, kind: TokenKind, scopes: &[TokenKind]) {
        (**self).scope_enter(kind, scopes)
    }

    fn scope_leave(&mut self, kind: TokenKind, scopes: &[TokenKind]) {
        (**self).scope_leave(kind, scopes)
    }

    fn node(&mut self, node: Expr) -> Expr {
        (**self).node(node)
    }
}

pub type PrefixParselet = for<'de> fn(&mut Parser<'de>, Token<'de>) -> Result<Expr, SyntaxError>;
pub type InfixParselet =
    for<'de> fn(&mut Parser<'de>, Expr, Token<'de>) -> Result<Expr, SyntaxError>;
/// Decides whether a rule applies and must leave the token stream where it
/// found it. Prefix guards run after their token was shifted, infix guards
/// while it is still the current token.
pub type Lookahead = for<'de> fn(&mut Parser<'de>) -> bool;

#[derive(Clone, Copy)]
pub struct PrefixRule {
    pub parselet: PrefixParselet,
    pub when: Option<Lookahead>,
}

#[derive(Clone, Copy)]
pub struct InfixRule {
    pub precedence: u8,
    pub parselet: InfixParselet,
    pub when: Option<Lookahead>,
}

/// Prefix and infix rules keyed by token kind. Candidates for the same kind
/// are tried in registration order.
#[derive(Clone, Default)]
pub struct Grammar {
    prefix: HashMap<TokenKind, Vec<PrefixRule>>,
    infix: HashMap<TokenKind, Vec<InfixRule>>,
}

static EXPRESSION: LazyLock<Grammar> = LazyLock::new(grammar::expression);

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// The expression grammar used by [`Parser::new`].
    pub fn expression() -> &'static Grammar {
        &EXPRESSION
    }

    pub fn prefix(&mut self, kind: TokenKind, parselet: PrefixParselet) -> &mut Self {
        self.prefix
            .entry(kind)
            .or_default()
            .push(PrefixRule { parselet, when: None });
        self
    }

    pub fn prefix_when(
        &mut self,
        kind: TokenKind,
        when: Lookahead,
        parselet: PrefixParselet,
    ) -> &mut Self {
        self.prefix.entry(kind).or_default().push(PrefixRule {
            parselet,
            when: Some(when),
        });
        self
    }

    pub fn infix(&mut self, kind: TokenKind, precedence: u8, parselet: InfixParselet) -> &mut Self {
        self.infix.entry(kind).or_default().push(InfixRule {
            precedence,
            parselet,
            when: None,
        });
        self
    }

    pub fn infix_when(
        &mut self,
        kind: TokenKind,
        precedence: u8,
        when: Lookahead,
        parselet: InfixParselet,
    ) -> &mut Self {
        self.infix.entry(kind).or_default().push(InfixRule {
            precedence,
            parselet,
            when: Some(when),
        });
        self
    }
}

pub struct Parser<'de> {
    whole: &'de str,
    lexer: Lexer<'de>,
    grammar: &'de Grammar,
    scopes: Vec<TokenKind>,
    depth: usize,
    observer: Option<Box<dyn ParseObserver + 'de>>,
}

/// Parses a complete expression with the default grammar.
pub fn parse(source: &str) -> Result<Expr, SyntaxError> {
    Parser::new(source).parse()
}

impl<'de> Parser<'de> {
    pub fn new(whole: &'de str) -> Self {
        Self::with_grammar(whole, Grammar::expression())
    }

    pub fn with_grammar(whole: &'de str, grammar: &'de Grammar) -> Self {
        Parser {
            whole,
            lexer: Lexer::new(whole).skipping(&[TokenKind::Whitespace, TokenKind::LineTerminator]),
            grammar,
            scopes: Vec::new(),
            depth: 0,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl ParseObserver + 'de) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn whole(&self) -> &'de str {
        self.whole
    }

    /// Parses one expression and requires the input to end after it.
    pub fn parse(mut self) -> Result<Expr, SyntaxError> {
        let expr = self.parse_within(precedence::LOWEST)?;
        let token = self.lexer.token();
        if token.kind != TokenKind::Eof {
            return Err(self.unexpected(token));
        }
        if let Some(kind) = expr.find_transient() {
            return Err(SyntaxError::TransientNode(kind));
        }
        Ok(expr)
    }

    /// Parses one expression and leaves whatever follows it unconsumed.
    pub fn parse_fragment(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_within(precedence::LOWEST)
    }

    pub fn parse_within(&mut self, min: u8) -> Result<Expr, SyntaxError> {
        let entry = self.depth;
        let parsed = self.parse_nested(min);
        self.depth = entry;
        parsed
    }

    fn parse_nested(&mut self, min: u8) -> Result<Expr, SyntaxError> {
        let grammar = self.grammar;

        let token = self.shift()?;
        self.descend(&token)?;
        let kind = token.kind;
        let mut rule = None;
        for candidate in grammar.prefix.get(&kind).into_iter().flatten() {
            if candidate.when.is_none_or(|when| when(self)) {
                rule = Some(candidate.parselet);
                break;
            }
        }
        let Some(parselet) = rule else {
            return Err(self.unexpected(&token));
        };
        let mut lhs = self.dispatch(kind, |parser| parselet(parser, token))?;
        // groups only delimit precedence
        if let Expr::Group(inner) = lhs {
            lhs = *inner;
        }

        loop {
            let kind = self.lexer.token().kind;
            let mut rule = None;
            for candidate in grammar.infix.get(&kind).into_iter().flatten() {
                if candidate.when.is_none_or(|when| when(self)) {
                    rule = Some(*candidate);
                    break;
                }
            }
            let Some(rule) = rule else { break };
            if rule.precedence <= min {
                break;
            }
            let token = self.shift()?;
            self.descend(&token)?;
            lhs = self.dispatch(kind, |parser| (rule.parselet)(parser, lhs, token))?;
        }

        Ok(lhs)
    }

    fn descend(&mut self, token: &Token<'_>) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::TooDeep {
                line: token.pos.line,
                col: token.pos.col,
                span: token.span(),
            });
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        kind: TokenKind,
        build: impl FnOnce(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        self.scopes.push(kind);
        if let Some(observer) = self.observer.as_mut() {
            observer.scope_enter(kind, &self.scopes);
        }
        let built = build(self);
        if let Some(observer) = self.observer.as_mut() {
            observer.scope_leave(kind, &self.scopes);
        }
        self.scopes.pop();

        let node = built?;
        trace!(kind = %node.kind(), "parsed node");
        Ok(match self.observer.as_mut() {
            Some(observer) => observer.node(node),
            None => node,
        })
    }

    pub fn scopes(&self) -> &[TokenKind] {
        &self.scopes
    }

    pub fn token(&self) -> &Token<'de> {
        self.lexer.token()
    }

    pub fn lookahead(&self) -> &Token<'de> {
        self.lexer.lookahead()
    }

    pub fn lexer_mut(&mut self) -> &mut Lexer<'de> {
        &mut self.lexer
    }

    pub fn at(&self, kind: TokenKind) -> bool {
        self.lexer.token().kind == kind
    }

    /// Consumes the current token, rejecting invalid ones.
    pub fn shift(&mut self) -> Result<Token<'de>, SyntaxError> {
        let token = self.lexer.shift();
        match token.kind {
            TokenKind::Invalid => Err(self.unexpected(&token)),
            _ => Ok(token),
        }
    }

    pub fn accept(&mut self, kind: TokenKind) -> Result<bool, SyntaxError> {
        if self.at(kind) {
            self.shift()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn expect(&mut self, expected: TokenKind) -> Result<Token<'de>, SyntaxError> {
        if self.at(expected) {
            return self.shift();
        }
        let token = self.lexer.token();
        if token.kind == TokenKind::Invalid {
            return Err(self.unexpected(token));
        }
        Err(self.expected(expected, token))
    }

    pub fn expected(&self, expected: TokenKind, token: &Token<'_>) -> SyntaxError {
        SyntaxError::ExpectedToken {
            expected,
            found: found(token),
            line: token.pos.line,
            col: token.pos.col,
            span: token.span(),
        }
    }

    pub fn unexpected(&self, token: &Token<'_>) -> SyntaxError {
        match token.error() {
            Some(error) => SyntaxError::InvalidToken {
                error: error.clone(),
                line: token.pos.line,
                col: token.pos.col,
                span: token.span(),
            },
            None => SyntaxError::UnexpectedToken {
                found: found(token),
                line: token.pos.line,
                col: token.pos.col,
                span: token.span(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sexpr(source: &str) -> String {
        parse(source).map(|expr| expr.to_string()).unwrap_or_else(|e| e.to_string())
    }

    #[test]
    fn precedence_climbing() {
        assert_eq!(sexpr("1 + 2 * 3"), "(+ 1 (* 2 3))");
        assert_eq!(sexpr("1 * 2 + 3"), "(+ (* 1 2) 3)");
        assert_eq!(sexpr("1 - 2 - 3"), "(- (- 1 2) 3)");
        assert_eq!(sexpr("2 ** 3 ** 2"), "(** 2 (** 3 2))");
    }

    #[test]
    fn groups_leave_no_trace() {
        assert_eq!(sexpr("(1 + 2) * 3"), "(* (+ 1 2) 3)");
        assert_eq!(sexpr("((a))"), "a");
    }

    #[test]
    fn trailing_input_is_rejected() {
        assert_eq!(sexpr("1 2"), "Unexpected \"2\" at line 1:3");
    }

    #[test]
    fn empty_input() {
        assert_eq!(sexpr(""), "Unexpected end of input at line 1:1");
    }

    #[test]
    fn nesting_is_bounded() {
        let groups = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(sexpr(&groups), "Maximum nesting depth exceeded at line 1:129");

        let chain = format!("a{}", ".b".repeat(200));
        assert_eq!(sexpr(&chain), "Maximum nesting depth exceeded at line 1:256");

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(sexpr(&shallow), "1");
        assert!(parse(&format!("a{}", ".b".repeat(100))).is_ok());
    }

    #[test]
    fn sibling_groups_do_not_add_up() {
        let items = vec!["(((a)))"; 1_000].join(", ");
        assert!(parse(&format!("[{items}]")).is_ok());
    }

    #[test]
    fn fragment_stops_at_unknown_continuation() {
        let mut parser = Parser::new("a + b ]");
        let expr = parser.parse_fragment().unwrap();
        assert_eq!(expr.to_string(), "(+ a b)");
        assert!(parser.at(TokenKind::RightBracket));
    }

    #[test]
    fn custom_grammar() {
        fn number(_: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
            Ok(Expr::Number(token.number().unwrap_or_default()))
        }
        fn minus(parser: &mut Parser<'_>, lhs: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
            let rhs = parser.parse_within(precedence::ADDITIVE - 1)?;
            Ok(Expr::binary(crate::ast::BinaryOp::Sub, lhs, rhs))
        }
        let mut grammar = Grammar::new();
        grammar
            .prefix(TokenKind::Number, number)
            .infix(TokenKind::Minus, precedence::ADDITIVE, minus);
        let expr = Parser::with_grammar("1 - 2 - 3", &grammar).parse().unwrap();
        assert_eq!(expr.to_string(), "(- 1 (- 2 3))");
    }

    #[test]
    fn guarded_infix_rule() {
        fn number(_: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
            Ok(Expr::Number(token.number().unwrap_or_default()))
        }
        fn minus(parser: &mut Parser<'_>, lhs: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
            let rhs = parser.parse_within(precedence::ADDITIVE)?;
            Ok(Expr::binary(crate::ast::BinaryOp::Sub, lhs, rhs))
        }
        fn before_number(parser: &mut Parser<'_>) -> bool {
            parser.lookahead().kind == TokenKind::Number
        }
        let mut grammar = Grammar::new();
        grammar
            .prefix(TokenKind::Number, number)
            .infix_when(TokenKind::Minus, precedence::ADDITIVE, before_number, minus);
        let expr = Parser::with_grammar("3 - 1", &grammar).parse().unwrap();
        assert_eq!(expr.to_string(), "(- 3 1)");
        let mut parser = Parser::with_grammar("3 - -", &grammar);
        assert_eq!(parser.parse_fragment().unwrap().to_string(), "3");
        assert!(parser.at(TokenKind::Minus));
    }
}
