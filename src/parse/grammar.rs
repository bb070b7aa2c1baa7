//! The default expression grammar and its parselets.

use crate::ast::{BinaryOp, Expr, Param, Property, UnaryOp, UpdateOp};
use crate::lex::{Token, TokenKind, TokenValue};

use super::precedence::*;
use super::{Grammar, Parser, SyntaxError};

const BINARY: &[(TokenKind, u8)] = &[
    (TokenKind::PipePipe, LOGICAL_OR),
    (TokenKind::AmpAmp, LOGICAL_AND),
    (TokenKind::Pipe, BITWISE_OR),
    (TokenKind::Caret, BITWISE_XOR),
    (TokenKind::Amp, BITWISE_AND),
    (TokenKind::EqualEqual, EQUALITY),
    (TokenKind::BangEqual, EQUALITY),
    (TokenKind::EqualEqualEqual, EQUALITY),
    (TokenKind::BangEqualEqual, EQUALITY),
    (TokenKind::Less, RELATIONAL),
    (TokenKind::LessEqual, RELATIONAL),
    (TokenKind::Greater, RELATIONAL),
    (TokenKind::GreaterEqual, RELATIONAL),
    (TokenKind::In, RELATIONAL),
    (TokenKind::LessLess, SHIFT),
    (TokenKind::GreaterGreater, SHIFT),
    (TokenKind::GreaterGreaterGreater, SHIFT),
    (TokenKind::Plus, ADDITIVE),
    (TokenKind::Minus, ADDITIVE),
    (TokenKind::Star, MULTIPLICATIVE),
    (TokenKind::Slash, MULTIPLICATIVE),
    (TokenKind::Percent, MULTIPLICATIVE),
    (TokenKind::StarStar, POWER),
];

const ASSIGNMENTS: &[TokenKind] = &[
    TokenKind::Equal,
    TokenKind::PlusEqual,
    TokenKind::MinusEqual,
    TokenKind::StarEqual,
    TokenKind::StarStarEqual,
    TokenKind::SlashEqual,
    TokenKind::PercentEqual,
    TokenKind::LessLessEqual,
    TokenKind::GreaterGreaterEqual,
    TokenKind::GreaterGreaterGreaterEqual,
    TokenKind::AmpEqual,
    TokenKind::PipeEqual,
    TokenKind::CaretEqual,
    TokenKind::QuestionQuestionEqual,
];

fn binary_precedence(kind: TokenKind) -> u8 {
    BINARY
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map_or(LOWEST, |(_, precedence)| *precedence)
}

pub(super) fn expression() -> Grammar {
    let mut grammar = Grammar::new();

    for kind in [
        TokenKind::Number,
        TokenKind::String,
        TokenKind::Boolean,
        TokenKind::Null,
        TokenKind::Undefined,
    ] {
        grammar.prefix(kind, literal);
    }
    grammar
        .prefix_when(TokenKind::Identifier, arrow_follows, single_parameter_lambda)
        .prefix(TokenKind::Identifier, identifier)
        .prefix_when(TokenKind::LeftParen, parameter_list_follows, lambda)
        .prefix(TokenKind::LeftParen, group)
        .prefix(TokenKind::LeftBracket, array_literal)
        .prefix(TokenKind::LeftBrace, object_literal)
        .prefix(TokenKind::Ellipsis, spread)
        .prefix(TokenKind::Await, await_expression)
        .prefix(TokenKind::PlusPlus, prefix_update)
        .prefix(TokenKind::MinusMinus, prefix_update);
    for kind in [TokenKind::Bang, TokenKind::Tilde, TokenKind::Plus, TokenKind::Minus] {
        grammar.prefix(kind, unary);
    }

    for &(kind, precedence) in BINARY {
        if kind == TokenKind::StarStar {
            grammar.infix(kind, precedence, right_binary);
        } else {
            grammar.infix(kind, precedence, left_binary);
        }
    }
    for &kind in ASSIGNMENTS {
        grammar.infix(kind, ASSIGNMENT, assignment);
    }
    grammar
        .infix(TokenKind::Comma, SEQUENCE, sequence)
        .infix(TokenKind::Question, CONDITIONAL, conditional)
        .infix(TokenKind::QuestionQuestion, CONDITIONAL, coalesce)
        .infix(TokenKind::PlusPlus, POSTFIX, postfix_update)
        .infix(TokenKind::MinusMinus, POSTFIX, postfix_update)
        .infix(TokenKind::Dot, PRIMARY, member)
        .infix(TokenKind::LeftBracket, PRIMARY, computed_member)
        .infix(TokenKind::LeftParen, PRIMARY, call)
        .infix(TokenKind::QuestionDot, PRIMARY, optional_chain);

    grammar
}

fn literal(parser: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
    Ok(match (token.kind, &token.value) {
        (_, TokenValue::Number { value, .. }) => Expr::Number(*value),
        (_, TokenValue::String(value)) => Expr::String(value.clone()),
        (_, TokenValue::Boolean(value)) => Expr::Boolean(*value),
        (TokenKind::Null, _) => Expr::Null,
        (TokenKind::Undefined, _) => Expr::Undefined,
        _ => return Err(parser.unexpected(&token)),
    })
}

fn identifier(_: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
    Ok(Expr::Identifier(token.lexeme.to_string()))
}

fn arrow_follows(parser: &mut Parser<'_>) -> bool {
    parser.at(TokenKind::Arrow)
}

/// Scans for the `)` closing the list just opened and checks for a `=>` after
/// it. Parentheses only occur inside default values, so the scan gives up at
/// the first one outside of them.
fn parameter_list_follows(parser: &mut Parser<'_>) -> bool {
    let lexer = parser.lexer_mut();
    let state = lexer.state();
    let mut nesting = 0usize;
    let mut in_default = false;
    let found = loop {
        match lexer.shift().kind {
            TokenKind::LeftParen if nesting == 0 && !in_default => break false,
            TokenKind::RightParen if nesting == 0 => {
                break lexer.token().kind == TokenKind::Arrow;
            }
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => nesting += 1,
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                nesting = nesting.saturating_sub(1);
            }
            TokenKind::Equal if nesting == 0 => in_default = true,
            TokenKind::Comma if nesting == 0 => in_default = false,
            TokenKind::Eof => break false,
            _ => {}
        }
    };
    lexer.resume(state);
    found
}

fn lambda_body(parser: &mut Parser<'_>) -> Result<Box<Expr>, SyntaxError> {
    parser.expect(TokenKind::Arrow)?;
    Ok(Box::new(parser.parse_within(ASSIGNMENT - 1)?))
}

fn single_parameter_lambda(parser: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
    let params = vec![Param {
        name: token.lexeme.to_string(),
        default: None,
    }];
    let body = lambda_body(parser)?;
    Ok(Expr::Lambda {
        params,
        rest: None,
        body,
    })
}

fn lambda(parser: &mut Parser<'_>, open: Token<'_>) -> Result<Expr, SyntaxError> {
    let invalid = || SyntaxError::InvalidArgumentList { span: open.span() };
    let mut params = Vec::new();
    let mut rest = None;
    while !parser.at(TokenKind::RightParen) {
        match parser.parse_within(SEQUENCE)? {
            Expr::Identifier(name) => params.push(Param {
                name,
                default: None,
            }),
            Expr::Assignment { target, value } => match *target {
                Expr::Identifier(name) => params.push(Param {
                    name,
                    default: Some(*value),
                }),
                _ => return Err(invalid()),
            },
            Expr::Spread(inner) => match *inner {
                Expr::Identifier(name) if parser.at(TokenKind::RightParen) => rest = Some(name),
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        }
        if !parser.accept(TokenKind::Comma)? {
            break;
        }
    }
    parser.expect(TokenKind::RightParen)?;
    let body = lambda_body(parser)?;
    Ok(Expr::Lambda { params, rest, body })
}

fn group(parser: &mut Parser<'_>, _: Token<'_>) -> Result<Expr, SyntaxError> {
    if parser.at(TokenKind::RightParen) {
        return Err(parser.unexpected(parser.token()));
    }
    let inner = parser.parse_within(LOWEST)?;
    parser.expect(TokenKind::RightParen)?;
    Ok(Expr::Group(Box::new(inner)))
}

fn spread(parser: &mut Parser<'_>, _: Token<'_>) -> Result<Expr, SyntaxError> {
    Ok(Expr::Spread(Box::new(parser.parse_within(PREFIX)?)))
}

/// Comma separated items up to `close`, allowing one trailing comma.
fn list(parser: &mut Parser<'_>, close: TokenKind) -> Result<Vec<Expr>, SyntaxError> {
    let mut items = Vec::new();
    while !parser.at(close) {
        items.push(parser.parse_within(SEQUENCE)?);
        if !parser.accept(TokenKind::Comma)? {
            break;
        }
    }
    parser.expect(close)?;
    Ok(items)
}

fn array_literal(parser: &mut Parser<'_>, _: Token<'_>) -> Result<Expr, SyntaxError> {
    Ok(Expr::ArrayLiteral(list(parser, TokenKind::RightBracket)?))
}

fn object_literal(parser: &mut Parser<'_>, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let mut properties = Vec::new();
    while !parser.at(TokenKind::RightBrace) {
        let token = parser.shift()?;
        let key = match (token.kind, &token.value) {
            (TokenKind::LeftBracket, _) => {
                let key = parser.parse_within(LOWEST)?;
                parser.expect(TokenKind::RightBracket)?;
                key
            }
            (TokenKind::String, TokenValue::String(value)) => Expr::String(value.clone()),
            (TokenKind::Number, TokenValue::Number { value, .. }) => Expr::Number(*value),
            (
                TokenKind::Identifier
                | TokenKind::In
                | TokenKind::Await
                | TokenKind::Boolean
                | TokenKind::Null
                | TokenKind::Undefined,
                _,
            ) => Expr::String(token.lexeme.to_string()),
            _ => return Err(parser.unexpected(&token)),
        };
        let shorthand = token.kind == TokenKind::Identifier
            && (parser.at(TokenKind::Comma) || parser.at(TokenKind::RightBrace));
        let value = if shorthand {
            Expr::Identifier(token.lexeme.to_string())
        } else {
            parser.expect(TokenKind::Colon)?;
            parser.parse_within(SEQUENCE)?
        };
        properties.push(Property { key, value });
        if !parser.accept(TokenKind::Comma)? {
            break;
        }
    }
    parser.expect(TokenKind::RightBrace)?;
    Ok(Expr::ObjectLiteral(properties))
}

fn unary(parser: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
    let Some(operator) = UnaryOp::from_token(token.kind) else {
        return Err(parser.unexpected(&token));
    };
    let operand = parser.parse_within(PREFIX)?;
    Ok(Expr::PrefixOperation {
        operator,
        operand: Box::new(operand),
    })
}

fn update_operator(kind: TokenKind) -> UpdateOp {
    match kind {
        TokenKind::MinusMinus => UpdateOp::Decrement,
        _ => UpdateOp::Increment,
    }
}

fn prefix_update(parser: &mut Parser<'_>, token: Token<'_>) -> Result<Expr, SyntaxError> {
    let target = parser.parse_within(PREFIX)?;
    if !target.is_assignable() {
        return Err(SyntaxError::InvalidLeftHandSide { span: token.span() });
    }
    Ok(Expr::prefix_update(update_operator(token.kind), target))
}

fn await_expression(parser: &mut Parser<'_>, _: Token<'_>) -> Result<Expr, SyntaxError> {
    Ok(Expr::Await(Box::new(parser.parse_within(PREFIX)?)))
}

fn sequence(parser: &mut Parser<'_>, first: Expr, comma: Token<'_>) -> Result<Expr, SyntaxError> {
    let mut items = vec![first];
    let mut comma = comma;
    loop {
        if parser.at(TokenKind::RightParen) || parser.at(TokenKind::Eof) {
            return Err(parser.unexpected(&comma));
        }
        items.push(parser.parse_within(SEQUENCE)?);
        if !parser.at(TokenKind::Comma) {
            break;
        }
        comma = parser.shift()?;
    }
    Ok(Expr::Sequence(items))
}

fn binary_operator(parser: &Parser<'_>, token: &Token<'_>) -> Result<BinaryOp, SyntaxError> {
    BinaryOp::from_token(token.kind).ok_or_else(|| parser.unexpected(token))
}

fn left_binary(parser: &mut Parser<'_>, lhs: Expr, token: Token<'_>) -> Result<Expr, SyntaxError> {
    let operator = binary_operator(parser, &token)?;
    let rhs = parser.parse_within(binary_precedence(token.kind))?;
    Ok(Expr::binary(operator, lhs, rhs))
}

fn right_binary(parser: &mut Parser<'_>, lhs: Expr, token: Token<'_>) -> Result<Expr, SyntaxError> {
    let operator = binary_operator(parser, &token)?;
    let rhs = parser.parse_within(binary_precedence(token.kind) - 1)?;
    Ok(Expr::binary(operator, lhs, rhs))
}

fn assignment(parser: &mut Parser<'_>, target: Expr, token: Token<'_>) -> Result<Expr, SyntaxError> {
    if !target.is_assignable() {
        return Err(SyntaxError::InvalidLeftHandSide { span: token.span() });
    }
    let value = parser.parse_within(ASSIGNMENT - 1)?;
    let value = match token.base_operator() {
        None => value,
        Some(TokenKind::QuestionQuestion) => Expr::coalesce(target.clone(), value),
        Some(base) => {
            let Some(operator) = BinaryOp::from_token(base) else {
                return Err(parser.unexpected(&token));
            };
            Expr::binary(operator, target.clone(), value)
        }
    };
    Ok(Expr::assign(target, value))
}

fn conditional(parser: &mut Parser<'_>, test: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let consequent = parser.parse_within(ASSIGNMENT - 1)?;
    parser.expect(TokenKind::Colon)?;
    let alternate = parser.parse_within(ASSIGNMENT - 1)?;
    Ok(Expr::conditional(test, consequent, alternate))
}

fn coalesce(parser: &mut Parser<'_>, lhs: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let rhs = parser.parse_within(CONDITIONAL)?;
    Ok(Expr::coalesce(lhs, rhs))
}

fn postfix_update(_: &mut Parser<'_>, target: Expr, token: Token<'_>) -> Result<Expr, SyntaxError> {
    if !target.is_assignable() {
        return Err(SyntaxError::InvalidLeftHandSide { span: token.span() });
    }
    Ok(Expr::postfix_update(update_operator(token.kind), target))
}

/// Member names may be keywords, `a.in` or `a.null`.
fn member_name(parser: &mut Parser<'_>) -> Result<String, SyntaxError> {
    match parser.token().kind {
        TokenKind::Identifier
        | TokenKind::In
        | TokenKind::Await
        | TokenKind::Boolean
        | TokenKind::Null
        | TokenKind::Undefined => Ok(parser.shift()?.lexeme.to_string()),
        _ => Err(parser.expected(TokenKind::Identifier, parser.token())),
    }
}

fn member(parser: &mut Parser<'_>, object: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let name = member_name(parser)?;
    Ok(Expr::MemberAccess {
        object: Box::new(object),
        name,
    })
}

fn computed_member(parser: &mut Parser<'_>, object: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let property = parser.parse_within(LOWEST)?;
    parser.expect(TokenKind::RightBracket)?;
    Ok(Expr::ComputedMemberAccess {
        object: Box::new(object),
        property: Box::new(property),
    })
}

fn call(parser: &mut Parser<'_>, callee: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let args = list(parser, TokenKind::RightParen)?;
    Ok(Expr::Call {
        callee: Box::new(callee),
        args,
    })
}

fn optional_chain(parser: &mut Parser<'_>, object: Expr, _: Token<'_>) -> Result<Expr, SyntaxError> {
    let receiver = Box::new(Expr::StackPop);
    let access = if parser.accept(TokenKind::LeftBracket)? {
        let property = parser.parse_within(LOWEST)?;
        parser.expect(TokenKind::RightBracket)?;
        Expr::ComputedMemberAccess {
            object: receiver,
            property: Box::new(property),
        }
    } else if parser.accept(TokenKind::LeftParen)? {
        Expr::Call {
            callee: receiver,
            args: list(parser, TokenKind::RightParen)?,
        }
    } else {
        Expr::MemberAccess {
            object: receiver,
            name: member_name(parser)?,
        }
    };
    Ok(Expr::optional(object, access))
}
