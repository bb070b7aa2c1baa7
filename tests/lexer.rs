//! Tokenizer behaviour as seen through the public `Lexer` API: token kinds,
//! positions, literal values and the error tokens produced for malformed
//! literals.

use sandbox_expr::Lexer;
use sandbox_expr::lex::{Position, Token, TokenKind, TokenValue};

/// Tokens of `source` without whitespace or line breaks.
fn tokens(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source)
        .skipping(&[TokenKind::Whitespace, TokenKind::LineTerminator])
        .collect()
}

fn kinds(source: &str) -> Vec<TokenKind> {
    tokens(source).into_iter().map(|token| token.kind).collect()
}

/// The single token of `source`.
fn single(source: &str) -> Token<'_> {
    let mut all = tokens(source);
    assert_eq!(all.len(), 1, "expected one token in {source:?}, got {all:?}");
    all.remove(0)
}

fn number(source: &str) -> f64 {
    let token = single(source);
    assert_eq!(token.kind, TokenKind::Number, "{source:?} is not a number");
    token.number().unwrap()
}

fn string(source: &str) -> String {
    match single(source).value {
        TokenValue::String(value) => value,
        other => panic!("{source:?} is not a string: {other:?}"),
    }
}

/// Message of the invalid token `source` lexes to.
fn error(source: &str) -> String {
    let token = tokens(source)
        .into_iter()
        .find(|token| token.kind == TokenKind::Invalid)
        .unwrap_or_else(|| panic!("{source:?} produced no invalid token"));
    token.error().unwrap().to_string()
}

// ============================================================================
// Token kinds
// ============================================================================

#[test]
fn test_expression_token_stream() {
    assert_eq!(
        kinds("foo.bar(1, 'x') ?? [a, ...b]"),
        vec![
            TokenKind::Identifier,
            TokenKind::Dot,
            TokenKind::Identifier,
            TokenKind::LeftParen,
            TokenKind::Number,
            TokenKind::Comma,
            TokenKind::String,
            TokenKind::RightParen,
            TokenKind::QuestionQuestion,
            TokenKind::LeftBracket,
            TokenKind::Identifier,
            TokenKind::Comma,
            TokenKind::Ellipsis,
            TokenKind::Identifier,
            TokenKind::RightBracket,
        ]
    );
}

#[test]
fn test_identifier_charset() {
    let token = single("$_a1");
    assert_eq!(token.kind, TokenKind::Identifier);
    assert_eq!(token.lexeme, "$_a1");
}

#[test]
fn test_arrow_and_comparisons() {
    assert_eq!(
        kinds("x => x >= 1 === !y"),
        vec![
            TokenKind::Identifier,
            TokenKind::Arrow,
            TokenKind::Identifier,
            TokenKind::GreaterEqual,
            TokenKind::Number,
            TokenKind::EqualEqualEqual,
            TokenKind::Bang,
            TokenKind::Identifier,
        ]
    );
}

#[test]
fn test_optional_dot_followed_by_digit() {
    assert_eq!(
        kinds("a?.b"),
        vec![TokenKind::Identifier, TokenKind::QuestionDot, TokenKind::Identifier]
    );
    assert_eq!(
        kinds("a?.1:2"),
        vec![
            TokenKind::Identifier,
            TokenKind::Question,
            TokenKind::Number,
            TokenKind::Colon,
            TokenKind::Number,
        ]
    );
}

#[test]
fn test_unknown_characters_are_single_tokens() {
    assert_eq!(
        kinds("1 # 2"),
        vec![TokenKind::Number, TokenKind::Unknown, TokenKind::Number]
    );
}

// ============================================================================
// Positions
// ============================================================================

#[test]
fn test_positions_track_lines_and_columns() {
    let all = tokens("a +\n  b");
    assert_eq!(all[0].pos, Position::START);
    assert_eq!(all[1].pos, Position { line: 1, col: 3, offset: 2 });
    assert_eq!(all[2].pos, Position { line: 2, col: 3, offset: 6 });
}

#[test]
fn test_crlf_is_one_line_break() {
    let all = tokens("a\r\nb\n\nc");
    assert_eq!(all[1].pos.line, 2);
    assert_eq!(all[2].pos.line, 4);
}

#[test]
fn test_unicode_separators_break_lines() {
    let all = tokens("a\u{2028}b");
    assert_eq!(all[1].pos.line, 2);
    assert_eq!(all[1].pos.col, 1);
}

#[test]
fn test_eof_token_sits_at_end() {
    let mut lexer = Lexer::new("ab");
    lexer.shift();
    let eof = lexer.token();
    assert_eq!(eof.kind, TokenKind::Eof);
    assert_eq!(eof.pos.offset, 2);
}

// ============================================================================
// Numbers
// ============================================================================

#[test]
fn test_decimal_numbers() {
    assert_eq!(number("42"), 42.0);
    assert_eq!(number("3.14"), 3.14);
    assert_eq!(number(".5"), 0.5);
    assert_eq!(number("5."), 5.0);
    assert_eq!(number("0.1e3"), 100.0);
    assert_eq!(number("2E-2"), 0.02);
}

#[test]
fn test_radix_numbers() {
    assert_eq!(number("0xff"), 255.0);
    assert_eq!(number("0o17"), 15.0);
    assert_eq!(number("0B101"), 5.0);
}

#[test]
fn test_numeric_separators() {
    assert_eq!(number("1_000_000"), 1_000_000.0);
    assert_eq!(number("0xf_f"), 255.0);
    assert_eq!(number("0b1010_1010"), 170.0);
    assert_eq!(number("1_0.2_5e1_0"), 10.25e10);
}

#[test]
fn test_malformed_numbers() {
    assert_eq!(
        error("1_"),
        "Invalid numeric literal: no trailing separator allowed"
    );
    assert_eq!(
        error("1__0"),
        "Invalid numeric literal: only one separator allowed between digits"
    );
    assert_eq!(
        error("1_.5"),
        "Invalid numeric literal: no separator allowed before decimal point"
    );
    assert_eq!(
        error("1._5"),
        "Invalid numeric literal: no separator allowed after decimal point"
    );
    assert_eq!(
        error("1_e5"),
        "Invalid numeric literal: no separator allowed before exponent mark"
    );
    assert_eq!(
        error("1e_5"),
        "Invalid numeric literal: no separator allowed after exponent mark"
    );
    assert_eq!(
        error("1e+_5"),
        "Invalid numeric literal: no separator allowed after exponent sign"
    );
    assert_eq!(error("1e"), "Invalid numeric literal: expected exponent");
    assert_eq!(error("0x"), "Invalid numeric literal: expected hexadecimal digit");
    assert_eq!(error("0x_1"), "Invalid numeric literal: expected hexadecimal digit");
    assert_eq!(error("0o9"), "Invalid numeric literal: expected octal digit");
    assert_eq!(error("0b2"), "Invalid numeric literal: expected binary digit");
}

#[test]
fn test_number_token_display() {
    let rendered: Vec<String> = tokens("1_000 0b11 .5")
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        rendered,
        vec!["NUMBER 1_000 1000", "NUMBER 0b11 3", "NUMBER .5 0.5"]
    );
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_quotes() {
    assert_eq!(string(r#""it's""#), "it's");
    assert_eq!(string(r#"'say "hi"'"#), "say \"hi\"");
}

#[test]
fn test_simple_escapes() {
    assert_eq!(string(r"'a\nb\tc\\d\'e'"), "a\nb\tc\\d'e");
    assert_eq!(string(r"'\q'"), "q");
    assert_eq!(string(r"'\0'"), "\0");
}

#[test]
fn test_hex_and_unicode_escapes() {
    assert_eq!(string(r"'\x41B\u{43}'"), "ABC");
    assert_eq!(string(r"'\u{1F600}'"), "\u{1F600}");
    assert_eq!(string(r"'😀'"), "\u{1F600}");
}

#[test]
fn test_line_continuation() {
    assert_eq!(string("'a\\\nb'"), "ab");
    assert_eq!(string("'a\\\r\nb'"), "ab");
}

#[test]
fn test_malformed_strings() {
    assert_eq!(error("'abc"), "Invalid string literal: missing closing quote");
    assert_eq!(error("'ab\ncd'"), "Invalid string literal: missing closing quote");
    assert_eq!(
        error(r"'\x4'"),
        "Invalid string literal: expected 2-digit hexadecimal character code"
    );
    assert_eq!(
        error(r"'\u12'"),
        "Invalid string literal: expected 4-digit hexadecimal character code"
    );
    assert_eq!(
        error(r"'\u{}'"),
        "Invalid string literal: expected hexadecimal Unicode code point"
    );
    assert_eq!(
        error(r"'\u{110000}'"),
        "Invalid string literal: undefined Unicode code point: 0x110000"
    );
}
