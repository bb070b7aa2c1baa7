use std::fmt::{self, Display};
use std::mem;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::ops::number_to_string;

/// Diagnostics attached to [`TokenKind::Invalid`] tokens.
///
/// The lexer never aborts; it hands these to the parser inside the token,
/// which rejects them as soon as it consumes one.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Invalid numeric literal: no trailing separator allowed")]
    #[diagnostic(code(lex::numeric_separator))]
    TrailingSeparator,
    #[error("Invalid numeric literal: only one separator allowed between digits")]
    #[diagnostic(code(lex::numeric_separator))]
    ConsecutiveSeparators,
    #[error("Invalid numeric literal: no separator allowed before decimal point")]
    #[diagnostic(code(lex::numeric_separator))]
    SeparatorBeforePeriod,
    #[error("Invalid numeric literal: no separator allowed after decimal point")]
    #[diagnostic(code(lex::numeric_separator))]
    SeparatorAfterPeriod,
    #[error("Invalid numeric literal: no separator allowed before exponent mark")]
    #[diagnostic(code(lex::numeric_separator))]
    SeparatorBeforeExponent,
    #[error("Invalid numeric literal: no separator allowed after exponent mark")]
    #[diagnostic(code(lex::numeric_separator))]
    SeparatorAfterExponent,
    #[error("Invalid numeric literal: no separator allowed after exponent sign")]
    #[diagnostic(code(lex::numeric_separator))]
    SeparatorAfterExponentSign,
    #[error("Invalid numeric literal: expected exponent")]
    ExpectedExponent,
    #[error("Invalid numeric literal: expected hexadecimal digit")]
    ExpectedHexDigit,
    #[error("Invalid numeric literal: expected octal digit")]
    ExpectedOctalDigit,
    #[error("Invalid numeric literal: expected binary digit")]
    ExpectedBinaryDigit,
    #[error("Invalid string literal: missing closing quote")]
    #[diagnostic(help("strings end with the quote character they started with"))]
    UnterminatedString,
    #[error("Invalid string literal: expected 2-digit hexadecimal character code")]
    HexEscape,
    #[error("Invalid string literal: expected 4-digit hexadecimal character code")]
    UnicodeEscape,
    #[error("Invalid string literal: expected hexadecimal Unicode code point")]
    CodePointEscape,
    #[error("Invalid string literal: undefined Unicode code point: 0x{0}")]
    UndefinedCodePoint(String),
}

impl LexError {
    fn expected_digit(radix: u32) -> Self {
        match radix {
            16 => LexError::ExpectedHexDigit,
            8 => LexError::ExpectedOctalDigit,
            _ => LexError::ExpectedBinaryDigit,
        }
    }
}

/// Where a token starts. `line` and `col` are 1-based, `offset` is a byte index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

impl Position {
    pub const START: Position = Position {
        line: 1,
        col: 1,
        offset: 0,
    };
}

impl Default for Position {
    fn default() -> Self {
        Position::START
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Unknown,
    Invalid,
    Whitespace,
    LineTerminator,

    Number,
    String,
    Boolean,
    Null,
    Undefined,
    Identifier,
    In,
    Await,

    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Ellipsis,
    Colon,
    Question,
    QuestionDot,
    QuestionQuestion,
    QuestionQuestionEqual,
    Arrow,

    Plus,
    PlusPlus,
    PlusEqual,
    Minus,
    MinusMinus,
    MinusEqual,
    Star,
    StarEqual,
    StarStar,
    StarStarEqual,
    Slash,
    SlashEqual,
    Percent,
    PercentEqual,

    Equal,
    EqualEqual,
    EqualEqualEqual,
    Bang,
    BangEqual,
    BangEqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    Amp,
    AmpAmp,
    AmpEqual,
    Pipe,
    PipePipe,
    PipeEqual,
    Caret,
    CaretEqual,
    Tilde,
    LessLess,
    LessLessEqual,
    GreaterGreater,
    GreaterGreaterEqual,
    GreaterGreaterGreater,
    GreaterGreaterGreaterEqual,
}

impl TokenKind {
    /// Upper-case tag used by the token dump.
    pub fn name(self) -> &'static str {
        use TokenKind::*;
        match self {
            Eof => "EOF",
            Unknown => "UNKNOWN",
            Invalid => "INVALID",
            Whitespace => "WHITESPACE",
            LineTerminator => "LINE_TERMINATOR",
            Number => "NUMBER",
            String => "STRING",
            Boolean => "BOOLEAN",
            Null => "NULL",
            Undefined => "UNDEFINED",
            Identifier => "IDENTIFIER",
            In => "IN",
            Await => "AWAIT",
            LeftParen => "LEFT_PAREN",
            RightParen => "RIGHT_PAREN",
            LeftBracket => "LEFT_BRACKET",
            RightBracket => "RIGHT_BRACKET",
            LeftBrace => "LEFT_BRACE",
            RightBrace => "RIGHT_BRACE",
            Comma => "COMMA",
            Dot => "DOT",
            Ellipsis => "ELLIPSIS",
            Colon => "COLON",
            Question => "QUESTION",
            QuestionDot => "QUESTION_DOT",
            QuestionQuestion => "QUESTION_QUESTION",
            QuestionQuestionEqual => "QUESTION_QUESTION_EQUAL",
            Arrow => "ARROW",
            Plus => "PLUS",
            PlusPlus => "PLUS_PLUS",
            PlusEqual => "PLUS_EQUAL",
            Minus => "MINUS",
            MinusMinus => "MINUS_MINUS",
            MinusEqual => "MINUS_EQUAL",
            Star => "STAR",
            StarEqual => "STAR_EQUAL",
            StarStar => "STAR_STAR",
            StarStarEqual => "STAR_STAR_EQUAL",
            Slash => "SLASH",
            SlashEqual => "SLASH_EQUAL",
            Percent => "PERCENT",
            PercentEqual => "PERCENT_EQUAL",
            Equal => "EQUAL",
            EqualEqual => "EQUAL_EQUAL",
            EqualEqualEqual => "EQUAL_EQUAL_EQUAL",
            Bang => "BANG",
            BangEqual => "BANG_EQUAL",
            BangEqualEqual => "BANG_EQUAL_EQUAL",
            Less => "LESS",
            LessEqual => "LESS_EQUAL",
            Greater => "GREATER",
            GreaterEqual => "GREATER_EQUAL",
            Amp => "AMP",
            AmpAmp => "AMP_AMP",
            AmpEqual => "AMP_EQUAL",
            Pipe => "PIPE",
            PipePipe => "PIPE_PIPE",
            PipeEqual => "PIPE_EQUAL",
            Caret => "CARET",
            CaretEqual => "CARET_EQUAL",
            Tilde => "TILDE",
            LessLess => "LESS_LESS",
            LessLessEqual => "LESS_LESS_EQUAL",
            GreaterGreater => "GREATER_GREATER",
            GreaterGreaterEqual => "GREATER_GREATER_EQUAL",
            GreaterGreaterGreater => "GREATER_GREATER_GREATER",
            GreaterGreaterGreaterEqual => "GREATER_GREATER_GREATER_EQUAL",
        }
    }

    /// The fixed lexeme of a punctuation token.
    pub fn symbol(self) -> Option<&'static str> {
        PUNCTUATION
            .iter()
            .find(|(_, kind, _)| *kind == self)
            .map(|(lexeme, _, _)| *lexeme)
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => match self {
                TokenKind::Eof => f.write_str("end of input"),
                TokenKind::Identifier => f.write_str("identifier"),
                TokenKind::Number => f.write_str("number"),
                TokenKind::String => f.write_str("string"),
                TokenKind::In => f.write_str("in"),
                TokenKind::Await => f.write_str("await"),
                other => f.write_str(&other.name().to_ascii_lowercase()),
            },
        }
    }
}

/// Typed payload of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Number { value: f64, radix: u32 },
    String(String),
    Boolean(bool),
    /// Base operator of a compound assignment, `+` for `+=`.
    Compound(TokenKind),
    Invalid(LexError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub lexeme: &'de str,
    pub pos: Position,
    pub value: TokenValue,
}

impl Token<'_> {
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.pos.offset..self.pos.offset + self.lexeme.len())
    }

    pub fn number(&self) -> Option<f64> {
        match self.value {
            TokenValue::Number { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn base_operator(&self) -> Option<TokenKind> {
        match self.value {
            TokenValue::Compound(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LexError> {
        match &self.value {
            TokenValue::Invalid(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.kind.name();
        let lexeme = self.lexeme;
        match &self.value {
            TokenValue::Number { value, .. } => {
                write!(f, "{name} {lexeme} {}", number_to_string(*value))
            }
            TokenValue::String(value) => write!(f, "{name} {lexeme} {value}"),
            TokenValue::Boolean(value) => write!(f, "{name} {lexeme} {value}"),
            TokenValue::Invalid(error) => write!(f, "{name} {lexeme} {error}"),
            TokenValue::None | TokenValue::Compound(_) => write!(f, "{name} {lexeme} null"),
        }
    }
}

/// Character cursor that keeps line and column in step with the byte offset.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'de> {
    src: &'de str,
    pos: Position,
}

impl<'de> Cursor<'de> {
    pub fn new(src: &'de str, pos: Position) -> Self {
        Cursor { src, pos }
    }

    pub fn position(&self) -> Position {
        self.pos
    }

    pub fn rest(&self) -> &'de str {
        &self.src[self.pos.offset..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos.offset += c.len_utf8();
        match c {
            // CRLF counts once, at the LF
            '\r' if self.peek() == Some('\n') => self.pos.col += 1,
            c if is_line_terminator(c) => {
                self.pos.line += 1;
                self.pos.col = 1;
            }
            _ => self.pos.col += 1,
        }
        Some(c)
    }

    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn eat_str(&mut self, expected: &str) -> bool {
        if !self.rest().starts_with(expected) {
            return false;
        }
        for _ in expected.chars() {
            self.bump();
        }
        true
    }

    pub fn eat_while(&mut self, accept: impl Fn(char) -> bool) -> usize {
        let mut count = 0;
        while self.peek().is_some_and(&accept) {
            self.bump();
            count += 1;
        }
        count
    }
}

pub fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

pub fn is_whitespace(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t'
            | '\u{b}'
            | '\u{c}'
            | '\u{a0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
            | '\u{feff}'
    )
}

/// A scan rule either recognizes a token at the cursor, advancing past it,
/// or returns `None`; the lexer rewinds the cursor between attempts.
pub type ScanRule = for<'de> fn(&mut Cursor<'de>) -> Option<(TokenKind, TokenValue)>;

pub const DEFAULT_RULES: &[ScanRule] = &[
    whitespace,
    line_terminator,
    identifier,
    number,
    string,
    punctuation,
];

/// Longest lexemes first, so the first prefix match is the longest one.
pub const PUNCTUATION: &[(&str, TokenKind, Option<TokenKind>)] = &[
    (">>>=", TokenKind::GreaterGreaterGreaterEqual, Some(TokenKind::GreaterGreaterGreater)),
    ("...", TokenKind::Ellipsis, None),
    ("===", TokenKind::EqualEqualEqual, None),
    ("!==", TokenKind::BangEqualEqual, None),
    ("**=", TokenKind::StarStarEqual, Some(TokenKind::StarStar)),
    ("<<=", TokenKind::LessLessEqual, Some(TokenKind::LessLess)),
    (">>=", TokenKind::GreaterGreaterEqual, Some(TokenKind::GreaterGreater)),
    (">>>", TokenKind::GreaterGreaterGreater, None),
    ("??=", TokenKind::QuestionQuestionEqual, Some(TokenKind::QuestionQuestion)),
    ("=>", TokenKind::Arrow, None),
    ("==", TokenKind::EqualEqual, None),
    ("!=", TokenKind::BangEqual, None),
    ("<=", TokenKind::LessEqual, None),
    (">=", TokenKind::GreaterEqual, None),
    ("&&", TokenKind::AmpAmp, None),
    ("||", TokenKind::PipePipe, None),
    ("??", TokenKind::QuestionQuestion, None),
    ("?.", TokenKind::QuestionDot, None),
    ("**", TokenKind::StarStar, None),
    ("++", TokenKind::PlusPlus, Some(TokenKind::Plus)),
    ("--", TokenKind::MinusMinus, Some(TokenKind::Minus)),
    ("+=", TokenKind::PlusEqual, Some(TokenKind::Plus)),
    ("-=", TokenKind::MinusEqual, Some(TokenKind::Minus)),
    ("*=", TokenKind::StarEqual, Some(TokenKind::Star)),
    ("/=", TokenKind::SlashEqual, Some(TokenKind::Slash)),
    ("%=", TokenKind::PercentEqual, Some(TokenKind::Percent)),
    ("&=", TokenKind::AmpEqual, Some(TokenKind::Amp)),
    ("|=", TokenKind::PipeEqual, Some(TokenKind::Pipe)),
    ("^=", TokenKind::CaretEqual, Some(TokenKind::Caret)),
    ("<<", TokenKind::LessLess, None),
    (">>", TokenKind::GreaterGreater, None),
    ("(", TokenKind::LeftParen, None),
    (")", TokenKind::RightParen, None),
    ("[", TokenKind::LeftBracket, None),
    ("]", TokenKind::RightBracket, None),
    ("{", TokenKind::LeftBrace, None),
    ("}", TokenKind::RightBrace, None),
    (",", TokenKind::Comma, None),
    (".", TokenKind::Dot, None),
    (":", TokenKind::Colon, None),
    ("?", TokenKind::Question, None),
    ("+", TokenKind::Plus, None),
    ("-", TokenKind::Minus, None),
    ("*", TokenKind::Star, None),
    ("/", TokenKind::Slash, None),
    ("%", TokenKind::Percent, None),
    ("=", TokenKind::Equal, None),
    ("!", TokenKind::Bang, None),
    ("<", TokenKind::Less, None),
    (">", TokenKind::Greater, None),
    ("&", TokenKind::Amp, None),
    ("|", TokenKind::Pipe, None),
    ("^", TokenKind::Caret, None),
    ("~", TokenKind::Tilde, None),
];

fn whitespace(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    (cursor.eat_while(is_whitespace) > 0).then_some((TokenKind::Whitespace, TokenValue::None))
}

fn line_terminator(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    (cursor.eat_while(is_line_terminator) > 0)
        .then_some((TokenKind::LineTerminator, TokenValue::None))
}

fn identifier(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    let start = cursor.rest();
    if !cursor
        .peek()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
    {
        return None;
    }
    let len = cursor.eat_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    Some(match &start[..len] {
        "in" => (TokenKind::In, TokenValue::None),
        "await" => (TokenKind::Await, TokenValue::None),
        "true" => (TokenKind::Boolean, TokenValue::Boolean(true)),
        "false" => (TokenKind::Boolean, TokenValue::Boolean(false)),
        "null" => (TokenKind::Null, TokenValue::None),
        "undefined" => (TokenKind::Undefined, TokenValue::None),
        _ => (TokenKind::Identifier, TokenValue::None),
    })
}

fn number(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    let first = cursor.peek()?;
    let leading_dot = first == '.' && cursor.peek_nth(1).is_some_and(|c| c.is_ascii_digit());
    if !first.is_ascii_digit() && !leading_dot {
        return None;
    }
    let radix = match (first, cursor.peek_nth(1)) {
        ('0', Some('x' | 'X')) => 16,
        ('0', Some('o' | 'O')) => 8,
        ('0', Some('b' | 'B')) => 2,
        _ => 10,
    };
    let scanned = if radix == 10 {
        decimal_literal(cursor)
    } else {
        cursor.bump();
        cursor.bump();
        radix_literal(cursor, radix)
    };
    Some(match scanned {
        Ok(value) => (TokenKind::Number, TokenValue::Number { value, radix }),
        Err(error) => (TokenKind::Invalid, TokenValue::Invalid(error)),
    })
}

/// Consumes a run of digits with single `_` separators between them,
/// collecting the digits into `out`. The first digit is already known to be present.
fn digit_run(cursor: &mut Cursor<'_>, radix: u32, out: &mut String) -> Result<(), LexError> {
    loop {
        match cursor.peek() {
            Some(c) if c.is_digit(radix) => {
                out.push(c);
                cursor.bump();
            }
            Some('_') => {
                cursor.bump();
                match cursor.peek() {
                    Some(c) if c.is_digit(radix) => {}
                    Some('_') => {
                        cursor.bump();
                        return Err(LexError::ConsecutiveSeparators);
                    }
                    Some('.') if radix == 10 => {
                        cursor.bump();
                        return Err(LexError::SeparatorBeforePeriod);
                    }
                    Some('e' | 'E') if radix == 10 => {
                        cursor.bump();
                        return Err(LexError::SeparatorBeforeExponent);
                    }
                    _ => return Err(LexError::TrailingSeparator),
                }
            }
            _ => return Ok(()),
        }
    }
}

fn decimal_literal(cursor: &mut Cursor<'_>) -> Result<f64, LexError> {
    let mut text = String::new();
    if cursor.peek() == Some('.') {
        text.push('0');
    } else {
        digit_run(cursor, 10, &mut text)?;
    }

    if cursor.peek() == Some('.') && cursor.peek_nth(1) != Some('.') {
        cursor.bump();
        text.push('.');
        match cursor.peek() {
            Some('_') => {
                cursor.bump();
                return Err(LexError::SeparatorAfterPeriod);
            }
            Some(c) if c.is_ascii_digit() => digit_run(cursor, 10, &mut text)?,
            _ => text.push('0'),
        }
    }

    if matches!(cursor.peek(), Some('e' | 'E')) {
        cursor.bump();
        text.push('e');
        match cursor.peek() {
            Some(sign @ ('+' | '-')) => {
                cursor.bump();
                text.push(sign);
                if cursor.eat('_') {
                    return Err(LexError::SeparatorAfterExponentSign);
                }
            }
            Some('_') => {
                cursor.bump();
                return Err(LexError::SeparatorAfterExponent);
            }
            _ => {}
        }
        match cursor.peek() {
            Some(c) if c.is_ascii_digit() => digit_run(cursor, 10, &mut text)?,
            _ => return Err(LexError::ExpectedExponent),
        }
    }

    // the collected text is plain digits, one period and an optional exponent
    Ok(text.parse().unwrap_or(f64::NAN))
}

fn radix_literal(cursor: &mut Cursor<'_>, radix: u32) -> Result<f64, LexError> {
    match cursor.peek() {
        Some(c) if c.is_digit(radix) => {}
        Some('_') => {
            cursor.bump();
            return Err(LexError::expected_digit(radix));
        }
        _ => return Err(LexError::expected_digit(radix)),
    }
    let mut digits = String::new();
    digit_run(cursor, radix, &mut digits)?;
    Ok(digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, digit| acc * f64::from(radix) + f64::from(digit)))
}

fn string(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    let quote = cursor.peek().filter(|c| matches!(c, '"' | '\''))?;
    cursor.bump();
    let mut value = String::new();
    let invalid = |error| Some((TokenKind::Invalid, TokenValue::Invalid(error)));
    loop {
        match cursor.peek() {
            None => return invalid(LexError::UnterminatedString),
            Some(c) if c == quote => {
                cursor.bump();
                return Some((TokenKind::String, TokenValue::String(value)));
            }
            Some(c) if is_line_terminator(c) => return invalid(LexError::UnterminatedString),
            Some('\\') => {
                cursor.bump();
                if let Err(error) = escape(cursor, &mut value) {
                    return invalid(error);
                }
            }
            Some(c) => {
                cursor.bump();
                value.push(c);
            }
        }
    }
}

fn escape(cursor: &mut Cursor<'_>, out: &mut String) -> Result<(), LexError> {
    let Some(c) = cursor.bump() else {
        return Err(LexError::UnterminatedString);
    };
    match c {
        'n' => out.push('\n'),
        't' => out.push('\t'),
        'r' => out.push('\r'),
        'b' => out.push('\u{8}'),
        'f' => out.push('\u{c}'),
        'v' => out.push('\u{b}'),
        '0' => out.push('\0'),
        // line continuation
        '\r' => {
            cursor.eat('\n');
        }
        '\n' | '\u{2028}' | '\u{2029}' => {}
        'x' => {
            let code = fixed_hex(cursor, 2).ok_or(LexError::HexEscape)?;
            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        'u' if cursor.eat('{') => {
            let digits = cursor.rest();
            let len = cursor.eat_while(|c| c.is_ascii_hexdigit());
            if len == 0 || !cursor.eat('}') {
                return Err(LexError::CodePointEscape);
            }
            let digits = digits[..len].trim_start_matches('0');
            let code = u32::from_str_radix(if digits.is_empty() { "0" } else { digits }, 16)
                .ok()
                .filter(|code| *code <= 0x10FFFF)
                .ok_or_else(|| LexError::UndefinedCodePoint(digits.to_ascii_uppercase()))?;
            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        'u' => {
            let unit = fixed_hex(cursor, 4).ok_or(LexError::UnicodeEscape)?;
            out.push(surrogate_aware(cursor, unit));
        }
        other => out.push(other),
    }
    Ok(())
}

fn fixed_hex(cursor: &mut Cursor<'_>, len: usize) -> Option<u32> {
    let digits = cursor.rest().get(..len)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    for _ in 0..len {
        cursor.bump();
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Combines `\uD83D\uDE00`-style pairs; lone surrogates become U+FFFD.
fn surrogate_aware(cursor: &mut Cursor<'_>, unit: u32) -> char {
    if (0xD800..0xDC00).contains(&unit) {
        let mut ahead = *cursor;
        if ahead.eat_str("\\u") {
            if let Some(low) = fixed_hex(&mut ahead, 4).filter(|low| (0xDC00..0xE000).contains(low)) {
                *cursor = ahead;
                let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
            }
        }
    }
    char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn punctuation(cursor: &mut Cursor<'_>) -> Option<(TokenKind, TokenValue)> {
    let rest = cursor.rest();
    let (lexeme, kind, base) = PUNCTUATION
        .iter()
        .copied()
        .filter(|(lexeme, _, _)| rest.starts_with(lexeme))
        // `a?.5:1` is a conditional, not an optional member access
        .find(|(lexeme, _, _)| {
            *lexeme != "?." || !rest[2..].starts_with(|c: char| c.is_ascii_digit())
        })?;
    cursor.eat_str(lexeme);
    Some(match base {
        Some(base) => (kind, TokenValue::Compound(base)),
        None => (kind, TokenValue::None),
    })
}

/// Lazy tokenizer exposing the current token and one token of lookahead.
pub struct Lexer<'de> {
    whole: &'de str,
    cursor: Cursor<'de>,
    rules: Vec<ScanRule>,
    skip: Vec<TokenKind>,
    current: Token<'de>,
    lookahead: Token<'de>,
}

impl<'de> Lexer<'de> {
    pub fn new(input: &'de str) -> Self {
        Self::with_rules(input, DEFAULT_RULES.to_vec())
    }

    pub fn with_rules(input: &'de str, rules: Vec<ScanRule>) -> Self {
        let eof = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            pos: Position::START,
            value: TokenValue::None,
        };
        let mut lexer = Lexer {
            whole: input,
            cursor: Cursor::new(input, Position::START),
            rules,
            skip: Vec::new(),
            current: eof.clone(),
            lookahead: eof,
        };
        lexer.resume(Position::START);
        lexer
    }

    /// Drops tokens of the given kinds from the stream, typically whitespace
    /// and line terminators.
    pub fn skipping(mut self, kinds: &[TokenKind]) -> Self {
        self.skip = kinds.to_vec();
        self.resume(Position::START);
        self
    }

    pub fn whole(&self) -> &'de str {
        self.whole
    }

    pub fn token(&self) -> &Token<'de> {
        &self.current
    }

    pub fn lookahead(&self) -> &Token<'de> {
        &self.lookahead
    }

    /// Returns the current token and advances by one.
    pub fn shift(&mut self) -> Token<'de> {
        let next = self.scan();
        let lookahead = mem::replace(&mut self.lookahead, next);
        mem::replace(&mut self.current, lookahead)
    }

    /// The position of the current token, suitable for [`Lexer::resume`].
    pub fn state(&self) -> Position {
        self.current.pos
    }

    pub fn resume(&mut self, state: Position) {
        self.cursor = Cursor::new(self.whole, state);
        self.current = self.scan();
        self.lookahead = self.scan();
    }

    fn scan(&mut self) -> Token<'de> {
        loop {
            let token = self.scan_one();
            if !self.skip.contains(&token.kind) {
                return token;
            }
        }
    }

    fn scan_one(&mut self) -> Token<'de> {
        let start = self.cursor;
        let pos = start.position();
        if start.peek().is_none() {
            return Token {
                kind: TokenKind::Eof,
                lexeme: "",
                pos,
                value: TokenValue::None,
            };
        }
        for rule in &self.rules {
            let mut cursor = start;
            if let Some((kind, value)) = rule(&mut cursor) {
                if cursor.position().offset > pos.offset {
                    self.cursor = cursor;
                    return Token {
                        kind,
                        lexeme: &self.whole[pos.offset..cursor.position().offset],
                        pos,
                        value,
                    };
                }
            }
        }
        let mut cursor = start;
        cursor.bump();
        self.cursor = cursor;
        Token {
            kind: TokenKind::Unknown,
            lexeme: &self.whole[pos.offset..cursor.position().offset],
            pos,
            value: TokenValue::None,
        }
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Token<'de>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.kind == TokenKind::Eof {
            None
        } else {
            Some(self.shift())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).map(|token| token.kind).collect()
    }

    #[test]
    fn whitespace_runs_are_single_tokens() {
        assert_eq!(
            kinds(" \t1\n\n2"),
            vec![
                TokenKind::Whitespace,
                TokenKind::Number,
                TokenKind::LineTerminator,
                TokenKind::Number
            ]
        );
    }

    #[test]
    fn crlf_counts_as_one_line() {
        let tokens: Vec<_> = Lexer::new("a\r\nb\rc").collect();
        let b = &tokens[2];
        let c = &tokens[4];
        assert_eq!((b.pos.line, b.pos.col), (2, 1));
        assert_eq!((c.pos.line, c.pos.col), (3, 1));
    }

    #[test]
    fn columns_advance_per_character() {
        let tokens: Vec<_> = Lexer::new("ab + 'é'").skipping(&[TokenKind::Whitespace]).collect();
        assert_eq!(tokens[1].pos, Position { line: 1, col: 4, offset: 3 });
        assert_eq!(tokens[2].pos.col, 6);
    }

    #[test]
    fn longest_punctuation_wins() {
        assert_eq!(
            kinds(">>>=>>>...?.??="),
            vec![
                TokenKind::GreaterGreaterGreaterEqual,
                TokenKind::GreaterGreaterGreater,
                TokenKind::Ellipsis,
                TokenKind::QuestionDot,
                TokenKind::QuestionQuestionEqual
            ]
        );
    }

    #[test]
    fn optional_dot_before_digit_is_conditional() {
        assert_eq!(
            kinds("a?.5:1"),
            vec![
                TokenKind::Identifier,
                TokenKind::Question,
                TokenKind::Number,
                TokenKind::Colon,
                TokenKind::Number
            ]
        );
    }

    #[test]
    fn compound_tokens_carry_base_operator() {
        let tokens: Vec<_> = Lexer::new(">>=>>>=").collect();
        assert_eq!(tokens[0].base_operator(), Some(TokenKind::GreaterGreater));
        assert_eq!(tokens[1].base_operator(), Some(TokenKind::GreaterGreaterGreater));
    }

    #[test]
    fn keywords_are_reclassified() {
        assert_eq!(
            kinds("in await true null undefined inside"),
            vec![
                TokenKind::In,
                TokenKind::Whitespace,
                TokenKind::Await,
                TokenKind::Whitespace,
                TokenKind::Boolean,
                TokenKind::Whitespace,
                TokenKind::Null,
                TokenKind::Whitespace,
                TokenKind::Undefined,
                TokenKind::Whitespace,
                TokenKind::Identifier
            ]
        );
    }

    #[test]
    fn unknown_character() {
        let token = Lexer::new("#").shift();
        assert_eq!(token.kind, TokenKind::Unknown);
        assert_eq!(token.lexeme, "#");
    }

    #[test]
    fn resume_rescans_from_saved_state() {
        let mut lexer = Lexer::new("a + b").skipping(&[TokenKind::Whitespace]);
        let state = lexer.state();
        lexer.shift();
        lexer.shift();
        assert_eq!(lexer.token().lexeme, "b");
        lexer.resume(state);
        assert_eq!(lexer.token().lexeme, "a");
        assert_eq!(lexer.lookahead().lexeme, "+");
    }

    #[test]
    fn token_display() {
        let tokens: Vec<String> = Lexer::new("0x1F 'a' (")
            .skipping(&[TokenKind::Whitespace])
            .map(|token| token.to_string())
            .collect();
        assert_eq!(tokens, vec!["NUMBER 0x1F 31", "STRING 'a' a", "LEFT_PAREN ( null"]);
    }
}
