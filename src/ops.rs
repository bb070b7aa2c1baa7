//! Operator semantics shared by the compiler and the builtins: coercions,
//! equality, ordering and arithmetic on [`Value`]s.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, UnaryOp};
use crate::lex::{is_line_terminator, is_whitespace};
use crate::value::Value;

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let sign = if n < 0.0 { "-" } else { "" };
    // `{:e}` yields the shortest round-tripping digits, e.g. `1.2345e3`.
    let formatted = format!("{:e}", n.abs());
    let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let exp = point - 1;
        let exp_sign = if exp < 0 { '-' } else { '+' };
        let (head, tail) = digits.split_at(1);
        if tail.is_empty() {
            format!("{head}e{exp_sign}{}", exp.abs())
        } else {
            format!("{head}.{tail}e{exp_sign}{}", exp.abs())
        }
    };
    format!("{sign}{body}")
}

/// Numeric value of a string: blank is zero, anything malformed is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(|c| is_whitespace(c) || is_line_terminator(c));
    if s.is_empty() {
        return 0.0;
    }

    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        return digits.chars().try_fold(0.0, |acc, c| {
            c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
        })
        .unwrap_or(f64::NAN);
    }

    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Keeps Rust's own spellings (`inf`, `nan`) out of reach.
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// Reference values collapse to their string form; primitives stay as they are.
pub fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Promise(_) => {
            Value::from(value.to_string())
        }
        other => other.clone(),
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::String(s) => string_to_number(s),
        Value::Array(_) => string_to_number(&value.to_string()),
        Value::Object(_) | Value::Function(_) | Value::Promise(_) => f64::NAN,
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// `===`
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
        (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
        (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
        (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
        _ => false,
    }
}

/// Strict equality where NaN equals itself.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn is_reference(value: &Value) -> bool {
    matches!(
        value,
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Promise(_)
    )
}

/// `==`
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(x), Value::String(s)) | (Value::String(s), Value::Number(x)) => {
            *x == string_to_number(s)
        }
        (Value::Boolean(x), other) | (other, Value::Boolean(x)) if !matches!(other, Value::Boolean(_)) => {
            loose_equals(&Value::Number(f64::from(u8::from(*x))), other)
        }
        (x, y) if is_reference(x) && !is_reference(y) => loose_equals(&to_primitive(x), y),
        (x, y) if !is_reference(x) && is_reference(y) => loose_equals(x, &to_primitive(y)),
        _ => strict_equals(a, b),
    }
}

/// Relational ordering; `None` when either side is NaN after coercion.
/// Strings compare by UTF-16 code units.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (to_primitive(a), to_primitive(b)) {
        (Value::String(a), Value::String(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
        (a, b) => to_number(&a).partial_cmp(&to_number(&b)),
    }
}

/// `+`: concatenation when either primitive is a string, addition otherwise.
pub fn add(a: &Value, b: &Value) -> Value {
    let (a, b) = (to_primitive(a), to_primitive(b));
    match (&a, &b) {
        (Value::String(_), _) | (_, Value::String(_)) => Value::from(format!("{a}{b}")),
        _ => Value::Number(to_number(&a) + to_number(&b)),
    }
}

pub fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Membership as tested by `in`: elements of an array, substrings of a
/// string, keys of an object. `inherited` extends key lookup to prototypes.
pub fn contains(container: &Value, item: &Value, inherited: bool) -> bool {
    match container {
        Value::Array(array) => array.items().iter().any(|element| strict_equals(element, item)),
        Value::String(s) => s.contains(&*item.to_string()),
        Value::Object(object) => {
            let key = item.to_string();
            if key == "__proto__" {
                false
            } else if inherited {
                object.has(&key)
            } else {
                object.has_own(&key)
            }
        }
        _ => false,
    }
}

/// Applies a binary operator to two evaluated operands. `&&` and `||` pick an
/// operand without short-circuiting; `in` checks own keys only.
pub fn binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    let num = |x: &Value| to_number(x);
    match op {
        BinaryOp::Add => add(a, b),
        BinaryOp::Sub => Value::Number(num(a) - num(b)),
        BinaryOp::Mul => Value::Number(num(a) * num(b)),
        BinaryOp::Div => Value::Number(num(a) / num(b)),
        BinaryOp::Rem => Value::Number(num(a) % num(b)),
        BinaryOp::Pow => Value::Number(pow(num(a), num(b))),
        BinaryOp::Shl => {
            Value::from(to_int32(num(a)).wrapping_shl(to_uint32(num(b)) & 31))
        }
        BinaryOp::Shr => {
            Value::from(to_int32(num(a)).wrapping_shr(to_uint32(num(b)) & 31))
        }
        BinaryOp::UShr => Value::Number(f64::from(
            to_uint32(num(a)).wrapping_shr(to_uint32(num(b)) & 31),
        )),
        BinaryOp::BitAnd => Value::from(to_int32(num(a)) & to_int32(num(b))),
        BinaryOp::BitXor => Value::from(to_int32(num(a)) ^ to_int32(num(b))),
        BinaryOp::BitOr => Value::from(to_int32(num(a)) | to_int32(num(b))),
        BinaryOp::Lt => Value::from(compare(a, b) == Some(Ordering::Less)),
        BinaryOp::Le => Value::from(matches!(
            compare(a, b),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::from(compare(a, b) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::from(matches!(
            compare(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => Value::from(loose_equals(a, b)),
        BinaryOp::Ne => Value::from(!loose_equals(a, b)),
        BinaryOp::StrictEq => Value::from(strict_equals(a, b)),
        BinaryOp::StrictNe => Value::from(!strict_equals(a, b)),
        BinaryOp::In => Value::from(contains(b, a, false)),
        BinaryOp::And => (if truthy(a) { b } else { a }).clone(),
        BinaryOp::Or => (if truthy(a) { a } else { b }).clone(),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::from(!truthy(operand)),
        UnaryOp::BitNot => Value::from(!to_int32(to_number(operand))),
        UnaryOp::Plus => Value::Number(to_number(operand)),
        UnaryOp::Minus => Value::Number(-to_number(operand)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn formats_numbers_like_javascript() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(123456789.0), "123456789");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e22), "1.5e+22");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn parses_numeric_strings() {
        assert_eq!(string_to_number("  42\n"), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number(".5"), 0.5);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("1_000").is_nan());
        assert!(string_to_number("0x").is_nan());
    }

    #[test]
    fn abstract_equality() {
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &num(0.0)));
        assert!(loose_equals(&num(1.0), &Value::from("1")));
        assert!(loose_equals(&Value::from(true), &Value::from("1")));
        assert!(loose_equals(&Value::from(vec![1]), &Value::from("1")));
        assert!(!loose_equals(&num(f64::NAN), &num(f64::NAN)));
        assert!(!strict_equals(&num(1.0), &Value::from("1")));
        assert!(strict_equals(&num(0.0), &num(-0.0)));
    }

    #[test]
    fn relational_comparison() {
        assert_eq!(binary(BinaryOp::Lt, &Value::from("a"), &Value::from("b")), Value::from(true));
        assert_eq!(binary(BinaryOp::Lt, &Value::from("10"), &num(9.0)), Value::from(false));
        assert_eq!(binary(BinaryOp::Le, &Value::Undefined, &num(0.0)), Value::from(false));
        assert_eq!(binary(BinaryOp::Ge, &Value::Null, &num(0.0)), Value::from(true));
    }

    #[test]
    fn arithmetic_and_bitwise() {
        assert_eq!(binary(BinaryOp::Add, &num(1.0), &Value::from("2")), Value::from("12"));
        assert_eq!(binary(BinaryOp::Sub, &Value::from("5"), &num(2.0)), num(3.0));
        assert_eq!(binary(BinaryOp::Rem, &num(-5.0), &num(3.0)), num(-2.0));
        assert_eq!(binary(BinaryOp::Shl, &num(1.0), &num(33.0)), num(2.0));
        assert_eq!(binary(BinaryOp::Shr, &num(-8.0), &num(1.0)), num(-4.0));
        assert_eq!(binary(BinaryOp::UShr, &num(-1.0), &num(0.0)), num(4294967295.0));
        assert_eq!(binary(BinaryOp::BitOr, &num(4294967297.0), &num(0.0)), num(1.0));
        assert_eq!(unary(UnaryOp::BitNot, &num(5.0)), num(-6.0));
        assert_eq!(binary(BinaryOp::Pow, &num(1.0), &num(f64::NAN)), num(f64::NAN));
        assert_eq!(binary(BinaryOp::Pow, &num(f64::NAN), &num(0.0)), num(1.0));
    }

    #[test]
    fn membership() {
        let list = Value::from(vec![1, 2]);
        assert!(contains(&list, &num(2.0), false));
        assert!(!contains(&list, &Value::from("2"), false));
        assert!(contains(&Value::from("hello"), &Value::from("ell"), false));
        let object = Value::from(serde_json::json!({"a": 1}));
        assert!(contains(&object, &Value::from("a"), false));
        assert!(!contains(&object, &Value::from("__proto__"), true));
        assert!(!contains(&num(1.0), &num(1.0), true));
    }

    #[test]
    fn logical_operators_pick_an_operand() {
        assert_eq!(binary(BinaryOp::And, &num(0.0), &num(2.0)), num(0.0));
        assert_eq!(binary(BinaryOp::Or, &Value::from(""), &Value::from("x")), Value::from("x"));
    }
}
