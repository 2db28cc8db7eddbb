//! Numeric tower arithmetic: `int` (small or big) and `float`.
//!
//! Everything here is pure; the VM converts operands into [`Number`]s, calls these functions and
//! turns the result back into a `Value`, allocating a heap big integer only when the result does
//! not fit in an `i64`.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::{
    exception_private::{ExcType, RunResult},
    expressions::Operator,
};

pub(crate) const INT_METHODS: &[&str] = &["bit_length", "conjugate"];
pub(crate) const FLOAT_METHODS: &[&str] = &["is_integer", "conjugate"];

/// An arithmetic operand.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Number {
    /// Demotes a big integer that fits in an `i64`.
    #[must_use]
    pub fn from_big(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Big(value),
        }
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// The integer value, or `None` for floats.
    #[must_use]
    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(b) => Some(b.clone()),
            Self::Float(_) => None,
        }
    }

    /// # Errors
    /// `OverflowError` for integers beyond the float range.
    pub fn to_f64(&self) -> RunResult<f64> {
        match self {
            #[expect(clippy::cast_precision_loss)]
            Self::Int(i) => Ok(*i as f64),
            Self::Big(b) => b
                .to_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| ExcType::overflow_error("int too large to convert to float")),
            Self::Float(f) => Ok(*f),
        }
    }
}

/// Applies a binary operator, or returns `None` when the operator does not apply to numbers.
pub(crate) fn binary_op(op: Operator, left: &Number, right: &Number) -> RunResult<Option<Number>> {
    use Number::{Big, Float, Int};

    if left.is_float() || right.is_float() {
        return float_op(op, left.to_f64()?, right.to_f64()?);
    }
    if let (Int(a), Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let fast = match op {
            Operator::Add => a.checked_add(b),
            Operator::Sub => a.checked_sub(b),
            Operator::Mult => a.checked_mul(b),
            Operator::BitAnd => Some(a & b),
            Operator::BitOr => Some(a | b),
            Operator::BitXor => Some(a ^ b),
            Operator::FloorDiv if b != 0 => a.checked_div_euclid(b).map(|_| Integer::div_floor(&a, &b)),
            Operator::Mod if b != 0 => a.checked_rem_euclid(b).map(|_| Integer::mod_floor(&a, &b)),
            Operator::RShift if b >= 0 => Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }),
            _ => None,
        };
        if let Some(result) = fast {
            return Ok(Some(Int(result)));
        }
    }

    let (Some(a), Some(b)) = (left.to_bigint(), right.to_bigint()) else {
        return Ok(None);
    };
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b.is_zero() {
                return Err(ExcType::zero_division("division by zero"));
            }
            let (fa, fb) = (Big(a).to_f64()?, Big(b).to_f64()?);
            return Ok(Some(Float(fa / fb)));
        }
        Operator::FloorDiv => {
            if b.is_zero() {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            Integer::div_floor(&a, &b)
        }
        Operator::Mod => {
            if b.is_zero() {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            Integer::mod_floor(&a, &b)
        }
        Operator::Pow => return int_pow(&a, &b).map(Some),
        Operator::LShift => {
            let shift = shift_count(&b)?;
            if a.is_zero() {
                BigInt::zero()
            } else {
                let shift = usize::try_from(shift).map_err(|_| ExcType::overflow_error("too many digits in integer"))?;
                a << shift
            }
        }
        Operator::RShift => {
            let shift = shift_count(&b)?;
            match usize::try_from(shift) {
                Ok(shift) => a >> shift,
                Err(_) => BigInt::from(if a.is_negative() { -1 } else { 0 }),
            }
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::MatMult => return Ok(None),
    };
    Ok(Some(Number::from_big(result)))
}

fn shift_count(count: &BigInt) -> RunResult<u64> {
    if count.is_negative() {
        return Err(ExcType::value_error("negative shift count"));
    }
    Ok(count.to_u64().unwrap_or(u64::MAX))
}

fn int_pow(base: &BigInt, exp: &BigInt) -> RunResult<Number> {
    if exp.is_negative() {
        let fb = Number::Big(base.clone()).to_f64()?;
        let fe = Number::Big(exp.clone()).to_f64()?;
        if fb == 0.0 {
            return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Number::Float(fb.powf(fe)));
    }
    // bases whose powers never grow
    if base.is_zero() || base == &BigInt::from(1) {
        return Ok(Number::from_big(if exp.is_zero() { BigInt::from(1) } else { base.clone() }));
    }
    if base == &BigInt::from(-1) {
        return Ok(Number::Int(if exp.is_even() { 1 } else { -1 }));
    }
    let exp = exp
        .to_u32()
        .ok_or_else(|| ExcType::overflow_error("exponent too large"))?;
    Ok(Number::from_big(num_traits::pow(base.clone(), exp as usize)))
}

/// Python's float `divmod`: the remainder takes the sign of the divisor.
pub(crate) fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem != 0.0 && ((b < 0.0) != (rem < 0.0)) {
        rem += b;
        div -= 1.0;
    }
    let floor = div.floor();
    if div - floor > 0.5 {
        div = floor + 1.0;
    } else {
        div = floor;
    }
    if rem == 0.0 {
        rem = 0.0_f64.copysign(b);
    }
    (div, rem)
}

fn float_op(op: Operator, a: f64, b: f64) -> RunResult<Option<Number>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        Operator::Mod => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            float_divmod(a, b).1
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        _ => return Ok(None),
    };
    Ok(Some(Number::Float(result)))
}

/// Unary minus.
#[must_use]
pub(crate) fn negate(value: &Number) -> Number {
    match value {
        Number::Int(i) => i.checked_neg().map_or_else(|| Number::Big(-BigInt::from(*i)), Number::Int),
        Number::Big(b) => Number::from_big(-b),
        Number::Float(f) => Number::Float(-f),
    }
}

/// `~x`, integers only.
#[must_use]
pub(crate) fn invert(value: &Number) -> Option<Number> {
    match value {
        Number::Int(i) => Some(Number::Int(!i)),
        Number::Big(b) => Some(Number::from_big(-(b + BigInt::from(1)))),
        Number::Float(_) => None,
    }
}

#[must_use]
pub(crate) fn abs(value: &Number) -> Number {
    match value {
        Number::Int(i) => i.checked_abs().map_or_else(|| Number::Big(BigInt::from(*i).abs()), Number::Int),
        Number::Big(b) => Number::Big(b.abs()),
        Number::Float(f) => Number::Float(f.abs()),
    }
}

/// Numeric comparison; `None` when a NaN is involved.
#[must_use]
pub(crate) fn compare(left: &Number, right: &Number) -> Option<Ordering> {
    match (left, right) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
        (Number::Float(a), Number::Float(b)) => a.partial_cmp(b),
        (Number::Float(f), other) => compare_float_int(*f, other),
        (other, Number::Float(f)) => compare_float_int(*f, other).map(Ordering::reverse),
        (a, b) => Some(a.to_bigint()?.cmp(&b.to_bigint()?)),
    }
}

fn compare_float_int(f: f64, int: &Number) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    let int = int.to_bigint()?;
    let floor = BigInt::from_f64(f.floor())?;
    match floor.cmp(&int) {
        Ordering::Equal if f.fract() != 0.0 => Some(Ordering::Greater),
        other => Some(other),
    }
}

/// Parses the argument of `int(text, base)`.
pub(crate) fn parse_int(text: &str, base: u32) -> RunResult<Number> {
    let invalid = || ExcType::value_error(format!("invalid literal for int() with base {base}: '{text}'"));
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (base, _) => (base, lower.as_str()),
    };
    if body.is_empty() || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    let value = BigInt::parse_bytes(cleaned.as_bytes(), radix).ok_or_else(invalid)?;
    Ok(Number::from_big(if negative { -value } else { value }))
}

/// Parses the argument of `float(text)`.
pub(crate) fn parse_float(text: &str) -> RunResult<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    let special = match unsigned {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(value) = special {
        return Ok(if lower.starts_with('-') { -value } else { value });
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|_| !trimmed.is_empty() && !trimmed.contains("__"))
        .ok_or_else(|| ExcType::value_error(format!("could not convert string to float: '{text}'")))
}

/// `hex`, `oct` and `bin` formatting: sign, prefix, then digits.
#[must_use]
pub(crate) fn format_radix(value: &BigInt, radix: u32, prefix: &str) -> String {
    let digits = value.magnitude().to_str_radix(radix);
    if value.is_negative() {
        format!("-{prefix}{digits}")
    } else {
        format!("{prefix}{digits}")
    }
}

/// `int.bit_length()`.
#[must_use]
pub(crate) fn bit_length(value: &BigInt) -> u64 {
    value.magnitude().bits()
}

/// `divmod(a, b)` for numbers.
pub(crate) fn divmod(left: &Number, right: &Number) -> RunResult<(Number, Number)> {
    if left.is_float() || right.is_float() {
        let (a, b) = (left.to_f64()?, right.to_f64()?);
        if b == 0.0 {
            return Err(ExcType::zero_division("float divmod()"));
        }
        let (div, rem) = float_divmod(a, b);
        return Ok((Number::Float(div), Number::Float(rem)));
    }
    let quotient = binary_op(Operator::FloorDiv, left, right)?;
    let remainder = binary_op(Operator::Mod, left, right)?;
    match (quotient, remainder) {
        (Some(q), Some(r)) => Ok((q, r)),
        _ => Err(ExcType::type_error("unsupported operand type(s) for divmod()")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op: Operator, a: Number, b: Number) -> Number {
        binary_op(op, &a, &b).unwrap().unwrap()
    }

    #[test]
    fn overflow_promotes_and_demotes() {
        let big = op(Operator::Mult, Number::Int(i64::MAX), Number::Int(2));
        assert!(matches!(big, Number::Big(_)));
        let back = op(Operator::FloorDiv, big, Number::Int(2));
        assert_eq!(back, Number::Int(i64::MAX));
        assert!(matches!(negate(&Number::Int(i64::MIN)), Number::Big(_)));
    }

    #[test]
    fn floor_semantics() {
        assert_eq!(op(Operator::FloorDiv, Number::Int(-7), Number::Int(2)), Number::Int(-4));
        assert_eq!(op(Operator::Mod, Number::Int(-7), Number::Int(2)), Number::Int(1));
        assert_eq!(op(Operator::Mod, Number::Int(7), Number::Int(-2)), Number::Int(-1));
        assert_eq!(op(Operator::Mod, Number::Float(-7.5), Number::Float(2.0)), Number::Float(0.5));
        assert_eq!(op(Operator::FloorDiv, Number::Float(7.0), Number::Float(-2.0)), Number::Float(-4.0));
    }

    #[test]
    fn true_division_is_float() {
        assert_eq!(op(Operator::Div, Number::Int(7), Number::Int(2)), Number::Float(3.5));
        assert_eq!(op(Operator::Div, Number::Int(4), Number::Int(2)), Number::Float(2.0));
    }

    #[test]
    fn zero_division_messages() {
        let err = binary_op(Operator::Div, &Number::Int(1), &Number::Int(0)).unwrap_err();
        assert!(err.is_exc_type(ExcType::ZeroDivisionError));
        let err = binary_op(Operator::Mod, &Number::Int(1), &Number::Int(0)).unwrap_err();
        assert!(err.is_exc_type(ExcType::ArithmeticError));
    }

    #[test]
    fn powers() {
        assert_eq!(op(Operator::Pow, Number::Int(2), Number::Int(10)), Number::Int(1024));
        assert_eq!(op(Operator::Pow, Number::Int(2), Number::Int(-1)), Number::Float(0.5));
        assert!(matches!(op(Operator::Pow, Number::Int(2), Number::Int(100)), Number::Big(_)));
    }

    #[test]
    fn mixed_comparisons() {
        assert_eq!(compare(&Number::Int(1), &Number::Float(1.5)), Some(Ordering::Less));
        assert_eq!(compare(&Number::Float(2.0), &Number::Int(2)), Some(Ordering::Equal));
        assert_eq!(compare(&Number::Float(f64::NAN), &Number::Int(2)), None);
        assert_eq!(compare(&Number::Float(-0.5), &Number::Int(-1)), Some(Ordering::Greater));
    }

    #[test]
    fn parsing() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), Number::Int(42));
        assert_eq!(parse_int("-ff", 16).unwrap(), Number::Int(-255));
        assert_eq!(parse_int("0b101", 0).unwrap(), Number::Int(5));
        assert_eq!(parse_int("1_000", 10).unwrap(), Number::Int(1000));
        assert!(parse_int("abc", 10).is_err());
        assert_eq!(parse_float("2.5").unwrap(), 2.5);
        assert!(parse_float("-inf").unwrap().is_infinite());
        assert!(parse_float("x").is_err());
    }

    #[test]
    fn radix_formatting() {
        assert_eq!(format_radix(&BigInt::from(255), 16, "0x"), "0xff");
        assert_eq!(format_radix(&BigInt::from(-5), 2, "0b"), "-0b101");
    }
}
