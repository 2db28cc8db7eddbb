//! F-string parts and the format-specification mini-language.
//!
//! The parser turns `f"..."` literals into [`FStringPart`]s. At runtime the VM resolves each
//! field to a primitive and formats it here, so `format()`, `str.format` and f-strings share
//! one implementation of `[[fill]align][sign][#][0][width][,|_][.precision][type]`.

use std::fmt;

use num_bigint::{BigInt, Sign as BigSign};
use num_traits::{Signed, ToPrimitive, Zero};

use crate::expressions::ExprLoc;

/// One piece of an f-string.
#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<ExprLoc>,
        conversion: Conversion,
        /// Format spec, which may itself contain nested fields.
        spec: Vec<FStringPart>,
        /// Source text (including `=`) for `{expr=}` debug fields.
        debug: Option<String>,
    },
}

/// `!s`, `!r` or `!a` applied before formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Conversion {
    #[default]
    None,
    Str,
    Repr,
    Ascii,
}

impl Conversion {
    /// Packs the conversion into the low bits of a `FormatValue` operand.
    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Str => 1,
            Self::Repr => 2,
            Self::Ascii => 3,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::Str,
            2 => Self::Repr,
            3 => Self::Ascii,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FormatError {
    ValueError(String),
    Overflow(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueError(msg) | Self::Overflow(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Align {
    Left,
    Right,
    Center,
    /// `=`: padding goes between the sign and the digits.
    AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SignMode {
    #[default]
    Negative,
    Always,
    Space,
}

/// A parsed format spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormatSpec {
    pub fill: char,
    pub align: Option<Align>,
    pub sign: SignMode,
    pub alternate: bool,
    pub zero_pad: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: SignMode::Negative,
            alternate: false,
            zero_pad: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn parse_align(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<Self, FormatError> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = Self::default();
        let mut i = 0;
        if chars.len() >= 2
            && let Some(align) = parse_align(chars[1])
        {
            out.fill = chars[0];
            out.align = Some(align);
            i = 2;
        } else if let Some(align) = chars.first().copied().and_then(parse_align) {
            out.align = Some(align);
            i = 1;
        }
        match chars.get(i) {
            Some('+') => {
                out.sign = SignMode::Always;
                i += 1;
            }
            Some('-') => i += 1,
            Some(' ') => {
                out.sign = SignMode::Space;
                i += 1;
            }
            _ => {}
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero_pad = true;
            i += 1;
        }
        let width_start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > width_start {
            out.width = parse_number(&chars[width_start..i])?;
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let precision_start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == precision_start {
                return Err(FormatError::ValueError("Format specifier missing precision".to_owned()));
            }
            out.precision = Some(parse_number(&chars[precision_start..i])?);
        }
        if let Some(&c) = chars.get(i) {
            out.ty = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err(FormatError::ValueError("Invalid format specifier".to_owned()));
        }
        Ok(out)
    }

    /// Pads `body` to the requested width. `sign` is kept left of `=` padding.
    fn pad(&self, sign: &str, body: &str, default_align: Align) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let padding = self.width - len;
        let (fill, align) = if self.zero_pad && self.align.is_none() {
            ('0', Align::AfterSign)
        } else {
            (self.fill, self.align.unwrap_or(default_align))
        };
        let fill_str = |n: usize| fill.to_string().repeat(n);
        match align {
            Align::Left => format!("{sign}{body}{}", fill_str(padding)),
            Align::Right => format!("{}{sign}{body}", fill_str(padding)),
            Align::Center => {
                let left = padding / 2;
                format!("{}{sign}{body}{}", fill_str(left), fill_str(padding - left))
            }
            Align::AfterSign => format!("{sign}{}{body}", fill_str(padding)),
        }
    }

    fn sign_prefix(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, SignMode::Always) => "+",
            (false, SignMode::Space) => " ",
            (false, SignMode::Negative) => "",
        }
    }
}

fn parse_number(digits: &[char]) -> Result<usize, FormatError> {
    digits
        .iter()
        .collect::<String>()
        .parse()
        .map_err(|_| FormatError::ValueError("Too many decimal digits in format string".to_owned()))
}

/// Formats a string value (`s` or no type).
pub(crate) fn format_str(value: &str, spec: &FormatSpec) -> Result<String, FormatError> {
    match spec.ty {
        None | Some('s') => {}
        Some(ty) => {
            return Err(FormatError::ValueError(format!(
                "Unknown format code '{ty}' for object of type 'str'"
            )));
        }
    }
    if spec.sign != SignMode::Negative {
        return Err(FormatError::ValueError("Sign not allowed in string format specifier".to_owned()));
    }
    if spec.align == Some(Align::AfterSign) {
        return Err(FormatError::ValueError(
            "'=' alignment not allowed in string format specifier".to_owned(),
        ));
    }
    let truncated: String = match spec.precision {
        Some(p) => value.chars().take(p).collect(),
        None => value.to_owned(),
    };
    Ok(spec.pad("", &truncated, Align::Left))
}

/// Inserts a grouping separator every `every` digits, counting from the right.
fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

/// Formats an integer for `d`, `b`, `o`, `x`, `X`, `c`, `n` or a float type.
pub(crate) fn format_int(value: &BigInt, spec: &FormatSpec) -> Result<String, FormatError> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        let float = value
            .to_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| FormatError::Overflow("int too large to convert to float".to_owned()))?;
        return format_float(float, spec);
    }
    if spec.precision.is_some() {
        return Err(FormatError::ValueError(
            "Precision not allowed in integer format specifier".to_owned(),
        ));
    }
    let magnitude = value.abs();
    let (prefix, digits) = match ty {
        'd' | 'n' => ("", magnitude.to_str_radix(10)),
        'b' => ("0b", magnitude.to_str_radix(2)),
        'o' => ("0o", magnitude.to_str_radix(8)),
        'x' => ("0x", magnitude.to_str_radix(16)),
        'X' => ("0X", magnitude.to_str_radix(16).to_uppercase()),
        'c' => {
            let code = value
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| FormatError::Overflow("%c arg not in range(0x110000)".to_owned()))?;
            return Ok(spec.pad("", &code.to_string(), Align::Left));
        }
        other => {
            return Err(FormatError::ValueError(format!(
                "Unknown format code '{other}' for object of type 'int'"
            )));
        }
    };
    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, if ty == 'd' || ty == 'n' { 3 } else { 4 }),
        None => digits,
    };
    let sign = spec.sign_prefix(value.sign() == BigSign::Minus);
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(spec.pad(&format!("{sign}{prefix}"), &digits, Align::Right))
}

/// Converts Rust's `1.5e3` exponent form into Python's `1.5e+03`.
fn python_exponent(text: &str, upper: bool) -> String {
    let Some((mantissa, exp)) = text.split_once('e') else {
        return text.to_owned();
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exp.abs())
}

fn strip_trailing_zeros(text: &str) -> String {
    let (mantissa, exp) = match text.find(['e', 'E']) {
        Some(idx) => text.split_at(idx),
        None => (text, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{exp}")
}

/// `g`-style formatting of a finite, non-negative value with `precision` significant digits.
fn format_general(value: f64, precision: usize, alternate: bool, upper: bool, min_fraction: bool) -> String {
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let exp: i32 = sci.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0);
    let p = i32::try_from(precision).unwrap_or(i32::MAX);
    let text = if -4 <= exp && exp < p {
        let decimals = usize::try_from(p - 1 - exp).unwrap_or(0);
        format!("{value:.decimals$}")
    } else {
        python_exponent(&sci, upper)
    };
    let mut text = if alternate { text } else { strip_trailing_zeros(&text) };
    if min_fraction && !text.contains(['.', 'e', 'E', 'n', 'i']) {
        text.push_str(".0");
    }
    text
}

/// Formats a float for `e`, `f`, `g`, `%` (and uppercase variants) or no type.
pub(crate) fn format_float(value: f64, spec: &FormatSpec) -> Result<String, FormatError> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = spec.ty.is_some_and(|c| c.is_ascii_uppercase());
    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if upper { text.to_uppercase() } else { text.to_owned() }
    } else {
        match spec.ty {
            Some('f' | 'F') => format!("{magnitude:.*}", spec.precision.unwrap_or(6)),
            Some('e' | 'E') => python_exponent(&format!("{magnitude:.*e}", spec.precision.unwrap_or(6)), upper),
            Some('g' | 'G') => format_general(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper, false),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(p) => format_general(magnitude, p, spec.alternate, false, true),
                None => float_repr(magnitude),
            },
            Some(other) => {
                return Err(FormatError::ValueError(format!(
                    "Unknown format code '{other}' for object of type 'float'"
                )));
            }
        }
    };
    let body = match spec.grouping {
        Some(sep) if magnitude.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            let (int_part, rest) = body.split_at(split);
            format!("{}{rest}", group_digits(int_part, sep, 3))
        }
        _ => body,
    };
    Ok(spec.pad(spec.sign_prefix(negative), &body, Align::Right))
}

/// Python's `repr(float)`: the shortest string that round-trips.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    let text = buffer.format_finite(value);
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (mantissa, exp_part) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = format!("{int_part}{frac_part}");
    let leading_zeros = all_digits.len() - all_digits.trim_start_matches('0').len();
    let digits = all_digits.trim_start_matches('0').trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };
    let exponent = i32::try_from(int_part.len()).unwrap_or(0) - 1 + exp_part - i32::try_from(leading_zeros).unwrap_or(0);

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exponent) {
        if exponent >= 0 {
            let int_len = usize::try_from(exponent).unwrap_or(0) + 1;
            if digits.len() <= int_len {
                out.push_str(digits);
                out.push_str(&"0".repeat(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat(usize::try_from(-exponent - 1).unwrap_or(0)));
            out.push_str(digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{sign}{:02}", exponent.abs()));
    }
    out
}

/// A reference to an argument inside a `str.format` field: `{0}`, `{name}`, `{}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldName {
    Auto,
    Index(usize),
    Keyword(String),
}

/// `.attr` or `[key]` accessors following a field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldAccess {
    Attr(String),
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TemplatePart {
    Literal(String),
    Field {
        name: FieldName,
        accessors: Vec<FieldAccess>,
        conversion: Conversion,
        /// Raw spec text; nested `{}` fields are substituted before parsing.
        spec: String,
    },
}

/// Parses a `str.format` template.
pub(crate) fn parse_template(template: &str) -> Result<Vec<TemplatePart>, FormatError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(FormatError::ValueError(
                    "Single '}' encountered in format string".to_owned(),
                ));
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                let mut field = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        Some('{') => {
                            depth += 1;
                            field.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            field.push('}');
                        }
                        Some(c) => field.push(c),
                        None => {
                            return Err(FormatError::ValueError(
                                "expected '}' before end of string".to_owned(),
                            ));
                        }
                    }
                }
                parts.push(parse_field(&field)?);
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

fn parse_field(field: &str) -> Result<TemplatePart, FormatError> {
    let (head, spec) = match field.find(':') {
        Some(idx) if !field[..idx].contains('[') || field[..idx].contains(']') => {
            (&field[..idx], field[idx + 1..].to_owned())
        }
        _ => (field, String::new()),
    };
    let (head, conversion) = match head.rsplit_once('!') {
        Some((name, conv)) => {
            let conversion = match conv {
                "s" => Conversion::Str,
                "r" => Conversion::Repr,
                "a" => Conversion::Ascii,
                _ => {
                    return Err(FormatError::ValueError(
                        "Unknown conversion specifier".to_owned(),
                    ));
                }
            };
            (name, conversion)
        }
        None => (head, Conversion::None),
    };
    let name_end = head.find(['.', '[']).unwrap_or(head.len());
    let (name_text, mut rest) = head.split_at(name_end);
    let name = if name_text.is_empty() {
        FieldName::Auto
    } else if let Ok(index) = name_text.parse() {
        FieldName::Index(index)
    } else {
        FieldName::Keyword(name_text.to_owned())
    };
    let mut accessors = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            accessors.push(FieldAccess::Attr(after[..end].to_owned()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| FormatError::ValueError("Missing ']' in format string".to_owned()))?;
            let key = &after[..end];
            accessors.push(match key.parse() {
                Ok(index) => FieldAccess::Index(index),
                Err(_) => FieldAccess::Key(key.to_owned()),
            });
            rest = &after[end + 1..];
        } else {
            return Err(FormatError::ValueError(
                "Only '.' or '[' may follow ']' in format field specifier".to_owned(),
            ));
        }
    }
    Ok(TemplatePart::Field {
        name,
        accessors,
        conversion,
        spec,
    })
}

/// One `%` directive in a printf-style format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PercentPart {
    Literal(String),
    Directive {
        /// `%(name)s` mapping key.
        key: Option<String>,
        spec: FormatSpec,
        conversion: char,
    },
}

/// Parses a printf-style template such as `"%-5s|%05.1f"`.
pub(crate) fn parse_percent(template: &str) -> Result<Vec<PercentPart>, FormatError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        if !literal.is_empty() {
            parts.push(PercentPart::Literal(std::mem::take(&mut literal)));
        }
        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some(c) => name.push(c),
                    None => return Err(FormatError::ValueError("incomplete format key".to_owned())),
                }
            }
            key = Some(name);
        }
        let mut spec = FormatSpec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.align = Some(Align::Left),
                '+' => spec.sign = SignMode::Always,
                ' ' => {
                    if spec.sign == SignMode::Negative {
                        spec.sign = SignMode::Space;
                    }
                }
                '#' => spec.alternate = true,
                '0' => spec.zero_pad = true,
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        if !width.is_empty() {
            spec.width = width
                .parse()
                .map_err(|_| FormatError::ValueError("width too big".to_owned()))?;
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                precision.push(d);
                chars.next();
            }
            spec.precision = Some(precision.parse().unwrap_or(0));
        }
        if spec.align == Some(Align::Left) {
            spec.zero_pad = false;
        }
        let conversion = chars
            .next()
            .ok_or_else(|| FormatError::ValueError("incomplete format".to_owned()))?;
        if !"sradiufFeEgGxXoc".contains(conversion) {
            return Err(FormatError::ValueError(format!(
                "unsupported format character '{conversion}' (0x{:x})",
                u32::from(conversion)
            )));
        }
        parts.push(PercentPart::Directive { key, spec, conversion });
    }
    if !literal.is_empty() {
        parts.push(PercentPart::Literal(literal));
    }
    Ok(parts)
}

/// Rounds half to even at `ndigits` decimal places, as `round(x, n)` does.
///
/// Ties are judged on the exact binary value, so `round(2.675, 2)` is `2.67`.
pub(crate) fn round_float(value: f64, ndigits: i64) -> f64 {
    if !value.is_finite() || ndigits > 308 {
        return value;
    }
    if ndigits < -308 {
        return 0.0 * value.signum();
    }
    if let Ok(precision) = usize::try_from(ndigits) {
        return format!("{value:.precision$}").parse().unwrap_or(value);
    }
    let scale = 10f64.powi(i32::try_from(-ndigits).unwrap_or(0));
    let scaled = value / scale;
    let mut rounded = scaled.round();
    if (scaled - scaled.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded -= scaled.signum();
    }
    let result = rounded * scale;
    if result.is_finite() { result } else { value }
}

/// Banker's rounding of an integer at a negative number of digits, e.g. `round(1250, -2)`.
pub(crate) fn round_int(value: &BigInt, ndigits: i64) -> BigInt {
    if ndigits >= 0 {
        return value.clone();
    }
    let Ok(exp) = u32::try_from(-ndigits) else {
        return BigInt::zero();
    };
    let scale = num_traits::pow(BigInt::from(10), exp as usize);
    let half = &scale / 2;
    let remainder = num_integer::Integer::mod_floor(value, &scale);
    let base = value - &remainder;
    match remainder.cmp(&half) {
        std::cmp::Ordering::Less => base,
        std::cmp::Ordering::Greater => base + scale,
        std::cmp::Ordering::Equal => {
            let quotient = num_integer::Integer::div_floor(&base, &scale);
            if num_integer::Integer::is_even(&quotient) {
                base
            } else {
                base + scale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn float(value: f64, spec: &str) -> String {
        format_float(value, &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    fn int(value: i64, spec: &str) -> String {
        format_int(&BigInt::from(value), &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123456.0), "123456.0");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(1e22), "1e+22");
        assert_eq!(float_repr(3.14), "3.14");
    }

    #[test]
    fn float_specs() {
        assert_eq!(float(3.14159, ".2f"), "3.14");
        assert_eq!(float(3.14159, "8.3f"), "   3.142");
        assert_eq!(float(-3.5, "08.2f"), "-0003.50");
        assert_eq!(float(1234567.891, ",.2f"), "1,234,567.89");
        assert_eq!(float(0.256, ".1%"), "25.6%");
        assert_eq!(float(12345.678, "e"), "1.234568e+04");
        assert_eq!(float(0.00001234, "g"), "1.234e-05");
        assert_eq!(float(1.0, ".3"), "1.0");
        assert_eq!(float(2.5, ""), "2.5");
    }

    #[test]
    fn int_specs() {
        assert_eq!(int(42, "5d"), "   42");
        assert_eq!(int(42, "<5"), "42   ");
        assert_eq!(int(42, "^6"), "  42  ");
        assert_eq!(int(255, "x"), "ff");
        assert_eq!(int(255, "#X"), "0XFF");
        assert_eq!(int(5, "08b"), "00000101");
        assert_eq!(int(-42, "+d"), "-42");
        assert_eq!(int(42, "+d"), "+42");
        assert_eq!(int(1_234_567, ","), "1,234,567");
        assert_eq!(int(7, "*>4"), "***7");
        assert_eq!(int(3, ".2f"), "3.00");
    }

    #[test]
    fn str_specs() {
        let spec = FormatSpec::parse("-^9").unwrap();
        assert_eq!(format_str("abc", &spec).unwrap(), "---abc---");
        let spec = FormatSpec::parse(".2").unwrap();
        assert_eq!(format_str("abcdef", &spec).unwrap(), "ab");
        assert!(format_str("x", &FormatSpec::parse("d").unwrap()).is_err());
    }

    #[test]
    fn templates() {
        let parts = parse_template("{} and {name!r:>5} {{x}} {0[1].real}").unwrap();
        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[2],
            TemplatePart::Field {
                name: FieldName::Keyword("name".to_owned()),
                accessors: Vec::new(),
                conversion: Conversion::Repr,
                spec: ">5".to_owned(),
            }
        );
        assert_eq!(parts[3], TemplatePart::Literal(" {x} ".to_owned()));
        assert_eq!(
            parts[4],
            TemplatePart::Field {
                name: FieldName::Index(0),
                accessors: vec![FieldAccess::Index(1), FieldAccess::Attr("real".to_owned())],
                conversion: Conversion::None,
                spec: String::new(),
            }
        );
        assert!(parse_template("oops }").is_err());
    }

    #[test]
    fn percent_templates() {
        let parts = parse_percent("%-5s|%05.1f%%").unwrap();
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], PercentPart::Directive { conversion: 's', .. }));
        assert_eq!(parts[3], PercentPart::Literal("%".to_owned()));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_float(3.14159, 2), 3.14);
        assert_eq!(round_float(2.5, 0), 2.0);
        assert_eq!(round_float(3.5, 0), 4.0);
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(0.125, 2), 0.12);
        assert_eq!(round_float(-1.5, 0), -2.0);
        assert_eq!(round_float(1250.0, -2), 1200.0);
        assert_eq!(round_float(1350.0, -2), 1400.0);
        assert_eq!(round_int(&BigInt::from(1250), -2), BigInt::from(1200));
        assert_eq!(round_int(&BigInt::from(1350), -2), BigInt::from(1400));
    }
}
