//! `str` methods and string helpers.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "casefold",
    "swapcase",
    "title",
    "capitalize",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "rsplit",
    "splitlines",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "rfind",
    "index",
    "rindex",
    "count",
    "format",
    "isdigit",
    "isdecimal",
    "isnumeric",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
    "isidentifier",
    "center",
    "ljust",
    "rjust",
    "zfill",
    "partition",
    "rpartition",
    "removeprefix",
    "removesuffix",
    "encode",
];

/// Python's `repr(str)`.
#[must_use]
pub(crate) fn str_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if u32::from(c) < 0x20 || u32::from(c) == 0x7f => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `ascii()`: like [`str_repr`] with non-ASCII characters escaped.
#[must_use]
pub(crate) fn ascii_escape(repr: &str) -> String {
    let mut out = String::with_capacity(repr.len());
    for c in repr.chars() {
        let code = u32::from(c);
        if code < 0x80 {
            out.push(c);
        } else if code <= 0xff {
            out.push_str(&format!("\\x{code:02x}"));
        } else if code <= 0xffff {
            out.push_str(&format!("\\u{code:04x}"));
        } else {
            out.push_str(&format!("\\U{code:08x}"));
        }
    }
    out
}

/// Number of chars, which is what `len(str)` reports.
#[must_use]
pub(crate) fn char_len(text: &str) -> usize {
    if text.is_ascii() { text.len() } else { text.chars().count() }
}

/// Byte offset of char index `index`, clamped to the end.
#[must_use]
pub(crate) fn byte_offset(text: &str, index: usize) -> usize {
    if text.is_ascii() {
        return index.min(text.len());
    }
    text.char_indices().nth(index).map_or(text.len(), |(offset, _)| offset)
}

/// `str.split` with no separator: runs of whitespace, ignoring leading and trailing whitespace.
#[must_use]
pub(crate) fn split_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|max| parts.len() == max) {
            parts.push(rest.to_owned());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_owned());
        rest = rest[end..].trim_start();
    }
    parts
}

fn rsplit_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|max| parts.len() == max) {
            parts.push(rest.to_owned());
            break;
        }
        let start = rest.rfind(char::is_whitespace).map_or(0, |i| i + rest[i..].chars().next().map_or(1, char::len_utf8));
        parts.push(rest[start..].to_owned());
        rest = rest[..start].trim_end();
    }
    parts.reverse();
    parts
}

/// `str.splitlines`.
#[must_use]
pub(crate) fn split_lines(text: &str, keepends: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\r' if chars.peek().is_some_and(|(_, next)| *next == '\n') => {
                chars.next();
                i + 2
            }
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}' => {
                i + c.len_utf8()
            }
            _ => continue,
        };
        lines.push(if keepends { &text[start..end] } else { &text[start..i] }.to_owned());
        start = end;
    }
    if start < text.len() {
        lines.push(text[start..].to_owned());
    }
    lines
}

/// `str.title`: uppercase after any non-letter, lowercase otherwise.
#[must_use]
pub(crate) fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn swap_case(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            if c.is_uppercase() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                c.to_uppercase().collect::<Vec<_>>()
            }
        })
        .collect()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c == '_' || c.is_alphabetic()) && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Pads `text` to `width` chars.
fn pad(text: &str, width: usize, fill: char, align: Align) -> String {
    let len = char_len(text);
    if width <= len {
        return text.to_owned();
    }
    let total = width - len;
    let before = match align {
        Align::Left => 0,
        Align::Right => total,
        // the odd fill char goes left only when the width is odd too
        Align::Center => total / 2 + (total & width & 1),
    };
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat_n(fill, before));
    out.push_str(text);
    out.extend(std::iter::repeat_n(fill, total - before));
    out
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

/// `str.zfill`.
#[must_use]
pub(crate) fn zfill(text: &str, width: usize) -> String {
    let len = char_len(text);
    if width <= len {
        return text.to_owned();
    }
    let (sign, digits) = match text.chars().next() {
        Some(c @ ('+' | '-')) => (Some(c), &text[1..]),
        _ => (None, text),
    };
    let mut out = String::with_capacity(width);
    out.extend(sign);
    out.extend(std::iter::repeat_n('0', width - len));
    out.push_str(digits);
    out
}

/// Non-overlapping occurrences of `sub`; an empty `sub` matches between every char.
#[must_use]
pub(crate) fn count_occurrences(text: &str, sub: &str) -> usize {
    if sub.is_empty() {
        char_len(text) + 1
    } else {
        text.matches(sub).count()
    }
}

/// Calls the `str` method `name` on `receiver`.
pub(crate) fn call_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    receiver: Value,
    name: &str,
    args: ArgValues,
) -> RunResult<Value> {
    let text = vm.as_str(receiver).unwrap_or_default().to_owned();
    let qualified = format!("str.{name}");
    let method = qualified.as_str();
    match name {
        "upper" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_str(text.to_uppercase())
        }
        "lower" | "casefold" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_str(text.to_lowercase())
        }
        "swapcase" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_str(swap_case(&text))
        }
        "title" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_str(title_case(&text))
        }
        "capitalize" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_str(capitalize(&text))
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.get_zero_one_arg(method, &vm.interns)?;
            let chars = optional_str(vm, chars, method)?;
            let matcher = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(c));
            let stripped = match name {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            };
            vm.new_str(stripped)
        }
        "split" | "rsplit" => split(vm, &text, name == "rsplit", args),
        "splitlines" => {
            let keepends = args.get_zero_one_arg(method, &vm.interns)?;
            let keepends = match keepends {
                Some(value) => vm.truthy(value)?,
                None => false,
            };
            let lines = split_lines(&text, keepends);
            str_list(vm, lines)
        }
        "join" => {
            let iterable = args.get_one_arg(method, &vm.interns)?;
            let items = vm.collect_iter(iterable)?;
            let mut out = String::new();
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(&text);
                }
                match vm.as_str(item) {
                    Some(part) => out.push_str(part),
                    None => {
                        let type_name = vm.type_name(item);
                        return Err(ExcType::type_error(format!(
                            "sequence item {i}: expected str instance, {type_name} found"
                        )));
                    }
                }
            }
            vm.new_str(out)
        }
        "replace" => {
            let parts = args.get_range(method, 2, 3, &vm.interns)?;
            let old = expect_str(vm, parts[0], method)?;
            let new = expect_str(vm, parts[1], method)?;
            let count = match parts.get(2) {
                Some(value) => vm.expect_int(*value)?,
                None => -1,
            };
            let replaced = match usize::try_from(count) {
                Ok(count) => text.replacen(&old, &new, count),
                Err(_) => text.replace(&old, &new),
            };
            vm.new_str(replaced)
        }
        "startswith" | "endswith" => {
            let parts = args.get_range(method, 1, 3, &vm.interns)?;
            let (start, end) = bounds(vm, &text, parts.get(1).copied(), parts.get(2).copied())?;
            let window = &text[start..end];
            let candidates = match vm.as_str(parts[0]) {
                Some(prefix) => vec![prefix.to_owned()],
                None => {
                    let items = vm.tuple_items(parts[0]).ok_or_else(|| {
                        ExcType::type_error(format!(
                            "{name} first arg must be str or a tuple of str, not {}",
                            vm.type_name(parts[0])
                        ))
                    })?;
                    items
                        .into_iter()
                        .map(|item| expect_str(vm, item, method))
                        .collect::<RunResult<Vec<_>>>()?
                }
            };
            let found = candidates.iter().any(|candidate| {
                if name == "startswith" {
                    window.starts_with(candidate.as_str())
                } else {
                    window.ends_with(candidate.as_str())
                }
            });
            Ok(Value::Bool(found))
        }
        "find" | "rfind" | "index" | "rindex" => {
            let parts = args.get_range(method, 1, 3, &vm.interns)?;
            let sub = expect_str(vm, parts[0], method)?;
            let (start, end) = bounds(vm, &text, parts.get(1).copied(), parts.get(2).copied())?;
            let window = &text[start..end];
            let found = if name.starts_with('r') { window.rfind(&sub) } else { window.find(&sub) };
            match found {
                Some(offset) => {
                    let index = char_len(&text[..start + offset]);
                    Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX)))
                }
                None if name.ends_with("find") => Ok(Value::Int(-1)),
                None => Err(ExcType::value_error("substring not found")),
            }
        }
        "count" => {
            let parts = args.get_range(method, 1, 3, &vm.interns)?;
            let sub = expect_str(vm, parts[0], method)?;
            let (start, end) = bounds(vm, &text, parts.get(1).copied(), parts.get(2).copied())?;
            let count = count_occurrences(&text[start..end], &sub);
            Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
        }
        "format" => {
            let formatted = vm.format_template(&text, &args.positional, &args.kwargs)?;
            vm.new_str(formatted)
        }
        "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower"
        | "isidentifier" => {
            args.check_zero_args(method, &vm.interns)?;
            let all = |predicate: fn(char) -> bool| !text.is_empty() && text.chars().all(predicate);
            let result = match name {
                "isdigit" | "isdecimal" => all(|c| c.is_ascii_digit()),
                "isnumeric" => all(char::is_numeric),
                "isalpha" => all(char::is_alphabetic),
                "isalnum" => all(char::is_alphanumeric),
                "isspace" => all(char::is_whitespace),
                "isupper" => text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase),
                "islower" => text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase),
                _ => is_identifier(&text),
            };
            Ok(Value::Bool(result))
        }
        "center" | "ljust" | "rjust" => {
            let (width, fill) = args.get_one_two_args(method, &vm.interns)?;
            let width = usize::try_from(vm.expect_int(width)?).unwrap_or(0);
            let fill = match fill {
                Some(value) => {
                    let fill = expect_str(vm, value, method)?;
                    let mut chars = fill.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => c,
                        _ => {
                            return Err(ExcType::type_error(
                                "The fill character must be exactly one character long",
                            ));
                        }
                    }
                }
                None => ' ',
            };
            let align = match name {
                "center" => Align::Center,
                "ljust" => Align::Left,
                _ => Align::Right,
            };
            vm.new_str(pad(&text, width, fill, align))
        }
        "zfill" => {
            let width = args.get_one_arg(method, &vm.interns)?;
            let width = usize::try_from(vm.expect_int(width)?).unwrap_or(0);
            vm.new_str(zfill(&text, width))
        }
        "partition" | "rpartition" => {
            let sep = args.get_one_arg(method, &vm.interns)?;
            let sep = expect_str(vm, sep, method)?;
            if sep.is_empty() {
                return Err(ExcType::value_error("empty separator"));
            }
            let found = if name == "partition" { text.find(&sep) } else { text.rfind(&sep) };
            let parts = match found {
                Some(i) => [text[..i].to_owned(), sep.clone(), text[i + sep.len()..].to_owned()],
                None if name == "partition" => [text.clone(), String::new(), String::new()],
                None => [String::new(), String::new(), text.clone()],
            };
            let items = parts
                .into_iter()
                .map(|part| vm.new_str(part))
                .collect::<RunResult<Vec<_>>>()?;
            vm.new_tuple(items)
        }
        "removeprefix" | "removesuffix" => {
            let affix = args.get_one_arg(method, &vm.interns)?;
            let affix = expect_str(vm, affix, method)?;
            let trimmed = if name == "removeprefix" {
                text.strip_prefix(affix.as_str())
            } else {
                text.strip_suffix(affix.as_str())
            };
            vm.new_str(trimmed.unwrap_or(&text))
        }
        "encode" => {
            let encoding = args.get_zero_one_arg(method, &vm.interns)?;
            let encoding = optional_str(vm, encoding, method)?.unwrap_or_else(|| "utf-8".to_owned());
            match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
                "utf-8" | "utf8" => vm.new_bytes(text.into_bytes()),
                "ascii" => {
                    if let Some((position, c)) = text.chars().enumerate().find(|(_, c)| !c.is_ascii()) {
                        return Err(ExcType::value_error(format!(
                            "'ascii' codec can't encode character '\\u{:04x}' in position {position}: ordinal not in range(128)",
                            u32::from(c)
                        )));
                    }
                    vm.new_bytes(text.into_bytes())
                }
                _ => Err(ExcType::LookupError.error(format!("unknown encoding: {encoding}"))),
            }
        }
        _ => Err(ExcType::attribute_error("str", name)),
    }
}

fn split(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    text: &str,
    from_right: bool,
    mut args: ArgValues,
) -> RunResult<Value> {
    let method = if from_right { "str.rsplit" } else { "str.split" };
    let sep_kw = vm.interns.lookup("sep").and_then(|id| args.take_kwarg(id));
    let max_kw = vm.interns.lookup("maxsplit").and_then(|id| args.take_kwarg(id));
    let (sep, maxsplit) = args.get_zero_one_two_args(method, &vm.interns)?;
    let sep = optional_str(vm, sep.or(sep_kw), method)?;
    let maxsplit = match maxsplit.or(max_kw) {
        Some(value) => usize::try_from(vm.expect_int(value)?).ok(),
        None => None,
    };
    let parts = match sep {
        None if from_right => rsplit_whitespace(text, maxsplit),
        None => split_whitespace(text, maxsplit),
        Some(sep) if sep.is_empty() => return Err(ExcType::value_error("empty separator")),
        Some(sep) => match (maxsplit, from_right) {
            (Some(max), false) => text.splitn(max + 1, sep.as_str()).map(str::to_owned).collect(),
            (Some(max), true) => {
                let mut parts: Vec<String> = text.rsplitn(max + 1, sep.as_str()).map(str::to_owned).collect();
                parts.reverse();
                parts
            }
            (None, _) => text.split(sep.as_str()).map(str::to_owned).collect(),
        },
    };
    str_list(vm, parts)
}

fn str_list(vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>, parts: Vec<String>) -> RunResult<Value> {
    let items = parts
        .into_iter()
        .map(|part| vm.new_str(part))
        .collect::<RunResult<Vec<_>>>()?;
    vm.new_list(items)
}

fn expect_str(
    vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    value: Value,
    method: &str,
) -> RunResult<String> {
    vm.as_str(value).map(str::to_owned).ok_or_else(|| {
        ExcType::type_error(format!("{method}() argument must be str, not {}", vm.type_name(value)))
    })
}

fn optional_str(
    vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    value: Option<Value>,
    method: &str,
) -> RunResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => expect_str(vm, value, method).map(Some),
    }
}

/// Resolves optional `start`/`end` char indices to a byte range.
fn bounds(
    vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    text: &str,
    start: Option<Value>,
    end: Option<Value>,
) -> RunResult<(usize, usize)> {
    let len = i64::try_from(char_len(text)).unwrap_or(i64::MAX);
    let resolve = |value: Option<Value>, default: i64| -> RunResult<usize> {
        let index = match value {
            None | Some(Value::None) => default,
            Some(value) => vm.expect_int(value)?,
        };
        let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
        Ok(byte_offset(text, usize::try_from(index).unwrap_or(0)))
    };
    let start = resolve(start, 0)?;
    let end = resolve(end, len)?;
    Ok((start, end.max(start)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn repr_picks_quotes() {
        assert_eq!(str_repr("hi"), "'hi'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\"b'c"), "'a\"b\\'c'");
        assert_eq!(str_repr("tab\there\n"), "'tab\\there\\n'");
        assert_eq!(ascii_escape(&str_repr("é")), "'\\xe9'");
    }

    #[test]
    fn whitespace_splitting() {
        assert_eq!(split_whitespace("  a  b c ", None), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", Some(1)), vec!["a", "b c"]);
        assert_eq!(rsplit_whitespace("a b c", Some(1)), vec!["a b", "c"]);
        assert!(split_whitespace("   ", None).is_empty());
    }

    #[test]
    fn lines() {
        assert_eq!(split_lines("a\nb\r\nc", false), vec!["a", "b", "c"]);
        assert_eq!(split_lines("a\nb\n", true), vec!["a\n", "b\n"]);
    }

    #[test]
    fn casing() {
        assert_eq!(title_case("hello world-wide"), "Hello World-Wide");
        assert_eq!(capitalize("hELLO"), "Hello");
        assert_eq!(swap_case("aB"), "Ab");
    }

    #[test]
    fn padding() {
        assert_eq!(pad("ab", 5, '*', Align::Center), "**ab*");
        assert_eq!(pad("abc", 6, '*', Align::Center), "*abc**");
        assert_eq!(pad("abc", 2, '*', Align::Left), "abc");
        assert_eq!(zfill("-42", 5), "-0042");
    }

    #[test]
    fn char_offsets() {
        assert_eq!(char_len("héllo"), 5);
        assert_eq!(byte_offset("héllo", 2), 3);
        assert_eq!(count_occurrences("aaaa", "aa"), 2);
        assert_eq!(count_occurrences("abc", ""), 4);
    }
}
