//! `bytes` methods.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const BYTES_METHODS: &[&str] = &[
    "decode",
    "hex",
    "startswith",
    "endswith",
    "find",
    "index",
    "count",
    "upper",
    "lower",
    "strip",
    "split",
    "join",
    "replace",
];

/// Python's `repr(bytes)`.
#[must_use]
pub(crate) fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(char::from(quote));
    for &byte in bytes {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7e => out.push(char::from(byte)),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(char::from(quote));
    out
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn count_sub(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return haystack.len() + 1;
    }
    let mut count = 0;
    let mut rest = haystack;
    while let Some(position) = find_sub(rest, needle) {
        count += 1;
        rest = &rest[position + needle.len()..];
    }
    count
}

fn replace_sub(haystack: &[u8], old: &[u8], new: &[u8]) -> Vec<u8> {
    if old.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(position) = find_sub(rest, old) {
        out.extend_from_slice(&rest[..position]);
        out.extend_from_slice(new);
        rest = &rest[position + old.len()..];
    }
    out.extend_from_slice(rest);
    out
}

fn bytes_arg(vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>, value: Value) -> RunResult<Vec<u8>> {
    vm.as_bytes(value).map(<[u8]>::to_vec).ok_or_else(|| {
        ExcType::type_error(format!("a bytes-like object is required, not '{}'", vm.type_name(value)))
    })
}

/// Calls the `bytes` method `name` on `receiver`.
pub(crate) fn call_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    receiver: Value,
    name: &str,
    args: ArgValues,
) -> RunResult<Value> {
    let data = vm.as_bytes(receiver).unwrap_or_default().to_vec();
    let qualified = format!("bytes.{name}");
    let method = qualified.as_str();
    match name {
        "decode" => {
            let encoding = args.get_zero_one_arg(method, &vm.interns)?;
            let encoding = match encoding {
                Some(value) => vm.as_str(value).unwrap_or("utf-8").to_ascii_lowercase(),
                None => "utf-8".to_owned(),
            };
            match encoding.replace('_', "-").as_str() {
                "utf-8" | "utf8" | "ascii" => match String::from_utf8(data) {
                    Ok(text) if encoding != "ascii" || text.is_ascii() => vm.new_str(text),
                    Ok(_) | Err(_) => Err(ExcType::UnicodeDecodeError.error(format!(
                        "'{}' codec can't decode bytes",
                        if encoding == "ascii" { "ascii" } else { "utf-8" }
                    ))),
                },
                "latin-1" | "latin1" => vm.new_str(data.iter().map(|&b| char::from(b)).collect::<String>()),
                _ => Err(ExcType::LookupError.error(format!("unknown encoding: {encoding}"))),
            }
        }
        "hex" => {
            args.check_zero_args(method, &vm.interns)?;
            let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
            vm.new_str(hex)
        }
        "startswith" | "endswith" => {
            let affix = args.get_one_arg(method, &vm.interns)?;
            let affix = bytes_arg(vm, affix)?;
            let found = if name == "startswith" {
                data.starts_with(&affix)
            } else {
                data.ends_with(&affix)
            };
            Ok(Value::Bool(found))
        }
        "find" | "index" => {
            let needle = args.get_one_arg(method, &vm.interns)?;
            let needle = bytes_arg(vm, needle)?;
            match find_sub(&data, &needle) {
                Some(position) => Ok(Value::Int(i64::try_from(position).unwrap_or(i64::MAX))),
                None if name == "find" => Ok(Value::Int(-1)),
                None => Err(ExcType::value_error("subsection not found")),
            }
        }
        "count" => {
            let needle = args.get_one_arg(method, &vm.interns)?;
            let needle = bytes_arg(vm, needle)?;
            Ok(Value::Int(i64::try_from(count_sub(&data, &needle)).unwrap_or(i64::MAX)))
        }
        "upper" | "lower" => {
            args.check_zero_args(method, &vm.interns)?;
            let converted = if name == "upper" {
                data.to_ascii_uppercase()
            } else {
                data.to_ascii_lowercase()
            };
            vm.new_bytes(converted)
        }
        "strip" => {
            args.check_zero_args(method, &vm.interns)?;
            vm.new_bytes(data.trim_ascii().to_vec())
        }
        "split" => {
            let sep = args.get_zero_one_arg(method, &vm.interns)?;
            let parts: Vec<Vec<u8>> = match sep {
                None | Some(Value::None) => data
                    .split(u8::is_ascii_whitespace)
                    .filter(|part| !part.is_empty())
                    .map(<[u8]>::to_vec)
                    .collect(),
                Some(sep) => {
                    let sep = bytes_arg(vm, sep)?;
                    if sep.is_empty() {
                        return Err(ExcType::value_error("empty separator"));
                    }
                    let mut parts = Vec::new();
                    let mut rest = data.as_slice();
                    while let Some(position) = find_sub(rest, &sep) {
                        parts.push(rest[..position].to_vec());
                        rest = &rest[position + sep.len()..];
                    }
                    parts.push(rest.to_vec());
                    parts
                }
            };
            let items = parts
                .into_iter()
                .map(|part| vm.new_bytes(part))
                .collect::<RunResult<Vec<_>>>()?;
            vm.new_list(items)
        }
        "join" => {
            let iterable = args.get_one_arg(method, &vm.interns)?;
            let items = vm.collect_iter(iterable)?;
            let mut out = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.extend_from_slice(&data);
                }
                match vm.as_bytes(item) {
                    Some(part) => out.extend_from_slice(part),
                    None => {
                        return Err(ExcType::type_error(format!(
                            "sequence item {i}: expected a bytes-like object, {} found",
                            vm.type_name(item)
                        )));
                    }
                }
            }
            vm.new_bytes(out)
        }
        "replace" => {
            let (old, new) = args.get_two_args(method, &vm.interns)?;
            let old = bytes_arg(vm, old)?;
            let new = bytes_arg(vm, new)?;
            vm.new_bytes(replace_sub(&data, &old, &new))
        }
        _ => Err(ExcType::attribute_error("bytes", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_escapes() {
        assert_eq!(bytes_repr(b"abc"), "b'abc'");
        assert_eq!(bytes_repr(b"\x00\n\xff"), "b'\\x00\\n\\xff'");
        assert_eq!(bytes_repr(b"it's"), "b\"it's\"");
    }

    #[test]
    fn searching() {
        assert_eq!(find_sub(b"hello", b"ll"), Some(2));
        assert_eq!(find_sub(b"hello", b"z"), None);
        assert_eq!(count_sub(b"aaaa", b"aa"), 2);
        assert_eq!(replace_sub(b"a-b-c", b"-", b"+"), b"a+b+c".to_vec());
    }
}
