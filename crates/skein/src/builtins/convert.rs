//! Conversions to text and identity: `repr()`, `ascii()`, `ord()`, `chr()`, `bin()`/`oct()`/`hex()`,
//! `format()`, `hash()` and `id()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        number::{Number, format_radix},
        str::{ascii_escape, char_len},
    },
    value::Value,
};

pub fn builtin_repr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("repr", &vm.interns)?;
    let text = vm.repr(value)?;
    vm.new_str(text)
}

pub fn builtin_ascii<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("ascii", &vm.interns)?;
    let text = ascii_escape(&vm.repr(value)?);
    vm.new_str(text)
}

pub fn builtin_ord<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("ord", &vm.interns)?;
    if let Some(text) = vm.as_str(value) {
        let mut chars = text.chars();
        return match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
            _ => Err(ExcType::type_error(format!(
                "ord() expected a character, but string of length {} found",
                char_len(text)
            ))),
        };
    }
    if let Some(bytes) = vm.as_bytes(value) {
        return match bytes {
            [byte] => Ok(Value::Int(i64::from(*byte))),
            _ => Err(ExcType::type_error(format!(
                "ord() expected a character, but string of length {} found",
                bytes.len()
            ))),
        };
    }
    Err(ExcType::type_error(format!(
        "ord() expected string of length 1, but {} found",
        vm.type_name(value)
    )))
}

pub fn builtin_chr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("chr", &vm.interns)?;
    let code = vm.expect_int(value)?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ExcType::value_error("chr() arg not in range(0x110000)"))?;
    vm.new_str(c.to_string())
}

/// `bin()`, `oct()` and `hex()`.
pub fn builtin_radix<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
    name: &str,
    radix: u32,
    prefix: &str,
) -> RunResult<Value> {
    let value = args.get_one_arg(name, &vm.interns)?;
    let int = match vm.number(value) {
        Some(Number::Float(_)) | None => return Err(ExcType::type_error_not_integer(&vm.type_name(value))),
        Some(number) => number.to_bigint().unwrap_or_default(),
    };
    vm.new_str(format_radix(&int, radix, prefix))
}

/// `format(value, spec='')`.
pub fn builtin_format<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (value, spec) = args.get_one_two_args("format", &vm.interns)?;
    let spec = match spec {
        None => String::new(),
        Some(spec) => match vm.as_str(spec) {
            Some(text) => text.to_owned(),
            None => {
                return Err(ExcType::type_error(format!(
                    "format() argument 2 must be str, not {}",
                    vm.type_name(spec)
                )));
            }
        },
    };
    let text = vm.format_value(value, &spec)?;
    vm.new_str(text)
}

/// `hash(value)`: a user `__hash__` wins; equal builtin values hash equally.
pub fn builtin_hash<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("hash", &vm.interns)?;
    if let Some(method) = vm.user_special(value, StaticStrings::DunderHash.id())? {
        let result = vm.call_sync(method, ArgValues::empty())?;
        return match result {
            Value::Int(_) | Value::Bool(_) => Ok(result),
            _ => Err(ExcType::type_error("__hash__ method should return an integer")),
        };
    }
    let key = vm.key_of(value)?;
    Ok(Value::Int(key.hash_value()))
}

/// `id(value)`: the heap address for objects, a value-derived positive number for immediates.
pub fn builtin_id<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("id", &vm.interns)?;
    let id = match value {
        Value::Ref(id) => i64::try_from(id.address()).unwrap_or(i64::MAX),
        _ => vm.key_of(value)?.hash_value().checked_abs().unwrap_or(i64::MAX),
    };
    Ok(Value::Int(id.max(1)))
}
