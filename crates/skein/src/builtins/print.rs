//! `print()` and `input()`.

use crate::{
    args::ArgValues,
    builtins::{Builtins, Stream},
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// `print(*values, sep=' ', end='\n', file=None, flush=False)`.
///
/// `file` may be `sys.stdout`, `sys.stderr` or any object with a `write` method.
pub fn builtin_print<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    mut args: ArgValues,
) -> RunResult<Value> {
    let sep = optional_text(vm, args.take_kwarg(StaticStrings::Sep.id()), "sep")?;
    let end = optional_text(vm, args.take_kwarg(StaticStrings::End.id()), "end")?;
    let file = args.take_kwarg(StaticStrings::File.id()).filter(|file| !file.is_none());
    let flush = match args.take_kwarg(StaticStrings::Flush.id()) {
        Some(flush) => vm.truthy(flush)?,
        None => false,
    };
    args.check_no_kwargs("print", &vm.interns)?;

    let mut output = String::new();
    for (index, value) in args.positional.iter().enumerate() {
        if index > 0 {
            output.push_str(sep.as_deref().unwrap_or(" "));
        }
        output.push_str(&vm.py_str(*value)?);
    }
    output.push_str(end.as_deref().unwrap_or("\n"));

    match file {
        None | Some(Value::Builtin(Builtins::Stream(Stream::Stdout))) => vm.print.stdout_write(output.into())?,
        Some(Value::Builtin(Builtins::Stream(Stream::Stderr))) => vm.print.stderr_write(output.into())?,
        Some(target) => {
            let text = vm.new_str(output)?;
            let write = vm.interns.intern("write");
            vm.call_method(target, write, ArgValues::one(text))?;
            return Ok(Value::None);
        }
    }
    if flush {
        vm.print.flush()?;
    }
    Ok(Value::None)
}

/// A `sep`/`end` keyword: `None` means the default.
fn optional_text<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    value: Option<Value>,
    name: &str,
) -> RunResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => match vm.as_str(value) {
            Some(text) => Ok(Some(text.to_owned())),
            None => Err(ExcType::type_error(format!(
                "{name} must be None or a string, not {}",
                vm.type_name(value)
            ))),
        },
    }
}

/// `input(prompt='')`: writes the prompt, then reads one line from the host without its newline.
pub fn builtin_input<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    if let Some(prompt) = args.get_zero_one_arg("input", &vm.interns)? {
        let prompt = vm.py_str(prompt)?;
        vm.print.stdout_write(prompt.into())?;
        vm.print.flush()?;
    }
    match vm.print.read_line()? {
        Some(mut line) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            vm.new_str(line)
        }
        None => Err(ExcType::EOFError.error("EOF when reading a line")),
    }
}
