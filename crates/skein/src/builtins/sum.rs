//! `sum()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    expressions::Operator,
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// `sum(iterable, /, start=0)`. Strings are rejected as the start value, as in CPython.
pub fn builtin_sum<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    mut args: ArgValues,
) -> RunResult<Value> {
    let start_kwarg = args.take_kwarg(StaticStrings::Start.id());
    let (iterable, start) = args.get_one_two_args("sum", &vm.interns)?;
    let mut total = start.or(start_kwarg).unwrap_or(Value::Int(0));
    if vm.as_str(total).is_some() {
        return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    if vm.as_bytes(total).is_some() {
        return Err(ExcType::type_error("sum() can't sum bytes [use b''.join(seq) instead]"));
    }
    let iter = vm.get_iter(iterable)?;
    while let Some(item) = vm.next_value(iter)? {
        total = vm.binary_op(total, item, Operator::Add)?;
    }
    Ok(total)
}
