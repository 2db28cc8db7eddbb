//! `sorted()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::RunResult,
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::list::sort_values,
    value::Value,
};

/// `sorted(iterable, *, key=None, reverse=False)`: a new sorted list; the sort is stable.
pub fn builtin_sorted<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    mut args: ArgValues,
) -> RunResult<Value> {
    let key = args.take_kwarg(StaticStrings::Key.id()).unwrap_or(Value::None);
    let reverse = match args.take_kwarg(StaticStrings::Reverse.id()) {
        Some(reverse) => vm.truthy(reverse)?,
        None => false,
    };
    let iterable = args.get_one_arg("sorted", &vm.interns)?;
    let items = vm.collect_iter(iterable)?;
    let sorted = sort_values(vm, items, key, reverse)?;
    vm.new_list(sorted)
}
