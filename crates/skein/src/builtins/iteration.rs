//! `len()`, `iter()`, `next()`, `all()` and `any()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub fn builtin_len<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("len", &vm.interns)?;
    let len = vm.len(value)?;
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

pub fn builtin_iter<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("iter", &vm.interns)?;
    vm.get_iter(value)
}

/// `next(iterator[, default])`: `StopIteration` when exhausted and no default is given.
pub fn builtin_next<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (iter, default) = args.get_one_two_args("next", &vm.interns)?;
    if !vm.is_iterator(iter)? {
        return Err(ExcType::type_error(format!(
            "'{}' object is not an iterator",
            vm.type_name(iter)
        )));
    }
    if let Some(id) = vm.generator_id(iter) {
        let held: Vec<Value> = default.into_iter().collect();
        return match vm.generator_next(id, &held) {
            Err(err) if err.is_exc_type(ExcType::StopIteration) => default.ok_or(err),
            result => result,
        };
    }
    match (vm.next_value(iter)?, default) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::stop_iteration()),
    }
}

pub fn builtin_all<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let iterable = args.get_one_arg("all", &vm.interns)?;
    let iter = vm.get_iter(iterable)?;
    while let Some(item) = vm.next_value(iter)? {
        if !vm.truthy(item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn builtin_any<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let iterable = args.get_one_arg("any", &vm.interns)?;
    let iter = vm.get_iter(iterable)?;
    while let Some(item) = vm.next_value(iter)? {
        if vm.truthy(item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}
