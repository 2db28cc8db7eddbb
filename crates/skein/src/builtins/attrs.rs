//! Reflection: `getattr()`, `setattr()`, `hasattr()`, `delattr()`, `callable()`, `isinstance()`
//! and `issubclass()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    intern::StringId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Interns an attribute name argument, rejecting non-strings like CPython.
fn attr_name<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    func: &str,
    name: Value,
) -> RunResult<StringId> {
    vm.intern_value(name).ok_or_else(|| {
        ExcType::type_error(format!(
            "{func}(): attribute name must be string, not '{}'",
            vm.type_name(name)
        ))
    })
}

/// `getattr(obj, name[, default])`: the default replaces an `AttributeError` only.
pub fn builtin_getattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let values = args.get_range("getattr", 2, 3, &vm.interns)?;
    let name = attr_name(vm, "getattr", values[1])?;
    match (vm.get_attr(values[0], name), values.get(2)) {
        (Err(err), Some(default)) if err.is_exc_type(ExcType::AttributeError) => Ok(*default),
        (result, _) => result,
    }
}

pub fn builtin_setattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (obj, name, value) = args.get_three_args("setattr", &vm.interns)?;
    let name = attr_name(vm, "setattr", name)?;
    vm.set_attr(obj, name, value)?;
    Ok(Value::None)
}

pub fn builtin_hasattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("hasattr", &vm.interns)?;
    let name = attr_name(vm, "hasattr", name)?;
    Ok(Value::Bool(vm.has_attr(obj, name)?))
}

pub fn builtin_delattr<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("delattr", &vm.interns)?;
    let name = attr_name(vm, "delattr", name)?;
    vm.del_attr(obj, name)?;
    Ok(Value::None)
}

pub fn builtin_callable<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("callable", &vm.interns)?;
    Ok(Value::Bool(vm.is_callable(value)))
}

pub fn builtin_isinstance<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (value, classinfo) = args.get_two_args("isinstance", &vm.interns)?;
    Ok(Value::Bool(vm.isinstance(value, classinfo)?))
}

pub fn builtin_issubclass<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (class, classinfo) = args.get_two_args("issubclass", &vm.interns)?;
    Ok(Value::Bool(vm.issubclass(class, classinfo)?))
}
