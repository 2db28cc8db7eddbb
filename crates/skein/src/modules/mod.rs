//! Native modules: `sys`, `math` and `asyncio`.
//!
//! These are created on first import and take precedence over the host's module resolver.

pub(crate) mod asyncio;
pub(crate) mod math;
pub(crate) mod sys;

use strum::IntoEnumIterator;

use crate::{
    args::ArgValues,
    builtins::Builtins,
    bytecode::VM,
    exception_private::RunResult,
    heap::HeapId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// A function exported by a native module, stored inline as `Value::Builtin(Builtins::Module(..))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum ModuleFunction {
    Sys(sys::SysFunction),
    Math(math::MathFunction),
    Asyncio(asyncio::AsyncioFunction),
}

impl ModuleFunction {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sys(function) => function.into(),
            Self::Math(function) => function.into(),
            Self::Asyncio(function) => function.into(),
        }
    }

    pub fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: ArgValues,
    ) -> RunResult<Value> {
        match self {
            Self::Sys(function) => sys::call(vm, function, args),
            Self::Math(function) => math::call(vm, function, args),
            Self::Asyncio(function) => asyncio::call(vm, function, args),
        }
    }
}

/// Creates native module `name`, or returns `None` when no such native module exists.
pub(crate) fn create_native<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    name: &str,
) -> RunResult<Option<HeapId>> {
    let id = match name {
        "sys" => sys::create_module(vm)?,
        "math" => math::create_module(vm)?,
        "asyncio" => asyncio::create_module(vm)?,
        _ => return Ok(None),
    };
    Ok(Some(id))
}

/// Binds every variant of a function enum in `module` under its name.
fn export_functions<T, P, Tr, F>(vm: &mut VM<'_, T, P, Tr>, module: HeapId, wrap: fn(F) -> ModuleFunction) -> RunResult<()>
where
    T: ResourceTracker,
    P: PrintWriter,
    Tr: VmTracer,
    F: IntoEnumIterator,
{
    for function in F::iter() {
        let function = wrap(function);
        let name = vm.interns.intern(function.name());
        vm.module_attrs_mut(module)?
            .insert(name, Value::Builtin(Builtins::Module(function)));
    }
    Ok(())
}

/// Binds a constant attribute in `module`.
fn export_value<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    module: HeapId,
    name: &str,
    value: Value,
) -> RunResult<()> {
    let name = vm.interns.intern(name);
    vm.module_attrs_mut(module)?.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names() {
        assert_eq!(ModuleFunction::Math(math::MathFunction::Sqrt).name(), "sqrt");
        assert_eq!(ModuleFunction::Sys(sys::SysFunction::Exit).name(), "exit");
        assert_eq!(ModuleFunction::Asyncio(asyncio::AsyncioFunction::Gather).name(), "gather");
    }
}
