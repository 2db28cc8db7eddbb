//! A minimal `asyncio` for eagerly evaluated coroutines.
//!
//! Calling an `async def` function runs its body to completion and `await` passes the result
//! through, so `run` and `gather` only need to hand back the values they receive.

use strum::{EnumIter, IntoStaticStr};

use super::{ModuleFunction, export_functions};
use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    heap::HeapId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum AsyncioFunction {
    Run,
    Gather,
    Sleep,
}

pub(super) fn create_module<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
) -> RunResult<HeapId> {
    let module = vm.new_module("asyncio")?;
    export_functions(vm, module, ModuleFunction::Asyncio)?;
    Ok(module)
}

pub(super) fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    function: AsyncioFunction,
    mut args: ArgValues,
) -> RunResult<Value> {
    match function {
        AsyncioFunction::Run => args.get_one_arg("run", &vm.interns),
        AsyncioFunction::Gather => {
            args.take_kwarg(vm.interns.intern("return_exceptions"));
            args.check_no_kwargs("gather", &vm.interns)?;
            vm.new_list(args.positional.into_vec())
        }
        AsyncioFunction::Sleep => {
            let result = args.take_kwarg(vm.interns.intern("result"));
            let (delay, positional_result) = args.get_one_two_args("sleep", &vm.interns)?;
            if vm.number(delay).is_none() {
                return Err(ExcType::type_error(format!(
                    "'{}' object cannot be interpreted as a number",
                    vm.type_name(delay)
                )));
            }
            Ok(positional_result.or(result).unwrap_or(Value::None))
        }
    }
}
