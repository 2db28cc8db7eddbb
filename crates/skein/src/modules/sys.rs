//! The `sys` module.
//!
//! - `argv`: the host-supplied argument list (`RunOptions::argv`)
//! - `stdout` / `stderr`: stream objects writing to the host `PrintWriter`
//! - `modules`: a live dict of every imported module
//! - `version`, `platform`, `maxsize`
//! - `exit([code])`: raises `SystemExit`

use strum::{EnumIter, IntoStaticStr};

use super::{ModuleFunction, export_functions, export_value};
use crate::{
    args::ArgValues,
    builtins::{Builtins, Stream},
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    heap::HeapId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const VERSION: &str = concat!("3.12.0 (skein ", env!("CARGO_PKG_VERSION"), ")");
pub(crate) const PLATFORM: &str = "skein";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum SysFunction {
    Exit,
}

pub(super) fn create_module<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
) -> RunResult<HeapId> {
    let module = vm.new_module("sys")?;
    export_functions(vm, module, ModuleFunction::Sys)?;

    let argv = vm.argv.clone();
    let mut items = Vec::with_capacity(argv.len());
    for arg in argv {
        items.push(vm.new_str(arg)?);
    }
    let argv = vm.new_list(items)?;
    export_value(vm, module, "argv", argv)?;
    export_value(vm, module, "stdout", Value::Builtin(Builtins::Stream(Stream::Stdout)))?;
    export_value(vm, module, "stderr", Value::Builtin(Builtins::Stream(Stream::Stderr)))?;
    let version = vm.new_str(VERSION)?;
    export_value(vm, module, "version", version)?;
    let platform = vm.new_str(PLATFORM)?;
    export_value(vm, module, "platform", platform)?;
    export_value(vm, module, "maxsize", Value::Int(i64::MAX))?;

    let modules = vm.build_dict(Vec::new())?;
    let loaded: Vec<(String, HeapId)> = vm.modules.iter().map(|(name, id)| (name.clone(), *id)).collect();
    for (name, id) in loaded {
        let key = vm.new_str(name)?;
        vm.dict_set(modules, key, Value::Ref(id))?;
    }
    vm.sys_modules = modules.ref_id();
    export_value(vm, module, "modules", modules)?;
    Ok(module)
}

pub(super) fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    function: SysFunction,
    args: ArgValues,
) -> RunResult<Value> {
    match function {
        SysFunction::Exit => {
            let code = args.get_zero_one_arg("exit", &vm.interns)?;
            let exc = vm.new_exception_with_args(ExcType::SystemExit, code.into_iter().collect())?;
            Err(vm.raise_value(Value::Ref(exc)))
        }
    }
}
