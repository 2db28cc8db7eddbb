//! `min()` and `max()`, which share argument handling.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// `min(iterable, *, key=None, default=...)` or `min(a, b, *args, key=None)`, and likewise `max`.
///
/// The first of several equal extremes wins, as in CPython.
pub fn builtin_min_max<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    mut args: ArgValues,
    is_max: bool,
) -> RunResult<Value> {
    let name = if is_max { "max" } else { "min" };
    let key = args.take_kwarg(StaticStrings::Key.id()).filter(|key| !key.is_none());
    let default = args.take_kwarg(StaticStrings::Default.id());
    args.check_no_kwargs(name, &vm.interns)?;

    let items = match args.positional.len() {
        0 => return Err(ExcType::type_error(format!("{name} expected at least 1 argument, got 0"))),
        1 => vm.collect_iter(args.positional[0])?,
        _ => {
            if default.is_some() {
                return Err(ExcType::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                )));
            }
            args.positional.to_vec()
        }
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match key {
            Some(key) => vm.call_sync(key, ArgValues::one(item))?,
            None => item,
        };
        let replace = match best {
            None => true,
            Some((best_key, _)) if is_max => vm.lt(best_key, item_key)?,
            Some((best_key, _)) => vm.lt(item_key, best_key)?,
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::value_error(format!("{name}() iterable argument is empty"))),
    }
}
