//! Namespace introspection: `dir()`, `vars()`, `globals()` and `locals()`.
//!
//! The returned dicts are snapshots; writing to them does not rebind names.

use indexmap::IndexMap;

use crate::{
    args::ArgValues,
    builtins::Builtins,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub fn builtin_globals<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    args.check_zero_args("globals", &vm.interns)?;
    let globals = vm.frame().globals;
    let attrs = module_attrs(vm, Some(globals));
    vm.namespace_dict(&attrs)
}

pub fn builtin_locals<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    args.check_zero_args("locals", &vm.interns)?;
    let attrs = current_locals(vm);
    vm.namespace_dict(&attrs)
}

/// `vars([obj])`: `obj.__dict__`, or the current locals.
pub fn builtin_vars<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let Some(obj) = args.get_zero_one_arg("vars", &vm.interns)? else {
        let attrs = current_locals(vm);
        return vm.namespace_dict(&attrs);
    };
    if let Value::Ref(id) = obj {
        if matches!(vm.heap.get(id), HeapData::Module(_)) {
            let attrs = module_attrs(vm, Some(id));
            return vm.namespace_dict(&attrs);
        }
    }
    match vm.get_attr(obj, StaticStrings::DunderDict.id()) {
        Err(err) if err.is_exc_type(ExcType::AttributeError) => Err(ExcType::type_error(
            "vars() argument must have __dict__ attribute",
        )),
        result => result,
    }
}

/// `dir([obj])`: the sorted attribute names of `obj`, or of the current scope.
pub fn builtin_dir<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let mut names: Vec<String> = match args.get_zero_one_arg("dir", &vm.interns)? {
        None => current_locals(vm)
            .keys()
            .map(|name| vm.interns.get_str(*name).to_owned())
            .collect(),
        Some(obj) => attribute_names(vm, obj),
    };
    names.sort_unstable();
    names.dedup();
    let mut items = Vec::with_capacity(names.len());
    for name in names {
        items.push(vm.new_str(name)?);
    }
    vm.new_list(items)
}

fn attribute_names<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    obj: Value,
) -> Vec<String> {
    let mut ids: Vec<StringId> = Vec::new();
    let mut methods: &[&str] = &[];
    match obj {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Module(module) => ids.extend(module.attrs.keys()),
            HeapData::Instance(instance) => {
                ids.extend(instance.attrs.keys());
                ids.extend(class_names(vm, instance.class));
                ids.push(StaticStrings::DunderClass.id());
            }
            HeapData::Class(_) => {
                ids.extend(class_names(vm, id));
                ids.push(StaticStrings::DunderClass.id());
            }
            HeapData::Function(func) => {
                ids.extend(func.attrs.keys());
                ids.extend([
                    StaticStrings::DunderName.id(),
                    StaticStrings::DunderQualname.id(),
                    StaticStrings::DunderModule.id(),
                    StaticStrings::DunderDoc.id(),
                ]);
            }
            _ => {
                if let Some(ty) = vm.builtin_type(obj) {
                    methods = ty.methods();
                }
            }
        },
        Value::Builtin(Builtins::Type(ty)) => methods = ty.methods(),
        _ => {
            if let Some(ty) = vm.builtin_type(obj) {
                methods = ty.methods();
            }
        }
    }
    ids.iter()
        .map(|id| vm.interns.get_str(*id).to_owned())
        .chain(methods.iter().map(|name| (*name).to_owned()))
        .collect()
}

/// Names defined along a class's MRO.
fn class_names<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    class: HeapId,
) -> Vec<StringId> {
    vm.class_mro(class)
        .into_iter()
        .flat_map(|base| match vm.heap.get(base) {
            HeapData::Class(object) => object.attrs.keys().copied().collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .collect()
}

fn module_attrs<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    module: Option<HeapId>,
) -> IndexMap<StringId, Value> {
    match module.map(|id| vm.heap.get(id)) {
        Some(HeapData::Module(module)) => module.attrs.clone(),
        _ => IndexMap::new(),
    }
}

/// Bound names of the innermost frame: its namespace for module and class code, else its
/// local and cell variables.
fn current_locals<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
) -> IndexMap<StringId, Value> {
    let frame = vm.frame();
    if let Some(namespace) = frame.namespace {
        return module_attrs(vm, Some(namespace));
    }
    let mut attrs = IndexMap::new();
    for (name, value) in frame.code.varnames.iter().zip(&frame.locals) {
        if !matches!(value, Value::Undefined) {
            attrs.insert(*name, *value);
        }
    }
    for (index, cell) in frame.cells.iter().enumerate() {
        if let HeapData::Cell(value) = vm.heap.get(*cell) {
            if !matches!(value, Value::Undefined) {
                attrs.insert(frame.code.cell_name(index), *value);
            }
        }
    }
    attrs
}
