//! `class` statements, `isinstance` and `issubclass`.

use std::rc::Rc;

use indexmap::IndexMap;

use super::{FrameKind, VM};
use crate::{
    args::ArgValues,
    builtins::Builtins,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{ClassObject, Module, Type, class::c3_linearize},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `BuildClass`: runs the class body in a fresh namespace and creates the class from it.
    pub(super) fn build_class(&mut self, body: Value, name: Value, bases: Value) -> RunResult<Value> {
        let Value::InternString(name) = name else {
            return Err(RunError::internal("class name is not an interned string"));
        };
        let Some(func) = body.ref_id() else {
            return Err(RunError::internal("class body is not a function"));
        };
        let bases = self.class_bases(bases)?;

        let namespace = self.alloc(HeapData::Module(Module::new(name)))?;
        let mut frame = self.function_frame(func, ArgValues::empty(), FrameKind::ClassBody)?;
        frame.namespace = Some(namespace);
        let code = Rc::clone(&frame.code);
        let cells = frame.cells.clone();
        let globals = frame.globals;
        let depth = self.frames.len();
        self.push_frame(frame)?;
        let mut held = vec![body];
        held.extend(bases.iter().map(|base| Value::Ref(*base)));
        self.with_roots(&held, |vm| vm.run_frames(depth))?;

        let attrs = match self.heap.get_mut(namespace) {
            HeapData::Module(module) => {
                let mut attrs = std::mem::take(&mut module.attrs);
                attrs.retain(|_, value| !matches!(value, Value::Undefined));
                attrs
            }
            _ => return Err(RunError::internal("class namespace is not a module")),
        };
        let module = match self.module_get(globals, StaticStrings::DunderName.id()) {
            Some(value) => self.intern_value(value),
            None => None,
        };
        let qualname = if code.qualname.is_empty() {
            self.interns.get_str(name).to_owned()
        } else {
            code.qualname.clone()
        };

        let class = self.create_class(name, qualname, module, bases, attrs)?;
        if let Some(index) = code
            .cellvars
            .iter()
            .position(|cell| *cell == StaticStrings::DunderClass.id())
        {
            if let HeapData::Cell(slot) = self.heap.get_mut(cells[index]) {
                *slot = Value::Ref(class);
            }
        }
        tracing::trace!(class = self.interns.get_str(name), "class created");
        Ok(Value::Ref(class))
    }

    /// Allocates a class and computes its MRO.
    pub(crate) fn create_class(
        &mut self,
        name: StringId,
        qualname: String,
        module: Option<StringId>,
        bases: Vec<HeapId>,
        attrs: IndexMap<StringId, Value>,
    ) -> RunResult<HeapId> {
        let class = self.alloc(HeapData::Class(ClassObject {
            name,
            qualname,
            module,
            bases: bases.clone(),
            mro: Vec::new(),
            attrs,
            exc_type: None,
        }))?;
        let base_mros: Vec<Vec<HeapId>> = bases.iter().map(|base| self.class_mro(*base)).collect();
        let mro = match c3_linearize(class, &bases, &base_mros) {
            Ok(mro) => mro,
            Err(blocked) => {
                let names: Vec<String> = blocked.iter().map(|base| self.class_name(*base)).collect();
                return Err(ExcType::type_error(format!(
                    "Cannot create a consistent method resolution order (MRO) for bases {}",
                    names.join(", ")
                )));
            }
        };
        let exc_type = mro.iter().skip(1).find_map(|id| match self.heap.get(*id) {
            HeapData::Class(base) => base.exc_type,
            _ => None,
        });
        if let HeapData::Class(object) = self.heap.get_mut(class) {
            object.mro = mro;
            object.exc_type = exc_type;
        }
        Ok(class)
    }

    /// Validates the bases of a `class` statement; no bases means `object`.
    pub(crate) fn class_bases(&self, bases: Value) -> RunResult<Vec<HeapId>> {
        let values = self.tuple_items(bases).unwrap_or_default();
        let mut ids = Vec::with_capacity(values.len().max(1));
        for base in values {
            match base {
                Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => {
                    if ids.contains(&id) {
                        return Err(ExcType::type_error(format!("duplicate base class {}", self.class_name(id))));
                    }
                    ids.push(id);
                }
                Value::Builtin(Builtins::Type(ty)) => {
                    return Err(ExcType::type_error(format!(
                        "subclassing builtin type '{ty}' is not supported"
                    )));
                }
                other => {
                    return Err(ExcType::type_error(format!(
                        "bases must be types, not '{}'",
                        self.type_name(other)
                    )));
                }
            }
        }
        if ids.is_empty() {
            ids.push(self.object_class);
        }
        Ok(ids)
    }

    /// `isinstance(value, classinfo)`, where `classinfo` may be a tuple.
    pub(crate) fn isinstance(&self, value: Value, classinfo: Value) -> RunResult<bool> {
        if let Some(options) = self.tuple_items(classinfo) {
            for option in options {
                if self.isinstance(value, option)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        match classinfo {
            Value::Builtin(Builtins::Type(ty)) => {
                Ok(self.builtin_type(value).is_some_and(|actual| actual.is_subtype_of(ty)))
            }
            Value::Ref(class) if matches!(self.heap.get(class), HeapData::Class(_)) => {
                if class == self.object_class {
                    return Ok(true);
                }
                Ok(self
                    .instance_class(value)
                    .is_some_and(|actual| self.class_mro(actual).contains(&class)))
            }
            _ => Err(ExcType::type_error(
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            )),
        }
    }

    /// `issubclass(class, classinfo)`.
    pub(crate) fn issubclass(&self, class: Value, classinfo: Value) -> RunResult<bool> {
        if let Some(options) = self.tuple_items(classinfo) {
            for option in options {
                if self.issubclass(class, option)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let target = match classinfo {
            Value::Builtin(Builtins::Type(ty)) => ClassRef::Builtin(ty),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => ClassRef::Heap(id),
            _ => {
                return Err(ExcType::type_error(
                    "issubclass() arg 2 must be a class, a tuple of classes, or a union",
                ));
            }
        };
        let subject = match class {
            Value::Builtin(Builtins::Type(ty)) => ClassRef::Builtin(ty),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => ClassRef::Heap(id),
            _ => return Err(ExcType::type_error("issubclass() arg 1 must be a class")),
        };
        Ok(match (subject, target) {
            (_, ClassRef::Heap(id)) if id == self.object_class => true,
            (ClassRef::Builtin(sub), ClassRef::Builtin(sup)) => sub.is_subtype_of(sup),
            (ClassRef::Heap(sub), ClassRef::Heap(sup)) => self.class_mro(sub).contains(&sup),
            _ => false,
        })
    }
}

/// A class operand of `issubclass`.
#[derive(Clone, Copy)]
enum ClassRef {
    Builtin(Type),
    Heap(HeapId),
}
