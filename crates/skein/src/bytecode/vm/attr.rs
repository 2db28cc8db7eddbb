//! Attribute lookup, assignment and deletion.
//!
//! Instances follow Python's order: a property on the class wins, then the instance's own
//! attributes, then class attributes (functions bound to the instance), then `__getattr__`.

use indexmap::IndexMap;

use super::VM;
use crate::{
    args::ArgValues,
    builtins::Builtins,
    exception_private::{ExcType, RunError, RunResult},
    heap::{DictViewKind, HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{BoundMethod, Dict, Type, hash_key::hash_key},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// The builtin type of a value, or `None` for instances of user classes.
    pub(crate) fn builtin_type(&self, value: Value) -> Option<Type> {
        Some(match value {
            Value::Undefined | Value::None => Type::NoneType,
            Value::NotImplemented => Type::NotImplementedType,
            Value::Ellipsis => Type::Ellipsis,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::InternString(_) => Type::Str,
            Value::Builtin(builtin) => builtin.py_type(),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => Type::Str,
                HeapData::Bytes(_) => Type::Bytes,
                HeapData::BigInt(_) => Type::Int,
                HeapData::List(_) => Type::List,
                HeapData::Tuple(_) => Type::Tuple,
                HeapData::Dict(_) => Type::Dict,
                HeapData::Set(_) => Type::Set,
                HeapData::FrozenSet(_) => Type::FrozenSet,
                HeapData::Range(_) => Type::Range,
                HeapData::Slice(_) => Type::Slice,
                HeapData::Function(_) => Type::Function,
                HeapData::BoundMethod(_) => Type::Method,
                HeapData::BuiltinMethod { .. } => Type::BuiltinFunction,
                HeapData::Class(_) => Type::Type,
                HeapData::Instance(_) => return None,
                HeapData::Module(_) => Type::Module,
                HeapData::Cell(_) => Type::Cell,
                HeapData::Generator(_) => Type::Generator,
                HeapData::Iterator(state) => state.py_type(),
                HeapData::Property(_) => Type::Property,
                HeapData::StaticMethod(_) => Type::StaticMethod,
                HeapData::ClassMethod(_) => Type::ClassMethod,
                HeapData::Super { .. } => Type::Super,
                HeapData::DictView { kind, .. } => match kind {
                    DictViewKind::Keys => Type::DictKeys,
                    DictViewKind::Values => Type::DictValues,
                    DictViewKind::Items => Type::DictItems,
                },
            },
        })
    }

    /// `type(value).__name__`.
    pub(crate) fn type_name(&self, value: Value) -> String {
        match self.instance_class(value) {
            Some(class) => self.class_name(class),
            None => self.builtin_type(value).map_or("object", Type::name).to_owned(),
        }
    }

    /// `type(value)` as a value.
    pub(crate) fn class_of_value(&self, value: Value) -> Value {
        match self.instance_class(value) {
            Some(class) => Value::Ref(class),
            None => Value::Builtin(Builtins::Type(self.builtin_type(value).unwrap_or(Type::NoneType))),
        }
    }

    /// The class of an instance of a user (or exception) class.
    pub(crate) fn instance_class(&self, value: Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Instance(instance) => Some(instance.class),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn class_name(&self, class: HeapId) -> String {
        match self.heap.get(class) {
            HeapData::Class(class) => self.interns.get_str(class.name).to_owned(),
            _ => "object".to_owned(),
        }
    }

    pub(crate) fn class_mro(&self, class: HeapId) -> Vec<HeapId> {
        match self.heap.get(class) {
            HeapData::Class(class) => class.mro.clone(),
            _ => Vec::new(),
        }
    }

    /// Finds `name` in the class dicts along `class`'s MRO, without binding.
    pub(crate) fn lookup_in_mro(&self, class: HeapId, name: StringId) -> Option<Value> {
        let HeapData::Class(class) = self.heap.get(class) else {
            return None;
        };
        class.mro.iter().find_map(|id| match self.heap.get(*id) {
            HeapData::Class(base) => base.attrs.get(&name).copied(),
            _ => None,
        })
    }

    /// Looks up a special method on the type of `value`, bound to `value`.
    ///
    /// Instance attributes are skipped, as Python does for operator dunders.
    pub(crate) fn lookup_special(&mut self, value: Value, name: StringId) -> RunResult<Option<Value>> {
        if let Some(class) = self.instance_class(value) {
            return match self.lookup_in_mro(class, name) {
                Some(attr) => self.bind_class_attr(attr, value, class).map(Some),
                None => Ok(None),
            };
        }
        let Some(ty) = self.builtin_type(value) else {
            return Ok(None);
        };
        let text = self.interns.get_str(name);
        if ty.has_method(text) {
            let method = self.alloc(HeapData::BuiltinMethod { receiver: value, name })?;
            return Ok(Some(Value::Ref(method)));
        }
        Ok(None)
    }

    /// Looks up a special method defined by a user class, ignoring `object`'s native slots.
    pub(crate) fn user_special(&mut self, value: Value, name: StringId) -> RunResult<Option<Value>> {
        let Some(class) = self.instance_class(value) else {
            return Ok(None);
        };
        match self.lookup_in_mro(class, name) {
            None | Some(Value::Builtin(Builtins::Slot(_))) => Ok(None),
            Some(attr) => self.bind_class_attr(attr, value, class).map(Some),
        }
    }

    /// Binds a class attribute found while looking up an attribute of `receiver`.
    pub(crate) fn bind_class_attr(&mut self, attr: Value, receiver: Value, class: HeapId) -> RunResult<Value> {
        match attr {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(_) => self.bound_method(attr, receiver),
                HeapData::ClassMethod(func) => {
                    let func = *func;
                    self.bound_method(func, Value::Ref(class))
                }
                HeapData::StaticMethod(func) => Ok(*func),
                _ => Ok(attr),
            },
            Value::Builtin(Builtins::Slot(_)) => self.bound_method(attr, receiver),
            _ => Ok(attr),
        }
    }

    /// A class attribute read through the class itself (`C.f`).
    fn bind_to_class(&mut self, attr: Value, class: HeapId) -> RunResult<Value> {
        match attr {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::ClassMethod(func) => {
                    let func = *func;
                    self.bound_method(func, Value::Ref(class))
                }
                HeapData::StaticMethod(func) => Ok(*func),
                _ => Ok(attr),
            },
            _ => Ok(attr),
        }
    }

    pub(crate) fn bound_method(&mut self, func: Value, receiver: Value) -> RunResult<Value> {
        let id = self.alloc(HeapData::BoundMethod(BoundMethod { func, receiver }))?;
        Ok(Value::Ref(id))
    }

    /// `obj.name`.
    pub(crate) fn get_attr(&mut self, obj: Value, name: StringId) -> RunResult<Value> {
        if name == StaticStrings::DunderClass.id() {
            return Ok(self.class_of_value(obj));
        }
        if let Value::Ref(id) = obj {
            match self.heap.get(id) {
                HeapData::Instance(instance) => {
                    let class = instance.class;
                    return self.instance_attr(obj, id, class, name);
                }
                HeapData::Class(_) => return self.class_attr(id, name),
                HeapData::Module(module) => {
                    if let Some(value) = module.get(name) {
                        return Ok(value);
                    }
                    let module_name = self.interns.get_str(module.name);
                    return Err(ExcType::attribute_error_module(module_name, self.interns.get_str(name)));
                }
                HeapData::Function(func) => {
                    if let Some(value) = func.attrs.get(&name) {
                        return Ok(*value);
                    }
                    return self.function_attr(id, name);
                }
                HeapData::BoundMethod(method) => {
                    let BoundMethod { func, receiver } = *method;
                    return match self.interns.get_str(name) {
                        "__self__" => Ok(receiver),
                        "__func__" => Ok(func),
                        _ => self.get_attr(func, name),
                    };
                }
                HeapData::Super { class, receiver } => {
                    let (class, receiver) = (*class, *receiver);
                    return self.super_attr(class, receiver, name);
                }
                HeapData::Range(range) => {
                    let range = *range;
                    match self.interns.get_str(name) {
                        "start" => return Ok(Value::Int(range.start)),
                        "stop" => return Ok(Value::Int(range.stop)),
                        "step" => return Ok(Value::Int(range.step)),
                        _ => {}
                    }
                }
                HeapData::Slice(slice) => {
                    let slice = *slice;
                    match self.interns.get_str(name) {
                        "start" => return Ok(slice.start),
                        "stop" => return Ok(slice.stop),
                        "step" => return Ok(slice.step),
                        _ => {}
                    }
                }
                HeapData::Property(property) => {
                    let property = *property;
                    match self.interns.get_str(name) {
                        "fget" => return Ok(property.fget),
                        "fset" => return Ok(property.fset),
                        _ => {}
                    }
                }
                HeapData::Generator(generator) => {
                    if name == StaticStrings::DunderName.id() {
                        return Ok(Value::InternString(generator.name));
                    }
                    if name == StaticStrings::DunderQualname.id() {
                        let qualname = generator.qualname.clone();
                        return self.new_str(qualname);
                    }
                }
                _ => {}
            }
        }
        if let Value::Builtin(Builtins::Type(ty)) = obj {
            return self.builtin_type_attr(ty, name);
        }
        if name == StaticStrings::DunderName.id() {
            if let Value::Builtin(builtin) = obj {
                let text = builtin.name(&self.interns);
                return self.new_str(text);
            }
        }
        if let Some(method) = self.lookup_special(obj, name)? {
            return Ok(method);
        }
        Err(ExcType::attribute_error(self.type_name(obj), self.interns.get_str(name)))
    }

    fn instance_attr(&mut self, obj: Value, id: HeapId, class: HeapId, name: StringId) -> RunResult<Value> {
        if name == StaticStrings::DunderDict.id() {
            let attrs = match self.heap.get(id) {
                HeapData::Instance(instance) => instance.attrs.clone(),
                _ => IndexMap::new(),
            };
            return self.namespace_dict(&attrs);
        }
        let class_attr = self.lookup_in_mro(class, name);
        if let Some(Value::Ref(attr_id)) = class_attr {
            if let HeapData::Property(property) = self.heap.get(attr_id) {
                let getter = property.fget;
                if getter.is_none() {
                    return Err(ExcType::AttributeError.error(format!(
                        "property '{}' of '{}' object has no getter",
                        self.interns.get_str(name),
                        self.class_name(class)
                    )));
                }
                return self.call_sync(getter, ArgValues::one(obj));
            }
        }
        if let HeapData::Instance(instance) = self.heap.get(id) {
            if let Some(value) = instance.attrs.get(&name) {
                return Ok(*value);
            }
        }
        if let Some(attr) = class_attr {
            return self.bind_class_attr(attr, obj, class);
        }
        if self.is_exception_class(class)
            && (name == StaticStrings::DunderCause.id() || name == StaticStrings::DunderContext.id())
        {
            return Ok(Value::None);
        }
        if name == StaticStrings::Value.id() && self.exc_type_of(id) == ExcType::StopIteration {
            return Ok(self.first_exception_arg(id).unwrap_or(Value::None));
        }
        if let Some(getattr) = self.lookup_in_mro(class, StaticStrings::DunderGetattr.id()) {
            let getattr = self.bind_class_attr(getattr, obj, class)?;
            return self.call_sync(getattr, ArgValues::one(Value::InternString(name)));
        }
        Err(ExcType::attribute_error(self.class_name(class), self.interns.get_str(name)))
    }

    fn class_attr(&mut self, class: HeapId, name: StringId) -> RunResult<Value> {
        let HeapData::Class(object) = self.heap.get(class) else {
            return Err(RunError::internal("class attribute of a non-class"));
        };
        match name {
            _ if name == StaticStrings::DunderName.id() => return Ok(Value::InternString(object.name)),
            _ if name == StaticStrings::DunderQualname.id() => {
                let qualname = object.qualname.clone();
                return self.new_str(qualname);
            }
            _ if name == StaticStrings::DunderModule.id() => {
                return Ok(object.module.map_or(Value::None, Value::InternString));
            }
            _ if name == StaticStrings::DunderMro.id() => {
                let mro = object.mro.iter().map(|id| Value::Ref(*id)).collect();
                return self.new_tuple(mro);
            }
            _ if name == StaticStrings::DunderBases.id() => {
                let bases = object.bases.iter().map(|id| Value::Ref(*id)).collect();
                return self.new_tuple(bases);
            }
            _ if name == StaticStrings::DunderDict.id() => {
                let attrs = object.attrs.clone();
                return self.namespace_dict(&attrs);
            }
            _ => {}
        }
        match self.lookup_in_mro(class, name) {
            Some(attr) => self.bind_to_class(attr, class),
            None if name == StaticStrings::DunderDoc.id() => Ok(Value::None),
            None => Err(ExcType::attribute_error_class(
                &self.class_name(class),
                self.interns.get_str(name),
            )),
        }
    }

    fn function_attr(&mut self, id: HeapId, name: StringId) -> RunResult<Value> {
        let HeapData::Function(func) = self.heap.get(id) else {
            return Err(RunError::internal("function attribute of a non-function"));
        };
        if name == StaticStrings::DunderName.id() {
            Ok(Value::InternString(func.name()))
        } else if name == StaticStrings::DunderQualname.id() {
            let qualname = func.qualname().to_owned();
            self.new_str(qualname)
        } else if name == StaticStrings::DunderDoc.id() {
            Ok(Value::None)
        } else if name == StaticStrings::DunderModule.id() {
            let globals = func.globals;
            Ok(self.module_get(globals, StaticStrings::DunderName.id()).unwrap_or(Value::None))
        } else if name == StaticStrings::DunderDict.id() {
            let attrs = func.attrs.clone();
            self.namespace_dict(&attrs)
        } else {
            Err(ExcType::attribute_error("function", self.interns.get_str(name)))
        }
    }

    /// `super(class, receiver).name`: searches the receiver's MRO after `class`.
    fn super_attr(&mut self, class: HeapId, receiver: Value, name: StringId) -> RunResult<Value> {
        let (receiver_class, bound_to_class) = match self.instance_class(receiver) {
            Some(receiver_class) => (receiver_class, false),
            None => match receiver {
                Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => (id, true),
                _ => return Err(RunError::internal("super() receiver is neither an instance nor a class")),
            },
        };
        let mro = self.class_mro(receiver_class);
        let start = mro.iter().position(|id| *id == class).map_or(mro.len(), |i| i + 1);
        for base in &mro[start..] {
            let attr = match self.heap.get(*base) {
                HeapData::Class(object) => object.attrs.get(&name).copied(),
                _ => None,
            };
            if let Some(attr) = attr {
                return if bound_to_class {
                    self.bind_to_class(attr, receiver_class)
                } else {
                    self.bind_class_attr(attr, receiver, receiver_class)
                };
            }
        }
        Err(ExcType::attribute_error("super", self.interns.get_str(name)))
    }

    fn builtin_type_attr(&mut self, ty: Type, name: StringId) -> RunResult<Value> {
        let text = self.interns.get_str(name);
        if name == StaticStrings::DunderName.id() || name == StaticStrings::DunderQualname.id() {
            return self.new_str(ty.name());
        }
        if ty.has_method(text) {
            return Ok(Value::Builtin(Builtins::TypeMethod(ty, name)));
        }
        Err(ExcType::attribute_error_class(ty.name(), text))
    }

    /// Builds a `dict` snapshot of an attribute namespace.
    pub(crate) fn namespace_dict(&mut self, attrs: &IndexMap<StringId, Value>) -> RunResult<Value> {
        let mut dict = Dict::new();
        for (name, value) in attrs {
            if matches!(value, Value::Undefined) {
                continue;
            }
            let key = Value::InternString(*name);
            let hash = hash_key(&self.heap, &self.interns, key)?;
            dict.insert(hash, key, *value);
        }
        Ok(Value::Ref(self.alloc(HeapData::Dict(dict))?))
    }

    pub(crate) fn is_exception_class(&self, class: HeapId) -> bool {
        matches!(self.heap.get(class), HeapData::Class(object) if object.exc_type.is_some())
    }

    /// `obj.name = value`.
    pub(crate) fn set_attr(&mut self, obj: Value, name: StringId, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(self.no_attribute_assignment(obj, name));
        };
        match self.heap.get(id) {
            HeapData::Instance(instance) => {
                let class = instance.class;
                if let Some(Value::Ref(attr_id)) = self.lookup_in_mro(class, name) {
                    if let HeapData::Property(property) = self.heap.get(attr_id) {
                        let setter = property.fset;
                        if setter.is_none() {
                            return Err(ExcType::AttributeError.error(format!(
                                "property '{}' of '{}' object has no setter",
                                self.interns.get_str(name),
                                self.class_name(class)
                            )));
                        }
                        self.call_sync(setter, ArgValues::new([obj, value]))?;
                        return Ok(());
                    }
                }
                self.heap.on_container_insert()?;
                if let HeapData::Instance(instance) = self.heap.get_mut(id) {
                    instance.attrs.insert(name, value);
                }
                Ok(())
            }
            HeapData::Class(_) => {
                if let HeapData::Class(class) = self.heap.get_mut(id) {
                    class.attrs.insert(name, value);
                }
                Ok(())
            }
            HeapData::Module(_) => {
                self.module_attrs_mut(id)?.insert(name, value);
                Ok(())
            }
            HeapData::Function(_) => {
                if let HeapData::Function(func) = self.heap.get_mut(id) {
                    func.attrs.insert(name, value);
                }
                Ok(())
            }
            _ => Err(self.no_attribute_assignment(obj, name)),
        }
    }

    fn no_attribute_assignment(&self, obj: Value, name: StringId) -> RunError {
        let type_name = self.type_name(obj);
        let attr = self.interns.get_str(name);
        if let Some(ty) = self.builtin_type(obj) {
            if ty.has_method(attr) {
                return ExcType::attribute_error_readonly(&type_name, attr);
            }
        }
        ExcType::attribute_error(type_name, attr)
    }

    /// `del obj.name`.
    pub(crate) fn del_attr(&mut self, obj: Value, name: StringId) -> RunResult<()> {
        let removed = match obj {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::Instance(instance) => instance.attrs.shift_remove(&name).is_some(),
                HeapData::Class(class) => class.attrs.shift_remove(&name).is_some(),
                HeapData::Module(module) => module.attrs.shift_remove(&name).is_some(),
                HeapData::Function(func) => func.attrs.shift_remove(&name).is_some(),
                _ => false,
            },
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(ExcType::attribute_error(self.type_name(obj), self.interns.get_str(name)))
        }
    }

    /// Whether `value` has attribute `name`, treating `AttributeError` as absence.
    pub(crate) fn has_attr(&mut self, value: Value, name: StringId) -> RunResult<bool> {
        match self.get_attr(value, name) {
            Ok(_) => Ok(true),
            Err(err) if err.is_exc_type(ExcType::AttributeError) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
