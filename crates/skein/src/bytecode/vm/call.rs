//! Calling functions, methods and classes, and binding arguments to parameters.

use std::rc::Rc;

use indexmap::IndexMap;

use super::{CallResult, Frame, FrameKind, VM};
use crate::{
    args::ArgValues,
    builtins::{Builtins, NativeSlot},
    bytecode::{
        code::Code,
        op::{MAKE_FUNCTION_CLOSURE, MAKE_FUNCTION_DEFAULTS, MAKE_FUNCTION_KW_DEFAULTS},
    },
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{BoundMethod, Dict, Function, Generator, Instance, hash_key::hash_key},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Starts a call. Python functions get a frame; everything else runs to completion.
    pub(crate) fn call_value(&mut self, callable: Value, mut args: ArgValues) -> RunResult<CallResult> {
        let id = match callable {
            Value::Builtin(builtin) => return builtin.call(self, args).map(CallResult::Push),
            Value::Ref(id) => id,
            _ => return Err(ExcType::type_error_not_callable(&self.type_name(callable))),
        };
        match self.heap.get(id) {
            HeapData::Function(_) => self.call_function(id, args),
            HeapData::BoundMethod(method) => {
                let BoundMethod { func, receiver } = *method;
                args.prepend(receiver);
                self.call_value(func, args)
            }
            HeapData::BuiltinMethod { receiver, name } => {
                let (receiver, name) = (*receiver, *name);
                self.call_builtin_method(receiver, name, args).map(CallResult::Push)
            }
            HeapData::Class(_) => self.call_class(id, args),
            HeapData::StaticMethod(func) => {
                let func = *func;
                self.call_value(func, args)
            }
            HeapData::Instance(_) => match self.lookup_special(callable, StaticStrings::DunderCall.id())? {
                Some(call) => self.call_value(call, args),
                None => Err(ExcType::type_error_not_callable(&self.type_name(callable))),
            },
            _ => Err(ExcType::type_error_not_callable(&self.type_name(callable))),
        }
    }

    /// Calls a user function: pushes its frame, or returns a new generator for generator functions.
    fn call_function(&mut self, func: HeapId, args: ArgValues) -> RunResult<CallResult> {
        let frame = self.function_frame(func, args, FrameKind::Function)?;
        if frame.code.is_generator {
            let name = frame.code.name;
            let qualname = frame.code.qualname.clone();
            let id = self.alloc(HeapData::Generator(Generator::new(frame, name, qualname)))?;
            if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                if let Some(frame) = generator.frame.as_mut() {
                    frame.kind = FrameKind::Generator(id);
                }
            }
            return Ok(CallResult::Push(Value::Ref(id)));
        }
        // coroutines run eagerly: calling one runs its body like a plain function
        self.push_frame(frame)?;
        Ok(CallResult::FramePushed)
    }

    /// Builds the frame for a call of function `func`.
    pub(crate) fn function_frame(&mut self, func: HeapId, args: ArgValues, kind: FrameKind) -> RunResult<Frame> {
        let HeapData::Function(function) = self.heap.get(func) else {
            return Err(RunError::internal("function frame for a non-function"));
        };
        let code = Rc::clone(&function.code);
        let globals = function.globals;
        let closure = function.closure.clone();
        let defaults = function.defaults.clone();
        let kw_defaults = function.kw_defaults.clone();

        let locals = self.bind_arguments(&code, &defaults, &kw_defaults, args)?;
        let mut cells = Vec::with_capacity(code.cell_count());
        for _ in 0..code.cellvars.len() {
            cells.push(self.alloc(HeapData::Cell(Value::Undefined))?);
        }
        cells.extend(closure);
        for &(slot, cell) in &code.cell_params {
            let value = locals[usize::from(slot)];
            if let HeapData::Cell(contents) = self.heap.get_mut(cells[usize::from(cell)]) {
                *contents = value;
            }
        }
        Ok(Frame {
            code,
            ip: 0,
            instruction_ip: 0,
            stack_base: self.stack.len(),
            locals,
            cells,
            globals,
            namespace: None,
            kind,
            captures: Vec::new(),
        })
    }

    /// Matches call arguments to parameter slots, producing the frame's locals.
    fn bind_arguments(
        &mut self,
        code: &Code,
        defaults: &[Value],
        kw_defaults: &[(StringId, Value)],
        args: ArgValues,
    ) -> RunResult<Vec<Value>> {
        let signature = code.signature;
        let name = if code.qualname.is_empty() {
            self.interns.get_str(code.name).to_owned()
        } else {
            code.qualname.clone()
        };
        let positional_count = signature.positional();
        let posonly = usize::from(signature.posonly);
        let mut locals = vec![Value::Undefined; code.varnames.len().max(signature.param_count())];
        let ArgValues { positional, kwargs } = args;

        let given = positional.len();
        let mut extra = Vec::new();
        for (index, value) in positional.into_iter().enumerate() {
            if index < positional_count {
                locals[index] = value;
            } else {
                extra.push(value);
            }
        }
        if !extra.is_empty() && !signature.varargs {
            let min = positional_count - defaults.len().min(positional_count);
            return Err(ExcType::type_error_too_many_positional(&name, min, positional_count, given));
        }
        if let Some(slot) = signature.varargs_slot() {
            locals[slot] = self.new_tuple(extra)?;
        }

        let kwonly_start = signature.kwonly_start();
        let kwonly_end = kwonly_start + usize::from(signature.kwonly);
        let mut varkw = Dict::new();
        for (key, value) in kwargs {
            let slot = code.varnames[posonly..positional_count]
                .iter()
                .position(|param| *param == key)
                .map(|i| i + posonly)
                .or_else(|| {
                    code.varnames[kwonly_start..kwonly_end]
                        .iter()
                        .position(|param| *param == key)
                        .map(|i| i + kwonly_start)
                });
            match slot {
                Some(slot) => {
                    if !matches!(locals[slot], Value::Undefined) {
                        return Err(ExcType::type_error_multiple_values(&name, self.interns.get_str(key)));
                    }
                    locals[slot] = value;
                }
                None if signature.varkw => {
                    let key_value = Value::InternString(key);
                    let hash = hash_key(&self.heap, &self.interns, key_value)?;
                    if varkw.insert(hash, key_value, value).is_some() {
                        return Err(ExcType::type_error_multiple_values(&name, self.interns.get_str(key)));
                    }
                }
                None if code.varnames[..posonly].contains(&key) => {
                    return Err(ExcType::type_error_positional_only(&name, self.interns.get_str(key)));
                }
                None => {
                    return Err(ExcType::type_error_unexpected_keyword(&name, self.interns.get_str(key)));
                }
            }
        }

        let first_default = positional_count - defaults.len().min(positional_count);
        let mut missing = Vec::new();
        for slot in 0..positional_count {
            if matches!(locals[slot], Value::Undefined) {
                if slot >= first_default {
                    locals[slot] = defaults[slot - first_default];
                } else {
                    missing.push(self.interns.get_str(code.varnames[slot]).to_owned());
                }
            }
        }
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(String::as_str).collect();
            return Err(ExcType::type_error_missing(&name, "positional", &missing));
        }
        for slot in kwonly_start..kwonly_end {
            if matches!(locals[slot], Value::Undefined) {
                let param = code.varnames[slot];
                match kw_defaults.iter().find(|(key, _)| *key == param) {
                    Some((_, value)) => locals[slot] = *value,
                    None => missing.push(self.interns.get_str(param).to_owned()),
                }
            }
        }
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(String::as_str).collect();
            return Err(ExcType::type_error_missing(&name, "keyword-only", &missing));
        }
        if let Some(slot) = signature.varkw_slot() {
            locals[slot] = Value::Ref(self.alloc(HeapData::Dict(varkw))?);
        }
        Ok(locals)
    }

    /// Instantiates a class and runs its `__init__`.
    fn call_class(&mut self, class: HeapId, args: ArgValues) -> RunResult<CallResult> {
        let instance = self.alloc(HeapData::Instance(Instance::new(class)))?;
        let instance_value = Value::Ref(instance);
        if self.is_exception_class(class) {
            let exc_args = self.new_tuple(args.positional.to_vec())?;
            if let HeapData::Instance(object) = self.heap.get_mut(instance) {
                object.attrs.insert(StaticStrings::Args.id(), exc_args);
            }
        }
        match self.lookup_in_mro(class, StaticStrings::Init.id()) {
            None | Some(Value::Builtin(Builtins::Slot(NativeSlot::ObjectInit))) => {
                if args.count() > 0 {
                    return Err(ExcType::type_error(format!(
                        "{}() takes no arguments",
                        self.class_name(class)
                    )));
                }
                Ok(CallResult::Push(instance_value))
            }
            Some(Value::Builtin(Builtins::Slot(NativeSlot::ExcInit))) => {
                if !args.kwargs.is_empty() {
                    return Err(ExcType::type_error_no_kwargs(&self.class_name(class)));
                }
                Ok(CallResult::Push(instance_value))
            }
            Some(Value::Ref(init)) if matches!(self.heap.get(init), HeapData::Function(_)) => {
                let mut args = args;
                args.prepend(instance_value);
                let frame = self.function_frame(init, args, FrameKind::Init(instance))?;
                if frame.code.is_generator {
                    return Err(ExcType::type_error("__init__() should return None, not 'generator'"));
                }
                self.push_frame(frame)?;
                Ok(CallResult::FramePushed)
            }
            Some(init) => {
                let init = self.bind_class_attr(init, instance_value, class)?;
                let result = self.call_sync(init, args)?;
                if !result.is_none() {
                    return Err(ExcType::type_error(format!(
                        "__init__() should return None, not '{}'",
                        self.type_name(result)
                    )));
                }
                Ok(CallResult::Push(instance_value))
            }
        }
    }

    /// Calls method `name` of `receiver` to completion.
    pub(crate) fn call_method(&mut self, receiver: Value, name: StringId, args: ArgValues) -> RunResult<Value> {
        let method = self.get_attr(receiver, name)?;
        self.call_sync(method, args)
    }

    /// Arguments of a `CallKw`: the trailing values are the keyword arguments named by `names`.
    pub(super) fn keyword_args(&mut self, names: Value, mut values: Vec<Value>) -> RunResult<ArgValues> {
        let names = self.tuple_items(names).unwrap_or_default();
        let split = values.len() - names.len();
        let kw_values = values.split_off(split);
        let mut kwargs = Vec::with_capacity(names.len());
        for (name, value) in names.into_iter().zip(kw_values) {
            let Value::InternString(name) = name else {
                return Err(RunError::internal("keyword name is not an interned string"));
            };
            kwargs.push((name, value));
        }
        Ok(ArgValues::with_kwargs(values, kwargs))
    }

    /// Arguments of a `CallEx`: a tuple of positionals and an optional kwargs dict.
    pub(super) fn expand_call_args(&mut self, positional: Value, kwargs: Option<Value>) -> RunResult<ArgValues> {
        let positional = match self.sequence_items(positional) {
            Some(items) => items,
            None => self.collect_iter(positional)?,
        };
        let mut keywords = Vec::new();
        if let Some(kwargs) = kwargs {
            let entries: Vec<(Value, Value)> = match kwargs {
                Value::Ref(id) => match self.heap.get(id) {
                    HeapData::Dict(dict) => dict.iter().map(|(k, v)| (*k, *v)).collect(),
                    _ => return Err(ExcType::type_error_kwargs_not_mapping(&self.type_name(kwargs))),
                },
                _ => return Err(ExcType::type_error_kwargs_not_mapping(&self.type_name(kwargs))),
            };
            for (key, value) in entries {
                let Some(name) = self.intern_value(key) else {
                    return Err(ExcType::type_error_kwargs_nonstring_key());
                };
                keywords.push((name, value));
            }
        }
        Ok(ArgValues::with_kwargs(positional, keywords))
    }

    /// `MakeFunction`: builds a function from child code `index` and the values the flags announce.
    pub(super) fn make_function(&mut self, index: u16, flags: u8) -> RunResult<Value> {
        let closure = if flags & MAKE_FUNCTION_CLOSURE == 0 {
            Vec::new()
        } else {
            let cells = self.pop();
            self.tuple_items(cells)
                .unwrap_or_default()
                .into_iter()
                .filter_map(Value::ref_id)
                .collect()
        };
        let kw_defaults = if flags & MAKE_FUNCTION_KW_DEFAULTS == 0 {
            Vec::new()
        } else {
            let map = self.pop();
            let entries: Vec<(Value, Value)> = match map {
                Value::Ref(id) => match self.heap.get(id) {
                    HeapData::Dict(dict) => dict.iter().map(|(k, v)| (*k, *v)).collect(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            let mut defaults = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let name = self
                    .intern_value(key)
                    .ok_or_else(|| RunError::internal("keyword default name is not a string"))?;
                defaults.push((name, value));
            }
            defaults
        };
        let defaults = if flags & MAKE_FUNCTION_DEFAULTS == 0 {
            Vec::new()
        } else {
            let tuple = self.pop();
            self.tuple_items(tuple).unwrap_or_default()
        };
        let frame = self.frame();
        let code = Rc::clone(&frame.code.children[usize::from(index)]);
        let globals = frame.globals;
        let function = Function {
            code,
            globals,
            defaults,
            kw_defaults,
            closure,
            attrs: IndexMap::new(),
        };
        Ok(Value::Ref(self.alloc(HeapData::Function(function))?))
    }

    /// Whether `value` can be called.
    pub(crate) fn is_callable(&self, value: Value) -> bool {
        match value {
            Value::Builtin(Builtins::Stream(_)) => false,
            Value::Builtin(_) => true,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(_)
                | HeapData::BoundMethod(_)
                | HeapData::BuiltinMethod { .. }
                | HeapData::Class(_)
                | HeapData::StaticMethod(_) => true,
                HeapData::Instance(instance) => self.lookup_in_mro(instance.class, StaticStrings::DunderCall.id()).is_some(),
                _ => false,
            },
            _ => false,
        }
    }
}
