//! Raising, matching and unwinding exceptions.
//!
//! Native code raises [`SimpleException`]s that only become heap instances when a handler
//! catches them. Once materialised, an exception keeps its traceback on the instance so a bare
//! `raise` can continue it.

use super::{FrameKind, VM};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult},
    exception_public::Exception,
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{GenState, Instance},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Unwinds frames above `stop_depth` until a handler covers the faulting instruction.
    ///
    /// Returns `Ok` with the handler's frame ready to run, or the error once `stop_depth` is
    /// reached.
    pub(super) fn handle_exception(&mut self, err: RunError, stop_depth: usize) -> RunResult<()> {
        let mut raise = match err {
            RunError::Exc(raise) => raise,
            other => {
                self.unwind_to(stop_depth);
                return Err(other);
            }
        };
        let type_name = self.raise_type_name(&raise);
        tracing::trace!(exception = %type_name, depth = self.frames.len(), "exception raised");
        self.tracer.on_exception_raised(&type_name, self.frames.len());

        while self.frames.len() > stop_depth {
            let frame = self.frame();
            let ip = frame.instruction_ip;
            let position = frame.code.location(ip).unwrap_or_default();
            raise.add_frame(position, frame.code.name, frame.code.source_id);
            if let Some(entry) = frame.code.find_handler(ip).copied() {
                let exc = match self.materialize(&mut raise) {
                    Ok(exc) => exc,
                    Err(err) => {
                        self.unwind_to(stop_depth);
                        return Err(err);
                    }
                };
                let frame = self.frame_mut();
                frame.ip = entry.handler as usize;
                let depth = frame.stack_base + usize::from(entry.stack_depth);
                self.stack.truncate(depth);
                self.push(exc);
                self.tracer.on_exception_caught(entry.handler as usize, self.frames.len());
                return Ok(());
            }
            let frame = self.frames.pop().expect("frame checked above");
            self.stack.truncate(frame.stack_base);
            self.tracer.on_return(self.frames.len());
            if let FrameKind::Generator(id) = frame.kind {
                if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                    generator.finish(GenState::Raised);
                }
                if self.raise_is(&raise, ExcType::StopIteration) {
                    raise = match self.stop_iteration_in_generator(*raise) {
                        Ok(replacement) => replacement,
                        Err(err) => {
                            self.unwind_to(stop_depth);
                            return Err(err);
                        }
                    };
                }
            }
        }
        Err(RunError::Exc(raise))
    }

    /// Pops frames down to `stop_depth` without running handlers.
    fn unwind_to(&mut self, stop_depth: usize) {
        while self.frames.len() > stop_depth {
            let frame = self.frames.pop().expect("frame checked above");
            self.stack.truncate(frame.stack_base);
            if let FrameKind::Generator(id) = frame.kind {
                if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                    generator.finish(GenState::Raised);
                }
            }
        }
    }

    /// PEP 479: a `StopIteration` escaping a generator body becomes a `RuntimeError`.
    fn stop_iteration_in_generator(&mut self, mut raise: ExceptionRaise) -> RunResult<Box<ExceptionRaise>> {
        let context = self.materialize(&mut raise)?;
        let id = self.new_exception(ExcType::RuntimeError, Some("generator raised StopIteration"))?;
        self.set_exception_attr(id, StaticStrings::DunderCause.id(), context);
        self.set_exception_attr(id, StaticStrings::DunderContext.id(), context);
        let mut replacement = ExceptionRaise::from_instance(ExcType::RuntimeError, id, raise.frames);
        replacement.hide_caret = raise.hide_caret;
        Ok(Box::new(replacement))
    }

    fn raise_type_name(&self, raise: &ExceptionRaise) -> String {
        match raise.instance {
            Some(id) => self.type_name(Value::Ref(id)),
            None => raise.exc.exc_type().to_string(),
        }
    }

    fn raise_is(&self, raise: &ExceptionRaise, exc_type: ExcType) -> bool {
        match raise.instance {
            Some(id) => self.exc_type_of(id).is_subclass_of(exc_type),
            None => raise.exc.exc_type().is_subclass_of(exc_type),
        }
    }

    /// The exception object for `raise`, creating it on first catch.
    ///
    /// Records the traceback on the instance and links `__context__` to the exception being
    /// handled, if any.
    pub(crate) fn materialize(&mut self, raise: &mut ExceptionRaise) -> RunResult<Value> {
        let id = match raise.instance {
            Some(id) => id,
            None => {
                let id = self.new_exception(raise.exc.exc_type(), raise.exc.arg())?;
                raise.instance = Some(id);
                id
            }
        };
        let handled = self.handled;
        if let HeapData::Instance(instance) = self.heap.get_mut(id) {
            instance.traceback.clone_from(&raise.frames);
            if handled.ref_id().is_some_and(|handled| handled != id) {
                instance.attrs.entry(StaticStrings::DunderContext.id()).or_insert(handled);
            }
        }
        Ok(Value::Ref(id))
    }

    /// A new instance of builtin exception `exc_type` with `args` of zero or one string.
    pub(crate) fn new_exception(&mut self, exc_type: ExcType, arg: Option<&str>) -> RunResult<HeapId> {
        let args = match arg {
            Some(text) => vec![self.new_str(text)?],
            None => Vec::new(),
        };
        self.new_exception_with_args(exc_type, args)
    }

    pub(crate) fn new_exception_with_args(&mut self, exc_type: ExcType, args: Vec<Value>) -> RunResult<HeapId> {
        let args = self.new_tuple(args)?;
        let mut instance = Instance::new(self.exc_classes[exc_type as usize]);
        instance.attrs.insert(StaticStrings::Args.id(), args);
        self.alloc(HeapData::Instance(instance))
    }

    /// `KeyError(key)` carrying the key object itself.
    pub(crate) fn key_error(&mut self, key: Value) -> RunError {
        match self.new_exception_with_args(ExcType::KeyError, vec![key]) {
            Ok(id) => ExceptionRaise::from_instance(ExcType::KeyError, id, Vec::new()).into(),
            Err(err) => err,
        }
    }

    fn set_exception_attr(&mut self, id: HeapId, name: StringId, value: Value) {
        if let HeapData::Instance(instance) = self.heap.get_mut(id) {
            instance.attrs.insert(name, value);
        }
    }

    /// Nearest builtin exception type of an exception instance.
    pub(crate) fn exc_type_of(&self, instance: HeapId) -> ExcType {
        let class = match self.heap.get(instance) {
            HeapData::Instance(instance) => instance.class,
            _ => return ExcType::Exception,
        };
        match self.heap.get(class) {
            HeapData::Class(class) => class.exc_type.unwrap_or(ExcType::Exception),
            _ => ExcType::Exception,
        }
    }

    /// Whether `value` is an instance of an exception class.
    pub(crate) fn is_exception(&self, value: Value) -> bool {
        self.instance_class(value).is_some_and(|class| self.is_exception_class(class))
    }

    /// Turns the operand of `raise` (a class or an instance) into an error.
    pub(crate) fn raise_value(&mut self, exc: Value) -> RunError {
        match self.exception_instance(exc) {
            Ok(id) => ExceptionRaise::from_instance(self.exc_type_of(id), id, Vec::new()).into(),
            Err(err) => err,
        }
    }

    /// An exception instance from `raise` operand `value`, instantiating classes.
    fn exception_instance(&mut self, value: Value) -> RunResult<HeapId> {
        if self.is_exception(value) {
            return value.ref_id().ok_or_else(|| RunError::internal("exception is not on the heap"));
        }
        if let Value::Ref(id) = value {
            if self.is_exception_class(id) {
                let instance = self.call_sync(value, ArgValues::empty())?;
                if self.is_exception(instance) {
                    return instance.ref_id().ok_or_else(|| RunError::internal("exception is not on the heap"));
                }
            }
        }
        Err(ExcType::not_base_exception())
    }

    /// `Raise` with form 0 (bare), 1 (`raise exc`) or 2 (`raise exc from cause`).
    pub(super) fn op_raise(&mut self, form: u8) -> RunError {
        match form {
            0 => {
                let handled = self.handled;
                if handled.is_none() {
                    return ExcType::no_active_exception();
                }
                self.reraise_value(handled)
            }
            1 => {
                let exc = self.pop();
                self.raise_value(exc)
            }
            _ => {
                let cause = self.pop();
                let exc = self.pop();
                let id = match self.exception_instance(exc) {
                    Ok(id) => id,
                    Err(err) => return err,
                };
                let cause = if cause.is_none() {
                    Value::None
                } else {
                    match self.exception_instance(cause) {
                        Ok(cause) => Value::Ref(cause),
                        Err(_) => return ExcType::type_error("exception causes must derive from BaseException"),
                    }
                };
                self.set_exception_attr(id, StaticStrings::DunderCause.id(), cause);
                ExceptionRaise::from_instance(self.exc_type_of(id), id, Vec::new()).into()
            }
        }
    }

    /// Re-raises a caught exception, continuing its recorded traceback.
    pub(super) fn reraise_value(&mut self, exc: Value) -> RunError {
        let Some(id) = exc.ref_id().filter(|_| self.is_exception(exc)) else {
            return RunError::internal("re-raised value is not an exception instance");
        };
        let frames = match self.heap.get(id) {
            HeapData::Instance(instance) => instance.traceback.clone(),
            _ => Vec::new(),
        };
        let mut raise = ExceptionRaise::from_instance(self.exc_type_of(id), id, frames);
        raise.reraised = !raise.frames.is_empty();
        raise.into()
    }

    /// `except class:` matching, where `class` may be a tuple of classes.
    pub(super) fn exception_matches(&mut self, exc: Value, class: Value) -> RunResult<bool> {
        if let Some(classes) = self.tuple_items(class) {
            for class in classes {
                if self.exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        match class {
            Value::Ref(id) if self.is_exception_class(id) => Ok(self
                .instance_class(exc)
                .is_some_and(|exc_class| self.class_mro(exc_class).contains(&id))),
            _ => Err(ExcType::except_invalid_type()),
        }
    }

    /// `args[0]` of an exception instance.
    pub(crate) fn first_exception_arg(&self, id: HeapId) -> Option<Value> {
        let args = match self.heap.get(id) {
            HeapData::Instance(instance) => instance.attrs.get(&StaticStrings::Args.id()).copied(),
            _ => None,
        }?;
        self.tuple_items(args)?.first().copied()
    }

    /// `str(exc)` for an uncaught exception; `None` when it has no arguments.
    fn exception_message(&mut self, id: HeapId) -> Option<String> {
        let args = match self.heap.get(id) {
            HeapData::Instance(instance) => instance.attrs.get(&StaticStrings::Args.id()).copied(),
            _ => None,
        };
        let has_args = args.and_then(|args| self.tuple_items(args)).is_some_and(|items| !items.is_empty());
        let has_str = self
            .instance_class(Value::Ref(id))
            .and_then(|class| self.lookup_in_mro(class, StaticStrings::DunderStr.id()))
            .is_some_and(|attr| !matches!(attr, Value::Builtin(_)));
        if !has_args && !has_str {
            return None;
        }
        self.py_str(Value::Ref(id)).ok()
    }

    /// Converts an error leaving the VM into the public [`Exception`].
    pub(crate) fn to_public_exception(&mut self, err: RunError) -> Exception {
        match err {
            RunError::Internal(msg) => Exception::runtime_error(format!("internal error: {msg}")),
            RunError::Exc(raise) | RunError::UncatchableExc(raise) => {
                let traceback = raise.traceback(&self.interns, &self.sources);
                match raise.instance {
                    Some(id) => {
                        let exc_type = self.exc_type_of(id);
                        let type_name = self.type_name(Value::Ref(id));
                        let message = self.exception_message(id);
                        Exception::new(exc_type, message, traceback).with_type_name(type_name)
                    }
                    None => Exception::new(raise.exc.exc_type(), raise.exc.arg().map(str::to_owned), traceback),
                }
            }
        }
    }

    /// Exit code requested by an uncaught `SystemExit`, if that is what `err` is.
    pub(crate) fn system_exit_code(&mut self, err: &RunError) -> Option<Value> {
        let RunError::Exc(raise) = err else {
            return None;
        };
        if !self.raise_is(raise, ExcType::SystemExit) {
            return None;
        }
        let Some(id) = raise.instance else {
            return Some(Value::None);
        };
        let args = match self.heap.get(id) {
            HeapData::Instance(instance) => instance.attrs.get(&StaticStrings::Args.id()).copied(),
            _ => None,
        };
        let items = args.and_then(|args| self.tuple_items(args)).unwrap_or_default();
        Some(match items.as_slice() {
            [] => Value::None,
            [code] => *code,
            _ => args.unwrap_or(Value::None),
        })
    }
}
