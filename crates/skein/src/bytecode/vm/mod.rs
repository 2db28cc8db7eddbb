//! The bytecode virtual machine.
//!
//! Frames live on `frames`; every frame owns its instruction pointer and a window of the shared
//! operand stack starting at `stack_base`. Calling a Python function from bytecode pushes a frame
//! and keeps looping in the same `run_frames` invocation. Native code that needs a Python result
//! (a `key=` callback, a dunder called by `==`, a generator resumed by `list()`) re-enters through
//! [`VM::call_sync`], which runs a nested loop that stops when its frame returns.

mod attr;
mod binary;
mod call;
mod class;
mod collections;
mod compare;
mod exceptions;
mod format;
mod generator;
mod import;
mod iter;
mod matching;
mod methods;

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use strum::IntoEnumIterator;

pub(crate) use self::generator::{GenAction, GenResult};
use crate::{
    args::ArgValues,
    builtins::{BuiltinFunction, Builtins, NativeSlot},
    bytecode::{
        code::{Code, Const},
        op::Opcode,
    },
    exception_private::{ExcType, RunError, RunResult, SourceFile},
    expressions::{CmpOperator, Operator},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    run::ModuleResolver,
    tracer::{NoopTracer, VmTracer},
    types::{ClassObject, GenState, Module, Type},
    value::Value,
};

/// Fetches a u8 operand from the current frame, advancing its ip.
macro_rules! fetch_u8 {
    ($self:expr) => {{
        let frame = $self.frame_mut();
        let byte = frame.code.bytecode[frame.ip];
        frame.ip += 1;
        byte
    }};
}

/// Fetches a little-endian u16 operand from the current frame.
macro_rules! fetch_u16 {
    ($self:expr) => {{
        let frame = $self.frame_mut();
        let value = u16::from_le_bytes([frame.code.bytecode[frame.ip], frame.code.bytecode[frame.ip + 1]]);
        frame.ip += 2;
        value
    }};
}

/// Fetches a little-endian i16 jump offset from the current frame.
macro_rules! fetch_i16 {
    ($self:expr) => {{
        let frame = $self.frame_mut();
        let value = i16::from_le_bytes([frame.code.bytecode[frame.ip], frame.code.bytecode[frame.ip + 1]]);
        frame.ip += 2;
        value
    }};
}

/// What kind of code a frame runs, and what its return does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Module,
    Function,
    /// A class body; its namespace becomes the class attributes.
    ClassBody,
    /// `__init__` called while instantiating; returns the instance instead of `None`.
    Init(HeapId),
    /// The body of this generator.
    Generator(HeapId),
}

/// A single function activation record.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Rc<Code>,
    pub ip: usize,
    /// Start of the instruction being executed, for tracebacks and exception lookup.
    pub instruction_ip: usize,
    pub stack_base: usize,
    pub locals: Vec<Value>,
    /// Cell variables followed by the closure's free variable cells.
    pub cells: Vec<HeapId>,
    /// Module whose namespace `LoadGlobal` reads.
    pub globals: HeapId,
    /// Namespace of `LoadName`/`StoreName`: the module for module code, the class namespace for
    /// class bodies, `None` for functions.
    pub namespace: Option<HeapId>,
    pub kind: FrameKind,
    /// Match captures waiting for their pattern to succeed.
    pub captures: Vec<Value>,
}

impl Frame {
    /// Heap objects the frame keeps alive.
    pub fn collect_refs(&self, out: &mut Vec<HeapId>) {
        out.extend(self.locals.iter().filter_map(|value| value.ref_id()));
        out.extend(self.cells.iter().copied());
        out.push(self.globals);
        out.extend(self.namespace);
        out.extend(self.captures.iter().filter_map(|value| value.ref_id()));
        if let FrameKind::Init(id) | FrameKind::Generator(id) = self.kind {
            out.push(id);
        }
    }
}

/// How `run_frames` stopped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameExit {
    Return(Value),
    /// A generator frame yielded; only seen by the generator's resume.
    Yield(Value),
}

/// Outcome of starting a call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CallResult {
    /// The call completed natively with this value.
    Push(Value),
    /// A frame was pushed; its return value lands on the stack when it returns.
    FramePushed,
}

/// The bytecode virtual machine.
pub(crate) struct VM<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer = NoopTracer> {
    pub(crate) heap: Heap<T>,
    pub(crate) interns: Interns,
    /// Operand stack shared by all frames.
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) print: &'a mut P,
    pub(crate) tracer: Tr,
    /// Source files indexed by `Code::source_id`.
    pub(crate) sources: Vec<SourceFile>,
    /// The exception being handled by the innermost active `except` or `finally`, else `None`.
    pub(crate) handled: Value,
    /// Depth of native re-entry; garbage is only collected at depth zero, where every live value
    /// is reachable from the stack, frames, module table or `temp_roots`.
    nesting: usize,
    /// Values held by native code while frames it started run with collection allowed.
    temp_roots: Vec<Value>,
    pub(crate) builtins: AHashMap<StringId, Value>,
    /// Builtin exception classes indexed by `ExcType as usize`.
    pub(crate) exc_classes: Vec<HeapId>,
    pub(crate) object_class: HeapId,
    /// Loaded modules by dotted name; mirrors `sys.modules`.
    pub(crate) modules: IndexMap<String, HeapId>,
    pub(crate) resolver: Option<&'a dyn ModuleResolver>,
    pub(crate) argv: Vec<String>,
    /// Containers whose repr is in progress, to print cycles as `[...]`.
    pub(crate) repr_guard: Vec<HeapId>,
    /// Nesting of container comparisons in progress.
    pub(crate) compare_depth: u16,
    /// The `sys.modules` dict once `sys` has been imported.
    pub(crate) sys_modules: Option<HeapId>,
}

impl<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'a, T, P, Tr> {
    /// Creates a VM with `object`, the exception hierarchy and the builtins namespace in place.
    pub(crate) fn new(tracker: T, interns: Interns, print: &'a mut P, tracer: Tr) -> RunResult<Self> {
        let mut heap = Heap::new(tracker);
        // placeholder until the real class exists; nothing can observe it in between
        let object_class = heap.allocate(HeapData::Tuple(Vec::new()))?;
        let mut vm = Self {
            heap,
            interns,
            stack: Vec::with_capacity(64),
            frames: Vec::new(),
            print,
            tracer,
            sources: Vec::new(),
            handled: Value::None,
            nesting: 0,
            temp_roots: Vec::new(),
            builtins: AHashMap::new(),
            exc_classes: Vec::new(),
            object_class,
            modules: IndexMap::new(),
            resolver: None,
            argv: Vec::new(),
            repr_guard: Vec::new(),
            compare_depth: 0,
            sys_modules: None,
        };
        vm.bootstrap()?;
        Ok(vm)
    }

    fn bootstrap(&mut self) -> RunResult<()> {
        let mut object_attrs = IndexMap::new();
        for (name, slot) in [
            (StaticStrings::Init, NativeSlot::ObjectInit),
            (StaticStrings::DunderRepr, NativeSlot::ObjectRepr),
            (StaticStrings::DunderStr, NativeSlot::ObjectStr),
            (StaticStrings::DunderEq, NativeSlot::ObjectEq),
            (StaticStrings::DunderNe, NativeSlot::ObjectNe),
            (StaticStrings::DunderHash, NativeSlot::ObjectHash),
        ] {
            object_attrs.insert(name.id(), Value::Builtin(Builtins::Slot(slot)));
        }
        let object_name = self.interns.intern("object");
        let object_class = self.heap.allocate(HeapData::Class(ClassObject {
            name: object_name,
            qualname: "object".to_owned(),
            module: Some(self.interns.intern("builtins")),
            bases: Vec::new(),
            mro: Vec::new(),
            attrs: object_attrs,
            exc_type: None,
        }))?;
        if let HeapData::Class(class) = self.heap.get_mut(object_class) {
            class.mro.push(object_class);
        }
        self.object_class = object_class;
        self.builtins.insert(object_name, Value::Ref(object_class));

        for exc_type in ExcType::iter() {
            let base = exc_type.parent().map_or(object_class, |parent| self.exc_classes[parent as usize]);
            let base_mro = match self.heap.get(base) {
                HeapData::Class(class) => class.mro.clone(),
                _ => return Err(RunError::internal("exception base is not a class")),
            };
            let mut attrs = IndexMap::new();
            if exc_type == ExcType::BaseException {
                attrs.insert(StaticStrings::Init.id(), Value::Builtin(Builtins::Slot(NativeSlot::ExcInit)));
                attrs.insert(StaticStrings::DunderStr.id(), Value::Builtin(Builtins::Slot(NativeSlot::ExcStr)));
                attrs.insert(StaticStrings::DunderRepr.id(), Value::Builtin(Builtins::Slot(NativeSlot::ExcRepr)));
            }
            let type_name: &'static str = exc_type.into();
            let name = self.interns.intern(type_name);
            let id = self.heap.allocate(HeapData::Class(ClassObject {
                name,
                qualname: type_name.to_owned(),
                module: Some(self.interns.intern("builtins")),
                bases: vec![base],
                mro: Vec::new(),
                attrs,
                exc_type: Some(exc_type),
            }))?;
            if let HeapData::Class(class) = self.heap.get_mut(id) {
                class.mro.push(id);
                class.mro.extend(base_mro);
            }
            self.exc_classes.push(id);
            self.builtins.insert(name, Value::Ref(id));
        }

        for function in BuiltinFunction::iter() {
            let name: &'static str = function.into();
            let id = self.interns.intern(name);
            self.builtins.insert(id, Value::Builtin(Builtins::Function(function)));
        }
        for &ty in Type::CONSTRUCTORS {
            let id = self.interns.intern(ty.name());
            self.builtins.insert(id, Value::Builtin(Builtins::Type(ty)));
        }
        let not_implemented = self.interns.intern("NotImplemented");
        self.builtins.insert(not_implemented, Value::NotImplemented);
        let ellipsis = self.interns.intern("Ellipsis");
        self.builtins.insert(ellipsis, Value::Ellipsis);
        Ok(())
    }

    // ========================================================================
    // stack and frame access
    // ========================================================================

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    /// The value `depth` entries below the top of the stack.
    #[inline]
    pub(crate) fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }

    /// Pops the top `count` values, in stack order.
    pub(crate) fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let at = self.stack.len() - count;
        self.stack.split_off(at)
    }

    #[inline]
    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    #[inline]
    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn jump(&mut self, offset: i16) {
        let frame = self.frame_mut();
        let target = i64::try_from(frame.ip).expect("ip fits in i64") + i64::from(offset);
        frame.ip = usize::try_from(target).expect("jump target is non-negative");
    }

    fn name_at(&self, index: u16) -> StringId {
        self.frame().code.names[usize::from(index)]
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        self.heap.tracker().check_recursion_depth(self.frames.len())?;
        let name = self.interns.get_str(frame.code.name);
        self.tracer.on_call(name, self.frames.len() + 1);
        self.frames.push(frame);
        Ok(())
    }

    // ========================================================================
    // allocation and value access
    // ========================================================================

    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        Ok(self.heap.allocate(data)?)
    }

    pub(crate) fn new_str(&mut self, text: impl Into<String>) -> RunResult<Value> {
        Ok(Value::Ref(self.alloc(HeapData::Str(text.into()))?))
    }

    pub(crate) fn new_bytes(&mut self, bytes: Vec<u8>) -> RunResult<Value> {
        Ok(Value::Ref(self.alloc(HeapData::Bytes(bytes))?))
    }

    pub(crate) fn new_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.alloc(HeapData::List(items))?))
    }

    pub(crate) fn new_tuple(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.alloc(HeapData::Tuple(items))?))
    }

    /// An `int` value, boxing it only when it does not fit in an `i64`.
    pub(crate) fn new_int(&mut self, value: BigInt) -> RunResult<Value> {
        match value.to_i64() {
            Some(small) => Ok(Value::Int(small)),
            None => Ok(Value::Ref(self.alloc(HeapData::BigInt(value))?)),
        }
    }

    pub(crate) fn new_module(&mut self, name: &str) -> RunResult<HeapId> {
        let name_id = self.interns.intern(name);
        let mut module = Module::new(name_id);
        let name_value = self.new_str(name)?;
        module.attrs.insert(StaticStrings::DunderName.id(), name_value);
        self.alloc(HeapData::Module(module))
    }

    /// Text of a `str` value.
    pub(crate) fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::InternString(id) => Some(self.interns.get_str(id)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(text) => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_bytes(&self, value: Value) -> Option<&[u8]> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Bytes(bytes) => Some(bytes),
                _ => None,
            },
            _ => None,
        }
    }

    /// Items of a tuple.
    pub(crate) fn tuple_items(&self, value: Value) -> Option<Vec<Value>> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Tuple(items) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub(crate) fn sequence_items(&self, value: Value) -> Option<Vec<Value>> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// A module's attribute map.
    pub(crate) fn module_attrs_mut(&mut self, id: HeapId) -> RunResult<&mut IndexMap<StringId, Value>> {
        match self.heap.get_mut(id) {
            HeapData::Module(module) => Ok(&mut module.attrs),
            _ => Err(RunError::internal("namespace is not a module")),
        }
    }

    pub(crate) fn module_get(&self, id: HeapId, name: StringId) -> Option<Value> {
        match self.heap.get(id) {
            HeapData::Module(module) => module.get(name),
            _ => None,
        }
    }

    /// Interns the text of a `str` value, for attribute names computed at runtime.
    pub(crate) fn intern_value(&mut self, value: Value) -> Option<StringId> {
        match value {
            Value::InternString(id) => Some(id),
            _ => {
                let text = self.as_str(value)?.to_owned();
                Some(self.interns.intern(&text))
            }
        }
    }

    // ========================================================================
    // running code
    // ========================================================================

    /// Runs `code` as the body of module `module` and returns its trailing expression value.
    pub(crate) fn run_module_code(&mut self, code: Rc<Code>, module: HeapId) -> RunResult<Value> {
        let depth = self.frames.len();
        let mut cells = Vec::with_capacity(code.cell_count());
        for _ in 0..code.cell_count() {
            cells.push(self.alloc(HeapData::Cell(Value::Undefined))?);
        }
        let frame = Frame {
            locals: vec![Value::Undefined; code.varnames.len()],
            code,
            ip: 0,
            instruction_ip: 0,
            stack_base: self.stack.len(),
            cells,
            globals: module,
            namespace: Some(module),
            kind: FrameKind::Module,
            captures: Vec::new(),
        };
        self.push_frame(frame)?;
        match self.run_frames(depth)? {
            FrameExit::Return(value) | FrameExit::Yield(value) => Ok(value),
        }
    }

    /// Runs frames until the frame stack shrinks back to `stop_depth`.
    pub(crate) fn run_frames(&mut self, stop_depth: usize) -> RunResult<FrameExit> {
        loop {
            if let Err(err) = self.heap.tracker_mut().check_time() {
                self.handle_exception(err.into(), stop_depth)?;
                continue;
            }
            if self.nesting == 0 && self.heap.should_collect() {
                self.collect_garbage();
            }
            let frame = self.frame_mut();
            frame.instruction_ip = frame.ip;
            let ip = frame.ip;
            let byte = frame.code.bytecode[ip];
            frame.ip += 1;
            let Ok(opcode) = Opcode::try_from(byte) else {
                return Err(RunError::internal(format!("invalid opcode byte {byte} at {ip}")));
            };
            self.tracer.on_instruction(ip, opcode, self.stack.len(), self.frames.len());
            match self.step(opcode, stop_depth) {
                Ok(None) => {}
                Ok(Some(exit)) => return Ok(exit),
                Err(err) => self.handle_exception(err, stop_depth)?,
            }
        }
    }

    /// Calls `callable` from native code and runs it to completion.
    pub(crate) fn call_sync(&mut self, callable: Value, args: ArgValues) -> RunResult<Value> {
        let depth = self.frames.len();
        // keep the callee and arguments reachable while a nested frame runs
        let mark = self.stack.len();
        self.stack.push(callable);
        self.stack.extend(args.positional.iter().copied());
        self.stack.extend(args.kwargs.iter().map(|(_, value)| *value));
        let result = match self.call_value(callable, args) {
            Ok(CallResult::Push(value)) => Ok(value),
            Ok(CallResult::FramePushed) => {
                self.nesting += 1;
                let result = self.run_frames(depth);
                self.nesting -= 1;
                result.map(|exit| match exit {
                    FrameExit::Return(value) | FrameExit::Yield(value) => value,
                })
            }
            Err(err) => Err(err),
        };
        self.stack.truncate(mark);
        result
    }

    /// Runs `f` with native re-entry counted, so collection waits until it finishes.
    pub(crate) fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    /// Runs `f` with `held` kept reachable, for native code that lets frames collect.
    pub(crate) fn with_roots<R>(&mut self, held: &[Value], f: impl FnOnce(&mut Self) -> R) -> R {
        let mark = self.temp_roots.len();
        self.temp_roots.extend_from_slice(held);
        let result = f(self);
        self.temp_roots.truncate(mark);
        result
    }

    fn collect_garbage(&mut self) {
        let mut roots: Vec<HeapId> = self.stack.iter().filter_map(|value| value.ref_id()).collect();
        roots.extend(self.temp_roots.iter().filter_map(|value| value.ref_id()));
        for frame in &self.frames {
            frame.collect_refs(&mut roots);
        }
        roots.extend(self.handled.ref_id());
        roots.extend(self.builtins.values().filter_map(|value| value.ref_id()));
        roots.extend(self.exc_classes.iter().copied());
        roots.push(self.object_class);
        roots.extend(self.modules.values().copied());
        roots.extend(self.repr_guard.iter().copied());
        roots.extend(self.sys_modules);
        let freed = self.heap.collect(roots);
        let live = self.heap.live_count();
        tracing::debug!(freed, live, "garbage collection");
        self.tracer.on_collect(freed, live);
    }

    fn push_call_result(&mut self, result: CallResult) {
        if let CallResult::Push(value) = result {
            self.push(value);
        }
    }

    fn load_const(&mut self, index: u16) -> RunResult<Value> {
        let code = Rc::clone(&self.frame().code);
        self.const_value(&code.consts[usize::from(index)])
    }

    fn const_value(&mut self, constant: &Const) -> RunResult<Value> {
        Ok(match constant {
            Const::None => Value::None,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(i) => Value::Int(*i),
            Const::BigInt(big) => self.new_int(big.clone())?,
            Const::Float(f) => Value::Float(*f),
            Const::Str(id) => Value::InternString(*id),
            Const::Bytes(bytes) => self.new_bytes(bytes.clone())?,
            Const::Ellipsis => Value::Ellipsis,
            Const::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.const_value(item)?);
                }
                self.new_tuple(values)?
            }
            Const::Names(names) => self.new_tuple(names.iter().map(|id| Value::InternString(*id)).collect())?,
        })
    }

    /// Pops the current frame after `Return` and delivers its value.
    fn return_from_frame(&mut self, value: Value, stop_depth: usize) -> RunResult<Option<FrameExit>> {
        let frame = self.frames.pop().expect("return without a frame");
        self.stack.truncate(frame.stack_base);
        self.tracer.on_return(self.frames.len());
        let value = match frame.kind {
            FrameKind::Init(instance) => {
                if !value.is_none() {
                    return Err(ExcType::type_error(format!(
                        "__init__() should return None, not '{}'",
                        self.type_name(value)
                    )));
                }
                Value::Ref(instance)
            }
            FrameKind::Generator(id) => {
                if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                    generator.finish(GenState::Returned);
                }
                value
            }
            FrameKind::Module | FrameKind::Function | FrameKind::ClassBody => value,
        };
        if self.frames.len() <= stop_depth {
            Ok(Some(FrameExit::Return(value)))
        } else {
            self.push(value);
            Ok(None)
        }
    }

    // ========================================================================
    // dispatch
    // ========================================================================

    /// Executes one instruction of the current frame.
    #[expect(clippy::too_many_lines)]
    fn step(&mut self, opcode: Opcode, stop_depth: usize) -> RunResult<Option<FrameExit>> {
        match opcode {
            // ====================================================================
            // stack manipulation
            // ====================================================================
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop();
            }
            Opcode::Dup => {
                let value = self.peek(0);
                self.push(value);
            }
            Opcode::Dup2 => {
                let (a, b) = (self.peek(1), self.peek(0));
                self.push(a);
                self.push(b);
            }
            Opcode::Rot2 => {
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot3 => {
                let len = self.stack.len();
                self.stack[len - 3..].rotate_right(1);
            }
            Opcode::Rot4 => {
                let len = self.stack.len();
                self.stack[len - 4..].rotate_right(1);
            }

            // ====================================================================
            // constants and variables
            // ====================================================================
            Opcode::LoadConst => {
                let index = fetch_u16!(self);
                let value = self.load_const(index)?;
                self.push(value);
            }
            Opcode::LoadNone => self.push(Value::None),
            Opcode::LoadLocal => {
                let slot = usize::from(fetch_u16!(self));
                let frame = self.frame();
                let value = frame.locals[slot];
                if matches!(value, Value::Undefined) {
                    let name = self.interns.get_str(frame.code.varnames[slot]);
                    return Err(ExcType::unbound_local_error(name));
                }
                self.push(value);
            }
            Opcode::StoreLocal => {
                let slot = usize::from(fetch_u16!(self));
                let value = self.pop();
                self.frame_mut().locals[slot] = value;
            }
            Opcode::DeleteLocal => {
                let slot = usize::from(fetch_u16!(self));
                let frame = self.frame_mut();
                if matches!(frame.locals[slot], Value::Undefined) {
                    let name = frame.code.varnames[slot];
                    return Err(ExcType::unbound_local_error(self.interns.get_str(name)));
                }
                frame.locals[slot] = Value::Undefined;
            }
            Opcode::LoadDeref => {
                let index = usize::from(fetch_u16!(self));
                let cell = self.frame().cells[index];
                let value = match self.heap.get(cell) {
                    HeapData::Cell(value) => *value,
                    _ => return Err(RunError::internal("closure slot is not a cell")),
                };
                if matches!(value, Value::Undefined) {
                    return Err(self.unbound_cell_error(index));
                }
                self.push(value);
            }
            Opcode::StoreDeref => {
                let index = usize::from(fetch_u16!(self));
                let value = self.pop();
                let cell = self.frame().cells[index];
                if let HeapData::Cell(slot) = self.heap.get_mut(cell) {
                    *slot = value;
                }
            }
            Opcode::DeleteDeref => {
                let index = usize::from(fetch_u16!(self));
                let cell = self.frame().cells[index];
                let old = match self.heap.get_mut(cell) {
                    HeapData::Cell(slot) => std::mem::replace(slot, Value::Undefined),
                    _ => Value::Undefined,
                };
                if matches!(old, Value::Undefined) {
                    return Err(self.unbound_cell_error(index));
                }
            }
            Opcode::LoadClosure => {
                let index = usize::from(fetch_u16!(self));
                let cell = self.frame().cells[index];
                self.push(Value::Ref(cell));
            }
            Opcode::LoadGlobal => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let globals = self.frame().globals;
                let value = self.lookup_global(globals, name)?;
                self.push(value);
            }
            Opcode::StoreGlobal => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let value = self.pop();
                let globals = self.frame().globals;
                self.module_attrs_mut(globals)?.insert(name, value);
            }
            Opcode::DeleteGlobal => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let globals = self.frame().globals;
                if self.module_attrs_mut(globals)?.shift_remove(&name).is_none() {
                    return Err(ExcType::name_error(self.interns.get_str(name)));
                }
            }
            Opcode::LoadName => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let frame = self.frame();
                let (namespace, globals) = (frame.namespace, frame.globals);
                let local = namespace.and_then(|ns| self.module_get(ns, name));
                let value = match local {
                    Some(value) => value,
                    None => self.lookup_global(globals, name)?,
                };
                self.push(value);
            }
            Opcode::StoreName => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let value = self.pop();
                let frame = self.frame();
                let namespace = frame.namespace.unwrap_or(frame.globals);
                self.module_attrs_mut(namespace)?.insert(name, value);
            }
            Opcode::DeleteName => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let frame = self.frame();
                let namespace = frame.namespace.unwrap_or(frame.globals);
                if self.module_attrs_mut(namespace)?.shift_remove(&name).is_none() {
                    return Err(ExcType::name_error(self.interns.get_str(name)));
                }
            }
            Opcode::LoadAssertionError => {
                let class = self.exc_classes[ExcType::AssertionError as usize];
                self.push(Value::Ref(class));
            }

            // ====================================================================
            // attributes and items
            // ====================================================================
            Opcode::LoadAttr => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let obj = self.pop();
                let value = self.get_attr(obj, name)?;
                self.push(value);
            }
            Opcode::StoreAttr => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let obj = self.pop();
                let value = self.pop();
                self.set_attr(obj, name, value)?;
            }
            Opcode::DeleteAttr => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let obj = self.pop();
                self.del_attr(obj, name)?;
            }
            Opcode::BinarySubscr => {
                let index = self.pop();
                let obj = self.pop();
                let value = self.getitem(obj, index)?;
                self.push(value);
            }
            Opcode::StoreSubscr => {
                let index = self.pop();
                let obj = self.pop();
                let value = self.pop();
                self.setitem(obj, index, value)?;
            }
            Opcode::DeleteSubscr => {
                let index = self.pop();
                let obj = self.pop();
                self.delitem(obj, index)?;
            }
            Opcode::BuildSlice => {
                let count = fetch_u8!(self);
                let step = if count == 3 { self.pop() } else { Value::None };
                let stop = self.pop();
                let start = self.pop();
                let slice = self.alloc(HeapData::Slice(crate::types::Slice { start, stop, step }))?;
                self.push(Value::Ref(slice));
            }

            // ====================================================================
            // operators
            // ====================================================================
            Opcode::BinaryOp => {
                let op = operator(fetch_u8!(self))?;
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.binary_op(lhs, rhs, op)?;
                self.push(result);
            }
            Opcode::InplaceOp => {
                let op = operator(fetch_u8!(self))?;
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.inplace_op(lhs, rhs, op)?;
                self.push(result);
            }
            Opcode::UnaryNeg => {
                let value = self.pop();
                let result = self.unary_neg(value)?;
                self.push(result);
            }
            Opcode::UnaryPos => {
                let value = self.pop();
                let result = self.unary_pos(value)?;
                self.push(result);
            }
            Opcode::UnaryInvert => {
                let value = self.pop();
                let result = self.unary_invert(value)?;
                self.push(result);
            }
            Opcode::UnaryNot => {
                let value = self.pop();
                let truthy = self.truthy(value)?;
                self.push(Value::Bool(!truthy));
            }
            Opcode::CompareOp => {
                let byte = fetch_u8!(self);
                let op = CmpOperator::from_repr(byte)
                    .ok_or_else(|| RunError::internal(format!("invalid comparison operator {byte}")))?;
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.compare_op(lhs, rhs, op)?;
                self.push(result);
            }

            // ====================================================================
            // building
            // ====================================================================
            Opcode::BuildTuple => {
                let count = usize::from(fetch_u16!(self));
                let items = self.pop_n(count);
                let tuple = self.new_tuple(items)?;
                self.push(tuple);
            }
            Opcode::BuildList => {
                let count = usize::from(fetch_u16!(self));
                let items = self.pop_n(count);
                let list = self.new_list(items)?;
                self.push(list);
            }
            Opcode::BuildSet => {
                let count = usize::from(fetch_u16!(self));
                let items = self.pop_n(count);
                let set = self.build_set(items)?;
                self.push(set);
            }
            Opcode::BuildMap => {
                let count = usize::from(fetch_u16!(self));
                let items = self.pop_n(count * 2);
                let dict = self.build_dict(items)?;
                self.push(dict);
            }
            Opcode::ListAppend => {
                let depth = usize::from(fetch_u8!(self));
                let value = self.pop();
                let list = self.peek(depth - 1);
                self.list_append(list, value)?;
            }
            Opcode::SetAdd => {
                let depth = usize::from(fetch_u8!(self));
                let value = self.pop();
                let set = self.peek(depth - 1);
                self.set_add(set, value)?;
            }
            Opcode::MapAdd => {
                let depth = usize::from(fetch_u8!(self));
                let value = self.pop();
                let key = self.pop();
                let dict = self.peek(depth - 1);
                self.dict_set(dict, key, value)?;
            }
            Opcode::ListExtend => {
                let iterable = self.pop();
                let list = self.peek(0);
                self.list_extend(list, iterable)?;
            }
            Opcode::SetUpdate => {
                let iterable = self.pop();
                let set = self.peek(0);
                for item in self.collect_iter(iterable)? {
                    self.set_add(set, item)?;
                }
            }
            Opcode::DictUpdate => {
                let mapping = self.pop();
                let dict = self.peek(0);
                self.dict_update(dict, mapping, false)?;
            }
            Opcode::DictMerge => {
                let mapping = self.pop();
                let dict = self.peek(0);
                self.dict_update(dict, mapping, true)?;
            }
            Opcode::ListToTuple => {
                let list = self.pop();
                let items = self.sequence_items(list).unwrap_or_default();
                let tuple = self.new_tuple(items)?;
                self.push(tuple);
            }
            Opcode::BuildString => {
                let count = usize::from(fetch_u16!(self));
                let parts = self.pop_n(count);
                let value = self.build_string(&parts)?;
                self.push(value);
            }
            Opcode::FormatValue => {
                let flags = fetch_u8!(self);
                self.op_format_value(flags)?;
            }
            Opcode::UnpackSequence => {
                let count = usize::from(fetch_u8!(self));
                let value = self.pop();
                self.unpack_sequence(value, count)?;
            }
            Opcode::UnpackEx => {
                let before = usize::from(fetch_u8!(self));
                let after = usize::from(fetch_u8!(self));
                let value = self.pop();
                self.unpack_ex(value, before, after)?;
            }

            // ====================================================================
            // control flow
            // ====================================================================
            Opcode::Jump => {
                let offset = fetch_i16!(self);
                self.jump(offset);
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let offset = fetch_i16!(self);
                let value = self.pop();
                if self.truthy(value)? == (opcode == Opcode::JumpIfTrue) {
                    self.jump(offset);
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let offset = fetch_i16!(self);
                let value = self.peek(0);
                if self.truthy(value)? == (opcode == Opcode::JumpIfTrueOrPop) {
                    self.jump(offset);
                } else {
                    self.pop();
                }
            }
            Opcode::GetIter => {
                let value = self.pop();
                let iter = self.get_iter(value)?;
                self.push(iter);
            }
            Opcode::ForIter => {
                let offset = fetch_i16!(self);
                let iter = self.peek(0);
                match self.for_iter_next(iter)? {
                    Some(value) => self.push(value),
                    None => {
                        self.pop();
                        self.jump(offset);
                    }
                }
            }
            Opcode::Return => {
                let value = self.pop();
                return self.return_from_frame(value, stop_depth);
            }

            // ====================================================================
            // functions and classes
            // ====================================================================
            Opcode::MakeFunction => {
                let index = fetch_u16!(self);
                let flags = fetch_u8!(self);
                let function = self.make_function(index, flags)?;
                self.push(function);
            }
            Opcode::Call => {
                let count = usize::from(fetch_u8!(self));
                let args = self.pop_n(count);
                let callable = self.pop();
                let result = self.call_value(callable, ArgValues::new(args))?;
                self.push_call_result(result);
            }
            Opcode::CallKw => {
                let count = usize::from(fetch_u8!(self));
                let names = self.pop();
                let args = self.pop_n(count);
                let callable = self.pop();
                let args = self.keyword_args(names, args)?;
                let result = self.call_value(callable, args)?;
                self.push_call_result(result);
            }
            Opcode::CallEx => {
                let has_kwargs = fetch_u8!(self) != 0;
                let kwargs = if has_kwargs { Some(self.pop()) } else { None };
                let positional = self.pop();
                let callable = self.pop();
                let args = self.expand_call_args(positional, kwargs)?;
                let result = self.call_value(callable, args)?;
                self.push_call_result(result);
            }
            Opcode::BuildClass => {
                let bases = self.pop();
                let name = self.pop();
                let body = self.pop();
                let class = self.build_class(body, name, bases)?;
                self.push(class);
            }

            // ====================================================================
            // generators and coroutines
            // ====================================================================
            Opcode::Yield => {
                let value = self.pop();
                return Ok(Some(self.yield_from_frame(value)));
            }
            Opcode::GetYieldFromIter => {
                let value = self.pop();
                let iter = if self.is_generator(value) { value } else { self.get_iter(value)? };
                self.push(iter);
            }
            Opcode::YieldFrom => return self.op_yield_from(),
            Opcode::Await => {}

            // ====================================================================
            // exceptions
            // ====================================================================
            Opcode::Raise => {
                let form = fetch_u8!(self);
                return Err(self.op_raise(form));
            }
            Opcode::PushExcInfo => {
                let exc = self.pop();
                let previous = std::mem::replace(&mut self.handled, exc);
                self.push(previous);
                self.push(exc);
            }
            Opcode::PopExcept => {
                self.handled = self.pop();
            }
            Opcode::CheckExcMatch => {
                let class = self.pop();
                let exc = self.pop();
                let matched = self.exception_matches(exc, class)?;
                self.push(Value::Bool(matched));
            }
            Opcode::Reraise => {
                let exc = self.pop();
                return Err(self.reraise_value(exc));
            }
            Opcode::PopExceptReraise => {
                let exc = self.pop();
                self.handled = self.pop();
                return Err(self.reraise_value(exc));
            }

            // ====================================================================
            // context managers
            // ====================================================================
            Opcode::BeforeWith => {
                let manager = self.pop();
                let exit = self.lookup_special(manager, StaticStrings::DunderExit.id())?;
                let enter = self.lookup_special(manager, StaticStrings::DunderEnter.id())?;
                let (Some(exit), Some(enter)) = (exit, enter) else {
                    let type_name = self.type_name(manager);
                    return Err(ExcType::type_error(format!(
                        "'{type_name}' object does not support the context manager protocol"
                    )));
                };
                self.push(exit);
                let entered = self.call_sync(enter, ArgValues::empty())?;
                self.push(entered);
            }
            Opcode::WithExceptStart => {
                let exc = self.peek(0);
                let exit = self.peek(2);
                let class = self.class_of_value(exc);
                let traceback = Value::None;
                let result = self.call_sync(exit, ArgValues::new([class, exc, traceback]))?;
                self.push(result);
            }

            // ====================================================================
            // pattern matching
            // ====================================================================
            Opcode::MatchSequence => {
                let fixed = usize::from(fetch_u16!(self));
                let has_star = fetch_u8!(self) != 0;
                let subject = self.peek(0);
                let matched = self.match_sequence(subject, fixed, has_star);
                self.push(Value::Bool(matched));
            }
            Opcode::MatchMapping => {
                let subject = self.peek(0);
                let matched = self.is_dict(subject);
                self.push(Value::Bool(matched));
            }
            Opcode::MatchKeys => {
                let keys = self.peek(0);
                let subject = self.peek(1);
                let values = self.match_keys(subject, keys)?;
                self.push(values);
            }
            Opcode::StashCapture => {
                let slot = usize::from(fetch_u16!(self));
                let value = self.pop();
                let captures = &mut self.frame_mut().captures;
                if captures.len() <= slot {
                    captures.resize(slot + 1, Value::Undefined);
                }
                captures[slot] = value;
            }
            Opcode::LoadCapture => {
                let slot = usize::from(fetch_u16!(self));
                let value = self
                    .frame_mut()
                    .captures
                    .get_mut(slot)
                    .map_or(Value::Undefined, |value| std::mem::replace(value, Value::Undefined));
                self.push(value);
            }
            Opcode::MatchClass => {
                let count = usize::from(fetch_u8!(self));
                let names = self.pop();
                let class = self.pop();
                let subject = self.pop();
                let result = self.match_class(subject, class, count, names)?;
                self.push(result);
            }
            Opcode::CopyDictWithoutKeys => {
                let keys = self.pop();
                let subject = self.peek(0);
                let rest = self.copy_dict_without_keys(subject, keys)?;
                self.push(rest);
            }

            // ====================================================================
            // imports
            // ====================================================================
            Opcode::ImportName => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let leaf = fetch_u8!(self) != 0;
                let module = self.import_name(name, leaf)?;
                self.push(module);
            }
            Opcode::ImportFrom => {
                let idx = fetch_u16!(self);
                let name = self.name_at(idx);
                let module = self.peek(0);
                let value = self.import_from(module, name)?;
                self.push(value);
            }
            Opcode::ImportStar => {
                let module = self.pop();
                self.import_star(module)?;
            }
        }
        Ok(None)
    }

    /// Module attribute, then builtin, else `NameError`.
    fn lookup_global(&self, globals: HeapId, name: StringId) -> RunResult<Value> {
        if let Some(value) = self.module_get(globals, name) {
            return Ok(value);
        }
        self.builtins
            .get(&name)
            .copied()
            .ok_or_else(|| ExcType::name_error(self.interns.get_str(name)))
    }

    fn unbound_cell_error(&self, index: usize) -> RunError {
        let code = &self.frame().code;
        let name = self.interns.get_str(code.cell_name(index));
        if index < code.cellvars.len() {
            ExcType::unbound_local_error(name)
        } else {
            ExcType::name_error_free_variable(name)
        }
    }
}

fn operator(byte: u8) -> RunResult<Operator> {
    Operator::from_repr(byte).ok_or_else(|| RunError::internal(format!("invalid operator {byte}")))
}
