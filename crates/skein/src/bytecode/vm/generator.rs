//! Generator suspension and resumption.
//!
//! A suspended generator owns its frame and its slice of the operand stack. Resuming pushes
//! both back, rebases the frame onto the current stack top and runs a nested loop that stops
//! at the next `yield` or when the body returns.

use super::{FrameExit, FrameKind, VM};
use crate::{
    bytecode::op::Opcode,
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::GenState,
    value::Value,
};

/// How a generator is resumed.
#[derive(Debug)]
pub(crate) enum GenAction {
    /// `next()` or `send(value)`.
    Send(Value),
    /// `throw(exc)`: raises at the paused `yield`.
    Throw(RunError),
    /// `close()`: raises `GeneratorExit` at the paused `yield`.
    Close,
}

/// Where a resumed generator stopped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum GenResult {
    Yielded(Value),
    Returned(Value),
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    pub(crate) fn generator_id(&self, value: Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Generator(_)) => Some(id),
            _ => None,
        }
    }

    pub(super) fn is_generator(&self, value: Value) -> bool {
        self.generator_id(value).is_some()
    }

    pub(super) fn generator_state(&self, id: HeapId) -> RunResult<GenState> {
        match self.heap.get(id) {
            HeapData::Generator(generator) => Ok(generator.state),
            _ => Err(RunError::internal("resumed object is not a generator")),
        }
    }

    /// Runs generator `id` until it yields, returns or raises.
    ///
    /// Collection waits until it is suspended again, since the caller may hold values the
    /// collector cannot see.
    pub(crate) fn resume_generator(&mut self, id: HeapId, action: GenAction) -> RunResult<GenResult> {
        self.nested(|vm| vm.resume_generator_frame(id, action))
    }

    /// [`resume_generator`](Self::resume_generator) for callers whose live values are all on the
    /// VM stack, in frames or in `temp_roots`; the generator body may collect.
    fn resume_generator_frame(&mut self, id: HeapId, action: GenAction) -> RunResult<GenResult> {
        match self.generator_state(id)? {
            GenState::Running => return Err(ExcType::generator_already_executing()),
            GenState::Returned | GenState::Raised => {
                return match action {
                    GenAction::Send(_) => Err(ExcType::stop_iteration()),
                    GenAction::Throw(err) => Err(err),
                    GenAction::Close => Ok(GenResult::Returned(Value::None)),
                };
            }
            GenState::Created => match &action {
                GenAction::Send(value) if !value.is_none() => return Err(ExcType::generator_send_not_started()),
                GenAction::Send(_) => {}
                GenAction::Throw(_) | GenAction::Close => {
                    let state = if matches!(action, GenAction::Throw(_)) {
                        GenState::Raised
                    } else {
                        GenState::Returned
                    };
                    if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                        generator.finish(state);
                    }
                    return match action {
                        GenAction::Throw(err) => Err(err),
                        _ => Ok(GenResult::Returned(Value::None)),
                    };
                }
            },
            GenState::Suspended => {}
        }

        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("resumed object is not a generator"));
        };
        let Some(mut frame) = generator.frame.take() else {
            return Err(RunError::internal("suspended generator has no frame"));
        };
        let saved = std::mem::take(&mut generator.stack);
        let started = generator.state == GenState::Suspended;
        generator.state = GenState::Running;
        let delegating = started && frame.code.bytecode.get(frame.ip) == Some(&(Opcode::YieldFrom as u8));

        let depth = self.frames.len();
        frame.stack_base = self.stack.len();
        self.stack.extend(saved);
        if let Err(err) = self.push_frame(*frame) {
            if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                generator.finish(GenState::Raised);
            }
            return Err(err);
        }
        self.tracer.on_generator_resume(self.frames.len());

        let pending = match action {
            GenAction::Send(value) => {
                if started {
                    self.push(value);
                }
                None
            }
            GenAction::Throw(err) if delegating => match self.throw_into_delegate(err)? {
                Some(yielded) => return Ok(GenResult::Yielded(yielded)),
                None => None,
            },
            GenAction::Throw(err) => Some(err),
            GenAction::Close => {
                if delegating {
                    let delegate = self.peek(0);
                    if let Some(delegate) = self.generator_id(delegate) {
                        if let Err(err) = self.resume_generator(delegate, GenAction::Close) {
                            self.raise_in_suspended(err, depth)?;
                            return self.finish_close(depth);
                        }
                    }
                }
                self.raise_in_suspended(generator_exit(), depth)?;
                return self.finish_close(depth);
            }
        };
        if let Some(err) = pending {
            self.raise_in_suspended(err, depth)?;
        }
        let exit = self.run_frames(depth)?;
        Ok(match exit {
            FrameExit::Yield(value) => GenResult::Yielded(value),
            FrameExit::Return(value) => GenResult::Returned(value),
        })
    }

    /// Raises `err` at the paused instruction of the generator frame on top.
    ///
    /// `Err` means no handler in the generator caught it and the frame is gone.
    fn raise_in_suspended(&mut self, err: RunError, depth: usize) -> RunResult<()> {
        self.handle_exception(err, depth)
    }

    /// Runs a generator after `GeneratorExit` was raised in it by `close()`.
    fn finish_close(&mut self, depth: usize) -> RunResult<GenResult> {
        match self.run_frames(depth) {
            Ok(FrameExit::Return(_)) => Ok(GenResult::Returned(Value::None)),
            Ok(FrameExit::Yield(_)) => Err(ExcType::generator_ignored_exit()),
            Err(err) => Err(err),
        }
    }

    /// Forwards `throw()` to the generator a paused `yield from` is delegating to.
    ///
    /// Returns the delegate's next yielded value, or `None` once the outer frame is ready to
    /// continue.
    fn throw_into_delegate(&mut self, err: RunError) -> RunResult<Option<Value>> {
        let depth = self.frames.len() - 1;
        let delegate = self.peek(0);
        let Some(delegate) = self.generator_id(delegate) else {
            self.raise_in_suspended(err, depth)?;
            return Ok(None);
        };
        match self.resume_generator(delegate, GenAction::Throw(err)) {
            Ok(GenResult::Yielded(value)) => {
                self.suspend_generator_frame();
                Ok(Some(value))
            }
            Ok(GenResult::Returned(value)) => {
                self.pop();
                self.push(value);
                self.frame_mut().ip += 1;
                Ok(None)
            }
            Err(err) => {
                self.raise_in_suspended(err, depth)?;
                Ok(None)
            }
        }
    }

    /// `Yield`: parks the current generator frame and leaves `run_frames`.
    pub(super) fn yield_from_frame(&mut self, value: Value) -> FrameExit {
        self.suspend_generator_frame();
        FrameExit::Yield(value)
    }

    fn suspend_generator_frame(&mut self) {
        let frame = self.frames.pop().expect("yield without a frame");
        let saved = self.stack.split_off(frame.stack_base);
        self.tracer.on_generator_suspend(self.frames.len());
        if let FrameKind::Generator(id) = frame.kind {
            if let HeapData::Generator(generator) = self.heap.get_mut(id) {
                generator.frame = Some(Box::new(frame));
                generator.stack = saved;
                generator.state = GenState::Suspended;
            }
        }
    }

    /// `YieldFrom`: `[iter, sent]` advances `iter`, re-running this instruction until it is
    /// exhausted and leaving its return value in place of `iter`.
    pub(super) fn op_yield_from(&mut self) -> RunResult<Option<FrameExit>> {
        let sent = self.pop();
        let iter = self.peek(0);
        let step = match self.generator_id(iter) {
            Some(delegate) => {
                if self.generator_state(delegate)?.is_finished() {
                    GenResult::Returned(Value::None)
                } else {
                    self.resume_generator_frame(delegate, GenAction::Send(sent))?
                }
            }
            None => {
                if !sent.is_none() {
                    return Err(ExcType::attribute_error(self.type_name(iter), "send"));
                }
                match self.next_value(iter)? {
                    Some(value) => GenResult::Yielded(value),
                    None => GenResult::Returned(Value::None),
                }
            }
        };
        match step {
            GenResult::Yielded(value) => {
                let frame = self.frame_mut();
                frame.ip = frame.instruction_ip;
                Ok(Some(self.yield_from_frame(value)))
            }
            GenResult::Returned(value) => {
                self.pop();
                self.push(value);
                Ok(None)
            }
        }
    }

    /// `StopIteration` carrying a generator's return value as `.value`.
    pub(crate) fn stop_iteration_with(&mut self, value: Value) -> RunError {
        let id = match self.new_exception_with_args(ExcType::StopIteration, vec![value]) {
            Ok(id) => id,
            Err(err) => return err,
        };
        if let HeapData::Instance(instance) = self.heap.get_mut(id) {
            instance.attrs.insert(StaticStrings::Value.id(), value);
        }
        ExceptionRaise::from_instance(ExcType::StopIteration, id, Vec::new()).into()
    }

    /// `ForIter`: the next item of `iter`, or `None` when it is exhausted.
    pub(super) fn for_iter_next(&mut self, iter: Value) -> RunResult<Option<Value>> {
        let Some(id) = self.generator_id(iter) else {
            return self.next_value(iter);
        };
        if self.generator_state(id)?.is_finished() {
            return Ok(None);
        }
        match self.resume_generator_frame(id, GenAction::Send(Value::None))? {
            GenResult::Yielded(value) => Ok(Some(value)),
            GenResult::Returned(_) => Ok(None),
        }
    }

    /// `next(gen)` with `held` kept reachable; a return value travels on the `StopIteration`.
    pub(crate) fn generator_next(&mut self, id: HeapId, held: &[Value]) -> RunResult<Value> {
        match self.with_roots(held, |vm| vm.resume_generator_frame(id, GenAction::Send(Value::None)))? {
            GenResult::Yielded(value) => Ok(value),
            GenResult::Returned(Value::None) => Err(ExcType::stop_iteration()),
            GenResult::Returned(value) => Err(self.stop_iteration_with(value)),
        }
    }

    /// `gen.send(value)`.
    pub(crate) fn generator_send(&mut self, id: HeapId, value: Value) -> RunResult<Value> {
        match self.resume_generator(id, GenAction::Send(value))? {
            GenResult::Yielded(value) => Ok(value),
            GenResult::Returned(Value::None) => Err(ExcType::stop_iteration()),
            GenResult::Returned(value) => Err(self.stop_iteration_with(value)),
        }
    }

    /// `gen.throw(exc)`, where `exc` is an exception class or instance.
    pub(crate) fn generator_throw(&mut self, id: HeapId, exc: Value) -> RunResult<Value> {
        let err = self.raise_value(exc);
        if matches!(err, RunError::Exc(ref raise) if raise.instance.is_none()) {
            // the operand was not an exception; report that instead of resuming
            return Err(err);
        }
        match self.resume_generator(id, GenAction::Throw(err))? {
            GenResult::Yielded(value) => Ok(value),
            GenResult::Returned(Value::None) => Err(ExcType::stop_iteration()),
            GenResult::Returned(value) => Err(self.stop_iteration_with(value)),
        }
    }

    /// `gen.close()`.
    pub(crate) fn generator_close(&mut self, id: HeapId) -> RunResult<Value> {
        match self.resume_generator(id, GenAction::Close) {
            Ok(_) => Ok(Value::None),
            Err(err) if err.is_exc_type(ExcType::GeneratorExit) || err.is_exc_type(ExcType::StopIteration) => {
                Ok(Value::None)
            }
            Err(err) => Err(err),
        }
    }

    /// `repr()` of a generator.
    pub(crate) fn generator_repr(&self, id: HeapId) -> String {
        match self.heap.get(id) {
            HeapData::Generator(generator) => {
                format!("<generator object {} at 0x{:x}>", generator.qualname, id.address())
            }
            _ => String::new(),
        }
    }
}

fn generator_exit() -> RunError {
    SimpleException::new(ExcType::GeneratorExit, None).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_exit_is_not_an_exception() {
        let err = generator_exit();
        assert!(err.is_exc_type(ExcType::GeneratorExit));
        assert!(!err.is_exc_type(ExcType::Exception));
        assert!(err.is_exc_type(ExcType::BaseException));
    }
}
