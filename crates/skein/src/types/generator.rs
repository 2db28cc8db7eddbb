use crate::{bytecode::vm::Frame, intern::StringId, value::Value};

pub(crate) const GENERATOR_METHODS: &[&str] = &["send", "throw", "close"];

/// Lifecycle of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenState {
    /// Created but never resumed; only `send(None)` is allowed.
    Created,
    /// Paused at a `yield`.
    Suspended,
    /// Currently on the VM's frame stack.
    Running,
    /// The body returned or was closed.
    Returned,
    /// An exception escaped the body.
    Raised,
}

impl GenState {
    /// Whether the generator can never run again.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Returned | Self::Raised)
    }
}

/// A suspended generator frame.
///
/// While suspended, the frame's slice of the operand stack lives in `stack`; resuming pushes it
/// back onto the VM stack and rebases the frame.
#[derive(Debug)]
pub(crate) struct Generator {
    pub name: StringId,
    pub qualname: String,
    pub frame: Option<Box<Frame>>,
    pub stack: Vec<Value>,
    pub state: GenState,
}

impl Generator {
    #[must_use]
    pub fn new(frame: Frame, name: StringId, qualname: String) -> Self {
        Self {
            name,
            qualname,
            frame: Some(Box::new(frame)),
            stack: Vec::new(),
            state: GenState::Created,
        }
    }

    /// Drops the frame once the body returns or raises, recording which in `state`.
    pub fn finish(&mut self, state: GenState) {
        debug_assert!(state.is_finished());
        self.frame = None;
        self.stack.clear();
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_returned_and_raised_are_terminal() {
        assert!(GenState::Returned.is_finished());
        assert!(GenState::Raised.is_finished());
        assert!(!GenState::Created.is_finished());
        assert!(!GenState::Suspended.is_finished());
        assert!(!GenState::Running.is_finished());
    }
}
