use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    exception_public::{Exception, StackFrame},
    fstring::FormatError,
    heap::HeapId,
    intern::{Interns, StringId},
    parse::CodeRange,
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes.
///
/// Declared parents-first so the VM can create the class objects in declaration order.
/// The string form matches the Python class name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    /// Raised inside a generator by `close()`; not an `Exception` subclass.
    GeneratorExit,
    Exception,

    ArithmeticError,
    FloatingPointError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    NotImplementedError,
    RecursionError,

    NameError,
    UnboundLocalError,

    ValueError,
    UnicodeDecodeError,

    ImportError,
    ModuleNotFoundError,

    OSError,
    FileNotFoundError,
    PermissionError,
    TimeoutError,

    SyntaxError,
    IndentationError,

    AssertionError,
    AttributeError,
    EOFError,
    MemoryError,
    StopIteration,
    TypeError,
}

impl ExcType {
    /// The direct base class, `None` for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        let parent = match self {
            Self::BaseException => return None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => Self::BaseException,
            Self::FloatingPointError | Self::OverflowError | Self::ZeroDivisionError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::NotImplementedError | Self::RecursionError => Self::RuntimeError,
            Self::UnboundLocalError => Self::NameError,
            Self::UnicodeDecodeError => Self::ValueError,
            Self::ModuleNotFoundError => Self::ImportError,
            Self::FileNotFoundError | Self::PermissionError | Self::TimeoutError => Self::OSError,
            Self::IndentationError => Self::SyntaxError,
            _ => Self::Exception,
        };
        Some(parent)
    }

    /// Whether `except handler_type:` catches an exception of this type.
    ///
    /// ```
    /// use skein::ExcType;
    ///
    /// assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
    /// assert!(!ExcType::TypeError.is_subclass_of(ExcType::ValueError));
    /// assert!(!ExcType::GeneratorExit.is_subclass_of(ExcType::Exception));
    /// ```
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    /// An exception of this type carrying `msg` as its single argument.
    #[must_use]
    pub(crate) fn error(self, msg: impl Display) -> RunError {
        SimpleException::new_msg(self, msg).into()
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl Display) -> RunError {
        Self::TypeError.error(msg)
    }

    #[must_use]
    pub(crate) fn value_error(msg: impl Display) -> RunError {
        Self::ValueError.error(msg)
    }

    #[must_use]
    pub(crate) fn runtime_error(msg: impl Display) -> RunError {
        Self::RuntimeError.error(msg)
    }

    #[must_use]
    pub(crate) fn index_error(msg: impl Display) -> RunError {
        Self::IndexError.error(msg)
    }

    #[must_use]
    pub(crate) fn overflow_error(msg: impl Display) -> RunError {
        Self::OverflowError.error(msg)
    }

    /// AttributeError for a failed attribute read; CPython shows no caret for these.
    #[must_use]
    pub(crate) fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        let mut raise =
            ExceptionRaise::from(SimpleException::new_msg(Self::AttributeError, format!("'{type_name}' object has no attribute '{attr}'")));
        raise.hide_caret = true;
        RunError::Exc(Box::new(raise))
    }

    #[must_use]
    pub(crate) fn attribute_error_class(class_name: &str, attr: &str) -> RunError {
        Self::AttributeError.error(format!("type object '{class_name}' has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn attribute_error_module(module_name: &str, attr: &str) -> RunError {
        Self::AttributeError.error(format!("module '{module_name}' has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn attribute_error_readonly(type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.error(format!("'{type_name}' object attribute '{attr}' is read-only"))
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.error(format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        Self::UnboundLocalError.error(format!(
            "cannot access local variable '{name}' where it is not associated with a value"
        ))
    }

    #[must_use]
    pub(crate) fn name_error_free_variable(name: &str) -> RunError {
        Self::NameError.error(format!(
            "cannot access free variable '{name}' where it is not associated with a value in enclosing scope"
        ))
    }

    #[must_use]
    pub(crate) fn binary_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'"
        ))
    }

    #[must_use]
    pub(crate) fn unary_type_error(op: &str, value_type: &str) -> RunError {
        Self::type_error(format!("bad operand type for unary {op}: '{value_type}'"))
    }

    #[must_use]
    pub(crate) fn compare_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::type_error(format!(
            "'{op}' not supported between instances of '{lhs_type}' and '{rhs_type}'"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    #[must_use]
    pub(crate) fn type_error_not_subscriptable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not subscriptable"))
    }

    #[must_use]
    pub(crate) fn type_error_no_item_assignment(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object does not support item assignment"))
    }

    #[must_use]
    pub(crate) fn type_error_no_item_deletion(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object does not support item deletion"))
    }

    #[must_use]
    pub(crate) fn type_error_unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    #[must_use]
    pub(crate) fn type_error_no_len(type_name: &str) -> RunError {
        Self::type_error(format!("object of type '{type_name}' has no len()"))
    }

    #[must_use]
    pub(crate) fn type_error_indices(container: &str, index_type: &str) -> RunError {
        Self::type_error(format!(
            "{container} indices must be integers or slices, not {index_type}"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_integer(type_name: &str) -> RunError {
        Self::type_error(format!(
            "'{type_name}' object cannot be interpreted as an integer"
        ))
    }

    /// `len() takes exactly one argument (2 given)`
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, actual: usize) -> RunError {
        Self::type_error(format!("{name}() takes no arguments ({actual} given)"))
    }

    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        let plural = if min == 1 { "" } else { "s" };
        Self::type_error(format!("{name} expected at least {min} argument{plural}, got {actual}"))
    }

    #[must_use]
    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        let plural = if max == 1 { "" } else { "s" };
        Self::type_error(format!("{name} expected at most {max} argument{plural}, got {actual}"))
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }

    /// `f() missing 2 required positional arguments: 'a' and 'b'`
    #[must_use]
    pub(crate) fn type_error_missing(name: &str, kind: &str, missing: &[&str]) -> RunError {
        let count = missing.len();
        let plural = if count == 1 { "" } else { "s" };
        Self::type_error(format!(
            "{name}() missing {count} required {kind} argument{plural}: {}",
            format_param_names(missing)
        ))
    }

    /// `f() takes 2 positional arguments but 3 were given`
    #[must_use]
    pub(crate) fn type_error_too_many_positional(name: &str, min: usize, max: usize, given: usize) -> RunError {
        let takes = if min == max {
            format!("{max}")
        } else {
            format!("from {min} to {max}")
        };
        let plural = if max == 1 { "" } else { "s" };
        let were = if given == 1 { "was" } else { "were" };
        Self::type_error(format!(
            "{name}() takes {takes} positional argument{plural} but {given} {were} given"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_multiple_values(name: &str, key: &str) -> RunError {
        Self::type_error(format!("{name}() got multiple values for argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        Self::type_error(format!("{name}() got an unexpected keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_positional_only(name: &str, key: &str) -> RunError {
        Self::type_error(format!(
            "{name}() got some positional-only arguments passed as keyword arguments: '{key}'"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_kwargs_not_mapping(type_name: &str) -> RunError {
        Self::type_error(format!("argument after ** must be a mapping, not {type_name}"))
    }

    #[must_use]
    pub(crate) fn type_error_kwargs_nonstring_key() -> RunError {
        Self::type_error("keywords must be strings")
    }

    #[must_use]
    pub(crate) fn zero_division(msg: &'static str) -> RunError {
        Self::ZeroDivisionError.error(msg)
    }

    #[must_use]
    pub(crate) fn module_not_found(module_name: &str) -> RunError {
        Self::ModuleNotFoundError.error(format!("No module named '{module_name}'"))
    }

    #[must_use]
    pub(crate) fn cannot_import_name(name: &str, module_name: &str) -> RunError {
        Self::ImportError.error(format!("cannot import name '{name}' from '{module_name}'"))
    }

    #[must_use]
    pub(crate) fn stop_iteration() -> RunError {
        SimpleException::new(Self::StopIteration, None).into()
    }

    #[must_use]
    pub(crate) fn generator_already_executing() -> RunError {
        Self::value_error("generator already executing")
    }

    #[must_use]
    pub(crate) fn generator_send_not_started() -> RunError {
        Self::type_error("can't send non-None value to a just-started generator")
    }

    #[must_use]
    pub(crate) fn generator_ignored_exit() -> RunError {
        Self::runtime_error("generator ignored GeneratorExit")
    }

    #[must_use]
    pub(crate) fn not_base_exception() -> RunError {
        Self::type_error("exceptions must derive from BaseException")
    }

    #[must_use]
    pub(crate) fn except_invalid_type() -> RunError {
        Self::type_error("catching classes that do not inherit from BaseException is not allowed")
    }

    #[must_use]
    pub(crate) fn no_active_exception() -> RunError {
        Self::runtime_error("No active exception to reraise")
    }
}

/// An exception that has not been materialised as a heap instance.
///
/// Native code raises these; the VM turns one into an instance of the builtin class only when
/// a handler catches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({arg:?})", self.exc_type),
            None => write!(f, "{}()", self.exc_type),
        }
    }
}

impl From<Exception> for SimpleException {
    fn from(exc: Exception) -> Self {
        Self::new(exc.exc_type(), exc.into_message())
    }
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl Display) -> Self {
        Self::new(exc_type, Some(arg.to_string()))
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

/// A source file known to the VM, for traceback preview lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SourceFile {
    pub filename: String,
    pub source: String,
}

/// One traceback entry, resolved to strings only when the exception leaves the VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct RawStackFrame {
    pub position: CodeRange,
    pub frame_name: StringId,
    /// Index into the VM's source table.
    pub source: u16,
    pub hide_caret: bool,
}

impl RawStackFrame {
    pub(crate) fn resolve(&self, interns: &Interns, sources: &[SourceFile]) -> StackFrame {
        let (filename, source) = sources
            .get(usize::from(self.source))
            .map_or(("<unknown>", ""), |file| (file.filename.as_str(), file.source.as_str()));
        let mut frame = StackFrame::from_position(
            self.position,
            filename,
            source,
            Some(interns.get_str(self.frame_name).to_owned()),
        );
        frame.hide_caret = self.hide_caret;
        frame
    }
}

/// A raised exception on its way to a handler.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionRaise {
    /// Type and message; for instances this is the nearest builtin ancestor.
    pub exc: SimpleException,
    /// The exception object when user code raised an instance (or it was already caught once).
    pub instance: Option<HeapId>,
    /// Traceback entries, innermost first.
    pub frames: Vec<RawStackFrame>,
    /// Suppresses the caret marker on the innermost frame.
    pub hide_caret: bool,
    /// Set by a bare `raise`: `frames` already holds an entry for the re-raising frame.
    pub reraised: bool,
}

impl From<SimpleException> for ExceptionRaise {
    fn from(exc: SimpleException) -> Self {
        Self {
            exc,
            instance: None,
            frames: Vec::new(),
            hide_caret: false,
            reraised: false,
        }
    }
}

impl From<Exception> for ExceptionRaise {
    fn from(exc: Exception) -> Self {
        SimpleException::from(exc).into()
    }
}

impl ExceptionRaise {
    /// An exception raised as a heap instance whose nearest builtin class is `exc_type`.
    pub(crate) fn from_instance(exc_type: ExcType, instance: HeapId, frames: Vec<RawStackFrame>) -> Self {
        Self {
            exc: SimpleException::new(exc_type, None),
            instance: Some(instance),
            frames,
            hide_caret: false,
            reraised: false,
        }
    }

    /// Records the frame the exception is passing through, unless a bare `raise` already did.
    pub(crate) fn add_frame(&mut self, position: CodeRange, frame_name: StringId, source: u16) {
        if self.reraised {
            self.reraised = false;
            return;
        }
        let first = self.frames.is_empty();
        self.frames.push(RawStackFrame {
            position,
            frame_name,
            source,
            hide_caret: first && self.hide_caret,
        });
    }

    /// Resolves the traceback, outermost frame first.
    pub(crate) fn traceback(&self, interns: &Interns, sources: &[SourceFile]) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| frame.resolve(interns, sources))
            .collect()
    }
}

/// Errors raised while executing bytecode.
///
/// - `Internal`: a bug in the engine, never caused by the program
/// - `Exc`: a Python exception that `try`/`except` can catch
/// - `UncatchableExc`: a resource limit that must terminate the run
#[derive(Debug)]
pub(crate) enum RunError {
    Internal(Cow<'static, str>),
    Exc(Box<ExceptionRaise>),
    UncatchableExc(Box<ExceptionRaise>),
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

impl From<FormatError> for RunError {
    fn from(err: FormatError) -> Self {
        let exc_type = match &err {
            FormatError::Overflow(_) => ExcType::OverflowError,
            FormatError::ValueError(_) => ExcType::ValueError,
        };
        exc_type.error(err)
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a catchable exception whose builtin type derives from `exc_type`.
    ///
    /// Only meaningful for exceptions raised natively; instances of user classes report
    /// their nearest builtin ancestor.
    pub fn is_exc_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.exc.exc_type().is_subclass_of(exc_type),
            _ => false,
        }
    }
}

/// Formats parameter names the way CPython lists them: `'a'`, `'a' and 'b'`, `'a', 'b' and 'c'`.
fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => format!("'{only}'"),
        [rest @ .., last] => {
            let rest: Vec<_> = rest.iter().map(|n| format!("'{n}'")).collect();
            format!("{} and '{last}'", rest.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn hierarchy() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::BaseException));
        assert!(ExcType::ModuleNotFoundError.is_subclass_of(ExcType::ImportError));
        assert!(!ExcType::SystemExit.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::LookupError.is_subclass_of(ExcType::KeyError));
    }

    #[test]
    fn parents_are_declared_first() {
        let order: Vec<ExcType> = ExcType::iter().collect();
        for (index, exc_type) in order.iter().enumerate() {
            if let Some(parent) = exc_type.parent() {
                let parent_index = order.iter().position(|t| *t == parent).unwrap();
                assert!(parent_index < index, "{parent} must come before {exc_type}");
            }
        }
    }

    #[test]
    fn param_names() {
        assert_eq!(format_param_names(&["a"]), "'a'");
        assert_eq!(format_param_names(&["a", "b"]), "'a' and 'b'");
        assert_eq!(format_param_names(&["a", "b", "c"]), "'a', 'b' and 'c'");
    }

    #[test]
    fn reraise_does_not_duplicate_frames() {
        let mut raise = ExceptionRaise::from(SimpleException::new_msg(ExcType::ValueError, "x"));
        raise.add_frame(CodeRange::default(), StringId::default(), 0);
        raise.reraised = true;
        raise.add_frame(CodeRange::default(), StringId::default(), 0);
        raise.add_frame(CodeRange::default(), StringId::default(), 0);
        assert_eq!(raise.frames.len(), 2);
    }
}
