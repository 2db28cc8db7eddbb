//! Builtin functions, types and native method slots.
//!
//! Every builtin is a small `Copy` value stored inline in `Value::Builtin`; calling one
//! dispatches to the submodule that implements it.

mod attrs;
mod convert;
mod iteration;
mod min_max;
mod namespace;
mod numeric;
mod print;
mod slots;
mod sorted;
mod sum;
mod type_;

use strum::{EnumIter, IntoStaticStr};

pub(crate) use self::slots::NativeSlot;
use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    intern::{Interns, StringId},
    io::PrintWriter,
    modules::ModuleFunction,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::Type,
    value::Value,
};

/// A callable (or stream) implemented natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Builtins {
    /// A builtin function like `print` or `len`.
    Function(BuiltinFunction),
    /// A builtin type; calling it constructs a value.
    Type(Type),
    /// An unbound method of a builtin type, e.g. `str.upper`. The first argument is the receiver.
    TypeMethod(Type, StringId),
    /// A native method of `object` or `BaseException`, bound like a Python function.
    Slot(NativeSlot),
    /// `sys.stdout` or `sys.stderr`.
    Stream(Stream),
    /// A function of a native module such as `math.sqrt`.
    Module(ModuleFunction),
}

impl Builtins {
    /// Calls this builtin.
    pub fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: ArgValues,
    ) -> RunResult<Value> {
        match self {
            Self::Function(function) => function.call(vm, args),
            Self::Type(ty) => type_::construct(vm, ty, args),
            Self::TypeMethod(ty, name) => vm.call_type_method(ty, name, args),
            Self::Slot(slot) => slot.call(vm, args),
            Self::Stream(_) => Err(ExcType::type_error_not_callable(Type::TextIO.name())),
            Self::Module(function) => function.call(vm, args),
        }
    }

    /// The type reported by `type()`.
    #[must_use]
    pub fn py_type(self) -> Type {
        match self {
            Self::Type(_) => Type::Type,
            Self::Stream(_) => Type::TextIO,
            Self::Function(_) | Self::TypeMethod(..) | Self::Slot(_) | Self::Module(_) => Type::BuiltinFunction,
        }
    }

    /// `__name__` of the builtin.
    #[must_use]
    pub fn name(self, interns: &Interns) -> String {
        match self {
            Self::Function(function) => function.name().to_owned(),
            Self::Type(ty) => ty.name().to_owned(),
            Self::TypeMethod(_, name) => interns.get_str(name).to_owned(),
            Self::Slot(slot) => slot.name().to_owned(),
            Self::Stream(stream) => stream.name().to_owned(),
            Self::Module(function) => function.name().to_owned(),
        }
    }

    #[must_use]
    pub fn repr(self, interns: &Interns) -> String {
        match self {
            Self::Function(function) => format!("<built-in function {}>", function.name()),
            Self::Type(ty) => format!("<class '{ty}'>"),
            Self::TypeMethod(ty, name) => format!("<method '{}' of '{ty}' objects>", interns.get_str(name)),
            Self::Slot(slot) => format!("<slot wrapper '{}' of '{}' objects>", slot.name(), slot.owner()),
            Self::Stream(stream) => {
                format!("<_io.TextIOWrapper name='<{}>' mode='w' encoding='utf-8'>", stream.name())
            }
            Self::Module(function) => format!("<built-in function {}>", function.name()),
        }
    }
}

/// Builtin functions bound in the builtins namespace by their lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BuiltinFunction {
    Abs,
    All,
    Any,
    Ascii,
    Bin,
    Callable,
    Chr,
    Delattr,
    Dir,
    Divmod,
    Format,
    Getattr,
    Globals,
    Hasattr,
    Hash,
    Hex,
    Id,
    Input,
    Isinstance,
    Issubclass,
    Iter,
    Len,
    Locals,
    Max,
    Min,
    Next,
    Oct,
    Ord,
    Pow,
    Print,
    Repr,
    Round,
    Setattr,
    Sorted,
    Sum,
    Vars,
}

impl BuiltinFunction {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: ArgValues,
    ) -> RunResult<Value> {
        match self {
            Self::Abs => numeric::builtin_abs(vm, args),
            Self::All => iteration::builtin_all(vm, args),
            Self::Any => iteration::builtin_any(vm, args),
            Self::Ascii => convert::builtin_ascii(vm, args),
            Self::Bin => convert::builtin_radix(vm, args, "bin", 2, "0b"),
            Self::Callable => attrs::builtin_callable(vm, args),
            Self::Chr => convert::builtin_chr(vm, args),
            Self::Delattr => attrs::builtin_delattr(vm, args),
            Self::Dir => namespace::builtin_dir(vm, args),
            Self::Divmod => numeric::builtin_divmod(vm, args),
            Self::Format => convert::builtin_format(vm, args),
            Self::Getattr => attrs::builtin_getattr(vm, args),
            Self::Globals => namespace::builtin_globals(vm, args),
            Self::Hasattr => attrs::builtin_hasattr(vm, args),
            Self::Hash => convert::builtin_hash(vm, args),
            Self::Hex => convert::builtin_radix(vm, args, "hex", 16, "0x"),
            Self::Id => convert::builtin_id(vm, args),
            Self::Input => print::builtin_input(vm, args),
            Self::Isinstance => attrs::builtin_isinstance(vm, args),
            Self::Issubclass => attrs::builtin_issubclass(vm, args),
            Self::Iter => iteration::builtin_iter(vm, args),
            Self::Len => iteration::builtin_len(vm, args),
            Self::Locals => namespace::builtin_locals(vm, args),
            Self::Max => min_max::builtin_min_max(vm, args, true),
            Self::Min => min_max::builtin_min_max(vm, args, false),
            Self::Next => iteration::builtin_next(vm, args),
            Self::Oct => convert::builtin_radix(vm, args, "oct", 8, "0o"),
            Self::Ord => convert::builtin_ord(vm, args),
            Self::Pow => numeric::builtin_pow(vm, args),
            Self::Print => print::builtin_print(vm, args),
            Self::Repr => convert::builtin_repr(vm, args),
            Self::Round => numeric::builtin_round(vm, args),
            Self::Setattr => attrs::builtin_setattr(vm, args),
            Self::Sorted => sorted::builtin_sorted(vm, args),
            Self::Sum => sum::builtin_sum(vm, args),
            Self::Vars => namespace::builtin_vars(vm, args),
        }
    }
}

/// The standard streams exposed as `sys.stdout` and `sys.stderr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn function_names_are_lowercase() {
        assert_eq!(BuiltinFunction::Isinstance.name(), "isinstance");
        assert!(BuiltinFunction::iter().all(|f| f.name().chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn reprs_follow_cpython() {
        let interns = Interns::new();
        assert_eq!(Builtins::Function(BuiltinFunction::Len).repr(&interns), "<built-in function len>");
        assert_eq!(Builtins::Type(Type::Int).repr(&interns), "<class 'int'>");
        assert_eq!(Builtins::Type(Type::Int).py_type(), Type::Type);
        assert_eq!(Builtins::Stream(Stream::Stdout).py_type(), Type::TextIO);
    }
}
