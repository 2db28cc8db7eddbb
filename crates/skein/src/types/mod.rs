//! Heap object layouts and the builtin type registry.

pub(crate) mod bytes;
pub(crate) mod class;
pub(crate) mod dict;
pub(crate) mod function;
pub(crate) mod generator;
pub(crate) mod hash_key;
pub(crate) mod iter;
pub(crate) mod list;
pub(crate) mod module;
pub(crate) mod number;
pub(crate) mod range;
pub(crate) mod set;
pub(crate) mod str;

use strum::{Display, EnumIter, IntoStaticStr};

pub(crate) use self::{
    class::{ClassObject, Instance},
    dict::Dict,
    function::{BoundMethod, Function, Property},
    generator::{GenState, Generator},
    hash_key::HashKey,
    iter::IterState,
    module::Module,
    range::{Range, Slice},
    set::Set,
};

/// Builtin types that are not heap classes.
///
/// `object` and the exception hierarchy are real classes (see `ClassObject`); every other
/// builtin value reports one of these as its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub(crate) enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    #[strum(serialize = "NotImplementedType")]
    NotImplementedType,
    #[strum(serialize = "ellipsis")]
    Ellipsis,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "bytes")]
    Bytes,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "tuple")]
    Tuple,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "set")]
    Set,
    #[strum(serialize = "frozenset")]
    FrozenSet,
    #[strum(serialize = "range")]
    Range,
    #[strum(serialize = "slice")]
    Slice,
    #[strum(serialize = "type")]
    Type,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "builtin_function_or_method")]
    BuiltinFunction,
    #[strum(serialize = "method")]
    Method,
    #[strum(serialize = "generator")]
    Generator,
    #[strum(serialize = "module")]
    Module,
    #[strum(serialize = "cell")]
    Cell,
    #[strum(serialize = "enumerate")]
    Enumerate,
    #[strum(serialize = "zip")]
    Zip,
    #[strum(serialize = "map")]
    Map,
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "reversed")]
    Reversed,
    #[strum(serialize = "list_iterator")]
    ListIterator,
    #[strum(serialize = "tuple_iterator")]
    TupleIterator,
    #[strum(serialize = "str_ascii_iterator")]
    StrIterator,
    #[strum(serialize = "bytes_iterator")]
    BytesIterator,
    #[strum(serialize = "range_iterator")]
    RangeIterator,
    #[strum(serialize = "dict_keyiterator")]
    DictIterator,
    #[strum(serialize = "set_iterator")]
    SetIterator,
    #[strum(serialize = "property")]
    Property,
    #[strum(serialize = "staticmethod")]
    StaticMethod,
    #[strum(serialize = "classmethod")]
    ClassMethod,
    #[strum(serialize = "super")]
    Super,
    #[strum(serialize = "dict_keys")]
    DictKeys,
    #[strum(serialize = "dict_values")]
    DictValues,
    #[strum(serialize = "dict_items")]
    DictItems,
    #[strum(serialize = "_io.TextIOWrapper")]
    TextIO,
}

impl Type {
    /// Types bound by name in the builtins namespace.
    pub const CONSTRUCTORS: &[Self] = &[
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::Str,
        Self::Bytes,
        Self::List,
        Self::Tuple,
        Self::Dict,
        Self::Set,
        Self::FrozenSet,
        Self::Range,
        Self::Slice,
        Self::Type,
        Self::Enumerate,
        Self::Zip,
        Self::Map,
        Self::Filter,
        Self::Reversed,
        Self::Property,
        Self::StaticMethod,
        Self::ClassMethod,
        Self::Super,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// `issubclass(self, other)` among builtin types: `bool` is the only subclass relation.
    #[must_use]
    pub fn is_subtype_of(self, other: Self) -> bool {
        self == other || (self == Self::Bool && other == Self::Int)
    }

    /// Names of the methods instances of this type expose.
    #[must_use]
    pub fn methods(self) -> &'static [&'static str] {
        match self {
            Self::Str => str::STR_METHODS,
            Self::Bytes => bytes::BYTES_METHODS,
            Self::List => list::LIST_METHODS,
            Self::Tuple => list::TUPLE_METHODS,
            Self::Dict => dict::DICT_METHODS,
            Self::Set => set::SET_METHODS,
            Self::FrozenSet => set::FROZENSET_METHODS,
            Self::Int | Self::Bool => number::INT_METHODS,
            Self::Float => number::FLOAT_METHODS,
            Self::Generator => generator::GENERATOR_METHODS,
            Self::Property => function::PROPERTY_METHODS,
            Self::TextIO => &["write", "flush"],
            _ => &[],
        }
    }

    #[must_use]
    pub fn has_method(self, name: &str) -> bool {
        self.methods().contains(&name)
    }

    /// Whether the type is a sequence for `match` sequence patterns.
    #[must_use]
    pub fn is_match_sequence(self) -> bool {
        matches!(self, Self::List | Self::Tuple | Self::Range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_python() {
        assert_eq!(Type::NoneType.name(), "NoneType");
        assert_eq!(Type::FrozenSet.to_string(), "frozenset");
        assert_eq!(Type::BuiltinFunction.name(), "builtin_function_or_method");
    }

    #[test]
    fn bool_is_an_int() {
        assert!(Type::Bool.is_subtype_of(Type::Int));
        assert!(!Type::Int.is_subtype_of(Type::Bool));
    }

    #[test]
    fn method_tables() {
        assert!(Type::Str.has_method("join"));
        assert!(Type::List.has_method("append"));
        assert!(!Type::Tuple.has_method("append"));
        assert!(Type::Dict.has_method("setdefault"));
    }
}
