use crate::{builtins::Builtins, heap::HeapId, intern::StringId};

/// A runtime value.
///
/// Immediates are stored inline; everything else is a [`HeapId`] into the VM's heap. Values are
/// `Copy`: the heap is garbage collected, so copying a `Ref` never needs bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    /// An unbound local or cell; never visible to programs.
    Undefined,
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A string constant or name known at compile time.
    InternString(StringId),
    Builtin(Builtins),
    Ref(HeapId),
}

impl Value {
    /// Identity as tested by `is`.
    ///
    /// Heap objects compare by id; immediates compare by value, matching the interning of
    /// small values a program can observe.
    #[must_use]
    pub fn is_identical(self, other: Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// The value as a small integer, treating `bool` as `int`.
    #[must_use]
    pub fn as_small_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            Self::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_identity_uses_bits() {
        assert!(Value::Float(f64::NAN).is_identical(Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).is_identical(Value::Float(-0.0)));
        assert!(Value::Int(3).is_identical(Value::Int(3)));
        assert!(!Value::Int(1).is_identical(Value::Bool(true)));
    }

    #[test]
    fn bools_are_small_ints() {
        assert_eq!(Value::Bool(true).as_small_int(), Some(1));
        assert_eq!(Value::None.as_small_int(), None);
    }
}
