//! Hashable keys for dicts and sets.

use std::hash::{DefaultHasher, Hash, Hasher};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker},
    value::Value,
};

/// The identity of a value for dict and set membership.
///
/// Values that compare equal map to equal keys: `True`, `1` and `1.0` all become `Int(1)`, and a
/// string constant and a heap string with the same text become the same `Str`. Objects without
/// value equality (instances, functions, classes) are keyed by heap identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum HashKey {
    None,
    Ellipsis,
    NotImplemented,
    Int(i64),
    BigInt(BigInt),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<HashKey>),
    /// Element keys in sorted order, so equal frozensets produce equal keys.
    FrozenSet(Vec<HashKey>),
    Identity(HeapId),
    Builtin(Builtins),
}

impl HashKey {
    /// The key of a float, normalising integral values to `Int`.
    #[must_use]
    pub fn from_float(value: f64) -> Self {
        if value.fract() == 0.0 && value.is_finite() {
            if let Some(int) = value.to_i64() {
                return Self::Int(int);
            }
            if let Some(big) = BigInt::from_f64(value) {
                return Self::BigInt(big);
            }
        }
        Self::Float(value.to_bits())
    }

    /// `hash()` of the key: integers hash to themselves, everything else through `DefaultHasher`.
    #[must_use]
    pub fn hash_value(&self) -> i64 {
        match self {
            Self::Int(value) if *value != -1 => *value,
            _ => {
                let mut hasher = DefaultHasher::new();
                self.hash(&mut hasher);
                // keep the result positive and clear of the `-1` sentinel
                i64::try_from(hasher.finish() >> 2).unwrap_or(0)
            }
        }
    }
}

/// Computes the dict/set key of `value`.
///
/// Fails with `TypeError: unhashable type` for lists, dicts and sets (also nested in tuples).
pub(crate) fn hash_key(heap: &Heap<impl ResourceTracker>, interns: &Interns, value: Value) -> RunResult<HashKey> {
    nested_hash_key(heap, interns, value, 0)
}

fn nested_hash_key(
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    value: Value,
    depth: u16,
) -> RunResult<HashKey> {
    Ok(match value {
        Value::None => HashKey::None,
        Value::Ellipsis => HashKey::Ellipsis,
        Value::NotImplemented => HashKey::NotImplemented,
        Value::Bool(b) => HashKey::Int(i64::from(b)),
        Value::Int(i) => HashKey::Int(i),
        Value::Float(f) => HashKey::from_float(f),
        Value::InternString(id) => HashKey::Str(interns.get_str(id).to_owned()),
        Value::Builtin(builtin) => HashKey::Builtin(builtin),
        Value::Undefined => return Err(RunError::internal("hash of an unbound value")),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => HashKey::Str(s.clone()),
            HeapData::Bytes(b) => HashKey::Bytes(b.clone()),
            HeapData::BigInt(b) => HashKey::BigInt(b.clone()),
            HeapData::Tuple(items) => {
                if depth >= MAX_DATA_RECURSION_DEPTH {
                    return Err(ExcType::RecursionError.error("maximum recursion depth exceeded while hashing"));
                }
                let keys = items
                    .iter()
                    .map(|item| nested_hash_key(heap, interns, *item, depth + 1))
                    .collect::<RunResult<Vec<_>>>()?;
                HashKey::Tuple(keys)
            }
            HeapData::FrozenSet(set) => HashKey::FrozenSet(set.sorted_keys()),
            HeapData::List(_) => return Err(ExcType::type_error_unhashable("list")),
            HeapData::Dict(_) => return Err(ExcType::type_error_unhashable("dict")),
            HeapData::Set(_) => return Err(ExcType::type_error_unhashable("set")),
            HeapData::Slice(_) => return Err(ExcType::type_error_unhashable("slice")),
            _ => HashKey::Identity(id),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn equal_numbers_share_a_key() {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new();
        let one = hash_key(&heap, &interns, Value::Int(1)).unwrap();
        assert_eq!(hash_key(&heap, &interns, Value::Bool(true)).unwrap(), one);
        assert_eq!(hash_key(&heap, &interns, Value::Float(1.0)).unwrap(), one);
        assert_ne!(hash_key(&heap, &interns, Value::Float(1.5)).unwrap(), one);
        assert_eq!(HashKey::from_float(-0.0), HashKey::Int(0));
    }

    #[test]
    fn strings_hash_by_content() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut interns = Interns::new();
        let constant = interns.intern("abc");
        let on_heap = heap.allocate(HeapData::Str("abc".to_owned())).unwrap();
        assert_eq!(
            hash_key(&heap, &interns, Value::InternString(constant)).unwrap(),
            hash_key(&heap, &interns, Value::Ref(on_heap)).unwrap()
        );
    }

    #[test]
    fn lists_are_unhashable() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new();
        let list = heap.allocate(HeapData::List(Vec::new())).unwrap();
        let tuple = heap.allocate(HeapData::Tuple(vec![Value::Ref(list)])).unwrap();
        let err = hash_key(&heap, &interns, Value::Ref(tuple)).unwrap_err();
        assert!(err.is_exc_type(ExcType::TypeError));
    }

    #[test]
    fn deeply_nested_tuples_fail_cleanly() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new();
        let mut value = Value::Int(0);
        for _ in 0..10_000 {
            value = Value::Ref(heap.allocate(HeapData::Tuple(vec![value])).unwrap());
        }
        let err = hash_key(&heap, &interns, value).unwrap_err();
        assert!(err.is_exc_type(ExcType::RecursionError));
    }

    #[test]
    fn int_hash_is_identity() {
        assert_eq!(HashKey::Int(42).hash_value(), 42);
        assert!(HashKey::Str("x".to_owned()).hash_value() >= 0);
    }
}
