//! Native iterator state.
//!
//! Each variant records where it is in its source; the VM advances it because advancing
//! `map` or `filter` can call back into user code.

use crate::{
    heap::{DictViewKind, HeapId},
    types::{Range, Type},
    value::Value,
};

/// A native iterator object stored as `HeapData::Iterator`.
#[derive(Debug)]
pub(crate) enum IterState {
    /// Over a list or tuple. The list's length is re-read on every step so appends are seen.
    Seq { seq: HeapId, index: usize, tuple: bool },
    /// Over a string; `pos` is a byte offset at a char boundary.
    Str { value: Value, pos: usize },
    Bytes { bytes: HeapId, index: usize },
    Range { range: Range, index: usize },
    /// Over a dict; `len` is the size when iteration started.
    Dict {
        dict: HeapId,
        index: usize,
        len: usize,
        kind: DictViewKind,
    },
    Set { set: HeapId, index: usize, len: usize },
    Enumerate { iter: Value, count: i64 },
    Zip { iters: Vec<Value> },
    Map { func: Value, iters: Vec<Value> },
    /// `func` is `None` for `filter(None, xs)`.
    Filter { func: Value, iter: Value },
    /// `reversed()` over a list or tuple.
    Reversed { seq: HeapId, remaining: usize },
    /// A snapshot of values, e.g. `reversed("abc")`.
    Values { items: Vec<Value>, index: usize },
    /// A finished iterator; stays finished even if its source grows.
    Exhausted(Type),
}

impl IterState {
    /// The type reported by `type(it)`.
    #[must_use]
    pub fn py_type(&self) -> Type {
        match self {
            Self::Seq { tuple: false, .. } | Self::Values { .. } => Type::ListIterator,
            Self::Seq { tuple: true, .. } => Type::TupleIterator,
            Self::Str { .. } => Type::StrIterator,
            Self::Bytes { .. } => Type::BytesIterator,
            Self::Range { .. } => Type::RangeIterator,
            Self::Dict { .. } => Type::DictIterator,
            Self::Set { .. } => Type::SetIterator,
            Self::Enumerate { .. } => Type::Enumerate,
            Self::Zip { .. } => Type::Zip,
            Self::Map { .. } => Type::Map,
            Self::Filter { .. } => Type::Filter,
            Self::Reversed { .. } => Type::Reversed,
            Self::Exhausted(ty) => *ty,
        }
    }

    /// Heap objects this iterator keeps alive.
    pub fn collect_refs(&self, out: &mut Vec<HeapId>) {
        let mut push = |value: &Value| {
            if let Value::Ref(id) = value {
                out.push(*id);
            }
        };
        match self {
            Self::Seq { seq: id, .. }
            | Self::Bytes { bytes: id, .. }
            | Self::Dict { dict: id, .. }
            | Self::Set { set: id, .. }
            | Self::Reversed { seq: id, .. } => out.push(*id),
            Self::Str { value, .. } | Self::Enumerate { iter: value, .. } => push(value),
            Self::Zip { iters } => iters.iter().for_each(push),
            Self::Map { func, iters } => {
                push(func);
                iters.iter().for_each(push);
            }
            Self::Filter { func, iter } => {
                push(func);
                push(iter);
            }
            Self::Values { items, .. } => items.iter().for_each(push),
            Self::Range { .. } | Self::Exhausted(_) => {}
        }
    }

    /// Marks the iterator finished.
    pub fn exhaust(&mut self) {
        *self = Self::Exhausted(self.py_type());
    }
}

/// The next char of `text` at byte offset `pos`, advancing `pos` past it.
pub(crate) fn next_char(text: &str, pos: &mut usize) -> Option<char> {
    let c = text.get(*pos..)?.chars().next()?;
    *pos += c.len_utf8();
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chars_advance_by_utf8_width() {
        let text = "aé€";
        let mut pos = 0;
        let collected: Vec<char> = std::iter::from_fn(|| next_char(text, &mut pos)).collect();
        assert_eq!(collected, vec!['a', 'é', '€']);
        assert_eq!(pos, text.len());
    }

    #[test]
    fn exhausted_keeps_its_type() {
        let mut state = IterState::Range {
            range: Range::new(0, 3, 1).unwrap(),
            index: 3,
        };
        state.exhaust();
        assert_eq!(state.py_type(), Type::RangeIterator);
        let mut refs = Vec::new();
        state.collect_refs(&mut refs);
        assert!(refs.is_empty());
    }
}
