//! Comparisons, membership, truth value and `len()`.

use std::cmp::Ordering;

use super::VM;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    expressions::CmpOperator,
    heap::{DictViewKind, HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker},
    tracer::VmTracer,
    types::{number, str::char_len},
    value::Value,
};

/// Whether `ordering` satisfies comparison `op`.
fn ordering_matches(op: CmpOperator, ordering: Ordering) -> bool {
    match op {
        CmpOperator::Eq => ordering == Ordering::Equal,
        CmpOperator::NotEq => ordering != Ordering::Equal,
        CmpOperator::Lt => ordering == Ordering::Less,
        CmpOperator::LtE => ordering != Ordering::Greater,
        CmpOperator::Gt => ordering == Ordering::Greater,
        CmpOperator::GtE => ordering != Ordering::Less,
        CmpOperator::Is | CmpOperator::IsNot | CmpOperator::In | CmpOperator::NotIn => false,
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `CompareOp`: every comparison operator, including `is` and `in`.
    pub(crate) fn compare_op(&mut self, lhs: Value, rhs: Value, op: CmpOperator) -> RunResult<Value> {
        match op {
            CmpOperator::Is => Ok(Value::Bool(lhs.is_identical(rhs))),
            CmpOperator::IsNot => Ok(Value::Bool(!lhs.is_identical(rhs))),
            CmpOperator::In => Ok(Value::Bool(self.contains(rhs, lhs)?)),
            CmpOperator::NotIn => Ok(Value::Bool(!self.contains(rhs, lhs)?)),
            _ => self.rich_compare(lhs, rhs, op),
        }
    }

    /// `lhs op rhs` for the six rich comparisons.
    ///
    /// Builtin values compare natively; otherwise the left operand's dunder is tried, then the
    /// right operand's swapped dunder. `==` and `!=` fall back to identity.
    fn rich_compare(&mut self, lhs: Value, rhs: Value, op: CmpOperator) -> RunResult<Value> {
        if let Some(result) = self.native_compare(lhs, rhs, op)? {
            return Ok(Value::Bool(result));
        }
        if let Some(dunder) = op.dunder() {
            if let Some(method) = self.user_special(lhs, dunder)? {
                let result = self.call_sync(method, ArgValues::one(rhs))?;
                if result != Value::NotImplemented {
                    return Ok(result);
                }
            }
        }
        if let Some(dunder) = op.swapped().dunder() {
            if let Some(method) = self.user_special(rhs, dunder)? {
                let result = self.call_sync(method, ArgValues::one(lhs))?;
                if result != Value::NotImplemented {
                    return Ok(result);
                }
            }
        }
        if op == CmpOperator::NotEq {
            if let Some(method) = self.user_special(lhs, StaticStrings::DunderEq.id())? {
                let result = self.call_sync(method, ArgValues::one(rhs))?;
                if result != Value::NotImplemented {
                    return Ok(Value::Bool(!self.truthy(result)?));
                }
            }
        }
        match op {
            CmpOperator::Eq => Ok(Value::Bool(lhs.is_identical(rhs))),
            CmpOperator::NotEq => Ok(Value::Bool(!lhs.is_identical(rhs))),
            _ => Err(ExcType::compare_type_error(
                op.symbol(),
                &self.type_name(lhs),
                &self.type_name(rhs),
            )),
        }
    }

    /// Comparison between builtin values, `None` when neither side knows how.
    fn native_compare(&mut self, lhs: Value, rhs: Value, op: CmpOperator) -> RunResult<Option<bool>> {
        if let (Some(a), Some(b)) = (self.number(lhs), self.number(rhs)) {
            return Ok(Some(match number::compare(&a, &b) {
                Some(ordering) => ordering_matches(op, ordering),
                None => op == CmpOperator::NotEq,
            }));
        }
        if let (Some(a), Some(b)) = (self.as_str(lhs), self.as_str(rhs)) {
            return Ok(Some(ordering_matches(op, a.cmp(b))));
        }
        if let (Some(a), Some(b)) = (self.as_bytes(lhs), self.as_bytes(rhs)) {
            return Ok(Some(ordering_matches(op, a.cmp(b))));
        }
        let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) else {
            return Ok(match (lhs, rhs) {
                (Value::Ref(_), _) | (_, Value::Ref(_)) => self.mixed_equality(lhs, rhs, op),
                _ => match op {
                    CmpOperator::Eq => Some(lhs.is_identical(rhs)),
                    CmpOperator::NotEq => Some(!lhs.is_identical(rhs)),
                    _ => None,
                },
            });
        };
        match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                let (x, y) = (x.clone(), y.clone());
                self.enter_comparison()?;
                let result = self.sequence_compare(&x, &y, op);
                self.compare_depth -= 1;
                result.map(Some)
            }
            (HeapData::Set(x) | HeapData::FrozenSet(x), HeapData::Set(y) | HeapData::FrozenSet(y)) => {
                let (subset, superset) = (x.is_subset(y), y.is_subset(x));
                Ok(Some(match op {
                    CmpOperator::Eq => subset && superset,
                    CmpOperator::NotEq => !(subset && superset),
                    CmpOperator::Lt => subset && !superset,
                    CmpOperator::LtE => subset,
                    CmpOperator::Gt => superset && !subset,
                    CmpOperator::GtE => superset,
                    _ => false,
                }))
            }
            (HeapData::Dict(_), HeapData::Dict(_)) if matches!(op, CmpOperator::Eq | CmpOperator::NotEq) => {
                self.enter_comparison()?;
                let equal = self.dict_eq(a, b);
                self.compare_depth -= 1;
                Ok(Some(equal? == (op == CmpOperator::Eq)))
            }
            (HeapData::Range(x), HeapData::Range(y)) if matches!(op, CmpOperator::Eq | CmpOperator::NotEq) => {
                let same_items = x.start == y.start && (x.len() == 1 || x.step == y.step);
                let equal = x.len() == y.len() && (x.is_empty() || same_items);
                Ok(Some(equal == (op == CmpOperator::Eq)))
            }
            (HeapData::Instance(_), _) | (_, HeapData::Instance(_)) => Ok(None),
            _ => Ok(self.mixed_equality(lhs, rhs, op)),
        }
    }

    /// Counts one more level of nested container comparison.
    fn enter_comparison(&mut self) -> RunResult<()> {
        if self.compare_depth >= MAX_DATA_RECURSION_DEPTH {
            return Err(ExcType::RecursionError.error("maximum recursion depth exceeded in comparison"));
        }
        self.compare_depth += 1;
        Ok(())
    }

    /// Values of unrelated builtin types are never equal and cannot be ordered.
    fn mixed_equality(&self, lhs: Value, rhs: Value, op: CmpOperator) -> Option<bool> {
        if self.instance_class(lhs).is_some() || self.instance_class(rhs).is_some() {
            return None;
        }
        match op {
            CmpOperator::Eq => Some(lhs.is_identical(rhs)),
            CmpOperator::NotEq => Some(!lhs.is_identical(rhs)),
            _ => None,
        }
    }

    /// Lexicographic comparison of two sequences.
    fn sequence_compare(&mut self, lhs: &[Value], rhs: &[Value], op: CmpOperator) -> RunResult<bool> {
        for (a, b) in lhs.iter().zip(rhs) {
            if self.eq(*a, *b)? {
                continue;
            }
            return match op {
                CmpOperator::Eq => Ok(false),
                CmpOperator::NotEq => Ok(true),
                _ => {
                    let result = self.rich_compare(*a, *b, op)?;
                    self.truthy(result)
                }
            };
        }
        Ok(ordering_matches(op, lhs.len().cmp(&rhs.len())))
    }

    fn dict_eq(&mut self, a: HeapId, b: HeapId) -> RunResult<bool> {
        let (entries, other_len) = match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::Dict(x), HeapData::Dict(y)) => {
                let entries: Vec<_> = x.entries().map(|(key, (_, value))| (key.clone(), *value)).collect();
                (entries, y.len())
            }
            _ => return Ok(false),
        };
        if entries.len() != other_len {
            return Ok(false);
        }
        for (key, value) in entries {
            let other = match self.heap.get(b) {
                HeapData::Dict(dict) => dict.get(&key),
                _ => None,
            };
            match other {
                Some(other) if self.eq(value, other)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// `a == b` as a bool; identical heap objects are equal without calling `__eq__`.
    pub(crate) fn eq(&mut self, a: Value, b: Value) -> RunResult<bool> {
        if let (Value::Ref(x), Value::Ref(y)) = (a, b) {
            if x == y {
                return Ok(true);
            }
        }
        let result = self.rich_compare(a, b, CmpOperator::Eq)?;
        self.truthy(result)
    }

    /// `a < b` as a bool, for sorting and `min`/`max`.
    pub(crate) fn lt(&mut self, a: Value, b: Value) -> RunResult<bool> {
        let result = self.rich_compare(a, b, CmpOperator::Lt)?;
        self.truthy(result)
    }

    /// `item in container`.
    pub(crate) fn contains(&mut self, container: Value, item: Value) -> RunResult<bool> {
        if let Some(text) = self.as_str(container) {
            let Some(needle) = self.as_str(item) else {
                return Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    self.type_name(item)
                )));
            };
            return Ok(text.contains(needle));
        }
        let Value::Ref(id) = container else {
            return Err(self.not_container(container));
        };
        match self.heap.get(id) {
            HeapData::Bytes(bytes) => match item {
                Value::Int(byte) => Ok(u8::try_from(byte).is_ok_and(|byte| bytes.contains(&byte))),
                _ => {
                    let Some(needle) = self.as_bytes(item) else {
                        return Err(ExcType::type_error(format!(
                            "a bytes-like object is required, not '{}'",
                            self.type_name(item)
                        )));
                    };
                    Ok(needle.is_empty() || bytes.windows(needle.len()).any(|window| window == needle))
                }
            },
            HeapData::List(items) | HeapData::Tuple(items) => {
                let items = items.clone();
                self.any_equal(&items, item)
            }
            HeapData::Dict(_) => {
                let key = self.key_of(item)?;
                Ok(matches!(self.heap.get(id), HeapData::Dict(dict) if dict.contains(&key)))
            }
            HeapData::Set(_) | HeapData::FrozenSet(_) => {
                let key = self.key_of(item)?;
                Ok(matches!(self.heap.get(id), HeapData::Set(set) | HeapData::FrozenSet(set) if set.contains(&key)))
            }
            HeapData::DictView { dict, kind } => {
                let (dict, kind) = (*dict, *kind);
                match kind {
                    DictViewKind::Keys => self.contains(Value::Ref(dict), item),
                    DictViewKind::Values => {
                        let values = match self.heap.get(dict) {
                            HeapData::Dict(dict) => dict.values(),
                            _ => Vec::new(),
                        };
                        self.any_equal(&values, item)
                    }
                    DictViewKind::Items => {
                        let Some([key, value]) = self.tuple_items(item).and_then(|pair| <[Value; 2]>::try_from(pair).ok())
                        else {
                            return Ok(false);
                        };
                        let key = self.key_of(key)?;
                        let stored = match self.heap.get(dict) {
                            HeapData::Dict(dict) => dict.get(&key),
                            _ => None,
                        };
                        match stored {
                            Some(stored) => self.eq(stored, value),
                            None => Ok(false),
                        }
                    }
                }
            }
            HeapData::Range(range) => {
                let range = *range;
                Ok(match item {
                    Value::Int(_) | Value::Bool(_) => item.as_small_int().is_some_and(|i| range.contains(i)),
                    #[expect(clippy::cast_possible_truncation)]
                    Value::Float(f) if f.fract() == 0.0 && f.is_finite() => range.contains(f as i64),
                    _ => false,
                })
            }
            HeapData::Instance(_) => {
                if let Some(method) = self.user_special(container, StaticStrings::DunderContains.id())? {
                    let result = self.call_sync(method, ArgValues::one(item))?;
                    return self.truthy(result);
                }
                if self.user_special(container, StaticStrings::DunderIter.id())?.is_none() {
                    return Err(self.not_container(container));
                }
                self.iter_contains(container, item)
            }
            HeapData::Iterator(_) | HeapData::Generator(_) => self.iter_contains(container, item),
            _ => Err(self.not_container(container)),
        }
    }

    fn any_equal(&mut self, items: &[Value], item: Value) -> RunResult<bool> {
        for candidate in items {
            if candidate.is_identical(item) || self.eq(*candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn iter_contains(&mut self, iterable: Value, item: Value) -> RunResult<bool> {
        let iter = self.get_iter(iterable)?;
        while let Some(candidate) = self.next_value(iter)? {
            if candidate.is_identical(item) || self.eq(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn not_container(&self, value: Value) -> RunError {
        ExcType::type_error(format!("argument of type '{}' is not iterable", self.type_name(value)))
    }

    /// Truth value of `value`.
    pub(crate) fn truthy(&mut self, value: Value) -> RunResult<bool> {
        Ok(match value {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::InternString(id) => !self.interns.get_str(id).is_empty(),
            Value::NotImplemented | Value::Ellipsis | Value::Builtin(_) => true,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::Bytes(b) => !b.is_empty(),
                HeapData::List(items) | HeapData::Tuple(items) => !items.is_empty(),
                HeapData::Dict(dict) => !dict.is_empty(),
                HeapData::Set(set) | HeapData::FrozenSet(set) => !set.is_empty(),
                HeapData::Range(range) => !range.is_empty(),
                HeapData::DictView { .. } => self.len(value)? != 0,
                HeapData::Instance(_) => return self.instance_truthy(value),
                _ => true,
            },
        })
    }

    fn instance_truthy(&mut self, value: Value) -> RunResult<bool> {
        if let Some(method) = self.user_special(value, StaticStrings::DunderBool.id())? {
            return match self.call_sync(method, ArgValues::empty())? {
                Value::Bool(b) => Ok(b),
                other => Err(ExcType::type_error(format!(
                    "__bool__ should return bool, returned {}",
                    self.type_name(other)
                ))),
            };
        }
        if self.user_special(value, StaticStrings::DunderLen.id())?.is_some() {
            return Ok(self.len(value)? != 0);
        }
        Ok(true)
    }

    /// `len(value)`.
    pub(crate) fn len(&mut self, value: Value) -> RunResult<usize> {
        if let Some(text) = self.as_str(value) {
            return Ok(char_len(text));
        }
        if let Value::Ref(id) = value {
            match self.heap.get(id) {
                HeapData::Bytes(b) => return Ok(b.len()),
                HeapData::List(items) | HeapData::Tuple(items) => return Ok(items.len()),
                HeapData::Dict(dict) => return Ok(dict.len()),
                HeapData::Set(set) | HeapData::FrozenSet(set) => return Ok(set.len()),
                HeapData::Range(range) => return Ok(range.len()),
                HeapData::DictView { dict, .. } => {
                    return Ok(match self.heap.get(*dict) {
                        HeapData::Dict(dict) => dict.len(),
                        _ => 0,
                    });
                }
                HeapData::Instance(_) => {
                    if let Some(method) = self.user_special(value, StaticStrings::DunderLen.id())? {
                        let result = self.call_sync(method, ArgValues::empty())?;
                        let len = self.expect_int(result)?;
                        return usize::try_from(len)
                            .map_err(|_| ExcType::value_error("__len__() should return >= 0"));
                    }
                }
                _ => {}
            }
        }
        Err(ExcType::type_error_no_len(&self.type_name(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderings() {
        assert!(ordering_matches(CmpOperator::LtE, Ordering::Equal));
        assert!(ordering_matches(CmpOperator::NotEq, Ordering::Less));
        assert!(!ordering_matches(CmpOperator::Gt, Ordering::Equal));
        assert!(!ordering_matches(CmpOperator::In, Ordering::Equal));
    }
}
