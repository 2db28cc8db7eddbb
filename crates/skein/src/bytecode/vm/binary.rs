//! Arithmetic, sequence and set operators.
//!
//! Numbers are handled natively through [`number`]. Everything else goes through the
//! left operand's dunder, then the right operand's reflected dunder, the way CPython's
//! `binary_op1` does.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::VM;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    expressions::Operator,
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    tracer::VmTracer,
    types::{
        Dict, Set,
        number::{self, Number},
    },
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// The numeric value of an `int`, `bool` or `float`.
    pub(crate) fn number(&self, value: Value) -> Option<Number> {
        match value {
            Value::Int(i) => Some(Number::Int(i)),
            Value::Bool(b) => Some(Number::Int(i64::from(b))),
            Value::Float(f) => Some(Number::Float(f)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::BigInt(big) => Some(Number::Big(big.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn number_value(&mut self, number: Number) -> RunResult<Value> {
        match number {
            Number::Int(i) => Ok(Value::Int(i)),
            Number::Float(f) => Ok(Value::Float(f)),
            Number::Big(big) => self.new_int(big),
        }
    }

    /// The integer value of `value` as an `i64`, as needed for indices and counts.
    pub(crate) fn expect_int(&self, value: Value) -> RunResult<i64> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::BigInt(_)) => Err(ExcType::overflow_error(
                "Python int too large to convert to C ssize_t",
            )),
            _ => Err(ExcType::type_error_not_integer(&self.type_name(value))),
        }
    }

    /// The integer value of `value` at any size.
    pub(crate) fn expect_bigint(&self, value: Value) -> RunResult<BigInt> {
        match self.number(value) {
            Some(Number::Int(i)) => Ok(BigInt::from(i)),
            Some(Number::Big(big)) => Ok(big),
            _ => Err(ExcType::type_error_not_integer(&self.type_name(value))),
        }
    }

    /// Fails when a result of `bytes` bytes exceeds the tracker's large-result limit.
    pub(crate) fn check_result_size(&self, bytes: usize) -> RunResult<()> {
        if bytes > LARGE_RESULT_THRESHOLD {
            self.heap.tracker().check_large_result(bytes)?;
        }
        Ok(())
    }

    /// `lhs op rhs`.
    pub(crate) fn binary_op(&mut self, lhs: Value, rhs: Value, op: Operator) -> RunResult<Value> {
        if let Some(result) = self.native_binary(lhs, rhs, op)? {
            return Ok(result);
        }
        if let Some(method) = self.user_special(lhs, op.dunder())? {
            let result = self.call_sync(method, ArgValues::one(rhs))?;
            if result != Value::NotImplemented {
                return Ok(result);
            }
        }
        if let Some(method) = self.user_special(rhs, op.reflected_dunder())? {
            let result = self.call_sync(method, ArgValues::one(lhs))?;
            if result != Value::NotImplemented {
                return Ok(result);
            }
        }
        Err(self.binary_error(lhs, rhs, op))
    }

    /// The `TypeError` for an unsupported operand pair, worded as CPython words it.
    fn binary_error(&self, lhs: Value, rhs: Value, op: Operator) -> RunError {
        let (lhs_type, rhs_type) = (self.type_name(lhs), self.type_name(rhs));
        if op == Operator::Add && self.instance_class(rhs).is_none() {
            match lhs_type.as_str() {
                "str" | "list" | "tuple" => {
                    return ExcType::type_error(format!(
                        "can only concatenate {lhs_type} (not \"{rhs_type}\") to {lhs_type}"
                    ));
                }
                "bytes" => return ExcType::type_error(format!("can't concat {rhs_type} to bytes")),
                _ => {}
            }
        }
        if op == Operator::Mult {
            let sequence = |t: &str| matches!(t, "str" | "list" | "tuple" | "bytes");
            if sequence(&lhs_type) && self.number(rhs).is_some() {
                return ExcType::type_error(format!("can't multiply sequence by non-int of type '{rhs_type}'"));
            }
            if sequence(&rhs_type) && self.number(lhs).is_some() {
                return ExcType::type_error(format!("can't multiply sequence by non-int of type '{lhs_type}'"));
            }
        }
        let symbol = if op == Operator::Pow { "** or pow()" } else { op.symbol() };
        ExcType::binary_type_error(symbol, &lhs_type, &rhs_type)
    }

    /// Operators between builtin values; `None` when no builtin implementation applies.
    fn native_binary(&mut self, lhs: Value, rhs: Value, op: Operator) -> RunResult<Option<Value>> {
        if let (Some(a), Some(b)) = (self.number(lhs), self.number(rhs)) {
            if op == Operator::Pow {
                if let Some(exp) = b.to_bigint().and_then(|e| e.to_u64()) {
                    let base_bits = a.to_bigint().map_or(0, |base| base.bits());
                    let bytes = base_bits.saturating_mul(exp) / 8;
                    self.check_result_size(usize::try_from(bytes).unwrap_or(usize::MAX))?;
                }
            }
            return match number::binary_op(op, &a, &b)? {
                Some(result) => self.number_value(result).map(Some),
                None => Ok(None),
            };
        }
        match op {
            Operator::Add => self.concat(lhs, rhs),
            Operator::Mult => {
                if let Some(count) = self.repeat_count(rhs) {
                    return self.repeat(lhs, count);
                }
                match self.repeat_count(lhs) {
                    Some(count) => self.repeat(rhs, count),
                    None => Ok(None),
                }
            }
            Operator::Mod => match self.as_str(lhs) {
                Some(template) => {
                    let template = template.to_owned();
                    let text = self.percent_format(&template, rhs)?;
                    self.new_str(text).map(Some)
                }
                None => Ok(None),
            },
            Operator::BitOr | Operator::BitAnd | Operator::Sub | Operator::BitXor => self.set_or_dict_op(lhs, rhs, op),
            _ => Ok(None),
        }
    }

    fn repeat_count(&self, value: Value) -> Option<i64> {
        match value {
            Value::Int(i) => Some(i),
            Value::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    fn concat(&mut self, lhs: Value, rhs: Value) -> RunResult<Option<Value>> {
        if let (Some(a), Some(b)) = (self.as_str(lhs), self.as_str(rhs)) {
            let text = format!("{a}{b}");
            return self.new_str(text).map(Some);
        }
        let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) else {
            return Ok(None);
        };
        let data = match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::Bytes(x), HeapData::Bytes(y)) => HeapData::Bytes([x.as_slice(), y.as_slice()].concat()),
            (HeapData::List(x), HeapData::List(y)) => HeapData::List([x.as_slice(), y.as_slice()].concat()),
            (HeapData::Tuple(x), HeapData::Tuple(y)) => HeapData::Tuple([x.as_slice(), y.as_slice()].concat()),
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.alloc(data)?)))
    }

    /// `sequence * count`.
    fn repeat(&mut self, sequence: Value, count: i64) -> RunResult<Option<Value>> {
        let count = usize::try_from(count).unwrap_or(0);
        if let Some(text) = self.as_str(sequence) {
            self.check_result_size(text.len().saturating_mul(count))?;
            let text = text.repeat(count);
            return self.new_str(text).map(Some);
        }
        let Value::Ref(id) = sequence else {
            return Ok(None);
        };
        let data = match self.heap.get(id) {
            HeapData::Bytes(bytes) => {
                self.check_result_size(bytes.len().saturating_mul(count))?;
                HeapData::Bytes(bytes.repeat(count))
            }
            HeapData::List(items) => {
                self.check_result_size(items.len().saturating_mul(count).saturating_mul(size_of::<Value>()))?;
                HeapData::List(items.repeat(count))
            }
            HeapData::Tuple(items) => {
                self.check_result_size(items.len().saturating_mul(count).saturating_mul(size_of::<Value>()))?;
                HeapData::Tuple(items.repeat(count))
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.alloc(data)?)))
    }

    /// Set algebra, and `dict | dict`.
    fn set_or_dict_op(&mut self, lhs: Value, rhs: Value, op: Operator) -> RunResult<Option<Value>> {
        let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) else {
            return Ok(None);
        };
        let data = match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::Set(x) | HeapData::FrozenSet(x), HeapData::Set(y) | HeapData::FrozenSet(y)) => {
                let result = set_algebra(x, y, op);
                if matches!(self.heap.get(a), HeapData::FrozenSet(_)) {
                    HeapData::FrozenSet(result)
                } else {
                    HeapData::Set(result)
                }
            }
            (HeapData::Dict(x), HeapData::Dict(y)) if op == Operator::BitOr => {
                let mut merged = x.clone();
                merge_dict(&mut merged, y);
                HeapData::Dict(merged)
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.alloc(data)?)))
    }

    /// `lhs op= rhs`: mutates lists, sets and dicts in place, else falls back to `lhs op rhs`.
    pub(crate) fn inplace_op(&mut self, lhs: Value, rhs: Value, op: Operator) -> RunResult<Value> {
        if let Value::Ref(id) = lhs {
            if self.inplace_builtin(id, rhs, op)? {
                return Ok(lhs);
            }
        }
        if let Some(method) = self.user_special(lhs, op.inplace_dunder())? {
            let result = self.call_sync(method, ArgValues::one(rhs))?;
            if result != Value::NotImplemented {
                return Ok(result);
            }
        }
        self.binary_op(lhs, rhs, op)
    }

    /// In-place operators of mutable builtins; `false` when none applies.
    fn inplace_builtin(&mut self, id: HeapId, rhs: Value, op: Operator) -> RunResult<bool> {
        match (self.heap.get(id), op) {
            (HeapData::List(_), Operator::Add) => {
                let items = self.collect_iter(rhs)?;
                if let HeapData::List(list) = self.heap.get_mut(id) {
                    list.extend(items);
                }
                Ok(true)
            }
            (HeapData::List(items), Operator::Mult) => {
                let Some(count) = self.repeat_count(rhs) else {
                    return Ok(false);
                };
                let count = usize::try_from(count).unwrap_or(0);
                self.check_result_size(items.len().saturating_mul(count).saturating_mul(size_of::<Value>()))?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    *items = items.repeat(count);
                }
                Ok(true)
            }
            (HeapData::Set(_), Operator::BitOr | Operator::BitAnd | Operator::Sub | Operator::BitXor) => {
                let other = match rhs {
                    Value::Ref(other) => match self.heap.get(other) {
                        HeapData::Set(set) | HeapData::FrozenSet(set) => set.clone(),
                        _ => return Ok(false),
                    },
                    _ => return Ok(false),
                };
                if let HeapData::Set(set) = self.heap.get_mut(id) {
                    *set = set_algebra(set, &other, op);
                }
                Ok(true)
            }
            (HeapData::Dict(_), Operator::BitOr) => {
                self.dict_update(Value::Ref(id), rhs, false)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// `-value`.
    pub(crate) fn unary_neg(&mut self, value: Value) -> RunResult<Value> {
        if let Some(number) = self.number(value) {
            return self.number_value(number::negate(&number));
        }
        self.unary_dunder(value, StaticStrings::DunderNeg, "-")
    }

    /// `+value`.
    pub(crate) fn unary_pos(&mut self, value: Value) -> RunResult<Value> {
        if let Some(number) = self.number(value) {
            return self.number_value(number);
        }
        self.unary_dunder(value, StaticStrings::DunderPos, "+")
    }

    /// `~value`.
    pub(crate) fn unary_invert(&mut self, value: Value) -> RunResult<Value> {
        if let Some(inverted) = self.number(value).as_ref().and_then(number::invert) {
            return self.number_value(inverted);
        }
        self.unary_dunder(value, StaticStrings::DunderInvert, "~")
    }

    fn unary_dunder(&mut self, value: Value, dunder: StaticStrings, symbol: &str) -> RunResult<Value> {
        match self.user_special(value, dunder.id())? {
            Some(method) => self.call_sync(method, ArgValues::empty()),
            None => Err(ExcType::unary_type_error(symbol, &self.type_name(value))),
        }
    }
}

fn set_algebra(lhs: &Set, rhs: &Set, op: Operator) -> Set {
    match op {
        Operator::BitOr => lhs.union(rhs),
        Operator::BitAnd => lhs.intersection(rhs),
        Operator::Sub => lhs.difference(rhs),
        _ => lhs.symmetric_difference(rhs),
    }
}

fn merge_dict(target: &mut Dict, source: &Dict) {
    for (hash, (key, value)) in source.entries() {
        target.insert(hash.clone(), *key, *value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HashKey;

    #[test]
    fn set_algebra_follows_operator() {
        let mut a = Set::new();
        let mut b = Set::new();
        for i in [1, 2, 3] {
            a.insert(HashKey::Int(i), Value::Int(i));
        }
        for i in [2, 3, 4] {
            b.insert(HashKey::Int(i), Value::Int(i));
        }
        assert_eq!(set_algebra(&a, &b, Operator::BitOr).len(), 4);
        assert_eq!(set_algebra(&a, &b, Operator::BitAnd).len(), 2);
        assert_eq!(set_algebra(&a, &b, Operator::Sub).len(), 1);
        assert_eq!(set_algebra(&a, &b, Operator::BitXor).len(), 2);
    }

    #[test]
    fn dict_merge_overrides() {
        let mut a = Dict::new();
        a.insert(HashKey::Int(1), Value::Int(1), Value::Int(10));
        let mut b = Dict::new();
        b.insert(HashKey::Int(1), Value::Int(1), Value::Int(20));
        b.insert(HashKey::Int(2), Value::Int(2), Value::Int(30));
        merge_dict(&mut a, &b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(&HashKey::Int(1)), Some(Value::Int(20)));
    }
}
