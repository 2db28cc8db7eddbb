//! The iterator protocol: `iter()`, `next()` and draining an iterable.

use super::{GenAction, GenResult, VM};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    heap::{DictViewKind, HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{IterState, iter::next_char},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `iter(value)`.
    pub(crate) fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        let state = match value {
            Value::InternString(_) => IterState::Str { value, pos: 0 },
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(_) => IterState::Seq {
                    seq: id,
                    index: 0,
                    tuple: false,
                },
                HeapData::Tuple(_) => IterState::Seq {
                    seq: id,
                    index: 0,
                    tuple: true,
                },
                HeapData::Str(_) => IterState::Str { value, pos: 0 },
                HeapData::Bytes(_) => IterState::Bytes { bytes: id, index: 0 },
                HeapData::Range(range) => IterState::Range {
                    range: *range,
                    index: 0,
                },
                HeapData::Dict(dict) => IterState::Dict {
                    dict: id,
                    index: 0,
                    len: dict.len(),
                    kind: DictViewKind::Keys,
                },
                HeapData::DictView { dict, kind } => {
                    let (dict, kind) = (*dict, *kind);
                    let len = match self.heap.get(dict) {
                        HeapData::Dict(dict) => dict.len(),
                        _ => 0,
                    };
                    IterState::Dict {
                        dict,
                        index: 0,
                        len,
                        kind,
                    }
                }
                HeapData::Set(set) | HeapData::FrozenSet(set) => IterState::Set {
                    set: id,
                    index: 0,
                    len: set.len(),
                },
                HeapData::Iterator(_) | HeapData::Generator(_) => return Ok(value),
                HeapData::Instance(_) => return self.instance_iter(value),
                _ => return Err(ExcType::type_error_not_iterable(&self.type_name(value))),
            },
            _ => return Err(ExcType::type_error_not_iterable(&self.type_name(value))),
        };
        Ok(Value::Ref(self.alloc(HeapData::Iterator(state))?))
    }

    fn instance_iter(&mut self, value: Value) -> RunResult<Value> {
        let Some(method) = self.user_special(value, StaticStrings::DunderIter.id())? else {
            return Err(ExcType::type_error_not_iterable(&self.type_name(value)));
        };
        let iter = self.call_sync(method, ArgValues::empty())?;
        if !self.is_iterator(iter)? {
            return Err(ExcType::type_error(format!(
                "iter() returned non-iterator of type '{}'",
                self.type_name(iter)
            )));
        }
        Ok(iter)
    }

    /// Whether `next()` accepts `value`.
    pub(crate) fn is_iterator(&mut self, value: Value) -> RunResult<bool> {
        Ok(match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Iterator(_) | HeapData::Generator(_) => true,
                HeapData::Instance(_) => self.user_special(value, StaticStrings::DunderNext.id())?.is_some(),
                _ => false,
            },
            _ => false,
        })
    }

    /// `next(iter)`, with `None` for exhaustion.
    pub(crate) fn next_value(&mut self, iter: Value) -> RunResult<Option<Value>> {
        let Value::Ref(id) = iter else {
            return Err(self.not_an_iterator(iter));
        };
        match self.heap.get(id) {
            HeapData::Iterator(_) => self.next_native(id),
            HeapData::Generator(_) => {
                if self.generator_state(id)?.is_finished() {
                    return Ok(None);
                }
                match self.resume_generator(id, GenAction::Send(Value::None))? {
                    GenResult::Yielded(value) => Ok(Some(value)),
                    GenResult::Returned(_) => Ok(None),
                }
            }
            HeapData::Instance(_) => {
                let Some(method) = self.user_special(iter, StaticStrings::DunderNext.id())? else {
                    return Err(self.not_an_iterator(iter));
                };
                match self.call_sync(method, ArgValues::empty()) {
                    Ok(value) => Ok(Some(value)),
                    Err(err) if err.is_exc_type(ExcType::StopIteration) => Ok(None),
                    Err(err) => Err(err),
                }
            }
            _ => Err(self.not_an_iterator(iter)),
        }
    }

    fn not_an_iterator(&self, value: Value) -> RunError {
        ExcType::type_error(format!("'{}' object is not an iterator", self.type_name(value)))
    }

    /// Advances a native iterator. The state is taken out of the heap while it runs, since
    /// `map` and `filter` call back into the program.
    fn next_native(&mut self, id: HeapId) -> RunResult<Option<Value>> {
        let HeapData::Iterator(slot) = self.heap.get_mut(id) else {
            return Ok(None);
        };
        let exhausted = IterState::Exhausted(slot.py_type());
        let mut state = std::mem::replace(slot, exhausted);
        let result = self.advance(&mut state);
        if matches!(result, Ok(None)) {
            state.exhaust();
        }
        if let HeapData::Iterator(slot) = self.heap.get_mut(id) {
            *slot = state;
        }
        result
    }

    fn advance(&mut self, state: &mut IterState) -> RunResult<Option<Value>> {
        match state {
            IterState::Seq { seq, index, .. } => {
                let item = match self.heap.get(*seq) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.get(*index).copied(),
                    _ => None,
                };
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
            IterState::Str { value, pos } => match self.as_str(*value).and_then(|text| next_char(text, pos)) {
                Some(c) => Ok(Some(self.new_str(c.to_string())?)),
                None => Ok(None),
            },
            IterState::Bytes { bytes, index } => {
                let byte = self.as_bytes(Value::Ref(*bytes)).and_then(|b| b.get(*index).copied());
                Ok(byte.map(|b| {
                    *index += 1;
                    Value::Int(i64::from(b))
                }))
            }
            IterState::Range { range, index } => {
                if *index >= range.len() {
                    return Ok(None);
                }
                let value = range.get(*index);
                *index += 1;
                Ok(Some(Value::Int(value)))
            }
            IterState::Dict { dict, index, len, kind } => {
                let entry = match self.heap.get(*dict) {
                    HeapData::Dict(dict) => {
                        if dict.len() != *len {
                            return Err(ExcType::runtime_error("dictionary changed size during iteration"));
                        }
                        dict.get_index(*index)
                    }
                    _ => None,
                };
                let Some((key, value)) = entry else {
                    return Ok(None);
                };
                *index += 1;
                Ok(Some(match kind {
                    DictViewKind::Keys => key,
                    DictViewKind::Values => value,
                    DictViewKind::Items => self.new_tuple(vec![key, value])?,
                }))
            }
            IterState::Set { set, index, len } => {
                let item = match self.heap.get(*set) {
                    HeapData::Set(set) | HeapData::FrozenSet(set) => {
                        if set.len() != *len {
                            return Err(ExcType::runtime_error("Set changed size during iteration"));
                        }
                        set.get_index(*index)
                    }
                    _ => None,
                };
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
            IterState::Enumerate { iter, count } => match self.next_value(*iter)? {
                Some(value) => {
                    let tuple = self.new_tuple(vec![Value::Int(*count), value])?;
                    *count += 1;
                    Ok(Some(tuple))
                }
                None => Ok(None),
            },
            IterState::Zip { iters } => match self.next_each(iters)? {
                Some(items) => Ok(Some(self.new_tuple(items)?)),
                None => Ok(None),
            },
            IterState::Map { func, iters } => match self.next_each(iters)? {
                Some(args) => Ok(Some(self.call_sync(*func, ArgValues::new(args))?)),
                None => Ok(None),
            },
            IterState::Filter { func, iter } => {
                while let Some(value) = self.next_value(*iter)? {
                    let keep = if func.is_none() {
                        self.truthy(value)?
                    } else {
                        let result = self.call_sync(*func, ArgValues::one(value))?;
                        self.truthy(result)?
                    };
                    if keep {
                        return Ok(Some(value));
                    }
                }
                Ok(None)
            }
            IterState::Reversed { seq, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
                Ok(match self.heap.get(*seq) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.get(*remaining).copied(),
                    _ => None,
                })
            }
            IterState::Values { items, index } => {
                let item = items.get(*index).copied();
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
            IterState::Exhausted(_) => Ok(None),
        }
    }

    /// One item from each iterator, or `None` as soon as any is exhausted.
    fn next_each(&mut self, iters: &[Value]) -> RunResult<Option<Vec<Value>>> {
        let mut items = Vec::with_capacity(iters.len());
        for iter in iters {
            match self.next_value(*iter)? {
                Some(value) => items.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    /// Drains `iterable` into a vector.
    pub(crate) fn collect_iter(&mut self, iterable: Value) -> RunResult<Vec<Value>> {
        if let Some(items) = self.sequence_items(iterable) {
            return Ok(items);
        }
        let iter = self.get_iter(iterable)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_value(iter)? {
            self.heap.on_container_insert()?;
            items.push(item);
        }
        Ok(items)
    }
}
