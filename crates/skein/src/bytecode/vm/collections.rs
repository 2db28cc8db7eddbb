//! Subscripts, container building and sequence unpacking.

use super::VM;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        Dict, HashKey, Set, Slice,
        hash_key::hash_key,
        range::{slice_indices, slice_len, slice_positions},
        str::{byte_offset, char_len},
    },
    value::Value,
};

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let signed_len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + signed_len } else { index };
    usize::try_from(index).ok().filter(|i| *i < len)
}

/// Items of `items` selected by resolved slice indices.
fn select<T: Copy>(items: &[T], (start, stop, step): (i64, i64, i64)) -> Vec<T> {
    slice_positions(start, stop, step)
        .filter_map(|i| items.get(i).copied())
        .collect()
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// The dict/set key of `value`.
    ///
    /// Instances hash by identity unless their class sets `__hash__ = None`.
    pub(crate) fn key_of(&self, value: Value) -> RunResult<HashKey> {
        if let Some(class) = self.instance_class(value) {
            if self.lookup_in_mro(class, StaticStrings::DunderHash.id()) == Some(Value::None) {
                return Err(ExcType::type_error_unhashable(&self.class_name(class)));
            }
        }
        hash_key(&self.heap, &self.interns, value)
    }

    /// An index operand as an `i64`, for `container` error messages.
    fn index_of(&self, index: Value, container: &str) -> RunResult<i64> {
        match index {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::BigInt(_)) => Err(ExcType::index_error(
                "cannot fit 'int' into an index-sized integer",
            )),
            _ => Err(ExcType::type_error_indices(container, &self.type_name(index))),
        }
    }

    /// The slice operand of a subscript, if it is one.
    fn slice_of(&self, index: Value) -> Option<Slice> {
        match index {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Slice(slice) => Some(*slice),
                _ => None,
            },
            _ => None,
        }
    }

    /// Clamped `(start, stop, step)` of `slice` over `len` items.
    pub(crate) fn resolve_slice(&self, slice: &Slice, len: usize) -> RunResult<(i64, i64, i64)> {
        let bound = |value: Value| -> RunResult<Option<i64>> {
            match value {
                Value::None => Ok(None),
                Value::Int(i) => Ok(Some(i)),
                Value::Bool(b) => Ok(Some(i64::from(b))),
                _ => Err(ExcType::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )),
            }
        };
        slice_indices(bound(slice.start)?, bound(slice.stop)?, bound(slice.step)?, len)
    }

    /// `obj[index]`.
    pub(crate) fn getitem(&mut self, obj: Value, index: Value) -> RunResult<Value> {
        if let Some(text) = self.as_str(obj) {
            let text = text.to_owned();
            return self.str_item(&text, index);
        }
        let Value::Ref(id) = obj else {
            return Err(ExcType::type_error_not_subscriptable(&self.type_name(obj)));
        };
        match self.heap.get(id) {
            HeapData::List(items) | HeapData::Tuple(items) => {
                let is_list = matches!(self.heap.get(id), HeapData::List(_));
                let container = if is_list { "list" } else { "tuple" };
                if let Some(slice) = self.slice_of(index) {
                    let selected = select(items, self.resolve_slice(&slice, items.len())?);
                    return if is_list { self.new_list(selected) } else { self.new_tuple(selected) };
                }
                let i = self.index_of(index, container)?;
                normalize_index(i, items.len())
                    .map(|i| items[i])
                    .ok_or_else(|| ExcType::index_error(format!("{container} index out of range")))
            }
            HeapData::Bytes(bytes) => {
                if let Some(slice) = self.slice_of(index) {
                    let selected = select(bytes, self.resolve_slice(&slice, bytes.len())?);
                    return self.new_bytes(selected);
                }
                let i = self.index_of(index, "byte")?;
                normalize_index(i, bytes.len())
                    .map(|i| Value::Int(i64::from(bytes[i])))
                    .ok_or_else(|| ExcType::index_error("index out of range"))
            }
            HeapData::Range(range) => {
                let range = *range;
                if let Some(slice) = self.slice_of(index) {
                    let (start, stop, step) = self.resolve_slice(&slice, range.len())?;
                    let sliced = range.slice(start, stop, step);
                    return Ok(Value::Ref(self.alloc(HeapData::Range(sliced))?));
                }
                let i = self.index_of(index, "range")?;
                normalize_index(i, range.len())
                    .map(|i| Value::Int(range.get(i)))
                    .ok_or_else(|| ExcType::index_error("range object index out of range"))
            }
            HeapData::Dict(dict) => {
                let key = self.key_of(index)?;
                match dict.get(&key) {
                    Some(value) => Ok(value),
                    None => Err(self.key_error(index)),
                }
            }
            HeapData::Instance(_) => match self.user_special(obj, StaticStrings::DunderGetitem.id())? {
                Some(method) => self.call_sync(method, ArgValues::one(index)),
                None => Err(ExcType::type_error_not_subscriptable(&self.type_name(obj))),
            },
            _ => Err(ExcType::type_error_not_subscriptable(&self.type_name(obj))),
        }
    }

    fn str_item(&mut self, text: &str, index: Value) -> RunResult<Value> {
        if let Some(slice) = self.slice_of(index) {
            let chars: Vec<char> = text.chars().collect();
            let selected: String = select(&chars, self.resolve_slice(&slice, chars.len())?).into_iter().collect();
            return self.new_str(selected);
        }
        let i = self.index_of(index, "string")?;
        let position =
            normalize_index(i, char_len(text)).ok_or_else(|| ExcType::index_error("string index out of range"))?;
        let c = text[byte_offset(text, position)..].chars().next().unwrap_or_default();
        self.new_str(c.to_string())
    }

    /// `obj[index] = value`.
    pub(crate) fn setitem(&mut self, obj: Value, index: Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(ExcType::type_error_no_item_assignment(&self.type_name(obj)));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let len = items.len();
                if let Some(slice) = self.slice_of(index) {
                    return self.assign_slice(id, &slice, len, value);
                }
                let i = self.index_of(index, "list")?;
                let position = normalize_index(i, len)
                    .ok_or_else(|| ExcType::index_error("list assignment index out of range"))?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items[position] = value;
                }
                Ok(())
            }
            HeapData::Dict(_) => self.dict_set(obj, index, value),
            HeapData::Instance(_) => match self.user_special(obj, StaticStrings::DunderSetitem.id())? {
                Some(method) => {
                    self.call_sync(method, ArgValues::new([index, value]))?;
                    Ok(())
                }
                None => Err(ExcType::type_error_no_item_assignment(&self.type_name(obj))),
            },
            _ => Err(ExcType::type_error_no_item_assignment(&self.type_name(obj))),
        }
    }

    /// `list[a:b:c] = iterable`.
    fn assign_slice(&mut self, id: HeapId, slice: &Slice, len: usize, value: Value) -> RunResult<()> {
        let (start, stop, step) = self.resolve_slice(slice, len)?;
        let replacement = self.collect_iter(value).map_err(|err| {
            if err.is_exc_type(ExcType::TypeError) {
                ExcType::type_error("must assign iterable to extended slice")
            } else {
                err
            }
        })?;
        let HeapData::List(items) = self.heap.get_mut(id) else {
            return Err(RunError::internal("slice assignment target is not a list"));
        };
        if step == 1 {
            let start = usize::try_from(start).unwrap_or(0);
            let stop = usize::try_from(stop).unwrap_or(0).max(start);
            items.splice(start..stop, replacement);
            return Ok(());
        }
        let count = slice_len(start, stop, step);
        if count != replacement.len() {
            return Err(ExcType::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {count}",
                replacement.len()
            )));
        }
        for (position, item) in slice_positions(start, stop, step).zip(replacement) {
            items[position] = item;
        }
        Ok(())
    }

    /// `del obj[index]`.
    pub(crate) fn delitem(&mut self, obj: Value, index: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(ExcType::type_error_no_item_deletion(&self.type_name(obj)));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let len = items.len();
                if let Some(slice) = self.slice_of(index) {
                    let (start, stop, step) = self.resolve_slice(&slice, len)?;
                    let mut doomed: Vec<usize> = slice_positions(start, stop, step).collect();
                    doomed.sort_unstable();
                    if let HeapData::List(items) = self.heap.get_mut(id) {
                        for position in doomed.into_iter().rev() {
                            items.remove(position);
                        }
                    }
                    return Ok(());
                }
                let i = self.index_of(index, "list")?;
                let position = normalize_index(i, len)
                    .ok_or_else(|| ExcType::index_error("list assignment index out of range"))?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items.remove(position);
                }
                Ok(())
            }
            HeapData::Dict(_) => {
                let key = self.key_of(index)?;
                let removed = match self.heap.get_mut(id) {
                    HeapData::Dict(dict) => dict.remove(&key),
                    _ => None,
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(self.key_error(index)),
                }
            }
            HeapData::Instance(_) => match self.user_special(obj, StaticStrings::DunderDelitem.id())? {
                Some(method) => {
                    self.call_sync(method, ArgValues::one(index))?;
                    Ok(())
                }
                None => Err(ExcType::type_error_no_item_deletion(&self.type_name(obj))),
            },
            _ => Err(ExcType::type_error_no_item_deletion(&self.type_name(obj))),
        }
    }

    // ========================================================================
    // building
    // ========================================================================

    pub(crate) fn build_set(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let mut set = Set::new();
        for item in items {
            let key = self.key_of(item)?;
            set.insert(key, item);
        }
        Ok(Value::Ref(self.alloc(HeapData::Set(set))?))
    }

    /// A dict from alternating keys and values; later duplicates win.
    pub(crate) fn build_dict(&mut self, flat: Vec<Value>) -> RunResult<Value> {
        let mut dict = Dict::new();
        for pair in flat.chunks_exact(2) {
            let key = self.key_of(pair[0])?;
            dict.insert(key, pair[0], pair[1]);
        }
        Ok(Value::Ref(self.alloc(HeapData::Dict(dict))?))
    }

    pub(crate) fn list_append(&mut self, list: Value, value: Value) -> RunResult<()> {
        self.heap.on_container_insert()?;
        match list {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::List(items) => {
                    items.push(value);
                    Ok(())
                }
                _ => Err(RunError::internal("append target is not a list")),
            },
            _ => Err(RunError::internal("append target is not a list")),
        }
    }

    pub(crate) fn list_extend(&mut self, list: Value, iterable: Value) -> RunResult<()> {
        let items = self.collect_iter(iterable)?;
        match list {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::List(target) => {
                    target.extend(items);
                    Ok(())
                }
                _ => Err(RunError::internal("extend target is not a list")),
            },
            _ => Err(RunError::internal("extend target is not a list")),
        }
    }

    pub(crate) fn set_add(&mut self, set: Value, value: Value) -> RunResult<()> {
        let key = self.key_of(value)?;
        self.heap.on_container_insert()?;
        match set {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::Set(target) => {
                    target.insert(key, value);
                    Ok(())
                }
                _ => Err(RunError::internal("add target is not a set")),
            },
            _ => Err(RunError::internal("add target is not a set")),
        }
    }

    /// `dict[key] = value`.
    pub(crate) fn dict_set(&mut self, dict: Value, key: Value, value: Value) -> RunResult<()> {
        let hash = self.key_of(key)?;
        self.heap.on_container_insert()?;
        match dict {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::Dict(target) => {
                    target.insert(hash, key, value);
                    Ok(())
                }
                _ => Err(RunError::internal("item target is not a dict")),
            },
            _ => Err(RunError::internal("item target is not a dict")),
        }
    }

    /// Copies the entries of `mapping` into `dict`.
    ///
    /// `mapping` may be a dict, an object with `keys()` and `__getitem__`, or (unless `merge`)
    /// an iterable of pairs. `merge` is the `**` of a call: keys must be new strings.
    pub(crate) fn dict_update(&mut self, dict: Value, mapping: Value, merge: bool) -> RunResult<()> {
        let entries = match self.mapping_entries(mapping)? {
            Some(entries) => entries,
            None if merge => return Err(ExcType::type_error_kwargs_not_mapping(&self.type_name(mapping))),
            None => self.pair_entries(mapping)?,
        };
        for (key, value) in entries {
            if merge {
                let Some(name) = self.as_str(key) else {
                    return Err(ExcType::type_error_kwargs_nonstring_key());
                };
                let name = name.to_owned();
                let hash = self.key_of(key)?;
                let duplicate = match dict {
                    Value::Ref(id) => matches!(self.heap.get(id), HeapData::Dict(d) if d.contains(&hash)),
                    _ => false,
                };
                if duplicate {
                    return Err(ExcType::type_error(format!(
                        "got multiple values for keyword argument '{name}'"
                    )));
                }
            }
            self.dict_set(dict, key, value)?;
        }
        Ok(())
    }

    /// Entries of a dict or a `keys()`/`__getitem__` mapping; `None` for anything else.
    fn mapping_entries(&mut self, mapping: Value) -> RunResult<Option<Vec<(Value, Value)>>> {
        if let Value::Ref(id) = mapping {
            match self.heap.get(id) {
                HeapData::Dict(dict) => return Ok(Some(dict.iter().map(|(k, v)| (*k, *v)).collect())),
                HeapData::Instance(_) => {}
                _ => return Ok(None),
            }
        } else {
            return Ok(None);
        }
        let keys_name = StaticStrings::Keys.id();
        if self.user_special(mapping, keys_name)?.is_none() {
            return Ok(None);
        }
        let keys = self.call_method(mapping, keys_name, ArgValues::empty())?;
        let mut entries = Vec::new();
        for key in self.collect_iter(keys)? {
            let value = self.getitem(mapping, key)?;
            entries.push((key, value));
        }
        Ok(Some(entries))
    }

    /// Entries of an iterable of key/value pairs.
    fn pair_entries(&mut self, iterable: Value) -> RunResult<Vec<(Value, Value)>> {
        let mut entries = Vec::new();
        for (index, item) in self.collect_iter(iterable)?.into_iter().enumerate() {
            let pair = self.collect_iter(item).map_err(|err| {
                if err.is_exc_type(ExcType::TypeError) {
                    ExcType::type_error(format!(
                        "cannot convert dictionary update sequence element #{index} to a sequence"
                    ))
                } else {
                    err
                }
            })?;
            if pair.len() != 2 {
                return Err(ExcType::value_error(format!(
                    "dictionary update sequence element #{index} has length {}; 2 is required",
                    pair.len()
                )));
            }
            entries.push((pair[0], pair[1]));
        }
        Ok(entries)
    }

    // ========================================================================
    // unpacking
    // ========================================================================

    /// Items of `value` for an unpacking assignment.
    ///
    /// Iteration stops after `limit` items so `a, b = itertools-like-infinite` fails fast.
    fn unpack_items(&mut self, value: Value, limit: Option<usize>) -> RunResult<Vec<Value>> {
        if let Some(items) = self.sequence_items(value) {
            return Ok(items);
        }
        let iter = match self.get_iter(value) {
            Ok(iter) => iter,
            Err(err) if err.is_exc_type(ExcType::TypeError) && self.instance_class(value).is_none() => {
                return Err(ExcType::type_error(format!(
                    "cannot unpack non-iterable {} object",
                    self.type_name(value)
                )));
            }
            Err(err) => return Err(err),
        };
        let mut items = Vec::new();
        while limit.is_none_or(|limit| items.len() < limit) {
            match self.next_value(iter)? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    /// `UnpackSequence`: pushes exactly `count` items, the first on top.
    pub(crate) fn unpack_sequence(&mut self, value: Value, count: usize) -> RunResult<()> {
        let items = self.unpack_items(value, Some(count + 1))?;
        if items.len() < count {
            return Err(ExcType::value_error(format!(
                "not enough values to unpack (expected {count}, got {})",
                items.len()
            )));
        }
        if items.len() > count {
            return Err(ExcType::value_error(format!("too many values to unpack (expected {count})")));
        }
        self.stack.extend(items.into_iter().rev());
        Ok(())
    }

    /// `UnpackEx`: `before` items, a list of the rest, then `after` items, the first on top.
    pub(crate) fn unpack_ex(&mut self, value: Value, before: usize, after: usize) -> RunResult<()> {
        let mut items = self.unpack_items(value, None)?;
        if items.len() < before + after {
            return Err(ExcType::value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                before + after,
                items.len()
            )));
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(before);
        self.stack.extend(tail.into_iter().rev());
        let rest = self.new_list(middle)?;
        self.push(rest);
        self.stack.extend(items.into_iter().rev());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_wrap_once() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-3, 3), Some(0));
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(3, 3), None);
    }

    #[test]
    fn select_follows_step() {
        let items = [0, 1, 2, 3, 4, 5];
        assert_eq!(select(&items, (1, 5, 2)), vec![1, 3]);
        assert_eq!(select(&items, (5, -1, -1)), vec![5, 4, 3, 2, 1, 0]);
    }
}
