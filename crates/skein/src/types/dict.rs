//! Insertion-ordered dictionary storage.

use ahash::RandomState;
use indexmap::IndexMap;

use super::HashKey;
use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::{DictViewKind, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Methods `dict` instances expose.
pub(crate) const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "setdefault",
    "update",
    "clear",
    "copy",
    "popitem",
];

/// The storage behind `dict`.
///
/// Entries are keyed by [`HashKey`] and keep the original key value next to the mapped value,
/// so `{1: 'a'}[True]` finds the entry but iteration still yields the `1` that was inserted.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    entries: IndexMap<HashKey, (Value, Value), RandomState>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &HashKey) -> Option<Value> {
        self.entries.get(key).map(|(_, value)| *value)
    }

    #[must_use]
    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or updates; an existing entry keeps its original key and position.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) -> Option<Value> {
        match self.entries.get_mut(&hash) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.insert(hash, (key, value));
                None
            }
        }
    }

    /// Removes an entry, preserving the order of the others.
    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    /// Removes the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The entry at insertion position `index`, for iterators.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(Value, Value)> {
        self.entries.get_index(index).map(|(_, entry)| *entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(key, value)| (key, value))
    }

    /// Hash keys with their entries, for operations that need to re-insert.
    pub fn entries(&self) -> impl Iterator<Item = (&HashKey, &(Value, Value))> {
        self.entries.iter()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(key, _)| *key).collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, value)| *value).collect()
    }
}

fn with_dict<R>(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    f: impl FnOnce(&mut Dict) -> R,
) -> RunResult<R> {
    match vm.heap.get_mut(id) {
        HeapData::Dict(dict) => Ok(f(dict)),
        _ => Err(RunError::internal("dict method called on a non-dict")),
    }
}

/// Calls the `dict` method `name` on dict `id`.
pub(crate) fn call_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    name: &str,
    args: ArgValues,
) -> RunResult<Value> {
    let qualified = format!("dict.{name}");
    let method = qualified.as_str();
    match name {
        "get" => {
            let (key, default) = args.get_one_two_args(method, &vm.interns)?;
            let hash = vm.key_of(key)?;
            let found = with_dict(vm, id, |dict| dict.get(&hash))?;
            Ok(found.or(default).unwrap_or(Value::None))
        }
        "keys" | "values" | "items" => {
            args.check_zero_args(method, &vm.interns)?;
            let kind = match name {
                "keys" => DictViewKind::Keys,
                "values" => DictViewKind::Values,
                _ => DictViewKind::Items,
            };
            Ok(Value::Ref(vm.alloc(HeapData::DictView { dict: id, kind })?))
        }
        "pop" => {
            let (key, default) = args.get_one_two_args(method, &vm.interns)?;
            let hash = vm.key_of(key)?;
            match with_dict(vm, id, |dict| dict.remove(&hash))? {
                Some((_, value)) => Ok(value),
                None => default.ok_or_else(|| vm.key_error(key)),
            }
        }
        "setdefault" => {
            let (key, default) = args.get_one_two_args(method, &vm.interns)?;
            let default = default.unwrap_or(Value::None);
            let hash = vm.key_of(key)?;
            if let Some(existing) = with_dict(vm, id, |dict| dict.get(&hash))? {
                return Ok(existing);
            }
            vm.heap.on_container_insert()?;
            with_dict(vm, id, |dict| dict.insert(hash, key, default))?;
            Ok(default)
        }
        "update" => {
            let mut args = args;
            let kwargs = std::mem::take(&mut args.kwargs);
            if let Some(mapping) = args.get_zero_one_arg(method, &vm.interns)? {
                vm.dict_update(Value::Ref(id), mapping, false)?;
            }
            for (key, value) in kwargs {
                vm.dict_set(Value::Ref(id), Value::InternString(key), value)?;
            }
            Ok(Value::None)
        }
        "clear" => {
            args.check_zero_args(method, &vm.interns)?;
            with_dict(vm, id, Dict::clear)?;
            Ok(Value::None)
        }
        "copy" => {
            args.check_zero_args(method, &vm.interns)?;
            let copy = with_dict(vm, id, |dict| dict.clone())?;
            Ok(Value::Ref(vm.alloc(HeapData::Dict(copy))?))
        }
        "popitem" => {
            args.check_zero_args(method, &vm.interns)?;
            match with_dict(vm, id, Dict::pop_last)? {
                Some((key, value)) => vm.new_tuple(vec![key, value]),
                None => Err(ExcType::KeyError.error("popitem(): dictionary is empty")),
            }
        }
        _ => Err(ExcType::attribute_error("dict", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_keeps_original_key_and_order() {
        let mut dict = Dict::new();
        dict.insert(HashKey::Int(1), Value::Int(1), Value::Int(10));
        dict.insert(HashKey::Int(2), Value::Int(2), Value::Int(20));
        let old = dict.insert(HashKey::Int(1), Value::Bool(true), Value::Int(11));
        assert_eq!(old, Some(Value::Int(10)));
        assert_eq!(dict.keys(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(dict.get(&HashKey::Int(1)), Some(Value::Int(11)));
    }

    #[test]
    fn remove_preserves_order() {
        let mut dict = Dict::new();
        for i in 0..4 {
            dict.insert(HashKey::Int(i), Value::Int(i), Value::None);
        }
        dict.remove(&HashKey::Int(1));
        assert_eq!(dict.keys(), vec![Value::Int(0), Value::Int(2), Value::Int(3)]);
        assert_eq!(dict.pop_last().map(|(key, _)| key), Some(Value::Int(3)));
    }
}
