//! Insertion-ordered storage for `set` and `frozenset`.

use ahash::RandomState;
use indexmap::IndexMap;

use super::HashKey;
use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const SET_METHODS: &[&str] = &[
    "add",
    "remove",
    "discard",
    "pop",
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "update",
    "clear",
    "copy",
    "issubset",
    "issuperset",
    "isdisjoint",
];

pub(crate) const FROZENSET_METHODS: &[&str] = &[
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "copy",
    "issubset",
    "issuperset",
    "isdisjoint",
];

#[derive(Debug, Clone, Default)]
pub(crate) struct Set {
    items: IndexMap<HashKey, Value, RandomState>,
}

impl Set {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &HashKey) -> bool {
        self.items.contains_key(key)
    }

    /// Adds `value` unless an equal element is present; returns whether it was added.
    pub fn insert(&mut self, key: HashKey, value: Value) -> bool {
        if self.items.contains_key(&key) {
            return false;
        }
        self.items.insert(key, value);
        true
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.items.shift_remove(key)
    }

    /// Removes the oldest element.
    pub fn pop_first(&mut self) -> Option<Value> {
        self.items.shift_remove_index(0).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.items.get_index(index).map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.items.iter()
    }

    /// Hash keys in a canonical order, used to hash and compare frozensets.
    #[must_use]
    pub fn sorted_keys(&self) -> Vec<HashKey> {
        let mut keys: Vec<HashKey> = self.items.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.items.keys().all(|key| other.contains(key))
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (key, value) in other.entries() {
            result.insert(key.clone(), *value);
        }
        result
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let items = self
            .items
            .iter()
            .filter(|(key, _)| other.contains(key))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        Self { items }
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let items = self
            .items
            .iter()
            .filter(|(key, _)| !other.contains(key))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        Self { items }
    }

    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        let mut result = self.difference(other);
        for (key, value) in other.entries() {
            if !self.contains(key) {
                result.insert(key.clone(), *value);
            }
        }
        result
    }
}

/// Snapshot of set `id`, and whether it is frozen.
fn snapshot(vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>, id: HeapId) -> RunResult<(Set, bool)> {
    match vm.heap.get(id) {
        HeapData::Set(set) => Ok((set.clone(), false)),
        HeapData::FrozenSet(set) => Ok((set.clone(), true)),
        _ => Err(RunError::internal("set method called on a non-set")),
    }
}

fn with_set<R>(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    f: impl FnOnce(&mut Set) -> R,
) -> RunResult<R> {
    match vm.heap.get_mut(id) {
        HeapData::Set(set) => Ok(f(set)),
        _ => Err(RunError::internal("set mutation on a non-set")),
    }
}

/// Builds a `Set` from any iterable, reusing the storage of sets.
fn to_set(vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>, iterable: Value) -> RunResult<Set> {
    if let Value::Ref(id) = iterable {
        if let HeapData::Set(set) | HeapData::FrozenSet(set) = vm.heap.get(id) {
            return Ok(set.clone());
        }
    }
    let mut set = Set::new();
    for item in vm.collect_iter(iterable)? {
        let key = vm.key_of(item)?;
        set.insert(key, item);
    }
    Ok(set)
}

/// Calls the `set` or `frozenset` method `name` on `id`.
pub(crate) fn call_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    name: &str,
    args: ArgValues,
) -> RunResult<Value> {
    let (current, frozen) = snapshot(vm, id)?;
    let type_name = if frozen { "frozenset" } else { "set" };
    let qualified = format!("{type_name}.{name}");
    let method = qualified.as_str();
    match name {
        "add" => {
            let item = args.get_one_arg(method, &vm.interns)?;
            vm.set_add(Value::Ref(id), item)?;
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let item = args.get_one_arg(method, &vm.interns)?;
            let key = vm.key_of(item)?;
            let removed = with_set(vm, id, |set| set.remove(&key))?;
            if removed.is_none() && name == "remove" {
                return Err(vm.key_error(item));
            }
            Ok(Value::None)
        }
        "pop" => {
            args.check_zero_args(method, &vm.interns)?;
            with_set(vm, id, Set::pop_first)?.ok_or_else(|| ExcType::KeyError.error("pop from an empty set"))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            args.check_no_kwargs(method, &vm.interns)?;
            let mut result = current;
            for other in args.positional {
                let other = to_set(vm, other)?;
                result = match name {
                    "union" => result.union(&other),
                    "intersection" => result.intersection(&other),
                    "difference" => result.difference(&other),
                    _ => result.symmetric_difference(&other),
                };
            }
            let data = if frozen { HeapData::FrozenSet(result) } else { HeapData::Set(result) };
            Ok(Value::Ref(vm.alloc(data)?))
        }
        "update" => {
            args.check_no_kwargs(method, &vm.interns)?;
            for other in args.positional {
                for item in vm.collect_iter(other)? {
                    vm.set_add(Value::Ref(id), item)?;
                }
            }
            Ok(Value::None)
        }
        "clear" => {
            args.check_zero_args(method, &vm.interns)?;
            with_set(vm, id, Set::clear)?;
            Ok(Value::None)
        }
        "copy" => {
            args.check_zero_args(method, &vm.interns)?;
            if frozen {
                return Ok(Value::Ref(id));
            }
            Ok(Value::Ref(vm.alloc(HeapData::Set(current))?))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let other = args.get_one_arg(method, &vm.interns)?;
            let other = to_set(vm, other)?;
            Ok(Value::Bool(match name {
                "issubset" => current.is_subset(&other),
                "issuperset" => other.is_subset(&current),
                _ => current.intersection(&other).is_empty(),
            }))
        }
        _ => Err(ExcType::attribute_error(type_name, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(values: &[i64]) -> Set {
        let mut set = Set::new();
        for value in values {
            set.insert(HashKey::Int(*value), Value::Int(*value));
        }
        set
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut set = set_of(&[1, 2]);
        assert!(!set.insert(HashKey::Int(1), Value::Bool(true)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_index(0), Some(Value::Int(1)));
    }

    #[test]
    fn algebra() {
        let a = set_of(&[1, 2, 3]);
        let b = set_of(&[2, 3, 4]);
        assert_eq!(a.union(&b).len(), 4);
        assert_eq!(a.intersection(&b).iter().copied().collect::<Vec<_>>(), vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(a.difference(&b).iter().copied().collect::<Vec<_>>(), vec![Value::Int(1)]);
        assert_eq!(a.symmetric_difference(&b).len(), 2);
        assert!(set_of(&[2]).is_subset(&a));
        assert!(!b.is_subset(&a));
    }
}
