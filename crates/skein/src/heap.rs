use std::mem::size_of;

use num_bigint::BigInt;
use strum::IntoStaticStr;

use crate::{
    intern::StringId,
    resource::{ResourceError, ResourceTracker},
    types::{BoundMethod, ClassObject, Dict, Function, Generator, Instance, IterState, Module, Property, Range, Set, Slice},
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Stable pseudo-address used by `id()` and default reprs.
    #[must_use]
    pub fn address(self) -> usize {
        0x7f00_0000_1000 + self.0 * 0x30
    }
}

/// Which view a `dict.keys()` / `values()` / `items()` call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DictViewKind {
    Keys,
    Values,
    Items,
}

/// Everything that does not fit in an immediate [`Value`].
#[derive(Debug, IntoStaticStr)]
pub(crate) enum HeapData {
    Str(String),
    Bytes(Vec<u8>),
    /// Always outside the `i64` range; smaller results are demoted to `Value::Int`.
    BigInt(BigInt),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Dict),
    Set(Set),
    FrozenSet(Set),
    Range(Range),
    Slice(Slice),
    Function(Function),
    BoundMethod(BoundMethod),
    /// A method of a builtin type looked up on a value, e.g. `[].append`.
    BuiltinMethod {
        receiver: Value,
        name: StringId,
    },
    Class(ClassObject),
    Instance(Instance),
    Module(Module),
    Cell(Value),
    Generator(Generator),
    Iterator(IterState),
    Property(Property),
    StaticMethod(Value),
    ClassMethod(Value),
    /// `super(class, receiver)`: attribute lookups start after `class` in the receiver's MRO.
    Super {
        class: HeapId,
        receiver: Value,
    },
    DictView {
        dict: HeapId,
        kind: DictViewKind,
    },
}

impl HeapData {
    /// Rough size in bytes, for memory limits.
    fn estimate_size(&self) -> usize {
        let values = |n: usize| n * size_of::<Value>();
        size_of::<Self>()
            + match self {
                Self::Str(s) => s.len(),
                Self::Bytes(b) => b.len(),
                Self::BigInt(i) => usize::try_from(i.bits() / 8).unwrap_or(usize::MAX),
                Self::List(items) | Self::Tuple(items) => values(items.len()),
                Self::Dict(dict) => values(dict.len() * 3),
                Self::Set(set) | Self::FrozenSet(set) => values(set.len() * 2),
                Self::Function(func) => values(func.defaults.len() + func.closure.len()),
                Self::Class(class) => values(class.attrs.len() + class.mro.len()),
                Self::Instance(instance) => values(instance.attrs.len()),
                Self::Module(module) => values(module.attrs.len()),
                Self::Generator(generator) => values(generator.stack.len()) + size_of::<crate::bytecode::vm::Frame>(),
                _ => 0,
            }
    }
}

/// Arena of heap objects with a free list and a mark-and-sweep collector.
///
/// Nothing is freed until [`collect`](Self::collect) runs, so ids held anywhere in native
/// code stay valid between safe points.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapData>>,
    free_list: Vec<HeapId>,
    tracker: T,
    allocations_since_gc: usize,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(256),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new heap entry.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        self.allocations_since_gc += 1;
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(data);
            Ok(id)
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(data));
            Ok(id)
        }
    }

    /// Records growth of an existing container against the allocation limits.
    pub fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.tracker.on_container_insert()
    }

    /// # Panics
    ///
    /// Panics if `id` was freed; ids reachable from the program are never freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries[id.index()].as_ref().expect("heap id refers to a live object")
    }

    /// # Panics
    ///
    /// Panics if `id` was freed.
    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries[id.index()].as_mut().expect("heap id refers to a live object")
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Whether enough allocations happened since the last cycle to collect again.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.allocations_since_gc >= self.tracker.gc_interval()
    }

    /// Frees every object not reachable from `roots`, returning how many were freed.
    pub fn collect(&mut self, roots: Vec<HeapId>) -> usize {
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list = roots;

        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(data)) = self.entries.get(idx) {
                collect_child_ids(data, &mut work_list);
            }
        }

        let mut freed = 0;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(data) = entry.take() {
                self.tracker.on_free(|| data.estimate_size());
                self.free_list.push(HeapId(idx));
                freed += 1;
            }
        }
        self.allocations_since_gc = 0;
        freed
    }
}

fn push_value(value: Value, work_list: &mut Vec<HeapId>) {
    if let Value::Ref(id) = value {
        work_list.push(id);
    }
}

fn push_values<'a>(values: impl IntoIterator<Item = &'a Value>, work_list: &mut Vec<HeapId>) {
    for value in values {
        push_value(*value, work_list);
    }
}

/// Collects child HeapIds from a HeapData value for GC traversal.
fn collect_child_ids(data: &HeapData, work_list: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) | HeapData::Bytes(_) | HeapData::BigInt(_) | HeapData::Range(_) => {}
        HeapData::List(items) | HeapData::Tuple(items) => push_values(items, work_list),
        HeapData::Dict(dict) => {
            for (key, value) in dict.iter() {
                push_value(*key, work_list);
                push_value(*value, work_list);
            }
        }
        HeapData::Set(set) | HeapData::FrozenSet(set) => push_values(set.iter(), work_list),
        HeapData::Slice(slice) => push_values([&slice.start, &slice.stop, &slice.step], work_list),
        HeapData::Function(func) => {
            work_list.push(func.globals);
            push_values(&func.defaults, work_list);
            push_values(func.kw_defaults.iter().map(|(_, value)| value), work_list);
            work_list.extend(func.closure.iter().copied());
            push_values(func.attrs.values(), work_list);
        }
        HeapData::BoundMethod(method) => push_values([&method.func, &method.receiver], work_list),
        HeapData::BuiltinMethod { receiver, .. } => push_value(*receiver, work_list),
        HeapData::Class(class) => {
            work_list.extend(class.bases.iter().copied());
            work_list.extend(class.mro.iter().copied());
            push_values(class.attrs.values(), work_list);
        }
        HeapData::Instance(instance) => {
            work_list.push(instance.class);
            push_values(instance.attrs.values(), work_list);
        }
        HeapData::Module(module) => push_values(module.attrs.values(), work_list),
        HeapData::Cell(value) | HeapData::StaticMethod(value) | HeapData::ClassMethod(value) => {
            push_value(*value, work_list);
        }
        HeapData::Generator(generator) => {
            push_values(&generator.stack, work_list);
            if let Some(frame) = &generator.frame {
                frame.collect_refs(work_list);
            }
        }
        HeapData::Iterator(state) => state.collect_refs(work_list),
        HeapData::Property(property) => push_values([&property.fget, &property.fset], work_list),
        HeapData::Super { class, receiver } => {
            work_list.push(*class);
            push_value(*receiver, work_list);
        }
        HeapData::DictView { dict, .. } => work_list.push(*dict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = Heap::new(NoLimitTracker);
        let inner = heap.allocate(HeapData::Str("kept".to_owned())).unwrap();
        let list = heap.allocate(HeapData::List(vec![Value::Ref(inner)])).unwrap();
        let garbage = heap.allocate(HeapData::Str("garbage".to_owned())).unwrap();
        assert_eq!(heap.live_count(), 3);

        let freed = heap.collect(vec![list]);
        assert_eq!(freed, 1);
        assert_eq!(heap.live_count(), 2);
        assert!(matches!(heap.get(inner), HeapData::Str(s) if s == "kept"));

        // the freed slot is reused
        let reused = heap.allocate(HeapData::Tuple(Vec::new())).unwrap();
        assert_eq!(reused, garbage);
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.allocate(HeapData::List(Vec::new())).unwrap();
        let b = heap.allocate(HeapData::List(vec![Value::Ref(a)])).unwrap();
        if let HeapData::List(items) = heap.get_mut(a) {
            items.push(Value::Ref(b));
        }
        assert_eq!(heap.collect(Vec::new()), 2);
        assert_eq!(heap.live_count(), 0);
    }
}
