//! `list` and `tuple` methods, plus the stable sort shared with `sorted()`.

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

pub(crate) const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear", "copy",
];
pub(crate) const TUPLE_METHODS: &[&str] = &["index", "count"];

/// Runs `f` on the items of list `id`.
fn with_items<R>(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> RunResult<R> {
    match vm.heap.get_mut(id) {
        HeapData::List(items) => Ok(f(items)),
        _ => Err(RunError::internal("list method called on a non-list")),
    }
}

/// Snapshot of a list's or tuple's items.
fn snapshot(vm: &VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>, id: HeapId) -> Vec<Value> {
    match vm.heap.get(id) {
        HeapData::List(items) | HeapData::Tuple(items) => items.clone(),
        _ => Vec::new(),
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let signed_len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + signed_len } else { index };
    usize::try_from(index).ok().filter(|i| *i < len)
}

/// Calls the `list` method `name` on list `id`.
pub(crate) fn call_list_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    name: &str,
    mut args: ArgValues,
) -> RunResult<Value> {
    let qualified = format!("list.{name}");
    let method = qualified.as_str();
    match name {
        "append" => {
            let value = args.get_one_arg(method, &vm.interns)?;
            vm.heap.on_container_insert()?;
            with_items(vm, id, |items| items.push(value))?;
            Ok(Value::None)
        }
        "extend" => {
            let iterable = args.get_one_arg(method, &vm.interns)?;
            let values = vm.collect_iter(iterable)?;
            for _ in &values {
                vm.heap.on_container_insert()?;
            }
            with_items(vm, id, |items| items.extend(values))?;
            Ok(Value::None)
        }
        "insert" => {
            let (index, value) = args.get_two_args(method, &vm.interns)?;
            let index = vm.expect_int(index)?;
            vm.heap.on_container_insert()?;
            with_items(vm, id, |items| {
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(usize::try_from(position).unwrap_or(0), value);
            })?;
            Ok(Value::None)
        }
        "pop" => {
            let index = args.get_zero_one_arg(method, &vm.interns)?;
            let index = match index {
                Some(value) => vm.expect_int(value)?,
                None => -1,
            };
            let popped = with_items(vm, id, |items| {
                if items.is_empty() {
                    return Err(ExcType::index_error("pop from empty list"));
                }
                let position = normalize_index(index, items.len()).ok_or_else(|| ExcType::index_error("pop index out of range"))?;
                Ok(items.remove(position))
            })??;
            Ok(popped)
        }
        "remove" => {
            let target = args.get_one_arg(method, &vm.interns)?;
            let items = snapshot(vm, id);
            let position = find(vm, &items, target)?;
            match position {
                Some(position) => {
                    with_items(vm, id, |items| {
                        if position < items.len() {
                            items.remove(position);
                        }
                    })?;
                    Ok(Value::None)
                }
                None => Err(ExcType::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => sequence_search(vm, id, name, args, "list"),
        "sort" => {
            let key = args.take_kwarg(StaticStrings::Key.id()).unwrap_or(Value::None);
            let reverse = args.take_kwarg(StaticStrings::Reverse.id());
            args.check_zero_args(method, &vm.interns)?;
            let reverse = match reverse {
                Some(value) => vm.truthy(value)?,
                None => false,
            };
            let items = snapshot(vm, id);
            let sorted = sort_values(vm, items, key, reverse)?;
            with_items(vm, id, |items| *items = sorted)?;
            Ok(Value::None)
        }
        "reverse" => {
            args.check_zero_args(method, &vm.interns)?;
            with_items(vm, id, |items| items.reverse())?;
            Ok(Value::None)
        }
        "clear" => {
            args.check_zero_args(method, &vm.interns)?;
            with_items(vm, id, Vec::clear)?;
            Ok(Value::None)
        }
        "copy" => {
            args.check_zero_args(method, &vm.interns)?;
            let items = snapshot(vm, id);
            vm.new_list(items)
        }
        _ => Err(ExcType::attribute_error("list", name)),
    }
}

/// Calls the `tuple` method `name` on tuple `id`.
pub(crate) fn call_tuple_method(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    name: &str,
    args: ArgValues,
) -> RunResult<Value> {
    match name {
        "index" | "count" => sequence_search(vm, id, name, args, "tuple"),
        _ => Err(ExcType::attribute_error("tuple", name)),
    }
}

fn sequence_search(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    id: HeapId,
    name: &str,
    args: ArgValues,
    type_name: &str,
) -> RunResult<Value> {
    let items = snapshot(vm, id);
    if name == "count" {
        let target = args.get_one_arg(&format!("{type_name}.count"), &vm.interns)?;
        let mut count = 0;
        for item in items {
            if vm.eq(item, target)? {
                count += 1;
            }
        }
        return Ok(Value::Int(count));
    }
    let parts = args.get_range(&format!("{type_name}.index"), 1, 3, &vm.interns)?;
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let clamp = |index: i64| if index < 0 { (index + len).max(0) } else { index.min(len) };
    let start = match parts.get(1) {
        Some(value) => clamp(vm.expect_int(*value)?),
        None => 0,
    };
    let end = match parts.get(2) {
        Some(value) => clamp(vm.expect_int(*value)?),
        None => len,
    };
    let window = usize::try_from(start).unwrap_or(0)..usize::try_from(end.max(start)).unwrap_or(0);
    let offset = window.start;
    match find(vm, &items[window], parts[0])? {
        Some(position) => Ok(Value::Int(i64::try_from(position + offset).unwrap_or(i64::MAX))),
        None if type_name == "list" => {
            let repr = vm.repr(parts[0])?;
            Err(ExcType::value_error(format!("{repr} is not in list")))
        }
        None => Err(ExcType::value_error("tuple.index(x): x not in tuple")),
    }
}

/// Position of the first item equal to `target`.
fn find(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    items: &[Value],
    target: Value,
) -> RunResult<Option<usize>> {
    for (position, item) in items.iter().enumerate() {
        if item.is_identical(target) || vm.eq(*item, target)? {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

/// Sorts `items` stably by `key` (or the items themselves) using `<`.
///
/// `reverse` keeps equal items in their original order, like CPython.
pub(crate) fn sort_values(
    vm: &mut VM<'_, impl ResourceTracker, impl PrintWriter, impl VmTracer>,
    mut items: Vec<Value>,
    key: Value,
    reverse: bool,
) -> RunResult<Vec<Value>> {
    if reverse {
        items.reverse();
    }
    let keys = if key.is_none() {
        items.clone()
    } else {
        let mut keys = Vec::with_capacity(items.len());
        for item in &items {
            keys.push(vm.call_sync(key, ArgValues::one(*item))?);
        }
        keys
    };
    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    merge_sort(&mut pairs, &mut |a: &(Value, Value), b: &(Value, Value)| vm.lt(a.0, b.0))?;
    let mut sorted: Vec<Value> = pairs.into_iter().map(|(_, item)| item).collect();
    if reverse {
        sorted.reverse();
    }
    Ok(sorted)
}

/// Stable merge sort with a fallible comparison; stops at the first error.
pub(crate) fn merge_sort<T: Clone, E>(items: &mut [T], less: &mut impl FnMut(&T, &T) -> Result<bool, E>) -> Result<(), E> {
    let len = items.len();
    if len <= 1 {
        return Ok(());
    }
    if len <= 8 {
        // insertion sort for short runs
        for i in 1..len {
            let mut j = i;
            while j > 0 && less(&items[j], &items[j - 1])? {
                items.swap(j, j - 1);
                j -= 1;
            }
        }
        return Ok(());
    }
    let mid = len / 2;
    merge_sort(&mut items[..mid], less)?;
    merge_sort(&mut items[mid..], less)?;
    let left = items[..mid].to_vec();
    let right = items[mid..].to_vec();
    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        // take from the right only when strictly smaller, which keeps the sort stable
        if less(&right[j], &left[i])? {
            items[k] = right[j].clone();
            j += 1;
        } else {
            items[k] = left[i].clone();
            i += 1;
        }
        k += 1;
    }
    for item in left[i..].iter().chain(&right[j..]) {
        items[k] = item.clone();
        k += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sort_is_stable() {
        let mut items: Vec<(i32, char)> = (0..20).map(|i| (i % 3, char::from(b'a' + i as u8))).collect();
        merge_sort(&mut items, &mut |a: &(i32, char), b: &(i32, char)| Ok::<_, ()>(a.0 < b.0)).unwrap();
        let keys: Vec<i32> = items.iter().map(|(k, _)| *k).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        let zeros: String = items.iter().filter(|(k, _)| *k == 0).map(|(_, c)| *c).collect();
        assert_eq!(zeros, "adgjmps");
    }

    #[test]
    fn merge_sort_stops_on_error() {
        let mut items = vec![3, 1, 2];
        let result = merge_sort(&mut items, &mut |_: &i32, _: &i32| Err::<bool, _>("boom"));
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn negative_indices() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
