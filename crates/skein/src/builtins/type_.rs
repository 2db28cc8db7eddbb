//! Calling a builtin type: `int(x)`, `list(it)`, `type(x)`, `super(C, self)` and the rest.

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapData,
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        IterState, Property, Range, Set, Slice, Type, bytes,
        number::{Number, parse_float, parse_int},
        str,
    },
    value::Value,
};

/// Constructs a value of builtin type `ty` from call arguments.
pub fn construct<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    ty: Type,
    args: ArgValues,
) -> RunResult<Value> {
    match ty {
        Type::Bool => {
            let value = args.get_zero_one_arg("bool", &vm.interns)?;
            match value {
                Some(value) => Ok(Value::Bool(vm.truthy(value)?)),
                None => Ok(Value::Bool(false)),
            }
        }
        Type::Int => construct_int(vm, args),
        Type::Float => construct_float(vm, args),
        Type::Str => construct_str(vm, args),
        Type::Bytes => construct_bytes(vm, args),
        Type::List => {
            let items = match args.get_zero_one_arg("list", &vm.interns)? {
                Some(iterable) => vm.collect_iter(iterable)?,
                None => Vec::new(),
            };
            vm.new_list(items)
        }
        Type::Tuple => match args.get_zero_one_arg("tuple", &vm.interns)? {
            Some(iterable) if vm.tuple_items(iterable).is_some() => Ok(iterable),
            Some(iterable) => {
                let items = vm.collect_iter(iterable)?;
                vm.new_tuple(items)
            }
            None => vm.new_tuple(Vec::new()),
        },
        Type::Dict => {
            let ArgValues { positional, kwargs } = args;
            if positional.len() > 1 {
                return Err(ExcType::type_error(format!(
                    "dict expected at most 1 argument, got {}",
                    positional.len()
                )));
            }
            let dict = vm.build_dict(Vec::new())?;
            if let Some(source) = positional.first() {
                vm.dict_update(dict, *source, false)?;
            }
            for (name, value) in kwargs {
                vm.dict_set(dict, Value::InternString(name), value)?;
            }
            Ok(dict)
        }
        Type::Set | Type::FrozenSet => {
            let items = match args.get_zero_one_arg(ty.name(), &vm.interns)? {
                Some(iterable) => vm.collect_iter(iterable)?,
                None => Vec::new(),
            };
            let set = vm.build_set(items)?;
            if ty == Type::FrozenSet {
                if let Some(id) = set.ref_id() {
                    let data = vm.heap.get_mut(id);
                    if let HeapData::Set(items) = data {
                        *data = HeapData::FrozenSet(std::mem::replace(items, Set::new()));
                    }
                }
            }
            Ok(set)
        }
        Type::Range => {
            let values = args.get_range("range", 1, 3, &vm.interns)?;
            let ints = values
                .iter()
                .map(|value| vm.expect_int(*value))
                .collect::<RunResult<Vec<i64>>>()?;
            let range = match ints.as_slice() {
                [stop] => Range::new(0, *stop, 1)?,
                [start, stop] => Range::new(*start, *stop, 1)?,
                [start, stop, step] => Range::new(*start, *stop, *step)?,
                _ => return Err(RunError::internal("range argument count")),
            };
            Ok(Value::Ref(vm.alloc(HeapData::Range(range))?))
        }
        Type::Slice => {
            let values = args.get_range("slice", 1, 3, &vm.interns)?;
            let slice = match values.as_slice() {
                [stop] => Slice {
                    start: Value::None,
                    stop: *stop,
                    step: Value::None,
                },
                [start, stop] => Slice {
                    start: *start,
                    stop: *stop,
                    step: Value::None,
                },
                [start, stop, step] => Slice {
                    start: *start,
                    stop: *stop,
                    step: *step,
                },
                _ => return Err(RunError::internal("slice argument count")),
            };
            Ok(Value::Ref(vm.alloc(HeapData::Slice(slice))?))
        }
        Type::Type => construct_type(vm, args),
        Type::Enumerate => {
            let mut args = args;
            let start = args.take_kwarg(StaticStrings::Start.id());
            let (iterable, positional_start) = args.get_one_two_args("enumerate", &vm.interns)?;
            let count = match positional_start.or(start) {
                Some(start) => vm.expect_int(start)?,
                None => 0,
            };
            let iter = vm.get_iter(iterable)?;
            new_iterator(vm, IterState::Enumerate { iter, count })
        }
        Type::Zip => {
            args.check_no_kwargs("zip", &vm.interns)?;
            let mut iters = Vec::with_capacity(args.positional.len());
            for iterable in args.positional {
                iters.push(vm.get_iter(iterable)?);
            }
            new_iterator(vm, IterState::Zip { iters })
        }
        Type::Map => {
            args.check_no_kwargs("map", &vm.interns)?;
            if args.positional.len() < 2 {
                return Err(ExcType::type_error("map() must have at least two arguments."));
            }
            let mut positional = args.positional.into_iter();
            let func = positional.next().unwrap_or(Value::None);
            let mut iters = Vec::new();
            for iterable in positional {
                iters.push(vm.get_iter(iterable)?);
            }
            new_iterator(vm, IterState::Map { func, iters })
        }
        Type::Filter => {
            let (func, iterable) = args.get_two_args("filter", &vm.interns)?;
            let iter = vm.get_iter(iterable)?;
            new_iterator(vm, IterState::Filter { func, iter })
        }
        Type::Reversed => {
            let seq = args.get_one_arg("reversed", &vm.interns)?;
            construct_reversed(vm, seq)
        }
        Type::Property => {
            let mut args = args;
            let fget_kw = args.take_kwarg(vm.interns.intern("fget"));
            let fset_kw = args.take_kwarg(vm.interns.intern("fset"));
            args.take_kwarg(vm.interns.intern("doc"));
            let (fget, fset) = args.get_zero_one_two_args("property", &vm.interns)?;
            let property = Property {
                fget: fget.or(fget_kw).unwrap_or(Value::None),
                fset: fset.or(fset_kw).unwrap_or(Value::None),
            };
            Ok(Value::Ref(vm.alloc(HeapData::Property(property))?))
        }
        Type::StaticMethod => {
            let func = args.get_one_arg("staticmethod", &vm.interns)?;
            Ok(Value::Ref(vm.alloc(HeapData::StaticMethod(func))?))
        }
        Type::ClassMethod => {
            let func = args.get_one_arg("classmethod", &vm.interns)?;
            Ok(Value::Ref(vm.alloc(HeapData::ClassMethod(func))?))
        }
        Type::Super => construct_super(vm, args),
        _ => Err(ExcType::type_error(format!("cannot create '{ty}' instances"))),
    }
}

fn new_iterator<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    state: IterState,
) -> RunResult<Value> {
    Ok(Value::Ref(vm.alloc(HeapData::Iterator(state))?))
}

/// `int(x=0)` or `int(text, base)`.
fn construct_int<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    mut args: ArgValues,
) -> RunResult<Value> {
    let base_kw = args.take_kwarg(vm.interns.intern("base"));
    let (value, base) = args.get_zero_one_two_args("int", &vm.interns)?;
    let Some(value) = value else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = base.or(base_kw) {
        let base = vm.expect_int(base)?;
        let base = u32::try_from(base)
            .ok()
            .filter(|b| *b == 0 || (2..=36).contains(b))
            .ok_or_else(|| ExcType::value_error("int() base must be >= 2 and <= 36, or 0"))?;
        let Some(text) = vm.as_str(value) else {
            return Err(ExcType::type_error("int() can't convert non-string with explicit base"));
        };
        let number = parse_int(text, base)?;
        return vm.number_value(number);
    }
    if let Some(text) = vm.as_str(value) {
        let number = parse_int(text, 10)?;
        return vm.number_value(number);
    }
    match vm.number(value) {
        Some(Number::Float(f)) => {
            if f.is_nan() {
                return Err(ExcType::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(ExcType::overflow_error("cannot convert float infinity to integer"));
            }
            vm.new_int(BigInt::from_f64(f.trunc()).unwrap_or_default())
        }
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(number) => vm.number_value(number),
        None => {
            for dunder in ["__int__", "__index__"] {
                let name = vm.interns.intern(dunder);
                if let Some(method) = vm.user_special(value, name)? {
                    return vm.call_sync(method, ArgValues::empty());
                }
            }
            Err(ExcType::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                vm.type_name(value)
            )))
        }
    }
}

fn construct_float<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let Some(value) = args.get_zero_one_arg("float", &vm.interns)? else {
        return Ok(Value::Float(0.0));
    };
    if let Some(text) = vm.as_str(value) {
        return Ok(Value::Float(parse_float(text)?));
    }
    if let Some(number) = vm.number(value) {
        return Ok(Value::Float(number.to_f64()?));
    }
    let name = vm.interns.intern("__float__");
    if let Some(method) = vm.user_special(value, name)? {
        return vm.call_sync(method, ArgValues::empty());
    }
    Err(ExcType::type_error(format!(
        "float() argument must be a string or a real number, not '{}'",
        vm.type_name(value)
    )))
}

/// `str(obj='')` or `str(bytes, encoding)`.
fn construct_str<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (value, encoding) = args.get_zero_one_two_args("str", &vm.interns)?;
    match (value, encoding) {
        (None, _) => vm.new_str(String::new()),
        (Some(value), None) => vm.str_value(value),
        (Some(value), Some(encoding)) => {
            if vm.as_bytes(value).is_none() {
                return Err(ExcType::type_error("decoding str is not supported"));
            }
            bytes::call_method(vm, value, "decode", ArgValues::one(encoding))
        }
    }
}

/// `bytes()`, `bytes(n)`, `bytes(text, encoding)` or `bytes(iterable_of_ints)`.
fn construct_bytes<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (value, encoding) = args.get_zero_one_two_args("bytes", &vm.interns)?;
    let Some(value) = value else {
        return vm.new_bytes(Vec::new());
    };
    if vm.as_str(value).is_some() {
        let Some(encoding) = encoding else {
            return Err(ExcType::type_error("string argument without an encoding"));
        };
        return str::call_method(vm, value, "encode", ArgValues::one(encoding));
    }
    if encoding.is_some() {
        return Err(ExcType::type_error("encoding without a string argument"));
    }
    if let Some(bytes) = vm.as_bytes(value) {
        let copy = bytes.to_vec();
        return vm.new_bytes(copy);
    }
    if let Value::Int(count) = value {
        let count = usize::try_from(count).map_err(|_| ExcType::value_error("negative count"))?;
        vm.check_result_size(count)?;
        return vm.new_bytes(vec![0; count]);
    }
    let mut out = Vec::new();
    for item in vm.collect_iter(value)? {
        let byte = vm.expect_int(item)?;
        out.push(u8::try_from(byte).map_err(|_| ExcType::value_error("bytes must be in range(0, 256)"))?);
    }
    vm.new_bytes(out)
}

/// `type(obj)` or `type(name, bases, namespace)`.
fn construct_type<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    args.check_no_kwargs("type", &vm.interns)?;
    match args.positional.as_slice() {
        [value] => Ok(vm.class_of_value(*value)),
        [name, bases, namespace] => {
            let (name, bases, namespace) = (*name, *bases, *namespace);
            let Some(name) = vm.intern_value(name) else {
                return Err(ExcType::type_error(format!(
                    "type.__new__() argument 1 must be str, not {}",
                    vm.type_name(name)
                )));
            };
            if vm.tuple_items(bases).is_none() {
                return Err(ExcType::type_error(format!(
                    "type.__new__() argument 2 must be tuple, not {}",
                    vm.type_name(bases)
                )));
            }
            let bases = vm.class_bases(bases)?;
            let entries: Vec<(Value, Value)> = match namespace {
                Value::Ref(id) => match vm.heap.get(id) {
                    HeapData::Dict(dict) => dict.iter().map(|(k, v)| (*k, *v)).collect(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            let mut attrs: IndexMap<StringId, Value> = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                if let Some(key) = vm.intern_value(key) {
                    attrs.insert(key, value);
                }
            }
            let module = vm.frame().globals;
            let module = match vm.module_get(module, StaticStrings::DunderName.id()) {
                Some(value) => vm.intern_value(value),
                None => None,
            };
            let qualname = vm.interns.get_str(name).to_owned();
            let class = vm.create_class(name, qualname, module, bases, attrs)?;
            Ok(Value::Ref(class))
        }
        _ => Err(ExcType::type_error("type() takes 1 or 3 arguments")),
    }
}

/// `reversed(seq)`: lists and tuples are walked backwards in place; other sequences are
/// snapshotted.
fn construct_reversed<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    seq: Value,
) -> RunResult<Value> {
    if let Value::Ref(id) = seq {
        let state = match vm.heap.get(id) {
            HeapData::List(items) | HeapData::Tuple(items) => Some(IterState::Reversed {
                seq: id,
                remaining: items.len(),
            }),
            HeapData::Range(range) => {
                let items = (0..range.len()).rev().map(|i| Value::Int(range.get(i))).collect();
                Some(IterState::Values { items, index: 0 })
            }
            HeapData::Dict(dict) => {
                let mut items = dict.keys();
                items.reverse();
                Some(IterState::Values { items, index: 0 })
            }
            _ => None,
        };
        if let Some(state) = state {
            return new_iterator(vm, state);
        }
    }
    if let Some(text) = vm.as_str(seq) {
        let chars: Vec<String> = text.chars().rev().map(String::from).collect();
        let mut items = Vec::with_capacity(chars.len());
        for c in chars {
            items.push(vm.new_str(c)?);
        }
        return new_iterator(vm, IterState::Values { items, index: 0 });
    }
    if let Some(bytes) = vm.as_bytes(seq) {
        let items = bytes.iter().rev().map(|b| Value::Int(i64::from(*b))).collect();
        return new_iterator(vm, IterState::Values { items, index: 0 });
    }
    if vm.instance_class(seq).is_some() {
        let reversed = vm.interns.intern("__reversed__");
        if let Some(method) = vm.user_special(seq, reversed)? {
            return vm.call_sync(method, ArgValues::empty());
        }
        let len = vm.user_special(seq, StaticStrings::DunderLen.id())?;
        let getitem = vm.user_special(seq, StaticStrings::DunderGetitem.id())?;
        if let (Some(_), Some(getitem)) = (len, getitem) {
            let len = vm.len(seq)?;
            let mut items = Vec::with_capacity(len);
            for index in (0..len).rev() {
                let index = Value::Int(i64::try_from(index).unwrap_or(i64::MAX));
                items.push(vm.call_sync(getitem, ArgValues::one(index))?);
            }
            return new_iterator(vm, IterState::Values { items, index: 0 });
        }
    }
    Err(ExcType::type_error(format!(
        "'{}' object is not reversible",
        vm.type_name(seq)
    )))
}

/// `super(class, receiver)`. The compiler rewrites a bare `super()` in a method into this form.
fn construct_super<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    args.check_no_kwargs("super", &vm.interns)?;
    let (class, receiver) = match args.positional.as_slice() {
        [] => return Err(ExcType::runtime_error("super(): no arguments")),
        [class, receiver] => (*class, *receiver),
        [_] => return Err(ExcType::type_error("super() without an instance is not supported")),
        _ => return Err(ExcType::type_error_at_most("super", 2, args.positional.len())),
    };
    let class_id = match class {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Class(_)) => id,
        _ => {
            return Err(ExcType::type_error(format!(
                "super() argument 1 must be a type, not {}",
                vm.type_name(class)
            )));
        }
    };
    let receiver_is_class = matches!(receiver, Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Class(_)));
    let valid = if receiver_is_class {
        vm.issubclass(receiver, class)?
    } else {
        vm.isinstance(receiver, class)?
    };
    if !valid {
        return Err(ExcType::type_error(
            "super(type, obj): obj must be an instance or subtype of type",
        ));
    }
    Ok(Value::Ref(vm.alloc(HeapData::Super {
        class: class_id,
        receiver,
    })?))
}
