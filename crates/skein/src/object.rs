use std::fmt;

use ahash::AHashSet;
use num_bigint::BigInt;

use crate::{
    bytecode::VM,
    fstring::float_repr,
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{bytes::bytes_repr, str::str_repr},
    value::Value,
};

/// A runtime value copied out of the interpreter.
///
/// `Object` owns its data and outlives the run that produced it. Containers are converted
/// recursively; anything without a direct mapping (functions, classes, instances, iterators)
/// becomes [`Object::Repr`] holding its Python `repr()`. A container that contains itself is
/// cut at the cycle with `Repr("[...]")`-style placeholders.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Self>),
    Tuple(Vec<Self>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Self, Self)>),
    Set(Vec<Self>),
    /// The `repr()` of a value with no structural mapping.
    Repr(String),
}

impl Object {
    pub(crate) fn from_value<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        vm: &mut VM<'_, T, P, Tr>,
        value: Value,
    ) -> Self {
        let mut seen = AHashSet::new();
        Self::convert(vm, value, &mut seen)
    }

    fn convert<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        vm: &mut VM<'_, T, P, Tr>,
        value: Value,
        seen: &mut AHashSet<HeapId>,
    ) -> Self {
        match value {
            Value::None => return Self::None,
            Value::Bool(b) => return Self::Bool(b),
            Value::Int(i) => return Self::Int(i),
            Value::Float(f) => return Self::Float(f),
            Value::InternString(id) => return Self::String(vm.interns.get_str(id).to_owned()),
            _ => {}
        }
        let Value::Ref(id) = value else {
            return Self::repr_of(vm, value);
        };
        let children = match vm.heap.get(id) {
            HeapData::Str(text) => return Self::String(text.clone()),
            HeapData::Bytes(bytes) => return Self::Bytes(bytes.clone()),
            HeapData::BigInt(big) => return Self::BigInt(big.clone()),
            HeapData::List(items) => Children::List(items.clone()),
            HeapData::Tuple(items) => Children::Tuple(items.clone()),
            HeapData::Set(set) | HeapData::FrozenSet(set) => Children::Set(set.iter().copied().collect()),
            HeapData::Dict(dict) => Children::Dict(dict.iter().map(|(k, v)| (*k, *v)).collect()),
            _ => return Self::repr_of(vm, value),
        };
        if !seen.insert(id) {
            return Self::Repr(children.cycle_placeholder().to_owned());
        }
        let object = match children {
            Children::List(items) => Self::List(items.into_iter().map(|v| Self::convert(vm, v, seen)).collect()),
            Children::Tuple(items) => Self::Tuple(items.into_iter().map(|v| Self::convert(vm, v, seen)).collect()),
            Children::Set(items) => Self::Set(items.into_iter().map(|v| Self::convert(vm, v, seen)).collect()),
            Children::Dict(pairs) => Self::Dict(
                pairs
                    .into_iter()
                    .map(|(k, v)| (Self::convert(vm, k, seen), Self::convert(vm, v, seen)))
                    .collect(),
            ),
        };
        seen.remove(&id);
        object
    }

    fn repr_of<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(vm: &mut VM<'_, T, P, Tr>, value: Value) -> Self {
        match vm.repr(value) {
            Ok(text) => Self::Repr(text),
            Err(_) => Self::Repr(vm.default_object_repr(value)),
        }
    }

    /// The Python `repr()` of this object.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::BigInt(big) => out.push_str(&big.to_string()),
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::String(text) => out.push_str(&str_repr(text)),
            Self::Bytes(bytes) => out.push_str(&bytes_repr(bytes)),
            Self::List(items) => write_items(out, "[", "]", items),
            Self::Tuple(items) if items.len() == 1 => {
                out.push('(');
                items[0].write_repr(out);
                out.push_str(",)");
            }
            Self::Tuple(items) => write_items(out, "(", ")", items),
            Self::Set(items) if items.is_empty() => out.push_str("set()"),
            Self::Set(items) => write_items(out, "{", "}", items),
            Self::Dict(pairs) => {
                out.push('{');
                for (index, (key, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out);
                    out.push_str(": ");
                    value.write_repr(out);
                }
                out.push('}');
            }
            Self::Repr(text) => out.push_str(text),
        }
    }
}

fn write_items(out: &mut String, open: &str, close: &str, items: &[Object]) {
    out.push_str(open);
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
    out.push_str(close);
}

/// `str()` semantics: strings print bare, everything else as its repr.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            _ => f.write_str(&self.py_repr()),
        }
    }
}

enum Children {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Children {
    fn cycle_placeholder(&self) -> &'static str {
        match self {
            Self::List(_) => "[...]",
            Self::Tuple(_) => "(...)",
            Self::Set(_) => "{...}",
            Self::Dict(_) => "{...}",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        let object = Object::Dict(vec![
            (Object::String("a".to_owned()), Object::List(vec![Object::Int(1), Object::Float(2.5)])),
            (Object::Int(2), Object::Tuple(vec![Object::None])),
        ]);
        assert_eq!(object.py_repr(), "{'a': [1, 2.5], 2: (None,)}");
        assert_eq!(Object::Set(Vec::new()).py_repr(), "set()");
        assert_eq!(Object::Bool(true).to_string(), "True");
    }

    #[test]
    fn display_of_string_is_bare() {
        assert_eq!(Object::String("hi".to_owned()).to_string(), "hi");
        assert_eq!(Object::String("hi".to_owned()).py_repr(), "'hi'");
    }
}
