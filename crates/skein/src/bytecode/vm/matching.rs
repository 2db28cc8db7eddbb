//! Structural tests behind `match` statements.

use super::VM;
use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Dict, Type},
    value::Value,
};

/// Builtin types whose class patterns bind the subject itself for one positional sub-pattern.
const SELF_MATCHING: &[Type] = &[
    Type::Bool,
    Type::Bytes,
    Type::Dict,
    Type::Float,
    Type::FrozenSet,
    Type::Int,
    Type::List,
    Type::Set,
    Type::Str,
    Type::Tuple,
];

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Whether `subject` is a sequence of a length that a pattern with `fixed` non-star
    /// sub-patterns can match. `str`, `bytes` and mappings never match sequence patterns.
    pub(super) fn match_sequence(&self, subject: Value, fixed: usize, has_star: bool) -> bool {
        if !self.builtin_type(subject).is_some_and(Type::is_match_sequence) {
            return false;
        }
        let len = match subject {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => items.len(),
                HeapData::Range(range) => range.len(),
                _ => return false,
            },
            _ => return false,
        };
        if has_star { len >= fixed } else { len == fixed }
    }

    pub(super) fn is_dict(&self, subject: Value) -> bool {
        matches!(subject, Value::Ref(id) if matches!(self.heap.get(id), HeapData::Dict(_)))
    }

    /// Values of `keys` in mapping `subject` as a tuple, or `None` if any key is missing.
    pub(super) fn match_keys(&mut self, subject: Value, keys: Value) -> RunResult<Value> {
        let keys = self.tuple_items(keys).unwrap_or_default();
        let Some(dict) = subject.ref_id() else {
            return Ok(Value::None);
        };
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let hash = self.key_of(key)?;
            let found = match self.heap.get(dict) {
                HeapData::Dict(dict) => dict.get(&hash),
                _ => None,
            };
            match found {
                Some(value) => values.push(value),
                None => return Ok(Value::None),
            }
        }
        self.new_tuple(values)
    }

    /// A class pattern: `None` if `subject` is not an instance of `class` or lacks an attribute,
    /// otherwise the tuple of `count` positional captures followed by the keyword captures.
    pub(super) fn match_class(&mut self, subject: Value, class: Value, count: usize, names: Value) -> RunResult<Value> {
        let class_name = match class {
            Value::Builtin(Builtins::Type(ty)) => ty.name().to_owned(),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => self.class_name(id),
            _ => return Err(ExcType::type_error("called match pattern must be a class")),
        };
        if !self.isinstance(subject, class)? {
            return Ok(Value::None);
        }

        let mut attrs = Vec::new();
        if count > 0 {
            match class {
                Value::Builtin(Builtins::Type(ty)) if SELF_MATCHING.contains(&ty) => {
                    if count > 1 {
                        return Err(ExcType::type_error(format!(
                            "{class_name}() accepts 1 positional sub-pattern ({count} given)"
                        )));
                    }
                }
                Value::Ref(id) => {
                    let match_args = self.lookup_in_mro(id, StaticStrings::DunderMatchArgs.id());
                    let match_args = match match_args {
                        Some(value) => self.tuple_items(value).ok_or_else(|| {
                            ExcType::type_error(format!(
                                "{class_name}.__match_args__ must be a tuple (got {})",
                                self.type_name(value)
                            ))
                        })?,
                        None => Vec::new(),
                    };
                    if count > match_args.len() {
                        let plural = if match_args.len() == 1 { "" } else { "s" };
                        return Err(ExcType::type_error(format!(
                            "{class_name}() accepts {} positional sub-pattern{plural} ({count} given)",
                            match_args.len()
                        )));
                    }
                    for arg in &match_args[..count] {
                        let Some(name) = self.intern_value(*arg) else {
                            return Err(ExcType::type_error("__match_args__ elements must be strings"));
                        };
                        attrs.push(name);
                    }
                }
                _ => {
                    return Err(ExcType::type_error(format!(
                        "{class_name}() accepts 0 positional sub-patterns ({count} given)"
                    )));
                }
            }
        }
        for name in self.tuple_items(names).unwrap_or_default() {
            if let Some(name) = self.intern_value(name) {
                attrs.push(name);
            }
        }

        let mut values = Vec::with_capacity(count.max(attrs.len()));
        if count > 0 && attrs.len() < count {
            // a builtin type matched positionally binds the subject itself
            values.push(subject);
        }
        for name in attrs {
            match self.get_attr(subject, name) {
                Ok(value) => values.push(value),
                Err(err) if err.is_exc_type(ExcType::AttributeError) => return Ok(Value::None),
                Err(err) => return Err(err),
            }
        }
        self.new_tuple(values)
    }

    /// `{**rest}` in a mapping pattern: a copy of `subject` without the matched `keys`.
    pub(super) fn copy_dict_without_keys(&mut self, subject: Value, keys: Value) -> RunResult<Value> {
        let keys = self.tuple_items(keys).unwrap_or_default();
        let mut hashes = Vec::with_capacity(keys.len());
        for key in keys {
            hashes.push(self.key_of(key)?);
        }
        let mut rest = Dict::new();
        if let Some(HeapData::Dict(dict)) = subject.ref_id().map(|id| self.heap.get(id)) {
            for (hash, (key, value)) in dict.entries() {
                if !hashes.contains(hash) {
                    rest.insert(hash.clone(), *key, *value);
                }
            }
        }
        Ok(Value::Ref(self.alloc(HeapData::Dict(rest))?))
    }
}
