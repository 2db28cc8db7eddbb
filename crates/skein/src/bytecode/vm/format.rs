//! `repr()`, `str()`, `format()` and string templating.

use num_bigint::BigInt;
use num_traits::FromPrimitive;

use super::VM;
use crate::{
    args::ArgValues,
    bytecode::op::FORMAT_HAS_SPEC,
    exception_private::{ExcType, RunError, RunResult},
    fstring::{
        Align, Conversion, FieldAccess, FieldName, FormatSpec, PercentPart, TemplatePart, float_repr, format_float,
        format_int, format_str, parse_percent, parse_template,
    },
    heap::{DictViewKind, HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker},
    tracer::VmTracer,
    types::{
        bytes::bytes_repr,
        number::Number,
        str::{ascii_escape, str_repr},
    },
    value::Value,
};

/// Field numbering of a `str.format` template: fields are either all auto or all explicit.
#[derive(Debug, Clone, Copy)]
enum Numbering {
    Unknown,
    Auto(usize),
    Manual,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `repr(value)`.
    pub(crate) fn repr(&mut self, value: Value) -> RunResult<String> {
        Ok(match value {
            Value::Undefined | Value::None => "None".to_owned(),
            Value::NotImplemented => "NotImplemented".to_owned(),
            Value::Ellipsis => "Ellipsis".to_owned(),
            Value::Bool(b) => if b { "True" } else { "False" }.to_owned(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(f),
            Value::InternString(id) => str_repr(self.interns.get_str(id)),
            Value::Builtin(builtin) => builtin.repr(&self.interns),
            Value::Ref(id) => return self.repr_ref(value, id),
        })
    }

    fn repr_ref(&mut self, value: Value, id: HeapId) -> RunResult<String> {
        Ok(match self.heap.get(id) {
            HeapData::Str(text) => str_repr(text),
            HeapData::Bytes(bytes) => bytes_repr(bytes),
            HeapData::BigInt(big) => big.to_string(),
            HeapData::List(_) | HeapData::Tuple(_) | HeapData::Dict(_) | HeapData::Set(_) | HeapData::FrozenSet(_) => {
                return self.container_repr(id);
            }
            HeapData::Range(range) => {
                if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            HeapData::Slice(slice) => {
                let slice = *slice;
                format!(
                    "slice({}, {}, {})",
                    self.repr(slice.start)?,
                    self.repr(slice.stop)?,
                    self.repr(slice.step)?
                )
            }
            HeapData::Function(func) => format!("<function {} at 0x{:x}>", func.qualname(), id.address()),
            HeapData::BoundMethod(method) => {
                let (func, receiver) = (method.func, method.receiver);
                let name = self.callable_qualname(func);
                format!("<bound method {name} of {}>", self.repr(receiver)?)
            }
            HeapData::BuiltinMethod { receiver, name } => {
                let (receiver, name) = (*receiver, *name);
                format!(
                    "<built-in method {} of {} object at 0x{:x}>",
                    self.interns.get_str(name),
                    self.type_name(receiver),
                    receiver.ref_id().map_or(0, HeapId::address)
                )
            }
            HeapData::Class(class) => match class.module {
                Some(module) if self.interns.get_str(module) != "builtins" => {
                    format!("<class '{}.{}'>", self.interns.get_str(module), class.qualname)
                }
                _ => format!("<class '{}'>", class.qualname),
            },
            HeapData::Instance(_) => return self.instance_repr(value),
            HeapData::Module(module) => format!("<module '{}'>", self.interns.get_str(module.name)),
            HeapData::Cell(_) => format!("<cell at 0x{:x}>", id.address()),
            HeapData::Generator(_) => self.generator_repr(id),
            HeapData::Iterator(state) => format!("<{} object at 0x{:x}>", state.py_type().name(), id.address()),
            HeapData::Property(_) => format!("<property object at 0x{:x}>", id.address()),
            HeapData::StaticMethod(func) => {
                let func = *func;
                format!("<staticmethod({})>", self.repr(func)?)
            }
            HeapData::ClassMethod(func) => {
                let func = *func;
                format!("<classmethod({})>", self.repr(func)?)
            }
            HeapData::Super { class, receiver } => {
                let (class, receiver) = (*class, *receiver);
                let receiver_class = self.class_of_value(receiver);
                format!(
                    "<super: {}, <{} object>>",
                    self.repr(Value::Ref(class))?,
                    self.repr(receiver_class)?.trim_start_matches("<class '").trim_end_matches("'>")
                )
            }
            HeapData::DictView { dict, kind } => {
                let (dict, kind) = (*dict, *kind);
                return self.dict_view_repr(dict, kind);
            }
        })
    }

    /// `__qualname__` of a function-like value, for method reprs.
    fn callable_qualname(&self, func: Value) -> String {
        match func {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(func) => func.qualname().to_owned(),
                _ => self.type_name(func),
            },
            Value::Builtin(builtin) => builtin.name(&self.interns),
            _ => self.type_name(func),
        }
    }

    /// Reprs of lists, tuples, dicts and sets; a container already being printed shows as `...`.
    fn container_repr(&mut self, id: HeapId) -> RunResult<String> {
        if self.repr_guard.contains(&id) {
            return Ok(match self.heap.get(id) {
                HeapData::List(_) => "[...]",
                HeapData::Tuple(_) => "(...)",
                HeapData::Dict(_) => "{...}",
                _ => "...",
            }
            .to_owned());
        }
        if self.repr_guard.len() >= usize::from(MAX_DATA_RECURSION_DEPTH) {
            return Err(ExcType::RecursionError
                .error("maximum recursion depth exceeded while getting the repr of an object"));
        }
        self.repr_guard.push(id);
        let result = self.container_repr_inner(id);
        self.repr_guard.pop();
        result
    }

    fn container_repr_inner(&mut self, id: HeapId) -> RunResult<String> {
        match self.heap.get(id) {
            HeapData::List(items) => {
                let items = items.clone();
                Ok(format!("[{}]", self.join_reprs(&items)?))
            }
            HeapData::Tuple(items) => {
                let items = items.clone();
                if items.len() == 1 {
                    return Ok(format!("({},)", self.repr(items[0])?));
                }
                Ok(format!("({})", self.join_reprs(&items)?))
            }
            HeapData::Dict(dict) => {
                let entries: Vec<(Value, Value)> = dict.iter().map(|(k, v)| (*k, *v)).collect();
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    parts.push(format!("{}: {}", self.repr(key)?, self.repr(value)?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            HeapData::Set(set) => {
                let items: Vec<Value> = set.iter().copied().collect();
                if items.is_empty() {
                    return Ok("set()".to_owned());
                }
                Ok(format!("{{{}}}", self.join_reprs(&items)?))
            }
            HeapData::FrozenSet(set) => {
                let items: Vec<Value> = set.iter().copied().collect();
                if items.is_empty() {
                    return Ok("frozenset()".to_owned());
                }
                Ok(format!("frozenset({{{}}})", self.join_reprs(&items)?))
            }
            _ => Err(RunError::internal("container repr of a non-container")),
        }
    }

    fn join_reprs(&mut self, items: &[Value]) -> RunResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.repr(*item)?);
        }
        Ok(parts.join(", "))
    }

    fn dict_view_repr(&mut self, dict: HeapId, kind: DictViewKind) -> RunResult<String> {
        let (name, items) = match self.heap.get(dict) {
            HeapData::Dict(d) => match kind {
                DictViewKind::Keys => ("dict_keys", d.keys()),
                DictViewKind::Values => ("dict_values", d.values()),
                DictViewKind::Items => {
                    let pairs: Vec<(Value, Value)> = d.iter().map(|(k, v)| (*k, *v)).collect();
                    let mut parts = Vec::with_capacity(pairs.len());
                    for (key, value) in pairs {
                        parts.push(format!("({}, {})", self.repr(key)?, self.repr(value)?));
                    }
                    return Ok(format!("dict_items([{}])", parts.join(", ")));
                }
            },
            _ => return Err(RunError::internal("dict view of a non-dict")),
        };
        Ok(format!("{name}([{}])", self.join_reprs(&items)?))
    }

    /// Calls `__repr__` or `__str__` of an instance and checks that it returned a string.
    fn instance_text(&mut self, value: Value, dunder: StaticStrings) -> RunResult<String> {
        let Some(method) = self.lookup_special(value, dunder.id())? else {
            return Ok(self.default_object_repr(value));
        };
        let result = self.call_sync(method, ArgValues::empty())?;
        match self.as_str(result) {
            Some(text) => Ok(text.to_owned()),
            None => {
                let which: &'static str = dunder.into();
                Err(ExcType::type_error(format!(
                    "{which} returned non-string (type {})",
                    self.type_name(result)
                )))
            }
        }
    }

    fn instance_repr(&mut self, value: Value) -> RunResult<String> {
        self.instance_text(value, StaticStrings::DunderRepr)
    }

    /// `object.__repr__`: `<module.Class object at 0x...>`.
    pub(crate) fn default_object_repr(&self, value: Value) -> String {
        let address = value.ref_id().map_or(0, HeapId::address);
        match self.instance_class(value) {
            Some(class) => {
                let HeapData::Class(object) = self.heap.get(class) else {
                    return format!("<object at 0x{address:x}>");
                };
                let module = object.module.map_or("__main__", |m| self.interns.get_str(m));
                format!("<{module}.{} object at 0x{address:x}>", object.qualname)
            }
            None => format!("<{} object at 0x{address:x}>", self.type_name(value)),
        }
    }

    /// The `args` tuple of an exception instance.
    pub(crate) fn exception_args(&self, id: HeapId) -> Vec<Value> {
        match self.heap.get(id) {
            HeapData::Instance(instance) => instance
                .attrs
                .get(&StaticStrings::Args.id())
                .and_then(|args| self.tuple_items(*args))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// `BaseException.__str__`: empty, the single argument, or the repr of all arguments.
    ///
    /// `KeyError` shows the repr of its key.
    pub(crate) fn exception_str(&mut self, id: HeapId) -> RunResult<String> {
        let args = self.exception_args(id);
        match args.as_slice() {
            [] => Ok(String::new()),
            [arg] if self.exc_type_of(id) == ExcType::KeyError => self.repr(*arg),
            [arg] => self.py_str(*arg),
            _ => {
                let tuple = self.new_tuple(args)?;
                self.repr(tuple)
            }
        }
    }

    /// `BaseException.__repr__`: `Name(arg, ...)`.
    pub(crate) fn exception_repr(&mut self, id: HeapId) -> RunResult<String> {
        let args = self.exception_args(id);
        let name = self.type_name(Value::Ref(id));
        Ok(format!("{name}({})", self.join_reprs(&args)?))
    }

    /// `str(value)`.
    pub(crate) fn py_str(&mut self, value: Value) -> RunResult<String> {
        if let Some(text) = self.as_str(value) {
            return Ok(text.to_owned());
        }
        if self.instance_class(value).is_some() {
            return self.instance_text(value, StaticStrings::DunderStr);
        }
        self.repr(value)
    }

    /// `str(value)` as a `str` value, reusing `value` when it already is one.
    pub(crate) fn str_value(&mut self, value: Value) -> RunResult<Value> {
        if self.as_str(value).is_some() {
            return Ok(value);
        }
        let text = self.py_str(value)?;
        self.new_str(text)
    }

    /// Applies an `!s`, `!r` or `!a` conversion.
    fn convert(&mut self, value: Value, conversion: Conversion) -> RunResult<Value> {
        match conversion {
            Conversion::None => Ok(value),
            Conversion::Str => self.str_value(value),
            Conversion::Repr => {
                let text = self.repr(value)?;
                self.new_str(text)
            }
            Conversion::Ascii => {
                let text = ascii_escape(&self.repr(value)?);
                self.new_str(text)
            }
        }
    }

    /// `format(value, spec)`.
    pub(crate) fn format_value(&mut self, value: Value, spec: &str) -> RunResult<String> {
        if self.instance_class(value).is_some() {
            if let Some(method) = self.user_special(value, StaticStrings::DunderFormat.id())? {
                let spec = self.new_str(spec)?;
                let result = self.call_sync(method, ArgValues::one(spec))?;
                return match self.as_str(result) {
                    Some(text) => Ok(text.to_owned()),
                    None => Err(ExcType::type_error(format!(
                        "__format__ must return a str, not {}",
                        self.type_name(result)
                    ))),
                };
            }
        }
        if spec.is_empty() {
            return self.py_str(value);
        }
        let parsed = FormatSpec::parse(spec)?;
        if let Some(text) = self.as_str(value) {
            return Ok(format_str(text, &parsed)?);
        }
        match (value, self.number(value)) {
            (Value::Bool(b), _) if parsed.ty.is_none() => {
                let text = if b { "True" } else { "False" };
                Ok(format_str(text, &parsed)?)
            }
            (_, Some(Number::Int(i))) => Ok(format_int(&BigInt::from(i), &parsed)?),
            (_, Some(Number::Big(big))) => Ok(format_int(&big, &parsed)?),
            (_, Some(Number::Float(f))) => Ok(format_float(f, &parsed)?),
            _ => Err(ExcType::type_error(format!(
                "unsupported format string passed to {}.__format__",
                self.type_name(value)
            ))),
        }
    }

    /// `FormatValue`: `[value, spec?]` becomes the formatted string.
    pub(super) fn op_format_value(&mut self, flags: u8) -> RunResult<()> {
        let spec = if flags & FORMAT_HAS_SPEC == 0 { None } else { Some(self.pop()) };
        let value = self.pop();
        let value = self.convert(value, Conversion::from_bits(flags))?;
        let spec_text = match spec {
            Some(spec) => self.as_str(spec).unwrap_or_default().to_owned(),
            None => String::new(),
        };
        let result = if spec_text.is_empty() && self.as_str(value).is_some() {
            value
        } else {
            let text = self.format_value(value, &spec_text)?;
            self.new_str(text)?
        };
        self.push(result);
        Ok(())
    }

    /// `BuildString`: concatenates the string parts of an f-string.
    pub(super) fn build_string(&mut self, parts: &[Value]) -> RunResult<Value> {
        let mut out = String::new();
        for part in parts {
            match self.as_str(*part) {
                Some(text) => out.push_str(text),
                None => out.push_str(&self.py_str(*part)?),
            }
        }
        self.check_result_size(out.len())?;
        self.new_str(out)
    }

    /// `template.format(*args, **kwargs)`.
    pub(crate) fn format_template(
        &mut self,
        template: &str,
        args: &[Value],
        kwargs: &[(StringId, Value)],
    ) -> RunResult<String> {
        let mut numbering = Numbering::Unknown;
        self.render_template(template, args, kwargs, &mut numbering, 0)
    }

    fn render_template(
        &mut self,
        template: &str,
        args: &[Value],
        kwargs: &[(StringId, Value)],
        numbering: &mut Numbering,
        depth: usize,
    ) -> RunResult<String> {
        if depth > 1 {
            return Err(ExcType::value_error("Max string recursion exceeded"));
        }
        let mut out = String::new();
        for part in parse_template(template)? {
            match part {
                TemplatePart::Literal(text) => out.push_str(&text),
                TemplatePart::Field {
                    name,
                    accessors,
                    conversion,
                    spec,
                } => {
                    let mut value = self.template_argument(&name, args, kwargs, numbering)?;
                    for accessor in accessors {
                        value = match accessor {
                            FieldAccess::Attr(attr) => {
                                let attr = self.interns.intern(&attr);
                                self.get_attr(value, attr)?
                            }
                            FieldAccess::Index(index) => {
                                let index = i64::try_from(index).unwrap_or(i64::MAX);
                                self.getitem(value, Value::Int(index))?
                            }
                            FieldAccess::Key(key) => {
                                let key = self.new_str(key)?;
                                self.getitem(value, key)?
                            }
                        };
                    }
                    let value = self.convert(value, conversion)?;
                    let spec = if spec.contains('{') {
                        self.render_template(&spec, args, kwargs, numbering, depth + 1)?
                    } else {
                        spec
                    };
                    out.push_str(&self.format_value(value, &spec)?);
                }
            }
        }
        Ok(out)
    }

    fn template_argument(
        &mut self,
        name: &FieldName,
        args: &[Value],
        kwargs: &[(StringId, Value)],
        numbering: &mut Numbering,
    ) -> RunResult<Value> {
        let index = match name {
            FieldName::Auto => match *numbering {
                Numbering::Manual => {
                    return Err(ExcType::value_error(
                        "cannot switch from manual field specification to automatic field numbering",
                    ));
                }
                Numbering::Unknown => {
                    *numbering = Numbering::Auto(1);
                    0
                }
                Numbering::Auto(next) => {
                    *numbering = Numbering::Auto(next + 1);
                    next
                }
            },
            FieldName::Index(index) => {
                if let Numbering::Auto(_) = numbering {
                    return Err(ExcType::value_error(
                        "cannot switch from automatic field numbering to manual field specification",
                    ));
                }
                *numbering = Numbering::Manual;
                *index
            }
            FieldName::Keyword(key) => {
                let found = kwargs
                    .iter()
                    .find(|(name, _)| self.interns.get_str(*name) == key)
                    .map(|(_, value)| *value);
                return match found {
                    Some(value) => Ok(value),
                    None => {
                        let key = self.new_str(key.clone())?;
                        Err(self.key_error(key))
                    }
                };
            }
        };
        args.get(index).copied().ok_or_else(|| {
            ExcType::index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })
    }

    /// `template % values`.
    pub(crate) fn percent_format(&mut self, template: &str, values: Value) -> RunResult<String> {
        let parts = parse_percent(template)?;
        let uses_keys = parts
            .iter()
            .any(|part| matches!(part, PercentPart::Directive { key: Some(_), .. }));
        let args = match self.tuple_items(values) {
            Some(items) if !uses_keys => items,
            _ => vec![values],
        };
        let mut next = 0;
        let mut out = String::new();
        for part in parts {
            let (key, mut spec, conversion) = match part {
                PercentPart::Literal(text) => {
                    out.push_str(&text);
                    continue;
                }
                PercentPart::Directive { key, spec, conversion } => (key, spec, conversion),
            };
            let arg = match key {
                Some(key) => {
                    let key = self.new_str(key)?;
                    self.getitem(values, key)?
                }
                None => {
                    let arg = args
                        .get(next)
                        .copied()
                        .ok_or_else(|| ExcType::type_error("not enough arguments for format string"))?;
                    next += 1;
                    arg
                }
            };
            out.push_str(&self.percent_directive(arg, &mut spec, conversion)?);
        }
        if !uses_keys && next < args.len() {
            return Err(ExcType::type_error("not all arguments converted during string formatting"));
        }
        Ok(out)
    }

    fn percent_directive(&mut self, arg: Value, spec: &mut FormatSpec, conversion: char) -> RunResult<String> {
        match conversion {
            's' | 'r' | 'a' => {
                let text = match conversion {
                    's' => self.py_str(arg)?,
                    'r' => self.repr(arg)?,
                    _ => ascii_escape(&self.repr(arg)?),
                };
                spec.align = Some(spec.align.unwrap_or(Align::Right));
                spec.zero_pad = false;
                Ok(format_str(&text, spec)?)
            }
            'c' => {
                spec.align = Some(spec.align.unwrap_or(Align::Right));
                if let Some(text) = self.as_str(arg) {
                    if text.chars().count() != 1 {
                        return Err(ExcType::type_error("%c requires int or char"));
                    }
                    let text = text.to_owned();
                    return Ok(format_str(&text, spec)?);
                }
                spec.ty = Some('c');
                match self.number(arg) {
                    Some(Number::Int(i)) => Ok(format_int(&BigInt::from(i), spec)?),
                    _ => Err(ExcType::type_error("%c requires int or char")),
                }
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                spec.ty = Some(match conversion {
                    'i' | 'u' => 'd',
                    other => other,
                });
                spec.precision = None;
                let integer_only = matches!(conversion, 'x' | 'X' | 'o');
                match self.number(arg) {
                    Some(Number::Int(i)) => Ok(format_int(&BigInt::from(i), spec)?),
                    Some(Number::Big(big)) => Ok(format_int(&big, spec)?),
                    Some(Number::Float(f)) if !integer_only => {
                        let truncated = BigInt::from_f64(f.trunc())
                            .ok_or_else(|| ExcType::overflow_error("cannot convert float infinity to integer"))?;
                        Ok(format_int(&truncated, spec)?)
                    }
                    _ if integer_only => Err(ExcType::type_error(format!(
                        "%{conversion} format: an integer is required, not {}",
                        self.type_name(arg)
                    ))),
                    _ => Err(ExcType::type_error(format!(
                        "%{conversion} format: a real number is required, not {}",
                        self.type_name(arg)
                    ))),
                }
            }
            _ => {
                spec.ty = Some(conversion);
                if spec.precision.is_none() {
                    spec.precision = Some(6);
                }
                match self.number(arg) {
                    Some(number) => Ok(format_float(number.to_f64()?, spec)?),
                    None => Err(ExcType::type_error(format!(
                        "must be real number, not {}",
                        self.type_name(arg)
                    ))),
                }
            }
        }
    }
}
