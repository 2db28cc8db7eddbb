//! Methods of builtin types, called through `HeapData::BuiltinMethod` or `str.upper(s)`.

use super::VM;
use crate::{
    args::ArgValues,
    builtins::{Builtins, Stream},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StringId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{
        Property, Type, bytes, dict, list,
        number::{Number, bit_length},
        set, str,
    },
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Calls builtin method `name` of `receiver`.
    pub(crate) fn call_builtin_method(&mut self, receiver: Value, name: StringId, args: ArgValues) -> RunResult<Value> {
        let method = self.interns.get_str(name).to_owned();
        if let Value::Builtin(Builtins::Stream(stream)) = receiver {
            return self.stream_method(stream, &method, args);
        }
        let Some(ty) = self.builtin_type(receiver) else {
            return Err(ExcType::attribute_error(self.type_name(receiver), &method));
        };
        match ty {
            Type::Str => str::call_method(self, receiver, &method, args),
            Type::Bytes => bytes::call_method(self, receiver, &method, args),
            Type::List => list::call_list_method(self, heap_id(receiver)?, &method, args),
            Type::Tuple => list::call_tuple_method(self, heap_id(receiver)?, &method, args),
            Type::Dict => dict::call_method(self, heap_id(receiver)?, &method, args),
            Type::Set | Type::FrozenSet => set::call_method(self, heap_id(receiver)?, &method, args),
            Type::Int | Type::Bool | Type::Float => self.number_method(receiver, ty, &method, args),
            Type::Generator => self.generator_method(heap_id(receiver)?, &method, args),
            Type::Property => self.property_method(heap_id(receiver)?, &method, args),
            _ => Err(ExcType::attribute_error(ty.name(), &method)),
        }
    }

    /// An unbound method of a builtin type, e.g. `str.upper("a")`: the first argument is the
    /// receiver and must be an instance of `ty`.
    pub(crate) fn call_type_method(&mut self, ty: Type, name: StringId, mut args: ArgValues) -> RunResult<Value> {
        let method = self.interns.get_str(name);
        if args.positional.is_empty() {
            return Err(ExcType::type_error(format!(
                "unbound method {}.{method}() needs an argument",
                ty.name()
            )));
        }
        let receiver = args.positional.remove(0);
        if !self.builtin_type(receiver).is_some_and(|actual| actual.is_subtype_of(ty)) {
            return Err(ExcType::type_error(format!(
                "descriptor '{method}' for '{}' objects doesn't apply to a '{}' object",
                ty.name(),
                self.type_name(receiver)
            )));
        }
        self.call_builtin_method(receiver, name, args)
    }

    fn number_method(&mut self, receiver: Value, ty: Type, method: &str, args: ArgValues) -> RunResult<Value> {
        let qualified = format!("{}.{method}", ty.name());
        args.check_zero_args(&qualified, &self.interns)?;
        let number = self
            .number(receiver)
            .ok_or_else(|| RunError::internal("number method on a non-number"))?;
        match (method, number) {
            ("conjugate", Number::Float(f)) => Ok(Value::Float(f)),
            ("conjugate", number) => Ok(self.number_value(number)?),
            ("is_integer", Number::Float(f)) => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
            ("bit_length", number) if !number.is_float() => {
                let value = number.to_bigint().unwrap_or_default();
                Ok(Value::Int(i64::try_from(bit_length(&value)).unwrap_or(i64::MAX)))
            }
            _ => Err(ExcType::attribute_error(ty.name(), method)),
        }
    }

    fn generator_method(&mut self, id: HeapId, method: &str, args: ArgValues) -> RunResult<Value> {
        let qualified = format!("generator.{method}");
        match method {
            "send" => {
                let value = args.get_one_arg(&qualified, &self.interns)?;
                self.generator_send(id, value)
            }
            "throw" => {
                let values = args.get_range(&qualified, 1, 3, &self.interns)?;
                // the legacy (type, value, traceback) form raises the value when one is given
                let exc = match values.get(1) {
                    Some(value) if !value.is_none() => *value,
                    _ => values[0],
                };
                self.generator_throw(id, exc)
            }
            "close" => {
                args.check_zero_args(&qualified, &self.interns)?;
                self.generator_close(id)
            }
            _ => Err(ExcType::attribute_error("generator", method)),
        }
    }

    /// `prop.setter(f)` and `prop.getter(f)` return a copy with one accessor replaced.
    fn property_method(&mut self, id: HeapId, method: &str, args: ArgValues) -> RunResult<Value> {
        let HeapData::Property(current) = self.heap.get(id) else {
            return Err(RunError::internal("property method on a non-property"));
        };
        let current = *current;
        let func = args.get_one_arg(&format!("property.{method}"), &self.interns)?;
        let property = match method {
            "setter" => Property {
                fget: current.fget,
                fset: func,
            },
            "getter" => Property {
                fget: func,
                fset: current.fset,
            },
            _ => return Err(ExcType::attribute_error("property", method)),
        };
        Ok(Value::Ref(self.alloc(HeapData::Property(property))?))
    }

    /// `sys.stdout.write(text)` and friends.
    fn stream_method(&mut self, stream: Stream, method: &str, args: ArgValues) -> RunResult<Value> {
        match method {
            "write" => {
                let text = args.get_one_arg("write", &self.interns)?;
                let Some(text) = self.as_str(text).map(ToOwned::to_owned) else {
                    return Err(ExcType::type_error(format!(
                        "write() argument must be str, not {}",
                        self.type_name(text)
                    )));
                };
                let written = str::char_len(&text);
                match stream {
                    Stream::Stdout => self.print.stdout_write(text.into())?,
                    Stream::Stderr => self.print.stderr_write(text.into())?,
                }
                Ok(Value::Int(i64::try_from(written).unwrap_or(i64::MAX)))
            }
            "flush" => {
                args.check_zero_args("flush", &self.interns)?;
                self.print.flush()?;
                Ok(Value::None)
            }
            _ => Err(ExcType::attribute_error(Type::TextIO.name(), method)),
        }
    }
}

fn heap_id(value: Value) -> RunResult<HeapId> {
    value
        .ref_id()
        .ok_or_else(|| RunError::internal("builtin method receiver is not on the heap"))
}
