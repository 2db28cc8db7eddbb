//! Native methods of `object` and `BaseException`.
//!
//! They live in class dicts like Python functions, so `super().__init__(...)` and
//! `object.__repr__(self)` find and bind them through the normal lookup.

use strum::IntoStaticStr;

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::hash_key::HashKey,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr)]
pub(crate) enum NativeSlot {
    #[strum(serialize = "__init__")]
    ObjectInit,
    #[strum(serialize = "__repr__")]
    ObjectRepr,
    #[strum(serialize = "__str__")]
    ObjectStr,
    #[strum(serialize = "__eq__")]
    ObjectEq,
    #[strum(serialize = "__ne__")]
    ObjectNe,
    #[strum(serialize = "__hash__")]
    ObjectHash,
    #[strum(serialize = "__init__")]
    ExcInit,
    #[strum(serialize = "__str__")]
    ExcStr,
    #[strum(serialize = "__repr__")]
    ExcRepr,
}

impl NativeSlot {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Name of the class whose dict holds the slot.
    #[must_use]
    pub fn owner(self) -> &'static str {
        match self {
            Self::ExcInit | Self::ExcStr | Self::ExcRepr => "BaseException",
            _ => "object",
        }
    }

    /// Calls the slot; the first argument is the receiver.
    pub fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
        self,
        vm: &mut VM<'_, T, P, Tr>,
        args: ArgValues,
    ) -> RunResult<Value> {
        let qualified = format!("{}.{}", self.owner(), self.name());
        if self == Self::ExcInit {
            args.check_no_kwargs(&qualified, &vm.interns)?;
            let mut positional = args.positional.into_iter();
            let receiver = positional
                .next()
                .ok_or_else(|| ExcType::type_error(format!("descriptor '{qualified}' needs an argument")))?;
            let id = exception_id(vm, receiver)?;
            let exc_args = vm.new_tuple(positional.collect())?;
            if let HeapData::Instance(instance) = vm.heap.get_mut(id) {
                instance.attrs.insert(StaticStrings::Args.id(), exc_args);
            }
            return Ok(Value::None);
        }

        match self {
            Self::ObjectInit => {
                if args.count() > 1 {
                    return Err(ExcType::type_error(
                        "object.__init__() takes exactly one argument (the instance to initialize)",
                    ));
                }
                args.get_one_arg(&qualified, &vm.interns)?;
                Ok(Value::None)
            }
            Self::ObjectRepr => {
                let receiver = args.get_one_arg(&qualified, &vm.interns)?;
                let text = vm.default_object_repr(receiver);
                vm.new_str(text)
            }
            Self::ObjectStr => {
                let receiver = args.get_one_arg(&qualified, &vm.interns)?;
                let text = vm.repr(receiver)?;
                vm.new_str(text)
            }
            Self::ObjectEq => {
                let (receiver, other) = args.get_two_args(&qualified, &vm.interns)?;
                Ok(if receiver.is_identical(other) {
                    Value::Bool(true)
                } else {
                    Value::NotImplemented
                })
            }
            Self::ObjectNe => {
                let (receiver, other) = args.get_two_args(&qualified, &vm.interns)?;
                let Some(eq) = vm.lookup_special(receiver, StaticStrings::DunderEq.id())? else {
                    return Ok(Value::Bool(!receiver.is_identical(other)));
                };
                let result = vm.call_sync(eq, ArgValues::one(other))?;
                if matches!(result, Value::NotImplemented) {
                    return Ok(result);
                }
                Ok(Value::Bool(!vm.truthy(result)?))
            }
            Self::ObjectHash => {
                let receiver = args.get_one_arg(&qualified, &vm.interns)?;
                let id = receiver
                    .ref_id()
                    .ok_or_else(|| RunError::internal("object.__hash__ of an inline value"))?;
                Ok(Value::Int(HashKey::Identity(id).hash_value()))
            }
            Self::ExcStr => {
                let receiver = args.get_one_arg(&qualified, &vm.interns)?;
                let id = exception_id(vm, receiver)?;
                let text = vm.exception_str(id)?;
                vm.new_str(text)
            }
            Self::ExcRepr => {
                let receiver = args.get_one_arg(&qualified, &vm.interns)?;
                let id = exception_id(vm, receiver)?;
                let text = vm.exception_repr(id)?;
                vm.new_str(text)
            }
            Self::ExcInit => Ok(Value::None),
        }
    }
}

fn exception_id<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &VM<'_, T, P, Tr>,
    value: Value,
) -> RunResult<HeapId> {
    match value {
        Value::Ref(id) if vm.is_exception(value) => Ok(id),
        _ => Err(ExcType::type_error(format!(
            "descriptor requires a 'BaseException' object but received a '{}'",
            vm.type_name(value)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_names_are_dunders() {
        assert_eq!(NativeSlot::ObjectInit.name(), "__init__");
        assert_eq!(NativeSlot::ExcRepr.name(), "__repr__");
        assert_eq!(NativeSlot::ExcStr.owner(), "BaseException");
        assert_eq!(NativeSlot::ObjectHash.owner(), "object");
    }
}
