//! User-defined functions, bound methods and properties.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{bytecode::Code, heap::HeapId, intern::StringId, value::Value};

pub(crate) const PROPERTY_METHODS: &[&str] = &["setter", "getter"];

/// A function object created by `MakeFunction`.
#[derive(Debug)]
pub(crate) struct Function {
    pub code: Rc<Code>,
    /// The module whose namespace the body reads and writes as globals.
    pub globals: HeapId,
    /// Defaults for the trailing positional parameters.
    pub defaults: Vec<Value>,
    pub kw_defaults: Vec<(StringId, Value)>,
    /// Cells for the code's free variables, in `freevars` order.
    pub closure: Vec<HeapId>,
    /// Attributes assigned on the function object (`f.calls = 0`), plus `__doc__` and the like.
    pub attrs: IndexMap<StringId, Value>,
}

impl Function {
    #[must_use]
    pub fn name(&self) -> StringId {
        self.code.name
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.code.qualname
    }
}

/// A callable bound to its receiver, produced by attribute lookup on an instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundMethod {
    pub func: Value,
    pub receiver: Value,
}

/// `property(fget, fset)`; either half may be `None`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Property {
    pub fget: Value,
    pub fset: Value,
}
