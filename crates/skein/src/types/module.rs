use indexmap::IndexMap;

use crate::{intern::StringId, value::Value};

/// A module namespace; module code uses it as its globals.
#[derive(Debug)]
pub(crate) struct Module {
    pub name: StringId,
    pub attrs: IndexMap<StringId, Value>,
}

impl Module {
    #[must_use]
    pub fn new(name: StringId) -> Self {
        Self {
            name,
            attrs: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: StringId) -> Option<Value> {
        self.attrs.get(&name).copied().filter(|value| !matches!(value, Value::Undefined))
    }
}
