//! Compiled code objects.

use std::rc::Rc;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{intern::StringId, parse::CodeRange};

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(StringId),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<Const>),
    /// Keyword names for `CallKw` and `MatchClass`; loaded as a tuple of strings.
    Names(Vec<StringId>),
}

/// A protected bytecode range `[start, end)` and where to go when it raises.
///
/// Entries are stored innermost-first, so the first match for an instruction wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    /// Operand stack depth (relative to the frame base) to unwind to before pushing the exception.
    pub stack_depth: u16,
}

impl ExceptionEntry {
    #[must_use]
    pub fn contains(&self, ip: usize) -> bool {
        let ip = ip as u64;
        u64::from(self.start) <= ip && ip < u64::from(self.end)
    }
}

/// Maps a bytecode offset to the source range of the instruction starting there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationEntry {
    pub offset: u32,
    pub range: CodeRange,
}

/// Parameter layout of a function.
///
/// Parameter slots are, in order: positional-only, positional-or-keyword, `*args`,
/// keyword-only, `**kwargs`; their names are the first entries of `Code::varnames`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub posonly: u16,
    /// Positional-or-keyword parameters, not counting `posonly`.
    pub args: u16,
    pub kwonly: u16,
    pub varargs: bool,
    pub varkw: bool,
}

impl Signature {
    /// Number of parameters that can be filled positionally.
    #[must_use]
    pub fn positional(&self) -> usize {
        usize::from(self.posonly) + usize::from(self.args)
    }

    /// Slot of `*args`, when present.
    #[must_use]
    pub fn varargs_slot(&self) -> Option<usize> {
        self.varargs.then(|| self.positional())
    }

    /// First keyword-only slot.
    #[must_use]
    pub fn kwonly_start(&self) -> usize {
        self.positional() + usize::from(self.varargs)
    }

    /// Slot of `**kwargs`, when present.
    #[must_use]
    pub fn varkw_slot(&self) -> Option<usize> {
        self.varkw.then(|| self.kwonly_start() + usize::from(self.kwonly))
    }

    /// Total parameter slots.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.kwonly_start() + usize::from(self.kwonly) + usize::from(self.varkw)
    }
}

/// What a code object's frame does when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeKind {
    Module,
    Function,
    Lambda,
    ClassBody,
    Comprehension,
}

/// A compiled function, class body, comprehension or module.
#[derive(Debug, Serialize, Deserialize)]
pub struct Code {
    pub(crate) name: StringId,
    /// Dotted path used in reprs, e.g. `Outer.method.<locals>.inner`.
    pub(crate) qualname: String,
    pub(crate) kind: CodeKind,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) consts: Vec<Const>,
    /// Names used by attribute, global and import instructions.
    pub(crate) names: Vec<StringId>,
    /// Nested functions, classes and comprehensions, indexed by `MakeFunction`.
    pub(crate) children: Vec<Rc<Code>>,
    pub(crate) exception_table: Vec<ExceptionEntry>,
    pub(crate) locations: Vec<LocationEntry>,
    pub(crate) varnames: Vec<StringId>,
    pub(crate) cellvars: Vec<StringId>,
    pub(crate) freevars: Vec<StringId>,
    /// `(parameter slot, cell index)` for parameters captured by inner scopes.
    pub(crate) cell_params: Vec<(u16, u16)>,
    pub(crate) signature: Signature,
    pub(crate) is_generator: bool,
    pub(crate) is_async: bool,
    pub(crate) max_stack: u16,
    /// Index of the source file in the VM's source table.
    pub(crate) source_id: u16,
    /// First line of the definition, for reprs and tracebacks.
    pub(crate) first_line: u32,
}

impl Code {
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn consts(&self) -> &[Const] {
        &self.consts
    }

    #[must_use]
    pub fn name(&self) -> StringId {
        self.name
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// Total cell slots: cell variables followed by free variables.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Name of the variable in cell slot `index`.
    #[must_use]
    pub fn cell_name(&self, index: usize) -> StringId {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index - self.cellvars.len()))
            .copied()
            .unwrap_or_default()
    }

    /// Innermost handler covering `ip`.
    #[must_use]
    pub fn find_handler(&self, ip: usize) -> Option<&ExceptionEntry> {
        self.exception_table.iter().find(|entry| entry.contains(ip))
    }

    /// Source range of the instruction at `ip`.
    #[must_use]
    pub fn location(&self, ip: usize) -> Option<CodeRange> {
        let ip = u32::try_from(ip).ok()?;
        let index = self.locations.partition_point(|entry| entry.offset <= ip);
        index.checked_sub(1).map(|i| self.locations[i].range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_slots() {
        let signature = Signature {
            posonly: 1,
            args: 2,
            kwonly: 2,
            varargs: true,
            varkw: true,
        };
        assert_eq!(signature.positional(), 3);
        assert_eq!(signature.varargs_slot(), Some(3));
        assert_eq!(signature.kwonly_start(), 4);
        assert_eq!(signature.varkw_slot(), Some(6));
        assert_eq!(signature.param_count(), 7);
    }

    #[test]
    fn handler_entries_are_half_open() {
        let entry = ExceptionEntry {
            start: 4,
            end: 10,
            handler: 20,
            stack_depth: 0,
        };
        assert!(entry.contains(4));
        assert!(entry.contains(9));
        assert!(!entry.contains(10));
    }
}
