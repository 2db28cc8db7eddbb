//! String interning for identifiers, attribute names and string literals.
//!
//! Every name the compiler or the VM needs to compare cheaply is stored once in [`Interns`]
//! and referred to by a [`StringId`]. The first ids are reserved for [`StaticStrings`] so the
//! VM can look up dunder methods without touching the interner.
//!
//! Unlike a purely compile-time interner, `Interns` stays mutable for the life of a run:
//! imported modules are compiled lazily and `setattr`/`getattr` with runtime strings need ids too.

use std::fmt;

use ahash::AHashMap;
use strum::{EnumString, FromRepr, IntoStaticStr};

/// Index into the string interner's storage.
///
/// Uses `u32` to keep `Value` and AST nodes small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Rebuilds a `StringId` from a bytecode operand.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("string interner overflow"))
    }

    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<StaticStrings> for StringId {
    fn from(value: StaticStrings) -> Self {
        Self(u32::from(value as u16))
    }
}

/// Names known at compile time, pre-interned at fixed ids.
#[repr(u16)]
#[derive(Debug, Clone, Copy, FromRepr, EnumString, IntoStaticStr, PartialEq, Eq, Hash)]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<module>")]
    Module,
    #[strum(serialize = "<lambda>")]
    Lambda,
    #[strum(serialize = "<listcomp>")]
    ListComp,
    #[strum(serialize = "<setcomp>")]
    SetComp,
    #[strum(serialize = "<dictcomp>")]
    DictComp,
    #[strum(serialize = "<genexpr>")]
    GenExpr,
    #[strum(serialize = ".0")]
    CompIter,
    #[strum(serialize = "__main__")]
    Main,

    // ==========================
    // object protocol
    #[strum(serialize = "__init__")]
    Init,
    #[strum(serialize = "__str__")]
    DunderStr,
    #[strum(serialize = "__repr__")]
    DunderRepr,
    #[strum(serialize = "__format__")]
    DunderFormat,
    #[strum(serialize = "__hash__")]
    DunderHash,
    #[strum(serialize = "__bool__")]
    DunderBool,
    #[strum(serialize = "__len__")]
    DunderLen,
    #[strum(serialize = "__call__")]
    DunderCall,
    #[strum(serialize = "__getattr__")]
    DunderGetattr,
    #[strum(serialize = "__iter__")]
    DunderIter,
    #[strum(serialize = "__next__")]
    DunderNext,
    #[strum(serialize = "__contains__")]
    DunderContains,
    #[strum(serialize = "__getitem__")]
    DunderGetitem,
    #[strum(serialize = "__setitem__")]
    DunderSetitem,
    #[strum(serialize = "__delitem__")]
    DunderDelitem,
    #[strum(serialize = "__enter__")]
    DunderEnter,
    #[strum(serialize = "__exit__")]
    DunderExit,
    #[strum(serialize = "__neg__")]
    DunderNeg,
    #[strum(serialize = "__pos__")]
    DunderPos,
    #[strum(serialize = "__invert__")]
    DunderInvert,
    #[strum(serialize = "__abs__")]
    DunderAbs,

    // ==========================
    // rich comparison
    #[strum(serialize = "__eq__")]
    DunderEq,
    #[strum(serialize = "__ne__")]
    DunderNe,
    #[strum(serialize = "__lt__")]
    DunderLt,
    #[strum(serialize = "__le__")]
    DunderLe,
    #[strum(serialize = "__gt__")]
    DunderGt,
    #[strum(serialize = "__ge__")]
    DunderGe,

    // ==========================
    // binary operators, in `Operator` order: forward, reflected, in-place
    #[strum(serialize = "__add__")]
    DunderAdd,
    #[strum(serialize = "__sub__")]
    DunderSub,
    #[strum(serialize = "__mul__")]
    DunderMul,
    #[strum(serialize = "__matmul__")]
    DunderMatMul,
    #[strum(serialize = "__truediv__")]
    DunderTrueDiv,
    #[strum(serialize = "__floordiv__")]
    DunderFloorDiv,
    #[strum(serialize = "__mod__")]
    DunderMod,
    #[strum(serialize = "__pow__")]
    DunderPow,
    #[strum(serialize = "__lshift__")]
    DunderLShift,
    #[strum(serialize = "__rshift__")]
    DunderRShift,
    #[strum(serialize = "__or__")]
    DunderOr,
    #[strum(serialize = "__xor__")]
    DunderXor,
    #[strum(serialize = "__and__")]
    DunderAnd,
    #[strum(serialize = "__radd__")]
    DunderRAdd,
    #[strum(serialize = "__rsub__")]
    DunderRSub,
    #[strum(serialize = "__rmul__")]
    DunderRMul,
    #[strum(serialize = "__rmatmul__")]
    DunderRMatMul,
    #[strum(serialize = "__rtruediv__")]
    DunderRTrueDiv,
    #[strum(serialize = "__rfloordiv__")]
    DunderRFloorDiv,
    #[strum(serialize = "__rmod__")]
    DunderRMod,
    #[strum(serialize = "__rpow__")]
    DunderRPow,
    #[strum(serialize = "__rlshift__")]
    DunderRLShift,
    #[strum(serialize = "__rrshift__")]
    DunderRRShift,
    #[strum(serialize = "__ror__")]
    DunderROr,
    #[strum(serialize = "__rxor__")]
    DunderRXor,
    #[strum(serialize = "__rand__")]
    DunderRAnd,
    #[strum(serialize = "__iadd__")]
    DunderIAdd,
    #[strum(serialize = "__isub__")]
    DunderISub,
    #[strum(serialize = "__imul__")]
    DunderIMul,
    #[strum(serialize = "__imatmul__")]
    DunderIMatMul,
    #[strum(serialize = "__itruediv__")]
    DunderITrueDiv,
    #[strum(serialize = "__ifloordiv__")]
    DunderIFloorDiv,
    #[strum(serialize = "__imod__")]
    DunderIMod,
    #[strum(serialize = "__ipow__")]
    DunderIPow,
    #[strum(serialize = "__ilshift__")]
    DunderILShift,
    #[strum(serialize = "__irshift__")]
    DunderIRShift,
    #[strum(serialize = "__ior__")]
    DunderIOr,
    #[strum(serialize = "__ixor__")]
    DunderIXor,
    #[strum(serialize = "__iand__")]
    DunderIAnd,

    // ==========================
    // special attributes
    #[strum(serialize = "__class__")]
    DunderClass,
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__qualname__")]
    DunderQualname,
    #[strum(serialize = "__module__")]
    DunderModule,
    #[strum(serialize = "__dict__")]
    DunderDict,
    #[strum(serialize = "__doc__")]
    DunderDoc,
    #[strum(serialize = "__mro__")]
    DunderMro,
    #[strum(serialize = "__bases__")]
    DunderBases,
    #[strum(serialize = "__all__")]
    DunderAll,
    #[strum(serialize = "__file__")]
    DunderFile,
    #[strum(serialize = "__match_args__")]
    DunderMatchArgs,
    #[strum(serialize = "__cause__")]
    DunderCause,
    #[strum(serialize = "__context__")]
    DunderContext,
    #[strum(serialize = "args")]
    Args,
    #[strum(serialize = "super")]
    Super,
    #[strum(serialize = "self")]
    SelfName,

    // ==========================
    // keyword arguments understood by builtins
    #[strum(serialize = "sep")]
    Sep,
    #[strum(serialize = "end")]
    End,
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "flush")]
    Flush,
    #[strum(serialize = "key")]
    Key,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "setter")]
    Setter,
    #[strum(serialize = "getter")]
    Getter,
    #[strum(serialize = "value")]
    Value,
    #[strum(serialize = "keys")]
    Keys,
}

impl StaticStrings {
    /// The interned id of this static string.
    #[inline]
    pub fn id(self) -> StringId {
        self.into()
    }
}

/// Interned strings for one program run.
///
/// Serialized as a plain list of strings so compiled programs can be cached with `postcard`;
/// the reverse lookup table is rebuilt on load.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Interns {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl fmt::Debug for Interns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interns").field("len", &self.strings.len()).finish()
    }
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    /// Creates an interner pre-populated with every [`StaticStrings`] value.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self {
            strings: Vec::new(),
            lookup: AHashMap::new(),
        };
        for s in (0..).map_while(StaticStrings::from_repr) {
            let text: &'static str = s.into();
            let id = interns.intern(text);
            debug_assert_eq!(id, s.id(), "static strings must intern in declaration order");
        }
        interns
    }

    /// Returns the id for `s`, adding it to the table if needed.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId::from_index(self.strings.len());
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), id);
        id
    }

    /// Looks up an existing id without interning.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.lookup.get(s).copied()
    }

    /// Returns the text of an interned string.
    #[must_use]
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl From<Vec<String>> for Interns {
    fn from(strings: Vec<String>) -> Self {
        let lookup = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), StringId::from_index(i)))
            .collect();
        Self { strings, lookup }
    }
}

impl From<Interns> for Vec<String> {
    fn from(interns: Interns) -> Self {
        interns.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_strings_have_fixed_ids() {
        let interns = Interns::new();
        assert_eq!(interns.get_str(StaticStrings::Init.id()), "__init__");
        assert_eq!(interns.lookup("__radd__"), Some(StaticStrings::DunderRAdd.id()));
        assert_eq!(interns.get_str(StaticStrings::EmptyString.id()), "");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut interns = Interns::new();
        let a = interns.intern("spam");
        let b = interns.intern("spam");
        assert_eq!(a, b);
        assert_ne!(a, interns.intern("eggs"));
    }

    #[test]
    fn survives_serialization() {
        let mut interns = Interns::new();
        let id = interns.intern("roundtrip");
        let bytes = postcard::to_allocvec(&interns).unwrap();
        let loaded: Interns = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.lookup("roundtrip"), Some(id));
        assert_eq!(loaded.get_str(id), "roundtrip");
    }
}
