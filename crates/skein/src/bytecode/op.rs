//! Opcode definitions.
//!
//! Instructions are one opcode byte followed by zero to three bytes of operand. Multi-byte
//! operands are little-endian; jump operands are `i16` offsets relative to the end of the
//! jump instruction.

use std::fmt;

use strum::{FromRepr, IntoStaticStr};

/// Operand layout following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    U8,
    U16,
    /// Relative jump offset.
    Jump,
    U8U8,
    U16U8,
}

impl Operands {
    /// Operand bytes after the opcode.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::U16 | Self::Jump | Self::U8U8 => 2,
            Self::U16U8 => 3,
        }
    }
}

/// A VM instruction.
///
/// Stack notation in the docs is `[before] -> [after]` with the top of stack on the right.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
pub enum Opcode {
    // stack manipulation
    Nop,
    Pop,
    /// `[a] -> [a, a]`
    Dup,
    /// `[a, b] -> [a, b, a, b]`
    Dup2,
    /// `[a, b] -> [b, a]`
    Rot2,
    /// `[a, b, c] -> [c, a, b]`
    Rot3,
    /// `[a, b, c, d] -> [d, a, b, c]`
    Rot4,

    // constants and variables
    /// u16 constant index.
    LoadConst,
    LoadNone,
    /// u16 slot.
    LoadLocal,
    StoreLocal,
    DeleteLocal,
    /// u16 index into cells then free variables.
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    /// Pushes the cell object itself, for building closures.
    LoadClosure,
    /// u16 name index. Module namespace, then builtins.
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    /// u16 name index. Executing namespace (module or class body), then globals, then builtins.
    LoadName,
    StoreName,
    DeleteName,
    /// Pushes the builtin `AssertionError` class, immune to shadowing.
    LoadAssertionError,

    // attributes and items
    /// u16 name index. `[obj] -> [value]`
    LoadAttr,
    /// `[value, obj] -> []`
    StoreAttr,
    DeleteAttr,
    /// `[obj, index] -> [value]`
    BinarySubscr,
    /// `[value, obj, index] -> []`
    StoreSubscr,
    /// `[obj, index] -> []`
    DeleteSubscr,
    /// u8 count (2 or 3). `[lower, upper(, step)] -> [slice]`
    BuildSlice,

    // operators
    /// u8 `Operator`.
    BinaryOp,
    /// u8 `Operator`; tries `__iop__` before the binary form.
    InplaceOp,
    UnaryNeg,
    UnaryPos,
    UnaryInvert,
    UnaryNot,
    /// u8 `CmpOperator`.
    CompareOp,

    // building
    /// u16 count.
    BuildTuple,
    BuildList,
    BuildSet,
    /// u16 pair count. `[k1, v1, .. kn, vn] -> [dict]`
    BuildMap,
    /// u8 depth of the list below the value. Used by comprehensions.
    ListAppend,
    SetAdd,
    /// u8 depth. `[.. map .., key, value] -> [.. map ..]`
    MapAdd,
    /// `[list, iterable] -> [list]`
    ListExtend,
    /// `[set, iterable] -> [set]`
    SetUpdate,
    /// `[dict, mapping] -> [dict]`
    DictUpdate,
    /// Like `DictUpdate` but duplicate keys are a `TypeError`; used for `**kwargs` in calls.
    DictMerge,
    /// `[list] -> [tuple]`
    ListToTuple,
    /// u16 count. Concatenates string parts.
    BuildString,
    /// u8 flags: conversion in bits 0-1, bit 2 set when a format spec is on the stack.
    FormatValue,
    /// u8 count.
    UnpackSequence,
    /// u8 before, u8 after the starred target.
    UnpackEx,

    // control flow
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    /// Keeps the value and jumps if falsy, otherwise pops it.
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    /// `[obj] -> [iterator]`
    GetIter,
    /// `[iter] -> [iter, next]`, or pops the iterator and jumps when exhausted.
    ForIter,
    Return,

    // functions and classes
    /// u16 child code index, u8 flags (`MAKE_FUNCTION_*`).
    MakeFunction,
    /// u8 positional count. `[callable, args..] -> [result]`
    Call,
    /// u8 total argument count; the keyword names tuple is on top of the stack.
    CallKw,
    /// u8: 1 when a kwargs dict is present. `[callable, args_tuple(, kwargs)] -> [result]`
    CallEx,
    /// `[body_fn, name, bases_tuple] -> [class]`, after running the class body.
    BuildClass,

    // generators and coroutines
    /// `[value] -> [sent]`
    Yield,
    /// `[obj] -> [iterator]`, passing generators through.
    GetYieldFromIter,
    /// `[iter, sent] -> [result]`; re-executes itself while the sub-iterator yields.
    YieldFrom,
    /// `[awaitable] -> [result]`
    Await,

    // exceptions
    /// u8 form: 0 bare `raise`, 1 `raise exc`, 2 `raise exc from cause`.
    Raise,
    /// `[exc] -> [previous, exc]`, making `exc` the handled exception.
    PushExcInfo,
    /// `[previous] -> []`, restoring the previously handled exception.
    PopExcept,
    /// `[exc, type] -> [bool]`
    CheckExcMatch,
    /// `[exc] -> !`
    Reraise,
    /// `[previous, exc] -> !`, restoring `previous` and re-raising `exc`.
    PopExceptReraise,

    // context managers
    /// `[ctx] -> [exit, enter_result]`
    BeforeWith,
    /// `[exit, previous, exc] -> [exit, previous, exc, result]`
    WithExceptStart,

    // pattern matching
    /// u16 fixed length, u8 1 when a star pattern is present. `[subject] -> [subject, bool]`
    MatchSequence,
    /// `[subject] -> [subject, bool]`
    MatchMapping,
    /// `[subject, keys] -> [subject, keys, values_or_none]`
    MatchKeys,
    /// u8 positional count. `[subject, cls, kw_names] -> [attrs_or_none]`
    MatchClass,
    /// `[subject, keys] -> [subject, rest_dict]`
    CopyDictWithoutKeys,
    /// u16 capture slot. `[value] -> []`, holding the value until the pattern has matched.
    StashCapture,
    /// u16 capture slot. `[] -> [value]`, emptying the slot.
    LoadCapture,

    // imports
    /// u16 dotted name index, u8 1 to push the leaf module instead of the top-level package.
    ImportName,
    /// u16 name index. `[module] -> [module, value]`
    ImportFrom,
    /// `[module] -> []`
    ImportStar,
}

/// `MakeFunction` flag: a tuple of positional defaults is on the stack.
pub const MAKE_FUNCTION_DEFAULTS: u8 = 1;
/// `MakeFunction` flag: a dict of keyword-only defaults is on the stack.
pub const MAKE_FUNCTION_KW_DEFAULTS: u8 = 2;
/// `MakeFunction` flag: a tuple of captured cells is on the stack.
pub const MAKE_FUNCTION_CLOSURE: u8 = 4;

/// `FormatValue` flag: a format spec string sits above the value.
pub const FORMAT_HAS_SPEC: u8 = 4;

/// Error for a byte that is not a valid opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcode(pub u8);

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode byte {}", self.0)
    }
}

impl std::error::Error for InvalidOpcode {}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcode(byte))
    }
}

impl Opcode {
    #[must_use]
    pub const fn operands(self) -> Operands {
        match self {
            Self::LoadConst
            | Self::LoadLocal
            | Self::StoreLocal
            | Self::DeleteLocal
            | Self::LoadDeref
            | Self::StoreDeref
            | Self::DeleteDeref
            | Self::LoadClosure
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadName
            | Self::StoreName
            | Self::DeleteName
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::BuildTuple
            | Self::BuildList
            | Self::BuildSet
            | Self::BuildMap
            | Self::BuildString
            | Self::StashCapture
            | Self::LoadCapture
            | Self::ImportFrom => Operands::U16,
            Self::BuildSlice
            | Self::BinaryOp
            | Self::InplaceOp
            | Self::CompareOp
            | Self::ListAppend
            | Self::SetAdd
            | Self::MapAdd
            | Self::FormatValue
            | Self::UnpackSequence
            | Self::Call
            | Self::CallKw
            | Self::CallEx
            | Self::Raise
            | Self::MatchClass => Operands::U8,
            Self::Jump
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::ForIter => Operands::Jump,
            Self::UnpackEx => Operands::U8U8,
            Self::MakeFunction | Self::MatchSequence | Self::ImportName => Operands::U16U8,
            _ => Operands::None,
        }
    }

    /// Total instruction length in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        1 + self.operands().len()
    }

    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self.operands(), Operands::Jump)
    }

    /// Fixed stack effect, or `None` when it depends on the operand or the branch taken.
    #[must_use]
    pub const fn stack_effect(self) -> Option<i16> {
        let effect = match self {
            Self::Nop
            | Self::Rot2
            | Self::Rot3
            | Self::Rot4
            | Self::LoadAttr
            | Self::UnaryNeg
            | Self::UnaryPos
            | Self::UnaryInvert
            | Self::UnaryNot
            | Self::ListToTuple
            | Self::GetIter
            | Self::Jump
            | Self::Yield
            | Self::GetYieldFromIter
            | Self::Await
            | Self::CopyDictWithoutKeys => 0,
            Self::Dup
            | Self::LoadConst
            | Self::LoadNone
            | Self::LoadLocal
            | Self::LoadDeref
            | Self::LoadClosure
            | Self::LoadGlobal
            | Self::LoadName
            | Self::LoadAssertionError
            | Self::PushExcInfo
            | Self::BeforeWith
            | Self::WithExceptStart
            | Self::MatchSequence
            | Self::MatchMapping
            | Self::MatchKeys
            | Self::LoadCapture
            | Self::ImportName
            | Self::ImportFrom => 1,
            Self::Dup2 => 2,
            Self::Pop
            | Self::StoreLocal
            | Self::StoreDeref
            | Self::StoreGlobal
            | Self::StoreName
            | Self::DeleteAttr
            | Self::BinarySubscr
            | Self::BinaryOp
            | Self::InplaceOp
            | Self::CompareOp
            | Self::ListAppend
            | Self::SetAdd
            | Self::ListExtend
            | Self::SetUpdate
            | Self::DictUpdate
            | Self::DictMerge
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::Return
            | Self::YieldFrom
            | Self::PopExcept
            | Self::CheckExcMatch
            | Self::StashCapture
            | Self::Reraise
            | Self::ImportStar => -1,
            Self::StoreAttr
            | Self::DeleteSubscr
            | Self::MapAdd
            | Self::PopExceptReraise
            | Self::MatchClass
            | Self::BuildClass => -2,
            Self::StoreSubscr => -3,
            Self::DeleteLocal | Self::DeleteDeref | Self::DeleteGlobal | Self::DeleteName => 0,
            _ => return None,
        };
        Some(effect)
    }

    /// Whether control never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::Return | Self::Raise | Self::Reraise | Self::PopExceptReraise
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = Opcode::try_from(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert!(Opcode::try_from(u8::MAX).is_err());
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(Opcode::Pop.size(), 1);
        assert_eq!(Opcode::Call.size(), 2);
        assert_eq!(Opcode::LoadConst.size(), 3);
        assert_eq!(Opcode::ForIter.size(), 3);
        assert_eq!(Opcode::MakeFunction.size(), 4);
        assert!(Opcode::JumpIfTrueOrPop.is_jump());
    }
}
