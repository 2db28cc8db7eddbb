//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` encodes opcodes and operands into raw bytes, patches forward jumps, tracks the
//! operand stack depth and records source locations for tracebacks.

use std::rc::Rc;

use super::{
    code::{Code, CodeKind, Const, ExceptionEntry, LocationEntry, Signature},
    op::Opcode,
};
use crate::{intern::StringId, parse::CodeRange};

/// Builder for one code object.
///
/// ```ignore
/// let mut builder = CodeBuilder::new();
/// builder.set_location(range);
/// builder.emit(Opcode::LoadNone);
/// let jump = builder.emit_jump(Opcode::JumpIfFalse);
/// // ... emit more code ...
/// builder.patch_jump(jump);
/// let code = builder.build(header);
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    consts: Vec<Const>,
    names: Vec<StringId>,
    locations: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    current_location: Option<CodeRange>,
    current_stack_depth: u16,
    max_stack_depth: u16,
}

/// Everything about a code object that the builder does not produce itself.
#[derive(Debug)]
pub struct CodeHeader {
    pub name: StringId,
    pub qualname: String,
    pub kind: CodeKind,
    pub children: Vec<Rc<Code>>,
    pub varnames: Vec<StringId>,
    pub cellvars: Vec<StringId>,
    pub freevars: Vec<StringId>,
    pub signature: Signature,
    pub is_generator: bool,
    pub is_async: bool,
    pub source_id: u16,
    pub first_line: u32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source location recorded for subsequent instructions.
    pub fn set_location(&mut self, range: CodeRange) {
        self.current_location = Some(range);
    }

    #[must_use]
    pub fn location(&self) -> Option<CodeRange> {
        self.current_location
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.size(), 1, "{op:?} takes operands");
        self.start_instruction();
        self.bytecode.push(op as u8);
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with a u8 operand.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
        let n = i16::from(operand);
        let effect = match op {
            Opcode::BuildSlice => 1 - n,
            Opcode::UnpackSequence => n - 1,
            Opcode::Call => -n,
            Opcode::CallKw => -(n + 1),
            Opcode::CallEx => -1 - n,
            Opcode::Raise => -n,
            Opcode::FormatValue => {
                if operand & super::op::FORMAT_HAS_SPEC == 0 {
                    0
                } else {
                    -1
                }
            }
            _ => op.stack_effect().unwrap_or(0),
        };
        self.adjust_stack(effect);
    }

    /// Emits an instruction with a u16 operand (little-endian).
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        let n = operand.cast_signed();
        let effect = match op {
            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet | Opcode::BuildString => 1 - n,
            Opcode::BuildMap => 1 - 2 * n,
            _ => op.stack_effect().unwrap_or(0),
        };
        self.adjust_stack(effect);
    }

    /// Emits an instruction with two u8 operands. Used by `UnpackEx`.
    pub fn emit_u8_u8(&mut self, op: Opcode, operand1: u8, operand2: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand1);
        self.bytecode.push(operand2);
        if op == Opcode::UnpackEx {
            // pops 1, pushes before + list + after
            self.adjust_stack(i16::from(operand1) + i16::from(operand2));
        } else if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with a u16 operand followed by a u8 operand.
    pub fn emit_u16_u8(&mut self, op: Opcode, operand1: u16, operand2: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand1.to_le_bytes());
        self.bytecode.push(operand2);
        if op == Opcode::MakeFunction {
            // pops one value per flag bit, pushes the function
            let popped = i16::try_from(operand2.count_ones()).unwrap_or(0);
            self.adjust_stack(1 - popped);
        } else if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits a forward jump, returning a label to patch later.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert!(op.is_jump(), "{op:?} is not a jump");
        self.start_instruction();
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        self.track_jump_effect(op);
        label
    }

    /// Patches a forward jump to land on the current offset.
    ///
    /// # Panics
    ///
    /// Panics if the offset does not fit in an i16, meaning the function is too large.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.bytecode.len();
        self.patch_jump_to(label, target);
    }

    fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let target = i64::try_from(target).expect("bytecode target exceeds i64");
        let origin = i64::try_from(label.0).expect("bytecode label exceeds i64");
        let offset = i16::try_from(target - origin - 3).expect("jump offset exceeds i16 range; function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
    }

    /// Emits a backward jump to a known target.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let label = self.emit_jump(op);
        self.patch_jump_to(label, target);
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Adds a constant, reusing an identical earlier entry.
    ///
    /// # Panics
    ///
    /// Panics if the pool exceeds 65535 entries.
    #[must_use]
    pub fn add_const(&mut self, value: Const) -> u16 {
        // floats compare by bits so that 0.0 and -0.0 stay distinct constants
        let existing = self.consts.iter().position(|c| match (c, &value) {
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            (Const::Bool(_), Const::Int(_)) | (Const::Int(_), Const::Bool(_)) => false,
            (a, b) => a == b,
        });
        let index = existing.unwrap_or_else(|| {
            self.consts.push(value);
            self.consts.len() - 1
        });
        u16::try_from(index).expect("constant pool exceeds u16 range; too many constants")
    }

    /// Adds a name to the name table, reusing an existing entry.
    #[must_use]
    pub fn add_name(&mut self, name: StringId) -> u16 {
        let index = self.names.iter().position(|n| *n == name).unwrap_or_else(|| {
            self.names.push(name);
            self.names.len() - 1
        });
        u16::try_from(index).expect("name table exceeds u16 range")
    }

    /// Adds an exception handler entry. Inner regions must be added before outer ones.
    pub fn add_exception_entry(&mut self, start: usize, end: usize, handler: usize, stack_depth: u16) {
        if start >= end {
            return;
        }
        let to_u32 = |offset: usize| u32::try_from(offset).expect("bytecode offset exceeds u32");
        self.exception_table.push(ExceptionEntry {
            start: to_u32(start),
            end: to_u32(end),
            handler: to_u32(handler),
            stack_depth,
        });
    }

    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack_depth
    }

    /// Sets the tracked depth, for code reached only by jumps or from an exception handler.
    pub fn set_stack_depth(&mut self, depth: u16) {
        self.current_stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    pub fn adjust_stack_depth(&mut self, delta: i16) {
        self.adjust_stack(delta);
    }

    #[must_use]
    pub fn build(self, header: CodeHeader) -> Code {
        let cell_params = header
            .cellvars
            .iter()
            .enumerate()
            .filter_map(|(cell, name)| {
                let slot = header.varnames[..header.signature.param_count()]
                    .iter()
                    .position(|param| param == name)?;
                Some((
                    u16::try_from(slot).expect("slot fits u16"),
                    u16::try_from(cell).expect("cell fits u16"),
                ))
            })
            .collect();
        Code {
            name: header.name,
            qualname: header.qualname,
            kind: header.kind,
            bytecode: self.bytecode,
            consts: self.consts,
            names: self.names,
            children: header.children,
            exception_table: self.exception_table,
            locations: self.locations,
            varnames: header.varnames,
            cellvars: header.cellvars,
            freevars: header.freevars,
            cell_params,
            signature: header.signature,
            is_generator: header.is_generator,
            is_async: header.is_async,
            max_stack: self.max_stack_depth,
            source_id: header.source_id,
            first_line: header.first_line,
        }
    }

    fn start_instruction(&mut self) {
        let Some(range) = self.current_location else {
            return;
        };
        if self.locations.last().is_some_and(|entry| entry.range == range) {
            return;
        }
        let offset = u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32");
        self.locations.push(LocationEntry { offset, range });
    }

    fn track_jump_effect(&mut self, op: Opcode) {
        match op {
            // fallthrough pushes the next value; exhaustion pops the iterator at the target
            Opcode::ForIter => self.adjust_stack(1),
            // fallthrough pops; the jump keeps the value
            Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => self.adjust_stack(-1),
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(effect);
                }
            }
        }
    }

    fn adjust_stack(&mut self, delta: i16) {
        let new_depth = i32::from(self.current_stack_depth) + i32::from(delta);
        debug_assert!(new_depth >= 0, "stack depth went negative: {new_depth}");
        self.current_stack_depth = u16::try_from(new_depth.max(0)).unwrap_or(u16::MAX);
        self.max_stack_depth = self.max_stack_depth.max(self.current_stack_depth);
    }
}

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> CodeHeader {
        CodeHeader {
            name: StringId::default(),
            qualname: String::new(),
            kind: CodeKind::Module,
            children: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            signature: Signature::default(),
            is_generator: false,
            is_async: false,
            source_id: 0,
            first_line: 1,
        }
    }

    #[test]
    fn test_emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNone);
        builder.emit(Opcode::Pop);

        let code = builder.build(header());
        assert_eq!(code.bytecode(), &[Opcode::LoadNone as u8, Opcode::Pop as u8]);
    }

    #[test]
    fn test_emit_u16_operand() {
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::LoadConst, 0x1234);

        let code = builder.build(header());
        assert_eq!(code.bytecode(), &[Opcode::LoadConst as u8, 0x34, 0x12]);
    }

    #[test]
    fn test_forward_jump() {
        let mut builder = CodeBuilder::new();
        let jump = builder.emit_jump(Opcode::Jump);
        builder.emit(Opcode::LoadNone);
        builder.emit(Opcode::LoadNone);
        builder.patch_jump(jump);
        builder.emit(Opcode::Return);

        let code = builder.build(header());
        // target 5, origin 0: 5 - 0 - 3 = 2
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::Jump as u8,
                2,
                0,
                Opcode::LoadNone as u8,
                Opcode::LoadNone as u8,
                Opcode::Return as u8,
            ]
        );
    }

    #[test]
    fn test_backward_jump() {
        let mut builder = CodeBuilder::new();
        let loop_start = builder.current_offset();
        builder.emit(Opcode::LoadNone);
        builder.emit(Opcode::Pop);
        builder.emit_jump_to(Opcode::Jump, loop_start);

        let code = builder.build(header());
        let expected_offset = (-5i16).to_le_bytes();
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadNone as u8,
                Opcode::Pop as u8,
                Opcode::Jump as u8,
                expected_offset[0],
                expected_offset[1],
            ]
        );
    }

    #[test]
    fn test_add_const_dedupes() {
        let mut builder = CodeBuilder::new();
        let a = builder.add_const(Const::Int(42));
        let b = builder.add_const(Const::None);
        let c = builder.add_const(Const::Int(42));
        let d = builder.add_const(Const::Float(0.0));
        let e = builder.add_const(Const::Float(-0.0));

        assert_eq!((a, b, c), (0, 1, 0));
        assert_ne!(d, e);
    }

    #[test]
    fn test_max_stack_tracking() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNone);
        builder.emit(Opcode::LoadNone);
        builder.emit(Opcode::LoadNone);
        builder.emit_u16(Opcode::BuildTuple, 3);
        builder.emit(Opcode::Return);

        assert_eq!(builder.stack_depth(), 0);
        let code = builder.build(header());
        assert_eq!(code.max_stack, 3);
    }

    #[test]
    fn test_cell_params() {
        let mut names = crate::intern::Interns::new();
        let a = names.intern("a");
        let b = names.intern("b");
        let mut h = header();
        h.varnames = vec![a, b];
        h.cellvars = vec![b];
        h.signature.args = 2;
        let code = CodeBuilder::new().build(h);
        assert_eq!(code.cell_params, vec![(1, 0)]);
    }
}
