//! AST to bytecode compiler.
//!
//! One [`Compiler`] produces one [`Code`]; nested functions, classes and comprehensions get
//! their own compiler and end up in the parent's `children`.
//!
//! Structured control flow (`try`, `with`, loops) is tracked on a block stack. A `return`,
//! `break` or `continue` that leaves blocks emits each block's cleanup inline, innermost first.
//! Protected ranges are recorded as segments: the segment is closed while cleanup code runs so
//! that an exception raised by, say, an inlined `finally` body is not caught by the very block
//! it is cleaning up.

use std::rc::Rc;

use super::{
    builder::{CodeBuilder, CodeHeader, JumpLabel},
    code::{Code, CodeKind, Const, Signature},
    op::{FORMAT_HAS_SPEC, MAKE_FUNCTION_CLOSURE, MAKE_FUNCTION_DEFAULTS, MAKE_FUNCTION_KW_DEFAULTS, Opcode},
};
use crate::{
    expressions::{
        Arg, BoolOperator, ClassDef, CmpOperator, Comprehension, ComprehensionKind, DictItem, Expr, ExprLoc,
        FunctionDef, Identifier, ImportNames, Literal, MatchCase, Module, NameScope, Node, Pattern, ScopeInfo, ScopeKind, Stmt,
        Target, Try, UnaryOperator, WithItem,
    },
    fstring::{Conversion, FStringPart},
    intern::{Interns, StaticStrings, StringId},
    parse::{CodeRange, ParseError, ParseResult},
};

/// Compiles a resolved module into its top-level code object.
///
/// The module code returns the value of a trailing expression statement, or `None`.
pub(crate) fn compile_module(module: &Module, interns: &mut Interns, source_id: u16) -> ParseResult<Code> {
    let mut compiler = Compiler::new(interns, &module.scope, String::new(), source_id);
    let (last, init) = match module.body.split_last() {
        Some((last, init)) if matches!(last.node, Node::Expr(_)) => (Some(last), init),
        _ => (None, module.body.as_slice()),
    };
    compiler.compile_body(init)?;
    if let Some(Stmt {
        node: Node::Expr(expr),
        position,
    }) = last
    {
        compiler.builder.set_location(*position);
        compiler.compile_expr(expr)?;
    } else {
        compiler.builder.emit(Opcode::LoadNone);
    }
    compiler.builder.emit(Opcode::Return);
    Ok(compiler.finish(CodeShape {
        name: StaticStrings::Module.id(),
        kind: CodeKind::Module,
        signature: Signature::default(),
        first_line: 1,
    }))
}

pub(crate) struct Compiler<'a> {
    interns: &'a mut Interns,
    builder: CodeBuilder,
    scope: &'a ScopeInfo,
    children: Vec<Rc<Code>>,
    blocks: Vec<Block<'a>>,
    qualname: String,
    source_id: u16,
    /// Names captured by the pattern being compiled, indexed by capture slot.
    captures: Vec<&'a Identifier>,
}

struct CodeShape {
    name: StringId,
    kind: CodeKind,
    signature: Signature,
    first_line: u32,
}

struct Block<'a> {
    kind: BlockKind<'a>,
    region: Option<Region>,
}

enum BlockKind<'a> {
    Loop {
        continue_target: usize,
        breaks: Vec<JumpLabel>,
        /// A `for` loop keeps its iterator on the stack.
        is_for: bool,
    },
    /// Body of a `try` with `except` clauses.
    TryExcept,
    /// Body (and handlers) of a `try` with a `finally`; the statements are inlined on exit.
    Finally(&'a [Stmt]),
    /// Body of a `with`; the exit callable is on the stack.
    With,
    /// An `except` clause body; the previously handled exception is on the stack.
    ExceptHandler,
    /// A `finally` body running because of an exception; `[previous, exc]` are on the stack.
    FinallyHandler,
    /// A `finally` body inlined by `return`; the value being returned is on the stack.
    PendingValue,
}

/// A protected bytecode range, possibly split into several segments.
struct Region {
    segment_start: usize,
    segments: Vec<(usize, usize)>,
    depth: u16,
}

impl Region {
    fn close(&mut self, at: usize) {
        if at > self.segment_start {
            self.segments.push((self.segment_start, at));
        }
        self.segment_start = at;
    }
}

/// Failure jumps of a pattern, indexed by how many values they leave above the pattern base.
type FailTargets = Vec<Vec<JumpLabel>>;

fn add_fail(fails: &mut FailTargets, pops: usize, label: JumpLabel) {
    if fails.len() <= pops {
        fails.resize_with(pops + 1, Vec::new);
    }
    fails[pops].push(label);
}

fn narrow<T: TryFrom<usize>>(value: usize, what: &'static str, position: CodeRange) -> ParseResult<T> {
    T::try_from(value).map_err(|_| ParseError::syntax(format!("too many {what}"), position))
}

impl<'a> Compiler<'a> {
    fn new(interns: &'a mut Interns, scope: &'a ScopeInfo, qualname: String, source_id: u16) -> Self {
        Self {
            interns,
            builder: CodeBuilder::new(),
            scope,
            children: Vec::new(),
            blocks: Vec::new(),
            qualname,
            source_id,
            captures: Vec::new(),
        }
    }

    fn finish(self, shape: CodeShape) -> Code {
        self.builder.build(CodeHeader {
            name: shape.name,
            qualname: self.qualname,
            kind: shape.kind,
            children: self.children,
            varnames: self.scope.varnames.clone(),
            cellvars: self.scope.cellvars.clone(),
            freevars: self.scope.freevars.clone(),
            signature: shape.signature,
            is_generator: self.scope.is_generator,
            is_async: self.scope.is_async,
            source_id: self.source_id,
            first_line: shape.first_line,
        })
    }

    /// Qualified name for a nested definition called `name`.
    fn child_qualname(&self, name: StringId) -> String {
        let name = self.interns.get_str(name);
        if self.qualname.is_empty() {
            name.to_owned()
        } else if self.scope.kind == ScopeKind::Class {
            format!("{}.{name}", self.qualname)
        } else {
            format!("{}.<locals>.{name}", self.qualname)
        }
    }

    // ==========================
    // blocks

    fn push_block(&mut self, kind: BlockKind<'a>, depth: Option<u16>) {
        let region = depth.map(|depth| Region {
            segment_start: self.builder.current_offset(),
            segments: Vec::new(),
            depth,
        });
        self.blocks.push(Block { kind, region });
    }

    fn pop_block(&mut self) -> Block<'a> {
        let mut block = self.blocks.pop().expect("block stack underflow");
        if let Some(region) = &mut block.region {
            region.close(self.builder.current_offset());
        }
        block
    }

    /// Registers the block's protected segments as handled at `handler`.
    fn add_handler(&mut self, block: &Block<'a>, handler: usize) {
        if let Some(region) = &block.region {
            for &(start, end) in &region.segments {
                self.builder.add_exception_entry(start, end, handler, region.depth);
            }
        }
    }

    /// Emits the cleanup of every block from the top down to `target` (inclusive).
    ///
    /// Returns the indices of blocks whose protected segment was closed; pass them to
    /// [`reopen_blocks`](Self::reopen_blocks) once the jump away has been emitted.
    fn unwind_blocks(&mut self, target: usize, with_value: bool) -> ParseResult<Vec<usize>> {
        let mut closed = Vec::new();
        for index in (target..self.blocks.len()).rev() {
            let here = self.builder.current_offset();
            if let Some(region) = &mut self.blocks[index].region {
                region.close(here);
                closed.push(index);
            }
            match &self.blocks[index].kind {
                BlockKind::Loop { is_for: true, .. } => {
                    if with_value {
                        self.builder.emit(Opcode::Rot2);
                    }
                    self.builder.emit(Opcode::Pop);
                }
                BlockKind::Loop { .. } | BlockKind::TryExcept => {}
                BlockKind::Finally(body) => {
                    let body = *body;
                    let outer = self.blocks.split_off(index);
                    if with_value {
                        self.blocks.push(Block {
                            kind: BlockKind::PendingValue,
                            region: None,
                        });
                    }
                    let result = self.compile_body(body);
                    self.blocks.truncate(index);
                    self.blocks.extend(outer);
                    result?;
                }
                BlockKind::PendingValue => {
                    if with_value {
                        self.builder.emit(Opcode::Rot2);
                    }
                    self.builder.emit(Opcode::Pop);
                }
                BlockKind::With => {
                    if with_value {
                        self.builder.emit(Opcode::Rot2);
                    }
                    self.emit_exit_call();
                }
                BlockKind::ExceptHandler => {
                    if with_value {
                        self.builder.emit(Opcode::Rot2);
                    }
                    self.builder.emit(Opcode::PopExcept);
                }
                BlockKind::FinallyHandler => {
                    if with_value {
                        self.builder.emit(Opcode::Rot2);
                        self.builder.emit(Opcode::Pop);
                        self.builder.emit(Opcode::Rot2);
                    } else {
                        self.builder.emit(Opcode::Pop);
                    }
                    self.builder.emit(Opcode::PopExcept);
                }
            }
        }
        Ok(closed)
    }

    fn reopen_blocks(&mut self, closed: Vec<usize>) {
        let here = self.builder.current_offset();
        for index in closed {
            if let Some(region) = &mut self.blocks[index].region {
                region.segment_start = here;
            }
        }
    }

    /// `exit(None, None, None)` with the exit callable on top of the stack, result discarded.
    fn emit_exit_call(&mut self) {
        self.builder.emit(Opcode::LoadNone);
        self.builder.emit(Opcode::LoadNone);
        self.builder.emit(Opcode::LoadNone);
        self.builder.emit_u8(Opcode::Call, 3);
        self.builder.emit(Opcode::Pop);
    }

    fn innermost_loop(&self) -> Option<usize> {
        self.blocks
            .iter()
            .rposition(|block| matches!(block.kind, BlockKind::Loop { .. }))
    }

    // ==========================
    // statements

    fn compile_body(&mut self, body: &'a [Stmt]) -> ParseResult<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt) -> ParseResult<()> {
        let position = stmt.position;
        self.builder.set_location(position);
        match &stmt.node {
            Node::Expr(expr) => {
                self.compile_expr(expr)?;
                self.builder.emit(Opcode::Pop);
            }
            Node::Assign { targets, value } => {
                self.compile_expr(value)?;
                let (last, rest) = targets.split_last().expect("assignment has a target");
                for target in rest {
                    self.builder.emit(Opcode::Dup);
                    self.compile_store(target)?;
                }
                self.compile_store(last)?;
            }
            Node::AugAssign { target, op, value } => self.compile_aug_assign(target, *op as u8, value)?,
            Node::AnnAssign { target, value } => {
                if let Some(value) = value {
                    self.compile_expr(value)?;
                    self.compile_store(target)?;
                }
            }
            Node::Pass | Node::Global(_) | Node::Nonlocal(_) => {}
            Node::Break => self.compile_break(position)?,
            Node::Continue => self.compile_continue(position)?,
            Node::Del(targets) => {
                for target in targets {
                    self.compile_delete(target)?;
                }
            }
            Node::Return(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.builder.emit(Opcode::LoadNone),
                }
                self.builder.set_location(position);
                let depth = self.builder.stack_depth();
                let closed = self.unwind_blocks(0, true)?;
                self.builder.emit(Opcode::Return);
                self.reopen_blocks(closed);
                self.builder.set_stack_depth(depth.saturating_sub(1));
            }
            Node::Raise { exc, cause } => {
                let mut form = 0;
                if let Some(exc) = exc {
                    self.compile_expr(exc)?;
                    form = 1;
                    if let Some(cause) = cause {
                        self.compile_expr(cause)?;
                        form = 2;
                    }
                }
                self.builder.set_location(position);
                self.builder.emit_u8(Opcode::Raise, form);
            }
            Node::Assert { test, msg } => {
                self.compile_expr(test)?;
                let ok = self.builder.emit_jump(Opcode::JumpIfTrue);
                self.builder.set_location(position);
                self.builder.emit(Opcode::LoadAssertionError);
                if let Some(msg) = msg {
                    self.compile_expr(msg)?;
                    self.builder.emit_u8(Opcode::Call, 1);
                }
                self.builder.emit_u8(Opcode::Raise, 1);
                self.builder.patch_jump(ok);
            }
            Node::Import(aliases) => {
                for alias in aliases {
                    let module = self.interns.intern(&alias.module);
                    let module = self.builder.add_name(module);
                    self.builder.emit_u16_u8(Opcode::ImportName, module, u8::from(alias.has_alias));
                    self.compile_store_name(&alias.bind);
                }
            }
            Node::ImportFrom { module, names } => {
                let module = self.interns.intern(module);
                let module = self.builder.add_name(module);
                self.builder.emit_u16_u8(Opcode::ImportName, module, 1);
                match names {
                    ImportNames::Star => self.builder.emit(Opcode::ImportStar),
                    ImportNames::Names(names) => {
                        for (attr, bind) in names {
                            let attr = self.builder.add_name(*attr);
                            self.builder.emit_u16(Opcode::ImportFrom, attr);
                            self.compile_store_name(bind);
                        }
                        self.builder.emit(Opcode::Pop);
                    }
                }
            }
            Node::If { test, body, orelse } => {
                self.compile_expr(test)?;
                let else_jump = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_body(body)?;
                if orelse.is_empty() {
                    self.builder.patch_jump(else_jump);
                } else {
                    let end = self.builder.emit_jump(Opcode::Jump);
                    self.builder.patch_jump(else_jump);
                    self.compile_body(orelse)?;
                    self.builder.patch_jump(end);
                }
            }
            Node::While { test, body, orelse } => {
                let top = self.builder.current_offset();
                self.compile_expr(test)?;
                let exit = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.push_block(
                    BlockKind::Loop {
                        continue_target: top,
                        breaks: Vec::new(),
                        is_for: false,
                    },
                    None,
                );
                self.compile_body(body)?;
                self.builder.emit_jump_to(Opcode::Jump, top);
                let block = self.pop_block();
                self.builder.patch_jump(exit);
                self.compile_body(orelse)?;
                self.patch_breaks(block);
            }
            Node::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.compile_expr(iter)?;
                self.builder.set_location(position);
                self.builder.emit(Opcode::GetIter);
                let depth = self.builder.stack_depth();
                let top = self.builder.current_offset();
                let exit = self.builder.emit_jump(Opcode::ForIter);
                self.compile_store(target)?;
                self.push_block(
                    BlockKind::Loop {
                        continue_target: top,
                        breaks: Vec::new(),
                        is_for: true,
                    },
                    None,
                );
                self.compile_body(body)?;
                self.builder.emit_jump_to(Opcode::Jump, top);
                let block = self.pop_block();
                self.builder.patch_jump(exit);
                self.builder.set_stack_depth(depth - 1);
                self.compile_body(orelse)?;
                self.patch_breaks(block);
            }
            Node::Try(try_block) => self.compile_try(try_block, position)?,
            Node::With { items, body } => self.compile_with(items, body)?,
            Node::FunctionDef(func) => {
                self.compile_function_def(func)?;
                self.compile_store_name(&func.name);
            }
            Node::ClassDef(class) => self.compile_class_def(class)?,
            Node::Match { subject, cases } => self.compile_match(subject, cases)?,
        }
        Ok(())
    }

    fn patch_breaks(&mut self, block: Block<'a>) {
        if let BlockKind::Loop { breaks, .. } = block.kind {
            for label in breaks {
                self.builder.patch_jump(label);
            }
        }
    }

    fn compile_break(&mut self, position: CodeRange) -> ParseResult<()> {
        let index = self
            .innermost_loop()
            .ok_or_else(|| ParseError::syntax("'break' outside loop", position))?;
        let depth = self.builder.stack_depth();
        let closed = self.unwind_blocks(index + 1, false)?;
        if let BlockKind::Loop { is_for: true, .. } = self.blocks[index].kind {
            self.builder.emit(Opcode::Pop);
        }
        let label = self.builder.emit_jump(Opcode::Jump);
        if let BlockKind::Loop { breaks, .. } = &mut self.blocks[index].kind {
            breaks.push(label);
        }
        self.reopen_blocks(closed);
        self.builder.set_stack_depth(depth);
        Ok(())
    }

    fn compile_continue(&mut self, position: CodeRange) -> ParseResult<()> {
        let index = self
            .innermost_loop()
            .ok_or_else(|| ParseError::syntax("'continue' not properly in loop", position))?;
        let depth = self.builder.stack_depth();
        let closed = self.unwind_blocks(index + 1, false)?;
        let BlockKind::Loop { continue_target, .. } = self.blocks[index].kind else {
            unreachable!("innermost_loop returned a loop block");
        };
        self.builder.emit_jump_to(Opcode::Jump, continue_target);
        self.reopen_blocks(closed);
        self.builder.set_stack_depth(depth);
        Ok(())
    }

    fn compile_try(&mut self, try_block: &'a Try, position: CodeRange) -> ParseResult<()> {
        if try_block.finally.is_empty() {
            return self.compile_try_except(try_block, position);
        }
        let depth = self.builder.stack_depth();
        self.push_block(BlockKind::Finally(&try_block.finally), Some(depth));
        if try_block.handlers.is_empty() {
            self.compile_body(&try_block.body)?;
        } else {
            self.compile_try_except(try_block, position)?;
        }
        let block = self.pop_block();

        // normal exit
        self.compile_body(&try_block.finally)?;
        let end = self.builder.emit_jump(Opcode::Jump);

        // exceptional exit: [exc]
        let handler = self.builder.current_offset();
        self.add_handler(&block, handler);
        self.builder.set_stack_depth(depth + 1);
        self.builder.emit(Opcode::PushExcInfo);
        self.push_block(BlockKind::FinallyHandler, Some(depth + 1));
        self.compile_body(&try_block.finally)?;
        let block = self.pop_block();
        self.builder.emit(Opcode::PopExceptReraise);

        // an exception inside the finally body: [previous, new_exc]
        let cleanup = self.builder.current_offset();
        self.add_handler(&block, cleanup);
        self.builder.set_stack_depth(depth + 2);
        self.builder.emit(Opcode::PopExceptReraise);

        self.builder.patch_jump(end);
        self.builder.set_stack_depth(depth);
        Ok(())
    }

    fn compile_try_except(&mut self, try_block: &'a Try, position: CodeRange) -> ParseResult<()> {
        let depth = self.builder.stack_depth();
        self.push_block(BlockKind::TryExcept, Some(depth));
        self.compile_body(&try_block.body)?;
        let block = self.pop_block();
        self.compile_body(&try_block.orelse)?;
        let mut ends = vec![self.builder.emit_jump(Opcode::Jump)];

        // [exc] -> [previous, exc]
        let handler = self.builder.current_offset();
        self.add_handler(&block, handler);
        self.builder.set_stack_depth(depth + 1);
        self.builder.set_location(position);
        self.builder.emit(Opcode::PushExcInfo);
        self.push_block(BlockKind::ExceptHandler, Some(depth + 1));

        for clause in &try_block.handlers {
            self.builder.set_location(clause.position);
            let next = match &clause.exc_type {
                Some(exc_type) => {
                    self.builder.emit(Opcode::Dup);
                    self.compile_expr(exc_type)?;
                    self.builder.emit(Opcode::CheckExcMatch);
                    Some(self.builder.emit_jump(Opcode::JumpIfFalse))
                }
                None => None,
            };
            match &clause.name {
                Some(name) => self.compile_store_name(name),
                None => self.builder.emit(Opcode::Pop),
            }
            self.compile_body(&clause.body)?;
            self.builder.emit(Opcode::PopExcept);
            if let Some(name) = &clause.name {
                self.builder.emit(Opcode::LoadNone);
                self.compile_store_name(name);
                self.compile_delete_name(name);
            }
            ends.push(self.builder.emit_jump(Opcode::Jump));
            if let Some(next) = next {
                self.builder.patch_jump(next);
            }
            self.builder.set_stack_depth(depth + 2);
        }
        self.builder.emit(Opcode::Reraise);
        let block = self.pop_block();

        // an exception while handling: [previous, new_exc]
        let cleanup = self.builder.current_offset();
        self.add_handler(&block, cleanup);
        self.builder.set_stack_depth(depth + 2);
        self.builder.emit(Opcode::PopExceptReraise);

        for end in ends {
            self.builder.patch_jump(end);
        }
        self.builder.set_stack_depth(depth);
        Ok(())
    }

    fn compile_with(&mut self, items: &'a [WithItem], body: &'a [Stmt]) -> ParseResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.compile_body(body);
        };
        let depth = self.builder.stack_depth();
        self.compile_expr(&item.context)?;
        self.builder.set_location(item.context.position);
        self.builder.emit(Opcode::BeforeWith);
        match &item.target {
            Some(target) => self.compile_store(target)?,
            None => self.builder.emit(Opcode::Pop),
        }
        self.push_block(BlockKind::With, Some(depth + 1));
        self.compile_with(rest, body)?;
        let block = self.pop_block();
        self.builder.set_location(item.context.position);
        self.emit_exit_call();
        let end = self.builder.emit_jump(Opcode::Jump);

        // [exit, exc] -> [exit, previous, exc]
        let handler = self.builder.current_offset();
        self.add_handler(&block, handler);
        self.builder.set_stack_depth(depth + 2);
        self.builder.emit(Opcode::PushExcInfo);
        let start = self.builder.current_offset();
        self.builder.emit(Opcode::WithExceptStart);
        let suppress = self.builder.emit_jump(Opcode::JumpIfTrue);
        self.builder.emit(Opcode::Reraise);
        let cleanup = self.builder.current_offset();
        self.builder.add_exception_entry(start, cleanup, cleanup, depth + 2);
        self.builder.set_stack_depth(depth + 3);
        self.builder.emit(Opcode::PopExceptReraise);

        self.builder.patch_jump(suppress);
        self.builder.set_stack_depth(depth + 3);
        self.builder.emit(Opcode::Pop);
        self.builder.emit(Opcode::PopExcept);
        self.builder.emit(Opcode::Pop);
        self.builder.patch_jump(end);
        self.builder.set_stack_depth(depth);
        Ok(())
    }

    fn compile_aug_assign(&mut self, target: &'a Target, op: u8, value: &'a ExprLoc) -> ParseResult<()> {
        match target {
            Target::Name(ident) => {
                self.compile_load_name(ident);
                self.compile_expr(value)?;
                self.builder.set_location(target.position());
                self.builder.emit_u8(Opcode::InplaceOp, op);
                self.compile_store_name(ident);
            }
            Target::Attribute { object, attr, position } => {
                self.compile_expr(object)?;
                self.builder.emit(Opcode::Dup);
                let attr = self.builder.add_name(*attr);
                self.builder.set_location(*position);
                self.builder.emit_u16(Opcode::LoadAttr, attr);
                self.compile_expr(value)?;
                self.builder.set_location(*position);
                self.builder.emit_u8(Opcode::InplaceOp, op);
                self.builder.emit(Opcode::Rot2);
                self.builder.emit_u16(Opcode::StoreAttr, attr);
            }
            Target::Subscript {
                object,
                index,
                position,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.emit(Opcode::Dup2);
                self.builder.set_location(*position);
                self.builder.emit(Opcode::BinarySubscr);
                self.compile_expr(value)?;
                self.builder.set_location(*position);
                self.builder.emit_u8(Opcode::InplaceOp, op);
                self.builder.emit(Opcode::Rot3);
                self.builder.emit(Opcode::StoreSubscr);
            }
            Target::Tuple { .. } | Target::Starred(_) => {
                return Err(ParseError::syntax(
                    "illegal expression for augmented assignment",
                    target.position(),
                ));
            }
        }
        Ok(())
    }

    fn compile_function_def(&mut self, func: &'a FunctionDef) -> ParseResult<()> {
        for decorator in &func.decorators {
            self.compile_expr(decorator)?;
        }

        let mut flags = 0;
        let positional: Vec<&ExprLoc> = func
            .params
            .posonly
            .iter()
            .chain(&func.params.args)
            .filter_map(|param| param.default.as_ref())
            .collect();
        if !positional.is_empty() {
            for default in &positional {
                self.compile_expr(default)?;
            }
            let count = narrow(positional.len(), "default values", func.position)?;
            self.builder.emit_u16(Opcode::BuildTuple, count);
            flags |= MAKE_FUNCTION_DEFAULTS;
        }
        let keyword: Vec<_> = func
            .params
            .kwonly
            .iter()
            .filter_map(|param| param.default.as_ref().map(|default| (param.name.name, default)))
            .collect();
        if !keyword.is_empty() {
            for (name, default) in &keyword {
                let name = self.builder.add_const(Const::Str(*name));
                self.builder.emit_u16(Opcode::LoadConst, name);
                self.compile_expr(default)?;
            }
            let count = narrow(keyword.len(), "default values", func.position)?;
            self.builder.emit_u16(Opcode::BuildMap, count);
            flags |= MAKE_FUNCTION_KW_DEFAULTS;
        }

        let name = if func.is_lambda {
            StaticStrings::Lambda.id()
        } else {
            func.name.name
        };
        let qualname = self.child_qualname(name);
        let mut child = Compiler::new(&mut *self.interns, &func.scope, qualname, self.source_id);
        child.builder.set_location(func.position);
        child.compile_body(&func.body)?;
        child.builder.emit(Opcode::LoadNone);
        child.builder.emit(Opcode::Return);
        let params = &func.params;
        let signature = Signature {
            posonly: narrow(params.posonly.len(), "parameters", func.position)?,
            args: narrow(params.args.len(), "parameters", func.position)?,
            kwonly: narrow(params.kwonly.len(), "parameters", func.position)?,
            varargs: params.vararg.is_some(),
            varkw: params.kwarg.is_some(),
        };
        let code = child.finish(CodeShape {
            name,
            kind: if func.is_lambda {
                CodeKind::Lambda
            } else {
                CodeKind::Function
            },
            signature,
            first_line: func.position.start().line,
        });
        self.emit_make_function(code, flags, func.position)?;

        for _ in &func.decorators {
            self.builder.emit_u8(Opcode::Call, 1);
        }
        Ok(())
    }

    /// Pushes the closure tuple if needed and emits `MakeFunction` for `code`.
    fn emit_make_function(&mut self, code: Code, mut flags: u8, position: CodeRange) -> ParseResult<()> {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                let cell = self.cell_index(*name);
                self.builder.emit_u16(Opcode::LoadClosure, cell);
            }
            let count = narrow(code.freevars.len(), "closure variables", position)?;
            self.builder.emit_u16(Opcode::BuildTuple, count);
            flags |= MAKE_FUNCTION_CLOSURE;
        }
        let index = narrow(self.children.len(), "nested definitions", position)?;
        self.children.push(Rc::new(code));
        self.builder.set_location(position);
        self.builder.emit_u16_u8(Opcode::MakeFunction, index, flags);
        Ok(())
    }

    fn cell_index(&self, name: StringId) -> u16 {
        let index = self
            .scope
            .cellvars
            .iter()
            .chain(&self.scope.freevars)
            .position(|cell| *cell == name)
            .expect("enclosing scope provides every free variable");
        u16::try_from(index).expect("cell index fits u16")
    }

    fn compile_class_def(&mut self, class: &'a ClassDef) -> ParseResult<()> {
        for decorator in &class.decorators {
            self.compile_expr(decorator)?;
        }
        let qualname = self.child_qualname(class.name.name);
        let mut child = Compiler::new(&mut *self.interns, &class.scope, qualname, self.source_id);
        child.builder.set_location(class.position);
        child.compile_body(&class.body)?;
        child.builder.emit(Opcode::LoadNone);
        child.builder.emit(Opcode::Return);
        let code = child.finish(CodeShape {
            name: class.name.name,
            kind: CodeKind::ClassBody,
            signature: Signature::default(),
            first_line: class.position.start().line,
        });
        self.emit_make_function(code, 0, class.position)?;

        let name = self.builder.add_const(Const::Str(class.name.name));
        self.builder.emit_u16(Opcode::LoadConst, name);
        for base in &class.bases {
            self.compile_expr(base)?;
        }
        let count = narrow(class.bases.len(), "base classes", class.position)?;
        self.builder.emit_u16(Opcode::BuildTuple, count);
        self.builder.set_location(class.position);
        self.builder.emit(Opcode::BuildClass);

        for _ in &class.decorators {
            self.builder.emit_u8(Opcode::Call, 1);
        }
        self.compile_store_name(&class.name);
        Ok(())
    }

    // ==========================
    // match

    fn compile_match(&mut self, subject: &'a ExprLoc, cases: &'a [MatchCase]) -> ParseResult<()> {
        self.compile_expr(subject)?;
        let base = self.builder.stack_depth();
        let mut ends = Vec::new();
        for case in cases {
            self.builder.set_location(case.position);
            self.builder.emit(Opcode::Dup);
            let mut fails = FailTargets::new();
            let outer = std::mem::take(&mut self.captures);
            self.compile_pattern(&case.pattern, &mut fails, 0)?;
            // captures are bound only once the whole pattern has matched
            let captures = std::mem::replace(&mut self.captures, outer);
            for (slot, name) in captures.into_iter().enumerate() {
                let slot = narrow(slot, "pattern captures", case.position)?;
                self.builder.emit_u16(Opcode::LoadCapture, slot);
                self.compile_store_name(name);
            }
            if let Some(guard) = &case.guard {
                self.compile_expr(guard)?;
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                add_fail(&mut fails, 0, label);
            }
            self.builder.emit(Opcode::Pop);
            self.compile_body(&case.body)?;
            ends.push(self.builder.emit_jump(Opcode::Jump));
            self.emit_fail_pads(fails, base);
        }
        self.builder.emit(Opcode::Pop);
        for end in ends {
            self.builder.patch_jump(end);
        }
        self.builder.set_stack_depth(base - 1);
        Ok(())
    }

    /// Emits the landing pads for pattern failures, popping back down to `base`.
    fn emit_fail_pads(&mut self, fails: FailTargets, base: u16) {
        let mut fails = fails;
        while let Some(labels) = fails.pop() {
            let pops = u16::try_from(fails.len()).expect("pattern depth fits u16");
            for label in labels {
                self.builder.patch_jump(label);
            }
            self.builder.set_stack_depth(base + pops);
            if pops > 0 {
                self.builder.emit(Opcode::Pop);
            }
        }
        self.builder.set_stack_depth(base);
    }

    /// Compiles a pattern test against the value on top of the stack.
    ///
    /// `extra` counts values between the pattern base and the subject. On success the subject
    /// is consumed; on failure control jumps to a label in `fails` indexed by the number of
    /// values left above the base.
    fn compile_pattern(&mut self, pattern: &'a Pattern, fails: &mut FailTargets, extra: usize) -> ParseResult<()> {
        match pattern {
            Pattern::Wildcard | Pattern::Star(None) => self.builder.emit(Opcode::Pop),
            Pattern::Capture(name) | Pattern::Star(Some(name)) => self.stash_capture(name)?,
            Pattern::Value(expr) => {
                self.compile_expr(expr)?;
                self.builder
                    .emit_u8(Opcode::CompareOp, CmpOperator::Eq as u8);
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                add_fail(fails, extra, label);
            }
            Pattern::Singleton(literal) => {
                self.compile_literal(literal);
                self.builder
                    .emit_u8(Opcode::CompareOp, CmpOperator::Is as u8);
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                add_fail(fails, extra, label);
            }
            Pattern::Sequence(patterns) => {
                let star = patterns.iter().position(|p| matches!(p, Pattern::Star(_)));
                let fixed = patterns.len() - usize::from(star.is_some());
                let position = self.builder.location().unwrap_or_default();
                let fixed_u16 = narrow(fixed, "sub-patterns", position)?;
                self.builder
                    .emit_u16_u8(Opcode::MatchSequence, fixed_u16, u8::from(star.is_some()));
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                add_fail(fails, extra + 1, label);
                match star {
                    Some(star) => {
                        let before = narrow(star, "sub-patterns", position)?;
                        let after = narrow(patterns.len() - star - 1, "sub-patterns", position)?;
                        self.builder.emit_u8_u8(Opcode::UnpackEx, before, after);
                    }
                    None => {
                        let count = narrow(patterns.len(), "sub-patterns", position)?;
                        self.builder.emit_u8(Opcode::UnpackSequence, count);
                    }
                }
                let count = patterns.len();
                for (index, pattern) in patterns.iter().enumerate() {
                    self.compile_pattern(pattern, fails, extra + count - 1 - index)?;
                }
            }
            Pattern::Mapping { keys, patterns, rest } => {
                let position = self.builder.location().unwrap_or_default();
                self.builder.emit(Opcode::MatchMapping);
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                add_fail(fails, extra + 1, label);
                for key in keys {
                    self.compile_expr(key)?;
                }
                let count = narrow(keys.len(), "mapping keys", position)?;
                self.builder.emit_u16(Opcode::BuildTuple, count);
                // [subject, keys] -> [subject, keys, values_or_none]
                self.builder.emit(Opcode::MatchKeys);
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::LoadNone);
                self.builder
                    .emit_u8(Opcode::CompareOp, CmpOperator::Is as u8);
                let label = self.builder.emit_jump(Opcode::JumpIfTrue);
                add_fail(fails, extra + 3, label);
                let unpack = narrow(patterns.len(), "mapping keys", position)?;
                self.builder.emit_u8(Opcode::UnpackSequence, unpack);
                let count = patterns.len();
                for (index, pattern) in patterns.iter().enumerate() {
                    self.compile_pattern(pattern, fails, extra + 2 + count - 1 - index)?;
                }
                match rest {
                    Some(rest) => {
                        self.builder.emit(Opcode::CopyDictWithoutKeys);
                        self.stash_capture(rest)?;
                        self.builder.emit(Opcode::Pop);
                    }
                    None => {
                        self.builder.emit(Opcode::Pop);
                        self.builder.emit(Opcode::Pop);
                    }
                }
            }
            Pattern::Class {
                cls,
                patterns,
                kwd_names,
                kwd_patterns,
            } => {
                self.compile_expr(cls)?;
                let names = self.builder.add_const(Const::Names(kwd_names.clone()));
                self.builder.emit_u16(Opcode::LoadConst, names);
                let positional = narrow(patterns.len(), "sub-patterns", cls.position)?;
                self.builder.set_location(cls.position);
                self.builder.emit_u8(Opcode::MatchClass, positional);
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::LoadNone);
                self.builder
                    .emit_u8(Opcode::CompareOp, CmpOperator::Is as u8);
                let label = self.builder.emit_jump(Opcode::JumpIfTrue);
                add_fail(fails, extra + 1, label);
                let count = patterns.len() + kwd_patterns.len();
                let unpack = narrow(count, "sub-patterns", cls.position)?;
                self.builder.emit_u8(Opcode::UnpackSequence, unpack);
                for (index, pattern) in patterns.iter().chain(kwd_patterns).enumerate() {
                    self.compile_pattern(pattern, fails, extra + count - 1 - index)?;
                }
            }
            Pattern::Or(alternatives) => {
                let base = self.builder.stack_depth();
                let (last, init) = alternatives.split_last().expect("or-pattern has alternatives");
                let mut matched = Vec::new();
                for alternative in init {
                    self.builder.emit(Opcode::Dup);
                    let mut alt_fails = FailTargets::new();
                    self.compile_pattern(alternative, &mut alt_fails, 0)?;
                    self.builder.emit(Opcode::Pop);
                    matched.push(self.builder.emit_jump(Opcode::Jump));
                    self.emit_fail_pads(alt_fails, base);
                }
                self.compile_pattern(last, fails, extra)?;
                for label in matched {
                    self.builder.patch_jump(label);
                }
                self.builder.set_stack_depth(base - 1);
            }
            Pattern::As { pattern, name } => {
                self.builder.emit(Opcode::Dup);
                self.compile_pattern(pattern, fails, extra + 1)?;
                self.stash_capture(name)?;
            }
        }
        Ok(())
    }

    /// Moves the value on top of the stack into the capture slot for `name`.
    fn stash_capture(&mut self, name: &'a Identifier) -> ParseResult<()> {
        let slot = match self.captures.iter().position(|held| held.name == name.name) {
            Some(slot) => slot,
            None => {
                self.captures.push(name);
                self.captures.len() - 1
            }
        };
        let slot = narrow(slot, "pattern captures", name.position)?;
        self.builder.emit_u16(Opcode::StashCapture, slot);
        Ok(())
    }

    // ==========================
    // names and targets

    fn compile_load_name(&mut self, ident: &Identifier) {
        match ident.scope {
            NameScope::Local(slot) => self.builder.emit_u16(Opcode::LoadLocal, slot),
            NameScope::Cell(cell) => self.builder.emit_u16(Opcode::LoadDeref, cell),
            NameScope::Global => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::LoadGlobal, name);
            }
            NameScope::Name | NameScope::Unresolved => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::LoadName, name);
            }
        }
    }

    fn compile_store_name(&mut self, ident: &Identifier) {
        match ident.scope {
            NameScope::Local(slot) => self.builder.emit_u16(Opcode::StoreLocal, slot),
            NameScope::Cell(cell) => self.builder.emit_u16(Opcode::StoreDeref, cell),
            NameScope::Global => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::StoreGlobal, name);
            }
            NameScope::Name | NameScope::Unresolved => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::StoreName, name);
            }
        }
    }

    fn compile_delete_name(&mut self, ident: &Identifier) {
        self.builder.set_location(ident.position);
        match ident.scope {
            NameScope::Local(slot) => self.builder.emit_u16(Opcode::DeleteLocal, slot),
            NameScope::Cell(cell) => self.builder.emit_u16(Opcode::DeleteDeref, cell),
            NameScope::Global => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::DeleteGlobal, name);
            }
            NameScope::Name | NameScope::Unresolved => {
                let name = self.builder.add_name(ident.name);
                self.builder.emit_u16(Opcode::DeleteName, name);
            }
        }
    }

    /// Stores the value on top of the stack into `target`.
    fn compile_store(&mut self, target: &'a Target) -> ParseResult<()> {
        match target {
            Target::Name(ident) => self.compile_store_name(ident),
            Target::Attribute { object, attr, position } => {
                self.compile_expr(object)?;
                let attr = self.builder.add_name(*attr);
                self.builder.set_location(*position);
                self.builder.emit_u16(Opcode::StoreAttr, attr);
            }
            Target::Subscript {
                object,
                index,
                position,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.set_location(*position);
                self.builder.emit(Opcode::StoreSubscr);
            }
            Target::Tuple { targets, position } => {
                self.builder.set_location(*position);
                let stars: Vec<usize> = targets
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| matches!(t, Target::Starred(_)))
                    .map(|(i, _)| i)
                    .collect();
                match stars.as_slice() {
                    [] => {
                        let count = narrow(targets.len(), "targets in unpacking", *position)?;
                        self.builder.emit_u8(Opcode::UnpackSequence, count);
                    }
                    [star] => {
                        let before = narrow(*star, "targets in unpacking", *position)?;
                        let after = narrow(targets.len() - star - 1, "targets in unpacking", *position)?;
                        self.builder.emit_u8_u8(Opcode::UnpackEx, before, after);
                    }
                    _ => {
                        return Err(ParseError::syntax(
                            "multiple starred expressions in assignment",
                            *position,
                        ));
                    }
                }
                for target in targets {
                    match target {
                        Target::Starred(inner) => self.compile_store(inner)?,
                        other => self.compile_store(other)?,
                    }
                }
            }
            Target::Starred(inner) => {
                return Err(ParseError::syntax(
                    "starred assignment target must be in a list or tuple",
                    inner.position(),
                ));
            }
        }
        Ok(())
    }

    fn compile_delete(&mut self, target: &'a Target) -> ParseResult<()> {
        match target {
            Target::Name(ident) => self.compile_delete_name(ident),
            Target::Attribute { object, attr, position } => {
                self.compile_expr(object)?;
                let attr = self.builder.add_name(*attr);
                self.builder.set_location(*position);
                self.builder.emit_u16(Opcode::DeleteAttr, attr);
            }
            Target::Subscript {
                object,
                index,
                position,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.set_location(*position);
                self.builder.emit(Opcode::DeleteSubscr);
            }
            Target::Tuple { targets, .. } => {
                for target in targets {
                    self.compile_delete(target)?;
                }
            }
            Target::Starred(inner) => {
                return Err(ParseError::syntax("cannot delete starred", inner.position()));
            }
        }
        Ok(())
    }

    // ==========================
    // expressions

    fn compile_literal(&mut self, literal: &Literal) {
        let constant = match literal {
            Literal::None => {
                self.builder.emit(Opcode::LoadNone);
                return;
            }
            Literal::Bool(value) => Const::Bool(*value),
            Literal::Int(value) => Const::Int(*value),
            Literal::BigInt(value) => Const::BigInt(value.clone()),
            Literal::Float(value) => Const::Float(*value),
            Literal::Str(value) => Const::Str(*value),
            Literal::Bytes(value) => Const::Bytes(value.clone()),
            Literal::Ellipsis => Const::Ellipsis,
        };
        let index = self.builder.add_const(constant);
        self.builder.emit_u16(Opcode::LoadConst, index);
    }

    fn compile_expr(&mut self, expr: &'a ExprLoc) -> ParseResult<()> {
        let position = expr.position;
        match &expr.expr {
            Expr::Literal(literal) => self.compile_literal(literal),
            Expr::FString(parts) => self.compile_fstring(parts, position)?,
            Expr::Name(ident) => {
                self.builder.set_location(position);
                self.compile_load_name(ident);
            }
            Expr::Attribute { object, attr } => {
                self.compile_expr(object)?;
                let attr = self.builder.add_name(*attr);
                self.builder.set_location(position);
                self.builder.emit_u16(Opcode::LoadAttr, attr);
            }
            Expr::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.set_location(position);
                self.builder.emit(Opcode::BinarySubscr);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper] {
                    match part {
                        Some(part) => self.compile_expr(part)?,
                        None => self.builder.emit(Opcode::LoadNone),
                    }
                }
                if let Some(step) = step {
                    self.compile_expr(step)?;
                    self.builder.emit_u8(Opcode::BuildSlice, 3);
                } else {
                    self.builder.emit_u8(Opcode::BuildSlice, 2);
                }
            }
            Expr::Call { func, args } => self.compile_call(func, args, position)?,
            Expr::BinOp { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.set_location(position);
                self.builder.emit_u8(Opcode::BinaryOp, *op as u8);
            }
            Expr::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.builder.set_location(position);
                self.builder.emit(match op {
                    UnaryOperator::Not => Opcode::UnaryNot,
                    UnaryOperator::Neg => Opcode::UnaryNeg,
                    UnaryOperator::Pos => Opcode::UnaryPos,
                    UnaryOperator::Invert => Opcode::UnaryInvert,
                });
            }
            Expr::BoolOp { op, values } => {
                let jump = match op {
                    BoolOperator::And => Opcode::JumpIfFalseOrPop,
                    BoolOperator::Or => Opcode::JumpIfTrueOrPop,
                };
                let (last, init) = values.split_last().expect("boolean operation has operands");
                let mut ends = Vec::new();
                for value in init {
                    self.compile_expr(value)?;
                    ends.push(self.builder.emit_jump(jump));
                }
                self.compile_expr(last)?;
                for end in ends {
                    self.builder.patch_jump(end);
                }
            }
            Expr::Compare { left, comparisons } => self.compile_compare(left, comparisons, position)?,
            Expr::IfElse { test, body, orelse } => {
                self.compile_expr(test)?;
                let else_jump = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(body)?;
                let end = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(else_jump);
                self.builder.adjust_stack_depth(-1);
                self.compile_expr(orelse)?;
                self.builder.patch_jump(end);
            }
            Expr::Lambda(func) => self.compile_function_def(func)?,
            Expr::Tuple(items) => {
                if items.iter().any(|item| matches!(item.expr, Expr::Starred(_))) {
                    self.compile_starred_list(items, position)?;
                    self.builder.emit(Opcode::ListToTuple);
                } else {
                    self.compile_exprs(items)?;
                    let count = narrow(items.len(), "tuple items", position)?;
                    self.builder.emit_u16(Opcode::BuildTuple, count);
                }
            }
            Expr::List(items) => {
                if items.iter().any(|item| matches!(item.expr, Expr::Starred(_))) {
                    self.compile_starred_list(items, position)?;
                } else {
                    self.compile_exprs(items)?;
                    let count = narrow(items.len(), "list items", position)?;
                    self.builder.emit_u16(Opcode::BuildList, count);
                }
            }
            Expr::Set(items) => {
                if items.iter().any(|item| matches!(item.expr, Expr::Starred(_))) {
                    self.builder.emit_u16(Opcode::BuildSet, 0);
                    for item in items {
                        if let Expr::Starred(inner) = &item.expr {
                            self.compile_expr(inner)?;
                            self.builder.emit(Opcode::SetUpdate);
                        } else {
                            self.compile_expr(item)?;
                            self.builder.emit_u8(Opcode::SetAdd, 1);
                        }
                    }
                } else {
                    self.compile_exprs(items)?;
                    let count = narrow(items.len(), "set items", position)?;
                    self.builder.emit_u16(Opcode::BuildSet, count);
                }
            }
            Expr::Dict(items) => {
                if items.iter().any(|item| matches!(item, DictItem::Unpack(_))) {
                    self.builder.emit_u16(Opcode::BuildMap, 0);
                    for item in items {
                        match item {
                            DictItem::Pair(key, value) => {
                                self.compile_expr(key)?;
                                self.compile_expr(value)?;
                                self.builder.emit_u8(Opcode::MapAdd, 1);
                            }
                            DictItem::Unpack(mapping) => {
                                self.compile_expr(mapping)?;
                                self.builder.set_location(mapping.position);
                                self.builder.emit(Opcode::DictUpdate);
                            }
                        }
                    }
                } else {
                    for item in items {
                        if let DictItem::Pair(key, value) = item {
                            self.compile_expr(key)?;
                            self.compile_expr(value)?;
                        }
                    }
                    let count = narrow(items.len(), "dict items", position)?;
                    self.builder.emit_u16(Opcode::BuildMap, count);
                }
            }
            Expr::Starred(_) => {
                return Err(ParseError::syntax("can't use starred expression here", position));
            }
            Expr::Comprehension(comp) => self.compile_comprehension(comp, position)?,
            Expr::Await(value) => {
                self.compile_expr(value)?;
                self.builder.set_location(position);
                self.builder.emit(Opcode::Await);
            }
            Expr::Yield(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.builder.emit(Opcode::LoadNone),
                }
                self.builder.set_location(position);
                self.builder.emit(Opcode::Yield);
            }
            Expr::YieldFrom(value) => {
                self.compile_expr(value)?;
                self.builder.set_location(position);
                self.builder.emit(Opcode::GetYieldFromIter);
                self.builder.emit(Opcode::LoadNone);
                self.builder.emit(Opcode::YieldFrom);
            }
            Expr::Named { target, value } => {
                self.compile_expr(value)?;
                self.builder.emit(Opcode::Dup);
                self.compile_store_name(target);
            }
        }
        Ok(())
    }

    fn compile_exprs(&mut self, exprs: &'a [ExprLoc]) -> ParseResult<()> {
        for expr in exprs {
            self.compile_expr(expr)?;
        }
        Ok(())
    }

    /// Builds a list from display items, some of which are `*iterable`.
    fn compile_starred_list(&mut self, items: &'a [ExprLoc], position: CodeRange) -> ParseResult<()> {
        self.builder.set_location(position);
        self.builder.emit_u16(Opcode::BuildList, 0);
        for item in items {
            if let Expr::Starred(inner) = &item.expr {
                self.compile_expr(inner)?;
                self.builder.set_location(item.position);
                self.builder.emit(Opcode::ListExtend);
            } else {
                self.compile_expr(item)?;
                self.builder.emit_u8(Opcode::ListAppend, 1);
            }
        }
        Ok(())
    }

    /// `a < b < c` evaluates `b` once and stops at the first false comparison.
    fn compile_compare(
        &mut self,
        left: &'a ExprLoc,
        comparisons: &'a [(CmpOperator, ExprLoc)],
        position: CodeRange,
    ) -> ParseResult<()> {
        self.compile_expr(left)?;
        let (last, init) = comparisons.split_last().expect("comparison has operators");
        let mut cleanups = Vec::new();
        for (op, right) in init {
            self.compile_expr(right)?;
            self.builder.emit(Opcode::Dup);
            self.builder.emit(Opcode::Rot3);
            self.builder.set_location(position);
            self.builder.emit_u8(Opcode::CompareOp, *op as u8);
            cleanups.push(self.builder.emit_jump(Opcode::JumpIfFalseOrPop));
        }
        self.compile_expr(&last.1)?;
        self.builder.set_location(position);
        self.builder.emit_u8(Opcode::CompareOp, last.0 as u8);
        if !cleanups.is_empty() {
            let end = self.builder.emit_jump(Opcode::Jump);
            // [middle, false_result] -> [false_result]
            for label in cleanups {
                self.builder.patch_jump(label);
            }
            self.builder.adjust_stack_depth(1);
            self.builder.emit(Opcode::Rot2);
            self.builder.emit(Opcode::Pop);
            self.builder.patch_jump(end);
        }
        Ok(())
    }

    fn compile_call(&mut self, func: &'a ExprLoc, args: &'a [Arg], position: CodeRange) -> ParseResult<()> {
        if args.is_empty() && self.compile_zero_arg_super(func, position)? {
            return Ok(());
        }
        self.compile_expr(func)?;
        let needs_ex = args
            .iter()
            .any(|arg| matches!(arg, Arg::Starred(_) | Arg::DoubleStarred(_)));
        if needs_ex {
            self.builder.emit_u16(Opcode::BuildList, 0);
            for arg in args {
                match arg {
                    Arg::Positional(value) => {
                        self.compile_expr(value)?;
                        self.builder.emit_u8(Opcode::ListAppend, 1);
                    }
                    Arg::Starred(value) => {
                        self.compile_expr(value)?;
                        self.builder.set_location(value.position);
                        self.builder.emit(Opcode::ListExtend);
                    }
                    Arg::Keyword(..) | Arg::DoubleStarred(_) => {}
                }
            }
            self.builder.emit(Opcode::ListToTuple);
            let has_kwargs = args
                .iter()
                .any(|arg| matches!(arg, Arg::Keyword(..) | Arg::DoubleStarred(_)));
            if has_kwargs {
                self.builder.emit_u16(Opcode::BuildMap, 0);
                for arg in args {
                    match arg {
                        Arg::Keyword(name, value) => {
                            let name = self.builder.add_const(Const::Str(*name));
                            self.builder.emit_u16(Opcode::LoadConst, name);
                            self.compile_expr(value)?;
                            self.builder.emit_u8(Opcode::MapAdd, 1);
                        }
                        Arg::DoubleStarred(value) => {
                            self.compile_expr(value)?;
                            self.builder.set_location(value.position);
                            self.builder.emit(Opcode::DictMerge);
                        }
                        Arg::Positional(_) | Arg::Starred(_) => {}
                    }
                }
            }
            self.builder.set_location(position);
            self.builder.emit_u8(Opcode::CallEx, u8::from(has_kwargs));
            return Ok(());
        }

        let mut names = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(value) => self.compile_expr(value)?,
                Arg::Keyword(name, value) => {
                    self.compile_expr(value)?;
                    names.push(*name);
                }
                Arg::Starred(_) | Arg::DoubleStarred(_) => unreachable!("handled by CallEx"),
            }
        }
        let count = narrow(args.len(), "arguments", position)?;
        self.builder.set_location(position);
        if names.is_empty() {
            self.builder.emit_u8(Opcode::Call, count);
        } else {
            let names = self.builder.add_const(Const::Names(names));
            self.builder.emit_u16(Opcode::LoadConst, names);
            self.builder.emit_u8(Opcode::CallKw, count);
        }
        Ok(())
    }

    /// `super()` inside a method becomes `super(__class__, <first argument>)`.
    fn compile_zero_arg_super(&mut self, func: &'a ExprLoc, position: CodeRange) -> ParseResult<bool> {
        let Expr::Name(ident) = &func.expr else {
            return Ok(false);
        };
        let class_cell = StaticStrings::DunderClass.id();
        if ident.name != StaticStrings::Super.id()
            || matches!(ident.scope, NameScope::Local(_) | NameScope::Cell(_))
            || !self.scope.freevars.contains(&class_cell)
        {
            return Ok(false);
        }
        let Some(&first) = self.scope.varnames.first() else {
            return Ok(false);
        };
        self.compile_load_name(ident);
        let cell = self.cell_index(class_cell);
        self.builder.emit_u16(Opcode::LoadDeref, cell);
        if self.scope.cellvars.contains(&first) {
            let cell = self.cell_index(first);
            self.builder.emit_u16(Opcode::LoadDeref, cell);
        } else {
            self.builder.emit_u16(Opcode::LoadLocal, 0);
        }
        self.builder.set_location(position);
        self.builder.emit_u8(Opcode::Call, 2);
        Ok(true)
    }

    fn compile_fstring(&mut self, parts: &'a [FStringPart], position: CodeRange) -> ParseResult<()> {
        let mut count = 0usize;
        for part in parts {
            match part {
                FStringPart::Literal(text) => {
                    let text = self.interns.intern(text);
                    let index = self.builder.add_const(Const::Str(text));
                    self.builder.emit_u16(Opcode::LoadConst, index);
                    count += 1;
                }
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                    debug,
                } => {
                    if let Some(debug) = debug {
                        let text = self.interns.intern(debug);
                        let index = self.builder.add_const(Const::Str(text));
                        self.builder.emit_u16(Opcode::LoadConst, index);
                        count += 1;
                    }
                    self.compile_expr(expr)?;
                    let conversion = match conversion {
                        Conversion::None if debug.is_some() && spec.is_empty() => Conversion::Repr,
                        other => *other,
                    };
                    let mut flags = conversion.to_bits();
                    if !spec.is_empty() {
                        self.compile_fstring(spec, position)?;
                        flags |= FORMAT_HAS_SPEC;
                    }
                    self.builder.set_location(expr.position);
                    self.builder.emit_u8(Opcode::FormatValue, flags);
                    count += 1;
                }
            }
        }
        if count == 1 && matches!(parts.first(), Some(FStringPart::Literal(_))) {
            return Ok(());
        }
        let count = narrow(count, "f-string parts", position)?;
        self.builder.emit_u16(Opcode::BuildString, count);
        Ok(())
    }

    fn compile_comprehension(&mut self, comp: &'a Comprehension, position: CodeRange) -> ParseResult<()> {
        let name = comp.kind.name().id();
        let qualname = self.child_qualname(name);
        let mut child = Compiler::new(&mut *self.interns, &comp.scope, qualname, self.source_id);
        child.builder.set_location(position);
        match comp.kind {
            ComprehensionKind::List => child.builder.emit_u16(Opcode::BuildList, 0),
            ComprehensionKind::Set => child.builder.emit_u16(Opcode::BuildSet, 0),
            ComprehensionKind::Dict => child.builder.emit_u16(Opcode::BuildMap, 0),
            ComprehensionKind::Generator => {}
        }
        child.compile_comprehension_loop(comp, 0)?;
        if comp.kind == ComprehensionKind::Generator {
            child.builder.emit(Opcode::LoadNone);
        }
        child.builder.emit(Opcode::Return);
        let code = child.finish(CodeShape {
            name,
            kind: CodeKind::Comprehension,
            signature: Signature {
                args: 1,
                ..Signature::default()
            },
            first_line: position.start().line,
        });
        self.emit_make_function(code, 0, position)?;

        let first = &comp.generators[0];
        self.compile_expr(&first.iter)?;
        self.builder.set_location(first.iter.position);
        self.builder.emit(Opcode::GetIter);
        self.builder.set_location(position);
        self.builder.emit_u8(Opcode::Call, 1);
        Ok(())
    }

    fn compile_comprehension_loop(&mut self, comp: &'a Comprehension, index: usize) -> ParseResult<()> {
        let generator = &comp.generators[index];
        if index == 0 {
            self.builder.emit_u16(Opcode::LoadLocal, 0);
        } else {
            self.compile_expr(&generator.iter)?;
            self.builder.set_location(generator.iter.position);
            self.builder.emit(Opcode::GetIter);
        }
        let depth = self.builder.stack_depth();
        let top = self.builder.current_offset();
        let exit = self.builder.emit_jump(Opcode::ForIter);
        self.compile_store(&generator.target)?;
        for cond in &generator.ifs {
            self.compile_expr(cond)?;
            self.builder.emit_jump_to(Opcode::JumpIfFalse, top);
        }
        if index + 1 < comp.generators.len() {
            self.compile_comprehension_loop(comp, index + 1)?;
        } else {
            let position = comp.element.position;
            // the collection sits below one iterator per `for` clause
            let depth_to_collection = narrow(comp.generators.len() + 1, "comprehension clauses", position)?;
            match comp.kind {
                ComprehensionKind::List => {
                    self.compile_expr(&comp.element)?;
                    self.builder.emit_u8(Opcode::ListAppend, depth_to_collection);
                }
                ComprehensionKind::Set => {
                    self.compile_expr(&comp.element)?;
                    self.builder.emit_u8(Opcode::SetAdd, depth_to_collection);
                }
                ComprehensionKind::Dict => {
                    self.compile_expr(&comp.element)?;
                    let value = comp.value.as_ref().expect("dict comprehension has a value");
                    self.compile_expr(value)?;
                    self.builder.emit_u8(Opcode::MapAdd, depth_to_collection);
                }
                ComprehensionKind::Generator => {
                    self.compile_expr(&comp.element)?;
                    self.builder.emit(Opcode::Yield);
                    self.builder.emit(Opcode::Pop);
                }
            }
        }
        self.builder.emit_jump_to(Opcode::Jump, top);
        self.builder.patch_jump(exit);
        self.builder.set_stack_depth(depth - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::parse, prepare::prepare};

    fn compile(source: &str) -> (Code, Interns) {
        let mut interns = Interns::new();
        let mut module = parse(source, &mut interns).unwrap();
        prepare(&mut module, &interns).unwrap();
        let code = compile_module(&module, &mut interns, 0).unwrap();
        (code, interns)
    }

    fn opcodes(code: &Code) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut ip = 0;
        while ip < code.bytecode.len() {
            let op = Opcode::try_from(code.bytecode[ip]).unwrap();
            ops.push(op);
            ip += op.size();
        }
        ops
    }

    #[test]
    fn trailing_expression_is_returned() {
        let (code, _) = compile("x = 1\nx + 2\n");
        let ops = opcodes(&code);
        assert_eq!(ops.last(), Some(&Opcode::Return));
        assert!(!ops.contains(&Opcode::Pop));
    }

    #[test]
    fn functions_become_children() {
        let (code, interns) = compile("def outer():\n    def inner():\n        pass\n    return inner\n");
        assert_eq!(code.children.len(), 1);
        let outer = &code.children[0];
        assert_eq!(outer.qualname(), "outer");
        assert_eq!(outer.children[0].qualname(), "outer.<locals>.inner");
        assert_eq!(interns.get_str(outer.name()), "outer");
    }

    #[test]
    fn methods_are_qualified_by_class() {
        let (code, _) = compile("class A:\n    def f(self):\n        pass\n");
        let body = &code.children[0];
        assert_eq!(body.kind, CodeKind::ClassBody);
        assert_eq!(body.children[0].qualname(), "A.f");
    }

    #[test]
    fn try_finally_has_handlers() {
        let (code, _) = compile("try:\n    x = 1\nfinally:\n    y = 2\n");
        assert_eq!(code.exception_table.len(), 2);
        let ops = opcodes(&code);
        assert!(ops.contains(&Opcode::PushExcInfo));
        assert!(ops.contains(&Opcode::PopExceptReraise));
    }

    #[test]
    fn return_inside_finally_inlines_cleanup() {
        let (code, _) = compile("def f():\n    try:\n        return 1\n    finally:\n        print('x')\n");
        let func = &code.children[0];
        // the finally body appears three times: return path, normal path, exceptional path
        let calls = opcodes(func).iter().filter(|op| **op == Opcode::Call).count();
        assert_eq!(calls, 3);
        // the protected range ends at the return, the rest is unreachable
        assert_eq!(func.exception_table.len(), 2);
    }

    #[test]
    fn comprehension_is_called_with_iterator() {
        let (code, _) = compile("[x * 2 for x in range(3)]\n");
        let ops = opcodes(&code);
        assert!(ops.contains(&Opcode::MakeFunction));
        assert!(ops.contains(&Opcode::GetIter));
        let child = &code.children[0];
        assert_eq!(child.kind, CodeKind::Comprehension);
        assert!(opcodes(child).contains(&Opcode::ListAppend));
    }

    #[test]
    fn generator_flag_reaches_code() {
        let (code, _) = compile("def g():\n    yield 1\n");
        assert!(code.children[0].is_generator);
    }

    #[test]
    fn zero_arg_super_loads_class_cell() {
        let (code, _) = compile("class A:\n    def f(self):\n        return super().f()\n");
        let method = &code.children[0].children[0];
        let ops = opcodes(method);
        assert!(ops.contains(&Opcode::LoadDeref));
    }

    #[test]
    fn stack_depth_is_balanced() {
        let source = "\
def f(xs):
    total = 0
    for x in xs:
        with open(x) as fh:
            try:
                total += fh.read()
            except ValueError as e:
                continue
            finally:
                total -= 1
        if total > 10:
            break
    match xs:
        case [a, *rest] if a:
            return rest
        case {'k': v, **others}:
            return v
        case Point(x=0) | None:
            return 0
    return 1 < total < 5
";
        let (code, _) = compile(source);
        assert!(code.children[0].max_stack > 0);
    }
}
