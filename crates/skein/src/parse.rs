//! Recursive-descent parser from tokens to the AST in `expressions`.
//!
//! Expression parsing follows Python's precedence levels one function per level. Statements
//! are parsed line by line using the INDENT/DEDENT structure produced by the lexer. Soft keywords
//! (`match`, `case`) are recognised by lookahead.

use std::{borrow::Cow, fmt};

use crate::{
    exception_private::ExcType,
    exception_public::{CodeLoc, Exception, StackFrame},
    expressions::{
        Arg, BoolOperator, ClassDef, CmpOperator, CompFor, Comprehension, ComprehensionKind, DictItem,
        ExceptHandler, Expr, ExprLoc, FunctionDef, Identifier, ImportAlias, ImportNames, Literal, MatchCase, Module,
        Node, Operator, Param, Parameters, Pattern, ScopeInfo, Stmt, Target, Try, UnaryOperator, WithItem,
    },
    fstring::{Conversion, FStringPart},
    intern::{Interns, StaticStrings, StringId},
    lexer::{Keyword, Punct, Tok, Token, decode_escapes, tokenize},
};

/// Maximum nesting depth for AST structures during parsing.
/// Matches CPython's limit of ~200 for nested parentheses.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames, so the limit is lower.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

/// Source range of a node, used for tracebacks and error carets.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    start: CodeLoc,
    end: CodeLoc,
}

impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

impl CodeRange {
    #[must_use]
    pub const fn new(start: CodeLoc, end: CodeLoc) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `loc`.
    #[must_use]
    pub const fn point(loc: CodeLoc) -> Self {
        Self { start: loc, end: loc }
    }

    #[must_use]
    pub fn start(&self) -> CodeLoc {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> CodeLoc {
        self.end
    }

    #[must_use]
    pub(crate) fn with_end(self, end: CodeLoc) -> Self {
        Self { start: self.start, end }
    }
}

/// Errors that can occur while parsing, resolving scopes or compiling.
#[derive(Debug, Clone)]
pub enum ParseError {
    Syntax {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    Indentation {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    /// Valid Python that this engine deliberately does not implement.
    NotSupported {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
    Import {
        msg: Cow<'static, str>,
        position: CodeRange,
    },
}

impl ParseError {
    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Syntax {
            msg: msg.into(),
            position,
        }
    }

    pub(crate) fn indentation(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Indentation {
            msg: msg.into(),
            position,
        }
    }

    pub(crate) fn not_supported(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::NotSupported {
            msg: msg.into(),
            position,
        }
    }

    fn import_error(msg: impl Into<Cow<'static, str>>, position: CodeRange) -> Self {
        Self::Import {
            msg: msg.into(),
            position,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. }
            | Self::Indentation { msg, .. }
            | Self::NotSupported { msg, .. }
            | Self::Import { msg, .. } => msg,
        }
    }

    #[must_use]
    pub fn position(&self) -> CodeRange {
        match self {
            Self::Syntax { position, .. }
            | Self::Indentation { position, .. }
            | Self::NotSupported { position, .. }
            | Self::Import { position, .. } => *position,
        }
    }

    /// Converts this error into a public exception pointing at the offending source line.
    pub fn into_exception(self, filename: &str, source: &str) -> Exception {
        let exc_type = match &self {
            Self::Syntax { .. } | Self::Indentation { .. } => ExcType::SyntaxError,
            Self::NotSupported { .. } => ExcType::NotImplementedError,
            Self::Import { .. } => ExcType::ImportError,
        };
        let frame = StackFrame::from_position(self.position(), filename, source, None);
        Exception::new(exc_type, self.message().to_owned(), vec![frame])
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc = self.position().start();
        write!(f, "{} (line {})", self.message(), loc.line)
    }
}

impl std::error::Error for ParseError {}

pub(crate) type ParseResult<T> = Result<T, ParseError>;

/// Parses a whole module into statements.
pub(crate) fn parse(source: &str, interns: &mut Interns) -> ParseResult<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, interns);
    let body = parser.parse_file()?;
    Ok(Module {
        body,
        scope: ScopeInfo::default(),
    })
}

pub(crate) struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    interns: &'a mut Interns,
    /// Remaining nesting depth; parsing fails when it reaches zero.
    depth_remaining: u16,
    /// Enclosing class names, for `__private` name mangling.
    class_stack: Vec<String>,
}

const AUG_ASSIGN: &[(Punct, Operator)] = &[
    (Punct::PlusEq, Operator::Add),
    (Punct::MinusEq, Operator::Sub),
    (Punct::StarEq, Operator::Mult),
    (Punct::AtEq, Operator::MatMult),
    (Punct::SlashEq, Operator::Div),
    (Punct::DoubleSlashEq, Operator::FloorDiv),
    (Punct::PercentEq, Operator::Mod),
    (Punct::DoubleStarEq, Operator::Pow),
    (Punct::LShiftEq, Operator::LShift),
    (Punct::RShiftEq, Operator::RShift),
    (Punct::PipeEq, Operator::BitOr),
    (Punct::CaretEq, Operator::BitXor),
    (Punct::AmperEq, Operator::BitAnd),
];

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, interns: &'a mut Interns) -> Self {
        Self {
            tokens,
            pos: 0,
            interns,
            depth_remaining: MAX_NESTING_DEPTH,
            class_stack: Vec::new(),
        }
    }

    // ==========================
    // token helpers

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn start(&self) -> CodeLoc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].range.start()
    }

    fn prev_end(&self) -> CodeLoc {
        if self.pos == 0 {
            CodeLoc::default()
        } else {
            self.tokens[self.pos - 1].range.end()
        }
    }

    fn range_from(&self, start: CodeLoc) -> CodeRange {
        CodeRange::new(start, self.prev_end())
    }

    fn current_range(&self) -> CodeRange {
        self.tokens[self.pos.min(self.tokens.len() - 1)].range
    }

    fn check_punct(&self, punct: Punct) -> bool {
        *self.peek() == Tok::Punct(punct)
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        *self.peek() == Tok::Keyword(kw)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> ParseResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            let text: &'static str = punct.into();
            Err(self.error(format!("expected '{text}'")))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> ParseResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            let text: &'static str = kw.into();
            Err(self.error(format!("expected '{text}'")))
        }
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::EndOfFile => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn error(&self, msg: impl Into<Cow<'static, str>>) -> ParseError {
        ParseError::syntax(msg, self.current_range())
    }

    fn expect_raw_name(&mut self) -> ParseResult<(String, CodeRange)> {
        let range = self.current_range();
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok((name, range))
            }
            _ => Err(self.error("invalid syntax")),
        }
    }

    /// Reads a name and returns it mangled as an identifier.
    fn expect_identifier(&mut self) -> ParseResult<Identifier> {
        let (name, range) = self.expect_raw_name()?;
        let id = self.mangle(&name);
        Ok(Identifier::new(id, range))
    }

    /// Applies `__private` name mangling inside class bodies.
    fn mangle(&mut self, name: &str) -> StringId {
        if let Some(class_name) = self.class_stack.last()
            && name.starts_with("__")
            && !name.ends_with("__")
        {
            let stripped = class_name.trim_start_matches('_');
            if !stripped.is_empty() {
                let mangled = format!("_{stripped}{name}");
                return self.interns.intern(&mangled);
            }
        }
        self.interns.intern(name)
    }

    fn enter_nested(&mut self) -> ParseResult<()> {
        if let Some(remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = remaining;
            Ok(())
        } else {
            Err(self.error("too many nested parentheses"))
        }
    }

    fn exit_nested(&mut self) {
        self.depth_remaining += 1;
    }

    // ==========================
    // statements

    fn parse_file(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::EndOfFile => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(ParseError::indentation("unexpected indent", self.current_range())),
                _ => self.parse_statement_into(&mut body)?,
            }
        }
        Ok(body)
    }

    fn parse_statement_into(&mut self, out: &mut Vec<Stmt>) -> ParseResult<()> {
        match self.peek() {
            Tok::Keyword(
                Keyword::If
                | Keyword::While
                | Keyword::For
                | Keyword::Try
                | Keyword::With
                | Keyword::Def
                | Keyword::Class
                | Keyword::Async,
            )
            | Tok::Punct(Punct::At) => {
                let stmt = self.parse_compound()?;
                out.push(stmt);
                Ok(())
            }
            Tok::Name(name) if name == "match" && self.is_match_statement() => {
                let stmt = self.parse_match()?;
                out.push(stmt);
                Ok(())
            }
            _ => self.parse_simple_statements(out),
        }
    }

    fn parse_simple_statements(&mut self, out: &mut Vec<Stmt>) -> ParseResult<()> {
        loop {
            out.push(self.parse_small_statement()?);
            if self.eat_punct(Punct::Semi) {
                if matches!(self.peek(), Tok::Newline | Tok::EndOfFile) {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect_newline()
    }

    /// Parses `: NEWLINE INDENT stmts DEDENT` or `: simple_stmts`.
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct(Punct::Colon)?;
        self.enter_nested()?;
        let mut body = Vec::new();
        if matches!(self.peek(), Tok::Newline) {
            self.advance();
            if !matches!(self.peek(), Tok::Indent) {
                return Err(ParseError::indentation("expected an indented block", self.current_range()));
            }
            self.advance();
            loop {
                match self.peek() {
                    Tok::Dedent => {
                        self.advance();
                        break;
                    }
                    Tok::EndOfFile => break,
                    Tok::Newline => {
                        self.advance();
                    }
                    _ => self.parse_statement_into(&mut body)?,
                }
            }
        } else {
            self.parse_simple_statements(&mut body)?;
        }
        self.exit_nested();
        Ok(body)
    }

    fn parse_compound(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        match self.peek().clone() {
            Tok::Punct(Punct::At) => self.parse_decorated(),
            Tok::Keyword(Keyword::If) => {
                self.advance();
                self.parse_if_rest(start)
            }
            Tok::Keyword(Keyword::While) => {
                self.advance();
                let test = self.parse_named()?;
                let body = self.parse_block()?;
                let orelse = self.parse_else_block()?;
                Ok(Stmt {
                    position: self.range_from(start),
                    node: Node::While { test, body, orelse },
                })
            }
            Tok::Keyword(Keyword::For) => {
                self.advance();
                self.parse_for_rest(start)
            }
            Tok::Keyword(Keyword::Try) => self.parse_try(),
            Tok::Keyword(Keyword::With) => {
                self.advance();
                self.parse_with_rest(start)
            }
            Tok::Keyword(Keyword::Def) => self.parse_funcdef(Vec::new(), false, start),
            Tok::Keyword(Keyword::Class) => self.parse_classdef(Vec::new(), start),
            Tok::Keyword(Keyword::Async) => {
                self.advance();
                match self.peek() {
                    Tok::Keyword(Keyword::Def) => self.parse_funcdef(Vec::new(), true, start),
                    Tok::Keyword(Keyword::For | Keyword::With) => Err(ParseError::not_supported(
                        "'async for' and 'async with' are not supported",
                        self.current_range(),
                    )),
                    _ => Err(self.error("invalid syntax")),
                }
            }
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn parse_else_block(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.eat_keyword(Keyword::Else) {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_if_rest(&mut self, start: CodeLoc) -> ParseResult<Stmt> {
        let test = self.parse_named()?;
        let body = self.parse_block()?;
        let orelse = if self.check_keyword(Keyword::Elif) {
            let elif_start = self.start();
            self.advance();
            vec![self.parse_if_rest(elif_start)?]
        } else {
            self.parse_else_block()?
        };
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::If { test, body, orelse },
        })
    }

    fn parse_for_rest(&mut self, start: CodeLoc) -> ParseResult<Stmt> {
        let target_expr = self.parse_target_list()?;
        let target = self.expr_to_target(target_expr)?;
        self.expect_keyword(Keyword::In)?;
        let iter = self.parse_star_list()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn parse_try(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.expect_keyword(Keyword::Try)?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.check_keyword(Keyword::Except) {
            let handler_start = self.start();
            self.advance();
            if self.check_punct(Punct::Star) {
                return Err(ParseError::not_supported("'except*' is not supported", self.current_range()));
            }
            let (exc_type, name) = if self.check_punct(Punct::Colon) {
                (None, None)
            } else {
                let exc_type = self.parse_test()?;
                if self.check_punct(Punct::Comma) {
                    return Err(self.error("multiple exception types must be parenthesized"));
                }
                let name = if self.eat_keyword(Keyword::As) {
                    Some(self.expect_identifier()?)
                } else {
                    None
                };
                (Some(exc_type), name)
            };
            if handlers.iter().any(|h: &ExceptHandler| h.exc_type.is_none()) {
                return Err(ParseError::syntax(
                    "default 'except:' must be last",
                    self.range_from(handler_start),
                ));
            }
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body: handler_body,
                position: self.range_from(handler_start),
            });
        }
        let orelse = if self.check_keyword(Keyword::Else) {
            if handlers.is_empty() {
                return Err(self.error("expected 'except' or 'finally' block"));
            }
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finally = if self.eat_keyword(Keyword::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::Try(Box::new(Try {
                body,
                handlers,
                orelse,
                finally,
            })),
        })
    }

    fn parse_with_rest(&mut self, start: CodeLoc) -> ParseResult<Stmt> {
        let mut items = Vec::new();
        loop {
            let context = self.parse_test()?;
            let target = if self.eat_keyword(Keyword::As) {
                let expr = self.parse_target_atom()?;
                Some(self.expr_to_target(expr)?)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::With { items, body },
        })
    }

    fn parse_decorated(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let mut decorators = Vec::new();
        while self.eat_punct(Punct::At) {
            decorators.push(self.parse_named()?);
            self.expect_newline()?;
        }
        match self.peek() {
            Tok::Keyword(Keyword::Def) => self.parse_funcdef(decorators, false, start),
            Tok::Keyword(Keyword::Async) => {
                self.advance();
                self.parse_funcdef(decorators, true, start)
            }
            Tok::Keyword(Keyword::Class) => self.parse_classdef(decorators, start),
            _ => Err(self.error("expected function or class definition after decorator")),
        }
    }

    fn parse_funcdef(&mut self, decorators: Vec<ExprLoc>, is_async: bool, start: CodeLoc) -> ParseResult<Stmt> {
        self.expect_keyword(Keyword::Def)?;
        let name = self.expect_identifier()?;
        self.expect_punct(Punct::LParen)?;
        let params = self.parse_parameters(Punct::RParen, true)?;
        self.expect_punct(Punct::RParen)?;
        if self.eat_punct(Punct::Arrow) {
            self.parse_test()?;
        }
        let body = self.parse_block()?;
        let position = self.range_from(start);
        Ok(Stmt {
            position,
            node: Node::FunctionDef(Box::new(FunctionDef {
                name,
                params,
                body,
                decorators,
                is_async,
                is_lambda: false,
                position,
                scope: ScopeInfo::default(),
            })),
        })
    }

    fn parse_classdef(&mut self, decorators: Vec<ExprLoc>, start: CodeLoc) -> ParseResult<Stmt> {
        self.expect_keyword(Keyword::Class)?;
        let (raw_name, name_range) = self.expect_raw_name()?;
        let name = Identifier::new(self.mangle(&raw_name), name_range);
        let mut bases = Vec::new();
        if self.eat_punct(Punct::LParen) {
            for arg in self.parse_call_args()? {
                match arg {
                    Arg::Positional(expr) => bases.push(expr),
                    Arg::Keyword(kw, value) => {
                        if self.interns.get_str(kw) == "metaclass" {
                            return Err(ParseError::not_supported("metaclasses are not supported", value.position));
                        }
                    }
                    Arg::Starred(expr) | Arg::DoubleStarred(expr) => {
                        return Err(ParseError::not_supported(
                            "unpacking in class bases is not supported",
                            expr.position,
                        ));
                    }
                }
            }
        }
        self.class_stack.push(raw_name);
        let body = self.parse_block();
        self.class_stack.pop();
        let body = body?;
        let position = self.range_from(start);
        Ok(Stmt {
            position,
            node: Node::ClassDef(Box::new(ClassDef {
                name,
                bases,
                body,
                decorators,
                position,
                scope: ScopeInfo::default(),
            })),
        })
    }

    /// Parses a parameter list up to (not including) `close`.
    ///
    /// Lambdas pass `allow_annotations = false` since `:` ends their parameter list.
    fn parse_parameters(&mut self, close: Punct, allow_annotations: bool) -> ParseResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;
        let mut seen: Vec<StringId> = Vec::new();
        while !self.check_punct(close) {
            if self.eat_punct(Punct::Slash) {
                if seen_star || !params.posonly.is_empty() || params.args.is_empty() {
                    return Err(self.error("invalid syntax"));
                }
                params.posonly = std::mem::take(&mut params.args);
            } else if self.eat_punct(Punct::DoubleStar) {
                let ident = self.parse_param_name(allow_annotations, &mut seen)?;
                params.kwarg = Some(ident);
                self.eat_punct(Punct::Comma);
                if !self.check_punct(close) {
                    return Err(self.error("arguments cannot follow var-keyword argument"));
                }
                break;
            } else if self.eat_punct(Punct::Star) {
                if seen_star {
                    return Err(self.error("* argument may appear only once"));
                }
                seen_star = true;
                if !self.check_punct(Punct::Comma) && !self.check_punct(close) {
                    params.vararg = Some(self.parse_param_name(allow_annotations, &mut seen)?);
                }
            } else {
                let name = self.parse_param_name(allow_annotations, &mut seen)?;
                let default = if self.eat_punct(Punct::Assign) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if seen_star {
                    params.kwonly.push(Param { name, default });
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(ParseError::syntax(
                            "non-default argument follows default argument",
                            name.position,
                        ));
                    }
                    params.args.push(Param { name, default });
                }
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        if seen_star && params.vararg.is_none() && params.kwonly.is_empty() {
            return Err(self.error("named arguments must follow bare *"));
        }
        Ok(params)
    }

    fn parse_param_name(&mut self, allow_annotations: bool, seen: &mut Vec<StringId>) -> ParseResult<Identifier> {
        let ident = self.expect_identifier()?;
        if seen.contains(&ident.name) {
            let name = self.interns.get_str(ident.name).to_owned();
            return Err(ParseError::syntax(
                format!("duplicate argument '{name}' in function definition"),
                ident.position,
            ));
        }
        seen.push(ident.name);
        if allow_annotations && self.eat_punct(Punct::Colon) {
            self.parse_test()?;
        }
        Ok(ident)
    }

    fn parse_small_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let node = match self.peek().clone() {
            Tok::Keyword(Keyword::Pass) => {
                self.advance();
                Node::Pass
            }
            Tok::Keyword(Keyword::Break) => {
                self.advance();
                Node::Break
            }
            Tok::Keyword(Keyword::Continue) => {
                self.advance();
                Node::Continue
            }
            Tok::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    Node::Return(None)
                } else {
                    Node::Return(Some(self.parse_star_list()?))
                }
            }
            Tok::Keyword(Keyword::Raise) => {
                self.advance();
                if self.at_statement_end() {
                    Node::Raise { exc: None, cause: None }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat_keyword(Keyword::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    Node::Raise { exc: Some(exc), cause }
                }
            }
            Tok::Keyword(Keyword::Global) => {
                self.advance();
                Node::Global(self.parse_name_list()?)
            }
            Tok::Keyword(Keyword::Nonlocal) => {
                self.advance();
                Node::Nonlocal(self.parse_name_list()?)
            }
            Tok::Keyword(Keyword::Del) => {
                self.advance();
                let expr = self.parse_target_list()?;
                let targets = match self.expr_to_target(expr)? {
                    Target::Tuple { targets, .. } => targets,
                    target => vec![target],
                };
                if let Some(starred) = targets.iter().find(|t| matches!(t, Target::Starred(_))) {
                    return Err(ParseError::syntax("cannot delete starred", starred.position()));
                }
                Node::Del(targets)
            }
            Tok::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_punct(Punct::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                Node::Assert { test, msg }
            }
            Tok::Keyword(Keyword::Import) => {
                self.advance();
                self.parse_import()?
            }
            Tok::Keyword(Keyword::From) => {
                self.advance();
                self.parse_from_import()?
            }
            _ => return self.parse_expression_statement(),
        };
        Ok(Stmt {
            position: self.range_from(start),
            node,
        })
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Punct(Punct::Semi))
    }

    fn parse_name_list(&mut self) -> ParseResult<Vec<Identifier>> {
        let mut names = vec![self.expect_identifier()?];
        while self.eat_punct(Punct::Comma) {
            names.push(self.expect_identifier()?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> ParseResult<(String, CodeRange)> {
        let (mut name, first_range) = self.expect_raw_name()?;
        let mut range = first_range;
        while self.eat_punct(Punct::Dot) {
            let (part, part_range) = self.expect_raw_name()?;
            name.push('.');
            name.push_str(&part);
            range = range.with_end(part_range.end());
        }
        Ok((name, range))
    }

    fn parse_import(&mut self) -> ParseResult<Node> {
        let mut aliases = Vec::new();
        loop {
            let (module, range) = self.parse_dotted_name()?;
            let (bind, has_alias) = if self.eat_keyword(Keyword::As) {
                (self.expect_identifier()?, true)
            } else {
                let top = module.split('.').next().unwrap_or(&module).to_owned();
                (Identifier::new(self.interns.intern(&top), range), false)
            };
            aliases.push(ImportAlias {
                module,
                bind,
                has_alias,
            });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Node::Import(aliases))
    }

    fn parse_from_import(&mut self) -> ParseResult<Node> {
        let start = self.current_range();
        if self.check_punct(Punct::Dot) || self.check_punct(Punct::Ellipsis) {
            return Err(ParseError::import_error(
                "attempted relative import with no known parent package",
                start,
            ));
        }
        let (module, _) = self.parse_dotted_name()?;
        self.expect_keyword(Keyword::Import)?;
        if self.eat_punct(Punct::Star) {
            return Ok(Node::ImportFrom {
                module,
                names: ImportNames::Star,
            });
        }
        let parenthesized = self.eat_punct(Punct::LParen);
        let mut names = Vec::new();
        loop {
            if parenthesized && self.check_punct(Punct::RParen) {
                break;
            }
            let (name, range) = self.expect_raw_name()?;
            let attr = self.interns.intern(&name);
            let bind = if self.eat_keyword(Keyword::As) {
                self.expect_identifier()?
            } else {
                Identifier::new(attr, range)
            };
            names.push((attr, bind));
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect_punct(Punct::RParen)?;
        }
        if names.is_empty() {
            return Err(self.error("invalid syntax"));
        }
        Ok(Node::ImportFrom {
            module,
            names: ImportNames::Names(names),
        })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let first = self.parse_star_list_or_yield()?;

        if let Tok::Punct(punct) = *self.peek()
            && let Some(&(_, op)) = AUG_ASSIGN.iter().find(|(p, _)| *p == punct)
        {
            self.advance();
            let target = self.expr_to_target(first)?;
            if matches!(target, Target::Tuple { .. } | Target::Starred(_)) {
                return Err(ParseError::syntax(
                    "'tuple' is an illegal expression for augmented assignment",
                    target.position(),
                ));
            }
            let value = self.parse_star_list_or_yield()?;
            return Ok(Stmt {
                position: self.range_from(start),
                node: Node::AugAssign { target, op, value },
            });
        }

        if self.eat_punct(Punct::Colon) {
            let target = self.expr_to_target(first)?;
            if matches!(target, Target::Tuple { .. } | Target::Starred(_)) {
                return Err(ParseError::syntax(
                    "only single target (not tuple) can be annotated",
                    target.position(),
                ));
            }
            self.parse_test()?;
            let value = if self.eat_punct(Punct::Assign) {
                Some(self.parse_star_list_or_yield()?)
            } else {
                None
            };
            return Ok(Stmt {
                position: self.range_from(start),
                node: Node::AnnAssign { target, value },
            });
        }

        if self.check_punct(Punct::Assign) {
            let mut exprs = vec![first];
            while self.eat_punct(Punct::Assign) {
                exprs.push(self.parse_star_list_or_yield()?);
            }
            let value = exprs.pop().expect("at least two expressions in an assignment");
            let targets = exprs
                .into_iter()
                .map(|e| self.expr_to_target(e))
                .collect::<ParseResult<Vec<_>>>()?;
            return Ok(Stmt {
                position: self.range_from(start),
                node: Node::Assign { targets, value },
            });
        }

        if let Expr::Starred(_) = first.expr {
            return Err(ParseError::syntax("can't use starred expression here", first.position));
        }
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::Expr(first),
        })
    }

    fn expr_to_target(&self, expr: ExprLoc) -> ParseResult<Target> {
        let position = expr.position;
        match expr.expr {
            Expr::Name(ident) => Ok(Target::Name(ident)),
            Expr::Attribute { object, attr } => Ok(Target::Attribute {
                object: *object,
                attr,
                position,
            }),
            Expr::Subscript { object, index } => Ok(Target::Subscript {
                object: *object,
                index: *index,
                position,
            }),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets = items
                    .into_iter()
                    .map(|e| self.expr_to_target(e))
                    .collect::<ParseResult<Vec<_>>>()?;
                if targets.iter().filter(|t| matches!(t, Target::Starred(_))).count() > 1 {
                    return Err(ParseError::syntax(
                        "multiple starred expressions in assignment",
                        position,
                    ));
                }
                Ok(Target::Tuple { targets, position })
            }
            Expr::Starred(inner) => Ok(Target::Starred(Box::new(self.expr_to_target(*inner)?))),
            other => Err(ParseError::syntax(
                format!("cannot assign to {}", describe_expr(&other)),
                position,
            )),
        }
    }

    // ==========================
    // match statements

    /// `match` is a soft keyword: treat it as a statement only when the line ends in `:`
    /// and opens an indented block.
    fn is_match_statement(&self) -> bool {
        if matches!(
            self.peek_at(1),
            Tok::Newline
                | Tok::EndOfFile
                | Tok::Punct(Punct::Assign | Punct::Dot | Punct::Colon | Punct::Comma | Punct::RParen)
        ) {
            return false;
        }
        if let Tok::Punct(p) = self.peek_at(1)
            && AUG_ASSIGN.iter().any(|(a, _)| a == p)
        {
            return false;
        }
        let mut i = self.pos + 1;
        while i < self.tokens.len() && !matches!(self.tokens[i].tok, Tok::Newline | Tok::EndOfFile) {
            i += 1;
        }
        i > self.pos + 1
            && self.tokens[i - 1].tok == Tok::Punct(Punct::Colon)
            && matches!(self.tokens.get(i + 1).map(|t| &t.tok), Some(Tok::Indent))
    }

    fn parse_match(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        let subject = self.parse_star_list()?;
        self.expect_punct(Punct::Colon)?;
        self.expect_newline()?;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(ParseError::indentation("expected an indented block", self.current_range()));
        }
        self.advance();
        let mut cases = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    break;
                }
                Tok::EndOfFile => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Name(name) if name == "case" => cases.push(self.parse_case()?),
                _ => return Err(self.error("expected 'case' block")),
            }
        }
        Ok(Stmt {
            position: self.range_from(start),
            node: Node::Match { subject, cases },
        })
    }

    fn parse_case(&mut self) -> ParseResult<MatchCase> {
        let start = self.start();
        self.advance();
        let first = self.parse_as_pattern()?;
        let pattern = if self.check_punct(Punct::Comma) {
            let mut items = vec![first];
            while self.eat_punct(Punct::Comma) {
                if self.check_punct(Punct::Colon) || self.check_keyword(Keyword::If) {
                    break;
                }
                items.push(self.parse_as_pattern()?);
            }
            Pattern::Sequence(items)
        } else {
            first
        };
        let mut names = Vec::new();
        pattern.capture_names(&mut names);
        for (index, name) in names.iter().enumerate() {
            if names[..index].iter().any(|earlier| earlier.name == name.name) {
                return Err(ParseError::syntax(
                    format!(
                        "multiple assignments to name '{}' in pattern",
                        self.interns.get_str(name.name)
                    ),
                    name.position,
                ));
            }
        }
        let guard = if self.eat_keyword(Keyword::If) {
            Some(self.parse_named()?)
        } else {
            None
        };
        let position = self.range_from(start);
        let body = self.parse_block()?;
        Ok(MatchCase {
            pattern,
            guard,
            body,
            position,
        })
    }

    fn parse_as_pattern(&mut self) -> ParseResult<Pattern> {
        let pattern = self.parse_or_pattern()?;
        if self.eat_keyword(Keyword::As) {
            let name = self.expect_identifier()?;
            if self.interns.get_str(name.name) == "_" {
                return Err(ParseError::syntax("cannot use '_' as a target", name.position));
            }
            return Ok(Pattern::As {
                pattern: Box::new(pattern),
                name,
            });
        }
        Ok(pattern)
    }

    fn parse_or_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.start();
        let first = self.parse_closed_pattern()?;
        if !self.check_punct(Punct::Pipe) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat_punct(Punct::Pipe) {
            alternatives.push(self.parse_closed_pattern()?);
        }
        let bound = |pattern: &Pattern| {
            let mut names = Vec::new();
            pattern.capture_names(&mut names);
            let mut ids: Vec<_> = names.into_iter().map(|name| name.name).collect();
            ids.sort_unstable();
            ids
        };
        let expected = bound(&alternatives[0]);
        if alternatives[1..].iter().any(|alternative| bound(alternative) != expected) {
            return Err(ParseError::syntax(
                "alternative patterns bind different names",
                self.range_from(start),
            ));
        }
        Ok(Pattern::Or(alternatives))
    }

    fn parse_closed_pattern(&mut self) -> ParseResult<Pattern> {
        self.enter_nested()?;
        let result = self.parse_closed_pattern_inner();
        self.exit_nested();
        result
    }

    fn parse_closed_pattern_inner(&mut self) -> ParseResult<Pattern> {
        let start = self.start();
        match self.peek().clone() {
            Tok::Keyword(Keyword::None) => {
                self.advance();
                Ok(Pattern::Singleton(Literal::None))
            }
            Tok::Keyword(Keyword::True) => {
                self.advance();
                Ok(Pattern::Singleton(Literal::Bool(true)))
            }
            Tok::Keyword(Keyword::False) => {
                self.advance();
                Ok(Pattern::Singleton(Literal::Bool(false)))
            }
            Tok::Int(_) | Tok::BigInt(_) | Tok::Float(_) | Tok::Str(_) | Tok::Bytes(_) | Tok::Punct(Punct::Minus) => {
                let value = self.parse_arith()?;
                Ok(Pattern::Value(value))
            }
            Tok::FString { .. } => Err(self.error("patterns may only match literals and attribute lookups")),
            Tok::Punct(Punct::Star) => {
                self.advance();
                let name = self.expect_identifier()?;
                if self.interns.get_str(name.name) == "_" {
                    Ok(Pattern::Star(None))
                } else {
                    Ok(Pattern::Star(Some(name)))
                }
            }
            Tok::Punct(Punct::LParen) => {
                self.advance();
                if self.eat_punct(Punct::RParen) {
                    return Ok(Pattern::Sequence(Vec::new()));
                }
                let first = self.parse_as_pattern()?;
                if self.eat_punct(Punct::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_punct(Punct::Comma) {
                    if self.check_punct(Punct::RParen) {
                        break;
                    }
                    items.push(self.parse_as_pattern()?);
                }
                self.expect_punct(Punct::RParen)?;
                Ok(Pattern::Sequence(items))
            }
            Tok::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check_punct(Punct::RBracket) {
                    items.push(self.parse_as_pattern()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBracket)?;
                Ok(Pattern::Sequence(items))
            }
            Tok::Punct(Punct::LBrace) => self.parse_mapping_pattern(),
            Tok::Name(name) => {
                let ident = self.expect_identifier()?;
                if self.check_punct(Punct::Dot) || self.check_punct(Punct::LParen) {
                    let mut value = ExprLoc::new(ident.position, Expr::Name(ident));
                    while self.eat_punct(Punct::Dot) {
                        let (attr, _) = self.expect_raw_name()?;
                        let attr = self.interns.intern(&attr);
                        value = ExprLoc::new(
                            self.range_from(start),
                            Expr::Attribute {
                                object: Box::new(value),
                                attr,
                            },
                        );
                    }
                    if self.eat_punct(Punct::LParen) {
                        return self.parse_class_pattern(value);
                    }
                    return Ok(Pattern::Value(value));
                }
                if name == "_" {
                    Ok(Pattern::Wildcard)
                } else {
                    Ok(Pattern::Capture(ident))
                }
            }
            _ => Err(self.error("invalid pattern")),
        }
    }

    fn parse_mapping_pattern(&mut self) -> ParseResult<Pattern> {
        self.expect_punct(Punct::LBrace)?;
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !self.check_punct(Punct::RBrace) {
            if self.eat_punct(Punct::DoubleStar) {
                rest = Some(self.expect_identifier()?);
                self.eat_punct(Punct::Comma);
                break;
            }
            let key = match self.parse_closed_pattern()? {
                Pattern::Value(expr) => expr,
                Pattern::Singleton(lit) => ExprLoc::new(self.range_from(self.start()), Expr::Literal(lit)),
                _ => return Err(self.error("mapping pattern keys may only match literals and attribute lookups")),
            };
            self.expect_punct(Punct::Colon)?;
            keys.push(key);
            patterns.push(self.parse_as_pattern()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(Pattern::Mapping { keys, patterns, rest })
    }

    fn parse_class_pattern(&mut self, cls: ExprLoc) -> ParseResult<Pattern> {
        let mut patterns = Vec::new();
        let mut kwd_names = Vec::new();
        let mut kwd_patterns = Vec::new();
        while !self.check_punct(Punct::RParen) {
            if matches!(self.peek(), Tok::Name(_)) && *self.peek_at(1) == Tok::Punct(Punct::Assign) {
                let (name, _) = self.expect_raw_name()?;
                self.advance();
                kwd_names.push(self.interns.intern(&name));
                kwd_patterns.push(self.parse_as_pattern()?);
            } else {
                if !kwd_names.is_empty() {
                    return Err(self.error("positional patterns follow keyword patterns"));
                }
                patterns.push(self.parse_as_pattern()?);
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(Pattern::Class {
            cls,
            patterns,
            kwd_names,
            kwd_patterns,
        })
    }

    // ==========================
    // expressions

    /// `a, *b, c` style lists used on either side of an assignment; a trailing comma makes a tuple.
    fn parse_star_list(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.parse_star_or_named()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn parse_star_list_or_yield(&mut self) -> ParseResult<ExprLoc> {
        if self.check_keyword(Keyword::Yield) {
            self.parse_yield()
        } else {
            self.parse_star_list()
        }
    }

    fn parse_star_or_named(&mut self) -> ParseResult<ExprLoc> {
        if self.check_punct(Punct::Star) {
            let start = self.start();
            self.advance();
            let inner = self.parse_bitor()?;
            Ok(ExprLoc::new(self.range_from(start), Expr::Starred(Box::new(inner))))
        } else {
            self.parse_named()
        }
    }

    /// Targets of `for` and `del`: parsed at `|` precedence so `in` is not consumed.
    fn parse_target_list(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.parse_target_atom()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_target_atom()?);
        }
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn parse_target_atom(&mut self) -> ParseResult<ExprLoc> {
        if self.check_punct(Punct::Star) {
            let start = self.start();
            self.advance();
            let inner = self.parse_bitor()?;
            Ok(ExprLoc::new(self.range_from(start), Expr::Starred(Box::new(inner))))
        } else {
            self.parse_bitor()
        }
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(_)
            | Tok::Int(_)
            | Tok::BigInt(_)
            | Tok::Float(_)
            | Tok::Str(_)
            | Tok::Bytes(_)
            | Tok::FString { .. } => true,
            Tok::Keyword(kw) => matches!(
                kw,
                Keyword::None
                    | Keyword::True
                    | Keyword::False
                    | Keyword::Not
                    | Keyword::Lambda
                    | Keyword::Await
                    | Keyword::Yield
            ),
            Tok::Punct(p) => matches!(
                p,
                Punct::LParen
                    | Punct::LBracket
                    | Punct::LBrace
                    | Punct::Minus
                    | Punct::Plus
                    | Punct::Tilde
                    | Punct::Star
                    | Punct::Ellipsis
            ),
            _ => false,
        }
    }

    fn parse_yield(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.expect_keyword(Keyword::Yield)?;
        if self.eat_keyword(Keyword::From) {
            let value = self.parse_test()?;
            return Ok(ExprLoc::new(self.range_from(start), Expr::YieldFrom(Box::new(value))));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_star_list()?))
        } else {
            None
        };
        Ok(ExprLoc::new(self.range_from(start), Expr::Yield(value)))
    }

    /// `name := value` or a plain test.
    fn parse_named(&mut self) -> ParseResult<ExprLoc> {
        if matches!(self.peek(), Tok::Name(_)) && *self.peek_at(1) == Tok::Punct(Punct::Walrus) {
            let start = self.start();
            let target = self.expect_identifier()?;
            self.advance();
            let value = self.parse_test()?;
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::Named {
                    target,
                    value: Box::new(value),
                },
            ));
        }
        self.parse_test()
    }

    pub(crate) fn parse_test(&mut self) -> ParseResult<ExprLoc> {
        self.enter_nested()?;
        let result = self.parse_test_inner();
        self.exit_nested();
        result
    }

    fn parse_test_inner(&mut self) -> ParseResult<ExprLoc> {
        if self.check_keyword(Keyword::Lambda) {
            return self.parse_lambda();
        }
        let start = self.start();
        let body = self.parse_or_test()?;
        if self.eat_keyword(Keyword::If) {
            let test = self.parse_or_test()?;
            self.expect_keyword(Keyword::Else)?;
            let orelse = self.parse_test()?;
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::IfElse {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.expect_keyword(Keyword::Lambda)?;
        let params = self.parse_parameters(Punct::Colon, false)?;
        self.expect_punct(Punct::Colon)?;
        let body = self.parse_test()?;
        let position = self.range_from(start);
        let body_position = body.position;
        let func = FunctionDef {
            name: Identifier::new(StaticStrings::Lambda.id(), position),
            params,
            body: vec![Stmt {
                position: body_position,
                node: Node::Return(Some(body)),
            }],
            decorators: Vec::new(),
            is_async: false,
            is_lambda: true,
            position,
            scope: ScopeInfo::default(),
        };
        Ok(ExprLoc::new(position, Expr::Lambda(Box::new(func))))
    }

    fn parse_or_test(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.parse_and_test()?;
        if !self.check_keyword(Keyword::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(Keyword::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::BoolOp {
                op: BoolOperator::Or,
                values,
            },
        ))
    }

    fn parse_and_test(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.parse_not_test()?;
        if !self.check_keyword(Keyword::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(Keyword::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::BoolOp {
                op: BoolOperator::And,
                values,
            },
        ))
    }

    fn parse_not_test(&mut self) -> ParseResult<ExprLoc> {
        if self.check_keyword(Keyword::Not) {
            let start = self.start();
            self.advance();
            self.enter_nested()?;
            let operand = self.parse_not_test();
            self.exit_nested();
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::UnaryOp {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand?),
                },
            ));
        }
        self.parse_comparison()
    }

    fn comparison_operator(&mut self) -> Option<CmpOperator> {
        let op = match self.peek() {
            Tok::Punct(Punct::Less) => CmpOperator::Lt,
            Tok::Punct(Punct::Greater) => CmpOperator::Gt,
            Tok::Punct(Punct::EqEq) => CmpOperator::Eq,
            Tok::Punct(Punct::NotEq) => CmpOperator::NotEq,
            Tok::Punct(Punct::LessEq) => CmpOperator::LtE,
            Tok::Punct(Punct::GreaterEq) => CmpOperator::GtE,
            Tok::Keyword(Keyword::In) => CmpOperator::In,
            Tok::Keyword(Keyword::Not) if *self.peek_at(1) == Tok::Keyword(Keyword::In) => {
                self.advance();
                CmpOperator::NotIn
            }
            Tok::Keyword(Keyword::Is) => {
                if *self.peek_at(1) == Tok::Keyword(Keyword::Not) {
                    self.advance();
                    CmpOperator::IsNot
                } else {
                    CmpOperator::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let left = self.parse_bitor()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_operator() {
            comparisons.push((op, self.parse_bitor()?));
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::Compare {
                left: Box::new(left),
                comparisons,
            },
        ))
    }

    /// Left-associative binary operator level.
    fn parse_binary_level(
        &mut self,
        ops: &[(Punct, Operator)],
        next: fn(&mut Self) -> ParseResult<ExprLoc>,
    ) -> ParseResult<ExprLoc> {
        let start = self.start();
        let mut left = next(self)?;
        loop {
            let Tok::Punct(punct) = *self.peek() else { break };
            let Some(&(_, op)) = ops.iter().find(|(p, _)| *p == punct) else {
                break;
            };
            self.advance();
            let right = next(self)?;
            left = ExprLoc::new(
                self.range_from(start),
                Expr::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            );
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(&[(Punct::Pipe, Operator::BitOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(&[(Punct::Caret, Operator::BitXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(&[(Punct::Amper, Operator::BitAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(
            &[(Punct::LShift, Operator::LShift), (Punct::RShift, Operator::RShift)],
            Self::parse_arith,
        )
    }

    fn parse_arith(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(
            &[(Punct::Plus, Operator::Add), (Punct::Minus, Operator::Sub)],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> ParseResult<ExprLoc> {
        self.parse_binary_level(
            &[
                (Punct::Star, Operator::Mult),
                (Punct::Slash, Operator::Div),
                (Punct::DoubleSlash, Operator::FloorDiv),
                (Punct::Percent, Operator::Mod),
                (Punct::At, Operator::MatMult),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> ParseResult<ExprLoc> {
        let op = match self.peek() {
            Tok::Punct(Punct::Minus) => UnaryOperator::Neg,
            Tok::Punct(Punct::Plus) => UnaryOperator::Pos,
            Tok::Punct(Punct::Tilde) => UnaryOperator::Invert,
            _ => return self.parse_power(),
        };
        let start = self.start();
        self.advance();
        self.enter_nested()?;
        let operand = self.parse_factor();
        self.exit_nested();
        let operand = operand?;
        // fold `-<number>` so negative literals stay constants
        if op == UnaryOperator::Neg
            && let Expr::Literal(lit) = &operand.expr
        {
            let folded = match lit {
                Literal::Int(i) => i.checked_neg().map(Literal::Int),
                Literal::BigInt(b) => Some(Literal::BigInt(-b.clone())),
                Literal::Float(f) => Some(Literal::Float(-f)),
                _ => None,
            };
            if let Some(lit) = folded {
                return Ok(ExprLoc::new(self.range_from(start), Expr::Literal(lit)));
            }
        }
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn parse_power(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let base = if self.eat_keyword(Keyword::Await) {
            let inner = self.parse_primary()?;
            ExprLoc::new(self.range_from(start), Expr::Await(Box::new(inner)))
        } else {
            self.parse_primary()?
        };
        if self.eat_punct(Punct::DoubleStar) {
            self.enter_nested()?;
            let exponent = self.parse_factor();
            self.exit_nested();
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::BinOp {
                    left: Box::new(base),
                    op: Operator::Pow,
                    right: Box::new(exponent?),
                },
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let (name, _) = self.expect_raw_name()?;
                let attr = self.mangle(&name);
                expr = ExprLoc::new(
                    self.range_from(start),
                    Expr::Attribute {
                        object: Box::new(expr),
                        attr,
                    },
                );
            } else if self.eat_punct(Punct::LParen) {
                self.enter_nested()?;
                let args = self.parse_call_args();
                self.exit_nested();
                expr = ExprLoc::new(
                    self.range_from(start),
                    Expr::Call {
                        func: Box::new(expr),
                        args: args?,
                    },
                );
            } else if self.eat_punct(Punct::LBracket) {
                self.enter_nested()?;
                let index = self.parse_subscript();
                self.exit_nested();
                let index = index?;
                self.expect_punct(Punct::RBracket)?;
                expr = ExprLoc::new(
                    self.range_from(start),
                    Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Parses call arguments after `(`, consuming the closing `)`.
    fn parse_call_args(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check_punct(Punct::RParen) {
            let arg_start = self.start();
            if self.eat_punct(Punct::DoubleStar) {
                args.push(Arg::DoubleStarred(self.parse_test()?));
                seen_keyword = true;
            } else if self.eat_punct(Punct::Star) {
                args.push(Arg::Starred(self.parse_test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && *self.peek_at(1) == Tok::Punct(Punct::Assign) {
                let (name, _) = self.expect_raw_name()?;
                self.advance();
                let name = self.interns.intern(&name);
                let value = self.parse_test()?;
                if args.iter().any(|a| matches!(a, Arg::Keyword(k, _) if *k == name)) {
                    return Err(ParseError::syntax(
                        format!("keyword argument repeated: {}", self.interns.get_str(name)),
                        self.range_from(arg_start),
                    ));
                }
                args.push(Arg::Keyword(name, value));
                seen_keyword = true;
            } else {
                let value = self.parse_named()?;
                if self.check_keyword(Keyword::For) {
                    let genexp = self.parse_comprehension_tail(ComprehensionKind::Generator, value, None, arg_start)?;
                    if !args.is_empty() || !self.check_punct(Punct::RParen) {
                        return Err(ParseError::syntax(
                            "Generator expression must be parenthesized",
                            genexp.position,
                        ));
                    }
                    args.push(Arg::Positional(genexp));
                    break;
                }
                if seen_keyword {
                    return Err(ParseError::syntax(
                        "positional argument follows keyword argument",
                        value.position,
                    ));
                }
                args.push(Arg::Positional(value));
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    fn parse_subscript(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.parse_slice_item()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn parse_slice_item(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let lower = if self.check_punct(Punct::Colon) {
            None
        } else {
            let expr = self.parse_star_or_named()?;
            if !self.check_punct(Punct::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_punct(Punct::Colon)?;
        let upper = if matches!(self.peek(), Tok::Punct(Punct::Colon | Punct::Comma | Punct::RBracket)) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_punct(Punct::Colon) {
            if matches!(self.peek(), Tok::Punct(Punct::Comma | Punct::RBracket)) {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(ExprLoc::new(self.range_from(start), Expr::Slice { lower, upper, step }))
    }

    fn parse_atom(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let range = self.current_range();
        let expr = match self.peek().clone() {
            Tok::Name(_) => Expr::Name(self.expect_identifier()?),
            Tok::Int(i) => {
                self.advance();
                Expr::Literal(Literal::Int(i))
            }
            Tok::BigInt(b) => {
                self.advance();
                Expr::Literal(Literal::BigInt(b))
            }
            Tok::Float(f) => {
                self.advance();
                Expr::Literal(Literal::Float(f))
            }
            Tok::Str(_) | Tok::Bytes(_) | Tok::FString { .. } => return self.parse_strings(),
            Tok::Keyword(Keyword::None) => {
                self.advance();
                Expr::Literal(Literal::None)
            }
            Tok::Keyword(Keyword::True) => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            Tok::Keyword(Keyword::False) => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }
            Tok::Punct(Punct::Ellipsis) => {
                self.advance();
                Expr::Literal(Literal::Ellipsis)
            }
            Tok::Punct(Punct::LParen) => {
                self.advance();
                self.enter_nested()?;
                let result = self.parse_paren_rest(start);
                self.exit_nested();
                return result;
            }
            Tok::Punct(Punct::LBracket) => {
                self.advance();
                self.enter_nested()?;
                let result = self.parse_list_rest(start);
                self.exit_nested();
                return result;
            }
            Tok::Punct(Punct::LBrace) => {
                self.advance();
                self.enter_nested()?;
                let result = self.parse_brace_rest(start);
                self.exit_nested();
                return result;
            }
            Tok::Keyword(Keyword::Yield) => {
                return Err(ParseError::syntax("'yield' outside parentheses is not allowed here", range));
            }
            Tok::Indent => return Err(ParseError::indentation("unexpected indent", range)),
            Tok::Newline | Tok::EndOfFile => return Err(ParseError::syntax("invalid syntax", range)),
            _ => return Err(ParseError::syntax("invalid syntax", range)),
        };
        Ok(ExprLoc::new(self.range_from(start), expr))
    }

    fn parse_paren_rest(&mut self, start: CodeLoc) -> ParseResult<ExprLoc> {
        if self.eat_punct(Punct::RParen) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(Vec::new())));
        }
        if self.check_keyword(Keyword::Yield) {
            let value = self.parse_yield()?;
            self.expect_punct(Punct::RParen)?;
            return Ok(value);
        }
        let first = self.parse_star_or_named()?;
        if self.check_keyword(Keyword::For) {
            let genexp = self.parse_comprehension_tail(ComprehensionKind::Generator, first, None, start)?;
            self.expect_punct(Punct::RParen)?;
            return Ok(ExprLoc::new(self.range_from(start), genexp.expr));
        }
        if self.eat_punct(Punct::RParen) {
            if let Expr::Starred(_) = first.expr {
                return Err(ParseError::syntax("cannot use starred expression here", first.position));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RParen) {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_punct(Punct::RParen)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn parse_list_rest(&mut self, start: CodeLoc) -> ParseResult<ExprLoc> {
        if self.eat_punct(Punct::RBracket) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::List(Vec::new())));
        }
        let first = self.parse_star_or_named()?;
        if self.check_keyword(Keyword::For) {
            let comp = self.parse_comprehension_tail(ComprehensionKind::List, first, None, start)?;
            self.expect_punct(Punct::RBracket)?;
            return Ok(ExprLoc::new(self.range_from(start), comp.expr));
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_punct(Punct::RBracket)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::List(items)))
    }

    fn parse_brace_rest(&mut self, start: CodeLoc) -> ParseResult<ExprLoc> {
        if self.eat_punct(Punct::RBrace) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::Dict(Vec::new())));
        }
        if self.check_punct(Punct::DoubleStar) {
            return self.parse_dict_items(start, Vec::new());
        }
        let first = self.parse_star_or_named()?;
        if self.eat_punct(Punct::Colon) {
            let value = self.parse_test()?;
            if self.check_keyword(Keyword::For) {
                let comp = self.parse_comprehension_tail(ComprehensionKind::Dict, first, Some(value), start)?;
                self.expect_punct(Punct::RBrace)?;
                return Ok(ExprLoc::new(self.range_from(start), comp.expr));
            }
            let items = vec![DictItem::Pair(first, value)];
            if self.eat_punct(Punct::Comma) {
                return self.parse_dict_items(start, items);
            }
            self.expect_punct(Punct::RBrace)?;
            return Ok(ExprLoc::new(self.range_from(start), Expr::Dict(items)));
        }
        if self.check_keyword(Keyword::For) {
            let comp = self.parse_comprehension_tail(ComprehensionKind::Set, first, None, start)?;
            self.expect_punct(Punct::RBrace)?;
            return Ok(ExprLoc::new(self.range_from(start), comp.expr));
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBrace) {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::Set(items)))
    }

    fn parse_dict_items(&mut self, start: CodeLoc, mut items: Vec<DictItem>) -> ParseResult<ExprLoc> {
        while !self.check_punct(Punct::RBrace) {
            if self.eat_punct(Punct::DoubleStar) {
                items.push(DictItem::Unpack(self.parse_bitor()?));
            } else {
                let key = self.parse_test()?;
                self.expect_punct(Punct::Colon)?;
                let value = self.parse_test()?;
                items.push(DictItem::Pair(key, value));
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::Dict(items)))
    }

    fn parse_comprehension_tail(
        &mut self,
        kind: ComprehensionKind,
        element: ExprLoc,
        value: Option<ExprLoc>,
        start: CodeLoc,
    ) -> ParseResult<ExprLoc> {
        if let Expr::Starred(_) = element.expr {
            return Err(ParseError::syntax(
                "iterable unpacking cannot be used in comprehension",
                element.position,
            ));
        }
        let mut generators = Vec::new();
        while self.eat_keyword(Keyword::For) {
            let target_expr = self.parse_target_list()?;
            let target = self.expr_to_target(target_expr)?;
            self.expect_keyword(Keyword::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat_keyword(Keyword::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(CompFor { target, iter, ifs });
            if self.check_keyword(Keyword::Async) {
                return Err(ParseError::not_supported(
                    "asynchronous comprehensions are not supported",
                    self.current_range(),
                ));
            }
        }
        let comp = Comprehension {
            kind,
            element,
            value,
            generators,
            scope: ScopeInfo::default(),
        };
        Ok(ExprLoc::new(self.range_from(start), Expr::Comprehension(Box::new(comp))))
    }

    /// Concatenates adjacent string, bytes and f-string literals.
    fn parse_strings(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut has_str = false;
        let mut has_fstring = false;
        loop {
            let range = self.current_range();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    has_str = true;
                    push_literal(&mut parts, &s);
                }
                Tok::FString { body, raw } => {
                    self.advance();
                    has_str = true;
                    has_fstring = true;
                    let mut chars = body.chars().collect::<Vec<_>>().into_iter().peekable();
                    let fparts = self.parse_fstring_parts(&mut chars, raw, false, range)?;
                    for part in fparts {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                Tok::Bytes(b) => {
                    self.advance();
                    bytes.get_or_insert_with(Vec::new).extend_from_slice(&b);
                }
                _ => break,
            }
        }
        let position = self.range_from(start);
        if has_str && bytes.is_some() {
            return Err(ParseError::syntax("cannot mix bytes and nonbytes literals", position));
        }
        let expr = if let Some(bytes) = bytes {
            Expr::Literal(Literal::Bytes(bytes))
        } else if has_fstring {
            Expr::FString(parts)
        } else {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            Expr::Literal(Literal::Str(self.interns.intern(&text)))
        };
        Ok(ExprLoc::new(position, expr))
    }

    /// Splits an f-string body into literal text and replacement fields.
    ///
    /// With `in_spec` set, parsing stops before the `}` closing the enclosing field.
    fn parse_fstring_parts(
        &mut self,
        chars: &mut std::iter::Peekable<std::vec::IntoIter<char>>,
        raw: bool,
        in_spec: bool,
        range: CodeRange,
    ) -> ParseResult<Vec<FStringPart>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let flush = |literal: &mut String, parts: &mut Vec<FStringPart>| {
            if !literal.is_empty() {
                let text = if raw { std::mem::take(literal) } else { decode_escapes(literal) };
                literal.clear();
                push_literal(parts, &text);
            }
        };
        while let Some(&c) = chars.peek() {
            match c {
                '{' => {
                    chars.next();
                    if !in_spec && chars.peek() == Some(&'{') {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    flush(&mut literal, &mut parts);
                    parts.push(self.parse_fstring_field(chars, raw, range)?);
                }
                '}' => {
                    if in_spec {
                        break;
                    }
                    chars.next();
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(ParseError::syntax("f-string: single '}' is not allowed", range));
                    }
                }
                '\\' if !raw => {
                    chars.next();
                    literal.push('\\');
                    if let Some(next) = chars.next() {
                        literal.push(next);
                    }
                }
                _ => {
                    chars.next();
                    literal.push(c);
                }
            }
        }
        flush(&mut literal, &mut parts);
        Ok(parts)
    }

    fn parse_fstring_field(
        &mut self,
        chars: &mut std::iter::Peekable<std::vec::IntoIter<char>>,
        raw: bool,
        range: CodeRange,
    ) -> ParseResult<FStringPart> {
        let mut text = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut debug = false;
        while let Some(&c) = chars.peek() {
            if let Some(q) = quote {
                text.push(c);
                chars.next();
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' | ':' if depth == 0 => break,
                '!' if depth == 0 => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() != Some(&'=') {
                        break;
                    }
                }
                '=' if depth == 0 => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let prev = text.trim_end().chars().last();
                    let next = lookahead.peek().copied();
                    if !matches!(prev, Some('=' | '!' | '<' | '>')) && !matches!(next, Some('=')) {
                        let mut rest = lookahead.clone();
                        while rest.peek().is_some_and(|c| c.is_whitespace()) {
                            rest.next();
                        }
                        if matches!(rest.peek(), Some('}' | '!' | ':') | None) {
                            text.push('=');
                            chars.next();
                            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                                text.push(chars.next().unwrap_or(' '));
                            }
                            debug = true;
                            break;
                        }
                    }
                }
                _ => {}
            }
            text.push(c);
            chars.next();
        }

        let debug_text = debug.then(|| text.clone());
        let expr_text = if debug {
            let trimmed = text.trim_end();
            trimmed[..trimmed.len() - 1].to_owned()
        } else {
            text
        };
        if expr_text.trim().is_empty() {
            return Err(ParseError::syntax("f-string: empty expression not allowed", range));
        }
        let expr = self.parse_fstring_expression(&expr_text, range)?;

        let mut conversion = if debug { Conversion::Repr } else { Conversion::None };
        if chars.peek() == Some(&'!') {
            chars.next();
            conversion = match chars.next() {
                Some('s') => Conversion::Str,
                Some('r') => Conversion::Repr,
                Some('a') => Conversion::Ascii,
                _ => {
                    return Err(ParseError::syntax(
                        "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                        range,
                    ));
                }
            };
        }
        let mut spec = Vec::new();
        if chars.peek() == Some(&':') {
            chars.next();
            spec = self.parse_fstring_parts(chars, raw, true, range)?;
            if debug && conversion == Conversion::Repr && !spec.is_empty() {
                conversion = Conversion::None;
            }
        }
        if chars.next() != Some('}') {
            return Err(ParseError::syntax("f-string: expecting '}'", range));
        }
        Ok(FStringPart::Field {
            expr: Box::new(expr),
            conversion,
            spec,
            debug: debug_text,
        })
    }

    /// Parses the expression inside a replacement field; every node gets the f-string's range.
    fn parse_fstring_expression(&mut self, text: &str, range: CodeRange) -> ParseResult<ExprLoc> {
        let wrapped = format!("({text})");
        let mut tokens = tokenize(&wrapped).map_err(|e| ParseError::syntax(format!("f-string: {}", e.message()), range))?;
        for token in &mut tokens {
            token.range = range;
        }
        let mut sub = Parser {
            tokens,
            pos: 0,
            interns: &mut *self.interns,
            depth_remaining: self.depth_remaining,
            class_stack: self.class_stack.clone(),
        };
        let expr = sub.parse_star_list()?;
        if !matches!(sub.peek(), Tok::Newline | Tok::EndOfFile) {
            return Err(ParseError::syntax("f-string: invalid syntax", range));
        }
        Ok(expr)
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_owned()));
    }
}

fn describe_expr(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) | Expr::FString(_) => "literal",
        Expr::Call { .. } => "function call",
        Expr::Compare { .. } => "comparison",
        Expr::IfElse { .. } => "conditional expression",
        Expr::Lambda(_) => "lambda",
        Expr::Dict(_) => "dict literal",
        Expr::Set(_) => "set display",
        Expr::Comprehension(_) => "comprehension",
        Expr::Await(_) => "await expression",
        Expr::Yield(_) | Expr::YieldFrom(_) => "yield expression",
        Expr::Named { .. } => "named expression",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let mut interns = Interns::new();
        parse(source, &mut interns).unwrap().body
    }

    fn parse_err(source: &str) -> String {
        let mut interns = Interns::new();
        parse(source, &mut interns).unwrap_err().message().to_owned()
    }

    #[test]
    fn or_patterns_bind_the_same_names() {
        assert_eq!(
            parse_err("match x:\n    case [a] | [b]:\n        pass\n"),
            "alternative patterns bind different names"
        );
        assert_eq!(
            parse_err("match x:\n    case (a, a):\n        pass\n"),
            "multiple assignments to name 'a' in pattern"
        );
        parse_ok("match x:\n    case [a, 1] | [1, a]:\n        pass\n");
    }

    #[test]
    fn bare_except_must_be_last() {
        assert_eq!(
            parse_err("try:\n    pass\nexcept:\n    pass\nexcept ValueError:\n    pass\n"),
            "default 'except:' must be last"
        );
    }

    #[test]
    fn chained_assignment() {
        let body = parse_ok("a = b = 1\n");
        let Node::Assign { targets, .. } = &body[0].node else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn power_binds_tighter_than_unary() {
        let body = parse_ok("-2 ** 2\n");
        let Node::Expr(expr) = &body[0].node else { panic!() };
        assert!(matches!(
            expr.expr,
            Expr::UnaryOp {
                op: UnaryOperator::Neg,
                ..
            }
        ));
    }

    #[test]
    fn match_is_a_soft_keyword() {
        let body = parse_ok("match = 3\nmatch match:\n    case 3:\n        pass\n");
        assert!(matches!(body[0].node, Node::Assign { .. }));
        assert!(matches!(body[1].node, Node::Match { .. }));
    }

    #[test]
    fn fstring_fields() {
        let body = parse_ok("f'{x!r:>{width}} and {{braces}}'\n");
        let Node::Expr(expr) = &body[0].node else { panic!() };
        let Expr::FString(parts) = &expr.expr else { panic!() };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], FStringPart::Literal(text) if text == " and {braces}"));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_err("1 = x\n"), "cannot assign to literal");
        assert_eq!(parse_err("def f(a=1, b):\n    pass\n"), "non-default argument follows default argument");
        assert_eq!(parse_err("f(x=1, x=2)\n"), "keyword argument repeated: x");
        assert_eq!(parse_err("if x:\npass\n"), "expected an indented block");
    }

    #[test]
    fn nesting_is_bounded() {
        let source = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
        assert_eq!(parse_err(&source), "too many nested parentheses");
    }
}
