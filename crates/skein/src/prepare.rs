//! Scope resolution.
//!
//! Runs after parsing and before compilation. Every [`Identifier`] gets a [`NameScope`] and every
//! function-like node gets its [`ScopeInfo`] (local slots, cell variables, free variables).
//!
//! The walk happens twice over the same tree with the same traversal code: the collect pass builds
//! a symbol table per scope (in pre-order), [`Resolver::analyze`] classifies every symbol, and the
//! apply pass writes the results back into the AST. Sharing the traversal keeps the scope
//! numbering of both passes in lockstep.

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    expressions::{
        Arg, ClassDef, Comprehension, ComprehensionKind, DictItem, Expr, ExprLoc, FunctionDef, Identifier,
        ImportNames, Module, NameScope, Node, Pattern, ScopeInfo, ScopeKind, Stmt, Target,
    },
    fstring::FStringPart,
    intern::{Interns, StaticStrings, StringId},
    parse::{CodeRange, ParseError, ParseResult},
};

/// Resolves every name in `module`, filling in identifier scopes and scope layouts.
pub(crate) fn prepare(module: &mut Module, interns: &Interns) -> ParseResult<()> {
    let mut resolver = Resolver::new(interns);
    resolver.walk_body(&mut module.body)?;
    resolver.analyze()?;

    resolver.mode = Mode::Apply;
    resolver.current = 0;
    resolver.next_scope = 1;
    resolver.walk_body(&mut module.body)?;
    module.scope = resolver.scopes[0].info.clone();
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Collect,
    Apply,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SymbolKind {
    #[default]
    Unresolved,
    Local,
    /// Local captured by an inner scope.
    Cell,
    /// Captured from an enclosing scope.
    Free,
    Global,
    Name,
}

#[derive(Debug, Default)]
struct Symbol {
    bound: bool,
    used: bool,
    param: bool,
    global: bool,
    nonlocal: bool,
    /// Position of the first `nonlocal` declaration, for error reporting.
    declared_at: Option<CodeRange>,
    kind: SymbolKind,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    parent: Option<usize>,
    symbols: IndexMap<StringId, Symbol>,
    params: Vec<StringId>,
    /// Free variables passed through a class body to its methods; the class body itself
    /// may bind the same names in its namespace.
    passthrough: Vec<StringId>,
    needs_class_cell: bool,
    is_generator: bool,
    is_async: bool,
    comprehension_kind: Option<ComprehensionKind>,
    info: ScopeInfo,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<usize>) -> Self {
        Self {
            kind,
            parent,
            symbols: IndexMap::new(),
            params: Vec::new(),
            passthrough: Vec::new(),
            needs_class_cell: false,
            is_generator: false,
            is_async: false,
            comprehension_kind: None,
            info: ScopeInfo::default(),
        }
    }

    fn is_function_like(&self) -> bool {
        matches!(self.kind, ScopeKind::Function | ScopeKind::Comprehension)
    }
}

/// Where a name not bound in a scope comes from.
enum Binding {
    /// A cell owned by the scope at this index.
    Enclosing(usize),
    Global,
}

struct Resolver<'a> {
    interns: &'a Interns,
    mode: Mode,
    scopes: Vec<Scope>,
    current: usize,
    next_scope: usize,
    loop_depth: u32,
}

impl<'a> Resolver<'a> {
    fn new(interns: &'a Interns) -> Self {
        Self {
            interns,
            mode: Mode::Collect,
            scopes: vec![Scope::new(ScopeKind::Module, None)],
            current: 0,
            next_scope: 1,
            loop_depth: 0,
        }
    }

    fn name(&self, id: StringId) -> &str {
        self.interns.get_str(id)
    }

    fn collecting(&self) -> bool {
        self.mode == Mode::Collect
    }

    fn scope(&self) -> &Scope {
        &self.scopes[self.current]
    }

    fn symbol(&mut self, name: StringId) -> &mut Symbol {
        self.scopes[self.current].symbols.entry(name).or_default()
    }

    // ==========================
    // scope entry and exit

    /// Enters the next nested scope in pre-order; returns the previous scope and loop depth.
    fn enter_scope(&mut self, kind: ScopeKind) -> (usize, u32) {
        let index = self.next_scope;
        self.next_scope += 1;
        if self.collecting() {
            self.scopes.push(Scope::new(kind, Some(self.current)));
        }
        let saved = (self.current, self.loop_depth);
        self.current = index;
        self.loop_depth = 0;
        saved
    }

    /// Leaves the current scope, returning its final layout in apply mode.
    fn exit_scope(&mut self, saved: (usize, u32)) -> Option<ScopeInfo> {
        let info = (!self.collecting()).then(|| self.scope().info.clone());
        (self.current, self.loop_depth) = saved;
        info
    }

    // ==========================
    // name events

    fn declare_param(&mut self, ident: &mut Identifier) {
        if self.collecting() {
            let name = ident.name;
            let symbol = self.symbol(name);
            symbol.param = true;
            symbol.bound = true;
            self.scopes[self.current].params.push(name);
        } else {
            ident.scope = self.resolve(ident.name);
        }
    }

    fn load(&mut self, ident: &mut Identifier) {
        if self.collecting() {
            self.symbol(ident.name).used = true;
            if ident.name == StaticStrings::Super.id() && self.scope().kind == ScopeKind::Function {
                self.symbol(StaticStrings::DunderClass.id()).used = true;
            }
        } else {
            ident.scope = self.resolve(ident.name);
        }
    }

    fn store(&mut self, ident: &mut Identifier) {
        if self.collecting() {
            self.symbol(ident.name).bound = true;
        } else {
            ident.scope = self.resolve(ident.name);
        }
    }

    /// Binds a walrus target, which inside comprehensions belongs to the enclosing non-comprehension scope.
    fn store_named(&mut self, ident: &mut Identifier) -> ParseResult<()> {
        if self.scope().kind != ScopeKind::Comprehension {
            self.store(ident);
            return Ok(());
        }
        if !self.collecting() {
            ident.scope = self.resolve(ident.name);
            return Ok(());
        }
        let mut owner = self.current;
        while self.scopes[owner].kind == ScopeKind::Comprehension {
            owner = self.scopes[owner].parent.expect("comprehension always has a parent scope");
        }
        if self.scopes[owner].kind == ScopeKind::Class {
            return Err(ParseError::syntax(
                "assignment expression within a comprehension cannot be used in a class body",
                ident.position,
            ));
        }
        // Iteration variables of the comprehension cannot be rebound.
        if self.scope().symbols.get(&ident.name).is_some_and(|s| s.bound) {
            return Err(ParseError::syntax(
                format!(
                    "assignment expression cannot rebind comprehension iteration variable '{}'",
                    self.name(ident.name)
                ),
                ident.position,
            ));
        }
        self.scopes[owner].symbols.entry(ident.name).or_default().bound = true;
        self.symbol(ident.name).used = true;
        Ok(())
    }

    fn declare_global(&mut self, ident: &mut Identifier) -> ParseResult<()> {
        if !self.collecting() {
            ident.scope = self.resolve(ident.name);
            return Ok(());
        }
        let name = self.name(ident.name).to_owned();
        let symbol = self.symbol(ident.name);
        if symbol.param {
            return Err(ParseError::syntax(format!("name '{name}' is parameter and global"), ident.position));
        }
        if symbol.nonlocal {
            return Err(ParseError::syntax(format!("name '{name}' is nonlocal and global"), ident.position));
        }
        if !symbol.global {
            if symbol.bound {
                return Err(ParseError::syntax(
                    format!("name '{name}' is assigned to before global declaration"),
                    ident.position,
                ));
            }
            if symbol.used {
                return Err(ParseError::syntax(
                    format!("name '{name}' is used prior to global declaration"),
                    ident.position,
                ));
            }
        }
        symbol.global = true;
        Ok(())
    }

    fn declare_nonlocal(&mut self, ident: &mut Identifier) -> ParseResult<()> {
        if !self.collecting() {
            ident.scope = self.resolve(ident.name);
            return Ok(());
        }
        if self.scope().kind == ScopeKind::Module {
            return Err(ParseError::syntax(
                "nonlocal declaration not allowed at module level",
                ident.position,
            ));
        }
        let name = self.name(ident.name).to_owned();
        let symbol = self.symbol(ident.name);
        if symbol.param {
            return Err(ParseError::syntax(format!("name '{name}' is parameter and nonlocal"), ident.position));
        }
        if symbol.global {
            return Err(ParseError::syntax(format!("name '{name}' is nonlocal and global"), ident.position));
        }
        if !symbol.nonlocal {
            if symbol.bound {
                return Err(ParseError::syntax(
                    format!("name '{name}' is assigned to before nonlocal declaration"),
                    ident.position,
                ));
            }
            if symbol.used {
                return Err(ParseError::syntax(
                    format!("name '{name}' is used prior to nonlocal declaration"),
                    ident.position,
                ));
            }
        }
        symbol.nonlocal = true;
        symbol.declared_at.get_or_insert(ident.position);
        Ok(())
    }

    // ==========================
    // statements

    fn walk_body(&mut self, body: &mut [Stmt]) -> ParseResult<()> {
        for stmt in body {
            self.walk_stmt(stmt)?;
        }
        Ok(())
    }

    fn walk_loop_body(&mut self, body: &mut [Stmt]) -> ParseResult<()> {
        let depth = self.loop_depth;
        self.loop_depth += 1;
        let result = self.walk_body(body);
        self.loop_depth = depth;
        result
    }

    fn walk_stmt(&mut self, stmt: &mut Stmt) -> ParseResult<()> {
        let position = stmt.position;
        match &mut stmt.node {
            Node::Expr(expr) => self.walk_expr(expr)?,
            Node::Assign { targets, value } => {
                self.walk_expr(value)?;
                for target in targets {
                    self.walk_target(target)?;
                }
            }
            Node::AugAssign { target, value, .. } => {
                self.walk_expr(value)?;
                if let Target::Name(ident) = target {
                    self.load(ident);
                }
                self.walk_target(target)?;
            }
            Node::AnnAssign { target, value } => {
                if let Some(value) = value {
                    self.walk_expr(value)?;
                }
                self.walk_target(target)?;
            }
            Node::Pass => {}
            Node::Break => {
                if self.collecting() && self.loop_depth == 0 {
                    return Err(ParseError::syntax("'break' outside loop", position));
                }
            }
            Node::Continue => {
                if self.collecting() && self.loop_depth == 0 {
                    return Err(ParseError::syntax("'continue' not properly in loop", position));
                }
            }
            Node::Del(targets) => {
                for target in targets {
                    self.walk_target(target)?;
                }
            }
            Node::Return(value) => {
                if self.collecting() && !self.scope().is_function_like() {
                    return Err(ParseError::syntax("'return' outside function", position));
                }
                if let Some(value) = value {
                    self.walk_expr(value)?;
                }
            }
            Node::Raise { exc, cause } => {
                if let Some(exc) = exc {
                    self.walk_expr(exc)?;
                }
                if let Some(cause) = cause {
                    self.walk_expr(cause)?;
                }
            }
            Node::Global(names) => {
                for ident in names {
                    self.declare_global(ident)?;
                }
            }
            Node::Nonlocal(names) => {
                for ident in names {
                    self.declare_nonlocal(ident)?;
                }
            }
            Node::Assert { test, msg } => {
                self.walk_expr(test)?;
                if let Some(msg) = msg {
                    self.walk_expr(msg)?;
                }
            }
            Node::Import(aliases) => {
                for alias in aliases {
                    self.store(&mut alias.bind);
                }
            }
            Node::ImportFrom { names, .. } => match names {
                ImportNames::Star => {
                    if self.collecting() && self.scope().kind != ScopeKind::Module {
                        return Err(ParseError::syntax("import * only allowed at module level", position));
                    }
                }
                ImportNames::Names(names) => {
                    for (_, ident) in names {
                        self.store(ident);
                    }
                }
            },
            Node::If { test, body, orelse } => {
                self.walk_expr(test)?;
                self.walk_body(body)?;
                self.walk_body(orelse)?;
            }
            Node::While { test, body, orelse } => {
                self.walk_expr(test)?;
                self.walk_loop_body(body)?;
                self.walk_body(orelse)?;
            }
            Node::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.walk_expr(iter)?;
                self.walk_target(target)?;
                self.walk_loop_body(body)?;
                self.walk_body(orelse)?;
            }
            Node::Try(try_block) => {
                self.walk_body(&mut try_block.body)?;
                for handler in &mut try_block.handlers {
                    if let Some(exc_type) = &mut handler.exc_type {
                        self.walk_expr(exc_type)?;
                    }
                    if let Some(name) = &mut handler.name {
                        self.store(name);
                    }
                    self.walk_body(&mut handler.body)?;
                }
                self.walk_body(&mut try_block.orelse)?;
                self.walk_body(&mut try_block.finally)?;
            }
            Node::With { items, body } => {
                for item in items {
                    self.walk_expr(&mut item.context)?;
                    if let Some(target) = &mut item.target {
                        self.walk_target(target)?;
                    }
                }
                self.walk_body(body)?;
            }
            Node::FunctionDef(func) => self.walk_function(func)?,
            Node::ClassDef(class) => self.walk_class(class)?,
            Node::Match { subject, cases } => {
                self.walk_expr(subject)?;
                for case in cases {
                    self.walk_pattern(&mut case.pattern)?;
                    if let Some(guard) = &mut case.guard {
                        self.walk_expr(guard)?;
                    }
                    self.walk_body(&mut case.body)?;
                }
            }
        }
        Ok(())
    }

    fn walk_target(&mut self, target: &mut Target) -> ParseResult<()> {
        match target {
            Target::Name(ident) => self.store(ident),
            Target::Attribute { object, .. } => self.walk_expr(object)?,
            Target::Subscript { object, index, .. } => {
                self.walk_expr(object)?;
                self.walk_expr(index)?;
            }
            Target::Tuple { targets, .. } => {
                for target in targets {
                    self.walk_target(target)?;
                }
            }
            Target::Starred(inner) => self.walk_target(inner)?,
        }
        Ok(())
    }

    fn walk_pattern(&mut self, pattern: &mut Pattern) -> ParseResult<()> {
        match pattern {
            Pattern::Value(expr) => self.walk_expr(expr)?,
            Pattern::Singleton(_) | Pattern::Wildcard | Pattern::Star(None) => {}
            Pattern::Capture(ident) | Pattern::Star(Some(ident)) => self.store(ident),
            Pattern::Sequence(patterns) | Pattern::Or(patterns) => {
                for pattern in patterns {
                    self.walk_pattern(pattern)?;
                }
            }
            Pattern::Mapping { keys, patterns, rest } => {
                for key in keys {
                    self.walk_expr(key)?;
                }
                for pattern in patterns {
                    self.walk_pattern(pattern)?;
                }
                if let Some(rest) = rest {
                    self.store(rest);
                }
            }
            Pattern::Class {
                cls,
                patterns,
                kwd_patterns,
                ..
            } => {
                self.walk_expr(cls)?;
                for pattern in patterns.iter_mut().chain(kwd_patterns) {
                    self.walk_pattern(pattern)?;
                }
            }
            Pattern::As { pattern, name } => {
                self.walk_pattern(pattern)?;
                self.store(name);
            }
        }
        Ok(())
    }

    fn walk_function(&mut self, func: &mut FunctionDef) -> ParseResult<()> {
        for decorator in &mut func.decorators {
            self.walk_expr(decorator)?;
        }
        for default in func.params.defaults_mut() {
            self.walk_expr(default)?;
        }
        if !func.is_lambda {
            self.store(&mut func.name);
        }

        let saved = self.enter_scope(ScopeKind::Function);
        if self.collecting() {
            self.scopes[self.current].is_async = func.is_async;
        }
        for param in func.params.names_mut() {
            self.declare_param(param);
        }
        let result = self.walk_body(&mut func.body);
        if let Some(info) = self.exit_scope(saved) {
            func.scope = info;
        }
        result
    }

    fn walk_class(&mut self, class: &mut ClassDef) -> ParseResult<()> {
        for decorator in &mut class.decorators {
            self.walk_expr(decorator)?;
        }
        for base in &mut class.bases {
            self.walk_expr(base)?;
        }
        self.store(&mut class.name);

        let saved = self.enter_scope(ScopeKind::Class);
        let result = self.walk_body(&mut class.body);
        if let Some(info) = self.exit_scope(saved) {
            class.scope = info;
        }
        result
    }

    /// The first iterable is evaluated in the enclosing scope; everything else runs inside.
    fn walk_comprehension(&mut self, comp: &mut Comprehension) -> ParseResult<()> {
        let first = comp
            .generators
            .first_mut()
            .expect("parser guarantees at least one `for` clause");
        self.walk_expr(&mut first.iter)?;

        let saved = self.enter_scope(ScopeKind::Comprehension);
        if self.collecting() {
            let scope = &mut self.scopes[self.current];
            scope.comprehension_kind = Some(comp.kind);
            scope.is_generator = comp.kind == ComprehensionKind::Generator;
            let iter_arg = StaticStrings::CompIter.id();
            let symbol = scope.symbols.entry(iter_arg).or_default();
            symbol.param = true;
            symbol.bound = true;
            scope.params.push(iter_arg);
        }
        let result = self.walk_comprehension_body(comp);
        if let Some(info) = self.exit_scope(saved) {
            comp.scope = info;
        }
        result
    }

    /// Everything in a comprehension except its first iterable.
    fn walk_comprehension_body(&mut self, comp: &mut Comprehension) -> ParseResult<()> {
        let (first, rest) = comp
            .generators
            .split_first_mut()
            .expect("parser guarantees at least one `for` clause");
        self.walk_target(&mut first.target)?;
        for cond in &mut first.ifs {
            self.walk_expr(cond)?;
        }
        for generator in rest {
            self.walk_expr(&mut generator.iter)?;
            self.walk_target(&mut generator.target)?;
            for cond in &mut generator.ifs {
                self.walk_expr(cond)?;
            }
        }
        self.walk_expr(&mut comp.element)?;
        if let Some(value) = &mut comp.value {
            self.walk_expr(value)?;
        }
        Ok(())
    }

    // ==========================
    // expressions

    fn walk_exprs(&mut self, exprs: &mut [ExprLoc]) -> ParseResult<()> {
        for expr in exprs {
            self.walk_expr(expr)?;
        }
        Ok(())
    }

    fn walk_expr(&mut self, expr: &mut ExprLoc) -> ParseResult<()> {
        let position = expr.position;
        match &mut expr.expr {
            Expr::Literal(_) => {}
            Expr::FString(parts) => self.walk_fstring(parts)?,
            Expr::Name(ident) => self.load(ident),
            Expr::Attribute { object, .. } => self.walk_expr(object)?,
            Expr::Subscript { object, index } => {
                self.walk_expr(object)?;
                self.walk_expr(index)?;
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.walk_expr(part)?;
                }
            }
            Expr::Call { func, args } => {
                self.walk_expr(func)?;
                for arg in args {
                    match arg {
                        Arg::Positional(value)
                        | Arg::Starred(value)
                        | Arg::Keyword(_, value)
                        | Arg::DoubleStarred(value) => self.walk_expr(value)?,
                    }
                }
            }
            Expr::BinOp { left, right, .. } => {
                self.walk_expr(left)?;
                self.walk_expr(right)?;
            }
            Expr::UnaryOp { operand, .. } => self.walk_expr(operand)?,
            Expr::BoolOp { values, .. } => self.walk_exprs(values)?,
            Expr::Compare { left, comparisons } => {
                self.walk_expr(left)?;
                for (_, right) in comparisons {
                    self.walk_expr(right)?;
                }
            }
            Expr::IfElse { test, body, orelse } => {
                self.walk_expr(test)?;
                self.walk_expr(body)?;
                self.walk_expr(orelse)?;
            }
            Expr::Lambda(func) => self.walk_function(func)?,
            Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => self.walk_exprs(items)?,
            Expr::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            self.walk_expr(key)?;
                            self.walk_expr(value)?;
                        }
                        DictItem::Unpack(mapping) => self.walk_expr(mapping)?,
                    }
                }
            }
            Expr::Starred(inner) => self.walk_expr(inner)?,
            Expr::Comprehension(comp) => self.walk_comprehension(comp)?,
            Expr::Await(value) => {
                self.check_await(position)?;
                self.walk_expr(value)?;
            }
            Expr::Yield(value) => {
                self.mark_generator(position)?;
                if let Some(value) = value {
                    self.walk_expr(value)?;
                }
            }
            Expr::YieldFrom(value) => {
                self.mark_generator(position)?;
                self.walk_expr(value)?;
            }
            Expr::Named { target, value } => {
                self.walk_expr(value)?;
                self.store_named(target)?;
            }
        }
        Ok(())
    }

    fn walk_fstring(&mut self, parts: &mut [FStringPart]) -> ParseResult<()> {
        for part in parts {
            if let FStringPart::Field { expr, spec, .. } = part {
                self.walk_expr(expr)?;
                self.walk_fstring(spec)?;
            }
        }
        Ok(())
    }

    fn mark_generator(&mut self, position: CodeRange) -> ParseResult<()> {
        if !self.collecting() {
            return Ok(());
        }
        let scope = &mut self.scopes[self.current];
        match scope.kind {
            ScopeKind::Function if scope.is_async => Err(ParseError::not_supported(
                "asynchronous generators are not supported",
                position,
            )),
            ScopeKind::Function => {
                scope.is_generator = true;
                Ok(())
            }
            ScopeKind::Comprehension => {
                let what = match scope.comprehension_kind {
                    Some(ComprehensionKind::List) => "list comprehension",
                    Some(ComprehensionKind::Set) => "set comprehension",
                    Some(ComprehensionKind::Dict) => "dict comprehension",
                    _ => "generator expression",
                };
                Err(ParseError::syntax(format!("'yield' inside {what}"), position))
            }
            ScopeKind::Module | ScopeKind::Class => Err(ParseError::syntax("'yield' outside function", position)),
        }
    }

    /// `await` is allowed in `async def` bodies and, since awaiting is eager, at module level.
    fn check_await(&self, position: CodeRange) -> ParseResult<()> {
        if !self.collecting() {
            return Ok(());
        }
        let mut index = self.current;
        loop {
            let scope = &self.scopes[index];
            match scope.kind {
                ScopeKind::Module => return Ok(()),
                ScopeKind::Function if scope.is_async => return Ok(()),
                ScopeKind::Comprehension => {
                    index = scope.parent.expect("comprehension always has a parent scope");
                }
                ScopeKind::Function | ScopeKind::Class => {
                    return Err(ParseError::syntax("'await' outside async function", position));
                }
            }
        }
    }

    // ==========================
    // analysis

    /// Finds where a name not bound in the scope starting the search comes from.
    ///
    /// Class scopes are transparent except for the implicit `__class__` cell.
    fn find_binding(&self, start: Option<usize>, name: StringId) -> Binding {
        let mut cursor = start;
        while let Some(index) = cursor {
            let scope = &self.scopes[index];
            match scope.kind {
                ScopeKind::Module => return Binding::Global,
                ScopeKind::Class => {
                    if name == StaticStrings::DunderClass.id() {
                        return Binding::Enclosing(index);
                    }
                }
                ScopeKind::Function | ScopeKind::Comprehension => {
                    if let Some(symbol) = scope.symbols.get(&name) {
                        if symbol.global {
                            return Binding::Global;
                        }
                        if symbol.bound || symbol.nonlocal {
                            return Binding::Enclosing(index);
                        }
                    }
                }
            }
            cursor = scope.parent;
        }
        Binding::Global
    }

    /// Classifies every symbol, propagates captured names and computes slot layouts.
    fn analyze(&mut self) -> ParseResult<()> {
        let mut captures: Vec<(usize, StringId, usize)> = Vec::new();

        for index in 0..self.scopes.len() {
            let kind = self.scopes[index].kind;
            let parent = self.scopes[index].parent;
            let names: Vec<StringId> = self.scopes[index].symbols.keys().copied().collect();
            for name in names {
                let symbol = &self.scopes[index].symbols[&name];
                let resolved = if kind == ScopeKind::Module {
                    SymbolKind::Name
                } else if symbol.global {
                    SymbolKind::Global
                } else if symbol.nonlocal {
                    let declared_at = symbol.declared_at.unwrap_or_default();
                    match self.find_binding(parent, name) {
                        Binding::Enclosing(owner) if self.scopes[owner].kind != ScopeKind::Class => {
                            captures.push((index, name, owner));
                            SymbolKind::Free
                        }
                        _ => {
                            return Err(ParseError::syntax(
                                format!("no binding for nonlocal '{}' found", self.name(name)),
                                declared_at,
                            ));
                        }
                    }
                } else if symbol.bound {
                    if kind == ScopeKind::Class {
                        SymbolKind::Name
                    } else {
                        SymbolKind::Local
                    }
                } else {
                    match self.find_binding(parent, name) {
                        Binding::Enclosing(owner) => {
                            captures.push((index, name, owner));
                            SymbolKind::Free
                        }
                        Binding::Global if kind == ScopeKind::Class => SymbolKind::Name,
                        Binding::Global => SymbolKind::Global,
                    }
                };
                self.scopes[index]
                    .symbols
                    .get_mut(&name)
                    .expect("symbol listed above")
                    .kind = resolved;
            }
        }

        for (user, name, owner) in captures {
            self.capture(user, name, owner);
        }

        for scope in &mut self.scopes {
            scope.info = layout(scope);
        }
        Ok(())
    }

    /// Turns `name` into a cell of `owner` and threads it through every scope in between.
    fn capture(&mut self, user: usize, name: StringId, owner: usize) {
        let mut cursor = self.scopes[user].parent;
        while let Some(index) = cursor {
            if index == owner {
                break;
            }
            let scope = &mut self.scopes[index];
            match scope.symbols.get_mut(&name) {
                Some(symbol) if symbol.kind == SymbolKind::Free => {}
                Some(_) => {
                    if !scope.passthrough.contains(&name) {
                        scope.passthrough.push(name);
                    }
                }
                None => {
                    scope.symbols.insert(
                        name,
                        Symbol {
                            kind: SymbolKind::Free,
                            ..Symbol::default()
                        },
                    );
                }
            }
            cursor = scope.parent;
        }

        let owner_scope = &mut self.scopes[owner];
        if owner_scope.kind == ScopeKind::Class {
            owner_scope.needs_class_cell = true;
        } else if let Some(symbol) = owner_scope.symbols.get_mut(&name)
            && symbol.kind == SymbolKind::Local
        {
            symbol.kind = SymbolKind::Cell;
        }
    }

    // ==========================
    // apply

    fn resolve(&self, name: StringId) -> NameScope {
        let scope = self.scope();
        let Some(symbol) = scope.symbols.get(&name) else {
            return match scope.kind {
                ScopeKind::Module | ScopeKind::Class => NameScope::Name,
                _ => NameScope::Global,
            };
        };
        let info = &scope.info;
        let position = |names: &[StringId]| {
            let index = names.iter().position(|n| *n == name).expect("name present in scope layout");
            u16::try_from(index).expect("scope has fewer than 65536 names")
        };
        match symbol.kind {
            SymbolKind::Global => NameScope::Global,
            SymbolKind::Name | SymbolKind::Unresolved => NameScope::Name,
            SymbolKind::Local => NameScope::Local(position(&info.varnames)),
            SymbolKind::Cell => NameScope::Cell(position(&info.cellvars)),
            SymbolKind::Free => {
                let offset = u16::try_from(info.cellvars.len()).expect("scope has fewer than 65536 cells");
                NameScope::Cell(offset + position(&info.freevars))
            }
        }
    }
}

/// Slot layout: parameters first, then other non-cell locals; cells in first-use order.
fn layout(scope: &Scope) -> ScopeInfo {
    let mut info = ScopeInfo {
        kind: scope.kind,
        is_generator: scope.is_generator,
        is_async: scope.is_async,
        ..ScopeInfo::default()
    };
    if scope.kind == ScopeKind::Module {
        return info;
    }
    let mut seen = AHashSet::new();
    if scope.is_function_like() {
        for param in &scope.params {
            if seen.insert(*param) {
                info.varnames.push(*param);
            }
        }
    }
    for (name, symbol) in &scope.symbols {
        match symbol.kind {
            SymbolKind::Local if !symbol.param => info.varnames.push(*name),
            SymbolKind::Cell => info.cellvars.push(*name),
            SymbolKind::Free => info.freevars.push(*name),
            _ => {}
        }
    }
    if scope.needs_class_cell {
        info.cellvars.push(StaticStrings::DunderClass.id());
    }
    for name in &scope.passthrough {
        if !info.freevars.contains(name) {
            info.freevars.push(*name);
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parse::parse;

    fn prepared(source: &str) -> (Module, Interns) {
        let mut interns = Interns::new();
        let mut module = parse(source, &mut interns).unwrap();
        prepare(&mut module, &interns).unwrap();
        (module, interns)
    }

    fn prepare_err(source: &str) -> String {
        let mut interns = Interns::new();
        let mut module = parse(source, &mut interns).unwrap();
        prepare(&mut module, &interns).unwrap_err().message().to_owned()
    }

    fn names(interns: &Interns, ids: &[StringId]) -> Vec<String> {
        ids.iter().map(|id| interns.get_str(*id).to_owned()).collect()
    }

    fn function(stmt: &Stmt) -> &FunctionDef {
        match &stmt.node {
            Node::FunctionDef(func) => func,
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn closure_cells_and_free_vars() {
        let source = "def make_adder(n):\n    def add(x):\n        return x + n\n    return add\n";
        let (module, interns) = prepared(source);
        let outer = function(&module.body[0]);
        assert_eq!(names(&interns, &outer.scope.varnames), ["n", "add"]);
        assert_eq!(names(&interns, &outer.scope.cellvars), ["n"]);
        let inner = function(&outer.body[0]);
        assert_eq!(names(&interns, &inner.scope.varnames), ["x"]);
        assert_eq!(names(&interns, &inner.scope.freevars), ["n"]);
    }

    #[test]
    fn global_and_nonlocal() {
        let source = "\
x = 0
def outer():
    y = 1
    def inner():
        global x
        nonlocal y
        x = y
    return inner
";
        let (module, interns) = prepared(source);
        let outer = function(&module.body[1]);
        assert_eq!(names(&interns, &outer.scope.cellvars), ["y"]);
        let inner = function(&outer.body[1]);
        assert!(inner.scope.varnames.is_empty());
        assert_eq!(names(&interns, &inner.scope.freevars), ["y"]);
        let Node::Assign { targets, value } = &inner.body[2].node else {
            panic!("expected assignment")
        };
        assert!(matches!(&targets[0], Target::Name(ident) if ident.scope == NameScope::Global));
        assert!(matches!(&value.expr, Expr::Name(ident) if ident.scope == NameScope::Cell(0)));
    }

    #[test]
    fn comprehension_variable_does_not_leak() {
        let (module, interns) = prepared("xs = [x for x in range(3)]\n");
        let Node::Assign { value, .. } = &module.body[0].node else {
            panic!("expected assignment")
        };
        let Expr::Comprehension(comp) = &value.expr else {
            panic!("expected comprehension")
        };
        assert_eq!(names(&interns, &comp.scope.varnames), [".0", "x"]);
        // the first iterable resolves in the module scope
        let Expr::Call { func, .. } = &comp.generators[0].iter.expr else {
            panic!("expected call")
        };
        assert!(matches!(&func.expr, Expr::Name(ident) if ident.scope == NameScope::Name));
    }

    #[test]
    fn walrus_in_comprehension_binds_outside() {
        let source = "def f(xs):\n    ys = [last := x for x in xs]\n    return last\n";
        let (module, interns) = prepared(source);
        let func = function(&module.body[0]);
        assert_eq!(names(&interns, &func.scope.cellvars), ["last"]);
    }

    #[test]
    fn super_captures_class_cell() {
        let source = "class A(B):\n    def f(self):\n        return super().f()\n";
        let (module, interns) = prepared(source);
        let Node::ClassDef(class) = &module.body[0].node else {
            panic!("expected class")
        };
        assert_eq!(names(&interns, &class.scope.cellvars), ["__class__"]);
        let method = function(&class.body[0]);
        assert_eq!(names(&interns, &method.scope.freevars), ["__class__"]);
    }

    #[test]
    fn class_names_invisible_to_methods() {
        let source = "def f():\n    y = 1\n    class C:\n        y = 2\n        def m(self):\n            return y\n    return C\n";
        let (module, interns) = prepared(source);
        let func = function(&module.body[0]);
        assert_eq!(names(&interns, &func.scope.cellvars), ["y"]);
        let Node::ClassDef(class) = &func.body[1].node else {
            panic!("expected class")
        };
        assert_eq!(names(&interns, &class.scope.freevars), ["y"]);
    }

    #[test]
    fn generator_flag() {
        let (module, _) = prepared("def gen():\n    yield 1\n");
        assert!(function(&module.body[0]).scope.is_generator);
    }

    #[test]
    fn static_errors() {
        assert_eq!(
            prepare_err("def f():\n    nonlocal x\n"),
            "no binding for nonlocal 'x' found"
        );
        assert_eq!(prepare_err("nonlocal x\n"), "nonlocal declaration not allowed at module level");
        assert_eq!(prepare_err("def f(a):\n    global a\n"), "name 'a' is parameter and global");
        assert_eq!(
            prepare_err("def f():\n    print(x)\n    global x\n"),
            "name 'x' is used prior to global declaration"
        );
        assert_eq!(prepare_err("return 1\n"), "'return' outside function");
        assert_eq!(prepare_err("yield 1\n"), "'yield' outside function");
        assert_eq!(prepare_err("break\n"), "'break' outside loop");
        assert_eq!(
            prepare_err("for x in y:\n    def f():\n        continue\n"),
            "'continue' not properly in loop"
        );
        assert_eq!(prepare_err("def f():\n    await g()\n"), "'await' outside async function");
        assert_eq!(
            prepare_err("async def f():\n    yield 1\n"),
            "asynchronous generators are not supported"
        );
    }

    /// Errors raised inside a scope nested in a loop surface as plain syntax errors.
    #[test]
    fn nested_scope_errors_inside_loops() {
        assert_eq!(
            prepare_err("while x:\n    class C:\n        break\n"),
            "'break' outside loop"
        );
        assert_eq!(
            prepare_err("for a in b:\n    for c in d:\n        f = lambda: (yield)\n        nonlocal q\n"),
            "nonlocal declaration not allowed at module level"
        );
        assert_eq!(
            prepare_err("for a in b:\n    def f():\n        def g(p):\n            global p\n"),
            "name 'p' is parameter and global"
        );
    }

    #[test]
    fn module_level_await_is_allowed() {
        prepared("async def f():\n    return 1\nx = await f()\n");
    }
}
