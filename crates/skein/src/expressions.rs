//! Abstract syntax tree produced by the parser and annotated by the scope resolver.

use num_bigint::BigInt;
use strum::{FromRepr, IntoStaticStr};

use crate::{
    fstring::FStringPart,
    intern::{StaticStrings, StringId},
    parse::CodeRange,
};

/// How a name reference is resolved at runtime.
///
/// Filled in by `prepare`; the parser leaves every identifier `Unresolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameScope {
    #[default]
    Unresolved,
    /// Slot in the frame's locals array.
    Local(u16),
    /// Index into the frame's cells: cell variables first, then free variables.
    Cell(u16),
    /// Module namespace, then builtins.
    Global,
    /// Dictionary lookup in the executing namespace (module or class body), then globals, then builtins.
    Name,
}

/// An identifier with its source location and resolved scope.
#[derive(Debug, Clone, Copy)]
pub struct Identifier {
    pub name: StringId,
    pub position: CodeRange,
    pub scope: NameScope,
}

impl Identifier {
    pub fn new(name: StringId, position: CodeRange) -> Self {
        Self {
            name,
            position,
            scope: NameScope::Unresolved,
        }
    }
}

/// Binary operators in dunder order, see `StaticStrings::DunderAdd`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "@")]
    MatMult,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
}

const OPERATOR_COUNT: u16 = 13;

impl Operator {
    /// The source symbol, used in `unsupported operand type(s)` messages.
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    fn dunder_at(self, group: u16) -> StringId {
        let base = StaticStrings::DunderAdd as u16 + group * OPERATOR_COUNT + self as u16;
        StaticStrings::from_repr(base)
            .expect("operator dunders are contiguous")
            .id()
    }

    /// `__add__`, `__sub__`, ...
    pub fn dunder(self) -> StringId {
        self.dunder_at(0)
    }

    /// `__radd__`, `__rsub__`, ...
    pub fn reflected_dunder(self) -> StringId {
        self.dunder_at(1)
    }

    /// `__iadd__`, `__isub__`, ...
    pub fn inplace_dunder(self) -> StringId {
        self.dunder_at(2)
    }
}

/// Comparison operators, including membership and identity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
pub enum CmpOperator {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
}

impl CmpOperator {
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    /// Dunder used for rich comparison, `None` for identity and membership tests.
    pub fn dunder(self) -> Option<StringId> {
        let name = match self {
            Self::Eq => StaticStrings::DunderEq,
            Self::NotEq => StaticStrings::DunderNe,
            Self::Lt => StaticStrings::DunderLt,
            Self::LtE => StaticStrings::DunderLe,
            Self::Gt => StaticStrings::DunderGt,
            Self::GtE => StaticStrings::DunderGe,
            _ => return None,
        };
        Some(name.id())
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtE => Self::GtE,
            Self::Gt => Self::Lt,
            Self::GtE => Self::LtE,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(StringId),
    Bytes(Vec<u8>),
    Ellipsis,
}

/// An expression together with the source range it was parsed from.
#[derive(Debug, Clone)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    FString(Vec<FStringPart>),
    Name(Identifier),
    Attribute {
        object: Box<ExprLoc>,
        attr: StringId,
    },
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// `lower:upper:step` inside a subscript.
    Slice {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<Arg>,
    },
    BinOp {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<ExprLoc>,
    },
    /// `a and b and c`; evaluates to the deciding operand.
    BoolOp {
        op: BoolOperator,
        values: Vec<ExprLoc>,
    },
    /// `a < b <= c`; a single comparison has one entry in `comparisons`.
    Compare {
        left: Box<ExprLoc>,
        comparisons: Vec<(CmpOperator, ExprLoc)>,
    },
    IfElse {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Lambda(Box<FunctionDef>),
    Tuple(Vec<ExprLoc>),
    List(Vec<ExprLoc>),
    Set(Vec<ExprLoc>),
    Dict(Vec<DictItem>),
    /// `*x` inside a display or call; rejected by the compiler elsewhere.
    Starred(Box<ExprLoc>),
    Comprehension(Box<Comprehension>),
    Await(Box<ExprLoc>),
    Yield(Option<Box<ExprLoc>>),
    YieldFrom(Box<ExprLoc>),
    /// `(target := value)`
    Named {
        target: Identifier,
        value: Box<ExprLoc>,
    },
}

#[derive(Debug, Clone)]
pub enum DictItem {
    Pair(ExprLoc, ExprLoc),
    Unpack(ExprLoc),
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(ExprLoc),
    Starred(ExprLoc),
    Keyword(StringId, ExprLoc),
    DoubleStarred(ExprLoc),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl ComprehensionKind {
    pub fn name(self) -> StaticStrings {
        match self {
            Self::List => StaticStrings::ListComp,
            Self::Set => StaticStrings::SetComp,
            Self::Dict => StaticStrings::DictComp,
            Self::Generator => StaticStrings::GenExpr,
        }
    }
}

/// A comprehension or generator expression.
///
/// Compiled as a nested function taking the first iterator as its only argument (`.0`);
/// the first `for`'s iterable is evaluated in the enclosing scope, everything else inside.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    /// The element, or the key for dict comprehensions.
    pub element: ExprLoc,
    /// The value for dict comprehensions.
    pub value: Option<ExprLoc>,
    pub generators: Vec<CompFor>,
    pub scope: ScopeInfo,
}

#[derive(Debug, Clone)]
pub struct CompFor {
    pub target: Target,
    pub iter: ExprLoc,
    pub ifs: Vec<ExprLoc>,
}

/// Assignment, `for`, `with` and `del` targets.
#[derive(Debug, Clone)]
pub enum Target {
    Name(Identifier),
    Attribute {
        object: ExprLoc,
        attr: StringId,
        position: CodeRange,
    },
    Subscript {
        object: ExprLoc,
        index: ExprLoc,
        position: CodeRange,
    },
    /// `a, b` or `[a, b]`, possibly containing one starred target per level.
    Tuple {
        targets: Vec<Target>,
        position: CodeRange,
    },
    Starred(Box<Target>),
}

impl Target {
    pub fn position(&self) -> CodeRange {
        match self {
            Self::Name(ident) => ident.position,
            Self::Attribute { position, .. } | Self::Subscript { position, .. } | Self::Tuple { position, .. } => {
                *position
            }
            Self::Starred(inner) => inner.position(),
        }
    }
}

/// A function parameter with an optional default.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Identifier,
    pub default: Option<ExprLoc>,
}

/// A parsed parameter list.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub posonly: Vec<Param>,
    pub args: Vec<Param>,
    pub vararg: Option<Identifier>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<Identifier>,
}

impl Parameters {
    pub fn names_mut(&mut self) -> impl Iterator<Item = &mut Identifier> {
        self.posonly
            .iter_mut()
            .chain(&mut self.args)
            .map(|p| &mut p.name)
            .chain(&mut self.vararg)
            .chain(self.kwonly.iter_mut().map(|p| &mut p.name))
            .chain(&mut self.kwarg)
    }

    /// Default expressions, evaluated in the enclosing scope at definition time.
    pub fn defaults_mut(&mut self) -> impl Iterator<Item = &mut ExprLoc> {
        self.posonly
            .iter_mut()
            .chain(&mut self.args)
            .chain(&mut self.kwonly)
            .filter_map(|p| p.default.as_mut())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeKind {
    #[default]
    Module,
    Function,
    Class,
    Comprehension,
}

/// Variable layout of one scope, computed by `prepare`.
#[derive(Debug, Clone, Default)]
pub struct ScopeInfo {
    pub kind: ScopeKind,
    /// Local slot names; parameters come first.
    pub varnames: Vec<StringId>,
    /// Locals captured by inner scopes.
    pub cellvars: Vec<StringId>,
    /// Variables captured from enclosing scopes.
    pub freevars: Vec<StringId>,
    pub is_generator: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Identifier,
    pub params: Parameters,
    pub body: Vec<Stmt>,
    pub decorators: Vec<ExprLoc>,
    pub is_async: bool,
    pub is_lambda: bool,
    pub position: CodeRange,
    pub scope: ScopeInfo,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: Identifier,
    pub bases: Vec<ExprLoc>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<ExprLoc>,
    pub position: CodeRange,
    pub scope: ScopeInfo,
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub exc_type: Option<ExprLoc>,
    pub name: Option<Identifier>,
    pub body: Vec<Stmt>,
    pub position: CodeRange,
}

#[derive(Debug, Clone)]
pub struct Try {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<Stmt>,
    pub finally: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct WithItem {
    pub context: ExprLoc,
    pub target: Option<Target>,
}

#[derive(Debug, Clone)]
pub struct ImportAlias {
    /// Dotted module path, e.g. `os.path`.
    pub module: String,
    /// Name bound in the importing scope: the alias, or the first path component.
    pub bind: Identifier,
    /// Whether an `as` clause was given, in which case the leaf module is bound.
    pub has_alias: bool,
}

#[derive(Debug, Clone)]
pub enum ImportNames {
    Star,
    /// `(attribute name, bound identifier)` pairs.
    Names(Vec<(StringId, Identifier)>),
}

#[derive(Debug, Clone)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<ExprLoc>,
    pub body: Vec<Stmt>,
    pub position: CodeRange,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal or dotted-name value compared with `==`.
    Value(ExprLoc),
    /// `None`, `True` or `False`, compared by identity.
    Singleton(Literal),
    Capture(Identifier),
    Wildcard,
    Sequence(Vec<Pattern>),
    /// `*name` or `*_` inside a sequence pattern.
    Star(Option<Identifier>),
    Mapping {
        keys: Vec<ExprLoc>,
        patterns: Vec<Pattern>,
        rest: Option<Identifier>,
    },
    Class {
        cls: ExprLoc,
        patterns: Vec<Pattern>,
        kwd_names: Vec<StringId>,
        kwd_patterns: Vec<Pattern>,
    },
    Or(Vec<Pattern>),
    As {
        pattern: Box<Pattern>,
        name: Identifier,
    },
}

impl Pattern {
    /// Appends every capture name in the pattern, in binding order.
    pub fn capture_names<'p>(&'p self, out: &mut Vec<&'p Identifier>) {
        match self {
            Self::Capture(name) | Self::Star(Some(name)) => out.push(name),
            Self::Value(_) | Self::Singleton(_) | Self::Wildcard | Self::Star(None) => {}
            Self::Sequence(patterns) => {
                for pattern in patterns {
                    pattern.capture_names(out);
                }
            }
            Self::Mapping { patterns, rest, .. } => {
                for pattern in patterns {
                    pattern.capture_names(out);
                }
                out.extend(rest);
            }
            Self::Class {
                patterns, kwd_patterns, ..
            } => {
                for pattern in patterns.iter().chain(kwd_patterns) {
                    pattern.capture_names(out);
                }
            }
            // alternatives bind the same names
            Self::Or(alternatives) => {
                if let Some(first) = alternatives.first() {
                    first.capture_names(out);
                }
            }
            Self::As { pattern, name } => {
                pattern.capture_names(out);
                out.push(name);
            }
        }
    }
}

/// A statement with its source range.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub position: CodeRange,
    pub node: Node,
}

#[derive(Debug, Clone)]
pub enum Node {
    Expr(ExprLoc),
    /// `a = b = value`
    Assign {
        targets: Vec<Target>,
        value: ExprLoc,
    },
    AugAssign {
        target: Target,
        op: Operator,
        value: ExprLoc,
    },
    /// `x: T = value`; the annotation is discarded.
    AnnAssign {
        target: Target,
        value: Option<ExprLoc>,
    },
    Pass,
    Break,
    Continue,
    Del(Vec<Target>),
    Return(Option<ExprLoc>),
    Raise {
        exc: Option<ExprLoc>,
        cause: Option<ExprLoc>,
    },
    Global(Vec<Identifier>),
    Nonlocal(Vec<Identifier>),
    Assert {
        test: ExprLoc,
        msg: Option<ExprLoc>,
    },
    Import(Vec<ImportAlias>),
    ImportFrom {
        module: String,
        names: ImportNames,
    },
    If {
        test: ExprLoc,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: ExprLoc,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: ExprLoc,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Try(Box<Try>),
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    FunctionDef(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
    Match {
        subject: ExprLoc,
        cases: Vec<MatchCase>,
    },
}

/// A parsed module: its statements and, after `prepare`, its scope layout.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
    pub scope: ScopeInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_dunders_line_up() {
        assert_eq!(Operator::Add.dunder(), StaticStrings::DunderAdd.id());
        assert_eq!(Operator::BitAnd.dunder(), StaticStrings::DunderAnd.id());
        assert_eq!(Operator::Sub.reflected_dunder(), StaticStrings::DunderRSub.id());
        assert_eq!(Operator::Pow.inplace_dunder(), StaticStrings::DunderIPow.id());
        assert_eq!(Operator::BitAnd.inplace_dunder(), StaticStrings::DunderIAnd.id());
    }
}
