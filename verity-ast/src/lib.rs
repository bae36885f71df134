#![forbid(unsafe_code)]

//! Annotated syntax tree consumed by the semantic core.
//!
//! The parser that produces these nodes lives outside this workspace. The tree
//! is already annotated: every math expression carries its span and every
//! import is classified as reasoned or external.

use miette::SourceSpan;
use serde::Serialize;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// Identifier without a meaningful source location (synthesised trees, tests).
pub fn ident(name: impl Into<String>) -> Ident {
    Spanned::new(span(0, 0), name.into())
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDecl {
    pub span: Span,
    pub name: Ident,
    pub kind: ModuleKind,
    pub imports: Vec<ImportDecl>,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModuleKind {
    /// Purely mathematical theory: types and definitions.
    Precis,
    /// Specification module: type families, invariants, operation contracts.
    Concept,
    /// Implementation of a concept; procedures inherit the concept contracts.
    Realization { concept: Ident },
    /// Client module built from facility instantiations.
    Facility,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportDecl {
    pub span: Span,
    pub name: Ident,
    /// `external` imports are trusted opaquely and never expanded into
    /// proof obligations.
    pub external: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    MathType(MathTypeDecl),
    MathFunction(MathFunctionDecl),
    TypeFamily(TypeFamilyDecl),
    Clause(ClauseDecl),
    Facility(FacilityDecl),
    Operation(OperationDecl),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MathTypeDecl {
    pub span: Span,
    pub name: Ident,
    pub supertype: Option<Ident>,
    pub proper: bool,
    pub class_of_classes: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MathFunctionDecl {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Ident>,
    pub result: Ident,
}

/// Program type whose values are modelled by a math type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeFamilyDecl {
    pub span: Span,
    pub name: Ident,
    pub model: Ident,
    pub exemplar: Ident,
    pub constraint: Option<MathExpr>,
    pub initialization: Option<MathExpr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ClauseKind {
    Constraint,
    Invariant,
    Correspondence,
    Convention,
}

impl ClauseKind {
    pub fn display(&self) -> &'static str {
        match self {
            ClauseKind::Constraint => "constraint",
            ClauseKind::Invariant => "invariant",
            ClauseKind::Correspondence => "correspondence",
            ClauseKind::Convention => "convention",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClauseDecl {
    pub span: Span,
    pub name: Option<Ident>,
    pub kind: ClauseKind,
    pub expr: MathExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FacilityDecl {
    pub span: Span,
    pub name: Ident,
    pub spec: Ident,
    pub realization: Option<Ident>,
    pub externally: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ParamMode {
    Updates,
    Replaces,
    Alters,
    Clears,
    Restores,
    Preserves,
    Evaluates,
}

impl ParamMode {
    /// Modes whose actual argument may leave the call with a new value.
    /// A `restores` promise is not proved by the callee, so it counts here.
    pub fn changes_actual(&self) -> bool {
        !matches!(self, ParamMode::Preserves | ParamMode::Evaluates)
    }

    pub fn display(&self) -> &'static str {
        match self {
            ParamMode::Updates => "updates",
            ParamMode::Replaces => "replaces",
            ParamMode::Alters => "alters",
            ParamMode::Clears => "clears",
            ParamMode::Restores => "restores",
            ParamMode::Preserves => "preserves",
            ParamMode::Evaluates => "evaluates",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamDecl {
    pub span: Span,
    pub mode: ParamMode,
    pub name: Ident,
    pub ty: Ident,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: Ident,
}

/// An operation contract; with a body it is a procedure that gets verified.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationDecl {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<ParamDecl>,
    pub requires: Option<MathExpr>,
    pub ensures: Option<MathExpr>,
    pub vars: Vec<VarDecl>,
    pub body: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Call(CallStmt),
    If(IfStmt),
    While(WhileStmt),
    Confirm(AssertStmt),
    Assume(AssertStmt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallStmt {
    pub span: Span,
    pub qualifier: Option<Ident>,
    pub name: Ident,
    pub args: Vec<MathExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: MathExpr,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

/// `while cond changing x, y; maintaining I; decreasing P; do ... end`
#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: MathExpr,
    /// `None` when the clause is omitted; the changed variables are then
    /// inferred from the body.
    pub changing: Option<Vec<Ident>>,
    pub maintaining: Option<MathExpr>,
    pub decreasing: Option<MathExpr>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssertStmt {
    pub span: Span,
    pub expr: MathExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MathExpr {
    pub span: Span,
    pub kind: MathExprKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Quantifier {
    ForAll,
    Exists,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MathExprKind {
    /// `x`, or `#x` for the incoming value of a parameter.
    Name { name: Ident, incoming: bool },
    IntLit(i64),
    BoolLit(bool),
    Apply { func: Ident, args: Vec<MathExpr> },
    And(Box<MathExpr>, Box<MathExpr>),
    Implies(Box<MathExpr>, Box<MathExpr>),
    Not(Box<MathExpr>),
    Quantified {
        quantifier: Quantifier,
        binder: Ident,
        ty: Ident,
        body: Box<MathExpr>,
    },
    /// `{{ then if cond; otherwise otherwise }}`
    Alternative {
        cond: Box<MathExpr>,
        then: Box<MathExpr>,
        otherwise: Box<MathExpr>,
    },
}

// Builders for synthesised trees. Spans are empty.
impl MathExpr {
    fn synth(kind: MathExprKind) -> Self {
        MathExpr {
            span: span(0, 0),
            kind,
        }
    }

    pub fn name(name: &str) -> Self {
        Self::synth(MathExprKind::Name {
            name: ident(name),
            incoming: false,
        })
    }

    pub fn incoming(name: &str) -> Self {
        Self::synth(MathExprKind::Name {
            name: ident(name),
            incoming: true,
        })
    }

    pub fn int(value: i64) -> Self {
        Self::synth(MathExprKind::IntLit(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::synth(MathExprKind::BoolLit(value))
    }

    pub fn apply(func: &str, args: Vec<MathExpr>) -> Self {
        Self::synth(MathExprKind::Apply {
            func: ident(func),
            args,
        })
    }

    pub fn binary(func: &str, left: MathExpr, right: MathExpr) -> Self {
        Self::apply(func, vec![left, right])
    }

    pub fn and(left: MathExpr, right: MathExpr) -> Self {
        Self::synth(MathExprKind::And(Box::new(left), Box::new(right)))
    }

    pub fn implies(left: MathExpr, right: MathExpr) -> Self {
        Self::synth(MathExprKind::Implies(Box::new(left), Box::new(right)))
    }

    pub fn not(inner: MathExpr) -> Self {
        Self::synth(MathExprKind::Not(Box::new(inner)))
    }

    pub fn forall(binder: &str, ty: &str, body: MathExpr) -> Self {
        Self::quantified(Quantifier::ForAll, binder, ty, body)
    }

    pub fn exists(binder: &str, ty: &str, body: MathExpr) -> Self {
        Self::quantified(Quantifier::Exists, binder, ty, body)
    }

    fn quantified(quantifier: Quantifier, binder: &str, ty: &str, body: MathExpr) -> Self {
        Self::synth(MathExprKind::Quantified {
            quantifier,
            binder: ident(binder),
            ty: ident(ty),
            body: Box::new(body),
        })
    }

    pub fn alternative(cond: MathExpr, then: MathExpr, otherwise: MathExpr) -> Self {
        Self::synth(MathExprKind::Alternative {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

fn no_span() -> Span {
    span(0, 0)
}

// Declaration builders, mirroring the expression builders above.
impl ModuleDecl {
    pub fn new(name: &str, kind: ModuleKind) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            kind,
            imports: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn precis(name: &str) -> Self {
        Self::new(name, ModuleKind::Precis)
    }

    pub fn concept(name: &str) -> Self {
        Self::new(name, ModuleKind::Concept)
    }

    pub fn realization(name: &str, concept: &str) -> Self {
        Self::new(
            name,
            ModuleKind::Realization {
                concept: ident(concept),
            },
        )
    }

    pub fn facility_module(name: &str) -> Self {
        Self::new(name, ModuleKind::Facility)
    }

    pub fn import(mut self, module: &str) -> Self {
        self.imports.push(ImportDecl {
            span: no_span(),
            name: ident(module),
            external: false,
        });
        self
    }

    pub fn import_external(mut self, module: &str) -> Self {
        self.imports.push(ImportDecl {
            span: no_span(),
            name: ident(module),
            external: true,
        });
        self
    }

    pub fn item(mut self, item: impl Into<Item>) -> Self {
        self.items.push(item.into());
        self
    }
}

impl MathTypeDecl {
    pub fn new(name: &str, supertype: Option<&str>, proper: bool) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            supertype: supertype.map(ident),
            proper,
            class_of_classes: false,
        }
    }
}

impl MathFunctionDecl {
    pub fn new(name: &str, params: &[&str], result: &str) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            params: params.iter().map(|p| ident(*p)).collect(),
            result: ident(result),
        }
    }
}

impl TypeFamilyDecl {
    pub fn new(name: &str, model: &str, exemplar: &str) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            model: ident(model),
            exemplar: ident(exemplar),
            constraint: None,
            initialization: None,
        }
    }

    pub fn constraint(mut self, e: MathExpr) -> Self {
        self.constraint = Some(e);
        self
    }

    pub fn initialization(mut self, e: MathExpr) -> Self {
        self.initialization = Some(e);
        self
    }
}

impl ClauseDecl {
    pub fn new(kind: ClauseKind, expr: MathExpr) -> Self {
        Self {
            span: no_span(),
            name: None,
            kind,
            expr,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(ident(name));
        self
    }
}

impl FacilityDecl {
    pub fn new(name: &str, spec: &str, realization: Option<&str>) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            spec: ident(spec),
            realization: realization.map(ident),
            externally: false,
        }
    }
}

impl OperationDecl {
    pub fn new(name: &str) -> Self {
        Self {
            span: no_span(),
            name: ident(name),
            params: Vec::new(),
            requires: None,
            ensures: None,
            vars: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, mode: ParamMode, name: &str, ty: &str) -> Self {
        self.params.push(ParamDecl {
            span: no_span(),
            mode,
            name: ident(name),
            ty: ident(ty),
        });
        self
    }

    pub fn requires(mut self, e: MathExpr) -> Self {
        self.requires = Some(e);
        self
    }

    pub fn ensures(mut self, e: MathExpr) -> Self {
        self.ensures = Some(e);
        self
    }

    pub fn var(mut self, name: &str, ty: &str) -> Self {
        self.vars.push(VarDecl {
            span: no_span(),
            name: ident(name),
            ty: ident(ty),
        });
        self
    }

    pub fn body(mut self, stmts: Vec<Stmt>) -> Self {
        self.body = Some(Block::new(stmts));
        self
    }
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            span: no_span(),
            stmts,
        }
    }
}

impl Stmt {
    pub fn call(name: &str, args: Vec<MathExpr>) -> Self {
        Stmt::Call(CallStmt {
            span: no_span(),
            qualifier: None,
            name: ident(name),
            args,
        })
    }

    pub fn qualified_call(qualifier: &str, name: &str, args: Vec<MathExpr>) -> Self {
        Stmt::Call(CallStmt {
            span: no_span(),
            qualifier: Some(ident(qualifier)),
            name: ident(name),
            args,
        })
    }

    pub fn if_then(cond: MathExpr, then_stmts: Vec<Stmt>, else_stmts: Option<Vec<Stmt>>) -> Self {
        Stmt::If(IfStmt {
            span: no_span(),
            cond,
            then_block: Block::new(then_stmts),
            else_block: else_stmts.map(Block::new),
        })
    }

    pub fn while_loop(cond: MathExpr, body: Vec<Stmt>) -> Self {
        Stmt::While(WhileStmt {
            span: no_span(),
            cond,
            changing: None,
            maintaining: None,
            decreasing: None,
            body: Block::new(body),
        })
    }

    /// Sets the `changing` clause of a `while`; other statements are returned
    /// unchanged. Likewise for [`Stmt::maintaining`] and [`Stmt::decreasing`].
    pub fn changing(mut self, names: &[&str]) -> Self {
        if let Stmt::While(w) = &mut self {
            w.changing = Some(names.iter().map(|n| ident(*n)).collect());
        }
        self
    }

    pub fn maintaining(mut self, invariant: MathExpr) -> Self {
        if let Stmt::While(w) = &mut self {
            w.maintaining = Some(invariant);
        }
        self
    }

    pub fn decreasing(mut self, metric: MathExpr) -> Self {
        if let Stmt::While(w) = &mut self {
            w.decreasing = Some(metric);
        }
        self
    }

    pub fn confirm(expr: MathExpr) -> Self {
        Stmt::Confirm(AssertStmt {
            span: no_span(),
            expr,
        })
    }

    pub fn assume(expr: MathExpr) -> Self {
        Stmt::Assume(AssertStmt {
            span: no_span(),
            expr,
        })
    }
}

macro_rules! item_from {
    ($($decl:ident => $variant:ident),* $(,)?) => {
        $(impl From<$decl> for Item {
            fn from(decl: $decl) -> Self {
                Item::$variant(decl)
            }
        })*
    };
}

item_from! {
    MathTypeDecl => MathType,
    MathFunctionDecl => MathFunction,
    TypeFamilyDecl => TypeFamily,
    ClauseDecl => Clause,
    FacilityDecl => Facility,
    OperationDecl => Operation,
}
