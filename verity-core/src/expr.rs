#![forbid(unsafe_code)]

//! Immutable typed assertion expressions.
//!
//! Nodes are only produced by the smart constructors below, which type-check
//! their operands against the [`TypeGraph`] as they go. Fields are private:
//! once built, an expression never changes. Substitution returns a new tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::Serialize;
use verity_ast::Quantifier;

use crate::catalogue::OperatorSig;
use crate::error::{ErrorKind, TypeError};
use crate::types::{TypeGraph, TypeId};

/// A variable occurrence: either the current value `x` or the incoming value
/// `#x` of a parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarRef {
    pub name: String,
    pub incoming: bool,
}

impl VarRef {
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming: false,
        }
    }

    pub fn incoming(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming: true,
        }
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.incoming {
            write!(f, "#{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Expr {
    ty: TypeId,
    kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ExprKind {
    Var(VarRef),
    Lit(Literal),
    Apply {
        op: String,
        args: Vec<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Quantified {
        quantifier: Quantifier,
        binder: String,
        binder_ty: TypeId,
        body: Box<Expr>,
    },
    Alternative {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Simultaneous substitution: every key is replaced by its value in one pass.
pub type Substitution = BTreeMap<VarRef, Expr>;

fn expect_boolean(types: &TypeGraph, e: &Expr, what: &str) -> Result<(), TypeError> {
    if types.is_subtype(e.ty, types.boolean()) {
        Ok(())
    } else {
        Err(TypeError::new(
            ErrorKind::TypeMismatch,
            format!("{what} must be of type B, found {}", types.name(e.ty)),
        )
        .with_arg(types.name(types.boolean()))
        .with_arg(types.name(e.ty)))
    }
}

impl Expr {
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn var(name: impl Into<String>, ty: TypeId) -> Self {
        Self::var_ref(VarRef::current(name), ty)
    }

    pub fn incoming(name: impl Into<String>, ty: TypeId) -> Self {
        Self::var_ref(VarRef::incoming(name), ty)
    }

    pub fn var_ref(var: VarRef, ty: TypeId) -> Self {
        Self {
            ty,
            kind: ExprKind::Var(var),
        }
    }

    pub fn bool(types: &TypeGraph, value: bool) -> Self {
        Self {
            ty: types.boolean(),
            kind: ExprKind::Lit(Literal::Bool(value)),
        }
    }

    pub fn int(value: i64, ty: TypeId) -> Self {
        Self {
            ty,
            kind: ExprKind::Lit(Literal::Int(value)),
        }
    }

    pub fn apply(types: &TypeGraph, sig: &OperatorSig, args: Vec<Expr>) -> Result<Self, TypeError> {
        let Some(result) = sig.result else {
            return Err(TypeError::new(
                ErrorKind::TypeMismatch,
                format!("'{}' is a program operation and has no mathematical value", sig.name),
            )
            .with_arg(&sig.name));
        };
        if args.len() != sig.params.len() {
            return Err(TypeError::new(
                ErrorKind::ArityMismatch,
                format!(
                    "'{}' expects {} argument(s), found {}",
                    sig.name,
                    sig.params.len(),
                    args.len()
                ),
            )
            .with_arg(&sig.name));
        }
        for (idx, (arg, param)) in args.iter().zip(&sig.params).enumerate() {
            if !types.is_subtype(arg.ty, *param) {
                return Err(TypeError::new(
                    ErrorKind::TypeMismatch,
                    format!(
                        "argument {} of '{}' expects {}, found {}",
                        idx + 1,
                        sig.name,
                        types.name(*param),
                        types.name(arg.ty)
                    ),
                )
                .with_arg(types.name(*param))
                .with_arg(types.name(arg.ty)));
            }
        }
        Ok(Self {
            ty: result,
            kind: ExprKind::Apply {
                op: sig.name.clone(),
                args,
            },
        })
    }

    pub fn and(types: &TypeGraph, left: Expr, right: Expr) -> Result<Self, TypeError> {
        expect_boolean(types, &left, "conjunct")?;
        expect_boolean(types, &right, "conjunct")?;
        Ok(Self {
            ty: types.boolean(),
            kind: ExprKind::And(Box::new(left), Box::new(right)),
        })
    }

    /// Right-nested conjunction of `parts`; `true` when empty.
    pub fn conjunction(types: &TypeGraph, parts: Vec<Expr>) -> Result<Self, TypeError> {
        let mut iter = parts.into_iter().rev();
        let Some(last) = iter.next() else {
            return Ok(Self::bool(types, true));
        };
        iter.try_fold(last, |acc, part| Self::and(types, part, acc))
    }

    pub fn implies(types: &TypeGraph, antecedent: Expr, consequent: Expr) -> Result<Self, TypeError> {
        expect_boolean(types, &antecedent, "antecedent")?;
        expect_boolean(types, &consequent, "consequent")?;
        Ok(Self {
            ty: types.boolean(),
            kind: ExprKind::Implies(Box::new(antecedent), Box::new(consequent)),
        })
    }

    pub fn not(types: &TypeGraph, inner: Expr) -> Result<Self, TypeError> {
        expect_boolean(types, &inner, "negated expression")?;
        Ok(Self {
            ty: types.boolean(),
            kind: ExprKind::Not(Box::new(inner)),
        })
    }

    pub fn quantified(
        types: &TypeGraph,
        quantifier: Quantifier,
        binder: impl Into<String>,
        binder_ty: TypeId,
        body: Expr,
    ) -> Result<Self, TypeError> {
        expect_boolean(types, &body, "quantifier body")?;
        Ok(Self {
            ty: types.boolean(),
            kind: ExprKind::Quantified {
                quantifier,
                binder: binder.into(),
                binder_ty,
                body: Box::new(body),
            },
        })
    }

    /// `{{ then if cond; otherwise otherwise }}`, typed by the least common
    /// proper supertype of both alternatives.
    pub fn alternative(
        types: &TypeGraph,
        cond: Expr,
        then: Expr,
        otherwise: Expr,
    ) -> Result<Self, TypeError> {
        expect_boolean(types, &cond, "alternative condition")?;
        let ty = types.least_common_supertype(then.ty, otherwise.ty, true)?;
        Ok(Self {
            ty,
            kind: ExprKind::Alternative {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        })
    }

    pub fn is_true(&self) -> bool {
        matches!(self.kind, ExprKind::Lit(Literal::Bool(true)))
    }

    pub fn as_var(&self) -> Option<&VarRef> {
        match &self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Top-level conjuncts, flattened, with literal `true` dropped.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match &self.kind {
            ExprKind::And(l, r) => {
                l.collect_conjuncts(out);
                r.collect_conjuncts(out);
            }
            _ if self.is_true() => {}
            _ => out.push(self),
        }
    }

    pub fn free_vars(&self) -> BTreeSet<VarRef> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<VarRef>) {
        match &self.kind {
            ExprKind::Var(v) => {
                if v.incoming || !bound.contains(&v.name) {
                    out.insert(v.clone());
                }
            }
            ExprKind::Lit(_) => {}
            ExprKind::Apply { args, .. } => {
                for a in args {
                    a.collect_free(bound, out);
                }
            }
            ExprKind::And(l, r) | ExprKind::Implies(l, r) => {
                l.collect_free(bound, out);
                r.collect_free(bound, out);
            }
            ExprKind::Not(inner) => inner.collect_free(bound, out),
            ExprKind::Quantified { binder, body, .. } => {
                bound.push(binder.clone());
                body.collect_free(bound, out);
                bound.pop();
            }
            ExprKind::Alternative {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_free(bound, out);
                then.collect_free(bound, out);
                otherwise.collect_free(bound, out);
            }
        }
    }

    /// Every variable name occurring anywhere, bound or free, and every
    /// constant (nullary operator) name.
    pub fn names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        match &self.kind {
            ExprKind::Var(v) => {
                out.insert(v.name.clone());
            }
            ExprKind::Lit(_) => {}
            ExprKind::Apply { op, args } if args.is_empty() => {
                out.insert(op.clone());
            }
            ExprKind::Apply { args, .. } => args.iter().for_each(|a| a.collect_names(out)),
            ExprKind::And(l, r) | ExprKind::Implies(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            ExprKind::Not(inner) => inner.collect_names(out),
            ExprKind::Quantified { binder, body, .. } => {
                out.insert(binder.clone());
                body.collect_names(out);
            }
            ExprKind::Alternative {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_names(out);
                then.collect_names(out);
                otherwise.collect_names(out);
            }
        }
    }

    pub fn substitute(&self, var: &VarRef, replacement: &Expr) -> Expr {
        let mut map = Substitution::new();
        map.insert(var.clone(), replacement.clone());
        self.substitute_all(&map)
    }

    /// Replaces all free occurrences of every key of `map` at once. Values are
    /// never themselves rewritten, so `{a ↦ b, b ↦ a}` exchanges `a` and `b`.
    pub fn substitute_all(&self, map: &Substitution) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        let kind = match &self.kind {
            ExprKind::Var(v) => match map.get(v) {
                Some(replacement) => return replacement.clone(),
                None => ExprKind::Var(v.clone()),
            },
            ExprKind::Lit(lit) => ExprKind::Lit(lit.clone()),
            ExprKind::Apply { op, args } => ExprKind::Apply {
                op: op.clone(),
                args: args.iter().map(|a| a.substitute_all(map)).collect(),
            },
            ExprKind::And(l, r) => {
                ExprKind::And(Box::new(l.substitute_all(map)), Box::new(r.substitute_all(map)))
            }
            ExprKind::Implies(l, r) => {
                ExprKind::Implies(Box::new(l.substitute_all(map)), Box::new(r.substitute_all(map)))
            }
            ExprKind::Not(inner) => ExprKind::Not(Box::new(inner.substitute_all(map))),
            ExprKind::Quantified {
                quantifier,
                binder,
                binder_ty,
                body,
            } => return self.substitute_under_binder(*quantifier, binder, *binder_ty, body, map),
            ExprKind::Alternative {
                cond,
                then,
                otherwise,
            } => ExprKind::Alternative {
                cond: Box::new(cond.substitute_all(map)),
                then: Box::new(then.substitute_all(map)),
                otherwise: Box::new(otherwise.substitute_all(map)),
            },
        };
        Expr { ty: self.ty, kind }
    }

    fn substitute_under_binder(
        &self,
        quantifier: Quantifier,
        binder: &str,
        binder_ty: TypeId,
        body: &Expr,
        map: &Substitution,
    ) -> Expr {
        // The binder shadows its own name; only keys that occur free in the
        // body matter below it.
        let body_free = body.free_vars();
        let inner: Substitution = map
            .iter()
            .filter(|(k, _)| !(k.name == binder && !k.incoming) && body_free.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if inner.is_empty() {
            return self.clone();
        }

        let captures = inner
            .values()
            .any(|v| v.free_vars().contains(&VarRef::current(binder)));
        let (binder, body) = if captures {
            let mut avoid = body.names();
            for (k, v) in &inner {
                avoid.insert(k.name.clone());
                avoid.extend(v.names());
            }
            let fresh = fresh_name(binder, &avoid);
            let renamed = body.substitute(&VarRef::current(binder), &Expr::var(fresh.clone(), binder_ty));
            (fresh, renamed)
        } else {
            (binder.to_string(), body.clone())
        };

        Expr {
            ty: self.ty,
            kind: ExprKind::Quantified {
                quantifier,
                binder,
                binder_ty,
                body: Box::new(body.substitute_all(&inner)),
            },
        }
    }

    /// Deterministic hash of the tree shape, used to de-duplicate antecedents.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Rendering that names binder types.
    pub fn display<'a>(&'a self, types: &'a TypeGraph) -> Rendered<'a> {
        Rendered {
            expr: self,
            types: Some(types),
        }
    }

    fn is_atomic(&self) -> bool {
        match &self.kind {
            ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::Alternative { .. } => true,
            ExprKind::Apply { op, args } => !is_infix(op, args.len()),
            _ => false,
        }
    }
}

/// `base` followed by as many primes as needed to avoid every name in `avoid`.
pub fn fresh_name(base: &str, avoid: &BTreeSet<String>) -> String {
    let mut candidate = format!("{base}'");
    while avoid.contains(&candidate) {
        candidate.push('\'');
    }
    candidate
}

fn is_infix(op: &str, arity: usize) -> bool {
    arity == 2 && !op.chars().any(|c| c.is_alphanumeric() || c == '_')
}

pub struct Rendered<'a> {
    expr: &'a Expr,
    types: Option<&'a TypeGraph>,
}

impl Rendered<'_> {
    fn child<'b>(&'b self, expr: &'b Expr) -> Rendered<'b> {
        Rendered {
            expr,
            types: self.types,
        }
    }

    fn operand(&self, f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
        if expr.is_atomic() {
            write!(f, "{}", self.child(expr))
        } else {
            write!(f, "({})", self.child(expr))
        }
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr.kind {
            ExprKind::Var(v) => write!(f, "{v}"),
            ExprKind::Lit(Literal::Bool(b)) => write!(f, "{b}"),
            ExprKind::Lit(Literal::Int(n)) => write!(f, "{n}"),
            ExprKind::Apply { op, args } if is_infix(op, args.len()) => {
                self.operand(f, &args[0])?;
                write!(f, " {op} ")?;
                self.operand(f, &args[1])
            }
            ExprKind::Apply { op, args } if args.is_empty() => f.write_str(op),
            ExprKind::Apply { op, args } => {
                write!(f, "{op}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", self.child(a))?;
                }
                f.write_str(")")
            }
            ExprKind::And(l, r) => {
                // Conjunction is associative; only wrap looser operators.
                for (i, side) in [l, r].into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ∧ ")?;
                    }
                    if matches!(side.kind, ExprKind::And(..)) {
                        write!(f, "{}", self.child(side))?;
                    } else {
                        self.operand(f, side)?;
                    }
                }
                Ok(())
            }
            ExprKind::Implies(l, r) => {
                self.operand(f, l)?;
                f.write_str(" ⟹ ")?;
                self.operand(f, r)
            }
            ExprKind::Not(inner) => {
                f.write_str("¬")?;
                self.operand(f, inner)
            }
            ExprKind::Quantified {
                quantifier,
                binder,
                binder_ty,
                body,
            } => {
                let q = match quantifier {
                    Quantifier::ForAll => "∀",
                    Quantifier::Exists => "∃",
                };
                match self.types {
                    Some(types) => write!(f, "{q}{binder}: {}, ", types.name(*binder_ty))?,
                    None => write!(f, "{q}{binder}, ")?,
                }
                write!(f, "{}", self.child(body))
            }
            ExprKind::Alternative {
                cond,
                then,
                otherwise,
            } => write!(
                f,
                "{{{{{} if {}; {} otherwise}}}}",
                self.child(then),
                self.child(cond),
                self.child(otherwise)
            ),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Rendered {
            expr: self,
            types: None,
        }
        .fmt(f)
    }
}
