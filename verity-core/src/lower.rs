#![forbid(unsafe_code)]

//! Lowering of annotated math expressions and procedure bodies into the typed
//! forms the VC generator consumes. All name resolution happens here.

use std::sync::Arc;

use verity_ast::{Block, CallStmt, Ident, MathExpr, MathExprKind, ParamMode, Span, Stmt, WhileStmt, ident};

use crate::catalogue::{Catalogue, Effect};
use crate::context::Context;
use crate::error::{ErrorKind, SemanticError};
use crate::expr::Expr;
use crate::scope::{ScopeId, SymbolTable};
use crate::symbol::{OperationSig, ProgramType, Symbol, SymbolKind};
use crate::types::{TypeGraph, TypeId};

/// A typed program statement.
#[derive(Clone, Debug)]
pub enum Statement {
    /// `swap(a, b)`: both operands are variables of the same type.
    Swap { left: Expr, right: Expr, span: Span },
    /// `assign(x, e)`: `target` is a variable.
    Assign { target: Expr, value: Expr, span: Span },
    Call {
        callee: Arc<OperationSig>,
        args: Vec<Expr>,
        span: Span,
    },
    If {
        cond: Expr,
        then_branch: Vec<Statement>,
        else_branch: Vec<Statement>,
        span: Span,
    },
    While {
        cond: Expr,
        /// `true` when the loop has no `maintaining` clause.
        invariant: Expr,
        decreasing: Option<Expr>,
        /// Variables the body may change, with their types.
        changing: Vec<(String, TypeId)>,
        body: Vec<Statement>,
        span: Span,
    },
    Confirm { expr: Expr, span: Span },
    Assume { expr: Expr, span: Span },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Swap { span, .. }
            | Statement::Assign { span, .. }
            | Statement::Call { span, .. }
            | Statement::If { span, .. }
            | Statement::While { span, .. }
            | Statement::Confirm { span, .. }
            | Statement::Assume { span, .. } => *span,
        }
    }

    /// Variables this statement may leave with a new value, in order of
    /// first appearance.
    pub fn changed_variables(&self) -> Vec<(String, TypeId)> {
        let mut out = Vec::new();
        collect_changed(std::slice::from_ref(self), &mut out);
        out
    }
}

fn collect_changed(stmts: &[Statement], out: &mut Vec<(String, TypeId)>) {
    let add = |e: &Expr, out: &mut Vec<(String, TypeId)>| {
        if let Some(v) = e.as_var() {
            if !out.iter().any(|(name, _)| *name == v.name) {
                out.push((v.name.clone(), e.ty()));
            }
        }
    };
    for stmt in stmts {
        match stmt {
            Statement::Swap { left, right, .. } => {
                add(left, out);
                add(right, out);
            }
            Statement::Assign { target, .. } => add(target, out),
            Statement::Call { callee, args, .. } => {
                for (formal, arg) in callee.params.iter().zip(args) {
                    if formal.mode.changes_actual() {
                        add(arg, out);
                    }
                }
            }
            Statement::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_changed(then_branch, out);
                collect_changed(else_branch, out);
            }
            Statement::While { changing, .. } => {
                for (name, ty) in changing {
                    if !out.iter().any(|(n, _)| n == name) {
                        out.push((name.clone(), *ty));
                    }
                }
            }
            Statement::Confirm { .. } | Statement::Assume { .. } => {}
        }
    }
}

pub struct Lowerer<'c> {
    types: &'c TypeGraph,
    catalogue: &'c Catalogue,
    symbols: &'c SymbolTable,
    scope: ScopeId,
    /// Quantifier binders in scope, innermost last.
    binders: Vec<(String, TypeId)>,
}

impl<'c> Lowerer<'c> {
    pub fn new(ctx: &'c Context, scope: ScopeId) -> Self {
        Self {
            types: &ctx.types,
            catalogue: &ctx.catalogue,
            symbols: &ctx.symbols,
            scope,
            binders: Vec::new(),
        }
    }

    /// Resolves a type name: a math type, or a program type standing for its
    /// model.
    pub fn resolve_type(&self, name: &Ident) -> Result<(TypeId, Option<Arc<ProgramType>>), SemanticError> {
        match &self.symbols.resolve(self.scope, name)?.kind {
            SymbolKind::MathType(id) => Ok((*id, None)),
            SymbolKind::ProgramType(pt) => Ok((pt.model, Some(Arc::clone(pt)))),
            other => Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                name.span,
                format!("'{}' is a {}, not a type", name.node, other.describe()),
            )
            .with_arg(&name.node)),
        }
    }

    /// Lowers an expression that must be a proposition.
    pub fn lower_assertion(&mut self, e: &MathExpr) -> Result<Expr, SemanticError> {
        let expr = self.lower_math(e)?;
        if !self.types.is_subtype(expr.ty(), self.types.boolean()) {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                e.span,
                format!("assertion must be of type B, found {}", self.types.name(expr.ty())),
            )
            .with_arg(self.types.name(self.types.boolean()))
            .with_arg(self.types.name(expr.ty())));
        }
        Ok(expr)
    }

    pub fn lower_math(&mut self, e: &MathExpr) -> Result<Expr, SemanticError> {
        let types = self.types;
        match &e.kind {
            MathExprKind::Name { name, incoming } => self.lower_name(name, *incoming),
            MathExprKind::IntLit(n) => {
                let ty = if *n >= 0 {
                    self.catalogue.natural()
                } else {
                    self.catalogue.integer()
                };
                Ok(Expr::int(*n, ty))
            }
            MathExprKind::BoolLit(b) => Ok(Expr::bool(types, *b)),
            MathExprKind::Apply { func, args } => {
                let sig = match &self.symbols.resolve(self.scope, func)?.kind {
                    SymbolKind::Operator(sig) => Arc::clone(sig),
                    other => return Err(not_a_function(func, other)),
                };
                let args = args
                    .iter()
                    .map(|a| self.lower_math(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Expr::apply(types, &sig, args).map_err(|err| err.at(e.span))
            }
            MathExprKind::And(l, r) => {
                let (l, r) = (self.lower_math(l)?, self.lower_math(r)?);
                Expr::and(types, l, r).map_err(|err| err.at(e.span))
            }
            MathExprKind::Implies(l, r) => {
                let (l, r) = (self.lower_math(l)?, self.lower_math(r)?);
                Expr::implies(types, l, r).map_err(|err| err.at(e.span))
            }
            MathExprKind::Not(inner) => {
                let inner = self.lower_math(inner)?;
                Expr::not(types, inner).map_err(|err| err.at(e.span))
            }
            MathExprKind::Quantified {
                quantifier,
                binder,
                ty,
                body,
            } => {
                let (binder_ty, _) = self.resolve_type(ty)?;
                self.binders.push((binder.node.clone(), binder_ty));
                let body = self.lower_math(body);
                self.binders.pop();
                Expr::quantified(types, *quantifier, binder.node.clone(), binder_ty, body?)
                    .map_err(|err| err.at(e.span))
            }
            MathExprKind::Alternative {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.lower_math(cond)?;
                let then = self.lower_math(then)?;
                let otherwise = self.lower_math(otherwise)?;
                Expr::alternative(types, cond, then, otherwise).map_err(|err| err.at(e.span))
            }
        }
    }

    fn lower_name(&self, name: &Ident, incoming: bool) -> Result<Expr, SemanticError> {
        if !incoming {
            if let Some((_, ty)) = self.binders.iter().rev().find(|(b, _)| *b == name.node) {
                return Ok(Expr::var(name.node.clone(), *ty));
            }
        }
        match &self.symbols.resolve(self.scope, name)?.kind {
            SymbolKind::Variable(var) if incoming && var.mode.is_none() => Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                name.span,
                format!("'#{}' names an incoming value, but '{}' is not a parameter", name.node, name.node),
            )
            .with_arg(&name.node)),
            SymbolKind::Variable(var) if incoming => Ok(Expr::incoming(name.node.clone(), var.ty)),
            SymbolKind::Variable(var) => Ok(Expr::var(name.node.clone(), var.ty)),
            SymbolKind::Operator(sig) if sig.params.is_empty() && !incoming => {
                Expr::apply(self.types, sig, Vec::new()).map_err(|err| err.at(name.span))
            }
            other => Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                name.span,
                format!("'{}' is a {} and has no value", name.node, other.describe()),
            )
            .with_arg(&name.node)),
        }
    }

    pub fn lower_block(&mut self, block: &Block) -> Result<Vec<Statement>, SemanticError> {
        block.stmts.iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<Statement, SemanticError> {
        match stmt {
            Stmt::Call(call) => self.lower_call(call),
            Stmt::If(i) => {
                let cond = self.lower_assertion(&i.cond)?;
                let then_branch = self.lower_block(&i.then_block)?;
                let else_branch = match &i.else_block {
                    Some(b) => self.lower_block(b)?,
                    None => Vec::new(),
                };
                Ok(Statement::If {
                    cond,
                    then_branch,
                    else_branch,
                    span: i.span,
                })
            }
            Stmt::While(w) => self.lower_while(w),
            Stmt::Confirm(a) => Ok(Statement::Confirm {
                expr: self.lower_assertion(&a.expr)?,
                span: a.span,
            }),
            Stmt::Assume(a) => Ok(Statement::Assume {
                expr: self.lower_assertion(&a.expr)?,
                span: a.span,
            }),
        }
    }

    fn lower_while(&mut self, w: &WhileStmt) -> Result<Statement, SemanticError> {
        let cond = self.lower_assertion(&w.cond)?;
        let invariant = match &w.maintaining {
            Some(i) => self.lower_assertion(i)?,
            None => Expr::bool(self.types, true),
        };
        let decreasing = match &w.decreasing {
            Some(d) => {
                let metric = self.lower_math(d)?;
                let integer = self.catalogue.integer();
                if !self.types.is_subtype(metric.ty(), integer) {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        d.span,
                        format!("a decreasing clause must be of type Z, found {}", self.types.name(metric.ty())),
                    )
                    .with_arg(self.types.name(integer))
                    .with_arg(self.types.name(metric.ty())));
                }
                Some(metric)
            }
            None => None,
        };
        let body = self.lower_block(&w.body)?;

        let mut inferred = Vec::new();
        collect_changed(&body, &mut inferred);
        let changing = match &w.changing {
            None => inferred,
            Some(listed) => {
                let mut changing = Vec::with_capacity(listed.len());
                for name in listed {
                    let var = self.lower_name(name, false)?;
                    self.check_changeable(&var, name.span)?;
                    changing.push((name.node.clone(), var.ty()));
                }
                if let Some((missing, _)) = inferred.iter().find(|(n, _)| !changing.iter().any(|(c, _)| c == n)) {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        w.span,
                        format!("'{missing}' is changed in the loop but missing from its changing clause"),
                    )
                    .with_arg(missing));
                }
                changing
            }
        };

        Ok(Statement::While {
            cond,
            invariant,
            decreasing,
            changing,
            body,
            span: w.span,
        })
    }

    /// A statement may change `e` only when it is the current value of a
    /// variable that is not a `preserves` parameter.
    fn check_changeable(&self, e: &Expr, span: Span) -> Result<(), SemanticError> {
        let Some(var) = e.as_var() else {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                span,
                format!("'{e}' is changed by this statement and must be a variable"),
            ));
        };
        if var.incoming {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                span,
                format!("'{var}' is an incoming value and cannot be changed"),
            )
            .with_arg(&var.name));
        }
        if let Ok(symbol) = self.symbols.resolve(self.scope, &ident(&var.name)) {
            if let SymbolKind::Variable(v) = &symbol.kind {
                if v.mode == Some(ParamMode::Preserves) {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!("'{}' is a preserves parameter and cannot be changed", var.name),
                    )
                    .with_arg(&var.name));
                }
            }
        }
        Ok(())
    }

    fn resolve_callee(&self, call: &CallStmt) -> Result<&'c Symbol, SemanticError> {
        match &call.qualifier {
            Some(q) => self.symbols.resolve_qualified(self.scope, q, &call.name),
            None => self.symbols.resolve(self.scope, &call.name),
        }
    }

    fn lower_call(&mut self, call: &CallStmt) -> Result<Statement, SemanticError> {
        let callee = self.resolve_callee(call)?;
        let args = call
            .args
            .iter()
            .map(|a| self.lower_math(a))
            .collect::<Result<Vec<_>, _>>()?;

        match &callee.kind {
            SymbolKind::Operator(sig) if sig.effect == Effect::Swap => {
                let [left, right] = self.two_variables(call, args)?;
                if left.ty() != right.ty() {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        call.span,
                        format!(
                            "cannot swap {} with {}",
                            self.types.name(left.ty()),
                            self.types.name(right.ty())
                        ),
                    )
                    .with_arg(self.types.name(left.ty()))
                    .with_arg(self.types.name(right.ty())));
                }
                Ok(Statement::Swap {
                    left,
                    right,
                    span: call.span,
                })
            }
            SymbolKind::Operator(sig) if sig.effect == Effect::Assign => {
                let [target, value] = self.arity::<2>(call, args)?;
                self.check_changeable(&target, call.span)?;
                if !self.types.is_subtype(value.ty(), target.ty()) {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        call.span,
                        format!(
                            "cannot assign {} to a variable of type {}",
                            self.types.name(value.ty()),
                            self.types.name(target.ty())
                        ),
                    )
                    .with_arg(self.types.name(target.ty()))
                    .with_arg(self.types.name(value.ty())));
                }
                Ok(Statement::Assign {
                    target,
                    value,
                    span: call.span,
                })
            }
            SymbolKind::Operation(sig) => {
                if args.len() != sig.params.len() {
                    return Err(arity_error(call, sig.params.len(), args.len()));
                }
                for (arg, formal) in args.iter().zip(&sig.params) {
                    if formal.mode.changes_actual() {
                        self.check_changeable(arg, call.span)?;
                    }
                    if !self.types.is_subtype(arg.ty(), formal.ty) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            call.span,
                            format!(
                                "'{}' of '{}' expects {}, found {}",
                                formal.name,
                                sig.name,
                                self.types.name(formal.ty),
                                self.types.name(arg.ty())
                            ),
                        )
                        .with_arg(self.types.name(formal.ty))
                        .with_arg(self.types.name(arg.ty())));
                    }
                }
                Ok(Statement::Call {
                    callee: Arc::clone(sig),
                    args,
                    span: call.span,
                })
            }
            other => Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                call.name.span,
                format!("'{}' is a {} and cannot be called", call.name.node, other.describe()),
            )
            .with_arg(&call.name.node)),
        }
    }

    fn arity<const N: usize>(&self, call: &CallStmt, args: Vec<Expr>) -> Result<[Expr; N], SemanticError> {
        let found = args.len();
        args.try_into().map_err(|_| arity_error(call, N, found))
    }

    fn two_variables(&self, call: &CallStmt, args: Vec<Expr>) -> Result<[Expr; 2], SemanticError> {
        let pair = self.arity::<2>(call, args)?;
        for e in &pair {
            self.check_changeable(e, call.span)?;
        }
        Ok(pair)
    }
}

fn arity_error(call: &CallStmt, expected: usize, found: usize) -> SemanticError {
    SemanticError::new(
        ErrorKind::ArityMismatch,
        call.span,
        format!("'{}' expects {expected} argument(s), found {found}", call.name.node),
    )
    .with_arg(&call.name.node)
}

fn not_a_function(func: &Ident, kind: &SymbolKind) -> SemanticError {
    SemanticError::new(
        ErrorKind::TypeMismatch,
        func.span,
        format!("'{}' is a {} and cannot be applied in an assertion", func.node, kind.describe()),
    )
    .with_arg(&func.node)
}
