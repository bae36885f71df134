#![forbid(unsafe_code)]

//! Backward (weakest-precondition) VC generation.
//!
//! Obligations start at the end of a procedure with its `ensures` clause and
//! are pushed through the body statement by statement, last statement first.
//! What survives at the top of the body is stated over the incoming values,
//! which equal the current ones there.

use std::collections::{BTreeSet, HashSet};

use rayon::prelude::*;
use verity_ast::Span;
use verity_core::{
    Context, Diagnostics, ErrorKind, Expr, ExprKind, FormalParam, Literal, OperationSig,
    PopulatedModule, Procedure, Property, SemanticError, Statement, Substitution, TypeGraph, TypeId,
    VarRef, fresh_name,
};

use crate::config::VcGenConfig;
use crate::constraints::{ConstraintCollector, ConstraintKind};
use crate::vc::{Location, ModuleVcs, VcRule, VerificationCondition};

/// Name of the metric's value at the start of an iteration.
const METRIC: &str = "P_Val";

/// A goal still being pushed backwards through the body.
#[derive(Clone, Debug)]
struct Obligation {
    goal: Expr,
    rule: VcRule,
    span: Span,
}

pub struct VcGenerator<'c> {
    ctx: &'c Context,
    config: &'c VcGenConfig,
}

impl<'c> VcGenerator<'c> {
    pub fn new(ctx: &'c Context, config: &'c VcGenConfig) -> Self {
        Self { ctx, config }
    }

    /// VCs of every procedure of `module`. A failing procedure is reported
    /// and contributes no VCs; the others are unaffected.
    pub fn generate_module(&self, module: &PopulatedModule, diagnostics: &mut Diagnostics) -> ModuleVcs {
        let mut out = ModuleVcs::new(&module.name);
        let constraints = match ConstraintCollector::new(self.ctx).referenced_constraints_of(
            &module.name,
            &ConstraintKind::MODULE_LEVEL,
            module.span,
        ) {
            Ok(c) => c,
            Err(err) => {
                diagnostics.report(err);
                return out;
            }
        };

        let results: Vec<Result<Vec<VerificationCondition>, SemanticError>> = if self.config.parallel {
            module
                .procedures
                .par_iter()
                .map(|p| self.generate_procedure(&module.name, p, &constraints))
                .collect()
        } else {
            module
                .procedures
                .iter()
                .map(|p| self.generate_procedure(&module.name, p, &constraints))
                .collect()
        };

        for result in results {
            match result {
                Ok(vcs) => out.vcs.extend(vcs),
                Err(err) => diagnostics.report(err),
            }
        }
        tracing::debug!(module = %module.name, vcs = out.vcs.len(), "generated module VCs");
        out
    }

    pub fn generate_procedure(
        &self,
        module: &str,
        procedure: &Procedure,
        constraints: &[Expr],
    ) -> Result<Vec<VerificationCondition>, SemanticError> {
        let sig = &procedure.sig;
        let span = tracing::debug_span!("procedure", op = %sig.qualified_name());
        let _enter = span.enter();

        let mut givens: Vec<Expr> = constraints.to_vec();
        for param in &sig.params {
            if let Some(c) = param.program_type.as_ref().and_then(|pt| pt.constraint_for(&param.name)) {
                givens.push(c);
            }
        }
        givens.extend(sig.requires.iter().cloned());
        for local in &procedure.locals {
            if let Some(init) = local
                .program_type
                .as_ref()
                .and_then(|pt| pt.initialization_for(&local.name))
            {
                givens.push(init);
            }
        }
        let at_entry = incoming_is_current(&sig.params);
        let mut antecedent = Antecedent::default();
        for given in &givens {
            antecedent.add(&given.substitute_all(&at_entry));
        }

        let mut reserved: BTreeSet<String> = givens.iter().flat_map(Expr::names).collect();
        reserved.extend(sig.params.iter().map(|p| p.name.clone()));
        reserved.extend(procedure.locals.iter().map(|l| l.name.clone()));
        collect_statement_names(&procedure.body, &mut reserved);
        let walker = Walker { ctx: self.ctx, reserved };

        // A `clears` parameter must leave holding its type's initial value.
        let mut owed: Vec<Expr> = sig.ensures.iter().cloned().collect();
        owed.extend(sig.clears_ensures());
        let ensures = Obligation {
            goal: Expr::conjunction(&self.ctx.types, owed).map_err(|e| e.at(sig.span))?,
            rule: VcRule::Ensures,
            span: sig.span,
        };
        let obligations = walker.apply_block(&procedure.body, vec![ensures])?;

        // Obligations were appended while walking backwards.
        let (mut ordered, finals): (Vec<_>, Vec<_>) = obligations
            .into_iter()
            .rev()
            .partition(|o| o.rule != VcRule::Ensures);
        ordered.extend(finals);

        let mut vcs = Vec::new();
        for obligation in ordered {
            let mut local = antecedent.clone();
            let mut goal = obligation.goal.substitute_all(&at_entry);
            while let ExprKind::Implies(premise, conclusion) = goal.kind() {
                for c in premise.conjuncts() {
                    local.add(c);
                }
                goal = (**conclusion).clone();
            }

            let consequents = if self.config.split_conjuncts && goal.conjuncts().len() > 1 {
                goal.conjuncts().into_iter().cloned().collect()
            } else {
                vec![goal]
            };
            for consequent in consequents {
                let trivial = self.is_trivial(&consequent, &local.items);
                if trivial && !self.config.keep_trivial {
                    continue;
                }
                vcs.push(VerificationCondition {
                    operation: sig.qualified_name(),
                    sequence: vcs.len() + 1,
                    antecedent: local.items.clone(),
                    consequent,
                    location: Location::new(module, obligation.span),
                    rule: obligation.rule.clone(),
                    description: describe(&obligation.rule, sig),
                    trivial,
                });
            }
        }
        tracing::debug!(vcs = vcs.len(), "generated procedure VCs");
        Ok(vcs)
    }

    /// Every consequent conjunct is `true`, a reflexive relation applied to
    /// equal operands, or already assumed.
    pub fn is_trivial(&self, consequent: &Expr, antecedent: &[Expr]) -> bool {
        consequent
            .conjuncts()
            .into_iter()
            .all(|c| self.conjunct_is_trivial(c, antecedent))
    }

    fn conjunct_is_trivial(&self, c: &Expr, antecedent: &[Expr]) -> bool {
        if c.is_true() || antecedent.contains(c) {
            return true;
        }
        let ExprKind::Apply { op, args } = c.kind() else {
            return false;
        };
        let Some(sig) = self.ctx.catalogue.get(op) else {
            return false;
        };
        if let [x, y] = args.as_slice() {
            if sig.has(Property::Reflexive) && x == y {
                return true;
            }
            if let ExprKind::Lit(Literal::Bool(lit)) = y.kind() {
                if sig.has(Property::Identity(*lit)) {
                    return self.conjunct_is_trivial(x, antecedent);
                }
            }
            if sig.has(Property::Commutative) {
                return antecedent.iter().any(|a| match a.kind() {
                    ExprKind::Apply { op: aop, args: aargs } => {
                        aop == op && aargs.len() == 2 && aargs[0] == *y && aargs[1] == *x
                    }
                    _ => false,
                });
            }
        }
        false
    }
}

/// Pushes obligations backwards through the body of one procedure.
struct Walker<'c> {
    ctx: &'c Context,
    /// Names a fresh variable must never take: everything the procedure's
    /// givens and statements mention.
    reserved: BTreeSet<String>,
}

impl Walker<'_> {
    fn apply_block(&self, stmts: &[Statement], mut obligations: Vec<Obligation>) -> Result<Vec<Obligation>, SemanticError> {
        for stmt in stmts.iter().rev() {
            obligations = self.apply_stmt(stmt, obligations)?;
        }
        Ok(obligations)
    }

    fn apply_stmt(&self, stmt: &Statement, obligations: Vec<Obligation>) -> Result<Vec<Obligation>, SemanticError> {
        let types = &self.ctx.types;
        match stmt {
            Statement::Swap { left, right, span } => {
                let (Some(a), Some(b)) = (current_var(left), current_var(right)) else {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        *span,
                        "swap exchanges current variables only",
                    ));
                };
                tracing::trace!(%a, %b, "swap rule");
                let mut map = Substitution::new();
                map.insert(a.clone(), right.clone());
                map.insert(b.clone(), left.clone());
                Ok(rewrite(obligations, |g| g.substitute_all(&map)))
            }
            Statement::Assign { target, value, span } => {
                let Some(x) = current_var(target) else {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        *span,
                        "the target of an assignment must be a current variable",
                    ));
                };
                tracing::trace!(%x, %value, "assign rule");
                Ok(rewrite(obligations, |g| g.substitute(x, value)))
            }
            Statement::Call { callee, args, span } => self.apply_call(callee, args, *span, obligations),
            Statement::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => {
                tracing::trace!(%cond, "conditional rule");
                let negated = Expr::not(types, cond.clone()).map_err(|e| e.at(*span))?;
                let taken = self.apply_block(then_branch, obligations.clone())?;
                let skipped = self.apply_block(else_branch, obligations)?;
                let mut out = guard_all(types, &negated, skipped, *span)?;
                out.extend(guard_all(types, cond, taken, *span)?);
                Ok(out)
            }
            Statement::While {
                cond,
                invariant,
                decreasing,
                changing,
                body,
                span,
            } => self.apply_while(
                Loop {
                    cond,
                    invariant,
                    decreasing: decreasing.as_ref(),
                    changing,
                    body,
                    span: *span,
                },
                obligations,
            ),
            Statement::Confirm { expr, span } => {
                let mut out = obligations;
                out.push(Obligation {
                    goal: expr.clone(),
                    rule: VcRule::Confirm,
                    span: *span,
                });
                Ok(out)
            }
            Statement::Assume { expr, span } => guard_all(types, expr, obligations, *span),
        }
    }

    /// Names a variable introduced in front of `obligations` must avoid.
    fn avoid<'e>(&self, obligations: &[Obligation], extra: impl IntoIterator<Item = &'e Expr>) -> BTreeSet<String> {
        let mut avoid = self.reserved.clone();
        for o in obligations {
            avoid.extend(o.goal.names());
        }
        for e in extra {
            avoid.extend(e.names());
        }
        avoid
    }

    /// Call rule: the callee's precondition becomes an obligation over the
    /// actuals; every pending goal must follow from the callee's
    /// postcondition, with each changed actual renamed to a fresh variable
    /// standing for its value after the call.
    fn apply_call(
        &self,
        callee: &OperationSig,
        args: &[Expr],
        span: Span,
        obligations: Vec<Obligation>,
    ) -> Result<Vec<Obligation>, SemanticError> {
        let types = &self.ctx.types;
        tracing::trace!(callee = %callee.qualified_name(), "call rule");

        let clears = callee.clears_ensures();
        let mut avoid = self.avoid(
            &obligations,
            args.iter()
                .chain(callee.requires.iter())
                .chain(callee.ensures.iter())
                .chain(clears.iter()),
        );

        let mut pre = Substitution::new();
        let mut post = Substitution::new();
        let mut renamed = Substitution::new();
        for (formal, actual) in callee.params.iter().zip(args) {
            pre.insert(VarRef::current(&formal.name), actual.clone());
            pre.insert(VarRef::incoming(&formal.name), actual.clone());
            post.insert(VarRef::incoming(&formal.name), actual.clone());

            if !formal.mode.changes_actual() {
                post.insert(VarRef::current(&formal.name), actual.clone());
                continue;
            }
            let Some(var) = current_var(actual) else {
                return Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    span,
                    format!(
                        "'{}' {} its argument, which must therefore be a current variable, found '{actual}'",
                        callee.name,
                        formal.mode.display()
                    ),
                )
                .with_arg(&callee.name)
                .with_arg(&formal.name));
            };
            let after = match renamed.get(var) {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = fresh_name(&var.name, &avoid);
                    avoid.insert(fresh.clone());
                    let after = Expr::var(fresh, actual.ty());
                    renamed.insert(var.clone(), after.clone());
                    after
                }
            };
            post.insert(VarRef::current(&formal.name), after);
        }

        let ensured: Vec<Expr> = callee
            .ensures
            .iter()
            .chain(clears.iter())
            .map(|e| e.substitute_all(&post))
            .collect();
        let ensured = match ensured.is_empty() {
            true => None,
            false => Some(Expr::conjunction(types, ensured).map_err(|err| err.at(span))?),
        };

        let mut out = Vec::with_capacity(obligations.len() + 1);
        for o in obligations {
            let goal = o.goal.substitute_all(&renamed);
            let goal = match &ensured {
                Some(e) => Expr::implies(types, e.clone(), goal).map_err(|err| err.at(span))?,
                None => goal,
            };
            out.push(Obligation { goal, ..o });
        }
        if let Some(requires) = &callee.requires {
            out.push(Obligation {
                goal: requires.substitute_all(&pre),
                rule: VcRule::CallRequires {
                    callee: callee.qualified_name(),
                },
                span,
            });
        }
        Ok(out)
    }

    /// Loop rule. The invariant must hold on entry. An iteration starting
    /// from the invariant and the condition must restore the invariant and
    /// strictly decrease the metric. On exit, the invariant and the negated
    /// condition must establish what follows the loop. Iteration and exit
    /// speak about fresh names for the changing variables, so nothing known
    /// before the loop carries over to them.
    fn apply_while(&self, l: Loop<'_>, obligations: Vec<Obligation>) -> Result<Vec<Obligation>, SemanticError> {
        let types = &self.ctx.types;
        tracing::trace!(cond = %l.cond, changing = l.changing.len(), "loop rule");

        let mut avoid = self.avoid(&obligations, [l.cond, l.invariant].into_iter().chain(l.decreasing));
        let metric = match l.decreasing {
            Some(p) => {
                let name = match avoid.contains(METRIC) {
                    true => fresh_name(METRIC, &avoid),
                    false => METRIC.to_string(),
                };
                avoid.insert(name.clone());
                Some((p, Expr::var(name, p.ty())))
            }
            None => None,
        };

        let mut iteration_end = Vec::new();
        if let Some((p, before)) = &metric {
            iteration_end.push(Obligation {
                goal: self.relation("<", (*p).clone(), before.clone(), l.span)?,
                rule: VcRule::Termination,
                span: l.span,
            });
        }
        if !l.invariant.is_true() {
            iteration_end.push(Obligation {
                goal: l.invariant.clone(),
                rule: VcRule::InvariantMaintained,
                span: l.span,
            });
        }
        let iteration = self.apply_block(l.body, iteration_end)?;
        for o in &iteration {
            avoid.extend(o.goal.names());
        }

        let mut havoc = Substitution::new();
        for (name, ty) in l.changing {
            let fresh = fresh_name(name, &avoid);
            avoid.insert(fresh.clone());
            havoc.insert(VarRef::current(name), Expr::var(fresh, *ty));
        }

        let assumed: Vec<Expr> = Some(l.invariant.clone()).filter(|i| !i.is_true()).into_iter().collect();
        let mut entering = assumed.clone();
        entering.push(l.cond.clone());
        if let Some((p, before)) = &metric {
            entering.push(self.relation("=", before.clone(), (*p).clone(), l.span)?);
        }
        let entering = Expr::conjunction(types, entering).map_err(|e| e.at(l.span))?;
        let mut leaving = assumed;
        leaving.push(Expr::not(types, l.cond.clone()).map_err(|e| e.at(l.span))?);
        let leaving = Expr::conjunction(types, leaving).map_err(|e| e.at(l.span))?;

        let mut out = guard_all(types, &leaving, obligations, l.span)?;
        out.extend(guard_all(types, &entering, iteration, l.span)?);
        let mut out = rewrite(out, |g| g.substitute_all(&havoc));
        if !l.invariant.is_true() {
            out.push(Obligation {
                goal: l.invariant.clone(),
                rule: VcRule::InvariantEntry,
                span: l.span,
            });
        }
        Ok(out)
    }

    fn relation(&self, op: &str, left: Expr, right: Expr, span: Span) -> Result<Expr, SemanticError> {
        let sig = self.ctx.catalogue.get(op).ok_or_else(|| {
            SemanticError::new(ErrorKind::NoSuchSymbol, span, format!("no operator '{op}' in the catalogue")).with_arg(op)
        })?;
        Expr::apply(&self.ctx.types, sig, vec![left, right]).map_err(|e| e.at(span))
    }
}

/// The parts of a `while` statement.
struct Loop<'s> {
    cond: &'s Expr,
    invariant: &'s Expr,
    decreasing: Option<&'s Expr>,
    changing: &'s [(String, TypeId)],
    body: &'s [Statement],
    span: Span,
}

/// Antecedent conjuncts without structural duplicates, in insertion order.
#[derive(Clone, Debug, Default)]
struct Antecedent {
    items: Vec<Expr>,
    seen: HashSet<u64>,
}

impl Antecedent {
    fn add(&mut self, e: &Expr) {
        for c in e.conjuncts() {
            if !self.seen.insert(c.structural_hash()) && self.items.contains(c) {
                continue;
            }
            self.items.push(c.clone());
        }
    }
}

/// The variable `e` denotes, unless it is an incoming value. Statements only
/// ever change current values.
fn current_var(e: &Expr) -> Option<&VarRef> {
    e.as_var().filter(|v| !v.incoming)
}

fn collect_statement_names(stmts: &[Statement], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            Statement::Swap { left, right, .. } => {
                out.extend(left.names());
                out.extend(right.names());
            }
            Statement::Assign { target, value, .. } => {
                out.extend(target.names());
                out.extend(value.names());
            }
            Statement::Call { callee, args, .. } => {
                for e in args.iter().chain(callee.requires.iter()).chain(callee.ensures.iter()) {
                    out.extend(e.names());
                }
            }
            Statement::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                out.extend(cond.names());
                collect_statement_names(then_branch, out);
                collect_statement_names(else_branch, out);
            }
            Statement::While {
                cond,
                invariant,
                decreasing,
                changing,
                body,
                ..
            } => {
                for e in [cond, invariant].into_iter().chain(decreasing.iter()) {
                    out.extend(e.names());
                }
                out.extend(changing.iter().map(|(name, _)| name.clone()));
                collect_statement_names(body, out);
            }
            Statement::Confirm { expr, .. } | Statement::Assume { expr, .. } => out.extend(expr.names()),
        }
    }
}

fn incoming_is_current(params: &[FormalParam]) -> Substitution {
    params
        .iter()
        .map(|p| (VarRef::incoming(&p.name), Expr::var(&p.name, p.ty)))
        .collect()
}

fn rewrite(obligations: Vec<Obligation>, f: impl Fn(&Expr) -> Expr) -> Vec<Obligation> {
    obligations
        .into_iter()
        .map(|o| Obligation { goal: f(&o.goal), ..o })
        .collect()
}

fn guard_all(
    types: &TypeGraph,
    guard: &Expr,
    obligations: Vec<Obligation>,
    span: Span,
) -> Result<Vec<Obligation>, SemanticError> {
    obligations
        .into_iter()
        .map(|o| {
            let goal = Expr::implies(types, guard.clone(), o.goal).map_err(|e| e.at(span))?;
            Ok(Obligation { goal, ..o })
        })
        .collect()
}

fn describe(rule: &VcRule, sig: &OperationSig) -> String {
    match rule {
        VcRule::Ensures => format!("ensures clause of {}", sig.name),
        VcRule::CallRequires { callee } => format!("requires clause of {callee} (in {})", sig.name),
        VcRule::Confirm => format!("confirm statement (in {})", sig.name),
        VcRule::InvariantEntry => format!("loop invariant on entry (in {})", sig.name),
        VcRule::InvariantMaintained => format!("loop invariant maintained (in {})", sig.name),
        VcRule::Termination => format!("loop termination (in {})", sig.name),
    }
}
