#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::Serialize;
use verity_ast::{ClauseKind, Span};
use verity_core::{Context, ErrorKind, Expr, SemanticError, SymbolKind};

/// What a collected assertion constrains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ConstraintKind {
    Constraint,
    Invariant,
    Correspondence,
    Convention,
    OperationRequires,
    OperationEnsures,
}

impl ConstraintKind {
    /// Kinds that hold throughout a module and enter every antecedent.
    pub const MODULE_LEVEL: [ConstraintKind; 4] = [
        ConstraintKind::Constraint,
        ConstraintKind::Invariant,
        ConstraintKind::Correspondence,
        ConstraintKind::Convention,
    ];
}

impl From<ClauseKind> for ConstraintKind {
    fn from(kind: ClauseKind) -> Self {
        match kind {
            ClauseKind::Constraint => ConstraintKind::Constraint,
            ClauseKind::Invariant => ConstraintKind::Invariant,
            ClauseKind::Correspondence => ConstraintKind::Correspondence,
            ClauseKind::Convention => ConstraintKind::Convention,
        }
    }
}

/// Gathers the assertions a module may assume: its own and those of every
/// module it reaches through reasoned imports. External imports are opaque.
pub struct ConstraintCollector<'c> {
    ctx: &'c Context,
}

impl<'c> ConstraintCollector<'c> {
    pub fn new(ctx: &'c Context) -> Self {
        Self { ctx }
    }

    /// `module` followed by every module reachable over reasoned imports,
    /// depth first in import order. `at` locates errors.
    pub fn reasoned_closure(&self, module: &str, at: Span) -> Result<Vec<String>, SemanticError> {
        let mut order = Vec::new();
        let mut stack = Vec::new();
        self.visit(module, at, &mut stack, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        module: &str,
        at: Span,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), SemanticError> {
        if let Some(pos) = stack.iter().position(|m| m == module) {
            let mut cycle: Vec<String> = stack[pos..].to_vec();
            cycle.push(module.to_string());
            let mut err = SemanticError::new(
                ErrorKind::CircularImport,
                at,
                format!("reasoned imports form a cycle: {}", cycle.join(" -> ")),
            );
            for m in cycle {
                err = err.with_arg(m);
            }
            return Err(err);
        }
        if order.iter().any(|m| m == module) {
            return Ok(());
        }
        let scope = self.ctx.symbols.require_module(module, at)?;

        order.push(module.to_string());
        stack.push(module.to_string());
        for import in self.ctx.symbols.scope(scope).imports.reasoned() {
            self.visit(import, at, stack, order)?;
        }
        stack.pop();
        Ok(())
    }

    /// Assertions of `kind` in force in `module`, de-duplicated structurally,
    /// in discovery order.
    pub fn referenced_constraints(
        &self,
        module: &str,
        kind: ConstraintKind,
        at: Span,
    ) -> Result<Vec<Expr>, SemanticError> {
        self.referenced_constraints_of(module, &[kind], at)
    }

    pub fn referenced_constraints_of(
        &self,
        module: &str,
        kinds: &[ConstraintKind],
        at: Span,
    ) -> Result<Vec<Expr>, SemanticError> {
        let mut out: Vec<Expr> = Vec::new();
        let mut seen = HashSet::new();
        for name in self.reasoned_closure(module, at)? {
            let Some(scope) = self.ctx.symbols.module_scope(&name) else {
                continue;
            };
            for expr in self.module_assertions(scope, kinds) {
                if !seen.insert(expr.structural_hash()) && out.contains(expr) {
                    continue;
                }
                out.push(expr.clone());
            }
        }
        tracing::trace!(module, ?kinds, count = out.len(), "collected constraints");
        Ok(out)
    }

    fn module_assertions<'s>(
        &'s self,
        scope: verity_core::ScopeId,
        kinds: &'s [ConstraintKind],
    ) -> impl Iterator<Item = &'c Expr> + 's {
        let scope = self.ctx.symbols.scope(scope);
        let clauses = scope
            .clauses
            .iter()
            .filter(move |c| kinds.contains(&ConstraintKind::from(c.kind)))
            .map(|c| &c.expr);
        let contracts = scope.symbols().flat_map(move |sym| {
            let SymbolKind::Operation(sig) = &sym.kind else {
                return Vec::new();
            };
            let mut found = Vec::new();
            if kinds.contains(&ConstraintKind::OperationRequires) {
                found.extend(sig.requires.as_ref());
            }
            if kinds.contains(&ConstraintKind::OperationEnsures) {
                found.extend(sig.ensures.as_ref());
            }
            found
        });
        clauses.chain(contracts)
    }
}
