#![forbid(unsafe_code)]

use std::sync::Arc;

use verity_ast::{ClauseKind, ParamMode, Span};

use crate::catalogue::OperatorSig;
use crate::expr::{Expr, Substitution, VarRef};
use crate::scope::ScopeId;
use crate::types::TypeId;

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub span: Span,
    /// Scope the symbol is declared in.
    pub owner: ScopeId,
    pub kind: SymbolKind,
}

#[derive(Clone, Debug)]
pub enum SymbolKind {
    MathType(TypeId),
    /// Math function, relation or catalogue operator.
    Operator(Arc<OperatorSig>),
    Variable(Variable),
    ProgramType(Arc<ProgramType>),
    Operation(Arc<OperationSig>),
    Facility(Facility),
}

impl SymbolKind {
    pub fn describe(&self) -> &'static str {
        match self {
            SymbolKind::MathType(_) => "math type",
            SymbolKind::Operator(_) => "operator",
            SymbolKind::Variable(_) => "variable",
            SymbolKind::ProgramType(_) => "program type",
            SymbolKind::Operation(_) => "operation",
            SymbolKind::Facility(_) => "facility",
        }
    }
}

/// Parameter, local variable or exemplar.
#[derive(Clone, Debug)]
pub struct Variable {
    /// Math type of the modelled value.
    pub ty: TypeId,
    pub program_type: Option<Arc<ProgramType>>,
    /// Set for operation parameters only; `#x` is legal exactly for these.
    pub mode: Option<ParamMode>,
}

/// A program type family: values are modelled by `model`, and `exemplar`
/// names an arbitrary value inside `constraint` and `initialization`.
#[derive(Clone, Debug)]
pub struct ProgramType {
    pub name: String,
    pub module: String,
    pub model: TypeId,
    pub exemplar: String,
    pub constraint: Option<Expr>,
    pub initialization: Option<Expr>,
}

impl ProgramType {
    /// The constraint, stated about `var` instead of the exemplar.
    pub fn constraint_for(&self, var: &str) -> Option<Expr> {
        self.constraint.as_ref().map(|c| self.instantiate(c, var))
    }

    /// The initialization ensures, stated about `var`.
    pub fn initialization_for(&self, var: &str) -> Option<Expr> {
        self.initialization.as_ref().map(|c| self.instantiate(c, var))
    }

    fn instantiate(&self, e: &Expr, var: &str) -> Expr {
        e.substitute(&VarRef::current(&self.exemplar), &Expr::var(var, self.model))
    }
}

#[derive(Clone, Debug)]
pub struct FormalParam {
    pub name: String,
    pub span: Span,
    pub mode: ParamMode,
    pub ty: TypeId,
    pub program_type: Option<Arc<ProgramType>>,
}

/// Contract of an operation or procedure.
#[derive(Clone, Debug)]
pub struct OperationSig {
    pub name: String,
    pub module: String,
    pub span: Span,
    pub params: Vec<FormalParam>,
    pub requires: Option<Expr>,
    pub ensures: Option<Expr>,
}

impl OperationSig {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Initialization ensures owed for every `clears` parameter whose
    /// program type has one, stated about the parameter.
    pub fn clears_ensures(&self) -> Vec<Expr> {
        self.params
            .iter()
            .filter(|p| p.mode == ParamMode::Clears)
            .filter_map(|p| p.program_type.as_ref()?.initialization_for(&p.name))
            .collect()
    }

    /// Contract of `self` restated over the formals of `target`. Both
    /// operations must take the same number of parameters; current and
    /// incoming references are renamed together.
    pub fn contract_for(&self, target: &[FormalParam]) -> (Option<Expr>, Option<Expr>) {
        let mut map = Substitution::new();
        for (from, to) in self.params.iter().zip(target) {
            if from.name != to.name {
                map.insert(VarRef::current(&from.name), Expr::var(&to.name, to.ty));
                map.insert(VarRef::incoming(&from.name), Expr::incoming(&to.name, to.ty));
            }
        }
        (
            self.requires.as_ref().map(|e| e.substitute_all(&map)),
            self.ensures.as_ref().map(|e| e.substitute_all(&map)),
        )
    }
}

#[derive(Clone, Debug)]
pub struct Facility {
    /// Specification (concept) module the facility instantiates.
    pub spec: String,
    pub realization: Option<String>,
    pub external: bool,
}

/// A module-level assertion clause.
#[derive(Clone, Debug)]
pub struct Clause {
    pub name: Option<String>,
    pub kind: ClauseKind,
    pub span: Span,
    pub expr: Expr,
}
