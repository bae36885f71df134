#![forbid(unsafe_code)]

mod catalogue;
mod context;
mod error;
mod expr;
mod lower;
mod scope;
mod sema;
mod symbol;
mod types;

pub use catalogue::{Catalogue, Effect, OperatorSig, Property};
pub use context::Context;
pub use error::{Diagnostics, ErrorKind, SemanticError, TypeError};
pub use expr::{Expr, ExprKind, Literal, Rendered, Substitution, VarRef, fresh_name};
pub use lower::{Lowerer, Statement};
pub use scope::{ImportCollection, ImportKind, Scope, ScopeId, ScopeKind, SymbolTable};
pub use sema::{LocalVar, PopulatedModule, Populator, Procedure, populate_all};
pub use symbol::{
    Clause, Facility, FormalParam, OperationSig, ProgramType, Symbol, SymbolKind, Variable,
};
pub use types::{MTType, TypeGraph, TypeId};
