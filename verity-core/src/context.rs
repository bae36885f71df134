#![forbid(unsafe_code)]

use std::sync::Arc;

use verity_ast::ident;

use crate::catalogue::Catalogue;
use crate::scope::SymbolTable;
use crate::symbol::SymbolKind;
use crate::types::TypeGraph;

/// Everything a compilation session shares: the type universe, the operator
/// catalogue and the symbol table. Populated modules only ever add to it;
/// VC generation reads it frozen.
#[derive(Clone, Debug)]
pub struct Context {
    pub types: TypeGraph,
    pub catalogue: Catalogue,
    pub symbols: SymbolTable,
}

impl Context {
    /// A session over the standard catalogue.
    pub fn new() -> Self {
        let mut types = TypeGraph::new();
        let catalogue = Catalogue::standard(&mut types);
        Self::with_catalogue(types, catalogue)
    }

    /// A session whose prelude holds every type of `types` and every
    /// operator of `catalogue`.
    pub fn with_catalogue(types: TypeGraph, catalogue: Catalogue) -> Self {
        let mut symbols = SymbolTable::new();
        let prelude = symbols.prelude();

        for id in types.ids() {
            let name = ident(types.name(id));
            if let Err(err) = symbols.define_symbol(prelude, &name, SymbolKind::MathType(id)) {
                tracing::warn!(%err, "skipping prelude type");
            }
        }
        for sig in catalogue.iter() {
            let kind = SymbolKind::Operator(Arc::clone(sig));
            if let Err(err) = symbols.define_symbol(prelude, &ident(&sig.name), kind) {
                tracing::warn!(%err, "skipping prelude operator");
            }
        }
        tracing::debug!(symbols = symbols.scope(prelude).len(), "prelude ready");

        Self {
            types,
            catalogue,
            symbols,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
