#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use verity_ast::{Ident, Span};

use crate::error::{ErrorKind, SemanticError};
use crate::symbol::{Clause, Symbol, SymbolKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Prelude,
    Module,
    Operation,
    Block,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportKind {
    /// Written in the module's import list.
    Named,
    /// Implied by a facility or a realization header.
    Implicit,
    /// Trusted opaquely: symbols are visible, specifications are not.
    External,
}

impl ImportKind {
    pub fn is_reasoned(self) -> bool {
        !matches!(self, ImportKind::External)
    }
}

/// Imports of one module, by category. A module is listed at most once;
/// a reasoned listing always wins over an external one.
#[derive(Clone, Debug, Default)]
pub struct ImportCollection {
    entries: Vec<(String, ImportKind)>,
}

impl ImportCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: &str, kind: ImportKind) {
        match self.entries.iter_mut().find(|(m, _)| m.as_str() == module) {
            Some((_, existing)) => {
                if !existing.is_reasoned() && kind.is_reasoned() {
                    *existing = kind;
                }
            }
            None => self.entries.push((module.to_string(), kind)),
        }
    }

    pub fn kind_of(&self, module: &str) -> Option<ImportKind> {
        self.entries.iter().find(|(m, _)| m.as_str() == module).map(|(_, k)| *k)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.kind_of(module).is_some()
    }

    /// Modules of one category, in the order they were added.
    pub fn of_kind(&self, kind: ImportKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, k)| *k == kind)
            .map(|(m, _)| m.as_str())
    }

    /// Named and implicit imports, in the order they were added.
    pub fn reasoned(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, k)| k.is_reasoned())
            .map(|(m, _)| m.as_str())
    }

    pub fn external(&self) -> impl Iterator<Item = &str> {
        self.of_kind(ImportKind::External)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ImportKind)> {
        self.entries.iter().map(|(m, k)| (m.as_str(), *k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Set on module scopes.
    pub module: Option<String>,
    pub imports: ImportCollection,
    pub clauses: Vec<Clause>,
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// Symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Arena of every scope of a compilation session.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    modules: HashMap<String, ScopeId>,
    prelude: ScopeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            scopes: Vec::new(),
            modules: HashMap::new(),
            prelude: ScopeId(0),
        };
        table.prelude = table.push_scope(ScopeKind::Prelude, None, None);
        table
    }

    fn push_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>, module: Option<String>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            kind,
            parent,
            module,
            imports: ImportCollection::new(),
            clauses: Vec::new(),
            symbols: Vec::new(),
            by_name: HashMap::new(),
        });
        id
    }

    pub fn prelude(&self) -> ScopeId {
        self.prelude
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    /// Registers a module scope chained to the prelude.
    pub fn add_module_scope(&mut self, name: &Ident) -> Result<ScopeId, SemanticError> {
        if self.modules.contains_key(&name.node) {
            return Err(SemanticError::new(
                ErrorKind::DuplicateSymbol,
                name.span,
                format!("module '{}' is already registered", name.node),
            )
            .with_arg(&name.node));
        }
        let id = self.push_scope(ScopeKind::Module, Some(self.prelude), Some(name.node.clone()));
        self.modules.insert(name.node.clone(), id);
        tracing::debug!(module = %name.node, scope = %id, "registered module scope");
        Ok(id)
    }

    /// Opens an operation or block scope under `parent`.
    pub fn add_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        debug_assert!(matches!(kind, ScopeKind::Operation | ScopeKind::Block));
        self.push_scope(kind, Some(parent), None)
    }

    pub fn module_scope(&self, name: &str) -> Option<ScopeId> {
        self.modules.get(name).copied()
    }

    pub fn require_module(&self, name: &str, span: Span) -> Result<ScopeId, SemanticError> {
        self.module_scope(name).ok_or_else(|| {
            SemanticError::new(ErrorKind::NoSuchModule, span, format!("module '{name}' does not exist"))
                .with_arg(name)
        })
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Nearest module scope enclosing `scope` (itself included).
    pub fn enclosing_module(&self, scope: ScopeId) -> Option<ScopeId> {
        self.chain(scope).find(|id| self.scope(*id).kind == ScopeKind::Module)
    }

    /// `scope` followed by its lexical parents.
    pub fn chain(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |id| self.scope(*id).parent)
    }

    pub fn define_symbol(
        &mut self,
        scope: ScopeId,
        name: &Ident,
        kind: SymbolKind,
    ) -> Result<&Symbol, SemanticError> {
        let target = &mut self.scopes[scope.index()];
        if let Some(prev) = target.get(&name.node) {
            return Err(SemanticError::new(
                ErrorKind::DuplicateSymbol,
                name.span,
                format!(
                    "'{}' is already declared in this scope as a {}",
                    name.node,
                    prev.kind.describe()
                ),
            )
            .with_arg(&name.node));
        }
        tracing::trace!(symbol = %name.node, scope = %scope, kind = kind.describe(), "defined symbol");
        let idx = target.symbols.len();
        target.symbols.push(Symbol {
            name: name.node.clone(),
            span: name.span,
            owner: scope,
            kind,
        });
        target.by_name.insert(name.node.clone(), idx);
        Ok(&target.symbols[idx])
    }

    /// Looks `name` up from `scope`: the scope itself and its lexical parents
    /// (ending at the prelude), then the modules imported by the enclosing
    /// module, reasoned imports before external ones.
    pub fn resolve(&self, scope: ScopeId, name: &Ident) -> Result<&Symbol, SemanticError> {
        if let Some(sym) = self.chain(scope).find_map(|id| self.scope(id).get(&name.node)) {
            return Ok(sym);
        }

        if let Some(module) = self.enclosing_module(scope) {
            let imports = &self.scope(module).imports;
            let reasoned: Vec<&str> = imports.reasoned().collect();
            if let Some(sym) = self.resolve_in_tier(&reasoned, name)? {
                return Ok(sym);
            }
            let external: Vec<&str> = imports.external().collect();
            if let Some(sym) = self.resolve_in_tier(&external, name)? {
                return Ok(sym);
            }
        }

        Err(SemanticError::new(
            ErrorKind::NoSuchSymbol,
            name.span,
            format!("'{}' is not declared in scope", name.node),
        )
        .with_arg(&name.node))
    }

    /// Imported modules expose their own declarations only.
    fn resolve_in_tier(&self, modules: &[&str], name: &Ident) -> Result<Option<&Symbol>, SemanticError> {
        let mut found: Option<(&str, &Symbol)> = None;
        for &module in modules {
            let Some(scope) = self.module_scope(module) else {
                continue;
            };
            let Some(sym) = self.scope(scope).get(&name.node) else {
                continue;
            };
            if let Some((first, _)) = found {
                return Err(SemanticError::new(
                    ErrorKind::AmbiguousSymbol,
                    name.span,
                    format!("'{}' is declared in both '{first}' and '{module}'", name.node),
                )
                .with_arg(&name.node)
                .with_arg(first)
                .with_arg(module));
            }
            found = Some((module, sym));
        }
        Ok(found.map(|(_, sym)| sym))
    }

    /// `Q.name`: `Q` is a facility visible from `scope` (looked up in the
    /// facility's specification module) or a module name.
    pub fn resolve_qualified(
        &self,
        scope: ScopeId,
        qualifier: &Ident,
        name: &Ident,
    ) -> Result<&Symbol, SemanticError> {
        let target = match self.resolve(scope, qualifier) {
            Ok(Symbol {
                kind: SymbolKind::Facility(facility),
                ..
            }) => self.require_module(&facility.spec, qualifier.span)?,
            _ => self.require_module(&qualifier.node, qualifier.span)?,
        };
        self.scope(target).get(&name.node).ok_or_else(|| {
            SemanticError::new(
                ErrorKind::NoSuchSymbol,
                name.span,
                format!("'{}' is not declared in '{}'", name.node, qualifier.node),
            )
            .with_arg(&name.node)
            .with_arg(&qualifier.node)
        })
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Variable;
    use crate::types::TypeGraph;
    use verity_ast::ident;

    fn var(ty: crate::types::TypeId) -> SymbolKind {
        SymbolKind::Variable(Variable {
            ty,
            program_type: None,
            mode: None,
        })
    }

    #[test]
    fn reasoned_listing_wins_over_external() {
        let mut imports = ImportCollection::new();
        imports.add("Lib", ImportKind::External);
        imports.add("Lib", ImportKind::Named);
        imports.add("Lib", ImportKind::External);
        assert_eq!(imports.kind_of("Lib"), Some(ImportKind::Named));
        assert_eq!(imports.len(), 1);
        assert_eq!(imports.external().count(), 0);
    }

    #[test]
    fn redefinition_in_same_scope_is_rejected() {
        let types = TypeGraph::new();
        let mut table = SymbolTable::new();
        let m = table.add_module_scope(&ident("M")).unwrap();
        table.define_symbol(m, &ident("x"), var(types.boolean())).unwrap();
        let err = table.define_symbol(m, &ident("x"), var(types.boolean())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
    }

    #[test]
    fn lexical_chain_reaches_prelude() {
        let types = TypeGraph::new();
        let mut table = SymbolTable::new();
        let prelude = table.prelude();
        table
            .define_symbol(prelude, &ident("B"), SymbolKind::MathType(types.boolean()))
            .unwrap();
        let m = table.add_module_scope(&ident("M")).unwrap();
        let op = table.add_scope(m, ScopeKind::Operation);
        let block = table.add_scope(op, ScopeKind::Block);
        let sym = table.resolve(block, &ident("B")).unwrap();
        assert_eq!(sym.owner, prelude);
        assert_eq!(table.enclosing_module(block), Some(m));
    }
}
