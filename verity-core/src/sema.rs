#![forbid(unsafe_code)]

use std::sync::Arc;

use verity_ast::{
    ClauseDecl, FacilityDecl, Ident, Item, MathFunctionDecl, MathTypeDecl, ModuleDecl, ModuleKind,
    OperationDecl, Span, TypeFamilyDecl,
};

use crate::catalogue::OperatorSig;
use crate::context::Context;
use crate::error::{Diagnostics, ErrorKind, SemanticError};
use crate::lower::{Lowerer, Statement};
use crate::scope::{ImportKind, ScopeId, ScopeKind};
use crate::symbol::{Clause, Facility, FormalParam, OperationSig, ProgramType, SymbolKind, Variable};
use crate::types::TypeId;

/// A local variable of a procedure.
#[derive(Clone, Debug)]
pub struct LocalVar {
    pub name: String,
    pub span: Span,
    pub ty: TypeId,
    pub program_type: Option<Arc<ProgramType>>,
}

/// An operation with a body, ready for VC generation.
#[derive(Clone, Debug)]
pub struct Procedure {
    pub sig: Arc<OperationSig>,
    pub scope: ScopeId,
    pub locals: Vec<LocalVar>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct PopulatedModule {
    pub name: String,
    pub span: Span,
    pub scope: ScopeId,
    /// Procedures in declaration order.
    pub procedures: Vec<Procedure>,
}

/// Builds the scopes, symbols and types of one module at a time. Every module
/// a module refers to must have been populated before it.
pub struct Populator<'c> {
    ctx: &'c mut Context,
    diagnostics: &'c mut Diagnostics,
}

impl<'c> Populator<'c> {
    pub fn new(ctx: &'c mut Context, diagnostics: &'c mut Diagnostics) -> Self {
        Self { ctx, diagnostics }
    }

    /// Populates `module`. Returns `None` when the module cannot be analysed
    /// at all (a referenced module is missing or its name is taken); item
    /// level failures are reported and the item is skipped.
    pub fn populate(&mut self, module: &ModuleDecl) -> Option<PopulatedModule> {
        let missing = self.missing_modules(module);
        if !missing.is_empty() {
            self.diagnostics.extend(missing);
            tracing::debug!(module = %module.name.node, "module skipped: missing dependencies");
            return None;
        }

        let scope = match self.ctx.symbols.add_module_scope(&module.name) {
            Ok(scope) => scope,
            Err(err) => {
                self.diagnostics.report(err);
                return None;
            }
        };
        self.record_imports(module, scope);

        let mut populated = PopulatedModule {
            name: module.name.node.clone(),
            span: module.span,
            scope,
            procedures: Vec::new(),
        };

        for item in &module.items {
            let result = match item {
                Item::MathType(decl) => self.math_type(scope, decl),
                Item::MathFunction(decl) => self.math_function(scope, decl),
                Item::TypeFamily(decl) => self.type_family(&module.name.node, scope, decl),
                Item::Clause(decl) => self.clause(scope, decl),
                Item::Facility(decl) => self.facility(scope, decl),
                Item::Operation(decl) => self.operation(module, scope, decl).map(|procedure| {
                    if let Some(procedure) = procedure {
                        populated.procedures.push(procedure);
                    }
                }),
            };
            if let Err(err) = result {
                self.diagnostics.report(err);
            }
        }

        tracing::debug!(
            module = %populated.name,
            symbols = self.ctx.symbols.scope(scope).len(),
            procedures = populated.procedures.len(),
            "populated module"
        );
        Some(populated)
    }

    fn missing_modules(&self, module: &ModuleDecl) -> Vec<SemanticError> {
        let symbols = &self.ctx.symbols;
        let mut referenced: Vec<&Ident> = module.imports.iter().map(|i| &i.name).collect();
        if let ModuleKind::Realization { concept } = &module.kind {
            referenced.push(concept);
        }
        for item in &module.items {
            if let Item::Facility(f) = item {
                referenced.push(&f.spec);
            }
        }
        referenced
            .into_iter()
            .filter(|name| !symbols.has_module(&name.node))
            .map(|name| {
                SemanticError::new(
                    ErrorKind::NoSuchModule,
                    name.span,
                    format!("module '{}' imported by '{}' does not exist", name.node, module.name.node),
                )
                .with_arg(&name.node)
                .with_arg(&module.name.node)
            })
            .collect()
    }

    fn record_imports(&mut self, module: &ModuleDecl, scope: ScopeId) {
        let imports = &mut self.ctx.symbols.scope_mut(scope).imports;
        for import in &module.imports {
            let kind = if import.external {
                ImportKind::External
            } else {
                ImportKind::Named
            };
            imports.add(&import.name.node, kind);
        }
        if let ModuleKind::Realization { concept } = &module.kind {
            imports.add(&concept.node, ImportKind::Implicit);
        }
        for item in &module.items {
            if let Item::Facility(f) = item {
                imports.add(&f.spec.node, ImportKind::Implicit);
            }
        }
    }

    fn math_type(&mut self, scope: ScopeId, decl: &MathTypeDecl) -> Result<(), SemanticError> {
        let supertype = match &decl.supertype {
            Some(sup) => Some(self.supertype(scope, &decl.name, sup)?),
            None => None,
        };
        let id = self
            .ctx
            .types
            .declare_type(&decl.name.node, supertype, decl.proper, decl.class_of_classes)
            .map_err(|err| err.at(decl.span))?;
        self.ctx.symbols.define_symbol(scope, &decl.name, SymbolKind::MathType(id))?;
        Ok(())
    }

    /// Resolves a declared supertype through the module's scope, so only
    /// types the module can see may be extended.
    fn supertype(&self, scope: ScopeId, name: &Ident, sup: &Ident) -> Result<TypeId, SemanticError> {
        match self.ctx.symbols.resolve(scope, sup) {
            Ok(symbol) => match &symbol.kind {
                SymbolKind::MathType(id) => Ok(*id),
                other => Err(SemanticError::new(
                    ErrorKind::TypeMismatch,
                    sup.span,
                    format!("supertype '{}' of '{}' is a {}, not a math type", sup.node, name.node, other.describe()),
                )
                .with_arg(&name.node)
                .with_arg(&sup.node)),
            },
            Err(err) if err.kind == ErrorKind::NoSuchSymbol => Err(SemanticError::new(
                ErrorKind::UnknownSupertype,
                sup.span,
                format!("supertype '{}' of '{}' has not been declared", sup.node, name.node),
            )
            .with_arg(&name.node)
            .with_arg(&sup.node)),
            Err(err) => Err(err),
        }
    }

    fn math_function(&mut self, scope: ScopeId, decl: &MathFunctionDecl) -> Result<(), SemanticError> {
        let lowerer = Lowerer::new(self.ctx, scope);
        let params = decl
            .params
            .iter()
            .map(|p| lowerer.resolve_type(p).map(|(ty, _)| ty))
            .collect::<Result<Vec<_>, _>>()?;
        let (result, _) = lowerer.resolve_type(&decl.result)?;
        let sig = OperatorSig::function(&decl.name.node, params, result);
        self.ctx
            .symbols
            .define_symbol(scope, &decl.name, SymbolKind::Operator(Arc::new(sig)))?;
        Ok(())
    }

    fn type_family(&mut self, module: &str, scope: ScopeId, decl: &TypeFamilyDecl) -> Result<(), SemanticError> {
        let (model, _) = Lowerer::new(self.ctx, scope).resolve_type(&decl.model)?;

        // The exemplar is only visible inside the family's own clauses.
        let clause_scope = self.ctx.symbols.add_scope(scope, ScopeKind::Block);
        self.ctx.symbols.define_symbol(
            clause_scope,
            &decl.exemplar,
            SymbolKind::Variable(Variable {
                ty: model,
                program_type: None,
                mode: None,
            }),
        )?;
        let mut lowerer = Lowerer::new(self.ctx, clause_scope);
        let constraint = decl
            .constraint
            .as_ref()
            .map(|c| lowerer.lower_assertion(c))
            .transpose()?;
        let initialization = decl
            .initialization
            .as_ref()
            .map(|c| lowerer.lower_assertion(c))
            .transpose()?;

        let family = ProgramType {
            name: decl.name.node.clone(),
            module: module.to_string(),
            model,
            exemplar: decl.exemplar.node.clone(),
            constraint,
            initialization,
        };
        self.ctx
            .symbols
            .define_symbol(scope, &decl.name, SymbolKind::ProgramType(Arc::new(family)))?;
        Ok(())
    }

    fn clause(&mut self, scope: ScopeId, decl: &ClauseDecl) -> Result<(), SemanticError> {
        let expr = Lowerer::new(self.ctx, scope).lower_assertion(&decl.expr)?;
        self.ctx.symbols.scope_mut(scope).clauses.push(Clause {
            name: decl.name.as_ref().map(|n| n.node.clone()),
            kind: decl.kind,
            span: decl.span,
            expr,
        });
        Ok(())
    }

    fn facility(&mut self, scope: ScopeId, decl: &FacilityDecl) -> Result<(), SemanticError> {
        let facility = Facility {
            spec: decl.spec.node.clone(),
            realization: decl.realization.as_ref().map(|r| r.node.clone()),
            external: decl.externally,
        };
        self.ctx
            .symbols
            .define_symbol(scope, &decl.name, SymbolKind::Facility(facility))?;
        Ok(())
    }

    fn operation(
        &mut self,
        module: &ModuleDecl,
        scope: ScopeId,
        decl: &OperationDecl,
    ) -> Result<Option<Procedure>, SemanticError> {
        let op_scope = self.ctx.symbols.add_scope(scope, ScopeKind::Operation);

        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let (ty, program_type) = Lowerer::new(self.ctx, scope).resolve_type(&p.ty)?;
            let var = Variable {
                ty,
                program_type: program_type.clone(),
                mode: Some(p.mode),
            };
            self.ctx.symbols.define_symbol(op_scope, &p.name, SymbolKind::Variable(var))?;
            params.push(FormalParam {
                name: p.name.node.clone(),
                span: p.name.span,
                mode: p.mode,
                ty,
                program_type,
            });
        }

        let mut locals = Vec::with_capacity(decl.vars.len());
        for v in &decl.vars {
            let (ty, program_type) = Lowerer::new(self.ctx, scope).resolve_type(&v.ty)?;
            let var = Variable {
                ty,
                program_type: program_type.clone(),
                mode: None,
            };
            self.ctx.symbols.define_symbol(op_scope, &v.name, SymbolKind::Variable(var))?;
            locals.push(LocalVar {
                name: v.name.node.clone(),
                span: v.span,
                ty,
                program_type,
            });
        }

        let mut lowerer = Lowerer::new(self.ctx, op_scope);
        let mut requires = decl.requires.as_ref().map(|e| lowerer.lower_assertion(e)).transpose()?;
        let mut ensures = decl.ensures.as_ref().map(|e| lowerer.lower_assertion(e)).transpose()?;

        if requires.is_none() && ensures.is_none() {
            if let ModuleKind::Realization { concept } = &module.kind {
                if let Some(spec) = self.concept_operation(&concept.node, &decl.name) {
                    if spec.params.len() == params.len() {
                        tracing::trace!(op = %decl.name.node, concept = %concept.node, "inherited contract");
                        (requires, ensures) = spec.contract_for(&params);
                    }
                }
            }
        }

        let sig = Arc::new(OperationSig {
            name: decl.name.node.clone(),
            module: module.name.node.clone(),
            span: decl.span,
            params,
            requires,
            ensures,
        });
        // Defined before the body is lowered so the body may call it.
        self.ctx
            .symbols
            .define_symbol(scope, &decl.name, SymbolKind::Operation(Arc::clone(&sig)))?;

        let Some(block) = &decl.body else {
            return Ok(None);
        };
        let body = Lowerer::new(self.ctx, op_scope).lower_block(block)?;
        Ok(Some(Procedure {
            sig,
            scope: op_scope,
            locals,
            body,
        }))
    }

    fn concept_operation(&self, concept: &str, name: &Ident) -> Option<Arc<OperationSig>> {
        let scope = self.ctx.symbols.module_scope(concept)?;
        match &self.ctx.symbols.scope(scope).get(&name.node)?.kind {
            SymbolKind::Operation(sig) => Some(Arc::clone(sig)),
            _ => None,
        }
    }
}

/// Populates `modules` in the order given into a fresh standard session.
pub fn populate_all(modules: &[ModuleDecl]) -> (Context, Vec<PopulatedModule>, Diagnostics) {
    let mut ctx = Context::new();
    let mut diagnostics = Diagnostics::new();
    let mut populator = Populator::new(&mut ctx, &mut diagnostics);
    let populated = modules.iter().filter_map(|m| populator.populate(m)).collect();
    (ctx, populated, diagnostics)
}
