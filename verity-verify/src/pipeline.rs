#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};

use verity_ast::{Item, ModuleDecl, ModuleKind};
use verity_core::{Context, Diagnostics, ErrorKind, Populator, SemanticError};

use crate::config::VcGenConfig;
use crate::vc::ModuleVcs;
use crate::vcgen::VcGenerator;

pub struct PipelineReport {
    /// One entry per module that was populated, in compile order.
    pub modules: Vec<ModuleVcs>,
    pub diagnostics: Diagnostics,
    /// The session the VCs refer to.
    pub context: Context,
}

impl PipelineReport {
    pub fn module(&self, name: &str) -> Option<&ModuleVcs> {
        self.modules.iter().find(|m| m.module == name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    config: VcGenConfig,
}

impl Pipeline {
    pub fn new(config: VcGenConfig) -> Self {
        Self { config }
    }

    /// Orders `modules` by their imports, populates them and generates the
    /// VCs of every procedure.
    pub fn run(&self, modules: &[ModuleDecl]) -> PipelineReport {
        let mut ctx = Context::new();
        let mut diagnostics = Diagnostics::new();

        let (order, cyclic) = compile_order(modules);
        diagnostics.extend(cyclic);

        let mut populated = Vec::with_capacity(order.len());
        {
            let mut populator = Populator::new(&mut ctx, &mut diagnostics);
            for idx in order {
                if let Some(m) = populator.populate(&modules[idx]) {
                    populated.push(m);
                }
            }
        }

        let generator = VcGenerator::new(&ctx, &self.config);
        let vcs = populated
            .iter()
            .map(|m| generator.generate_module(m, &mut diagnostics))
            .collect();

        tracing::debug!(
            modules = modules.len(),
            populated = populated.len(),
            diagnostics = diagnostics.len(),
            "pipeline finished"
        );
        PipelineReport {
            modules: vcs,
            diagnostics,
            context: ctx,
        }
    }
}

/// Modules a module needs populated before it: imports, its concept and the
/// specifications of its facilities. External imports count too: their
/// symbols must exist before the importer's names resolve, so a cycle made
/// only of external imports is still circular.
fn dependencies(module: &ModuleDecl) -> Vec<&str> {
    let mut deps: Vec<&str> = module.imports.iter().map(|i| i.name.node.as_str()).collect();
    if let ModuleKind::Realization { concept } = &module.kind {
        deps.push(&concept.node);
    }
    for item in &module.items {
        if let Item::Facility(f) = item {
            deps.push(&f.spec.node);
        }
    }
    deps
}

/// Indices of `modules` in dependency order, stable with respect to the
/// input. Modules on an import cycle are left out and reported; modules that
/// merely depend on one are kept so population reports what they miss.
fn compile_order(modules: &[ModuleDecl]) -> (Vec<usize>, Vec<SemanticError>) {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, m) in modules.iter().enumerate() {
        index.entry(m.name.node.as_str()).or_insert(i);
    }
    let edges: Vec<Vec<usize>> = modules
        .iter()
        .map(|m| {
            let mut deps: Vec<usize> = dependencies(m).into_iter().filter_map(|d| index.get(d).copied()).collect();
            deps.sort_unstable();
            deps.dedup();
            deps
        })
        .collect();

    let all: Vec<bool> = vec![true; modules.len()];
    let (mut order, rest) = kahn(&edges, &all);
    if rest.is_empty() {
        return (order, Vec::new());
    }

    let mut errors = Vec::new();
    let mut keep = vec![false; modules.len()];
    for &i in &rest {
        if reaches(&edges, &rest, i, i) {
            let m = &modules[i];
            errors.push(
                SemanticError::new(
                    ErrorKind::CircularImport,
                    m.name.span,
                    format!("module '{}' imports itself through its dependencies", m.name.node),
                )
                .with_arg(&m.name.node),
            );
        } else {
            keep[i] = true;
        }
    }
    let (tail, _) = kahn(&edges, &keep);
    order.extend(tail);
    (order, errors)
}

/// Kahn's algorithm over the nodes flagged in `active`; edges to inactive
/// nodes are ignored. Returns the sorted nodes and those left on cycles.
fn kahn(edges: &[Vec<usize>], active: &[bool]) -> (Vec<usize>, Vec<usize>) {
    let n = edges.len();
    let mut pending = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, deps) in edges.iter().enumerate() {
        if !active[i] {
            continue;
        }
        for &d in deps {
            if active[d] {
                pending[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| active[i] && pending[i] == 0).collect();
    let mut order = Vec::new();
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dep in &dependents[i] {
            pending[dep] -= 1;
            if pending[dep] == 0 {
                ready.push_back(dep);
            }
        }
    }
    let rest = (0..n).filter(|&i| active[i] && pending[i] > 0).collect();
    (order, rest)
}

/// Whether `to` is reachable from `from` in one or more steps, staying
/// within `within`.
fn reaches(edges: &[Vec<usize>], within: &[usize], from: usize, to: usize) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack: Vec<usize> = edges[from].clone();
    while let Some(i) = stack.pop() {
        if i == to {
            return true;
        }
        if seen[i] || !within.contains(&i) {
            continue;
        }
        seen[i] = true;
        stack.extend(&edges[i]);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_ast::{ImportDecl, ident, span};

    fn module(name: &str, imports: &[&str]) -> ModuleDecl {
        ModuleDecl {
            span: span(0, 0),
            name: ident(name),
            kind: ModuleKind::Precis,
            imports: imports
                .iter()
                .map(|i| ImportDecl {
                    span: span(0, 0),
                    name: ident(*i),
                    external: false,
                })
                .collect(),
            items: Vec::new(),
        }
    }

    #[test]
    fn dependencies_come_first() {
        let modules = vec![module("C", &["B"]), module("B", &["A"]), module("A", &[])];
        let (order, errors) = compile_order(&modules);
        assert!(errors.is_empty());
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn independent_modules_keep_input_order() {
        let modules = vec![module("X", &[]), module("Y", &[]), module("Z", &["X"])];
        let (order, _) = compile_order(&modules);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn cycle_members_are_reported_and_dependents_kept() {
        let modules = vec![module("A", &["B"]), module("B", &["A"]), module("C", &["A"])];
        let (order, errors) = compile_order(&modules);
        assert_eq!(order, vec![2]);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::CircularImport));
    }
}
