#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::{ErrorKind, TypeError};

/// Index of a node in the [`TypeGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A node of the mathematical type lattice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MTType {
    pub id: TypeId,
    pub name: String,
    /// `None` only for `Entity`.
    pub supertype: Option<TypeId>,
    pub proper: bool,
    /// Members of this type are themselves types.
    pub class_of_classes: bool,
}

/// The math type universe of one compilation session.
///
/// Nodes are only ever appended and a supertype has to exist before its
/// subtypes are declared, so supertype edges always point at older nodes and
/// the relation cannot contain a cycle. Node names are labels: declared types
/// are named through the symbol table of their module, and only the fixed and
/// library types can be looked up here by name.
#[derive(Clone, Debug)]
pub struct TypeGraph {
    nodes: Vec<MTType>,
    library: HashMap<String, TypeId>,
    entity: TypeId,
    element: TypeId,
    cls: TypeId,
    boolean: TypeId,
}

impl TypeGraph {
    pub const ENTITY: &'static str = "Entity";
    pub const ELEMENT: &'static str = "Element";
    pub const CLS: &'static str = "Cls";
    pub const BOOLEAN: &'static str = "B";

    pub fn new() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            library: HashMap::new(),
            entity: TypeId(0),
            element: TypeId(0),
            cls: TypeId(0),
            boolean: TypeId(0),
        };
        graph.entity = graph.push_library(Self::ENTITY, None, false, false);
        graph.element = graph.push_library(Self::ELEMENT, Some(graph.entity), true, false);
        graph.cls = graph.push_library(Self::CLS, Some(graph.entity), false, true);
        // Propositions are an ordinary member of Cls.
        graph.boolean = graph.push_library(Self::BOOLEAN, Some(graph.cls), true, false);
        graph
    }

    fn push(&mut self, name: &str, supertype: Option<TypeId>, proper: bool, class_of_classes: bool) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(MTType {
            id,
            name: name.to_string(),
            supertype,
            proper,
            class_of_classes,
        });
        id
    }

    fn push_library(&mut self, name: &str, supertype: Option<TypeId>, proper: bool, class_of_classes: bool) -> TypeId {
        let id = self.push(name, supertype, proper, class_of_classes);
        self.library.insert(name.to_string(), id);
        id
    }

    /// Registers a new type labelled `name`. A missing supertype means
    /// "directly under `Entity`", which keeps `Entity` the unique top.
    /// Labels may repeat; uniqueness of names is a matter of scopes.
    pub fn declare_type(
        &mut self,
        name: &str,
        supertype: Option<TypeId>,
        proper: bool,
        class_of_classes: bool,
    ) -> Result<TypeId, TypeError> {
        let parent = match supertype {
            Some(sup) if sup.index() < self.nodes.len() => sup,
            Some(sup) => {
                return Err(TypeError::new(
                    ErrorKind::UnknownSupertype,
                    format!("supertype {sup} of '{name}' has not been declared"),
                )
                .with_arg(name)
                .with_arg(sup.to_string()));
            }
            None => self.entity,
        };
        let id = self.push(name, Some(parent), proper, class_of_classes);
        tracing::trace!(ty = name, supertype = %self.name(parent), proper, "declared math type");
        Ok(id)
    }

    /// Declares a proper library type under an existing node, or returns the
    /// library node already registered under `name`.
    pub(crate) fn declare_builtin(&mut self, name: &str, supertype: TypeId) -> TypeId {
        match self.lookup(name) {
            Some(id) => id,
            None => self.push_library(name, Some(supertype), true, false),
        }
    }

    /// A fixed or library type by name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.library.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &MTType {
        &self.nodes[id.index()]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.nodes[id.index()].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node, oldest first.
    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn entity(&self) -> TypeId {
        self.entity
    }

    pub fn element(&self) -> TypeId {
        self.element
    }

    pub fn cls(&self) -> TypeId {
        self.cls
    }

    pub fn boolean(&self) -> TypeId {
        self.boolean
    }

    /// `ty` followed by each of its supertypes, ending at `Entity`.
    pub fn ancestors(&self, ty: TypeId) -> impl Iterator<Item = TypeId> + '_ {
        std::iter::successors(Some(ty), move |t| self.nodes[t.index()].supertype)
    }

    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        self.ancestors(sub).any(|t| t == sup)
    }

    /// Nearest type that both `a` and `b` are subtypes of. Fails only when
    /// a proper type is required and the nearest one is improper, which
    /// includes the case where `Entity` is all they share.
    pub fn least_common_supertype(
        &self,
        a: TypeId,
        b: TypeId,
        require_proper: bool,
    ) -> Result<TypeId, TypeError> {
        let common = self
            .ancestors(a)
            .find(|t| self.is_subtype(b, *t))
            .unwrap_or(self.entity);

        let no_common = require_proper && !self.get(common).proper;
        if no_common {
            return Err(TypeError::new(
                ErrorKind::NoCommonType,
                format!(
                    "'{}' and '{}' have no proper common supertype (nearest is '{}')",
                    self.name(a),
                    self.name(b),
                    self.name(common)
                ),
            )
            .with_arg(self.name(a))
            .with_arg(self.name(b)));
        }
        Ok(common)
    }

    /// `ty` is proper and its supertype chain reaches `Cls`.
    pub fn is_of_cls(&self, ty: TypeId) -> bool {
        self.get(ty).proper && self.ancestors(ty).skip(1).any(|t| t == self.cls)
    }
}

impl Default for TypeGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_nodes_hang_off_entity() {
        let g = TypeGraph::new();
        assert_eq!(g.get(g.entity()).supertype, None);
        assert!(g.is_subtype(g.element(), g.entity()));
        assert!(g.is_subtype(g.cls(), g.entity()));
        assert!(g.is_of_cls(g.boolean()));
        assert!(!g.is_of_cls(g.cls()));
        assert_eq!(g.lookup("B"), Some(g.boolean()));
    }

    #[test]
    fn undeclared_supertype_is_rejected() {
        let mut g = TypeGraph::new();
        let before = g.len();
        let err = g.declare_type("N", Some(TypeId(99)), true, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownSupertype);
        assert_eq!(g.len(), before);
    }

    #[test]
    fn labels_may_repeat() {
        let mut g = TypeGraph::new();
        let first = g.declare_type("T", None, true, false).unwrap();
        let second = g.declare_type("T", None, true, false).unwrap();
        assert_ne!(first, second);
        assert!(g.lookup("T").is_none());
    }

    #[test]
    fn lcs_of_siblings_is_their_parent() {
        let mut g = TypeGraph::new();
        let z = g.declare_type("Z", Some(g.cls()), true, false).unwrap();
        let n = g.declare_type("N", Some(z), true, false).unwrap();
        let even = g.declare_type("Even", Some(z), true, false).unwrap();
        assert_eq!(g.least_common_supertype(n, even, true).unwrap(), z);
        assert_eq!(g.least_common_supertype(n, z, true).unwrap(), z);
    }

    #[test]
    fn lcs_through_entity_needs_no_proper_type() {
        let mut g = TypeGraph::new();
        let a = g.declare_type("A", None, true, false).unwrap();
        let b = g.declare_type("Bee", None, true, false).unwrap();
        assert_eq!(g.least_common_supertype(a, b, false).unwrap(), g.entity());
        let err = g.least_common_supertype(a, b, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCommonType);
    }

    #[test]
    fn lcs_improper_rejected_only_when_proper_required() {
        let mut g = TypeGraph::new();
        let z = g.declare_type("Z", Some(g.cls()), true, false).unwrap();
        assert_eq!(g.least_common_supertype(z, g.boolean(), false).unwrap(), g.cls());
        let err = g.least_common_supertype(z, g.boolean(), true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCommonType);
    }
}
