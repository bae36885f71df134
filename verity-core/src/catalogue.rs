#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{TypeGraph, TypeId};

/// Known algebraic property of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Commutative,
    /// `op(x, x)` holds for every `x`.
    Reflexive,
    /// `op(x, lit) = x`.
    Identity(bool),
}

/// How a program primitive changes the state it is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    /// A mathematical function or a value-returning program operation.
    Pure,
    /// Atomic exchange of the representations of both arguments.
    Swap,
    /// Replace the representation of the first argument by the second.
    Assign,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSig {
    pub name: String,
    pub params: Vec<TypeId>,
    /// `None` for program primitives that produce no value.
    pub result: Option<TypeId>,
    pub properties: Vec<Property>,
    pub effect: Effect,
}

impl OperatorSig {
    pub fn function(name: &str, params: Vec<TypeId>, result: TypeId) -> Self {
        Self {
            name: name.to_string(),
            params,
            result: Some(result),
            properties: Vec::new(),
            effect: Effect::Pure,
        }
    }

    pub fn primitive(name: &str, params: Vec<TypeId>, effect: Effect) -> Self {
        Self {
            name: name.to_string(),
            params,
            result: None,
            properties: Vec::new(),
            effect,
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn has(&self, property: Property) -> bool {
        self.properties.contains(&property)
    }
}

/// Typed operators exposed by the primitive runtime library.
///
/// The core never executes these; it only relies on their signatures, their
/// effect on program state and their algebraic properties.
#[derive(Clone, Debug)]
pub struct Catalogue {
    ops: BTreeMap<String, Arc<OperatorSig>>,
    integer: TypeId,
    natural: TypeId,
}

impl Catalogue {
    pub const SWAP: &'static str = "swap";
    pub const ASSIGN: &'static str = "assign";

    /// The standard boolean/integer catalogue. Declares `Z` and `N` in
    /// `types` as members of `Cls`.
    pub fn standard(types: &mut TypeGraph) -> Self {
        let cls = types.cls();
        let integer = types.declare_builtin("Z", cls);
        let natural = types.declare_builtin("N", integer);
        let b = types.boolean();
        let entity = types.entity();

        let mut cat = Self {
            ops: BTreeMap::new(),
            integer,
            natural,
        };

        cat.insert(
            OperatorSig::function("=", vec![entity, entity], b)
                .with_property(Property::Commutative)
                .with_property(Property::Reflexive),
        );
        cat.insert(
            OperatorSig::function("≠", vec![entity, entity], b).with_property(Property::Commutative),
        );
        for rel in ["<", ">"] {
            cat.insert(OperatorSig::function(rel, vec![integer, integer], b));
        }
        for rel in ["≤", "≥"] {
            cat.insert(
                OperatorSig::function(rel, vec![integer, integer], b).with_property(Property::Reflexive),
            );
        }
        for arith in ["+", "*"] {
            cat.insert(
                OperatorSig::function(arith, vec![integer, integer], integer)
                    .with_property(Property::Commutative),
            );
        }
        cat.insert(OperatorSig::function("-", vec![integer, integer], integer));

        // Program-level operations of the boolean and integer concepts.
        cat.insert(
            OperatorSig::function("And", vec![b, b], b)
                .with_property(Property::Commutative)
                .with_property(Property::Identity(true)),
        );
        cat.insert(
            OperatorSig::function("Are_Equal", vec![entity, entity], b)
                .with_property(Property::Commutative)
                .with_property(Property::Reflexive),
        );

        cat.insert(OperatorSig::primitive(Self::SWAP, vec![entity, entity], Effect::Swap));
        cat.insert(OperatorSig::primitive(Self::ASSIGN, vec![entity, entity], Effect::Assign));
        cat
    }

    pub fn insert(&mut self, sig: OperatorSig) {
        self.ops.insert(sig.name.clone(), Arc::new(sig));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<OperatorSig>> {
        self.ops.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OperatorSig>> {
        self.ops.values()
    }

    pub fn integer(&self) -> TypeId {
        self.integer
    }

    pub fn natural(&self) -> TypeId {
        self.natural
    }
}
