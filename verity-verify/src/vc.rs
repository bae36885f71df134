#![forbid(unsafe_code)]

//! Verification conditions as handed to the prover.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use verity_ast::Span;
use verity_core::Expr;

/// Why an obligation exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VcRule {
    /// The operation's own `ensures` clause.
    Ensures,
    /// The `requires` clause of a called operation.
    CallRequires { callee: String },
    /// A `confirm` statement.
    Confirm,
    /// A loop invariant, before the first iteration.
    InvariantEntry,
    /// A loop invariant, after an arbitrary iteration.
    InvariantMaintained,
    /// The loop metric decreased during an iteration.
    Termination,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    pub module: String,
    pub offset: usize,
    pub len: usize,
}

impl Location {
    pub fn new(module: &str, span: Span) -> Self {
        Self {
            module: module.to_string(),
            offset: span.offset(),
            len: span.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationCondition {
    /// `Module.Operation`
    pub operation: String,
    /// 1-based, in program order within the operation.
    pub sequence: usize,
    pub antecedent: Vec<Expr>,
    pub consequent: Expr,
    pub location: Location,
    pub rule: VcRule,
    pub description: String,
    /// Discharged without a prover.
    pub trivial: bool,
}

impl fmt::Display for VerificationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VC {}.{}: {}", self.operation, self.sequence, self.description)?;
        if self.antecedent.is_empty() {
            writeln!(f, "  given: true")?;
        }
        for given in &self.antecedent {
            writeln!(f, "  given: {given}")?;
        }
        write!(f, "  prove: {}", self.consequent)?;
        if self.trivial {
            write!(f, "  [trivial]")?;
        }
        Ok(())
    }
}

/// All VCs of one module, in procedure declaration order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModuleVcs {
    pub module: String,
    pub vcs: Vec<VerificationCondition>,
}

impl ModuleVcs {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            vcs: Vec::new(),
        }
    }

    pub fn for_operation<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a VerificationCondition> {
        self.vcs.iter().filter(move |vc| vc.operation == operation)
    }

    /// VCs a prover still has to discharge.
    pub fn open(&self) -> impl Iterator<Item = &VerificationCondition> {
        self.vcs.iter().filter(|vc| !vc.trivial)
    }

    /// VCs sharing the same antecedent, keyed by its structural hash. A
    /// prover can assert each group's context once.
    pub fn by_antecedent(&self) -> BTreeMap<u64, Vec<&VerificationCondition>> {
        let mut groups: BTreeMap<u64, Vec<&VerificationCondition>> = BTreeMap::new();
        for vc in &self.vcs {
            let key = vc
                .antecedent
                .iter()
                .fold(0u64, |acc, e| acc.rotate_left(7) ^ e.structural_hash());
            groups.entry(key).or_default().push(vc);
        }
        groups
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
