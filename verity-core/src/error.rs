#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;
use verity_ast::Span;

/// Classification of every failure the semantic core can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoSuchModule,
    NoSuchSymbol,
    AmbiguousSymbol,
    DuplicateSymbol,
    UnknownSupertype,
    NoCommonType,
    TypeMismatch,
    ArityMismatch,
    CircularImport,
}

impl ErrorKind {
    pub fn display(&self) -> &'static str {
        match self {
            ErrorKind::NoSuchModule => "no such module",
            ErrorKind::NoSuchSymbol => "no such symbol",
            ErrorKind::AmbiguousSymbol => "ambiguous symbol",
            ErrorKind::DuplicateSymbol => "duplicate symbol",
            ErrorKind::UnknownSupertype => "unknown supertype",
            ErrorKind::NoCommonType => "no common type",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::ArityMismatch => "arity mismatch",
            ErrorKind::CircularImport => "circular import",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("{kind}: {message}")]
#[diagnostic(code(verity::sema))]
#[allow(unused_assignments)]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    #[label]
    pub span: Span,
    /// Contextual arguments (symbol names, module names, type names).
    pub args: Vec<String>,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Location-free failure raised by the type graph and the expression
/// constructors; callers attach the span of the syntax they were building.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeError {
    pub kind: ErrorKind,
    pub message: String,
    pub args: Vec<String>,
}

impl TypeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn at(self, span: Span) -> SemanticError {
        SemanticError {
            kind: self.kind,
            message: self.message,
            span,
            args: self.args,
        }
    }
}

/// Ordered error channel. Each recorded failure is one event.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    events: Vec<SemanticError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, err: SemanticError) {
        tracing::warn!(kind = %err.kind, args = ?err.args, "{}", err.message);
        self.events.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = SemanticError>) {
        for err in errs {
            self.report(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemanticError> {
        self.events.iter()
    }

    pub fn into_vec(self) -> Vec<SemanticError> {
        self.events
    }
}
