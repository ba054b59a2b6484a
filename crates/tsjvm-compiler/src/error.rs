//! Compilation errors.
//!
//! All variants are terminal for the class being compiled; nothing is retried
//! and there is no partial output. Each lowering error carries the source span
//! of the offending construct.

use thiserror::Error;

use crate::ast::Span;
use tsjvm_classfile::ClassFileError;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("Unsupported call: {member} on {receiver}")]
    UnsupportedCall {
        member: String,
        receiver: String,
        span: Span,
    },

    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature { feature: String, span: Span },

    #[error("Invalid arguments for {operation}: {message}")]
    ArityOrShape {
        operation: String,
        message: String,
        span: Span,
    },

    #[error("Cannot infer type: {message}")]
    TypeInference { message: String, span: Span },

    #[error("Cannot resolve variable: {name}")]
    UnresolvedCapture { name: String, span: Span },

    #[error("Member {name} not found on superclass {class}")]
    UnresolvedSuperMember {
        name: String,
        class: String,
        span: Span,
    },

    #[error("Method {name} not found on {class}")]
    UnresolvedMethod {
        name: String,
        class: String,
        span: Span,
    },

    #[error(transparent)]
    MalformedArtifact(#[from] ClassFileError),
}
