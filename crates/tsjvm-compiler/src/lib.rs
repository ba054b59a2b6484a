//! Call-expression lowering for the tsjvm backend.
//!
//! This crate takes the front end's typed AST and drives the class-file
//! crate: the dispatcher classifies each call expression, receiver-specific
//! generators emit bytecode through a shared code builder, and closures
//! synthesize interface/implementor class pairs into the artifact map.

pub mod ast;
pub mod context;
pub mod convert;
pub mod error;
pub mod lower;
pub mod registry;

pub use ast::{
    Arg, ArrowBody, BinaryOp, Callee, Expr, ExprKind, Literal, Param, Span, Stmt, StmtKind,
    UnaryOp,
};
pub use context::{Capture, CaptureSource, CompilationContext, LocalSlot, Resolution, ThisBinding};
pub use convert::convert_type;
pub use error::{CompileError, CompileResult};
pub use lower::Lowerer;
pub use registry::{
    ArtifactMap, FunctionalInterfaceRegistry, JavaType, JavaTypeRegistry, MethodEntry, SamEntry,
    UserClass, UserClassRegistry, UserMethod,
};
