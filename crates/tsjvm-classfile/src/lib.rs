//! JVM class file writing for the tsjvm compiler.
//!
//! This crate owns the binary side of the backend: the descriptor algebra,
//! the deduplicating constant pool, the class writer, the code builder, and
//! stack-map derivation. It has no knowledge of the source AST; the compiler
//! crate drives it.

pub mod code;
pub mod descriptor;
pub mod pool;
pub mod stack_map;
pub mod writer;

pub use code::{CodeBuilder, ExceptionTableEntry, LineNumberEntry};
pub use pool::ConstantPool;
pub use stack_map::{MethodFrames, StackMapFrame, StackMapGenerator, VerificationType};
pub use writer::{ClassFileError, ClassWriter, MethodBody};

use thiserror::Error;

/// Result alias for class-file assembly.
pub type ClassFileResult<T> = Result<T, ClassFileError>;

/// Class file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Major version emitted (Java 17).
pub const MAJOR_VERSION: u16 = 61;

/// Minor version emitted.
pub const MINOR_VERSION: u16 = 0;

/// Access flag bit patterns used when assembling classes and members.
pub mod access {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;

    /// Default class flags: `ACC_PUBLIC | ACC_SUPER`.
    pub const CLASS_DEFAULT: u16 = ACC_PUBLIC | ACC_SUPER;
    /// Interface flags: `ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT`.
    pub const INTERFACE_DEFAULT: u16 = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
    /// Abstract method flags: `ACC_PUBLIC | ACC_ABSTRACT`.
    pub const METHOD_ABSTRACT: u16 = ACC_PUBLIC | ACC_ABSTRACT;
    /// Captured-variable field flags: `ACC_PRIVATE | ACC_FINAL`.
    pub const FIELD_CAPTURE: u16 = ACC_PRIVATE | ACC_FINAL;
}

/// Errors shared across the crate that are not tied to class assembly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// A descriptor string could not be parsed.
    #[error("Malformed descriptor: {0}")]
    Malformed(String),
}
