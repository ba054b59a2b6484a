//! Class artifact assembly.
//!
//! `ClassWriter` accumulates the pieces of one class (pool, fields, methods)
//! and serializes them in class-file order. Structural invariants are checked
//! at `to_bytes()` time and reported as [`ClassFileError`]; the writer never
//! produces bytes for a malformed artifact.

use thiserror::Error;

use crate::access;
use crate::code::CodeBuilder;
use crate::pool::ConstantPool;
use crate::stack_map::{self, StackMapGenerator};
use crate::{descriptor, ClassFileResult, MAGIC, MAJOR_VERSION, MINOR_VERSION};

/// Errors produced while assembling or replaying a class artifact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("Class {class} has no superclass")]
    MissingSuperclass { class: String },
    #[error("Method {class}.{name} has no code")]
    MissingCode { class: String, name: String },
    #[error("Abstract method {class}.{name} must not carry code")]
    AbstractWithCode { class: String, name: String },
    #[error("Method {class}.{name} declares {declared} local slots but its signature needs {required}")]
    BadLocalSizing {
        class: String,
        name: String,
        declared: u16,
        required: u16,
    },
    #[error("Malformed descriptor: {descriptor}")]
    MalformedDescriptor { descriptor: String },
    #[error("Operand stack underflow at pc {pc}")]
    StackUnderflow { pc: u16 },
    #[error("Inconsistent frames at join offset {offset}")]
    InconsistentFrames { offset: u16 },
    #[error("Unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: u16 },
    #[error("Unresolvable constant pool index {index} at pc {pc}")]
    BadPoolIndex { index: u16, pc: u16 },
}

/// The executable part of a method.
#[derive(Debug)]
pub struct MethodBody {
    pub code: CodeBuilder,
    pub max_locals: u16,
}

#[derive(Debug)]
struct FieldInfo {
    access_flags: u16,
    name: String,
    descriptor: String,
}

#[derive(Debug)]
struct MethodInfo {
    access_flags: u16,
    name: String,
    descriptor: String,
    body: Option<MethodBody>,
}

/// Builds one class artifact.
#[derive(Debug)]
pub struct ClassWriter {
    this_class: String,
    super_class: Option<String>,
    interfaces: Vec<String>,
    access_flags: u16,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    source_file: Option<String>,
    pool: ConstantPool,
}

impl ClassWriter {
    /// Starts a public class extending `java/lang/Object`.
    pub fn new(internal_name: &str) -> Self {
        Self {
            this_class: internal_name.to_string(),
            super_class: Some(descriptor::OBJECT_INTERNAL.to_string()),
            interfaces: Vec::new(),
            access_flags: access::CLASS_DEFAULT,
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
            pool: ConstantPool::new(),
        }
    }

    /// Starts a public interface. Interfaces always extend `java/lang/Object`.
    pub fn new_interface(internal_name: &str) -> Self {
        Self {
            access_flags: access::INTERFACE_DEFAULT,
            ..Self::new(internal_name)
        }
    }

    pub fn this_class(&self) -> &str {
        &self.this_class
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & access::ACC_INTERFACE != 0
    }

    pub fn set_super_class(&mut self, internal_name: &str) {
        self.super_class = Some(internal_name.to_string());
    }

    pub fn super_class(&self) -> Option<&str> {
        self.super_class.as_deref()
    }

    pub fn add_interface(&mut self, internal_name: &str) {
        self.interfaces.push(internal_name.to_string());
    }

    pub fn set_source_file(&mut self, file_name: &str) {
        self.source_file = Some(file_name.to_string());
    }

    /// The pool is shared with code generators so method bodies can intern
    /// references while they are being emitted.
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) {
        self.fields.push(FieldInfo {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
    }

    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        body: MethodBody,
    ) {
        self.methods.push(MethodInfo {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            body: Some(body),
        });
    }

    /// Declares a method with no body, as on interfaces.
    pub fn add_abstract_method(&mut self, name: &str, descriptor: &str) {
        self.methods.push(MethodInfo {
            access_flags: access::METHOD_ABSTRACT,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            body: None,
        });
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Checks structural invariants and serializes the class file.
    pub fn to_bytes(mut self) -> ClassFileResult<Vec<u8>> {
        let super_class = match &self.super_class {
            Some(name) => name.clone(),
            None => {
                return Err(ClassFileError::MissingSuperclass {
                    class: self.this_class.clone(),
                })
            }
        };

        // Intern structural entries before the pool is written.
        let this_index = self.pool.add_class(&self.this_class);
        let super_index = self.pool.add_class(&super_class);
        let interface_indices: Vec<u16> = self
            .interfaces
            .iter()
            .map(|name| self.pool.add_class(name))
            .collect();

        let mut field_blobs = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let name_index = self.pool.add_utf8(&field.name);
            let desc_index = self.pool.add_utf8(&field.descriptor);
            let mut blob = Vec::with_capacity(8);
            blob.extend_from_slice(&field.access_flags.to_be_bytes());
            blob.extend_from_slice(&name_index.to_be_bytes());
            blob.extend_from_slice(&desc_index.to_be_bytes());
            blob.extend_from_slice(&0u16.to_be_bytes()); // attributes_count
            field_blobs.push(blob);
        }

        let this_class = self.this_class.clone();
        let methods = std::mem::take(&mut self.methods);
        let mut method_blobs = Vec::with_capacity(methods.len());
        for method in &methods {
            method_blobs.push(serialize_method(&this_class, &mut self.pool, method)?);
        }

        let source_file_blob = match &self.source_file {
            Some(file_name) => {
                let attr_name = self.pool.add_utf8("SourceFile");
                let value_index = self.pool.add_utf8(file_name);
                let mut blob = Vec::with_capacity(8);
                blob.extend_from_slice(&attr_name.to_be_bytes());
                blob.extend_from_slice(&2u32.to_be_bytes());
                blob.extend_from_slice(&value_index.to_be_bytes());
                Some(blob)
            }
            None => None,
        };

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&MINOR_VERSION.to_be_bytes());
        out.extend_from_slice(&MAJOR_VERSION.to_be_bytes());
        self.pool.write_to(&mut out);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&this_index.to_be_bytes());
        out.extend_from_slice(&super_index.to_be_bytes());
        out.extend_from_slice(&(interface_indices.len() as u16).to_be_bytes());
        for index in interface_indices {
            out.extend_from_slice(&index.to_be_bytes());
        }
        out.extend_from_slice(&(field_blobs.len() as u16).to_be_bytes());
        for blob in field_blobs {
            out.extend_from_slice(&blob);
        }
        out.extend_from_slice(&(method_blobs.len() as u16).to_be_bytes());
        for blob in method_blobs {
            out.extend_from_slice(&blob);
        }
        match source_file_blob {
            Some(blob) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&blob);
            }
            None => out.extend_from_slice(&0u16.to_be_bytes()),
        }
        Ok(out)
    }
}

fn serialize_method(
    this_class: &str,
    pool: &mut ConstantPool,
    method: &MethodInfo,
) -> ClassFileResult<Vec<u8>> {
    let is_abstract = method.access_flags & access::ACC_ABSTRACT != 0;
    match (&method.body, is_abstract) {
        (Some(_), true) => {
            return Err(ClassFileError::AbstractWithCode {
                class: this_class.to_string(),
                name: method.name.clone(),
            })
        }
        (None, false) => {
            return Err(ClassFileError::MissingCode {
                class: this_class.to_string(),
                name: method.name.clone(),
            })
        }
        _ => {}
    }

    let name_index = pool.add_utf8(&method.name);
    let desc_index = pool.add_utf8(&method.descriptor);
    let mut blob = Vec::new();
    blob.extend_from_slice(&method.access_flags.to_be_bytes());
    blob.extend_from_slice(&name_index.to_be_bytes());
    blob.extend_from_slice(&desc_index.to_be_bytes());

    let body = match &method.body {
        Some(body) => body,
        None => {
            blob.extend_from_slice(&0u16.to_be_bytes());
            return Ok(blob);
        }
    };
    if body.code.is_empty() {
        return Err(ClassFileError::MissingCode {
            class: this_class.to_string(),
            name: method.name.clone(),
        });
    }

    let is_static = method.access_flags & access::ACC_STATIC != 0;
    let required = descriptor::argument_slots(&method.descriptor, !is_static).map_err(|_| {
        ClassFileError::MalformedDescriptor {
            descriptor: method.descriptor.clone(),
        }
    })? as u16;
    if body.max_locals < required {
        return Err(ClassFileError::BadLocalSizing {
            class: this_class.to_string(),
            name: method.name.clone(),
            declared: body.max_locals,
            required,
        });
    }

    let frames = StackMapGenerator::new(pool, this_class).derive(
        &method.name,
        &method.descriptor,
        is_static,
        body.code.bytes(),
        body.code.exception_table(),
    )?;

    let mut attributes: Vec<Vec<u8>> = Vec::new();
    if !frames.frames.is_empty() {
        let attr_name = pool.add_utf8("StackMapTable");
        let mut table = Vec::new();
        stack_map::write_table(&frames.frames, pool, &mut table);
        let mut attr = Vec::with_capacity(table.len() + 6);
        attr.extend_from_slice(&attr_name.to_be_bytes());
        attr.extend_from_slice(&(table.len() as u32).to_be_bytes());
        attr.extend_from_slice(&table);
        attributes.push(attr);
    }
    if !body.code.line_numbers().is_empty() {
        let attr_name = pool.add_utf8("LineNumberTable");
        let entries = body.code.line_numbers();
        let len = 2 + entries.len() * 4;
        let mut attr = Vec::with_capacity(len + 6);
        attr.extend_from_slice(&attr_name.to_be_bytes());
        attr.extend_from_slice(&(len as u32).to_be_bytes());
        attr.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        for entry in entries {
            attr.extend_from_slice(&entry.start_pc.to_be_bytes());
            attr.extend_from_slice(&entry.line_number.to_be_bytes());
        }
        attributes.push(attr);
    }

    let max_stack = body.code.max_stack().max(frames.max_stack);
    let code_attr_name = pool.add_utf8("Code");
    let code_bytes = body.code.bytes();
    let exception_table = body.code.exception_table();
    let attributes_len: usize = attributes.iter().map(Vec::len).sum();
    let code_attr_len = 2 + 2 + 4 + code_bytes.len() + 2 + exception_table.len() * 8 + 2
        + attributes_len;

    blob.extend_from_slice(&1u16.to_be_bytes()); // attributes_count
    blob.extend_from_slice(&code_attr_name.to_be_bytes());
    blob.extend_from_slice(&(code_attr_len as u32).to_be_bytes());
    blob.extend_from_slice(&max_stack.to_be_bytes());
    blob.extend_from_slice(&body.max_locals.to_be_bytes());
    blob.extend_from_slice(&(code_bytes.len() as u32).to_be_bytes());
    blob.extend_from_slice(code_bytes);
    blob.extend_from_slice(&(exception_table.len() as u16).to_be_bytes());
    for entry in exception_table {
        blob.extend_from_slice(&entry.start_pc.to_be_bytes());
        blob.extend_from_slice(&entry.end_pc.to_be_bytes());
        blob.extend_from_slice(&entry.handler_pc.to_be_bytes());
        blob.extend_from_slice(&entry.catch_type.to_be_bytes());
    }
    blob.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attr in attributes {
        blob.extend_from_slice(&attr);
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void_main() -> MethodBody {
        let mut code = CodeBuilder::new();
        code.return_void();
        MethodBody { code, max_locals: 1 }
    }

    #[test]
    fn test_magic_and_version() {
        let mut writer = ClassWriter::new("com/example/Main");
        writer.add_method(access::ACC_PUBLIC | access::ACC_STATIC, "main", "()V", {
            let mut code = CodeBuilder::new();
            code.return_void();
            MethodBody { code, max_locals: 0 }
        });
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 0);
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 61);
    }

    #[test]
    fn test_default_superclass_is_object() {
        let writer = ClassWriter::new("com/example/Main");
        assert_eq!(writer.super_class(), Some("java/lang/Object"));
    }

    #[test]
    fn test_interface_flags() {
        let writer = ClassWriter::new_interface("com/example/Main$Fn0");
        assert!(writer.is_interface());
        assert_eq!(
            writer.access_flags,
            access::ACC_PUBLIC | access::ACC_INTERFACE | access::ACC_ABSTRACT
        );
    }

    #[test]
    fn test_abstract_method_has_no_code_attribute() {
        let mut writer = ClassWriter::new_interface("com/example/Main$Fn0");
        writer.add_abstract_method("call", "(I)I");
        let bytes = writer.to_bytes().unwrap();
        // A well-formed interface with one bodyless method serializes.
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn test_concrete_method_without_body_rejected() {
        let mut writer = ClassWriter::new("com/example/Main");
        writer.methods.push(MethodInfo {
            access_flags: access::ACC_PUBLIC,
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            body: None,
        });
        let err = writer.to_bytes().unwrap_err();
        assert!(matches!(err, ClassFileError::MissingCode { .. }));
    }

    #[test]
    fn test_abstract_method_with_body_rejected() {
        let mut writer = ClassWriter::new("com/example/Main");
        writer.methods.push(MethodInfo {
            access_flags: access::METHOD_ABSTRACT,
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            body: Some(void_main()),
        });
        let err = writer.to_bytes().unwrap_err();
        assert!(matches!(err, ClassFileError::AbstractWithCode { .. }));
    }

    #[test]
    fn test_undersized_locals_rejected() {
        let mut writer = ClassWriter::new("com/example/Main");
        let mut code = CodeBuilder::new();
        code.return_void();
        // instance method with two double params needs 5 slots
        writer.add_method(
            access::ACC_PUBLIC,
            "run",
            "(DD)V",
            MethodBody { code, max_locals: 3 },
        );
        let err = writer.to_bytes().unwrap_err();
        assert_eq!(
            err,
            ClassFileError::BadLocalSizing {
                class: "com/example/Main".to_string(),
                name: "run".to_string(),
                declared: 3,
                required: 5,
            }
        );
    }

    #[test]
    fn test_missing_superclass_rejected() {
        let mut writer = ClassWriter::new("com/example/Main");
        writer.super_class = None;
        writer.add_method(access::ACC_PUBLIC | access::ACC_STATIC, "main", "()V", {
            let mut code = CodeBuilder::new();
            code.return_void();
            MethodBody { code, max_locals: 0 }
        });
        let err = writer.to_bytes().unwrap_err();
        assert!(matches!(err, ClassFileError::MissingSuperclass { .. }));
    }

    #[test]
    fn test_capture_field_serialized() {
        let mut writer = ClassWriter::new("com/example/Main$FnImpl0");
        writer.add_field(access::FIELD_CAPTURE, "cap$count", "I");
        writer.add_method(access::ACC_PUBLIC | access::ACC_STATIC, "noop", "()V", {
            let mut code = CodeBuilder::new();
            code.return_void();
            MethodBody { code, max_locals: 0 }
        });
        let bytes = writer.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn test_branching_method_gets_stack_map() {
        let mut writer = ClassWriter::new("com/example/Main");
        let mut code = CodeBuilder::new();
        code.iload(0);
        let patch = code.ifeq_forward();
        code.iconst(1);
        code.ireturn();
        code.patch_branch(patch);
        code.iconst(0);
        code.ireturn();
        writer.add_method(
            access::ACC_PUBLIC | access::ACC_STATIC,
            "choose",
            "(I)I",
            MethodBody { code, max_locals: 1 },
        );
        let bytes = writer.to_bytes().unwrap();
        // The StackMapTable name must have been interned.
        let needle = b"StackMapTable";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }
}
