//! Type conversion at value boundaries.
//!
//! `convert_type` is the single source of truth wherever a value of one
//! descriptor must be passed where another is declared: argument passing,
//! returns, array element stores. It emits the minimal correct sequence and
//! is a strict no-op when both descriptors are equal.

use tsjvm_classfile::{descriptor, CodeBuilder, ConstantPool};

use crate::ast::Span;
use crate::error::{CompileError, CompileResult};

/// Emits the conversion from a value of type `from` (on the stack top) to
/// type `to`.
pub fn convert_type(
    code: &mut CodeBuilder,
    pool: &mut ConstantPool,
    from: &str,
    to: &str,
    span: Span,
) -> CompileResult<()> {
    if from == to {
        return Ok(());
    }
    let fail = || CompileError::TypeInference {
        message: format!(
            "no conversion from {} to {}",
            descriptor::display_name(from),
            descriptor::display_name(to)
        ),
        span,
    };
    if descriptor::is_void(from) || descriptor::is_void(to) {
        return Err(fail());
    }

    match (descriptor::is_primitive(from), descriptor::is_primitive(to)) {
        (true, true) => {
            numeric_conversion(code, from, to).ok_or_else(fail)?;
            Ok(())
        }
        (true, false) => {
            // widen first when the target wrapper boxes a different primitive
            let boxed_prim = match descriptor::primitive_of(to) {
                Some(prim) => prim,
                None if to == descriptor::OBJECT => from,
                None => return Err(fail()),
            };
            if boxed_prim != from {
                numeric_conversion(code, from, boxed_prim).ok_or_else(fail)?;
            }
            emit_box(code, pool, boxed_prim).ok_or_else(fail)?;
            Ok(())
        }
        (false, true) => {
            let source_prim = match descriptor::primitive_of(from) {
                Some(prim) => prim,
                None => {
                    // an erased reference must be cast to the wrapper first
                    let wrapper = descriptor::wrapper_of(to).ok_or_else(fail)?;
                    let class = pool.add_class(descriptor::internal_name(wrapper).unwrap_or(wrapper));
                    code.checkcast(class);
                    to
                }
            };
            emit_unbox(code, pool, source_prim).ok_or_else(fail)?;
            if source_prim != to {
                numeric_conversion(code, source_prim, to).ok_or_else(fail)?;
            }
            Ok(())
        }
        (false, false) => {
            // widening to the root type needs no instruction
            if to != descriptor::OBJECT {
                let name = descriptor::internal_name(to).ok_or_else(fail)?;
                let class = pool.add_class(name);
                code.checkcast(class);
            }
            Ok(())
        }
    }
}

/// Primitive-to-primitive conversion instructions. The sub-int types convert
/// through int.
fn numeric_conversion(code: &mut CodeBuilder, from: &str, to: &str) -> Option<()> {
    let from = if matches!(from, "Z" | "B" | "C" | "S") { "I" } else { from };
    match (from, to) {
        (a, b) if a == b => {}
        ("I", "J") => {
            code.i2l();
        }
        ("I", "F") => {
            code.i2f();
        }
        ("I", "D") => {
            code.i2d();
        }
        ("I", "B") => {
            code.i2b();
        }
        ("I", "C") => {
            code.i2c();
        }
        ("I", "S") => {
            code.i2s();
        }
        ("I", "Z") => {}
        ("J", "I") => {
            code.l2i();
        }
        ("J", "F") => {
            code.l2f();
        }
        ("J", "D") => {
            code.l2d();
        }
        ("F", "I") => {
            code.f2i();
        }
        ("F", "J") => {
            code.f2l();
        }
        ("F", "D") => {
            code.f2d();
        }
        ("D", "I") => {
            code.d2i();
        }
        ("D", "J") => {
            code.d2l();
        }
        ("D", "F") => {
            code.d2f();
        }
        _ => return None,
    }
    Some(())
}

/// `Wrapper.valueOf(prim)` boxing call.
fn emit_box(code: &mut CodeBuilder, pool: &mut ConstantPool, prim: &str) -> Option<()> {
    let wrapper = descriptor::wrapper_of(prim)?;
    let owner = descriptor::internal_name(wrapper)?;
    let desc = format!("({prim}){wrapper}");
    let method = pool.add_method_ref(owner, "valueOf", &desc);
    code.invokestatic(method, &desc);
    Some(())
}

/// `wrapper.xxxValue()` unboxing call.
fn emit_unbox(code: &mut CodeBuilder, pool: &mut ConstantPool, prim: &str) -> Option<()> {
    let wrapper = descriptor::wrapper_of(prim)?;
    let owner = descriptor::internal_name(wrapper)?;
    let name = match prim {
        "Z" => "booleanValue",
        "B" => "byteValue",
        "C" => "charValue",
        "S" => "shortValue",
        "I" => "intValue",
        "J" => "longValue",
        "F" => "floatValue",
        "D" => "doubleValue",
        _ => return None,
    };
    let desc = format!("(){prim}");
    let method = pool.add_method_ref(owner, name, &desc);
    code.invokevirtual(method, &desc);
    Some(())
}
