//! Array receiver methods.
//!
//! JVM arrays have no instance methods, so every operation routes through
//! static helpers on the runtime support class. Primitive element types get
//! exact helper signatures; reference element types erase to Object arrays
//! and cast the result back to the receiver's type where one is returned.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

const HELPER: &str = "tsjvm/runtime/ArrayOps";

/// Helper-signature view of an array receiver: the descriptor the helper
/// accepts and the element descriptor arguments convert to.
struct Erasure {
    array: String,
    element: String,
    erased: bool,
}

fn erase(recv: &str) -> Option<Erasure> {
    let element = descriptor::element_type(recv)?;
    if descriptor::is_primitive(element) {
        Some(Erasure {
            array: recv.to_string(),
            element: element.to_string(),
            erased: false,
        })
    } else {
        Some(Erasure {
            array: descriptor::OBJECT_ARRAY.to_string(),
            element: descriptor::OBJECT.to_string(),
            erased: true,
        })
    }
}

fn unsupported(recv: &str, member: &str, span: Span) -> CompileError {
    CompileError::UnsupportedCall {
        member: member.to_string(),
        receiver: descriptor::display_name(recv),
        span,
    }
}

/// Result descriptor of an array member call, or None for unknown members.
pub(super) fn result_type(recv: &str, member: &str) -> Option<String> {
    descriptor::element_type(recv)?;
    match member {
        "indexOf" | "lastIndexOf" => Some("I".to_string()),
        "includes" => Some("Z".to_string()),
        "join" | "toString" => Some(descriptor::STRING.to_string()),
        "fill" | "reverse" | "sort" | "toReversed" | "toSorted" => Some(recv.to_string()),
        _ => None,
    }
}

pub(super) fn lower(
    lowerer: &mut Lowerer,
    recv: &str,
    member: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    let erasure = erase(recv).ok_or_else(|| unsupported(recv, member, span))?;
    match member {
        "indexOf" | "lastIndexOf" => lower_search(lowerer, member, &erasure, args, -1, span),
        "includes" => lower_search(lowerer, "includes", &erasure, args, 0, span),
        "join" => lower_join(lowerer, &erasure, args, span),
        "toString" => {
            if !args.is_empty() {
                return Err(arity(member, 0, args.len(), span));
            }
            let sep = lowerer.pool.add_string(",");
            lowerer.code.ldc(sep);
            emit_join(lowerer, &erasure);
            Ok(descriptor::STRING.to_string())
        }
        "fill" => lower_fill(lowerer, recv, &erasure, args, span),
        "reverse" | "sort" => lower_mutating(lowerer, recv, member, &erasure, args, span),
        "toReversed" => lower_copying(lowerer, recv, "toReversed", &erasure, args, span),
        "toSorted" => lower_copying(lowerer, recv, "toSorted", &erasure, args, span),
        _ => Err(unsupported(recv, member, span)),
    }
}

fn arity(member: &str, expected: usize, got: usize, span: Span) -> CompileError {
    CompileError::ArityOrShape {
        operation: member.to_string(),
        message: format!("expected {expected} arguments, got {got}"),
        span,
    }
}

/// indexOf / lastIndexOf / includes. With no search value the result is
/// known statically; the receiver is discarded and the miss value pushed.
fn lower_search(
    lowerer: &mut Lowerer,
    member: &str,
    erasure: &Erasure,
    args: &[Arg],
    miss: i32,
    span: Span,
) -> CompileResult<String> {
    let ret = if member == "includes" { "Z" } else { "I" };
    if args.is_empty() {
        lowerer.code.pop();
        lowerer.code.iconst(miss);
        return Ok(ret.to_string());
    }
    if args.len() > 1 {
        return Err(arity(member, 1, args.len(), span));
    }
    let actual = lowerer.lower_expr(&args[0].expr)?;
    lowerer.convert(&actual, &erasure.element, args[0].expr.span)?;
    let desc = format!("({}{}){ret}", erasure.array, erasure.element);
    let method = lowerer.pool.add_method_ref(HELPER, member, &desc);
    lowerer.code.invokestatic(method, &desc);
    Ok(ret.to_string())
}

fn emit_join(lowerer: &mut Lowerer, erasure: &Erasure) {
    let desc = format!("({}{}){}", erasure.array, descriptor::STRING, descriptor::STRING);
    let method = lowerer.pool.add_method_ref(HELPER, "join", &desc);
    lowerer.code.invokestatic(method, &desc);
}

fn lower_join(
    lowerer: &mut Lowerer,
    erasure: &Erasure,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    match args {
        [] => {
            let sep = lowerer.pool.add_string(",");
            lowerer.code.ldc(sep);
        }
        [sep] => {
            let actual = lowerer.lower_expr(&sep.expr)?;
            lowerer.convert(&actual, descriptor::STRING, sep.expr.span)?;
        }
        _ => return Err(arity("join", 1, args.len(), span)),
    }
    emit_join(lowerer, erasure);
    Ok(descriptor::STRING.to_string())
}

/// fill(v) writes through every index and evaluates to the receiver.
/// fill() has nothing to write, so the receiver passes through untouched.
fn lower_fill(
    lowerer: &mut Lowerer,
    recv: &str,
    erasure: &Erasure,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    match args {
        [] => Ok(recv.to_string()),
        [value] => {
            lowerer.code.dup();
            let actual = lowerer.lower_expr(&value.expr)?;
            lowerer.convert(&actual, &erasure.element, value.expr.span)?;
            let desc = format!("({}{})V", erasure.array, erasure.element);
            let method = lowerer.pool.add_method_ref(HELPER, "fill", &desc);
            lowerer.code.invokestatic(method, &desc);
            Ok(recv.to_string())
        }
        _ => Err(arity("fill", 1, args.len(), span)),
    }
}

/// In-place operations keep a duplicate of the receiver as the result.
fn lower_mutating(
    lowerer: &mut Lowerer,
    recv: &str,
    member: &str,
    erasure: &Erasure,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity(member, 0, args.len(), span));
    }
    lowerer.code.dup();
    let desc = format!("({})V", erasure.array);
    let method = lowerer.pool.add_method_ref(HELPER, member, &desc);
    lowerer.code.invokestatic(method, &desc);
    Ok(recv.to_string())
}

/// Copying operations return a fresh array from the helper; erased helpers
/// return an Object array that is cast back to the receiver's type.
fn lower_copying(
    lowerer: &mut Lowerer,
    recv: &str,
    member: &str,
    erasure: &Erasure,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity(member, 0, args.len(), span));
    }
    let desc = format!("({}){}", erasure.array, erasure.array);
    let method = lowerer.pool.add_method_ref(HELPER, member, &desc);
    lowerer.code.invokestatic(method, &desc);
    if erasure.erased {
        let class = lowerer.pool.add_class(recv);
        lowerer.code.checkcast(class);
    }
    Ok(recv.to_string())
}
