//! ArrayList receiver methods.
//!
//! These map straight onto java/util/ArrayList instance methods; elements
//! cross the boundary as Object, so arguments box on the way in and results
//! come back erased. `reverse` is the one exception, routed through
//! java/util/Collections since ArrayList has no in-place reverse.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

const LIST_CLASS: &str = "java/util/ArrayList";
const COLLECTIONS: &str = "java/util/Collections";

/// Result descriptor of a list member call, or None for unknown members.
pub(super) fn result_type(member: &str) -> Option<String> {
    match member {
        "push" | "unshift" => Some("V".to_string()),
        "pop" | "shift" => Some(descriptor::OBJECT.to_string()),
        "indexOf" => Some("I".to_string()),
        "includes" => Some("Z".to_string()),
        "reverse" => Some(descriptor::ARRAY_LIST.to_string()),
        _ => None,
    }
}

pub(super) fn lower(
    lowerer: &mut Lowerer,
    member: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    match member {
        "push" => lower_push(lowerer, args, span),
        "pop" => lower_pop(lowerer, args, span),
        "shift" => lower_shift(lowerer, args, span),
        "unshift" => lower_unshift(lowerer, args, span),
        "indexOf" => lower_index_of(lowerer, args, span),
        "includes" => lower_includes(lowerer, args, span),
        "reverse" => lower_reverse(lowerer, args, span),
        _ => Err(CompileError::UnsupportedCall {
            member: member.to_string(),
            receiver: descriptor::display_name(descriptor::ARRAY_LIST),
            span,
        }),
    }
}

fn arity(member: &str, expected: usize, got: usize, span: Span) -> CompileError {
    CompileError::ArityOrShape {
        operation: member.to_string(),
        message: format!("expected {expected} arguments, got {got}"),
        span,
    }
}

fn eval_element(lowerer: &mut Lowerer, arg: &Arg) -> CompileResult<()> {
    let actual = lowerer.lower_expr(&arg.expr)?;
    lowerer.convert(&actual, descriptor::OBJECT, arg.expr.span)
}

fn invoke(lowerer: &mut Lowerer, name: &str, desc: &str) {
    let method = lowerer.pool.add_method_ref(LIST_CLASS, name, desc);
    lowerer.code.invokevirtual(method, desc);
}

/// push appends and evaluates to void; add's boolean result is dropped.
fn lower_push(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    let [value] = args else {
        return Err(arity("push", 1, args.len(), span));
    };
    eval_element(lowerer, value)?;
    invoke(lowerer, "add", "(Ljava/lang/Object;)Z");
    lowerer.code.pop();
    Ok("V".to_string())
}

/// pop removes the last element: remove(size() - 1).
fn lower_pop(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity("pop", 0, args.len(), span));
    }
    lowerer.code.dup();
    invoke(lowerer, "size", "()I");
    lowerer.code.iconst(1);
    lowerer.code.isub();
    invoke(lowerer, "remove", "(I)Ljava/lang/Object;");
    Ok(descriptor::OBJECT.to_string())
}

fn lower_shift(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity("shift", 0, args.len(), span));
    }
    lowerer.code.iconst(0);
    invoke(lowerer, "remove", "(I)Ljava/lang/Object;");
    Ok(descriptor::OBJECT.to_string())
}

fn lower_unshift(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    let [value] = args else {
        return Err(arity("unshift", 1, args.len(), span));
    };
    lowerer.code.iconst(0);
    eval_element(lowerer, value)?;
    invoke(lowerer, "add", "(ILjava/lang/Object;)V");
    Ok("V".to_string())
}

fn lower_index_of(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    match args {
        [] => {
            lowerer.code.pop();
            lowerer.code.iconst(-1);
        }
        [value] => {
            eval_element(lowerer, value)?;
            invoke(lowerer, "indexOf", "(Ljava/lang/Object;)I");
        }
        _ => return Err(arity("indexOf", 1, args.len(), span)),
    }
    Ok("I".to_string())
}

fn lower_includes(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    match args {
        [] => {
            lowerer.code.pop();
            lowerer.code.iconst(0);
        }
        [value] => {
            eval_element(lowerer, value)?;
            invoke(lowerer, "contains", "(Ljava/lang/Object;)Z");
        }
        _ => return Err(arity("includes", 1, args.len(), span)),
    }
    Ok("Z".to_string())
}

/// In-place reverse via Collections; a duplicate of the receiver is the
/// result, matching the mutating-returns-receiver convention.
fn lower_reverse(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity("reverse", 0, args.len(), span));
    }
    lowerer.code.dup();
    let desc = "(Ljava/util/List;)V";
    let method = lowerer.pool.add_method_ref(COLLECTIONS, "reverse", desc);
    lowerer.code.invokestatic(method, desc);
    Ok(descriptor::ARRAY_LIST.to_string())
}
