//! String receiver methods.
//!
//! Most members map one-to-one onto java/lang/String instance methods.
//! charAt differs in result shape between the source language (a string)
//! and the JVM (a char), so it re-wraps through String.valueOf; charCodeAt
//! exposes the raw char as an int instead.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

const STRING_CLASS: &str = "java/lang/String";
const HELPER: &str = "tsjvm/runtime/ArrayOps";
const STRING_ARRAY: &str = "[Ljava/lang/String;";

/// Result descriptor of a string member call, or None for unknown members.
pub(super) fn result_type(member: &str) -> Option<String> {
    match member {
        "charAt" | "slice" | "substring" | "toUpperCase" | "toLowerCase" | "trim" | "repeat"
        | "concat" => Some(descriptor::STRING.to_string()),
        "charCodeAt" | "indexOf" => Some("I".to_string()),
        "includes" | "startsWith" | "endsWith" => Some("Z".to_string()),
        "split" => Some(STRING_ARRAY.to_string()),
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
        "charAt" => {
            eval_one(lowerer, member, args, "I", span)?;
            invoke(lowerer, "charAt", "(I)C");
            let desc = format!("(C){}", descriptor::STRING);
            let method = lowerer.pool.add_method_ref(STRING_CLASS, "valueOf", &desc);
            lowerer.code.invokestatic(method, &desc);
            Ok(descriptor::STRING.to_string())
        }
        "charCodeAt" => {
            eval_one(lowerer, member, args, "I", span)?;
            invoke(lowerer, "charAt", "(I)C");
            Ok("I".to_string())
        }
        "indexOf" => match args {
            [] => {
                lowerer.code.pop();
                lowerer.code.iconst(-1);
                Ok("I".to_string())
            }
            _ => string_arg_call(lowerer, member, args, "indexOf", "I", span),
        },
        "includes" => match args {
            [] => {
                lowerer.code.pop();
                lowerer.code.iconst(0);
                Ok("Z".to_string())
            }
            _ => string_arg_call(lowerer, member, args, "contains", "Z", span),
        },
        "startsWith" => string_arg_call(lowerer, member, args, "startsWith", "Z", span),
        "endsWith" => string_arg_call(lowerer, member, args, "endsWith", "Z", span),
        "slice" | "substring" => lower_substring(lowerer, member, args, span),
        "toUpperCase" => no_arg_call(lowerer, member, args, "toUpperCase", span),
        "toLowerCase" => no_arg_call(lowerer, member, args, "toLowerCase", span),
        "trim" => no_arg_call(lowerer, member, args, "trim", span),
        "repeat" => {
            eval_one(lowerer, member, args, "I", span)?;
            let desc = format!("(I){}", descriptor::STRING);
            invoke(lowerer, "repeat", &desc);
            Ok(descriptor::STRING.to_string())
        }
        "concat" => {
            eval_one(lowerer, member, args, descriptor::STRING, span)?;
            let desc = format!("({}){}", descriptor::STRING, descriptor::STRING);
            invoke(lowerer, "concat", &desc);
            Ok(descriptor::STRING.to_string())
        }
        "split" => lower_split(lowerer, args, span),
        _ => Err(CompileError::UnsupportedCall {
            member: member.to_string(),
            receiver: "String".to_string(),
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

fn invoke(lowerer: &mut Lowerer, name: &str, desc: &str) {
    let method = lowerer.pool.add_method_ref(STRING_CLASS, name, desc);
    lowerer.code.invokevirtual(method, desc);
}

fn eval_one(
    lowerer: &mut Lowerer,
    member: &str,
    args: &[Arg],
    param: &str,
    span: Span,
) -> CompileResult<()> {
    let [arg] = args else {
        return Err(arity(member, 1, args.len(), span));
    };
    let actual = lowerer.lower_expr(&arg.expr)?;
    lowerer.convert(&actual, param, arg.expr.span)
}

fn string_arg_call(
    lowerer: &mut Lowerer,
    member: &str,
    args: &[Arg],
    name: &str,
    ret: &str,
    span: Span,
) -> CompileResult<String> {
    eval_one(lowerer, member, args, descriptor::STRING, span)?;
    let param = if name == "contains" {
        // contains takes CharSequence
        "Ljava/lang/CharSequence;"
    } else {
        descriptor::STRING
    };
    let desc = format!("({param}){ret}");
    invoke(lowerer, name, &desc);
    Ok(ret.to_string())
}

fn no_arg_call(
    lowerer: &mut Lowerer,
    member: &str,
    args: &[Arg],
    name: &str,
    span: Span,
) -> CompileResult<String> {
    if !args.is_empty() {
        return Err(arity(member, 0, args.len(), span));
    }
    let desc = format!("(){}", descriptor::STRING);
    invoke(lowerer, name, &desc);
    Ok(descriptor::STRING.to_string())
}

/// slice and substring both lower to String.substring with one or two
/// int bounds.
fn lower_substring(
    lowerer: &mut Lowerer,
    member: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity(member, 2, args.len(), span));
    }
    for arg in args {
        let actual = lowerer.lower_expr(&arg.expr)?;
        lowerer.convert(&actual, "I", arg.expr.span)?;
    }
    let desc = if args.len() == 1 {
        format!("(I){}", descriptor::STRING)
    } else {
        format!("(II){}", descriptor::STRING)
    };
    invoke(lowerer, "substring", &desc);
    Ok(descriptor::STRING.to_string())
}

/// split(sep) delegates to String.split; split() wraps the whole receiver
/// as a one-element array via the runtime helper.
fn lower_split(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    match args {
        [] => {
            let desc = format!("({}){STRING_ARRAY}", descriptor::STRING);
            let method = lowerer.pool.add_method_ref(HELPER, "singleton", &desc);
            lowerer.code.invokestatic(method, &desc);
        }
        [sep] => {
            let actual = lowerer.lower_expr(&sep.expr)?;
            lowerer.convert(&actual, descriptor::STRING, sep.expr.span)?;
            let desc = format!("({}){STRING_ARRAY}", descriptor::STRING);
            invoke(lowerer, "split", &desc);
        }
        _ => return Err(arity("split", 1, args.len(), span)),
    }
    Ok(STRING_ARRAY.to_string())
}
