//! Platform statics.
//!
//! A closed table of global-namespace statics consulted last in dispatch:
//! JSON codec calls route to the runtime support class, and the Array
//! factory functions build JVM arrays directly.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

const JSON_HELPER: &str = "tsjvm/runtime/Json";

pub(super) fn is_platform_static(ident: &str, member: &str) -> bool {
    matches!(
        (ident, member),
        ("Json", "stringify" | "parse") | ("Array", "of" | "from")
    )
}

pub(super) fn lower(
    lowerer: &mut Lowerer,
    ident: &str,
    member: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    match (ident, member) {
        ("Json", "stringify") => {
            let desc = format!("({}){}", descriptor::OBJECT, descriptor::STRING);
            lower_json(lowerer, "stringify", &desc, descriptor::OBJECT, args, span)?;
            Ok(descriptor::STRING.to_string())
        }
        ("Json", "parse") => {
            let desc = format!("({}){}", descriptor::STRING, descriptor::OBJECT);
            lower_json(lowerer, "parse", &desc, descriptor::STRING, args, span)?;
            Ok(descriptor::OBJECT.to_string())
        }
        ("Array", "of") => lower_array_of(lowerer, args),
        ("Array", "from") => lower_array_from(lowerer, args, span),
        _ => Err(CompileError::UnsupportedCall {
            member: member.to_string(),
            receiver: ident.to_string(),
            span,
        }),
    }
}

/// Result descriptor without emitting.
pub(super) fn result_type(
    lowerer: &mut Lowerer,
    ident: &str,
    member: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<String> {
    match (ident, member) {
        ("Json", "stringify") => Ok(descriptor::STRING.to_string()),
        ("Json", "parse") => Ok(descriptor::OBJECT.to_string()),
        ("Array", "of") => Ok(descriptor::array_of(&of_element(lowerer, args)?)),
        ("Array", "from") => {
            let source = source_type(lowerer, args, span)?;
            Ok(from_result(&source))
        }
        _ => Err(CompileError::UnsupportedCall {
            member: member.to_string(),
            receiver: ident.to_string(),
            span,
        }),
    }
}

fn lower_json(
    lowerer: &mut Lowerer,
    name: &str,
    desc: &str,
    param: &str,
    args: &[Arg],
    span: Span,
) -> CompileResult<()> {
    let [arg] = args else {
        return Err(CompileError::ArityOrShape {
            operation: name.to_string(),
            message: format!("expected 1 argument, got {}", args.len()),
            span,
        });
    };
    let actual = lowerer.lower_expr(&arg.expr)?;
    lowerer.convert(&actual, param, arg.expr.span)?;
    let method = lowerer.pool.add_method_ref(JSON_HELPER, name, desc);
    lowerer.code.invokestatic(method, desc);
    Ok(())
}

/// Element type of Array.of: the first argument decides, Object for none.
fn of_element(lowerer: &mut Lowerer, args: &[Arg]) -> CompileResult<String> {
    match args.first() {
        Some(first) => lowerer.infer_expr_type(&first.expr),
        None => Ok(descriptor::OBJECT.to_string()),
    }
}

/// Array.of(a, b, ...) allocates an array sized to the argument count and
/// stores each argument in order.
fn lower_array_of(lowerer: &mut Lowerer, args: &[Arg]) -> CompileResult<String> {
    let element = of_element(lowerer, args)?;
    lowerer.code.iconst(args.len() as i32);
    lowerer.emit_new_array(&element);
    for (i, arg) in args.iter().enumerate() {
        lowerer.code.dup();
        lowerer.code.iconst(i as i32);
        let actual = lowerer.lower_expr(&arg.expr)?;
        lowerer.convert(&actual, &element, arg.expr.span)?;
        lowerer.code.array_store(&element);
    }
    Ok(descriptor::array_of(&element))
}

fn source_type(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    let [source] = args else {
        return Err(CompileError::ArityOrShape {
            operation: "from".to_string(),
            message: format!("expected 1 argument, got {}", args.len()),
            span,
        });
    };
    lowerer.infer_expr_type(&source.expr)
}

fn from_result(source: &str) -> String {
    if descriptor::is_array(source) {
        source.to_string()
    } else {
        descriptor::OBJECT_ARRAY.to_string()
    }
}

/// Array.from copies its source: lists drain through toArray, arrays clone.
fn lower_array_from(lowerer: &mut Lowerer, args: &[Arg], span: Span) -> CompileResult<String> {
    source_type(lowerer, args, span)?;
    let actual = lowerer.lower_expr(&args[0].expr)?;
    if actual == descriptor::ARRAY_LIST {
        let desc = format!("(){}", descriptor::OBJECT_ARRAY);
        let method = lowerer
            .pool
            .add_method_ref("java/util/ArrayList", "toArray", &desc);
        lowerer.code.invokevirtual(method, &desc);
        return Ok(descriptor::OBJECT_ARRAY.to_string());
    }
    if descriptor::is_array(&actual) {
        let desc = format!("(){}", descriptor::OBJECT);
        let method = lowerer.pool.add_method_ref(&actual, "clone", &desc);
        lowerer.code.invokevirtual(method, &desc);
        let class = lowerer.pool.add_class(&actual);
        lowerer.code.checkcast(class);
        return Ok(actual);
    }
    Err(CompileError::UnsupportedCall {
        member: "from".to_string(),
        receiver: descriptor::display_name(&actual),
        span,
    })
}
