//! Call-site dispatch and argument lowering tests.

use tsjvm_classfile::{descriptor, CodeBuilder, ConstantPool};
use tsjvm_compiler::{
    Arg, ArtifactMap, Callee, CompilationContext, CompileError, Expr, ExprKind,
    FunctionalInterfaceRegistry, JavaType, JavaTypeRegistry, Literal, Lowerer, MethodEntry,
    SamEntry, Span, Stmt, StmtKind, ThisBinding, UserClass, UserClassRegistry, UserMethod,
};

// opcode bytes the assertions look for
const ICONST_0: u8 = 0x03;
const ICONST_1: u8 = 0x04;
const ICONST_2: u8 = 0x05;
const ICONST_3: u8 = 0x06;
const ACONST_NULL: u8 = 0x01;
const ALOAD_0: u8 = 0x2a;
const ILOAD_0: u8 = 0x1a;
const POP: u8 = 0x57;
const DUP: u8 = 0x59;
const NEWARRAY: u8 = 0xbc;
const CHECKCAST: u8 = 0xc0;
const INVOKEVIRTUAL: u8 = 0xb6;
const INVOKESPECIAL: u8 = 0xb7;
const INVOKESTATIC: u8 = 0xb8;
const INVOKEINTERFACE: u8 = 0xb9;

struct Fixture {
    ctx: CompilationContext,
    types: JavaTypeRegistry,
    classes: UserClassRegistry,
    interfaces: FunctionalInterfaceRegistry,
    artifacts: ArtifactMap,
}

fn entry(name: &str, desc: &str, is_varargs: bool, returns_receiver: bool) -> MethodEntry {
    MethodEntry {
        name: name.to_string(),
        descriptor: desc.to_string(),
        is_static: true,
        is_varargs,
        returns_receiver,
    }
}

fn fixture() -> Fixture {
    let mut types = JavaTypeRegistry::new();
    types.register(JavaType {
        alias: "MathUtil".to_string(),
        internal_name: "demo/MathUtil".to_string(),
        is_interface: false,
        methods: vec![
            entry("sum", "(III)I", false, false),
            entry("max", "([I)I", true, false),
            entry("spread", "(I[I)I", true, false),
        ],
    });
    types.register(JavaType {
        alias: "Builder".to_string(),
        internal_name: "demo/Builder".to_string(),
        is_interface: false,
        methods: vec![MethodEntry {
            name: "append".to_string(),
            descriptor: "(I)Ljava/lang/Object;".to_string(),
            is_static: false,
            is_varargs: false,
            returns_receiver: true,
        }],
    });
    Fixture {
        ctx: CompilationContext::new(),
        types,
        classes: UserClassRegistry::new(),
        interfaces: FunctionalInterfaceRegistry::new(),
        artifacts: ArtifactMap::new(),
    }
}

fn lower(f: &mut Fixture, expr: &Expr) -> (CodeBuilder, ConstantPool, String) {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new();
    let desc = {
        let mut lowerer = Lowerer::new(
            &mut f.ctx,
            &f.types,
            &f.classes,
            &mut f.interfaces,
            &f.artifacts,
            &mut pool,
            &mut code,
            "V",
        );
        lowerer.lower_expr(expr).expect("lowering failed")
    };
    (code, pool, desc)
}

fn lower_err(f: &mut Fixture, expr: &Expr) -> CompileError {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new();
    let mut lowerer = Lowerer::new(
        &mut f.ctx,
        &f.types,
        &f.classes,
        &mut f.interfaces,
        &f.artifacts,
        &mut pool,
        &mut code,
        "V",
    );
    lowerer.lower_expr(expr).expect_err("lowering should fail")
}

fn pos(bytes: &[u8], op: u8) -> usize {
    bytes
        .iter()
        .position(|&b| b == op)
        .unwrap_or_else(|| panic!("opcode {op:#04x} not found in {bytes:02x?}"))
}

fn invoked_class(bytes: &[u8], pool: &ConstantPool, invoke_op: u8) -> String {
    let p = pos(bytes, invoke_op);
    let index = u16::from_be_bytes([bytes[p + 1], bytes[p + 2]]);
    pool.method_class(index).expect("method ref").to_string()
}

#[test]
fn test_external_static_args_evaluate_left_to_right() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(
        Expr::member(Expr::ident("MathUtil"), "sum"),
        vec![Expr::int(1), Expr::int(2), Expr::int(3)],
    );
    let (code, pool, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "I");
    assert_eq!(&bytes[..3], &[ICONST_1, ICONST_2, ICONST_3]);
    assert_eq!(invoked_class(bytes, &pool, INVOKESTATIC), "demo/MathUtil");
}

#[test]
fn test_missing_trailing_args_default_to_zero() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(Expr::member(Expr::ident("MathUtil"), "sum"), vec![Expr::int(1)]);
    let (code, _, _) = lower(&mut f, &expr);

    // the two absent ints are supplied as zeros
    assert_eq!(&code.bytes()[..3], &[ICONST_1, ICONST_0, ICONST_0]);
}

#[test]
fn test_varargs_packs_overflow_into_counted_array() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(
        Expr::member(Expr::ident("MathUtil"), "spread"),
        vec![Expr::int(1), Expr::int(2), Expr::int(3)],
    );
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "I");
    let alloc = pos(bytes, NEWARRAY);
    // the array length is the overflow count, two of three args
    assert_eq!(bytes[alloc - 1], ICONST_2);
    assert_eq!(bytes[alloc + 1], 10); // T_INT
    let stores = bytes.iter().filter(|&&b| b == 0x4f).count(); // iastore
    assert_eq!(stores, 2);
}

#[test]
fn test_varargs_exact_array_argument_passes_through() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("rest", "[I");
    let expr = Expr::call(
        Expr::member(Expr::ident("MathUtil"), "spread"),
        vec![Expr::int(1), Expr::ident("rest")],
    );
    let (code, _, _) = lower(&mut f, &expr);

    // no packing: the existing array is handed over as-is
    assert!(!code.bytes().contains(&NEWARRAY));
    assert!(code.bytes().contains(&ALOAD_0));
}

#[test]
fn test_varargs_with_no_overflow_builds_empty_array() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(Expr::member(Expr::ident("MathUtil"), "max"), vec![]);
    let (code, _, _) = lower(&mut f, &expr);
    let bytes = code.bytes();

    // a zero-length array, never null
    assert_eq!(bytes[0], ICONST_0);
    assert_eq!(bytes[1], NEWARRAY);
    assert!(!bytes.contains(&ACONST_NULL));
}

#[test]
fn test_array_to_reversed_routes_through_runtime_helper() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("xs", "[I");
    let expr = Expr::method_call(Expr::ident("xs"), "toReversed", vec![]);
    let (code, pool, desc) = lower(&mut f, &expr);

    assert_eq!(desc, "[I");
    assert_eq!(
        invoked_class(code.bytes(), &pool, INVOKESTATIC),
        "tsjvm/runtime/ArrayOps"
    );
}

#[test]
fn test_reference_array_copy_casts_result_back() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("names", "[Ljava/lang/String;");
    let expr = Expr::method_call(Expr::ident("names"), "toSorted", vec![]);
    let (code, _, desc) = lower(&mut f, &expr);

    // helper works on Object[]; the call site restores the static type
    assert_eq!(desc, "[Ljava/lang/String;");
    assert!(code.bytes().contains(&CHECKCAST));
}

#[test]
fn test_unknown_array_member_names_element_type() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("xs", "[D");
    let expr = Expr::method_call(Expr::ident("xs"), "flatMap", vec![]);
    let err = lower_err(&mut f, &expr);

    assert_eq!(
        err,
        CompileError::UnsupportedCall {
            member: "flatMap".to_string(),
            receiver: "double[]".to_string(),
            span: Span::default(),
        }
    );
}

#[test]
fn test_list_push_discards_add_result() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("list", descriptor::ARRAY_LIST);
    let expr = Expr::method_call(Expr::ident("list"), "push", vec![Expr::int(7)]);
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "V");
    // the int boxes on the way in, add returns a boolean that is dropped
    assert!(bytes.contains(&INVOKESTATIC));
    assert_eq!(bytes.last(), Some(&POP));
}

#[test]
fn test_list_reverse_goes_through_collections() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("list", descriptor::ARRAY_LIST);
    let expr = Expr::method_call(Expr::ident("list"), "reverse", vec![]);
    let (code, pool, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, descriptor::ARRAY_LIST);
    assert!(bytes.contains(&DUP));
    assert_eq!(invoked_class(bytes, &pool, INVOKESTATIC), "java/util/Collections");
}

#[test]
fn test_string_char_at_rewraps_to_string() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("s", descriptor::STRING);
    let expr = Expr::method_call(Expr::ident("s"), "charAt", vec![Expr::int(0)]);
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, descriptor::STRING);
    // charAt(I)C then String.valueOf(C)
    assert!(bytes.contains(&INVOKEVIRTUAL));
    assert!(bytes.contains(&INVOKESTATIC));
}

#[test]
fn test_string_concat_operator_stringifies_operands() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::new(ExprKind::Binary {
        op: tsjvm_compiler::BinaryOp::Add,
        lhs: Box::new(Expr::str("n = ")),
        rhs: Box::new(Expr::int(42)),
    });
    let (code, pool, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, descriptor::STRING);
    assert_eq!(invoked_class(bytes, &pool, INVOKESTATIC), "java/lang/String");
    assert!(bytes.contains(&INVOKEVIRTUAL)); // concat
}

#[test]
fn test_json_stringify_is_a_platform_static() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(
        Expr::member(Expr::ident("Json"), "stringify"),
        vec![Expr::str("payload")],
    );
    let (code, pool, desc) = lower(&mut f, &expr);

    assert_eq!(desc, descriptor::STRING);
    assert_eq!(
        invoked_class(code.bytes(), &pool, INVOKESTATIC),
        "tsjvm/runtime/Json"
    );
}

#[test]
fn test_array_of_stores_elements_in_order() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(
        Expr::member(Expr::ident("Array"), "of"),
        vec![Expr::int(1), Expr::int(2)],
    );
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "[I");
    assert_eq!(bytes[0], ICONST_2); // length
    assert_eq!(bytes[1], NEWARRAY);
    assert_eq!(bytes.iter().filter(|&&b| b == 0x4f).count(), 2); // iastore
}

#[test]
fn test_super_ctor_loads_receiver_before_args() {
    let mut f = fixture();
    let mut child = UserClass::new("demo/Child");
    child.super_class = Some("demo/Base".to_string());
    f.classes.register(child);
    f.classes.register(UserClass::new("demo/Base"));
    f.ctx.push_class("demo/Child");
    f.ctx.push_method_scope(ThisBinding::Receiver {
        class: "demo/Child".to_string(),
    });

    let expr = Expr::new(ExprKind::Call {
        callee: Callee::Super,
        args: vec![Arg::plain(Expr::int(1))],
    });
    let (code, pool, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "V");
    assert_eq!(bytes[0], ALOAD_0);
    assert_eq!(invoked_class(bytes, &pool, INVOKESPECIAL), "demo/Base");
}

#[test]
fn test_super_method_dispatches_invokespecial() {
    let mut f = fixture();
    let mut base = UserClass::new("demo/Base");
    base.methods.push(UserMethod {
        name: "greet".to_string(),
        descriptor: "()Ljava/lang/String;".to_string(),
        is_static: false,
        is_private: false,
    });
    f.classes.register(base);
    let mut child = UserClass::new("demo/Child");
    child.super_class = Some("demo/Base".to_string());
    f.classes.register(child);
    f.ctx.push_class("demo/Child");
    f.ctx.push_method_scope(ThisBinding::Receiver {
        class: "demo/Child".to_string(),
    });

    let expr = Expr::new(ExprKind::Call {
        callee: Callee::SuperMember {
            name: "greet".to_string(),
        },
        args: vec![],
    });
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, descriptor::STRING);
    assert_eq!(bytes[0], ALOAD_0);
    assert!(bytes.contains(&INVOKESPECIAL));
}

#[test]
fn test_fluent_method_casts_result_back_to_receiver() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("b", "Ldemo/Builder;");
    let expr = Expr::method_call(Expr::ident("b"), "append", vec![Expr::int(1)]);
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    // declared return is Object; chaining restores the builder type
    assert_eq!(desc, "Ldemo/Builder;");
    assert!(bytes.contains(&INVOKEVIRTUAL));
    assert!(bytes.contains(&CHECKCAST));
}

#[test]
fn test_functional_interface_variable_invocation() {
    let mut f = fixture();
    f.interfaces.register(
        "demo/Adder",
        SamEntry {
            method_name: "call".to_string(),
            descriptor: "(II)I".to_string(),
        },
    );
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("add", "Ldemo/Adder;");
    let expr = Expr::call(Expr::ident("add"), vec![Expr::int(1), Expr::int(2)]);
    let (code, _, desc) = lower(&mut f, &expr);
    let bytes = code.bytes();

    assert_eq!(desc, "I");
    assert_eq!(bytes[0], ALOAD_0);
    let p = pos(bytes, INVOKEINTERFACE);
    assert_eq!(bytes[p + 3], 3); // receiver + two int slots
}

#[test]
fn test_spread_arguments_are_rejected() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::new(ExprKind::Call {
        callee: Callee::Expr(Box::new(Expr::member(Expr::ident("MathUtil"), "sum"))),
        args: vec![Arg {
            expr: Expr::int(1),
            spread: true,
        }],
    });
    let err = lower_err(&mut f, &expr);

    assert!(matches!(err, CompileError::UnsupportedFeature { .. }));
}

#[test]
fn test_unknown_receiver_member_is_unsupported_call() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::call(Expr::member(Expr::ident("Nowhere"), "run"), vec![]);
    let err = lower_err(&mut f, &expr);

    assert!(matches!(err, CompileError::UnsupportedCall { .. }));
}

#[test]
fn test_varargs_exact_pass_through_keeps_local_load() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    f.ctx.declare_local("xs", "[I");
    let expr = Expr::call(Expr::member(Expr::ident("MathUtil"), "max"), vec![Expr::ident("xs")]);
    let (code, _, _) = lower(&mut f, &expr);

    assert!(code.bytes().contains(&ILOAD_0) || code.bytes().contains(&ALOAD_0));
    assert!(!code.bytes().contains(&NEWARRAY));
}

#[test]
fn test_negative_zero_double_literal_keeps_sign() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    let expr = Expr::new(ExprKind::Literal(Literal::Double(-0.0)));
    let (code, _, desc) = lower(&mut f, &expr);

    assert_eq!(desc, "D");
    assert_eq!(code.bytes()[0], 0x14); // ldc2_w, not dconst_0
}

#[test]
fn test_else_branch_goto_survives_store_to_high_slot() {
    let mut f = fixture();
    f.ctx.push_method_scope(ThisBinding::None);
    // fill slots so the next store operand byte lands in the return range
    for i in 0..172 {
        f.ctx.declare_local(&format!("x{i}"), "I");
    }
    let stmt = Stmt::new(StmtKind::If {
        condition: Expr::int(1),
        then_branch: Box::new(Stmt::new(StmtKind::VarDecl {
            name: "t".to_string(),
            type_annotation: Some("I".to_string()),
            init: Some(Expr::int(5)),
        })),
        else_branch: Some(Box::new(Stmt::expr(Expr::int(2)))),
    });

    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new();
    {
        let mut lowerer = Lowerer::new(
            &mut f.ctx,
            &f.types,
            &f.classes,
            &mut f.interfaces,
            &f.artifacts,
            &mut pool,
            &mut code,
            "V",
        );
        lowerer.lower_stmt(&stmt).expect("lowering failed");
    }

    // the then branch ends with `istore 172`; its operand byte must not be
    // mistaken for a return, so the jump over the else branch stays
    let bytes = code.bytes();
    let p = pos(bytes, 0x36); // istore
    assert_eq!(bytes[p + 1], 172);
    assert!(bytes.contains(&0xa7)); // goto
}
