//! Immediately-invoked closure compilation.
//!
//! An IIFE synthesizes two classes per site: a single-abstract-method
//! interface describing the call shape, and an implementor whose fields hold
//! the captured environment. Capture analysis walks the closure body against
//! the enclosing scope before any code is emitted, so the implementor's
//! constructor signature is known up front. Nested closures chain: a variable
//! the inner body needs from two scopes out is a capture field of the outer
//! implementor, read through its `this`.

use rustc_hash::FxHashMap;

use tsjvm_classfile::{access, descriptor, ClassWriter, CodeBuilder, MethodBody};

use crate::ast::{Arg, ArrowBody, Callee, Expr, ExprKind, Param, Span, Stmt, StmtKind};
use crate::context::{Capture, CaptureSource, Resolution, ThisBinding};
use crate::error::{CompileError, CompileResult};
use crate::registry::SamEntry;

use super::{statics, Lowerer};

/// The pieces of an arrow or function literal, viewed uniformly.
struct ClosureShape<'e> {
    params: &'e [Param],
    body: BodyRef<'e>,
    return_type: Option<&'e str>,
    /// Arrows share the enclosing `this`; detached functions do not.
    is_arrow: bool,
}

#[derive(Clone, Copy)]
enum BodyRef<'e> {
    Expr(&'e Expr),
    Block(&'e [Stmt]),
}

fn shape<'e>(closure: &'e Expr) -> CompileResult<ClosureShape<'e>> {
    match &closure.kind {
        ExprKind::Arrow {
            params,
            body,
            return_type,
            is_async,
        } => {
            if *is_async {
                return Err(CompileError::UnsupportedFeature {
                    feature: "async closure".to_string(),
                    span: closure.span,
                });
            }
            let body = match body {
                ArrowBody::Expr(expr) => BodyRef::Expr(expr),
                ArrowBody::Block(stmts) => BodyRef::Block(stmts),
            };
            Ok(ClosureShape {
                params,
                body,
                return_type: return_type.as_deref(),
                is_arrow: true,
            })
        }
        ExprKind::Function {
            params,
            body,
            return_type,
            is_async,
            is_generator,
        } => {
            if *is_async {
                return Err(CompileError::UnsupportedFeature {
                    feature: "async closure".to_string(),
                    span: closure.span,
                });
            }
            if *is_generator {
                return Err(CompileError::UnsupportedFeature {
                    feature: "generator function".to_string(),
                    span: closure.span,
                });
            }
            Ok(ClosureShape {
                params,
                body: BodyRef::Block(body),
                return_type: return_type.as_deref(),
                is_arrow: false,
            })
        }
        _ => Err(CompileError::UnsupportedFeature {
            feature: "call of a non-function expression".to_string(),
            span: closure.span,
        }),
    }
}

fn param_descriptors(params: &[Param]) -> CompileResult<Vec<String>> {
    params
        .iter()
        .map(|p| {
            if p.rest {
                return Err(CompileError::UnsupportedFeature {
                    feature: "rest parameter in closure".to_string(),
                    span: p.span,
                });
            }
            Ok(p.type_annotation
                .clone()
                .unwrap_or_else(|| descriptor::OBJECT.to_string()))
        })
        .collect()
}

/// Tracks names bound inside the closure body during capture analysis, so
/// only genuinely free variables reach the enclosing scope.
struct CaptureWalk {
    bound: Vec<FxHashMap<String, ()>>,
    free: Vec<String>,
    uses_this: bool,
}

impl CaptureWalk {
    fn new(params: &[Param]) -> Self {
        let mut scope = FxHashMap::default();
        for p in params {
            scope.insert(p.name.clone(), ());
        }
        Self {
            bound: vec![scope],
            free: Vec::new(),
            uses_this: false,
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|scope| scope.contains_key(name))
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.bound.last_mut() {
            scope.insert(name.to_string(), ());
        }
    }

    fn note_free(&mut self, name: &str) {
        if !self.free.iter().any(|n| n == name) {
            self.free.push(name.to_string());
        }
    }
}

impl Lowerer<'_> {
    /// Lowers an immediately-invoked closure: synthesizes the interface and
    /// implementor, registers both artifacts, and emits construction plus the
    /// interface dispatch at the call site.
    pub(crate) fn lower_iife(
        &mut self,
        closure: &Expr,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        let shape = shape(closure)?;
        let param_descs = param_descriptors(shape.params)?;
        let return_desc = self.closure_return_desc(&shape, &param_descs)?;
        let sam_desc =
            descriptor::method_descriptor(param_descs.iter().map(String::as_str), &return_desc);

        let captures = self.analyze_captures(&shape, closure.span)?;
        let (iface_name, impl_name) = self.synthetic_names();

        self.emit_interface(&iface_name, &sam_desc)?;
        self.emit_implementor(&impl_name, &iface_name, &shape, &param_descs, &return_desc, &captures)?;

        // call site: construct, feed captures, invoke through the interface
        let impl_class = self.pool.add_class(&impl_name);
        self.code.new_instance(impl_class);
        self.code.dup();
        for capture in &captures {
            match &capture.source {
                CaptureSource::Slot(slot) => {
                    self.code.load_slot(*slot, &capture.descriptor);
                }
                CaptureSource::OuterField(field) => {
                    let owner = self.ctx.current_class().ok_or_else(|| {
                        CompileError::UnresolvedCapture {
                            name: capture.name.clone(),
                            span,
                        }
                    })?;
                    let field_ref =
                        self.pool
                            .add_field_ref(owner, field, &capture.descriptor);
                    self.code.aload(0);
                    self.code.getfield(field_ref, &capture.descriptor);
                }
            }
        }
        let ctor_desc = descriptor::method_descriptor(
            captures.iter().map(|c| c.descriptor.as_str()),
            "V",
        );
        let init = self.pool.add_method_ref(&impl_name, "<init>", &ctor_desc);
        self.code.invokespecial(init, &ctor_desc);

        self.eval_args_fixed(args, &param_descs, span)?;
        let call = self
            .pool
            .add_interface_method_ref(&iface_name, "call", &sam_desc);
        self.code.invokeinterface(call, &sam_desc);
        Ok(return_desc)
    }

    /// Return descriptor of an IIFE without synthesizing anything.
    pub(crate) fn infer_iife_return(&mut self, closure: &Expr) -> CompileResult<String> {
        let shape = shape(closure)?;
        let param_descs = param_descriptors(shape.params)?;
        self.closure_return_desc(&shape, &param_descs)
    }

    /// Explicit annotation wins; otherwise the body is inferred with the
    /// parameters in scope; a body that never returns a value is void.
    fn closure_return_desc(
        &mut self,
        shape: &ClosureShape,
        param_descs: &[String],
    ) -> CompileResult<String> {
        if let Some(annotation) = shape.return_type {
            return Ok(annotation.to_string());
        }
        self.ctx.push_inference_scope();
        for (param, desc) in shape.params.iter().zip(param_descs) {
            self.ctx.set_inferred(&param.name, desc);
        }
        let result = match shape.body {
            BodyRef::Expr(expr) => self.infer_expr_type(expr),
            BodyRef::Block(stmts) => self.infer_block_return(stmts),
        };
        self.ctx.pop_inference_scope();
        result
    }

    /// First value-carrying return decides; declarations along the way feed
    /// the inference scope.
    fn infer_block_return(&mut self, stmts: &[Stmt]) -> CompileResult<String> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Return(Some(expr)) => return self.infer_expr_type(expr),
                StmtKind::Return(None) => return Ok("V".to_string()),
                StmtKind::VarDecl {
                    name,
                    type_annotation,
                    init,
                } => {
                    let desc = match (type_annotation, init) {
                        (Some(annotation), _) => Some(annotation.clone()),
                        (None, Some(init)) => Some(self.infer_expr_type(init)?),
                        (None, None) => None,
                    };
                    if let Some(desc) = desc {
                        self.ctx.set_inferred(name, &desc);
                    }
                }
                StmtKind::Block(inner) => {
                    let ret = self.infer_block_return(inner)?;
                    if ret != "V" {
                        return Ok(ret);
                    }
                }
                StmtKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    let ret = self.infer_block_return(std::slice::from_ref(then_branch))?;
                    if ret != "V" {
                        return Ok(ret);
                    }
                    if let Some(else_branch) = else_branch {
                        let ret = self.infer_block_return(std::slice::from_ref(else_branch))?;
                        if ret != "V" {
                            return Ok(ret);
                        }
                    }
                }
                StmtKind::Expr(_) => {}
            }
        }
        Ok("V".to_string())
    }

    fn synthetic_names(&mut self) -> (String, String) {
        let n = self.ctx.next_artifact_index();
        match self.ctx.current_class() {
            Some(enclosing) => (format!("{enclosing}$Fn{n}"), format!("{enclosing}$FnImpl{n}")),
            None => (
                format!("tsjvm/synthetic/Fn{n}"),
                format!("tsjvm/synthetic/FnImpl{n}"),
            ),
        }
    }

    /// Walks the body for free variables and resolves each against the
    /// enclosing scope. For arrows, a used `this` becomes the zeroth capture.
    fn analyze_captures(
        &mut self,
        shape: &ClosureShape,
        span: Span,
    ) -> CompileResult<Vec<Capture>> {
        let mut walk = CaptureWalk::new(shape.params);
        match shape.body {
            BodyRef::Expr(expr) => self.walk_expr(expr, &mut walk, shape.is_arrow),
            BodyRef::Block(stmts) => self.walk_stmts(stmts, &mut walk, shape.is_arrow),
        }

        let mut captures = Vec::new();
        if walk.uses_this && shape.is_arrow {
            let (desc, source) = match self.ctx.this_binding() {
                ThisBinding::Receiver { class } => {
                    (format!("L{class};"), CaptureSource::Slot(0))
                }
                ThisBinding::CapturedField {
                    field_name,
                    descriptor,
                } => (descriptor.clone(), CaptureSource::OuterField(field_name.clone())),
                ThisBinding::Synthetic | ThisBinding::None => {
                    return Err(CompileError::TypeInference {
                        message: "closure uses `this` in a static context".to_string(),
                        span,
                    })
                }
            };
            captures.push(Capture {
                name: "this".to_string(),
                field_name: "cap$this".to_string(),
                descriptor: desc,
                source,
            });
        }
        for name in &walk.free {
            let (desc, source) = match self.ctx.resolve(name) {
                Resolution::Local(local) => {
                    (local.descriptor, CaptureSource::Slot(local.slot))
                }
                Resolution::Captured(outer) => {
                    (outer.descriptor, CaptureSource::OuterField(outer.field_name))
                }
                Resolution::Unresolved => {
                    return Err(CompileError::UnresolvedCapture {
                        name: name.clone(),
                        span,
                    })
                }
            };
            captures.push(Capture {
                name: name.clone(),
                field_name: format!("cap${name}"),
                descriptor: desc,
                source,
            });
        }
        Ok(captures)
    }

    fn walk_stmts(&self, stmts: &[Stmt], walk: &mut CaptureWalk, this_counts: bool) {
        for stmt in stmts {
            self.walk_stmt(stmt, walk, this_counts);
        }
    }

    fn walk_stmt(&self, stmt: &Stmt, walk: &mut CaptureWalk, this_counts: bool) {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.walk_expr(expr, walk, this_counts),
            StmtKind::VarDecl { name, init, .. } => {
                if let Some(init) = init {
                    self.walk_expr(init, walk, this_counts);
                }
                walk.bind(name);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.walk_expr(value, walk, this_counts);
                }
            }
            StmtKind::Block(stmts) => {
                walk.bound.push(FxHashMap::default());
                self.walk_stmts(stmts, walk, this_counts);
                walk.bound.pop();
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(condition, walk, this_counts);
                self.walk_stmt(then_branch, walk, this_counts);
                if let Some(else_branch) = else_branch {
                    self.walk_stmt(else_branch, walk, this_counts);
                }
            }
        }
    }

    fn walk_expr(&self, expr: &Expr, walk: &mut CaptureWalk, this_counts: bool) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Ident(name) => {
                if walk.is_bound(name) {
                    return;
                }
                // a name with no binding anywhere may still be a type alias
                // or platform-statics table ident used as a call receiver
                if matches!(self.ctx.resolve(name), Resolution::Unresolved)
                    && self.types.by_alias(name).is_some()
                {
                    return;
                }
                walk.note_free(name);
            }
            ExprKind::This => {
                if this_counts {
                    walk.uses_this = true;
                }
            }
            ExprKind::Member { object, property } => {
                if let ExprKind::Ident(name) = &object.kind {
                    if !walk.is_bound(name)
                        && matches!(self.ctx.resolve(name), Resolution::Unresolved)
                        && (self.types.by_alias(name).is_some()
                            || statics::is_platform_static(name, property))
                    {
                        return;
                    }
                }
                self.walk_expr(object, walk, this_counts);
            }
            ExprKind::Index { object, index } => {
                self.walk_expr(object, walk, this_counts);
                self.walk_expr(index, walk, this_counts);
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(operand, walk, this_counts),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs, walk, this_counts);
                self.walk_expr(rhs, walk, this_counts);
            }
            ExprKind::Call { callee, args } => {
                if let Callee::Expr(callee) = callee {
                    self.walk_expr(callee, walk, this_counts);
                }
                for arg in args {
                    self.walk_expr(&arg.expr, walk, this_counts);
                }
            }
            // nested closures chain their free variables through this one
            ExprKind::Arrow { params, body, .. } => {
                walk.bound.push(FxHashMap::default());
                for p in params {
                    walk.bind(&p.name);
                }
                match body {
                    ArrowBody::Expr(expr) => self.walk_expr(expr, walk, this_counts),
                    ArrowBody::Block(stmts) => self.walk_stmts(stmts, walk, this_counts),
                }
                walk.bound.pop();
            }
            // a detached function has its own `this`
            ExprKind::Function { params, body, .. } => {
                walk.bound.push(FxHashMap::default());
                for p in params {
                    walk.bind(&p.name);
                }
                self.walk_stmts(body, walk, false);
                walk.bound.pop();
            }
        }
    }

    fn emit_interface(&mut self, name: &str, sam_desc: &str) -> CompileResult<()> {
        let mut writer = ClassWriter::new_interface(name);
        writer.add_abstract_method("call", sam_desc);
        let bytes = writer.to_bytes()?;
        self.artifacts.insert(name, bytes);
        self.interfaces.register(
            name,
            SamEntry {
                method_name: "call".to_string(),
                descriptor: sam_desc.to_string(),
            },
        );
        Ok(())
    }

    fn emit_implementor(
        &mut self,
        impl_name: &str,
        iface_name: &str,
        shape: &ClosureShape,
        param_descs: &[String],
        return_desc: &str,
        captures: &[Capture],
    ) -> CompileResult<()> {
        let mut writer = ClassWriter::new(impl_name);
        writer.add_interface(iface_name);
        for capture in captures {
            writer.add_field(access::FIELD_CAPTURE, &capture.field_name, &capture.descriptor);
        }

        let ctor_desc = descriptor::method_descriptor(
            captures.iter().map(|c| c.descriptor.as_str()),
            "V",
        );
        let ctor = build_capture_ctor(writer.pool(), impl_name, captures);
        let ctor_locals = 1 + captures
            .iter()
            .map(|c| descriptor::slot_width(&c.descriptor))
            .sum::<u16>();
        writer.add_method(
            access::ACC_PUBLIC,
            "<init>",
            &ctor_desc,
            MethodBody {
                code: ctor,
                max_locals: ctor_locals,
            },
        );

        let sam_desc =
            descriptor::method_descriptor(param_descs.iter().map(String::as_str), return_desc);
        let this_binding = match captures.first() {
            Some(first) if first.name == "this" => ThisBinding::CapturedField {
                field_name: first.field_name.clone(),
                descriptor: first.descriptor.clone(),
            },
            _ => ThisBinding::Synthetic,
        };

        self.ctx.push_class(impl_name);
        self.ctx.push_method_scope(this_binding);
        for (param, desc) in shape.params.iter().zip(param_descs) {
            self.ctx.declare_local(&param.name, desc);
        }
        for capture in captures {
            self.ctx.record_capture(capture.clone());
        }

        let mut body_code = CodeBuilder::new();
        let body_result = {
            let mut inner = Lowerer {
                ctx: &mut *self.ctx,
                types: self.types,
                classes: self.classes,
                interfaces: &mut *self.interfaces,
                artifacts: self.artifacts,
                pool: writer.pool(),
                code: &mut body_code,
                return_desc: return_desc.to_string(),
            };
            inner.lower_closure_body(shape.body)
        };
        let max_locals = self.ctx.max_locals();
        self.ctx.pop_method_scope();
        self.ctx.pop_class();
        body_result?;

        writer.add_method(
            access::ACC_PUBLIC,
            "call",
            &sam_desc,
            MethodBody {
                code: body_code,
                max_locals,
            },
        );
        let bytes = writer.to_bytes()?;
        self.artifacts.insert(impl_name, bytes);
        Ok(())
    }

    fn lower_closure_body(&mut self, body: BodyRef) -> CompileResult<()> {
        let return_desc = self.return_desc.clone();
        match body {
            BodyRef::Expr(expr) => {
                let actual = self.lower_expr(expr)?;
                if descriptor::is_void(&return_desc) {
                    self.discard(&actual);
                    self.code.return_void();
                } else {
                    self.convert(&actual, &return_desc, expr.span)?;
                    self.code.return_value(&return_desc);
                }
                Ok(())
            }
            BodyRef::Block(stmts) => {
                self.lower_block(stmts)?;
                if !self.code.ends_with_return() {
                    if descriptor::is_void(&return_desc) {
                        self.code.return_void();
                    } else {
                        let span = stmts.last().map(|s| s.span).unwrap_or_default();
                        return Err(CompileError::TypeInference {
                            message: format!(
                                "closure body can finish without returning {}",
                                descriptor::display_name(&return_desc)
                            ),
                            span,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// `<init>` of a closure implementor: chain to Object, then store each
/// constructor parameter into its capture field.
fn build_capture_ctor(
    pool: &mut tsjvm_classfile::ConstantPool,
    impl_name: &str,
    captures: &[Capture],
) -> CodeBuilder {
    let mut code = CodeBuilder::new();
    let object_init = pool.add_method_ref(descriptor::OBJECT_INTERNAL, "<init>", "()V");
    code.aload(0);
    code.invokespecial(object_init, "()V");
    let mut slot = 1u16;
    for capture in captures {
        let field = pool.add_field_ref(impl_name, &capture.field_name, &capture.descriptor);
        code.aload(0);
        code.load_slot(slot, &capture.descriptor);
        code.putfield(field, &capture.descriptor);
        slot += descriptor::slot_width(&capture.descriptor);
    }
    code.return_void();
    code
}
