//! General expression lowering.
//!
//! The walker the call generators delegate to for receivers and arguments.
//! Every lowering function returns the descriptor of the value left on the
//! stack (`V` when nothing is left). Evaluation is strictly left-to-right in
//! source order.

use tsjvm_classfile::descriptor;

use crate::ast::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::context::{Resolution, ThisBinding};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

impl Lowerer<'_> {
    pub fn lower_expr(&mut self, expr: &Expr) -> CompileResult<String> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.lower_literal(literal)),
            ExprKind::Ident(name) => self.lower_ident(name, expr),
            ExprKind::This => self.lower_this(expr),
            ExprKind::Member { object, property } => self.lower_member(object, property, expr),
            ExprKind::Index { object, index } => self.lower_index(object, index),
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, expr),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.span),
            ExprKind::Arrow { .. } | ExprKind::Function { .. } => {
                Err(CompileError::UnsupportedFeature {
                    feature: "function literal outside an immediate invocation".to_string(),
                    span: expr.span,
                })
            }
        }
    }

    fn lower_literal(&mut self, literal: &Literal) -> String {
        match literal {
            Literal::Int(value) => {
                if (-32768..=32767).contains(value) {
                    self.code.iconst(*value);
                } else {
                    let index = self.pool.add_integer(*value);
                    self.code.ldc(index);
                }
                "I".to_string()
            }
            Literal::Long(value) => {
                if matches!(*value, 0 | 1) {
                    self.code.lconst(*value);
                } else {
                    let index = self.pool.add_long(*value);
                    self.code.ldc2_w(index);
                }
                "J".to_string()
            }
            Literal::Double(value) => {
                // bit comparison: -0.0 would pass == and lose its sign
                if value.to_bits() == 0.0f64.to_bits() || value.to_bits() == 1.0f64.to_bits() {
                    self.code.dconst(*value);
                } else {
                    let index = self.pool.add_double(*value);
                    self.code.ldc2_w(index);
                }
                "D".to_string()
            }
            Literal::Bool(value) => {
                self.code.iconst(*value as i32);
                "Z".to_string()
            }
            Literal::Str(value) => {
                let index = self.pool.add_string(value);
                self.code.ldc(index);
                descriptor::STRING.to_string()
            }
            Literal::Null => {
                self.code.aconst_null();
                descriptor::OBJECT.to_string()
            }
        }
    }

    fn lower_ident(&mut self, name: &str, expr: &Expr) -> CompileResult<String> {
        match self.ctx.resolve(name) {
            Resolution::Local(local) => {
                self.code.load_slot(local.slot, &local.descriptor);
                Ok(local.descriptor)
            }
            Resolution::Captured(capture) => {
                self.emit_capture_read(&capture.field_name, &capture.descriptor, expr)?;
                Ok(capture.descriptor)
            }
            Resolution::Unresolved => Err(CompileError::UnresolvedCapture {
                name: name.to_string(),
                span: expr.span,
            }),
        }
    }

    /// Reads a capture field through the implementor's own receiver.
    fn emit_capture_read(
        &mut self,
        field_name: &str,
        field_desc: &str,
        expr: &Expr,
    ) -> CompileResult<()> {
        let owner = self
            .ctx
            .current_class()
            .ok_or_else(|| CompileError::UnresolvedCapture {
                name: field_name.to_string(),
                span: expr.span,
            })?
            .to_string();
        self.code.aload(0);
        let field = self.pool.add_field_ref(&owner, field_name, field_desc);
        self.code.getfield(field, field_desc);
        Ok(())
    }

    fn lower_this(&mut self, expr: &Expr) -> CompileResult<String> {
        match self.ctx.this_binding().clone() {
            ThisBinding::Receiver { class } => {
                self.code.aload(0);
                Ok(descriptor::descriptor_from_internal(&class))
            }
            ThisBinding::CapturedField {
                field_name,
                descriptor: desc,
            } => {
                self.emit_capture_read(&field_name, &desc, expr)?;
                Ok(desc)
            }
            ThisBinding::Synthetic | ThisBinding::None => Err(CompileError::TypeInference {
                message: "this is not available in this context".to_string(),
                span: expr.span,
            }),
        }
    }

    fn lower_member(&mut self, object: &Expr, property: &str, expr: &Expr) -> CompileResult<String> {
        let recv = self.infer_expr_type(object)?;
        if descriptor::is_array(&recv) && property == "length" {
            self.lower_expr(object)?;
            self.code.arraylength();
            return Ok("I".to_string());
        }
        if recv == descriptor::STRING && property == "length" {
            self.lower_expr(object)?;
            let method = self.pool.add_method_ref("java/lang/String", "length", "()I");
            self.code.invokevirtual(method, "()I");
            return Ok("I".to_string());
        }
        if let Some(name) = descriptor::internal_name(&recv) {
            if let Some(class) = self.classes.get(name) {
                if let Some(field_desc) = class.fields.get(property).cloned() {
                    let owner = name.to_string();
                    self.lower_expr(object)?;
                    let field = self.pool.add_field_ref(&owner, property, &field_desc);
                    self.code.getfield(field, &field_desc);
                    return Ok(field_desc);
                }
            }
        }
        Err(CompileError::UnsupportedCall {
            member: property.to_string(),
            receiver: descriptor::display_name(&recv),
            span: expr.span,
        })
    }

    fn lower_index(&mut self, object: &Expr, index: &Expr) -> CompileResult<String> {
        let recv = self.lower_expr(object)?;
        let element = descriptor::element_type(&recv)
            .map(str::to_string)
            .ok_or_else(|| CompileError::TypeInference {
                message: format!(
                    "cannot index a value of type {}",
                    descriptor::display_name(&recv)
                ),
                span: object.span,
            })?;
        let idx = self.lower_expr(index)?;
        self.convert(&idx, "I", index.span)?;
        self.code.array_load(&element);
        Ok(element)
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> CompileResult<String> {
        let desc = self.lower_expr(operand)?;
        match op {
            UnaryOp::Neg => {
                match desc.as_str() {
                    "I" | "B" | "S" | "C" => {
                        self.code.ineg();
                    }
                    "J" => {
                        self.code.lneg();
                    }
                    "F" => {
                        self.code.fneg();
                    }
                    "D" => {
                        self.code.dneg();
                    }
                    _ => {
                        return Err(CompileError::TypeInference {
                            message: format!(
                                "cannot negate a value of type {}",
                                descriptor::display_name(&desc)
                            ),
                            span: operand.span,
                        })
                    }
                }
                Ok(desc)
            }
            UnaryOp::Not => {
                self.convert(&desc, "Z", operand.span)?;
                self.code.iconst(1);
                self.code.ixor();
                Ok("Z".to_string())
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        expr: &Expr,
    ) -> CompileResult<String> {
        let lhs_ty = self.infer_expr_type(lhs)?;
        let rhs_ty = self.infer_expr_type(rhs)?;

        // string concatenation wins over numeric addition
        if op == BinaryOp::Add
            && (lhs_ty == descriptor::STRING || rhs_ty == descriptor::STRING)
        {
            let actual = self.lower_expr(lhs)?;
            self.emit_stringify(&actual);
            let actual = self.lower_expr(rhs)?;
            self.emit_stringify(&actual);
            let desc = "(Ljava/lang/String;)Ljava/lang/String;";
            let method = self.pool.add_method_ref("java/lang/String", "concat", desc);
            self.code.invokevirtual(method, desc);
            return Ok(descriptor::STRING.to_string());
        }

        let result = numeric_promotion(&lhs_ty, &rhs_ty).ok_or_else(|| {
            CompileError::TypeInference {
                message: format!(
                    "no arithmetic on {} and {}",
                    descriptor::display_name(&lhs_ty),
                    descriptor::display_name(&rhs_ty)
                ),
                span: expr.span,
            }
        })?;
        let actual = self.lower_expr(lhs)?;
        self.convert(&actual, &result, lhs.span)?;
        let actual = self.lower_expr(rhs)?;
        self.convert(&actual, &result, rhs.span)?;
        match (op, result.as_str()) {
            (BinaryOp::Add, "I") => self.code.iadd(),
            (BinaryOp::Add, "J") => self.code.ladd(),
            (BinaryOp::Add, "F") => self.code.fadd(),
            (BinaryOp::Add, "D") => self.code.dadd(),
            (BinaryOp::Sub, "I") => self.code.isub(),
            (BinaryOp::Sub, "J") => self.code.lsub(),
            (BinaryOp::Sub, "F") => self.code.fsub(),
            (BinaryOp::Sub, "D") => self.code.dsub(),
            (BinaryOp::Mul, "I") => self.code.imul(),
            (BinaryOp::Mul, "J") => self.code.lmul(),
            (BinaryOp::Mul, "F") => self.code.fmul(),
            (BinaryOp::Mul, "D") => self.code.dmul(),
            (BinaryOp::Div, "I") => self.code.idiv(),
            (BinaryOp::Div, "J") => self.code.ldiv(),
            (BinaryOp::Div, "F") => self.code.fdiv(),
            (BinaryOp::Div, "D") => self.code.ddiv(),
            (BinaryOp::Rem, "I") => self.code.irem(),
            (BinaryOp::Rem, "J") => self.code.lrem(),
            (BinaryOp::Rem, "F") => self.code.frem(),
            (BinaryOp::Rem, "D") => self.code.drem(),
            _ => {
                return Err(CompileError::TypeInference {
                    message: format!("no arithmetic on {}", descriptor::display_name(&result)),
                    span: expr.span,
                })
            }
        };
        Ok(result)
    }

    /// Converts the stack top into a String via `String.valueOf`.
    fn emit_stringify(&mut self, desc: &str) {
        if desc == descriptor::STRING {
            return;
        }
        let param = match desc {
            "Z" | "C" | "I" | "J" | "F" | "D" => desc.to_string(),
            "B" | "S" => "I".to_string(),
            _ => descriptor::OBJECT.to_string(),
        };
        let sig = format!("({param})Ljava/lang/String;");
        let method = self.pool.add_method_ref("java/lang/String", "valueOf", &sig);
        self.code.invokestatic(method, &sig);
    }

    // ---- inference ----

    /// The descriptor an expression would produce, without emitting code.
    pub fn infer_expr_type(&mut self, expr: &Expr) -> CompileResult<String> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Int(_) => "I".to_string(),
                Literal::Long(_) => "J".to_string(),
                Literal::Double(_) => "D".to_string(),
                Literal::Bool(_) => "Z".to_string(),
                Literal::Str(_) => descriptor::STRING.to_string(),
                Literal::Null => descriptor::OBJECT.to_string(),
            }),
            ExprKind::Ident(name) => {
                self.ctx
                    .inferred_type(name)
                    .ok_or_else(|| CompileError::UnresolvedCapture {
                        name: name.clone(),
                        span: expr.span,
                    })
            }
            ExprKind::This => match self.ctx.this_binding() {
                ThisBinding::Receiver { class } => Ok(descriptor::descriptor_from_internal(class)),
                ThisBinding::CapturedField { descriptor: desc, .. } => Ok(desc.clone()),
                ThisBinding::Synthetic | ThisBinding::None => Err(CompileError::TypeInference {
                    message: "this is not available in this context".to_string(),
                    span: expr.span,
                }),
            },
            ExprKind::Member { object, property } => {
                let recv = self.infer_expr_type(object)?;
                if property == "length"
                    && (descriptor::is_array(&recv) || recv == descriptor::STRING)
                {
                    return Ok("I".to_string());
                }
                descriptor::internal_name(&recv)
                    .and_then(|name| self.classes.get(name))
                    .and_then(|class| class.fields.get(property).cloned())
                    .ok_or_else(|| CompileError::UnsupportedCall {
                        member: property.clone(),
                        receiver: descriptor::display_name(&recv),
                        span: expr.span,
                    })
            }
            ExprKind::Index { object, .. } => {
                let recv = self.infer_expr_type(object)?;
                descriptor::element_type(&recv)
                    .map(str::to_string)
                    .ok_or_else(|| CompileError::TypeInference {
                        message: format!(
                            "cannot index a value of type {}",
                            descriptor::display_name(&recv)
                        ),
                        span: expr.span,
                    })
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => Ok("Z".to_string()),
                UnaryOp::Neg => self.infer_expr_type(operand),
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.infer_expr_type(lhs)?;
                let rhs_ty = self.infer_expr_type(rhs)?;
                if *op == BinaryOp::Add
                    && (lhs_ty == descriptor::STRING || rhs_ty == descriptor::STRING)
                {
                    return Ok(descriptor::STRING.to_string());
                }
                numeric_promotion(&lhs_ty, &rhs_ty).ok_or_else(|| CompileError::TypeInference {
                    message: format!(
                        "no arithmetic on {} and {}",
                        descriptor::display_name(&lhs_ty),
                        descriptor::display_name(&rhs_ty)
                    ),
                    span: expr.span,
                })
            }
            ExprKind::Call { callee, args } => self.infer_call_type(callee, args, expr.span),
            ExprKind::Arrow { .. } | ExprKind::Function { .. } => {
                Err(CompileError::UnsupportedFeature {
                    feature: "function literal outside an immediate invocation".to_string(),
                    span: expr.span,
                })
            }
        }
    }
}

/// Binary numeric promotion: the wider of the two operand types.
fn numeric_promotion(lhs: &str, rhs: &str) -> Option<String> {
    fn rank(desc: &str) -> Option<u8> {
        match desc {
            "B" | "S" | "C" | "I" | "Z" => Some(0),
            "J" => Some(1),
            "F" => Some(2),
            "D" => Some(3),
            _ => None,
        }
    }
    let result = match rank(lhs)?.max(rank(rhs)?) {
        0 => "I",
        1 => "J",
        2 => "F",
        _ => "D",
    };
    Some(result.to_string())
}
