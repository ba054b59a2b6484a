//! Call-expression lowering.
//!
//! `Lowerer` drives one method body: it borrows the compilation context, the
//! registries, and the class-under-construction's pool and code builder, and
//! walks the typed AST emitting instructions. The call-site dispatcher in
//! `call` classifies each call expression and hands it to the matching
//! receiver-specific generator.

mod array;
mod call;
mod closure;
mod ctor;
mod expr;
mod list;
mod object;
mod statics;
mod string;

use tsjvm_classfile::{descriptor, CodeBuilder, ConstantPool};

use crate::ast::{Span, Stmt, StmtKind};
use crate::context::CompilationContext;
use crate::convert::convert_type;
use crate::error::{CompileError, CompileResult};
use crate::registry::{
    ArtifactMap, FunctionalInterfaceRegistry, JavaTypeRegistry, UserClassRegistry,
};

/// Lowers one method body into a code builder.
pub struct Lowerer<'a> {
    pub(crate) ctx: &'a mut CompilationContext,
    pub(crate) types: &'a JavaTypeRegistry,
    pub(crate) classes: &'a UserClassRegistry,
    pub(crate) interfaces: &'a mut FunctionalInterfaceRegistry,
    pub(crate) artifacts: &'a ArtifactMap,
    pub(crate) pool: &'a mut ConstantPool,
    pub(crate) code: &'a mut CodeBuilder,
    /// Declared return descriptor of the method being lowered.
    pub(crate) return_desc: String,
}

impl<'a> Lowerer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &'a mut CompilationContext,
        types: &'a JavaTypeRegistry,
        classes: &'a UserClassRegistry,
        interfaces: &'a mut FunctionalInterfaceRegistry,
        artifacts: &'a ArtifactMap,
        pool: &'a mut ConstantPool,
        code: &'a mut CodeBuilder,
        return_desc: &str,
    ) -> Self {
        Self {
            ctx,
            types,
            classes,
            interfaces,
            artifacts,
            pool,
            code,
            return_desc: return_desc.to_string(),
        }
    }

    /// Conversion shorthand over this lowerer's code and pool.
    pub(crate) fn convert(&mut self, from: &str, to: &str, span: Span) -> CompileResult<()> {
        convert_type(self.code, self.pool, from, to, span)
    }

    /// Discards the value a completed expression left on the stack.
    pub(crate) fn discard(&mut self, desc: &str) {
        if descriptor::is_void(desc) {
            return;
        }
        if descriptor::is_wide(desc) {
            self.code.pop2();
        } else {
            self.code.pop();
        }
    }

    /// Pushes the zero value of a type: numeric zero, empty array, or null.
    pub(crate) fn emit_zero_value(&mut self, desc: &str) -> CompileResult<()> {
        match desc {
            "Z" | "B" | "C" | "S" | "I" => {
                self.code.iconst(0);
            }
            "J" => {
                self.code.lconst(0);
            }
            "F" => {
                self.code.fconst(0.0);
            }
            "D" => {
                self.code.dconst(0.0);
            }
            _ if descriptor::is_array(desc) => {
                let element = descriptor::element_type(desc).unwrap_or(descriptor::OBJECT);
                self.code.iconst(0);
                self.emit_new_array(element);
            }
            _ => {
                self.code.aconst_null();
            }
        }
        Ok(())
    }

    /// Allocates an array of `element` type; the length is on the stack.
    pub(crate) fn emit_new_array(&mut self, element: &str) {
        match CodeBuilder::newarray_type_code(element) {
            Some(atype) => {
                self.code.newarray(atype);
            }
            None => {
                let name = descriptor::internal_name(element).unwrap_or(element);
                let class = self.pool.add_class(name);
                self.code.anewarray(class);
            }
        }
    }

    pub fn lower_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let desc = self.lower_expr(expr)?;
                self.discard(&desc);
                Ok(())
            }
            StmtKind::VarDecl {
                name,
                type_annotation,
                init,
            } => {
                let desc = match (type_annotation, init) {
                    (Some(annotation), _) => annotation.clone(),
                    (None, Some(init)) => self.infer_expr_type(init)?,
                    (None, None) => {
                        return Err(CompileError::TypeInference {
                            message: format!("declaration of {name} has no type or initializer"),
                            span: stmt.span,
                        })
                    }
                };
                match init {
                    Some(init) => {
                        let actual = self.lower_expr(init)?;
                        self.convert(&actual, &desc, init.span)?;
                    }
                    None => self.emit_zero_value(&desc)?,
                }
                let slot = self.ctx.declare_local(name, &desc);
                self.code.store_slot(slot, &desc);
                Ok(())
            }
            StmtKind::Return(value) => {
                let return_desc = self.return_desc.clone();
                match value {
                    Some(expr) => {
                        let actual = self.lower_expr(expr)?;
                        if descriptor::is_void(&return_desc) {
                            self.discard(&actual);
                            self.code.return_void();
                        } else {
                            self.convert(&actual, &return_desc, expr.span)?;
                            self.code.return_value(&return_desc);
                        }
                    }
                    None => {
                        if !descriptor::is_void(&return_desc) {
                            return Err(CompileError::TypeInference {
                                message: format!(
                                    "empty return in a method returning {}",
                                    descriptor::display_name(&return_desc)
                                ),
                                span: stmt.span,
                            });
                        }
                        self.code.return_void();
                    }
                }
                Ok(())
            }
            StmtKind::Block(stmts) => {
                for stmt in stmts {
                    self.lower_stmt(stmt)?;
                }
                Ok(())
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_expr(condition)?;
                if !matches!(cond.as_str(), "Z" | "I") {
                    return Err(CompileError::TypeInference {
                        message: format!(
                            "condition has type {}, expected boolean",
                            descriptor::display_name(&cond)
                        ),
                        span: condition.span,
                    });
                }
                let to_else = self.code.ifeq_forward();
                self.lower_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        if self.code.ends_with_return() {
                            self.code.patch_branch(to_else);
                            self.lower_stmt(else_branch)?;
                        } else {
                            let to_end = self.code.goto_forward();
                            self.code.patch_branch(to_else);
                            self.lower_stmt(else_branch)?;
                            self.code.patch_branch(to_end);
                        }
                    }
                    None => self.code.patch_branch(to_else),
                }
                Ok(())
            }
        }
    }

    pub fn lower_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }
}
