//! Call-site dispatch.
//!
//! Exactly one lowering strategy is selected per call expression, in a fixed
//! precedence order: constructor chaining first, then functional-interface
//! variables and immediately-invoked closures, then receiver-typed member
//! calls, then registered statics, and the platform-statics table last. The
//! classification is a closed enum so the dispatch match is exhaustive.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Callee, Expr, ExprKind, Span};
use crate::context::Resolution;
use crate::error::{CompileError, CompileResult};

use super::{array, list, statics, string, Lowerer};

/// The receiver category a call expression resolved to.
enum CallKind<'e> {
    SuperCtor,
    ThisCtor,
    SuperMethod { name: &'e str },
    FunctionalVar { name: &'e str, interface: String },
    Iife { closure: &'e Expr },
    Array { object: &'e Expr, member: &'e str },
    List { object: &'e Expr, member: &'e str },
    Text { object: &'e Expr, member: &'e str },
    ExternalStatic { alias: &'e str, member: &'e str },
    UserInstance { object: &'e Expr, member: &'e str },
    PlatformStatic { ident: &'e str, member: &'e str },
}

impl Lowerer<'_> {
    pub(crate) fn lower_call(
        &mut self,
        callee: &Callee,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        if let Some(arg) = args.iter().find(|a| a.spread) {
            return Err(CompileError::UnsupportedFeature {
                feature: "spread argument".to_string(),
                span: arg.expr.span,
            });
        }
        match self.classify(callee, span)? {
            CallKind::SuperCtor => self.lower_super_ctor(args, span),
            CallKind::ThisCtor => self.lower_this_ctor(args, span),
            CallKind::SuperMethod { name } => self.lower_super_method(name, args, span),
            CallKind::FunctionalVar { name, interface } => {
                self.lower_functional_var(name, &interface, args, span)
            }
            CallKind::Iife { closure } => self.lower_iife(closure, args, span),
            CallKind::Array { object, member } => {
                let recv = self.lower_expr(object)?;
                array::lower(self, &recv, member, args, span)
            }
            CallKind::List { object, member } => {
                self.lower_expr(object)?;
                list::lower(self, member, args, span)
            }
            CallKind::Text { object, member } => {
                self.lower_expr(object)?;
                string::lower(self, member, args, span)
            }
            CallKind::ExternalStatic { alias, member } => {
                self.lower_external_static(alias, member, args, span)
            }
            CallKind::UserInstance { object, member } => {
                let recv = self.lower_expr(object)?;
                self.lower_instance_call(&recv, member, args, span)
            }
            CallKind::PlatformStatic { ident, member } => {
                statics::lower(self, ident, member, args, span)
            }
        }
    }

    /// Result type of a call without emitting it.
    pub(crate) fn infer_call_type(
        &mut self,
        callee: &Callee,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        match self.classify(callee, span)? {
            CallKind::SuperCtor | CallKind::ThisCtor => Ok("V".to_string()),
            CallKind::SuperMethod { name } => {
                let (_, _, desc) = self.resolve_super_method(name, span)?;
                let (_, ret) = descriptor::parse_method_descriptor(&desc)
                    .map_err(|_| CompileError::TypeInference {
                        message: format!("malformed descriptor {desc}"),
                        span,
                    })?;
                Ok(ret)
            }
            CallKind::FunctionalVar { interface, .. } => {
                let entry = self.interfaces.get(&interface).ok_or_else(|| {
                    CompileError::UnresolvedMethod {
                        name: "call".to_string(),
                        class: interface.clone(),
                        span,
                    }
                })?;
                let (_, ret) = descriptor::parse_method_descriptor(&entry.descriptor)
                    .map_err(|_| CompileError::TypeInference {
                        message: format!("malformed interface descriptor {}", entry.descriptor),
                        span,
                    })?;
                Ok(ret)
            }
            CallKind::Iife { closure } => self.infer_iife_return(closure),
            CallKind::Array { object, member } => {
                let recv = self.infer_expr_type(object)?;
                array::result_type(&recv, member).ok_or_else(|| CompileError::UnsupportedCall {
                    member: member.to_string(),
                    receiver: descriptor::display_name(&recv),
                    span,
                })
            }
            CallKind::List { member, .. } => {
                list::result_type(member).ok_or_else(|| CompileError::UnsupportedCall {
                    member: member.to_string(),
                    receiver: descriptor::display_name(descriptor::ARRAY_LIST),
                    span,
                })
            }
            CallKind::Text { member, .. } => {
                string::result_type(member).ok_or_else(|| CompileError::UnsupportedCall {
                    member: member.to_string(),
                    receiver: "String".to_string(),
                    span,
                })
            }
            CallKind::ExternalStatic { alias, member } => {
                let arg_descs = self.infer_arg_types(args)?;
                let (_, entry) = self.resolve_external_static(alias, member, &arg_descs, span)?;
                let (_, ret) = descriptor::parse_method_descriptor(&entry.descriptor)
                    .map_err(|_| CompileError::TypeInference {
                        message: format!("malformed descriptor {}", entry.descriptor),
                        span,
                    })?;
                Ok(ret)
            }
            CallKind::UserInstance { object, member } => {
                let recv = self.infer_expr_type(object)?;
                let arg_descs = self.infer_arg_types(args)?;
                self.resolve_instance_return(&recv, member, &arg_descs, span)
            }
            CallKind::PlatformStatic { ident, member } => {
                statics::result_type(self, ident, member, args, span)
            }
        }
    }

    pub(crate) fn infer_arg_types(&mut self, args: &[Arg]) -> CompileResult<Vec<String>> {
        args.iter()
            .map(|arg| self.infer_expr_type(&arg.expr))
            .collect()
    }

    fn classify<'e>(&mut self, callee: &'e Callee, span: Span) -> CompileResult<CallKind<'e>> {
        let expr = match callee {
            Callee::Super => return Ok(CallKind::SuperCtor),
            Callee::SuperMember { name } => return Ok(CallKind::SuperMethod { name }),
            Callee::Expr(expr) => expr,
        };
        match &expr.kind {
            ExprKind::This => Ok(CallKind::ThisCtor),
            ExprKind::Arrow { .. } | ExprKind::Function { .. } => {
                Ok(CallKind::Iife { closure: expr })
            }
            ExprKind::Ident(name) => {
                if let Some(desc) = self.ctx.inferred_type(name) {
                    if let Some(internal) = descriptor::internal_name(&desc) {
                        if self.interfaces.get(internal).is_some() {
                            return Ok(CallKind::FunctionalVar {
                                name,
                                interface: internal.to_string(),
                            });
                        }
                    }
                }
                Err(CompileError::UnsupportedCall {
                    member: name.clone(),
                    receiver: "<callee>".to_string(),
                    span,
                })
            }
            ExprKind::Member { object, property } => {
                // an identifier with no value binding can still name a
                // registered type alias or a platform-statics table entry
                if let ExprKind::Ident(name) = &object.kind {
                    if matches!(self.ctx.resolve(name), Resolution::Unresolved)
                        && self.ctx.inferred_type(name).is_none()
                    {
                        if let Some(ty) = self.types.by_alias(name) {
                            if ty.methods.iter().any(|m| m.name == *property && m.is_static) {
                                return Ok(CallKind::ExternalStatic {
                                    alias: name,
                                    member: property,
                                });
                            }
                        }
                        if statics::is_platform_static(name, property) {
                            return Ok(CallKind::PlatformStatic {
                                ident: name,
                                member: property,
                            });
                        }
                        return Err(CompileError::UnsupportedCall {
                            member: property.clone(),
                            receiver: name.clone(),
                            span,
                        });
                    }
                }
                let recv = self.infer_expr_type(object)?;
                if descriptor::is_array(&recv) {
                    return Ok(CallKind::Array { object, member: property });
                }
                if recv == descriptor::ARRAY_LIST {
                    return Ok(CallKind::List { object, member: property });
                }
                if recv == descriptor::STRING {
                    return Ok(CallKind::Text { object, member: property });
                }
                if let Some(internal) = descriptor::internal_name(&recv) {
                    let known = self.classes.get(internal).is_some()
                        || self.types.by_internal_name(internal).is_some();
                    if known {
                        return Ok(CallKind::UserInstance { object, member: property });
                    }
                }
                Err(CompileError::UnsupportedCall {
                    member: property.clone(),
                    receiver: descriptor::display_name(&recv),
                    span,
                })
            }
            _ => Err(CompileError::UnsupportedCall {
                member: "()".to_string(),
                receiver: "<expression>".to_string(),
                span,
            }),
        }
    }

    /// Invokes a functional-interface value bound to a variable.
    fn lower_functional_var(
        &mut self,
        name: &str,
        interface: &str,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        let entry = self
            .interfaces
            .get(interface)
            .ok_or_else(|| CompileError::UnresolvedMethod {
                name: name.to_string(),
                class: interface.to_string(),
                span,
            })?
            .clone();
        let (params, ret) = descriptor::parse_method_descriptor(&entry.descriptor)
            .map_err(|_| CompileError::TypeInference {
                message: format!("malformed interface descriptor {}", entry.descriptor),
                span,
            })?;
        // load the interface value itself
        let ident = Expr::ident(name);
        self.lower_expr(&Expr { span, ..ident })?;
        self.eval_args_fixed(args, &params, span)?;
        let method = self
            .pool
            .add_interface_method_ref(interface, &entry.method_name, &entry.descriptor);
        self.code.invokeinterface(method, &entry.descriptor);
        Ok(ret)
    }
}
