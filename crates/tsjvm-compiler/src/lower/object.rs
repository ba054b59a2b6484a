//! Registered-type method calls.
//!
//! External static methods and instance methods on registered types, with
//! overload selection, varargs packing, defaulting of missing optional
//! trailing arguments, and the method-chaining downcast for fluent APIs.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};
use crate::registry::{JavaType, MethodEntry};

use super::Lowerer;

impl Lowerer<'_> {
    /// Evaluates arguments left-to-right against a fixed parameter list,
    /// converting each at its boundary and defaulting missing trailing
    /// parameters to their zero values.
    pub(crate) fn eval_args_fixed(
        &mut self,
        args: &[Arg],
        params: &[String],
        span: Span,
    ) -> CompileResult<()> {
        if args.len() > params.len() {
            return Err(CompileError::ArityOrShape {
                operation: "call".to_string(),
                message: format!("expected at most {} arguments, got {}", params.len(), args.len()),
                span,
            });
        }
        for (arg, param) in args.iter().zip(params) {
            let actual = self.lower_expr(&arg.expr)?;
            self.convert(&actual, param, arg.expr.span)?;
        }
        for param in &params[args.len()..] {
            self.emit_zero_value(param)?;
        }
        Ok(())
    }

    /// Evaluates arguments for a rest-parameter callee. Fixed parameters are
    /// converted one-to-one; overflow arguments are packed into a fresh array
    /// of the rest's component type, sized to the overflow count. Passing the
    /// rest array itself (exact count, matching type) skips the packing.
    pub(crate) fn eval_args_varargs(
        &mut self,
        args: &[Arg],
        params: &[String],
        span: Span,
    ) -> CompileResult<()> {
        let fixed = params.len().saturating_sub(1);
        if args.len() < fixed {
            return Err(CompileError::ArityOrShape {
                operation: "call".to_string(),
                message: format!("expected at least {fixed} arguments, got {}", args.len()),
                span,
            });
        }
        let rest = &params[fixed];

        // direct pass-through when the final argument already is the array
        if args.len() == params.len() {
            let last = self.infer_expr_type(&args[fixed].expr)?;
            if last == *rest {
                return self.eval_args_fixed(args, params, span);
            }
        }

        for (arg, param) in args[..fixed].iter().zip(&params[..fixed]) {
            let actual = self.lower_expr(&arg.expr)?;
            self.convert(&actual, param, arg.expr.span)?;
        }
        let element = descriptor::element_type(rest)
            .map(str::to_string)
            .ok_or_else(|| CompileError::TypeInference {
                message: format!("rest parameter {rest} is not an array"),
                span,
            })?;
        let overflow = &args[fixed..];
        self.code.iconst(overflow.len() as i32);
        self.emit_new_array(&element);
        for (i, arg) in overflow.iter().enumerate() {
            self.code.dup();
            self.code.iconst(i as i32);
            let actual = self.lower_expr(&arg.expr)?;
            self.convert(&actual, &element, arg.expr.span)?;
            self.code.array_store(&element);
        }
        Ok(())
    }

    fn eval_args_for(
        &mut self,
        entry: &MethodEntry,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<(Vec<String>, String)> {
        let (params, ret) = descriptor::parse_method_descriptor(&entry.descriptor)
            .map_err(|_| CompileError::TypeInference {
                message: format!("malformed descriptor {}", entry.descriptor),
                span,
            })?;
        if entry.is_varargs {
            self.eval_args_varargs(args, &params, span)?;
        } else {
            self.eval_args_fixed(args, &params, span)?;
        }
        Ok((params, ret))
    }

    pub(crate) fn resolve_external_static(
        &mut self,
        alias: &str,
        member: &str,
        arg_descs: &[String],
        span: Span,
    ) -> CompileResult<(&JavaType, &MethodEntry)> {
        let ty = self
            .types
            .by_alias(alias)
            .ok_or_else(|| CompileError::UnresolvedMethod {
                name: member.to_string(),
                class: alias.to_string(),
                span,
            })?;
        let entry = self
            .types
            .find_method(ty, member, arg_descs)
            .filter(|m| m.is_static)
            .ok_or_else(|| CompileError::UnresolvedMethod {
                name: member.to_string(),
                class: ty.internal_name.clone(),
                span,
            })?;
        Ok((ty, entry))
    }

    pub(crate) fn lower_external_static(
        &mut self,
        alias: &str,
        member: &str,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        let arg_descs = self.infer_arg_types(args)?;
        let (ty, entry) = self.resolve_external_static(alias, member, &arg_descs, span)?;
        let owner = ty.internal_name.clone();
        let entry = entry.clone();
        let (_, ret) = self.eval_args_for(&entry, args, span)?;
        let method = self.pool.add_method_ref(&owner, &entry.name, &entry.descriptor);
        self.code.invokestatic(method, &entry.descriptor);
        Ok(ret)
    }

    /// Declared return type of an instance call, for inference.
    pub(crate) fn resolve_instance_return(
        &mut self,
        recv: &str,
        member: &str,
        arg_descs: &[String],
        span: Span,
    ) -> CompileResult<String> {
        let (entry, _, _) = self.resolve_instance_method(recv, member, arg_descs, span)?;
        if entry.returns_receiver {
            return Ok(recv.to_string());
        }
        let (_, ret) = descriptor::parse_method_descriptor(&entry.descriptor)
            .map_err(|_| CompileError::TypeInference {
                message: format!("malformed descriptor {}", entry.descriptor),
                span,
            })?;
        Ok(ret)
    }

    /// Looks up an instance method on the receiver's registered type. The
    /// returned flags say whether to use interface or special dispatch.
    fn resolve_instance_method(
        &self,
        recv: &str,
        member: &str,
        arg_descs: &[String],
        span: Span,
    ) -> CompileResult<(MethodEntry, bool, bool)> {
        let internal =
            descriptor::internal_name(recv).ok_or_else(|| CompileError::UnsupportedCall {
                member: member.to_string(),
                receiver: descriptor::display_name(recv),
                span,
            })?;
        if let Some(ty) = self.types.by_internal_name(internal) {
            if let Some(entry) = self
                .types
                .find_method(ty, member, arg_descs)
                .filter(|m| !m.is_static)
            {
                return Ok((entry.clone(), ty.is_interface, false));
            }
        }
        if let Some(class) = self.classes.get(internal) {
            if let Some(method) = class.method(member).filter(|m| !m.is_static) {
                let entry = MethodEntry {
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    is_static: false,
                    is_varargs: false,
                    returns_receiver: false,
                };
                return Ok((entry, false, method.is_private));
            }
        }
        Err(CompileError::UnresolvedMethod {
            name: member.to_string(),
            class: internal.to_string(),
            span,
        })
    }

    /// Instance call with the receiver already on the stack.
    pub(crate) fn lower_instance_call(
        &mut self,
        recv: &str,
        member: &str,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        let arg_descs = self.infer_arg_types(args)?;
        let (entry, is_interface, is_private) =
            self.resolve_instance_method(recv, member, &arg_descs, span)?;
        let internal = descriptor::internal_name(recv)
            .unwrap_or(recv)
            .to_string();
        let (_, ret) = self.eval_args_for(&entry, args, span)?;
        if is_interface {
            let method = self
                .pool
                .add_interface_method_ref(&internal, &entry.name, &entry.descriptor);
            self.code.invokeinterface(method, &entry.descriptor);
        } else {
            let method = self.pool.add_method_ref(&internal, &entry.name, &entry.descriptor);
            if is_private {
                self.code.invokespecial(method, &entry.descriptor);
            } else {
                self.code.invokevirtual(method, &entry.descriptor);
            }
        }
        // fluent methods declare a supertype; cast back for chaining
        if entry.returns_receiver && ret != recv {
            self.convert(&ret, recv, span)?;
            return Ok(recv.to_string());
        }
        Ok(ret)
    }
}
