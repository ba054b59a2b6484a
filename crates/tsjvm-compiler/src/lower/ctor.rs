//! Constructor chaining.
//!
//! super(...), this(...), and super.m(...) all load slot 0 first and dispatch
//! with invokespecial so the target is bound at compile time.

use tsjvm_classfile::descriptor;

use crate::ast::{Arg, Span};
use crate::error::{CompileError, CompileResult};

use super::Lowerer;

impl Lowerer<'_> {
    fn enclosing_class(&self, span: Span) -> CompileResult<String> {
        self.ctx
            .current_class()
            .map(str::to_string)
            .ok_or(CompileError::TypeInference {
                message: "constructor chaining outside a class body".to_string(),
                span,
            })
    }

    /// Builds a constructor descriptor from the evaluated argument types and
    /// emits the invokespecial. The receiver is already on the stack.
    fn emit_ctor_call(&mut self, target: &str, args: &[Arg]) -> CompileResult<()> {
        let mut arg_descs = Vec::with_capacity(args.len());
        for arg in args {
            arg_descs.push(self.lower_expr(&arg.expr)?);
        }
        let desc = descriptor::method_descriptor(arg_descs.iter().map(String::as_str), "V");
        let method = self.pool.add_method_ref(target, "<init>", &desc);
        self.code.invokespecial(method, &desc);
        Ok(())
    }

    pub(crate) fn lower_super_ctor(&mut self, args: &[Arg], span: Span) -> CompileResult<String> {
        let class = self.enclosing_class(span)?;
        let super_class = self.classes.super_class_of(&class).to_string();
        self.code.aload(0);
        self.emit_ctor_call(&super_class, args)?;
        Ok("V".to_string())
    }

    pub(crate) fn lower_this_ctor(&mut self, args: &[Arg], span: Span) -> CompileResult<String> {
        let class = self.enclosing_class(span)?;
        self.code.aload(0);
        self.emit_ctor_call(&class, args)?;
        Ok("V".to_string())
    }

    /// Resolves a super-qualified method: owner class, simple method name,
    /// and full descriptor with return type.
    pub(crate) fn resolve_super_method(
        &self,
        name: &str,
        span: Span,
    ) -> CompileResult<(String, String, String)> {
        let class = self.enclosing_class(span)?;
        let super_class = self.classes.super_class_of(&class).to_string();
        let member = self
            .classes
            .super_member(&super_class, name)
            .ok_or_else(|| CompileError::UnresolvedSuperMember {
                name: name.to_string(),
                class: super_class.clone(),
                span,
            })?;
        let simple = member
            .name
            .rsplit('.')
            .next()
            .unwrap_or(&member.name)
            .to_string();
        Ok((super_class, simple, member.descriptor.clone()))
    }

    pub(crate) fn lower_super_method(
        &mut self,
        name: &str,
        args: &[Arg],
        span: Span,
    ) -> CompileResult<String> {
        let (super_class, simple, desc) = self.resolve_super_method(name, span)?;
        let (params, ret) = descriptor::parse_method_descriptor(&desc)
            .map_err(|_| CompileError::TypeInference {
                message: format!("malformed descriptor {desc}"),
                span,
            })?;
        self.code.aload(0);
        self.eval_args_fixed(args, &params, span)?;
        let method = self.pool.add_method_ref(&super_class, &simple, &desc);
        self.code.invokespecial(method, &desc);
        Ok(ret)
    }
}
