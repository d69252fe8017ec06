//! Function definitions and extern prototypes

use crate::resolve::StorageHandle;
use crate::scope::Scope;
use crate::{LowerError, Session};
use kl_ast::{FunctionDef, Prototype};
use kl_intern::Symbol;
use kl_ir::verify::verify_function;
use kl_ir::{FunctionBuilder, IrError, SlotType, Value};
use std::mem;
use tracing::{debug, warn};

impl Session {
    /// Declares an external function so calls to it resolve
    pub(crate) fn lower_prototype(&mut self, proto: &Prototype) -> Result<Symbol, LowerError> {
        let (name, params) = self.declare(proto)?;
        debug!(function = %proto.name, arity = params.len(), "declared extern");
        Ok(name)
    }

    /// Defines a function. On failure the function is removed from the
    /// module again and the error is returned.
    pub(crate) fn lower_function(&mut self, def: &FunctionDef) -> Result<Symbol, LowerError> {
        let (name, params) = self.declare(&def.proto)?;
        debug!(function = %def.proto.name, "lowering function");

        // A definition nested in another body gets a fresh builder and table.
        let outer_builder = self
            .builder
            .replace(FunctionBuilder::new(name, params.clone()));
        let outer_scope = mem::replace(&mut self.scope, Scope::new());

        let body = self.lower_function_body(def, &params);

        let builder = mem::replace(&mut self.builder, outer_builder);
        self.scope = outer_scope;

        let finished = body.and_then(|()| {
            let function = builder
                .ok_or(LowerError::OutsideFunction {
                    kind: "function body",
                    span: def.span,
                })?
                .finish();
            verify_function(&self.module, &function)
                .map_err(IrError::from)
                .and_then(|()| self.module.define_function(function))
                .map_err(LowerError::ir(def.span))
        });

        match finished {
            Ok(()) => Ok(name),
            Err(err) => {
                warn!(function = %def.proto.name, "discarding function: {}", err.chain_message());
                self.module.remove_function(name);
                Err(err)
            }
        }
    }

    fn lower_function_body(&mut self, def: &FunctionDef, params: &[Symbol]) -> Result<(), LowerError> {
        let span = def.span;
        let mut saved = Vec::with_capacity(params.len());
        for (idx, (&param, param_name)) in params.iter().zip(&def.proto.params).enumerate() {
            let builder = self.builder("function body", span)?;
            let slot = builder.build_entry_alloca(SlotType::Scalar, param_name);
            if let Err(err) = builder.build_store(Value::Param(idx as u32), slot) {
                self.scope.restore(saved);
                return Err(LowerError::ir(span)(err));
            }
            saved.push(self.scope.bind(param, StorageHandle::local(slot, SlotType::Scalar)));
        }

        let body = self.lower_value(&def.body);
        self.scope.restore(saved);

        let value = body?;
        let value = self.widen(value, def.body.span())?;
        self.builder("function body", span)?
            .build_ret(value)
            .map_err(LowerError::ir(span))
    }

    /// Adds the signature to the function namespace, failing if the name is
    /// already taken by a definition or a declaration
    fn declare(&mut self, proto: &Prototype) -> Result<(Symbol, Vec<Symbol>), LowerError> {
        let name = self.module.intern(&proto.name);
        if self.module.get_function(name).is_some() {
            return Err(LowerError::RedefinedFunction {
                name: proto.name.clone(),
                span: proto.span,
            });
        }
        let params: Vec<Symbol> = proto
            .params
            .iter()
            .map(|param| self.module.intern(param))
            .collect();
        self.module
            .declare_function(name, params.clone())
            .map_err(LowerError::ir(proto.span))?;
        Ok((name, params))
    }
}

#[cfg(test)]
mod tests {
    use crate::{LowerError, Lowered, Session};
    use kl_ast::build::*;
    use kl_ast::Operator;

    #[test]
    fn test_redefinition_keeps_first_definition() {
        let mut session = Session::new("test", "fn.k");
        session.lower(&def("f", &["x"], var("x"))).unwrap();
        let before = session.module().to_string();

        let err = session.lower(&def("f", &[], num(2.0))).unwrap_err();
        assert!(matches!(err, LowerError::RedefinedFunction { ref name, .. } if name == "f"));
        assert_eq!(session.module().function_count(), 1);
        assert_eq!(session.module().to_string(), before);
    }

    #[test]
    fn test_extern_then_definition_is_redefinition() {
        let mut session = Session::new("test", "fn.k");
        session.lower(&extern_fn("putd", &["x"])).unwrap();
        let err = session.lower(&def("putd", &["x"], var("x"))).unwrap_err();
        assert!(matches!(err, LowerError::RedefinedFunction { .. }));
        assert!(session.module().function_named("putd").unwrap().is_declaration());
    }

    #[test]
    fn test_recursive_call_resolves() {
        let mut session = Session::new("test", "fn.k");
        let body = if_else(
            binary(Operator::Lt, var("n"), num(2.0)),
            num(1.0),
            binary(
                Operator::Mul,
                var("n"),
                call("fact", vec![binary(Operator::Sub, var("n"), num(1.0))]),
            ),
        );
        let lowered = session.lower(&def("fact", &["n"], body)).unwrap();
        assert!(matches!(lowered, Lowered::Function(_)));
        assert!(session.module().to_string().contains("call double @fact(double %subres)"));
    }

    #[test]
    fn test_parameters_do_not_leak_between_functions() {
        let mut session = Session::new("test", "fn.k");
        session.lower(&def("f", &["p"], var("p"))).unwrap();
        let err = session.lower(&def("g", &[], var("p"))).unwrap_err();
        assert!(matches!(err, LowerError::UndefinedSymbol { ref name, .. } if name == "p"));
        assert_eq!(session.module().function_count(), 1);
    }

    #[test]
    fn test_nested_definition_restores_outer_function() {
        let mut session = Session::new("test", "fn.k");
        let body = seq(vec![def("inner", &[], num(1.0)), var("x")]);
        session.lower(&def("outer", &["x"], body)).unwrap();
        let names: Vec<&str> = session
            .module()
            .functions()
            .map(|function| session.module().resolve(function.name))
            .collect();
        assert_eq!(names, ["outer", "inner"]);
    }
}
