//! Value-producing nodes, bindings and storage

use crate::resolve::StorageHandle;
use crate::scope::SavedBinding;
use crate::{LowerError, Session};
use kl_ast::{
    ArraySlice, Assignment, BinaryExpr, BlockExpr, CallExpr, GlobalVarDecl, Initializer, Node,
    Operator, UnaryExpr, VarBinding, VariableRef,
};
use kl_ir::{BinaryOp, CmpPredicate, GlobalId, SlotType, Type, Value};
use kl_span::Span;

impl Session {
    pub(crate) fn lower_variable(&mut self, var: &VariableRef) -> Result<Value, LowerError> {
        let handle = self.resolve(&var.name, var.span)?;
        if handle.ty.is_array() {
            return Err(LowerError::ArrayAsScalar {
                name: var.name.clone(),
                span: var.span,
            });
        }
        self.builder("variable reference", var.span)?
            .build_load(handle.ptr(), &var.name)
            .map_err(LowerError::ir(var.span))
    }

    pub(crate) fn lower_slice(&mut self, slice: &ArraySlice) -> Result<Value, LowerError> {
        let handle = self.resolve(&slice.name, slice.span)?;
        let ptr = self.element_ptr(handle, &slice.name, &slice.index, slice.span)?;
        self.builder("array access", slice.span)?
            .build_load(ptr, &slice.name)
            .map_err(LowerError::ir(slice.span))
    }

    pub(crate) fn lower_binary(&mut self, expr: &BinaryExpr) -> Result<Value, LowerError> {
        let lhs = self.lower_value(&expr.lhs)?;
        let rhs = self.lower_value(&expr.rhs)?;
        let span = expr.span;

        let (op, name) = match expr.op {
            Operator::Add => (BinaryOp::FAdd, "addres"),
            Operator::Sub => (BinaryOp::FSub, "subres"),
            Operator::Mul => (BinaryOp::FMul, "mulres"),
            Operator::Div => (BinaryOp::FDiv, "divres"),
            Operator::And | Operator::Or => {
                let lhs = self.bool_operand(lhs, span)?;
                let rhs = self.bool_operand(rhs, span)?;
                let (op, name) = if expr.op == Operator::And {
                    (BinaryOp::And, "andres")
                } else {
                    (BinaryOp::Or, "orres")
                };
                return self
                    .builder("logical operator", span)?
                    .build_binary(op, lhs, rhs, name)
                    .map_err(LowerError::ir(span));
            }
            Operator::Lt | Operator::Gt | Operator::Eq => {
                let lhs = self.number_operand(lhs, span)?;
                let rhs = self.number_operand(rhs, span)?;
                let builder = self.builder("comparison", span)?;
                let result = match expr.op {
                    Operator::Lt => builder.build_fcmp(CmpPredicate::Ult, lhs, rhs, "lttest"),
                    // a > b is b < a
                    Operator::Gt => builder.build_fcmp(CmpPredicate::Ult, rhs, lhs, "gttest"),
                    _ => builder.build_fcmp(CmpPredicate::Ueq, lhs, rhs, "eqtest"),
                };
                return result.map_err(LowerError::ir(span));
            }
            Operator::Not => {
                return Err(LowerError::UnsupportedOperator {
                    op: expr.op,
                    position: "binary",
                    span,
                });
            }
        };

        let lhs = self.number_operand(lhs, span)?;
        let rhs = self.number_operand(rhs, span)?;
        self.builder("arithmetic", span)?
            .build_binary(op, lhs, rhs, name)
            .map_err(LowerError::ir(span))
    }

    pub(crate) fn lower_unary(&mut self, expr: &UnaryExpr) -> Result<Value, LowerError> {
        let operand = self.lower_value(&expr.operand)?;
        let span = expr.span;
        match expr.op {
            Operator::Not => {
                let operand = self.bool_operand(operand, span)?;
                self.builder("logical operator", span)?
                    .build_not(operand, "nottmp")
                    .map_err(LowerError::ir(span))
            }
            Operator::Sub => {
                let operand = self.number_operand(operand, span)?;
                self.builder("arithmetic", span)?
                    .build_fneg(operand, "negtmp")
                    .map_err(LowerError::ir(span))
            }
            op => Err(LowerError::UnsupportedOperator {
                op,
                position: "unary",
                span,
            }),
        }
    }

    pub(crate) fn lower_call(&mut self, call: &CallExpr) -> Result<Value, LowerError> {
        let span = call.span;
        let Some(function) = self.module.function_named(&call.callee) else {
            return Err(LowerError::UndefinedFunction {
                name: call.callee.clone(),
                span,
            });
        };
        if function.arity() != call.args.len() {
            return Err(LowerError::ArityMismatch {
                name: call.callee.clone(),
                expected: function.arity(),
                got: call.args.len(),
                span,
            });
        }
        let callee = function.name;

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = self.lower_value(arg)?;
            args.push(self.widen(value, arg.span())?);
        }
        self.builder("call", span)?
            .build_call(callee, args, "calltmp")
            .map_err(LowerError::ir(span))
    }

    pub(crate) fn lower_block(&mut self, block: &BlockExpr) -> Result<Value, LowerError> {
        let saved = self.enter_bindings(&block.bindings)?;
        let body = self.lower_value(&block.body);
        self.scope.restore(saved);

        match body {
            Ok(Value::Undef) => {
                self.diagnostics
                    .warning(block.span, "incomplete block, treated as undefined");
                Ok(Value::Undef)
            }
            Ok(value) => Ok(value),
            Err(cause) => Err(LowerError::InvalidSequence {
                span: block.span,
                cause: Box::new(cause),
            }),
        }
    }

    /// Lowers and installs each binding in order. Every initializer sees the
    /// bindings before it but not its own. On failure the bindings already
    /// installed are restored.
    pub(crate) fn enter_bindings(
        &mut self,
        bindings: &[VarBinding],
    ) -> Result<Vec<SavedBinding>, LowerError> {
        let mut saved = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match self.lower_binding(binding) {
                Ok(handle) => {
                    let name = self.module.intern(&binding.name);
                    saved.push(self.scope.bind(name, handle));
                }
                Err(err) => {
                    self.scope.restore(saved);
                    return Err(err);
                }
            }
        }
        Ok(saved)
    }

    /// Allocates and initializes the storage of a binding without making it
    /// visible
    pub(crate) fn lower_binding(&mut self, binding: &VarBinding) -> Result<StorageHandle, LowerError> {
        let span = binding.span;
        match &binding.init {
            Initializer::Scalar { value } => {
                let init = match value {
                    Some(node) => self.lower_value(node)?,
                    None => Value::float(0.0),
                };
                let init = self.widen(init, span)?;
                let builder = self.builder("variable binding", span)?;
                let slot = builder.build_entry_alloca(SlotType::Scalar, &binding.name);
                builder.build_store(init, slot).map_err(LowerError::ir(span))?;
                Ok(StorageHandle::local(slot, SlotType::Scalar))
            }
            Initializer::Array { size, elements } => {
                if elements.len() > *size as usize {
                    return Err(LowerError::InitializerTooLong {
                        name: binding.name.clone(),
                        size: *size,
                        len: elements.len(),
                        span,
                    });
                }
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.lower_value(element)?;
                    values.push(self.widen(value, element.span())?);
                }

                let ty = SlotType::Array(*size);
                let builder = self.builder("variable binding", span)?;
                let slot = builder.build_entry_alloca(ty, &binding.name);
                for (idx, value) in values.into_iter().enumerate() {
                    let ptr = builder
                        .build_element_ptr(slot, ty, Value::Int(idx as i64), "elemaddr")
                        .map_err(LowerError::ir(span))?;
                    builder.build_store(value, ptr).map_err(LowerError::ir(span))?;
                }
                Ok(StorageHandle::local(slot, ty))
            }
        }
    }

    pub(crate) fn lower_assignment(&mut self, assign: &Assignment) -> Result<Value, LowerError> {
        let span = assign.span;
        let handle = self.resolve(&assign.name, span)?;
        let ptr = match &assign.index {
            Some(index) => self.element_ptr(handle, &assign.name, index, span)?,
            None if handle.ty.is_array() => {
                return Err(LowerError::ArrayAsScalar {
                    name: assign.name.clone(),
                    span,
                });
            }
            None => handle.ptr(),
        };

        let value = self.lower_value(&assign.value)?;
        let value = self.widen(value, span)?;
        self.builder("assignment", span)?
            .build_store(value, ptr)
            .map_err(LowerError::ir(span))?;
        Ok(value)
    }

    /// Adds a zero-initialized global. Redeclaring a name adds another slot.
    pub(crate) fn lower_global(&mut self, decl: &GlobalVarDecl) -> GlobalId {
        let name = self.module.intern(&decl.name);
        let ty = decl.size.map_or(SlotType::Scalar, SlotType::Array);
        self.module.add_global(name, ty)
    }

    /// Address of `name[index]`; `handle` must be array-typed
    fn element_ptr(
        &mut self,
        handle: StorageHandle,
        name: &str,
        index: &Node,
        span: Span,
    ) -> Result<Value, LowerError> {
        if !handle.ty.is_array() {
            return Err(LowerError::NotAnArray {
                name: name.to_owned(),
                span,
            });
        }
        let index = self.lower_value(index)?;
        let index = self.number_operand(index, span)?;
        let builder = self.builder("array access", span)?;
        let index = builder
            .build_fptosi(index, "intindex")
            .map_err(LowerError::ir(span))?;
        builder
            .build_element_ptr(handle.ptr(), handle.ty, index, "elemaddr")
            .map_err(LowerError::ir(span))
    }

    /// Converts a compare result to 0.0 / 1.0; numbers and `undef` pass through
    pub(crate) fn widen(&mut self, value: Value, span: Span) -> Result<Value, LowerError> {
        let Some(builder) = self.builder.as_mut() else {
            return Ok(value);
        };
        if builder.value_type(value) != Type::Bool {
            return Ok(value);
        }
        builder
            .build_uitofp(value, "booltmp")
            .map_err(LowerError::ir(span))
    }

    /// A defined value usable as an arithmetic operand
    pub(crate) fn number_operand(&mut self, value: Value, span: Span) -> Result<Value, LowerError> {
        if value.is_undef() {
            return Err(LowerError::UndefinedOperand { span });
        }
        self.widen(value, span)
    }

    /// A defined value usable as a truth value; numbers compare unequal to zero
    pub(crate) fn bool_operand(&mut self, value: Value, span: Span) -> Result<Value, LowerError> {
        if value.is_undef() {
            return Err(LowerError::UndefinedOperand { span });
        }
        let builder = self.builder("condition", span)?;
        if builder.value_type(value) == Type::Bool {
            return Ok(value);
        }
        builder
            .build_fcmp(CmpPredicate::One, value, Value::float(0.0), "tobool")
            .map_err(LowerError::ir(span))
    }
}
