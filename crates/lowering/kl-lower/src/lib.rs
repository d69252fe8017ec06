//! AST to IR lowering
//!
//! A [`Session`] lowers one translation unit into a [`kl_ir::Module`]. It owns
//! everything that changes while lowering: the module with its function and
//! global namespaces, the local symbol table, the diagnostics sink and the
//! builder of the function currently being defined.
//!
//! Lowering is depth-first. Each node lowers its children before combining
//! their values, and every binding a node installs is restored before the
//! node returns, whether it succeeds or not.

mod control;
pub mod diagnostics;
pub mod error;
mod expr;
mod function;
pub mod resolve;
pub mod scope;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{LoopPart, LowerError};
pub use resolve::{Location, StorageHandle};

use kl_ast::{Node, Sequence};
use kl_intern::Symbol;
use kl_ir::{BlockId, FunctionBuilder, GlobalId, Module, Value};
use kl_span::Span;
use scope::Scope;
use tracing::trace;

/// Result of lowering one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowered {
    /// An SSA value, possibly the undefined sentinel
    Value(Value),
    /// Storage created by a `var` binding
    Storage(StorageHandle),
    /// A function defined or declared in the module
    Function(Symbol),
    /// A global created in the module
    Global(GlobalId),
}

/// Lowering state for one translation unit
pub struct Session {
    module: Module,
    scope: Scope,
    diagnostics: Diagnostics,
    builder: Option<FunctionBuilder>,
}

impl Session {
    /// Creates a session writing into a fresh module; `file` names the
    /// source in diagnostics.
    pub fn new(module_name: &str, file: &str) -> Self {
        Self {
            module: Module::new(module_name),
            scope: Scope::new(),
            diagnostics: Diagnostics::new(file),
            builder: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Lowers a whole translation unit, recording a fatal diagnostic if it
    /// fails.
    ///
    /// # Errors
    /// Returns the first error that aborted lowering.
    pub fn lower_unit(&mut self, root: &Node) -> Result<(), LowerError> {
        match self.lower(root) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.diagnostics.error(&err);
                Err(err)
            }
        }
    }

    /// Lowers a single node.
    ///
    /// # Errors
    /// Returns the first error raised by the node or its children.
    pub fn lower(&mut self, node: &Node) -> Result<Lowered, LowerError> {
        trace!(kind = node.kind_name(), at = %node.span(), "lowering");
        match node {
            Node::Sequence(seq) => self.lower_sequence(seq),
            Node::Number(lit) => Ok(Lowered::Value(Value::float(lit.value))),
            Node::Variable(var) => self.lower_variable(var).map(Lowered::Value),
            Node::ArraySlice(slice) => self.lower_slice(slice).map(Lowered::Value),
            Node::Binary(expr) => self.lower_binary(expr).map(Lowered::Value),
            Node::Unary(expr) => self.lower_unary(expr).map(Lowered::Value),
            Node::Call(call) => self.lower_call(call).map(Lowered::Value),
            Node::Conditional(cond) => self.lower_conditional(cond).map(Lowered::Value),
            Node::Block(block) => self.lower_block(block).map(Lowered::Value),
            Node::VarBinding(binding) => self.lower_binding(binding).map(Lowered::Storage),
            Node::Prototype(proto) => self.lower_prototype(proto).map(Lowered::Function),
            Node::Function(def) => self.lower_function(def).map(Lowered::Function),
            Node::GlobalVar(decl) => Ok(Lowered::Global(self.lower_global(decl))),
            Node::Assignment(assign) => self.lower_assignment(assign).map(Lowered::Value),
            Node::For(for_loop) => self.lower_for(for_loop).map(Lowered::Value),
        }
    }

    /// Lowers a node that must produce a value
    ///
    /// # Errors
    /// Returns [`LowerError::NotAValue`] for bindings and items.
    pub fn lower_value(&mut self, node: &Node) -> Result<Value, LowerError> {
        match self.lower(node)? {
            Lowered::Value(value) => Ok(value),
            Lowered::Storage(_) | Lowered::Function(_) | Lowered::Global(_) => {
                Err(LowerError::NotAValue {
                    kind: node.kind_name(),
                    span: node.span(),
                })
            }
        }
    }

    fn lower_sequence(&mut self, seq: &Sequence) -> Result<Lowered, LowerError> {
        let first = self.lower(&seq.first)?;
        match &seq.rest {
            Some(rest) => self.lower(rest),
            None => Ok(first),
        }
    }

    /// The builder of the function being defined
    fn builder(&mut self, kind: &'static str, span: Span) -> Result<&mut FunctionBuilder, LowerError> {
        self.builder
            .as_mut()
            .ok_or(LowerError::OutsideFunction { kind, span })
    }

    /// Places a detached block at the end of the layout and moves the
    /// insertion point into it
    fn start_block(&mut self, block: BlockId, span: Span) -> Result<(), LowerError> {
        let builder = self.builder("control flow", span)?;
        builder.insert_block(block).map_err(LowerError::ir(span))?;
        builder.position_at_end(block);
        Ok(())
    }
}
