//! Conditionals and counted loops

use crate::error::LoopPart;
use crate::{LowerError, Session};
use kl_ast::{Conditional, ForInit, ForLoop, Node};
use kl_ir::{BlockId, Type, Value};
use kl_span::Span;
use tracing::debug;

impl Session {
    /// `if c then a [else b]`
    ///
    /// Each arm is widened to a number and branches to the join as soon as it
    /// is lowered. The join is keyed by the block each arm actually ends in,
    /// which differs from the arm's first block when the arm has control flow
    /// of its own.
    pub(crate) fn lower_conditional(&mut self, cond: &Conditional) -> Result<Value, LowerError> {
        let span = cond.span;
        let test = self.lower_value(&cond.cond)?;
        let test = self.bool_operand(test, span)?;

        let builder = self.builder("conditional", span)?;
        let then_block = builder.create_block("trueexp");
        let merge_block = builder.create_block("endcond");
        let else_block = cond
            .else_branch
            .as_ref()
            .map(|_| builder.create_block("falseexp"));
        builder
            .build_cond_br(test, then_block, else_block.unwrap_or(merge_block))
            .map_err(LowerError::ir(span))?;

        self.start_block(then_block, span)?;
        let (then_value, then_end) = self.lower_arm(&cond.then_branch, merge_block, span)?;

        let (Some(else_branch), Some(else_block)) = (&cond.else_branch, else_block) else {
            self.start_block(merge_block, span)?;
            return Ok(Value::Undef);
        };

        self.start_block(else_block, span)?;
        let (else_value, else_end) = self.lower_arm(else_branch, merge_block, span)?;

        self.start_block(merge_block, span)?;
        self.builder("conditional", span)?
            .build_phi(
                Type::Double,
                vec![(then_value, then_end), (else_value, else_end)],
                "condval",
            )
            .map_err(LowerError::ir(span))
    }

    /// Lowers one arm into the current block and branches to the join.
    /// Returns the arm's value and the block it ends in.
    fn lower_arm(
        &mut self,
        arm: &Node,
        merge_block: BlockId,
        span: Span,
    ) -> Result<(Value, BlockId), LowerError> {
        let value = self.lower_value(arm)?;
        let value = self.widen(value, arm.span())?;
        let end = self.insertion_block(span)?;
        self.builder("conditional", span)?
            .build_br(merge_block)
            .map_err(LowerError::ir(span))?;
        Ok((value, end))
    }

    /// `for init, cond, step in body`
    ///
    /// Lays out `preheader -> header -> body -> latch -> exit` with a back
    /// edge from the latch to the header. A binding initializer shadows its
    /// name until the loop is finished.
    pub(crate) fn lower_for(&mut self, for_loop: &ForLoop) -> Result<Value, LowerError> {
        let span = for_loop.span;
        debug!(var = for_loop.init.name(), at = %span, "lowering loop");

        let builder = self.builder("loop", span)?;
        let preheader = builder.create_block("preheader");
        builder.build_br(preheader).map_err(LowerError::ir(span))?;
        self.start_block(preheader, span)?;

        let saved = match &for_loop.init {
            ForInit::Binding(binding) => {
                let handle = self
                    .lower_binding(binding)
                    .map_err(LowerError::in_loop(LoopPart::Init, span))?;
                let name = self.module.intern(&binding.name);
                Some(self.scope.bind(name, handle))
            }
            ForInit::Assignment(assign) => {
                self.lower_assignment(assign)
                    .map_err(LowerError::in_loop(LoopPart::Init, span))?;
                None
            }
        };

        let result = self.lower_loop_blocks(for_loop);
        if let Some(saved) = saved {
            self.scope.restore(vec![saved]);
        }
        result.map(|()| Value::Undef)
    }

    fn lower_loop_blocks(&mut self, for_loop: &ForLoop) -> Result<(), LowerError> {
        let span = for_loop.span;
        let builder = self.builder("loop", span)?;
        let header = builder.create_block("header");
        let body = builder.create_block("body");
        let latch = builder.create_block("latch");
        let exit = builder.create_block("exit");
        builder.build_br(header).map_err(LowerError::ir(span))?;

        self.start_block(header, span)?;
        let cond = self
            .lower_value(&for_loop.cond)
            .and_then(|value| self.bool_operand(value, for_loop.cond.span()))
            .map_err(LowerError::in_loop(LoopPart::Condition, span))?;
        self.builder("loop", span)?
            .build_cond_br(cond, body, exit)
            .map_err(LowerError::ir(span))?;

        self.start_block(body, span)?;
        self.lower(&for_loop.body)
            .map_err(LowerError::in_loop(LoopPart::Body, span))?;
        self.builder("loop", span)?
            .build_br(latch)
            .map_err(LowerError::ir(span))?;

        self.start_block(latch, span)?;
        self.lower_assignment(&for_loop.step)
            .map_err(LowerError::in_loop(LoopPart::Step, span))?;
        self.builder("loop", span)?
            .build_br(header)
            .map_err(LowerError::ir(span))?;

        self.start_block(exit, span)?;
        Ok(())
    }

    fn insertion_block(&mut self, span: Span) -> Result<BlockId, LowerError> {
        self.builder("control flow", span)?
            .current_block()
            .ok_or(LowerError::OutsideFunction {
                kind: "control flow",
                span,
            })
    }
}
