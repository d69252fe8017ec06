//! Instruction builder for one function body

use crate::{
    BinaryOp, BlockData, BlockId, CmpPredicate, Function, InstData, InstKind, IrError, SlotType,
    Terminator, Type, Value,
};
use kl_intern::Symbol;

/// Builds the body of a single function.
///
/// The builder owns the function under construction. Blocks come from
/// [`create_block`](Self::create_block) detached and are placed with
/// [`insert_block`](Self::insert_block); instructions are appended at the
/// end of the block chosen with [`position_at_end`](Self::position_at_end).
pub struct FunctionBuilder {
    function: Function,
    entry: BlockId,
    /// Allocas already hoisted to the top of the entry block
    entry_allocas: usize,
    current_block: Option<BlockId>,
}

impl FunctionBuilder {
    /// Creates a builder with an inserted `entry` block as insertion point
    #[must_use]
    pub fn new(name: Symbol, params: Vec<Symbol>) -> Self {
        let mut function = Function::declaration(name, params);
        let entry = function.blocks.alloc(BlockData {
            name: "entry".to_owned(),
            insts: Vec::new(),
            terminator: None,
        });
        function.layout.push(entry);

        Self {
            function,
            entry,
            entry_allocas: 0,
            current_block: Some(entry),
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    /// The block instructions are currently appended to
    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    /// Creates a block that is not yet part of the layout
    pub fn create_block(&mut self, name: &str) -> BlockId {
        self.function.blocks.alloc(BlockData {
            name: name.to_owned(),
            insts: Vec::new(),
            terminator: None,
        })
    }

    /// Places a detached block at the end of the layout.
    ///
    /// # Errors
    /// Returns [`IrError::BlockAlreadyInserted`] if the block is placed already.
    pub fn insert_block(&mut self, block: BlockId) -> Result<(), IrError> {
        if self.function.is_inserted(block) {
            return Err(IrError::BlockAlreadyInserted {
                block: self.function.blocks[block].name.clone(),
            });
        }
        self.function.layout.push(block);
        Ok(())
    }

    /// Creates a block and places it at the end of the layout
    pub fn append_block(&mut self, name: &str) -> BlockId {
        let block = self.create_block(name);
        self.function.layout.push(block);
        block
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.function.blocks[block].terminator.is_some()
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.function.value_type(value)
    }

    /// Allocates a stack slot at the top of the entry block, regardless of
    /// the current insertion point
    pub fn build_entry_alloca(&mut self, ty: SlotType, name: &str) -> Value {
        let id = self.function.insts.alloc(InstData {
            kind: InstKind::Alloca { ty },
            name: name.to_owned(),
        });
        self.function.blocks[self.entry]
            .insts
            .insert(self.entry_allocas, id);
        self.entry_allocas += 1;
        Value::Inst(id)
    }

    /// Reads one double through `ptr`
    pub fn build_load(&mut self, ptr: Value, name: &str) -> Result<Value, IrError> {
        self.push(InstKind::Load { ptr }, name)
    }

    /// Writes `value` through `ptr`
    pub fn build_store(&mut self, value: Value, ptr: Value) -> Result<(), IrError> {
        self.push(InstKind::Store { value, ptr }, "")?;
        Ok(())
    }

    pub fn build_binary(
        &mut self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.push(InstKind::Binary { op, lhs, rhs }, name)
    }

    pub fn build_fcmp(
        &mut self,
        pred: CmpPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.push(InstKind::FCmp { pred, lhs, rhs }, name)
    }

    pub fn build_fneg(&mut self, operand: Value, name: &str) -> Result<Value, IrError> {
        self.push(InstKind::FNeg { operand }, name)
    }

    pub fn build_not(&mut self, operand: Value, name: &str) -> Result<Value, IrError> {
        self.push(InstKind::Not { operand }, name)
    }

    pub fn build_fptosi(&mut self, value: Value, name: &str) -> Result<Value, IrError> {
        self.push(InstKind::FpToSi { value }, name)
    }

    pub fn build_uitofp(&mut self, value: Value, name: &str) -> Result<Value, IrError> {
        self.push(InstKind::UiToFp { value }, name)
    }

    /// Address of `base[index]` where `base` points at an array slot of type `ty`
    pub fn build_element_ptr(
        &mut self,
        base: Value,
        ty: SlotType,
        index: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.push(InstKind::ElementPtr { base, ty, index }, name)
    }

    pub fn build_call(
        &mut self,
        callee: Symbol,
        args: Vec<Value>,
        name: &str,
    ) -> Result<Value, IrError> {
        self.push(InstKind::Call { callee, args }, name)
    }

    /// Joins one value per predecessor. Phis must precede every other
    /// instruction of their block.
    pub fn build_phi(
        &mut self,
        ty: Type,
        incoming: Vec<(Value, BlockId)>,
        name: &str,
    ) -> Result<Value, IrError> {
        self.push(InstKind::Phi { ty, incoming }, name)
    }

    pub fn build_br(&mut self, dest: BlockId) -> Result<(), IrError> {
        self.terminate(Terminator::Br(dest))
    }

    pub fn build_cond_br(
        &mut self,
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> Result<(), IrError> {
        self.terminate(Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        })
    }

    pub fn build_ret(&mut self, value: Value) -> Result<(), IrError> {
        self.terminate(Terminator::Ret(value))
    }

    /// Hands back the finished function
    pub fn finish(self) -> Function {
        self.function
    }

    fn insertion_block(&self) -> Result<BlockId, IrError> {
        let block = self.current_block.ok_or(IrError::NoInsertPoint)?;
        if self.is_terminated(block) {
            return Err(IrError::BlockTerminated {
                block: self.function.blocks[block].name.clone(),
            });
        }
        Ok(block)
    }

    fn push(&mut self, kind: InstKind, name: &str) -> Result<Value, IrError> {
        let block = self.insertion_block()?;
        let id = self.function.insts.alloc(InstData {
            kind,
            name: name.to_owned(),
        });
        self.function.blocks[block].insts.push(id);
        Ok(Value::Inst(id))
    }

    fn terminate(&mut self, terminator: Terminator) -> Result<(), IrError> {
        let block = self.insertion_block()?;
        self.function.blocks[block].terminator = Some(terminator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Module;

    fn builder(module: &mut Module, params: &[&str]) -> FunctionBuilder {
        let name = module.intern("f");
        let params = params.iter().map(|param| module.intern(param)).collect();
        FunctionBuilder::new(name, params)
    }

    #[test]
    fn test_entry_allocas_stay_on_top() {
        let mut module = Module::new("test");
        let mut fb = builder(&mut module, &[]);
        let first = fb.build_entry_alloca(SlotType::Scalar, "a");
        fb.build_store(Value::float(1.0), first).unwrap();
        let second = fb.build_entry_alloca(SlotType::Array(4), "b");

        let function = fb.finish();
        let entry = function.block(function.entry_block().unwrap());
        let kinds: Vec<&str> = entry
            .insts
            .iter()
            .map(|&inst| function.inst(inst).kind.opcode())
            .collect();
        assert_eq!(kinds, ["alloca", "alloca", "store"]);
        assert_eq!(Value::Inst(entry.insts[1]), second);
    }

    #[test]
    fn test_detached_blocks_are_laid_out_on_insert() {
        let mut module = Module::new("test");
        let mut fb = builder(&mut module, &[]);
        let late = fb.create_block("late");
        let early = fb.create_block("early");
        assert_eq!(fb.function().layout().len(), 1);

        fb.insert_block(early).unwrap();
        fb.insert_block(late).unwrap();
        assert_eq!(fb.function().layout()[1..], [early, late]);

        let err = fb.insert_block(late).unwrap_err();
        assert_eq!(
            err,
            IrError::BlockAlreadyInserted {
                block: "late".to_owned()
            }
        );
    }

    #[test]
    fn test_no_instructions_after_terminator() {
        let mut module = Module::new("test");
        let mut fb = builder(&mut module, &["x"]);
        fb.build_ret(Value::Param(0)).unwrap();
        let err = fb.build_fneg(Value::Param(0), "neg").unwrap_err();
        assert_eq!(
            err,
            IrError::BlockTerminated {
                block: "entry".to_owned()
            }
        );
    }

    #[test]
    fn test_value_types() {
        let mut module = Module::new("test");
        let mut fb = builder(&mut module, &["x"]);
        let cmp = fb
            .build_fcmp(CmpPredicate::Ult, Value::Param(0), Value::float(1.0), "lt")
            .unwrap();
        let not = fb.build_not(cmp, "not").unwrap();
        let wide = fb.build_uitofp(not, "wide").unwrap();
        let index = fb.build_fptosi(wide, "idx").unwrap();
        assert_eq!(fb.value_type(cmp), Type::Bool);
        assert_eq!(fb.value_type(not), Type::Bool);
        assert_eq!(fb.value_type(wide), Type::Double);
        assert_eq!(fb.value_type(index), Type::Int);
        assert_eq!(fb.value_type(Value::Undef), Type::Double);
    }
}
