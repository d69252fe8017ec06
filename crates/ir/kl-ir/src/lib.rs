//! Basic-block intermediate representation
//!
//! This crate is the backend-facing container the lowering engine writes
//! into: a [`Module`] owns named functions and globals, a [`Function`] owns
//! its basic blocks and instructions. Blocks are created detached and only
//! become part of the function once inserted into its layout, so a block's
//! position reflects when it was finalized rather than when it was created.
//!
//! Every value is a 64-bit float unless it is the result of a comparison
//! (`i1`), an index conversion (`i64`) or an address (`ptr`).

pub mod builder;
pub mod print;
pub mod verify;

pub use builder::FunctionBuilder;
pub use verify::VerifyError;

use derive_more::Display;
use indexmap::IndexMap;
use kl_intern::{Interner, Symbol};
use la_arena::{Arena, Idx};
use thiserror::Error;

/// Instruction handle, local to one function
pub type InstId = Idx<InstData>;

/// Basic block handle, local to one function
pub type BlockId = Idx<BlockData>;

/// Errors raised while constructing IR
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// An instruction was built with no insertion block selected
    #[error("no insertion point is set")]
    NoInsertPoint,
    /// An instruction or terminator was appended after a terminator
    #[error("block `{block}` already has a terminator")]
    BlockTerminated {
        /// Label of the offending block
        block: String,
    },
    /// A block was inserted into the layout twice
    #[error("block `{block}` is already inserted into its function")]
    BlockAlreadyInserted {
        /// Label of the offending block
        block: String,
    },
    /// A function with this name already exists in the module
    #[error("function `{name}` already exists")]
    DuplicateFunction {
        /// Function name
        name: String,
    },
    /// A definition was supplied for a function that was never declared
    #[error("function `{name}` has not been declared")]
    UndeclaredFunction {
        /// Function name
        name: String,
    },
    /// A finished function failed verification
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// A float constant, compared and hashed by bit pattern so equal constants
/// are the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatConst(u64);

impl FloatConst {
    pub fn new(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Handle to a module-level global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

/// An SSA operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Float constant
    Float(FloatConst),
    /// Integer constant, used for element indices
    Int(i64),
    /// The undefined value of type `double`
    Undef,
    /// The n-th incoming argument of the enclosing function
    Param(u32),
    /// Result of an instruction
    Inst(InstId),
    /// Address of a global
    Global(GlobalId),
}

impl Value {
    pub fn float(value: f64) -> Self {
        Self::Float(FloatConst::new(value))
    }

    pub fn is_undef(self) -> bool {
        matches!(self, Self::Undef)
    }
}

/// Type of an SSA value
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum Type {
    #[display("double")]
    Double,
    #[display("i1")]
    Bool,
    #[display("i64")]
    Int,
    #[display("ptr")]
    Ptr,
    #[display("void")]
    Void,
}

/// Shape of a storage slot: one double or a fixed-length array of doubles
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum SlotType {
    #[display("double")]
    Scalar,
    #[display("[{_0} x double]")]
    Array(u32),
}

impl SlotType {
    /// Number of doubles the slot holds
    pub fn len(self) -> u32 {
        match self {
            Self::Scalar => 1,
            Self::Array(len) => len,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }
}

/// Float arithmetic and boolean connectives
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    #[display("fadd")]
    FAdd,
    #[display("fsub")]
    FSub,
    #[display("fmul")]
    FMul,
    #[display("fdiv")]
    FDiv,
    #[display("and")]
    And,
    #[display("or")]
    Or,
}

/// Float comparison predicates (`u*` are true when either side is NaN)
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum CmpPredicate {
    /// Unordered or less than
    #[display("ult")]
    Ult,
    /// Unordered or equal
    #[display("ueq")]
    Ueq,
    /// Ordered and not equal
    #[display("one")]
    One,
}

/// Instruction payload
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Stack slot in the function's frame
    Alloca { ty: SlotType },
    /// Read one double through a pointer
    Load { ptr: Value },
    /// Write one value through a pointer
    Store { value: Value, ptr: Value },
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    FCmp { pred: CmpPredicate, lhs: Value, rhs: Value },
    FNeg { operand: Value },
    /// Boolean negation of an `i1`
    Not { operand: Value },
    /// Float to integer, truncating toward zero
    FpToSi { value: Value },
    /// `i1` to 0.0 / 1.0
    UiToFp { value: Value },
    /// Address of element `index` of the array slot at `base`
    ElementPtr { base: Value, ty: SlotType, index: Value },
    Call { callee: Symbol, args: Vec<Value> },
    /// Join of one value per predecessor block
    Phi { ty: Type, incoming: Vec<(Value, BlockId)> },
}

impl InstKind {
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Alloca { .. } => "alloca",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::Binary { op, .. } => match op {
                BinaryOp::FAdd => "fadd",
                BinaryOp::FSub => "fsub",
                BinaryOp::FMul => "fmul",
                BinaryOp::FDiv => "fdiv",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
            },
            Self::FCmp { .. } => "fcmp",
            Self::FNeg { .. } => "fneg",
            Self::Not { .. } => "not",
            Self::FpToSi { .. } => "fptosi",
            Self::UiToFp { .. } => "uitofp",
            Self::ElementPtr { .. } => "getelementptr",
            Self::Call { .. } => "call",
            Self::Phi { .. } => "phi",
        }
    }
}

/// An instruction with its name hint
#[derive(Debug, Clone, PartialEq)]
pub struct InstData {
    pub kind: InstKind,
    /// Name hint used by the printer; empty for anonymous values
    pub name: String,
}

/// Block terminator (how control flow leaves a block)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional branch
    Br(BlockId),
    /// Two-way branch on an `i1`
    CondBr {
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    /// Return from the function
    Ret(Value),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match *self {
            Self::Br(dest) => vec![dest],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest, else_dest],
            Self::Ret(_) => Vec::new(),
        }
    }
}

/// Straight-line instruction sequence ending in a terminator
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    /// Label hint
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
}

/// A function definition, or a declaration when it has no blocks
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Symbol,
    pub params: Vec<Symbol>,
    blocks: Arena<BlockData>,
    insts: Arena<InstData>,
    /// Inserted blocks, in order; the first is the entry block
    layout: Vec<BlockId>,
}

impl Function {
    /// A body-less function
    pub fn declaration(name: Symbol, params: Vec<Symbol>) -> Self {
        Self {
            name,
            params,
            blocks: Arena::new(),
            insts: Arena::new(),
            layout: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Inserted blocks in layout order
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id]
    }

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id]
    }

    /// Number of blocks ever created, inserted or not
    pub fn created_block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions across all inserted blocks
    pub fn instruction_count(&self) -> usize {
        self.layout
            .iter()
            .map(|&block| self.blocks[block].insts.len())
            .sum()
    }

    pub fn is_inserted(&self, id: BlockId) -> bool {
        self.layout.contains(&id)
    }

    /// Blocks whose terminator branches to `id`, in layout order
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.layout
            .iter()
            .copied()
            .filter(|&block| {
                self.blocks[block]
                    .terminator
                    .is_some_and(|term| term.successors().contains(&id))
            })
            .collect()
    }

    pub fn value_type(&self, value: Value) -> Type {
        match value {
            Value::Float(_) | Value::Undef | Value::Param(_) => Type::Double,
            Value::Int(_) => Type::Int,
            Value::Global(_) => Type::Ptr,
            Value::Inst(id) => match &self.insts[id].kind {
                InstKind::Alloca { .. } | InstKind::ElementPtr { .. } => Type::Ptr,
                InstKind::Load { .. }
                | InstKind::FNeg { .. }
                | InstKind::UiToFp { .. }
                | InstKind::Call { .. } => Type::Double,
                InstKind::Store { .. } => Type::Void,
                InstKind::Binary { op, lhs, .. } => match op {
                    BinaryOp::And | BinaryOp::Or => self.value_type(*lhs),
                    BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => {
                        Type::Double
                    }
                },
                InstKind::FCmp { .. } => Type::Bool,
                InstKind::Not { operand } => self.value_type(*operand),
                InstKind::FpToSi { .. } => Type::Int,
                InstKind::Phi { ty, .. } => *ty,
            },
        }
    }
}

/// A module-level storage slot, zero-initialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVar {
    pub name: Symbol,
    pub ty: SlotType,
}

/// Translation unit: the single owner of every function and global
#[derive(Debug)]
pub struct Module {
    pub name: String,
    interner: Interner,
    functions: IndexMap<Symbol, Function>,
    globals: Vec<GlobalVar>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interner: Interner::new(),
            functions: IndexMap::new(),
            globals: Vec::new(),
        }
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.interner.intern(name)
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    pub fn get_function(&self, name: Symbol) -> Option<&Function> {
        self.functions.get(&name)
    }

    /// Looks up a function by its source name
    pub fn function_named(&self, name: &str) -> Option<&Function> {
        self.interner
            .get(name)
            .and_then(|sym| self.functions.get(&sym))
    }

    /// Functions in declaration order
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Adds a body-less function to the module.
    ///
    /// # Errors
    /// Returns [`IrError::DuplicateFunction`] if the name is taken.
    pub fn declare_function(&mut self, name: Symbol, params: Vec<Symbol>) -> Result<(), IrError> {
        if self.functions.contains_key(&name) {
            return Err(IrError::DuplicateFunction {
                name: self.resolve(name).to_owned(),
            });
        }
        self.functions
            .insert(name, Function::declaration(name, params));
        Ok(())
    }

    /// Replaces a previously declared function with its finished body.
    ///
    /// # Errors
    /// Returns [`IrError::UndeclaredFunction`] if `function` was never declared.
    pub fn define_function(&mut self, function: Function) -> Result<(), IrError> {
        match self.functions.get_mut(&function.name) {
            Some(slot) => {
                *slot = function;
                Ok(())
            }
            None => Err(IrError::UndeclaredFunction {
                name: self.resolve(function.name).to_owned(),
            }),
        }
    }

    /// Erases a function, keeping the order of the others
    pub fn remove_function(&mut self, name: Symbol) -> Option<Function> {
        self.functions.shift_remove(&name)
    }

    /// Creates a zero-initialized global. Names are not required to be unique.
    pub fn add_global(&mut self, name: Symbol, ty: SlotType) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalVar { name, ty });
        id
    }

    /// The first global declared under `name`
    pub fn get_named_global(&self, name: Symbol) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|global| global.name == name)
            .map(|idx| GlobalId(idx as u32))
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVar {
        &self.globals[id.0 as usize]
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVar)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(idx, global)| (GlobalId(idx as u32), global))
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_consts_unique_by_value() {
        assert_eq!(Value::float(1.5), Value::float(1.5));
        assert_ne!(Value::float(0.0), Value::float(-0.0));
    }

    #[test]
    fn test_declare_twice_fails() {
        let mut module = Module::new("test");
        let name = module.intern("f");
        module.declare_function(name, Vec::new()).unwrap();
        let err = module.declare_function(name, Vec::new()).unwrap_err();
        assert_eq!(
            err,
            IrError::DuplicateFunction {
                name: "f".to_owned()
            }
        );
        assert_eq!(module.function_count(), 1);
    }

    #[test]
    fn test_remove_function_keeps_order() {
        let mut module = Module::new("test");
        for name in ["a", "b", "c"] {
            let sym = module.intern(name);
            module.declare_function(sym, Vec::new()).unwrap();
        }
        let b = module.intern("b");
        assert!(module.remove_function(b).is_some());
        let names: Vec<&str> = module
            .functions()
            .map(|function| module.resolve(function.name))
            .collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn test_named_global_is_first_declared() {
        let mut module = Module::new("test");
        let name = module.intern("g");
        let first = module.add_global(name, SlotType::Scalar);
        let second = module.add_global(name, SlotType::Array(3));
        assert_ne!(first, second);
        assert_eq!(module.get_named_global(name), Some(first));
        assert_eq!(module.global_count(), 2);
    }

    #[test]
    fn test_slot_type_display() {
        assert_eq!(SlotType::Scalar.to_string(), "double");
        assert_eq!(SlotType::Array(10).to_string(), "[10 x double]");
    }
}
