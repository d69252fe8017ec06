//! Direct execution of lowered modules

use crate::value::{Address, Region, RtValue};
use kl_intern::Symbol;
use kl_ir::{
    BinaryOp, BlockId, CmpPredicate, Function, InstId, InstKind, Module, Terminator, Value,
};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

/// Errors that can occur during interpretation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpreterError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// An extern declaration was called but no host function backs it
    #[error("no host function registered for extern `{0}`")]
    MissingHost(String),

    #[error("function `{name}` takes {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("index {index} is out of bounds for a slot of {len} elements")]
    OutOfBounds { index: i64, len: usize },

    #[error("undefined value used in `{0}`")]
    UndefinedValue(&'static str),

    #[error("type mismatch in `{op}`: expected {expected}, got {got}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("call depth limit of {0} exceeded")]
    StackOverflow(usize),

    /// The module is malformed in a way the verifier would have rejected
    #[error("invalid IR: {0}")]
    InvalidIr(String),
}

/// A host function standing in for an extern declaration
pub type HostFn = Box<dyn Fn(&[f64]) -> f64>;

const DEFAULT_MAX_DEPTH: usize = 256;

/// Interpreter state for one module
pub struct Interpreter<'module> {
    module: &'module Module,
    globals: Vec<Vec<RtValue>>,
    /// Backing storage of every live `alloca`
    stack: Vec<Vec<RtValue>>,
    hosts: FxHashMap<Symbol, HostFn>,
    step_limit: Option<u64>,
    steps: u64,
    max_depth: usize,
    depth: usize,
}

impl<'module> Interpreter<'module> {
    /// Creates an interpreter with every global zeroed
    #[must_use]
    pub fn new(module: &'module Module) -> Self {
        let globals = module
            .globals()
            .map(|(_, global)| vec![RtValue::Float(0.0); global.ty.len() as usize])
            .collect();
        Self {
            module,
            globals,
            stack: Vec::new(),
            hosts: FxHashMap::default(),
            step_limit: None,
            steps: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    /// Caps the number of instructions a single [`call`](Self::call) may execute
    #[must_use]
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Caps how deep calls between defined functions may nest
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Backs the extern declaration `name` with a Rust closure.
    ///
    /// # Errors
    /// Returns [`InterpreterError::UnknownFunction`] unless `name` is declared
    /// in the module without a body.
    pub fn register_host(
        &mut self,
        name: &str,
        host: impl Fn(&[f64]) -> f64 + 'static,
    ) -> Result<(), InterpreterError> {
        let function = self
            .module
            .function_named(name)
            .filter(|function| function.is_declaration())
            .ok_or_else(|| InterpreterError::UnknownFunction(name.to_owned()))?;
        self.hosts.insert(function.name, Box::new(host));
        Ok(())
    }

    /// Current contents of the first global declared under `name`
    pub fn global(&self, name: &str) -> Option<&[RtValue]> {
        let sym = self.module.interner().get(name)?;
        let id = self.module.get_named_global(sym)?;
        self.globals.get(id.0 as usize).map(Vec::as_slice)
    }

    /// Calls a function of the module with numeric arguments.
    ///
    /// # Errors
    /// Returns an error if the function does not exist, the arguments do not
    /// match its arity, or execution fails.
    pub fn call(&mut self, name: &str, args: &[f64]) -> Result<RtValue, InterpreterError> {
        let function = self
            .module
            .function_named(name)
            .ok_or_else(|| InterpreterError::UnknownFunction(name.to_owned()))?;
        self.steps = 0;
        let args = args.iter().copied().map(RtValue::Float).collect();
        self.call_function(function, args)
    }

    fn call_function(
        &mut self,
        function: &'module Function,
        args: Vec<RtValue>,
    ) -> Result<RtValue, InterpreterError> {
        let name = self.module.resolve(function.name);
        if args.len() != function.arity() {
            return Err(InterpreterError::ArityMismatch {
                name: name.to_owned(),
                expected: function.arity(),
                got: args.len(),
            });
        }

        if function.is_declaration() {
            let host = self
                .hosts
                .get(&function.name)
                .ok_or_else(|| InterpreterError::MissingHost(name.to_owned()))?;
            let args: Vec<f64> = args
                .iter()
                .map(|arg| arg.as_float().unwrap_or(f64::NAN))
                .collect();
            return Ok(RtValue::Float(host(&args)));
        }

        if self.depth >= self.max_depth {
            return Err(InterpreterError::StackOverflow(self.max_depth));
        }
        trace!(function = name, "call");

        self.depth += 1;
        let base = self.stack.len();
        let result = self.run_body(function, &args);
        self.stack.truncate(base);
        self.depth -= 1;
        result
    }

    fn run_body(
        &mut self,
        function: &'module Function,
        args: &[RtValue],
    ) -> Result<RtValue, InterpreterError> {
        let mut frame = Frame {
            args,
            values: FxHashMap::default(),
        };
        let mut block = function
            .entry_block()
            .ok_or_else(|| InterpreterError::InvalidIr("function has no entry block".to_owned()))?;
        let mut prev: Option<BlockId> = None;

        loop {
            let data = function.block(block);

            // Phis read their operands before any of them is written.
            let phi_count = data
                .insts
                .iter()
                .take_while(|&&inst| matches!(function.inst(inst).kind, InstKind::Phi { .. }))
                .count();
            let mut joined = Vec::with_capacity(phi_count);
            for &inst in &data.insts[..phi_count] {
                self.step()?;
                let InstKind::Phi { incoming, .. } = &function.inst(inst).kind else {
                    continue;
                };
                let value = incoming
                    .iter()
                    .find(|(_, from)| Some(*from) == prev)
                    .map(|(value, _)| *value)
                    .ok_or_else(|| {
                        InterpreterError::InvalidIr(format!(
                            "phi in `{}` has no entry for its predecessor",
                            data.name
                        ))
                    })?;
                joined.push((inst, frame.operand(value)?));
            }
            frame.values.extend(joined);

            for &inst in &data.insts[phi_count..] {
                self.step()?;
                let value = self.execute(&frame, &function.inst(inst).kind)?;
                frame.values.insert(inst, value);
            }

            let terminator = data.terminator.ok_or_else(|| {
                InterpreterError::InvalidIr(format!("block `{}` has no terminator", data.name))
            })?;
            prev = Some(block);
            block = match terminator {
                Terminator::Br(dest) => dest,
                Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    let cond = frame.operand(cond)?;
                    if expect_bool(cond, "br")? {
                        then_dest
                    } else {
                        else_dest
                    }
                }
                Terminator::Ret(value) => return frame.operand(value),
            };
        }
    }

    fn execute(&mut self, frame: &Frame<'_>, kind: &InstKind) -> Result<RtValue, InterpreterError> {
        let value = match kind {
            InstKind::Alloca { ty } => {
                self.stack.push(vec![RtValue::Float(0.0); ty.len() as usize]);
                RtValue::Ptr(Address {
                    region: Region::Stack(self.stack.len() - 1),
                    offset: 0,
                })
            }
            InstKind::Load { ptr } => {
                let addr = expect_ptr(frame.operand(*ptr)?, "load")?;
                *self.cell(addr)?
            }
            InstKind::Store { value, ptr } => {
                let value = frame.operand(*value)?;
                let addr = expect_ptr(frame.operand(*ptr)?, "store")?;
                *self.cell(addr)? = value;
                RtValue::Undef
            }
            InstKind::Binary { op, lhs, rhs } => {
                let lhs = frame.operand(*lhs)?;
                let rhs = frame.operand(*rhs)?;
                eval_binary(*op, lhs, rhs)?
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let lhs = expect_float(frame.operand(*lhs)?, "fcmp")?;
                let rhs = expect_float(frame.operand(*rhs)?, "fcmp")?;
                let unordered = lhs.is_nan() || rhs.is_nan();
                RtValue::Bool(match pred {
                    CmpPredicate::Ult => unordered || lhs < rhs,
                    CmpPredicate::Ueq => unordered || lhs == rhs,
                    CmpPredicate::One => !unordered && lhs != rhs,
                })
            }
            InstKind::FNeg { operand } => {
                RtValue::Float(-expect_float(frame.operand(*operand)?, "fneg")?)
            }
            InstKind::Not { operand } => RtValue::Bool(!expect_bool(frame.operand(*operand)?, "not")?),
            InstKind::FpToSi { value } => {
                RtValue::Int(expect_float(frame.operand(*value)?, "fptosi")?.trunc() as i64)
            }
            InstKind::UiToFp { value } => {
                RtValue::Float(if expect_bool(frame.operand(*value)?, "uitofp")? {
                    1.0
                } else {
                    0.0
                })
            }
            InstKind::ElementPtr { base, index, .. } => {
                let addr = expect_ptr(frame.operand(*base)?, "getelementptr")?;
                let index = frame
                    .operand(*index)?
                    .as_int()
                    .ok_or(InterpreterError::TypeMismatch {
                        op: "getelementptr",
                        expected: "i64",
                        got: "non-integer",
                    })?;
                RtValue::Ptr(Address {
                    region: addr.region,
                    offset: addr.offset + index,
                })
            }
            InstKind::Call { callee, args } => {
                let function = self.module.get_function(*callee).ok_or_else(|| {
                    InterpreterError::UnknownFunction(self.module.resolve(*callee).to_owned())
                })?;
                let args = args
                    .iter()
                    .map(|&arg| frame.operand(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_function(function, args)?
            }
            InstKind::Phi { .. } => {
                return Err(InterpreterError::InvalidIr(
                    "phi after a non-phi instruction".to_owned(),
                ));
            }
        };
        Ok(value)
    }

    fn cell(&mut self, addr: Address) -> Result<&mut RtValue, InterpreterError> {
        let slot = match addr.region {
            Region::Global(id) => self.globals.get_mut(id.0 as usize),
            Region::Stack(idx) => self.stack.get_mut(idx),
        }
        .ok_or_else(|| InterpreterError::InvalidIr("dangling pointer".to_owned()))?;
        let len = slot.len();
        usize::try_from(addr.offset)
            .ok()
            .and_then(|offset| slot.get_mut(offset))
            .ok_or(InterpreterError::OutOfBounds {
                index: addr.offset,
                len,
            })
    }

    fn step(&mut self) -> Result<(), InterpreterError> {
        self.steps += 1;
        match self.step_limit {
            Some(limit) if self.steps > limit => Err(InterpreterError::StepLimit(limit)),
            _ => Ok(()),
        }
    }
}

/// SSA values of one activation
struct Frame<'args> {
    args: &'args [RtValue],
    values: FxHashMap<InstId, RtValue>,
}

impl Frame<'_> {
    fn operand(&self, value: Value) -> Result<RtValue, InterpreterError> {
        match value {
            Value::Float(constant) => Ok(RtValue::Float(constant.value())),
            Value::Int(constant) => Ok(RtValue::Int(constant)),
            Value::Undef => Ok(RtValue::Undef),
            Value::Param(idx) => self.args.get(idx as usize).copied().ok_or_else(|| {
                InterpreterError::InvalidIr(format!("parameter {idx} out of range"))
            }),
            Value::Inst(id) => self.values.get(&id).copied().ok_or_else(|| {
                InterpreterError::InvalidIr("value used before its definition".to_owned())
            }),
            Value::Global(id) => Ok(RtValue::Ptr(Address {
                region: Region::Global(id),
                offset: 0,
            })),
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: RtValue, rhs: RtValue) -> Result<RtValue, InterpreterError> {
    let name = match op {
        BinaryOp::FAdd => "fadd",
        BinaryOp::FSub => "fsub",
        BinaryOp::FMul => "fmul",
        BinaryOp::FDiv => "fdiv",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    };
    if let BinaryOp::And | BinaryOp::Or = op {
        let lhs = expect_bool(lhs, name)?;
        let rhs = expect_bool(rhs, name)?;
        return Ok(RtValue::Bool(if op == BinaryOp::And {
            lhs && rhs
        } else {
            lhs || rhs
        }));
    }

    let lhs = expect_float(lhs, name)?;
    let rhs = expect_float(rhs, name)?;
    Ok(RtValue::Float(match op {
        BinaryOp::FAdd => lhs + rhs,
        BinaryOp::FSub => lhs - rhs,
        BinaryOp::FMul => lhs * rhs,
        _ => lhs / rhs,
    }))
}

fn expect_float(value: RtValue, op: &'static str) -> Result<f64, InterpreterError> {
    match value {
        RtValue::Float(value) => Ok(value),
        RtValue::Undef => Err(InterpreterError::UndefinedValue(op)),
        other => Err(InterpreterError::TypeMismatch {
            op,
            expected: "double",
            got: other.kind(),
        }),
    }
}

fn expect_bool(value: RtValue, op: &'static str) -> Result<bool, InterpreterError> {
    match value {
        RtValue::Bool(value) => Ok(value),
        RtValue::Undef => Err(InterpreterError::UndefinedValue(op)),
        other => Err(InterpreterError::TypeMismatch {
            op,
            expected: "i1",
            got: other.kind(),
        }),
    }
}

fn expect_ptr(value: RtValue, op: &'static str) -> Result<Address, InterpreterError> {
    value.as_ptr().ok_or(InterpreterError::TypeMismatch {
        op,
        expected: "ptr",
        got: value.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{FunctionBuilder, SlotType, Type};

    /// `f(x) = x < 0 ? -x : x`, written directly against the builder
    fn abs_module() -> Module {
        let mut module = Module::new("test");
        let name = module.intern("abs");
        let x = module.intern("x");
        module.declare_function(name, vec![x]).unwrap();

        let mut fb = FunctionBuilder::new(name, vec![x]);
        let entry = fb.entry_block();
        let neg = fb.create_block("neg");
        let join = fb.create_block("join");
        let test = fb
            .build_fcmp(CmpPredicate::Ult, Value::Param(0), Value::float(0.0), "test")
            .unwrap();
        fb.build_cond_br(test, neg, join).unwrap();
        fb.insert_block(neg).unwrap();
        fb.position_at_end(neg);
        let negated = fb.build_fneg(Value::Param(0), "negated").unwrap();
        fb.build_br(join).unwrap();
        fb.insert_block(join).unwrap();
        fb.position_at_end(join);
        let result = fb
            .build_phi(
                Type::Double,
                vec![(Value::Param(0), entry), (negated, neg)],
                "result",
            )
            .unwrap();
        fb.build_ret(result).unwrap();
        module.define_function(fb.finish()).unwrap();
        module
    }

    #[test]
    fn test_phi_follows_predecessor() {
        let module = abs_module();
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("abs", &[-3.0]).unwrap(), RtValue::Float(3.0));
        assert_eq!(interp.call("abs", &[2.5]).unwrap(), RtValue::Float(2.5));
    }

    #[test]
    fn test_arity_checked() {
        let module = abs_module();
        let mut interp = Interpreter::new(&module);
        let err = interp.call("abs", &[]).unwrap_err();
        assert_eq!(
            err,
            InterpreterError::ArityMismatch {
                name: "abs".to_owned(),
                expected: 1,
                got: 0
            }
        );
    }

    #[test]
    fn test_out_of_bounds_store() {
        let mut module = Module::new("test");
        let name = module.intern("poke");
        module.declare_function(name, Vec::new()).unwrap();
        let mut fb = FunctionBuilder::new(name, Vec::new());
        let ty = SlotType::Array(2);
        let slot = fb.build_entry_alloca(ty, "v");
        let ptr = fb
            .build_element_ptr(slot, ty, Value::Int(2), "elemaddr")
            .unwrap();
        fb.build_store(Value::float(1.0), ptr).unwrap();
        fb.build_ret(Value::float(0.0)).unwrap();
        module.define_function(fb.finish()).unwrap();

        let mut interp = Interpreter::new(&module);
        let err = interp.call("poke", &[]).unwrap_err();
        assert_eq!(err, InterpreterError::OutOfBounds { index: 2, len: 2 });
    }

    #[test]
    fn test_host_functions() {
        let mut module = Module::new("test");
        let putd = module.intern("twice");
        let x = module.intern("x");
        module.declare_function(putd, vec![x]).unwrap();

        let mut interp = Interpreter::new(&module);
        let err = interp.call("twice", &[1.0]).unwrap_err();
        assert_eq!(err, InterpreterError::MissingHost("twice".to_owned()));

        interp.register_host("twice", |args| args[0] * 2.0).unwrap();
        assert_eq!(interp.call("twice", &[4.0]).unwrap(), RtValue::Float(8.0));
        assert!(interp.register_host("nope", |_| 0.0).is_err());
    }

    #[test]
    fn test_step_limit_stops_infinite_loop() {
        let mut module = Module::new("test");
        let name = module.intern("spin");
        module.declare_function(name, Vec::new()).unwrap();
        let mut fb = FunctionBuilder::new(name, Vec::new());
        let head = fb.append_block("head");
        fb.build_br(head).unwrap();
        fb.position_at_end(head);
        fb.build_fneg(Value::float(1.0), "busy").unwrap();
        fb.build_br(head).unwrap();
        module.define_function(fb.finish()).unwrap();

        let mut interp = Interpreter::new(&module).with_step_limit(100);
        assert_eq!(
            interp.call("spin", &[]).unwrap_err(),
            InterpreterError::StepLimit(100)
        );
    }

    #[test]
    fn test_runaway_recursion_hits_depth_limit() {
        let mut module = Module::new("test");
        let name = module.intern("forever");
        module.declare_function(name, Vec::new()).unwrap();
        let mut fb = FunctionBuilder::new(name, Vec::new());
        let again = fb.build_call(name, Vec::new(), "again").unwrap();
        fb.build_ret(again).unwrap();
        module.define_function(fb.finish()).unwrap();

        let mut interp = Interpreter::new(&module).with_max_depth(8);
        assert_eq!(
            interp.call("forever", &[]).unwrap_err(),
            InterpreterError::StackOverflow(8)
        );
    }
}
