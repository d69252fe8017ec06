//! IR interpreter
//!
//! Executes a lowered [`kl_ir::Module`] without a native backend. Used to
//! check the behaviour of lowered code in tests and by `klc --run`.

pub mod interpreter;
pub mod value;

pub use interpreter::{HostFn, Interpreter, InterpreterError};
pub use value::RtValue;
