//! Structural checks on finished functions

use crate::{Function, InstKind, Module};
use thiserror::Error;

/// A structural defect in a function body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("in function `{function}`: block `{block}` has no terminator")]
    Unterminated { function: String, block: String },

    #[error("in function `{function}`: block `{block}` branches to `{target}`, which is not inserted")]
    DetachedSuccessor {
        function: String,
        block: String,
        target: String,
    },

    #[error("in function `{function}`: phi in block `{block}` follows a non-phi instruction")]
    PhiNotAtTop { function: String, block: String },

    #[error(
        "in function `{function}`: phi in block `{block}` has {found} incoming values for {expected} predecessors"
    )]
    PhiIncomingMismatch {
        function: String,
        block: String,
        expected: usize,
        found: usize,
    },

    #[error("in function `{function}`: call to unknown function `{callee}`")]
    UnknownCallee { function: String, callee: String },

    #[error("in function `{function}`: call to `{callee}` passes {found} arguments, expected {expected}")]
    CallArity {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
}

/// Checks that every inserted block is terminated and only branches to
/// inserted blocks, that phis sit at the top of their block with one entry
/// per predecessor, and that calls name known functions with the right
/// number of arguments.
///
/// # Errors
/// Returns the first defect found, in layout order.
pub fn verify_function(module: &Module, function: &Function) -> Result<(), VerifyError> {
    let function_name = || module.resolve(function.name).to_owned();

    for &block in function.layout() {
        let data = function.block(block);
        let Some(terminator) = data.terminator else {
            return Err(VerifyError::Unterminated {
                function: function_name(),
                block: data.name.clone(),
            });
        };

        for target in terminator.successors() {
            if !function.is_inserted(target) {
                return Err(VerifyError::DetachedSuccessor {
                    function: function_name(),
                    block: data.name.clone(),
                    target: function.block(target).name.clone(),
                });
            }
        }

        let mut seen_non_phi = false;
        for &inst in &data.insts {
            match &function.inst(inst).kind {
                InstKind::Phi { incoming, .. } => {
                    if seen_non_phi {
                        return Err(VerifyError::PhiNotAtTop {
                            function: function_name(),
                            block: data.name.clone(),
                        });
                    }
                    let preds = function.predecessors(block);
                    let matches = incoming.len() == preds.len()
                        && preds
                            .iter()
                            .all(|pred| incoming.iter().any(|(_, from)| from == pred));
                    if !matches {
                        return Err(VerifyError::PhiIncomingMismatch {
                            function: function_name(),
                            block: data.name.clone(),
                            expected: preds.len(),
                            found: incoming.len(),
                        });
                    }
                }
                InstKind::Call { callee, args } => {
                    seen_non_phi = true;
                    let Some(target) = module.get_function(*callee) else {
                        return Err(VerifyError::UnknownCallee {
                            function: function_name(),
                            callee: module.resolve(*callee).to_owned(),
                        });
                    };
                    if target.arity() != args.len() {
                        return Err(VerifyError::CallArity {
                            function: function_name(),
                            callee: module.resolve(*callee).to_owned(),
                            expected: target.arity(),
                            found: args.len(),
                        });
                    }
                }
                _ => seen_non_phi = true,
            }
        }
    }
    Ok(())
}

/// Verifies every defined function of the module
///
/// # Errors
/// Returns the first defect found, in function order.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    module
        .functions()
        .filter(|function| !function.is_declaration())
        .try_for_each(|function| verify_function(module, function))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionBuilder, Type, Value};

    fn setup(module: &mut Module) -> FunctionBuilder {
        let name = module.intern("f");
        module.declare_function(name, Vec::new()).unwrap();
        FunctionBuilder::new(name, Vec::new())
    }

    #[test]
    fn test_unterminated_block() {
        let mut module = Module::new("test");
        let fb = setup(&mut module);
        let err = verify_function(&module, fb.function()).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Unterminated {
                function: "f".to_owned(),
                block: "entry".to_owned()
            }
        );
    }

    #[test]
    fn test_branch_to_detached_block() {
        let mut module = Module::new("test");
        let mut fb = setup(&mut module);
        let exit = fb.create_block("exit");
        fb.build_br(exit).unwrap();
        let err = verify_function(&module, fb.function()).unwrap_err();
        assert!(matches!(err, VerifyError::DetachedSuccessor { target, .. } if target == "exit"));

        fb.insert_block(exit).unwrap();
        fb.position_at_end(exit);
        fb.build_ret(Value::float(0.0)).unwrap();
        assert_eq!(verify_function(&module, fb.function()), Ok(()));
    }

    #[test]
    fn test_phi_needs_one_entry_per_predecessor() {
        let mut module = Module::new("test");
        let mut fb = setup(&mut module);
        let entry = fb.entry_block();
        let join = fb.append_block("join");
        fb.build_br(join).unwrap();
        fb.position_at_end(join);
        let phi = fb
            .build_phi(
                Type::Double,
                vec![(Value::float(1.0), entry), (Value::float(2.0), entry)],
                "bad",
            )
            .unwrap();
        fb.build_ret(phi).unwrap();

        let err = verify_function(&module, fb.function()).unwrap_err();
        assert_eq!(
            err,
            VerifyError::PhiIncomingMismatch {
                function: "f".to_owned(),
                block: "join".to_owned(),
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_call_arity_checked() {
        let mut module = Module::new("test");
        let g = module.intern("g");
        let x = module.intern("x");
        module.declare_function(g, vec![x]).unwrap();
        let mut fb = setup(&mut module);
        let call = fb.build_call(g, Vec::new(), "calltmp").unwrap();
        fb.build_ret(call).unwrap();
        module.define_function(fb.finish()).unwrap();

        let err = verify_module(&module).unwrap_err();
        assert_eq!(
            err,
            VerifyError::CallArity {
                function: "f".to_owned(),
                callee: "g".to_owned(),
                expected: 1,
                found: 0
            }
        );
    }
}
