//! Lowering failures

use derive_more::Display;
use kl_ast::Operator;
use kl_ir::IrError;
use kl_span::Span;
use miette::Diagnostic;
use std::error::Error as StdError;
use thiserror::Error;

/// Section of a counted loop that failed to lower
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum LoopPart {
    #[display("initializer")]
    Init,
    #[display("condition")]
    Condition,
    #[display("body")]
    Body,
    #[display("step")]
    Step,
}

/// A fatal lowering error. Every variant carries the span of the node that
/// raised it.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum LowerError {
    /// Identifier bound neither locally nor globally
    #[error("undefined symbol `{name}`")]
    #[diagnostic(
        code(lower::undefined_symbol),
        help("bind it with `var`, as a parameter, or declare it as a global first")
    )]
    UndefinedSymbol { name: String, span: Span },

    /// Call to a name absent from the function namespace
    #[error("undefined function `{name}`")]
    #[diagnostic(
        code(lower::undefined_function),
        help("define the function, or declare it with `extern`, before calling it")
    )]
    UndefinedFunction { name: String, span: Span },

    /// Call with the wrong number of arguments
    #[error("function `{name}` takes {expected} arguments but {got} were supplied")]
    #[diagnostic(code(lower::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    /// Operator used in a position it has no meaning in
    #[error("operator `{op}` is not supported in {position} position")]
    #[diagnostic(code(lower::unsupported_operator))]
    UnsupportedOperator {
        op: Operator,
        position: &'static str,
        span: Span,
    },

    /// Function or extern declared under a name already in use
    #[error("function `{name}` is already defined")]
    #[diagnostic(code(lower::redefined_function))]
    RedefinedFunction { name: String, span: Span },

    /// Failure inside the body of a block
    #[error("invalid sequence")]
    #[diagnostic(code(lower::invalid_sequence))]
    InvalidSequence {
        span: Span,
        #[source]
        cause: Box<LowerError>,
    },

    /// Indexed access to a scalar
    #[error("`{name}` is not an array")]
    #[diagnostic(code(lower::not_an_array))]
    NotAnArray { name: String, span: Span },

    /// Array named without an index
    #[error("array `{name}` cannot be used as a scalar")]
    #[diagnostic(code(lower::array_as_scalar), help("select an element with `{name}[index]`"))]
    ArrayAsScalar { name: String, span: Span },

    /// Array initializer list longer than the declared size
    #[error("array `{name}` has {size} elements but {len} initializers were given")]
    #[diagnostic(code(lower::initializer_too_long))]
    InitializerTooLong {
        name: String,
        size: u32,
        len: usize,
        span: Span,
    },

    /// Undefined value used where a number or truth value is required
    #[error("undefined value used as an operand")]
    #[diagnostic(
        code(lower::undefined_operand),
        help("an `if` without `else`, a `for` loop and an incomplete block have no value")
    )]
    UndefinedOperand { span: Span },

    /// Code that needs a function body appeared at the top level
    #[error("{kind} is only allowed inside a function")]
    #[diagnostic(code(lower::outside_function))]
    OutsideFunction { kind: &'static str, span: Span },

    /// Item or binding used where a value is expected
    #[error("{kind} does not produce a value")]
    #[diagnostic(code(lower::not_a_value))]
    NotAValue { kind: &'static str, span: Span },

    /// Failure in one part of a `for` loop
    #[error("could not lower loop {part}")]
    #[diagnostic(code(lower::loop_lowering))]
    LoopLowering {
        part: LoopPart,
        span: Span,
        #[source]
        cause: Box<LowerError>,
    },

    /// The backend rejected an instruction or a finished function
    #[error("invalid IR")]
    #[diagnostic(code(lower::ir))]
    Ir {
        span: Span,
        #[source]
        source: IrError,
    },
}

impl LowerError {
    /// Span of the node that raised this error
    pub fn span(&self) -> Span {
        match self {
            Self::UndefinedSymbol { span, .. }
            | Self::UndefinedFunction { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::UnsupportedOperator { span, .. }
            | Self::RedefinedFunction { span, .. }
            | Self::InvalidSequence { span, .. }
            | Self::NotAnArray { span, .. }
            | Self::ArrayAsScalar { span, .. }
            | Self::InitializerTooLong { span, .. }
            | Self::UndefinedOperand { span }
            | Self::OutsideFunction { span, .. }
            | Self::NotAValue { span, .. }
            | Self::LoopLowering { span, .. }
            | Self::Ir { span, .. } => *span,
        }
    }

    /// The innermost lowering error, looking through sequence and loop wrappers
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::InvalidSequence { cause, .. } | Self::LoopLowering { cause, .. } => {
                cause.root_cause()
            }
            _ => self,
        }
    }

    /// Message of this error followed by the messages of its causes
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = StdError::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = StdError::source(cause);
        }
        message
    }

    pub(crate) fn ir(span: Span) -> impl FnOnce(IrError) -> Self {
        move |source| Self::Ir { span, source }
    }

    pub(crate) fn in_loop(part: LoopPart, span: Span) -> impl FnOnce(Self) -> Self {
        move |cause| Self::LoopLowering {
            part,
            span,
            cause: Box::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_message_and_root_cause() {
        let inner = LowerError::UndefinedSymbol {
            name: "y".to_owned(),
            span: Span::point(4, 9),
        };
        let err = LowerError::InvalidSequence {
            span: Span::point(2, 1),
            cause: Box::new(LowerError::in_loop(LoopPart::Body, Span::point(3, 5))(inner)),
        };
        assert_eq!(
            err.chain_message(),
            "invalid sequence: could not lower loop body: undefined symbol `y`"
        );
        assert_eq!(err.root_cause().span(), Span::point(4, 9));
        assert_eq!(err.span(), Span::point(2, 1));
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = LowerError::UndefinedOperand {
            span: Span::default(),
        };
        let code = err.code().map(|code| code.to_string());
        assert_eq!(code.as_deref(), Some("lower::undefined_operand"));
    }
}
