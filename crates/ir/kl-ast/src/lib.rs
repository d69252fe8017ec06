//! Abstract syntax tree consumed by the lowering engine
//!
//! The front end hands over a single root [`Node`]. Every variant owns its
//! children; names (variables, callees) are plain strings resolved later
//! against the session's tables. The tree derives `serde` so a front end in
//! another process can ship it as JSON.

pub mod build;

use derive_more::Display;
use kl_span::Span;
use serde::{Deserialize, Serialize};

/// A syntax tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// `first; rest`
    Sequence(Sequence),
    /// Numeric literal
    Number(NumberLiteral),
    /// Reference to a scalar binding
    Variable(VariableRef),
    /// `name[index]`
    ArraySlice(ArraySlice),
    /// `lhs op rhs`
    Binary(BinaryExpr),
    /// `op operand`
    Unary(UnaryExpr),
    /// `callee(args...)`
    Call(CallExpr),
    /// `if cond then a else b`
    Conditional(Conditional),
    /// `{ var bindings; body }`
    Block(BlockExpr),
    /// A single `var` binding
    VarBinding(VarBinding),
    /// `extern name(params...)`
    Prototype(Prototype),
    /// `def name(params...) body`
    Function(FunctionDef),
    /// `global name` or `global name[size]`
    GlobalVar(GlobalVarDecl),
    /// `name = value` or `name[index] = value`
    Assignment(Assignment),
    /// `for init, cond, step { body }`
    For(ForLoop),
}

/// Literal payload carried by a node, used in diagnostics and name lookups
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LexVal<'ast> {
    /// A numeric constant
    Number(f64),
    /// An identifier
    Name(&'ast str),
}

impl Node {
    /// The node's literal payload, if it has one
    pub fn lex_val(&self) -> Option<LexVal<'_>> {
        match self {
            Self::Number(lit) => Some(LexVal::Number(lit.value)),
            Self::Variable(var) => Some(LexVal::Name(&var.name)),
            Self::ArraySlice(slice) => Some(LexVal::Name(&slice.name)),
            Self::Call(call) => Some(LexVal::Name(&call.callee)),
            Self::VarBinding(binding) => Some(LexVal::Name(&binding.name)),
            Self::Prototype(proto) => Some(LexVal::Name(&proto.name)),
            Self::Function(def) => Some(LexVal::Name(&def.proto.name)),
            Self::GlobalVar(global) => Some(LexVal::Name(&global.name)),
            Self::Assignment(assign) => Some(LexVal::Name(&assign.name)),
            Self::Sequence(_)
            | Self::Binary(_)
            | Self::Unary(_)
            | Self::Conditional(_)
            | Self::Block(_)
            | Self::For(_) => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Sequence(node) => node.span,
            Self::Number(node) => node.span,
            Self::Variable(node) => node.span,
            Self::ArraySlice(node) => node.span,
            Self::Binary(node) => node.span,
            Self::Unary(node) => node.span,
            Self::Call(node) => node.span,
            Self::Conditional(node) => node.span,
            Self::Block(node) => node.span,
            Self::VarBinding(node) => node.span,
            Self::Prototype(node) => node.span,
            Self::Function(node) => node.span,
            Self::GlobalVar(node) => node.span,
            Self::Assignment(node) => node.span,
            Self::For(node) => node.span,
        }
    }

    /// Short name of the variant, for traces and diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::Number(_) => "number",
            Self::Variable(_) => "variable",
            Self::ArraySlice(_) => "array slice",
            Self::Binary(_) => "binary expression",
            Self::Unary(_) => "unary expression",
            Self::Call(_) => "call",
            Self::Conditional(_) => "conditional",
            Self::Block(_) => "block",
            Self::VarBinding(_) => "variable binding",
            Self::Prototype(_) => "prototype",
            Self::Function(_) => "function definition",
            Self::GlobalVar(_) => "global declaration",
            Self::Assignment(_) => "assignment",
            Self::For(_) => "for loop",
        }
    }
}

/// Chain of nodes evaluated in order; the value is the last one's
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub first: Box<Node>,
    /// The remainder of the chain, usually another `Sequence`
    pub rest: Option<Box<Node>>,
    #[serde(default)]
    pub span: Span,
}

impl Sequence {
    /// Folds `nodes` into a right-nested chain. Returns `None` for an empty list.
    pub fn from_nodes(nodes: Vec<Node>) -> Option<Node> {
        nodes.into_iter().rev().fold(None, |rest, first| {
            let span = match &rest {
                Some(rest) => first.span().merge(rest.span()),
                None => first.span(),
            };
            Some(Node::Sequence(Self {
                first: Box::new(first),
                rest: rest.map(Box::new),
                span,
            }))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberLiteral {
    pub value: f64,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRef {
    pub name: String,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySlice {
    /// Array binding being indexed
    pub name: String,
    /// Element index; truncated toward zero when lowered
    pub index: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

/// Operator tokens as produced by the front end.
///
/// The same token may be legal in one position and not the other: `-` is both
/// binary subtraction and unary negation, `!` is only ever unary.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    #[display("+")]
    Add,
    #[serde(rename = "-")]
    #[display("-")]
    Sub,
    #[serde(rename = "*")]
    #[display("*")]
    Mul,
    #[serde(rename = "/")]
    #[display("/")]
    Div,
    #[serde(rename = "<")]
    #[display("<")]
    Lt,
    #[serde(rename = ">")]
    #[display(">")]
    Gt,
    #[serde(rename = "=")]
    #[display("=")]
    Eq,
    #[serde(rename = "!")]
    #[display("!")]
    Not,
    #[serde(rename = "&")]
    #[display("&")]
    And,
    #[serde(rename = "|")]
    #[display("|")]
    Or,
}

impl Operator {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        Some(match symbol {
            '+' => Self::Add,
            '-' => Self::Sub,
            '*' => Self::Mul,
            '/' => Self::Div,
            '<' => Self::Lt,
            '>' => Self::Gt,
            '=' => Self::Eq,
            '!' => Self::Not,
            '&' => Self::And,
            '|' => Self::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: Operator,
    pub lhs: Box<Node>,
    pub rhs: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: Operator,
    pub operand: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    /// Function name, looked up in the function namespace
    pub callee: String,
    pub args: Vec<Node>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub cond: Box<Node>,
    pub then_branch: Box<Node>,
    /// Without an else-branch the conditional does not produce a usable value
    pub else_branch: Option<Box<Node>>,
    #[serde(default)]
    pub span: Span,
}

/// Block expression introducing local bindings visible only in `body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockExpr {
    pub bindings: Vec<VarBinding>,
    pub body: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarBinding {
    pub name: String,
    pub init: Initializer,
    #[serde(default)]
    pub span: Span,
}

/// Right-hand side of a `var` binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Initializer {
    /// Scalar binding; `None` means zero
    Scalar {
        value: Option<Box<Node>>,
    },
    /// Fixed-size array, optionally filled from the front with `elements`
    Array {
        size: u32,
        #[serde(default)]
        elements: Vec<Node>,
    },
}

/// Function signature; every parameter and the result are numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub proto: Prototype,
    pub body: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVarDecl {
    pub name: String,
    /// Element count for array globals
    pub size: Option<u32>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    /// Present when assigning a single array element
    pub index: Option<Box<Node>>,
    pub value: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

/// Loop-control initializer of a `for`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForInit {
    /// `var i = ...`: a fresh binding shadowing `i` for the loop
    Binding(VarBinding),
    /// `i = ...`: reuses whatever `i` already resolves to
    Assignment(Assignment),
}

impl ForInit {
    pub fn name(&self) -> &str {
        match self {
            Self::Binding(binding) => &binding.name,
            Self::Assignment(assign) => &assign.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub init: ForInit,
    pub cond: Box<Node>,
    pub step: Assignment,
    pub body: Box<Node>,
    #[serde(default)]
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::*;

    #[test]
    fn test_lex_val() {
        assert_eq!(num(2.5).lex_val(), Some(LexVal::Number(2.5)));
        assert_eq!(var("x").lex_val(), Some(LexVal::Name("x")));
        assert_eq!(call("f", vec![]).lex_val(), Some(LexVal::Name("f")));
        assert_eq!(binary(Operator::Add, num(1.0), num(2.0)).lex_val(), None);
    }

    #[test]
    fn test_sequence_from_nodes_nests_right() {
        let chain = Sequence::from_nodes(vec![num(1.0), num(2.0), num(3.0)]).unwrap();
        let Node::Sequence(outer) = chain else {
            panic!("expected a sequence");
        };
        assert_eq!(*outer.first, num(1.0));
        let Some(rest) = outer.rest else {
            panic!("expected a continuation");
        };
        let Node::Sequence(inner) = *rest else {
            panic!("expected a nested sequence");
        };
        assert_eq!(*inner.first, num(2.0));
        assert!(Sequence::from_nodes(Vec::new()).is_none());
    }

    #[test]
    fn test_operator_symbols_round_trip() {
        for symbol in ['+', '-', '*', '/', '<', '>', '=', '!', '&', '|'] {
            let op = Operator::from_symbol(symbol).unwrap();
            assert_eq!(op.to_string(), symbol.to_string());
        }
        assert_eq!(Operator::from_symbol('%'), None);
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "kind": "binary",
            "op": "<",
            "lhs": { "kind": "variable", "name": "i" },
            "rhs": { "kind": "number", "value": 5.0 }
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node, binary(Operator::Lt, var("i"), num(5.0)));
    }
}
