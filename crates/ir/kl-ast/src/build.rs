//! Terse constructors for assembling trees by hand.
//!
//! Nodes built here carry default spans; use [`at`] to relocate one.

use crate::{
    ArraySlice, Assignment, BinaryExpr, BlockExpr, CallExpr, Conditional, ForInit, ForLoop,
    FunctionDef, GlobalVarDecl, Initializer, Node, NumberLiteral, Operator, Prototype, Sequence,
    UnaryExpr, VarBinding, VariableRef,
};
use kl_span::Span;

pub fn num(value: f64) -> Node {
    Node::Number(NumberLiteral {
        value,
        span: Span::default(),
    })
}

pub fn var(name: &str) -> Node {
    Node::Variable(VariableRef {
        name: name.to_owned(),
        span: Span::default(),
    })
}

pub fn slice(name: &str, index: Node) -> Node {
    Node::ArraySlice(ArraySlice {
        name: name.to_owned(),
        index: Box::new(index),
        span: Span::default(),
    })
}

pub fn binary(op: Operator, lhs: Node, rhs: Node) -> Node {
    Node::Binary(BinaryExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span: Span::default(),
    })
}

pub fn unary(op: Operator, operand: Node) -> Node {
    Node::Unary(UnaryExpr {
        op,
        operand: Box::new(operand),
        span: Span::default(),
    })
}

pub fn call(callee: &str, args: Vec<Node>) -> Node {
    Node::Call(CallExpr {
        callee: callee.to_owned(),
        args,
        span: Span::default(),
    })
}

pub fn if_then(cond: Node, then_branch: Node) -> Node {
    Node::Conditional(Conditional {
        cond: Box::new(cond),
        then_branch: Box::new(then_branch),
        else_branch: None,
        span: Span::default(),
    })
}

pub fn if_else(cond: Node, then_branch: Node, else_branch: Node) -> Node {
    Node::Conditional(Conditional {
        cond: Box::new(cond),
        then_branch: Box::new(then_branch),
        else_branch: Some(Box::new(else_branch)),
        span: Span::default(),
    })
}

/// `{ bindings; body... }`. An empty body is replaced by the literal `0`.
pub fn block(bindings: Vec<VarBinding>, body: Vec<Node>) -> Node {
    Node::Block(BlockExpr {
        bindings,
        body: Box::new(seq(body)),
        span: Span::default(),
    })
}

/// Chains `nodes` into a [`Sequence`]. An empty list becomes the literal `0`.
pub fn seq(nodes: Vec<Node>) -> Node {
    Sequence::from_nodes(nodes).unwrap_or_else(|| num(0.0))
}

pub fn bind(name: &str, value: Node) -> VarBinding {
    VarBinding {
        name: name.to_owned(),
        init: Initializer::Scalar {
            value: Some(Box::new(value)),
        },
        span: Span::default(),
    }
}

/// `var name` with no initializer
pub fn bind_default(name: &str) -> VarBinding {
    VarBinding {
        name: name.to_owned(),
        init: Initializer::Scalar { value: None },
        span: Span::default(),
    }
}

pub fn bind_array(name: &str, size: u32, elements: Vec<Node>) -> VarBinding {
    VarBinding {
        name: name.to_owned(),
        init: Initializer::Array { size, elements },
        span: Span::default(),
    }
}

pub fn assign(name: &str, value: Node) -> Assignment {
    Assignment {
        name: name.to_owned(),
        index: None,
        value: Box::new(value),
        span: Span::default(),
    }
}

pub fn assign_index(name: &str, index: Node, value: Node) -> Assignment {
    Assignment {
        name: name.to_owned(),
        index: Some(Box::new(index)),
        value: Box::new(value),
        span: Span::default(),
    }
}

pub fn global(name: &str) -> Node {
    Node::GlobalVar(GlobalVarDecl {
        name: name.to_owned(),
        size: None,
        span: Span::default(),
    })
}

pub fn global_array(name: &str, size: u32) -> Node {
    Node::GlobalVar(GlobalVarDecl {
        name: name.to_owned(),
        size: Some(size),
        span: Span::default(),
    })
}

pub fn proto(name: &str, params: &[&str]) -> Prototype {
    Prototype {
        name: name.to_owned(),
        params: params.iter().map(|param| (*param).to_owned()).collect(),
        span: Span::default(),
    }
}

pub fn extern_fn(name: &str, params: &[&str]) -> Node {
    Node::Prototype(proto(name, params))
}

pub fn def(name: &str, params: &[&str], body: Node) -> Node {
    Node::Function(FunctionDef {
        proto: proto(name, params),
        body: Box::new(body),
        span: Span::default(),
    })
}

pub fn for_loop(init: ForInit, cond: Node, step: Assignment, body: Node) -> Node {
    Node::For(ForLoop {
        init,
        cond: Box::new(cond),
        step,
        body: Box::new(body),
        span: Span::default(),
    })
}

/// Replaces the span of a node's top level
pub fn at(mut node: Node, span: Span) -> Node {
    match &mut node {
        Node::Sequence(inner) => inner.span = span,
        Node::Number(inner) => inner.span = span,
        Node::Variable(inner) => inner.span = span,
        Node::ArraySlice(inner) => inner.span = span,
        Node::Binary(inner) => inner.span = span,
        Node::Unary(inner) => inner.span = span,
        Node::Call(inner) => inner.span = span,
        Node::Conditional(inner) => inner.span = span,
        Node::Block(inner) => inner.span = span,
        Node::VarBinding(inner) => inner.span = span,
        Node::Prototype(inner) => inner.span = span,
        Node::Function(inner) => inner.span = span,
        Node::GlobalVar(inner) => inner.span = span,
        Node::Assignment(inner) => inner.span = span,
        Node::For(inner) => inner.span = span,
    }
    node
}
