//! End-to-end lowering tests: build trees, lower them, then run the result

use expect_test::expect;
use kl_ast::build::*;
use kl_ast::{ForInit, Node, Operator};
use kl_interpreter::{Interpreter, RtValue};
use kl_ir::verify::verify_module;
use kl_lower::{LowerError, Session};
use kl_span::Span;
use std::cell::Cell;
use std::rc::Rc;

fn lower(items: Vec<Node>) -> Session {
    let mut session = Session::new("Kaleido", "test.k");
    session.lower_unit(&seq(items)).unwrap();
    verify_module(session.module()).unwrap();
    session
}

fn lower_err(items: Vec<Node>) -> (Session, LowerError) {
    let mut session = Session::new("Kaleido", "test.k");
    let err = session.lower_unit(&seq(items)).unwrap_err();
    (session, err)
}

fn run(session: &Session, name: &str, args: &[f64]) -> RtValue {
    Interpreter::new(session.module())
        .with_step_limit(100_000)
        .call(name, args)
        .unwrap()
}

fn add(lhs: Node, rhs: Node) -> Node {
    binary(Operator::Add, lhs, rhs)
}

fn lt(lhs: Node, rhs: Node) -> Node {
    binary(Operator::Lt, lhs, rhs)
}

/// `for var i = 0, i < bound, i = i + 1 in body`
fn count_up(bound: f64, body: Node) -> Node {
    for_loop(
        ForInit::Binding(bind("i", num(0.0))),
        lt(var("i"), num(bound)),
        assign("i", add(var("i"), num(1.0))),
        body,
    )
}

#[test]
fn test_simple_function_ir() {
    let session = lower(vec![def("inc", &["x"], add(var("x"), num(1.0)))]);
    expect![[r#"
        ; ModuleID = 'Kaleido'

        define double @inc(double %x) {
        entry:
          %x1 = alloca double
          store double %x, ptr %x1
          %x2 = load double, ptr %x1
          %addres = fadd double %x2, 1.000000e0
          ret double %addres
        }
    "#]]
    .assert_eq(&session.module().to_string());
}

#[test]
fn test_block_binding_is_not_visible_after_the_block() {
    let body = seq(vec![
        block(vec![bind("y", num(1.0))], vec![var("y")]),
        var("y"),
    ]);
    let (session, err) = lower_err(vec![def("f", &[], body)]);
    assert!(matches!(err, LowerError::UndefinedSymbol { ref name, .. } if name == "y"));
    assert_eq!(session.module().function_count(), 0);
}

#[test]
fn test_shadowing_is_reversible() {
    let inner = block(
        vec![bind("x", num(2.0))],
        vec![Node::Assignment(assign("inner", var("x")))],
    );
    let body = block(vec![bind("x", num(1.0))], vec![inner, var("x")]);
    let session = lower(vec![global("inner"), def("f", &[], body)]);

    let mut interp = Interpreter::new(session.module());
    assert_eq!(interp.call("f", &[]).unwrap(), RtValue::Float(1.0));
    assert_eq!(interp.global("inner"), Some(&[RtValue::Float(2.0)][..]));
}

#[test]
fn test_initializer_sees_outer_binding_and_restores_outermost() {
    // var x = 1 in { var x = x + 1, x = x * 10 in x } + x
    let inner = block(
        vec![
            bind("x", add(var("x"), num(1.0))),
            bind("x", binary(Operator::Mul, var("x"), num(10.0))),
        ],
        vec![var("x")],
    );
    let body = block(vec![bind("x", num(1.0))], vec![add(inner, var("x"))]);
    let session = lower(vec![def("f", &[], body)]);
    assert_eq!(run(&session, "f", &[]), RtValue::Float(21.0));
}

#[test]
fn test_conditional_selects_arm() {
    let session = lower(vec![def(
        "pick",
        &["c"],
        if_else(var("c"), num(10.0), num(20.0)),
    )]);
    assert_eq!(run(&session, "pick", &[1.0]), RtValue::Float(10.0));
    assert_eq!(run(&session, "pick", &[0.0]), RtValue::Float(20.0));
}

#[test]
fn test_nested_conditionals() {
    let body = if_else(
        lt(var("x"), num(0.0)),
        unary(Operator::Sub, num(1.0)),
        if_else(
            binary(Operator::Eq, var("x"), num(0.0)),
            num(0.0),
            num(1.0),
        ),
    );
    let session = lower(vec![def("sign", &["x"], body)]);
    assert_eq!(run(&session, "sign", &[-5.0]), RtValue::Float(-1.0));
    assert_eq!(run(&session, "sign", &[0.0]), RtValue::Float(0.0));
    assert_eq!(run(&session, "sign", &[3.0]), RtValue::Float(1.0));
}

#[test]
fn test_conditional_without_else_is_not_an_operand() {
    let body = add(if_then(var("x"), num(1.0)), num(1.0));
    let (session, err) = lower_err(vec![def("f", &["x"], body)]);
    assert!(matches!(err, LowerError::UndefinedOperand { .. }));
    assert_eq!(session.module().function_count(), 0);

    let session = lower(vec![def("g", &["x"], if_then(var("x"), num(1.0)))]);
    assert_eq!(run(&session, "g", &[1.0]), RtValue::Undef);
}

#[test]
fn test_counted_loop_runs_five_times_and_restores_binding() {
    let bump = Node::Assignment(assign("count", add(var("count"), num(1.0))));
    let body = block(vec![bind("i", num(100.0))], vec![count_up(5.0, bump), var("i")]);
    let session = lower(vec![global("count"), def("f", &[], body)]);

    let mut interp = Interpreter::new(session.module());
    assert_eq!(interp.call("f", &[]).unwrap(), RtValue::Float(100.0));
    assert_eq!(interp.global("count"), Some(&[RtValue::Float(5.0)][..]));
}

#[test]
fn test_loop_with_assignment_initializer_reuses_storage() {
    let looped = for_loop(
        ForInit::Assignment(assign("i", num(0.0))),
        lt(var("i"), num(3.0)),
        assign("i", add(var("i"), num(1.0))),
        num(0.0),
    );
    let body = block(vec![bind("i", num(42.0))], vec![looped, var("i")]);
    let session = lower(vec![def("f", &[], body)]);
    assert_eq!(run(&session, "f", &[]), RtValue::Float(3.0));
}

#[test]
fn test_arrays() {
    let sum = block(
        vec![
            bind_array("a", 3, vec![num(1.0), num(2.0), num(3.0)]),
            bind("s", num(0.0)),
        ],
        vec![
            count_up(
                3.0,
                Node::Assignment(assign("s", add(var("s"), slice("a", var("i"))))),
            ),
            var("s"),
        ],
    );
    let fill = count_up(
        4.0,
        Node::Assignment(assign_index(
            "table",
            var("i"),
            binary(Operator::Mul, var("i"), var("i")),
        )),
    );
    let session = lower(vec![
        global_array("table", 4),
        def("sum", &[], sum),
        def("fill", &[], fill),
        def("get", &["k"], slice("table", var("k"))),
    ]);

    assert_eq!(run(&session, "sum", &[]), RtValue::Float(6.0));

    let mut interp = Interpreter::new(session.module());
    assert_eq!(interp.call("fill", &[]).unwrap(), RtValue::Undef);
    assert_eq!(interp.call("get", &[3.0]).unwrap(), RtValue::Float(9.0));
    assert!(interp.call("get", &[4.0]).is_err());
}

#[test]
fn test_redefinition_leaves_function_count_unchanged() {
    let (session, err) = lower_err(vec![
        def("f", &["x"], var("x")),
        def("g", &[], num(1.0)),
        def("f", &[], num(2.0)),
    ]);
    assert!(matches!(err, LowerError::RedefinedFunction { ref name, .. } if name == "f"));
    assert_eq!(session.module().function_count(), 2);
}

#[test]
fn test_arity_checked_before_arguments() {
    let body = call("putd", vec![var("missing"), var("also_missing")]);
    let (session, err) = lower_err(vec![extern_fn("putd", &["x"]), def("f", &[], body)]);
    assert!(matches!(
        err,
        LowerError::ArityMismatch { ref name, expected: 1, got: 2, .. } if name == "putd"
    ));
    assert_eq!(session.module().function_count(), 1);
}

#[test]
fn test_calls_reach_host_functions() {
    let body = seq(vec![call("putd", vec![var("x")]), num(0.0)]);
    let session = lower(vec![extern_fn("putd", &["x"]), def("f", &["x"], body)]);

    let seen = Rc::new(Cell::new(0.0));
    let sink = Rc::clone(&seen);
    let mut interp = Interpreter::new(session.module());
    interp
        .register_host("putd", move |args| {
            sink.set(args[0]);
            args[0]
        })
        .unwrap();
    assert_eq!(interp.call("f", &[4.5]).unwrap(), RtValue::Float(0.0));
    assert!((seen.get() - 4.5).abs() < f64::EPSILON);
}

#[test]
fn test_lowering_is_deterministic() {
    let program = || {
        vec![
            global("count"),
            global_array("fibs", 10),
            extern_fn("putd", &["x"]),
            def(
                "fib",
                &["n"],
                block(
                    vec![bind("a", num(0.0)), bind("b", num(1.0)), bind_default("t")],
                    vec![
                        count_up(
                            10.0,
                            seq(vec![
                                Node::Assignment(assign_index("fibs", var("i"), var("a"))),
                                Node::Assignment(assign("t", add(var("a"), var("b")))),
                                Node::Assignment(assign("a", var("b"))),
                                Node::Assignment(assign("b", var("t"))),
                            ]),
                        ),
                        if_else(lt(var("n"), num(10.0)), slice("fibs", var("n")), var("a")),
                    ],
                ),
            ),
        ]
    };
    let first = lower(program());
    let second = lower(program());
    assert_eq!(first.module().to_string(), second.module().to_string());
    let (fib1, fib2) = (
        first.module().function_named("fib").unwrap(),
        second.module().function_named("fib").unwrap(),
    );
    assert_eq!(fib1.created_block_count(), fib2.created_block_count());
    assert_eq!(fib1.instruction_count(), fib2.instruction_count());
    assert_eq!(fib1.created_block_count(), fib1.layout().len());
    assert_eq!(run(&first, "fib", &[7.0]), RtValue::Float(13.0));
}

#[test]
fn test_incomplete_block_warns() {
    let body = at(
        block(vec![bind("x", num(1.0))], vec![count_up(2.0, num(0.0))]),
        Span::point(4, 2),
    );
    let session = lower(vec![def("f", &[], body)]);
    let warnings: Vec<String> = session
        .diagnostics()
        .warnings()
        .map(ToString::to_string)
        .collect();
    assert_eq!(warnings, ["test.k:4:2: incomplete block, treated as undefined"]);
}

#[test]
fn test_fatal_diagnostic_points_at_root_cause() {
    let body = at(
        block(vec![], vec![at(var("y"), Span::point(3, 7))]),
        Span::point(2, 1),
    );
    let (session, err) = lower_err(vec![def("f", &[], body)]);
    assert!(matches!(err, LowerError::InvalidSequence { .. }));
    let rendered: Vec<String> = session
        .diagnostics()
        .entries()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        rendered,
        ["test.k:3:7: Error: invalid sequence: undefined symbol `y`"]
    );
}
