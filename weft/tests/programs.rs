//! End-to-end programs, each run with and without compiler optimizations.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use weft::{
    BinOp, Error, ExceptionKind, Instance, InstanceCreateInfo, NativeFn, NativeResult, Node,
    UnOp, Value,
};

fn instance(optimize: bool) -> Instance {
    Instance::new(
        InstanceCreateInfo {
            optimize,
            ..InstanceCreateInfo::default()
        }
        .with_defaults(),
    )
    .unwrap()
}

/// Evaluates `unit` in both modes and checks both agree, error messages
/// included.
fn run(unit: &Node) -> Result<Value, String> {
    let outcome = |optimize| {
        let instance = instance(optimize);
        let result = instance.evaluate(unit).map_err(|e| e.to_string());
        instance.wait_for_no_activity();
        result
    };
    let fast = outcome(true);
    let slow = outcome(false);
    assert_eq!(fast, slow, "optimized and unoptimized runs disagree");
    fast
}

fn add(lhs: Node, rhs: Node) -> Node {
    Node::binary(BinOp::Add, lhs, rhs)
}

fn sub(lhs: Node, rhs: Node) -> Node {
    Node::binary(BinOp::Sub, lhs, rhs)
}

fn fib_decl() -> Node {
    Node::fn_decl(
        "fib",
        &["n"],
        Node::block(vec![
            Node::if_else(
                Node::binary(BinOp::Lt, Node::ident("n"), Node::num(2.0)),
                Node::block(vec![Node::ret(Node::ident("n"))]),
                None,
            ),
            Node::ret(add(
                Node::call_named("fib", vec![sub(Node::ident("n"), Node::num(1.0))]),
                Node::call_named("fib", vec![sub(Node::ident("n"), Node::num(2.0))]),
            )),
        ]),
    )
}

#[test]
fn fib_of_ten_is_fifty_five() {
    let unit = Node::block(vec![fib_decl(), Node::call_named("fib", vec![Node::num(10.0)])]);
    assert_eq!(run(&unit), Ok(Value::float(55.0)));
}

#[test]
fn fib_through_a_variable_takes_the_dynamic_path() {
    let unit = Node::block(vec![
        fib_decl(),
        Node::declare("f", Node::ident("fib")),
        Node::call_named("f", vec![Node::num(10.0)]),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(55.0)));
}

#[test]
fn main_entry_points() {
    for (body, expected) in [
        (
            add(Node::binary(BinOp::Mul, Node::num(6.0), Node::num(2.0)), Node::num(1.0)),
            13.0,
        ),
        (
            Node::binary(
                BinOp::Mul,
                add(Node::num(2.0), Node::num(3.0)),
                sub(Node::num(5.0), Node::num(2.0)),
            ),
            15.0,
        ),
    ] {
        for optimize in [true, false] {
            let instance = instance(optimize);
            let main = Node::fn_decl("main", &[], Node::block(vec![Node::ret(body.clone())]));
            instance.evaluate(&main).unwrap();
            assert_eq!(instance.call_main(Vec::new()).unwrap(), Value::float(expected));
        }
    }
}

#[test]
fn missing_main_is_reported() {
    let instance = instance(true);
    let err = instance.call_main(Vec::new()).unwrap_err();
    assert!(matches!(err, Error::EntryPointNotFound(_)));
    assert_eq!(err.to_string(), "entry point `main` not found");
}

#[test]
fn arity_errors_name_function_and_counts() {
    let named = Node::block(vec![
        Node::fn_decl("three", &["a", "b", "c"], Node::block(Vec::new())),
        Node::call_named("three", vec![Node::num(1.0)]),
    ]);
    let message = run(&named).unwrap_err();
    assert!(message.contains("function `three` expects 3 argument(s), got 1"), "{message}");

    let anonymous = Node::block(vec![
        Node::declare("f", Node::lambda(&["x"], Node::block(Vec::new()))),
        Node::call_named("f", vec![Node::num(1.0), Node::num(2.0)]),
    ]);
    let message = run(&anonymous).unwrap_err();
    assert!(message.contains("anonymous function expects 1 argument(s), got 2"), "{message}");
}

#[test]
fn recursive_arity_error_is_raised_at_run_time() {
    // fn bad(n) { if n < 1 { return 0 } return bad() }
    let unit = Node::block(vec![
        Node::fn_decl(
            "bad",
            &["n"],
            Node::block(vec![
                Node::if_else(
                    Node::binary(BinOp::Lt, Node::ident("n"), Node::num(1.0)),
                    Node::block(vec![Node::ret(Node::num(0.0))]),
                    None,
                ),
                Node::ret(Node::call_named("bad", Vec::new())),
            ]),
        ),
        Node::call_named("bad", vec![Node::num(0.0)]),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(0.0)));
}

fn make_counter_decl() -> Node {
    // fn makeCounter() {
    //   n := 0
    //   inc := fn() { n = n + 1 }
    //   get := fn() { return n }
    //   return fn(op) { if op == "inc" { inc() } return get() }
    // }
    Node::fn_decl(
        "makeCounter",
        &[],
        Node::block(vec![
            Node::declare("n", Node::num(0.0)),
            Node::declare(
                "inc",
                Node::lambda(
                    &[],
                    Node::block(vec![Node::assign("n", add(Node::ident("n"), Node::num(1.0)))]),
                ),
            ),
            Node::declare("get", Node::lambda(&[], Node::block(vec![Node::ret(Node::ident("n"))]))),
            Node::ret(Node::lambda(
                &["op"],
                Node::block(vec![
                    Node::if_else(
                        Node::binary(BinOp::Eq, Node::ident("op"), Node::str("inc")),
                        Node::block(vec![Node::call_named("inc", Vec::new())]),
                        None,
                    ),
                    Node::ret(Node::call_named("get", Vec::new())),
                ]),
            )),
        ]),
    )
}

#[test]
fn counters_share_cells_within_a_factory_call_only() {
    let unit = Node::block(vec![
        make_counter_decl(),
        Node::declare("a", Node::call_named("makeCounter", Vec::new())),
        Node::declare("b", Node::call_named("makeCounter", Vec::new())),
        Node::call_named("a", vec![Node::str("inc")]),
        Node::call_named("a", vec![Node::str("inc")]),
        Node::call_named("b", vec![Node::str("inc")]),
        add(
            Node::binary(
                BinOp::Mul,
                Node::call_named("a", vec![Node::str("get")]),
                Node::num(10.0),
            ),
            Node::call_named("b", vec![Node::str("get")]),
        ),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(21.0)));
}

#[test]
fn host_sees_shared_cells_after_the_factory_returned() {
    // fn pair() { n := 0; return array(fn() { n = n + 1 }, fn() { return n }) }
    let unit = Node::block(vec![
        Node::fn_decl(
            "pair",
            &[],
            Node::block(vec![
                Node::declare("n", Node::num(0.0)),
                Node::ret(Node::call_named(
                    "array",
                    vec![
                        Node::lambda(
                            &[],
                            Node::block(vec![Node::assign(
                                "n",
                                add(Node::ident("n"), Node::num(1.0)),
                            )]),
                        ),
                        Node::lambda(&[], Node::block(vec![Node::ret(Node::ident("n"))])),
                    ],
                )),
            ]),
        ),
        Node::call_named("pair", Vec::new()),
    ]);
    for optimize in [true, false] {
        let instance = instance(optimize);
        let pair = instance.evaluate(&unit).unwrap();
        let [inc, get] = pair.as_array().unwrap() else {
            panic!("expected two closures");
        };
        for _ in 0..3 {
            instance.call(inc, Vec::new()).unwrap();
        }
        assert_eq!(instance.call(get, Vec::new()).unwrap(), Value::float(3.0));
    }
}

#[test]
fn recycled_cells_never_leak_into_captures() {
    // fn hold(v) { c := v; return fn() { return c } }
    // fn churn(k) { a := k * 2; b := a + 1; return b }
    let unit = Node::block(vec![
        Node::fn_decl(
            "hold",
            &["v"],
            Node::block(vec![
                Node::declare("c", Node::ident("v")),
                Node::ret(Node::lambda(&[], Node::block(vec![Node::ret(Node::ident("c"))]))),
            ]),
        ),
        Node::fn_decl(
            "churn",
            &["k"],
            Node::block(vec![
                Node::declare("a", Node::binary(BinOp::Mul, Node::ident("k"), Node::num(2.0))),
                Node::declare("b", add(Node::ident("a"), Node::num(1.0))),
                Node::ret(Node::ident("b")),
            ]),
        ),
        Node::declare("kept", Node::call_named("hold", vec![Node::str("original")])),
        Node::declare("i", Node::num(0.0)),
        Node::declare("last", Node::null()),
        Node::while_loop(
            Node::binary(BinOp::Lt, Node::ident("i"), Node::num(100.0)),
            Node::block(vec![
                Node::assign("last", Node::call_named("churn", vec![Node::ident("i")])),
                Node::assign("i", add(Node::ident("i"), Node::num(1.0))),
            ]),
        ),
        Node::call_named("kept", Vec::new()),
    ]);
    for optimize in [true, false] {
        let instance = instance(optimize);
        assert_eq!(instance.evaluate(&unit).unwrap(), Value::from("original"));
        assert_eq!(instance.get_global("last"), Some(Value::float(199.0)));
        assert!(instance.runtime().pool().reused_cells() > 0);
    }
}

#[test]
fn if_else_branches_share_slots() {
    // fn pick(cond) { if cond { x := 1; return x } else { y := 2; return y } }
    let unit = |arg: bool| {
        Node::block(vec![
            Node::fn_decl(
                "pick",
                &["cond"],
                Node::block(vec![Node::if_else(
                    Node::ident("cond"),
                    Node::block(vec![
                        Node::declare("x", Node::num(1.0)),
                        Node::ret(Node::ident("x")),
                    ]),
                    Some(Node::block(vec![
                        Node::declare("y", Node::num(2.0)),
                        Node::ret(Node::ident("y")),
                    ])),
                )]),
            ),
            Node::call_named("pick", vec![Node::boolean(arg)]),
        ])
    };
    assert_eq!(run(&unit(true)), Ok(Value::float(1.0)));
    assert_eq!(run(&unit(false)), Ok(Value::float(2.0)));
}

fn slow_decl() -> Node {
    // fn slow(v) { sleep(20); return v }
    Node::fn_decl(
        "slow",
        &["v"],
        Node::block(vec![
            Node::call_named("sleep", vec![Node::num(20.0)]),
            Node::ret(Node::ident("v")),
        ]),
    )
}

#[test]
fn go_and_await_yield_the_result_once() {
    let unit = Node::block(vec![
        slow_decl(),
        Node::declare("t", Node::go(Node::call_named("slow", vec![Node::num(42.0)]))),
        Node::declare("r", Node::await_task(Node::ident("t"))),
        Node::ident("r"),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(42.0)));

    let twice = Node::block(vec![
        slow_decl(),
        Node::declare("t", Node::go(Node::call_named("slow", vec![Node::num(1.0)]))),
        Node::await_task(Node::ident("t")),
        Node::await_task(Node::ident("t")),
    ]);
    let message = run(&twice).unwrap_err();
    assert!(message.contains("finished task"), "{message}");
}

#[test]
fn task_errors_surface_at_await() {
    let unit = Node::block(vec![
        Node::fn_decl(
            "broken",
            &[],
            Node::block(vec![Node::unary(UnOp::Neg, Node::str("nope"))]),
        ),
        Node::declare("t", Node::go(Node::call_named("broken", Vec::new()))),
        Node::await_task(Node::ident("t")),
    ]);
    let message = run(&unit).unwrap_err();
    assert!(message.starts_with("TypeError"), "{message}");
    assert!(message.contains("at broken"), "{message}");
}

#[test]
fn go_checks_arity_before_spawning() {
    let unit = Node::block(vec![
        slow_decl(),
        Node::go(Node::call_named("slow", Vec::new())),
    ]);
    let message = run(&unit).unwrap_err();
    assert!(message.contains("expects 1 argument(s), got 0"), "{message}");
}

#[test]
fn await_all_returns_results_in_order() {
    let unit = Node::block(vec![
        slow_decl(),
        Node::declare("a", Node::go(Node::call_named("slow", vec![Node::str("a")]))),
        Node::declare("b", Node::go(Node::call_named("str", vec![Node::num(2.0)]))),
        Node::AwaitAll(vec![Node::ident("a"), Node::ident("b")]),
    ]);
    let result = run(&unit).unwrap();
    assert_eq!(result.to_string(), "[a, 2]");
}

#[test]
fn await_all_raises_first_failure_by_position() {
    let unit = Node::block(vec![
        slow_decl(),
        Node::declare("ok", Node::go(Node::call_named("slow", vec![Node::num(1.0)]))),
        Node::declare("late", Node::go(Node::call_named("len", vec![Node::num(1.0)]))),
        Node::declare("early", Node::go(Node::call_named("sleep", vec![Node::str("x")]))),
        Node::AwaitAll(vec![Node::ident("ok"), Node::ident("late"), Node::ident("early")]),
    ]);
    let message = run(&unit).unwrap_err();
    assert!(message.contains("has no length"), "{message}");
}

#[test]
fn await_any_takes_one_and_leaves_the_rest() {
    // `quick` is already consumed, so only `sleepy` can answer
    let unit = Node::block(vec![
        slow_decl(),
        Node::declare("quick", Node::go(Node::call_named("str", vec![Node::num(1.0)]))),
        Node::declare("sleepy", Node::go(Node::call_named("slow", vec![Node::num(2.0)]))),
        Node::await_task(Node::ident("quick")),
        Node::declare(
            "first",
            Node::AwaitAny(vec![Node::ident("quick"), Node::ident("sleepy")]),
        ),
        Node::ident("first"),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(2.0)));

    let all_consumed = Node::block(vec![
        Node::declare("t", Node::go(Node::call_named("str", vec![Node::num(1.0)]))),
        Node::await_task(Node::ident("t")),
        Node::AwaitAny(vec![Node::ident("t")]),
    ]);
    let message = run(&all_consumed).unwrap_err();
    assert!(message.contains("finished task"), "{message}");

    let empty = Node::AwaitAny(Vec::new());
    assert!(run(&empty).is_err());
}

#[test]
fn await_on_a_non_task_is_a_type_error() {
    let message = run(&Node::await_task(Node::num(1.0))).unwrap_err();
    assert!(message.starts_with("TypeError"), "{message}");
}

#[test]
fn blocking_natives_release_the_gil() {
    for optimize in [true, false] {
        let barrier = Arc::new(Barrier::new(2));
        let meet = NativeFn::new("meet", move || -> NativeResult {
            barrier.wait();
            Ok(Value::bool(true))
        })
        .blocking();
        let instance = Instance::new(
            InstanceCreateInfo {
                optimize,
                ..InstanceCreateInfo::default()
            }
            .with_native(meet),
        )
        .unwrap();
        // both tasks block in `meet` until the other arrives
        let unit = Node::block(vec![
            Node::declare("a", Node::go(Node::call_named("meet", Vec::new()))),
            Node::declare("b", Node::go(Node::call_named("meet", Vec::new()))),
            Node::AwaitAll(vec![Node::ident("a"), Node::ident("b")]),
        ]);
        let result = instance.evaluate(&unit).unwrap();
        assert_eq!(result.to_string(), "[true, true]");
    }
}

#[test]
fn host_waits_for_fire_and_forget_tasks() {
    let unit = Node::block(vec![
        Node::declare("done", Node::boolean(false)),
        Node::fn_decl(
            "finish",
            &[],
            Node::block(vec![
                Node::call_named("sleep", vec![Node::num(10.0)]),
                Node::assign("done", Node::boolean(true)),
            ]),
        ),
        Node::go(Node::call_named("finish", Vec::new())),
    ]);
    for optimize in [true, false] {
        let instance = instance(optimize);
        instance.evaluate(&unit).unwrap();
        instance.wait_for_no_activity();
        assert_eq!(instance.get_global("done"), Some(Value::bool(true)));
    }
}

#[test]
fn native_panics_become_exceptions_with_trace() {
    let explode = NativeFn::new("explode", |_: Value| -> NativeResult { panic!("host bug") });
    let instance = Instance::new(InstanceCreateInfo::default().with_native(explode)).unwrap();
    let unit = Node::block(vec![
        Node::fn_decl(
            "caller",
            &[],
            Node::block(vec![Node::call_named("explode", vec![Node::null()])]),
        ),
        Node::call_named("caller", Vec::new()),
    ]);
    let Err(Error::Runtime(exception)) = instance.evaluate(&unit) else {
        panic!("expected a runtime error");
    };
    assert_eq!(exception.kind, ExceptionKind::RuntimeError);
    assert!(exception.message.contains("host bug"));
    assert_eq!(exception.trace, ["explode", "caller", "<unit>"]);
}

#[test]
fn optimization_is_transparent_across_a_program_mix() {
    let programs = vec![
        add(Node::num(1.0), Node::num(2.0)),
        add(Node::str("a"), Node::num(2.0)),
        Node::binary(BinOp::Div, Node::num(1.0), Node::num(0.0)),
        Node::unary(UnOp::Not, Node::str("")),
        Node::unary(UnOp::Neg, Node::num(4.0)),
        Node::call_named("len", vec![Node::str("four")]),
        Node::call_named("type_of", vec![Node::lambda(&[], Node::block(Vec::new()))]),
        Node::call(Node::num(3.0), Vec::new()),
        Node::block(vec![
            Node::declare("s", Node::str("")),
            Node::declare("i", Node::num(0.0)),
            Node::while_loop(
                Node::binary(BinOp::Lt, Node::ident("i"), Node::num(3.0)),
                Node::block(vec![
                    Node::assign(
                        "s",
                        add(Node::ident("s"), Node::call_named("str", vec![Node::ident("i")])),
                    ),
                    Node::assign("i", add(Node::ident("i"), Node::num(1.0))),
                ]),
            ),
            Node::ident("s"),
        ]),
        Node::block(vec![
            Node::fn_decl(
                "local_math",
                &["p", "q"],
                Node::block(vec![
                    Node::declare("r", Node::binary(BinOp::Mod, Node::ident("p"), Node::ident("q"))),
                    Node::ret(Node::binary(BinOp::Ge, Node::ident("r"), Node::num(1.0))),
                ]),
            ),
            Node::call_named("local_math", vec![Node::num(7.0), Node::num(4.0)]),
        ]),
        Node::block(vec![
            Node::fn_decl("early", &[], Node::block(vec![Node::ret_none(), Node::num(1.0)])),
            Node::call_named("early", Vec::new()),
        ]),
    ];
    let expected = [
        Ok(Value::float(3.0)),
        Err(()),
        Ok(Value::float(f64::INFINITY)),
        Ok(Value::bool(true)),
        Ok(Value::float(-4.0)),
        Ok(Value::float(4.0)),
        Ok(Value::from("function")),
        Err(()),
        Ok(Value::from("012")),
        Ok(Value::bool(true)),
        Ok(Value::Null),
    ];
    for (program, expected) in programs.iter().zip(expected) {
        assert_eq!(run(program).map_err(|_| ()), expected, "{program:?}");
    }
}

#[test]
fn top_level_functions_see_names_declared_further_down() {
    // fn even(n) { if n == 0 { return true } return odd(n - 1) }
    // fn odd(n) { if n == 0 { return false } return even(n - 1) }
    // fn getk() { return k }
    // k := 5
    let parity = |name: &str, base: bool, other: &str| {
        Node::fn_decl(
            name,
            &["n"],
            Node::block(vec![
                Node::if_else(
                    Node::binary(BinOp::Eq, Node::ident("n"), Node::num(0.0)),
                    Node::block(vec![Node::ret(Node::boolean(base))]),
                    None,
                ),
                Node::ret(Node::call_named(other, vec![sub(Node::ident("n"), Node::num(1.0))])),
            ]),
        )
    };
    let unit = Node::block(vec![
        parity("even", true, "odd"),
        parity("odd", false, "even"),
        Node::fn_decl("getk", &[], Node::block(vec![Node::ret(Node::ident("k"))])),
        Node::declare("k", Node::num(5.0)),
        Node::binary(
            BinOp::And,
            Node::call_named("even", vec![Node::num(10.0)]),
            Node::binary(
                BinOp::Eq,
                Node::call_named("getk", Vec::new()),
                Node::num(5.0),
            ),
        ),
    ]);
    assert_eq!(run(&unit), Ok(Value::bool(true)));

    let odd_eleven = Node::block(vec![
        parity("even", true, "odd"),
        parity("odd", false, "even"),
        Node::call_named("odd", vec![Node::num(11.0)]),
    ]);
    assert_eq!(run(&odd_eleven), Ok(Value::bool(true)));
}

#[test]
fn elif_chain_shares_one_slot() {
    // fn cls(x) {
    //   if x < 0 { a := 1; return a }
    //   else if x == 0 { b := 2; return b }
    //   else { c := 3; return c }
    // }
    let arm = |name: &str, value: f64| {
        Node::block(vec![
            Node::declare(name, Node::num(value)),
            Node::ret(Node::ident(name)),
        ])
    };
    let cls = Node::fn_decl(
        "cls",
        &["x"],
        Node::block(vec![Node::if_else(
            Node::binary(BinOp::Lt, Node::ident("x"), Node::num(0.0)),
            arm("a", 1.0),
            Some(Node::if_else(
                Node::binary(BinOp::Eq, Node::ident("x"), Node::num(0.0)),
                arm("b", 2.0),
                Some(arm("c", 3.0)),
            )),
        )]),
    );
    let unit = Node::block(vec![
        cls.clone(),
        add(
            add(
                Node::binary(
                    BinOp::Mul,
                    Node::call_named("cls", vec![Node::num(-1.0)]),
                    Node::num(100.0),
                ),
                Node::binary(
                    BinOp::Mul,
                    Node::call_named("cls", vec![Node::num(0.0)]),
                    Node::num(10.0),
                ),
            ),
            Node::call_named("cls", vec![Node::num(1.0)]),
        ),
    ]);
    assert_eq!(run(&unit), Ok(Value::float(123.0)));

    for optimize in [true, false] {
        let instance = instance(optimize);
        instance.evaluate(&cls).unwrap();
        let cls = instance.get_global("cls").unwrap();
        let capacity = cls
            .as_user_fn()
            .and_then(|f| f.info().layout())
            .map(|layout| layout.capacity);
        // `x` plus one slot shared by `a`, `b` and `c`
        assert_eq!(capacity, Some(2));
    }
}

#[test]
fn dropped_instance_lets_running_tasks_finish() {
    // fn helper() { return 7 }
    // fn worker() { sleep(50); record(helper()) }
    // go worker()
    for optimize in [true, false] {
        let recorded = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&recorded);
        let record = NativeFn::new("record", move |value: Value| -> NativeResult {
            *sink.lock() = Some(value);
            Ok(Value::Null)
        });
        let instance = Instance::new(
            InstanceCreateInfo {
                optimize,
                ..InstanceCreateInfo::default()
            }
            .with_defaults()
            .with_native(record),
        )
        .unwrap();
        let unit = Node::block(vec![
            Node::fn_decl("helper", &[], Node::block(vec![Node::ret(Node::num(7.0))])),
            Node::fn_decl(
                "worker",
                &[],
                Node::block(vec![
                    Node::call_named("sleep", vec![Node::num(50.0)]),
                    Node::call_named("record", vec![Node::call_named("helper", Vec::new())]),
                ]),
            ),
            Node::go(Node::call_named("worker", Vec::new())),
        ]);
        instance.evaluate(&unit).unwrap();

        let runtime = Arc::clone(instance.runtime());
        drop(instance);
        runtime.wait_for_no_activity();
        assert_eq!(*recorded.lock(), Some(Value::float(7.0)), "optimize: {optimize}");
    }
}
