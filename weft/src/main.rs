use clap::{Parser as ClapParser, ValueEnum};
use std::{process, time::Instant};

use weft::{BinOp, Instance, InstanceCreateInfo, Node, Value};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Program {
    /// Recursive Fibonacci
    Fib,
    /// A closure counting its calls
    Counter,
    /// Fibonacci computed on background tasks
    Tasks,
    /// Arithmetic on numbers and strings
    Arith,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Demo program to run
    #[arg(long, value_enum, default_value = "fib")]
    program: Program,

    /// Input size of the program
    #[arg(short = 'n', long, default_value_t = 25)]
    n: u32,

    /// Compile without call-path and operator specialization
    #[arg(long, help = "Disable compiler optimizations")]
    no_optimize: bool,
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
            Node::ret(Node::binary(
                BinOp::Add,
                Node::call_named(
                    "fib",
                    vec![Node::binary(BinOp::Sub, Node::ident("n"), Node::num(1.0))],
                ),
                Node::call_named(
                    "fib",
                    vec![Node::binary(BinOp::Sub, Node::ident("n"), Node::num(2.0))],
                ),
            )),
        ]),
    )
}

fn build(program: Program, n: f64) -> Node {
    match program {
        Program::Fib => Node::block(vec![fib_decl(), Node::call_named("fib", vec![Node::num(n)])]),
        Program::Counter => Node::block(vec![
            Node::fn_decl(
                "counter",
                &[],
                Node::block(vec![
                    Node::declare("count", Node::num(0.0)),
                    Node::ret(Node::lambda(
                        &[],
                        Node::block(vec![
                            Node::assign(
                                "count",
                                Node::binary(BinOp::Add, Node::ident("count"), Node::num(1.0)),
                            ),
                            Node::ret(Node::ident("count")),
                        ]),
                    )),
                ]),
            ),
            Node::declare("tick", Node::call_named("counter", Vec::new())),
            Node::declare("i", Node::num(0.0)),
            Node::while_loop(
                Node::binary(BinOp::Lt, Node::ident("i"), Node::num(n)),
                Node::block(vec![
                    Node::call_named("tick", Vec::new()),
                    Node::assign("i", Node::binary(BinOp::Add, Node::ident("i"), Node::num(1.0))),
                ]),
            ),
            Node::call_named("tick", Vec::new()),
        ]),
        Program::Tasks => Node::block(vec![
            fib_decl(),
            Node::declare("a", Node::go(Node::call_named("fib", vec![Node::num(n)]))),
            Node::declare(
                "b",
                Node::go(Node::call_named("fib", vec![Node::num((n - 1.0).max(0.0))])),
            ),
            Node::AwaitAll(vec![Node::ident("a"), Node::ident("b")]),
        ]),
        Program::Arith => Node::block(vec![
            Node::declare(
                "x",
                Node::binary(
                    BinOp::Mod,
                    Node::binary(BinOp::Mul, Node::num(n), Node::num(7.0)),
                    Node::num(10.0),
                ),
            ),
            Node::binary(
                BinOp::Add,
                Node::str("x = "),
                Node::call_named("str", vec![Node::ident("x")]),
            ),
        ]),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let info = InstanceCreateInfo {
        optimize: !cli.no_optimize,
        ..InstanceCreateInfo::default()
    }
    .with_defaults();
    let instance = match Instance::new(info) {
        Ok(instance) => instance,
        Err(err) => {
            eprintln!("Error creating instance: {err}");
            process::exit(1);
        }
    };

    let unit = build(cli.program, f64::from(cli.n));
    let start = Instant::now();
    let result = instance.evaluate(&unit);
    instance.wait_for_no_activity();
    let elapsed = start.elapsed();

    match result {
        Ok(Value::Null) => {}
        Ok(value) => println!("{value}"),
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
    log::info!(
        "{:?} finished in {elapsed:?} (optimize: {})",
        cli.program,
        instance.optimize()
    );
}
