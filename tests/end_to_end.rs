//! End-to-end scenarios run against the crate's public API: both back-ends
//! (direct interpretation and compile-to-host) are expected to agree on
//! observable behavior for every program that has no `js { ... }` splice
//! (host-target output can only be checked by actually running it on a
//! host, which is out of scope here).

use lambda_lang::{compile_to_host, interpret};

fn run(source: &str) -> String {
    let mut out = Vec::new();
    interpret(source, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn scenario_1_print_arithmetic() {
    assert_eq!(run("print(1 + 2 * 3);"), "7 ");
}

#[test]
fn scenario_2_lambda_call() {
    assert_eq!(run("sum = lambda(x, y) x + y; print(sum(2, 3));"), "5 ");
}

#[test]
fn scenario_3_recursive_fibonacci() {
    assert_eq!(run("fib = λ(n) if n < 2 then n else fib(n-1) + fib(n-2); println(fib(10));"), "55\n");
}

#[test]
fn scenario_4_let_binding_chain() {
    assert_eq!(run("let (x=1, y=x+1) println(x + y);"), "3\n");
}

#[test]
fn scenario_5_halt_stops_the_program() {
    assert_eq!(run(r#"println("foo"); halt(); println("bar");"#), "foo\n");
}

#[test]
fn scenario_6_trampoline_safety() {
    assert_eq!(run("sum = lambda(n, ret) if n == 0 then ret else sum(n-1, ret+n); println(sum(50000, 0));"), "1250025000\n");
}

#[test]
fn compile_to_host_pipeline_runs_without_error_on_every_scenario() {
    let sources = [
        "print(1 + 2 * 3);",
        "sum = lambda(x, y) x + y; print(sum(2, 3));",
        "fib = λ(n) if n < 2 then n else fib(n-1) + fib(n-2); println(fib(10));",
        "let (x=1, y=x+1) println(x + y);",
        r#"println("foo"); halt(); println("bar");"#,
        "sum = lambda(n, ret) if n == 0 then ret else sum(n-1, ret+n); println(sum(50000, 0));",
    ];
    for source in sources {
        let host_source = compile_to_host(source).unwrap();
        assert!(host_source.starts_with("\"use strict\";"));
    }
}

#[test]
fn empty_prog_is_false_and_single_element_prog_is_its_value() {
    let mut out = Vec::new();
    assert!(matches!(interpret("{};", &mut out).unwrap(), lambda_lang::Data::Bool(false)));
    assert!(matches!(interpret("{ 5; };", &mut out).unwrap(), lambda_lang::Data::Num(n) if n == 5.0));
}

#[test]
fn truthiness_only_excludes_exact_false() {
    assert_eq!(run(r#"if "" then println("truthy") else println("falsy");"#), "truthy\n");
    assert_eq!(run("if 0 then println(\"truthy\") else println(\"falsy\");"), "truthy\n");
    assert_eq!(run("if false then println(\"truthy\") else println(\"falsy\");"), "falsy\n");
}
