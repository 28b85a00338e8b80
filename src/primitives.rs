//! The fixed primitive library: `print`, `println`,
//! `sleep`, `time`, `halt`, `twice`, `CallCC`, `fibpy`/`fibPY`. Every
//! primitive follows the same calling convention as a user closure - it
//! receives the call's continuation first - but, unlike a closure, it is
//! implemented in Rust rather than by evaluating a lambda body.
//!
//! A flat `install` function populates an environment with native bindings
//! up front, rather than wiring each primitive into a VM dispatch loop.

use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::env::{EnvRef, Frame};
use crate::error::Error;
use crate::interpreter::{apply, Cont, Data, Primitive, Runtime, Signal, PRIMITIVE_NAMES};

/// Binds every primitive name into `env` as a `Data::Primitive`.
pub fn install(env: &EnvRef<Data>) {
    for name in PRIMITIVE_NAMES {
        Frame::define(env, name, Data::Primitive(Rc::new(Primitive::Named(name))));
    }
}

/// Dispatches a call to the primitive named `name`.
pub fn invoke(name: &str, args: Vec<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    match name {
        "print" => {
            let v = one_arg(name, args)?;
            write!(rt.sink.borrow_mut(), "{} ", v).map_err(io_err)?;
            k(Data::Bool(false), rt)
        }
        "println" => {
            let v = one_arg(name, args)?;
            writeln!(rt.sink.borrow_mut(), "{}", v).map_err(io_err)?;
            k(Data::Bool(false), rt)
        }
        "sleep" => {
            let seconds = one_num(name, args)?;
            if seconds > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(seconds));
            }
            k(Data::Bool(false), rt)
        }
        "time" => time(args, k, rt),
        "halt" => Ok(Signal::Value(Data::Bool(false))),
        "twice" => twice(args, k, rt),
        "CallCC" => call_cc(args, k, rt),
        "fibpy" | "fibPY" => {
            let n = one_num(name, args)?;
            k(Data::Num(fib(n)), rt)
        }
        other => Err(Error::eval(format!("unknown primitive `{}`", other))),
    }
}

fn one_arg(name: &str, mut args: Vec<Data>) -> Result<Data, Error> {
    if args.len() != 1 {
        return Err(Error::eval(format!("`{}` takes exactly one argument", name)));
    }
    Ok(args.pop().unwrap())
}

fn one_num(name: &str, args: Vec<Data>) -> Result<f64, Error> {
    match one_arg(name, args)? {
        Data::Num(n) => Ok(n),
        _ => Err(Error::eval(format!("`{}` expects a number", name))),
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::eval(format!("write failed: {}", e))
}

/// `time(k, f)`: measures the wall-clock time of running `f` with zero
/// arguments, printing `"Time: <ms>ms"` before forwarding `f`'s result to
/// the real continuation.
fn time(mut args: Vec<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    if args.len() != 1 {
        return Err(Error::eval("`time` takes exactly one argument"));
    }
    let f = args.pop().unwrap();
    let start = Instant::now();
    let k2 = Rc::clone(k);
    let k_prime: Cont = Rc::new(move |v: Data, rt: &Runtime| {
        let elapsed = start.elapsed();
        writeln!(rt.sink.borrow_mut(), "Time: {}ms", elapsed.as_millis()).map_err(io_err)?;
        k2(v, rt)
    });
    apply(f, Vec::new(), &k_prime, rt)
}

/// `twice(k, a, b)`: runs the continuation with `a` to completion (driving
/// any trampoline bounces along the way, so its side effects land before
/// the second run starts), then hands control to the continuation again
/// with `b`.
fn twice(mut args: Vec<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    if args.len() != 2 {
        return Err(Error::eval("`twice` takes exactly two arguments"));
    }
    let b = args.pop().unwrap();
    let a = args.pop().unwrap();
    let first = k(a, rt)?;
    drive_in_place(first, rt)?;
    k(b, rt)
}

fn drive_in_place(mut signal: Signal, rt: &Runtime) -> Result<Data, Error> {
    loop {
        match signal {
            Signal::Value(v) => return Ok(v),
            Signal::Bounce(thunk) => signal = thunk(rt)?,
        }
    }
}

/// `CallCC(k, f)`: reifies `k` as a first-class value and calls
/// `f(reifiedK, reifiedK)`. Calling the reified value jumps straight back
/// to the point of the `CallCC` call, discarding whatever continuation was
/// active at the call site.
fn call_cc(mut args: Vec<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    if args.len() != 1 {
        return Err(Error::eval("`CallCC` takes exactly one argument"));
    }
    let f = args.pop().unwrap();
    let reified = Data::Primitive(Rc::new(Primitive::ReifiedCont(Rc::clone(k))));
    apply(f, vec![reified.clone(), reified], k, rt)
}

fn fib(n: f64) -> f64 {
    if n < 2.0 {
        n
    } else {
        fib(n - 1.0) + fib(n - 2.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpreter::run;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn run_source(source: &str) -> String {
        let ast = parse(lex(source).unwrap()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        run(&ast, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn fibpy_matches_fib_table() {
        assert_eq!(run_source("println(fibpy(10));"), "55\n");
    }

    #[test]
    fn twice_runs_continuation_for_both_values() {
        assert_eq!(run_source("println(twice(1, 2));"), "1\n2\n");
    }

    #[test]
    fn call_cc_returns_the_reified_value_directly() {
        assert_eq!(run_source("println(CallCC(lambda(k, k2) k(5)));"), "5\n");
    }
}
