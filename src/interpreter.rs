//! CPS tree-walking interpreter with a trampoline stack guard. An
//! alternative back-end to the compile-to-host-target pipeline: it
//! evaluates the parsed (NOT CPS-transformed) AST directly, using its own
//! internal continuation-passing implementation technique purely to bound
//! native stack usage - this is the "CPS" in "CPS interpreter", a property
//! of how it's *implemented*, not a requirement that its input already be
//! `cps::transform`ed.
//!
//! Exception-based unwinding is replaced with an explicit loop returning a
//! sum type, `Done(value) | Bounce(fn, args)`. Every `evaluate`/continuation
//! call returns `Result<Signal, Error>`; because each one's last act is
//! always either `k(value, rt)` or a further `evaluate(..)` call - never
//! additional work after - a `Signal::Bounce` produced deep in a call chain
//! propagates back to the driving loop via ordinary returns, with no
//! special unwinding logic needed at the intermediate call sites.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::ast::{Ast, Lit, VarDef};
use crate::env::{EnvRef, Frame};
use crate::error::Error;
use crate::primitives;

/// Frames of native recursion allowed between trampoline bounces.
const TRAMPOLINE_THRESHOLD: u32 = 200;

/// A runtime value.
#[derive(Clone)]
pub enum Data {
    Num(f64),
    Str(String),
    Bool(bool),
    Closure(Rc<Closure>),
    Primitive(Rc<Primitive>),
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Num(n) => write!(f, "{}", n),
            Data::Str(s) => write!(f, "{}", s),
            Data::Bool(b) => write!(f, "{}", b),
            Data::Closure(_) => write!(f, "<closure>"),
            Data::Primitive(_) => write!(f, "<primitive>"),
        }
    }
}

fn is_false(v: &Data) -> bool {
    matches!(v, Data::Bool(false))
}

/// A function value closing over the environment active at its creation.
pub struct Closure {
    pub lambda: Rc<crate::ast::LambdaNode>,
    pub env: EnvRef<Data>,
}

/// The fixed primitive names, plus the reified
/// continuation value `CallCC` hands out.
pub enum Primitive {
    Named(&'static str),
    /// A first-class continuation value. Calling it (with exactly one
    /// argument - the call's own continuation is discarded; the reified
    /// continuation behaves as `(discarded, v) -> k(v)`) jumps straight to
    /// the captured `Cont` instead of returning normally to the call site.
    ReifiedCont(Cont),
}

pub const PRIMITIVE_NAMES: &[&str] =
    &["print", "println", "sleep", "time", "halt", "twice", "CallCC", "fibpy", "fibPY"];

/// A meta-level (compile-time-shaped, but here a runtime) continuation: the
/// Rust-level "what happens with this value next."
pub type Cont = Rc<dyn Fn(Data, &Runtime) -> Result<Signal, Error>>;

/// Either a finished value, or a unit of pending work to hand back to the
/// trampoline driver instead of continuing via native recursion.
pub enum Signal {
    Value(Data),
    Bounce(Box<dyn FnOnce(&Runtime) -> Result<Signal, Error>>),
}

/// Shared interpreter state: the stack-depth countdown and the output sink
/// primitives write to.
pub struct Runtime<'a> {
    depth: Cell<u32>,
    pub sink: RefCell<&'a mut dyn Write>,
}

impl<'a> Runtime<'a> {
    fn reset(&self) {
        self.depth.set(TRAMPOLINE_THRESHOLD);
    }
}

/// Drives a `Signal` to completion, resetting the depth countdown on every
/// bounce.
fn drive(mut signal: Signal, rt: &Runtime) -> Result<Data, Error> {
    loop {
        match signal {
            Signal::Value(v) => return Ok(v),
            Signal::Bounce(thunk) => {
                rt.reset();
                signal = thunk(rt)?;
            }
        }
    }
}

/// Parses and runs `ast` (the raw, non-CPS-transformed program) to
/// completion, installing the primitive table in a fresh root environment.
pub fn run(ast: &Ast, sink: &mut dyn Write) -> Result<Data, Error> {
    let rt = Runtime { depth: Cell::new(TRAMPOLINE_THRESHOLD), sink: RefCell::new(sink) };
    let env = Frame::root();
    primitives::install(&env);
    let k: Cont = Rc::new(|v, _rt| Ok(Signal::Value(v)));
    let signal = evaluate(ast, &env, &k, &rt)?;
    drive(signal, &rt)
}

/// Evaluates `node` in `env`, delivering the result to `k`. Every call
/// checks the depth countdown first; once exhausted, the exact same call
/// is packaged as a `Signal::Bounce` and handed back to whichever `drive`
/// loop is waiting, rather than recursing further.
pub fn evaluate(node: &Ast, env: &EnvRef<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    let remaining = rt.depth.get();
    if remaining == 0 {
        let node = node.clone();
        let env = Rc::clone(env);
        let k = Rc::clone(k);
        return Ok(Signal::Bounce(Box::new(move |rt: &Runtime| evaluate(&node, &env, &k, rt))));
    }
    rt.depth.set(remaining - 1);

    match node {
        Ast::Lit(lit) => k(lit_to_data(lit), rt),

        Ast::Var(v) => {
            let name = v.name();
            match Frame::get(env, &name) {
                Some(cell) => k(cell.borrow().clone(), rt),
                None => Err(Error::eval(format!("undefined variable `{}`", name))),
            }
        }

        Ast::Raw(text) => k(Data::Str(text.clone()), rt),

        Ast::Assign(left, right) => eval_assign(left, right, env, k, rt),

        Ast::Binary(op, left, right) => eval_binary(op, left, right, env, k, rt),

        Ast::If(cond, then, else_) => eval_if(cond, then, else_, env, k, rt),

        Ast::Prog(items) => eval_prog(items, env, k, rt),

        Ast::Let(vardefs, body) => eval_let(vardefs, body, env, k, rt),

        Ast::Lambda(lambda) => {
            let closure_env = if lambda.name.is_some() { Frame::extend(env) } else { Rc::clone(env) };
            let closure = Rc::new(Closure { lambda: Rc::clone(lambda), env: Rc::clone(&closure_env) });
            if let Some(name) = &lambda.name {
                Frame::define(&closure_env, name, Data::Closure(Rc::clone(&closure)));
            }
            k(Data::Closure(closure), rt)
        }

        Ast::Call(func, args) => eval_call(func, args, env, k, rt),
    }
}

fn lit_to_data(lit: &Lit) -> Data {
    match lit {
        Lit::Num(n) => Data::Num(*n),
        Lit::Str(s) => Data::Str(s.clone()),
        Lit::Bool(b) => Data::Bool(*b),
    }
}

fn eval_assign(left: &Ast, right: &Ast, env: &EnvRef<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    let name = match left {
        Ast::Var(v) => v.name(),
        _ => return Err(Error::eval("left-hand side of an assignment must be a variable")),
    };
    let env2 = Rc::clone(env);
    let k2 = Rc::clone(k);
    let k_right: Cont = Rc::new(move |v: Data, rt: &Runtime| {
        Frame::set(&env2, &name, v.clone())
            .map_err(|_| Error::eval(format!("cannot assign to undefined variable `{}`", name)))?;
        k2(v, rt)
    });
    evaluate(right, env, &k_right, rt)
}

fn eval_binary(
    op: &str,
    left: &Ast,
    right: &Ast,
    env: &EnvRef<Data>,
    k: &Cont,
    rt: &Runtime,
) -> Result<Signal, Error> {
    let op = op.to_string();
    let right = right.clone();
    let env2 = Rc::clone(env);
    let k2 = Rc::clone(k);
    let k_left: Cont = Rc::new(move |l_val: Data, rt: &Runtime| {
        let op = op.clone();
        let l_val = l_val.clone();
        let k2 = Rc::clone(&k2);
        let k_right: Cont = Rc::new(move |r_val: Data, rt: &Runtime| {
            let result = apply_binary(&op, &l_val, &r_val)?;
            k2(result, rt)
        });
        evaluate(&right, &env2, &k_right, rt)
    });
    evaluate(left, env, &k_left, rt)
}

fn eval_if(
    cond: &Ast,
    then: &Ast,
    else_: &Ast,
    env: &EnvRef<Data>,
    k: &Cont,
    rt: &Runtime,
) -> Result<Signal, Error> {
    let then = then.clone();
    let else_ = else_.clone();
    let env2 = Rc::clone(env);
    let k2 = Rc::clone(k);
    let k_cond: Cont = Rc::new(move |c: Data, rt: &Runtime| {
        if is_false(&c) {
            evaluate(&else_, &env2, &k2, rt)
        } else {
            evaluate(&then, &env2, &k2, rt)
        }
    });
    evaluate(cond, env, &k_cond, rt)
}

fn eval_prog(items: &[Ast], env: &EnvRef<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    match items {
        [] => k(Data::Bool(false), rt),
        [only] => evaluate(only, env, k, rt),
        [head, rest @ ..] => {
            let rest = rest.to_vec();
            let env2 = Rc::clone(env);
            let k2 = Rc::clone(k);
            let k_head: Cont = Rc::new(move |_v: Data, rt: &Runtime| eval_prog(&rest, &env2, &k2, rt));
            evaluate(head, env, &k_head, rt)
        }
    }
}

fn eval_let(vardefs: &[VarDef], body: &Ast, env: &EnvRef<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    match vardefs {
        [] => evaluate(body, env, k, rt),
        [v0, rest @ ..] => {
            let default = v0.value.clone().unwrap_or(Ast::Lit(Lit::Bool(false)));
            let name = v0.name.clone();
            let rest = rest.to_vec();
            let body = body.clone();
            let env_outer = Rc::clone(env);
            let k2 = Rc::clone(k);
            let k_val: Cont = Rc::new(move |v: Data, rt: &Runtime| {
                let child = Frame::extend(&env_outer);
                Frame::define(&child, &name, v);
                eval_let(&rest, &body, &child, &k2, rt)
            });
            evaluate(&default, env, &k_val, rt)
        }
    }
}

fn eval_call(func: &Ast, args: &[Ast], env: &EnvRef<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    let args_vec = args.to_vec();
    let env2 = Rc::clone(env);
    let k2 = Rc::clone(k);
    let k_func: Cont = Rc::new(move |f_val: Data, rt: &Runtime| {
        eval_args(&args_vec, Vec::new(), &env2, f_val, &k2, rt)
    });
    evaluate(func, env, &k_func, rt)
}

fn eval_args(
    args: &[Ast],
    acc: Vec<Data>,
    env: &EnvRef<Data>,
    f_val: Data,
    k: &Cont,
    rt: &Runtime,
) -> Result<Signal, Error> {
    match args {
        [] => apply(f_val, acc, k, rt),
        [head, rest @ ..] => {
            let rest = rest.to_vec();
            let env2 = Rc::clone(env);
            let k2 = Rc::clone(k);
            let f_val2 = f_val.clone();
            let k_head: Cont = Rc::new(move |v: Data, rt: &Runtime| {
                let mut acc2 = acc.clone();
                acc2.push(v);
                eval_args(&rest, acc2, &env2, f_val2.clone(), &k2, rt)
            });
            evaluate(head, env, &k_head, rt)
        }
    }
}

/// Invokes a callable `Data` value with `args`, delivering its result to
/// `k`.
pub fn apply(callable: Data, mut args: Vec<Data>, k: &Cont, rt: &Runtime) -> Result<Signal, Error> {
    match callable {
        Data::Closure(c) => {
            if args.len() > c.lambda.params.len() {
                return Err(Error::eval("too many arguments"));
            }
            while args.len() < c.lambda.params.len() {
                args.push(Data::Bool(false));
            }
            let new_env = Frame::extend(&c.env);
            for (p, a) in c.lambda.params.iter().zip(args) {
                Frame::define(&new_env, &p.name, a);
            }
            evaluate(&c.lambda.body, &new_env, k, rt)
        }
        Data::Primitive(p) => match p.as_ref() {
            Primitive::Named(name) => primitives::invoke(name, args, k, rt),
            Primitive::ReifiedCont(captured) => {
                if args.len() != 1 {
                    return Err(Error::eval("a reified continuation takes exactly one argument"));
                }
                captured(args.into_iter().next().unwrap(), rt)
            }
        },
        _ => Err(Error::eval("attempt to call a value that is not a function")),
    }
}

fn apply_binary(op: &str, l: &Data, r: &Data) -> Result<Data, Error> {
    use Data::*;
    match (op, l, r) {
        ("+", Num(a), Num(b)) => Ok(Num(a + b)),
        ("-", Num(a), Num(b)) => Ok(Num(a - b)),
        ("*", Num(a), Num(b)) => Ok(Num(a * b)),
        ("/", Num(a), Num(b)) => {
            if *b == 0.0 {
                Err(Error::operator("division by zero"))
            } else {
                Ok(Num(a / b))
            }
        }
        ("%", Num(a), Num(b)) => {
            if *b == 0.0 {
                Err(Error::operator("division by zero"))
            } else {
                Ok(Num(a % b))
            }
        }
        ("<", Num(a), Num(b)) => Ok(Bool(a < b)),
        (">", Num(a), Num(b)) => Ok(Bool(a > b)),
        ("<=", Num(a), Num(b)) => Ok(Bool(a <= b)),
        (">=", Num(a), Num(b)) => Ok(Bool(a >= b)),
        ("==", a, b) => Ok(Bool(data_eq(a, b))),
        ("!=", a, b) => Ok(Bool(!data_eq(a, b))),
        ("+" | "-" | "*" | "/" | "%" | "<" | ">" | "<=" | ">=", _, _) => {
            Err(Error::operator(format!("operator `{}` requires numeric operands", op)))
        }
        _ => Err(Error::operator(format!("unknown operator `{}`", op))),
    }
}

fn data_eq(a: &Data, b: &Data) -> bool {
    match (a, b) {
        (Data::Num(a), Data::Num(b)) => a == b,
        (Data::Str(a), Data::Str(b)) => a == b,
        (Data::Bool(a), Data::Bool(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn run_source(source: &str) -> (Data, String) {
        let ast = parse(lex(source).unwrap()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        let result = run(&ast, &mut out).unwrap();
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn prints_with_trailing_space() {
        let (_, out) = run_source("print(1 + 2 * 3);");
        assert_eq!(out, "7 ");
    }

    #[test]
    fn println_then_halt_stops_the_program() {
        let (_, out) = run_source(r#"println("foo"); halt(); println("bar");"#);
        assert_eq!(out, "foo\n");
    }

    #[test]
    fn fibonacci_by_name() {
        let (_, out) = run_source("fib = λ(n) if n < 2 then n else fib(n-1) + fib(n-2); println(fib(10));");
        assert_eq!(out, "55\n");
    }

    #[test]
    fn let_binding_sees_earlier_bindings() {
        let (_, out) = run_source("let (x=1, y=x+1) println(x + y);");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn deep_linear_recursion_does_not_overflow_the_stack() {
        let (_, out) =
            run_source("sum = lambda(n, ret) if n == 0 then ret else sum(n-1, ret+n); println(sum(50000, 0));");
        assert_eq!(out, "1250025000\n");
    }

    #[test]
    fn empty_prog_is_false() {
        let ast = parse(lex("{};").unwrap()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        let result = run(&ast, &mut out).unwrap();
        assert!(matches!(result, Data::Bool(false)));
    }

    #[test]
    fn assigning_an_undefined_local_fails() {
        let ast = parse(lex("f = lambda() { x = 1; }; f();").unwrap()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        let err = run(&ast, &mut out).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Eval);
    }
}
