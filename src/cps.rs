//! Continuation-passing-style transform.
//!
//! The compile-time continuation `k` passed around here is host-level - a
//! closure over AST nodes, not a user continuation - so `Cont` is an `Rc`'d
//! `Fn(Ast) -> Ast`, and `cps` is a recursive function threading one through
//! the tree. `Gensym` travels as an `Rc` too, so continuations can own a
//! cheap clone of it rather than a borrow, sidestepping the lifetime
//! bookkeeping a borrowed `&Gensym` captured inside nested closures would
//! otherwise require.

use std::rc::Rc;

use crate::ast::{Ast, LambdaNode, Lit, Param, VarDef};
use crate::gensym::Gensym;

/// A meta-level (compile-time) continuation: a function from "the AST
/// fragment representing the value so far" to "the AST fragment to run
/// next."
type Cont = Rc<dyn Fn(Ast) -> Ast>;

fn identity() -> Cont {
    Rc::new(|v| v)
}

/// Transforms a whole program and wraps it once as
/// `Call(Var("β_TOPLEVEL"), [program])`.
pub fn transform(ast: &Ast) -> Ast {
    let gensym = Rc::new(Gensym::new());
    let body = cps(ast, &identity(), &gensym);
    Ast::Call(Box::new(Ast::var("β_TOPLEVEL")), vec![body])
}

/// `makeContinuation(k)`: materializes `k` as `λR. k(Var(R))` with a fresh
/// `R`.
fn make_continuation(k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    let r_name = gensym.fresh("R");
    let body = k(Ast::var(r_name.clone()));
    let lambda = LambdaNode::new(None, vec![Param { name: r_name }], body);
    Ast::Lambda(Rc::new(lambda))
}

fn cps(node: &Ast, k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    match node {
        Ast::Lit(_) | Ast::Var(_) => k(node.clone()),

        Ast::Raw(_) => k(node.clone()),

        Ast::Assign(left, right) => {
            let right = (**right).clone();
            let k = Rc::clone(k);
            let gensym2 = Rc::clone(gensym);
            let k_left: Cont = Rc::new(move |l_val: Ast| {
                let k = Rc::clone(&k);
                let l_val = l_val.clone();
                let k_right: Cont = Rc::new(move |r_val: Ast| k(Ast::Assign(Box::new(l_val.clone()), Box::new(r_val))));
                cps(&right, &k_right, &gensym2)
            });
            cps(left, &k_left, gensym)
        }

        Ast::Binary(op, left, right) => {
            let op = op.clone();
            let right = (**right).clone();
            let k = Rc::clone(k);
            let gensym2 = Rc::clone(gensym);
            let k_left: Cont = Rc::new(move |l_val: Ast| {
                let op = op.clone();
                let k = Rc::clone(&k);
                let l_val = l_val.clone();
                let k_right: Cont = Rc::new(move |r_val: Ast| {
                    k(Ast::Binary(op.clone(), Box::new(l_val.clone()), Box::new(r_val)))
                });
                cps(&right, &k_right, &gensym2)
            });
            cps(left, &k_left, gensym)
        }

        Ast::Prog(items) => cps_prog(items, k, gensym),

        Ast::Let(vardefs, body) => cps_let(vardefs, body, k, gensym),

        Ast::If(cond, then, else_) => cps_if(cond, then, else_, k, gensym),

        Ast::Lambda(lambda) => {
            let k_name = gensym.fresh("K");
            let inner_k: Cont = {
                let k_name = k_name.clone();
                Rc::new(move |v: Ast| Ast::Call(Box::new(Ast::var(k_name.clone())), vec![v]))
            };
            let new_body = cps(&lambda.body, &inner_k, gensym);
            let mut params = vec![Param { name: k_name }];
            params.extend(lambda.params.iter().cloned());
            let new_lambda = LambdaNode::new(lambda.name.clone(), params, new_body);
            k(Ast::Lambda(Rc::new(new_lambda)))
        }

        Ast::Call(func, args) => cps_call(func, args, k, gensym),
    }
}

fn cps_prog(items: &[Ast], k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    match items {
        [] => k(Ast::Lit(Lit::Bool(false))),
        [only] => cps(only, k, gensym),
        [head, rest @ ..] => {
            let rest_prog = Ast::Prog(rest.to_vec());
            let k = Rc::clone(k);
            let gensym2 = Rc::clone(gensym);
            let k_head: Cont = Rc::new(move |v0: Ast| {
                Ast::Prog(vec![v0, cps(&rest_prog, &k, &gensym2)])
            });
            cps(head, &k_head, gensym)
        }
    }
}

/// `Let` desugars one binding at a time into a self-applied lambda
/// then re-enters `cps` on the desugared `Call`.
fn cps_let(vardefs: &[VarDef], body: &Ast, k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    match vardefs {
        [] => cps(body, k, gensym),
        [v0, rest @ ..] => {
            let arg = v0.value.clone().unwrap_or(Ast::Lit(Lit::Bool(false)));
            let inner_let = Ast::Let(rest.to_vec(), Box::new(body.clone()));
            let lambda = LambdaNode::new(None, vec![Param { name: v0.name.clone() }], inner_let);
            let call = Ast::Call(Box::new(Ast::Lambda(Rc::new(lambda))), vec![arg]);
            cps(&call, k, gensym)
        }
    }
}

/// Builds the `If` node in CPS without duplicating `k` across both
/// branches: allocate a continuation parameter `I`, evaluate `cond`, and
/// have each branch invoke `I` with its own CPS-transformed value.
fn cps_if(cond: &Ast, then: &Ast, else_: &Ast, k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    let i_name = gensym.fresh("I");
    let then = then.clone();
    let else_ = else_.clone();
    let gensym2 = Rc::clone(gensym);

    let inner_k: Cont = {
        let i_name = i_name.clone();
        Rc::new(move |c_val: Ast| {
            let then_branch = Ast::Call(
                Box::new(Ast::var(i_name.clone())),
                vec![cps(&then, &identity(), &gensym2)],
            );
            let else_branch = Ast::Call(
                Box::new(Ast::var(i_name.clone())),
                vec![cps(&else_, &identity(), &gensym2)],
            );
            Ast::If(Box::new(c_val), Box::new(then_branch), Box::new(else_branch))
        })
    };

    let body = cps(cond, &inner_k, gensym);
    let lambda = LambdaNode::new(None, vec![Param { name: i_name }], body);
    Ast::Call(Box::new(Ast::Lambda(Rc::new(lambda))), vec![make_continuation(k, gensym)])
}

fn cps_call(func: &Ast, args: &[Ast], k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    let args = args.to_vec();
    let k = Rc::clone(k);
    let gensym2 = Rc::clone(gensym);
    let k_func: Cont = Rc::new(move |f_val: Ast| {
        let args = args.clone();
        let k = Rc::clone(&k);
        let gensym3 = Rc::clone(&gensym2);
        let k_args: Cont = Rc::new(move |arg_vals: Ast| {
            // `arg_vals` smuggles the accumulated argument vector through
            // as a bare `Prog` so it can travel through a single `Cont`;
            // unpacked immediately below.
            let args = match arg_vals {
                Ast::Prog(items) => items,
                other => vec![other],
            };
            let k_ast = make_continuation(&k, &gensym3);
            let mut call_args = vec![k_ast];
            call_args.extend(args);
            Ast::Call(Box::new(f_val.clone()), call_args)
        });
        cps_args(&args, Vec::new(), &k_args, &gensym2)
    });
    cps(func, &k_func, gensym)
}

fn cps_args(args: &[Ast], acc: Vec<Ast>, k: &Cont, gensym: &Rc<Gensym>) -> Ast {
    match args {
        [] => k(Ast::Prog(acc)),
        [head, rest @ ..] => {
            let rest = rest.to_vec();
            let k = Rc::clone(k);
            let gensym2 = Rc::clone(gensym);
            let k_head: Cont = Rc::new(move |v: Ast| {
                let mut acc = acc.clone();
                acc.push(v);
                cps_args(&rest, acc, &k, &gensym2)
            });
            cps(head, &k_head, gensym)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn cps_of(source: &str) -> Ast {
        let ast = parse(lex(source).unwrap()).unwrap();
        transform(&ast)
    }

    #[test]
    fn toplevel_wraps_in_call_to_toplevel_continuation() {
        match cps_of("1;") {
            Ast::Call(func, args) => {
                assert!(matches!(*func, Ast::Var(ref v) if v.name() == "β_TOPLEVEL"));
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn lambda_gains_a_leading_continuation_parameter() {
        let ast = cps_of("lambda(x) x;");
        fn find_lambda(node: &Ast) -> Option<Rc<LambdaNode>> {
            match node {
                Ast::Lambda(l) => Some(Rc::clone(l)),
                Ast::Call(f, args) => find_lambda(f).or_else(|| args.iter().find_map(find_lambda)),
                Ast::Prog(items) => items.iter().find_map(find_lambda),
                Ast::If(c, t, e) => find_lambda(c).or_else(|| find_lambda(t)).or_else(|| find_lambda(e)),
                _ => None,
            }
        }
        let lambda = find_lambda(&ast).expect("expected a Lambda node somewhere in the CPS tree");
        assert_eq!(lambda.params.len(), 2);
    }
}
