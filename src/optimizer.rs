//! Fixed-point optimizer over the CPS AST.
//!
//! A pure, bottom-up recursive rewrite rebuilding `Ast` values, consulting
//! the `VarDefine` metadata each [`crate::ast::VarNode`] already carries via
//! [`crate::scope::make_scope`] rather than a separate node-identity side
//! table.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Ast, DefKind, LambdaNode, Lit, Param, VarDefine};
use crate::env::EnvRef;
use crate::gensym::Gensym;
use crate::scope::make_scope;

/// Runs the optimizer to a fixed point, then recomputes scope metadata one
/// final time so the emitter sees up-to-date `VarDefine`s.
pub fn optimize(ast: &Ast) -> (Ast, EnvRef<VarDefine>) {
    let mut current = ast.clone();
    loop {
        make_scope(&current);
        let gensym = Gensym::new();
        let mut changes = 0u32;
        let next = rewrite(&current, &mut changes, &gensym, None);
        if changes == 0 {
            let global = make_scope(&next);
            return (next, global);
        }
        current = next;
    }
}

/// Tracks the lambda directly enclosing the node under rewrite, needed by
/// rule 4 (IIFE unwrapping) to detect name collisions and register new
/// locals. `None` at top level, where IIFE unwrapping never applies.
struct Enclosing<'a> {
    own_params: &'a [Param],
    iife_params: &'a RefCell<Vec<String>>,
}

impl<'a> Enclosing<'a> {
    fn declares(&self, name: &str) -> bool {
        self.own_params.iter().any(|p| p.name == name) || self.iife_params.borrow().iter().any(|n| n == name)
    }
}

fn rewrite(node: &Ast, changes: &mut u32, gensym: &Gensym, enclosing: Option<&Enclosing>) -> Ast {
    match node {
        Ast::Lit(_) | Ast::Var(_) | Ast::Raw(_) => node.clone(),

        Ast::Prog(items) => rewrite_prog(items, changes, gensym, enclosing),

        Ast::If(cond, then, else_) => rewrite_if(cond, then, else_, changes, gensym, enclosing),

        Ast::Binary(op, left, right) => {
            let l = rewrite(left, changes, gensym, enclosing);
            let r = rewrite(right, changes, gensym, enclosing);
            if let (Ast::Lit(lv), Ast::Lit(rv)) = (&l, &r) {
                if let Some(folded) = fold_binary(op, lv, rv) {
                    *changes += 1;
                    return Ast::Lit(folded);
                }
            }
            Ast::Binary(op.clone(), Box::new(l), Box::new(r))
        }

        Ast::Assign(left, right) => rewrite_assign(left, right, changes, gensym, enclosing),

        Ast::Lambda(lambda) => rewrite_lambda(lambda, changes, gensym),

        Ast::Let(vardefs, body) => {
            let new_vardefs = vardefs
                .iter()
                .map(|v| crate::ast::VarDef {
                    name: v.name.clone(),
                    value: v.value.as_ref().map(|e| rewrite(e, changes, gensym, enclosing)),
                })
                .collect();
            let new_body = rewrite(body, changes, gensym, enclosing);
            Ast::Let(new_vardefs, Box::new(new_body))
        }

        Ast::Call(func, args) => rewrite_call(func, args, changes, gensym, enclosing),
    }
}

fn rewrite_prog(items: &[Ast], changes: &mut u32, gensym: &Gensym, enclosing: Option<&Enclosing>) -> Ast {
    if items.is_empty() {
        *changes += 1;
        return Ast::Lit(Lit::Bool(false));
    }
    if items.len() == 1 {
        *changes += 1;
        return rewrite(&items[0], changes, gensym, enclosing);
    }

    let head = &items[0];
    let tail = &items[1..];
    if is_pure(head) {
        *changes += 1;
        return rewrite_prog(tail, changes, gensym, enclosing);
    }

    let new_head = rewrite(head, changes, gensym, enclosing);
    let new_tail = rewrite_prog(tail, changes, gensym, enclosing);
    Ast::Prog(vec![new_head, new_tail])
}

fn rewrite_if(
    cond: &Ast,
    then: &Ast,
    else_: &Ast,
    changes: &mut u32,
    gensym: &Gensym,
    enclosing: Option<&Enclosing>,
) -> Ast {
    if let Ast::Lit(lit) = cond {
        *changes += 1;
        return if is_truthy(lit) {
            rewrite(then, changes, gensym, enclosing)
        } else {
            rewrite(else_, changes, gensym, enclosing)
        };
    }

    if let Ast::Var(v) = cond {
        if let Some(define) = v.define.borrow().clone() {
            let is_constant = is_constant_define(&define.borrow());
            let current_value = define.borrow().current_value.clone();
            if is_constant {
                if let Some(Ast::Lit(lit)) = current_value {
                    *changes += 1;
                    return if is_truthy(&lit) {
                        rewrite(then, changes, gensym, enclosing)
                    } else {
                        rewrite(else_, changes, gensym, enclosing)
                    };
                }
            }
        }
    }

    let c = rewrite(cond, changes, gensym, enclosing);
    let t = rewrite(then, changes, gensym, enclosing);
    let e = rewrite(else_, changes, gensym, enclosing);
    Ast::If(Box::new(c), Box::new(t), Box::new(e))
}

fn rewrite_assign(
    left: &Ast,
    right: &Ast,
    changes: &mut u32,
    gensym: &Gensym,
    enclosing: Option<&Enclosing>,
) -> Ast {
    if let Ast::Var(v) = left {
        if let Some(define) = v.define.borrow().clone() {
            let (assigned, refs_len) = {
                let d = define.borrow();
                (d.assigned, d.refs.len())
            };
            if assigned as usize == refs_len {
                *changes += 1;
                return rewrite(right, changes, gensym, enclosing);
            }

            if is_constant_define(&define.borrow()) {
                if let Ast::Var(w) = right {
                    if let Some(w_define) = w.define.borrow().clone() {
                        if is_constant_define(&w_define.borrow()) {
                            let new_name = w.name();
                            for r in &define.borrow().refs {
                                *r.name.borrow_mut() = new_name.clone();
                            }
                            *changes += 1;
                            return rewrite(right, changes, gensym, enclosing);
                        }
                    }
                }
            }
        }
    }

    let l = rewrite(left, changes, gensym, enclosing);
    let r = rewrite(right, changes, gensym, enclosing);
    Ast::Assign(Box::new(l), Box::new(r))
}

fn rewrite_lambda(lambda: &Rc<LambdaNode>, changes: &mut u32, gensym: &Gensym) -> Ast {
    let iife_params = RefCell::new(lambda.iife_params.borrow().clone());
    let ctx = Enclosing { own_params: &lambda.params, iife_params: &iife_params };
    let new_body = rewrite(&lambda.body, changes, gensym, Some(&ctx));

    // prune `iife_params` entries with no surviving references.
    let pruned: Vec<String> = iife_params
        .into_inner()
        .into_iter()
        .filter(|name| count_var_occurrences(&new_body, name) > 0)
        .collect();

    let new_lambda = LambdaNode {
        name: lambda.name.clone(),
        params: lambda.params.clone(),
        body: new_body,
        iife_params: RefCell::new(pruned),
    };

    // eta-reduce a lambda whose body is a trivial forwarding call.
    if let Ast::Call(f, args) = &new_lambda.body {
        if args.len() == new_lambda.params.len()
            && args.iter().zip(&new_lambda.params).all(|(a, p)| matches!(a, Ast::Var(v) if v.name() == p.name))
        {
            if let Ast::Var(fv) = f.as_ref() {
                let fname = fv.name();
                let not_a_param = !new_lambda.params.iter().any(|p| p.name == fname);
                let never_assigned = fv
                    .define
                    .borrow()
                    .as_ref()
                    .map(|d| d.borrow().assigned == 0)
                    .unwrap_or(true);
                if not_a_param && never_assigned {
                    *changes += 1;
                    return (**f).clone();
                }
            }
        }
    }

    Ast::Lambda(Rc::new(new_lambda))
}

fn rewrite_call(
    func: &Ast,
    args: &[Ast],
    changes: &mut u32,
    gensym: &Gensym,
    enclosing: Option<&Enclosing>,
) -> Ast {
    if let (Ast::Lambda(lambda), Some(ctx)) = (func, enclosing) {
        if lambda.name.is_none() {
            return unwrap_iife(lambda, args, changes, gensym, ctx);
        }
    }

    let f = rewrite(func, changes, gensym, enclosing);
    let new_args = args.iter().map(|a| rewrite(a, changes, gensym, enclosing)).collect();
    Ast::Call(Box::new(f), new_args)
}

/// Inline an immediately-invoked anonymous lambda into the enclosing lambda
/// as a run of assignments to (possibly renamed) locals.
fn unwrap_iife(
    lambda: &Rc<LambdaNode>,
    args: &[Ast],
    changes: &mut u32,
    gensym: &Gensym,
    ctx: &Enclosing,
) -> Ast {
    let mut assigns = Vec::with_capacity(lambda.params.len());

    for (i, param) in lambda.params.iter().enumerate() {
        let arg = args.get(i).cloned().unwrap_or(Ast::Lit(Lit::Bool(false)));
        let final_name = if ctx.declares(&param.name) {
            let renamed = gensym.fresh(&format!("{}$", param.name));
            if let Some(define) = first_var_define(&lambda.body, &param.name) {
                for r in &define.borrow().refs {
                    *r.name.borrow_mut() = renamed.clone();
                }
            }
            renamed
        } else {
            param.name.clone()
        };

        ctx.iife_params.borrow_mut().push(final_name.clone());
        assigns.push(Ast::Assign(Box::new(Ast::var(final_name)), Box::new(arg)));
    }

    *changes += 1;
    let optimized_body = rewrite(&lambda.body, changes, gensym, Some(ctx));
    let mut prog = assigns;
    prog.push(optimized_body);
    Ast::Prog(prog)
}

/// Finds the `VarDefine` cell for the first un-shadowed occurrence of
/// `name` reachable from `node`, skipping past nested `Lambda`s that
/// re-declare `name` as one of their own parameters. Since every `Var` node
/// already carries its own resolved `define` handle (see `scope.rs`), a
/// single un-shadowed occurrence is enough to recover the binding shared by
/// every reference to it.
fn first_var_define(node: &Ast, name: &str) -> Option<crate::ast::DefineHandle> {
    match node {
        Ast::Var(v) if v.name() == name => v.define.borrow().clone(),
        Ast::Var(_) | Ast::Lit(_) | Ast::Raw(_) => None,
        Ast::Lambda(lambda) => {
            if lambda.params.iter().any(|p| p.name == name) {
                None
            } else {
                first_var_define(&lambda.body, name)
            }
        }
        Ast::Binary(_, l, r) | Ast::Assign(l, r) => first_var_define(l, name).or_else(|| first_var_define(r, name)),
        Ast::If(c, t, e) => first_var_define(c, name)
            .or_else(|| first_var_define(t, name))
            .or_else(|| first_var_define(e, name)),
        Ast::Let(vardefs, body) => {
            if vardefs.iter().any(|v| v.name == name) {
                None
            } else {
                vardefs
                    .iter()
                    .find_map(|v| v.value.as_ref().and_then(|e| first_var_define(e, name)))
                    .or_else(|| first_var_define(body, name))
            }
        }
        Ast::Call(f, args) => first_var_define(f, name).or_else(|| args.iter().find_map(|a| first_var_define(a, name))),
        Ast::Prog(items) => items.iter().find_map(|i| first_var_define(i, name)),
    }
}

fn count_var_occurrences(node: &Ast, name: &str) -> usize {
    match node {
        Ast::Var(v) => usize::from(v.name() == name),
        Ast::Lit(_) | Ast::Raw(_) => 0,
        Ast::Lambda(lambda) => count_var_occurrences(&lambda.body, name),
        Ast::Binary(_, l, r) | Ast::Assign(l, r) => count_var_occurrences(l, name) + count_var_occurrences(r, name),
        Ast::If(c, t, e) => count_var_occurrences(c, name) + count_var_occurrences(t, name) + count_var_occurrences(e, name),
        Ast::Let(vardefs, body) => {
            vardefs.iter().filter_map(|v| v.value.as_ref()).map(|e| count_var_occurrences(e, name)).sum::<usize>()
                + count_var_occurrences(body, name)
        }
        Ast::Call(f, args) => count_var_occurrences(f, name) + args.iter().map(|a| count_var_occurrences(a, name)).sum::<usize>(),
        Ast::Prog(items) => items.iter().map(|i| count_var_occurrences(i, name)).sum(),
    }
}

/// Purity for Prog-head elision:
/// absence of `Call` and `Assign` in the subtree.
fn is_pure(node: &Ast) -> bool {
    match node {
        Ast::Lit(_) | Ast::Var(_) | Ast::Lambda(_) | Ast::Raw(_) => true,
        Ast::Call(_, _) | Ast::Assign(_, _) => false,
        Ast::Binary(_, l, r) => is_pure(l) && is_pure(r),
        Ast::If(c, t, e) => is_pure(c) && is_pure(t) && is_pure(e),
        Ast::Let(vardefs, body) => {
            vardefs.iter().all(|v| v.value.as_ref().map(is_pure).unwrap_or(true)) && is_pure(body)
        }
        Ast::Prog(items) => items.iter().all(is_pure),
    }
}

/// A variable is "constant" iff it is a one-assignment global/IIFE-param,
/// or a never-assigned lambda parameter.
fn is_constant_define(define: &VarDefine) -> bool {
    match define.kind {
        DefKind::Global | DefKind::IifeParam => define.assigned == 1,
        DefKind::LambdaParam => define.assigned == 0,
    }
}

fn is_truthy(lit: &Lit) -> bool {
    !matches!(lit, Lit::Bool(false))
}

/// Constant folding for the binary operators that can appear in parsed
/// source (`&&`/`||` never reach `Binary` - they're desugared at parse
/// time). Returns `None` (leaving the node unfolded) on any precondition
/// failure, per the "optimizer must never raise" policy;
/// the unfolded `Binary` surfaces the same error later, at emit/interpret
/// time.
fn fold_binary(op: &str, l: &Lit, r: &Lit) -> Option<Lit> {
    use Lit::*;
    match (op, l, r) {
        ("+", Num(a), Num(b)) => Some(Num(a + b)),
        ("-", Num(a), Num(b)) => Some(Num(a - b)),
        ("*", Num(a), Num(b)) => Some(Num(a * b)),
        ("/", Num(a), Num(b)) if *b != 0.0 => Some(Num(a / b)),
        ("%", Num(a), Num(b)) if *b != 0.0 => Some(Num(a % b)),
        ("<", Num(a), Num(b)) => Some(Bool(a < b)),
        (">", Num(a), Num(b)) => Some(Bool(a > b)),
        ("<=", Num(a), Num(b)) => Some(Bool(a <= b)),
        (">=", Num(a), Num(b)) => Some(Bool(a >= b)),
        ("==", a, b) => Some(Bool(lit_eq(a, b))),
        ("!=", a, b) => Some(Bool(!lit_eq(a, b))),
        _ => None,
    }
}

fn lit_eq(a: &Lit, b: &Lit) -> bool {
    match (a, b) {
        (Lit::Num(a), Lit::Num(b)) => a == b,
        (Lit::Str(a), Lit::Str(b)) => a == b,
        (Lit::Bool(a), Lit::Bool(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_constant_folding() {
        let node = Ast::Binary("+".into(), Box::new(Ast::Lit(Lit::Num(2.0))), Box::new(Ast::Lit(Lit::Num(3.0))));
        let mut changes = 0;
        let folded = rewrite(&node, &mut changes, &Gensym::new(), None);
        assert!(matches!(folded, Ast::Lit(Lit::Num(n)) if n == 5.0));
        assert!(changes > 0);
    }

    #[test]
    fn if_false_folds_to_else_branch() {
        let node = Ast::If(
            Box::new(Ast::Lit(Lit::Bool(false))),
            Box::new(Ast::Lit(Lit::Num(1.0))),
            Box::new(Ast::Lit(Lit::Num(2.0))),
        );
        let mut changes = 0;
        let folded = rewrite(&node, &mut changes, &Gensym::new(), None);
        assert!(matches!(folded, Ast::Lit(Lit::Num(n)) if n == 2.0));
    }

    #[test]
    fn prog_drops_pure_head() {
        let node = Ast::Prog(vec![Ast::Lit(Lit::Num(1.0)), Ast::Lit(Lit::Num(2.0))]);
        let mut changes = 0;
        let folded = rewrite(&node, &mut changes, &Gensym::new(), None);
        assert!(matches!(folded, Ast::Lit(Lit::Num(n)) if n == 2.0));
    }

    #[test]
    fn dead_assignment_to_pure_rhs_disappears() {
        use crate::cps::transform;
        use crate::lexer::lex;
        use crate::parser::parse;

        let ast = transform(&parse(lex("x = 5;").unwrap()).unwrap());
        let (optimized, _) = optimize(&ast);

        fn contains_assign_to(node: &Ast, name: &str) -> bool {
            match node {
                Ast::Assign(l, _) => matches!(l.as_ref(), Ast::Var(v) if v.name() == name),
                Ast::Prog(items) => items.iter().any(|i| contains_assign_to(i, name)),
                Ast::If(c, t, e) => contains_assign_to(c, name) || contains_assign_to(t, name) || contains_assign_to(e, name),
                Ast::Call(f, args) => contains_assign_to(f, name) || args.iter().any(|a| contains_assign_to(a, name)),
                Ast::Lambda(l) => contains_assign_to(&l.body, name),
                Ast::Binary(_, l, r) => contains_assign_to(l, name) || contains_assign_to(r, name),
                _ => false,
            }
        }
        assert!(!contains_assign_to(&optimized, "x"));
    }

    #[test]
    fn optimizer_is_idempotent() {
        use crate::cps::transform;
        use crate::lexer::lex;
        use crate::parser::parse;

        let ast = transform(&parse(lex("fib = lambda(n) if n < 2 then n else fib(n - 1) + fib(n - 2); fib(5);").unwrap()).unwrap());
        let (once, _) = optimize(&ast);
        let (twice, _) = optimize(&once);
        assert_eq!(format!("{:?}", once), format!("{:?}", twice));
    }
}
