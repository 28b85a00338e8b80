//! Scope analyzer: `make_scope`.
//!
//! A single top-down walk extending one frame per lambda and resolving each
//! variable occurrence against the frame chain, free variables falling
//! through to a root/global frame. No separate symbol-interning table or
//! capture/uncapture pass is needed - this language has no
//! closures-over-a-VM-stack to hoist, just a frame chain to attach each
//! `Var` to its `VarDefine`.
//!
//! Scope metadata lives directly on the node rather than in a side table:
//! each [`crate::ast::VarNode`] carries its own `define` cell, so no
//! separate node-identity side table is needed.

use std::rc::Rc;

use crate::ast::{Ast, DefKind, VarDefine, VarNode};
use crate::env::{EnvRef, Frame};

/// Walks `ast` top-down, creating a fresh global frame and a fresh child
/// frame per `Lambda`, linking every `Var` node to its (possibly newly
/// created) `VarDefine`. Returns the global frame so callers (the emitter)
/// can enumerate every global binding.
///
/// Recomputed from scratch on every optimizer iteration: no metadata survives between calls, so a fresh `make_scope`
/// after a rewrite always reflects exactly the tree just built.
pub fn make_scope(ast: &Ast) -> EnvRef<VarDefine> {
    let global = Frame::root();
    walk(ast, &global, &global);
    global
}

fn walk(node: &Ast, env: &EnvRef<VarDefine>, global: &EnvRef<VarDefine>) {
    match node {
        Ast::Lit(_) | Ast::Raw(_) => {}

        Ast::Var(v) => link(v, env, global),

        Ast::Assign(left, right) => {
            walk(right, env, global);
            walk(left, env, global);
            if let Ast::Var(v) = left.as_ref() {
                if let Some(define) = v.define.borrow().clone() {
                    let mut define = define.borrow_mut();
                    define.assigned += 1;
                    define.current_value = Some((**right).clone());
                }
            }
        }

        Ast::Binary(_, left, right) => {
            walk(left, env, global);
            walk(right, env, global);
        }

        Ast::If(cond, then, else_) => {
            walk(cond, env, global);
            walk(then, env, global);
            walk(else_, env, global);
        }

        Ast::Lambda(lambda) => {
            let frame = Frame::extend(env);
            for param in &lambda.params {
                Frame::define(&frame, &param.name, VarDefine::new(&param.name, DefKind::LambdaParam));
            }
            for name in lambda.iife_params.borrow().iter() {
                if Frame::lookup(&frame, name).is_none() {
                    Frame::define(&frame, name, VarDefine::new(name, DefKind::IifeParam));
                }
            }
            walk(&lambda.body, &frame, global);
        }

        Ast::Let(vardefs, body) => {
            let mut frame = Rc::clone(env);
            for vardef in vardefs {
                if let Some(value) = &vardef.value {
                    walk(value, &frame, global);
                }
                frame = Frame::extend(&frame);
                Frame::define(&frame, &vardef.name, VarDefine::new(&vardef.name, DefKind::Global));
            }
            walk(body, &frame, global);
        }

        Ast::Call(func, args) => {
            walk(func, env, global);
            for arg in args {
                walk(arg, env, global);
            }
        }

        Ast::Prog(items) => {
            for item in items {
                walk(item, env, global);
            }
        }
    }
}

fn link(v: &Rc<VarNode>, env: &EnvRef<VarDefine>, global: &EnvRef<VarDefine>) {
    let name = v.name();
    let cell = match Frame::get(env, &name) {
        Some(cell) => cell,
        None => Frame::define(global, &name, VarDefine::new(&name, DefKind::Global)),
    };
    cell.borrow_mut().refs.push(Rc::clone(v));
    *v.define.borrow_mut() = Some(cell);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cps::transform;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn scope_of(source: &str) -> (Ast, EnvRef<VarDefine>) {
        let ast = transform(&parse(lex(source).unwrap()).unwrap());
        let global = make_scope(&ast);
        (ast, global)
    }

    #[test]
    fn free_variable_resolves_as_global() {
        let (_, global) = scope_of("print(x);");
        assert!(Frame::get(&global, "x").is_some());
        assert_eq!(Frame::get(&global, "x").unwrap().borrow().kind, DefKind::Global);
    }

    #[test]
    fn assignment_increments_assigned_count() {
        let (_, global) = scope_of("x = 1; x = 2;");
        let define = Frame::get(&global, "x").unwrap();
        assert_eq!(define.borrow().assigned, 2);
    }

    #[test]
    fn lambda_param_is_not_promoted_to_global() {
        let (_, global) = scope_of("f = lambda(a) a;");
        assert!(Frame::get(&global, "a").is_none());
    }
}
