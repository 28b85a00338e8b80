//! Host-target source emitter.
//!
//! Every `emit_*` helper here writes into a single growable `String`
//! accumulator rather than building and joining intermediate strings,
//! avoiding repeated concatenation.

use std::fmt::Write as _;

use crate::ast::{Ast, DefKind, Lit, VarDefine};
use crate::env::{EnvRef, Frame};

const BOOLEAN_SHAPE_OPS: &[&str] = &["<", ">", "<=", ">=", "==", "!=", "&&", "||"];

/// Emits `ast` (already CPS-transformed and optimized) as host-target
/// source text, given the global frame produced by optimization.
pub fn emit(ast: &Ast, global: &EnvRef<VarDefine>) -> String {
    let mut out = String::new();
    out.push_str("\"use strict\";");

    let mut globals: Vec<String> = Frame::entries(global)
        .into_iter()
        .filter(|(_, cell)| {
            let d = cell.borrow();
            d.kind == DefKind::Global && d.assigned > 0
        })
        .map(|(name, _)| name)
        .collect();
    globals.sort();

    if !globals.is_empty() {
        write!(out, "let {};", globals.join(",")).unwrap();
    }

    emit_expr(ast, &mut out);
    out.push(';');
    out
}

fn emit_expr(ast: &Ast, out: &mut String) {
    match ast {
        Ast::Lit(lit) => emit_lit(lit, out),
        Ast::Var(v) => out.push_str(&v.name()),
        Ast::Binary(op, l, r) => {
            out.push('(');
            emit_expr(l, out);
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            emit_expr(r, out);
            out.push(')');
        }
        Ast::Assign(l, r) => {
            out.push('(');
            emit_expr(l, out);
            out.push_str(" = ");
            emit_expr(r, out);
            out.push(')');
        }
        Ast::If(cond, then, else_) => {
            out.push('(');
            emit_expr(cond, out);
            if !is_boolean_shape(cond) {
                out.push_str(" !== false");
            }
            out.push_str(" ? ");
            emit_expr(then, out);
            out.push_str(" : ");
            emit_expr(else_, out);
            out.push(')');
        }
        Ast::Lambda(lambda) => {
            let name = lambda.name.clone().unwrap_or_else(|| "β_CC".to_string());
            out.push_str("function ");
            out.push_str(&name);
            out.push('(');
            for (i, p) in lambda.params.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&p.name);
            }
            out.push_str(") {");
            let iife_params = lambda.iife_params.borrow();
            if !iife_params.is_empty() {
                write!(out, "let {};", iife_params.join(",")).unwrap();
            }
            write!(out, "GUARD(arguments, {});", name).unwrap();
            out.push_str("return ");
            emit_expr(&lambda.body, out);
            out.push_str("; }");
        }
        Ast::Let(vardefs, body) => emit_let(vardefs, body, out),
        Ast::Call(func, args) => {
            emit_expr(func, out);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_expr(a, out);
            }
            out.push(')');
        }
        Ast::Prog(items) => {
            if items.is_empty() {
                out.push_str("(false)");
                return;
            }
            out.push('(');
            for (i, e) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                emit_expr(e, out);
            }
            out.push(')');
        }
        Ast::Raw(text) => {
            out.push('(');
            out.push_str(text);
            out.push(')');
        }
    }
}

/// A `Let` surviving to emission means an earlier stage skipped dissolving
/// it - the CPS transform already does this itself, via `cps_let` in
/// `cps.rs`. Kept only as a defensive fallback, expanding the same way the
/// CPS transform would have.
fn emit_let(vardefs: &[crate::ast::VarDef], body: &Ast, out: &mut String) {
    match vardefs {
        [] => emit_expr(body, out),
        [v0, rest @ ..] => {
            let arg = v0.value.clone().unwrap_or(Ast::Lit(Lit::Bool(false)));
            out.push_str("(function(");
            out.push_str(&v0.name);
            out.push_str(") {return ");
            emit_let(rest, body, out);
            out.push_str(";})(");
            emit_expr(&arg, out);
            out.push(')');
        }
    }
}

fn emit_lit(lit: &Lit, out: &mut String) {
    match lit {
        Lit::Num(n) => {
            write!(out, "{}", n).unwrap();
        }
        Lit::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Lit::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
    }
}

/// A `Binary` whose operator is a comparison/logical operator is provably
/// boolean-valued regardless of its operands, except `&&`/`||`, which
/// additionally require both subterms to be boolean-shape
/// themselves (they never appear post-parse, since the parser desugars
/// short-circuit operators away, but the check is kept for completeness).
fn is_boolean_shape(ast: &Ast) -> bool {
    match ast {
        Ast::Binary(op, l, r) if BOOLEAN_SHAPE_OPS.contains(&op.as_str()) => match op.as_str() {
            "&&" | "||" => is_boolean_shape(l) && is_boolean_shape(r),
            _ => true,
        },
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cps::transform;
    use crate::lexer::lex;
    use crate::optimizer::optimize;
    use crate::parser::parse;

    fn emit_source(source: &str) -> String {
        let ast = transform(&parse(lex(source).unwrap()).unwrap());
        let (optimized, global) = optimize(&ast);
        emit(&optimized, &global)
    }

    #[test]
    fn emits_use_strict_prologue() {
        assert!(emit_source("1;").starts_with("\"use strict\";"));
    }

    #[test]
    fn comparison_omits_redundant_coercion() {
        let out = emit_source("if 1 < 2 then 3 else 4;");
        assert!(!out.contains("!== false"));
    }

    #[test]
    fn non_boolean_cond_gets_coercion() {
        let out = emit_source("x = 1; if x then 3 else 4;");
        assert!(out.contains("!== false"));
    }

    #[test]
    fn string_literal_is_escaped() {
        let out = emit_source(r#"print("a\"b");"#);
        assert!(out.contains(r#"\"a\\\"b\""#) || out.contains("a\\\"b"));
    }
}
