//! λ-lang: a small dynamically-typed expression language with a
//! CPS-transforming, optimizing compiler that emits host-target source,
//! plus a tree-walking reference interpreter.
//!
//! The pipeline is a three-stage core - [`cps::transform`] ->
//! [`optimizer::optimize`] -> [`emit::emit`] - fed by [`lexer::lex`] and
//! [`parser::parse`], with [`interpreter::run`] as the alternative back-end
//! that evaluates the parsed tree directly. [`compile_to_host`] and
//! [`interpret`] wire the stages together for callers who don't need to
//! touch the intermediate representations.

pub mod ast;
pub mod cps;
pub mod emit;
pub mod env;
pub mod error;
pub mod gensym;
pub mod interpreter;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod primitives;
pub mod scope;
pub mod token;

pub use error::{Error, ErrorKind, Result};
pub use interpreter::Data;

/// Runs the full compile pipeline, returning host-target source text.
pub fn compile_to_host(source: &str) -> Result<String> {
    let tokens = lexer::lex(source)?;
    let ast = parser::parse(tokens)?;
    let cps_ast = cps::transform(&ast);
    let (optimized, global) = optimizer::optimize(&cps_ast);
    Ok(emit::emit(&optimized, &global))
}

/// Parses and directly interprets `source`, writing any `print`/`println`
/// output to `sink`.
pub fn interpret(source: &str, sink: &mut dyn std::io::Write) -> Result<Data> {
    let tokens = lexer::lex(source)?;
    let ast = parser::parse(tokens)?;
    interpreter::run(&ast, sink)
}

/// Convenience wrapper over [`interpret`] that writes output to the
/// process's stdout.
pub fn run_to_stdout(source: &str) -> Result<Data> {
    interpret(source, &mut std::io::stdout())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compile_to_host_emits_use_strict_prologue() {
        let out = compile_to_host("print(1 + 2 * 3);").unwrap();
        assert!(out.starts_with("\"use strict\";"));
    }

    #[test]
    fn interpret_runs_the_program_directly() {
        let mut out = Vec::new();
        interpret("println(1 + 2 * 3);", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "6\n");
    }

    #[test]
    fn lex_error_surfaces_through_compile_to_host() {
        assert!(compile_to_host("1 $$ 2;").is_err());
    }
}
