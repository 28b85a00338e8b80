//! A single error type shared by every pipeline stage: a reason string plus
//! an optional source location, with a `Display` impl that renders
//! `line:col` when a location is known. No separate `Source`/`Span` pair
//! with excerpt rendering - just a bare `(line:col)` next to the message.

use std::fmt;

/// Which stage raised the error. Kept distinct from the `Error` struct
/// itself so every stage can still return the same `Result<T, Error>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Scope,
    Eval,
    Operator,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Lex => "Lex error",
            ErrorKind::Parse => "Parse error",
            ErrorKind::Scope => "Scope error",
            ErrorKind::Eval => "Eval error",
            ErrorKind::Operator => "Operator error",
        };
        write!(f, "{}", name)
    }
}

/// A source position, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Pos {
        Pos { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The error type returned by every stage in the pipeline.
///
/// Lexer and parser errors always carry a [`Pos`]; scope and evaluation
/// errors may not, since they are raised well after the offending token's
/// position has been discarded by the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<Pos>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error { kind, message: message.into(), pos: None }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, pos: Pos) -> Error {
        Error { kind, message: message.into(), pos: Some(pos) }
    }

    pub fn lex(message: impl Into<String>, pos: Pos) -> Error {
        Error::at(ErrorKind::Lex, message, pos)
    }

    pub fn parse(message: impl Into<String>, pos: Pos) -> Error {
        Error::at(ErrorKind::Parse, message, pos)
    }

    pub fn scope(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Scope, message)
    }

    pub fn eval(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Eval, message)
    }

    pub fn operator(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Operator, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{} ({}): {}", self.kind, pos, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
