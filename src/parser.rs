//! Precedence-climbing parser producing a [`crate::ast::Ast`] from a token
//! stream.
//!
//! A `Parser` struct walking a flat `Vec<Token>`, dispatching atoms then
//! climbing precedence for infix operators. No separate bracket-matching
//! reader stage - this language's grammar parses its own parentheses and
//! braces directly.

use std::rc::Rc;

use crate::ast::{Ast, LambdaNode, Lit, Param, VarDef, VarNode};
use crate::error::{Error, Pos};
use crate::gensym::Gensym;
use crate::token::{Keyword, Kind, Token};

/// A 1-lookahead token stream.
struct TokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream {
    fn new(mut tokens: Vec<Token>) -> TokenStream {
        let eof_pos = tokens.last().map(|t| t.pos).unwrap_or(Pos::new(1, 1));
        tokens.push(Token::eof(eof_pos));
        TokenStream { tokens, index: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn next(&mut self) -> Token {
        let t = self.tokens[self.index].clone();
        if !t.is_eof() {
            self.index += 1;
        }
        t
    }

    fn eof(&self) -> bool {
        self.peek().is_eof()
    }

    fn croak(&self, message: impl Into<String>) -> Error {
        Error::parse(message, self.peek().pos)
    }
}

/// Binary operator precedence table. Higher binds tighter.
fn prec(op: &str) -> Option<u8> {
    Some(match op {
        "=" => 1,
        "||" => 2,
        "&&" => 3,
        "<" | ">" | "<=" | ">=" | "==" | "!=" => 7,
        "+" | "-" => 10,
        "*" | "/" | "%" => 20,
        _ => return None,
    })
}

pub fn parse(tokens: Vec<Token>) -> Result<Ast, Error> {
    let mut parser = Parser { input: TokenStream::new(tokens), gensym: Gensym::new() };
    let prog = parser.toplevel()?;
    if !parser.input.eof() {
        return Err(parser.input.croak(format!("unexpected {} after program", parser.input.peek().kind)));
    }
    Ok(prog)
}

struct Parser {
    input: TokenStream,
    gensym: Gensym,
}

impl Parser {
    /// `toplevel = expression (;expression)* ;?`.
    fn toplevel(&mut self) -> Result<Ast, Error> {
        self.prog_until(|p| p.input.eof())
    }

    fn prog_until(&mut self, is_end: impl Fn(&Parser) -> bool) -> Result<Ast, Error> {
        let mut items = Vec::new();
        while !is_end(self) {
            items.push(self.expression()?);
            if self.is_punc(';') {
                self.input.next();
            } else {
                break;
            }
        }
        Ok(Ast::Prog(items))
    }

    fn expression(&mut self) -> Result<Ast, Error> {
        self.expr_bp(1)
    }

    /// Precedence-climbing infix loop over a call-chain-augmented atom.
    fn expr_bp(&mut self, min_prec: u8) -> Result<Ast, Error> {
        let mut left = self.call_chain()?;

        loop {
            let op = match self.peek_op() {
                Some(op) => op,
                None => break,
            };
            let op_prec = match prec(&op) {
                Some(p) if p >= min_prec => p,
                _ => break,
            };
            self.input.next();

            left = match op.as_str() {
                "=" => {
                    let right = self.expr_bp(op_prec)?;
                    Ast::Assign(Box::new(left), Box::new(right))
                }
                "||" => {
                    let right = self.expr_bp(op_prec + 1)?;
                    self.desugar_or(left, right)
                }
                "&&" => {
                    let right = self.expr_bp(op_prec + 1)?;
                    Ast::If(Box::new(left), Box::new(right), Box::new(Ast::Lit(Lit::Bool(false))))
                }
                _ => {
                    let right = self.expr_bp(op_prec + 1)?;
                    Ast::Binary(op, Box::new(left), Box::new(right))
                }
            };
        }

        Ok(left)
    }

    /// `a || b` -> `((λ(t) if t then t else b))(a)`, using
    /// a fresh name so `a` is evaluated exactly once.
    fn desugar_or(&mut self, a: Ast, b: Ast) -> Ast {
        let t_name = self.gensym.fresh("t");
        let t_param = Param { name: t_name.clone() };
        let body = Ast::If(
            Box::new(Ast::var(t_name.clone())),
            Box::new(Ast::var(t_name)),
            Box::new(b),
        );
        let lambda = LambdaNode::new(None, vec![t_param], body);
        Ast::Call(Box::new(Ast::Lambda(Rc::new(lambda))), vec![a])
    }

    fn peek_op(&self) -> Option<String> {
        match &self.input.peek().kind {
            Kind::Op(op) => Some(op.clone()),
            _ => None,
        }
    }

    /// An atom, then zero or more trailing `(` argument lists promoting it
    /// to a `Call`: any atom followed by `(` becomes a call expression.
    fn call_chain(&mut self) -> Result<Ast, Error> {
        let mut node = self.atom()?;
        while self.is_punc('(') {
            let args = self.arg_list()?;
            node = Ast::Call(Box::new(node), args);
        }
        Ok(node)
    }

    fn arg_list(&mut self) -> Result<Vec<Ast>, Error> {
        self.expect_punc('(')?;
        let mut args = Vec::new();
        if !self.is_punc(')') {
            loop {
                args.push(self.expression()?);
                if self.is_punc(',') {
                    self.input.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punc(')')?;
        Ok(args)
    }

    fn atom(&mut self) -> Result<Ast, Error> {
        if self.is_punc('(') {
            self.input.next();
            let e = self.expression()?;
            self.expect_punc(')')?;
            return Ok(e);
        }
        if self.is_punc('{') {
            self.input.next();
            let prog = self.prog_until(|p| p.is_punc('}'))?;
            self.expect_punc('}')?;
            return Ok(prog);
        }

        let token = self.input.peek().clone();
        match token.kind {
            Kind::Kw(Keyword::If) => self.if_expr(),
            Kind::Kw(Keyword::Let) => self.let_expr(),
            Kind::Kw(Keyword::True) => {
                self.input.next();
                Ok(Ast::Lit(Lit::Bool(true)))
            }
            Kind::Kw(Keyword::False) => {
                self.input.next();
                Ok(Ast::Lit(Lit::Bool(false)))
            }
            Kind::Kw(Keyword::Lambda) => self.lambda_expr(),
            Kind::Kw(Keyword::Js) => self.js_expr(),
            Kind::Num(n) => {
                self.input.next();
                Ok(Ast::Lit(Lit::Num(n)))
            }
            Kind::Str(s) => {
                self.input.next();
                Ok(Ast::Lit(Lit::Str(s)))
            }
            Kind::Var(name) => {
                self.input.next();
                Ok(Ast::var(name))
            }
            _ => Err(self.input.croak(format!("unexpected {}", token.kind))),
        }
    }

    /// `if cond [then] expr [else expr]`.
    fn if_expr(&mut self) -> Result<Ast, Error> {
        self.input.next(); // `if`
        let cond = self.expression()?;
        if self.is_keyword(Keyword::Then) {
            self.input.next();
        }
        let then = self.expression()?;
        let else_ = if self.is_keyword(Keyword::Else) {
            self.input.next();
            self.expression()?
        } else {
            Ast::Lit(Lit::Bool(false))
        };
        Ok(Ast::If(Box::new(cond), Box::new(then), Box::new(else_)))
    }

    /// `let [name] ( vardef,* ) expr`.
    fn let_expr(&mut self) -> Result<Ast, Error> {
        self.input.next(); // `let`
        let name = match &self.input.peek().kind {
            Kind::Var(n) => {
                let n = n.clone();
                self.input.next();
                Some(n)
            }
            _ => None,
        };

        self.expect_punc('(')?;
        let mut names = Vec::new();
        let mut values = Vec::new();
        if !self.is_punc(')') {
            loop {
                let n = self.expect_var()?;
                let v = if self.is_op("=") {
                    self.input.next();
                    Some(self.expression()?)
                } else {
                    None
                };
                names.push(n);
                values.push(v);
                if self.is_punc(',') {
                    self.input.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punc(')')?;
        let body = self.expression()?;

        match name {
            // Named let desugars eagerly to a self-applied named lambda
            //; missing defaults become `Literal(false)`
            // right away, unlike the plain `Let` form below.
            Some(fname) => {
                let params = names.iter().cloned().map(|name| Param { name }).collect();
                let args = values
                    .into_iter()
                    .map(|v| v.unwrap_or(Ast::Lit(Lit::Bool(false))))
                    .collect();
                let lambda = LambdaNode::new(Some(fname), params, body);
                Ok(Ast::Call(Box::new(Ast::Lambda(Rc::new(lambda))), args))
            }
            None => {
                let vardefs = names
                    .into_iter()
                    .zip(values)
                    .map(|(name, value)| VarDef { name, value })
                    .collect();
                Ok(Ast::Let(vardefs, Box::new(body)))
            }
        }
    }

    /// `lambda|λ [name] ( name,* ) expr`.
    fn lambda_expr(&mut self) -> Result<Ast, Error> {
        self.input.next(); // `lambda` / `λ`
        let name = match &self.input.peek().kind {
            Kind::Var(n) => {
                let n = n.clone();
                self.input.next();
                Some(n)
            }
            _ => None,
        };

        self.expect_punc('(')?;
        let mut params = Vec::new();
        if !self.is_punc(')') {
            loop {
                params.push(Param { name: self.expect_var()? });
                if self.is_punc(',') {
                    self.input.next();
                } else {
                    break;
                }
            }
        }
        self.expect_punc(')')?;
        let body = self.expression()?;
        Ok(Ast::Lambda(Rc::new(LambdaNode::new(name, params, body))))
    }

    /// `js "literal"`.
    fn js_expr(&mut self) -> Result<Ast, Error> {
        self.input.next(); // `js`
        match self.input.next().kind {
            Kind::Str(s) => Ok(Ast::Raw(s)),
            other => Err(self.input.croak(format!("expected a string literal after `js`, found {}", other))),
        }
    }

    fn expect_var(&mut self) -> Result<String, Error> {
        match self.input.next().kind {
            Kind::Var(name) => Ok(name),
            other => Err(self.input.croak(format!("expected an identifier, found {}", other))),
        }
    }

    fn expect_punc(&mut self, c: char) -> Result<(), Error> {
        match self.input.next().kind {
            Kind::Punc(p) if p == c => Ok(()),
            other => Err(self.input.croak(format!("expected `{}`, found {}", c, other))),
        }
    }

    fn is_punc(&self, c: char) -> bool {
        matches!(&self.input.peek().kind, Kind::Punc(p) if *p == c)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.input.peek().kind, Kind::Kw(k) if *k == kw)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(&self.input.peek().kind, Kind::Op(o) if o == op)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex;

    fn parse_source(source: &str) -> Ast {
        parse(lex(source).unwrap()).unwrap()
    }

    #[test]
    fn number_literal() {
        match parse_source("1;") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Lit(Lit::Num(n)) if n == 1.0)),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        // 1 + 2 * 3 should parse with * binding tighter than +.
        match parse_source("1 + 2 * 3;") {
            Ast::Prog(items) => match &items[0] {
                Ast::Binary(op, _, right) => {
                    assert_eq!(op, "+");
                    assert!(matches!(**right, Ast::Binary(ref o, _, _) if o == "*"));
                }
                other => panic!("expected Binary, got {:?}", other),
            },
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn assignment_is_right_associative_and_lowest_precedence() {
        match parse_source("x = y = 1;") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Assign(_, _))),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn call_chain_after_atom() {
        match parse_source("f(1)(2);") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Call(_, _))),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn if_without_else_defaults_to_false() {
        match parse_source("if true then 1;") {
            Ast::Prog(items) => match &items[0] {
                Ast::If(_, _, else_) => assert!(matches!(**else_, Ast::Lit(Lit::Bool(false)))),
                other => panic!("expected If, got {:?}", other),
            },
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn empty_block_is_empty_prog() {
        match parse_source("{};") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Prog(ref inner) if inner.is_empty())),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn named_let_desugars_to_call_of_named_lambda() {
        match parse_source("let foo(x=1) x;") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Call(_, _))),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn unnamed_let_becomes_let_node() {
        match parse_source("let (x=1, y) x + y;") {
            Ast::Prog(items) => assert!(matches!(items[0], Ast::Let(_, _))),
            other => panic!("expected Prog, got {:?}", other),
        }
    }

    #[test]
    fn unterminated_paren_fails() {
        assert!(parse(lex("(1 + 2;").unwrap()).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_token_streams(source in "\\PC*") {
            if let Ok(tokens) = lex(&source) {
                let _ = parse(tokens);
            }
        }

        #[test]
        fn any_two_numbers_added_parse_to_a_binary_plus(a in 0u32..10_000, b in 0u32..10_000) {
            let source = format!("{} + {};", a, b);
            match parse_source(&source) {
                Ast::Prog(items) => prop_assert!(matches!(items[0], Ast::Binary(ref op, _, _) if op == "+")),
                other => prop_assert!(false, "expected Prog, got {:?}", other),
            }
        }
    }
}
