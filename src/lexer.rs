//! Lexer: turns source text into a stream of [`Token`]s.
//!
//! An index into the source plus a `take_while`-style helper for greedily
//! consuming a run of characters, tracking `(line, col)` directly rather
//! than byte offsets into a separate span type, since only `(line:col)`
//! positions are needed, not source-excerpt rendering.

use crate::error::{Error, Pos};
use crate::token::{Keyword, Kind, Token};

const OPERATOR_CHARS: &str = "+-*/%=&|<>!";
const PUNCTUATION_CHARS: &str = ",;(){}[]";

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == 'λ'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == 'λ'
        || c == '_'
        || c == '?'
        || c == '!'
        || c == '-'
        || c == '<'
        || c == '>'
        || c == '='
}

/// A 1-lookahead character stream.
struct CharStream {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
}

impl CharStream {
    fn new(source: &str) -> CharStream {
        CharStream { chars: source.chars().collect(), index: 0, line: 1, col: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eof(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn croak(&self, message: impl Into<String>) -> Error {
        Error::lex(message, self.pos())
    }
}

/// Lexes `source` into a flat token list terminated implicitly by EOF (the
/// caller's [`crate::parser::TokenStream`] synthesizes the trailing
/// `Kind::Null` token).
pub fn lex(source: &str) -> Result<Vec<Token>, Error> {
    let mut input = CharStream::new(source);
    let mut tokens = Vec::new();

    loop {
        skip_whitespace_and_comments(&mut input);
        if input.eof() {
            break;
        }
        tokens.push(next_token(&mut input)?);
    }

    Ok(tokens)
}

fn skip_whitespace_and_comments(input: &mut CharStream) {
    loop {
        while let Some(c) = input.peek() {
            if c.is_whitespace() {
                input.next();
            } else {
                break;
            }
        }

        if input.peek() == Some('#') {
            while let Some(c) = input.peek() {
                input.next();
                if c == '\n' {
                    break;
                }
            }
            continue;
        }

        break;
    }
}

fn next_token(input: &mut CharStream) -> Result<Token, Error> {
    let pos = input.pos();
    let c = input.peek().expect("next_token called at eof");

    let kind = if c == '"' {
        read_string(input)?
    } else if c.is_ascii_digit() {
        read_number(input)
    } else if is_ident_start(c) {
        read_identifier(input)
    } else if PUNCTUATION_CHARS.contains(c) {
        input.next();
        Kind::Punc(c)
    } else if OPERATOR_CHARS.contains(c) {
        read_operator(input)
    } else {
        return Err(input.croak(format!("Unrecognized character '{}'", c)));
    };

    Ok(Token::new(kind, pos))
}

fn read_string(input: &mut CharStream) -> Result<Kind, Error> {
    let start = input.pos();
    input.next(); // opening quote
    let mut s = String::new();

    loop {
        match input.next() {
            None => return Err(Error::lex("unterminated string", start)),
            Some('"') => break,
            Some('\\') => {
                match input.next() {
                    Some(c) => s.push(c),
                    None => return Err(Error::lex("unterminated string", start)),
                }
            }
            Some(c) => s.push(c),
        }
    }

    Ok(Kind::Str(s))
}

fn read_number(input: &mut CharStream) -> Kind {
    let mut s = String::new();
    while let Some(c) = input.peek() {
        if c.is_ascii_digit() {
            s.push(c);
            input.next();
        } else {
            break;
        }
    }

    if input.peek() == Some('.') {
        // only consume the dot if digits precede and follow it; a lone
        // trailing dot with no digits after it is left unconsumed
        let save_index = input.index;
        let save_line = input.line;
        let save_col = input.col;
        input.next(); // the dot
        let mut frac = String::new();
        while let Some(c) = input.peek() {
            if c.is_ascii_digit() {
                frac.push(c);
                input.next();
            } else {
                break;
            }
        }
        if frac.is_empty() {
            input.index = save_index;
            input.line = save_line;
            input.col = save_col;
        } else {
            s.push('.');
            s.push_str(&frac);
        }
    }

    Kind::Num(s.parse().expect("lexer only ever builds valid float syntax"))
}

fn read_identifier(input: &mut CharStream) -> Kind {
    let mut s = String::new();
    while let Some(c) = input.peek() {
        if s.is_empty() {
            if !is_ident_start(c) {
                break;
            }
        } else if !is_ident_continue(c) {
            break;
        }
        s.push(c);
        input.next();
    }

    match Keyword::from_str(&s) {
        Some(kw) => Kind::Kw(kw),
        None => Kind::Var(s),
    }
}

fn read_operator(input: &mut CharStream) -> Kind {
    let mut s = String::new();
    while let Some(c) = input.peek() {
        if !OPERATOR_CHARS.contains(c) {
            break;
        }
        s.push(c);
        input.next();
    }
    Kind::Op(s)
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(source: &str) -> Vec<Kind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn empty_source() {
        assert_eq!(kinds(""), vec![]);
    }

    #[test]
    fn line_comment_is_skipped() {
        assert_eq!(kinds("# a comment\n1"), vec![Kind::Num(1.0)]);
    }

    #[test]
    fn string_literal_with_escape() {
        assert_eq!(kinds(r#""a\"b""#), vec![Kind::Str("a\"b".to_string())]);
    }

    #[test]
    fn unterminated_string_fails() {
        let err = lex("\"abc").unwrap_err();
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn number_with_single_dot() {
        assert_eq!(kinds("123.3"), vec![Kind::Num(123.3)]);
    }

    #[test]
    fn second_dot_errors_as_unrecognized() {
        // '.' alone is not a recognized punctuation or operator char, so
        // the leftover dot after a number fails to lex on its own.
        let err = lex("123.3.").unwrap_err();
        assert!(err.message.contains('.'));
    }

    #[test]
    fn identifier_with_special_continuation_chars() {
        assert_eq!(kinds("set-car!"), vec![Kind::Var("set-car!".to_string())]);
    }

    #[test]
    fn keywords_recognized() {
        assert_eq!(
            kinds("if then let else lambda λ true false js"),
            vec![
                Kind::Kw(Keyword::If),
                Kind::Kw(Keyword::Then),
                Kind::Kw(Keyword::Let),
                Kind::Kw(Keyword::Else),
                Kind::Kw(Keyword::Lambda),
                Kind::Kw(Keyword::Lambda),
                Kind::Kw(Keyword::True),
                Kind::Kw(Keyword::False),
                Kind::Kw(Keyword::Js),
            ]
        );
    }

    #[test]
    fn operators_greedily_consumed() {
        assert_eq!(kinds("<=>"), vec![Kind::Op("<=>".to_string())]);
    }

    #[test]
    fn punctuation_single_char() {
        assert_eq!(
            kinds("(){}[];,"),
            vec!['(', ')', '{', '}', '[', ']', ';', ',']
                .into_iter()
                .map(Kind::Punc)
                .collect::<Vec<_>>()
        );
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(source in "\\PC*") {
            let _ = lex(&source);
        }

        #[test]
        fn numbers_always_lex_to_a_single_num_token(n in 0u32..1_000_000) {
            let tokens = lex(&n.to_string()).unwrap();
            prop_assert_eq!(tokens.len(), 1);
            prop_assert!(matches!(tokens[0].kind, Kind::Num(_)));
        }
    }
}
