//! Mix expression parser.
//!
//! ```text
//! config  := clause ( '|' clause )*
//! clause  := NAME ( '=' | '<' ) sum
//! sum     := [ '+' | '-' ] term ( ( '+' | '-' ) term )*
//! term    := NUMBER '*' NAME | NAME [ '*' NUMBER ]
//! ```
//!
//! `<` marks a clause whose gains are renormalized to unity.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Error, Result};

/// One `OUT = a*IN + ...` section
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub output: String,
    pub normalize: bool,
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub input: String,
    pub gain: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number(f64),
    Pipe,
    Assign,
    Normalize,
    Plus,
    Minus,
    Star,
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices<'_>> = expression.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' | '=' | '<' | '+' | '-' | '*' => {
                chars.next();
                tokens.push(match c {
                    '|' => Token::Pipe,
                    '=' => Token::Assign,
                    '<' => Token::Normalize,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    _ => Token::Star,
                });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let literal = &expression[start..end];
                let value = literal.parse::<f64>().map_err(|_| {
                    Error::mix_expression(expression, format!("bad number '{literal}'"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Name(expression[start..end].to_string()));
            }
            other => {
                return Err(Error::mix_expression(
                    expression,
                    format!("unexpected character '{other}' at {start}"),
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::mix_expression(self.expression, reason)
    }

    fn clause(&mut self) -> Result<Clause> {
        let output = match self.next() {
            Some(Token::Name(name)) => name,
            other => return Err(self.error(format!("expected output channel, found {other:?}"))),
        };

        let normalize = match self.next() {
            Some(Token::Assign) => false,
            Some(Token::Normalize) => true,
            other => return Err(self.error(format!("expected '=' or '<', found {other:?}"))),
        };

        let mut terms = Vec::new();
        let mut sign = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                -1.0
            }
            Some(Token::Plus) => {
                self.pos += 1;
                1.0
            }
            _ => 1.0,
        };

        loop {
            let mut term = self.term()?;
            term.gain *= sign;
            terms.push(term);

            sign = match self.peek() {
                Some(Token::Plus) => 1.0,
                Some(Token::Minus) => -1.0,
                _ => break,
            };
            self.pos += 1;
        }

        Ok(Clause {
            output,
            normalize,
            terms,
        })
    }

    fn term(&mut self) -> Result<Term> {
        match self.next() {
            Some(Token::Number(gain)) => {
                if self.next() != Some(Token::Star) {
                    return Err(self.error("constant terms are not supported"));
                }
                match self.next() {
                    Some(Token::Name(input)) => Ok(Term { input, gain }),
                    other => Err(self.error(format!("expected input channel, found {other:?}"))),
                }
            }
            Some(Token::Name(input)) => {
                if self.peek() != Some(&Token::Star) {
                    return Ok(Term { input, gain: 1.0 });
                }
                self.pos += 1;
                match self.next() {
                    Some(Token::Number(gain)) => Ok(Term { input, gain }),
                    other => Err(self.error(format!("expected gain, found {other:?}"))),
                }
            }
            other => Err(self.error(format!("expected term, found {other:?}"))),
        }
    }
}

/// Parse a whole mix configuration into its clauses.
pub fn parse(expression: &str) -> Result<Vec<Clause>> {
    let mut parser = Parser {
        expression,
        tokens: tokenize(expression)?,
        pos: 0,
    };

    if parser.tokens.is_empty() {
        return Err(parser.error("empty expression"));
    }

    let mut clauses = vec![parser.clause()?];
    while let Some(token) = parser.next() {
        if token != Token::Pipe {
            return Err(parser.error(format!("expected '|', found {token:?}")));
        }
        clauses.push(parser.clause()?);
    }

    Ok(clauses)
}
