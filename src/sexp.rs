//! Bracketed tree reader and writer.
//!
//! Treebank trees, constraint skeletons and trainer event records all share
//! the same external form: S-expressions of atoms and parenthesized lists.
//!
//! # Example
//!
//! ```rust
//! use lexparse::sexp::read_sexp;
//!
//! let tree = read_sexp("(S (NP (NN dog)) (VP (VBZ barks)))").unwrap();
//! assert_eq!(tree.label(), Some("S"));
//! assert_eq!(tree.leaves(), vec!["dog", "barks"]);
//! ```

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Reader error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SexpError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected ')' at position {0}")]
    UnexpectedClose(usize),
    #[error("trailing input at position {0}")]
    TrailingInput(usize),
    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },
    #[error("nesting deeper than {limit} at position {position}")]
    TooDeep { position: usize, limit: usize },
}

/// Deepest list nesting the reader accepts. Treebank trees stay far below it.
pub const MAX_DEPTH: usize = 256;

/// Result type for reading operations.
pub type SexpResult<T> = Result<T, SexpError>;

/// An S-expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn atom(s: impl Into<String>) -> Self {
        Sexp::Atom(s.into())
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(s) => Some(s),
            Sexp::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Atom(_) => None,
        }
    }

    /// Node label of a tree: the leading atom of a list.
    pub fn label(&self) -> Option<&str> {
        self.as_list().and_then(|items| items.first()).and_then(Sexp::as_atom)
    }

    /// Subtrees after the label.
    pub fn children(&self) -> &[Sexp] {
        match self {
            Sexp::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// `(TAG word)`
    pub fn is_preterminal(&self) -> bool {
        matches!(self.as_list(), Some([Sexp::Atom(_), Sexp::Atom(_)]))
    }

    /// Terminal words in surface order.
    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Sexp::Atom(s) => out.push(s),
            Sexp::List(_) => {
                for child in self.children() {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Unwrap the anonymous outer list treebanks put around each tree: `((S ...))`.
    pub fn strip_wrapper(&self) -> &Sexp {
        match self.as_list() {
            Some([inner @ Sexp::List(_)]) => inner,
            _ => self,
        }
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(s) => write!(f, "{}", s),
            Sexp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Token types for the lexer.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Atom(String),
    Eof,
}

/// Lexer for bracketed input.
struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
            position: 0,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                // Skip comment to end of line
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> SexpResult<(Token, usize)> {
        self.skip_whitespace();
        let start = self.position;

        match self.peek() {
            None => Ok((Token::Eof, start)),
            Some('(') => {
                self.advance();
                Ok((Token::LParen, start))
            }
            Some(')') => {
                self.advance();
                Ok((Token::RParen, start))
            }
            Some(_) => {
                let mut atom = String::new();
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    atom.push(c);
                    self.advance();
                }
                Ok((Token::Atom(atom), start))
            }
        }
    }
}

/// Reader over a string holding one or more S-expressions.
pub struct Reader<'a> {
    lexer: Lexer<'a>,
    current: Token,
    position: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str) -> SexpResult<Self> {
        let mut lexer = Lexer::new(input);
        let (current, position) = lexer.next_token()?;
        Ok(Reader {
            lexer,
            current,
            position,
            depth: 0,
        })
    }

    fn advance(&mut self) -> SexpResult<(Token, usize)> {
        let (next, position) = self.lexer.next_token()?;
        let prev = std::mem::replace(&mut self.current, next);
        let prev_position = std::mem::replace(&mut self.position, position);
        Ok((prev, prev_position))
    }

    pub fn at_end(&self) -> bool {
        self.current == Token::Eof
    }

    /// Read the next expression.
    pub fn read(&mut self) -> SexpResult<Sexp> {
        match self.advance()? {
            (Token::Atom(s), _) => Ok(Sexp::Atom(s)),
            (Token::LParen, position) => {
                if self.depth >= MAX_DEPTH {
                    return Err(SexpError::TooDeep {
                        position,
                        limit: MAX_DEPTH,
                    });
                }
                self.depth += 1;
                let list = self.read_list();
                self.depth -= 1;
                list
            }
            (Token::RParen, position) => Err(SexpError::UnexpectedClose(position)),
            (Token::Eof, _) => Err(SexpError::UnexpectedEof),
        }
    }

    fn read_list(&mut self) -> SexpResult<Sexp> {
        let mut items = Vec::new();
        loop {
            match &self.current {
                Token::RParen => {
                    self.advance()?;
                    return Ok(Sexp::List(items));
                }
                Token::Eof => return Err(SexpError::UnexpectedEof),
                _ => items.push(self.read()?),
            }
        }
    }
}

/// Read exactly one expression.
pub fn read_sexp(input: &str) -> SexpResult<Sexp> {
    let mut reader = Reader::new(input)?;
    let sexp = reader.read()?;
    if !reader.at_end() {
        return Err(SexpError::TrailingInput(reader.position));
    }
    Ok(sexp)
}

/// Read every expression in the input.
pub fn read_all(input: &str) -> SexpResult<Vec<Sexp>> {
    let mut reader = Reader::new(input)?;
    let mut out = Vec::new();
    while !reader.at_end() {
        out.push(reader.read()?);
    }
    Ok(out)
}

/// Read a tree and require it to be a labelled list.
pub fn read_tree(input: &str) -> SexpResult<Sexp> {
    let sexp = read_sexp(input)?;
    let tree = sexp.strip_wrapper().clone();
    if tree.label().is_none() {
        return Err(SexpError::Expected {
            expected: "labelled tree".to_string(),
            found: tree.to_string(),
        });
    }
    Ok(tree)
}
