//! Lexer: tokenizes the pipeline DSL input
//!
//! Produces a stream of tokens for the parser. Handles keywords,
//! identifiers, string and number literals, guard operators, and
//! structural tokens ({, }, ->, etc.).

use crate::errors::{DslError, DslResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Pipeline,
    Version,
    MaxEscalations,
    Stage,
    Name,
    Executor,
    Timeout,
    Retry,
    Confidence,
    Escalate,
    Mode,
    Entry,
    Terminal,
    Edges,
    On,
    Join,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,
    True,
    False,

    // Structural
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    Arrow, // ->
    Comma,
    Dot,

    // Guard operators
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
    Bang,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "PIPELINE"),
            Self::Version => write!(f, "VERSION"),
            Self::MaxEscalations => write!(f, "MAX_ESCALATIONS"),
            Self::Stage => write!(f, "STAGE"),
            Self::Name => write!(f, "NAME"),
            Self::Executor => write!(f, "EXECUTOR"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Retry => write!(f, "RETRY"),
            Self::Confidence => write!(f, "CONFIDENCE"),
            Self::Escalate => write!(f, "ESCALATE"),
            Self::Mode => write!(f, "MODE"),
            Self::Entry => write!(f, "ENTRY"),
            Self::Terminal => write!(f, "TERMINAL"),
            Self::Edges => write!(f, "EDGES"),
            Self::On => write!(f, "ON"),
            Self::Join => write!(f, "JOIN"),
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Arrow => write!(f, "->"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::AndAnd => write!(f, "&&"),
            Self::OrOr => write!(f, "||"),
            Self::Bang => write!(f, "!"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for the pipeline DSL
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> DslResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> DslResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        match ch {
            '{' => {
                self.advance();
                Ok(Token::new(TokenKind::OpenBrace, "{", line, col))
            }
            '}' => {
                self.advance();
                Ok(Token::new(TokenKind::CloseBrace, "}", line, col))
            }
            '(' => {
                self.advance();
                Ok(Token::new(TokenKind::OpenParen, "(", line, col))
            }
            ')' => {
                self.advance();
                Ok(Token::new(TokenKind::CloseParen, ")", line, col))
            }
            ',' => {
                self.advance();
                Ok(Token::new(TokenKind::Comma, ",", line, col))
            }
            '.' => {
                self.advance();
                Ok(Token::new(TokenKind::Dot, ".", line, col))
            }
            '-' if self.peek_at(1) == Some('>') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::Arrow, "->", line, col))
            }
            '=' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::EqEq, "==", line, col))
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::NotEq, "!=", line, col))
            }
            '!' => {
                self.advance();
                Ok(Token::new(TokenKind::Bang, "!", line, col))
            }
            '>' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::Ge, ">=", line, col))
            }
            '>' => {
                self.advance();
                Ok(Token::new(TokenKind::Gt, ">", line, col))
            }
            '<' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::Le, "<=", line, col))
            }
            '<' => {
                self.advance();
                Ok(Token::new(TokenKind::Lt, "<", line, col))
            }
            '&' if self.peek_at(1) == Some('&') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::AndAnd, "&&", line, col))
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::OrOr, "||", line, col))
            }
            '"' => self.read_string_literal(),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier_or_keyword(),
            _ => Err(DslError::ParseError {
                line,
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn read_string_literal(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != '"' {
            if self.input[self.pos] == '\\' && self.peek_at(1) == Some('"') {
                self.advance();
                text.push('"');
            } else {
                text.push(self.input[self.pos]);
            }
            self.advance();
        }

        if self.pos >= self.input.len() {
            return Err(DslError::ParseError {
                line,
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.advance(); // skip closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            text.push(self.input[self.pos]);
            self.advance();
        }

        // a fractional part, as in CONFIDENCE 0.5; a bare dot stays a
        // Dot token for guard paths
        if self.pos < self.input.len()
            && self.input[self.pos] == '.'
            && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            text.push('.');
            self.advance();
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.advance();
        }

        let kind = match text.as_str() {
            "PIPELINE" => TokenKind::Pipeline,
            "VERSION" => TokenKind::Version,
            "MAX_ESCALATIONS" => TokenKind::MaxEscalations,
            "STAGE" => TokenKind::Stage,
            "NAME" => TokenKind::Name,
            "EXECUTOR" => TokenKind::Executor,
            "TIMEOUT" => TokenKind::Timeout,
            "RETRY" => TokenKind::Retry,
            "CONFIDENCE" => TokenKind::Confidence,
            "ESCALATE" => TokenKind::Escalate,
            "MODE" => TokenKind::Mode,
            "ENTRY" => TokenKind::Entry,
            "TERMINAL" => TokenKind::Terminal,
            "EDGES" => TokenKind::Edges,
            "ON" => TokenKind::On,
            "JOIN" => TokenKind::Join,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier,
        };

        Ok(Token::new(kind, text, line, col))
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' || (ch == '/' && self.peek_at(1) == Some('/')) {
                // Line comment
                while self.pos < self.input.len() && self.input[self.pos] != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
