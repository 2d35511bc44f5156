use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("Invalid integer literal '{literal}' at position {position}")]
    InvalidNumber { literal: String, position: usize },
    #[error("Unterminated string literal at position {position}")]
    UnterminatedString { position: usize },
    #[error("Unrecognized escape sequence '\\{escape}' in string literal at position {position}")]
    BadEscape { escape: char, position: usize },
    #[error("Unexpected end of line inside string literal at position {position}")]
    NewlineInString { position: usize },
}

pub type LexResult<T> = Result<T, LexError>;

/// Pull-based tokenizer with indentation tracking.
///
/// One indent level is two leading spaces. Crossing into a deeper line emits
/// `Indent`; a shallower line emits one `Dedent` per abandoned level, spread
/// over consecutive `next_token` calls. Blank and comment-only lines leave
/// the indentation state untouched.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    indent_depth: usize,
    pending_dedents: usize,
    at_line_start: bool,
    started: bool,
    finished: bool,
    current: Token,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer positioned on the first token of `input`.
    pub fn new(input: &'a str) -> LexResult<Self> {
        let mut lexer = Self {
            input,
            pos: 0,
            indent_depth: 0,
            pending_dedents: 0,
            at_line_start: true,
            started: false,
            finished: false,
            current: Token::new(TokenKind::Eof),
        };
        lexer.advance()?;
        Ok(lexer)
    }

    /// The most recently produced token.
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Advances to the next token and returns it.
    pub fn next_token(&mut self) -> LexResult<&Token> {
        self.advance()?;
        Ok(&self.current)
    }

    fn advance(&mut self) -> LexResult<()> {
        let kind = self.read_token()?;
        if !matches!(kind, TokenKind::Eof) {
            self.started = true;
        }
        self.current = Token::new(kind);
        Ok(())
    }

    fn read_token(&mut self) -> LexResult<TokenKind> {
        if self.pending_dedents > 0 {
            self.pending_dedents -= 1;
            return Ok(TokenKind::Dedent);
        }
        if self.finished {
            return Ok(TokenKind::Eof);
        }

        loop {
            if self.at_line_start {
                let spaces = self.consume_while(|c| c == ' ');
                match self.peek_char() {
                    None => return self.finish(),
                    Some('\n') => {
                        // Blank line: no token, no indentation change.
                        self.consume_char();
                        continue;
                    }
                    Some('#') => {
                        self.skip_comment();
                        continue;
                    }
                    Some(_) => {
                        self.at_line_start = false;
                        let level = spaces / 2;
                        if level > self.indent_depth {
                            // At most one step of indent increase per line.
                            self.indent_depth += 1;
                            return Ok(TokenKind::Indent);
                        }
                        if level < self.indent_depth {
                            self.pending_dedents = self.indent_depth - level - 1;
                            self.indent_depth = level;
                            return Ok(TokenKind::Dedent);
                        }
                    }
                }
            }

            self.consume_while(|c| c == ' ');
            match self.peek_char() {
                None => return self.finish(),
                Some('\n') => {
                    self.consume_char();
                    self.at_line_start = true;
                    return Ok(TokenKind::Newline);
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(c) => return self.read_symbol(c),
            }
        }
    }

    /// End-of-input protocol: a synthetic `Newline` unless the last token
    /// already terminated a line, then one `Dedent` per open level, then a
    /// sticky `Eof`.
    fn finish(&mut self) -> LexResult<TokenKind> {
        if self.started && !matches!(self.current.kind, TokenKind::Newline | TokenKind::Dedent) {
            return Ok(TokenKind::Newline);
        }
        if self.indent_depth > 0 {
            self.indent_depth -= 1;
            return Ok(TokenKind::Dedent);
        }
        self.finished = true;
        Ok(TokenKind::Eof)
    }

    fn read_symbol(&mut self, c: char) -> LexResult<TokenKind> {
        match c {
            '\'' | '"' => self.read_string(c),
            '(' | ')' | '*' | '+' | ',' | '-' | '.' | '/' | ':' => {
                self.consume_char();
                Ok(TokenKind::Char(c))
            }
            '=' | '!' | '<' | '>' => Ok(self.read_comparison(c)),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_word()),
            c if c.is_ascii_digit() => self.read_number(c),
            _ => Err(LexError::UnexpectedCharacter {
                character: c,
                position: self.pos,
            }),
        }
    }

    fn read_word(&mut self) -> TokenKind {
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let spelling = &self.input[start..self.pos];
        TokenKind::keyword(spelling).unwrap_or_else(|| TokenKind::Id(spelling.to_string()))
    }

    fn read_number(&mut self, first: char) -> LexResult<TokenKind> {
        // A leading zero stands alone as the literal 0.
        if first == '0' {
            self.consume_char();
            return Ok(TokenKind::Number(0));
        }
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_digit());
        let literal = &self.input[start..self.pos];
        literal
            .parse::<i64>()
            .map(TokenKind::Number)
            .map_err(|_| LexError::InvalidNumber {
                literal: literal.to_string(),
                position: start,
            })
    }

    fn read_comparison(&mut self, first: char) -> TokenKind {
        self.consume_char();
        if self.peek_char() != Some('=') {
            return TokenKind::Char(first);
        }
        self.consume_char();
        match first {
            '=' => TokenKind::Eq,
            '!' => TokenKind::NotEq,
            '<' => TokenKind::LessOrEq,
            _ => TokenKind::GreaterOrEq,
        }
    }

    fn read_string(&mut self, quote: char) -> LexResult<TokenKind> {
        let start = self.pos;
        self.consume_char();
        let mut text = String::new();
        loop {
            let Some(c) = self.consume_char() else {
                return Err(LexError::UnterminatedString { position: start });
            };
            if c == quote {
                break;
            }
            match c {
                '\\' => {
                    let Some(escaped) = self.consume_char() else {
                        return Err(LexError::UnterminatedString { position: start });
                    };
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '"' => text.push('"'),
                        '\'' => text.push('\''),
                        other => {
                            return Err(LexError::BadEscape {
                                escape: other,
                                position: start,
                            });
                        }
                    }
                }
                '\n' | '\r' => return Err(LexError::NewlineInString { position: start }),
                other => text.push(other),
            }
        }
        Ok(TokenKind::String(text))
    }

    fn skip_comment(&mut self) {
        self.consume_while(|c| c != '\n');
    }

    fn consume_while<P>(&mut self, keep: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

/// Lexes the whole input eagerly, up to and including `Eof`.
pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input)?;
    let mut tokens = Vec::new();
    loop {
        let token = lexer.current().clone();
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
        lexer.next_token()?;
    }
    Ok(tokens)
}
