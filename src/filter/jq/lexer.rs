//! Tokenizer for filter expressions.

use super::ParseError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `.name`
    Field(String),
    /// An identifier or keyword.
    Ident(String),
    /// `$name`
    Variable(String),
    /// `@name`
    Format(String),
    Number(f64),
    /// A string literal split into literal and interpolated parts.
    Str(Vec<StrPiece>),
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    UpdateAssign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    Alt,
    AltAssign,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Token::Field(name) => return write!(f, "'.{name}'"),
            Token::Ident(name) => return write!(f, "'{name}'"),
            Token::Variable(name) => return write!(f, "'${name}'"),
            Token::Format(name) => return write!(f, "'@{name}'"),
            Token::Number(n) => return write!(f, "'{n}'"),
            Token::Str(_) => "string literal",
            Token::Eof => "end of input",
            Token::Dot => "'.'",
            Token::DotDot => "'..'",
            Token::Pipe => "'|'",
            Token::Comma => "','",
            Token::Colon => "':'",
            Token::Semicolon => "';'",
            Token::Question => "'?'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Eq => "'=='",
            Token::Ne => "'!='",
            Token::Lt => "'<'",
            Token::Le => "'<='",
            Token::Gt => "'>'",
            Token::Ge => "'>='",
            Token::Assign => "'='",
            Token::UpdateAssign => "'|='",
            Token::AddAssign => "'+='",
            Token::SubAssign => "'-='",
            Token::MulAssign => "'*='",
            Token::DivAssign => "'/='",
            Token::ModAssign => "'%='",
            Token::Alt => "'//'",
            Token::AltAssign => "'//='",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrPiece {
    Literal(String),
    /// Source text of an `\(...)` interpolation.
    Interpolation(String),
}

/// A token with its character offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    Lexer {
        chars: input.chars().collect(),
        pos: 0,
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(message, offset)
    }

    fn run(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let offset = self.pos;
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    offset,
                });
                return Ok(tokens);
            };
            let token = self.next_token(c)?;
            tokens.push(Spanned { token, offset });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn next_token(&mut self, c: char) -> Result<Token, ParseError> {
        let start = self.pos;
        let two = |lexer: &mut Self, token: Token| {
            lexer.pos += 2;
            token
        };
        let one = |lexer: &mut Self, token: Token| {
            lexer.pos += 1;
            token
        };
        let next = self.peek_at(1);

        let token = match c {
            '.' => match next {
                Some('.') => two(self, Token::DotDot),
                Some(d) if d.is_ascii_digit() => self.number()?,
                Some(n) if is_ident_start(n) => {
                    self.pos += 1;
                    Token::Field(self.ident())
                }
                _ => one(self, Token::Dot),
            },
            '$' => {
                self.pos += 1;
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(self.error(start, "expected variable name after '$'"));
                }
                Token::Variable(self.ident())
            }
            '@' => {
                self.pos += 1;
                Token::Format(self.ident())
            }
            '"' => self.string()?,
            '|' => match next {
                Some('=') => two(self, Token::UpdateAssign),
                _ => one(self, Token::Pipe),
            },
            ',' => one(self, Token::Comma),
            ':' => one(self, Token::Colon),
            ';' => one(self, Token::Semicolon),
            '?' => one(self, Token::Question),
            '(' => one(self, Token::LParen),
            ')' => one(self, Token::RParen),
            '[' => one(self, Token::LBracket),
            ']' => one(self, Token::RBracket),
            '{' => one(self, Token::LBrace),
            '}' => one(self, Token::RBrace),
            '+' => match next {
                Some('=') => two(self, Token::AddAssign),
                _ => one(self, Token::Plus),
            },
            '-' => match next {
                Some('=') => two(self, Token::SubAssign),
                _ => one(self, Token::Minus),
            },
            '*' => match next {
                Some('=') => two(self, Token::MulAssign),
                _ => one(self, Token::Star),
            },
            '/' => match (next, self.peek_at(2)) {
                (Some('/'), Some('=')) => {
                    self.pos += 3;
                    Token::AltAssign
                }
                (Some('/'), _) => two(self, Token::Alt),
                (Some('='), _) => two(self, Token::DivAssign),
                _ => one(self, Token::Slash),
            },
            '%' => match next {
                Some('=') => two(self, Token::ModAssign),
                _ => one(self, Token::Percent),
            },
            '=' => match next {
                Some('=') => two(self, Token::Eq),
                _ => one(self, Token::Assign),
            },
            '!' => match next {
                Some('=') => two(self, Token::Ne),
                _ => return Err(self.error(start, "unexpected character '!'")),
            },
            '<' => match next {
                Some('=') => two(self, Token::Le),
                _ => one(self, Token::Lt),
            },
            '>' => match next {
                Some('=') => two(self, Token::Ge),
                _ => one(self, Token::Gt),
            },
            c if c.is_ascii_digit() => self.number()?,
            c if is_ident_start(c) => Token::Ident(self.ident()),
            other => return Err(self.error(start, format!("unexpected character {other:?}"))),
        };
        Ok(token)
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(start, format!("invalid number literal {text:?}")))
    }

    /// Reads a string literal starting at the opening quote.
    fn string(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut pieces = Vec::new();
        let mut literal = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            self.pos += 1;
            match c {
                '"' => break,
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error(start, "unterminated string literal"));
                    };
                    self.pos += 1;
                    match escaped {
                        '"' => literal.push('"'),
                        '\\' => literal.push('\\'),
                        '/' => literal.push('/'),
                        'b' => literal.push('\u{8}'),
                        'f' => literal.push('\u{c}'),
                        'n' => literal.push('\n'),
                        'r' => literal.push('\r'),
                        't' => literal.push('\t'),
                        'u' => literal.push(self.unicode_escape()?),
                        '(' => {
                            if !literal.is_empty() {
                                pieces.push(StrPiece::Literal(std::mem::take(&mut literal)));
                            }
                            let source = self.interpolation()?;
                            pieces.push(StrPiece::Interpolation(source));
                        }
                        other => {
                            return Err(
                                self.error(self.pos - 2, format!("invalid escape '\\{other}'"))
                            )
                        }
                    }
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() || pieces.is_empty() {
            pieces.push(StrPiece::Literal(literal));
        }
        Ok(Token::Str(pieces))
    }

    fn hex4(&mut self) -> Result<u32, ParseError> {
        let start = self.pos;
        let digits: String = self.chars.iter().skip(self.pos).take(4).collect();
        if digits.len() != 4 {
            return Err(self.error(start, "truncated \\u escape"));
        }
        self.pos += 4;
        u32::from_str_radix(&digits, 16)
            .map_err(|_| self.error(start, format!("invalid \\u escape {digits:?}")))
    }

    fn unicode_escape(&mut self) -> Result<char, ParseError> {
        let start = self.pos;
        let high = self.hex4()?;
        let code = if (0xD800..0xDC00).contains(&high)
            && self.peek() == Some('\\')
            && self.peek_at(1) == Some('u')
        {
            self.pos += 2;
            let low = self.hex4()?;
            0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF)
        } else {
            high
        };
        char::from_u32(code).ok_or_else(|| self.error(start, "invalid unicode escape"))
    }

    /// Captures the source of `\( ... )` up to the matching parenthesis.
    fn interpolation(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let source = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(source);
                    }
                }
                '"' => {
                    self.string()?;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(self.error(start, "unterminated string interpolation"))
    }
}
