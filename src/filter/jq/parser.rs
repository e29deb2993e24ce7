//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Binding strength, loosest first: `|`, `,`, `//`, assignment operators,
//! `or`, `and`, comparisons, `+ -`, `* / %`, unary minus, postfix terms.
//! Variables, labels, and function calls are resolved here so that
//! misspellings fail before any input is read. Pipes and `//` chains are
//! parsed iteratively; every other recursive construct counts against
//! [`MAX_NESTING`].

use super::ast::{
    AssignOp, Comparison, Expr, FuncDef, ObjectEntry, ObjectKey, Param, Pattern, StringPart,
};
use super::builtins;
use super::format;
use super::lexer::{tokenize, Spanned, StrPiece, Token};
use super::value::{number, Arith};
use super::ParseError;
use serde_json::Value;
use std::rc::Rc;

/// Deepest nesting of bracketed terms, bindings and definitions.
const MAX_NESTING: usize = 256;

/// Longest accepted program, in tokens.
const MAX_TOKENS: usize = 100_000;

type Result<T> = std::result::Result<T, ParseError>;

/// Names visible at a position in the program.
#[derive(Debug, Clone, Default)]
struct Scope {
    variables: Vec<String>,
    /// Name and arity of `def`s and filter parameters.
    functions: Vec<(String, usize)>,
    labels: Vec<String>,
}

/// Variables every program can read.
const GLOBAL_VARIABLES: &[&str] = &["ENV", "__loc__"];

pub fn parse(source: &str) -> Result<Expr> {
    parse_in_scope(source, Scope::default(), 0)
}

fn parse_in_scope(source: &str, scope: Scope, nesting: usize) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::new("expression too long", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        scope,
        nesting,
    };
    if parser.peek() == &Token::Eof {
        return Ok(Expr::Identity);
    }
    let expr = parser.parse_pipe()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected token {other}"))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    scope: Scope,
    nesting: usize,
}

fn boxed(expr: Expr) -> Box<Expr> {
    Box::new(expr)
}

/// Joins `first, rest...` right-associatively with `join`.
fn fold_right(first: Expr, mut rest: Vec<Expr>, join: fn(Box<Expr>, Box<Expr>) -> Expr) -> Expr {
    let Some(mut acc) = rest.pop() else {
        return first;
    };
    while let Some(lhs) = rest.pop() {
        acc = join(boxed(lhs), boxed(acc));
    }
    join(boxed(first), boxed(acc))
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "then"
            | "elif"
            | "else"
            | "end"
            | "as"
            | "reduce"
            | "foreach"
            | "try"
            | "catch"
            | "and"
            | "or"
            | "def"
            | "label"
            | "break"
            | "import"
            | "include"
            | "__loc__"
    )
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.offset)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.offset())
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token} but found {}", self.peek())))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{keyword}' but found {}", self.peek())))
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    /// Parses `parse` with the names added by `bind` visible.
    fn scoped<T>(
        &mut self,
        bind: impl FnOnce(&mut Scope),
        parse: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.scope.clone();
        bind(&mut self.scope);
        let result = parse(self);
        self.scope = saved;
        result
    }

    fn check_variable(&self, name: &str) -> Result<()> {
        if self.scope.variables.iter().any(|v| v == name) || GLOBAL_VARIABLES.contains(&name) {
            Ok(())
        } else {
            Err(self.error(format!("${name} is not defined")))
        }
    }

    fn is_function(&self, name: &str, arity: usize) -> bool {
        self.scope
            .functions
            .iter()
            .any(|(defined, n)| defined == name && *n == arity)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn parse_pipe(&mut self) -> Result<Expr> {
        if self.at_keyword("def") {
            return self.nested(|p| p.parse_def());
        }
        let first = self.parse_comma()?;
        let mut rest = Vec::new();
        while self.eat(&Token::Pipe) {
            if self.at_keyword("def") {
                rest.push(self.nested(|p| p.parse_def())?);
                break;
            }
            rest.push(self.parse_comma()?);
        }
        Ok(fold_right(first, rest, Expr::Pipe))
    }

    /// `def name(params): body; rest`
    fn parse_def(&mut self) -> Result<Expr> {
        self.expect_keyword("def")?;
        let offset = self.offset();
        let name = match self.advance() {
            Token::Ident(name) if !is_keyword(&name) => name,
            other => {
                return Err(ParseError::new(
                    format!("expected a function name but found {other}"),
                    offset,
                ))
            }
        };
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                let offset = self.offset();
                params.push(match self.advance() {
                    Token::Ident(param) if !is_keyword(&param) => Param::Filter(param),
                    Token::Variable(param) => Param::Value(param),
                    other => {
                        return Err(ParseError::new(
                            format!("expected a parameter but found {other}"),
                            offset,
                        ))
                    }
                });
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Semicolon)?;
            }
        }
        self.expect(&Token::Colon)?;
        let arity = params.len();
        let body = self.scoped(
            |scope| {
                scope.functions.push((name.clone(), arity));
                for param in &params {
                    if let Param::Value(variable) = param {
                        scope.variables.push(variable.clone());
                    }
                    scope.functions.push((param.name().to_string(), 0));
                }
            },
            |p| p.parse_pipe(),
        )?;
        self.expect(&Token::Semicolon)?;
        let rest = self.scoped(
            |scope| scope.functions.push((name.clone(), arity)),
            |p| p.parse_pipe(),
        )?;
        Ok(Expr::FuncDef {
            def: Rc::new(FuncDef { name, params, body }),
            rest: boxed(rest),
        })
    }

    fn parse_comma(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_alternative()?;
        while self.eat(&Token::Comma) {
            let rhs = self.parse_alternative()?;
            lhs = Expr::Comma(boxed(lhs), boxed(rhs));
        }
        Ok(lhs)
    }

    fn parse_alternative(&mut self) -> Result<Expr> {
        let first = self.parse_assignment()?;
        let mut rest = Vec::new();
        while self.eat(&Token::Alt) {
            rest.push(self.parse_assignment()?);
        }
        Ok(fold_right(first, rest, Expr::Alternative))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let lhs = self.parse_or()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::UpdateAssign => AssignOp::Update,
            Token::AddAssign => AssignOp::Arith(Arith::Add),
            Token::SubAssign => AssignOp::Arith(Arith::Sub),
            Token::MulAssign => AssignOp::Arith(Arith::Mul),
            Token::DivAssign => AssignOp::Arith(Arith::Div),
            Token::ModAssign => AssignOp::Arith(Arith::Mod),
            Token::AltAssign => AssignOp::Alternative,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_or()?;
        Ok(Expr::Assign {
            op,
            path: boxed(lhs),
            value: boxed(rhs),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(boxed(lhs), boxed(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(boxed(lhs), boxed(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => Comparison::Eq,
            Token::Ne => Comparison::Ne,
            Token::Lt => Comparison::Lt,
            Token::Le => Comparison::Le,
            Token::Gt => Comparison::Gt,
            Token::Ge => Comparison::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        if matches!(
            self.peek(),
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge
        ) {
            return Err(self.error("comparison operators are non-associative"));
        }
        Ok(Expr::Compare(op, boxed(lhs), boxed(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => Arith::Add,
                Token::Minus => Arith::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arith(op, boxed(lhs), boxed(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => Arith::Mul,
                Token::Slash => Arith::Div,
                Token::Percent => Arith::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith(op, boxed(lhs), boxed(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.nested(|p| p.parse_unary())?;
            return Ok(match operand {
                Expr::Literal(Value::Number(n)) => {
                    Expr::Literal(number(-n.as_f64().unwrap_or(0.0)))
                }
                other => Expr::Negate(boxed(other)),
            });
        }
        self.parse_postfix(true)
    }

    /// A term with its suffixes, optionally followed by `as $x | body`.
    fn parse_postfix(&mut self, allow_bind: bool) -> Result<Expr> {
        let mut term = self.nested(|p| p.parse_primary())?;
        loop {
            term = match self.peek() {
                Token::Field(name) => {
                    let name = name.clone();
                    self.advance();
                    Expr::field(term, name)
                }
                Token::Dot if matches!(self.peek_at(1), Token::Str(_)) => {
                    self.advance();
                    let key = self.parse_string_token()?;
                    Expr::Index {
                        target: boxed(term),
                        index: boxed(key),
                    }
                }
                Token::Dot if self.peek_at(1) == &Token::LBracket => {
                    self.advance();
                    self.advance();
                    self.nested(|p| p.parse_bracket_suffix(term))?
                }
                Token::LBracket => {
                    self.advance();
                    self.nested(|p| p.parse_bracket_suffix(term))?
                }
                Token::Question => {
                    self.advance();
                    Expr::optional(term)
                }
                _ => break,
            };
        }
        if allow_bind && self.eat_keyword("as") {
            let mut patterns = vec![self.parse_pattern()?];
            while self.peek() == &Token::Question && self.peek_at(1) == &Token::Alt {
                self.advance();
                self.advance();
                patterns.push(self.parse_pattern()?);
            }
            self.expect(&Token::Pipe)?;
            let names: Vec<String> = patterns.iter().flat_map(Pattern::variables).collect();
            let body = self.scoped(
                |scope| scope.variables.extend(names),
                |p| p.nested(|p| p.parse_pipe()),
            )?;
            return Ok(Expr::Bind {
                source: boxed(term),
                patterns,
                body: boxed(body),
            });
        }
        Ok(term)
    }

    /// Everything after an opening `[` that follows a term.
    fn parse_bracket_suffix(&mut self, target: Expr) -> Result<Expr> {
        if self.eat(&Token::RBracket) {
            return Ok(Expr::Iterate(boxed(target)));
        }
        if self.eat(&Token::Colon) {
            let to = self.parse_pipe()?;
            self.expect(&Token::RBracket)?;
            return Ok(Expr::Slice {
                target: boxed(target),
                from: None,
                to: Some(boxed(to)),
            });
        }
        let index = self.parse_pipe()?;
        if self.eat(&Token::Colon) {
            let to = if self.peek() == &Token::RBracket {
                None
            } else {
                Some(boxed(self.parse_pipe()?))
            };
            self.expect(&Token::RBracket)?;
            return Ok(Expr::Slice {
                target: boxed(target),
                from: Some(boxed(index)),
                to,
            });
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::Index {
            target: boxed(target),
            index: boxed(index),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Token::Dot => {
                if matches!(self.peek(), Token::Str(_)) {
                    let key = self.parse_string_token()?;
                    return Ok(Expr::Index {
                        target: boxed(Expr::Identity),
                        index: boxed(key),
                    });
                }
                Ok(Expr::Identity)
            }
            Token::DotDot => Ok(Expr::RecurseAll),
            Token::Field(name) => Ok(Expr::field(Expr::Identity, name)),
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(pieces) => self.string_expr(pieces),
            Token::Format(name) => {
                if !format::is_defined(&name) {
                    return Err(ParseError::new(format!("@{name} is not a valid format"), offset));
                }
                if !matches!(self.peek(), Token::Str(_)) {
                    return Ok(Expr::Format(name));
                }
                Ok(match self.parse_string_token()? {
                    Expr::Template(parts) => Expr::Formatted {
                        format: name,
                        parts,
                    },
                    literal => literal,
                })
            }
            Token::Variable(name) => {
                self.check_variable(&name)
                    .map_err(|e| ParseError::new(e.message(), offset))?;
                Ok(Expr::Variable(name))
            }
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(None));
                }
                let body = self.parse_pipe()?;
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(Some(boxed(body))))
            }
            Token::LBrace => self.parse_object(),
            Token::Ident(name) => self.parse_word(name, offset),
            other => Err(ParseError::new(format!("unexpected token {other}"), offset)),
        }
    }

    /// Keywords, literals and builtin calls.
    fn parse_word(&mut self, name: String, offset: usize) -> Result<Expr> {
        match name.as_str() {
            "null" => Ok(Expr::Literal(Value::Null)),
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "if" => self.parse_if(),
            "try" => {
                let body = self.parse_postfix(false)?;
                let handler = if self.eat_keyword("catch") {
                    Some(boxed(self.parse_postfix(false)?))
                } else {
                    None
                };
                Ok(Expr::Try {
                    body: boxed(body),
                    handler,
                })
            }
            "reduce" => self.parse_reduce(),
            "foreach" => self.parse_foreach(),
            "label" => {
                let label = self.label_name()?;
                self.expect(&Token::Pipe)?;
                let body = self.scoped(|scope| scope.labels.push(label.clone()), |p| p.parse_pipe())?;
                Ok(Expr::Label {
                    name: label,
                    body: boxed(body),
                })
            }
            "break" => {
                let label = self.label_name()?;
                if !self.scope.labels.contains(&label) {
                    return Err(ParseError::new(format!("$*label-{label} is not defined"), offset));
                }
                Ok(Expr::Break(label))
            }
            "import" | "include" => Err(ParseError::new("modules are not supported", offset)),
            word if is_keyword(word) => {
                Err(ParseError::new(format!("unexpected keyword '{word}'"), offset))
            }
            _ => {
                let mut args = Vec::new();
                if self.eat(&Token::LParen) {
                    loop {
                        args.push(self.parse_pipe()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Semicolon)?;
                    }
                }
                if self.is_function(&name, args.len()) {
                    return Ok(Expr::CallDef {
                        name,
                        args: args.into_iter().map(Rc::new).collect(),
                    });
                }
                if !builtins::is_defined(&name, args.len()) {
                    return Err(ParseError::new(
                        format!("{name}/{} is not defined", args.len()),
                        offset,
                    ));
                }
                Ok(Expr::Call { name, args })
            }
        }
    }

    fn label_name(&mut self) -> Result<String> {
        let offset = self.offset();
        match self.advance() {
            Token::Variable(name) => Ok(name),
            other => Err(ParseError::new(
                format!("expected a label name but found {other}"),
                offset,
            )),
        }
    }

    fn parse_if(&mut self) -> Result<Expr> {
        let mut branches = Vec::new();
        loop {
            let cond = self.parse_pipe()?;
            self.expect_keyword("then")?;
            let then = self.parse_pipe()?;
            branches.push((cond, then));
            if !self.eat_keyword("elif") {
                break;
            }
        }
        let otherwise = if self.eat_keyword("else") {
            Some(boxed(self.parse_pipe()?))
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(Expr::If {
            branches,
            otherwise,
        })
    }

    /// `source as pattern (` shared by `reduce` and `foreach`.
    fn parse_fold_head(&mut self) -> Result<(Expr, Pattern)> {
        let source = self.parse_postfix(false)?;
        self.expect_keyword("as")?;
        let pattern = self.parse_pattern()?;
        self.expect(&Token::LParen)?;
        Ok((source, pattern))
    }

    fn parse_reduce(&mut self) -> Result<Expr> {
        let (source, pattern) = self.parse_fold_head()?;
        let init = self.parse_pipe()?;
        self.expect(&Token::Semicolon)?;
        let names = pattern.variables();
        let update = self.scoped(|scope| scope.variables.extend(names), |p| p.parse_pipe())?;
        self.expect(&Token::RParen)?;
        Ok(Expr::Reduce {
            source: boxed(source),
            pattern,
            init: boxed(init),
            update: boxed(update),
        })
    }

    fn parse_foreach(&mut self) -> Result<Expr> {
        let (source, pattern) = self.parse_fold_head()?;
        let init = self.parse_pipe()?;
        self.expect(&Token::Semicolon)?;
        let names = pattern.variables();
        let (update, extract) = self.scoped(|scope| scope.variables.extend(names), |p| {
            let update = p.parse_pipe()?;
            let extract = if p.eat(&Token::Semicolon) {
                Some(boxed(p.parse_pipe()?))
            } else {
                None
            };
            Ok((update, extract))
        })?;
        self.expect(&Token::RParen)?;
        Ok(Expr::Foreach {
            source: boxed(source),
            pattern,
            init: boxed(init),
            update: boxed(update),
            extract,
        })
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = self.parse_object_key()?;
            let value = if self.eat(&Token::Colon) {
                Some(self.parse_object_value()?)
            } else {
                match key {
                    ObjectKey::Computed(_) => {
                        return Err(self.error("computed object keys need a value"))
                    }
                    _ => None,
                }
            };
            entries.push(ObjectEntry { key, value });
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn parse_object_key(&mut self) -> Result<ObjectKey> {
        let offset = self.offset();
        match self.advance() {
            Token::Ident(name) => Ok(ObjectKey::Name(name)),
            Token::Variable(name) => {
                self.check_variable(&name)
                    .map_err(|e| ParseError::new(e.message(), offset))?;
                Ok(ObjectKey::Variable(name))
            }
            Token::Str(pieces) => match self.string_expr(pieces)? {
                Expr::Literal(Value::String(s)) => Ok(ObjectKey::Name(s)),
                Expr::Template(parts) => Ok(ObjectKey::Template(parts)),
                _ => Err(ParseError::new("invalid object key", offset)),
            },
            Token::LParen => {
                let key = self.parse_pipe()?;
                self.expect(&Token::RParen)?;
                Ok(ObjectKey::Computed(key))
            }
            other => Err(ParseError::new(
                format!("unexpected token {other} in object key"),
                offset,
            )),
        }
    }

    /// Object values may pipe but not use bare commas.
    fn parse_object_value(&mut self) -> Result<Expr> {
        let mut value = self.parse_alternative()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_alternative()?;
            value = Expr::Pipe(boxed(value), boxed(rhs));
        }
        Ok(value)
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let offset = self.offset();
        match self.advance() {
            Token::Variable(name) => Ok(Pattern::Variable(name)),
            Token::LBracket => {
                let mut items = Vec::new();
                loop {
                    items.push(self.nested(|p| p.parse_pattern())?);
                    if self.eat(&Token::RBracket) {
                        return Ok(Pattern::Array(items));
                    }
                    self.expect(&Token::Comma)?;
                }
            }
            Token::LBrace => {
                let mut entries = Vec::new();
                loop {
                    let key_offset = self.offset();
                    let key = match self.advance() {
                        Token::Variable(name) => ObjectKey::Variable(name),
                        Token::Ident(name) => ObjectKey::Name(name),
                        Token::Str(pieces) => match self.string_expr(pieces)? {
                            Expr::Literal(Value::String(s)) => ObjectKey::Name(s),
                            Expr::Template(parts) => ObjectKey::Template(parts),
                            _ => return Err(ParseError::new("invalid object key", key_offset)),
                        },
                        Token::LParen => {
                            let key = self.parse_pipe()?;
                            self.expect(&Token::RParen)?;
                            ObjectKey::Computed(key)
                        }
                        other => {
                            return Err(ParseError::new(
                                format!("unexpected token {other} in object pattern"),
                                key_offset,
                            ))
                        }
                    };
                    let pattern = if self.eat(&Token::Colon) {
                        Some(self.nested(|p| p.parse_pattern())?)
                    } else if matches!(key, ObjectKey::Variable(_)) {
                        None
                    } else {
                        return Err(ParseError::new(
                            "object patterns need a variable or a value pattern",
                            key_offset,
                        ));
                    };
                    entries.push((key, pattern));
                    if self.eat(&Token::RBrace) {
                        return Ok(Pattern::Object(entries));
                    }
                    self.expect(&Token::Comma)?;
                }
            }
            other => Err(ParseError::new(
                format!("expected a variable or destructuring pattern but found {other}"),
                offset,
            )),
        }
    }

    fn parse_string_token(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Str(pieces) => self.string_expr(pieces),
            other => Err(self.error(format!("expected a string but found {other}"))),
        }
    }

    fn string_expr(&self, pieces: Vec<StrPiece>) -> Result<Expr> {
        if let [StrPiece::Literal(s)] = pieces.as_slice() {
            return Ok(Expr::Literal(Value::String(s.clone())));
        }
        let parts = pieces
            .into_iter()
            .map(|piece| match piece {
                StrPiece::Literal(s) => Ok(StringPart::Literal(s)),
                StrPiece::Interpolation(source) => {
                    parse_in_scope(&source, self.scope.clone(), self.nesting + 1)
                        .map(StringPart::Interpolation)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::Template(parts))
    }
}
