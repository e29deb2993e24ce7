//! Syntax tree of a parsed filter expression.

use super::value::Arith;
use serde_json::Value;
use std::rc::Rc;

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `.`
    Identity,

    /// `..`
    RecurseAll,

    /// A literal scalar, e.g. `1`, `"a"`, `null`.
    Literal(Value),

    /// A string with `\(...)` interpolations.
    Template(Vec<StringPart>),

    /// `@name`, formatting the input.
    Format(String),

    /// `@name "..."`: interpolations are formatted, literal parts are not.
    Formatted {
        format: String,
        parts: Vec<StringPart>,
    },

    /// `$name`
    Variable(String),

    /// `target[index]`, including `.name` and `."name"`.
    Index { target: Box<Expr>, index: Box<Expr> },

    /// `target[from:to]`
    Slice {
        target: Box<Expr>,
        from: Option<Box<Expr>>,
        to: Option<Box<Expr>>,
    },

    /// `target[]`
    Iterate(Box<Expr>),

    /// `[body]`; `None` for `[]`.
    Array(Option<Box<Expr>>),

    /// `{key: value, ...}`
    Object(Vec<ObjectEntry>),

    /// Unary minus.
    Negate(Box<Expr>),

    /// `lhs | rhs`
    Pipe(Box<Expr>, Box<Expr>),

    /// `lhs, rhs`
    Comma(Box<Expr>, Box<Expr>),

    /// `+ - * / %`
    Arith(Arith, Box<Expr>, Box<Expr>),

    /// `== != < <= > >=`
    Compare(Comparison, Box<Expr>, Box<Expr>),

    And(Box<Expr>, Box<Expr>),

    Or(Box<Expr>, Box<Expr>),

    /// `lhs // rhs`
    Alternative(Box<Expr>, Box<Expr>),

    /// `if cond then a elif ... else b end`; a missing `else` is identity.
    If {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },

    /// `try body catch handler`; `body?` has no handler.
    Try {
        body: Box<Expr>,
        handler: Option<Box<Expr>>,
    },

    /// `reduce source as $x (init; update)`
    Reduce {
        source: Box<Expr>,
        pattern: Pattern,
        init: Box<Expr>,
        update: Box<Expr>,
    },

    /// `foreach source as $x (init; update; extract)`
    Foreach {
        source: Box<Expr>,
        pattern: Pattern,
        init: Box<Expr>,
        update: Box<Expr>,
        extract: Option<Box<Expr>>,
    },

    /// `source as $x | body`, with `?//` alternatives in order.
    Bind {
        source: Box<Expr>,
        patterns: Vec<Pattern>,
        body: Box<Expr>,
    },

    /// `path op value`
    Assign {
        op: AssignOp,
        path: Box<Expr>,
        value: Box<Expr>,
    },

    /// A builtin call, `name` or `name(arg; ...)`.
    Call { name: String, args: Vec<Expr> },

    /// `def name(params): body; rest`
    FuncDef { def: Rc<FuncDef>, rest: Box<Expr> },

    /// A call of a function defined with `def` or of a filter parameter.
    CallDef { name: String, args: Vec<Rc<Expr>> },

    /// `label $name | body`
    Label { name: String, body: Box<Expr> },

    /// `break $name`
    Break(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `f`: a filter evaluated in the caller's scope.
    Filter(String),
    /// `$x`: bound once per output of the argument, also callable as `x`.
    Value(String),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Filter(name) | Param::Value(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Interpolation(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: ObjectKey,
    /// `None` for the shorthand forms `{a}`, `{"a"}` and `{$a}`.
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    /// An identifier, keyword or string literal.
    Name(String),
    /// An interpolated string.
    Template(Vec<StringPart>),
    /// `$name`
    Variable(String),
    /// `(expr)`
    Computed(Expr),
}

/// Destructuring target of `as`, `reduce` and `foreach`.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Variable(String),
    Array(Vec<Pattern>),
    Object(Vec<(ObjectKey, Option<Pattern>)>),
}

impl Pattern {
    /// Every variable this pattern binds.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Pattern::Variable(name) => names.push(name.clone()),
            Pattern::Array(items) => items.iter().for_each(|p| p.collect_variables(names)),
            Pattern::Object(entries) => {
                for (key, pattern) in entries {
                    if let ObjectKey::Variable(name) = key {
                        names.push(name.clone());
                    }
                    if let Some(pattern) = pattern {
                        pattern.collect_variables(names);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `|=`
    Update,
    /// `+=`, `-=`, `*=`, `/=`, `%=`
    Arith(Arith),
    /// `//=`
    Alternative,
}

impl Expr {
    pub fn field(target: Expr, name: impl Into<String>) -> Expr {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(Expr::Literal(Value::String(name.into()))),
        }
    }

    pub fn optional(body: Expr) -> Expr {
        Expr::Try {
            body: Box::new(body),
            handler: None,
        }
    }
}
