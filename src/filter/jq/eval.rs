//! Continuation-passing evaluator.
//!
//! Every expression reports its outputs to a sink one at a time. A sink
//! returns `Err(Halt)` to stop the generator: errors unwind to the nearest
//! `try`, breaks unwind to the `label` or builtin that issued their label.

use super::ast::{
    AssignOp, Comparison, Expr, FuncDef, ObjectEntry, ObjectKey, Param, Pattern, StringPart,
};
use super::format;
use super::value::{self, is_truthy};
use super::RuntimeError;
use serde_json::{Map, Value};
use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

/// Deepest evaluation nesting before the query is aborted.
const MAX_DEPTH: usize = 4096;

#[derive(Debug)]
pub(super) enum Halt {
    /// A raised error value.
    Error(Value),
    /// Stop the generator that owns this label.
    Break(usize),
    /// A consumer downstream of a `try` failed; the real halt is parked in that `try`.
    Downstream,
}

impl From<RuntimeError> for Halt {
    fn from(err: RuntimeError) -> Self {
        Halt::Error(err.into_value())
    }
}

pub(super) type Flow = Result<(), Halt>;
pub(super) type Sink<'a> = &'a mut dyn FnMut(Value) -> Flow;
pub(super) type PathSink<'a> = &'a mut dyn FnMut(Vec<Value>, Value) -> Flow;

pub(super) fn fail(message: impl Into<String>) -> Halt {
    Halt::Error(Value::String(message.into()))
}

/// Turns a break aimed at `label` into normal completion.
pub(super) fn catch_break(label: usize, flow: Flow) -> Flow {
    match flow {
        Err(Halt::Break(l)) if l == label => Ok(()),
        other => other,
    }
}

pub(super) fn extend(path: &[Value], key: Value) -> Vec<Value> {
    let mut next = Vec::with_capacity(path.len() + 1);
    next.extend_from_slice(path);
    next.push(key);
    next
}

/// The process environment as an object, for `$ENV` and `env`.
pub(super) fn environment() -> Value {
    Value::Object(
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, Value::String(v.into_string().ok()?))))
            .collect(),
    )
}

fn global_variable(name: &str) -> Option<Value> {
    match name {
        "ENV" => Some(environment()),
        "__loc__" => {
            let mut loc = Map::new();
            loc.insert("file".into(), Value::from("<stdin>"));
            loc.insert("line".into(), Value::from(1));
            Some(Value::Object(loc))
        }
        _ => None,
    }
}

/// Runs `ast` against `input`, stopping at the first error.
pub(super) fn evaluate(ast: &Expr, input: Value) -> Vec<Result<Value, RuntimeError>> {
    let evaluator = Evaluator::new();
    let mut results = Vec::new();
    let flow = evaluator.eval(ast, value::canonical(input), &Env::default(), &mut |v| {
        results.push(Ok(v));
        Ok(())
    });
    match flow {
        Ok(()) => {}
        Err(Halt::Error(value)) => results.push(Err(RuntimeError::from(value))),
        Err(Halt::Break(_) | Halt::Downstream) => {
            results.push(Err(RuntimeError::msg("break escaped its generator")))
        }
    }
    results
}

/// Variables, functions and labels in scope, innermost first.
#[derive(Debug, Clone, Default)]
pub(super) struct Env(Option<Rc<Binding>>);

#[derive(Debug)]
struct Binding {
    name: String,
    slot: Slot,
    parent: Env,
}

#[derive(Debug)]
enum Slot {
    Variable(Value),
    /// A filter parameter: `body` runs in the caller's `scope`.
    Closure { body: Rc<Expr>, scope: Env },
    /// A `def`. Its body runs in a scope headed by this binding, so it can
    /// call itself.
    Function(Rc<FuncDef>),
    Label(usize),
}

impl Env {
    fn push(&self, name: &str, slot: Slot) -> Env {
        Env(Some(Rc::new(Binding {
            name: name.to_string(),
            slot,
            parent: self.clone(),
        })))
    }

    fn bindings(&self) -> impl Iterator<Item = &Rc<Binding>> {
        std::iter::successors(self.0.as_ref(), |binding| binding.parent.0.as_ref())
    }

    pub(super) fn bind(&self, name: &str, value: Value) -> Env {
        self.push(name, Slot::Variable(value))
    }

    fn bind_closure(&self, name: &str, body: Rc<Expr>, scope: Env) -> Env {
        self.push(name, Slot::Closure { body, scope })
    }

    fn bind_function(&self, def: &Rc<FuncDef>) -> Env {
        self.push(&def.name, Slot::Function(Rc::clone(def)))
    }

    fn bind_label(&self, name: &str, label: usize) -> Env {
        self.push(name, Slot::Label(label))
    }

    pub(super) fn get(&self, name: &str) -> Option<&Value> {
        self.bindings().find_map(|binding| match &binding.slot {
            Slot::Variable(value) if binding.name == name => Some(value),
            _ => None,
        })
    }

    fn label(&self, name: &str) -> Option<usize> {
        self.bindings().find_map(|binding| match binding.slot {
            Slot::Label(label) if binding.name == name => Some(label),
            _ => None,
        })
    }

    /// The innermost `def` or filter parameter named `name` taking `arity` arguments.
    fn function(&self, name: &str, arity: usize) -> Option<Rc<Binding>> {
        self.bindings()
            .find(|binding| {
                binding.name == name
                    && match &binding.slot {
                        Slot::Closure { .. } => arity == 0,
                        Slot::Function(def) => def.params.len() == arity,
                        Slot::Variable(_) | Slot::Label(_) => false,
                    }
            })
            .cloned()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub(super) struct Evaluator {
    depth: Cell<usize>,
    labels: Cell<usize>,
}

fn compare_with(op: Comparison, lhs: &Value, rhs: &Value) -> bool {
    let ord = value::compare(lhs, rhs);
    match op {
        Comparison::Eq => ord == Ordering::Equal,
        Comparison::Ne => ord != Ordering::Equal,
        Comparison::Lt => ord == Ordering::Less,
        Comparison::Le => ord != Ordering::Greater,
        Comparison::Gt => ord == Ordering::Greater,
        Comparison::Ge => ord != Ordering::Less,
    }
}

impl Evaluator {
    pub(super) fn new() -> Self {
        Self {
            depth: Cell::new(0),
            labels: Cell::new(0),
        }
    }

    fn enter(&self) -> Result<DepthGuard<'_>, Halt> {
        let depth = self.depth.get();
        if depth >= MAX_DEPTH {
            return Err(fail("maximum recursion depth exceeded"));
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard(&self.depth))
    }

    pub(super) fn fresh_label(&self) -> usize {
        let label = self.labels.get();
        self.labels.set(label + 1);
        label
    }

    pub(super) fn eval(&self, expr: &Expr, input: Value, env: &Env, out: Sink<'_>) -> Flow {
        let _guard = self.enter()?;
        match expr {
            Expr::Identity => out(input),
            Expr::RecurseAll => self.recurse_values(input, out),
            Expr::Literal(v) => out(v.clone()),
            Expr::Template(parts) => self.template(parts, None, &input, env, String::new(), out),
            Expr::Format(name) => out(Value::String(format::apply(name, &input)?)),
            Expr::Formatted { format: name, parts } => {
                self.template(parts, Some(name.as_str()), &input, env, String::new(), out)
            }
            Expr::Variable(name) => match env.get(name) {
                Some(v) => out(v.clone()),
                None => match global_variable(name) {
                    Some(v) => out(v),
                    None => Err(fail(format!("${name} is not defined"))),
                },
            },
            Expr::Index { target, index } => self.eval(target, input.clone(), env, &mut |t| {
                self.eval(index, input.clone(), env, &mut |k| out(value::index(&t, &k)?))
            }),
            Expr::Slice { target, from, to } => self.eval(target, input.clone(), env, &mut |t| {
                self.eval_or_null(from.as_deref(), &input, env, &mut |f| {
                    self.eval_or_null(to.as_deref(), &input, env, &mut |e| {
                        out(value::slice(&t, &f, &e)?)
                    })
                })
            }),
            Expr::Iterate(target) => self.eval(target, input, env, &mut |t| {
                for child in into_children(t)? {
                    out(child)?;
                }
                Ok(())
            }),
            Expr::Array(body) => {
                let mut items = Vec::new();
                if let Some(body) = body {
                    self.eval(body, input, env, &mut |v| {
                        items.push(v);
                        Ok(())
                    })?;
                }
                out(Value::Array(items))
            }
            Expr::Object(entries) => self.object(entries, &input, env, Map::new(), out),
            Expr::Negate(inner) => {
                self.eval(inner, input, env, &mut |v| out(value::negate(v)?))
            }
            Expr::Pipe(lhs, rhs) => {
                self.eval(lhs, input, env, &mut |v| self.eval(rhs, v, env, out))
            }
            Expr::Comma(lhs, rhs) => {
                self.eval(lhs, input.clone(), env, out)?;
                self.eval(rhs, input, env, out)
            }
            Expr::Arith(op, lhs, rhs) => self.eval(rhs, input.clone(), env, &mut |r| {
                self.eval(lhs, input.clone(), env, &mut |l| {
                    out(value::arith(*op, l, r.clone())?)
                })
            }),
            Expr::Compare(op, lhs, rhs) => self.eval(rhs, input.clone(), env, &mut |r| {
                self.eval(lhs, input.clone(), env, &mut |l| {
                    out(Value::Bool(compare_with(*op, &l, &r)))
                })
            }),
            Expr::And(lhs, rhs) => self.eval(lhs, input.clone(), env, &mut |l| {
                if !is_truthy(&l) {
                    return out(Value::Bool(false));
                }
                self.eval(rhs, input.clone(), env, &mut |r| out(Value::Bool(is_truthy(&r))))
            }),
            Expr::Or(lhs, rhs) => self.eval(lhs, input.clone(), env, &mut |l| {
                if is_truthy(&l) {
                    return out(Value::Bool(true));
                }
                self.eval(rhs, input.clone(), env, &mut |r| out(Value::Bool(is_truthy(&r))))
            }),
            Expr::Alternative(lhs, rhs) => {
                let mut found = Vec::new();
                let result = self.eval(lhs, input.clone(), env, &mut |v| {
                    if is_truthy(&v) {
                        found.push(v);
                    }
                    Ok(())
                });
                match result {
                    Ok(()) | Err(Halt::Error(_)) => {}
                    Err(other) => return Err(other),
                }
                if found.is_empty() {
                    return self.eval(rhs, input, env, out);
                }
                for v in found {
                    out(v)?;
                }
                Ok(())
            }
            Expr::If {
                branches,
                otherwise,
            } => self.branch(branches, otherwise.as_deref(), input, env, out),
            Expr::Try { body, handler } => {
                let mut downstream = None;
                let result = self.eval(body, input, env, &mut |v| {
                    out(v).map_err(|halt| {
                        downstream = Some(halt);
                        Halt::Downstream
                    })
                });
                match result {
                    Ok(()) => Ok(()),
                    Err(Halt::Downstream) => Err(downstream.take().unwrap_or(Halt::Downstream)),
                    Err(Halt::Error(error)) => match handler {
                        Some(handler) => self.eval(handler, error, env, out),
                        None => Ok(()),
                    },
                    Err(other) => Err(other),
                }
            }
            Expr::Reduce {
                source,
                pattern,
                init,
                update,
            } => self.eval(init, input.clone(), env, &mut |start| {
                let mut acc = start;
                self.eval(source, input.clone(), env, &mut |item| {
                    self.destructure(pattern, item, &input, env, &mut |scope| {
                        let mut last = None;
                        self.eval(update, std::mem::take(&mut acc), &scope, &mut |v| {
                            last = Some(v);
                            Ok(())
                        })?;
                        acc = last.unwrap_or(Value::Null);
                        Ok(())
                    })
                })?;
                out(acc)
            }),
            Expr::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => self.eval(init, input.clone(), env, &mut |start| {
                let mut acc = start;
                self.eval(source, input.clone(), env, &mut |item| {
                    self.destructure(pattern, item, &input, env, &mut |scope| {
                        let mut states = Vec::new();
                        self.eval(update, acc.clone(), &scope, &mut |v| {
                            states.push(v);
                            Ok(())
                        })?;
                        for state in states {
                            acc = state.clone();
                            match extract {
                                Some(extract) => self.eval(extract, state, &scope, out)?,
                                None => out(state)?,
                            }
                        }
                        Ok(())
                    })
                })
            }),
            Expr::Bind {
                source,
                patterns,
                body,
            } => self.eval(source, input.clone(), env, &mut |v| {
                let mut downstream = None;
                let result = self.bind_patterns(patterns, v, &input, env, &mut |scope| {
                    self.eval(body, input.clone(), &scope, &mut |x| {
                        out(x).map_err(|halt| {
                            downstream = Some(halt);
                            Halt::Downstream
                        })
                    })
                });
                match result {
                    Err(Halt::Downstream) => Err(downstream.take().unwrap_or(Halt::Downstream)),
                    other => other,
                }
            }),
            Expr::Assign { op, path, value } => self.assign(*op, path, value, input, env, out),
            Expr::Call { name, args } => self.call(name, args, input, env, out),
            Expr::FuncDef { def, rest } => self.eval(rest, input, &env.bind_function(def), out),
            Expr::CallDef { name, args } => self.invoke(name, args, &input, env, &mut |body, scope| {
                self.eval(body, input.clone(), scope, out)
            }),
            Expr::Label { name, body } => {
                let label = self.fresh_label();
                catch_break(label, self.eval(body, input, &env.bind_label(name, label), out))
            }
            Expr::Break(name) => match env.label(name) {
                Some(label) => Err(Halt::Break(label)),
                None => Err(fail(format!("$*label-{name} is not defined"))),
            },
        }
    }

    /// Resolves a `def` or filter parameter and runs `run` with its body and
    /// scope, once per combination of `$param` argument values.
    fn invoke(
        &self,
        name: &str,
        args: &[Rc<Expr>],
        input: &Value,
        env: &Env,
        run: &mut dyn FnMut(&Expr, &Env) -> Flow,
    ) -> Flow {
        let Some(binding) = env.function(name, args.len()) else {
            return Err(fail(format!("{name}/{} is not defined", args.len())));
        };
        match &binding.slot {
            Slot::Closure { body, scope } => run(body, scope),
            Slot::Function(def) => {
                let scope = Env(Some(Rc::clone(&binding)));
                self.bind_params(&def.params, args, input, env, scope, &mut |scope| {
                    run(&def.body, &scope)
                })
            }
            Slot::Variable(_) | Slot::Label(_) => {
                Err(fail(format!("{name}/{} is not defined", args.len())))
            }
        }
    }

    fn bind_params(
        &self,
        params: &[Param],
        args: &[Rc<Expr>],
        input: &Value,
        caller: &Env,
        scope: Env,
        run: &mut dyn FnMut(Env) -> Flow,
    ) -> Flow {
        let (Some((param, params)), Some((arg, args))) = (params.split_first(), args.split_first())
        else {
            return run(scope);
        };
        match param {
            Param::Filter(name) => {
                let scope = scope.bind_closure(name, Rc::clone(arg), caller.clone());
                self.bind_params(params, args, input, caller, scope, run)
            }
            Param::Value(name) => self.eval(arg, input.clone(), caller, &mut |v| {
                let with_value = scope.bind(name, v);
                let as_filter = Rc::new(Expr::Variable(name.clone()));
                let scope = with_value.bind_closure(name, as_filter, with_value.clone());
                self.bind_params(params, args, input, caller, scope, run)
            }),
        }
    }

    /// Destructures `value` with the first of `patterns` that succeeds. The
    /// next pattern is tried when destructuring or the body raises an error;
    /// with alternatives, every variable of every pattern starts out null.
    fn bind_patterns(
        &self,
        patterns: &[Pattern],
        value: Value,
        input: &Value,
        env: &Env,
        body: &mut dyn FnMut(Env) -> Flow,
    ) -> Flow {
        if let [pattern] = patterns {
            return self.destructure(pattern, value, input, env, body);
        }
        let mut scope = env.clone();
        for name in patterns.iter().flat_map(Pattern::variables) {
            scope = scope.bind(&name, Value::Null);
        }
        let last = patterns.len().saturating_sub(1);
        for (i, pattern) in patterns.iter().enumerate() {
            match self.destructure(pattern, value.clone(), input, &scope, body) {
                Err(Halt::Error(_)) if i < last => continue,
                other => return other,
            }
        }
        Ok(())
    }

    pub(super) fn eval_or_null(&self, expr: Option<&Expr>, input: &Value, env: &Env, out: Sink<'_>) -> Flow {
        match expr {
            Some(expr) => self.eval(expr, input.clone(), env, out),
            None => out(Value::Null),
        }
    }

    /// Every output of `expr`.
    pub(super) fn collect(&self, expr: &Expr, input: Value, env: &Env) -> Result<Vec<Value>, Halt> {
        let mut values = Vec::new();
        self.eval(expr, input, env, &mut |v| {
            values.push(v);
            Ok(())
        })?;
        Ok(values)
    }

    /// The first output of `expr`, without running the rest of the generator.
    pub(super) fn first_output(
        &self,
        expr: &Expr,
        input: Value,
        env: &Env,
    ) -> Result<Option<Value>, Halt> {
        let label = self.fresh_label();
        let mut found = None;
        let result = self.eval(expr, input, env, &mut |v| {
            found = Some(v);
            Err(Halt::Break(label))
        });
        catch_break(label, result)?;
        Ok(found)
    }

    fn branch(
        &self,
        branches: &[(Expr, Expr)],
        otherwise: Option<&Expr>,
        input: Value,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(otherwise) => self.eval(otherwise, input, env, out),
                None => out(input),
            };
        };
        self.eval(cond, input.clone(), env, &mut |c| {
            if is_truthy(&c) {
                self.eval(then, input.clone(), env, out)
            } else {
                self.branch(rest, otherwise, input.clone(), env, out)
            }
        })
    }

    /// Interpolates `parts`; with a format, interpolated values are
    /// rendered through it.
    fn template(
        &self,
        parts: &[StringPart],
        style: Option<&str>,
        input: &Value,
        env: &Env,
        prefix: String,
        out: Sink<'_>,
    ) -> Flow {
        let Some((part, rest)) = parts.split_first() else {
            return out(Value::String(prefix));
        };
        match part {
            StringPart::Literal(text) => {
                self.template(rest, style, input, env, format!("{prefix}{text}"), out)
            }
            StringPart::Interpolation(expr) => self.eval(expr, input.clone(), env, &mut |v| {
                let piece = match style {
                    Some(name) => format::apply(name, &v)?,
                    None => value::stringify(&v),
                };
                self.template(rest, style, input, env, format!("{prefix}{piece}"), out)
            }),
        }
    }

    /// Resolves an object key to one or more field names.
    fn object_key(
        &self,
        key: &ObjectKey,
        input: &Value,
        env: &Env,
        out: &mut dyn FnMut(String) -> Flow,
    ) -> Flow {
        match key {
            ObjectKey::Name(name) | ObjectKey::Variable(name) => out(name.clone()),
            ObjectKey::Template(parts) => self.template(parts, None, input, env, String::new(), &mut |v| {
                match v {
                    Value::String(name) => out(name),
                    other => Err(fail(format!(
                        "Object keys must be strings, not {}",
                        value::type_name(&other)
                    ))),
                }
            }),
            ObjectKey::Computed(expr) => self.eval(expr, input.clone(), env, &mut |v| match v {
                Value::String(name) => out(name),
                other => Err(fail(format!(
                    "Object keys must be strings, not {}",
                    value::type_name(&other)
                ))),
            }),
        }
    }

    fn object(
        &self,
        entries: &[ObjectEntry],
        input: &Value,
        env: &Env,
        acc: Map<String, Value>,
        out: Sink<'_>,
    ) -> Flow {
        let Some((entry, rest)) = entries.split_first() else {
            return out(Value::Object(acc));
        };
        self.object_key(&entry.key, input, env, &mut |name| {
            let emit: Sink<'_> = &mut |v| {
                let mut next = acc.clone();
                next.insert(name.clone(), v);
                self.object(rest, input, env, next, out)
            };
            match (&entry.value, &entry.key) {
                (Some(expr), _) => self.eval(expr, input.clone(), env, emit),
                (None, ObjectKey::Variable(var)) => match env.get(var) {
                    Some(v) => emit(v.clone()),
                    None => Err(fail(format!("${var} is not defined"))),
                },
                (None, _) => emit(value::index(input, &Value::String(name.clone()))?),
            }
        })
    }

    fn destructure(
        &self,
        pattern: &Pattern,
        value: Value,
        input: &Value,
        env: &Env,
        out: &mut dyn FnMut(Env) -> Flow,
    ) -> Flow {
        match pattern {
            Pattern::Variable(name) => out(env.bind(name, value)),
            Pattern::Array(items) => {
                if !matches!(value, Value::Null | Value::Array(_)) {
                    return Err(fail(format!(
                        "Cannot index {} with number",
                        value::type_name(&value)
                    )));
                }
                self.destructure_items(items, 0, &value, input, env.clone(), out)
            }
            Pattern::Object(entries) => {
                if !matches!(value, Value::Null | Value::Object(_)) {
                    return Err(fail(format!(
                        "Cannot index {} with object pattern",
                        value::type_name(&value)
                    )));
                }
                self.destructure_entries(entries, &value, input, env.clone(), out)
            }
        }
    }

    fn destructure_items(
        &self,
        items: &[Pattern],
        at: usize,
        value: &Value,
        input: &Value,
        env: Env,
        out: &mut dyn FnMut(Env) -> Flow,
    ) -> Flow {
        let Some(pattern) = items.get(at) else {
            return out(env);
        };
        let element = value::index(value, &Value::from(at))?;
        self.destructure(pattern, element, input, &env, &mut |scope| {
            self.destructure_items(items, at + 1, value, input, scope, out)
        })
    }

    fn destructure_entries(
        &self,
        entries: &[(ObjectKey, Option<Pattern>)],
        value: &Value,
        input: &Value,
        env: Env,
        out: &mut dyn FnMut(Env) -> Flow,
    ) -> Flow {
        let Some(((key, pattern), rest)) = entries.split_first() else {
            return out(env);
        };
        self.object_key(key, input, &env, &mut |name| {
            let field = value::index(value, &Value::String(name))?;
            let scope = match key {
                ObjectKey::Variable(var) => env.bind(var, field.clone()),
                _ => env.clone(),
            };
            match pattern {
                Some(pattern) => self.destructure(pattern, field, input, &scope, &mut |inner| {
                    self.destructure_entries(rest, value, input, inner, out)
                }),
                None => self.destructure_entries(rest, value, input, scope, out),
            }
        })
    }

    /// `..`: the input and every value nested in it, depth first.
    pub(super) fn recurse_values(&self, input: Value, out: Sink<'_>) -> Flow {
        let _guard = self.enter()?;
        out(input.clone())?;
        if matches!(input, Value::Array(_) | Value::Object(_)) {
            for child in into_children(input)? {
                self.recurse_values(child, out)?;
            }
        }
        Ok(())
    }

    /// Evaluates `expr` as a path expression rooted at `path`, where
    /// `current` is the value found there.
    pub(super) fn eval_path(
        &self,
        expr: &Expr,
        path: Vec<Value>,
        current: Value,
        env: &Env,
        out: PathSink<'_>,
    ) -> Flow {
        let _guard = self.enter()?;
        match expr {
            Expr::Identity => out(path, current),
            Expr::RecurseAll => self.recurse_paths(path, current, out),
            Expr::Index { target, index } => {
                self.eval_path(target, path, current.clone(), env, &mut |p, v| {
                    self.eval(index, current.clone(), env, &mut |k| {
                        let child = value::index(&v, &k)?;
                        out(extend(&p, k), child)
                    })
                })
            }
            Expr::Slice { target, from, to } => {
                self.eval_path(target, path, current.clone(), env, &mut |p, v| {
                    self.eval_or_null(from.as_deref(), &current, env, &mut |f| {
                        self.eval_or_null(to.as_deref(), &current, env, &mut |e| {
                            let child = value::slice(&v, &f, &e)?;
                            out(extend(&p, value::slice_key(f.clone(), e)), child)
                        })
                    })
                })
            }
            Expr::Iterate(target) => self.eval_path(target, path, current, env, &mut |p, v| {
                for (key, child) in value::iterate(&v)? {
                    out(extend(&p, key), child)?;
                }
                Ok(())
            }),
            Expr::Pipe(lhs, rhs) => self.eval_path(lhs, path, current, env, &mut |p, v| {
                self.eval_path(rhs, p, v, env, out)
            }),
            Expr::Comma(lhs, rhs) => {
                self.eval_path(lhs, path.clone(), current.clone(), env, out)?;
                self.eval_path(rhs, path, current, env, out)
            }
            Expr::If {
                branches,
                otherwise,
            } => self.branch_path(branches, otherwise.as_deref(), path, current, env, out),
            Expr::Alternative(lhs, rhs) => {
                let mut found = Vec::new();
                let result = self.eval_path(lhs, path.clone(), current.clone(), env, &mut |p, v| {
                    if is_truthy(&v) {
                        found.push((p, v));
                    }
                    Ok(())
                });
                match result {
                    Ok(()) | Err(Halt::Error(_)) => {}
                    Err(other) => return Err(other),
                }
                if found.is_empty() {
                    return self.eval_path(rhs, path, current, env, out);
                }
                for (p, v) in found {
                    out(p, v)?;
                }
                Ok(())
            }
            Expr::Try {
                body,
                handler: None,
            } => {
                let mut downstream = None;
                let result = self.eval_path(body, path, current, env, &mut |p, v| {
                    out(p, v).map_err(|halt| {
                        downstream = Some(halt);
                        Halt::Downstream
                    })
                });
                match result {
                    Ok(()) | Err(Halt::Error(_)) => Ok(()),
                    Err(Halt::Downstream) => Err(downstream.take().unwrap_or(Halt::Downstream)),
                    Err(other) => Err(other),
                }
            }
            Expr::Bind {
                source,
                patterns,
                body,
            } => self.eval(source, current.clone(), env, &mut |v| {
                self.bind_patterns(patterns, v, &current, env, &mut |scope| {
                    self.eval_path(body, path.clone(), current.clone(), &scope, out)
                })
            }),
            Expr::Call { name, args } => self.call_path(expr, name, args, path, current, env, out),
            Expr::FuncDef { def, rest } => {
                self.eval_path(rest, path, current, &env.bind_function(def), out)
            }
            Expr::CallDef { name, args } => {
                self.invoke(name, args, &current, env, &mut |body, scope| {
                    self.eval_path(body, path.clone(), current.clone(), scope, out)
                })
            }
            Expr::Label { name, body } => {
                let label = self.fresh_label();
                let scope = env.bind_label(name, label);
                catch_break(label, self.eval_path(body, path, current, &scope, out))
            }
            Expr::Break(name) => match env.label(name) {
                Some(label) => Err(Halt::Break(label)),
                None => Err(fail(format!("$*label-{name} is not defined"))),
            },
            other => self.invalid_path(other, current, env),
        }
    }

    fn branch_path(
        &self,
        branches: &[(Expr, Expr)],
        otherwise: Option<&Expr>,
        path: Vec<Value>,
        current: Value,
        env: &Env,
        out: PathSink<'_>,
    ) -> Flow {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(otherwise) => self.eval_path(otherwise, path, current, env, out),
                None => out(path, current),
            };
        };
        self.eval(cond, current.clone(), env, &mut |c| {
            if is_truthy(&c) {
                self.eval_path(then, path.clone(), current.clone(), env, out)
            } else {
                self.branch_path(rest, otherwise, path.clone(), current.clone(), env, out)
            }
        })
    }

    /// Raises the error for an expression that cannot be used as a path.
    pub(super) fn invalid_path(&self, expr: &Expr, current: Value, env: &Env) -> Flow {
        self.eval(expr, current, env, &mut |v| {
            Err(fail(format!(
                "Invalid path expression with result {}",
                value::to_json(&v)
            )))
        })
    }

    pub(super) fn recurse_paths(&self, path: Vec<Value>, current: Value, out: PathSink<'_>) -> Flow {
        let _guard = self.enter()?;
        out(path.clone(), current.clone())?;
        if matches!(current, Value::Array(_) | Value::Object(_)) {
            for (key, child) in value::iterate(&current)? {
                self.recurse_paths(extend(&path, key), child, out)?;
            }
        }
        Ok(())
    }

    pub(super) fn collect_paths(
        &self,
        expr: &Expr,
        input: &Value,
        env: &Env,
    ) -> Result<Vec<Vec<Value>>, Halt> {
        let mut paths = Vec::new();
        self.eval_path(expr, Vec::new(), input.clone(), env, &mut |p, _| {
            paths.push(p);
            Ok(())
        })?;
        Ok(paths)
    }

    /// Rewrites every path matched by `path` with `f`; `None` deletes it.
    pub(super) fn modify(
        &self,
        path: &Expr,
        input: Value,
        env: &Env,
        f: &mut dyn FnMut(Value) -> Result<Option<Value>, Halt>,
    ) -> Result<Value, Halt> {
        let paths = self.collect_paths(path, &input, env)?;
        let mut result = input;
        let mut doomed = Vec::new();
        for p in paths {
            let old = value::get_path(&result, &p)?;
            match f(old)? {
                Some(new) => result = value::set_path(result, &p, new)?,
                None => doomed.push(p),
            }
        }
        if doomed.is_empty() {
            Ok(result)
        } else {
            Ok(value::delete_paths(result, doomed)?)
        }
    }

    fn assign(
        &self,
        op: AssignOp,
        path: &Expr,
        rhs: &Expr,
        input: Value,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        match op {
            AssignOp::Set => self.eval(rhs, input.clone(), env, &mut |v| {
                let mut result = input.clone();
                for p in self.collect_paths(path, &input, env)? {
                    result = value::set_path(result, &p, v.clone())?;
                }
                out(result)
            }),
            AssignOp::Update => {
                let updated =
                    self.modify(path, input, env, &mut |old| self.first_output(rhs, old, env))?;
                out(updated)
            }
            AssignOp::Arith(arith) => self.eval(rhs, input.clone(), env, &mut |v| {
                let updated = self.modify(path, input.clone(), env, &mut |old| {
                    Ok(Some(value::arith(arith, old, v.clone())?))
                })?;
                out(updated)
            }),
            AssignOp::Alternative => self.eval(rhs, input.clone(), env, &mut |v| {
                let updated = self.modify(path, input.clone(), env, &mut |old| {
                    Ok(Some(if is_truthy(&old) { old } else { v.clone() }))
                })?;
                out(updated)
            }),
        }
    }
}

/// Owned children of `.[]`.
pub(super) fn into_children(value: Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        other => value::iterate(&other).map(|_| Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn run(source: &str, input: Value) -> Result<Vec<Value>, Value> {
        let ast = parse(source).unwrap();
        evaluate(&ast, input)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(RuntimeError::into_value)
    }

    fn one(source: &str, input: Value) -> Value {
        let mut outputs = run(source, input).unwrap();
        assert_eq!(outputs.len(), 1, "{source}: {outputs:?}");
        outputs.remove(0)
    }

    #[test]
    fn test_paths_and_iteration() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}], "total": 2});
        assert_eq!(run(".items[].id", doc.clone()).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(one(".items[-1]", doc.clone()), json!({"id": 2}));
        assert_eq!(one(".missing.deeper", doc.clone()), Value::Null);
        assert_eq!(one(".items[1:]", doc), json!([{"id": 2}]));
        assert_eq!(one(".[2:4]", json!("abcdef")), json!("cd"));
    }

    #[test]
    fn test_index_errors() {
        assert_eq!(
            run(".a", json!([1])).unwrap_err(),
            json!("Cannot index array with \"a\"")
        );
        assert_eq!(run(".a?", json!([1])).unwrap(), Vec::<Value>::new());
        assert_eq!(
            run(".[]", json!(3)).unwrap_err(),
            json!("Cannot iterate over number (3)")
        );
    }

    #[test]
    fn test_cartesian_arithmetic_order() {
        assert_eq!(
            run("(1,2) + (10,20)", Value::Null).unwrap(),
            vec![json!(11), json!(12), json!(21), json!(22)]
        );
    }

    #[test]
    fn test_construction() {
        assert_eq!(
            one("{id, name: .n, (.k): 1}", json!({"id": 7, "n": "x", "k": "dyn"})),
            json!({"id": 7, "name": "x", "dyn": 1})
        );
        assert_eq!(
            run("{a: (1,2)}", Value::Null).unwrap(),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
        assert_eq!(one("[.[] * 2]", json!([1, 2])), json!([2, 4]));
        assert_eq!(one("\"id=\\(.id) \\(.t)\"", json!({"id": 1, "t": [1]})), json!("id=1 [1]"));
    }

    #[test]
    fn test_alternative_and_logic() {
        assert_eq!(one(".a // \"none\"", json!({})), json!("none"));
        assert_eq!(one(".a // \"none\"", json!({"a": false})), json!("none"));
        assert_eq!(run("(false, 1, null, 2) // 3", Value::Null).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(one("(.a | error) // 5", json!({"a": "x"})), json!(5));
        assert_eq!(one("true and (null or 1)", Value::Null), json!(true));
    }

    #[test]
    fn test_try_catch() {
        assert_eq!(one("try error(\"boom\") catch .", Value::Null), json!("boom"));
        assert_eq!(
            one("try error({code: 1}) catch .code", Value::Null),
            json!(1)
        );
        assert_eq!(
            run("[.[] | try if . == 2 then error(\"x\") else . end]", json!([1, 2, 3])).unwrap(),
            vec![json!([1, 3])]
        );
    }

    #[test]
    fn test_try_does_not_swallow_downstream_errors() {
        let err = run("try (1, 2) | error", Value::Null).unwrap_err();
        assert_eq!(err, json!(1));
        assert_eq!(run("(try (1, 2)) | . + 1", Value::Null).unwrap(), vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_reduce_and_foreach() {
        assert_eq!(one("reduce .[] as $x (0; . + $x)", json!([1, 2, 3])), json!(6));
        assert_eq!(one("reduce empty as $x (0; . + 1)", Value::Null), json!(0));
        assert_eq!(
            run("foreach .[] as $x (0; . + $x)", json!([1, 2, 3])).unwrap(),
            vec![json!(1), json!(3), json!(6)]
        );
        assert_eq!(
            run("foreach .[] as $x (0; . + $x; [$x, .])", json!([1, 2])).unwrap(),
            vec![json!([1, 1]), json!([2, 3])]
        );
    }

    #[test]
    fn test_destructuring() {
        assert_eq!(
            one(". as [$a, {b: $c}] | $a + $c", json!([1, {"b": 2}])),
            json!(3)
        );
        assert_eq!(one(". as {$id, name: $n} | [$id, $n]", json!({"id": 1, "name": "x"})), json!([1, "x"]));
        assert_eq!(one(". as [$a, $b] | $b", json!([1])), Value::Null);
    }

    #[test]
    fn test_if_without_else() {
        assert_eq!(one("if . > 1 then \"big\" end", json!(0)), json!(0));
        assert_eq!(
            one("if . == 0 then \"zero\" elif . == 1 then \"one\" else \"many\" end", json!(1)),
            json!("one")
        );
    }

    #[test]
    fn test_assignment() {
        assert_eq!(one(".a = 1", json!({"b": 2})), json!({"b": 2, "a": 1}));
        assert_eq!(one(".a |= . + 1", json!({"a": 1})), json!({"a": 2}));
        assert_eq!(one(".[] += 10", json!([1, 2])), json!([11, 12]));
        assert_eq!(one(".a //= 5", json!({"a": null})), json!({"a": 5}));
        assert_eq!(one(".a.b.c = true", Value::Null), json!({"a": {"b": {"c": true}}}));
        assert_eq!(
            one("(.[] | select(. > 1)) |= empty", json!([1, 2, 3])),
            json!([1])
        );
        assert_eq!(
            run(".a = (1, 2)", json!({})).unwrap(),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
    }

    #[test]
    fn test_recurse_all() {
        assert_eq!(
            run("[..] | length", json!({"a": [1, {"b": 2}]})).unwrap(),
            vec![json!(5)]
        );
    }

    #[test]
    fn test_invalid_path_expression() {
        let err = run("path(1)", Value::Null).unwrap_err();
        assert_eq!(err, json!("Invalid path expression with result 1"));
    }

    #[test]
    fn test_env_shadowing() {
        let env = Env::default().bind("x", json!(1)).bind("x", json!(2));
        assert_eq!(env.get("x"), Some(&json!(2)));
        assert_eq!(env.get("y"), None);
        assert_eq!(one("1 as $x | 2 as $x | $x", Value::Null), json!(2));

        let scope = Env::default().bind("x", json!(1)).bind_label("x", 3);
        assert_eq!(scope.get("x"), Some(&json!(1)));
        assert_eq!(scope.label("x"), Some(3));
        assert!(scope.function("x", 0).is_none());
    }

    #[test]
    fn test_definitions() {
        assert_eq!(one("def inc(f): f + 1; [.[] | inc(. * 2)]", json!([1, 2])), json!([3, 5]));
        assert_eq!(
            run("def f($a; $b): $a + $b + a; f(1, 2; 10)", Value::Null).unwrap(),
            vec![json!(12), json!(14)]
        );
        assert_eq!(one("def f(g): 1 as $x | g; 2 as $x | f($x)", Value::Null), json!(2));
        assert_eq!(
            one("def r: if . < 3 then ., (. + 1 | r) else . end; [0 | r]", Value::Null),
            json!([0, 1, 2, 3])
        );
        assert_eq!(one("def f: 1; def g: f; def f: 2; [f, g]", Value::Null), json!([2, 1]));
    }

    #[test]
    fn test_definitions_as_paths() {
        assert_eq!(one("def second: .[1]; [path(second)]", json!([1, 2])), json!([[1]]));
        assert_eq!(one("def second: .[1]; second = 9", json!([1, 2])), json!([1, 9]));
        assert_eq!(
            one("def at($k): .[$k]; at(\"a\") |= . + 1", json!({"a": 1})),
            json!({"a": 2})
        );
    }

    #[test]
    fn test_label_and_break() {
        assert_eq!(
            one("[label $out | .[] | if . > 2 then break $out else . end]", json!([1, 2, 3, 4])),
            json!([1, 2])
        );
        assert_eq!(one("[label $a | label $b | 1, break $a, 2]", Value::Null), json!([1]));
        assert_eq!(
            one("[.[] | label $skip | if . == 2 then break $skip else . end]", json!([1, 2, 3])),
            json!([1, 3])
        );
    }

    #[test]
    fn test_destructuring_alternatives() {
        assert_eq!(one(". as [$a] ?// $a | $a", json!([3])), json!(3));
        assert_eq!(one(". as [$a] ?// $a | $a", json!(5)), json!(5));
        assert_eq!(
            one(". as [$a] ?// $a | if $a == 3 then error(\"bad\") else $a end", json!([3])),
            json!([3])
        );
        assert_eq!(
            one(". as [$a] ?// {b: $b} | [$a, $b]", json!({"b": 1})),
            json!([null, 1])
        );
        assert_eq!(
            run(". as [$a] ?// $a | error(\"bad\")", json!([1])).unwrap_err(),
            json!("bad")
        );
        // a failure after the binding does not retry it
        assert_eq!(
            run("(. as [$a] ?// $a | $a) | error", json!([1])).unwrap_err(),
            json!(1)
        );
    }

    #[test]
    fn test_globals_and_formats() {
        assert_eq!(one("$ENV | type", Value::Null), json!("object"));
        assert_eq!(one("$__loc__", Value::Null), json!({"file": "<stdin>", "line": 1}));
        assert_eq!(one("@base64 \"x=\\(.)\"", json!("hi")), json!("x=aGk="));
        assert_eq!(one("@csv", json!([1, "a"])), json!("1,\"a\""));
        assert_eq!(
            run("@csv", json!([{}])).unwrap_err(),
            json!("object ({}) is not valid in a csv row")
        );
    }

    #[test]
    fn test_input_numbers_are_canonical() {
        assert_eq!(one(".", json!(2.0)), json!(2));
        assert_eq!(one(".[0] | tostring", json!([3.0])), json!("3"));
    }
}
