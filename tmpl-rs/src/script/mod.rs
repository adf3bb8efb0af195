//! Built-in expression language.
//!
//! A small dynamically typed language with Lua-flavoured values (nil,
//! booleans, numbers, strings, lists indexed from 1, maps, functions) and a
//! C-flavoured operator set.  [`ScriptEnv`] plugs it into the template
//! engine; a [`Context`] holds the variables a render reads and writes.
//!
//! # Quick start
//!
//! ```rust
//! use tmpl::script::{Context, ScriptEnv, Value};
//! use tmpl::{Engine, ResolveError};
//!
//! let mut engine = Engine::new(ScriptEnv::new()).unwrap();
//! engine.set_resolver(Some(std::rc::Rc::new(|_: &str| -> Result<Vec<u8>, ResolveError> {
//!     Ok(b"<l:for in=\"ipairs(xs)\" names=\"i, x\">${i}=${x} </l:for>".to_vec())
//! })));
//!
//! let mut ctx = Context::new();
//! ctx.set("xs", Value::from(vec!["a", "b"]));
//! let out = engine.render("list.html", &mut ctx).unwrap();
//! assert_eq!(out, b"1=a 2=b ");
//! ```

pub mod builtins;
pub mod expr;
pub mod value;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::env::{Environment, Repr};

pub use expr::{EvalContext, Expr};
pub use value::Value;

// ── Context ───────────────────────────────────────────────────────────────────

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Variable bindings for one or more renders.
///
/// Every context has its own identity, so a clone is a distinct context that
/// starts with the same variables.
#[derive(Debug)]
pub struct Context {
    id: usize,
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            vars: HashMap::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            vars: self.vars.clone(),
            ..Self::new()
        }
    }
}

impl EvalContext for Context {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| builtins::lookup(name))
    }

    fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_owned(), value);
    }
}

// ── Environment ───────────────────────────────────────────────────────────────

/// The built-in language as a template [`Environment`].
///
/// Expressions are evaluated against the context passed at evaluation time,
/// so binding is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptEnv;

impl ScriptEnv {
    pub fn new() -> Self {
        Self
    }
}

impl Environment for ScriptEnv {
    type Value = Value;
    type Expr = Expr;
    type Context = Context;

    fn compile(&mut self, text: &[u8]) -> Result<Expr, String> {
        let text = std::str::from_utf8(text).map_err(|e| format!("invalid UTF-8: {e}"))?;
        expr::parse_expr(text)
    }

    fn context_id(&self, ctx: &Context) -> usize {
        ctx.id()
    }

    fn bind(&mut self, _expr: &Expr, _ctx: &Context) -> Result<(), String> {
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, ctx: &mut Context) -> Result<Vec<Value>, String> {
        expr::eval_multi(expr, ctx)
    }

    fn call(&mut self, func: &Value, args: &[Value], _ctx: &mut Context) -> Result<Vec<Value>, String> {
        expr::call_value(func, args)
    }

    fn assign(&mut self, ctx: &mut Context, name: &str, value: Value) -> Result<(), String> {
        ctx.set_var(name, value);
        Ok(())
    }

    fn nil(&self) -> Value {
        Value::Nil
    }

    fn is_nil(&self, value: &Value) -> bool {
        value.is_nil()
    }

    fn truthy(&self, value: &Value) -> bool {
        value.as_bool()
    }

    fn repr<'a>(&self, value: &'a Value) -> Repr<'a> {
        match value {
            Value::Nil => Repr::Nil,
            Value::Str(s) => Repr::Text(Cow::Borrowed(s.as_bytes())),
            Value::Int(_) | Value::Float(_) => Repr::Text(Cow::Owned(value.to_string().into_bytes())),
            other => Repr::Other(other.type_name()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
