//! The expression-evaluation capability templates are compiled against.
//!
//! The compiler and interpreter never look inside an expression.  They hand
//! expression text to an [`Environment`] at compile time, keep the opaque
//! handle it returns in the node sequence, and ask the environment to bind,
//! evaluate and inspect values at render time.
//!
//! Two environments ship with the crate: [`crate::script::ScriptEnv`], a small
//! built-in expression language, and `LuaEnv` (Cargo feature `lua`).

use std::borrow::Cow;

/// How a value renders in a substitution or include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repr<'a> {
    /// The nil value.
    Nil,
    /// A string, or a value with a natural string form (numbers).
    Text(Cow<'a, [u8]>),
    /// Anything else, named by its type (`"boolean"`, `"table"`, …).
    Other(&'static str),
}

/// A host expression runtime.
///
/// Expression handles are released by dropping them.
pub trait Environment {
    /// A runtime value.
    type Value: Clone;
    /// A compiled expression.
    type Expr;
    /// The mutable named-binding context expressions read and write.
    type Context;

    /// Compile expression source text.
    fn compile(&mut self, text: &[u8]) -> Result<Self::Expr, String>;

    /// Identity of a context.  Two contexts compare equal only if they are
    /// the same object; equal contents do not make equal identities.
    fn context_id(&self, ctx: &Self::Context) -> usize;

    /// Attach `expr` to `ctx` ahead of evaluation.  Environments that pass the
    /// context at evaluation time can leave this as a no-op.
    fn bind(&mut self, expr: &Self::Expr, ctx: &Self::Context) -> Result<(), String>;

    /// Evaluate `expr`, returning every value it produces.
    fn eval(&mut self, expr: &Self::Expr, ctx: &mut Self::Context)
        -> Result<Vec<Self::Value>, String>;

    /// Call a function value with `args`.
    fn call(
        &mut self,
        func: &Self::Value,
        args: &[Self::Value],
        ctx: &mut Self::Context,
    ) -> Result<Vec<Self::Value>, String>;

    /// Bind `name` to `value` in `ctx`.
    fn assign(&mut self, ctx: &mut Self::Context, name: &str, value: Self::Value)
        -> Result<(), String>;

    fn nil(&self) -> Self::Value;

    fn is_nil(&self, value: &Self::Value) -> bool {
        matches!(self.repr(value), Repr::Nil)
    }

    fn truthy(&self, value: &Self::Value) -> bool;

    fn repr<'a>(&self, value: &'a Self::Value) -> Repr<'a>;
}
