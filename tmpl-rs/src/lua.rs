//! Lua 5.4 expressions via the `mlua` crate.
//!
//! Enabled with the `lua` Cargo feature:
//! ```text
//! cargo build --features lua
//! cargo test  --features lua
//! ```
//!
//! Each expression compiles to a chunk `return <expr>` whose only upvalue,
//! `_ENV`, is pointed at the render context.  A context is a plain Lua table;
//! [`LuaEnv::context`] builds one that falls back to the Lua globals, so
//! standard functions such as `string.upper` or `ipairs` stay reachable.
//!
//! | Template            | Lua                                        |
//! |---------------------|--------------------------------------------|
//! | `${expr}`           | first value of `return expr`               |
//! | `<l:for in="e">`    | generic `for` over the triple `e` returns  |
//! | `<l:set names="a">` | `ctx.a = …` (raw table field)              |

use std::borrow::Cow;

use mlua::{ChunkMode, Function, Lua, MultiValue, Table, Value};

use crate::env::{Environment, Repr};

/// A Lua state used as an expression [`Environment`].
pub struct LuaEnv {
    lua: Lua,
}

impl LuaEnv {
    pub fn new() -> Self {
        Self::from_lua(Lua::new())
    }

    /// Wrap an existing state, e.g. one with application functions
    /// registered in its globals.
    pub fn from_lua(lua: Lua) -> Self {
        Self { lua }
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// A fresh context table whose missing keys resolve through the globals.
    pub fn context(&self) -> mlua::Result<Table> {
        let ctx = self.lua.create_table()?;
        let meta = self.lua.create_table()?;
        meta.set("__index", self.lua.globals())?;
        ctx.set_metatable(Some(meta));
        Ok(ctx)
    }
}

impl Default for LuaEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for LuaEnv {
    type Value = Value;
    type Expr = Function;
    type Context = Table;

    fn compile(&mut self, text: &[u8]) -> Result<Function, String> {
        let mut chunk = b"return ".to_vec();
        chunk.extend_from_slice(text);
        self.lua
            .load(chunk)
            .set_name(String::from_utf8_lossy(text))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|e| e.to_string())
    }

    fn context_id(&self, ctx: &Table) -> usize {
        ctx.to_pointer() as usize
    }

    fn bind(&mut self, expr: &Function, ctx: &Table) -> Result<(), String> {
        expr.set_environment(ctx.clone())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn eval(&mut self, expr: &Function, _ctx: &mut Table) -> Result<Vec<Value>, String> {
        expr.call::<MultiValue>(())
            .map(|values| values.into_iter().collect())
            .map_err(|e| e.to_string())
    }

    fn call(&mut self, func: &Value, args: &[Value], _ctx: &mut Table) -> Result<Vec<Value>, String> {
        let Value::Function(func) = func else {
            return Err(format!("attempt to call a {} value", func.type_name()));
        };
        func.call::<MultiValue>(args.iter().cloned().collect::<MultiValue>())
            .map(|values| values.into_iter().collect())
            .map_err(|e| e.to_string())
    }

    fn assign(&mut self, ctx: &mut Table, name: &str, value: Value) -> Result<(), String> {
        ctx.raw_set(name, value).map_err(|e| e.to_string())
    }

    fn nil(&self) -> Value {
        Value::Nil
    }

    fn is_nil(&self, value: &Value) -> bool {
        value.is_nil()
    }

    fn truthy(&self, value: &Value) -> bool {
        !matches!(value, Value::Nil | Value::Boolean(false))
    }

    fn repr<'a>(&self, value: &'a Value) -> Repr<'a> {
        match value {
            Value::Nil => Repr::Nil,
            Value::String(_) | Value::Integer(_) | Value::Number(_) => {
                match self.lua.coerce_string(value.clone()) {
                    Ok(Some(s)) => Repr::Text(Cow::Owned(s.as_bytes().to_vec())),
                    _ => Repr::Other(value.type_name()),
                }
            }
            other => Repr::Other(other.type_name()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "lua"))]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::resolve::ResolveError;
    use crate::{Engine, Error};

    fn engine(src: &'static str) -> Engine<LuaEnv> {
        let mut engine = Engine::new(LuaEnv::new()).unwrap();
        engine.set_resolver(Some(Rc::new(
            move |_: &str| -> Result<Vec<u8>, ResolveError> { Ok(src.as_bytes().to_vec()) },
        )));
        engine
    }

    #[test]
    fn substitutes_with_lua_coercion() {
        let mut e = engine("${n}|${n / 2}|${'a' .. 'b'}|${t}|$[n]{missing}|${missing}");
        let mut ctx = e.env().context().unwrap();
        ctx.set("n", 3).unwrap();
        ctx.set("t", e.env().lua().create_table().unwrap()).unwrap();
        let out = e.render("t", &mut ctx).unwrap();
        assert_eq!(out, b"3|1.5|ab|(table)||(nil)");
    }

    #[test]
    fn loops_over_ipairs_and_pairs() {
        let mut e = engine(
            r#"<l:for in="ipairs(items)" names="i, v">${i}:${string.upper(v)} </l:for>"#,
        );
        let mut ctx = e.env().context().unwrap();
        let items = e.env().lua().create_sequence_from(["a", "b"]).unwrap();
        ctx.set("items", items).unwrap();
        assert_eq!(e.render("t", &mut ctx).unwrap(), b"1:A 2:B ");
        // The loop variables were written into the context.
        assert_eq!(ctx.get::<i64>("i").unwrap(), 2);
    }

    #[test]
    fn conditionals_and_set() {
        let mut e = engine(
            r#"<l:set names="a, b" expressions="10, 20"/><l:if cond="a > b">gt<l:elseif cond="a == b">eq<l:else>lt</l:if>"#,
        );
        let mut ctx = e.env().context().unwrap();
        assert_eq!(e.render("t", &mut ctx).unwrap(), b"lt");
        assert_eq!(ctx.get::<i64>("b").unwrap(), 20);
    }

    #[test]
    fn rebinds_when_the_context_changes() {
        let mut e = engine("${who}");
        let mut first = e.env().context().unwrap();
        first.set("who", "first").unwrap();
        let mut second = e.env().context().unwrap();
        second.set("who", "second").unwrap();
        assert_eq!(e.render("t", &mut first).unwrap(), b"first");
        assert_eq!(e.render("t", &mut second).unwrap(), b"second");
        assert_eq!(e.render("t", &mut first).unwrap(), b"first");
        assert_eq!(e.cached_len(), 1);
    }

    #[test]
    fn script_escaping() {
        let mut e = engine(r#"var s = "$[j]{s}";"#);
        let mut ctx = e.env().context().unwrap();
        ctx.set("s", "say \"hi\"\n").unwrap();
        assert_eq!(e.render("t", &mut ctx).unwrap(), b"var s = \"say \\\"hi\\\"\\n\";");
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let mut e = engine("line one\n${1 +}");
        let mut ctx = e.env().context().unwrap();
        let err = e.render("page", &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Parse(ref p) if p.line == 2), "{err}");
    }

    #[test]
    fn runtime_errors_abort() {
        let mut e = engine("${error('boom')}");
        let mut ctx = e.env().context().unwrap();
        let err = e.render("t", &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Expression(ref m) if m.contains("boom")));
    }

    #[test]
    fn calling_a_non_function_fails() {
        let mut env = LuaEnv::new();
        let mut ctx = env.context().unwrap();
        let err = env.call(&Value::Integer(1), &[], &mut ctx).unwrap_err();
        assert_eq!(err, "attempt to call a integer value");
    }
}
