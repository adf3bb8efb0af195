//! Runtime value type for the built-in expression language.
//!
//! Values are dynamically typed.  Strings coerce to numbers when an
//! arithmetic operator needs one, and anything renders through `Display`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Signature of a native function.
pub type Builtin = fn(&[Value]) -> Result<Vec<Value>, String>;

/// A named native function.
#[derive(Clone, Copy)]
pub struct Func {
    pub name: &'static str,
    pub f: Builtin,
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({})", self.name)
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Indexed from 1.
    List(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<String, Value>>),
    Func(Func),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => f.write_str(s),
            Value::List(_) | Value::Map(_) => f.write_str("table"),
            Value::Func(func) => write!(f, "function: {}", func.name),
        }
    }
}

impl Value {
    /// `nil`, `false`, zero, `""` and `"0"` are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::List(_) | Value::Map(_) | Value::Func(_) => true,
        }
    }

    /// Integer coercion; unparsable strings and non-scalars give 0.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Bool(b) => i64::from(*b),
            Value::Int(n) => *n,
            Value::Float(x) => *x as i64,
            Value::Str(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(n) => *n as f64,
            Value::Float(x) => *x,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Name of the type, as returned by `type()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) | Value::Map(_) => "table",
            Value::Func(_) => "function",
        }
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// `self[key]`; nil when absent or not indexable.
    pub fn index(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::List(items), Value::Int(_) | Value::Float(_)) => {
                let i = key.as_int();
                i.checked_sub(1)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or_default()
            }
            (Value::Map(entries), Value::Str(k)) => entries.get(k).cloned().unwrap_or_default(),
            (Value::Map(entries), _) if !key.is_nil() => {
                entries.get(&key.to_string()).cloned().unwrap_or_default()
            }
            _ => Value::Nil,
        }
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    /// Both operands as `f64`, and whether the result should stay a float.
    fn numeric_promote(a: &Value, b: &Value) -> (f64, f64, bool) {
        let floaty = |v: &Value| match v {
            Value::Float(_) => true,
            Value::Str(s) => s.contains('.'),
            _ => false,
        };
        (a.as_float(), b.as_float(), floaty(a) || floaty(b))
    }

    fn make_numeric(f: f64, is_float: bool) -> Value {
        if is_float {
            Value::Float(f)
        } else {
            Value::Int(f as i64)
        }
    }

    fn int_pair(a: &Value, b: &Value) -> Option<(i64, i64)> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Some((*x, *y)),
            _ => None,
        }
    }

    pub fn arith_add(&self, rhs: &Value) -> Value {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            return Value::Int(a.wrapping_add(b));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a + b, is_float)
    }

    pub fn arith_sub(&self, rhs: &Value) -> Value {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            return Value::Int(a.wrapping_sub(b));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a - b, is_float)
    }

    pub fn arith_mul(&self, rhs: &Value) -> Value {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            return Value::Int(a.wrapping_mul(b));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a * b, is_float)
    }

    pub fn arith_div(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        if b == 0.0 {
            return Err("division by zero".into());
        }
        Ok(Self::make_numeric(a / b, is_float))
    }

    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, String> {
        if let Some((a, b)) = Self::int_pair(self, rhs) {
            if b == 0 {
                return Err("modulo by zero".into());
            }
            return Ok(Value::Int(a.wrapping_rem(b)));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        if b == 0.0 {
            return Err("modulo by zero".into());
        }
        Ok(Self::make_numeric(a % b, is_float))
    }

    pub fn arith_neg(&self) -> Value {
        match self {
            Value::Int(n) => Value::Int(n.wrapping_neg()),
            Value::Float(x) => Value::Float(-x),
            Value::Str(s) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    Value::Int(n.wrapping_neg())
                } else if let Ok(x) = s.trim().parse::<f64>() {
                    Value::Float(-x)
                } else {
                    Value::Int(0)
                }
            }
            _ => Value::Int(0),
        }
    }

    /// Ordering for the relational operators.  Two strings compare
    /// numerically when both parse as numbers, otherwise bytewise.
    pub fn cmp_value(&self, rhs: &Value) -> Ordering {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(af), Ok(bf)) => af.partial_cmp(&bf).unwrap_or(Ordering::Equal),
                    _ => a.cmp(b),
                }
            }
            _ => {
                let (a, b, _) = Self::numeric_promote(self, rhs);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        }
    }

    /// `==`: scalars compare as [`cmp_value`](Self::cmp_value) does; nil,
    /// booleans and tables only equal their own kind.
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        use Value::{Float, Int, Str};
        match (self, rhs) {
            (Int(_) | Float(_) | Str(_), Int(_) | Float(_) | Str(_)) => {
                self.cmp_value(rhs) == Ordering::Equal
            }
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => self == rhs,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::list(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
