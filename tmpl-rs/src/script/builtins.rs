//! Built-in functions.
//!
//! Built-ins are ordinary [`Value::Func`] values found by name when a
//! variable lookup misses, so a context can shadow any of them.  Each one
//! receives the already-evaluated arguments and returns every result value.
//!
//! | Function                 | Result                                        |
//! |--------------------------|-----------------------------------------------|
//! | `len(x)`                 | characters of a string, entries of a table    |
//! | `upper(s)`, `lower(s)`   | case-mapped string                            |
//! | `substr(s, pos[, n])`    | `n` characters from offset `pos` (from 0)     |
//! | `concat(…)`              | arguments joined                              |
//! | `replace(s, from, to)`   | every `from` replaced                         |
//! | `pad(s, width[, c])`     | right-padded to `width`                       |
//! | `str(x)`, `type(x)`      | string form, type name                        |
//! | `abs`, `min`, `max`      | numeric helpers                               |
//! | `list(…)`                | a list of the arguments                       |
//! | `split(s[, sep])`        | list of pieces (whitespace when no `sep`)     |
//! | `join(list[, sep])`      | string                                        |
//! | `ipairs(list)`           | iterator over `index, value`                  |
//! | `pairs(t)`               | iterator over `key, value` (keys sorted)      |
//! | `range([from,] to[, step])` | iterator over numbers, `from` defaults to 1 |
//!
//! The three iterator constructors return `(function, state, control)`, the
//! triple `<l:for>` drives.

use std::ops::Bound;

use super::value::{Builtin, Func, Value};

const BUILTINS: &[(&str, Builtin)] = &[
    ("len", len),
    ("upper", upper),
    ("lower", lower),
    ("substr", substr),
    ("concat", concat),
    ("replace", replace),
    ("pad", pad),
    ("str", to_str),
    ("type", type_of),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("list", list),
    ("split", split),
    ("join", join),
    ("ipairs", ipairs),
    ("pairs", pairs),
    ("range", range),
];

/// The built-in named `name`, if any.
pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(name, f)| Value::Func(Func { name, f }))
}

fn one(v: Value) -> Result<Vec<Value>, String> {
    Ok(vec![v])
}

// ── Strings ───────────────────────────────────────────────────────────────────

fn len(args: &[Value]) -> Result<Vec<Value>, String> {
    let n = match args.first() {
        Some(Value::Str(s)) => s.chars().count(),
        Some(Value::List(items)) => items.len(),
        Some(Value::Map(entries)) => entries.len(),
        other => return Err(bad_type(1, "string or table", other)),
    };
    one(Value::Int(n as i64))
}

fn upper(args: &[Value]) -> Result<Vec<Value>, String> {
    one(Value::Str(get_str(args, 0)?.to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Vec<Value>, String> {
    one(Value::Str(get_str(args, 0)?.to_lowercase()))
}

fn substr(args: &[Value]) -> Result<Vec<Value>, String> {
    let s = get_str(args, 0)?;
    let pos = get_int(args, 1)?.max(0) as usize;
    let chars = s.chars().skip(pos);
    let out: String = match args.get(2).filter(|v| !v.is_nil()) {
        Some(n) => chars.take(n.as_int().max(0) as usize).collect(),
        None => chars.collect(),
    };
    one(Value::Str(out))
}

fn concat(args: &[Value]) -> Result<Vec<Value>, String> {
    let mut out = String::new();
    for a in args.iter().filter(|a| !a.is_nil()) {
        out.push_str(&a.to_string());
    }
    one(Value::Str(out))
}

fn replace(args: &[Value]) -> Result<Vec<Value>, String> {
    let haystack = get_str(args, 0)?;
    let needle = get_str(args, 1)?;
    let repl = get_str(args, 2)?;
    if needle.is_empty() {
        return one(Value::Str(haystack));
    }
    one(Value::Str(haystack.replace(&needle, &repl)))
}

fn pad(args: &[Value]) -> Result<Vec<Value>, String> {
    let s = get_str(args, 0)?;
    let width = get_int(args, 1)?.max(0) as usize;
    let fill = args
        .get(2)
        .and_then(|v| v.to_string().chars().next())
        .unwrap_or(' ');
    let cur = s.chars().count();
    if cur >= width {
        return one(Value::Str(s));
    }
    let padding: String = std::iter::repeat(fill).take(width - cur).collect();
    one(Value::Str(s + &padding))
}

fn to_str(args: &[Value]) -> Result<Vec<Value>, String> {
    one(Value::Str(args.first().cloned().unwrap_or_default().to_string()))
}

fn type_of(args: &[Value]) -> Result<Vec<Value>, String> {
    one(Value::from(args.first().map_or("nil", Value::type_name)))
}

// ── Numbers ───────────────────────────────────────────────────────────────────

fn abs(args: &[Value]) -> Result<Vec<Value>, String> {
    let v = args.first().ok_or("argument 1 missing")?;
    one(match v {
        Value::Int(n) => Value::Int(n.wrapping_abs()),
        Value::Float(x) => Value::Float(x.abs()),
        Value::Str(s) => {
            if let Ok(n) = s.trim().parse::<i64>() {
                Value::Int(n.wrapping_abs())
            } else if let Ok(x) = s.trim().parse::<f64>() {
                Value::Float(x.abs())
            } else {
                Value::Int(0)
            }
        }
        other => return Err(bad_type(1, "number", Some(other))),
    })
}

fn extreme(args: &[Value], keep: std::cmp::Ordering) -> Result<Vec<Value>, String> {
    let (first, rest) = args.split_first().ok_or("argument 1 missing")?;
    let best = rest.iter().fold(first, |best, v| {
        if v.cmp_value(best) == keep {
            v
        } else {
            best
        }
    });
    one(best.clone())
}

fn min(args: &[Value]) -> Result<Vec<Value>, String> {
    extreme(args, std::cmp::Ordering::Less)
}

fn max(args: &[Value]) -> Result<Vec<Value>, String> {
    extreme(args, std::cmp::Ordering::Greater)
}

// ── Tables ────────────────────────────────────────────────────────────────────

fn list(args: &[Value]) -> Result<Vec<Value>, String> {
    one(Value::list(args.to_vec()))
}

fn split(args: &[Value]) -> Result<Vec<Value>, String> {
    let s = get_str(args, 0)?;
    let sep = args.get(1).filter(|v| !v.is_nil()).map(ToString::to_string);
    let pieces: Vec<Value> = match sep.as_deref() {
        None | Some("") => s.split_whitespace().map(Value::from).collect(),
        Some(sep) => s.split(sep).map(Value::from).collect(),
    };
    one(Value::list(pieces))
}

fn join(args: &[Value]) -> Result<Vec<Value>, String> {
    let Some(Value::List(items)) = args.first() else {
        return Err(bad_type(1, "list", args.first()));
    };
    let sep = args.get(1).filter(|v| !v.is_nil()).map(ToString::to_string);
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    one(Value::Str(parts.join(sep.as_deref().unwrap_or(""))))
}

// ── Iterators ─────────────────────────────────────────────────────────────────

fn iterator(name: &'static str, f: Builtin, state: Value, control: Value) -> Vec<Value> {
    vec![Value::Func(Func { name, f }), state, control]
}

fn ipairs(args: &[Value]) -> Result<Vec<Value>, String> {
    match args.first() {
        Some(list @ Value::List(_)) => Ok(iterator(
            "ipairs_next",
            ipairs_next,
            list.clone(),
            Value::Int(0),
        )),
        other => Err(bad_type(1, "list", other)),
    }
}

fn ipairs_next(args: &[Value]) -> Result<Vec<Value>, String> {
    let list = args.first().cloned().unwrap_or_default();
    let Some(i) = args.get(1).map_or(0, Value::as_int).checked_add(1) else {
        return one(Value::Nil);
    };
    match list.index(&Value::Int(i)) {
        Value::Nil => one(Value::Nil),
        v => Ok(vec![Value::Int(i), v]),
    }
}

fn pairs(args: &[Value]) -> Result<Vec<Value>, String> {
    match args.first() {
        Some(Value::List(_)) => ipairs(args),
        Some(map @ Value::Map(_)) => Ok(iterator("pairs_next", pairs_next, map.clone(), Value::Nil)),
        other => Err(bad_type(1, "table", other)),
    }
}

fn pairs_next(args: &[Value]) -> Result<Vec<Value>, String> {
    let Some(Value::Map(entries)) = args.first() else {
        return Err(bad_type(1, "table", args.first()));
    };
    let next = match args.get(1) {
        None | Some(Value::Nil) => entries.iter().next(),
        Some(key) => {
            let key = key.to_string();
            entries
                .range::<str, _>((Bound::Excluded(key.as_str()), Bound::Unbounded))
                .next()
        }
    };
    match next {
        Some((k, v)) => Ok(vec![Value::from(k.as_str()), v.clone()]),
        None => one(Value::Nil),
    }
}

fn range(args: &[Value]) -> Result<Vec<Value>, String> {
    let (from, to) = match args {
        [] => return Err("argument 1 missing".into()),
        [to] => (1, to.as_int()),
        [from, to, ..] => (from.as_int(), to.as_int()),
    };
    let step = args.get(2).map_or(1, Value::as_int);
    if step == 0 {
        return Err("step must not be zero".into());
    }
    let state = Value::list(vec![Value::Int(to), Value::Int(step)]);
    Ok(iterator(
        "range_next",
        range_next,
        state,
        Value::Int(from.wrapping_sub(step)),
    ))
}

fn range_next(args: &[Value]) -> Result<Vec<Value>, String> {
    let state = args.first().cloned().unwrap_or_default();
    let to = state.index(&Value::Int(1)).as_int();
    let step = state.index(&Value::Int(2)).as_int();
    let Some(next) = args.get(1).map_or(0, Value::as_int).checked_add(step) else {
        return one(Value::Nil);
    };
    if (step > 0 && next > to) || (step < 0 && next < to) {
        return one(Value::Nil);
    }
    one(Value::Int(next))
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn get_str(args: &[Value], idx: usize) -> Result<String, String> {
    args.get(idx)
        .filter(|v| !v.is_nil())
        .map(ToString::to_string)
        .ok_or_else(|| format!("argument {} missing", idx + 1))
}

fn get_int(args: &[Value], idx: usize) -> Result<i64, String> {
    args.get(idx)
        .filter(|v| !v.is_nil())
        .map(Value::as_int)
        .ok_or_else(|| format!("argument {} missing", idx + 1))
}

fn bad_type(arg: usize, expected: &str, got: Option<&Value>) -> String {
    let got = got.map_or("no value", Value::type_name);
    format!("bad argument #{arg} ({expected} expected, got {got})")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::expr::call_value;

    fn call(name: &str, args: Vec<Value>) -> Vec<Value> {
        let f = lookup(name).expect("not a builtin");
        call_value(&f, &args).expect("call failed")
    }

    fn call1(name: &str, args: Vec<Value>) -> Value {
        call(name, args).into_iter().next().unwrap()
    }

    /// Drain an iterator triple the way `<l:for>` does.
    fn drain(triple: Vec<Value>) -> Vec<Vec<Value>> {
        let [f, state, mut control]: [Value; 3] = triple.try_into().unwrap();
        let mut rows = Vec::new();
        loop {
            let row = call_value(&f, &[state.clone(), control.clone()]).unwrap();
            if row[0].is_nil() {
                return rows;
            }
            control = row[0].clone();
            rows.push(row);
        }
    }

    #[test]
    fn string_functions() {
        assert_eq!(call1("len", vec!["h\u{e9}llo".into()]), Value::Int(5));
        assert_eq!(call1("upper", vec!["abc".into()]), Value::from("ABC"));
        assert_eq!(call1("lower", vec!["ABC".into()]), Value::from("abc"));
        assert_eq!(call1("substr", vec!["hello".into(), Value::Int(1)]), Value::from("ello"));
        assert_eq!(
            call1("substr", vec!["hello".into(), Value::Int(1), Value::Int(3)]),
            Value::from("ell")
        );
        assert_eq!(call1("substr", vec!["hi".into(), Value::Int(9)]), Value::from(""));
        assert_eq!(
            call1("concat", vec!["a".into(), Value::Int(1), Value::Nil, "b".into()]),
            Value::from("a1b")
        );
        assert_eq!(
            call1("replace", vec!["a-b-c".into(), "-".into(), "+".into()]),
            Value::from("a+b+c")
        );
        assert_eq!(call1("pad", vec!["hi".into(), Value::Int(5)]), Value::from("hi   "));
        assert_eq!(
            call1("pad", vec!["7".into(), Value::Int(3), ".".into()]),
            Value::from("7..")
        );
    }

    #[test]
    fn conversion_and_type() {
        assert_eq!(call1("str", vec![Value::Int(12)]), Value::from("12"));
        assert_eq!(call1("type", vec![Value::Int(12)]), Value::from("number"));
        assert_eq!(call1("type", vec![]), Value::from("nil"));
        assert_eq!(call1("type", vec![Value::list(vec![])]), Value::from("table"));
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(call1("abs", vec![Value::Int(-7)]), Value::Int(7));
        assert_eq!(call1("abs", vec![Value::Float(-1.5)]), Value::Float(1.5));
        assert_eq!(
            call1("min", vec![Value::Int(3), Value::Int(-1), Value::Int(2)]),
            Value::Int(-1)
        );
        assert_eq!(
            call1("max", vec![Value::Int(3), Value::Float(4.5), Value::Int(2)]),
            Value::Float(4.5)
        );
    }

    #[test]
    fn list_functions() {
        let l = call1("split", vec!["a, b,c".into(), ",".into()]);
        assert_eq!(l, Value::from(vec!["a", " b", "c"]));
        let l = call1("split", vec!["  x  y ".into()]);
        assert_eq!(l, Value::from(vec!["x", "y"]));
        assert_eq!(call1("join", vec![l, "-".into()]), Value::from("x-y"));
        assert_eq!(call1("len", vec![call1("list", vec![Value::Nil, Value::Int(1)])]), Value::Int(2));
    }

    #[test]
    fn ipairs_walks_in_order() {
        let rows = drain(call("ipairs", vec![Value::from(vec!["a", "b"])]));
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
            ]
        );
        assert!(drain(call("ipairs", vec![Value::list(vec![])])).is_empty());
    }

    #[test]
    fn pairs_walks_sorted_keys() {
        let m = Value::map([("b", Value::Int(2)), ("a", Value::Int(1))]);
        let rows = drain(call("pairs", vec![m]));
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("b"), Value::Int(2)],
            ]
        );
    }

    #[test]
    fn range_counts() {
        let firsts = |args| -> Vec<Value> {
            drain(call("range", args)).into_iter().map(|r| r[0].clone()).collect()
        };
        assert_eq!(firsts(vec![Value::Int(3)]), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            firsts(vec![Value::Int(0), Value::Int(6), Value::Int(3)]),
            vec![Value::Int(0), Value::Int(3), Value::Int(6)]
        );
        assert_eq!(
            firsts(vec![Value::Int(2), Value::Int(1), Value::Int(-1)]),
            vec![Value::Int(2), Value::Int(1)]
        );
        assert!(firsts(vec![Value::Int(0)]).is_empty());
    }

    #[test]
    fn argument_errors() {
        let f = lookup("upper").unwrap();
        assert_eq!(call_value(&f, &[]).unwrap_err(), "upper: argument 1 missing");
        let f = lookup("ipairs").unwrap();
        assert_eq!(
            call_value(&f, &[Value::Int(1)]).unwrap_err(),
            "ipairs: bad argument #1 (list expected, got number)"
        );
        let f = lookup("range").unwrap();
        assert!(call_value(&f, &[Value::Int(1), Value::Int(2), Value::Int(0)]).is_err());
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(lookup("no_such_fn").is_none());
        assert!(lookup("ipairs_next").is_none());
    }

    #[test]
    fn ipairs_stops_at_largest_control() {
        let (f, list) = {
            let mut triple = call("ipairs", vec![Value::from(vec![1i64])]).into_iter();
            (triple.next().unwrap(), triple.next().unwrap())
        };
        let row = call_value(&f, &[list, Value::Int(i64::MAX)]).unwrap();
        assert_eq!(row, vec![Value::Nil]);
    }
}
