//! Template interpreter.
//!
//! Walks a compiled node sequence with an instruction pointer.  `for` loops
//! keep their `(iterator, state, control)` triple on a stack local to one
//! template execution; an included template gets its own.

use std::io::Write;

use crate::engine::Engine;
use crate::env::{Environment, Repr};
use crate::error::Error;
use crate::escape::write_escaped;
use crate::template::{Escape, Node, Template};

/// Render `name` at inclusion `depth` (1 for a top-level render).
pub(crate) fn render<E: Environment>(
    engine: &mut Engine<E>,
    name: &str,
    ctx: &mut E::Context,
    out: &mut dyn Write,
    depth: usize,
) -> Result<(), Error> {
    let max_depth = engine.config().max_depth;
    if depth > max_depth {
        return Err(Error::DepthExceeded(max_depth));
    }

    let template = engine.template(name)?;
    bind(engine.env_mut(), &template, ctx)?;

    let nodes = template.nodes();
    let mut loops: Vec<Loop<E::Value>> = Vec::new();
    let mut i = 0;
    while i < nodes.len() {
        match &nodes[i] {
            Node::None => i += 1,

            Node::Jump { target } => i = *target,

            Node::If { expr, false_target } => {
                let env = engine.env_mut();
                let cond = eval_one(env, expr, ctx)?;
                i = if env.truthy(&cond) { i + 1 } else { *false_target };
            }

            Node::ForInit { expr } => {
                let mut values = eval(engine.env_mut(), expr, ctx, 3)?.into_iter();
                if let (Some(iter), Some(state), Some(control)) =
                    (values.next(), values.next(), values.next())
                {
                    loops.push(Loop {
                        iter,
                        state,
                        control,
                    });
                }
                i += 1;
            }

            Node::ForNext { names, end_target } => {
                let env = engine.env_mut();
                let Some(lp) = loops.last_mut() else {
                    i = *end_target;
                    continue;
                };
                let args = [lp.state.clone(), lp.control.clone()];
                let mut values = env
                    .call(&lp.iter, &args, ctx)
                    .map_err(Error::Expression)?;
                values.resize(names.len().max(1), env.nil());
                if env.is_nil(&values[0]) {
                    loops.pop();
                    i = *end_target;
                } else {
                    lp.control = values[0].clone();
                    assign(env, ctx, names, values)?;
                    i += 1;
                }
            }

            Node::Set { names, expr } => {
                let env = engine.env_mut();
                let values = eval(env, expr, ctx, names.len())?;
                assign(env, ctx, names, values)?;
                i += 1;
            }

            Node::Include { filename } => {
                let env = engine.env_mut();
                let value = eval_one(env, filename, ctx)?;
                let included = match env.repr(&value) {
                    Repr::Text(text) => String::from_utf8_lossy(&text).into_owned(),
                    Repr::Nil => "(nil)".to_owned(),
                    Repr::Other(type_name) => format!("({type_name})"),
                };
                render(engine, &included, ctx, out, depth + 1)?;
                i += 1;
            }

            Node::Sub { expr, flags } => {
                let env = engine.env_mut();
                let value = eval_one(env, expr, ctx)?;
                match env.repr(&value) {
                    Repr::Text(text) => emit(out, &text, flags.escape)?,
                    Repr::Nil if flags.suppress_nil => {}
                    Repr::Nil => emit(out, b"(nil)", flags.escape)?,
                    Repr::Other(type_name) => {
                        emit(out, format!("({type_name})").as_bytes(), flags.escape)?
                    }
                }
                i += 1;
            }

            Node::Raw(range) => {
                out.write_all(template.raw(range)).map_err(Error::Write)?;
                i += 1;
            }
        }
    }
    Ok(())
}

struct Loop<V> {
    iter: V,
    state: V,
    control: V,
}

/// Point every expression of `template` at `ctx` unless it already is.
fn bind<E: Environment>(
    env: &mut E,
    template: &Template<E::Expr>,
    ctx: &E::Context,
) -> Result<(), Error> {
    let id = env.context_id(ctx);
    if template.bound_to() == Some(id) {
        return Ok(());
    }
    log::trace!("binding {} to context {id:#x}", template.name());
    for expr in template.nodes().iter().filter_map(Node::expr) {
        env.bind(expr, ctx).map_err(Error::Expression)?;
    }
    template.set_bound_to(id);
    Ok(())
}

/// Evaluate to exactly `n` values, padding with nil.
fn eval<E: Environment>(
    env: &mut E,
    expr: &E::Expr,
    ctx: &mut E::Context,
    n: usize,
) -> Result<Vec<E::Value>, Error> {
    let mut values = env.eval(expr, ctx).map_err(Error::Expression)?;
    values.resize(n, env.nil());
    Ok(values)
}

fn eval_one<E: Environment>(
    env: &mut E,
    expr: &E::Expr,
    ctx: &mut E::Context,
) -> Result<E::Value, Error> {
    let values = env.eval(expr, ctx).map_err(Error::Expression)?;
    Ok(values.into_iter().next().unwrap_or_else(|| env.nil()))
}

/// Bind names to values positionally.  The first name is assigned last, so
/// it wins when a name repeats.
fn assign<E: Environment>(
    env: &mut E,
    ctx: &mut E::Context,
    names: &[String],
    values: Vec<E::Value>,
) -> Result<(), Error> {
    for (name, value) in names.iter().zip(values).rev() {
        env.assign(ctx, name, value).map_err(Error::Expression)?;
    }
    Ok(())
}

fn emit(out: &mut dyn Write, bytes: &[u8], escape: Escape) -> Result<(), Error> {
    write_escaped(out, bytes, escape).map_err(Error::Write)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
