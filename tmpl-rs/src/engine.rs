//! The template engine: environment, configuration, resolver and the cache
//! of compiled templates, tied together behind `render`.

use std::io::Write;
use std::rc::Rc;

use crate::compile;
use crate::config::Config;
use crate::env::Environment;
use crate::error::Error;
use crate::render;
use crate::resolve::{FileResolver, Resolver};
use crate::table::Table;
use crate::template::Template;

/// Expected number of distinct templates; the cache grows past it.
const CACHE_LOAD: usize = 32;

pub struct Engine<E: Environment> {
    env: E,
    config: Config,
    resolver: Option<Rc<dyn Resolver>>,
    files: FileResolver,
    /// Compiled templates by name.  Owns its keys and drops evicted values.
    cache: Table<'static, Rc<Template<E::Expr>>>,
}

impl<E: Environment> Engine<E> {
    pub fn new(env: E) -> Result<Self, Error> {
        Self::with_config(env, Config::default())
    }

    pub fn with_config(env: E, config: Config) -> Result<Self, Error> {
        let mut cache = Table::new(CACHE_LOAD)?;
        cache.set_dup(true)?;
        cache.set_free(true)?;
        Ok(Self {
            env,
            files: FileResolver::new(config.template_dir.clone()),
            config,
            resolver: None,
            cache,
        })
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The custom resolver, if one is installed.
    pub fn resolver(&self) -> Option<Rc<dyn Resolver>> {
        self.resolver.clone()
    }

    /// Install a custom resolver, or fall back to reading files with `None`.
    /// Templates already in the cache are kept.
    pub fn set_resolver(&mut self, resolver: Option<Rc<dyn Resolver>>) {
        self.resolver = resolver;
    }

    /// Resolve and compile `name` without caching it.
    pub fn compile(&mut self, name: &str) -> Result<Template<E::Expr>, Error> {
        let source = match &self.resolver {
            Some(resolver) => resolver.resolve(name)?,
            None => self.files.resolve(name)?,
        };
        compile::compile(&mut self.env, name, source, &self.config.namespace)
    }

    /// Render `name` into a fresh buffer.  Nothing is returned on error.
    pub fn render(&mut self, name: &str, ctx: &mut E::Context) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.render_to(name, ctx, &mut out)?;
        Ok(out)
    }

    /// Render `name` into `out`.  Output written before an error stays
    /// written.
    pub fn render_to(
        &mut self,
        name: &str,
        ctx: &mut E::Context,
        out: &mut dyn Write,
    ) -> Result<(), Error> {
        render::render(self, name, ctx, out, 1)
    }

    /// Drop every cached template.
    pub fn clear_cache(&mut self) {
        log::debug!("clearing {} cached templates", self.cache.len());
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// The cached template for `name`, compiling it on a miss.
    pub(crate) fn template(&mut self, name: &str) -> Result<Rc<Template<E::Expr>>, Error> {
        if let Some(template) = self.cache.get(name.as_bytes()) {
            log::trace!("template cache hit: {name}");
            return Ok(Rc::clone(template));
        }
        log::trace!("template cache miss: {name}");
        let template = Rc::new(self.compile(name)?);
        self.cache
            .set(name.as_bytes().to_vec(), Some(Rc::clone(&template)))?;
        Ok(template)
    }
}

impl<E: Environment + std::fmt::Debug> std::fmt::Debug for Engine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("env", &self.env)
            .field("config", &self.config)
            .field("custom_resolver", &self.resolver.is_some())
            .field("cached", &self.cache.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolveError;
    use crate::script::{Context, ScriptEnv};
    use std::cell::Cell;

    /// Serves `"<name>:${n}"` for any name and counts resolutions.
    fn counting(calls: Rc<Cell<usize>>) -> Rc<dyn Resolver> {
        Rc::new(move |name: &str| -> Result<Vec<u8>, ResolveError> {
            calls.set(calls.get() + 1);
            Ok(format!("{name}:${{n}}").into_bytes())
        })
    }

    #[test]
    fn renders_are_cached_per_name() {
        let calls = Rc::new(Cell::new(0));
        let mut engine = Engine::new(ScriptEnv::new()).unwrap();
        engine.set_resolver(Some(counting(Rc::clone(&calls))));
        let mut ctx = Context::new();
        ctx.set("n", 1i64);

        assert_eq!(engine.render("a", &mut ctx).unwrap(), b"a:1");
        ctx.set("n", 2i64);
        assert_eq!(engine.render("a", &mut ctx).unwrap(), b"a:2");
        assert_eq!(engine.render("b", &mut ctx).unwrap(), b"b:2");
        assert_eq!(calls.get(), 2);
        assert_eq!(engine.cached_len(), 2);

        engine.clear_cache();
        assert_eq!(engine.cached_len(), 0);
        engine.render("a", &mut ctx).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn compile_bypasses_cache() {
        let calls = Rc::new(Cell::new(0));
        let mut engine = Engine::new(ScriptEnv::new()).unwrap();
        engine.set_resolver(Some(counting(Rc::clone(&calls))));
        let t = engine.compile("x").unwrap();
        assert_eq!(t.name(), "x");
        assert_eq!(t.source(), b"x:${n}");
        engine.compile("x").unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(engine.cached_len(), 0);
    }

    #[test]
    fn resolver_accessors() {
        let mut engine = Engine::new(ScriptEnv::new()).unwrap();
        assert!(engine.resolver().is_none());
        engine.set_resolver(Some(counting(Rc::new(Cell::new(0)))));
        assert!(engine.resolver().is_some());
        engine.set_resolver(None);
        assert!(engine.resolver().is_none());
    }

    #[test]
    fn file_resolver_uses_template_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "hi ${who}").unwrap();
        let config = Config {
            template_dir: Some(dir.path().to_owned()),
            ..Config::default()
        };
        let mut engine = Engine::with_config(ScriptEnv::new(), config).unwrap();
        let mut ctx = Context::new();
        ctx.set("who", "there");
        assert_eq!(engine.render("hello.html", &mut ctx).unwrap(), b"hi there");
        assert!(matches!(
            engine.render("absent.html", &mut ctx),
            Err(Error::Resolve(ResolveError::NotFound { .. }))
        ));
    }

    #[test]
    fn custom_namespace_and_depth() {
        let config = Config {
            namespace: "t".into(),
            max_depth: 2,
            ..Config::default()
        };
        let mut engine = Engine::with_config(ScriptEnv::new(), config).unwrap();
        engine.set_resolver(Some(Rc::new(
            |name: &str| -> Result<Vec<u8>, ResolveError> {
                Ok(match name {
                    "outer" => b"<t:include filename=\"'inner'\"/>".to_vec(),
                    "inner" => b"<t:include filename=\"'leaf'\"/>".to_vec(),
                    _ => b"leaf".to_vec(),
                })
            },
        )));
        let mut ctx = Context::new();
        assert_eq!(engine.render("inner", &mut ctx).unwrap(), b"leaf");
        assert!(matches!(
            engine.render("outer", &mut ctx),
            Err(Error::DepthExceeded(2))
        ));
    }

    #[test]
    fn parse_errors_are_not_cached() {
        let mut engine = Engine::new(ScriptEnv::new()).unwrap();
        engine.set_resolver(Some(Rc::new(
            |_: &str| -> Result<Vec<u8>, ResolveError> { Ok(b"<l:if cond=\"1\">".to_vec()) },
        )));
        let err = engine.render("broken", &mut Context::new()).unwrap_err();
        assert_eq!(err.to_string(), "broken:1: 1 open element(s) at end of template");
        assert_eq!(engine.cached_len(), 0);
    }
}
