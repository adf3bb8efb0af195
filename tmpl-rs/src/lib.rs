//! `tmpl`: an XML-flavoured template compiler and interpreter.
//!
//! Templates are text with embedded control elements and substitutions:
//!
//! ```text
//! <ul>
//! <l:for in="ipairs(items)" names="i, item">
//!   <li class="${i % 2 == 0 ? 'even' : 'odd'}">$[x]{item.title}</li>
//! </l:for>
//! </ul>
//! <l:if cond="len(items) == 0">nothing here<l:else><l:include filename="'footer.html'"/></l:if>
//! ```
//!
//! Sources are compiled once into a flat node sequence, cached by name in an
//! [`Engine`], and executed against a context of named values.  Expressions
//! are opaque to the engine: an [`Environment`] compiles and evaluates them.
//! The crate ships a built-in expression language ([`script::ScriptEnv`]) and,
//! with the `lua` feature, a Lua 5.4 backend.
//!
//! ```rust
//! use std::rc::Rc;
//! use tmpl::script::{Context, ScriptEnv};
//! use tmpl::{Engine, ResolveError};
//!
//! let mut engine = Engine::new(ScriptEnv::new())?;
//! engine.set_resolver(Some(Rc::new(|_: &str| -> Result<Vec<u8>, ResolveError> {
//!     Ok(b"Hello, ${name}! $[u]{query}".to_vec())
//! })));
//!
//! let mut ctx = Context::new();
//! ctx.set("name", "<world>");
//! ctx.set("query", "a b");
//! assert_eq!(engine.render("greeting", &mut ctx)?, b"Hello, &lt;world&gt;! a%20b");
//! # Ok::<(), tmpl::Error>(())
//! ```
//!
//! | Module       | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | [`table`]    | open-addressing hash table with Brent's insertion      |
//! | [`compile`]  | source → [`Template`]                                  |
//! | [`engine`]   | cache, resolver, render entry points                   |
//! | [`escape`]   | XML, URL and script-string encoders                    |
//! | [`script`]   | built-in expression language                           |
//! | [`config`]   | `key = value` configuration files                      |

pub mod compile;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod escape;
#[cfg(feature = "lua")]
pub mod lua;
mod render;
pub mod resolve;
pub mod script;
pub mod table;
pub mod template;

pub use config::{Config, ConfigError};
pub use engine::Engine;
pub use env::{Environment, Repr};
pub use error::{Error, ParseError};
#[cfg(feature = "lua")]
pub use lua::LuaEnv;
pub use resolve::{FileResolver, ResolveError, Resolver};
pub use table::{Table, TableError};
pub use template::{Escape, Node, SubFlags, Template};
