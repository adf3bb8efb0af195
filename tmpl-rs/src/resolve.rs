//! Template source resolution.
//!
//! A [`Resolver`] turns a template name into its source bytes.  Without a
//! custom resolver the engine reads files through [`FileResolver`].

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{name}: template not found")]
    NotFound { name: String },

    #[error("{name}: error reading template: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failure reported by a custom resolver.
    #[error("{name}: error resolving template: {message}")]
    Custom { name: String, message: String },
}

/// Name → source hook.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Result<Vec<u8>, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Result<Vec<u8>, ResolveError>,
{
    fn resolve(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        self(name)
    }
}

/// Reads whole files, optionally relative to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    root: Option<PathBuf>,
}

impl FileResolver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn path(&self, name: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Resolver for FileResolver {
    fn resolve(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        std::fs::read(self.path(name)).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResolveError::NotFound {
                name: name.to_owned(),
            },
            _ => ResolveError::Read {
                name: name.to_owned(),
                source,
            },
        })
    }
}
