//! Error types.

use std::io;

use thiserror::Error;

use crate::resolve::ResolveError;
use crate::table::TableError;

/// Malformed template source.  Displays as `filename:line: message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{filename}:{line}: {message}")]
pub struct ParseError {
    pub filename: String,
    pub line: usize,
    pub message: String,
}

/// Any failure while compiling or rendering a template.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// An embedded expression failed while being evaluated.
    #[error("{0}")]
    Expression(String),

    #[error("template depth exceeds {0}")]
    DepthExceeded(usize),

    #[error("error writing template: {0}")]
    Write(#[source] io::Error),

    #[error("out of memory")]
    Allocation,

    #[error(transparent)]
    Table(TableError),
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Allocation => Error::Allocation,
            other => Error::Table(other),
        }
    }
}
