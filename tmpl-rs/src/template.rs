//! Compiled template representation.
//!
//! A template compiles to a flat, index-addressed node sequence.  Control
//! flow is expressed with jump targets that are plain indices into that
//! sequence, so forward references survive the sequence growing while it is
//! being emitted.

use std::cell::Cell;
use std::ops::Range;

/// Placeholder for a jump target that has not been patched yet.  Never
/// present in a finished [`Template`].
pub const UNRESOLVED: usize = usize::MAX;

// ── Substitution flags ────────────────────────────────────────────────────────

/// Output encoder applied to a substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    /// `x`: escape `&`, `<` and `>`.
    #[default]
    Xml,
    /// `u`: percent-encode everything but unreserved URL characters.
    Url,
    /// `j`: backslash-escape for a JavaScript string literal.
    Js,
}

/// Flags of a `$[…]{…}` substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubFlags {
    pub escape: Escape,
    /// `n`: render nil as nothing instead of `(nil)`.
    pub suppress_nil: bool,
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// One instruction of a compiled template.
#[derive(Debug)]
pub enum Node<X> {
    None,
    Jump {
        target: usize,
    },
    If {
        expr: X,
        /// Where to continue when the condition is false.
        false_target: usize,
    },
    /// Evaluates to `(iterator, subject, control)`.
    ForInit {
        expr: X,
    },
    ForNext {
        names: Vec<String>,
        /// Where to continue when the iterator is exhausted.
        end_target: usize,
    },
    Set {
        names: Vec<String>,
        expr: X,
    },
    Include {
        filename: X,
    },
    Sub {
        expr: X,
        flags: SubFlags,
    },
    /// A run of literal source bytes.
    Raw(Range<usize>),
}

impl<X> Node<X> {
    /// The expression carried by this node, if any.
    pub fn expr(&self) -> Option<&X> {
        match self {
            Node::If { expr, .. }
            | Node::ForInit { expr }
            | Node::Set { expr, .. }
            | Node::Sub { expr, .. } => Some(expr),
            Node::Include { filename } => Some(filename),
            Node::None | Node::Jump { .. } | Node::ForNext { .. } | Node::Raw(_) => None,
        }
    }

    fn target(&self) -> Option<usize> {
        match self {
            Node::Jump { target } => Some(*target),
            Node::If { false_target, .. } => Some(*false_target),
            Node::ForNext { end_target, .. } => Some(*end_target),
            _ => None,
        }
    }
}

// ── Template ──────────────────────────────────────────────────────────────────

/// A compiled template: the source buffer and the nodes that refer into it.
#[derive(Debug)]
pub struct Template<X> {
    name: String,
    source: Box<[u8]>,
    nodes: Vec<Node<X>>,
    /// Identity of the context the expressions were last bound to.
    bound: Cell<Option<usize>>,
}

impl<X> Template<X> {
    pub(crate) fn new(name: String, source: Box<[u8]>, nodes: Vec<Node<X>>) -> Self {
        let template = Self {
            name,
            source,
            nodes,
            bound: Cell::new(None),
        };
        debug_assert!(template.is_resolved(), "unpatched jump in {}", template.name);
        template
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn nodes(&self) -> &[Node<X>] {
        &self.nodes
    }

    /// Bytes of a [`Node::Raw`] range.
    pub fn raw(&self, range: &Range<usize>) -> &[u8] {
        &self.source[range.clone()]
    }

    /// `true` when every jump target points inside the node sequence (or just
    /// past its end).
    pub fn is_resolved(&self) -> bool {
        self.nodes
            .iter()
            .filter_map(Node::target)
            .all(|t| t != UNRESOLVED && t <= self.nodes.len())
    }

    pub(crate) fn bound_to(&self) -> Option<usize> {
        self.bound.get()
    }

    pub(crate) fn set_bound_to(&self, id: usize) {
        self.bound.set(Some(id));
    }
}
