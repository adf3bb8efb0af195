//! Template compiler.
//!
//! A single pass over the source bytes.  Everything is literal text except
//!
//! - elements in the template namespace: `<l:NAME attr="…">`, `<l:NAME …/>`,
//!   `</l:NAME>`
//! - substitutions: `${expr}` and `$[flags]{expr}`
//! - `$$`, which stands for a single `$`
//!
//! Conditionals and loops are emitted as jumps whose targets are not yet
//! known; a stack of open blocks remembers which nodes to patch once the
//! closing element is reached.
//!
//! | Element     | Attributes              | Emits                               |
//! |-------------|-------------------------|-------------------------------------|
//! | `if`        | `cond`                  | `If`                                |
//! | `elseif`    | `cond`                  | `Jump`, `If`                        |
//! | `else`      |                         | `Jump`                              |
//! | `for`       | `in`, `names`           | `ForInit`, `ForNext` … `Jump`       |
//! | `set`       | `names`, `expressions`  | `Set`                               |
//! | `include`   | `filename`              | `Include`                           |

use std::borrow::Cow;

use crate::env::Environment;
use crate::error::{Error, ParseError};
use crate::table::Table;
use crate::template::{Escape, Node, SubFlags, Template, UNRESOLVED};

/// Parse-time record of an open element.
#[derive(Debug, Clone, Copy)]
enum Block {
    If {
        /// Index of the first `If` node of the chain.
        first: usize,
        /// Index of the trailing `If` node; `None` once `else` was seen.
        last: Option<usize>,
        /// Number of `elseif`/`else` elements, i.e. of interposed jumps.
        alternates: usize,
    },
    For {
        /// Index of the `ForNext` node.
        next: usize,
    },
}

const ENTITIES: [(&[u8], u8); 4] = [
    (b"&quot;", b'"'),
    (b"&lt;", b'<'),
    (b"&gt;", b'>'),
    (b"&amp;", b'&'),
];

/// Replace the XML entities `&quot; &lt; &gt; &amp;`.  Anything else,
/// including unknown entities, is kept verbatim.
pub fn unescape_xml(s: &[u8]) -> Cow<'_, [u8]> {
    if !s.contains(&b'&') {
        return Cow::Borrowed(s);
    }
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match ENTITIES.iter().find(|(e, _)| s[i..].starts_with(e)) {
            Some((e, c)) => {
                out.push(*c);
                i += e.len();
            }
            None => {
                out.push(s[i]);
                i += 1;
            }
        }
    }
    Cow::Owned(out)
}

/// Compile `source` into a template named `name`.
///
/// `namespace` is the element prefix without its colon (`"l"` for `<l:if>`).
pub fn compile<E: Environment>(
    env: &mut E,
    name: &str,
    source: Vec<u8>,
    namespace: &str,
) -> Result<Template<E::Expr>, Error> {
    let nodes = Parser::new(env, name, &source, namespace)?.parse()?;
    log::debug!("compiled template {name}: {} nodes", nodes.len());
    Ok(Template::new(
        name.to_owned(),
        source.into_boxed_slice(),
        nodes,
    ))
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser<'a, E: Environment> {
    env: &'a mut E,
    filename: &'a str,
    src: &'a [u8],
    /// `NS:`
    marker: Vec<u8>,
    /// Start of the pending raw run.
    begin: usize,
    pos: usize,
    attrs: Table<'a, Cow<'a, [u8]>>,
    nodes: Vec<Node<E::Expr>>,
    blocks: Vec<Block>,
}

impl<'a, E: Environment> Parser<'a, E> {
    fn new(
        env: &'a mut E,
        filename: &'a str,
        src: &'a [u8],
        namespace: &str,
    ) -> Result<Self, Error> {
        let mut marker = namespace.as_bytes().to_vec();
        marker.push(b':');
        Ok(Self {
            env,
            filename,
            src,
            marker,
            begin: 0,
            pos: 0,
            attrs: Table::new(4)?,
            nodes: Vec::with_capacity(32),
            blocks: Vec::with_capacity(8),
        })
    }

    fn parse(mut self) -> Result<Vec<Node<E::Expr>>, Error> {
        while self.pos < self.src.len() {
            match self.src[self.pos] {
                b'<' if self.at_element() => {
                    self.flush_raw()?;
                    self.parse_element()?;
                    self.begin = self.pos;
                }
                b'$' => match self.peek(1) {
                    Some(b'{' | b'[') => {
                        self.flush_raw()?;
                        self.parse_sub()?;
                        self.begin = self.pos;
                    }
                    Some(b'$') => {
                        self.pos += 1;
                        self.flush_raw()?;
                        self.pos += 1;
                        self.begin = self.pos;
                    }
                    _ => self.pos += 1,
                },
                _ => self.pos += 1,
            }
        }
        self.flush_raw()?;
        if !self.blocks.is_empty() {
            return Err(self.error(format!(
                "{} open element(s) at end of template",
                self.blocks.len()
            )));
        }
        Ok(self.nodes)
    }

    // ── Scanning helpers ──────────────────────────────────────────────────────

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(0), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// `<NS:` or `</NS:` at the current position.
    fn at_element(&self) -> bool {
        let rest = &self.src[self.pos + 1..];
        rest.starts_with(&self.marker)
            || (rest.first() == Some(&b'/') && rest[1..].starts_with(&self.marker))
    }

    /// 1-based line of the current position; `\n`, `\r` and `\r\n` each end
    /// one line.
    fn line(&self) -> usize {
        let consumed = &self.src[..self.pos.min(self.src.len())];
        let mut line = 1;
        let mut i = 0;
        while i < consumed.len() {
            match consumed[i] {
                b'\n' => line += 1,
                b'\r' => {
                    line += 1;
                    if consumed.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        line
    }

    fn error(&self, message: impl Into<String>) -> Error {
        ParseError {
            filename: self.filename.to_owned(),
            line: self.line(),
            message: message.into(),
        }
        .into()
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    fn push(&mut self, node: Node<E::Expr>) -> Result<usize, Error> {
        self.nodes.try_reserve(1).map_err(|_| Error::Allocation)?;
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    /// Point the jump of node `at` to `to`.
    fn patch(&mut self, at: usize, to: usize) {
        match &mut self.nodes[at] {
            Node::Jump { target } => *target = to,
            Node::If { false_target, .. } => *false_target = to,
            Node::ForNext { end_target, .. } => *end_target = to,
            _ => debug_assert!(false, "node {at} has no jump target"),
        }
    }

    fn flush_raw(&mut self) -> Result<(), Error> {
        if self.pos > self.begin {
            self.push(Node::Raw(self.begin..self.pos))?;
        }
        Ok(())
    }

    fn expression(&mut self, text: &[u8]) -> Result<E::Expr, Error> {
        match self.env.compile(text) {
            Ok(expr) => Ok(expr),
            Err(message) => Err(self.error(message)),
        }
    }

    fn required(&self, name: &str) -> Result<Cow<'a, [u8]>, Error> {
        self.attrs
            .get(name.as_bytes())
            .cloned()
            .ok_or_else(|| self.error(format!("missing attribute '{name}'")))
    }

    fn names(&self, list: &[u8]) -> Result<Vec<String>, Error> {
        let names: Vec<String> = list
            .split(|&b| matches!(b, b' ' | b'\t' | b','))
            .filter(|n| !n.is_empty())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .collect();
        if names.is_empty() {
            return Err(self.error("empty 'names'"));
        }
        Ok(names)
    }

    // ── Elements ──────────────────────────────────────────────────────────────

    fn parse_element(&mut self) -> Result<(), Error> {
        let src = self.src;
        self.pos += 1;
        let (open, mut close) = if self.peek(0) == Some(b'/') {
            self.pos += 1;
            (false, true)
        } else {
            (true, false)
        };
        self.pos += self.marker.len();

        let name_start = self.pos;
        while matches!(self.peek(0), Some(b) if !b.is_ascii_whitespace() && b != b'>' && b != b'/')
        {
            self.pos += 1;
        }
        let name = &src[name_start..self.pos];
        self.skip_ws();

        self.attrs.clear();
        while matches!(self.peek(0), Some(b) if b != b'>' && b != b'/') {
            let key_start = self.pos;
            while matches!(self.peek(0), Some(b) if !b.is_ascii_whitespace() && b != b'=') {
                self.pos += 1;
            }
            if self.pos == key_start {
                return Err(self.error("attribute name expected"));
            }
            let key = &src[key_start..self.pos];
            self.skip_ws();
            if self.peek(0) != Some(b'=') {
                return Err(self.error("'=' expected"));
            }
            self.pos += 1;
            self.skip_ws();
            if self.peek(0) != Some(b'"') {
                return Err(self.error("'\"' expected"));
            }
            self.pos += 1;
            let value_start = self.pos;
            while matches!(self.peek(0), Some(b) if b != b'"') {
                self.pos += 1;
            }
            if self.peek(0) != Some(b'"') {
                return Err(self.error("'\"' expected"));
            }
            let value = &src[value_start..self.pos];
            self.pos += 1;
            self.attrs.set(unescape_xml(key), Some(unescape_xml(value)))?;
            self.skip_ws();
        }
        if self.peek(0) == Some(b'/') {
            close = true;
            self.pos += 1;
        }
        if self.peek(0) != Some(b'>') {
            return Err(self.error("'>' expected"));
        }
        self.pos += 1;

        match name {
            b"if" => self.parse_if(open, close),
            b"elseif" if open => self.parse_elseif(),
            b"else" if open => self.parse_else(),
            b"for" => self.parse_for(open, close),
            b"set" if open => self.parse_set(),
            b"include" if open => self.parse_include(),
            b"elseif" | b"else" | b"set" | b"include" => Ok(()),
            _ => Err(self.error("bad element")),
        }
    }

    fn parse_if(&mut self, open: bool, close: bool) -> Result<(), Error> {
        if open {
            let cond = self.required("cond")?;
            let expr = self.expression(&cond)?;
            let at = self.nodes.len();
            self.blocks.push(Block::If {
                first: at,
                last: Some(at),
                alternates: 0,
            });
            self.push(Node::If {
                expr,
                false_target: UNRESOLVED,
            })?;
        }
        if close {
            let Some(Block::If {
                first,
                last,
                alternates,
            }) = self.blocks.pop()
            else {
                return Err(self.error("no 'if' to close"));
            };
            let here = self.nodes.len();
            if let Some(last) = last {
                self.patch(last, here);
            }
            // Each alternate is preceded by a jump; every branch ends there.
            let mut at = first;
            for _ in 0..alternates {
                let next = match &self.nodes[at] {
                    Node::If { false_target, .. } => *false_target,
                    _ => break,
                };
                self.patch(next - 1, here);
                at = next;
            }
        }
        Ok(())
    }

    /// Index of the trailing `If` of the innermost open if-chain.
    fn continuable_if(&self) -> Result<usize, Error> {
        match self.blocks.last() {
            Some(Block::If {
                last: Some(last), ..
            }) => Ok(*last),
            _ => Err(self.error("no 'if' to continue")),
        }
    }

    /// Emit the jump that ends the previous branch and redirect the previous
    /// condition to the node that follows it.
    fn begin_alternate(&mut self, last: usize, terminal: bool) -> Result<usize, Error> {
        self.push(Node::Jump { target: UNRESOLVED })?;
        let here = self.nodes.len();
        self.patch(last, here);
        if let Some(Block::If {
            last, alternates, ..
        }) = self.blocks.last_mut()
        {
            *alternates += 1;
            *last = (!terminal).then_some(here);
        }
        Ok(here)
    }

    fn parse_elseif(&mut self) -> Result<(), Error> {
        let last = self.continuable_if()?;
        let cond = self.required("cond")?;
        let expr = self.expression(&cond)?;
        self.begin_alternate(last, false)?;
        self.push(Node::If {
            expr,
            false_target: UNRESOLVED,
        })?;
        Ok(())
    }

    fn parse_else(&mut self) -> Result<(), Error> {
        let last = self.continuable_if()?;
        self.begin_alternate(last, true)?;
        Ok(())
    }

    fn parse_for(&mut self, open: bool, close: bool) -> Result<(), Error> {
        if open {
            let subject = self.required("in")?;
            let expr = self.expression(&subject)?;
            self.push(Node::ForInit { expr })?;
            let names = self.required("names")?;
            let names = self.names(&names)?;
            let next = self.push(Node::ForNext {
                names,
                end_target: UNRESOLVED,
            })?;
            self.blocks.push(Block::For { next });
        }
        if close {
            let Some(Block::For { next }) = self.blocks.pop() else {
                return Err(self.error("no 'for' to close"));
            };
            self.push(Node::Jump { target: next })?;
            let here = self.nodes.len();
            self.patch(next, here);
        }
        Ok(())
    }

    fn parse_set(&mut self) -> Result<(), Error> {
        let names = self.required("names")?;
        let names = self.names(&names)?;
        let expressions = self.required("expressions")?;
        let expr = self.expression(&expressions)?;
        self.push(Node::Set { names, expr })?;
        Ok(())
    }

    fn parse_include(&mut self) -> Result<(), Error> {
        let filename = self.required("filename")?;
        let filename = self.expression(&filename)?;
        self.push(Node::Include { filename })?;
        Ok(())
    }

    // ── Substitutions ─────────────────────────────────────────────────────────

    fn parse_flags(&self, flags: &[u8]) -> Result<SubFlags, Error> {
        let mut escape = None;
        let mut suppress_nil = false;
        for &f in flags {
            let chosen = match f {
                b'x' => Escape::Xml,
                b'u' => Escape::Url,
                b'j' => Escape::Js,
                b'n' => {
                    suppress_nil = true;
                    continue;
                }
                _ => return Err(self.error("bad flags: unknown character")),
            };
            if escape.replace(chosen).is_some() {
                return Err(self.error("bad flags: multiple escapes"));
            }
        }
        Ok(SubFlags {
            escape: escape.unwrap_or_default(),
            suppress_nil,
        })
    }

    fn parse_sub(&mut self) -> Result<(), Error> {
        let src = self.src;
        self.pos += 1;

        let mut flags = SubFlags::default();
        if self.peek(0) == Some(b'[') {
            self.pos += 1;
            let start = self.pos;
            while matches!(self.peek(0), Some(b) if b != b']') {
                self.pos += 1;
            }
            if self.peek(0) != Some(b']') {
                return Err(self.error("']' expected"));
            }
            flags = self.parse_flags(&src[start..self.pos])?;
            self.pos += 1;
        }

        if self.peek(0) != Some(b'{') {
            return Err(self.error("'{' expected"));
        }
        self.pos += 1;
        let start = self.pos;
        let mut braces = 1;
        let mut quote: Option<u8> = None;
        while braces > 0 {
            let Some(b) = self.peek(0) else { break };
            match (b, quote) {
                (b'{', None) => braces += 1,
                (b'}', None) => braces -= 1,
                (b'"' | b'\'', None) => quote = Some(b),
                (b, Some(q)) if b == q => quote = None,
                (b'\\', Some(q)) if self.peek(1) == Some(q) => self.pos += 1,
                _ => {}
            }
            self.pos += 1;
        }
        if braces > 0 {
            return Err(self.error("'}' expected"));
        }

        let text = unescape_xml(&src[start..self.pos - 1]);
        let expr = self.expression(&text)?;
        self.push(Node::Sub { expr, flags })?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
