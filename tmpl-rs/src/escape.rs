//! Output encoders for substitutions.

use std::io::{self, Write};

use crate::template::Escape;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Write `s` to `out` through the selected encoder.
pub fn write_escaped(out: &mut dyn Write, s: &[u8], escape: Escape) -> io::Result<()> {
    match escape {
        Escape::Xml => write_with(out, s, xml),
        Escape::Url => write_url(out, s),
        Escape::Js => write_with(out, s, js),
    }
}

fn xml(b: u8) -> Option<&'static [u8]> {
    match b {
        b'&' => Some(b"&amp;"),
        b'<' => Some(b"&lt;"),
        b'>' => Some(b"&gt;"),
        _ => None,
    }
}

fn js(b: u8) -> Option<&'static [u8]> {
    match b {
        0x08 => Some(b"\\b"),
        b'\t' => Some(b"\\t"),
        b'\n' => Some(b"\\n"),
        0x0b => Some(b"\\v"),
        0x0c => Some(b"\\f"),
        b'\r' => Some(b"\\r"),
        b'"' => Some(b"\\\""),
        b'\'' => Some(b"\\'"),
        b'\\' => Some(b"\\\\"),
        _ => None,
    }
}

/// Copy unescaped runs in one write each, substituting single bytes.
fn write_with(
    out: &mut dyn Write,
    s: &[u8],
    subst: fn(u8) -> Option<&'static [u8]>,
) -> io::Result<()> {
    let mut start = 0;
    for (i, &b) in s.iter().enumerate() {
        if let Some(rep) = subst(b) {
            out.write_all(&s[start..i])?;
            out.write_all(rep)?;
            start = i + 1;
        }
    }
    out.write_all(&s[start..])
}

fn write_url(out: &mut dyn Write, s: &[u8]) -> io::Result<()> {
    let mut start = 0;
    for (i, &b) in s.iter().enumerate() {
        if !(b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')) {
            out.write_all(&s[start..i])?;
            out.write_all(&[
                b'%',
                HEX_DIGITS[usize::from(b >> 4)],
                HEX_DIGITS[usize::from(b & 0x0f)],
            ])?;
            start = i + 1;
        }
    }
    out.write_all(&s[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(s: &str, e: Escape) -> String {
        let mut out = Vec::new();
        write_escaped(&mut out, s.as_bytes(), e).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn xml_escapes_markup() {
        assert_eq!(enc("a < b && c > d", Escape::Xml), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(enc("\"quoted\" 'single'", Escape::Xml), "\"quoted\" 'single'");
        assert_eq!(enc("", Escape::Xml), "");
    }

    #[test]
    fn url_percent_encodes() {
        assert_eq!(enc("a b", Escape::Url), "a%20b");
        assert_eq!(enc("Az09-._~", Escape::Url), "Az09-._~");
        assert_eq!(enc("q=1&r=/x", Escape::Url), "q%3D1%26r%3D%2Fx");
        assert_eq!(enc("é", Escape::Url), "%C3%A9");
    }

    #[test]
    fn js_backslash_escapes() {
        assert_eq!(enc("say \"hi\"", Escape::Js), "say \\\"hi\\\"");
        assert_eq!(enc("it's", Escape::Js), "it\\'s");
        assert_eq!(enc("a\\b", Escape::Js), "a\\\\b");
        assert_eq!(
            enc("\u{8}\t\n\u{b}\u{c}\r", Escape::Js),
            "\\b\\t\\n\\v\\f\\r"
        );
        assert_eq!(enc("<tag>", Escape::Js), "<tag>");
    }
}
