//! Engine configuration.
//!
//! A configuration file is a list of `key = value` lines:
//!
//! | Key            | Meaning                                   | Default |
//! |----------------|-------------------------------------------|---------|
//! | `namespace`    | element prefix, as in `<l:if …>`          | `l`     |
//! | `max_depth`    | maximum template inclusion depth          | `8`     |
//! | `template_dir` | directory template names are relative to  | (none)  |
//!
//! Blank lines and lines starting with `#` or `;` are ignored.  The
//! `TMPL_DIR` environment variable overrides `template_dir` (see
//! [`Config::with_env`]).

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable naming the template directory.
pub const TEMPLATE_DIR_VAR: &str = "TMPL_DIR";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Element namespace prefix, without the colon.
    pub namespace: String,
    /// Top-level render is depth 1; each include adds one.
    pub max_depth: usize,
    pub template_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "l".to_owned(),
            max_depth: 8,
            template_dir: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Bad lines are reported and skipped; the rest of the file still applies.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError {
                    line: lineno,
                    message: format!("expected `key = value`, got `{line}`"),
                });
                continue;
            };

            if let Err(message) = config.apply(key.trim(), value.trim()) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply `TMPL_DIR`, if set and non-empty.
    pub fn with_env(mut self) -> Self {
        if let Some(dir) = std::env::var_os(TEMPLATE_DIR_VAR).filter(|d| !d.is_empty()) {
            self.template_dir = Some(PathBuf::from(dir));
        }
        self
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "namespace" => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(format!("invalid namespace `{value}`"));
                }
                self.namespace = value.to_owned();
            }
            "max_depth" => {
                self.max_depth = match value.parse::<usize>() {
                    Ok(n) if n >= 1 => n,
                    _ => return Err(format!("invalid max_depth `{value}`")),
                };
            }
            "template_dir" => {
                self.template_dir = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            _ => return Err(format!("unknown key `{key}`")),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.namespace, "l");
        assert_eq!(c.max_depth, 8);
        assert!(c.template_dir.is_none());
    }

    #[test]
    fn parses_all_keys() {
        let (c, errors) = Config::load_str(
            "# engine settings\n\
             namespace = tpl\n\
             ; deeper includes for the docs site\n\
             max_depth=12\n\
             \n\
             template_dir = /srv/templates\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(c.namespace, "tpl");
        assert_eq!(c.max_depth, 12);
        assert_eq!(c.template_dir, Some(PathBuf::from("/srv/templates")));
    }

    #[test]
    fn bad_lines_report_line_numbers() {
        let (c, errors) = Config::load_str("max_depth = 0\nbogus\ncolour = red\nnamespace = a:b\n");
        assert_eq!(c, Config::default());
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
        assert_eq!(errors[2].to_string(), "line 3: unknown key `colour`");
        let err: &dyn std::error::Error = &errors[0];
        assert_eq!(err.to_string(), "line 1: invalid max_depth `0`");
    }

    #[test]
    fn empty_template_dir_clears() {
        let (c, errors) = Config::load_str("template_dir = /x\ntemplate_dir =\n");
        assert!(errors.is_empty());
        assert!(c.template_dir.is_none());
    }

    #[test]
    fn load_file_reads_disk() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "max_depth = 3").unwrap();
        let (c, errors) = Config::load_file(f.path()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(c.max_depth, 3);
    }

    #[test]
    fn load_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_file(&dir.path().join("absent.conf")).is_err());
    }
}
