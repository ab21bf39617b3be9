//! Deployment environment file
//!
//! A `.env` style file holding region, names and the identifiers a previous
//! deployment discovered (`LAYER_ARN`, `LAMBDA_URL`). It is read once at the
//! start of a run and written back once after the run succeeded. Writing only
//! touches the keys that changed: comments, blank lines, ordering and unrelated
//! entries stay as they were, new keys are appended.

use crate::error::{ConfigError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, raw: String },
    Other(String),
}

#[derive(Debug, Clone)]
pub struct DeploymentEnvironment {
    path: PathBuf,
    lines: Vec<Line>,
    values: BTreeMap<String, String>,
    changed: BTreeSet<String>,
}

impl DeploymentEnvironment {
    /// Read the file at `path`. A missing file is an empty environment and is
    /// created on the first [`persist`](Self::persist).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(env_file = %path.display(), "Environment file does not exist yet");
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path)?;
        let env = Self::parse(path, &content)?;
        info!(
            env_file = %env.path.display(),
            variable_count = env.values.len(),
            "Loaded environment file"
        );
        Ok(env)
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            values: BTreeMap::new(),
            changed: BTreeSet::new(),
        }
    }

    fn parse(path: PathBuf, content: &str) -> Result<Self> {
        let mut env = Self::empty(path);

        for (index, raw) in content.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                env.lines.push(Line::Other(raw.to_string()));
                continue;
            }

            let (key, value) = parse_entry(trimmed).ok_or_else(|| ConfigError::InvalidEnvLine {
                path: env.path.clone(),
                line: index + 1,
                content: raw.to_string(),
            })?;

            env.values.insert(key.clone(), value);
            env.lines.push(Line::Entry {
                key,
                raw: raw.to_string(),
            });
        }

        Ok(env)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get) but a missing or empty value is an error
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_string(),
                path: self.path.clone(),
            })
    }

    /// Set a value. Returns whether it changed.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if self.values.get(&key) == Some(&value) {
            return false;
        }

        debug!(key = %key, "Environment value changed");
        self.values.insert(key.clone(), value);
        self.changed.insert(key);
        true
    }

    /// Set several values. Returns how many changed.
    pub fn apply<I, K, V>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        updates
            .into_iter()
            .map(|(k, v)| self.set(k, v))
            .filter(|changed| *changed)
            .count()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_keys(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write changed keys back to the file. Returns whether anything was written.
    pub fn persist(&mut self) -> Result<bool> {
        if self.changed.is_empty() {
            return Ok(false);
        }

        let mut pending = self.changed.clone();
        for line in &mut self.lines {
            if let Line::Entry { key, raw } = line {
                if !pending.contains(key.as_str()) {
                    continue;
                }
                if let Some(value) = self.values.get(key.as_str()) {
                    *raw = rewrite_entry(raw, key, value);
                }
            }
        }
        // Keys already in the file were rewritten above
        for line in &self.lines {
            if let Line::Entry { key, .. } = line {
                pending.remove(key.as_str());
            }
        }
        for key in pending {
            if let Some(value) = self.values.get(&key) {
                let raw = format!("{}={}", key, quote(value));
                self.lines.push(Line::Entry { key, raw });
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, self.render())?;

        info!(
            env_file = %self.path.display(),
            keys = ?self.changed,
            "Environment file updated"
        );
        self.changed.clear();
        Ok(true)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { raw, .. } | Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

/// `KEY=value`, `export KEY="value"`, `KEY='value'`, `KEY=value # comment`
fn parse_entry(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    Some((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    let quoted = |q: char| value.len() >= 2 && value.starts_with(q) && value.ends_with(q);
    if quoted('"') {
        value[1..value.len() - 1].replace("\\\"", "\"")
    } else if quoted('\'') {
        value[1..value.len() - 1].to_string()
    } else {
        match value.find(" #") {
            Some(end) => value[..end].trim_end().to_string(),
            None => value.to_string(),
        }
    }
}

fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\'));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    }
}

/// Replace the value of an entry, keeping indentation, `export` and a
/// trailing `# comment`
fn rewrite_entry(raw: &str, key: &str, value: &str) -> String {
    let indent = &raw[..raw.len() - raw.trim_start().len()];
    let export = if raw.trim_start().starts_with("export ") {
        "export "
    } else {
        ""
    };
    match trailing_comment(raw) {
        Some(comment) => format!("{}{}{}={} {}", indent, export, key, quote(value), comment),
        None => format!("{}{}{}={}", indent, export, key, quote(value)),
    }
}

/// The `# ...` part after a value; a `#` inside quotes is part of the value
fn trailing_comment(raw: &str) -> Option<&str> {
    let (_, value) = raw.split_once('=')?;
    let value = value.trim_start();
    let rest = match value.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let close = value[1..].find(q)? + 1;
            &value[close + 1..]
        }
        _ => value,
    };
    if rest.starts_with('#') {
        return Some(rest);
    }
    rest.find(" #").map(|start| rest[start..].trim_start())
}
