//! `${KEY}` / `${KEY:-default}` expansion of manifest strings

use crate::environment::DeploymentEnvironment;
use crate::error::{ConfigError, Result};
use regex::{Captures, Regex};

/// Expand variables with a lookup function
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{(?P<key>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<default>[^}]*))?\}")
        .map_err(|e| ConfigError::InvalidManifest(format!("variable pattern: {}", e)))?;

    let mut missing: Option<String> = None;
    let expanded = re.replace_all(input, |caps: &Captures| {
        let key = &caps["key"];
        match (lookup(key), caps.name("default")) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(ConfigError::UnresolvedVariable { key }),
        None => Ok(expanded.into_owned()),
    }
}

/// Expand from the environment file, then the process environment.
/// Empty values count as unset so `${KEY:-default}` falls back.
pub fn expand(input: &str, env: &DeploymentEnvironment) -> Result<String> {
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    expand_with(input, |key| {
        env.get(key)
            .map(str::to_string)
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    })
}
