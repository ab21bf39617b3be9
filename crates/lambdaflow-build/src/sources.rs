//! Source file collection

use crate::error::{BuildError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Files selected for a package, keyed by their path inside the archive
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    files: BTreeMap<String, PathBuf>,
}

impl SourceSet {
    /// Resolve glob patterns relative to `root`.
    ///
    /// A matched directory contributes every file below it. Each pattern has
    /// to match at least one file, so a typo fails the build instead of
    /// silently shipping an incomplete function.
    pub fn collect(root: &Path, patterns: &[String]) -> Result<Self> {
        if !root.is_dir() {
            return Err(BuildError::SourceNotFound(root.to_path_buf()));
        }
        if patterns.is_empty() {
            return Err(BuildError::InvalidConfig(
                "no source patterns given".to_string(),
            ));
        }

        let mut set = SourceSet::default();
        for pattern in patterns {
            let before = set.len();
            let full = root.join(pattern);
            let full = full.to_string_lossy();

            let paths = glob::glob(&full).map_err(|e| BuildError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            for entry in paths {
                let path = entry.map_err(|e| BuildError::Io(e.into_error()))?;
                set.add_path(root, &path)?;
            }

            if set.len() == before && !set.matches_existing(root, pattern) {
                return Err(BuildError::NoMatch(pattern.clone()));
            }
            tracing::debug!("{} matched {} files", pattern, set.len() - before);
        }

        Ok(set)
    }

    fn add_path(&mut self, root: &Path, path: &Path) -> Result<()> {
        if path.is_dir() {
            let mut children = fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            children.sort();
            for child in children {
                self.add_path(root, &child)?;
            }
            return Ok(());
        }

        let archive_path = archive_path(root, path)?;
        self.files.insert(archive_path, path.to_path_buf());
        Ok(())
    }

    // Overlapping patterns may match files that an earlier pattern already added
    fn matches_existing(&self, root: &Path, pattern: &str) -> bool {
        let Ok(matcher) = glob::Pattern::new(&root.join(pattern).to_string_lossy()) else {
            return false;
        };
        self.files.values().any(|path| matcher.matches_path(path))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// `(archive path, file on disk)` in archive order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn contains(&self, archive_path: &str) -> bool {
        self.files.contains_key(archive_path)
    }
}

/// Relative path with `/` separators
pub(crate) fn archive_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        BuildError::InvalidConfig(format!(
            "{} is outside of {}",
            path.display(),
            root.display()
        ))
    })?;

    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    Ok(parts.join("/"))
}
