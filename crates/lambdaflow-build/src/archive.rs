//! Deterministic zip archives
//!
//! Two builds of the same inputs produce identical bytes: entries are written
//! in path order, every timestamp is the zip epoch (1980-01-01) and file modes
//! are normalised. Text sources get LF line endings so a checkout on Windows
//! does not change the package.

use crate::error::{BuildError, Result};
use crate::launcher::Launcher;
use crate::sources::{SourceSet, archive_path};
use lambdaflow_cloud::PackageArtifact;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

const EXECUTABLE_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Extensions rewritten to LF line endings
const TEXT_EXTENSIONS: &[&str] = &[
    "py", "pyi", "sh", "txt", "md", "json", "toml", "cfg", "ini", "yaml", "yml", "kdl", "html",
    "css", "js", "env",
];

/// Warn when a package gets close to the 50 MB direct upload limit
const UPLOAD_WARN_SIZE: usize = 45 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    mode: u32,
}

/// Collects entries and writes them as one zip archive
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    name: String,
    entries: BTreeMap<String, Entry>,
}

impl ArchiveBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Add all files of a source set, normalising text files
    pub fn add_sources(&mut self, sources: &SourceSet) -> Result<&mut Self> {
        for (path, file) in sources.iter() {
            let bytes = fs::read(file)?;
            let bytes = if is_text(path, &bytes) {
                normalize_line_endings(bytes)
            } else {
                bytes
            };
            let mode = mode_for(path, &bytes, is_executable_on_disk(file));
            self.insert(path, bytes, mode);
        }
        Ok(self)
    }

    /// Add a directory tree below `prefix`, bytes untouched.
    /// Used for installed dependencies, which must stay byte-identical.
    pub fn add_tree(&mut self, prefix: &str, dir: &Path) -> Result<&mut Self> {
        if !dir.is_dir() {
            return Err(BuildError::SourceNotFound(dir.to_path_buf()));
        }
        self.add_tree_at(prefix, dir, dir)?;
        Ok(self)
    }

    fn add_tree_at(&mut self, prefix: &str, root: &Path, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.add_tree_at(prefix, root, &path)?;
                continue;
            }

            let relative = archive_path(root, &path)?;
            let name = if prefix.is_empty() {
                relative
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), relative)
            };
            // Compiled bytecode differs between runs
            if name.ends_with(".pyc") || name.contains("/__pycache__/") {
                continue;
            }

            let bytes = fs::read(&path)?;
            let mode = mode_for(&name, &bytes, is_executable_on_disk(&path));
            self.insert(&name, bytes, mode);
        }
        Ok(())
    }

    /// Add in-memory content such as a generated launcher
    pub fn add_bytes(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> &mut Self {
        let bytes = bytes.into();
        let mode = mode_for(path, &bytes, false);
        self.insert(path, bytes, mode);
        self
    }

    /// Render the launcher script as `run.sh`
    pub fn add_launcher(&mut self, launcher: &Launcher) -> Result<&mut Self> {
        let script = launcher.render()?;
        Ok(self.add_bytes(Launcher::FILE_NAME, script))
    }

    fn insert(&mut self, path: &str, bytes: Vec<u8>, mode: u32) {
        if self
            .entries
            .insert(path.to_string(), Entry { bytes, mode })
            .is_some()
        {
            tracing::debug!("{} replaced an earlier entry", path);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(&self) -> Result<PackageArtifact> {
        if self.entries.is_empty() {
            return Err(BuildError::InvalidConfig(format!(
                "{} has no entries",
                self.name
            )));
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (path, entry) in &self.entries {
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(DateTime::default())
                .unix_permissions(entry.mode);
            zip.start_file(path.as_str(), options)?;
            zip.write_all(&entry.bytes)?;
        }
        let bytes = zip.finish()?.into_inner();

        tracing::debug!(
            "Archive {} created: {} entries, {} bytes",
            self.name,
            self.entries.len(),
            bytes.len()
        );
        if bytes.len() > UPLOAD_WARN_SIZE {
            tracing::warn!(
                "{} is {}MB, close to the direct upload limit",
                self.name,
                bytes.len() / 1024 / 1024
            );
        }

        Ok(PackageArtifact::new(
            self.name.clone(),
            bytes,
            self.entries.keys().cloned().collect(),
        ))
    }

    /// Build and also write the archive to `dir`
    pub fn write_to(&self, dir: &Path) -> Result<PackageArtifact> {
        let artifact = self.build()?;
        fs::create_dir_all(dir)?;
        fs::write(dir.join(&artifact.name), &artifact.bytes)?;
        Ok(artifact)
    }
}

fn is_text(path: &str, bytes: &[u8]) -> bool {
    let known = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
    known && !bytes.contains(&0)
}

fn normalize_line_endings(bytes: Vec<u8>) -> Vec<u8> {
    if !bytes.windows(2).any(|w| w == b"\r\n") {
        return bytes;
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Scripts and binaries are executable, everything else read-only
fn mode_for(path: &str, bytes: &[u8], executable_on_disk: bool) -> u32 {
    let script = path.ends_with(".sh") || bytes.starts_with(b"#!");
    let binary = bytes.starts_with(b"\x7fELF");
    if script || binary || executable_on_disk {
        EXECUTABLE_MODE
    } else {
        FILE_MODE
    }
}

#[cfg(unix)]
fn is_executable_on_disk(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_on_disk(_path: &Path) -> bool {
    false
}
