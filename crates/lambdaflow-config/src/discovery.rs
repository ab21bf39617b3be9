//! Manifest and environment file discovery

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MANIFEST_ENV: &str = "LAMBDAFLOW_MANIFEST";
pub const ENV_FILE_ENV: &str = "LAMBDAFLOW_ENV_FILE";

/// Candidate manifest names, in priority order
const CANDIDATES: &[&str] = &["lambdaflow.local.kdl", "lambdaflow.kdl"];
const MANIFEST_DIR: &str = ".lambdaflow";

/// Find the manifest
///
/// Search order:
/// 1. `LAMBDAFLOW_MANIFEST` (must exist when set)
/// 2. `lambdaflow.local.kdl`, `lambdaflow.kdl` in the current directory
/// 3. `.lambdaflow/lambdaflow.kdl`
pub fn find_manifest() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(MANIFEST_ENV) {
        let path = expand_home(&path);
        debug!(manifest = %path.display(), "Using {}", MANIFEST_ENV);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::ManifestMissing(path));
    }

    find_manifest_in(&std::env::current_dir()?)
}

/// Find the manifest below `dir`, ignoring the environment
pub fn find_manifest_in(dir: &Path) -> Result<PathBuf> {
    for name in CANDIDATES {
        let path = dir.join(name);
        if path.is_file() {
            debug!(manifest = %path.display(), "Found manifest");
            return Ok(path);
        }
    }

    let nested = dir.join(MANIFEST_DIR).join("lambdaflow.kdl");
    if nested.is_file() {
        debug!(manifest = %nested.display(), "Found manifest");
        return Ok(nested);
    }

    Err(ConfigError::ManifestNotFound)
}

/// Environment file of a project: `LAMBDAFLOW_ENV_FILE` or `.env` in the
/// project root. A manifest inside `.lambdaflow/` belongs to the parent.
pub fn env_file_for(manifest: &Path) -> PathBuf {
    if let Ok(path) = std::env::var(ENV_FILE_ENV) {
        return expand_home(&path);
    }
    project_root(manifest).join(".env")
}

/// Directory source patterns and the env file are relative to
pub fn project_root(manifest: &Path) -> PathBuf {
    let dir = manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if dir.file_name().is_some_and(|n| n == MANIFEST_DIR) {
        dir.parent().unwrap_or(dir).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

/// Expand a leading `~/`
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_local_manifest_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lambdaflow.kdl"), "// shared").unwrap();
        fs::write(dir.path().join("lambdaflow.local.kdl"), "// local").unwrap();

        let found = find_manifest_in(dir.path()).unwrap();
        assert!(found.ends_with("lambdaflow.local.kdl"));
    }

    #[test]
    fn test_manifest_in_dot_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".lambdaflow")).unwrap();
        fs::write(dir.path().join(".lambdaflow/lambdaflow.kdl"), "").unwrap();

        let found = find_manifest_in(dir.path()).unwrap();
        assert!(found.ends_with(".lambdaflow/lambdaflow.kdl"));
        assert_eq!(project_root(&found), dir.path());
    }

    #[test]
    fn test_manifest_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_manifest_in(dir.path()),
            Err(ConfigError::ManifestNotFound)
        ));
    }

    #[test]
    #[serial]
    fn test_manifest_from_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("deploy.kdl");
        fs::write(&custom, "").unwrap();

        temp_env::with_var(MANIFEST_ENV, Some(custom.to_str().unwrap()), || {
            assert_eq!(find_manifest().unwrap(), custom);
        });

        let missing = dir.path().join("missing.kdl");
        temp_env::with_var(MANIFEST_ENV, Some(missing.to_str().unwrap()), || {
            assert!(matches!(
                find_manifest(),
                Err(ConfigError::ManifestMissing(_))
            ));
        });
    }

    #[test]
    #[serial]
    fn test_find_manifest_in_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(dir.path().join("lambdaflow.kdl"), "").unwrap();

        std::env::set_current_dir(&dir).unwrap();
        let result = temp_env::with_var_unset(MANIFEST_ENV, find_manifest);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("lambdaflow.kdl"));
    }

    #[test]
    #[serial]
    fn test_env_file_location() {
        let manifest = Path::new("/srv/app/lambdaflow.kdl");
        temp_env::with_var_unset(ENV_FILE_ENV, || {
            assert_eq!(env_file_for(manifest), Path::new("/srv/app/.env"));
        });
        temp_env::with_var(ENV_FILE_ENV, Some("/etc/app.env"), || {
            assert_eq!(env_file_for(manifest), Path::new("/etc/app.env"));
        });
    }

    #[test]
    fn test_project_root_of_bare_file_name() {
        assert_eq!(project_root(Path::new("lambdaflow.kdl")), Path::new("."));
    }
}
