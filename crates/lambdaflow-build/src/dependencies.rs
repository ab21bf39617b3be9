//! Layer dependency installation
//!
//! Dependencies are resolved with pip for the function's platform rather than
//! the host's, then every installed wheel is checked against that platform.
//! A wheel that slipped through with macOS or ARM binaries would only fail
//! at import time inside the function.

use crate::error::{BuildError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Platform the layer is resolved for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlatform {
    /// pip `--platform`
    pub platform: String,
    /// pip `--implementation`
    pub implementation: String,
    /// `major.minor`
    pub python_version: String,
}

impl Default for TargetPlatform {
    fn default() -> Self {
        Self {
            platform: "manylinux2014_x86_64".to_string(),
            implementation: "cp".to_string(),
            python_version: "3.12".to_string(),
        }
    }
}

impl TargetPlatform {
    fn version_parts(&self) -> Option<(u32, u32)> {
        let (major, minor) = self.python_version.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    /// Interpreter tag, e.g. `cp312`
    pub fn interpreter_tag(&self) -> String {
        format!(
            "{}{}",
            self.implementation,
            self.python_version.replace('.', "")
        )
    }

    fn python_compatible(&self, tag: &str, stable_abi: bool) -> bool {
        let Some((major, minor)) = self.version_parts() else {
            return false;
        };
        let nodot = format!("{}{}", major, minor);

        tag.split('.').any(|t| {
            if t == format!("py{}", major) || t == format!("py{}", nodot) {
                return true;
            }
            if t == self.interpreter_tag() {
                return true;
            }
            // abi3 wheels built for an older CPython 3.x keep working
            stable_abi
                && t.strip_prefix(&format!("{}{}", self.implementation, major))
                    .and_then(|m| m.parse::<u32>().ok())
                    .is_some_and(|m| m <= minor)
        })
    }

    fn abi_compatible(&self, tag: &str) -> bool {
        tag.split('.')
            .any(|t| t == "none" || t == "abi3" || t == self.interpreter_tag())
    }

    fn platform_compatible(&self, tag: &str) -> bool {
        let arch = if self.platform.ends_with("_aarch64") {
            "_aarch64"
        } else {
            "_x86_64"
        };

        tag.split('.').any(|t| {
            t == "any"
                || (t.ends_with(arch) && (t.starts_with("manylinux") || t.starts_with("linux_")))
        })
    }

    /// Whether a wheel tag such as `cp312-cp312-manylinux_2_17_x86_64` runs here
    pub fn accepts(&self, tag: &str) -> bool {
        let mut parts = tag.splitn(3, '-');
        let (Some(python), Some(abi), Some(platform)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let stable_abi = abi.split('.').any(|t| t == "abi3");
        self.python_compatible(python, stable_abi)
            && self.abi_compatible(abi)
            && self.platform_compatible(platform)
    }
}

/// Installs `requirements.txt` into a layer directory
#[derive(Debug, Clone)]
pub struct DependencyInstaller {
    /// pip command, split on whitespace (e.g. `python3.12 -m pip`)
    pub pip: String,
    pub target: TargetPlatform,
}

impl Default for DependencyInstaller {
    fn default() -> Self {
        Self {
            pip: "pip".to_string(),
            target: TargetPlatform::default(),
        }
    }
}

impl DependencyInstaller {
    pub fn new(pip: impl Into<String>) -> Self {
        Self {
            pip: pip.into(),
            ..Default::default()
        }
    }

    /// Install into `<dir>/python`, the path Lambda puts on `sys.path`.
    /// Returns the directory that holds the installed packages.
    pub async fn install(&self, requirements: &Path, dir: &Path) -> Result<PathBuf> {
        if !requirements.is_file() {
            return Err(BuildError::SourceNotFound(requirements.to_path_buf()));
        }

        let target_dir = dir.join("python");
        tokio::fs::create_dir_all(&target_dir).await?;

        let target = target_dir.to_string_lossy().into_owned();
        let requirements = requirements.to_string_lossy().into_owned();
        let args = [
            "install",
            "--quiet",
            "--disable-pip-version-check",
            "--target",
            target.as_str(),
            "--platform",
            self.target.platform.as_str(),
            "--implementation",
            self.target.implementation.as_str(),
            "--python-version",
            self.target.python_version.as_str(),
            "--only-binary=:all:",
            "-r",
            requirements.as_str(),
        ];
        self.run_pip(&args).await?;

        let count = validate_wheels(&target_dir, &self.target)?;
        tracing::info!("Installed {} packages into {}", count, target_dir.display());
        Ok(target_dir)
    }

    async fn run_pip(&self, args: &[&str]) -> Result<String> {
        let mut words = self.pip.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| BuildError::InvalidConfig("empty pip command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(words);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", self.pip, args.join(" "));

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::ToolNotFound(program.to_string())
            } else {
                BuildError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::DependencyInstall(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Check the `Tag:` lines of every installed wheel.
/// Returns the number of installed distributions.
pub fn validate_wheels(site_packages: &Path, target: &TargetPlatform) -> Result<usize> {
    let mut count = 0;
    let mut entries = fs::read_dir(site_packages)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for dist_info in entries
        .iter()
        .filter(|p| p.is_dir() && p.extension().is_some_and(|e| e == "dist-info"))
    {
        count += 1;
        let package = dist_info
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let wheel = dist_info.join("WHEEL");
        if !wheel.is_file() {
            // Installed from an sdist, nothing to check
            tracing::debug!("{} has no WHEEL metadata", package);
            continue;
        }

        let tags = wheel_tags(&fs::read_to_string(&wheel)?);
        if tags.is_empty() || !tags.iter().any(|t| target.accepts(t)) {
            return Err(BuildError::PlatformMismatch {
                package,
                tags: tags.join(", "),
            });
        }
    }

    Ok(count)
}

fn wheel_tags(metadata: &str) -> Vec<String> {
    metadata
        .lines()
        .filter_map(|line| line.strip_prefix("Tag:"))
        .map(|tag| tag.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn install_wheel(dir: &Path, name: &str, tags: &[&str]) {
        let dist_info = dir.join(format!("{}.dist-info", name));
        fs::create_dir_all(&dist_info).unwrap();
        let mut metadata = String::from("Wheel-Version: 1.0\nGenerator: bdist_wheel\n");
        for tag in tags {
            metadata.push_str(&format!("Tag: {}\n", tag));
        }
        fs::write(dist_info.join("WHEEL"), metadata).unwrap();
    }

    #[test]
    fn test_accepts_linux_and_pure_wheels() {
        let target = TargetPlatform::default();
        assert!(target.accepts("py3-none-any"));
        assert!(target.accepts("py2.py3-none-any"));
        assert!(target.accepts("cp312-cp312-manylinux_2_17_x86_64.manylinux2014_x86_64"));
        assert!(target.accepts("cp38-abi3-manylinux_2_28_x86_64"));
    }

    #[test]
    fn test_rejects_foreign_wheels() {
        let target = TargetPlatform::default();
        assert!(!target.accepts("cp312-cp312-macosx_11_0_arm64"));
        assert!(!target.accepts("cp312-cp312-manylinux_2_17_aarch64"));
        assert!(!target.accepts("cp311-cp311-manylinux_2_17_x86_64"));
        assert!(!target.accepts("cp312-cp312-musllinux_1_1_x86_64"));
        assert!(!target.accepts("garbage"));
    }

    #[test]
    fn test_validate_wheels() {
        let dir = tempdir().unwrap();
        install_wheel(dir.path(), "fastapi-0.115.0", &["py3-none-any"]);
        install_wheel(
            dir.path(),
            "pydantic_core-2.23.4",
            &["cp312-cp312-manylinux_2_17_x86_64", "cp312-cp312-manylinux2014_x86_64"],
        );
        fs::create_dir_all(dir.path().join("fastapi")).unwrap();

        let count = validate_wheels(dir.path(), &TargetPlatform::default()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_validate_wheels_reports_mismatch() {
        let dir = tempdir().unwrap();
        install_wheel(dir.path(), "orjson-3.10.7", &["cp312-cp312-macosx_11_0_arm64"]);

        let result = validate_wheels(dir.path(), &TargetPlatform::default());
        match result {
            Err(BuildError::PlatformMismatch { package, tags }) => {
                assert_eq!(package, "orjson-3.10.7");
                assert!(tags.contains("macosx"));
            }
            other => panic!("expected platform mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_requires_requirements_file() {
        let dir = tempdir().unwrap();
        let result = DependencyInstaller::default()
            .install(&dir.path().join("requirements.txt"), dir.path())
            .await;
        assert!(matches!(result, Err(BuildError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_pip_is_reported() {
        let dir = tempdir().unwrap();
        let requirements = dir.path().join("requirements.txt");
        fs::write(&requirements, "fastapi\n").unwrap();

        let installer = DependencyInstaller::new("lambdaflow-missing-pip-binary");
        let result = installer.install(&requirements, dir.path()).await;
        assert!(matches!(result, Err(BuildError::ToolNotFound(t)) if t == "lambdaflow-missing-pip-binary"));
    }
}
