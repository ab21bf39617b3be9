use crate::archive::ArchiveBuilder;
use crate::dependencies::DependencyInstaller;
use crate::error::Result;
use crate::launcher::Launcher;
use crate::sources::SourceSet;
use lambdaflow_cloud::PackageArtifact;
use std::path::{Path, PathBuf};

pub const FUNCTION_ARCHIVE: &str = "function.zip";
pub const LAYER_ARCHIVE: &str = "layer.zip";

/// What goes into the function archive
#[derive(Debug, Clone, Default)]
pub struct FunctionPackage {
    /// Glob patterns relative to the project root
    pub sources: Vec<String>,
    pub launcher: Option<Launcher>,
}

/// What goes into the dependency layer
#[derive(Debug, Clone)]
pub struct LayerPackage {
    /// Relative to the project root
    pub requirements: PathBuf,
    pub installer: DependencyInstaller,
}

impl Default for LayerPackage {
    fn default() -> Self {
        Self {
            requirements: PathBuf::from("requirements.txt"),
            installer: DependencyInstaller::default(),
        }
    }
}

/// Builds the archives of one project
pub struct Packager {
    root: PathBuf,
}

impl Packager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn function(&self, package: &FunctionPackage) -> Result<PackageArtifact> {
        let sources = SourceSet::collect(&self.root, &package.sources)?;

        let mut builder = ArchiveBuilder::new(FUNCTION_ARCHIVE);
        builder.add_sources(&sources)?;
        if let Some(launcher) = &package.launcher {
            if sources.contains(Launcher::FILE_NAME) {
                tracing::warn!(
                    "{} from the sources is replaced by the generated launcher",
                    Launcher::FILE_NAME
                );
            }
            builder.add_launcher(launcher)?;
        }

        builder.build()
    }

    /// Install dependencies into a staging directory and archive them.
    /// The staging directory is removed afterwards.
    pub async fn layer(&self, package: &LayerPackage) -> Result<PackageArtifact> {
        let staging = tempfile::tempdir()?;
        let requirements = self.root.join(&package.requirements);

        let installed = package
            .installer
            .install(&requirements, staging.path())
            .await?;

        let mut builder = ArchiveBuilder::new(LAYER_ARCHIVE);
        builder.add_tree("python", &installed)?;
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_function_archive_with_launcher() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("server.py"), "app = None\n").unwrap();

        let package = FunctionPackage {
            sources: vec!["server.py".to_string()],
            launcher: Some(Launcher::default()),
        };
        let artifact = Packager::new(dir.path()).function(&package).unwrap();

        assert_eq!(artifact.name, FUNCTION_ARCHIVE);
        assert_eq!(artifact.entries, vec!["run.sh", "server.py"]);
    }

    #[test]
    fn test_function_archive_without_sources_fails() {
        let dir = tempdir().unwrap();
        let package = FunctionPackage {
            sources: vec!["server.py".to_string()],
            launcher: None,
        };
        let result = Packager::new(dir.path()).function(&package);
        assert!(matches!(result, Err(BuildError::NoMatch(_))));
    }
}
