//! Parsed deployment manifest

use crate::discovery::project_root;
use crate::environment::DeploymentEnvironment;
use crate::error::Result;
use crate::parser::parse_manifest;
use lambdaflow_build::{FunctionPackage, LayerPackage};
use lambdaflow_cloud::ResourceSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Environment file key consulted when neither the command line nor the
/// manifest names a region
pub const REGION_KEY: &str = "AWS_REGION";

#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,

    /// Directory source patterns and the requirements file are relative to
    pub root: PathBuf,

    pub project: String,
    pub region: Option<String>,
    pub resources: ResourceSet,

    /// Present when a function is declared
    pub function_package: Option<FunctionPackage>,

    /// Present when a layer is declared
    pub layer_package: Option<LayerPackage>,
}

impl Manifest {
    #[instrument(skip(env), fields(manifest = %path.display()))]
    pub fn load(path: &Path, env: &DeploymentEnvironment) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let manifest = Self::parse(&content, path, env)?;
        info!(
            project = %manifest.project,
            resources = manifest.resources.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    pub fn parse(content: &str, path: &Path, env: &DeploymentEnvironment) -> Result<Self> {
        let root = project_root(path);
        let default_project = root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unnamed".to_string());

        let parsed = parse_manifest(content, default_project, env)?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
            project: parsed.project,
            region: parsed.region,
            resources: parsed.resources,
            function_package: parsed.function_package,
            layer_package: parsed.layer_package,
        })
    }

    /// Region to deploy to: explicit choice, then the manifest, then the
    /// environment file. `None` leaves it to the SDK's own resolution.
    pub fn region<'a>(
        &'a self,
        explicit: Option<&'a str>,
        env: &'a DeploymentEnvironment,
    ) -> Option<&'a str> {
        explicit
            .or(self.region.as_deref())
            .or_else(|| env.get(REGION_KEY).filter(|r| !r.is_empty()))
    }
}
