//! Manifest plus environment file of one project

use crate::discovery::{env_file_for, find_manifest};
use crate::environment::DeploymentEnvironment;
use crate::error::{ConfigError, Result};
use crate::manifest::Manifest;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct Project {
    pub manifest: Manifest,
    pub environment: DeploymentEnvironment,
}

impl Project {
    /// Load a project. Explicit paths win over discovery.
    ///
    /// The environment file is read first because manifest strings may
    /// reference its keys.
    #[instrument]
    pub fn load(manifest: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        let manifest_path = match manifest {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => return Err(ConfigError::ManifestMissing(path.to_path_buf())),
            None => find_manifest()?,
        };

        let env_path = match env_file {
            Some(path) => path.to_path_buf(),
            None => env_file_for(&manifest_path),
        };
        debug!(env_file = %env_path.display(), "Using environment file");

        let environment = DeploymentEnvironment::load(env_path)?;
        let manifest = Manifest::load(&manifest_path, &environment)?;
        Ok(Self {
            manifest,
            environment,
        })
    }

    pub fn region<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        self.manifest.region(explicit, &self.environment)
    }
}
