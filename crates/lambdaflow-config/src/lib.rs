//! lambdaflow configuration
//!
//! Finds and parses the `lambdaflow.kdl` manifest into a
//! [`ResourceSet`](lambdaflow_cloud::ResourceSet) plus packaging settings, and
//! owns the deployment environment file that carries values between runs.

pub mod discovery;
pub mod environment;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod parser;
pub mod template;

pub use discovery::{ENV_FILE_ENV, MANIFEST_ENV, env_file_for, find_manifest, find_manifest_in};
pub use environment::DeploymentEnvironment;
pub use error::{ConfigError, Result};
pub use loader::Project;
pub use manifest::{Manifest, REGION_KEY};
pub use template::{expand, expand_with};
