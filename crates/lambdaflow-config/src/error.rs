use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Manifest not found. Looked for:\n\
        - lambdaflow.local.kdl, lambdaflow.kdl in the current directory\n\
        - .lambdaflow/lambdaflow.kdl\n\
        Set LAMBDAFLOW_MANIFEST or pass --manifest to point at another file"
    )]
    ManifestNotFound,

    #[error("Manifest {0} does not exist")]
    ManifestMissing(PathBuf),

    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Variable '{key}' is not set (use ${{{key}:-default}} to give a default)")]
    UnresolvedVariable { key: String },

    #[error("'{key}' is missing from {path}")]
    MissingKey { key: String, path: PathBuf },

    #[error("Invalid line {line} in {path}: {content}")]
    InvalidEnvLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error(transparent)]
    Cloud(#[from] lambdaflow_cloud::CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
