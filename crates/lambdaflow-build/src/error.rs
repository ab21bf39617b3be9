use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Pattern matched no files: {0}")]
    NoMatch(String),

    #[error("Invalid source pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("Wheel {package} does not target the function platform (tags: {tags})")]
    PlatformMismatch { package: String, tags: String },

    #[error("Invalid package configuration: {0}")]
    InvalidConfig(String),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Error message with a hint on how to fix it
    pub fn user_message(&self) -> String {
        match self {
            BuildError::NoMatch(pattern) => {
                format!(
                    "No files matched the source pattern: {}\n\
                     \n\
                     Fix:\n\
                     1. Check the pattern is relative to the manifest directory\n\
                     2. List the sources explicitly in lambdaflow.kdl:\n\
                        sources \"server.py\" \"app/**/*.py\"",
                    pattern
                )
            }
            BuildError::ToolNotFound(tool) => {
                format!(
                    "{} was not found on PATH.\n\
                     \n\
                     Install it, or point the layer at another interpreter:\n\
                        layer \"deps\" {{ pip \"python3.12 -m pip\" }}",
                    tool
                )
            }
            BuildError::PlatformMismatch { package, tags } => {
                format!(
                    "{} was installed for the wrong platform ({}).\n\
                     \n\
                     Lambda runs Linux x86_64. Pin a version that ships a\n\
                     manylinux wheel, or build the wheel yourself.",
                    package, tags
                )
            }
            BuildError::DependencyInstall(msg) => {
                format!(
                    "Installing layer dependencies failed:\n{}\n\
                     \n\
                     Check requirements.txt.",
                    msg
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
