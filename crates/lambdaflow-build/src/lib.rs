//! lambdaflow packaging
//!
//! Builds the two archives a deployment uploads: the function archive
//! (application sources plus the generated `run.sh` launcher) and the layer
//! archive (third-party dependencies installed for the function's platform).
//! Both are byte-for-byte reproducible.
//!
//! Packaging happens before any remote call, so a missing source file or a
//! wheel built for the wrong platform stops the deployment early.

pub mod archive;
pub mod dependencies;
pub mod error;
pub mod launcher;
pub mod packager;
pub mod progress;
pub mod sources;

pub use archive::ArchiveBuilder;
pub use dependencies::{DependencyInstaller, TargetPlatform, validate_wheels};
pub use error::{BuildError, Result};
pub use launcher::Launcher;
pub use packager::{FUNCTION_ARCHIVE, FunctionPackage, LAYER_ARCHIVE, LayerPackage, Packager};
pub use progress::BuildProgress;
pub use sources::SourceSet;
