//! AWS control plane for lambdaflow
//!
//! Implements [`ControlPlane`](lambdaflow_cloud::ControlPlane) on top of the
//! AWS SDK. SDK errors are classified by their error code so the provisioner
//! can tell "not found" and "already exists" apart from real failures.
//!
//! # Example
//!
//! ```ignore
//! use lambdaflow_cloud::ControlPlane;
//! use lambdaflow_cloud_aws::AwsControlPlane;
//!
//! let plane = AwsControlPlane::connect(Some("us-east-1"), None).await?;
//!
//! let auth = plane.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

mod dynamodb;
pub mod error;
mod iam;
mod lambda;
pub mod provider;

pub use error::{AwsError, Result, classify};
pub use lambda::PUBLIC_URL_STATEMENT_ID;
pub use provider::AwsControlPlane;
