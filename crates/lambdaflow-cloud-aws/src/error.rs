//! AWS control-plane error types and SDK error classification

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata};
use lambdaflow_cloud::CloudError;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("No AWS region configured. Pass --region or set AWS_REGION")]
    MissingRegion,

    #[error("Invalid {what} request: {reason}")]
    RequestBuild { what: String, reason: String },

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::CloudError(inner) => inner,
            AwsError::MissingRegion => CloudError::InvalidConfig(err.to_string()),
            AwsError::RequestBuild { .. } => CloudError::InvalidConfig(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;

/// Error codes meaning the resource does not exist
const NOT_FOUND_CODES: &[&str] = &["NoSuchEntity", "ResourceNotFoundException"];

/// Error codes meaning the resource is already there
const ALREADY_EXISTS_CODES: &[&str] = &["EntityAlreadyExists", "ResourceInUseException"];

/// Error codes meaning the credentials are missing, wrong or expired
const AUTH_CODES: &[&str] = &[
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
];

/// Map an AWS error code and message onto the provisioning error taxonomy.
///
/// `ResourceConflictException` means "already exists" for create-style
/// operations and "busy with another update" for everything else.
pub fn classify(
    operation: &str,
    code: Option<&str>,
    message: Option<&str>,
    context: &str,
) -> CloudError {
    let detail = format!("{}: {}", operation, message.unwrap_or(context));

    match code {
        Some(code) if NOT_FOUND_CODES.contains(&code) => CloudError::ResourceNotFound(detail),
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => {
            CloudError::ResourceAlreadyExists(detail)
        }
        Some("ResourceConflictException") => {
            if operation.starts_with("Create") || operation.starts_with("Add") {
                CloudError::ResourceAlreadyExists(detail)
            } else {
                CloudError::Conflict(detail)
            }
        }
        Some("InvalidParameterValueException")
            if message.is_some_and(|m| m.contains("cannot be assumed")) =>
        {
            CloudError::RoleNotAssumable(detail)
        }
        Some(code) if AUTH_CODES.contains(&code) => CloudError::AuthenticationFailed(detail),
        Some(code) => CloudError::ApiError(format!("{} ({}): {}", operation, code, context)),
        None => CloudError::ApiError(format!("{}: {}", operation, context)),
    }
}

/// Classify a failed SDK call
pub(crate) fn sdk_error<E>(operation: &str, err: E) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let context = DisplayErrorContext(&err).to_string();
    classify(operation, err.code(), err.message(), &context)
}

/// Turn "not found" into `None`, keep every other error
pub(crate) fn absent_if_not_found<T>(
    result: std::result::Result<T, CloudError>,
) -> std::result::Result<Option<T>, CloudError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CloudError::ResourceNotFound(what)) => {
            tracing::debug!("Not found: {}", what);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn request_build(what: &str, err: impl Debug) -> CloudError {
    AwsError::RequestBuild {
        what: what.to_string(),
        reason: format!("{:?}", err),
    }
    .into()
}
