//! Control-plane trait definition
//!
//! The provisioner only talks to the cloud through [`ControlPlane`]. Every
//! call is a synchronous request/response; "not found" is reported as
//! `Ok(None)` by the describe calls and "already exists" as
//! [`CloudError::ResourceAlreadyExists`](crate::CloudError::ResourceAlreadyExists)
//! by the create calls.

use crate::error::Result;
use crate::resource::{
    FunctionConfig, FunctionSpec, InvokeMode, KeySchema, LayerSpec, PackageArtifact, TableSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Remote control-plane abstraction
///
/// The AWS implementation lives in `lambdaflow-cloud-aws`; tests use
/// [`InMemoryControlPlane`](crate::memory::InMemoryControlPlane).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the control-plane name (e.g. "aws")
    fn name(&self) -> &str;

    /// Check that credentials are present and valid
    async fn check_auth(&self) -> Result<AuthStatus>;

    // ========== Roles ==========

    async fn get_role(&self, name: &str) -> Result<Option<RoleDescription>>;

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<RoleDescription>;

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Create or overwrite an inline policy
    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()>;

    // ========== Tables ==========

    async fn describe_table(&self, name: &str) -> Result<Option<TableDescription>>;

    async fn create_table(&self, spec: &TableSpec) -> Result<TableDescription>;

    /// Delete every item of the table, returning how many were removed
    async fn purge_table_items(&self, name: &str, key_schema: &KeySchema) -> Result<usize>;

    // ========== Functions ==========

    async fn get_function(&self, name: &str) -> Result<Option<FunctionDescription>>;

    async fn create_function(
        &self,
        spec: &FunctionSpec,
        role_arn: &str,
        config: &FunctionConfig,
        code: &PackageArtifact,
    ) -> Result<FunctionDescription>;

    async fn update_function_code(&self, name: &str, code: &PackageArtifact) -> Result<()>;

    async fn update_function_configuration(&self, name: &str, config: &FunctionConfig)
    -> Result<()>;

    // ========== Function URLs ==========

    async fn get_function_url(&self, function_name: &str) -> Result<Option<UrlDescription>>;

    async fn create_function_url(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> Result<UrlDescription>;

    /// Change only the invocation mode of an existing URL configuration
    async fn update_function_url_invoke_mode(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> Result<UrlDescription>;

    /// Allow unauthenticated invocation through the function URL
    async fn add_public_url_permission(&self, function_name: &str) -> Result<()>;

    // ========== Layers ==========

    /// Publish a new layer version and return its ARN
    async fn publish_layer_version(
        &self,
        spec: &LayerSpec,
        content: &PackageArtifact,
    ) -> Result<String>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescription {
    pub name: String,
    pub arn: String,
}

/// Table lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub arn: String,
    pub status: TableStatus,

    /// Key schema, when the control plane reports it
    pub key_schema: Option<KeySchema>,
}

/// Status of the last code or configuration update of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Successful,
    InProgress,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub name: String,
    pub arn: String,
    pub handler: Option<String>,
    pub timeout_secs: Option<u32>,
    pub layers: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
    pub last_update: UpdateStatus,
}

impl FunctionDescription {
    /// Whether the described fields already match the desired configuration
    pub fn matches(&self, config: &FunctionConfig) -> bool {
        self.handler.as_deref() == Some(config.handler.as_str())
            && self.timeout_secs == Some(config.timeout_secs)
            && self.layers == config.layers
            && self.env_vars == config.env_vars
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlDescription {
    pub url: String,
    pub invoke_mode: InvokeMode,
    pub auth_type: String,
}

/// Retry and polling configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (polls or retries)
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Policy for waits that normally finish within a minute or two
    /// (table activation, function updates)
    pub fn polling() -> Self {
        Self {
            max_attempts: 120,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }

    /// Policy for IAM propagation, which usually settles within ~10s
    pub fn propagation() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            backoff_multiplier: 2.0,
        }
    }

    /// No delays at all
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the given (zero-based) retry
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(64) as i32).max(0.0);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_capped() {
        let retry = RetryConfig::propagation();
        assert_eq!(retry.delay_for(0), Duration::from_secs(2));
        assert_eq!(retry.delay_for(1), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(20));
        assert_eq!(RetryConfig::immediate(3).delay_for(5), Duration::ZERO);
    }
}
