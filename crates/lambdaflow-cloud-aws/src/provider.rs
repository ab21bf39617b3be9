//! AWS control plane implementation

use crate::error::{AwsError, Result};
use crate::{dynamodb, iam, lambda};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iam::error::DisplayErrorContext;
use lambdaflow_cloud::{
    AuthStatus, ControlPlane, FunctionConfig, FunctionDescription, FunctionSpec, InvokeMode,
    KeySchema, LayerSpec, PackageArtifact, RoleDescription, TableDescription, TableSpec,
    UrlDescription,
};

/// Control plane backed by the IAM, DynamoDB, Lambda and STS APIs
pub struct AwsControlPlane {
    iam: aws_sdk_iam::Client,
    dynamodb: aws_sdk_dynamodb::Client,
    lambda: aws_sdk_lambda::Client,
    sts: aws_sdk_sts::Client,
    region: String,
}

impl AwsControlPlane {
    /// Load credentials and region from the usual AWS sources.
    /// An explicit region or profile wins over the environment.
    pub async fn connect(region: Option<&str>, profile: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        let config = loader.load().await;
        Self::from_config(&config)
    }

    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or(AwsError::MissingRegion)?;
        tracing::debug!("Using AWS region {}", region);

        Ok(Self {
            iam: aws_sdk_iam::Client::new(config),
            dynamodb: aws_sdk_dynamodb::Client::new(config),
            lambda: aws_sdk_lambda::Client::new(config),
            sts: aws_sdk_sts::Client::new(config),
            region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ControlPlane for AwsControlPlane {
    fn name(&self) -> &str {
        "aws"
    }

    async fn check_auth(&self) -> lambdaflow_cloud::Result<AuthStatus> {
        match self.sts.get_caller_identity().send().await {
            Ok(identity) => Ok(AuthStatus::ok(format!(
                "account {} as {} ({})",
                identity.account().unwrap_or("?"),
                identity.arn().unwrap_or("?"),
                self.region
            ))),
            Err(e) => Ok(AuthStatus::failed(DisplayErrorContext(&e).to_string())),
        }
    }

    async fn get_role(&self, name: &str) -> lambdaflow_cloud::Result<Option<RoleDescription>> {
        iam::get_role(&self.iam, name).await
    }

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &str,
    ) -> lambdaflow_cloud::Result<RoleDescription> {
        iam::create_role(&self.iam, name, trust_policy).await
    }

    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> lambdaflow_cloud::Result<()> {
        iam::attach_role_policy(&self.iam, role_name, policy_arn).await
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> lambdaflow_cloud::Result<()> {
        iam::put_role_policy(&self.iam, role_name, policy_name, policy_document).await
    }

    async fn describe_table(&self, name: &str) -> lambdaflow_cloud::Result<Option<TableDescription>> {
        dynamodb::describe_table(&self.dynamodb, name).await
    }

    async fn create_table(&self, spec: &TableSpec) -> lambdaflow_cloud::Result<TableDescription> {
        dynamodb::create_table(&self.dynamodb, spec).await
    }

    async fn purge_table_items(
        &self,
        name: &str,
        key_schema: &KeySchema,
    ) -> lambdaflow_cloud::Result<usize> {
        dynamodb::purge_table_items(&self.dynamodb, name, key_schema).await
    }

    async fn get_function(
        &self,
        name: &str,
    ) -> lambdaflow_cloud::Result<Option<FunctionDescription>> {
        lambda::get_function(&self.lambda, name).await
    }

    async fn create_function(
        &self,
        spec: &FunctionSpec,
        role_arn: &str,
        config: &FunctionConfig,
        code: &PackageArtifact,
    ) -> lambdaflow_cloud::Result<FunctionDescription> {
        lambda::create_function(&self.lambda, spec, role_arn, config, code).await
    }

    async fn update_function_code(
        &self,
        name: &str,
        code: &PackageArtifact,
    ) -> lambdaflow_cloud::Result<()> {
        lambda::update_function_code(&self.lambda, name, code).await
    }

    async fn update_function_configuration(
        &self,
        name: &str,
        config: &FunctionConfig,
    ) -> lambdaflow_cloud::Result<()> {
        lambda::update_function_configuration(&self.lambda, name, config).await
    }

    async fn get_function_url(
        &self,
        function_name: &str,
    ) -> lambdaflow_cloud::Result<Option<UrlDescription>> {
        lambda::get_function_url(&self.lambda, function_name).await
    }

    async fn create_function_url(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> lambdaflow_cloud::Result<UrlDescription> {
        lambda::create_function_url(&self.lambda, function_name, invoke_mode).await
    }

    async fn update_function_url_invoke_mode(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> lambdaflow_cloud::Result<UrlDescription> {
        lambda::update_function_url_invoke_mode(&self.lambda, function_name, invoke_mode).await
    }

    async fn add_public_url_permission(&self, function_name: &str) -> lambdaflow_cloud::Result<()> {
        lambda::add_public_url_permission(&self.lambda, function_name).await
    }

    async fn publish_layer_version(
        &self,
        spec: &LayerSpec,
        content: &PackageArtifact,
    ) -> lambdaflow_cloud::Result<String> {
        lambda::publish_layer_version(&self.lambda, spec, content).await
    }
}
