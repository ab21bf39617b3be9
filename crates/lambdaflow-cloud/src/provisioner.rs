//! Idempotent provisioning operations
//!
//! Each operation reads first and only creates what is missing. Anything
//! other than the explicitly tolerated "already exists" aborts the run;
//! re-running converges because every branch starts from a fresh read.

use crate::action::{Action, ActionType, ApplyResult};
use crate::error::{CloudError, Result};
use crate::provider::{
    ControlPlane, FunctionDescription, RetryConfig, TableDescription, TableStatus, UpdateStatus,
};
use crate::resource::{
    FunctionConfig, FunctionSpec, InvokeMode, LayerSpec, PackageArtifact, ResourceKind, RoleSpec,
    TableSpec,
};
use crate::wait::{PollStatus, poll_until, retry_while};
use serde_json::json;
use std::time::Instant;

/// Outcome of [`Provisioner::deploy_function_code`]
///
/// Configuration updates take this as proof that the code step finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDeployment {
    pub name: String,
    pub arn: String,

    /// Whether the function existed before this run
    pub existed: bool,
}

/// Provisioner options
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Waits for table activation and function updates
    pub polling: RetryConfig,

    /// Retries while a freshly created role is not yet assumable
    pub propagation: RetryConfig,

    /// Accept an existing table whose key schema differs from the declared one
    pub allow_schema_drift: bool,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            polling: RetryConfig::polling(),
            propagation: RetryConfig::propagation(),
            allow_schema_drift: false,
        }
    }
}

/// Converges resources one at a time against a control plane
pub struct Provisioner<'a> {
    plane: &'a dyn ControlPlane,
    options: ProvisionerOptions,
    result: ApplyResult,
    started: Instant,
}

impl<'a> Provisioner<'a> {
    pub fn new(plane: &'a dyn ControlPlane) -> Self {
        Self::with_options(plane, ProvisionerOptions::default())
    }

    pub fn with_options(plane: &'a dyn ControlPlane, options: ProvisionerOptions) -> Self {
        Self {
            plane,
            options,
            result: ApplyResult::new(),
            started: Instant::now(),
        }
    }

    /// Actions recorded so far
    pub fn result(&self) -> &ApplyResult {
        &self.result
    }

    /// Stop recording and return the actions performed
    pub fn finish(mut self) -> ApplyResult {
        self.result.duration_ms = self.started.elapsed().as_millis() as u64;
        self.result
    }

    /// Look up the role; create it and attach its managed policies if absent
    pub async fn ensure_role(&mut self, spec: &RoleSpec) -> Result<String> {
        if let Some(role) = self.plane.get_role(&spec.name).await? {
            self.result.record(
                Action::new(
                    ActionType::NoOp,
                    ResourceKind::Role,
                    &spec.name,
                    format!("Role {} already exists", spec.name),
                )
                .with_detail("arn", json!(role.arn)),
            );
            return Ok(role.arn);
        }

        tracing::info!("Creating role: {}", spec.name);
        let trust_policy = spec.trust_policy_document()?;
        let role = match self.plane.create_role(&spec.name, &trust_policy).await {
            Ok(role) => role,
            Err(e) if e.is_already_exists() => {
                // Created concurrently between our read and our create
                tracing::warn!("Role {} appeared while creating it", spec.name);
                let role = self
                    .plane
                    .get_role(&spec.name)
                    .await?
                    .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", spec.name)))?;
                self.result.record(Action::new(
                    ActionType::NoOp,
                    ResourceKind::Role,
                    &spec.name,
                    format!("Role {} already exists", spec.name),
                ));
                return Ok(role.arn);
            }
            Err(e) => return Err(e),
        };

        for policy_arn in &spec.managed_policy_arns {
            tracing::debug!("Attaching {} to {}", policy_arn, spec.name);
            self.plane.attach_role_policy(&spec.name, policy_arn).await?;
        }

        self.result.record(
            Action::new(
                ActionType::Create,
                ResourceKind::Role,
                &spec.name,
                format!(
                    "Created role {} with {} managed policies",
                    spec.name,
                    spec.managed_policy_arns.len()
                ),
            )
            .with_detail("arn", json!(role.arn)),
        );
        Ok(role.arn)
    }

    /// Describe the table; create it and wait until active if absent.
    /// Returns the table ARN.
    pub async fn ensure_table(&mut self, spec: &TableSpec) -> Result<String> {
        if let Some(existing) = self.plane.describe_table(&spec.name).await? {
            self.check_schema(spec, &existing)?;

            let table = if existing.status == TableStatus::Active {
                existing
            } else {
                self.wait_table_active(&spec.name).await?
            };

            self.result.record(
                Action::new(
                    ActionType::NoOp,
                    ResourceKind::Table,
                    &spec.name,
                    format!("Table {} already exists", spec.name),
                )
                .with_detail("arn", json!(table.arn)),
            );
            return Ok(table.arn);
        }

        tracing::info!("Creating table: {} ({})", spec.name, spec.key_schema);
        match self.plane.create_table(spec).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                tracing::warn!("Table {} appeared while creating it", spec.name);
            }
            Err(e) => return Err(e),
        }

        let table = self.wait_table_active(&spec.name).await?;
        self.result.record(
            Action::new(
                ActionType::Create,
                ResourceKind::Table,
                &spec.name,
                format!("Created table {} ({})", spec.name, spec.key_schema),
            )
            .with_detail("arn", json!(table.arn)),
        );
        Ok(table.arn)
    }

    fn check_schema(&self, spec: &TableSpec, existing: &TableDescription) -> Result<()> {
        let Some(actual) = &existing.key_schema else {
            return Ok(());
        };
        if spec.key_schema.same_keys(actual) {
            return Ok(());
        }

        if self.options.allow_schema_drift {
            tracing::warn!(
                "Table {} key schema is {} but {} is declared; continuing",
                spec.name,
                actual,
                spec.key_schema
            );
            Ok(())
        } else {
            Err(CloudError::SchemaMismatch {
                table: spec.name.clone(),
                declared: spec.key_schema.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    async fn wait_table_active(&self, name: &str) -> Result<TableDescription> {
        let plane = self.plane;
        poll_until(
            &format!("table {}", name),
            &self.options.polling,
            move || async move {
                Ok(match plane.describe_table(name).await? {
                    Some(table) if table.status == TableStatus::Active => PollStatus::Ready(table),
                    Some(table) => PollStatus::Pending(format!("{:?}", table.status).to_lowercase()),
                    None => PollStatus::Pending("not visible".to_string()),
                })
            },
        )
        .await
    }

    /// Overwrite the named inline policy. Put semantics, no existence check.
    pub async fn attach_inline_policy(
        &mut self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()> {
        self.plane
            .put_role_policy(role_name, policy_name, policy_document)
            .await?;
        self.result.record(Action::new(
            ActionType::Update,
            ResourceKind::InlinePolicy,
            format!("{}/{}", role_name, policy_name),
            format!("Put inline policy {} on {}", policy_name, role_name),
        ));
        Ok(())
    }

    /// Upload new code to an existing function (and wait for it to settle),
    /// or create the function with its initial configuration.
    pub async fn deploy_function_code(
        &mut self,
        spec: &FunctionSpec,
        role_arn: &str,
        initial_config: &FunctionConfig,
        artifact: PackageArtifact,
    ) -> Result<FunctionDeployment> {
        if self.plane.get_function(&spec.name).await?.is_some() {
            // A previous run may have left an update in flight
            self.wait_function_settled(&spec.name).await?;

            tracing::info!(
                "Updating code of {} ({} bytes)",
                spec.name,
                artifact.len()
            );
            self.plane.update_function_code(&spec.name, &artifact).await?;
            let function = self.wait_function_settled(&spec.name).await?;

            self.result.record(
                Action::new(
                    ActionType::Update,
                    ResourceKind::Function,
                    &spec.name,
                    format!("Uploaded new code to {}", spec.name),
                )
                .with_detail("bytes", json!(artifact.len())),
            );
            return Ok(FunctionDeployment {
                name: spec.name.clone(),
                arn: function.arn,
                existed: true,
            });
        }

        tracing::info!("Creating function: {}", spec.name);
        let plane = self.plane;
        let artifact_ref = &artifact;
        retry_while(
            &format!("create function {}", spec.name),
            &self.options.propagation,
            move || plane.create_function(spec, role_arn, initial_config, artifact_ref),
            |e| matches!(e, CloudError::RoleNotAssumable(_)),
        )
        .await?;

        let function = self.wait_function_settled(&spec.name).await?;
        self.result.record(
            Action::new(
                ActionType::Create,
                ResourceKind::Function,
                &spec.name,
                format!("Created function {}", spec.name),
            )
            .with_detail("arn", json!(function.arn)),
        );
        Ok(FunctionDeployment {
            name: spec.name.clone(),
            arn: function.arn,
            existed: false,
        })
    }

    /// Apply handler, timeout, layers and environment in one update.
    /// Skipped for functions created in this run, which already carry it, and
    /// for functions whose configuration already matches.
    pub async fn deploy_function_config(
        &mut self,
        deployment: &FunctionDeployment,
        config: &FunctionConfig,
    ) -> Result<()> {
        if !deployment.existed {
            self.result.record(Action::new(
                ActionType::NoOp,
                ResourceKind::Function,
                &deployment.name,
                format!("Configuration of {} set at creation", deployment.name),
            ));
            return Ok(());
        }

        // Never race an update that is still propagating
        let current = self.wait_function_settled(&deployment.name).await?;
        if current.matches(config) {
            self.result.record(Action::new(
                ActionType::NoOp,
                ResourceKind::Function,
                &deployment.name,
                format!("Configuration of {} already matches", deployment.name),
            ));
            return Ok(());
        }

        tracing::info!(
            "Updating configuration of {} (handler {}, timeout {}s, {} layers)",
            deployment.name,
            config.handler,
            config.timeout_secs,
            config.layers.len()
        );
        self.plane
            .update_function_configuration(&deployment.name, config)
            .await?;
        self.wait_function_settled(&deployment.name).await?;

        self.result.record(
            Action::new(
                ActionType::Update,
                ResourceKind::Function,
                &deployment.name,
                format!("Updated configuration of {}", deployment.name),
            )
            .with_detail("layers", json!(config.layers)),
        );
        Ok(())
    }

    async fn wait_function_settled(&self, name: &str) -> Result<FunctionDescription> {
        let plane = self.plane;
        poll_until(
            &format!("function {}", name),
            &self.options.polling,
            move || async move {
                let function = plane
                    .get_function(name)
                    .await?
                    .ok_or_else(|| CloudError::ResourceNotFound(format!("function {}", name)))?;
                match &function.last_update {
                    UpdateStatus::Successful => Ok(PollStatus::Ready(function)),
                    UpdateStatus::InProgress => Ok(PollStatus::Pending("in progress".to_string())),
                    UpdateStatus::Failed(reason) => Err(CloudError::OperationFailed(format!(
                        "update of function {} failed: {}",
                        name, reason
                    ))),
                }
            },
        )
        .await
    }

    /// Make sure the function has a public URL with the given invocation mode
    pub async fn ensure_public_url(
        &mut self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> Result<String> {
        if let Some(existing) = self.plane.get_function_url(function_name).await? {
            // A run may have stopped between creating the URL and granting access
            let granted = self.grant_public_invoke(function_name).await?;

            if existing.invoke_mode == invoke_mode {
                let (action_type, description) = if granted {
                    (
                        ActionType::Update,
                        format!("Granted public access to URL of {}", function_name),
                    )
                } else {
                    (
                        ActionType::NoOp,
                        format!("URL of {} already {}", function_name, invoke_mode),
                    )
                };
                self.result.record(
                    Action::new(action_type, ResourceKind::UrlConfig, function_name, description)
                        .with_detail("url", json!(existing.url)),
                );
                return Ok(existing.url);
            }

            tracing::info!(
                "Switching URL of {} from {} to {}",
                function_name,
                existing.invoke_mode,
                invoke_mode
            );
            let updated = self
                .plane
                .update_function_url_invoke_mode(function_name, invoke_mode)
                .await?;
            self.result.record(
                Action::new(
                    ActionType::Update,
                    ResourceKind::UrlConfig,
                    function_name,
                    format!("Set invoke mode of {} to {}", function_name, invoke_mode),
                )
                .with_detail("url", json!(updated.url)),
            );
            return Ok(updated.url);
        }

        tracing::info!("Creating public URL for {}", function_name);
        let created = self
            .plane
            .create_function_url(function_name, invoke_mode)
            .await?;

        self.grant_public_invoke(function_name).await?;

        self.result.record(
            Action::new(
                ActionType::Create,
                ResourceKind::UrlConfig,
                function_name,
                format!("Created public {} URL for {}", invoke_mode, function_name),
            )
            .with_detail("url", json!(created.url)),
        );
        Ok(created.url)
    }

    /// Allow unauthenticated invocation through the URL.
    /// Returns false when the permission was already there.
    async fn grant_public_invoke(&self, function_name: &str) -> Result<bool> {
        match self.plane.add_public_url_permission(function_name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                tracing::debug!("Public invoke permission already granted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Publish a new layer version. Layers are append-only.
    pub async fn publish_layer(
        &mut self,
        spec: &LayerSpec,
        artifact: PackageArtifact,
    ) -> Result<String> {
        tracing::info!("Publishing layer {} ({} bytes)", spec.name, artifact.len());
        let arn = self.plane.publish_layer_version(spec, &artifact).await?;
        self.result.record(
            Action::new(
                ActionType::Create,
                ResourceKind::Layer,
                &spec.name,
                format!("Published layer version {}", arn),
            )
            .with_detail("arn", json!(arn)),
        );
        Ok(arn)
    }

    /// Delete every item of an existing table. The table itself stays.
    pub async fn wipe_table(&mut self, spec: &TableSpec) -> Result<usize> {
        if self.plane.describe_table(&spec.name).await?.is_none() {
            return Err(CloudError::ResourceNotFound(format!("table {}", spec.name)));
        }

        let deleted = self
            .plane
            .purge_table_items(&spec.name, &spec.key_schema)
            .await?;
        self.result.record(
            Action::new(
                ActionType::Update,
                ResourceKind::Table,
                &spec.name,
                format!("Deleted {} items from {}", deleted, spec.name),
            )
            .with_detail("deleted", json!(deleted)),
        );
        Ok(deleted)
    }
}
