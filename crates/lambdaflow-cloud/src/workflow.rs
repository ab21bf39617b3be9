//! Deployment workflow
//!
//! The order of provisioning steps is an explicit dependency graph rather
//! than the order of statements in a script. [`Workflow::deploy`] walks the
//! graph with a [`Provisioner`]; [`Workflow::plan`] walks it read-only.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::provider::ControlPlane;
use crate::provisioner::{FunctionDeployment, Provisioner, ProvisionerOptions};
use crate::resource::{PackageArtifact, ResourceKind, ResourceSet};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Environment key holding the dependency layer version ARN
pub const LAYER_ARN_KEY: &str = "LAYER_ARN";

/// Environment key holding the public function URL
pub const LAMBDA_URL_KEY: &str = "LAMBDA_URL";

/// One provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
    Role,
    Table,
    InlinePolicy,
    Layer,
    FunctionCode,
    FunctionConfig,
    PublicUrl,
}

impl StepId {
    pub const ALL: [StepId; 7] = [
        StepId::Role,
        StepId::Table,
        StepId::InlinePolicy,
        StepId::Layer,
        StepId::FunctionCode,
        StepId::FunctionConfig,
        StepId::PublicUrl,
    ];

    /// Steps that must finish before this one starts
    pub fn prerequisites(&self) -> &'static [StepId] {
        match self {
            StepId::Role | StepId::Table | StepId::Layer => &[],
            StepId::InlinePolicy => &[StepId::Role, StepId::Table],
            StepId::FunctionCode => &[StepId::Role, StepId::InlinePolicy],
            StepId::FunctionConfig => &[StepId::FunctionCode, StepId::Layer],
            StepId::PublicUrl => &[StepId::FunctionCode, StepId::FunctionConfig],
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepId::Role => "role",
            StepId::Table => "table",
            StepId::InlinePolicy => "inline-policy",
            StepId::Layer => "layer",
            StepId::FunctionCode => "function-code",
            StepId::FunctionConfig => "function-config",
            StepId::PublicUrl => "public-url",
        };
        f.write_str(name)
    }
}

/// Topologically ordered steps of one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGraph {
    order: Vec<StepId>,
}

impl StepGraph {
    /// Steps needed by the given resources, in execution order
    pub fn for_resources(resources: &ResourceSet) -> Result<Self> {
        let mut steps = Vec::new();
        if let Some(role) = resources.role() {
            steps.push(StepId::Role);
            if !role.inline_policies.is_empty() {
                steps.push(StepId::InlinePolicy);
            }
        }
        if resources.table().is_some() {
            steps.push(StepId::Table);
        }
        if resources.layer().is_some() {
            steps.push(StepId::Layer);
        }
        if resources.function().is_some() {
            steps.push(StepId::FunctionCode);
            steps.push(StepId::FunctionConfig);
        }
        if resources.url().is_some() {
            steps.push(StepId::PublicUrl);
        }

        Self::with_prerequisites(&steps, |step| step.prerequisites().to_vec())
    }

    /// Order `steps` so every step runs after its prerequisites.
    ///
    /// Prerequisites outside `steps` are ignored. Ties are broken by
    /// `StepId` order, so the result is stable.
    pub fn with_prerequisites<F>(steps: &[StepId], prerequisites: F) -> Result<Self>
    where
        F: Fn(StepId) -> Vec<StepId>,
    {
        let nodes: BTreeSet<StepId> = steps.iter().copied().collect();
        let mut pending: BTreeMap<StepId, BTreeSet<StepId>> = nodes
            .iter()
            .map(|&step| {
                let deps = prerequisites(step)
                    .into_iter()
                    .filter(|dep| nodes.contains(dep))
                    .collect();
                (step, deps)
            })
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(&step, _)| step);

            let Some(step) = next else {
                let stuck: Vec<String> = pending.keys().map(|s| s.to_string()).collect();
                return Err(CloudError::InvalidConfig(format!(
                    "step dependency cycle between: {}",
                    stuck.join(", ")
                )));
            };

            pending.remove(&step);
            for deps in pending.values_mut() {
                deps.remove(&step);
            }
            order.push(step);
        }

        Ok(Self { order })
    }

    pub fn steps(&self) -> &[StepId] {
        &self.order
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.order.contains(&step)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Display for StepGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.order.iter().map(|s| s.to_string()).collect();
        f.write_str(&names.join(" -> "))
    }
}

/// Options of one deployment run
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Publish a new layer version even if one is already known
    pub publish_layer: bool,

    /// Layer version ARN from the environment file, if any
    pub known_layer_arn: Option<String>,

    pub provisioner: ProvisionerOptions,
}

/// Archives built before the first remote call
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub function: Option<PackageArtifact>,
    pub layer: Option<PackageArtifact>,
}

/// What a successful deployment produced
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub role_arn: Option<String>,
    pub table_arn: Option<String>,
    pub layer_arn: Option<String>,
    pub function_arn: Option<String>,
    pub function_url: Option<String>,

    /// Steps in the order they ran
    pub steps: Vec<StepId>,

    pub result: ApplyResult,
}

impl DeployOutcome {
    /// Keys to write back to the environment file
    pub fn environment_updates(&self) -> BTreeMap<String, String> {
        let mut updates = BTreeMap::new();
        if let Some(arn) = &self.layer_arn {
            updates.insert(LAYER_ARN_KEY.to_string(), arn.clone());
        }
        if let Some(url) = &self.function_url {
            updates.insert(LAMBDA_URL_KEY.to_string(), url.clone());
        }
        updates
    }
}

/// A deployment of one resource set against one control plane
pub struct Workflow<'a> {
    plane: &'a dyn ControlPlane,
    resources: &'a ResourceSet,
    graph: StepGraph,
    options: DeployOptions,
}

impl<'a> Workflow<'a> {
    pub fn new(
        plane: &'a dyn ControlPlane,
        resources: &'a ResourceSet,
        options: DeployOptions,
    ) -> Result<Self> {
        resources.validate()?;
        let graph = StepGraph::for_resources(resources)?;
        Ok(Self {
            plane,
            resources,
            graph,
            options,
        })
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Whether this run publishes a new layer version rather than reusing
    /// the known one
    pub fn publishes_layer(&self) -> bool {
        self.resources.layer().is_some()
            && (self.options.publish_layer || self.options.known_layer_arn.is_none())
    }

    /// Known layer ARN, attached only when the resource set declares a layer
    fn declared_layer_arn(&self) -> Option<&str> {
        self.resources
            .layer()
            .and(self.options.known_layer_arn.as_deref())
    }

    /// Converge every declared resource, step by step
    pub async fn deploy(&self, artifacts: Artifacts) -> Result<DeployOutcome> {
        let Artifacts {
            function: mut function_artifact,
            layer: mut layer_artifact,
        } = artifacts;

        let mut provisioner =
            Provisioner::with_options(self.plane, self.options.provisioner.clone());
        let mut role_arn = None;
        let mut table_arn = None;
        let mut layer_arn = self.declared_layer_arn().map(str::to_string);
        let mut deployment: Option<FunctionDeployment> = None;
        let mut function_url = None;

        for &step in self.graph.steps() {
            tracing::info!(step = %step, "Running step");
            match step {
                StepId::Role => {
                    let role = required(self.resources.role(), "role")?;
                    role_arn = Some(provisioner.ensure_role(role).await?);
                }
                StepId::Table => {
                    let table = required(self.resources.table(), "table")?;
                    table_arn = Some(provisioner.ensure_table(table).await?);
                }
                StepId::InlinePolicy => {
                    let role = required(self.resources.role(), "role")?;
                    for policy in &role.inline_policies {
                        let document = policy.document(table_arn.as_deref())?;
                        provisioner
                            .attach_inline_policy(&role.name, &policy.name, &document)
                            .await?;
                    }
                }
                StepId::Layer => {
                    let layer = required(self.resources.layer(), "layer")?;
                    if self.publishes_layer() {
                        let artifact = layer_artifact.take().ok_or_else(|| {
                            CloudError::InvalidConfig(format!(
                                "layer {} must be published but no layer package was built",
                                layer.name
                            ))
                        })?;
                        layer_arn = Some(provisioner.publish_layer(layer, artifact).await?);
                    } else if let Some(arn) = &layer_arn {
                        tracing::info!("Reusing layer {}", arn);
                    }
                }
                StepId::FunctionCode => {
                    let function = required(self.resources.function(), "function")?;
                    let role_arn = role_arn.as_deref().ok_or_else(|| {
                        CloudError::InvalidConfig(format!(
                            "function {} has no role to execute as",
                            function.name
                        ))
                    })?;
                    let artifact = function_artifact.take().ok_or_else(|| {
                        CloudError::InvalidConfig(format!(
                            "no code package was built for function {}",
                            function.name
                        ))
                    })?;
                    // Layer sorts before FunctionCode, so a new function is
                    // created with its layer already attached
                    let config = function.configuration(layer_arn.as_deref());
                    deployment = Some(
                        provisioner
                            .deploy_function_code(function, role_arn, &config, artifact)
                            .await?,
                    );
                }
                StepId::FunctionConfig => {
                    let function = required(self.resources.function(), "function")?;
                    let deployment = required(deployment.as_ref(), "function deployment")?;
                    let config = function.configuration(layer_arn.as_deref());
                    provisioner.deploy_function_config(deployment, &config).await?;
                }
                StepId::PublicUrl => {
                    let function = required(self.resources.function(), "function")?;
                    let url = required(self.resources.url(), "url")?;
                    function_url = Some(
                        provisioner
                            .ensure_public_url(&function.name, url.invoke_mode)
                            .await?,
                    );
                }
            }
        }

        let result = provisioner.finish();
        tracing::info!("Deployment finished: {}", result.summary());

        Ok(DeployOutcome {
            role_arn,
            table_arn,
            layer_arn,
            function_arn: deployment.map(|d| d.arn),
            function_url,
            steps: self.graph.steps().to_vec(),
            result,
        })
    }

    /// Describe every declared resource and report what `deploy` would do
    pub async fn plan(&self) -> Result<Plan> {
        let mut actions = Vec::new();
        let mut function_exists = false;
        let mut config_in_sync = false;

        for &step in self.graph.steps() {
            match step {
                StepId::Role => {
                    let role = required(self.resources.role(), "role")?;
                    actions.push(match self.plane.get_role(&role.name).await? {
                        Some(_) => Action::new(
                            ActionType::NoOp,
                            ResourceKind::Role,
                            &role.name,
                            "role exists",
                        ),
                        None => Action::new(
                            ActionType::Create,
                            ResourceKind::Role,
                            &role.name,
                            format!(
                                "create role and attach {} managed policies",
                                role.managed_policy_arns.len()
                            ),
                        ),
                    });
                }
                StepId::Table => {
                    let table = required(self.resources.table(), "table")?;
                    actions.push(match self.plane.describe_table(&table.name).await? {
                        Some(existing) => {
                            let drift = existing
                                .key_schema
                                .as_ref()
                                .filter(|actual| !table.key_schema.same_keys(actual));
                            if let Some(actual) = drift {
                                if !self.options.provisioner.allow_schema_drift {
                                    return Err(CloudError::SchemaMismatch {
                                        table: table.name.clone(),
                                        declared: table.key_schema.to_string(),
                                        actual: actual.to_string(),
                                    });
                                }
                            }
                            Action::new(
                                ActionType::NoOp,
                                ResourceKind::Table,
                                &table.name,
                                "table exists",
                            )
                            .with_detail("schema_drift", json!(drift.is_some()))
                        }
                        None => Action::new(
                            ActionType::Create,
                            ResourceKind::Table,
                            &table.name,
                            format!("create table ({})", table.key_schema),
                        ),
                    });
                }
                StepId::InlinePolicy => {
                    let role = required(self.resources.role(), "role")?;
                    for policy in &role.inline_policies {
                        actions.push(Action::new(
                            ActionType::Update,
                            ResourceKind::InlinePolicy,
                            format!("{}/{}", role.name, policy.name),
                            "put inline policy",
                        ));
                    }
                }
                StepId::Layer => {
                    let layer = required(self.resources.layer(), "layer")?;
                    actions.push(if self.publishes_layer() {
                        Action::new(
                            ActionType::Create,
                            ResourceKind::Layer,
                            &layer.name,
                            "publish new layer version",
                        )
                    } else {
                        Action::new(
                            ActionType::NoOp,
                            ResourceKind::Layer,
                            &layer.name,
                            "reuse known layer version",
                        )
                        .with_detail("arn", json!(self.options.known_layer_arn))
                    });
                }
                StepId::FunctionCode => {
                    let function = required(self.resources.function(), "function")?;
                    let existing = self.plane.get_function(&function.name).await?;
                    function_exists = existing.is_some();
                    if let Some(existing) = &existing {
                        let config = function.configuration(self.declared_layer_arn());
                        config_in_sync = !self.publishes_layer() && existing.matches(&config);
                    }
                    actions.push(if function_exists {
                        Action::new(
                            ActionType::Update,
                            ResourceKind::Function,
                            &function.name,
                            "upload new code",
                        )
                    } else {
                        Action::new(
                            ActionType::Create,
                            ResourceKind::Function,
                            &function.name,
                            "create function with initial configuration",
                        )
                    });
                }
                StepId::FunctionConfig => {
                    let function = required(self.resources.function(), "function")?;
                    if function_exists {
                        let (action_type, description) = if config_in_sync {
                            (ActionType::NoOp, "configuration already matches")
                        } else {
                            (ActionType::Update, "update handler, timeout, layers and environment")
                        };
                        actions.push(Action::new(
                            action_type,
                            ResourceKind::Function,
                            &function.name,
                            description,
                        ));
                    }
                }
                StepId::PublicUrl => {
                    let function = required(self.resources.function(), "function")?;
                    let url = required(self.resources.url(), "url")?;
                    let existing = if function_exists {
                        self.plane.get_function_url(&function.name).await?
                    } else {
                        None
                    };
                    actions.push(match existing {
                        None => Action::new(
                            ActionType::Create,
                            ResourceKind::UrlConfig,
                            &function.name,
                            format!("create public {} URL", url.invoke_mode),
                        ),
                        Some(current) if current.invoke_mode == url.invoke_mode => Action::new(
                            ActionType::NoOp,
                            ResourceKind::UrlConfig,
                            &function.name,
                            "URL exists",
                        )
                        .with_detail("url", json!(current.url)),
                        Some(current) => Action::new(
                            ActionType::Update,
                            ResourceKind::UrlConfig,
                            &function.name,
                            format!(
                                "switch invoke mode {} -> {}",
                                current.invoke_mode, url.invoke_mode
                            ),
                        ),
                    });
                }
            }
        }

        Ok(Plan::new(actions))
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| CloudError::InvalidConfig(format!("no {} declared", what)))
}
