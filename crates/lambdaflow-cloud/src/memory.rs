//! In-memory control plane
//!
//! Behaves like the real service where the workflow cares: creates report
//! "already exists", tables start out creating, function updates stay in
//! progress for a number of polls (and reject concurrent updates with a
//! conflict), and a freshly created role cannot be assumed right away.

use crate::error::{CloudError, Result};
use crate::provider::{
    AuthStatus, ControlPlane, FunctionDescription, RoleDescription, TableDescription,
    TableStatus, UpdateStatus, UrlDescription,
};
use crate::resource::{
    FunctionConfig, FunctionSpec, InvokeMode, KeySchema, LayerSpec, PackageArtifact, TableSpec,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

const ACCOUNT_ID: &str = "123456789012";
const REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRole {
    pub arn: String,
    pub trust_policy: String,
    pub managed_policies: Vec<String>,
    pub inline_policies: BTreeMap<String, String>,

    /// Function creations rejected before the role becomes assumable
    #[serde(skip)]
    unassumable_for: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryTable {
    pub arn: String,
    pub key_schema: KeySchema,
    pub items: usize,

    #[serde(skip)]
    creating_polls: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryFunction {
    pub arn: String,
    pub runtime: String,
    pub role_arn: String,
    pub config: FunctionConfig,
    pub code: Vec<u8>,
    pub code_updates: u32,
    pub config_updates: u32,

    #[serde(skip)]
    pending_polls: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryUrl {
    pub url: String,
    pub invoke_mode: InvokeMode,
    pub auth_type: String,
    pub public: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    roles: BTreeMap<String, MemoryRole>,
    tables: BTreeMap<String, MemoryTable>,
    functions: BTreeMap<String, MemoryFunction>,
    urls: BTreeMap<String, MemoryUrl>,
    layers: BTreeMap<String, Vec<usize>>,
    calls: Vec<String>,
    conflicts: u32,
}

/// A [`ControlPlane`] that keeps everything in memory
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<MemoryState>,
    update_latency: u32,
    table_latency: u32,
    role_propagation: u32,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls a function reports `InProgress` after each code or configuration update
    pub fn with_update_latency(mut self, polls: u32) -> Self {
        self.update_latency = polls;
        self
    }

    /// Polls a new table reports `Creating`
    pub fn with_table_latency(mut self, polls: u32) -> Self {
        self.table_latency = polls;
        self
    }

    /// Function creations rejected with `RoleNotAssumable` after a role is created
    pub fn with_role_propagation(mut self, attempts: u32) -> Self {
        self.role_propagation = attempts;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(state: &mut MemoryState, call: String) {
        tracing::trace!("in-memory call: {}", call);
        state.calls.push(call);
    }

    // ========== Seeding ==========

    /// Pre-existing role, assumable right away
    pub fn seed_role(&self, name: &str) -> String {
        let arn = role_arn(name);
        self.lock().roles.insert(
            name.to_string(),
            MemoryRole {
                arn: arn.clone(),
                trust_policy: String::new(),
                managed_policies: Vec::new(),
                inline_policies: BTreeMap::new(),
                unassumable_for: 0,
            },
        );
        arn
    }

    /// Pre-existing active table holding `items` items
    pub fn seed_table(&self, name: &str, key_schema: KeySchema, items: usize) {
        self.lock().tables.insert(
            name.to_string(),
            MemoryTable {
                arn: table_arn(name),
                key_schema,
                items,
                creating_polls: 0,
            },
        );
    }

    /// Pre-existing function with the given configuration and code
    pub fn seed_function(&self, name: &str, role_arn: &str, config: FunctionConfig, code: &[u8]) {
        self.lock().functions.insert(
            name.to_string(),
            MemoryFunction {
                arn: function_arn(name),
                runtime: "python3.12".to_string(),
                role_arn: role_arn.to_string(),
                config,
                code: code.to_vec(),
                code_updates: 0,
                config_updates: 0,
                pending_polls: 0,
            },
        );
    }

    /// Pre-existing public URL configuration
    pub fn seed_url(&self, function_name: &str, invoke_mode: InvokeMode) -> String {
        let url = function_url(function_name);
        self.lock().urls.insert(
            function_name.to_string(),
            MemoryUrl {
                url: url.clone(),
                invoke_mode,
                auth_type: "NONE".to_string(),
                public: true,
            },
        );
        url
    }

    /// Pre-existing layer versions
    pub fn seed_layer(&self, name: &str, versions: usize) -> String {
        let mut state = self.lock();
        let published = state.layers.entry(name.to_string()).or_default();
        published.extend(std::iter::repeat_n(0, versions));
        layer_version_arn(name, published.len())
    }

    // ========== Inspection ==========

    pub fn role(&self, name: &str) -> Option<MemoryRole> {
        self.lock().roles.get(name).cloned()
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().tables.get(name).cloned()
    }

    pub fn function(&self, name: &str) -> Option<MemoryFunction> {
        self.lock().functions.get(name).cloned()
    }

    pub fn url(&self, function_name: &str) -> Option<MemoryUrl> {
        self.lock().urls.get(function_name).cloned()
    }

    /// Number of published versions of a layer
    pub fn layer_versions(&self, name: &str) -> usize {
        self.lock().layers.get(name).map(Vec::len).unwrap_or(0)
    }

    /// Every call made so far, e.g. `"create_role mcp-role"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose operation name is `operation`
    pub fn count_calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(operation))
            .count()
    }

    /// Updates rejected because another update was still in progress
    pub fn conflicts(&self) -> u32 {
        self.lock().conflicts
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Snapshot of the whole state as JSON
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        let state = self.lock();
        let layers: BTreeMap<&String, usize> =
            state.layers.iter().map(|(name, v)| (name, v.len())).collect();
        Ok(serde_json::json!({
            "roles": serde_json::to_value(&state.roles)?,
            "tables": serde_json::to_value(&state.tables)?,
            "functions": serde_json::to_value(&state.functions)?,
            "urls": serde_json::to_value(&state.urls)?,
            "layers": layers,
        }))
    }
}

fn role_arn(name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", ACCOUNT_ID, name)
}

fn table_arn(name: &str) -> String {
    format!("arn:aws:dynamodb:{}:{}:table/{}", REGION, ACCOUNT_ID, name)
}

fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT_ID, name)
}

fn function_url(name: &str) -> String {
    format!("https://{}.lambda-url.{}.on.aws/", name, REGION)
}

fn layer_version_arn(name: &str, version: usize) -> String {
    format!(
        "arn:aws:lambda:{}:{}:layer:{}:{}",
        REGION, ACCOUNT_ID, name, version
    )
}

fn describe_function(name: &str, function: &MemoryFunction) -> FunctionDescription {
    FunctionDescription {
        name: name.to_string(),
        arn: function.arn.clone(),
        handler: Some(function.config.handler.clone()),
        timeout_secs: Some(function.config.timeout_secs),
        layers: function.config.layers.clone(),
        env_vars: function.config.env_vars.clone(),
        last_update: if function.pending_polls > 0 {
            UpdateStatus::InProgress
        } else {
            UpdateStatus::Successful
        },
    }
}

fn describe_url(url: &MemoryUrl) -> UrlDescription {
    UrlDescription {
        url: url.url.clone(),
        invoke_mode: url.invoke_mode,
        auth_type: url.auth_type.clone(),
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(format!("in-memory account {}", ACCOUNT_ID)))
    }

    async fn get_role(&self, name: &str) -> Result<Option<RoleDescription>> {
        let mut state = self.lock();
        Self::log(&mut state, format!("get_role {}", name));
        Ok(state.roles.get(name).map(|role| RoleDescription {
            name: name.to_string(),
            arn: role.arn.clone(),
        }))
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<RoleDescription> {
        let mut state = self.lock();
        Self::log(&mut state, format!("create_role {}", name));
        if state.roles.contains_key(name) {
            return Err(CloudError::ResourceAlreadyExists(format!("role {}", name)));
        }

        let arn = role_arn(name);
        state.roles.insert(
            name.to_string(),
            MemoryRole {
                arn: arn.clone(),
                trust_policy: trust_policy.to_string(),
                managed_policies: Vec::new(),
                inline_policies: BTreeMap::new(),
                unassumable_for: self.role_propagation,
            },
        );
        Ok(RoleDescription {
            name: name.to_string(),
            arn,
        })
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.lock();
        Self::log(&mut state, format!("attach_role_policy {}", role_name));
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", role_name)))?;
        if !role.managed_policies.iter().any(|p| p == policy_arn) {
            role.managed_policies.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::log(&mut state, format!("put_role_policy {}/{}", role_name, policy_name));
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", role_name)))?;
        role.inline_policies
            .insert(policy_name.to_string(), policy_document.to_string());
        Ok(())
    }

    async fn describe_table(&self, name: &str) -> Result<Option<TableDescription>> {
        let mut state = self.lock();
        Self::log(&mut state, format!("describe_table {}", name));
        Ok(state.tables.get_mut(name).map(|table| {
            let status = if table.creating_polls > 0 {
                table.creating_polls -= 1;
                TableStatus::Creating
            } else {
                TableStatus::Active
            };
            TableDescription {
                name: name.to_string(),
                arn: table.arn.clone(),
                status,
                key_schema: Some(table.key_schema.clone()),
            }
        }))
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<TableDescription> {
        let mut state = self.lock();
        Self::log(&mut state, format!("create_table {}", spec.name));
        if state.tables.contains_key(&spec.name) {
            return Err(CloudError::ResourceAlreadyExists(format!("table {}", spec.name)));
        }

        let table = MemoryTable {
            arn: table_arn(&spec.name),
            key_schema: spec.key_schema.clone(),
            items: 0,
            creating_polls: self.table_latency,
        };
        let description = TableDescription {
            name: spec.name.clone(),
            arn: table.arn.clone(),
            status: if self.table_latency > 0 {
                TableStatus::Creating
            } else {
                TableStatus::Active
            },
            key_schema: Some(spec.key_schema.clone()),
        };
        state.tables.insert(spec.name.clone(), table);
        Ok(description)
    }

    async fn purge_table_items(&self, name: &str, _key_schema: &KeySchema) -> Result<usize> {
        let mut state = self.lock();
        Self::log(&mut state, format!("purge_table_items {}", name));
        let table = state
            .tables
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("table {}", name)))?;
        Ok(std::mem::take(&mut table.items))
    }

    async fn get_function(&self, name: &str) -> Result<Option<FunctionDescription>> {
        let mut state = self.lock();
        Self::log(&mut state, format!("get_function {}", name));
        Ok(state.functions.get_mut(name).map(|function| {
            let description = describe_function(name, function);
            function.pending_polls = function.pending_polls.saturating_sub(1);
            description
        }))
    }

    async fn create_function(
        &self,
        spec: &FunctionSpec,
        role_arn: &str,
        config: &FunctionConfig,
        code: &PackageArtifact,
    ) -> Result<FunctionDescription> {
        let mut state = self.lock();
        Self::log(&mut state, format!("create_function {}", spec.name));
        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "function {}",
                spec.name
            )));
        }

        let role = state
            .roles
            .values_mut()
            .find(|r| r.arn == role_arn)
            .ok_or_else(|| CloudError::ApiError(format!("role {} does not exist", role_arn)))?;
        if role.unassumable_for > 0 {
            role.unassumable_for -= 1;
            return Err(CloudError::RoleNotAssumable(format!(
                "the role defined for the function cannot be assumed by Lambda: {}",
                role_arn
            )));
        }

        let function = MemoryFunction {
            arn: function_arn(&spec.name),
            runtime: spec.runtime.clone(),
            role_arn: role_arn.to_string(),
            config: config.clone(),
            code: code.bytes.clone(),
            code_updates: 0,
            config_updates: 0,
            pending_polls: self.update_latency,
        };
        let description = describe_function(&spec.name, &function);
        state.functions.insert(spec.name.clone(), function);
        Ok(description)
    }

    async fn update_function_code(&self, name: &str, code: &PackageArtifact) -> Result<()> {
        let mut state = self.lock();
        Self::log(&mut state, format!("update_function_code {}", name));
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("function {}", name)))?;
        if function.pending_polls > 0 {
            state.conflicts += 1;
            return Err(CloudError::Conflict(format!(
                "an update is in progress for function {}",
                name
            )));
        }

        function.code = code.bytes.clone();
        function.code_updates += 1;
        function.pending_polls = self.update_latency;
        Ok(())
    }

    async fn update_function_configuration(
        &self,
        name: &str,
        config: &FunctionConfig,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::log(&mut state, format!("update_function_configuration {}", name));
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("function {}", name)))?;
        if function.pending_polls > 0 {
            state.conflicts += 1;
            return Err(CloudError::Conflict(format!(
                "an update is in progress for function {}",
                name
            )));
        }

        function.config = config.clone();
        function.config_updates += 1;
        function.pending_polls = self.update_latency;
        Ok(())
    }

    async fn get_function_url(&self, function_name: &str) -> Result<Option<UrlDescription>> {
        let mut state = self.lock();
        Self::log(&mut state, format!("get_function_url {}", function_name));
        Ok(state.urls.get(function_name).map(describe_url))
    }

    async fn create_function_url(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> Result<UrlDescription> {
        let mut state = self.lock();
        Self::log(&mut state, format!("create_function_url {}", function_name));
        if !state.functions.contains_key(function_name) {
            return Err(CloudError::ResourceNotFound(format!(
                "function {}",
                function_name
            )));
        }
        if state.urls.contains_key(function_name) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "url config of {}",
                function_name
            )));
        }

        let url = MemoryUrl {
            url: function_url(function_name),
            invoke_mode,
            auth_type: "NONE".to_string(),
            public: false,
        };
        let description = describe_url(&url);
        state.urls.insert(function_name.to_string(), url);
        Ok(description)
    }

    async fn update_function_url_invoke_mode(
        &self,
        function_name: &str,
        invoke_mode: InvokeMode,
    ) -> Result<UrlDescription> {
        let mut state = self.lock();
        Self::log(
            &mut state,
            format!("update_function_url_invoke_mode {}", function_name),
        );
        let url = state.urls.get_mut(function_name).ok_or_else(|| {
            CloudError::ResourceNotFound(format!("url config of {}", function_name))
        })?;
        url.invoke_mode = invoke_mode;
        Ok(describe_url(url))
    }

    async fn add_public_url_permission(&self, function_name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::log(&mut state, format!("add_public_url_permission {}", function_name));
        let url = state.urls.get_mut(function_name).ok_or_else(|| {
            CloudError::ResourceNotFound(format!("url config of {}", function_name))
        })?;
        if url.public {
            return Err(CloudError::ResourceAlreadyExists(
                "statement FunctionURLAllowPublicAccess".to_string(),
            ));
        }
        url.public = true;
        Ok(())
    }

    async fn publish_layer_version(
        &self,
        spec: &LayerSpec,
        content: &PackageArtifact,
    ) -> Result<String> {
        let mut state = self.lock();
        Self::log(&mut state, format!("publish_layer_version {}", spec.name));
        let versions = state.layers.entry(spec.name.clone()).or_default();
        versions.push(content.len());
        Ok(layer_version_arn(&spec.name, versions.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AttributeType, BillingMode, KeyAttribute};

    fn schema() -> KeySchema {
        KeySchema {
            hash: KeyAttribute::new("session_id", AttributeType::String),
            range: Some(KeyAttribute::new("timestamp", AttributeType::Number)),
        }
    }

    #[tokio::test]
    async fn test_create_reports_already_exists() {
        let plane = InMemoryControlPlane::new();
        plane.create_role("r", "{}").await.unwrap();
        let err = plane.create_role("r", "{}").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(plane.count_calls("create_role"), 2);
    }

    #[tokio::test]
    async fn test_table_reports_creating_then_active() {
        let plane = InMemoryControlPlane::new().with_table_latency(2);
        let spec = TableSpec {
            name: "t".to_string(),
            key_schema: schema(),
            billing_mode: BillingMode::PayPerRequest,
        };
        let created = plane.create_table(&spec).await.unwrap();
        assert_eq!(created.status, TableStatus::Creating);

        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(plane.describe_table("t").await.unwrap().unwrap().status);
        }
        assert_eq!(
            statuses,
            vec![TableStatus::Creating, TableStatus::Creating, TableStatus::Active]
        );
    }

    #[tokio::test]
    async fn test_update_during_update_conflicts() {
        let plane = InMemoryControlPlane::new().with_update_latency(1);
        let role = plane.seed_role("r");
        let config = FunctionConfig {
            handler: "run.sh".to_string(),
            timeout_secs: 30,
            layers: Vec::new(),
            env_vars: BTreeMap::new(),
        };
        plane.seed_function("f", &role, config.clone(), b"old");

        let code = PackageArtifact::new("function.zip", b"new".to_vec(), Vec::new());
        plane.update_function_code("f", &code).await.unwrap();
        let err = plane
            .update_function_configuration("f", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
        assert_eq!(plane.conflicts(), 1);

        // one poll drains the latency
        let polled = plane.get_function("f").await.unwrap().unwrap();
        assert_eq!(polled.last_update, UpdateStatus::InProgress);
        plane
            .update_function_configuration("f", &config)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_and_layer_versions() {
        let plane = InMemoryControlPlane::new();
        plane.seed_table("t", schema(), 7);
        assert_eq!(plane.purge_table_items("t", &schema()).await.unwrap(), 7);
        assert_eq!(plane.table("t").unwrap().items, 0);

        plane.seed_layer("deps", 2);
        let spec = LayerSpec {
            name: "deps".to_string(),
            compatible_runtimes: vec!["python3.12".to_string()],
            architecture: Default::default(),
        };
        let content = PackageArtifact::new("layer.zip", vec![1, 2, 3], Vec::new());
        let arn = plane.publish_layer_version(&spec, &content).await.unwrap();
        assert!(arn.ends_with(":layer:deps:3"));
        assert_eq!(plane.layer_versions("deps"), 3);
    }
}
