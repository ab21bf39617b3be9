//! KDL manifest parsing
//!
//! ```kdl
//! project "mcp-server"
//! region "${AWS_REGION:-us-east-1}"
//!
//! role "mcp-server-role" {
//!     inline-policy "sessions" {
//!         actions "dynamodb:GetItem" "dynamodb:PutItem" "dynamodb:Query"
//!         resources "table"
//!     }
//! }
//!
//! table "mcp-sessions" {
//!     hash-key "session_id" type="S"
//!     range-key "timestamp" type="N"
//! }
//!
//! layer "mcp-deps" {
//!     requirements "requirements.txt"
//! }
//!
//! function "mcp-server" {
//!     timeout 300
//!     sources "server.py" "app"
//!     env {
//!         TABLE_NAME "mcp-sessions"
//!     }
//!     launcher app="server:app" workers=2
//!     url invoke-mode="RESPONSE_STREAM"
//! }
//! ```

use crate::environment::DeploymentEnvironment;
use crate::error::{ConfigError, Result};
use crate::template::expand;
use kdl::{KdlDocument, KdlNode, KdlValue};
use lambdaflow_build::{DependencyInstaller, FunctionPackage, LayerPackage, Launcher, TargetPlatform};
use lambdaflow_cloud::{
    Architecture, AttributeType, BillingMode, FunctionSpec, InlinePolicySpec, InvokeMode,
    KeyAttribute, KeySchema, LayerSpec, PolicyScope, ResourceSet, ResourceSpec, RoleSpec,
    TableSpec, UrlSpec, trust_policy_for,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_RUNTIME: &str = "python3.12";
pub const DEFAULT_HANDLER: &str = "run.sh";
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;
pub const DEFAULT_MEMORY_MB: u32 = 512;
const DEFAULT_SOURCES: &str = "*.py";

/// Everything a manifest declares
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub project: String,
    pub region: Option<String>,
    pub resources: ResourceSet,
    pub function_package: Option<FunctionPackage>,
    pub layer_package: Option<LayerPackage>,
}

/// Layer settings that depend on the function, resolved after all nodes are read
struct PendingLayer {
    spec: LayerSpec,
    architecture: Option<Architecture>,
    requirements: PathBuf,
    pip: Option<String>,
    python_version: Option<String>,
    platform: Option<String>,
}

pub fn parse_manifest(
    content: &str,
    default_project: String,
    env: &DeploymentEnvironment,
) -> Result<ParsedManifest> {
    let doc: KdlDocument = content.parse()?;
    let reader = NodeReader { env };

    let mut project = default_project;
    let mut region = None;
    let mut resources = ResourceSet::new();
    let mut function_package = None;
    let mut layer = None;

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                project = reader.required_string(node, "project requires a name")?;
            }
            "region" => {
                region = reader.first_string(node)?;
            }
            "role" => {
                resources.add(ResourceSpec::Role(reader.role(node)?))?;
            }
            "table" => {
                resources.add(ResourceSpec::Table(reader.table(node)?))?;
            }
            "layer" => {
                layer = Some(reader.layer(node)?);
            }
            "function" => {
                let (function, package, url) = reader.function(node)?;
                if let Some(url) = url {
                    resources.add(ResourceSpec::UrlConfig {
                        function: function.name.clone(),
                        spec: url,
                    })?;
                }
                resources.add(ResourceSpec::Function(function))?;
                function_package = Some(package);
            }
            other => {
                warn!(node = %other, "Ignoring unknown manifest node");
            }
        }
    }

    let layer_package = match layer {
        Some(pending) => {
            let (spec, package) = resolve_layer(pending, resources.function());
            resources.add(ResourceSpec::Layer(spec))?;
            Some(package)
        }
        None => None,
    };

    resources.validate()?;

    Ok(ParsedManifest {
        project,
        region,
        resources,
        function_package,
        layer_package,
    })
}

/// Fill layer defaults from the function it serves
fn resolve_layer(pending: PendingLayer, function: Option<&FunctionSpec>) -> (LayerSpec, LayerPackage) {
    let PendingLayer {
        mut spec,
        architecture,
        requirements,
        pip,
        python_version,
        platform,
    } = pending;

    if spec.compatible_runtimes.is_empty() {
        let runtime = function
            .map(|f| f.runtime.clone())
            .unwrap_or_else(|| DEFAULT_RUNTIME.to_string());
        spec.compatible_runtimes.push(runtime);
    }
    spec.architecture = match (architecture, function) {
        (Some(architecture), _) => architecture,
        (None, Some(function)) => function.architecture,
        (None, None) => Architecture::default(),
    };
    if let Some(function) = function {
        if spec.architecture != function.architecture {
            warn!(
                layer = %spec.name,
                function = %function.name,
                "Layer architecture differs from the function's"
            );
        }
    }

    let mut target = TargetPlatform::default();
    if let Some(version) = python_version.or_else(|| {
        spec.compatible_runtimes
            .first()
            .and_then(|r| r.strip_prefix("python"))
            .map(str::to_string)
    }) {
        target.python_version = version;
    }
    target.platform = platform.unwrap_or_else(|| match spec.architecture {
        Architecture::X86_64 => "manylinux2014_x86_64".to_string(),
        Architecture::Arm64 => "manylinux2014_aarch64".to_string(),
    });

    let mut installer = DependencyInstaller {
        target,
        ..Default::default()
    };
    if let Some(pip) = pip {
        installer.pip = pip;
    }

    (
        spec,
        LayerPackage {
            requirements,
            installer,
        },
    )
}

struct NodeReader<'a> {
    env: &'a DeploymentEnvironment,
}

impl NodeReader<'_> {
    fn expand(&self, value: &str) -> Result<String> {
        expand(value, self.env)
    }

    /// Positional arguments
    fn args<'n>(node: &'n KdlNode) -> impl Iterator<Item = &'n KdlValue> {
        node.entries()
            .iter()
            .filter(|e| e.name().is_none())
            .map(|e| e.value())
    }

    fn prop<'n>(node: &'n KdlNode, key: &str) -> Option<&'n KdlValue> {
        node.entries()
            .iter()
            .find(|e| e.name().is_some_and(|n| n.value() == key))
            .map(|e| e.value())
    }

    fn string_value(&self, node: &KdlNode, value: &KdlValue) -> Result<String> {
        match value.as_string() {
            Some(s) => self.expand(s),
            None => Err(ConfigError::InvalidManifest(format!(
                "{} expects a string, got {}",
                node.name().value(),
                value
            ))),
        }
    }

    fn first_string(&self, node: &KdlNode) -> Result<Option<String>> {
        Self::args(node)
            .next()
            .map(|v| self.string_value(node, v))
            .transpose()
    }

    fn required_string(&self, node: &KdlNode, message: &str) -> Result<String> {
        self.first_string(node)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::InvalidManifest(message.to_string()))
    }

    fn strings(&self, node: &KdlNode) -> Result<Vec<String>> {
        Self::args(node)
            .map(|v| self.string_value(node, v))
            .collect()
    }

    fn prop_string(&self, node: &KdlNode, key: &str) -> Result<Option<String>> {
        Self::prop(node, key)
            .map(|v| self.string_value(node, v))
            .transpose()
    }

    /// Integers may also be given as strings so they can come from variables
    fn integer_value(&self, node: &KdlNode, value: &KdlValue) -> Result<i128> {
        if let Some(i) = value.as_integer() {
            return Ok(i);
        }
        let text = self.string_value(node, value)?;
        text.trim().parse().map_err(|_| {
            ConfigError::InvalidManifest(format!(
                "{} expects an integer, got '{}'",
                node.name().value(),
                text
            ))
        })
    }

    fn number<T: TryFrom<i128>>(&self, node: &KdlNode, value: &KdlValue) -> Result<T> {
        let i = self.integer_value(node, value)?;
        T::try_from(i).map_err(|_| {
            ConfigError::InvalidManifest(format!("{} is out of range: {}", node.name().value(), i))
        })
    }

    fn first_number<T: TryFrom<i128>>(&self, node: &KdlNode) -> Result<T> {
        let value = Self::args(node).next().ok_or_else(|| {
            ConfigError::InvalidManifest(format!("{} requires a value", node.name().value()))
        })?;
        self.number(node, value)
    }

    fn prop_number<T: TryFrom<i128>>(&self, node: &KdlNode, key: &str) -> Result<Option<T>> {
        Self::prop(node, key)
            .map(|v| self.number(node, v))
            .transpose()
    }

    fn architecture(&self, node: &KdlNode) -> Result<Architecture> {
        let value = self.required_string(node, "architecture requires a value")?;
        Architecture::parse(&value).ok_or_else(|| {
            ConfigError::InvalidManifest(format!("unknown architecture '{}'", value))
        })
    }

    fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
        node.children().into_iter().flat_map(|doc| doc.nodes().iter())
    }

    fn role(&self, node: &KdlNode) -> Result<RoleSpec> {
        let name = self.required_string(node, "role requires a name")?;
        let mut role = RoleSpec::lambda_execution(name);
        let mut trusted: Vec<String> = Vec::new();

        for child in Self::children(node) {
            match child.name().value() {
                "trust" => trusted.extend(self.strings(child)?),
                "managed-policy" | "managed_policy" => {
                    for arn in self.strings(child)? {
                        if !role.managed_policy_arns.contains(&arn) {
                            role.managed_policy_arns.push(arn);
                        }
                    }
                }
                "inline-policy" | "inline_policy" => {
                    role.inline_policies.push(self.inline_policy(child)?);
                }
                other => warn!(role = %role.name, node = %other, "Ignoring unknown role setting"),
            }
        }

        if !trusted.is_empty() {
            role.trust_policy = trust_policy_for(&trusted);
        }
        Ok(role)
    }

    fn inline_policy(&self, node: &KdlNode) -> Result<InlinePolicySpec> {
        let name = self.required_string(node, "inline-policy requires a name")?;
        let mut actions = Vec::new();
        let mut scope = None;

        for child in Self::children(node) {
            match child.name().value() {
                "actions" | "action" => actions.extend(self.strings(child)?),
                "resources" | "resource" => {
                    let resources = self.strings(child)?;
                    scope = Some(if resources == ["table"] {
                        PolicyScope::Table
                    } else {
                        PolicyScope::Resources(resources)
                    });
                }
                other => warn!(policy = %name, node = %other, "Ignoring unknown policy setting"),
            }
        }

        if actions.is_empty() {
            return Err(ConfigError::InvalidManifest(format!(
                "inline-policy '{}' grants no actions",
                name
            )));
        }

        Ok(InlinePolicySpec {
            name,
            actions,
            scope: scope.unwrap_or(PolicyScope::Table),
        })
    }

    fn key_attribute(&self, node: &KdlNode) -> Result<KeyAttribute> {
        let name = self.required_string(node, "key attribute requires a name")?;
        let attribute_type = match self.prop_string(node, "type")? {
            Some(t) => AttributeType::parse(&t).ok_or_else(|| {
                ConfigError::InvalidManifest(format!("unknown attribute type '{}' for {}", t, name))
            })?,
            None => AttributeType::String,
        };
        Ok(KeyAttribute::new(name, attribute_type))
    }

    fn table(&self, node: &KdlNode) -> Result<TableSpec> {
        let name = self.required_string(node, "table requires a name")?;
        let mut hash = None;
        let mut range = None;
        let mut billing_mode = BillingMode::PayPerRequest;

        for child in Self::children(node) {
            match child.name().value() {
                "hash-key" | "hash_key" | "partition-key" => hash = Some(self.key_attribute(child)?),
                "range-key" | "range_key" | "sort-key" => range = Some(self.key_attribute(child)?),
                "billing" => {
                    let mode = self.required_string(child, "billing requires a mode")?;
                    billing_mode = match mode.as_str() {
                        "pay-per-request" | "on-demand" => BillingMode::PayPerRequest,
                        "provisioned" => BillingMode::Provisioned {
                            read: self.prop_number(child, "read")?.unwrap_or(5),
                            write: self.prop_number(child, "write")?.unwrap_or(5),
                        },
                        other => {
                            return Err(ConfigError::InvalidManifest(format!(
                                "unknown billing mode '{}'",
                                other
                            )));
                        }
                    };
                }
                other => warn!(table = %name, node = %other, "Ignoring unknown table setting"),
            }
        }

        let hash = hash.ok_or_else(|| {
            ConfigError::InvalidManifest(format!("table '{}' requires a hash-key", name))
        })?;

        Ok(TableSpec {
            name,
            key_schema: KeySchema { hash, range },
            billing_mode,
        })
    }

    fn layer(&self, node: &KdlNode) -> Result<PendingLayer> {
        let name = self.required_string(node, "layer requires a name")?;
        let mut pending = PendingLayer {
            spec: LayerSpec {
                name,
                compatible_runtimes: Vec::new(),
                architecture: Architecture::default(),
            },
            architecture: None,
            requirements: PathBuf::from("requirements.txt"),
            pip: None,
            python_version: None,
            platform: None,
        };

        for child in Self::children(node) {
            match child.name().value() {
                "runtimes" | "runtime" => pending.spec.compatible_runtimes = self.strings(child)?,
                "architecture" => pending.architecture = Some(self.architecture(child)?),
                "requirements" => {
                    pending.requirements =
                        PathBuf::from(self.required_string(child, "requirements requires a path")?);
                }
                "pip" => pending.pip = self.first_string(child)?,
                "python-version" | "python_version" => {
                    pending.python_version = self.first_string(child)?;
                }
                "platform" => pending.platform = self.first_string(child)?,
                other => {
                    warn!(layer = %pending.spec.name, node = %other, "Ignoring unknown layer setting")
                }
            }
        }

        Ok(pending)
    }

    fn launcher(&self, node: &KdlNode) -> Result<Launcher> {
        let mut launcher = Launcher::default();
        if let Some(app) = self.prop_string(node, "app")? {
            launcher.app = app;
        }
        if let Some(port) = self.prop_number(node, "port")? {
            launcher.port = port;
        }
        if let Some(workers) = self.prop_number(node, "workers")? {
            launcher.workers = workers;
        }
        if let Some(path) = self.prop_string(node, "library-path")? {
            launcher.library_path = path;
        }
        if let Some(python) = self.prop_string(node, "python")? {
            launcher.python = python;
        }
        launcher
            .validate()
            .map_err(|e| ConfigError::InvalidManifest(e.to_string()))?;
        Ok(launcher)
    }

    fn function(&self, node: &KdlNode) -> Result<(FunctionSpec, FunctionPackage, Option<UrlSpec>)> {
        let name = self.required_string(node, "function requires a name")?;
        let mut function = FunctionSpec {
            name,
            runtime: DEFAULT_RUNTIME.to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            memory_mb: DEFAULT_MEMORY_MB,
            architecture: Architecture::default(),
            env_vars: BTreeMap::new(),
            extra_layers: Vec::new(),
        };
        let mut sources = Vec::new();
        let mut launcher = None;
        let mut url = None;

        for child in Self::children(node) {
            match child.name().value() {
                "runtime" => function.runtime = self.required_string(child, "runtime requires a value")?,
                "handler" => function.handler = self.required_string(child, "handler requires a value")?,
                "timeout" => function.timeout_secs = self.first_number(child)?,
                "memory" | "memory-size" => function.memory_mb = self.first_number(child)?,
                "architecture" => function.architecture = self.architecture(child)?,
                "sources" | "source" => sources.extend(self.strings(child)?),
                "layers" | "layer" => function.extra_layers.extend(self.strings(child)?),
                "env" | "environment" => {
                    for var in Self::children(child) {
                        let value = self.first_string(var)?.unwrap_or_default();
                        function.env_vars.insert(var.name().value().to_string(), value);
                    }
                }
                "launcher" => launcher = Some(self.launcher(child)?),
                "url" => {
                    let mode = self
                        .prop_string(child, "invoke-mode")?
                        .or(self.first_string(child)?);
                    let invoke_mode = match mode {
                        Some(m) => InvokeMode::parse(&m).ok_or_else(|| {
                            ConfigError::InvalidManifest(format!("unknown invoke mode '{}'", m))
                        })?,
                        None => InvokeMode::default(),
                    };
                    url = Some(UrlSpec { invoke_mode });
                }
                other => {
                    warn!(function = %function.name, node = %other, "Ignoring unknown function setting")
                }
            }
        }

        if function.timeout_secs == 0 || function.timeout_secs > 900 {
            return Err(ConfigError::InvalidManifest(format!(
                "function '{}' timeout must be between 1 and 900 seconds",
                function.name
            )));
        }

        if sources.is_empty() {
            sources.push(DEFAULT_SOURCES.to_string());
        }
        // The default handler is the generated launcher
        if launcher.is_none() && function.handler == DEFAULT_HANDLER {
            launcher = Some(Launcher::default());
        }

        Ok((function, FunctionPackage { sources, launcher }, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(kdl: &str) -> Result<ParsedManifest> {
        parse_manifest(kdl, "fallback".to_string(), &DeploymentEnvironment::empty(".env"))
    }

    const FULL: &str = r#"
project "mcp-server"
region "us-east-1"

role "mcp-server-role" {
    managed-policy "arn:aws:iam::aws:policy/AWSXRayDaemonWriteAccess"
    inline-policy "sessions" {
        actions "dynamodb:GetItem" "dynamodb:PutItem" "dynamodb:Query"
        resources "table"
    }
}

table "mcp-sessions" {
    hash-key "session_id" type="S"
    range-key "timestamp" type="N"
}

layer "mcp-deps" {
    requirements "requirements.txt"
}

function "mcp-server" {
    timeout 300
    memory 1024
    sources "server.py" "app"
    layers "arn:aws:lambda:us-east-1:753240598075:layer:LambdaAdapterLayerX86:23"
    env {
        TABLE_NAME "mcp-sessions"
        AWS_LAMBDA_EXEC_WRAPPER "/opt/bootstrap"
    }
    launcher app="server:app" workers=2
    url invoke-mode="RESPONSE_STREAM"
}
"#;

    #[test]
    fn test_parse_full_manifest() {
        let parsed = parse(FULL).unwrap();
        assert_eq!(parsed.project, "mcp-server");
        assert_eq!(parsed.region.as_deref(), Some("us-east-1"));
        assert_eq!(parsed.resources.len(), 5);

        let role = parsed.resources.role().unwrap();
        assert_eq!(role.managed_policy_arns.len(), 2);
        assert_eq!(role.inline_policies[0].scope, PolicyScope::Table);

        let table = parsed.resources.table().unwrap();
        assert_eq!(table.key_schema.to_string(), "session_id:S + timestamp:N");
        assert_eq!(table.billing_mode, BillingMode::PayPerRequest);

        let function = parsed.resources.function().unwrap();
        assert_eq!(function.handler, "run.sh");
        assert_eq!(function.memory_mb, 1024);
        assert_eq!(function.env_vars["TABLE_NAME"], "mcp-sessions");
        assert_eq!(function.extra_layers.len(), 1);

        let url = parsed.resources.url().unwrap();
        assert_eq!(url.invoke_mode, InvokeMode::ResponseStream);

        let package = parsed.function_package.unwrap();
        assert_eq!(package.sources, vec!["server.py", "app"]);
        assert_eq!(package.launcher.unwrap().workers, 2);
    }

    #[test]
    fn test_layer_defaults_follow_function() {
        let parsed = parse(FULL).unwrap();
        let layer = parsed.resources.layer().unwrap();
        assert_eq!(layer.compatible_runtimes, vec!["python3.12"]);

        let package = parsed.layer_package.unwrap();
        assert_eq!(package.requirements, PathBuf::from("requirements.txt"));
        assert_eq!(package.installer.target.python_version, "3.12");
        assert_eq!(package.installer.target.platform, "manylinux2014_x86_64");
    }

    #[test]
    fn test_arm_layer_targets_aarch64() {
        let parsed = parse(
            r#"
layer "deps" {
    runtimes "python3.11"
    architecture "arm64"
}
"#,
        )
        .unwrap();
        let package = parsed.layer_package.unwrap();
        assert_eq!(package.installer.target.platform, "manylinux2014_aarch64");
        assert_eq!(package.installer.target.python_version, "3.11");
    }

    #[test]
    fn test_bare_layer_takes_function_architecture() {
        let parsed = parse(
            r#"
layer "deps"

role "mcp-server-role"

function "mcp-server" {
    architecture "arm64"
}
"#,
        )
        .unwrap();
        let layer = parsed.resources.layer().unwrap();
        assert_eq!(layer.architecture, Architecture::Arm64);

        let package = parsed.layer_package.unwrap();
        assert_eq!(package.installer.target.platform, "manylinux2014_aarch64");
    }

    #[test]
    fn test_function_requires_role() {
        let result = parse(r#"function "mcp-server""#);
        assert!(matches!(result, Err(ConfigError::Cloud(_))));
    }

    #[test]
    fn test_table_requires_hash_key() {
        let result = parse(r#"table "mcp-sessions" { billing "on-demand" }"#);
        assert!(matches!(result, Err(ConfigError::InvalidManifest(m)) if m.contains("hash-key")));
    }

    #[test]
    fn test_provisioned_billing() {
        let parsed = parse(
            r#"
table "mcp-sessions" {
    hash-key "session_id"
    billing "provisioned" read=10 write=2
}
"#,
        )
        .unwrap();
        assert_eq!(
            parsed.resources.table().unwrap().billing_mode,
            BillingMode::Provisioned { read: 10, write: 2 }
        );
    }

    #[test]
    fn test_variables_are_expanded() {
        let mut env = DeploymentEnvironment::empty(".env");
        env.set("STAGE", "prod");
        env.set("TIMEOUT", "120");

        let parsed = parse_manifest(
            r#"
role "mcp-${STAGE}-role"
function "mcp-${STAGE}" {
    timeout "${TIMEOUT}"
    env {
        TABLE_NAME "${TABLE_NAME:-mcp-sessions}"
    }
}
"#,
            "fallback".to_string(),
            &env,
        )
        .unwrap();

        let function = parsed.resources.function().unwrap();
        assert_eq!(function.name, "mcp-prod");
        assert_eq!(function.timeout_secs, 120);
        assert_eq!(function.env_vars["TABLE_NAME"], "mcp-sessions");
        assert_eq!(parsed.resources.role().unwrap().name, "mcp-prod-role");
    }

    #[test]
    fn test_unresolved_variable_fails() {
        let result = parse(r#"project "${LAMBDAFLOW_TEST_UNSET_PROJECT}""#);
        assert!(matches!(result, Err(ConfigError::UnresolvedVariable { .. })));
    }

    #[test]
    fn test_default_launcher_and_sources() {
        let parsed = parse(
            r#"
role "r"
function "f"
"#,
        )
        .unwrap();
        assert_eq!(parsed.project, "fallback");
        let package = parsed.function_package.unwrap();
        assert_eq!(package.sources, vec!["*.py"]);
        assert_eq!(package.launcher, Some(Launcher::default()));
        assert!(parsed.resources.url().is_none());
    }

    #[test]
    fn test_custom_handler_has_no_launcher() {
        let parsed = parse(
            r#"
role "r"
function "f" { handler "app.handler"; }
"#,
        )
        .unwrap();
        assert!(parsed.function_package.unwrap().launcher.is_none());
    }

    #[test]
    fn test_invalid_timeout() {
        let result = parse(
            r#"
role "r"
function "f" { timeout 3600; }
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidManifest(_))));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let result = parse(
            r#"
table "a" { hash-key "id"; }
table "b" { hash-key "id"; }
"#,
        );
        assert!(matches!(result, Err(ConfigError::Cloud(_))));
    }
}
