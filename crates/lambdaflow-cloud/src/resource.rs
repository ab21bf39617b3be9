//! Desired-state resource declarations
//!
//! A deployment is described by a [`ResourceSet`]: at most one execution role,
//! one session table, one dependency layer, one function and its public URL.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Managed policy that lets a function write its logs
pub const BASIC_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Service principal of the function service
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Kind of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Role,
    InlinePolicy,
    Table,
    Layer,
    Function,
    UrlConfig,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Role => write!(f, "role"),
            ResourceKind::InlinePolicy => write!(f, "inline-policy"),
            ResourceKind::Table => write!(f, "table"),
            ResourceKind::Layer => write!(f, "layer"),
            ResourceKind::Function => write!(f, "function"),
            ResourceKind::UrlConfig => write!(f, "url-config"),
        }
    }
}

/// IAM role the function executes as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,

    /// Trust policy document (who may assume the role)
    pub trust_policy: serde_json::Value,

    /// Managed policies attached right after creation
    pub managed_policy_arns: Vec<String>,

    /// Inline policies, overwritten on every run
    pub inline_policies: Vec<InlinePolicySpec>,
}

impl RoleSpec {
    /// Execution role trusted by the function service, with basic logging rights
    pub fn lambda_execution(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trust_policy: trust_policy_for(&[LAMBDA_SERVICE_PRINCIPAL.to_string()]),
            managed_policy_arns: vec![BASIC_EXECUTION_POLICY_ARN.to_string()],
            inline_policies: Vec::new(),
        }
    }

    pub fn trust_policy_document(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.trust_policy)?)
    }
}

/// Build an assume-role trust policy for the given service principals
pub fn trust_policy_for(services: &[String]) -> serde_json::Value {
    let principal = if services.len() == 1 {
        json!(services[0])
    } else {
        json!(services)
    };

    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": principal },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Which resources an inline policy grants access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// The deployment's table and its indexes
    Table,
    /// Explicit resource ARNs
    Resources(Vec<String>),
}

/// Inline policy attached directly to the role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePolicySpec {
    pub name: String,
    pub actions: Vec<String>,
    pub scope: PolicyScope,
}

impl InlinePolicySpec {
    /// Render the policy document. Table-scoped policies need the table ARN.
    pub fn document(&self, table_arn: Option<&str>) -> Result<String> {
        let resources = match &self.scope {
            PolicyScope::Table => {
                let arn = table_arn.ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "inline policy '{}' targets the table but no table is declared",
                        self.name
                    ))
                })?;
                vec![arn.to_string(), format!("{}/index/*", arn)]
            }
            PolicyScope::Resources(resources) => resources.clone(),
        };

        let document = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": self.actions,
                "Resource": resources
            }]
        });
        Ok(serde_json::to_string(&document)?)
    }
}

/// Scalar type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "S")]
    String,
    #[serde(rename = "N")]
    Number,
    #[serde(rename = "B")]
    Binary,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Binary => "B",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "S" | "STRING" => Some(AttributeType::String),
            "N" | "NUMBER" => Some(AttributeType::Number),
            "B" | "BINARY" => Some(AttributeType::Binary),
            _ => None,
        }
    }
}

/// Named key attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }
}

/// Hash key plus optional range key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub hash: KeyAttribute,
    pub range: Option<KeyAttribute>,
}

impl KeySchema {
    /// Compare key names only; attribute types of an existing table are not
    /// always reported by describe calls.
    pub fn same_keys(&self, other: &KeySchema) -> bool {
        self.hash.name == other.hash.name
            && self.range.as_ref().map(|r| &r.name) == other.range.as_ref().map(|r| &r.name)
    }
}

impl fmt::Display for KeySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash.name, self.hash.attribute_type.as_str())?;
        if let Some(range) = &self.range {
            write!(f, " + {}:{}", range.name, range.attribute_type.as_str())?;
        }
        Ok(())
    }
}

/// Table capacity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    PayPerRequest,
    Provisioned { read: i64, write: i64 },
}

/// Table holding the server's session messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub key_schema: KeySchema,
    pub billing_mode: BillingMode,
}

/// CPU architecture of the function and its layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "x86_64" | "amd64" => Some(Architecture::X86_64),
            "arm64" | "aarch64" => Some(Architecture::Arm64),
            _ => None,
        }
    }
}

/// Lambda function declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub architecture: Architecture,
    pub env_vars: BTreeMap<String, String>,

    /// Layers attached besides the deployment's own dependency layer
    pub extra_layers: Vec<String>,
}

impl FunctionSpec {
    /// The configuration the function should converge to
    pub fn configuration(&self, layer_arn: Option<&str>) -> FunctionConfig {
        let mut layers = self.extra_layers.clone();
        if let Some(arn) = layer_arn {
            layers.push(arn.to_string());
        }

        FunctionConfig {
            handler: self.handler.clone(),
            timeout_secs: self.timeout_secs,
            layers,
            env_vars: self.env_vars.clone(),
        }
    }
}

/// Fields touched by a configuration update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub handler: String,
    pub timeout_secs: u32,
    pub layers: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
}

/// Dependency layer declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub compatible_runtimes: Vec<String>,
    pub architecture: Architecture,
}

/// How a function URL delivers responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvokeMode {
    #[default]
    Buffered,
    ResponseStream,
}

impl InvokeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvokeMode::Buffered => "BUFFERED",
            InvokeMode::ResponseStream => "RESPONSE_STREAM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().replace('-', "_").as_str() {
            "BUFFERED" => Some(InvokeMode::Buffered),
            "RESPONSE_STREAM" | "STREAM" | "STREAMING" => Some(InvokeMode::ResponseStream),
            _ => None,
        }
    }
}

impl fmt::Display for InvokeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public URL of the function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlSpec {
    pub invoke_mode: InvokeMode,
}

/// A named resource with its desired configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Role(RoleSpec),
    Table(TableSpec),
    Layer(LayerSpec),
    Function(FunctionSpec),
    UrlConfig { function: String, spec: UrlSpec },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Role(_) => ResourceKind::Role,
            ResourceSpec::Table(_) => ResourceKind::Table,
            ResourceSpec::Layer(_) => ResourceKind::Layer,
            ResourceSpec::Function(_) => ResourceKind::Function,
            ResourceSpec::UrlConfig { .. } => ResourceKind::UrlConfig,
        }
    }

    /// Identifying key, unique per kind
    pub fn key(&self) -> &str {
        match self {
            ResourceSpec::Role(role) => &role.name,
            ResourceSpec::Table(table) => &table.name,
            ResourceSpec::Layer(layer) => &layer.name,
            ResourceSpec::Function(function) => &function.name,
            ResourceSpec::UrlConfig { function, .. } => function,
        }
    }

    /// Full resource key (kind:key)
    pub fn full_key(&self) -> String {
        format!("{}:{}", self.kind(), self.key())
    }
}

/// Set of resources making up one deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    resources: Vec<ResourceSpec>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource. Each kind may appear once.
    pub fn add(&mut self, resource: ResourceSpec) -> Result<()> {
        if let Some(existing) = self.resources.iter().find(|r| r.kind() == resource.kind()) {
            return Err(CloudError::InvalidConfig(format!(
                "{} declared twice ('{}' and '{}')",
                resource.kind(),
                existing.key(),
                resource.key()
            )));
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn role(&self) -> Option<&RoleSpec> {
        self.resources.iter().find_map(|r| match r {
            ResourceSpec::Role(role) => Some(role),
            _ => None,
        })
    }

    pub fn table(&self) -> Option<&TableSpec> {
        self.resources.iter().find_map(|r| match r {
            ResourceSpec::Table(table) => Some(table),
            _ => None,
        })
    }

    pub fn layer(&self) -> Option<&LayerSpec> {
        self.resources.iter().find_map(|r| match r {
            ResourceSpec::Layer(layer) => Some(layer),
            _ => None,
        })
    }

    pub fn function(&self) -> Option<&FunctionSpec> {
        self.resources.iter().find_map(|r| match r {
            ResourceSpec::Function(function) => Some(function),
            _ => None,
        })
    }

    pub fn url(&self) -> Option<&UrlSpec> {
        self.resources.iter().find_map(|r| match r {
            ResourceSpec::UrlConfig { spec, .. } => Some(spec),
            _ => None,
        })
    }

    /// Check cross-resource references
    pub fn validate(&self) -> Result<()> {
        if self.function().is_some() && self.role().is_none() {
            return Err(CloudError::InvalidConfig(
                "a function needs a role to execute as".to_string(),
            ));
        }

        if let Some(ResourceSpec::UrlConfig { function, .. }) = self
            .resources
            .iter()
            .find(|r| r.kind() == ResourceKind::UrlConfig)
        {
            match self.function() {
                Some(f) if &f.name == function => {}
                _ => {
                    return Err(CloudError::InvalidConfig(format!(
                        "url refers to undeclared function '{}'",
                        function
                    )));
                }
            }
        }

        if let Some(role) = self.role() {
            let needs_table = role
                .inline_policies
                .iter()
                .any(|p| p.scope == PolicyScope::Table);
            if needs_table && self.table().is_none() {
                return Err(CloudError::InvalidConfig(format!(
                    "role '{}' has a table-scoped policy but no table is declared",
                    role.name
                )));
            }
        }

        Ok(())
    }
}

/// Deterministic archive used as the payload of one remote call
#[derive(Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    /// File name of the archive (e.g. "function.zip")
    pub name: String,

    /// Archive bytes
    pub bytes: Vec<u8>,

    /// Entry paths in archive order
    pub entries: Vec<String>,
}

impl PackageArtifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, entries: Vec<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PackageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageArtifact")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_table() -> TableSpec {
        TableSpec {
            name: "mcp-sessions".to_string(),
            key_schema: KeySchema {
                hash: KeyAttribute::new("session_id", AttributeType::String),
                range: Some(KeyAttribute::new("timestamp", AttributeType::Number)),
            },
            billing_mode: BillingMode::PayPerRequest,
        }
    }

    #[test]
    fn test_trust_policy_single_service() {
        let role = RoleSpec::lambda_execution("mcp-role");
        let doc = role.trust_policy_document().unwrap();
        assert!(doc.contains("\"Service\":\"lambda.amazonaws.com\""));
        assert!(doc.contains("sts:AssumeRole"));
        assert_eq!(role.managed_policy_arns, vec![BASIC_EXECUTION_POLICY_ARN]);
    }

    #[test]
    fn test_table_scoped_policy_document() {
        let policy = InlinePolicySpec {
            name: "sessions".to_string(),
            actions: vec!["dynamodb:PutItem".to_string(), "dynamodb:Query".to_string()],
            scope: PolicyScope::Table,
        };

        let doc = policy
            .document(Some("arn:aws:dynamodb:us-east-1:123:table/mcp-sessions"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        let resources = &value["Statement"][0]["Resource"];
        assert_eq!(resources[0], "arn:aws:dynamodb:us-east-1:123:table/mcp-sessions");
        assert_eq!(
            resources[1],
            "arn:aws:dynamodb:us-east-1:123:table/mcp-sessions/index/*"
        );

        assert!(policy.document(None).is_err());
    }

    #[test]
    fn test_key_schema_display_and_compare() {
        let schema = session_table().key_schema;
        assert_eq!(schema.to_string(), "session_id:S + timestamp:N");

        let hash_only = KeySchema {
            hash: KeyAttribute::new("session_id", AttributeType::String),
            range: None,
        };
        assert!(!schema.same_keys(&hash_only));
        assert!(schema.same_keys(&schema.clone()));
    }

    #[test]
    fn test_function_configuration_appends_layer() {
        let function = FunctionSpec {
            name: "mcp-server".to_string(),
            runtime: "python3.12".to_string(),
            handler: "run.sh".to_string(),
            timeout_secs: 300,
            memory_mb: 512,
            architecture: Architecture::X86_64,
            env_vars: BTreeMap::new(),
            extra_layers: vec!["arn:adapter".to_string()],
        };

        let config = function.configuration(Some("arn:deps:3"));
        assert_eq!(config.layers, vec!["arn:adapter", "arn:deps:3"]);
        assert_eq!(function.configuration(None).layers, vec!["arn:adapter"]);
    }

    #[test]
    fn test_resource_set_rejects_duplicate_kind() {
        let mut set = ResourceSet::new();
        set.add(ResourceSpec::Table(session_table())).unwrap();
        let err = set.add(ResourceSpec::Table(session_table())).unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[test]
    fn test_resource_set_validate_requires_role_for_function() {
        let mut set = ResourceSet::new();
        set.add(ResourceSpec::Function(FunctionSpec {
            name: "f".to_string(),
            runtime: "python3.12".to_string(),
            handler: "run.sh".to_string(),
            timeout_secs: 30,
            memory_mb: 128,
            architecture: Architecture::X86_64,
            env_vars: BTreeMap::new(),
            extra_layers: Vec::new(),
        }))
        .unwrap();
        assert!(set.validate().is_err());

        set.add(ResourceSpec::Role(RoleSpec::lambda_execution("r")))
            .unwrap();
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_invoke_mode_parse() {
        assert_eq!(InvokeMode::parse("response_stream"), Some(InvokeMode::ResponseStream));
        assert_eq!(InvokeMode::parse("BUFFERED"), Some(InvokeMode::Buffered));
        assert_eq!(InvokeMode::parse("sometimes"), None);
    }
}
