use lambdaflow_cloud::{
    ActionType, Architecture, Artifacts, AttributeType, BillingMode, CloudError, DeployOptions,
    FunctionConfig, FunctionSpec, InMemoryControlPlane, InlinePolicySpec, InvokeMode,
    KeyAttribute, KeySchema, LAMBDA_URL_KEY, LAYER_ARN_KEY, LayerSpec, PackageArtifact,
    PolicyScope, Provisioner, ProvisionerOptions, ResourceKind, ResourceSet, ResourceSpec,
    RetryConfig, RoleSpec, StepId, TableSpec, UrlSpec, Workflow,
};
use lambdaflow_cloud::ControlPlane;
use std::collections::BTreeMap;

const ADAPTER_LAYER: &str = "arn:aws:lambda:us-east-1:753240598075:layer:LambdaAdapterLayerX86:24";

fn session_schema() -> KeySchema {
    KeySchema {
        hash: KeyAttribute::new("session_id", AttributeType::String),
        range: Some(KeyAttribute::new("timestamp", AttributeType::Number)),
    }
}

fn function_spec() -> FunctionSpec {
    let mut env_vars = BTreeMap::new();
    env_vars.insert("AWS_LWA_PORT".to_string(), "8080".to_string());
    env_vars.insert("SESSION_TABLE".to_string(), "mcp-sessions".to_string());

    FunctionSpec {
        name: "mcp-server".to_string(),
        runtime: "python3.12".to_string(),
        handler: "run.sh".to_string(),
        timeout_secs: 300,
        memory_mb: 512,
        architecture: Architecture::X86_64,
        env_vars,
        extra_layers: vec![ADAPTER_LAYER.to_string()],
    }
}

fn resources(invoke_mode: InvokeMode) -> ResourceSet {
    let mut role = RoleSpec::lambda_execution("mcp-server-role");
    role.inline_policies.push(InlinePolicySpec {
        name: "sessions-access".to_string(),
        actions: vec![
            "dynamodb:PutItem".to_string(),
            "dynamodb:Query".to_string(),
            "dynamodb:DeleteItem".to_string(),
        ],
        scope: PolicyScope::Table,
    });

    let mut set = ResourceSet::new();
    set.add(ResourceSpec::Role(role)).unwrap();
    set.add(ResourceSpec::Table(TableSpec {
        name: "mcp-sessions".to_string(),
        key_schema: session_schema(),
        billing_mode: BillingMode::PayPerRequest,
    }))
    .unwrap();
    set.add(ResourceSpec::Layer(LayerSpec {
        name: "mcp-deps".to_string(),
        compatible_runtimes: vec!["python3.12".to_string()],
        architecture: Architecture::X86_64,
    }))
    .unwrap();
    set.add(ResourceSpec::Function(function_spec())).unwrap();
    set.add(ResourceSpec::UrlConfig {
        function: "mcp-server".to_string(),
        spec: UrlSpec { invoke_mode },
    })
    .unwrap();
    set
}

fn fast() -> ProvisionerOptions {
    ProvisionerOptions {
        polling: RetryConfig::immediate(20),
        propagation: RetryConfig::immediate(5),
        allow_schema_drift: false,
    }
}

fn options(publish_layer: bool, known_layer_arn: Option<&str>) -> DeployOptions {
    DeployOptions {
        publish_layer,
        known_layer_arn: known_layer_arn.map(str::to_string),
        provisioner: fast(),
    }
}

fn artifacts(code: &[u8]) -> Artifacts {
    Artifacts {
        function: Some(PackageArtifact::new(
            "function.zip",
            code.to_vec(),
            vec!["run.sh".to_string()],
        )),
        layer: Some(PackageArtifact::new(
            "layer.zip",
            b"deps".to_vec(),
            vec!["python/".to_string()],
        )),
    }
}

fn busy_plane() -> InMemoryControlPlane {
    InMemoryControlPlane::new()
        .with_update_latency(2)
        .with_table_latency(2)
        .with_role_propagation(2)
}

#[tokio::test]
async fn test_empty_account_single_run() {
    let plane = busy_plane();
    let set = resources(InvokeMode::ResponseStream);

    let workflow = Workflow::new(&plane, &set, options(false, None)).unwrap();
    let outcome = workflow.deploy(artifacts(b"v1")).await.unwrap();

    let role = plane.role("mcp-server-role").unwrap();
    assert_eq!(
        role.managed_policies,
        vec!["arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"]
    );
    let table = plane.table("mcp-sessions").unwrap();
    assert_eq!(table.key_schema, session_schema());
    assert!(role.inline_policies["sessions-access"].contains(&table.arn));

    assert_eq!(plane.layer_versions("mcp-deps"), 1);
    let layer_arn = outcome.layer_arn.clone().unwrap();
    assert!(layer_arn.ends_with(":layer:mcp-deps:1"));

    let function = plane.function("mcp-server").unwrap();
    assert_eq!(function.code, b"v1");
    assert_eq!(function.config.layers, vec![ADAPTER_LAYER.to_string(), layer_arn.clone()]);
    assert_eq!(function.role_arn, role.arn);

    let url = plane.url("mcp-server").unwrap();
    assert_eq!(url.invoke_mode, InvokeMode::ResponseStream);
    assert_eq!(url.auth_type, "NONE");
    assert!(url.public);

    // two rejections while the role propagated, then success
    assert_eq!(plane.count_calls("create_function"), 3);
    assert_eq!(plane.conflicts(), 0);

    let updates = outcome.environment_updates();
    assert_eq!(updates[LAYER_ARN_KEY], layer_arn);
    assert_eq!(updates[LAMBDA_URL_KEY], url.url);
    assert_eq!(outcome.function_url.as_deref(), Some(url.url.as_str()));
    assert_eq!(outcome.steps.first(), Some(&StepId::Role));
    assert_eq!(outcome.steps.last(), Some(&StepId::PublicUrl));
}

#[tokio::test]
async fn test_second_run_takes_no_create_branch() {
    let plane = busy_plane();
    let set = resources(InvokeMode::Buffered);

    let first = Workflow::new(&plane, &set, options(false, None))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();
    let before = plane.snapshot().unwrap();
    plane.clear_calls();

    let second = Workflow::new(&plane, &set, options(false, first.layer_arn.as_deref()))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();
    let after = plane.snapshot().unwrap();

    assert!(second.result.actions_by_type(ActionType::Create).is_empty());
    for call in plane.calls() {
        assert!(!call.starts_with("create_"), "unexpected {}", call);
        assert!(!call.starts_with("publish_"), "unexpected {}", call);
    }

    assert_eq!(before["roles"], after["roles"]);
    assert_eq!(before["tables"], after["tables"]);
    assert_eq!(before["urls"], after["urls"]);
    assert_eq!(before["layers"], after["layers"]);
    assert_eq!(
        before["functions"]["mcp-server"]["config"],
        after["functions"]["mcp-server"]["config"]
    );
    assert_eq!(first.environment_updates(), second.environment_updates());
}

#[tokio::test]
async fn test_stale_function_is_updated_in_place() {
    let plane = InMemoryControlPlane::new().with_update_latency(3);
    let role_arn = plane.seed_role("mcp-server-role");
    plane.seed_table("mcp-sessions", session_schema(), 0);
    let layer_arn = plane.seed_layer("mcp-deps", 4);
    plane.seed_function(
        "mcp-server",
        &role_arn,
        FunctionConfig {
            handler: "app.handler".to_string(),
            timeout_secs: 3,
            layers: Vec::new(),
            env_vars: BTreeMap::new(),
        },
        b"stale",
    );

    let set = resources(InvokeMode::ResponseStream);
    let outcome = Workflow::new(&plane, &set, options(false, Some(layer_arn.as_str())))
        .unwrap()
        .deploy(artifacts(b"fresh"))
        .await
        .unwrap();

    let function = plane.function("mcp-server").unwrap();
    assert_eq!(function.code, b"fresh");
    assert_eq!(
        function.config,
        function_spec().configuration(Some(layer_arn.as_str()))
    );
    assert_eq!(function.code_updates, 1);
    assert_eq!(function.config_updates, 1);

    // config update never raced the code update
    assert_eq!(plane.conflicts(), 0);
    assert_eq!(plane.count_calls("create_function"), 0);
    assert_eq!(plane.count_calls("create_role"), 0);
    assert_eq!(plane.count_calls("publish_layer_version"), 0);
    assert!(!outcome.result.created(ResourceKind::Function));
    assert_eq!(outcome.layer_arn.as_deref(), Some(layer_arn.as_str()));
}

#[tokio::test]
async fn test_url_invoke_mode_converges() {
    // existing buffered URL
    let plane = InMemoryControlPlane::new();
    let role_arn = plane.seed_role("mcp-server-role");
    plane.seed_function(
        "mcp-server",
        &role_arn,
        function_spec().configuration(None),
        b"v1",
    );
    let existing = plane.seed_url("mcp-server", InvokeMode::Buffered);

    let mut provisioner = Provisioner::with_options(&plane, fast());
    let url = provisioner
        .ensure_public_url("mcp-server", InvokeMode::ResponseStream)
        .await
        .unwrap();
    assert_eq!(url, existing);
    assert_eq!(
        plane.url("mcp-server").unwrap().invoke_mode,
        InvokeMode::ResponseStream
    );
    assert!(plane.url("mcp-server").unwrap().public);
    assert_eq!(plane.count_calls("create_function_url"), 0);

    // absent URL
    let fresh = InMemoryControlPlane::new();
    let role_arn = fresh.seed_role("mcp-server-role");
    fresh.seed_function(
        "mcp-server",
        &role_arn,
        function_spec().configuration(None),
        b"v1",
    );
    let mut provisioner = Provisioner::with_options(&fresh, fast());
    let url = provisioner
        .ensure_public_url("mcp-server", InvokeMode::ResponseStream)
        .await
        .unwrap();
    let created = fresh.url("mcp-server").unwrap();
    assert_eq!(url, created.url);
    assert_eq!(created.invoke_mode, InvokeMode::ResponseStream);
    assert!(created.public);

    // running again is a no-op
    let again = provisioner
        .ensure_public_url("mcp-server", InvokeMode::ResponseStream)
        .await
        .unwrap();
    assert_eq!(again, url);
    assert_eq!(fresh.count_calls("update_function_url_invoke_mode"), 0);
    assert_eq!(fresh.count_calls("create_function_url"), 1);
}

#[tokio::test]
async fn test_url_without_permission_is_made_public_on_rerun() {
    let plane = InMemoryControlPlane::new();
    let role_arn = plane.seed_role("mcp-server-role");
    plane.seed_table("mcp-sessions", session_schema(), 0);
    let layer_arn = plane.seed_layer("mcp-deps", 1);
    plane.seed_function(
        "mcp-server",
        &role_arn,
        function_spec().configuration(Some(layer_arn.as_str())),
        b"v1",
    );
    // URL created, permission never granted
    plane
        .create_function_url("mcp-server", InvokeMode::ResponseStream)
        .await
        .unwrap();
    assert!(!plane.url("mcp-server").unwrap().public);

    let set = resources(InvokeMode::ResponseStream);
    let outcome = Workflow::new(&plane, &set, options(false, Some(layer_arn.as_str())))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();

    assert!(plane.url("mcp-server").unwrap().public);
    assert_eq!(plane.count_calls("create_function_url"), 1);
    let url_actions = outcome
        .result
        .actions
        .iter()
        .filter(|a| a.resource_kind == ResourceKind::UrlConfig)
        .map(|a| a.action_type)
        .collect::<Vec<_>>();
    assert_eq!(url_actions, vec![ActionType::Update]);

    // converged: the next run changes nothing
    let again = Workflow::new(&plane, &set, options(false, Some(layer_arn.as_str())))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();
    assert!(
        again
            .result
            .actions
            .iter()
            .filter(|a| a.resource_kind == ResourceKind::UrlConfig)
            .all(|a| a.action_type == ActionType::NoOp)
    );
}

#[tokio::test]
async fn test_existing_role_is_left_alone() {
    let plane = InMemoryControlPlane::new();
    let arn = plane.seed_role("mcp-server-role");

    let mut provisioner = Provisioner::with_options(&plane, fast());
    let role = RoleSpec::lambda_execution("mcp-server-role");
    assert_eq!(provisioner.ensure_role(&role).await.unwrap(), arn);

    assert_eq!(plane.count_calls("create_role"), 0);
    assert_eq!(plane.count_calls("attach_role_policy"), 0);
    assert!(plane.role("mcp-server-role").unwrap().managed_policies.is_empty());
}

#[tokio::test]
async fn test_schema_drift_is_rejected_unless_allowed() {
    let plane = InMemoryControlPlane::new();
    let hash_only = KeySchema {
        hash: KeyAttribute::new("id", AttributeType::String),
        range: None,
    };
    plane.seed_table("mcp-sessions", hash_only, 0);

    let table = TableSpec {
        name: "mcp-sessions".to_string(),
        key_schema: session_schema(),
        billing_mode: BillingMode::PayPerRequest,
    };

    let mut strict = Provisioner::with_options(&plane, fast());
    match strict.ensure_table(&table).await {
        Err(CloudError::SchemaMismatch {
            declared, actual, ..
        }) => {
            assert_eq!(declared, "session_id:S + timestamp:N");
            assert_eq!(actual, "id:S");
        }
        other => panic!("expected schema mismatch, got {:?}", other),
    }

    let mut lenient = Provisioner::with_options(
        &plane,
        ProvisionerOptions {
            allow_schema_drift: true,
            ..fast()
        },
    );
    let arn = lenient.ensure_table(&table).await.unwrap();
    assert!(arn.ends_with(":table/mcp-sessions"));
    assert_eq!(plane.count_calls("create_table"), 0);
}

#[tokio::test]
async fn test_role_propagation_retry_is_bounded() {
    let plane = InMemoryControlPlane::new().with_role_propagation(10);
    let set = resources(InvokeMode::Buffered);

    let result = Workflow::new(&plane, &set, options(false, None))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await;

    assert!(matches!(result, Err(CloudError::RoleNotAssumable(_))));
    assert_eq!(plane.count_calls("create_function"), 5);
    assert!(plane.function("mcp-server").is_none());
}

#[tokio::test]
async fn test_layer_publish_rule() {
    let plane = InMemoryControlPlane::new();
    let known = plane.seed_layer("mcp-deps", 1);
    let set = resources(InvokeMode::Buffered);

    let reuse = Workflow::new(&plane, &set, options(false, Some(known.as_str()))).unwrap();
    assert!(!reuse.publishes_layer());
    let outcome = reuse.deploy(artifacts(b"v1")).await.unwrap();
    assert_eq!(outcome.layer_arn.as_deref(), Some(known.as_str()));
    assert_eq!(plane.layer_versions("mcp-deps"), 1);

    let forced = Workflow::new(&plane, &set, options(true, Some(known.as_str()))).unwrap();
    assert!(forced.publishes_layer());
    let outcome = forced.deploy(artifacts(b"v1")).await.unwrap();
    assert!(outcome.layer_arn.unwrap().ends_with(":layer:mcp-deps:2"));
    assert_eq!(
        plane.function("mcp-server").unwrap().config.layers.last().unwrap(),
        &format!("{}:2", known.trim_end_matches(":1"))
    );
}

#[tokio::test]
async fn test_missing_layer_package_fails_before_publish() {
    let plane = InMemoryControlPlane::new();
    let set = resources(InvokeMode::Buffered);

    let result = Workflow::new(&plane, &set, options(true, None))
        .unwrap()
        .deploy(Artifacts {
            function: artifacts(b"v1").function,
            layer: None,
        })
        .await;

    assert!(matches!(result, Err(CloudError::InvalidConfig(_))));
    assert_eq!(plane.count_calls("publish_layer_version"), 0);
}

#[tokio::test]
async fn test_plan_reports_without_changing_anything() {
    let plane = InMemoryControlPlane::new();
    let set = resources(InvokeMode::Buffered);

    let plan = Workflow::new(&plane, &set, options(false, None))
        .unwrap()
        .plan()
        .await
        .unwrap();
    assert!(plan.has_changes);
    // role, table, layer, function, url
    assert_eq!(plan.summary().create, 5);
    assert!(plane.role("mcp-server-role").is_none());
    assert!(plane.calls().iter().all(|c| !c.starts_with("create_")));

    let outcome = Workflow::new(&plane, &set, options(false, None))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();

    let replan = Workflow::new(&plane, &set, options(false, outcome.layer_arn.as_deref()))
        .unwrap()
        .plan()
        .await
        .unwrap();
    assert_eq!(replan.summary().create, 0);
    let config = replan
        .actions
        .iter()
        .filter(|a| a.resource_kind == ResourceKind::Function)
        .map(|a| a.action_type)
        .collect::<Vec<_>>();
    assert_eq!(config, vec![ActionType::Update, ActionType::NoOp]);
}

#[tokio::test]
async fn test_plan_matches_what_deploy_does_to_configuration() {
    let plane = InMemoryControlPlane::new().with_update_latency(1);
    let set = resources(InvokeMode::Buffered);

    let first = Workflow::new(&plane, &set, options(false, None))
        .unwrap()
        .deploy(artifacts(b"v1"))
        .await
        .unwrap();
    let known = first.layer_arn.as_deref();

    let plan = Workflow::new(&plane, &set, options(false, known))
        .unwrap()
        .plan()
        .await
        .unwrap();
    let planned = plan
        .actions
        .iter()
        .filter(|a| a.resource_kind == ResourceKind::Function)
        .map(|a| a.action_type)
        .collect::<Vec<_>>();
    assert_eq!(planned, vec![ActionType::Update, ActionType::NoOp]);

    let before = plane.function("mcp-server").unwrap().config_updates;
    let second = Workflow::new(&plane, &set, options(false, known))
        .unwrap()
        .deploy(artifacts(b"v2"))
        .await
        .unwrap();
    let applied = second
        .result
        .actions
        .iter()
        .filter(|a| a.resource_kind == ResourceKind::Function)
        .map(|a| a.action_type)
        .collect::<Vec<_>>();

    assert_eq!(applied, planned);
    assert_eq!(plane.function("mcp-server").unwrap().config_updates, before);
    assert_eq!(plane.count_calls("update_function_configuration"), 0);
    assert_eq!(plane.function("mcp-server").unwrap().code, b"v2");
}

#[tokio::test]
async fn test_wipe_table_keeps_table() {
    let plane = InMemoryControlPlane::new();
    plane.seed_table("mcp-sessions", session_schema(), 12);
    let table = TableSpec {
        name: "mcp-sessions".to_string(),
        key_schema: session_schema(),
        billing_mode: BillingMode::PayPerRequest,
    };

    let mut provisioner = Provisioner::with_options(&plane, fast());
    assert_eq!(provisioner.wipe_table(&table).await.unwrap(), 12);
    assert_eq!(plane.table("mcp-sessions").unwrap().items, 0);

    let missing = TableSpec {
        name: "other".to_string(),
        ..table
    };
    assert!(matches!(
        provisioner.wipe_table(&missing).await,
        Err(CloudError::ResourceNotFound(_))
    ));
}
