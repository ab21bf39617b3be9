//! Lambda function, URL and layer operations

use crate::error::{absent_if_not_found, sdk_error};
use aws_sdk_lambda::Client;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{
    self as lambda, Environment, FunctionCode, FunctionUrlAuthType, LastUpdateStatus,
    LayerVersionContentInput, Runtime, State,
};
use lambdaflow_cloud::{
    CloudError, FunctionConfig, FunctionDescription, FunctionSpec, InvokeMode, LayerSpec,
    PackageArtifact, Result, UpdateStatus, UrlDescription,
};
use std::collections::{BTreeMap, HashMap};

/// Statement id of the permission that makes the URL public
pub const PUBLIC_URL_STATEMENT_ID: &str = "FunctionURLAllowPublicAccess";

fn update_status(config: &lambda::FunctionConfiguration) -> UpdateStatus {
    // A new function reports its progress through `State` instead
    if config.state() == Some(&State::Pending) {
        return UpdateStatus::InProgress;
    }
    if let Some(State::Failed) = config.state() {
        return UpdateStatus::Failed(config.state_reason().unwrap_or("unknown").to_string());
    }

    match config.last_update_status() {
        Some(LastUpdateStatus::InProgress) => UpdateStatus::InProgress,
        Some(LastUpdateStatus::Failed) => UpdateStatus::Failed(
            config
                .last_update_status_reason()
                .unwrap_or("unknown")
                .to_string(),
        ),
        _ => UpdateStatus::Successful,
    }
}

fn describe(name: &str, config: &lambda::FunctionConfiguration) -> FunctionDescription {
    FunctionDescription {
        name: name.to_string(),
        arn: config.function_arn().unwrap_or_default().to_string(),
        handler: config.handler().map(str::to_string),
        timeout_secs: config.timeout().and_then(|t| u32::try_from(t).ok()),
        layers: config
            .layers()
            .iter()
            .filter_map(|layer| layer.arn().map(str::to_string))
            .collect(),
        env_vars: config
            .environment()
            .and_then(|env| env.variables())
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default(),
        last_update: update_status(config),
    }
}

fn environment(config: &FunctionConfig) -> Environment {
    let variables: HashMap<String, String> = config
        .env_vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Environment::builder().set_variables(Some(variables)).build()
}

fn invoke_mode(mode: InvokeMode) -> lambda::InvokeMode {
    lambda::InvokeMode::from(mode.as_str())
}

fn url_description(url: &str, mode: Option<&lambda::InvokeMode>, auth: &str) -> UrlDescription {
    UrlDescription {
        url: url.to_string(),
        invoke_mode: mode
            .and_then(|m| InvokeMode::parse(m.as_str()))
            .unwrap_or_default(),
        auth_type: auth.to_string(),
    }
}

fn as_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) async fn get_function(client: &Client, name: &str) -> Result<Option<FunctionDescription>> {
    let result = client
        .get_function()
        .function_name(name)
        .send()
        .await
        .map_err(|e| sdk_error("GetFunction", e))
        .and_then(|output| {
            output
                .configuration()
                .map(|c| describe(name, c))
                .ok_or_else(|| CloudError::ResourceNotFound(format!("function {}", name)))
        });
    absent_if_not_found(result)
}

pub(crate) async fn create_function(
    client: &Client,
    spec: &FunctionSpec,
    role_arn: &str,
    config: &FunctionConfig,
    code: &PackageArtifact,
) -> Result<FunctionDescription> {
    let output = client
        .create_function()
        .function_name(&spec.name)
        .runtime(Runtime::from(spec.runtime.as_str()))
        .role(role_arn)
        .handler(&config.handler)
        .timeout(as_i32(config.timeout_secs))
        .memory_size(as_i32(spec.memory_mb))
        .architectures(lambda::Architecture::from(spec.architecture.as_str()))
        .code(
            FunctionCode::builder()
                .zip_file(Blob::new(code.bytes.clone()))
                .build(),
        )
        .environment(environment(config))
        .set_layers(Some(config.layers.clone()))
        .send()
        .await
        .map_err(|e| sdk_error("CreateFunction", e))?;

    Ok(FunctionDescription {
        name: spec.name.clone(),
        arn: output.function_arn().unwrap_or_default().to_string(),
        handler: output.handler().map(str::to_string),
        timeout_secs: Some(config.timeout_secs),
        layers: config.layers.clone(),
        env_vars: config.env_vars.clone(),
        last_update: UpdateStatus::InProgress,
    })
}

pub(crate) async fn update_function_code(
    client: &Client,
    name: &str,
    code: &PackageArtifact,
) -> Result<()> {
    client
        .update_function_code()
        .function_name(name)
        .zip_file(Blob::new(code.bytes.clone()))
        .send()
        .await
        .map_err(|e| sdk_error("UpdateFunctionCode", e))?;
    Ok(())
}

pub(crate) async fn update_function_configuration(
    client: &Client,
    name: &str,
    config: &FunctionConfig,
) -> Result<()> {
    client
        .update_function_configuration()
        .function_name(name)
        .handler(&config.handler)
        .timeout(as_i32(config.timeout_secs))
        .set_layers(Some(config.layers.clone()))
        .environment(environment(config))
        .send()
        .await
        .map_err(|e| sdk_error("UpdateFunctionConfiguration", e))?;
    Ok(())
}

pub(crate) async fn get_function_url(
    client: &Client,
    function_name: &str,
) -> Result<Option<UrlDescription>> {
    let result = client
        .get_function_url_config()
        .function_name(function_name)
        .send()
        .await
        .map_err(|e| sdk_error("GetFunctionUrlConfig", e))
        .map(|output| {
            url_description(
                output.function_url(),
                output.invoke_mode(),
                output.auth_type().as_str(),
            )
        });
    absent_if_not_found(result)
}

pub(crate) async fn create_function_url(
    client: &Client,
    function_name: &str,
    mode: InvokeMode,
) -> Result<UrlDescription> {
    let output = client
        .create_function_url_config()
        .function_name(function_name)
        .auth_type(FunctionUrlAuthType::None)
        .invoke_mode(invoke_mode(mode))
        .send()
        .await
        .map_err(|e| sdk_error("CreateFunctionUrlConfig", e))?;

    Ok(url_description(
        output.function_url(),
        output.invoke_mode(),
        output.auth_type().as_str(),
    ))
}

pub(crate) async fn update_function_url_invoke_mode(
    client: &Client,
    function_name: &str,
    mode: InvokeMode,
) -> Result<UrlDescription> {
    let output = client
        .update_function_url_config()
        .function_name(function_name)
        .invoke_mode(invoke_mode(mode))
        .send()
        .await
        .map_err(|e| sdk_error("UpdateFunctionUrlConfig", e))?;

    Ok(url_description(
        output.function_url(),
        output.invoke_mode(),
        output.auth_type().as_str(),
    ))
}

pub(crate) async fn add_public_url_permission(client: &Client, function_name: &str) -> Result<()> {
    client
        .add_permission()
        .function_name(function_name)
        .statement_id(PUBLIC_URL_STATEMENT_ID)
        .action("lambda:InvokeFunctionUrl")
        .principal("*")
        .function_url_auth_type(FunctionUrlAuthType::None)
        .send()
        .await
        .map_err(|e| sdk_error("AddPermission", e))?;
    Ok(())
}

pub(crate) async fn publish_layer_version(
    client: &Client,
    spec: &LayerSpec,
    content: &PackageArtifact,
) -> Result<String> {
    let runtimes = spec
        .compatible_runtimes
        .iter()
        .map(|r| Runtime::from(r.as_str()))
        .collect();

    let output = client
        .publish_layer_version()
        .layer_name(&spec.name)
        .description("Dependencies packaged by lambdaflow")
        .content(
            LayerVersionContentInput::builder()
                .zip_file(Blob::new(content.bytes.clone()))
                .build(),
        )
        .set_compatible_runtimes(Some(runtimes))
        .compatible_architectures(lambda::Architecture::from(spec.architecture.as_str()))
        .send()
        .await
        .map_err(|e| sdk_error("PublishLayerVersion", e))?;

    output
        .layer_version_arn()
        .map(str::to_string)
        .ok_or_else(|| {
            CloudError::OperationFailed(format!(
                "PublishLayerVersion returned no ARN for {}",
                spec.name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_status_mapping() {
        let pending = lambda::FunctionConfiguration::builder()
            .state(State::Pending)
            .build();
        assert_eq!(update_status(&pending), UpdateStatus::InProgress);

        let updating = lambda::FunctionConfiguration::builder()
            .state(State::Active)
            .last_update_status(LastUpdateStatus::InProgress)
            .build();
        assert_eq!(update_status(&updating), UpdateStatus::InProgress);

        let failed = lambda::FunctionConfiguration::builder()
            .state(State::Active)
            .last_update_status(LastUpdateStatus::Failed)
            .last_update_status_reason("bad zip")
            .build();
        assert_eq!(update_status(&failed), UpdateStatus::Failed("bad zip".to_string()));

        let done = lambda::FunctionConfiguration::builder()
            .state(State::Active)
            .last_update_status(LastUpdateStatus::Successful)
            .build();
        assert_eq!(update_status(&done), UpdateStatus::Successful);
    }

    #[test]
    fn test_describe_collects_layers_and_env() {
        let config = lambda::FunctionConfiguration::builder()
            .function_arn("arn:aws:lambda:us-east-1:123:function:mcp-server")
            .handler("run.sh")
            .timeout(300)
            .layers(lambda::Layer::builder().arn("arn:layer:1").build())
            .environment(
                lambda::EnvironmentResponse::builder()
                    .variables("PORT", "8080")
                    .build(),
            )
            .build();

        let description = describe("mcp-server", &config);
        assert_eq!(description.handler.as_deref(), Some("run.sh"));
        assert_eq!(description.timeout_secs, Some(300));
        assert_eq!(description.layers, vec!["arn:layer:1"]);
        assert_eq!(description.env_vars["PORT"], "8080");
    }

    #[test]
    fn test_invoke_mode_round_trips_through_sdk_enum() {
        assert_eq!(
            invoke_mode(InvokeMode::ResponseStream),
            lambda::InvokeMode::ResponseStream
        );
        let url = url_description("https://x/", Some(&lambda::InvokeMode::Buffered), "NONE");
        assert_eq!(url.invoke_mode, InvokeMode::Buffered);
    }
}
