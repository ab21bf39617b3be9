//! IAM role operations

use crate::error::{absent_if_not_found, sdk_error};
use aws_sdk_iam::Client;
use lambdaflow_cloud::{CloudError, Result, RoleDescription};

fn describe(role: &aws_sdk_iam::types::Role) -> RoleDescription {
    RoleDescription {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
    }
}

pub(crate) async fn get_role(client: &Client, name: &str) -> Result<Option<RoleDescription>> {
    let result = client
        .get_role()
        .role_name(name)
        .send()
        .await
        .map_err(|e| sdk_error("GetRole", e))
        .and_then(|output| {
            output
                .role()
                .map(describe)
                .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", name)))
        });
    absent_if_not_found(result)
}

pub(crate) async fn create_role(
    client: &Client,
    name: &str,
    trust_policy: &str,
) -> Result<RoleDescription> {
    let output = client
        .create_role()
        .role_name(name)
        .assume_role_policy_document(trust_policy)
        .description("Execution role managed by lambdaflow")
        .send()
        .await
        .map_err(|e| sdk_error("CreateRole", e))?;

    output
        .role()
        .map(describe)
        .ok_or_else(|| CloudError::OperationFailed(format!("CreateRole returned no role for {}", name)))
}

pub(crate) async fn attach_role_policy(
    client: &Client,
    role_name: &str,
    policy_arn: &str,
) -> Result<()> {
    client
        .attach_role_policy()
        .role_name(role_name)
        .policy_arn(policy_arn)
        .send()
        .await
        .map_err(|e| sdk_error("AttachRolePolicy", e))?;
    Ok(())
}

pub(crate) async fn put_role_policy(
    client: &Client,
    role_name: &str,
    policy_name: &str,
    policy_document: &str,
) -> Result<()> {
    client
        .put_role_policy()
        .role_name(role_name)
        .policy_name(policy_name)
        .policy_document(policy_document)
        .send()
        .await
        .map_err(|e| sdk_error("PutRolePolicy", e))?;
    Ok(())
}
