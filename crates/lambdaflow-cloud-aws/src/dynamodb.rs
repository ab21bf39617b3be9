//! DynamoDB table operations

use crate::error::{absent_if_not_found, request_build, sdk_error};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    self as ddb, AttributeDefinition, AttributeValue, DeleteRequest, KeySchemaElement, KeyType,
    ProvisionedThroughput, ScalarAttributeType, WriteRequest,
};
use lambdaflow_cloud::{
    AttributeType, BillingMode, CloudError, KeyAttribute, KeySchema, Result, RetryConfig,
    TableDescription, TableSpec, TableStatus,
};
use std::collections::HashMap;

/// BatchWriteItem accepts at most 25 requests
const BATCH_LIMIT: usize = 25;

/// Attempts to flush unprocessed items of one batch
const UNPROCESSED_ATTEMPTS: u32 = 5;

fn describe(name: &str, table: &ddb::TableDescription) -> TableDescription {
    let status = match table.table_status() {
        Some(ddb::TableStatus::Active) => TableStatus::Active,
        Some(ddb::TableStatus::Creating) => TableStatus::Creating,
        Some(ddb::TableStatus::Updating) => TableStatus::Updating,
        _ => TableStatus::Other,
    };

    TableDescription {
        name: name.to_string(),
        arn: table.table_arn().unwrap_or_default().to_string(),
        status,
        key_schema: key_schema(table),
    }
}

fn key_schema(table: &ddb::TableDescription) -> Option<KeySchema> {
    let types: HashMap<&str, AttributeType> = table
        .attribute_definitions()
        .iter()
        .filter_map(|d| {
            AttributeType::parse(d.attribute_type().as_str()).map(|t| (d.attribute_name(), t))
        })
        .collect();

    let attribute = |element: &KeySchemaElement| {
        KeyAttribute::new(
            element.attribute_name(),
            types
                .get(element.attribute_name())
                .copied()
                .unwrap_or(AttributeType::String),
        )
    };

    let elements = table.key_schema();
    let hash = elements.iter().find(|e| e.key_type() == &KeyType::Hash)?;
    let range = elements.iter().find(|e| e.key_type() == &KeyType::Range);

    Some(KeySchema {
        hash: attribute(hash),
        range: range.map(attribute),
    })
}

fn attribute_definition(attribute: &KeyAttribute) -> Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(&attribute.name)
        .attribute_type(ScalarAttributeType::from(attribute.attribute_type.as_str()))
        .build()
        .map_err(|e| request_build("AttributeDefinition", e))
}

fn key_element(attribute: &KeyAttribute, key_type: KeyType) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(&attribute.name)
        .key_type(key_type)
        .build()
        .map_err(|e| request_build("KeySchemaElement", e))
}

fn key_names(key_schema: &KeySchema) -> Vec<&str> {
    let mut names = vec![key_schema.hash.name.as_str()];
    if let Some(range) = &key_schema.range {
        names.push(range.name.as_str());
    }
    names
}

pub(crate) async fn describe_table(client: &Client, name: &str) -> Result<Option<TableDescription>> {
    let result = client
        .describe_table()
        .table_name(name)
        .send()
        .await
        .map_err(|e| sdk_error("DescribeTable", e))
        .and_then(|output| {
            output
                .table()
                .map(|t| describe(name, t))
                .ok_or_else(|| CloudError::ResourceNotFound(format!("table {}", name)))
        });
    absent_if_not_found(result)
}

pub(crate) async fn create_table(client: &Client, spec: &TableSpec) -> Result<TableDescription> {
    let mut attributes = vec![attribute_definition(&spec.key_schema.hash)?];
    let mut keys = vec![key_element(&spec.key_schema.hash, KeyType::Hash)?];
    if let Some(range) = &spec.key_schema.range {
        attributes.push(attribute_definition(range)?);
        keys.push(key_element(range, KeyType::Range)?);
    }

    let request = client
        .create_table()
        .table_name(&spec.name)
        .set_attribute_definitions(Some(attributes))
        .set_key_schema(Some(keys));

    let request = match spec.billing_mode {
        BillingMode::PayPerRequest => request.billing_mode(ddb::BillingMode::PayPerRequest),
        BillingMode::Provisioned { read, write } => request
            .billing_mode(ddb::BillingMode::Provisioned)
            .provisioned_throughput(
                ProvisionedThroughput::builder()
                    .read_capacity_units(read)
                    .write_capacity_units(write)
                    .build()
                    .map_err(|e| request_build("ProvisionedThroughput", e))?,
            ),
    };

    let output = request
        .send()
        .await
        .map_err(|e| sdk_error("CreateTable", e))?;

    output
        .table_description()
        .map(|t| describe(&spec.name, t))
        .ok_or_else(|| {
            CloudError::OperationFailed(format!("CreateTable returned no table for {}", spec.name))
        })
}

/// Scan the table for keys only and delete everything found
pub(crate) async fn purge_table_items(
    client: &Client,
    name: &str,
    key_schema: &KeySchema,
) -> Result<usize> {
    let keys = key_names(key_schema);
    // Key names such as "timestamp" are reserved words
    let projection = (0..keys.len())
        .map(|i| format!("#k{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    let mut deleted = 0;

    loop {
        let mut scan = client
            .scan()
            .table_name(name)
            .projection_expression(&projection)
            .set_exclusive_start_key(start_key.take());
        for (i, key) in keys.iter().enumerate() {
            scan = scan.expression_attribute_names(format!("#k{}", i), *key);
        }

        let output = scan.send().await.map_err(|e| sdk_error("Scan", e))?;

        let requests = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                let key: HashMap<String, AttributeValue> = item
                    .into_iter()
                    .filter(|(attribute, _)| keys.contains(&attribute.as_str()))
                    .collect();
                DeleteRequest::builder()
                    .set_key(Some(key))
                    .build()
                    .map(|request| WriteRequest::builder().delete_request(request).build())
                    .map_err(|e| request_build("DeleteRequest", e))
            })
            .collect::<Result<Vec<WriteRequest>>>()?;

        deleted += requests.len();
        batch_delete(client, name, requests).await?;
        tracing::debug!("Deleted {} items from {} so far", deleted, name);

        match output.last_evaluated_key {
            Some(key) if !key.is_empty() => start_key = Some(key),
            _ => break,
        }
    }

    Ok(deleted)
}

async fn batch_delete(client: &Client, table: &str, mut requests: Vec<WriteRequest>) -> Result<()> {
    let retry = RetryConfig::default();

    while !requests.is_empty() {
        let mut pending: Vec<WriteRequest> =
            requests.drain(..requests.len().min(BATCH_LIMIT)).collect();

        for attempt in 0..UNPROCESSED_ATTEMPTS {
            let output = client
                .batch_write_item()
                .request_items(table, pending)
                .send()
                .await
                .map_err(|e| sdk_error("BatchWriteItem", e))?;

            pending = output
                .unprocessed_items
                .and_then(|mut unprocessed| unprocessed.remove(table))
                .unwrap_or_default();
            if pending.is_empty() {
                break;
            }

            tracing::debug!("{} deletes unprocessed, retrying", pending.len());
            tokio::time::sleep(retry.delay_for(attempt)).await;
        }

        if !pending.is_empty() {
            return Err(CloudError::OperationFailed(format!(
                "{} deletes on {} stayed unprocessed",
                pending.len(),
                table
            )));
        }
    }

    Ok(())
}
