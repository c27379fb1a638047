//! JSON schema builders for MCP tools.

use crate::config::get_config;
use crate::pipeline::StageName;
use serde_json::{Map, Value};

/// Build the schema describing the `pipeline-status` tool input.
pub(crate) fn pipeline_status_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "document_id".into(),
        string_schema("Identifier of the document to inspect"),
    );
    finalize_object_schema(properties, &["document_id"])
}

/// Build the schema describing the `list-documents` tool input.
pub(crate) fn list_documents_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    let mut status_schema = Map::new();
    status_schema.insert("type".into(), Value::String("string".into()));
    status_schema.insert(
        "description".into(),
        Value::String("Optional filter on the aggregate processing status".into()),
    );
    status_schema.insert(
        "enum".into(),
        Value::Array(
            ["pending", "processing", "completed", "failed"]
                .into_iter()
                .map(|variant| Value::String(variant.into()))
                .collect(),
        ),
    );
    properties.insert("status".into(), Value::Object(status_schema));
    finalize_object_schema(properties, &[])
}

/// Build the schema describing the `claimable-documents` tool input.
pub(crate) fn claimable_documents_input_schema() -> Map<String, Value> {
    let config = get_config();
    let mut properties = Map::new();
    properties.insert("stage".into(), stage_schema("Stage to look for work in"));

    let mut limit_schema = Map::new();
    limit_schema.insert("type".into(), Value::String("integer".into()));
    limit_schema.insert(
        "description".into(),
        Value::String("Maximum number of documents to return".into()),
    );
    limit_schema.insert("minimum".into(), Value::from(1));
    limit_schema.insert(
        "maximum".into(),
        Value::from(config.claimable_max_limit as u64),
    );
    limit_schema.insert(
        "default".into(),
        Value::from(config.claimable_default_limit as u64),
    );
    properties.insert("limit".into(), Value::Object(limit_schema));

    finalize_object_schema(properties, &["stage"])
}

/// Build the schema describing the `retry-stage` tool input.
pub(crate) fn retry_stage_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "document_id".into(),
        string_schema("Identifier of the document whose stage failed"),
    );
    properties.insert("stage".into(), stage_schema("Failed stage to retry"));
    finalize_object_schema(properties, &["document_id", "stage"])
}

/// Schema for tools that take no arguments.
pub(crate) fn empty_object_schema() -> Map<String, Value> {
    finalize_object_schema(Map::new(), &[])
}

fn stage_schema(description: &str) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("string".into()));
    schema.insert("description".into(), Value::String(description.into()));
    schema.insert(
        "enum".into(),
        Value::Array(
            StageName::ALL
                .into_iter()
                .map(|stage| Value::String(stage.as_str().into()))
                .collect(),
        ),
    );
    Value::Object(schema)
}

fn string_schema(description: &str) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("string".into()));
    schema.insert("description".into(), Value::String(description.into()));
    Value::Object(schema)
}

fn finalize_object_schema(properties: Map<String, Value>, required: &[&str]) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert(
            "required".into(),
            Value::Array(
                required
                    .iter()
                    .map(|&key| Value::String(key.into()))
                    .collect(),
            ),
        );
    }
    schema.insert("additionalProperties".into(), Value::Bool(false));
    schema
}
