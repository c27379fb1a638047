//! MCP server bootstrap and request dispatch.

use std::{borrow::Cow, sync::Arc};

use crate::{
    config::get_config,
    mcp::{
        format::{SettingsSnapshot, StagesSnapshot, json_resource_contents, serialize_json},
        handlers::{
            metrics::handle_metrics,
            pipeline_error,
            stages::{handle_claimable_documents, handle_retry_stage},
            status::{handle_list_documents, handle_pipeline_status},
        },
        registry, schemas,
    },
    pipeline::{DocumentId, PipelineApi},
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, ListResourceTemplatesResult,
        ListResourcesResult, ListToolsResult, RawResource, RawResourceTemplate,
        ReadResourceRequestParam, ReadResourceResult, Resource, ResourceTemplate,
        ServerCapabilities, ServerInfo, Tool, ToolAnnotations,
    },
};

const STAGES_URI: &str = "mcp://stages";
const SETTINGS_URI: &str = "mcp://settings";
const DOCUMENT_TEMPLATE_URI: &str = "mcp://documents/{document_id}";
const DOCUMENT_PREFIX: &str = "mcp://documents/";

/// MCP server exposing pipeline inspection and recovery operations.
#[derive(Clone)]
pub struct DocpipeMcpServer {
    pipeline: Arc<dyn PipelineApi>,
    registry: Arc<registry::Registry>,
}

impl DocpipeMcpServer {
    /// Create a new MCP server over the supplied orchestrator.
    pub fn new(pipeline: Arc<dyn PipelineApi>) -> Self {
        let mut registry = registry::Registry::new();
        registry.register_resource(STAGES_URI, resource_stages);
        registry.register_resource(SETTINGS_URI, resource_settings);

        registry.register_tool("pipeline-status", tool_pipeline_status);
        registry.register_tool("list-documents", tool_list_documents);
        registry.register_tool("claimable-documents", tool_claimable_documents);
        registry.register_tool("retry-stage", tool_retry_stage);
        registry.register_tool("metrics", tool_metrics);

        Self {
            pipeline,
            registry: Arc::new(registry),
        }
    }

    fn describe_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: Cow::Borrowed("pipeline-status"),
                title: Some("Pipeline Status".to_string()),
                description: Some(Cow::Borrowed(
                    "Show a document's progress, current stage, aggregate status, and every stage record.",
                )),
                input_schema: Arc::new(schemas::pipeline_status_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Pipeline Status")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("list-documents"),
                title: Some("List Documents".to_string()),
                description: Some(Cow::Borrowed(
                    "List tracked documents with progress; filter by status to find failed ones.",
                )),
                input_schema: Arc::new(schemas::list_documents_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("List Documents")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("claimable-documents"),
                title: Some("Claimable Documents".to_string()),
                description: Some(Cow::Borrowed(
                    "Find documents whose stage is pending and whose previous stage completed or was skipped.",
                )),
                input_schema: Arc::new(schemas::claimable_documents_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Claimable Documents")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("retry-stage"),
                title: Some("Retry Failed Stage".to_string()),
                description: Some(Cow::Borrowed(
                    "Move a failed stage back to processing so its worker can run it again.",
                )),
                input_schema: Arc::new(schemas::retry_stage_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Retry Failed Stage")
                        .destructive(false)
                        .idempotent(false)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("metrics"),
                title: Some("Metrics Snapshot".to_string()),
                description: Some(Cow::Borrowed(
                    "Check stage starts, completions, failures, claims, and sweeps at a glance.",
                )),
                input_schema: Arc::new(schemas::empty_object_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Metrics Snapshot")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
        ]
    }

    fn describe_resources(&self) -> Vec<Resource> {
        let mut stages = RawResource::new(STAGES_URI, "stages");
        stages.description = Some("Ordered stage chain with each stage's predecessor".into());

        let mut settings = RawResource::new(SETTINGS_URI, "settings");
        settings.description = Some("Effective lease, sweep, and claimable-query defaults".into());

        vec![stages.no_annotation(), settings.no_annotation()]
    }

    fn describe_resource_templates(&self) -> Vec<ResourceTemplate> {
        let document_template = RawResourceTemplate {
            uri_template: DOCUMENT_TEMPLATE_URI.into(),
            name: "document-state".into(),
            title: Some("Document Pipeline State".into()),
            description: Some(
                "Every stage record of a document: replace {document_id} and call readResource"
                    .into(),
            ),
            mime_type: Some(super::format::APPLICATION_JSON.into()),
        };

        vec![document_template.no_annotation()]
    }
}

fn resource_stages(
    _server: &DocpipeMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    Box::pin(async move {
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                STAGES_URI,
                serialize_json(&StagesSnapshot::current(), STAGES_URI),
            )],
        })
    })
}

fn resource_settings(
    _server: &DocpipeMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    Box::pin(async move {
        let payload = SettingsSnapshot::from(get_config());
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                SETTINGS_URI,
                serialize_json(&payload, SETTINGS_URI),
            )],
        })
    })
}

fn tool_pipeline_status(
    server: &DocpipeMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let pipeline = server.pipeline.clone();
    Box::pin(async move { handle_pipeline_status(&pipeline, request.arguments).await })
}

fn tool_list_documents(
    server: &DocpipeMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let pipeline = server.pipeline.clone();
    Box::pin(async move { handle_list_documents(&pipeline, request.arguments).await })
}

fn tool_claimable_documents(
    server: &DocpipeMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let pipeline = server.pipeline.clone();
    Box::pin(async move { handle_claimable_documents(&pipeline, request.arguments).await })
}

fn tool_retry_stage(
    server: &DocpipeMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let pipeline = server.pipeline.clone();
    Box::pin(async move { handle_retry_stage(&pipeline, request.arguments).await })
}

fn tool_metrics(
    server: &DocpipeMcpServer,
    _request: CallToolRequestParam,
) -> registry::ToolFuture {
    let pipeline = server.pipeline.clone();
    Box::pin(async move { handle_metrics(&pipeline).await })
}

impl ServerHandler for DocpipeMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut implementation = rmcp::model::Implementation::from_build_env();
        implementation.name = "docpipe".to_string();
        implementation.title = Some("Document Pipeline MCP".to_string());
        implementation.version = env!("CARGO_PKG_VERSION").to_string();

        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: implementation,
            instructions: Some(
                "Use this server to inspect document pipeline progress, find claimable work per stage, and retry failed stages.".into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        let resources = self.describe_resources();
        std::future::ready(Ok(ListResourcesResult::with_all_items(resources)))
    }

    fn list_resource_templates(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_
    {
        let templates = self.describe_resource_templates();
        std::future::ready(Ok(ListResourceTemplatesResult::with_all_items(templates)))
    }

    fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.describe_tools();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        let pipeline = self.pipeline.clone();
        async move {
            let uri = request.uri.clone();
            if let Some(segment) = uri.strip_prefix(DOCUMENT_PREFIX) {
                if segment.is_empty() {
                    return Err(McpError::invalid_params(
                        "Document identifier missing in resource URI",
                        None,
                    ));
                }
                let document_id = DocumentId::new(segment).map_err(pipeline_error)?;
                let state = pipeline
                    .document_state(&document_id)
                    .await
                    .map_err(pipeline_error)?;
                return Ok(ReadResourceResult {
                    contents: vec![json_resource_contents(&uri, serialize_json(&state, &uri))],
                });
            }

            if let Some(handler) = self.registry.resources.get(uri.as_str()) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown resource URI: {uri}"),
                None,
            ))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            if let Some(handler) = self.registry.tools.get(request.name.as_ref()) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ))
        }
    }
}
