use std::sync::Arc;

use docpipe::{
    config, logging,
    mcp::DocpipeMcpServer,
    pipeline::{
        DocumentId, Metadata, OrchestratorSettings, PipelineOrchestrator, StageName,
        StageStatus,
    },
    registry::InMemoryRegistry,
};
use rmcp::{
    handler::client::ClientHandler,
    model::{
        self, CallToolRequestParam, ClientInfo, PaginatedRequestParam, ReadResourceRequestParam,
        ResourceContents,
    },
    service::{RoleClient, RoleServer, RunningService, Service, serve_directly},
    transport::async_rw::AsyncRwTransport,
};
use serde_json::{Value, json};
use tokio::{io::split, sync::OnceCell};

static INIT: OnceCell<()> = OnceCell::const_new();

fn set_env(key: &str, value: &str) {
    // SAFETY: Tests run in a single process and establish deterministic configuration upfront.
    unsafe { std::env::set_var(key, value) }
}

#[derive(Clone, Default)]
struct DummyClientHandler;

impl ClientHandler for DummyClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo::default()
    }
}

struct TestHarness {
    service: RunningService<RoleClient, DummyClientHandler>,
    server: RunningService<RoleServer, DocpipeMcpServer>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl TestHarness {
    async fn new() -> Self {
        INIT.get_or_init(|| async {
            set_env("DEFAULT_LEASE_SECONDS", "120");
            set_env("CLAIMABLE_DEFAULT_LIMIT", "10");
            set_env("SWEEP_INTERVAL_SECONDS", "0");
            set_env("DOCPIPE_LOG_FILE", &std::env::temp_dir().join("docpipe-mcp-test.log").to_string_lossy());
            config::init_config();
            logging::init_tracing();
        })
        .await;

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::new(InMemoryRegistry::new()),
            OrchestratorSettings::from_config(config::get_config()),
        ));
        let server = DocpipeMcpServer::new(orchestrator.clone());

        let (client_stream, server_stream) = tokio::io::duplex(16 * 1024);
        let (client_read, client_write) = split(client_stream);
        let (server_read, server_write) = split(server_stream);

        let client_transport = AsyncRwTransport::new_client(client_read, client_write);
        let server_transport = AsyncRwTransport::new_server(server_read, server_write);

        let server_info = server.get_info();
        let client_handler = DummyClientHandler;
        let client_info = ClientHandler::get_info(&client_handler);

        let server =
            serve_directly::<RoleServer, _, _, _, _>(server, server_transport, Some(client_info));
        let service = serve_directly::<RoleClient, _, _, _, _>(
            client_handler,
            client_transport,
            Some(server_info),
        );

        Self {
            service,
            server,
            orchestrator,
        }
    }

    async fn shutdown(self) {
        let Self {
            service, server, ..
        } = self;
        let _ = service.cancel().await;
        let _ = server.cancel().await;
    }
}

fn doc(id: &str) -> DocumentId {
    DocumentId::new(id).expect("valid id")
}

fn arguments(value: Value) -> Option<model::JsonObject> {
    value.as_object().cloned()
}

fn resource_text(contents: &ResourceContents) -> &str {
    match contents {
        ResourceContents::TextResourceContents { text, .. } => text,
        other => panic!("expected text contents, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_and_list_tools() {
    let harness = TestHarness::new().await;
    let service = &harness.service;

    let info = service
        .peer_info()
        .expect("server info should be initialized");
    assert_eq!(info.server_info.name, "docpipe");
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.resources.is_some());

    let tools_result = service
        .list_tools(Some(PaginatedRequestParam { cursor: None }))
        .await
        .expect("list_tools");
    let names: Vec<_> = tools_result
        .tools
        .iter()
        .map(|tool| tool.name.as_ref())
        .collect();

    for expected in [
        "pipeline-status",
        "list-documents",
        "claimable-documents",
        "retry-stage",
        "metrics",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn pipeline_status_reports_progress_and_records() {
    let harness = TestHarness::new().await;
    let id = doc("manual-100");
    harness.orchestrator.register_document(&id).await.unwrap();
    harness
        .orchestrator
        .complete_stage(&id, StageName::Upload, Metadata::new(), None)
        .await
        .unwrap();
    harness
        .orchestrator
        .start_stage(&id, StageName::TextExtraction)
        .await
        .unwrap();

    let response = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "pipeline-status".into(),
            arguments: arguments(json!({ "document_id": "manual-100" })),
        })
        .await
        .expect("pipeline-status call");

    assert_eq!(response.is_error, Some(false));
    let payload = response.structured_content.expect("structured payload");
    assert_eq!(payload["processingStatus"], "processing");
    assert_eq!(payload["currentStage"], "text_extraction");
    assert_eq!(payload["progress"], 12.5);
    assert_eq!(payload["stages"]["upload"]["status"], "completed");
    assert_eq!(payload["stages"]["text_extraction"]["attempt_count"], 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn claimable_and_retry_tools_drive_recovery() {
    let harness = TestHarness::new().await;
    let failed = doc("bulletin-7");
    let waiting = doc("bulletin-8");
    for id in [&failed, &waiting] {
        harness.orchestrator.register_document(id).await.unwrap();
    }
    harness
        .orchestrator
        .fail_stage(&failed, StageName::Upload, "virus scan".into(), Metadata::new(), None)
        .await
        .unwrap();

    let claimable = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "claimable-documents".into(),
            arguments: arguments(json!({ "stage": "upload" })),
        })
        .await
        .expect("claimable call");
    let payload = claimable.structured_content.expect("structured payload");
    assert_eq!(payload["documents"], json!(["bulletin-8"]));
    assert_eq!(payload["limit"], 10);

    let listed = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "list-documents".into(),
            arguments: arguments(json!({ "status": "failed" })),
        })
        .await
        .expect("list call");
    let payload = listed.structured_content.expect("structured payload");
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["documents"][0]["document_id"], "bulletin-7");

    let retried = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "retry-stage".into(),
            arguments: arguments(json!({ "document_id": "bulletin-7", "stage": "upload" })),
        })
        .await
        .expect("retry call");
    let payload = retried.structured_content.expect("structured payload");
    assert_eq!(payload["attemptCount"], 1);
    assert_eq!(
        harness
            .orchestrator
            .stage_record(&failed, StageName::Upload)
            .await
            .unwrap()
            .status,
        StageStatus::Processing
    );

    let metrics = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "metrics".into(),
            arguments: arguments(json!({})),
        })
        .await
        .expect("metrics call");
    let payload = metrics.structured_content.expect("structured metrics");
    assert_eq!(payload["documentsRegistered"], 2);
    assert_eq!(payload["stagesFailed"], 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn retry_of_pending_stage_returns_invalid_params() {
    let harness = TestHarness::new().await;
    harness
        .orchestrator
        .register_document(&doc("catalog-1"))
        .await
        .unwrap();

    let err = harness
        .service
        .call_tool(CallToolRequestParam {
            name: "retry-stage".into(),
            arguments: arguments(json!({ "document_id": "catalog-1", "stage": "upload" })),
        })
        .await
        .expect_err("pending stage cannot be retried");

    match err {
        rmcp::service::ServiceError::McpError(data) => {
            assert_eq!(data.code, model::ErrorCode::INVALID_PARAMS);
            assert!(data.message.contains("retry"));
        }
        other => panic!("expected MCP error, got {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn resources_expose_stage_chain_settings_and_documents() {
    let harness = TestHarness::new().await;
    harness
        .orchestrator
        .register_document(&doc("manual-55"))
        .await
        .unwrap();

    let stages = harness
        .service
        .read_resource(ReadResourceRequestParam {
            uri: "mcp://stages".into(),
        })
        .await
        .expect("stages resource");
    let value: Value = serde_json::from_str(resource_text(&stages.contents[0])).unwrap();
    assert_eq!(value["stages"][2]["stage"], "image_processing");

    let settings = harness
        .service
        .read_resource(ReadResourceRequestParam {
            uri: "mcp://settings".into(),
        })
        .await
        .expect("settings resource");
    let value: Value = serde_json::from_str(resource_text(&settings.contents[0])).unwrap();
    assert_eq!(value["leases"]["default_lease_seconds"], 120);
    assert_eq!(value["leases"]["sweep_interval_seconds"], 0);

    let document = harness
        .service
        .read_resource(ReadResourceRequestParam {
            uri: "mcp://documents/manual-55".into(),
        })
        .await
        .expect("document resource");
    let value: Value = serde_json::from_str(resource_text(&document.contents[0])).unwrap();
    assert_eq!(value["document_id"], "manual-55");
    assert_eq!(value["processing_status"], "pending");
    assert_eq!(value["stages"].as_object().unwrap().len(), 8);

    let templates = harness
        .service
        .list_resource_templates(Some(PaginatedRequestParam { cursor: None }))
        .await
        .expect("templates");
    assert_eq!(
        templates.resource_templates[0].uri_template,
        "mcp://documents/{document_id}"
    );

    harness.shutdown().await;
}
