//! Operator CLI for a running `docpipe` HTTP server.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};

#[derive(Parser)]
#[command(
    name = "docpipe-ctl",
    about = "Inspect and drive document pipeline state over HTTP"
)]
struct Cli {
    /// Base URL of the docpipe HTTP server.
    #[arg(
        long,
        env = "DOCPIPE_URL",
        default_value = "http://127.0.0.1:4300",
        global = true
    )]
    url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the ordered stage chain.
    Stages,
    /// Register a newly ingested document.
    Register { document_id: String },
    /// Print every stage record of a document.
    Status { document_id: String },
    /// Print progress and current stage of a document.
    Progress { document_id: String },
    /// List documents, optionally filtered by processing status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// List documents whose stage may be claimed now.
    Claimable {
        stage: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Claim a stage for a worker.
    Claim {
        document_id: String,
        stage: String,
        #[arg(long)]
        worker_id: String,
        #[arg(long)]
        lease_seconds: Option<u64>,
    },
    /// Start a stage without a lease.
    Start { document_id: String, stage: String },
    /// Mark a stage completed.
    Complete {
        document_id: String,
        stage: String,
        /// JSON object merged into the stage metadata.
        #[arg(long)]
        metadata: Option<String>,
        /// Report as this lease holder.
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Mark a stage failed.
    Fail {
        document_id: String,
        stage: String,
        #[arg(long)]
        error: String,
        /// Report as this lease holder.
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Mark a stage skipped.
    Skip {
        document_id: String,
        stage: String,
        #[arg(long)]
        reason: String,
        /// Report as this lease holder.
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Move a failed stage back to processing.
    Retry { document_id: String, stage: String },
    /// Fail stale processing stages now.
    Sweep {
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// Print lifecycle counters.
    Metrics,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.url)?;
    let response = match cli.command {
        Command::Stages => client.call(Method::GET, "stages", None).await?,
        Command::Register { document_id } => {
            client
                .call(
                    Method::POST,
                    "documents",
                    Some(json!({ "document_id": document_id })),
                )
                .await?
        }
        Command::Status { document_id } => {
            client
                .call(Method::GET, &format!("documents/{document_id}"), None)
                .await?
        }
        Command::Progress { document_id } => {
            client
                .call(Method::GET, &format!("documents/{document_id}/progress"), None)
                .await?
        }
        Command::List { status } => {
            let path = match status {
                Some(status) => format!("documents?status={status}"),
                None => "documents".to_string(),
            };
            client.call(Method::GET, &path, None).await?
        }
        Command::Claimable { stage, limit } => {
            let path = match limit {
                Some(limit) => format!("stages/{stage}/claimable?limit={limit}"),
                None => format!("stages/{stage}/claimable"),
            };
            client.call(Method::GET, &path, None).await?
        }
        Command::Claim {
            document_id,
            stage,
            worker_id,
            lease_seconds,
        } => {
            client
                .call(
                    Method::POST,
                    &stage_path(&document_id, &stage, "claim"),
                    Some(json!({ "worker_id": worker_id, "lease_seconds": lease_seconds })),
                )
                .await?
        }
        Command::Start { document_id, stage } => {
            client
                .call(Method::POST, &stage_path(&document_id, &stage, "start"), None)
                .await?
        }
        Command::Complete {
            document_id,
            stage,
            metadata,
            worker_id,
        } => {
            let metadata = parse_metadata(metadata.as_deref())?;
            client
                .call(
                    Method::POST,
                    &stage_path(&document_id, &stage, "complete"),
                    Some(json!({ "metadata": metadata, "worker_id": worker_id })),
                )
                .await?
        }
        Command::Fail {
            document_id,
            stage,
            error,
            worker_id,
        } => {
            client
                .call(
                    Method::POST,
                    &stage_path(&document_id, &stage, "fail"),
                    Some(json!({ "error": error, "worker_id": worker_id })),
                )
                .await?
        }
        Command::Skip {
            document_id,
            stage,
            reason,
            worker_id,
        } => {
            client
                .call(
                    Method::POST,
                    &stage_path(&document_id, &stage, "skip"),
                    Some(json!({ "reason": reason, "worker_id": worker_id })),
                )
                .await?
        }
        Command::Retry { document_id, stage } => {
            client
                .call(Method::POST, &stage_path(&document_id, &stage, "retry"), None)
                .await?
        }
        Command::Sweep { timeout_seconds } => {
            client
                .call(
                    Method::POST,
                    "sweep",
                    Some(json!({ "timeout_seconds": timeout_seconds })),
                )
                .await?
        }
        Command::Metrics => client.call(Method::GET, "metrics", None).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn stage_path(document_id: &str, stage: &str, action: &str) -> String {
    format!("documents/{document_id}/stages/{stage}/{action}")
}

fn parse_metadata(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("metadata must be valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("metadata must be a JSON object"),
    }
}

struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("docpipe-ctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url} failed"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            bail!("{method} {url} returned {status}: {message}");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[test]
    fn parses_metadata_objects_only() {
        assert!(parse_metadata(None).unwrap().is_empty());
        assert_eq!(parse_metadata(Some(r#"{"pages":3}"#)).unwrap()["pages"], 3);
        assert!(parse_metadata(Some("[1,2]")).is_err());
        assert!(parse_metadata(Some("not json")).is_err());
    }

    #[tokio::test]
    async fn surfaces_server_error_messages() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/documents/a/stages/upload/retry");
                then.status(409)
                    .json_body(json!({ "error": "Cannot retry stage upload of document a while it is pending" }));
            })
            .await;

        let client = ApiClient::new(&server.base_url()).expect("client");
        let err = client
            .call(Method::POST, &stage_path("a", "upload", "retry"), None)
            .await
            .expect_err("409 is an error");
        assert!(err.to_string().contains("while it is pending"));
    }
}
