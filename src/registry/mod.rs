//! Document Registry boundary.
//!
//! The registry owns document identity and business fields. The orchestrator only pushes the
//! aggregate processing status through [`DocumentRegistry::update_status`].

mod http;

pub use http::HttpDocumentRegistry;

use crate::pipeline::{DocumentId, ProcessingStatus};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors returned while informing the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid registry URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Registry responded with an unexpected status code.
    #[error("Unexpected registry response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the registry.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Receiver of document-level status changes.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// Set the document's processing status field. No other field is written.
    async fn update_status(
        &self,
        document_id: &DocumentId,
        status: ProcessingStatus,
    ) -> Result<(), RegistryError>;
}

/// Registry kept in process memory; used when no external registry is configured.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    statuses: RwLock<HashMap<DocumentId, ProcessingStatus>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last status pushed for the document.
    pub async fn status(&self, document_id: &DocumentId) -> Option<ProcessingStatus> {
        self.statuses.read().await.get(document_id).copied()
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn update_status(
        &self,
        document_id: &DocumentId,
        status: ProcessingStatus,
    ) -> Result<(), RegistryError> {
        self.statuses
            .write()
            .await
            .insert(document_id.clone(), status);
        tracing::debug!(document_id = %document_id, status = %status, "Registry status recorded");
        Ok(())
    }
}
