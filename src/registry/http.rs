//! HTTP client that pushes processing status into an external Document Registry.

use crate::pipeline::{DocumentId, ProcessingStatus};
use crate::registry::{DocumentRegistry, RegistryError};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::json;

/// Registry reached over HTTP: `PATCH {base_url}/documents/{id}`.
///
/// The document id is sent as a single percent-encoded path segment.
pub struct HttpDocumentRegistry {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDocumentRegistry {
    /// Build a client for the registry at `base_url`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(concat!("docpipe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(RegistryError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized document registry client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn document_url(&self, document_id: &DocumentId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("documents")
                .push(document_id.as_str());
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.bearer_auth(api_key);
        }
        req
    }
}

#[async_trait]
impl DocumentRegistry for HttpDocumentRegistry {
    async fn update_status(
        &self,
        document_id: &DocumentId,
        status: ProcessingStatus,
    ) -> Result<(), RegistryError> {
        let response = self
            .request(Method::PATCH, self.document_url(document_id))
            .json(&json!({ "processing_status": status }))
            .send()
            .await?;

        if response.status().is_success() {
            tracing::debug!(document_id = %document_id, status = %status, "Registry status pushed");
            Ok(())
        } else {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = RegistryError::UnexpectedStatus {
                status: status_code,
                body,
            };
            tracing::error!(document_id = %document_id, error = %error, "Registry update failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url).map_err(|err| err.to_string())?;
    if parsed.cannot_be_a_base() {
        return Err(format!("{url} cannot carry a path"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::PATCH, MockServer};

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            HttpDocumentRegistry::new("not a url", None),
            Err(RegistryError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_urls_without_a_path() {
        assert!(matches!(
            HttpDocumentRegistry::new("mailto:registry@example.com", None),
            Err(RegistryError::InvalidUrl(_))
        ));
    }

    #[test]
    fn document_url_tolerates_trailing_slashes() {
        for base in ["http://registry.local/api", "http://registry.local/api/"] {
            let registry = HttpDocumentRegistry::new(base, None).expect("client");
            assert_eq!(
                registry
                    .document_url(&DocumentId::new("manual-1").unwrap())
                    .as_str(),
                "http://registry.local/api/documents/manual-1"
            );
        }
    }

    #[tokio::test]
    async fn encodes_document_id_as_one_segment() {
        let server = MockServer::start_async().await;
        let encoded = server
            .mock_async(|when, then| {
                when.method(PATCH).path("/documents/a%2Fb%3Fc");
                then.status(204);
            })
            .await;
        let misrouted = server
            .mock_async(|when, then| {
                when.method(PATCH).path("/documents/a/b");
                then.status(204);
            })
            .await;

        let registry = HttpDocumentRegistry::new(&server.base_url(), None).expect("client");
        registry
            .update_status(
                &DocumentId::new("a/b?c").unwrap(),
                ProcessingStatus::Failed,
            )
            .await
            .expect("update succeeds");
        encoded.assert_async().await;
        misrouted.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn patches_processing_status() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/documents/manual-42")
                    .header("authorization", "Bearer secret")
                    .json_body(json!({ "processing_status": "failed" }));
                then.status(204);
            })
            .await;

        let registry =
            HttpDocumentRegistry::new(&server.base_url(), Some("secret".into())).expect("client");
        registry
            .update_status(
                &DocumentId::new("manual-42").unwrap(),
                ProcessingStatus::Failed,
            )
            .await
            .expect("update succeeds");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/documents/missing");
                then.status(404).body("no such document");
            })
            .await;

        let registry = HttpDocumentRegistry::new(&server.base_url(), None).expect("client");
        let err = registry
            .update_status(
                &DocumentId::new("missing").unwrap(),
                ProcessingStatus::Completed,
            )
            .await
            .expect_err("404 is an error");
        match err {
            RegistryError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(body, "no such document");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
