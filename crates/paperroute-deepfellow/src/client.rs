//! DeepFellow HTTP client.

use crate::error::{DeepfellowError, DeepfellowResult};
use crate::types::*;
use paperroute_config::DeepfellowConfig;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Client for interacting with DeepFellow's API.
#[derive(Clone)]
pub struct DeepfellowClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    ocr_endpoint: String,
    vision_endpoint: String,
    responses_endpoint: String,
    rag_endpoint: String,
    vision_model: String,
    llm_model: String,
    rag_collection: String,
}

impl DeepfellowClient {
    /// Create a new client from configuration.
    pub fn from_config(config: &DeepfellowConfig) -> DeepfellowResult<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DeepfellowError::Http)?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| DeepfellowError::InvalidConfig(format!("base_url: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout,
            ocr_endpoint: config.ocr_endpoint.clone(),
            vision_endpoint: config.vision_endpoint.clone(),
            responses_endpoint: config.responses_endpoint.clone(),
            rag_endpoint: config.rag_endpoint.clone(),
            vision_model: config.vision_model.clone(),
            llm_model: config.llm_model.clone(),
            rag_collection: config.rag_collection.clone(),
        })
    }

    /// Model used for synthesis and classification.
    pub fn llm_model(&self) -> &str {
        &self.llm_model
    }

    /// Join the base URL and an endpoint path.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// URL of a document in the configured RAG collection. The ID is
    /// percent-encoded as a single path segment.
    pub fn document_url(&self, id: Option<&str>) -> DeepfellowResult<Url> {
        let mut url = Url::parse(&self.endpoint_url(&self.rag_endpoint))
            .map_err(|e| DeepfellowError::InvalidConfig(format!("rag_endpoint: {}", e)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                DeepfellowError::InvalidConfig("rag_endpoint cannot be a base URL".to_string())
            })?;
            segments.pop_if_empty().push(&self.rag_collection).push("documents");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Check if the server is reachable.
    pub async fn is_available(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }

    /// Run OCR over a document.
    pub async fn ocr(&self, path: &Path) -> DeepfellowResult<OcrResponse> {
        let url = self.endpoint_url(&self.ocr_endpoint);
        info!("Starting OCR extraction: {}", path.display());

        let form = Form::new().part("file", file_part(path).await?);
        let response = self.send(self.client.post(&url).multipart(form)).await?;

        let ocr: OcrResponse = response
            .json()
            .await
            .map_err(|e| DeepfellowError::ParseError(e.to_string()))?;
        info!("OCR complete: {} ({} pages)", path.display(), ocr.pages.len());
        Ok(ocr)
    }

    /// Run the vision model over a document.
    pub async fn vision(&self, path: &Path) -> DeepfellowResult<VisionResponse> {
        let url = self.endpoint_url(&self.vision_endpoint);
        debug!("Starting vision extraction with model {}", self.vision_model);

        let form = Form::new()
            .text("model", self.vision_model.clone())
            .part("file", file_part(path).await?);
        let response = self.send(self.client.post(&url).multipart(form)).await?;

        response
            .json()
            .await
            .map_err(|e| DeepfellowError::ParseError(e.to_string()))
    }

    /// Generate text through the responses endpoint.
    pub async fn respond(&self, request: ResponsesRequest) -> DeepfellowResult<String> {
        let url = self.endpoint_url(&self.responses_endpoint);
        debug!("Generating with model {}", request.model);

        let response = self.send(self.client.post(&url).json(&request)).await?;
        let body: ResponsesResponse = response
            .json()
            .await
            .map_err(|e| DeepfellowError::ParseError(e.to_string()))?;

        Ok(body.text())
    }

    /// Add a document to the RAG collection.
    pub async fn index_document(
        &self,
        id: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> DeepfellowResult<()> {
        let url = self.document_url(None)?;
        let body = IndexDocumentRequest { id, content, metadata };
        self.send(self.client.post(url).json(&body)).await?;
        debug!("Indexed document {}", id);
        Ok(())
    }

    /// Replace a document in the RAG collection.
    pub async fn reindex_document(
        &self,
        id: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> DeepfellowResult<()> {
        let url = self.document_url(Some(id))?;
        let body = IndexDocumentRequest { id, content, metadata };
        self.send(self.client.put(url).json(&body)).await?;
        debug!("Reindexed document {}", id);
        Ok(())
    }

    /// Remove a document from the RAG collection. Returns `false` when the
    /// document did not exist.
    pub async fn delete_document(&self, id: &str) -> DeepfellowResult<bool> {
        let url = self.document_url(Some(id))?;
        match self.send(self.client.delete(url)).await {
            Ok(_) => Ok(true),
            Err(DeepfellowError::ApiError { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!("Document {} already absent from index", id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Send an authenticated request and map transport and status errors.
    async fn send(&self, builder: RequestBuilder) -> DeepfellowResult<Response> {
        let response = builder
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    DeepfellowError::Connection(e.to_string())
                } else if e.is_timeout() {
                    DeepfellowError::Timeout {
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    DeepfellowError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeepfellowError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        Ok(response)
    }
}

async fn file_part(path: &Path) -> DeepfellowResult<Part> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}
