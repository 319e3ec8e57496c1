//! Vision-model extraction client.
//!
//! `FieldExtractor` is the seam the worker calls through; the production
//! implementation talks to an Ollama-style chat endpoint, inlining the
//! stored images base64 and demanding strict-JSON output. The whole call is
//! bounded by the configured extraction timeout at the HTTP-client level.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::db::DocumentType;
use crate::error::{ServiceError, ServiceResult, VisionError};
use crate::fields;
use crate::storage::ObjectStore;

/// Black-box extraction function: images in, field mapping out.
///
/// All-or-nothing per call; no partial results.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(
        &self,
        primary_ref: &str,
        secondary_ref: Option<&str>,
        document_type: DocumentType,
    ) -> ServiceResult<BTreeMap<String, String>>;

    /// Backend reachability, surfaced in /health. Non-fatal when false.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Vision extraction client against an Ollama-style chat API
pub struct VisionClient {
    client: Client,
    config: ExtractionConfig,
    store: Arc<dyn ObjectStore>,
}

impl VisionClient {
    pub fn new(config: ExtractionConfig, store: Arc<dyn ObjectStore>) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::Vision(VisionError::Connection {
                    url: config.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self {
            client,
            config,
            store,
        })
    }

    async fn load_image_base64(&self, reference: &str) -> ServiceResult<String> {
        let bytes = self.store.get(reference).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[async_trait]
impl FieldExtractor for VisionClient {
    async fn extract(
        &self,
        primary_ref: &str,
        secondary_ref: Option<&str>,
        document_type: DocumentType,
    ) -> ServiceResult<BTreeMap<String, String>> {
        let mut images = vec![self.load_image_base64(primary_ref).await?];
        if let Some(secondary) = secondary_ref {
            images.push(self.load_image_base64(secondary).await?);
        }

        let prompt = fields::extraction_prompt(document_type, secondary_ref.is_some());

        let request = VisionChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
                images: Some(images),
            }],
            stream: false,
            format: "json".to_string(),
            options: VisionOptions { temperature: 0.0 },
        };

        let url = format!("{}/api/chat", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| VisionError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Vision(VisionError::Extraction {
                status,
                message,
            }));
        }

        let chat_response: VisionChatResponse =
            response
                .json()
                .await
                .map_err(|e| VisionError::InvalidResponse {
                    message: e.to_string(),
                })?;

        let extracted = fields::parse_extraction(&chat_response.message.content, document_type)?;

        Ok(extracted)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Vision backend health check failed");
                false
            }
        }
    }
}

// Internal chat API types

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
    /// Base64-encoded images for vision models
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct VisionChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
    options: VisionOptions,
}

#[derive(Debug, Serialize)]
struct VisionOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct VisionChatResponse {
    message: VisionMessage,
}

#[derive(Debug, Deserialize)]
struct VisionMessage {
    #[serde(default)]
    content: String,
}
