//! `PutMetricData` over the backend's JSON protocol
use async_trait::async_trait;
use log::{debug, trace, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Request};
use serde::Deserialize;
use std::sync::Arc;

use super::{PublishError, PublishOutcome, Publisher};
use crate::batcher::Batch;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::sample::PutMetricDataRequest;

const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.0";
const TARGET_HEADER: &str = "X-Amz-Target";
const PUT_METRIC_DATA_TARGET: &str = "GraniteServiceVersion20100801.PutMetricData";

/// Attaches credentials to an outgoing request
pub trait RequestAuthorizer: Send + Sync + 'static {
    fn authorize(&self, request: Request) -> std::result::Result<Request, String>;

    /// Whether requests leave with credentials attached
    fn signs_requests(&self) -> bool {
        true
    }
}

/// Sends requests unsigned, for local endpoints
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl RequestAuthorizer for Anonymous {
    fn authorize(&self, request: Request) -> std::result::Result<Request, String> {
        Ok(request)
    }

    fn signs_requests(&self) -> bool {
        false
    }
}

/// Error body returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Publishes batches with one HTTP request each
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
    namespace: String,
    authorizer: Arc<dyn RequestAuthorizer>,
    unsigned_remote: bool,
}

impl HttpPublisher {
    pub fn new(config: &BridgeConfig, authorizer: Arc<dyn RequestAuthorizer>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.api_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BridgeError::Publish(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            "HTTP publisher targeting {} (namespace {})",
            config.endpoint(),
            config.namespace
        );

        let unsigned_remote = config.endpoint_override.is_none() && !authorizer.signs_requests();
        if unsigned_remote {
            warn!(
                "Requests to {} are sent unsigned and will be rejected; set endpoint_override for a local endpoint",
                config.endpoint()
            );
        }

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            namespace: config.namespace.clone(),
            authorizer,
            unsigned_remote,
        })
    }

    /// Unsigned requests headed for the regional AWS endpoint
    pub fn unsigned_remote(&self) -> bool {
        self.unsigned_remote
    }

    async fn send(&self, batch: &Batch) -> std::result::Result<(), PublishError> {
        let body = serde_json::to_vec(&PutMetricDataRequest::new(&self.namespace, batch.samples()))
            .map_err(|e| PublishError::Request(e.to_string()))?;

        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(TARGET_HEADER, PUT_METRIC_DATA_TARGET)
            .body(body)
            .build()
            .map_err(|e| PublishError::Request(e.to_string()))?;
        let request = self
            .authorizer
            .authorize(request)
            .map_err(PublishError::Authorization)?;

        let response = self.client.execute(request).await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            trace!("Batch {} accepted with status {}", batch.index, status);
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(response_error(status.as_u16(), &text))
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, batch: &Batch) -> PublishOutcome {
        self.send(batch).await.into()
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(error: reqwest::Error) -> PublishError {
    if error.is_builder() {
        PublishError::Request(error.to_string())
    } else {
        PublishError::Transport {
            message: error.to_string(),
        }
    }
}

/// Turn a non-success response into a classified error
fn response_error(status: u16, body: &str) -> PublishError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => PublishError::from_response(
            status,
            parsed.kind,
            parsed.message.unwrap_or_else(|| body.to_string()),
        ),
        Err(_) => PublishError::from_response(status, None, body.to_string()),
    }
}
