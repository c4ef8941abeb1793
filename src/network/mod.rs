//! Network trait and implementations.
//!
//! `Network` abstracts perform-request-by-descriptor for testability.
//! `HttpNetwork` makes real requests over reqwest.
//! `MockNetwork` is used in tests and records every call.

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::{PrecacheError, Result};
use crate::request::{RequestDescriptor, ResponseSnapshot};

/// Performs a request and buffers the whole response.
///
/// Any HTTP status is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot>;
}

/// Network backed by a shared reqwest client.
pub struct HttpNetwork {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpNetwork {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| PrecacheError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| PrecacheError::Network(format!("{} failed: {}", request, e)))?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await.map_err(|e| {
            PrecacheError::Network(format!("Failed reading body of {}: {}", request, e))
        })?;
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Network fetch complete");

        Ok(ResponseSnapshot {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
            stored_at: None,
        })
    }
}

/// Mock network for tests.
///
/// Serves canned responses by URL; any URL without one (or marked failing)
/// is a transport error. Every call is recorded in order.
#[cfg(test)]
#[derive(Default)]
pub struct MockNetwork {
    pub responses: std::sync::Mutex<std::collections::HashMap<String, ResponseSnapshot>>,
    pub calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 for `url`.
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_response(url, ResponseSnapshot::new(url, 200, body))
    }

    pub fn with_response(self, url: &str, response: ResponseSnapshot) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == url)
            .count()
    }
}

#[cfg(test)]
#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());
        self.responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or_else(|| {
                PrecacheError::Network(format!("{} failed: connection refused", request))
            })
    }
}
