//! The network seam.
//!
//! [`Transport`] only moves CBOR bytes; it performs no classification beyond
//! surfacing I/O failures as transient errors. Interpreting response status
//! codes and bodies is the agent's job, so mock transports in tests exercise
//! the same code paths as the production HTTP implementation.

use async_trait::async_trait;
use ledgerflow_core::{CallError, Principal, Result};
use tracing::debug;

/// Raw response from one endpoint round trip.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    pub fn accepted() -> Self {
        Self { status: 202, body: Vec::new() }
    }
}

/// Moves signed envelopes to a service instance and returns raw responses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit a state-mutating call envelope.
    async fn call(&self, canister: &Principal, envelope: Vec<u8>) -> Result<TransportResponse>;

    /// Read certified state (request status paths).
    async fn read_state(&self, canister: &Principal, envelope: Vec<u8>)
        -> Result<TransportResponse>;

    /// Execute a read-only query.
    async fn query(&self, canister: &Principal, envelope: Vec<u8>) -> Result<TransportResponse>;
}

/// Production transport speaking the `/api/v2/canister/<id>/<endpoint>`
/// surface over HTTPS.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for the given gateway base URL, e.g.
    /// `https://ic0.app` or `http://127.0.0.1:4943`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CallError::transient(format!("http client init failed: {e}")))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { client, base_url })
    }

    async fn post(&self, canister: &Principal, endpoint: &str, body: Vec<u8>)
        -> Result<TransportResponse> {
        let url = format!(
            "{}/api/v2/canister/{}/{}",
            self.base_url,
            canister.to_text(),
            endpoint
        );
        debug!(%url, bytes = body.len(), "posting envelope");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/cbor")
            .body(body)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("http request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| CallError::transient(format!("http body read failed: {e}")))?
            .to_vec();
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, canister: &Principal, envelope: Vec<u8>) -> Result<TransportResponse> {
        self.post(canister, "call", envelope).await
    }

    async fn read_state(&self, canister: &Principal, envelope: Vec<u8>)
        -> Result<TransportResponse> {
        self.post(canister, "read_state", envelope).await
    }

    async fn query(&self, canister: &Principal, envelope: Vec<u8>) -> Result<TransportResponse> {
        self.post(canister, "query", envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let transport = HttpTransport::new("https://ic0.app///").unwrap();
        assert_eq!(transport.base_url, "https://ic0.app");
    }
}
