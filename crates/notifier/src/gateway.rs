//! HTTP client for the push gateway.
//!
//! One batch is one JSON POST. The reply body is decoded whatever the HTTP
//! status; deciding what a status >= 300 means is left to the caller.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use herald_common::types::{BatchResponse, OutboundMessage};

const JSON_UTF8: &str = "application/json; charset=utf-8";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway address: {0}")]
    Address(String),

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed gateway response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Gateway reply: HTTP status plus decoded body.
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub status: StatusCode,
    pub batch: BatchResponse,
}

impl GatewayReply {
    /// Whether the gateway refused the request at the HTTP level.
    pub fn rejected(&self) -> bool {
        self.status.as_u16() >= 300
    }
}

/// Client for one gateway endpoint.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    url: Url,
}

impl GatewayClient {
    /// Build a client for `address` with a per-request deadline.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let url =
            Url::parse(address).map_err(|e| GatewayError::Address(format!("{address}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Address(format!(
                "{address}: unsupported scheme {}",
                url.scheme()
            )));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST one batch and decode the reply.
    ///
    /// Transport failures and undecodable 2xx bodies are errors. A rejected
    /// request (status >= 300) with an unreadable body yields an empty
    /// `BatchResponse`.
    pub async fn send(&self, message: &OutboundMessage) -> Result<GatewayReply, GatewayError> {
        let body = serde_json::to_vec(message).map_err(GatewayError::Encode)?;

        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        let batch = if status.as_u16() >= 300 {
            serde_json::from_slice(&bytes).unwrap_or_default()
        } else {
            serde_json::from_slice(&bytes).map_err(GatewayError::Decode)?
        };

        Ok(GatewayReply { status, batch })
    }
}
