//! Entitle API client implementation.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ClientError;
use crate::types::{
    AttachParams, AttachResponse, CancelResponse, CheckResponse, ErrorResponse, TrackResponse,
};

/// Options for constructing an [`EntitleClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client for the entitle API.
#[derive(Debug, Clone)]
pub struct EntitleClient {
    client: Client,
    base_url: String,
}

impl EntitleClient {
    /// Create a new client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the base URL
    /// is empty.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, &ClientOptions::default())
    }

    /// Create a new client with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the base URL
    /// is empty.
    pub fn with_options(
        base_url: impl Into<String>,
        options: &ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base URL is empty".into()));
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status().as_u16();
        match response.json::<ErrorResponse>().await {
            Ok(body) => Err(ClientError::Api {
                code: body.error.code,
                message: body.error.message,
                status,
            }),
            Err(_) => Err(ClientError::Api {
                code: "unknown".into(),
                message: format!("unexpected status {status}"),
                status,
            }),
        }
    }

    /// Attach a product to a customer (or update an attached one).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error response.
    pub async fn attach(&self, params: &AttachParams) -> Result<AttachResponse, ClientError> {
        self.post_json("/v1/attach", params).await
    }

    /// Cancel an attached product.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error response.
    pub async fn cancel(
        &self,
        customer_id: &str,
        product_id: &str,
        cancel_immediately: bool,
    ) -> Result<CancelResponse, ClientError> {
        self.post_json(
            "/v1/cancel",
            &serde_json::json!({
                "customer_id": customer_id,
                "product_id": product_id,
                "cancel_immediately": cancel_immediately,
            }),
        )
        .await
    }

    /// Track feature usage, deducting the customer's balance.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error response.
    pub async fn track(
        &self,
        customer_id: &str,
        feature_id: &str,
        value: f64,
    ) -> Result<TrackResponse, ClientError> {
        self.post_json(
            "/v1/track",
            &serde_json::json!({
                "customer_id": customer_id,
                "feature_id": feature_id,
                "value": value,
            }),
        )
        .await
    }

    /// Check whether a customer may consume a feature.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error response.
    pub async fn check(
        &self,
        customer_id: &str,
        feature_id: &str,
        required_balance: Option<f64>,
    ) -> Result<CheckResponse, ClientError> {
        self.post_json(
            "/v1/check",
            &serde_json::json!({
                "customer_id": customer_id,
                "feature_id": feature_id,
                "required_balance": required_balance,
            }),
        )
        .await
    }
}
