//! Stripe client configuration.

use std::time::Duration;

/// Configuration for the Stripe client.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_test_...` or `sk_live_...`).
    pub api_key: String,

    /// API base URL. Overridable so tests can point at a mock server.
    pub base_url: String,

    /// Request timeout. Kept short and explicit: processor calls sit on
    /// the request path and money-moving calls are never retried blindly.
    pub timeout: Duration,
}

impl StripeConfig {
    /// Production Stripe API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a configuration with defaults for the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Override the base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let config = StripeConfig::new("sk_test_123")
            .with_base_url("http://localhost:9999")
            .with_timeout(Duration::from_secs(3));

        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.api_key, "sk_test_123");
    }
}
