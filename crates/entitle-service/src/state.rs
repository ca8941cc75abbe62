//! Application state.

use std::sync::Arc;

use entitle_core::OrgId;
use entitle_store::RocksStore;
use entitle_stripe::{StripeClient, StripeConfig};

use crate::config::ServiceConfig;
use crate::locks::CustomerLocks;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Organization this instance serves, parsed once.
    pub org_id: OrgId,

    /// Stripe client for processor actions (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Per-customer operation serialization.
    pub locks: CustomerLocks,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Panics
    ///
    /// Panics if the configured org id is not a valid identifier.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let org_id: OrgId = config.org_id.parse().expect("invalid ORG_ID");

        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            let mut stripe_config = StripeConfig::new(key);
            if let Some(base_url) = &config.stripe_base_url {
                stripe_config = stripe_config.with_base_url(base_url);
            }
            match StripeClient::new(stripe_config) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - paid products cannot be billed");
        }

        Self {
            store,
            config,
            org_id,
            stripe,
            locks: CustomerLocks::default(),
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }
}
