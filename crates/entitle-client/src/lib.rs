//! Entitle Client SDK.
//!
//! This crate provides a client library for applications to interact with
//! the entitle API: feature gates, attaches, and cancellations.
//!
//! # Example
//!
//! ```no_run
//! use entitle_client::{AttachParams, EntitleClient};
//!
//! # async fn example() -> Result<(), entitle_client::ClientError> {
//! let client = EntitleClient::new("http://entitle.billing.svc:8080")?;
//!
//! // Gate a feature
//! let check = client.check("cus-1", "messages", None).await?;
//! if check.allowed {
//!     // ... serve the request, then track usage
//! }
//!
//! // Upgrade the customer
//! client.attach(&AttachParams {
//!     customer_id: "cus-1".into(),
//!     product_id: "pro".into(),
//!     ..AttachParams::default()
//! }).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, EntitleClient};
pub use error::ClientError;
pub use types::{
    AttachParams, AttachResponse, AttachedProduct, CancelResponse, CheckResponse, FeatureQuantity,
    TrackResponse,
};
