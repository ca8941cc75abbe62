//! Stripe API client for entitle.
//!
//! The billing engine treats the payment processor as a black box: it
//! issues declarative subscription, schedule, and invoice actions and
//! reads back snapshots for context building. Proration math, tax, and
//! payment collection are processor-owned.
//!
//! # Example
//!
//! ```no_run
//! use entitle_stripe::{StripeClient, StripeConfig};
//!
//! # async fn example() -> Result<(), entitle_stripe::StripeError> {
//! let client = StripeClient::new(StripeConfig::new("sk_test_..."))?;
//! let customer = client.get_customer("cus_123").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod config;
mod error;
pub mod types;

pub use client::StripeClient;
pub use config::StripeConfig;
pub use error::{Result, StripeError};
