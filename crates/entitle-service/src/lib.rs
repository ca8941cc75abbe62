//! HTTP API service for entitle.
//!
//! Thin request glue around the core engine: handlers parse an operation,
//! the context builder loads everything it needs, the resolver produces a
//! billing plan, and the executor applies it (processor first, local
//! second). The cache consistency verifier and the balance reset worker
//! run out-of-band.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod locks;
pub mod routes;
pub mod state;
pub mod verifier;

pub use config::ServiceConfig;
pub use routes::create_router;
pub use state::AppState;
