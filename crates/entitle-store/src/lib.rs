//! `RocksDB` storage layer for entitle.
//!
//! This crate is the durable entitlement store: customers, product
//! definitions, customer product aggregates (with their entitlement
//! balances and price rows embedded), and the cached customer projection
//! read-model.
//!
//! # Architecture
//!
//! Column families:
//!
//! - `customers`: customer identity records
//! - `products`: product definitions, keyed per version
//! - `customer_products`: attachment aggregates, keyed by row id
//! - `customer_products_by_customer`: index for listing per customer
//! - `projections`: the cached read-model, deleted on every mutation
//!
//! The local side of a billing plan is applied through [`Store::apply_plan`]
//! in a single `WriteBatch`, with optimistic revision checks on updated
//! rows. Entitlement balances are mutated exclusively through this path.
//!
//! # Example
//!
//! ```no_run
//! use entitle_store::{RocksStore, Store};
//! use entitle_core::{AppEnv, CustomerId, OrgId};
//!
//! let store = RocksStore::open("/tmp/entitle-db").unwrap();
//! let org = OrgId::new("org-1").unwrap();
//! let customer = CustomerId::new("cus-1").unwrap();
//! let loaded = store.get_customer(&org, AppEnv::Sandbox, &customer).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use entitle_core::{
    AppEnv, Customer, CustomerId, CustomerProduct, CustomerProjection, LocalOp, OrgId, Product,
    ProductId, RowId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g. `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Customers
    // =========================================================================

    /// Insert or update a customer identity record.
    ///
    /// Attachments are not written here; they change only through
    /// [`Store::apply_plan`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_customer(&self, customer: &Customer) -> Result<()>;

    /// Get a customer with all current attachments loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_customer(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<Option<Customer>>;

    // =========================================================================
    // Product Definitions (read-mostly)
    // =========================================================================

    /// Insert or update one product version.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_product(&self, org_id: &OrgId, env: AppEnv, product: &Product) -> Result<()>;

    /// Get a product by id and version; `None` version means latest.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_product(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        product_id: &ProductId,
        version: Option<u32>,
    ) -> Result<Option<Product>>;

    /// List the latest version of every default product in an org/env.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_default_products(&self, org_id: &OrgId, env: AppEnv) -> Result<Vec<Product>>;

    // =========================================================================
    // Customer Products
    // =========================================================================

    /// Get one attachment aggregate by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_customer_product(&self, row_id: RowId) -> Result<Option<CustomerProduct>>;

    /// List a customer's attachments, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_customer_products(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<Vec<CustomerProduct>>;

    /// Apply the local side of a billing plan in one atomic batch.
    ///
    /// Revision checks compare against the stored revision at load time, so
    /// several ops resolved from one snapshot apply together; each touched
    /// row's revision is bumped exactly once.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RevisionConflict`] when a row changed concurrently.
    /// - [`StoreError::NotFound`] when an op targets a missing row.
    fn apply_plan(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
        ops: &[LocalOp],
    ) -> Result<()>;

    /// List ongoing attachments with at least one entitlement due a reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_due_resets(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CustomerProduct>>;

    /// List Scheduled attachments whose phase boundary has arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_due_activations(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<CustomerProduct>>;

    // =========================================================================
    // Projection Cache
    // =========================================================================

    /// Read the cached projection. Absence is a cold cache, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_projection(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProjection>>;

    /// Write the cached projection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_projection(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
        projection: &CustomerProjection,
    ) -> Result<()>;

    /// Invalidate the cached projection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_projection(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<()>;
}
