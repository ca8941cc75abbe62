//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Customer identity records (attachments stored separately), keyed by
    /// `org / env / customer_id`.
    pub const CUSTOMERS: &str = "customers";

    /// Product definitions, keyed by `org / env / product_id / version`
    /// with the version big-endian so iteration yields versions ascending.
    pub const PRODUCTS: &str = "products";

    /// Customer product aggregates (entitlements and price rows embedded),
    /// keyed by row id.
    pub const CUSTOMER_PRODUCTS: &str = "customer_products";

    /// Index: customer products by customer, keyed by
    /// `org / env / customer_id / row_id`. Value is empty (index only).
    pub const CUSTOMER_PRODUCTS_BY_CUSTOMER: &str = "customer_products_by_customer";

    /// Cached customer projections, keyed by `org / env / customer_id`.
    pub const PROJECTIONS: &str = "projections";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CUSTOMERS,
        cf::PRODUCTS,
        cf::CUSTOMER_PRODUCTS,
        cf::CUSTOMER_PRODUCTS_BY_CUSTOMER,
        cf::PROJECTIONS,
    ]
}
