//! Key encoding utilities for `RocksDB`.
//!
//! Keys are `/`-separated scope paths. Slug identifiers reject whitespace
//! but allow `/` — keys therefore terminate each segment with a `0x00`
//! byte so no slug can collide with a longer scope.

use entitle_core::{AppEnv, CustomerId, OrgId, ProductId, RowId};

/// Append one segment plus terminator.
fn push_segment(key: &mut Vec<u8>, segment: &str) {
    key.extend_from_slice(segment.as_bytes());
    key.push(0);
}

/// Scope prefix for one customer: `org / env / customer_id`.
#[must_use]
pub fn customer_scope(org_id: &OrgId, env: AppEnv, customer_id: &CustomerId) -> Vec<u8> {
    let mut key = Vec::new();
    push_segment(&mut key, org_id.as_str());
    push_segment(&mut key, env.as_str());
    push_segment(&mut key, customer_id.as_str());
    key
}

/// Key for a customer identity record.
#[must_use]
pub fn customer_key(org_id: &OrgId, env: AppEnv, customer_id: &CustomerId) -> Vec<u8> {
    customer_scope(org_id, env, customer_id)
}

/// Key for one product version.
#[must_use]
pub fn product_key(org_id: &OrgId, env: AppEnv, product_id: &ProductId, version: u32) -> Vec<u8> {
    let mut key = product_prefix(org_id, env, product_id);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Prefix for iterating all versions of a product.
#[must_use]
pub fn product_prefix(org_id: &OrgId, env: AppEnv, product_id: &ProductId) -> Vec<u8> {
    let mut key = Vec::new();
    push_segment(&mut key, org_id.as_str());
    push_segment(&mut key, env.as_str());
    push_segment(&mut key, product_id.as_str());
    key
}

/// Prefix for iterating all products in an org/env.
#[must_use]
pub fn products_scope(org_id: &OrgId, env: AppEnv) -> Vec<u8> {
    let mut key = Vec::new();
    push_segment(&mut key, org_id.as_str());
    push_segment(&mut key, env.as_str());
    key
}

/// Key for a customer product aggregate.
#[must_use]
pub fn customer_product_key(row_id: RowId) -> Vec<u8> {
    row_id.to_string().into_bytes()
}

/// Index key: customer scope followed by the row id. Row ids are
/// time-ordered ULIDs, so iteration yields rows oldest-first.
#[must_use]
pub fn customer_product_index_key(
    org_id: &OrgId,
    env: AppEnv,
    customer_id: &CustomerId,
    row_id: RowId,
) -> Vec<u8> {
    let mut key = customer_scope(org_id, env, customer_id);
    key.extend_from_slice(row_id.to_string().as_bytes());
    key
}

/// Extract the row id from a customer-product index key.
#[must_use]
pub fn row_id_from_index_key(key: &[u8], scope_len: usize) -> Option<RowId> {
    std::str::from_utf8(key.get(scope_len..)?)
        .ok()?
        .parse()
        .ok()
}

/// Key for a cached customer projection.
#[must_use]
pub fn projection_key(org_id: &OrgId, env: AppEnv, customer_id: &CustomerId) -> Vec<u8> {
    customer_scope(org_id, env, customer_id)
}
