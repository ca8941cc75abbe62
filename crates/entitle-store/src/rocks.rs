//! `RocksDB` storage implementation.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use chrono::{DateTime, Utc};
use entitle_core::{
    AppEnv, Customer, CustomerId, CustomerProduct, CustomerProjection, LocalOp, OrgId, Product,
    ProductId, RowId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_raw<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_raw<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, Self::serialize(value)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// A customer product loaded into an `apply_plan` working set, together
/// with the revision it had before the plan touched it.
struct WorkingRow {
    row: CustomerProduct,
    original_revision: Option<u64>,
}

impl Store for RocksStore {
    // =========================================================================
    // Customers
    // =========================================================================

    fn put_customer(&self, customer: &Customer) -> Result<()> {
        // Attachments live in their own column family; the identity record
        // is stored without them.
        let mut identity = customer.clone();
        identity.products = Vec::new();

        let key = keys::customer_key(&customer.org_id, customer.env, &customer.id);
        self.put_raw(cf::CUSTOMERS, &key, &identity)
    }

    fn get_customer(&self, org_id: &OrgId, env: AppEnv, customer_id: &CustomerId) -> Result<Option<Customer>> {
        let key = keys::customer_key(org_id, env, customer_id);
        let Some(mut customer) = self.get_raw::<Customer>(cf::CUSTOMERS, &key)? else {
            return Ok(None);
        };
        customer.products = self.list_customer_products(org_id, env, customer_id)?;
        Ok(Some(customer))
    }

    // =========================================================================
    // Product Definitions
    // =========================================================================

    fn put_product(&self, org_id: &OrgId, env: AppEnv, product: &Product) -> Result<()> {
        let key = keys::product_key(org_id, env, &product.id, product.version);
        self.put_raw(cf::PRODUCTS, &key, product)
    }

    fn get_product(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        product_id: &ProductId,
        version: Option<u32>,
    ) -> Result<Option<Product>> {
        if let Some(version) = version {
            let key = keys::product_key(org_id, env, product_id, version);
            return self.get_raw(cf::PRODUCTS, &key);
        }

        // Versions are big-endian in the key, so the last row under the
        // prefix is the latest version.
        let cf = self.cf(cf::PRODUCTS)?;
        let prefix = keys::product_prefix(org_id, env, product_id);
        let mut latest = None;
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            latest = Some(Self::deserialize(&value)?);
        }
        Ok(latest)
    }

    fn list_default_products(&self, org_id: &OrgId, env: AppEnv) -> Result<Vec<Product>> {
        let cf = self.cf(cf::PRODUCTS)?;
        let prefix = keys::products_scope(org_id, env);

        // Latest version per product id wins; iteration is version-ascending.
        let mut latest: HashMap<ProductId, Product> = HashMap::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let product: Product = Self::deserialize(&value)?;
            latest.insert(product.id.clone(), product);
        }

        Ok(latest.into_values().filter(|p| p.is_default).collect())
    }

    // =========================================================================
    // Customer Products
    // =========================================================================

    fn get_customer_product(&self, row_id: RowId) -> Result<Option<CustomerProduct>> {
        self.get_raw(cf::CUSTOMER_PRODUCTS, &keys::customer_product_key(row_id))
    }

    fn list_customer_products(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<Vec<CustomerProduct>> {
        let index_cf = self.cf(cf::CUSTOMER_PRODUCTS_BY_CUSTOMER)?;
        let scope = keys::customer_scope(org_id, env, customer_id);

        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(&index_cf, IteratorMode::From(&scope, Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&scope) {
                break;
            }
            let Some(row_id) = keys::row_id_from_index_key(&key, scope.len()) else {
                tracing::warn!("skipping malformed customer product index key");
                continue;
            };
            if let Some(row) = self.get_customer_product(row_id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    #[allow(clippy::too_many_lines)]
    fn apply_plan(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
        ops: &[LocalOp],
    ) -> Result<()> {
        let mut working: HashMap<RowId, WorkingRow> = HashMap::new();
        let mut deleted: HashSet<RowId> = HashSet::new();

        // Load a row into the working set, remembering its stored revision.
        let load = |store: &Self, working: &mut HashMap<RowId, WorkingRow>, id: RowId| -> Result<()> {
            if working.contains_key(&id) {
                return Ok(());
            }
            let row = store
                .get_customer_product(id)?
                .ok_or_else(|| StoreError::not_found("customer product", id))?;
            let original_revision = Some(row.revision);
            working.insert(
                id,
                WorkingRow {
                    row,
                    original_revision,
                },
            );
            Ok(())
        };

        for op in ops {
            match op {
                LocalOp::InsertCustomerProduct(cp) => {
                    working.insert(
                        cp.id,
                        WorkingRow {
                            row: cp.as_ref().clone(),
                            original_revision: None,
                        },
                    );
                    deleted.remove(&cp.id);
                }

                LocalOp::UpdateCustomerProduct {
                    id,
                    expected_revision,
                    update,
                } => {
                    load(self, &mut working, *id)?;
                    let entry = working.get_mut(id).ok_or_else(|| {
                        StoreError::not_found("customer product", id)
                    })?;

                    // Revisions are checked against the stored value, not
                    // intermediate plan state: several ops in one plan were
                    // resolved against the same snapshot.
                    if let Some(original) = entry.original_revision {
                        if original != *expected_revision {
                            return Err(StoreError::RevisionConflict {
                                row_id: *id,
                                expected: *expected_revision,
                                actual: original,
                            });
                        }
                    }

                    let row = &mut entry.row;
                    if let Some(status) = update.status {
                        row.status = status;
                    }
                    if let Some(canceled_at) = update.canceled_at {
                        row.canceled_at = canceled_at;
                    }
                    if let Some(options) = &update.options {
                        row.options = options.clone();
                    }
                    if let Some(quantity) = update.quantity {
                        row.quantity = quantity;
                    }
                    if let Some(subscription_ids) = &update.subscription_ids {
                        row.subscription_ids = subscription_ids.clone();
                    }
                    if let Some(schedule_ids) = &update.schedule_ids {
                        row.schedule_ids = schedule_ids.clone();
                    }
                }

                LocalOp::DeleteCustomerProduct { id } => {
                    working.remove(id);
                    deleted.insert(*id);
                }

                LocalOp::InsertEntitlement {
                    customer_product_id,
                    cus_ent,
                } => {
                    load(self, &mut working, *customer_product_id)?;
                    if let Some(entry) = working.get_mut(customer_product_id) {
                        entry.row.entitlements.push(cus_ent.as_ref().clone());
                    }
                }

                LocalOp::DeleteEntitlement {
                    customer_product_id,
                    cus_ent_id,
                } => {
                    load(self, &mut working, *customer_product_id)?;
                    if let Some(entry) = working.get_mut(customer_product_id) {
                        entry.row.entitlements.retain(|ce| ce.id != *cus_ent_id);
                    }
                }

                LocalOp::UpdateEntitlement {
                    customer_product_id,
                    cus_ent_id,
                    update,
                } => {
                    load(self, &mut working, *customer_product_id)?;
                    let entry = working.get_mut(customer_product_id).ok_or_else(|| {
                        StoreError::not_found("customer product", customer_product_id)
                    })?;
                    let cus_ent = entry
                        .row
                        .entitlements
                        .iter_mut()
                        .find(|ce| ce.id == *cus_ent_id)
                        .ok_or_else(|| StoreError::not_found("customer entitlement", cus_ent_id))?;

                    if let Some(entity_id) = &update.entity_id {
                        // A missing slot materializes at the reset
                        // allowance before the delta applies.
                        let allowance = cus_ent.entitlement.allowance;
                        let slot = cus_ent
                            .entities
                            .get_or_insert_with(std::collections::BTreeMap::new)
                            .entry(entity_id.clone())
                            .or_insert(entitle_core::EntityBalance {
                                balance: allowance,
                                adjustment: 0.0,
                            });
                        slot.balance += update.balance_delta;
                    } else {
                        match cus_ent.balance.as_mut() {
                            Some(balance) => *balance += update.balance_delta,
                            None if update.balance_delta != 0.0 => {
                                cus_ent.balance = Some(update.balance_delta);
                            }
                            None => {}
                        }
                    }
                    if let Some(next) = update.next_reset_at {
                        cus_ent.next_reset_at = Some(next);
                    }
                }

                LocalOp::InsertReplaceable {
                    customer_product_id,
                    cus_ent_id,
                    replaceable,
                } => {
                    load(self, &mut working, *customer_product_id)?;
                    let entry = working.get_mut(customer_product_id).ok_or_else(|| {
                        StoreError::not_found("customer product", customer_product_id)
                    })?;
                    if let Some(cus_ent) = entry
                        .row
                        .entitlements
                        .iter_mut()
                        .find(|ce| ce.id == *cus_ent_id)
                    {
                        cus_ent.replaceables.push(replaceable.clone());
                    }
                }

                LocalOp::DeleteReplaceables {
                    customer_product_id,
                    cus_ent_id,
                    ids,
                } => {
                    load(self, &mut working, *customer_product_id)?;
                    if let Some(entry) = working.get_mut(customer_product_id) {
                        if let Some(cus_ent) = entry
                            .row
                            .entitlements
                            .iter_mut()
                            .find(|ce| ce.id == *cus_ent_id)
                        {
                            cus_ent.replaceables.retain(|r| !ids.contains(&r.id));
                        }
                    }
                }
            }
        }

        // Commit everything in one batch.
        let rows_cf = self.cf(cf::CUSTOMER_PRODUCTS)?;
        let index_cf = self.cf(cf::CUSTOMER_PRODUCTS_BY_CUSTOMER)?;
        let mut batch = WriteBatch::default();

        for id in &deleted {
            batch.delete_cf(&rows_cf, keys::customer_product_key(*id));
            batch.delete_cf(
                &index_cf,
                keys::customer_product_index_key(org_id, env, customer_id, *id),
            );
        }

        for (id, entry) in &mut working {
            entry.row.revision = entry.original_revision.map_or(0, |r| r + 1);
            let value = Self::serialize(&entry.row)?;
            batch.put_cf(&rows_cf, keys::customer_product_key(*id), value);
            batch.put_cf(
                &index_cf,
                keys::customer_product_index_key(org_id, env, customer_id, *id),
                [],
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_due_resets(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CustomerProduct>> {
        let cf = self.cf(cf::CUSTOMER_PRODUCTS)?;
        let mut due = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            if due.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let row: CustomerProduct = Self::deserialize(&value)?;
            if !row.status.is_ongoing() {
                continue;
            }
            if row
                .entitlements
                .iter()
                .any(|ce| ce.next_reset_at.is_some_and(|t| t <= now))
            {
                due.push(row);
            }
        }

        Ok(due)
    }

    fn list_due_activations(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CustomerProduct>> {
        let cf = self.cf(cf::CUSTOMER_PRODUCTS)?;
        let mut due = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            if due.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let row: CustomerProduct = Self::deserialize(&value)?;
            if row.status == entitle_core::CustomerProductStatus::Scheduled && row.starts_at <= now
            {
                due.push(row);
            }
        }

        Ok(due)
    }

    // =========================================================================
    // Projection Cache
    // =========================================================================

    fn get_projection(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProjection>> {
        let key = keys::projection_key(org_id, env, customer_id);
        self.get_raw(cf::PROJECTIONS, &key)
    }

    fn put_projection(
        &self,
        org_id: &OrgId,
        env: AppEnv,
        customer_id: &CustomerId,
        projection: &CustomerProjection,
    ) -> Result<()> {
        let key = keys::projection_key(org_id, env, customer_id);
        self.put_raw(cf::PROJECTIONS, &key, projection)
    }

    fn delete_projection(&self, org_id: &OrgId, env: AppEnv, customer_id: &CustomerId) -> Result<()> {
        let cf = self.cf(cf::PROJECTIONS)?;
        let key = keys::projection_key(org_id, env, customer_id);
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use entitle_core::{
        AllowanceType, ApiVersion, CustomerEntitlement, CustomerProductStatus,
        CustomerProductUpdate, Entitlement, Feature, FeatureId, FeatureType, Product,
        ResetInterval, RowKind,
    };
    use tempfile::TempDir;

    use super::*;

    fn open_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let store = RocksStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    fn org() -> OrgId {
        OrgId::new("org-1").unwrap()
    }

    fn customer_id() -> CustomerId {
        CustomerId::new("cus-1").unwrap()
    }

    fn product(id: &str, version: u32) -> Product {
        Product {
            id: ProductId::new(id).unwrap(),
            version,
            name: id.to_string(),
            group: "default".into(),
            is_add_on: false,
            is_default: false,
            entitlements: Vec::new(),
            prices: Vec::new(),
            free_trial: None,
        }
    }

    fn customer() -> Customer {
        Customer {
            id: customer_id(),
            org_id: org(),
            env: AppEnv::Sandbox,
            name: Some("Test".into()),
            email: None,
            processor: None,
            entities: Vec::new(),
            products: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn cus_product() -> CustomerProduct {
        let id = RowId::generate(RowKind::CustomerProduct);
        let ent = Entitlement {
            id: "ent_messages".into(),
            feature: Feature {
                id: FeatureId::new("messages").unwrap(),
                name: "messages".into(),
                feature_type: FeatureType::Metered,
            },
            allowance_type: AllowanceType::Fixed,
            allowance: 100.0,
            interval: ResetInterval::Month,
            carry_from_previous: false,
            entity_feature_id: None,
            usage_limit: None,
            rollover: None,
        };
        CustomerProduct {
            id,
            customer_id: customer_id(),
            product: product("pro", 1),
            status: CustomerProductStatus::Active,
            starts_at: Utc::now(),
            created_at: Utc::now(),
            canceled_at: None,
            trial_ends_at: None,
            options: Vec::new(),
            subscription_ids: Vec::new(),
            schedule_ids: Vec::new(),
            entity_id: None,
            quantity: 1,
            api_version: ApiVersion::default(),
            revision: 0,
            entitlements: vec![CustomerEntitlement {
                id: RowId::generate(RowKind::CustomerEntitlement),
                customer_product_id: id,
                entitlement: ent,
                balance: Some(100.0),
                adjustment: 0.0,
                usage_allowed: false,
                unlimited: false,
                next_reset_at: Some(Utc::now() - Duration::hours(1)),
                entities: None,
                replaceables: Vec::new(),
            }],
            prices: Vec::new(),
        }
    }

    #[test]
    fn product_versions_and_latest() {
        let (store, _dir) = open_store();
        let id = ProductId::new("pro").unwrap();

        store.put_product(&org(), AppEnv::Sandbox, &product("pro", 1)).unwrap();
        store.put_product(&org(), AppEnv::Sandbox, &product("pro", 2)).unwrap();

        let v1 = store.get_product(&org(), AppEnv::Sandbox, &id, Some(1)).unwrap().unwrap();
        assert_eq!(v1.version, 1);

        let latest = store.get_product(&org(), AppEnv::Sandbox, &id, None).unwrap().unwrap();
        assert_eq!(latest.version, 2);

        assert!(store
            .get_product(&org(), AppEnv::Sandbox, &id, Some(9)).unwrap()
            .is_none());
    }

    #[test]
    fn default_products_pick_latest_version() {
        let (store, _dir) = open_store();
        let mut v1 = product("free", 1);
        v1.is_default = true;
        let mut v2 = product("free", 2);
        v2.is_default = true;
        store.put_product(&org(), AppEnv::Sandbox, &v1).unwrap();
        store.put_product(&org(), AppEnv::Sandbox, &v2).unwrap();
        store.put_product(&org(), AppEnv::Sandbox, &product("pro", 1)).unwrap();

        let defaults = store.list_default_products(&org(), AppEnv::Sandbox).unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].version, 2);
    }

    #[test]
    fn customer_roundtrip_includes_attachments() {
        let (store, _dir) = open_store();
        store.put_customer(&customer()).unwrap();

        let row = cus_product();
        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[LocalOp::InsertCustomerProduct(Box::new(row.clone()))],
            )
            .unwrap();

        let loaded = store
            .get_customer(&org(), AppEnv::Sandbox, &customer_id()).unwrap()
            .unwrap();
        assert_eq!(loaded.products.len(), 1);
        assert_eq!(loaded.products[0].id, row.id);
    }

    #[test]
    fn apply_plan_bumps_revision_once() {
        let (store, _dir) = open_store();
        let row = cus_product();
        let cus_ent_id = row.entitlements[0].id;

        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[LocalOp::InsertCustomerProduct(Box::new(row.clone()))],
            )
            .unwrap();

        // Two ops resolved against the same snapshot apply together.
        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[
                    LocalOp::UpdateEntitlement {
                        customer_product_id: row.id,
                        cus_ent_id,
                        update: entitle_core::EntitlementUpdate {
                            balance_delta: -10.0,
                            entity_id: None,
                            next_reset_at: None,
                        },
                    },
                    LocalOp::UpdateCustomerProduct {
                        id: row.id,
                        expected_revision: 0,
                        update: CustomerProductUpdate {
                            status: Some(CustomerProductStatus::PastDue),
                            ..CustomerProductUpdate::default()
                        },
                    },
                ],
            )
            .unwrap();

        let loaded = store.get_customer_product(row.id).unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.status, CustomerProductStatus::PastDue);
        assert_eq!(loaded.entitlements[0].balance, Some(90.0));
    }

    #[test]
    fn apply_plan_rejects_stale_revision() {
        let (store, _dir) = open_store();
        let row = cus_product();

        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[LocalOp::InsertCustomerProduct(Box::new(row.clone()))],
            )
            .unwrap();

        let stale = LocalOp::UpdateCustomerProduct {
            id: row.id,
            expected_revision: 7,
            update: CustomerProductUpdate::default(),
        };
        let err = store
            .apply_plan(&org(), AppEnv::Sandbox, &customer_id(), &[stale])
            .unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict { .. }));
    }

    #[test]
    fn delete_removes_row_and_index() {
        let (store, _dir) = open_store();
        let row = cus_product();

        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[LocalOp::InsertCustomerProduct(Box::new(row.clone()))],
            )
            .unwrap();
        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[LocalOp::DeleteCustomerProduct { id: row.id }],
            )
            .unwrap();

        assert!(store.get_customer_product(row.id).unwrap().is_none());
        assert!(store
            .list_customer_products(&org(), AppEnv::Sandbox, &customer_id()).unwrap()
            .is_empty());
    }

    #[test]
    fn due_resets_are_found() {
        let (store, _dir) = open_store();
        let due = cus_product();
        let mut not_due = cus_product();
        not_due.entitlements[0].next_reset_at = Some(Utc::now() + Duration::days(3));

        store
            .apply_plan(
                &org(),
                AppEnv::Sandbox,
                &customer_id(),
                &[
                    LocalOp::InsertCustomerProduct(Box::new(due.clone())),
                    LocalOp::InsertCustomerProduct(Box::new(not_due)),
                ],
            )
            .unwrap();

        let found = store.list_due_resets(Utc::now(), 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn projection_cache_roundtrip_and_absence() {
        let (store, _dir) = open_store();

        // Cold cache is not an error.
        assert!(store
            .get_projection(&org(), AppEnv::Sandbox, &customer_id()).unwrap()
            .is_none());

        let projection = CustomerProjection::from_customer(&customer(), Utc::now());
        store
            .put_projection(&org(), AppEnv::Sandbox, &customer_id(), &projection)
            .unwrap();
        let cached = store
            .get_projection(&org(), AppEnv::Sandbox, &customer_id()).unwrap()
            .unwrap();
        assert_eq!(cached, projection);

        store
            .delete_projection(&org(), AppEnv::Sandbox, &customer_id())
            .unwrap();
        assert!(store
            .get_projection(&org(), AppEnv::Sandbox, &customer_id()).unwrap()
            .is_none());
    }
}
