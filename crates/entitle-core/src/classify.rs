//! Classification of customer product attachments.
//!
//! Every classification rule is a variant of the closed [`Pred`] enum, so
//! each is unit-testable in isolation, and rules compose through the
//! conjunctive [`Query`] evaluator instead of scattered boolean checks.

use chrono::{DateTime, Utc};

use crate::customer::{CustomerProduct, CustomerProductStatus};
use crate::ids::EntityId;
use crate::product::Product;

/// A single classification predicate over a [`CustomerProduct`].
#[derive(Debug, Clone, PartialEq)]
pub enum Pred {
    /// A main product (not an add-on).
    Main,
    /// An add-on product.
    AddOn,
    /// At least one recurring price.
    Recurring,
    /// Only one-off prices.
    OneOff,
    /// Charges nothing.
    Free,
    /// Charges something.
    Paid,
    /// Inside its free-trial window at the evaluation time.
    Trialing,
    /// Cancellation requested (soft; period may still be running).
    Canceling,
    /// Status currently grants entitlements (Active, PastDue, Trialing).
    ActiveStatus,
    /// Status is relevant to attach resolution (ongoing or Scheduled).
    RelevantStatus,
    /// Status is Scheduled.
    Scheduled,
    /// Belongs to the given product group.
    InGroup(String),
    /// Scoped to exactly this entity (`None` means customer-level).
    OnEntity(Option<EntityId>),
    /// Backed by the given processor subscription.
    OnSubscription(String),
    /// Backed by the given processor subscription schedule.
    OnSchedule(String),
}

impl Pred {
    /// Evaluate the predicate at a point in time.
    #[must_use]
    pub fn holds(&self, cp: &CustomerProduct, now: DateTime<Utc>) -> bool {
        match self {
            Self::Main => !cp.product.is_add_on,
            Self::AddOn => cp.product.is_add_on,
            Self::Recurring => !cp.product.is_one_off(),
            Self::OneOff => cp.product.is_one_off(),
            Self::Free => cp.product.is_free(),
            Self::Paid => !cp.product.is_free(),
            Self::Trialing => cp.trial_ends_at.is_some_and(|t| t > now),
            Self::Canceling => cp.canceled_at.is_some(),
            Self::ActiveStatus => cp.status.is_ongoing(),
            Self::RelevantStatus => {
                cp.status.is_ongoing() || cp.status == CustomerProductStatus::Scheduled
            }
            Self::Scheduled => cp.status == CustomerProductStatus::Scheduled,
            Self::InGroup(group) => &cp.product.group == group,
            Self::OnEntity(entity) => cp.entity_id == *entity,
            Self::OnSubscription(sub_id) => cp.subscription_ids.iter().any(|s| s == sub_id),
            Self::OnSchedule(schedule_id) => cp.schedule_ids.iter().any(|s| s == schedule_id),
        }
    }
}

/// A conjunction of predicates: all must hold.
#[derive(Debug, Clone, Default)]
pub struct Query {
    preds: Vec<Pred>,
}

impl Query {
    /// An empty query matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate.
    #[must_use]
    pub fn with(mut self, pred: Pred) -> Self {
        self.preds.push(pred);
        self
    }

    /// Require a main (non-add-on) product.
    #[must_use]
    pub fn main(self) -> Self {
        self.with(Pred::Main)
    }

    /// Require a recurring product.
    #[must_use]
    pub fn recurring(self) -> Self {
        self.with(Pred::Recurring)
    }

    /// Require an entitlement-granting status.
    #[must_use]
    pub fn active_status(self) -> Self {
        self.with(Pred::ActiveStatus)
    }

    /// Require Scheduled status.
    #[must_use]
    pub fn scheduled(self) -> Self {
        self.with(Pred::Scheduled)
    }

    /// Require membership in a product group.
    #[must_use]
    pub fn in_group(self, group: impl Into<String>) -> Self {
        self.with(Pred::InGroup(group.into()))
    }

    /// Require an exact entity scope.
    #[must_use]
    pub fn on_entity(self, entity: Option<&EntityId>) -> Self {
        self.with(Pred::OnEntity(entity.cloned()))
    }

    /// Evaluate the conjunction at a point in time.
    #[must_use]
    pub fn matches(&self, cp: &CustomerProduct, now: DateTime<Utc>) -> bool {
        self.preds.iter().all(|p| p.holds(cp, now))
    }

    /// First match in list order.
    #[must_use]
    pub fn find_in<'a>(
        &self,
        cus_products: &'a [CustomerProduct],
        now: DateTime<Utc>,
    ) -> Option<&'a CustomerProduct> {
        cus_products.iter().find(|cp| self.matches(cp, now))
    }

    /// All matches in list order.
    #[must_use]
    pub fn filter_in<'a>(
        &self,
        cus_products: &'a [CustomerProduct],
        now: DateTime<Utc>,
    ) -> Vec<&'a CustomerProduct> {
        cus_products.iter().filter(|cp| self.matches(cp, now)).collect()
    }
}

/// The attachments relevant to an attach/update of `product`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistingProducts<'a> {
    /// The ongoing main product in the same group and entity scope.
    pub current_main: Option<&'a CustomerProduct>,

    /// An ongoing attachment of the same product id, regardless of group
    /// role (used by same-product and one-off top-up paths).
    pub current_same: Option<&'a CustomerProduct>,

    /// The Scheduled attachment in the same group and entity scope.
    pub current_scheduled: Option<&'a CustomerProduct>,
}

/// Locate the attachments an attach of `product` must reconcile with.
#[must_use]
pub fn existing_in_group<'a>(
    cus_products: &'a [CustomerProduct],
    product: &Product,
    entity_id: Option<&EntityId>,
    now: DateTime<Utc>,
) -> ExistingProducts<'a> {
    let current_main = Query::new()
        .main()
        .recurring()
        .active_status()
        .in_group(product.group.clone())
        .on_entity(entity_id)
        .find_in(cus_products, now);

    let current_same = cus_products.iter().find(|cp| {
        cp.product.id == product.id
            && cp.status.is_ongoing()
            && cp.entity_id == entity_id.cloned()
    });

    let current_scheduled = Query::new()
        .scheduled()
        .in_group(product.group.clone())
        .on_entity(entity_id)
        .find_in(cus_products, now);

    ExistingProducts {
        current_main,
        current_same,
        current_scheduled,
    }
}

/// Locate the attachment a processor subscription event should merge into.
///
/// Deterministic priority when several rows could match: exact subscription
/// id, then entity scope, then main over add-on, then same product id, then
/// same product group. Ties keep the first row in list order; a row
/// matching none of the criteria is never returned.
#[must_use]
pub fn find_for_subscription<'a>(
    cus_products: &'a [CustomerProduct],
    subscription_id: &str,
    entity_id: Option<&EntityId>,
    product: Option<&Product>,
) -> Option<&'a CustomerProduct> {
    let rank = |cp: &CustomerProduct| {
        (
            u8::from(!cp.subscription_ids.iter().any(|s| s == subscription_id)),
            u8::from(cp.entity_id != entity_id.cloned()),
            u8::from(cp.product.is_add_on),
            u8::from(product.map_or(true, |p| p.id != cp.product.id)),
            u8::from(product.map_or(true, |p| p.group != cp.product.group)),
        )
    };
    // A row must satisfy at least one criterion beyond the main/add-on
    // preference to be a merge candidate.
    let qualifies = |cp: &CustomerProduct| {
        let (sub, entity, _, id, group) = rank(cp);
        sub == 0 || entity == 0 || id == 0 || group == 0
    };

    cus_products
        .iter()
        .filter(|cp| qualifies(cp))
        .min_by_key(|cp| rank(cp))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::customer::ApiVersion;
    use crate::ids::{CustomerId, RowId, RowKind};
    use crate::product::fixtures::product;

    fn attach(p: Product) -> CustomerProduct {
        CustomerProduct {
            id: RowId::generate(RowKind::CustomerProduct),
            customer_id: CustomerId::new("cus-1").unwrap(),
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
            entitlements: Vec::new(),
            prices: Vec::new(),
            product: p,
        }
    }

    #[test]
    fn predicates_hold_in_isolation() {
        let now = Utc::now();
        let mut cp = attach(product("pro", 2000, 100.0));
        assert!(Pred::Main.holds(&cp, now));
        assert!(Pred::Paid.holds(&cp, now));
        assert!(Pred::Recurring.holds(&cp, now));
        assert!(!Pred::OneOff.holds(&cp, now));
        assert!(!Pred::Free.holds(&cp, now));
        assert!(!Pred::AddOn.holds(&cp, now));
        assert!(!Pred::Canceling.holds(&cp, now));

        cp.canceled_at = Some(now);
        assert!(Pred::Canceling.holds(&cp, now));

        cp.trial_ends_at = Some(now + Duration::days(7));
        assert!(Pred::Trialing.holds(&cp, now));
        cp.trial_ends_at = Some(now - Duration::days(1));
        assert!(!Pred::Trialing.holds(&cp, now));
    }

    #[test]
    fn backing_id_predicates() {
        let now = Utc::now();
        let mut cp = attach(product("pro", 2000, 100.0));
        cp.subscription_ids.push("sub_1".into());
        cp.schedule_ids.push("sched_1".into());

        assert!(Pred::OnSubscription("sub_1".into()).holds(&cp, now));
        assert!(!Pred::OnSubscription("sub_2".into()).holds(&cp, now));
        assert!(Pred::OnSchedule("sched_1".into()).holds(&cp, now));
        assert!(!Pred::OnSchedule("sched_2".into()).holds(&cp, now));
    }

    #[test]
    fn query_is_conjunctive() {
        let now = Utc::now();
        let cp = attach(product("pro", 2000, 100.0));

        assert!(Query::new().main().active_status().matches(&cp, now));
        assert!(!Query::new()
            .main()
            .in_group("other-group")
            .matches(&cp, now));
    }

    #[test]
    fn existing_in_group_distinguishes_roles() {
        let now = Utc::now();
        let free = attach(product("free", 0, 10.0));
        let mut scheduled = attach(product("starter", 1000, 50.0));
        scheduled.status = CustomerProductStatus::Scheduled;

        let target = product("pro", 2000, 100.0);
        let products = vec![free, scheduled];
        let existing = existing_in_group(&products, &target, None, now);

        assert_eq!(
            existing.current_main.map(|cp| cp.product.id.as_str()),
            Some("free")
        );
        assert_eq!(
            existing.current_scheduled.map(|cp| cp.product.id.as_str()),
            Some("starter")
        );
        assert!(existing.current_same.is_none());
    }

    #[test]
    fn existing_in_group_respects_entity_scope() {
        let now = Utc::now();
        let seat = EntityId::new("seat-1").unwrap();
        let mut on_seat = attach(product("pro", 2000, 100.0));
        on_seat.entity_id = Some(seat.clone());
        let at_customer = attach(product("pro", 2000, 100.0));

        let target = product("team", 4900, 0.0);
        let products = vec![on_seat, at_customer];

        let scoped = existing_in_group(&products, &target, Some(&seat), now);
        assert_eq!(scoped.current_main.and_then(|cp| cp.entity_id.clone()), Some(seat));

        let unscoped = existing_in_group(&products, &target, None, now);
        assert!(unscoped.current_main.is_some_and(|cp| cp.entity_id.is_none()));
    }

    #[test]
    fn subscription_finder_priority_order() {
        let mut exact = attach(product("a", 1000, 0.0));
        exact.subscription_ids.push("sub_1".into());
        let mut addon_same_group = attach(product("b", 1000, 0.0));
        addon_same_group.product.is_add_on = true;
        let main_same_group = attach(product("c", 1000, 0.0));

        // Exact id wins over everything.
        let products = vec![main_same_group.clone(), exact.clone()];
        let target = product("c", 1000, 0.0);
        let found = find_for_subscription(&products, "sub_1", None, Some(&target)).unwrap();
        assert_eq!(found.product.id.as_str(), "a");

        // Without an id match, main beats add-on.
        let products = vec![addon_same_group, main_same_group];
        let found = find_for_subscription(&products, "sub_x", None, Some(&target)).unwrap();
        assert_eq!(found.product.id.as_str(), "c");
    }

    #[test]
    fn subscription_finder_ties_keep_list_order() {
        let first = attach(product("p1", 1000, 0.0));
        let second = attach(product("p2", 1000, 0.0));
        let target = product("p3", 1000, 0.0);

        // Both match only on group; the first row wins.
        let products = vec![first, second];
        let found = find_for_subscription(&products, "sub_x", None, Some(&target)).unwrap();
        assert_eq!(found.product.id.as_str(), "p1");
    }

    #[test]
    fn subscription_finder_rejects_unrelated_rows() {
        let mut other = attach(product("other", 1000, 0.0));
        other.product.group = "different".into();
        let seat = EntityId::new("seat-1").unwrap();
        other.entity_id = Some(seat);

        let target = product("pro", 2000, 100.0);
        let products = vec![other];
        assert!(find_for_subscription(&products, "sub_x", None, Some(&target)).is_none());
    }
}
