//! Stripe API types.

use serde::Deserialize;

use entitle_core::{SubscriptionItemSnapshot, SubscriptionSnapshot};

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Customer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Metadata attached to the customer.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Invoice settings (default payment method lives here).
    #[serde(default)]
    pub invoice_settings: InvoiceSettings,
}

/// Customer invoice settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceSettings {
    /// Default payment method id.
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Status (active, trialing, past_due, canceled, ...).
    #[serde(default)]
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// End of the current period (Unix seconds).
    #[serde(default)]
    pub current_period_end: i64,
    /// Whether the subscription cancels at period end.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Attached schedule id, if any.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Line items.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
}

impl Subscription {
    /// Convert into the processor snapshot the context builder carries.
    #[must_use]
    pub fn to_snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: self.id.clone(),
            status: self.status.clone(),
            current_period_end: chrono::DateTime::from_timestamp(self.current_period_end, 0)
                .unwrap_or(chrono::DateTime::UNIX_EPOCH),
            schedule_id: self.schedule.clone(),
            cancel_at_period_end: self.cancel_at_period_end,
            items: self
                .items
                .as_ref()
                .map(|list| {
                    list.data
                        .iter()
                        .map(|item| SubscriptionItemSnapshot {
                            id: item.id.clone(),
                            price_id: item.price.as_ref().map(|p| p.id.clone()).unwrap_or_default(),
                            quantity: item.quantity,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// One item on a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID.
    pub id: String,
    /// Quantity.
    #[serde(default)]
    pub quantity: u64,
    /// The price the item bills.
    #[serde(default)]
    pub price: Option<PriceRef>,
}

/// Reference to a Stripe price.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    /// Price ID.
    pub id: String,
}

/// Stripe subscription schedule object.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSchedule {
    /// Schedule ID.
    pub id: String,
    /// Status (not_started, active, released, ...).
    #[serde(default)]
    pub status: String,
}

/// Stripe invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Status (draft, open, paid, void, ...).
    #[serde(default)]
    pub status: String,
    /// Total in cents.
    #[serde(default)]
    pub total: i64,
}

/// Stripe invoice item object.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceItem {
    /// Invoice item ID.
    pub id: String,
    /// Amount in cents.
    #[serde(default)]
    pub amount: i64,
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// The error payload.
    pub error: StripeErrorBody,
}

/// Stripe error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    /// Error type.
    #[serde(default, rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable code.
    #[serde(default)]
    pub code: Option<String>,
}
