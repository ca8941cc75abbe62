//! Stripe API client implementation.
//!
//! The client issues the declarative actions a billing plan carries:
//! subscription create/update/cancel, schedule create/release, and invoice
//! items. Money-moving calls take an idempotency key and are never retried
//! here; reads are safe for the caller to retry.

use chrono::{DateTime, Utc};
use reqwest::Client;

use entitle_core::{BillingInterval, LineItem, ProrationBehavior};

use crate::config::StripeConfig;
use crate::error::{Result, StripeError};
use crate::types::{
    Customer, Invoice, InvoiceItem, StripeErrorResponse, Subscription, SubscriptionSchedule,
};

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StripeError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .client
            .get(self.url(path))
            .basic_auth(&self.config.api_key, Option::<&str>::None)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(self.url(path))
            .basic_auth(&self.config.api_key, Option::<&str>::None)
            .form(params);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        match response.json::<StripeErrorResponse>().await {
            Ok(body) => Err(StripeError::Api {
                error_type: body.error.error_type,
                message: body.error.message,
                code: body.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "api_error".into(),
                message: format!("unexpected status {status}"),
                code: None,
            }),
        }
    }

    // =========================================================================
    // Customers
    // =========================================================================

    /// Get a customer by ID. Missing customers return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-404 API error.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        self.get_json(&format!("/customers/{customer_id}")).await
    }

    /// Create a customer, tagging it with our customer id in metadata.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn create_customer(
        &self,
        internal_customer_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<Customer> {
        let mut params = vec![(
            "metadata[customer_id]".to_string(),
            internal_customer_id.to_string(),
        )];
        if let Some(email) = email {
            params.push(("email".into(), email.to_string()));
        }
        if let Some(name) = name {
            params.push(("name".into(), name.to_string()));
        }

        self.post_form("/customers", &params, None).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Get a subscription by ID. Missing subscriptions return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-404 API error.
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        self.get_json(&format!("/subscriptions/{subscription_id}"))
            .await
    }

    /// Create a subscription with inline price data.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn create_subscription(
        &self,
        processor_customer_id: &str,
        items: &[LineItem],
        trial_end: Option<DateTime<Utc>>,
        invoice_only: bool,
        idempotency_key: &str,
    ) -> Result<Subscription> {
        let mut params = vec![("customer".to_string(), processor_customer_id.to_string())];
        push_items(&mut params, "items", items);

        if let Some(trial_end) = trial_end {
            params.push(("trial_end".into(), trial_end.timestamp().to_string()));
        }
        if invoice_only {
            params.push(("collection_method".into(), "send_invoice".into()));
            params.push(("days_until_due".into(), "30".into()));
        }

        tracing::debug!(customer = %processor_customer_id, items = items.len(), "Creating subscription");
        self.post_form("/subscriptions", &params, Some(idempotency_key))
            .await
    }

    /// Replace a subscription's items.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        items: &[LineItem],
        proration: ProrationBehavior,
        idempotency_key: &str,
    ) -> Result<Subscription> {
        let mut params = Vec::new();
        push_items(&mut params, "items", items);
        params.push((
            "proration_behavior".into(),
            proration_param(proration).into(),
        ));

        self.post_form(
            &format!("/subscriptions/{subscription_id}"),
            &params,
            Some(idempotency_key),
        )
        .await
    }

    /// Cancel a subscription, now or at period end.
    ///
    /// An already-gone subscription (`resource_missing`) is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other API error.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<()> {
        let result: Result<Subscription> = if at_period_end {
            self.post_form(
                &format!("/subscriptions/{subscription_id}"),
                &[("cancel_at_period_end".to_string(), "true".to_string())],
                None,
            )
            .await
        } else {
            let response = self
                .client
                .delete(self.url(&format!("/subscriptions/{subscription_id}")))
                .basic_auth(&self.config.api_key, Option::<&str>::None)
                .send()
                .await?;
            self.handle_response(response).await
        };

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_resource_missing() => {
                tracing::debug!(subscription = %subscription_id, "subscription already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Subscription Schedules
    // =========================================================================

    /// Create a schedule whose single phase swaps in new items at a
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn create_schedule(
        &self,
        processor_customer_id: &str,
        starts_at: DateTime<Utc>,
        items: &[LineItem],
        idempotency_key: &str,
    ) -> Result<SubscriptionSchedule> {
        let mut params = vec![
            ("customer".to_string(), processor_customer_id.to_string()),
            ("start_date".to_string(), starts_at.timestamp().to_string()),
        ];
        push_items(&mut params, "phases[0][items]", items);

        self.post_form("/subscription_schedules", &params, Some(idempotency_key))
            .await
    }

    /// Release a schedule so it never activates.
    ///
    /// An already-gone schedule is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other API error.
    pub async fn release_schedule(&self, schedule_id: &str) -> Result<()> {
        let result: Result<SubscriptionSchedule> = self
            .post_form(
                &format!("/subscription_schedules/{schedule_id}/release"),
                &[],
                None,
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_resource_missing() => Ok(()),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Add pending invoice items to a customer.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn create_invoice_items(
        &self,
        processor_customer_id: &str,
        items: &[LineItem],
        idempotency_key: &str,
    ) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            let amount = item.amount_cents * i64::try_from(item.quantity).unwrap_or(1);
            let params = vec![
                ("customer".to_string(), processor_customer_id.to_string()),
                ("amount".to_string(), amount.to_string()),
                ("currency".to_string(), "usd".to_string()),
                ("description".to_string(), item.description.clone()),
            ];
            let _item: InvoiceItem = self
                .post_form(
                    "/invoiceitems",
                    &params,
                    Some(&format!("{idempotency_key}_{index}")),
                )
                .await?;
        }
        Ok(())
    }

    /// Create an invoice collecting pending items and finalize it.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an API error.
    pub async fn create_and_finalize_invoice(
        &self,
        processor_customer_id: &str,
        idempotency_key: &str,
    ) -> Result<Invoice> {
        let invoice: Invoice = self
            .post_form(
                "/invoices",
                &[
                    ("customer".to_string(), processor_customer_id.to_string()),
                    ("auto_advance".to_string(), "true".to_string()),
                ],
                Some(idempotency_key),
            )
            .await?;

        self.post_form(
            &format!("/invoices/{}/finalize", invoice.id),
            &[],
            Some(&format!("{idempotency_key}_finalize")),
        )
        .await
    }
}

/// Stripe `proration_behavior` parameter for a proration policy.
fn proration_param(behavior: ProrationBehavior) -> &'static str {
    match behavior {
        ProrationBehavior::Immediately => "always_invoice",
        ProrationBehavior::NextBilling | ProrationBehavior::None => "none",
    }
}

/// Stripe recurring interval for a billing interval, as
/// `(interval, interval_count)`.
fn interval_param(interval: BillingInterval) -> Option<(&'static str, u32)> {
    match interval {
        BillingInterval::OneOff => None,
        BillingInterval::Month => Some(("month", 1)),
        BillingInterval::Quarter => Some(("month", 3)),
        BillingInterval::SemiAnnual => Some(("month", 6)),
        BillingInterval::Year => Some(("year", 1)),
    }
}

/// Encode line items as inline price data under the given form prefix.
fn push_items(params: &mut Vec<(String, String)>, prefix: &str, items: &[LineItem]) {
    for (i, item) in items.iter().enumerate() {
        params.push((
            format!("{prefix}[{i}][price_data][currency]"),
            "usd".to_string(),
        ));
        params.push((
            format!("{prefix}[{i}][price_data][product_data][name]"),
            item.description.clone(),
        ));
        params.push((
            format!("{prefix}[{i}][price_data][unit_amount]"),
            item.amount_cents.to_string(),
        ));
        if let Some((interval, count)) = item.interval.and_then(interval_param) {
            params.push((
                format!("{prefix}[{i}][price_data][recurring][interval]"),
                interval.to_string(),
            ));
            params.push((
                format!("{prefix}[{i}][price_data][recurring][interval_count]"),
                count.to_string(),
            ));
        }
        params.push((format!("{prefix}[{i}][quantity]"), item.quantity.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(StripeConfig::new("sk_test_x").with_base_url(server.uri()))
            .expect("client")
    }

    fn monthly_item(amount_cents: i64) -> LineItem {
        LineItem {
            description: "Pro".into(),
            amount_cents,
            quantity: 1,
            interval: Some(BillingInterval::Month),
        }
    }

    #[tokio::test]
    async fn create_subscription_sends_inline_price_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions"))
            .and(header("Idempotency-Key", "plan_x_0"))
            .and(body_string_contains("customer=cus_1"))
            .and(body_string_contains("unit_amount%5D=2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sub_1",
                "status": "active",
                "current_period_end": 1_760_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sub = client(&server)
            .await
            .create_subscription("cus_1", &[monthly_item(2000)], None, false, "plan_x_0")
            .await
            .unwrap();
        assert_eq!(sub.id, "sub_1");
    }

    #[tokio::test]
    async fn missing_customer_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "No such customer"}
            })))
            .mount(&server)
            .await;

        let customer = client(&server).await.get_customer("cus_missing").await.unwrap();
        assert!(customer.is_none());
    }

    #[tokio::test]
    async fn api_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {
                    "type": "card_error",
                    "message": "Your card was declined.",
                    "code": "card_declined"
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create_subscription("cus_1", &[monthly_item(2000)], None, false, "k")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StripeError::Api { code: Some(ref c), .. } if c == "card_declined"
        ));
    }

    #[tokio::test]
    async fn cancel_tolerates_missing_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/subscriptions/sub_gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {
                    "type": "invalid_request_error",
                    "message": "No such subscription",
                    "code": "resource_missing"
                }
            })))
            .mount(&server)
            .await;

        client(&server)
            .await
            .cancel_subscription("sub_gone", false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_at_period_end_posts_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions/sub_1"))
            .and(body_string_contains("cancel_at_period_end=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sub_1",
                "status": "active",
                "current_period_end": 1_760_000_000,
                "cancel_at_period_end": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .await
            .cancel_subscription("sub_1", true)
            .await
            .unwrap();
    }
}
