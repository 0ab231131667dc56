// libs/appointment-cell/src/services/payments.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;

/// Payment-intent collaborator. Called only for online bookings; a failure
/// here is logged by the caller and never rolls the booking back.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        appointment_id: Uuid,
    ) -> Result<String>;
}

pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: config.stripe_api_base.clone(),
            secret_key: config.stripe_secret_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        appointment_id: Uuid,
    ) -> Result<String> {
        if self.secret_key.is_empty() {
            return Err(anyhow!("Stripe secret key is not configured"));
        }

        let url = format!("{}/v1/payment_intents", self.api_base);
        let appointment_id = appointment_id.to_string();
        let amount = amount_cents.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("metadata[appointment_id]", appointment_id.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Stripe error ({}): {}", status, error_text));
        }

        let body: Value = response.json().await?;
        let intent_id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow!("Payment intent response missing id"))?
            .to_string();

        debug!("Created payment intent {}", intent_id);
        Ok(intent_id)
    }
}
