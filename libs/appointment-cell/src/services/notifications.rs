// libs/appointment-cell/src/services/notifications.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use shared_config::AppConfig;

use crate::models::Appointment;

/// Fire-and-forget notification collaborator: failures are logged by the
/// caller, never retried, never rolled into the primary operation's outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient_email: &str,
        subject: &str,
        appointment: &Appointment,
    ) -> Result<()>;
}

/// Sends mail through the HTTP relay configured in `MAIL_API_URL`.
pub struct MailRelayNotifier {
    client: Client,
    api_url: String,
    from_address: String,
}

impl MailRelayNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.mail_api_url.clone(),
            from_address: config.mail_from_address.clone(),
        }
    }
}

#[async_trait]
impl Notifier for MailRelayNotifier {
    async fn notify(
        &self,
        recipient_email: &str,
        subject: &str,
        appointment: &Appointment,
    ) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(anyhow!("Mail relay is not configured"));
        }

        let body = json!({
            "from": self.from_address,
            "to": recipient_email,
            "subject": subject,
            "appointment": appointment,
        });

        let url = format!("{}/send", self.api_url);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Mail relay error ({})", status));
        }

        debug!("Notified {} about appointment {}", recipient_email, appointment.id);
        Ok(())
    }
}
