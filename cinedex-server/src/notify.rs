//! Generic HTTP notification channel: posts the payload as JSON to a
//! configured URL. Richer integrations plug in behind the same trait.

use async_trait::async_trait;

use cinedex_core::providers::{NotificationChannel, NotificationPayload};
use cinedex_core::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct HttpNotificationChannel {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl HttpNotificationChannel {
    pub fn new(name: String, url: String, http: reqwest::Client) -> Self {
        Self { name, url, http }
    }
}

#[async_trait]
impl NotificationChannel for HttpNotificationChannel {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CoreError::provider_server(
                format!("notification endpoint returned {}", response.status()),
                response.status().as_u16(),
            ));
        }
        Ok(())
    }
}
