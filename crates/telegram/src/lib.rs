use std::time::Duration;

use async_trait::async_trait;
use domain::ports::{Notifier, NotifyError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API sender. Without a token and chat id it is a silent no-op.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    base: String,
    target: Option<(String, String)>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        token: Option<String>,
        chat_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError(e.to_string()))?;

        let target = match (token, chat_id) {
            (Some(t), Some(c)) if !t.trim().is_empty() && !c.trim().is_empty() => Some((t, c)),
            _ => None,
        };

        info!(
            "telegram: {}",
            if target.is_some() { "enabled" } else { "disabled (token or chat id missing)" }
        );

        Ok(Self {
            client,
            base: API_BASE.to_string(),
            target,
        })
    }

    /// Point at a different Bot API host (self-hosted bot api server).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let Some((token, chat_id)) = &self.target else {
            debug!("telegram disabled, dropping message");
            return Ok(());
        };

        let url = format!("{}/bot{}/sendMessage", self.base, token);
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // never log the url: it carries the token
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError(e.without_url().to_string()))?;

        let status = resp.status();
        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError(format!("http {}: {}", status, e.without_url())))?;

        if !api.ok {
            return Err(NotifyError(format!(
                "http {}: {}",
                status,
                api.description.unwrap_or_else(|| "unknown error".into())
            )));
        }

        debug!("telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.send_message(message).await
    }
}
