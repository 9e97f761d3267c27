//! Notification channels for approval requests
//!
//! When the gate registers a new approval, each configured channel is told
//! once. Channels are fire-and-forget: the decision itself always comes back
//! through the gate register (`leadflow resolve`), never through a channel.

use async_trait::async_trait;
use tracing::{debug, info};

use super::gate::GateEntry;
use crate::config::NotificationConfig;
use crate::{Error, Result};

/// Trait for approval notification channels
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Announce a newly registered approval request
    async fn notify(&self, entry: &GateEntry) -> Result<()>;
}

fn resolve_env(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

fn resolve_command(entry: &GateEntry) -> String {
    format!("leadflow resolve {} --approve", entry.token)
}

/// Slack webhook channel
pub struct SlackNotifier {
    webhook_url: String,
    channel: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: Option<String>) -> Self {
        Self {
            webhook_url,
            channel,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ApprovalNotifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, entry: &GateEntry) -> Result<()> {
        let blocks = vec![
            serde_json::json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("Approval required: {}", entry.stage)
                }
            }),
            serde_json::json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Lead:* {}\n{}", entry.lead_id, entry.payload)
                }
            }),
            serde_json::json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("Resolve with: `{}`", resolve_command(entry))
                }
            }),
        ];

        let mut payload = serde_json::json!({ "blocks": blocks });
        if let Some(channel) = &self.channel {
            payload["channel"] = serde_json::json!(channel);
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Slack send failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("Slack error: {}", body)));
        }

        info!("Slack notification sent for {}", entry.token);
        Ok(())
    }
}

/// Telegram bot channel
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ApprovalNotifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, entry: &GateEntry) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let mut msg = format!("*Approval required: {}*\n", entry.stage);
        msg.push_str(&format!("Lead: {}\n\n", entry.lead_id));
        msg.push_str(&entry.payload);
        msg.push_str(&format!("\n\nResolve with: `{}`", resolve_command(entry)));

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": msg,
                "parse_mode": "Markdown"
            }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Telegram send failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("Telegram error: {}", body)));
        }

        info!("Telegram notification sent for {}", entry.token);
        Ok(())
    }
}

/// Log channel (for testing/debugging)
pub struct LogNotifier;

#[async_trait]
impl ApprovalNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, entry: &GateEntry) -> Result<()> {
        info!(
            "Approval pending: lead {} at {}: {}",
            entry.lead_id,
            entry.stage,
            resolve_command(entry)
        );
        debug!("Payload: {}", entry.payload);
        Ok(())
    }
}

/// Create notification channels from configuration
pub fn create_notifiers(
    configs: &std::collections::HashMap<String, NotificationConfig>,
    enabled: &[String],
) -> Vec<Box<dyn ApprovalNotifier>> {
    let mut notifiers: Vec<Box<dyn ApprovalNotifier>> = Vec::new();

    for name in enabled {
        match configs.get(name) {
            Some(NotificationConfig::Slack {
                webhook_url,
                channel,
            }) => {
                notifiers.push(Box::new(SlackNotifier::new(
                    resolve_env(webhook_url),
                    channel.as_ref().map(|c| resolve_env(c)),
                )));
            }
            Some(NotificationConfig::Telegram { bot_token, chat_id }) => {
                notifiers.push(Box::new(TelegramNotifier::new(
                    resolve_env(bot_token),
                    resolve_env(chat_id),
                )));
            }
            Some(NotificationConfig::Log) => {
                notifiers.push(Box::new(LogNotifier));
            }
            None => {
                debug!("No notification config named '{}', skipping", name);
            }
        }
    }

    notifiers
}
