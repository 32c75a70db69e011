use eyre::{bail, Result, WrapErr};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::deserialize_duration;
use crate::domain::{Delivery, Notification};
use crate::notifier::{Notifier, Throttle};

pub const KIND: &str = "webhook";
/// WeCom group robots take exactly this payload, so the original type name is kept.
pub const WECHAT_KIND: &str = "wechat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_THROTTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub webhook_url: String,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub throttle: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    text: TextContent<'a>,
}

impl<'a> TextMessage<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            msgtype: "text",
            text: TextContent { content },
        }
    }
}

/// Posts text alerts to a chat webhook.
pub struct WebhookNotifier {
    kind: &'static str,
    client: Client,
    webhook_url: String,
    throttle: Throttle,
}

/// Builds a notifier from a raw `webhook`/`wechat` config block.
pub fn build(raw: &Value) -> Result<Arc<dyn Notifier>> {
    let config = WebhookConfig::deserialize(raw).wrap_err("invalid webhook notifier config")?;
    let kind = match raw.get("type").and_then(Value::as_str) {
        Some(WECHAT_KIND) => WECHAT_KIND,
        _ => KIND,
    };
    Ok(Arc::new(WebhookNotifier::new(kind, &config)?))
}

impl WebhookNotifier {
    pub fn new(kind: &'static str, config: &WebhookConfig) -> Result<Self> {
        if config.webhook_url.is_empty() {
            bail!("webhook_url must not be empty");
        }

        let client = Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self {
            kind,
            client,
            webhook_url: config.webhook_url.clone(),
            throttle: Throttle::new(config.throttle.unwrap_or(DEFAULT_THROTTLE)),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn kind(&self) -> &str {
        self.kind
    }

    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        info!("sending {} notification [{}]...", self.kind, notification.key);
        debug!("{} payload: {}", self.kind, notification.text);

        if notification.throttle && !self.throttle.try_acquire() {
            info!(
                "{} notification [{}] throttled ({:?} interval), ignoring message",
                self.kind,
                notification.key,
                self.throttle.interval()
            );
            return Ok(Delivery::Throttled);
        }

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&TextMessage::new(&notification.text))
            .send()
            .await
            .wrap_err("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("webhook responded {}: {}", status, body);
        }

        info!("successfully notified via {}", self.kind);
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_matches_text_message_shape() {
        let body = serde_json::to_value(TextMessage::new("BTC moved")).unwrap();
        assert_eq!(body, json!({"msgtype": "text", "text": {"content": "BTC moved"}}));
    }

    #[test]
    fn type_name_is_preserved() {
        let wechat = build(&json!({"type": "wechat", "webhook_url": "http://localhost/hook"})).unwrap();
        assert_eq!(wechat.kind(), WECHAT_KIND);

        let plain = build(&json!({"type": "webhook", "webhook_url": "http://localhost/hook"})).unwrap();
        assert_eq!(plain.kind(), KIND);
    }

    #[test]
    fn missing_or_empty_url_is_rejected() {
        assert!(build(&json!({"type": "webhook"})).is_err());
        assert!(build(&json!({"type": "webhook", "webhook_url": ""})).is_err());
    }

    #[test]
    fn durations_default_to_five_seconds() {
        let config: WebhookConfig =
            serde_json::from_value(json!({"webhook_url": "http://x", "throttle": "1m"})).unwrap();
        let notifier = WebhookNotifier::new(KIND, &config).unwrap();

        assert_eq!(notifier.throttle.interval(), Duration::from_secs(60));
        assert_eq!(config.timeout.unwrap_or(DEFAULT_TIMEOUT), Duration::from_secs(5));
    }
}
