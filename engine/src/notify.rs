use std::time::Duration;

use alloy::primitives::TxHash;

/// Outbound chat notification delivery. Fire-and-forget: implementations
/// must never block or fail the submission flow; delivery failures are
/// logged and dropped.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, text: &str, tx_hash: Option<TxHash>);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _text: &str, _tx_hash: Option<TxHash>) {}
}

/// Telegram Bot API delivery.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    /// Minimum delay applied before each send; the Bot API rate-limits
    /// aggressively.
    delay: Duration,
    explorer_base_url: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: String,
        chat_id: String,
        delay: Duration,
        explorer_base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
            delay,
            explorer_base_url,
        }
    }

    async fn deliver(self, text: String) -> Result<(), String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": escape_markdown_v2(&text),
            "parse_mode": "MarkdownV2",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let payload: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let accepted = payload
            .get("ok")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if !status.is_success() || !accepted {
            let description = payload
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown Telegram error");
            return Err(format!("status {status}: {description}"));
        }

        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: &str, tx_hash: Option<TxHash>) {
        let mut message = text.to_string();
        if let (Some(hash), Some(base)) = (tx_hash, &self.explorer_base_url) {
            message.push_str(&format!("\nExplorer: {}/tx/{hash}", base.trim_end_matches('/')));
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(message).await {
                tracing::warn!(error = %e, "Telegram notification failed");
            } else {
                tracing::debug!("Telegram notification delivered");
            }
        });
    }
}

/// Telegram's MarkdownV2 requires escaping its whole control character set.
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
