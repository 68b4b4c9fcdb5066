//! Telegram bot transport
//!
//! Sends `GET {api_base}/bot{token}/sendMessage?chat_id=..&text=..`. Text is
//! percent-escaped by `encode_text` before it goes into the query string.

use crate::infra::config::Config;
use crate::io::notify::Transport;
use anyhow::Context;
use async_trait::async_trait;
use std::fmt::Write;
use std::time::Duration;

/// Percent-escape text for a query string value.
///
/// Escapes space, newline, `&`, `#`, `+`, `%`, `?`, `=`, other control bytes
/// and every byte of a non-ASCII character.
pub fn encode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b' ' | b'\n' | b'&' | b'#' | b'+' | b'%' | b'?' | b'=' => escape(&mut out, byte),
            b if b.is_ascii_control() || !b.is_ascii() => escape(&mut out, b),
            b => out.push(b as char),
        }
    }
    out
}

fn escape(out: &mut String, byte: u8) {
    let _ = write!(out, "%{byte:02X}");
}

pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(api_base: &str, bot_token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        if config.telegram_bot_token().is_empty() {
            anyhow::bail!("telegram transport selected but telegram.bot_token is empty");
        }
        Self::new(
            config.telegram_api_base(),
            config.telegram_bot_token(),
            Duration::from_millis(config.telegram_timeout_ms()),
        )
    }

    fn send_url(&self, chat_id: &str, text: &str) -> String {
        format!(
            "{}/bot{}/sendMessage?chat_id={}&text={}",
            self.api_base,
            self.bot_token,
            encode_text(chat_id),
            encode_text(text)
        )
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .get(self.send_url(recipient, text))
            .send()
            .await
            .context("telegram request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("telegram returned HTTP {}", status.as_u16());
        }
        Ok(())
    }
}
