// ABOUTME: LINE Messaging API client over reqwest
// ABOUTME: Implements reply, push, the loading indicator, and bot identity lookup

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use confab_core::traits::{BotIdentity, MessagingClient};

pub struct LineClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl LineClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LINE API {path} returned HTTP {status}: {body_text}");
        }
        Ok(())
    }

    fn text_messages(messages: &[String]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|text| json!({ "type": "text", "text": text }))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotInfoResponse {
    user_id: String,
    display_name: String,
}

// The loading indicator accepts 5..=60 seconds in steps of five.
fn loading_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs().clamp(5, 60);
    secs - secs % 5
}

#[async_trait]
impl MessagingClient for LineClient {
    async fn send_reply(&self, handle: &str, messages: &[String]) -> Result<()> {
        debug!(messages = messages.len(), "sending reply");
        self.post_json(
            "/message/reply",
            json!({
                "replyToken": handle,
                "messages": Self::text_messages(messages),
            }),
        )
        .await
    }

    async fn send_push(&self, participant: &str, messages: &[String]) -> Result<()> {
        debug!(messages = messages.len(), "sending push");
        self.post_json(
            "/message/push",
            json!({
                "to": participant,
                "messages": Self::text_messages(messages),
            }),
        )
        .await
    }

    async fn show_liveness(&self, conversation: &str, duration: Duration) -> Result<()> {
        self.post_json(
            "/chat/loading/start",
            json!({
                "chatId": conversation,
                "loadingSeconds": loading_seconds(duration),
            }),
        )
        .await
    }

    async fn resolve_self_identity(&self) -> Result<BotIdentity> {
        let url = format!("{}/info", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("bot info request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LINE API /info returned HTTP {status}: {body_text}");
        }

        let info: BotInfoResponse = response.json().await.context("failed to decode bot info")?;
        Ok(BotIdentity {
            user_id: info.user_id,
            display_name: info.display_name,
        })
    }
}
