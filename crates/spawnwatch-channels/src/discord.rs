//! Discord transport: channel messages and DMs via the REST API.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spawnwatch_core::config::DiscordConfig;
use spawnwatch_core::error::TransportError;
use spawnwatch_core::traits::Transport;
use spawnwatch_core::types::{Destination, MessageRef, SentMessage};

/// Discord's hard cap for `GET /channels/{id}/messages`.
const MAX_HISTORY_PAGE: usize = 100;

/// Discord bot transport.
pub struct DiscordTransport {
    config: DiscordConfig,
    token: String,
    client: reqwest::Client,
    /// Bot user id, learned by [`DiscordTransport::connect`].
    self_id: OnceLock<String>,
}

impl DiscordTransport {
    pub fn new(config: DiscordConfig, token: impl Into<String>) -> Self {
        Self {
            config,
            token: token.into(),
            client: reqwest::Client::new(),
            self_id: OnceLock::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.api_url(path))
            .header("Authorization", format!("Bot {}", self.token))
            .timeout(Duration::from_secs(self.config.timeout_secs))
    }

    /// Resolve the bot identity so authored messages can be recognised.
    pub async fn connect(&self) -> Result<DiscordUser, TransportError> {
        let resp = self
            .request(reqwest::Method::GET, "users/@me")
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("users/@me failed: {e}")))?;
        let me: DiscordUser = read_json(resp).await?;
        tracing::info!("Discord bot: {} ({})", me.username, me.id);
        let _ = self.self_id.set(me.id.clone());
        Ok(me)
    }

    /// Open (or reuse) the DM channel with a user.
    async fn dm_channel(&self, user_id: &str) -> Result<String, TransportError> {
        let resp = self
            .request(reqwest::Method::POST, "users/@me/channels")
            .json(&serde_json::json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("open DM failed: {e}")))?;
        let channel: DiscordChannel = read_json(resp).await?;
        Ok(channel.id)
    }

    fn to_sent(&self, msg: DiscordMessage) -> SentMessage {
        let from_self = match self.self_id.get() {
            Some(id) => msg.author.id == *id,
            None => msg.author.bot.unwrap_or(false),
        };
        SentMessage {
            reference: MessageRef::new(msg.channel_id, msg.id),
            content: msg.content,
            from_self,
        }
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(
        &self,
        destination: &Destination,
        content: &str,
    ) -> Result<MessageRef, TransportError> {
        let channel_id = match destination {
            Destination::Channel(id) => id.clone(),
            Destination::User(id) => self.dm_channel(id).await?,
        };
        let resp = self
            .request(reqwest::Method::POST, &format!("channels/{channel_id}/messages"))
            .json(&serde_json::json!({
                "content": content,
                "allowed_mentions": { "parse": ["roles", "users"] },
            }))
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("send to {destination} failed: {e}")))?;
        let msg: DiscordMessage = read_json(resp).await?;
        tracing::debug!("Discord message sent to {destination}: {}", msg.id);
        Ok(MessageRef::new(msg.channel_id, msg.id))
    }

    async fn edit(&self, message: &MessageRef, content: &str) -> Result<(), TransportError> {
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("channels/{}/messages/{}", message.channel_id, message.message_id),
            )
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("edit {message} failed: {e}")))?;
        check_status(resp).await.map(|_| ())
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), TransportError> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("channels/{}/messages/{}", message.channel_id, message.message_id),
            )
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("delete {message} failed: {e}")))?;
        check_status(resp).await.map(|_| ())
    }

    async fn fetch(&self, message: &MessageRef) -> Result<SentMessage, TransportError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("channels/{}/messages/{}", message.channel_id, message.message_id),
            )
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("fetch {message} failed: {e}")))?;
        let msg: DiscordMessage = read_json(resp).await?;
        Ok(self.to_sent(msg))
    }

    async fn recent(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<SentMessage>, TransportError> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let resp = self
            .request(reqwest::Method::GET, &format!("channels/{channel_id}/messages"))
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("history of {channel_id} failed: {e}")))?;
        let msgs: Vec<DiscordMessage> = read_json(resp).await?;
        Ok(msgs.into_iter().map(|m| self.to_sent(m)).collect())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Api {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, TransportError> {
    check_status(resp)
        .await?
        .json()
        .await
        .map_err(|e| TransportError::Http(format!("invalid Discord response: {e}")))
}

// --- Discord API Types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: DiscordUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> DiscordTransport {
        DiscordTransport::new(
            DiscordConfig {
                api_base: "https://discord.test/api/v10/".into(),
                ..DiscordConfig::default()
            },
            "token",
        )
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        assert_eq!(
            transport().api_url("channels/1/messages"),
            "https://discord.test/api/v10/channels/1/messages"
        );
    }

    #[test]
    fn test_message_authorship() {
        let raw = r#"{"id":"9","channel_id":"5","content":"hi","author":{"id":"42","username":"bot","bot":true}}"#;
        let msg: DiscordMessage = serde_json::from_str(raw).unwrap();

        let t = transport();
        // Before connect(), fall back to the bot flag.
        assert!(t.to_sent(msg.clone()).from_self);

        t.self_id.set("7".into()).unwrap();
        let sent = t.to_sent(msg);
        assert!(!sent.from_self);
        assert_eq!(sent.reference, MessageRef::new("5", "9"));
    }
}
