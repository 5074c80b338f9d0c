//! Push provider client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::{PushConfig, TemplateMessage, TokenCache, error::ProviderError};

/// The provider's answer to a send request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub errcode: i64,

    #[serde(default)]
    pub errmsg: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub msgid: Option<String>,
}

impl SendReceipt {
    pub fn is_success(&self) -> bool {
        self.errcode == 0
    }
}

/// Outbound template-push channel.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Sends one template message.
    ///
    /// Transport failures are errors; a provider-level rejection comes back
    /// as a receipt with a non-zero `errcode`.
    async fn send(&self, message: &TemplateMessage) -> Result<SendReceipt, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// HTTP client for a WeChat-style subscribe-message API.
pub struct HttpPushProvider {
    client: Client,
    config: PushConfig,
    tokens: TokenCache,
}

impl HttpPushProvider {
    pub fn new(config: PushConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            tokens: TokenCache::new(config.token_max_ttl),
            config,
        })
    }

    /// Returns a cached access token, fetching a new one if needed.
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.tokens.get().await {
            return Ok(token);
        }

        debug!("fetching push provider access token");
        let url = format!("{}/cgi-bin/token", self.config.api_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.config.app_id.as_str()),
                ("secret", self.config.app_secret.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let body: TokenResponse = response.json().await?;
        match body.access_token {
            Some(token) if body.errcode == 0 && !token.is_empty() => {
                self.tokens
                    .store(token.clone(), body.expires_in.unwrap_or(7200))
                    .await;
                info!("obtained push provider access token");
                Ok(token)
            }
            _ => Err(ProviderError::Token {
                errcode: body.errcode,
                errmsg: body.errmsg,
            }),
        }
    }

    /// Drops the cached token so the next call refreshes it.
    pub async fn invalidate_token(&self) {
        self.tokens.invalidate().await;
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(&self, message: &TemplateMessage) -> Result<SendReceipt, ProviderError> {
        let token = self.access_token().await?;
        let url = format!("{}/cgi-bin/message/subscribe/send", self.config.api_url);

        let response = self
            .client
            .post(url)
            .query(&[("access_token", token.as_str())])
            .json(message)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let receipt: SendReceipt = response.json().await?;
        if TokenCache::is_invalid_token(receipt.errcode) {
            warn!(errcode = receipt.errcode, "access token rejected, invalidating cache");
            self.tokens.invalidate().await;
        }
        Ok(receipt)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
