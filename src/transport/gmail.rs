//! Gmail adapter — REST v1 API via reqwest.
//!
//! Inbound messages are fetched in `format=raw` and parsed with
//! mail-parser; outbound replies are built with lettre's message builder
//! and posted base64url-encoded. The OAuth access token is supplied by
//! configuration — obtaining or refreshing it is out of scope here.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::TransportError;
use crate::transport::{MailTransport, RawEmail};

/// Gmail adapter configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// REST base, e.g. `https://gmail.googleapis.com/gmail/v1`.
    pub api_base: String,
    pub access_token: SecretString,
    /// From address for outbound mail.
    pub from_address: String,
    pub request_timeout: Duration,
}

/// Gmail REST client.
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("client build: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn bearer(&self) -> &str {
        self.config.access_token.expose_secret()
    }
}

#[async_trait]
impl MailTransport for GmailClient {
    async fn list_recent(
        &self,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<String>, TransportError> {
        let mut query: Vec<(&str, String)> = vec![("maxResults", limit.to_string())];
        for label in labels {
            query.push(("labelIds", label.clone()));
        }

        let response = self
            .http
            .get(self.url("users/me/messages"))
            .bearer_auth(self.bearer())
            .query(&query)
            .send()
            .await
            .map_err(|e| TransportError::ListFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::ListFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::ListFailed(e.to_string()))?;

        let ids = value["messages"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn fetch(&self, id: &str) -> Result<RawEmail, TransportError> {
        let response = self
            .http
            .get(self.url(&format!("users/me/messages/{id}")))
            .bearer_auth(self.bearer())
            .query(&[("format", "raw")])
            .send()
            .await
            .map_err(|e| TransportError::FetchFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TransportError::FetchFailed {
                id: id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let value: serde_json::Value =
            response.json().await.map_err(|e| TransportError::FetchFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        let raw_b64 = value["raw"]
            .as_str()
            .ok_or_else(|| TransportError::MalformedMessage {
                id: id.to_string(),
                reason: "missing raw payload".to_string(),
            })?;

        // Gmail emits base64url both with and without padding
        let raw_bytes = URL_SAFE
            .decode(raw_b64)
            .or_else(|_| URL_SAFE_NO_PAD.decode(raw_b64))
            .map_err(|e| TransportError::MalformedMessage {
                id: id.to_string(),
                reason: format!("base64 decode: {e}"),
            })?;

        parse_raw_email(id, &raw_bytes)
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, TransportError> {
        let raw = build_raw_message(&self.config.from_address, to, subject, body)?;

        let response = self
            .http
            .post(self.url("users/me/messages/send"))
            .bearer_auth(self.bearer())
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let message_id = value["id"].as_str().unwrap_or_default().to_string();
        tracing::info!(to = %to, message_id = %message_id, "Email sent");
        Ok(message_id)
    }
}

// ── Raw message handling ────────────────────────────────────────────

/// Parse a raw RFC 822 message into the fields the pipeline needs.
fn parse_raw_email(id: &str, raw: &[u8]) -> Result<RawEmail, TransportError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| TransportError::MalformedMessage {
            id: id.to_string(),
            reason: "unparseable RFC 822 payload".to_string(),
        })?;

    let sender = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            _ => "unknown@example.com".to_string(),
        })
        .unwrap_or_else(|| "unknown@example.com".to_string());

    let recipient = parsed
        .to()
        .and_then(|addrs| addrs.first())
        .and_then(|a| a.address())
        .map(String::from);

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    Ok(RawEmail {
        id: id.to_string(),
        subject,
        body,
        sender,
        recipient,
    })
}

/// Build the base64url raw payload Gmail's send endpoint expects.
fn build_raw_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<String, TransportError> {
    let message = lettre::Message::builder()
        .from(from.parse().map_err(|e| {
            TransportError::SendFailed(format!("invalid from address {from:?}: {e}"))
        })?)
        .to(to.parse().map_err(|e| {
            TransportError::SendFailed(format!("invalid to address {to:?}: {e}"))
        })?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| TransportError::SendFailed(format!("message build: {e}")))?;

    Ok(URL_SAFE.encode(message.formatted()))
}

/// Crude tag-stripping for HTML-only bodies.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => result.push(c),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
