//! Mail transport collaborator — listing, fetching, and sending messages.

mod gmail;

pub use gmail::{GmailClient, GmailConfig};

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::TransportError;

/// A fetched inbound message, reduced to the fields the pipeline needs.
#[derive(Debug, Clone)]
pub struct RawEmail {
    /// Transport-native message id.
    pub id: String,
    pub subject: String,
    pub body: String,
    /// Raw From header value, e.g. `Alice <alice@example.com>`.
    pub sender: String,
    pub recipient: Option<String>,
}

/// Message transport, as exposed by the mail collaborator.
///
/// Pure I/O — no triage or approval logic. `send` is only ever called by
/// the approval resolver, after a human said yes.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// List recent message ids under the given labels.
    async fn list_recent(
        &self,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<String>, TransportError>;

    /// Fetch one message by id.
    async fn fetch(&self, id: &str) -> Result<RawEmail, TransportError>;

    /// Send a message. Returns the transport-assigned message id.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, TransportError>;
}

/// Extract a plain address from an RFC 5322 From header value.
///
/// `Alice <alice@example.com>` → `alice@example.com`. Returns the input
/// unchanged when no address-shaped substring is found.
pub fn extract_address(sender: &str) -> String {
    static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
    let re = ADDRESS_RE
        .get_or_init(|| Regex::new(r"[\w.+-]+@[\w.-]+\.[A-Za-z]{2,}").expect("valid regex"));
    re.find(sender)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| sender.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_display_name_form() {
        assert_eq!(
            extract_address("Alice <alice@example.com>"),
            "alice@example.com"
        );
    }

    #[test]
    fn extracts_from_quoted_display_name() {
        assert_eq!(
            extract_address("\"Carol Doe\" <carol.d@example.com>"),
            "carol.d@example.com"
        );
    }

    #[test]
    fn passes_through_bare_address() {
        assert_eq!(extract_address("bob@example.com"), "bob@example.com");
    }

    #[test]
    fn handles_plus_addressing() {
        assert_eq!(
            extract_address("Dev <dev+alerts@example.co.uk>"),
            "dev+alerts@example.co.uk"
        );
    }

    #[test]
    fn returns_input_when_no_address() {
        assert_eq!(extract_address("not an address"), "not an address");
        assert_eq!(extract_address(""), "");
    }
}
