//! Email capabilities: `send_email` and `read_emails`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use marshal_core::error::ToolError;
use marshal_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::required_str;

const DEFAULT_MAX_RESULTS: usize = 5;

/// An unread message as the tools see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailSummary {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
}

impl MailSummary {
    fn line(&self) -> String {
        format!("From: {} | Subject: {} | Snippet: {}", self.from, self.subject, self.snippet)
    }
}

/// A message handed to a [`MailBackend`] for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// Minimal RFC 2822 plain-text rendering.
    pub fn to_rfc2822(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\r\n{}",
            self.to, self.subject, self.body
        )
    }
}

#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Deliver a message; returns the backend's message id.
    async fn send(&self, mail: &OutgoingMail) -> Result<String, ToolError>;

    /// The newest unread inbox messages.
    async fn list_unread(&self, limit: usize) -> Result<Vec<MailSummary>, ToolError>;
}

// --- Tools ---

pub struct SendEmailTool {
    backend: Arc<dyn MailBackend>,
}

impl SendEmailTool {
    pub fn new(backend: Arc<dyn MailBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send a plain-text email from the user's account."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "The recipient's email address"
                },
                "subject": {
                    "type": "string",
                    "description": "The subject line"
                },
                "body": {
                    "type": "string",
                    "description": "The plain text body of the email"
                }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let to = required_str(&arguments, "to")?.trim();
        let subject = required_str(&arguments, "subject")?;
        let body = required_str(&arguments, "body")?;

        if !looks_like_address(to) {
            return Err(ToolError::InvalidArguments(format!("'{to}' is not an email address")));
        }
        // Header injection guard.
        if subject.contains(['\r', '\n']) {
            return Err(ToolError::InvalidArguments("subject must be a single line".into()));
        }

        let mail = OutgoingMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let message_id = self.backend.send(&mail).await?;
        info!(%message_id, to, "Email sent");

        Ok(ToolResult::ok(format!("Email sent! Message ID: {message_id}")))
    }
}

fn looks_like_address(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub struct ReadEmailsTool {
    backend: Arc<dyn MailBackend>,
}

impl ReadEmailsTool {
    pub fn new(backend: Arc<dyn MailBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReadEmailsTool {
    fn name(&self) -> &str {
        "read_emails"
    }

    fn description(&self) -> &str {
        "Read the latest unread emails from the inbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "max_results": {
                    "type": "integer",
                    "description": "Number of emails to fetch (default 5)",
                    "minimum": 1,
                    "maximum": 25
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let limit = arguments["max_results"]
            .as_u64()
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize);

        let unread = self.backend.list_unread(limit).await?;
        debug!(count = unread.len(), "Fetched unread mail");

        if unread.is_empty() {
            return Ok(ToolResult::ok("No new unread emails."));
        }

        let output = unread.iter().map(MailSummary::line).collect::<Vec<_>>().join("\n---\n");
        let data = serde_json::to_value(&unread).unwrap_or_default();
        Ok(ToolResult::with_data(output, data))
    }
}

// --- Backends ---

/// An in-process mailbox. Sent mail is kept in an outbox for inspection.
#[derive(Default)]
pub struct LocalMailbox {
    inbox: RwLock<Vec<MailSummary>>,
    outbox: RwLock<Vec<OutgoingMail>>,
}

impl LocalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbox(inbox: Vec<MailSummary>) -> Self {
        Self {
            inbox: RwLock::new(inbox),
            outbox: RwLock::new(Vec::new()),
        }
    }

    pub async fn sent(&self) -> Vec<OutgoingMail> {
        self.outbox.read().await.clone()
    }
}

#[async_trait]
impl MailBackend for LocalMailbox {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, ToolError> {
        self.outbox.write().await.push(mail.clone());
        Ok(Uuid::new_v4().simple().to_string())
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<MailSummary>, ToolError> {
        Ok(self.inbox.read().await.iter().take(limit).cloned().collect())
    }
}

/// Gmail v1 (`users/me`), bearer-token auth.
pub struct GmailBackend {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl GmailBackend {
    pub fn new(access_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            access_token: access_token.into(),
            base_url: "https://gmail.googleapis.com/gmail/v1/users/me".into(),
            client,
        }
    }

    /// The `raw` field Gmail expects: the RFC 2822 message, base64url-encoded.
    fn encode_raw(mail: &OutgoingMail) -> String {
        URL_SAFE.encode(mail.to_rfc2822().as_bytes())
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "gmail".into(),
            reason,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ToolError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::failed(format!("Gmail API returned {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Self::failed(format!("Unreadable Gmail response: {e}")))
    }

    async fn fetch_summary(&self, id: &str) -> Result<MailSummary, ToolError> {
        let response = self
            .client
            .get(format!("{}/messages/{id}", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
            ])
            .send()
            .await
            .map_err(|e| Self::failed(format!("Gmail request failed: {e}")))?;

        let message: GmailMessage = Self::read_json(response).await?;
        Ok(message.into_summary())
    }
}

#[derive(Debug, Deserialize)]
struct GmailSendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessageList {
    #[serde(default)]
    messages: Vec<GmailMessageRef>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: GmailPayload,
}

#[derive(Debug, Default, Deserialize)]
struct GmailPayload {
    #[serde(default)]
    headers: Vec<GmailHeader>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

impl GmailMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn into_summary(self) -> MailSummary {
        MailSummary {
            from: self.header("From").unwrap_or("Unknown").to_string(),
            subject: self.header("Subject").unwrap_or("No Subject").to_string(),
            id: self.id,
            snippet: self.snippet,
        }
    }
}

#[async_trait]
impl MailBackend for GmailBackend {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, ToolError> {
        let response = self
            .client
            .post(format!("{}/messages/send", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "raw": Self::encode_raw(mail) }))
            .send()
            .await
            .map_err(|e| Self::failed(format!("Gmail request failed: {e}")))?;

        let sent: GmailSendResponse = Self::read_json(response).await?;
        Ok(sent.id)
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<MailSummary>, ToolError> {
        let max_results = limit.to_string();
        let response = self
            .client
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("labelIds", "INBOX"),
                ("q", "is:unread"),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::failed(format!("Gmail request failed: {e}")))?;

        let list: GmailMessageList = Self::read_json(response).await?;

        let mut summaries = Vec::with_capacity(list.messages.len());
        for message in list.messages.iter().take(limit) {
            summaries.push(self.fetch_summary(&message.id).await?);
        }
        Ok(summaries)
    }
}
