//! Wire types for the Gmail v1 REST API.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::ops::Deref;

/// Deserializes a response body without a nesting limit.
///
/// MIME part trees can be arbitrarily deep; the stack grows on demand instead
/// of rejecting the payload.
pub(crate) fn from_slice<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(body);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Response from `users.messages.list`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

/// Reference to a message (just ID and thread ID).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageRef {
    pub id: String,
}

/// Response from `users.messages.get`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    /// Epoch milliseconds, serialized as a string.
    pub internal_date: Option<String>,
    pub payload: Option<MessagePart>,
}

/// Node of the MIME part tree.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePart {
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: PartList,
}

/// Child parts of a [`MessagePart`]. Dropped iteratively.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub(crate) struct PartList(Vec<MessagePart>);

impl Deref for PartList {
    type Target = [MessagePart];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<MessagePart>> for PartList {
    fn from(parts: Vec<MessagePart>) -> Self {
        Self(parts)
    }
}

impl Drop for PartList {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.0);
        while let Some(mut part) = pending.pop() {
            pending.append(&mut part.parts.0);
        }
    }
}

/// Email header (name-value pair).
#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub name: String,
    pub value: String,
}

/// Body reference of a part.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PartBody {
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// Response from `users.messages.attachments.get`.
#[derive(Debug, Deserialize)]
pub(crate) struct AttachmentBody {
    #[serde(default)]
    pub data: String,
}

/// Google API error envelope: `{"error": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub reason: Option<String>,
}

impl ErrorBody {
    /// First machine-readable reason, falling back to the canonical status.
    pub fn reason(&self) -> Option<&str> {
        self.errors
            .iter()
            .find_map(|detail| detail.reason.as_deref())
            .or(self.status.as_deref())
    }
}

/// Parses an error body, tolerating bodies that are not JSON.
pub(crate) fn parse_error_body(body: &[u8]) -> ErrorBody {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_else(|_| ErrorBody {
            message: String::from_utf8_lossy(body).chars().take(200).collect(),
            ..ErrorBody::default()
        })
}
