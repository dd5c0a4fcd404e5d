//! Internal module turning API responses into domain types.

use crate::api::{GmailMessage, MessagePart};
use crate::types::{Attachment, Message};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Builds a [`Message`] from a `messages.get` response.
pub(crate) fn parse_message(raw: &GmailMessage) -> Message {
    let payload = raw.payload.as_ref();
    let header = |name: &str| payload.and_then(|p| header_value(p, name)).unwrap_or_default();

    let attachment_count = payload.map_or(0, |p| attachments(&raw.id, p).len());

    Message {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        sender: header("From").to_string(),
        recipient: header("To").to_string(),
        subject: header("Subject").to_string(),
        date: message_date(
            &raw.id,
            payload.and_then(|p| header_value(p, "Date")),
            raw.internal_date.as_deref(),
        ),
        snippet: raw.snippet.clone(),
        has_attachments: attachment_count > 0,
        attachment_count,
    }
}

/// Collects every attachment-bearing part of the tree rooted at `root`.
///
/// A part counts when it has both a body attachment ID and a non-empty file
/// name. Parts are visited in document order using an explicit stack, so the
/// depth of the tree does not affect the call stack.
pub(crate) fn attachments(message_id: &str, root: &MessagePart) -> Vec<Attachment> {
    let mut found = Vec::new();
    let mut pending = vec![root];

    while let Some(part) = pending.pop() {
        let attachment_id = part.body.as_ref().and_then(|b| b.attachment_id.as_deref());
        let filename = part.filename.as_deref().map(str::trim).unwrap_or_default();

        if let Some(attachment_id) = attachment_id.filter(|_| !filename.is_empty()) {
            found.push(Attachment {
                attachment_id: attachment_id.to_string(),
                message_id: message_id.to_string(),
                filename: filename.to_string(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size_bytes: part.body.as_ref().map_or(0, |b| b.size),
            });
        }

        pending.extend(part.parts.iter().rev());
    }

    found
}

fn header_value<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// `Date` header, then the provider's receive time, then now.
fn message_date(id: &str, header: Option<&str>, internal_date: Option<&str>) -> DateTime<Utc> {
    if let Some(value) = header {
        match mailparse::dateparse(value) {
            Ok(secs) => {
                if let Some(date) = DateTime::from_timestamp(secs, 0) {
                    return date;
                }
            }
            Err(e) => debug!(id, date = value, error = %e, "Unparseable Date header"),
        }
    }

    if let Some(date) = internal_date
        .and_then(|ms| ms.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
    {
        return date;
    }

    warn!(id, "Message has no usable date, using current time");
    Utc::now()
}
