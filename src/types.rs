//! Domain types returned by [`MessageClient`](crate::MessageClient).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest file name produced by [`Attachment::sanitized_filename`].
const MAX_FILENAME_CHARS: usize = 200;

static RESERVED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]+"#).expect("valid regex"));

static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("_{2,}").expect("valid regex"));

static ANGLE_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").expect("valid regex"));

/// Header summary of one message.
///
/// Built by the client from a detail response; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub(crate) id: String,
    pub(crate) thread_id: String,
    pub(crate) sender: String,
    pub(crate) recipient: String,
    pub(crate) subject: String,
    pub(crate) date: DateTime<Utc>,
    pub(crate) snippet: String,
    pub(crate) has_attachments: bool,
    pub(crate) attachment_count: usize,
}

impl Message {
    /// Provider message ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Conversation the message belongs to.
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Raw `From` header, e.g. `Jane Doe <jane@example.com>`.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Raw `To` header.
    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// `Subject` header.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// When the message was sent.
    #[must_use]
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Short plain-text preview.
    #[must_use]
    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    /// Whether any part carries an attachment.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        self.has_attachments
    }

    /// Number of attachment-bearing parts.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    /// Bare lowercase address of the sender.
    ///
    /// Handles `Name <addr>`, `<addr>` and bare addresses. Falls back to the raw
    /// header when no address can be found.
    #[must_use]
    pub fn sender_address(&self) -> String {
        extract_address(&self.sender)
    }
}

/// One attachment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Provider ID used to download the content.
    pub attachment_id: String,
    /// Message the attachment belongs to.
    pub message_id: String,
    /// File name as sent.
    pub filename: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Size reported by the provider.
    pub size_bytes: u64,
}

impl Attachment {
    /// Lowercase extension without the dot, if the file name has one.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.filename.trim().rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// File name safe to use on common file systems.
    #[must_use]
    pub fn sanitized_filename(&self) -> String {
        sanitize_filename(&self.filename)
    }

    /// Size as `12.3 KB` style text.
    #[must_use]
    pub fn human_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Attachment selection by extension and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFilter {
    /// Accepted extensions, compared case-insensitively; empty accepts all.
    pub extensions: Vec<String>,
    /// Smallest accepted size in bytes.
    pub min_size: u64,
    /// Largest accepted size in bytes.
    pub max_size: u64,
}

impl Default for AttachmentFilter {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            min_size: 1024,
            max_size: 50 * 1024 * 1024,
        }
    }
}

impl AttachmentFilter {
    /// Restricts the filter to `extensions` (leading dots are ignored).
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    /// Sets the accepted size range, inclusive.
    #[must_use]
    pub fn with_size_range(mut self, min_size: u64, max_size: u64) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Returns `true` if `attachment` passes the filter.
    #[must_use]
    pub fn matches(&self, attachment: &Attachment) -> bool {
        if !(self.min_size..=self.max_size).contains(&attachment.size_bytes) {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        attachment.extension().is_some_and(|ext| {
            self.extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        })
    }
}

fn sanitize_filename(name: &str) -> String {
    let replaced = RESERVED_CHARS.replace_all(name.trim(), "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let clean = collapsed.trim_matches(|c| c == '_' || c == '.' || c == ' ');

    if clean.is_empty() {
        return "unnamed_file".to_string();
    }
    if clean.chars().count() <= MAX_FILENAME_CHARS {
        return clean.to_string();
    }

    match clean.rsplit_once('.') {
        Some((stem, ext)) if ext.chars().count() < MAX_FILENAME_CHARS => {
            let keep = MAX_FILENAME_CHARS - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => clean.chars().take(MAX_FILENAME_CHARS).collect(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

fn extract_address(header: &str) -> String {
    let header = header.trim();
    if let Some(caps) = ANGLE_ADDRESS.captures(header) {
        return caps[1].to_lowercase();
    }
    if email_address::EmailAddress::is_valid(header) {
        return header.to_lowercase();
    }
    header.to_string()
}
