//! Search filters and their translation into the provider's query grammar.
//!
//! ```
//! use mail_access::query::{build_query, SearchFilter};
//!
//! let filter = SearchFilter::builder()
//!     .sender("a@x.com")
//!     .sender("b@x.com")
//!     .has_attachment(true)
//!     .build();
//!
//! assert_eq!(build_query(&filter), "(from:a@x.com OR from:b@x.com) has:attachment");
//! ```
//!
//! Clauses are always emitted in the same order: senders, `after:`, `before:`,
//! `has:attachment`, file extensions, subject keywords, excluded subject keywords.
//! Invalid senders and unparseable dates are skipped with a warning.

use chrono::NaiveDate;
use email_address::EmailAddress;
use tracing::warn;

/// Date layouts accepted for `after`/`before`, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%m-%d-%Y", "%Y.%m.%d", "%d.%m.%Y",
];

/// Structured message search criteria.
///
/// Create using [`SearchFilter::builder()`]. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    senders: Vec<String>,
    after_date: Option<String>,
    before_date: Option<String>,
    has_attachment: bool,
    subject_include_keywords: Vec<String>,
    subject_exclude_keywords: Vec<String>,
    extensions: Vec<String>,
}

impl SearchFilter {
    /// Creates a new filter builder.
    #[must_use]
    pub fn builder() -> SearchFilterBuilder {
        SearchFilterBuilder::default()
    }

    /// Sender addresses in insertion order, without duplicates.
    #[must_use]
    pub fn senders(&self) -> &[String] {
        &self.senders
    }

    /// Lower date bound as given.
    #[must_use]
    pub fn after_date(&self) -> Option<&str> {
        self.after_date.as_deref()
    }

    /// Upper date bound as given.
    #[must_use]
    pub fn before_date(&self) -> Option<&str> {
        self.before_date.as_deref()
    }

    /// Whether only messages with attachments match.
    #[must_use]
    pub fn has_attachment(&self) -> bool {
        self.has_attachment
    }

    /// Keywords the subject must contain.
    #[must_use]
    pub fn subject_include_keywords(&self) -> &[String] {
        &self.subject_include_keywords
    }

    /// Keywords the subject must not contain.
    #[must_use]
    pub fn subject_exclude_keywords(&self) -> &[String] {
        &self.subject_exclude_keywords
    }

    /// Attachment file extensions, without leading dots.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Shorthand for [`build_query`].
    #[must_use]
    pub fn to_query(&self) -> String {
        build_query(self)
    }
}

/// Builder for [`SearchFilter`].
#[derive(Debug, Default)]
pub struct SearchFilterBuilder {
    filter: SearchFilter,
}

impl SearchFilterBuilder {
    /// Adds a sender address. Exact duplicates are ignored.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        let sender = sender.into().trim().to_string();
        if !sender.is_empty() && !self.filter.senders.contains(&sender) {
            self.filter.senders.push(sender);
        }
        self
    }

    /// Adds several sender addresses.
    #[must_use]
    pub fn senders<I, S>(self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        senders
            .into_iter()
            .fold(self, |builder, sender| builder.sender(sender))
    }

    /// Only match messages received after `date` (e.g. `2025-01-31`).
    #[must_use]
    pub fn after(mut self, date: impl Into<String>) -> Self {
        self.filter.after_date = Some(date.into());
        self
    }

    /// Only match messages received before `date`.
    #[must_use]
    pub fn before(mut self, date: impl Into<String>) -> Self {
        self.filter.before_date = Some(date.into());
        self
    }

    /// Only match messages carrying attachments.
    #[must_use]
    pub fn has_attachment(mut self, has_attachment: bool) -> Self {
        self.filter.has_attachment = has_attachment;
        self
    }

    /// Requires `keyword` in the subject.
    #[must_use]
    pub fn subject_includes(mut self, keyword: impl Into<String>) -> Self {
        self.filter.subject_include_keywords.push(keyword.into());
        self
    }

    /// Excludes subjects containing `keyword`.
    #[must_use]
    pub fn subject_excludes(mut self, keyword: impl Into<String>) -> Self {
        self.filter.subject_exclude_keywords.push(keyword.into());
        self
    }

    /// Adds an attachment extension; `.pdf` and `pdf` are equivalent.
    ///
    /// Extensions containing whitespace, parentheses or quotes are ignored.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return self;
        }
        if extension
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"'))
        {
            warn!(extension, "Ignoring extension that would split the query");
            return self;
        }
        self.filter.extensions.push(extension.to_string());
        self
    }

    /// Finishes the filter.
    #[must_use]
    pub fn build(self) -> SearchFilter {
        self.filter
    }
}

/// Translates `filter` into a provider query string.
#[must_use]
pub fn build_query(filter: &SearchFilter) -> String {
    let mut clauses = Vec::new();

    let senders: Vec<String> = filter
        .senders
        .iter()
        .filter(|sender| {
            let valid = EmailAddress::is_valid(sender);
            if !valid {
                warn!(sender = %sender, "Skipping invalid sender address");
            }
            valid
        })
        .map(|sender| format!("from:{sender}"))
        .collect();
    clauses.extend(or_group(senders));

    if let Some(date) = filter.after_date.as_deref().and_then(|d| date_token("after", d)) {
        clauses.push(date);
    }
    if let Some(date) = filter.before_date.as_deref().and_then(|d| date_token("before", d)) {
        clauses.push(date);
    }

    if filter.has_attachment {
        clauses.push("has:attachment".to_string());
    }

    let extensions = filter
        .extensions
        .iter()
        .map(|ext| format!("filename:{ext}"))
        .collect();
    clauses.extend(or_group(extensions));

    for keyword in non_blank(&filter.subject_include_keywords) {
        clauses.push(format!("subject:\"{keyword}\""));
    }
    for keyword in non_blank(&filter.subject_exclude_keywords) {
        if keyword.contains(char::is_whitespace) {
            clauses.push(format!("-subject:\"{keyword}\""));
        } else {
            clauses.push(format!("-subject:{keyword}"));
        }
    }

    clauses.join(" ")
}

/// `a`, or `(a OR b ...)`; nothing for an empty list.
fn or_group(terms: Vec<String>) -> Option<String> {
    match terms.len() {
        0 => None,
        1 => terms.into_iter().next(),
        _ => Some(format!("({})", terms.join(" OR "))),
    }
}

/// Keywords with quotes removed and inner whitespace collapsed; blanks dropped.
fn non_blank(keywords: &[String]) -> impl Iterator<Item = String> + '_ {
    keywords
        .iter()
        .map(|k| k.replace('"', "").split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|k| !k.is_empty())
}

fn date_token(operator: &str, raw: &str) -> Option<String> {
    match parse_date(raw) {
        Some(date) => Some(format!("{operator}:{}", date.format("%Y/%m/%d"))),
        None => {
            warn!(date = raw, operator, "Dropping unparseable date bound");
            None
        }
    }
}

/// Parses `raw` against the accepted layouts, first match wins.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}
