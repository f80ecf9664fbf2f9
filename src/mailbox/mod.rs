//! Mailbox access: the search/fetch seam and its IMAP implementation.

pub mod imap;

use std::fmt;

use chrono::{Days, NaiveDate};

use crate::error::{ConfigError, Result};

pub use imap::ImapSession;

/// Opaque message identifier returned by a search.
///
/// Only meaningful for the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Search criteria: received on or after `since`, sent by `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub since: NaiveDate,
    pub sender: String,
}

impl SearchQuery {
    /// Lower bound is `today - days_back` at day granularity.
    pub fn since_days_back(
        today: NaiveDate,
        days_back: u32,
        sender: impl Into<String>,
    ) -> Result<Self> {
        let since = today
            .checked_sub_days(Days::new(u64::from(days_back)))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "INCIDENT_DAYS_BACK".into(),
                message: format!("{days_back} days before {today} is out of range"),
            })?;
        Ok(Self {
            since,
            sender: sender.into(),
        })
    }

    /// IMAP date form, e.g. `09-Oct-2026`.
    pub fn imap_since(&self) -> String {
        self.since.format("%d-%b-%Y").to_string()
    }
}

/// An open, authenticated mailbox.
///
/// Implementations release the session when dropped, so every exit path
/// of a scan logs out.
pub trait Mailbox {
    /// Ids matching `query`, in server order.
    fn search(&mut self, query: &SearchQuery) -> Result<Vec<MessageId>>;

    /// Full raw RFC 5322 bytes of one message.
    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>>;
}
