//! Connect, search, scan every hit, report the last status seen.

use std::fmt;

use chrono::Local;
use tracing::{debug, info};

use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::incident::message::process_message;
use crate::incident::status::StatusPhrase;
use crate::mailbox::{Mailbox, SearchQuery, imap};

/// Printed when no scanned message carried a status phrase.
pub const NO_RESULTS_MESSAGE: &str = "No emails found today";

/// Prefix of the line printed when a run fails.
pub const ERROR_PREFIX: &str = "Error processing emails: ";

/// Result of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Last phrase of the flattened match sequence.
    Status(StatusPhrase),
    /// Nothing matched in the period.
    NoResults,
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Status(phrase) => phrase.fmt(f),
            ScanOutcome::NoResults => f.write_str(NO_RESULTS_MESSAGE),
        }
    }
}

/// Run the whole pipeline against the configured IMAP server.
///
/// The session is released on every exit path.
pub fn run(config: &ScannerConfig) -> Result<ScanOutcome> {
    let session = imap::connect(config)?;
    let query = SearchQuery::since_days_back(
        Local::now().date_naive(),
        config.days_back,
        config.sender_filter.clone(),
    )?;
    scan(session, &query)
}

/// Search `mailbox`, scan each hit in server order and keep the last phrase.
///
/// Any failure aborts the scan; statuses gathered so far are discarded. The
/// mailbox is consumed and dropped before returning.
pub fn scan<M: Mailbox>(mut mailbox: M, query: &SearchQuery) -> Result<ScanOutcome> {
    let ids = mailbox.search(query)?;
    info!(
        count = ids.len(),
        since = %query.since,
        sender = %query.sender,
        "Scanning notification emails"
    );

    let mut statuses = Vec::new();
    for id in &ids {
        let raw = mailbox.fetch(id)?;
        let found = process_message(&raw);
        debug!(id = %id, bytes = raw.len(), found = ?found, "Message scanned");
        statuses.extend(found);
    }
    drop(mailbox);

    Ok(latest_status(&statuses))
}

/// Last element of the flattened sequence, or `NoResults`.
pub fn latest_status(statuses: &[StatusPhrase]) -> ScanOutcome {
    statuses
        .last()
        .map_or(ScanOutcome::NoResults, |&phrase| ScanOutcome::Status(phrase))
}

/// The single line a run prints.
pub fn output_line(result: &std::result::Result<ScanOutcome, ScanError>) -> String {
    match result {
        Ok(outcome) => outcome.to_string(),
        Err(e) => format!("{ERROR_PREFIX}{e}"),
    }
}
