//! The five incident status phrases and how text is matched against them.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// A status phrase found in a notification email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusPhrase {
    NewIncident,
    UpdatePosted,
    Identified,
    Monitoring,
    Resolved,
}

impl StatusPhrase {
    /// Every phrase, in the order matches are reported within a part.
    pub const ALL: [StatusPhrase; 5] = [
        StatusPhrase::NewIncident,
        StatusPhrase::UpdatePosted,
        StatusPhrase::Identified,
        StatusPhrase::Monitoring,
        StatusPhrase::Resolved,
    ];

    /// The literal phrase as it appears in notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusPhrase::NewIncident => "New incident",
            StatusPhrase::UpdatePosted => "An update has been posted",
            StatusPhrase::Identified => "Incident status: Identified",
            StatusPhrase::Monitoring => "Incident status: Monitoring",
            StatusPhrase::Resolved => "Incident resolved",
        }
    }
}

impl fmt::Display for StatusPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static PHRASE_PATTERNS: LazyLock<Vec<(StatusPhrase, Regex)>> = LazyLock::new(|| {
    StatusPhrase::ALL
        .iter()
        .map(|&phrase| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(phrase.as_str()));
            (phrase, Regex::new(&pattern).unwrap())
        })
        .collect()
});

// Marks the end of the useful part of a notification.
static SECTION_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)You(.*?)notifications").unwrap());

/// Phrases present in `text` as whole words, ignoring case.
///
/// Each phrase is reported at most once, in [`StatusPhrase::ALL`] order.
pub fn find_statuses(text: &str) -> Vec<StatusPhrase> {
    PHRASE_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(phrase, _)| *phrase)
        .collect()
}

/// Whether `text` holds the "You ... notifications" footer that ends a scan.
pub fn has_section_delimiter(text: &str) -> bool {
    SECTION_DELIMITER.is_match(text)
}
