//! Incident status detection over a mailbox.

pub mod message;
pub mod pipeline;
pub mod status;

pub use message::process_message;
pub use pipeline::{ScanOutcome, output_line, run, scan};
pub use status::StatusPhrase;
