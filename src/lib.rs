//! Incident scanner: reports the latest status-page incident phrase found
//! in a mailbox.

pub mod config;
pub mod error;
pub mod incident;
pub mod mailbox;
