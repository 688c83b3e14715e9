//! Post-run reporting.

pub mod email;
pub mod mail;
pub mod report;

use std::fmt;

use anyhow::Result;

use crate::job::Services;
use crate::storage::JobRunReport;

pub use email::EmailNotification;
pub use mail::{LogTransport, MailTransport, SendmailTransport};

/// Reacts to a finished job run.
#[async_trait::async_trait]
pub trait Notification: fmt::Display + Send + Sync {
    async fn notify(&self, report: &JobRunReport, services: &Services) -> Result<()>;
}
