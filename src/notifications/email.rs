use std::fmt;

use anyhow::Result;
use tracing::debug;

use super::{report, Notification};
use crate::job::Services;
use crate::state::RunState;
use crate::storage::JobRunReport;

/// Mails an HTML report to a fixed recipient list.
///
/// Failed and errored runs are reported unless `on_failure` is off;
/// successful runs only when `on_success` is on.
#[derive(Debug, Clone)]
pub struct EmailNotification {
    pub recipients: Vec<String>,
    pub on_success: bool,
    pub on_failure: bool,
}

impl EmailNotification {
    pub fn new<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: recipients.into_iter().map(Into::into).collect(),
            on_success: false,
            on_failure: true,
        }
    }

    pub fn on_success(mut self, enabled: bool) -> Self {
        self.on_success = enabled;
        self
    }

    pub fn on_failure(mut self, enabled: bool) -> Self {
        self.on_failure = enabled;
        self
    }

    pub fn wants(&self, state: RunState) -> bool {
        (state.is_failure() && self.on_failure) || (state == RunState::Success && self.on_success)
    }
}

impl fmt::Display for EmailNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "email ({})", self.recipients.join(", "))
    }
}

#[async_trait::async_trait]
impl Notification for EmailNotification {
    async fn notify(&self, report: &JobRunReport, services: &Services) -> Result<()> {
        let state = report.job_run.state;
        if !self.wants(state) {
            debug!(job = %report.job_run.name, %state, "Email not wanted for this outcome");
            return Ok(());
        }

        let html = report::render_html(report)?;
        services
            .mailer
            .send(&self.recipients, &report::subject(report), &html)
            .await
    }
}
