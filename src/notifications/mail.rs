//! Mail transports.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::info;

#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<()>;
}

/// Hands messages to the local MTA through `sendmail -t -i`.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    pub program: PathBuf,
    pub from: String,
}

impl SendmailTransport {
    pub fn new(program: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            from: from.into(),
        }
    }

    /// RFC 5322 message with a single HTML part.
    pub fn compose(&self, recipients: &[String], subject: &str, html: &str) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
            self.from,
            recipients.join(", "),
            subject.replace(['\r', '\n'], " "),
            html
        )
    }
}

#[async_trait::async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<()> {
        if recipients.is_empty() {
            anyhow::bail!("No recipients for '{}'", subject);
        }

        let message = self.compose(recipients, subject, html);
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!(recipients = %recipients.join(", "), %subject, "Report mailed");
        Ok(())
    }
}

/// Logs reports instead of mailing them.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait::async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<()> {
        info!(
            recipients = %recipients.join(", "),
            %subject,
            bytes = html.len(),
            "Mail disabled, report not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_headers() {
        let transport = SendmailTransport::new("/usr/sbin/sendmail", "cd@example.com");
        let message = transport.compose(
            &["a@example.com".into(), "b@example.com".into()],
            "Job report - nightly - failed",
            "<p>hi</p>",
        );
        assert!(message.starts_with("From: cd@example.com\r\nTo: a@example.com, b@example.com\r\n"));
        assert!(message.contains("Subject: Job report - nightly - failed\r\n"));
        assert!(message.contains("Content-Type: text/html; charset=utf-8\r\n\r\n<p>hi</p>"));
    }

    #[test]
    fn test_subject_newlines_flattened() {
        let transport = SendmailTransport::new("sendmail", "cd@example.com");
        let message = transport.compose(&["a@example.com".into()], "x\r\nBcc: evil", "");
        assert!(message.contains("Subject: x  Bcc: evil\r\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_pipes_message_to_program() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("mail.txt");
        let script = dir.path().join("sendmail");
        std::fs::write(&script, format!("#!/bin/sh\ncat > '{}'\n", sink.display())).unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let transport = SendmailTransport::new(&script, "cd@example.com");
        transport
            .send(&["dev@example.com".into()], "subject", "<b>body</b>")
            .await
            .unwrap();

        let written = std::fs::read_to_string(&sink).unwrap();
        assert!(written.contains("To: dev@example.com"));
        assert!(written.contains("<b>body</b>"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_reports_program_failure() {
        let transport = SendmailTransport::new("false", "cd@example.com");
        assert!(transport
            .send(&["dev@example.com".into()], "subject", "body")
            .await
            .is_err());
    }
}
