//! E-mail notification of the run report.
//!
//! Only runs started by automation (cron, `run --scheduled`) send mail. The
//! message is piped to a sendmail-compatible command, `sendmail -t` style,
//! with the headers in the message itself.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::report::RunReport;

pub trait Notifier: Send + Sync {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Pipes an RFC 5322 message to `command -t`.
pub struct SendmailNotifier {
    command: String,
    sender: String,
}

impl SendmailNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            command: config.command.clone(),
            sender: config.sender.clone(),
        }
    }

    pub fn message(&self, recipient: &str, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.sender, recipient, subject, body
        )
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let mut child = Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.message(recipient, subject, body).as_bytes())
                .with_context(|| format!("Failed to write message to '{}'", self.command))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", self.command))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.command, stderr.trim());
        }
        Ok(())
    }
}

/// Loose address check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(address: &str) -> bool {
    let address = address.trim();
    if address.chars().any(|c| c.is_whitespace() || c == ',') {
        return false;
    }
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Send the plaintext report if the run qualifies. Returns whether a mail
/// was sent. Delivery failures are logged, never propagated.
pub fn notify_report(
    config: &NotificationConfig,
    notifier: &dyn Notifier,
    report: &RunReport,
    called_from_automation: bool,
) -> bool {
    if !called_from_automation || !config.enabled {
        return false;
    }
    if !is_valid_email(&config.recipient) {
        warn!(recipient = %config.recipient, "notification recipient is not a valid address");
        return false;
    }

    match notifier.send(&config.recipient, &config.subject, &report.render_plaintext()) {
        Ok(()) => {
            info!(recipient = %config.recipient, "report sent");
            true
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "could not send report");
            false
        }
    }
}
