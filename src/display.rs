//! Presenting alerts to the user.

use crate::alert::Alert;
use crate::runner::{CommandRunner, CommandSpec};
use chrono::TimeZone;
use std::fmt::Display;
use tracing::{debug, warn};

const SEPARATOR: &str = "----------------------------------------";
const RELEASE_FORMAT: &str = "%b %d %Y, %-I:%M:%S %P";

/// Title and body, as printed by `check`.
pub fn render_alert(alert: &Alert) -> String {
    if alert.body.is_empty() {
        format!("{}\n", alert.title)
    } else {
        format!("{}\n\n{}\n", alert.title, alert.body)
    }
}

/// Title and body followed by release time and signer, as printed by `show`.
pub fn render_alert_details<Tz>(alert: &Alert, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let released = alert
        .released
        .map(|at| at.with_timezone(tz).format(RELEASE_FORMAT).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut text = render_alert(alert);
    text.push_str(SEPARATOR);
    text.push('\n');
    text.push_str(&format!("Release date/time: {released}\n"));
    text.push_str(&format!(
        "Signature info: {}\n",
        alert.signer.as_deref().unwrap_or("unknown")
    ));
    text
}

/// Pop the alert up through the desktop notifier. Failures are only logged.
pub fn notify_desktop(runner: &dyn CommandRunner, alert: &Alert) {
    let spec = CommandSpec::new("notify-send")
        .arg("--urgency=critical")
        .arg("--app-name=alertwatch")
        .arg(alert.title.as_str())
        .arg(alert.body.as_str());

    match runner.run(&spec) {
        Ok(output) if output.success() => debug!("Desktop notification sent"),
        Ok(output) => warn!(
            "notify-send exited with {}: {}",
            output.exit_code,
            output.text().trim()
        ),
        Err(e) => warn!("Cannot send desktop notification: {e}"),
    }
}
