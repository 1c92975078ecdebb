//! User-facing notifications for high-significance events (start, success, fatal errors).

use std::process::Command;

use crate::logging::Logger;

const NOTIFICATION_TITLE: &str = "Verizip";

pub trait NotificationSink {
    fn notify(&self, message: &str);
}

/// Console hosts already see every log line, so nothing extra is shown.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn notify(&self, _message: &str) {}
}

/// Shows a macOS notification through `osascript`. Failures are logged and otherwise ignored.
pub struct MacNotificationSink<'a> {
    logger: &'a dyn Logger,
}

impl<'a> MacNotificationSink<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self { logger }
    }
}

impl NotificationSink for MacNotificationSink<'_> {
    fn notify(&self, message: &str) {
        let script = display_notification_script(message, NOTIFICATION_TITLE);
        match Command::new("osascript").arg("-e").arg(&script).status() {
            Ok(status) if status.success() => {}
            Ok(status) => self
                .logger
                .debug(&format!("osascript exited with {status} for notification")),
            Err(err) => self
                .logger
                .debug(&format!("failed to run osascript for notification: {err}")),
        }
    }
}

fn display_notification_script(message: &str, title: &str) -> String {
    format!(
        "display notification \"{}\" with title \"{}\"",
        escape_applescript(message),
        escape_applescript(title)
    )
}

fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
