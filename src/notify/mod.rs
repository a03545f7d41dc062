use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Message shown when nothing else is going on.
pub const IDLE_MESSAGE: &str = "Ready";

/// Default window after which a transient message reverts to idle.
pub const DEFAULT_REVERT: Duration = Duration::from_secs(3);

/// User-facing status capability. Implementations must be cheap to call from
/// worker tasks; the core never waits on them.
pub trait Notifier: Send + Sync {
    /// Shows `text` immediately. When `revert_after` elapses and the current
    /// message is still the one set by this call, the display reverts to
    /// [`IDLE_MESSAGE`]; a newer message wins and is left alone.
    fn status(&self, text: &str, revert_after: Option<Duration>);
}

/// Notifier that owns the current status line and spawns the revert task.
pub struct StatusLine {
    current: Arc<Mutex<String>>,
}

impl StatusLine {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(IDLE_MESSAGE.to_string())),
        }
    }

    pub fn current(&self) -> String {
        self.current.lock().unwrap().clone()
    }
}

impl Notifier for StatusLine {
    fn status(&self, text: &str, revert_after: Option<Duration>) {
        *self.current.lock().unwrap() = text.to_string();
        if let Some(delay) = revert_after {
            let current = Arc::clone(&self.current);
            let expected = text.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut current = current.lock().unwrap();
                if *current == expected {
                    *current = IDLE_MESSAGE.to_string();
                }
            });
        }
    }
}

/// Drops every message. Used by non-interactive commands.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn status(&self, _text: &str, _revert_after: Option<Duration>) {}
}

#[cfg(test)]
pub(crate) struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn status(&self, text: &str, _revert_after: Option<Duration>) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn transient_message_reverts_to_idle() {
        let line = StatusLine::new();
        line.status("Saved locally", Some(Duration::from_millis(1500)));
        assert_eq!(line.current(), "Saved locally");

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(line.current(), IDLE_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_message_survives_the_older_revert() {
        let line = StatusLine::new();
        line.status("Saving…", Some(Duration::from_millis(1000)));
        tokio::time::sleep(Duration::from_millis(500)).await;
        line.status("Save failed", Some(Duration::from_millis(5000)));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(line.current(), "Save failed");
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_message_never_reverts() {
        let line = StatusLine::new();
        line.status("Working", None);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(line.current(), "Working");
    }
}
