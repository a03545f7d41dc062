//! Debounced persistence of the document buffer.
//!
//! Each save target runs as one worker task owning the only timer handle and
//! in-flight flag for that target, so "at most one in-flight write per
//! target" holds structurally. Mutations arrive over the buffer's latching
//! revision channel; bursts within the quiet window coalesce into a single
//! save carrying the buffer's content as of the deadline.

use crate::editor::DocumentBuffer;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_LOCAL_DELAY: Duration = Duration::from_millis(1_000);
const DEFAULT_REMOTE_DELAY: Duration = Duration::from_millis(5_000);
const DEFAULT_RENDER_DELAY: Duration = Duration::from_millis(150);

/// Debounce windows per target.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Quiet period before the local cache write.
    pub local_delay: Duration,
    /// Quiet period before the remote upload. Longer, so a burst of
    /// keystrokes becomes one network call.
    pub remote_delay: Duration,
    pub render_delay: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            local_delay: DEFAULT_LOCAL_DELAY,
            remote_delay: DEFAULT_REMOTE_DELAY,
            render_delay: DEFAULT_RENDER_DELAY,
        }
    }
}

/// A deferred destination for buffer snapshots.
#[async_trait]
pub trait SaveTarget: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether a deadline may be armed right now. An unarmed target gets no
    /// timer at all; mutations while unarmed are dropped for this target.
    fn armed(&self) -> bool {
        true
    }

    /// Writes the snapshot. Implementations own their user-facing
    /// notifications; the returned error is recorded on the target status.
    async fn persist(&self, snapshot: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetState {
    #[default]
    Idle,
    Pending {
        due_at: Instant,
    },
    Saving,
}

/// Observable scheduler state for one target.
#[derive(Debug, Clone, Default)]
pub struct TargetStatus {
    pub state: TargetState,
    /// Error from the most recent persist attempt, cleared on success.
    pub last_error: Option<String>,
    /// Highest buffer revision known to have reached the target. Monotonic,
    /// so a slow save finishing late never rolls it back.
    pub synced_revision: u64,
}

/// Running debounce worker for one target. `stop` (or dropping the handle)
/// shuts the worker down: a pending timer is discarded, an in-flight save
/// finishes first.
pub struct TargetHandle {
    status: Arc<Mutex<TargetStatus>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TargetHandle {
    pub fn status(&self) -> TargetStatus {
        self.status.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        drop(self.shutdown);
        let _ = self.task.await;
    }
}

/// Spawns the debounce worker for `target`.
pub fn spawn_target(
    buffer: Arc<DocumentBuffer>,
    target: Arc<dyn SaveTarget>,
    delay: Duration,
) -> TargetHandle {
    let status = Arc::new(Mutex::new(TargetStatus::default()));
    let (shutdown, stop) = oneshot::channel();
    let revisions = buffer.watch();
    let task = tokio::spawn(run_worker(
        buffer,
        target,
        delay,
        revisions,
        Arc::clone(&status),
        stop,
    ));
    TargetHandle {
        status,
        shutdown,
        task,
    }
}

async fn run_worker(
    buffer: Arc<DocumentBuffer>,
    target: Arc<dyn SaveTarget>,
    delay: Duration,
    mut revisions: watch::Receiver<u64>,
    status: Arc<Mutex<TargetStatus>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                if target.armed() {
                    let due_at = Instant::now() + delay;
                    deadline = Some(due_at);
                    status.lock().unwrap().state = TargetState::Pending { due_at };
                } else {
                    deadline = None;
                    status.lock().unwrap().state = TargetState::Idle;
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if !target.armed() {
                    debug!(
                        target: "tidemark::autosave",
                        save_target = target.name(),
                        "deadline reached while unarmed, skipping"
                    );
                    status.lock().unwrap().state = TargetState::Idle;
                    continue;
                }
                let revision = buffer.revision();
                let snapshot = buffer.snapshot();
                status.lock().unwrap().state = TargetState::Saving;
                let result = target.persist(&snapshot).await;
                let mut entry = status.lock().unwrap();
                match result {
                    Ok(()) => {
                        if revision > entry.synced_revision {
                            entry.synced_revision = revision;
                        }
                        entry.last_error = None;
                        debug!(
                            target: "tidemark::autosave",
                            save_target = target.name(),
                            revision,
                            "saved"
                        );
                    }
                    Err(err) => {
                        warn!(
                            target: "tidemark::autosave",
                            save_target = target.name(),
                            error = %err,
                            "save failed"
                        );
                        entry.last_error = Some(err);
                    }
                }
                entry.state = TargetState::Idle;
            }
        }
    }
}
