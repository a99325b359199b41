//! Sibling-session logout signalling.
//!
//! Sessions on the same machine share a marker file. A terminating session
//! publishes a timestamped marker; sibling sessions watch the file and
//! terminate themselves when a fresh marker appears. The publisher records
//! its own timestamp so the filesystem event it raised for itself is
//! ignored, and clears the marker shortly after writing it so a later
//! session start does not trip over a stale logout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::session::{Session, SessionEnd};

/// Markers older than this are ignored by subscribers.
const MARKER_TTL: Duration = Duration::from_secs(5);

/// How long a published marker stays on disk before the publisher clears it.
const MARKER_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Deserialize)]
struct Marker {
    ts_ms: u64,
}

/// Handle to the shared logout marker file.
#[derive(Debug, Clone)]
pub struct TabSync {
    marker_path: PathBuf,
    own_ts: Arc<Mutex<Option<u64>>>,
}

impl TabSync {
    pub fn new(marker_path: PathBuf) -> Self {
        TabSync {
            marker_path,
            own_ts: Arc::new(Mutex::new(None)),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Publish a logout marker for sibling sessions, then clear it after a
    /// short linger so it cannot outlive its usefulness.
    pub fn publish(&self) {
        let ts_ms = Self::now_ms();
        *self.own_ts.lock() = Some(ts_ms);

        if let Some(parent) = self.marker_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create tabsync directory");
                return;
            }
        }
        let marker = Marker { ts_ms };
        let raw = match serde_json::to_vec(&marker) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode tabsync marker");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.marker_path, raw) {
            warn!(error = %e, "failed to write tabsync marker");
            return;
        }
        debug!(ts_ms, path = %self.marker_path.display(), "tabsync marker published");

        let path = self.marker_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MARKER_LINGER).await;
            // Only clear our own marker; a sibling may have republished.
            if read_marker(&path).map(|m| m.ts_ms) == Some(ts_ms) {
                let _ = std::fs::remove_file(&path);
            }
        });
    }

    /// Watch the marker file and terminate the session on a fresh marker
    /// from a sibling. Runs until the session ends.
    pub async fn listen(self, session: Arc<Session>) {
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(8);
        let _watcher = match self.start_watcher(fs_tx) {
            Some(watcher) => watcher,
            None => return,
        };

        loop {
            tokio::select! {
                _ = session.cancelled() => return,
                event = fs_rx.recv() => {
                    if event.is_none() {
                        return;
                    }
                    if self.marker_is_foreign() {
                        session.terminate(SessionEnd::SiblingLogout);
                        return;
                    }
                }
            }
        }
    }

    /// Whether the marker on disk is a fresh marker we did not publish.
    fn marker_is_foreign(&self) -> bool {
        let Some(marker) = read_marker(&self.marker_path) else {
            return false;
        };
        if *self.own_ts.lock() == Some(marker.ts_ms) {
            return false;
        }
        let age = Self::now_ms().saturating_sub(marker.ts_ms);
        if age > MARKER_TTL.as_millis() as u64 {
            debug!(age_ms = age, "ignoring stale tabsync marker");
            return false;
        }
        true
    }

    fn start_watcher(&self, fs_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let watch_dir = self
            .marker_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        if let Err(e) = std::fs::create_dir_all(&watch_dir) {
            warn!(error = %e, "failed to create tabsync directory");
            return None;
        }
        let file_name = self
            .marker_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    let is_marker = event.paths.iter().any(|p| {
                        p.file_name()
                            .map(|n| n.to_string_lossy() == file_name)
                            .unwrap_or(false)
                    });
                    if is_marker {
                        let _ = fs_tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "tabsync watcher error"),
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "failed to create tabsync watcher");
                return None;
            }
        };
        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            warn!(error = %e, dir = %watch_dir.display(), "failed to watch tabsync directory");
            return None;
        }
        Some(watcher)
    }
}

fn read_marker(path: &std::path::Path) -> Option<Marker> {
    let raw = std::fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}
