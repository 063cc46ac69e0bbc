//! Mirrors connection transitions into the status file.
//!
//! One reporter task is the only writer of the file, so concurrent
//! triggers are serialized by construction. Writes go to a temporary
//! sibling and are renamed into place, so readers never observe a partial
//! document.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::StatusSnapshot;
use crate::config::RelayConfig;
use crate::domain::{LinkMetadata, Transition, TransitionBus};
use crate::error::RelayError;

/// Atomic writer for the status snapshot path.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Targets `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Final location of the snapshot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("status.json"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Writes `snapshot` via write-temp-then-rename.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] or [`RelayError::Json`] on failure; the
    /// previous file, if any, is left untouched.
    pub async fn write(&self, snapshot: &StatusSnapshot) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// Deletes the snapshot. A file that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the file exists but cannot be removed.
    pub async fn remove(&self) -> Result<(), RelayError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Background task persisting every transition plus a periodic tick.
#[derive(Debug)]
pub struct StatusReporter {
    file: StatusFile,
    bus: TransitionBus,
    metadata: LinkMetadata,
    debounce: Duration,
    tick: Duration,
}

impl StatusReporter {
    /// Creates a reporter using the status settings in `config`.
    #[must_use]
    pub fn new(config: &RelayConfig, bus: TransitionBus, metadata: LinkMetadata) -> Self {
        Self {
            file: StatusFile::new(config.status_file.clone()),
            bus,
            metadata,
            debounce: config.status_debounce,
            tick: config.status_tick,
        }
    }

    /// Starts the reporter. Cancelling `shutdown` stops it and deletes the
    /// status file.
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let transitions = self.bus.subscribe();
        tokio::spawn(self.run(transitions, shutdown))
    }

    async fn run(self, mut transitions: broadcast::Receiver<Transition>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = transitions.recv() => match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        self.settle(&mut transitions, &shutdown).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {}
            }
            self.write_current().await;
        }

        match self.file.remove().await {
            Ok(()) => info!(path = %self.file.path().display(), "status file removed"),
            Err(e) => warn!(error = %e, "failed to remove status file"),
        }
    }

    /// Waits out the debounce window and swallows whatever arrived in it;
    /// the following write reflects the latest state anyway.
    async fn settle(
        &self,
        transitions: &mut broadcast::Receiver<Transition>,
        shutdown: &CancellationToken,
    ) {
        if !self.debounce.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.debounce) => {}
                () = shutdown.cancelled() => {}
            }
        }
        loop {
            match transitions.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    async fn write_current(&self) {
        let snapshot = StatusSnapshot::capture(&self.bus.current(), self.metadata.last_ping().await);
        match self.file.write(&snapshot).await {
            Ok(()) => debug!(status = %snapshot.connection_status, "status file written"),
            Err(e) => warn!(error = %e, path = %self.file.path().display(), "status write failed"),
        }
    }
}
