// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The watch-and-sync daemon: mirrors a live run directory to the archive.
//!
//! Deliberately poll-based: file-change notification is unreliable on the
//! network filesystems these runs live on, and a five-second scan of one
//! run directory is cheap. The loop has no self-termination condition; the
//! submission script kills it right after the user command exits.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::app::ports::{ClockPort, MirrorError, MirrorPort, MirrorTarget};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing changed since the watermark.
    Idle,
    /// A mirror ran and the watermark advanced.
    Synced,
    /// The mirror failed; the watermark stays put and the next tick retries.
    Deferred,
}

/// The watched side of the loop, separated out so tests can script it.
pub trait WatchTarget {
    /// Most recent modification time anywhere under the run directory.
    fn latest_change(&self) -> io::Result<Option<SystemTime>>;
    /// One full one-way mirror to the archive.
    fn mirror(&self) -> Result<(), MirrorError>;
}

/// Poll loop state: the watermark of the last successfully mirrored change.
#[derive(Debug, Default)]
pub struct WatchLoop {
    watermark: Option<SystemTime>,
}

impl WatchLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// One poll tick: scan, compare against the watermark, mirror if newer.
    /// Mirror failures are soft: logged, reported as `Deferred`, and retried
    /// on the next tick because the watermark only advances on success.
    pub fn tick(&mut self, target: &dyn WatchTarget) -> SyncOutcome {
        let latest = match target.latest_change() {
            Ok(Some(mtime)) => mtime,
            Ok(None) => return SyncOutcome::Idle,
            Err(err) => {
                tracing::warn!("failed to scan run directory: {err}");
                return SyncOutcome::Deferred;
            }
        };
        if let Some(watermark) = self.watermark
            && latest <= watermark
        {
            return SyncOutcome::Idle;
        }
        match target.mirror() {
            Ok(()) => {
                self.watermark = Some(latest);
                SyncOutcome::Synced
            }
            Err(err) => {
                tracing::warn!("mirror failed, retrying next cycle: {err}");
                SyncOutcome::Deferred
            }
        }
    }

    /// Run until killed. The generated submission script starts this in the
    /// background before the user command and kills it afterwards.
    pub fn run(
        mut self,
        clock: &dyn ClockPort,
        interval: Duration,
        target: &dyn WatchTarget,
    ) -> ! {
        loop {
            clock.sleep(interval);
            let outcome = self.tick(target);
            tracing::trace!(?outcome, "poll tick");
        }
    }
}

/// Production watch target: a run directory on disk plus a mirror port.
pub struct FsWatchTarget<'a> {
    run_dir: PathBuf,
    mirror: &'a dyn MirrorPort,
    dest: MirrorTarget,
}

impl<'a> FsWatchTarget<'a> {
    pub fn new(run_dir: &Path, mirror: &'a dyn MirrorPort, dest: MirrorTarget) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            mirror,
            dest,
        }
    }
}

impl WatchTarget for FsWatchTarget<'_> {
    fn latest_change(&self) -> io::Result<Option<SystemTime>> {
        let mut latest = None;
        for entry in WalkDir::new(&self.run_dir).follow_links(false) {
            let entry = entry.map_err(|err| {
                err.into_io_error().unwrap_or_else(|| io::Error::other("walk error"))
            })?;
            // Files can vanish mid-scan; skip rather than fail the tick.
            let mtime = match entry.metadata().ok().and_then(|meta| meta.modified().ok()) {
                Some(mtime) => mtime,
                None => continue,
            };
            if latest.is_none_or(|seen| mtime > seen) {
                latest = Some(mtime);
            }
        }
        Ok(latest)
    }

    fn mirror(&self) -> Result<(), MirrorError> {
        self.mirror.mirror(&self.run_dir, &self.dest)
    }
}
