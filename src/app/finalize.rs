// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Run finalization: stamp the end time, archive, optionally clean up.
//!
//! Invoked by the generated submission script as its last line, after the
//! user command exited and the background watcher was killed. The local run
//! directory is removed only when the final mirror succeeded, so a failed
//! archive push never loses data.

use std::path::Path;
use std::time::Duration;

use crate::app::archive::{self, ArchiveError};
use crate::app::ports::{ClockPort, Login, MirrorError, MirrorPort, RemoteExecPort};
use crate::app::run::{self, RunRecord};

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Record(#[from] run::RecordError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("failed to remove finished run directory {path}: {source}")]
    Cleanup {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the finalizer needs to reach the archive host.
pub struct ArchiveSpec {
    pub login: Login,
    pub env_var: String,
}

/// Stamp `end_time` into the run record, push the whole run directory to the
/// archive one last time, and remove the local copy if asked to. NFS can be
/// slow to expose `meta.json` to the node the job ran on, hence one retry
/// before giving up on the record.
pub fn finalize(
    run_dir: &Path,
    clock: &dyn ClockPort,
    exec: &dyn RemoteExecPort,
    mirror: &dyn MirrorPort,
    archive: &ArchiveSpec,
    cleanup: bool,
) -> Result<(), FinalizeError> {
    let mut record = load_with_retry(run_dir, clock)?;
    record.end_time = Some(run::format_timestamp(clock.now()));
    record.store(run_dir)?;
    tracing::info!(memo_id = %record.memo_id, "finalizing run");

    let target =
        archive::resolve_archive_target(exec, &archive.login, &archive.env_var, &record.memo_id)?;
    mirror.mirror(run_dir, &target)?;

    if cleanup {
        std::fs::remove_dir_all(run_dir).map_err(|source| FinalizeError::Cleanup {
            path: run_dir.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %run_dir.display(), "removed local run directory");
    }
    Ok(())
}

fn load_with_retry(run_dir: &Path, clock: &dyn ClockPort) -> Result<RunRecord, run::RecordError> {
    match RunRecord::load(run_dir) {
        Ok(record) => Ok(record),
        Err(first) => {
            tracing::warn!("run record not readable yet, retrying once: {first}");
            clock.sleep(Duration::from_secs(1));
            RunRecord::load(run_dir)
        }
    }
}
