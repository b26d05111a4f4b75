// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::process::Command;

use crate::app::ports::{MirrorError, MirrorPort, MirrorTarget};

/// One-way mirror through the system `rsync` binary (`rsync -aq src/ dest`).
///
/// The trailing slash on the source makes rsync copy the directory's
/// contents rather than the directory itself, so the destination always
/// mirrors the run directory layout exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsyncMirror;

impl MirrorPort for RsyncMirror {
    fn mirror(&self, src: &Path, target: &MirrorTarget) -> Result<(), MirrorError> {
        let src_arg = format!("{}/", src.display());
        let dest_arg = target.to_string();
        tracing::debug!(src = %src_arg, dest = %dest_arg, "mirroring");

        let status = Command::new("rsync")
            .args(["-aq", &src_arg, &dest_arg])
            .status()
            .map_err(|source| MirrorError::Spawn {
                target: dest_arg.clone(),
                source,
            })?;

        if !status.success() {
            return Err(MirrorError::Failed {
                target: dest_arg,
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}
