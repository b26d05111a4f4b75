// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io;
use std::path::{Path, PathBuf};

use super::remote_exec::Login;

/// Destination of a one-way recursive mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorTarget {
    Local(PathBuf),
    Remote { login: Login, path: String },
}

impl std::fmt::Display for MirrorTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorTarget::Local(path) => write!(f, "{}", path.display()),
            MirrorTarget::Remote { login, path } => write!(f, "{login}:{path}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("failed to spawn mirror to {target}: {source}")]
    Spawn {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("mirror to {target} exited with {status}")]
    Failed { target: String, status: i32 },
}

/// One-way recursive directory mirroring boundary.
/// The destination is overwritten to match the source; the source is never
/// mutated. Blocking, all-or-nothing.
pub trait MirrorPort {
    fn mirror(&self, src: &Path, target: &MirrorTarget) -> Result<(), MirrorError>;
}
