// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Subprocess-backed adapters for the remote-exec, mirror and git ports.
//!
//! These shell out to the standard `ssh`, `rsync` and `git` binaries rather
//! than speaking the protocols in-process; the tool targets clusters where
//! those are universally present and already hold the user's credentials.

pub mod git;
pub mod rsync;
pub mod ssh;

pub use git::GitCli;
pub use rsync::RsyncMirror;
pub use ssh::SshExec;
