// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

/// Version-control query boundary.
/// Absence of a repository is a valid outcome, not an error, so every query
/// returns an Option.
pub trait GitPort {
    /// Top-level directory of the enclosing working tree, if any.
    fn toplevel(&self) -> Option<PathBuf>;
    /// Current commit hash, if any.
    fn commit(&self) -> Option<String>;
    /// URL of the `origin` remote, if any.
    fn remote_url(&self) -> Option<String>;
}
