// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::process::Command;

use crate::app::ports::GitPort;

/// Read-only git queries through the system `git` binary.
/// Any failure (no repo, no git, no remote) degrades to None.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

fn git_line(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .to_string();
    if line.is_empty() { None } else { Some(line) }
}

impl GitPort for GitCli {
    fn toplevel(&self) -> Option<PathBuf> {
        git_line(&["rev-parse", "--show-toplevel"]).map(PathBuf::from)
    }

    fn commit(&self) -> Option<String> {
        git_line(&["rev-parse", "HEAD"])
    }

    fn remote_url(&self) -> Option<String> {
        git_line(&["config", "--get", "remote.origin.url"])
    }
}
