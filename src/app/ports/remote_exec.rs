// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io;

/// A user/host pair identifying a remote login target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub user: String,
    pub host: String,
}

impl Login {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl std::fmt::Display for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn remote command on {login}: {source}")]
    Spawn {
        login: String,
        #[source]
        source: io::Error,
    },

    #[error("remote command on {login} exited with {status}: {output}")]
    Failed {
        login: String,
        status: i32,
        output: String,
    },
}

/// Remote command execution boundary.
/// One blocking, all-or-nothing call: run `command` through a login shell on
/// the target host and return the combined output text.
pub trait RemoteExecPort {
    fn exec(&self, login: &Login, command: &str) -> Result<String, ExecError>;
}
