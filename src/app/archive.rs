// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Locating a run's destination on the archive host.
//!
//! The archive host advertises its storage root through a login-profile
//! environment variable; we read it with one remote `echo` and append the
//! run identifier. Each run thereby owns a distinct subpath, so concurrent
//! watchers never write to the same archive location.

use crate::app::ports::{ExecError, Login, MirrorTarget, RemoteExecPort};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("archive host {host} does not export ${var}")]
    Unset { var: String, host: String },
}

/// Query the archive host for its storage root and derive this run's
/// archive directory.
pub fn resolve_archive_target(
    exec: &dyn RemoteExecPort,
    login: &Login,
    env_var: &str,
    memo_id: &str,
) -> Result<MirrorTarget, ArchiveError> {
    let output = exec.exec(login, &format!("echo ${env_var}"))?;
    let root = last_nonempty_line(&output).ok_or_else(|| ArchiveError::Unset {
        var: env_var.to_string(),
        host: login.host.clone(),
    })?;
    let path = format!("{}/{memo_id}", root.trim_end_matches('/'));
    Ok(MirrorTarget::Remote {
        login: login.clone(),
        path,
    })
}

/// Login shells tend to print banners before the value; the variable we
/// echoed is the last non-empty line.
pub(crate) fn last_nonempty_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    struct CannedExec {
        reply: String,
        commands: RefCell<Vec<String>>,
    }

    impl CannedExec {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                commands: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteExecPort for CannedExec {
        fn exec(&self, _login: &Login, command: &str) -> Result<String, ExecError> {
            self.commands.borrow_mut().push(command.to_string());
            Ok(self.reply.clone())
        }
    }

    fn login() -> Login {
        Login::new("alice", "archive.example.edu")
    }

    #[test]
    fn picks_last_nonempty_line_past_login_banners() {
        let exec = CannedExec::new("Welcome to archive\n\n/data/memo\n");
        let target = resolve_archive_target(&exec, &login(), "MEMO", "20260830_120000").unwrap();
        assert_eq!(
            target,
            MirrorTarget::Remote {
                login: login(),
                path: "/data/memo/20260830_120000".to_string(),
            }
        );
        // The exec port owns all shell quoting; the query is sent bare.
        assert_eq!(exec.commands.borrow().as_slice(), &["echo $MEMO".to_string()]);
    }

    #[test]
    fn unset_variable_is_an_error() {
        let exec = CannedExec::new("\n \n");
        let err =
            resolve_archive_target(&exec, &login(), "MEMO", "20260830_120000").unwrap_err();
        assert!(matches!(err, ArchiveError::Unset { .. }));
    }

    #[test]
    fn trailing_slash_on_root_is_normalized() {
        let exec = CannedExec::new("/data/memo/\n");
        let target = resolve_archive_target(&exec, &login(), "MEMO", "id").unwrap();
        let MirrorTarget::Remote { path, .. } = target else {
            panic!("expected remote target");
        };
        assert_eq!(path, "/data/memo/id");
    }
}
