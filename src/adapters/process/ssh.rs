// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::Command;

use crate::app::ports::{ExecError, Login, RemoteExecPort};
use crate::app::script::sh_escape;

/// Remote execution through the system `ssh` binary.
///
/// The command is run under `bash --login -c` so the remote side sees the
/// same environment an interactive login would, which is what lets the
/// archive-root lookup read login-profile variables. ssh joins its argument
/// words with spaces and hands the result to the remote login shell, so the
/// command must travel as one quoted token: otherwise only its first word
/// reaches `-c` and the rest become positional parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshExec;

impl RemoteExecPort for SshExec {
    fn exec(&self, login: &Login, command: &str) -> Result<String, ExecError> {
        tracing::debug!(login = %login, command, "running remote command");
        let output = Command::new("ssh")
            .arg(login.to_string())
            .args(["bash", "--login", "-c", &sh_escape(command)])
            .output()
            .map_err(|source| ExecError::Spawn {
                login: login.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ExecError::Failed {
                login: login.to_string(),
                status: output.status.code().unwrap_or(-1),
                output: combined,
            });
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Stand-in for ssh that reproduces its wire behavior: the remote
    /// command words are joined with spaces and parsed by a remote shell.
    fn install_fake_ssh(dir: &Path) {
        let fake = dir.join("ssh");
        fs::write(&fake, "#!/bin/sh\nshift\nexec sh -c \"$*\"\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn multiword_commands_reach_the_remote_shell_intact() {
        let bin = TempDir::new().unwrap();
        install_fake_ssh(bin.path());
        let old_path = env::var_os("PATH").unwrap_or_default();
        let new_path = format!("{}:{}", bin.path().display(), old_path.to_string_lossy());
        unsafe { env::set_var("PATH", &new_path) };

        let result = SshExec.exec(&Login::new("alice", "example.edu"), "mktemp -d");

        unsafe { env::set_var("PATH", &old_path) };

        let output = result.unwrap();
        let scratch = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()
            .unwrap()
            .to_string();
        // A split command would run bare `mktemp` and hand back a file.
        assert!(
            Path::new(&scratch).is_dir(),
            "remote scratch {scratch:?} is not a directory"
        );
        fs::remove_dir_all(&scratch).unwrap();
    }
}
