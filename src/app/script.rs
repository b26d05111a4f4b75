// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Submission-script rendering shared by all back ends.
//!
//! The line order is a hard contract: the watcher must be running before the
//! user command starts and must be killed before the finalizer runs, so the
//! final archive sync never races the live watcher.

use crate::app::backend::Backend;
use crate::app::run::LOG_FILE;

/// Everything needed to render one run's `run.sh`.
#[derive(Debug, Clone)]
pub struct ScriptSpec<'a> {
    pub backend: &'a Backend,
    pub run_dir: &'a str,
    pub project_dir: &'a str,
    pub working_dir: &'a str,
    pub command: &'a str,
    /// When false (`--no-record`), the watcher and finalizer lines are
    /// omitted and the script only runs the user command.
    pub record: bool,
    /// Pass `--cleanup` to the finalizer so an ephemeral run directory is
    /// removed after a verified archive sync.
    pub cleanup: bool,
}

/// Render the submission script lines: shebang, scheduler directives,
/// environment exports, cd, watcher start, user command, watcher stop,
/// finalizer.
pub fn render(spec: &ScriptSpec<'_>) -> Vec<String> {
    let mut lines = vec!["#!/bin/sh".to_string()];
    lines.extend(spec.backend.directives());
    lines.push(String::new());
    lines.push(format!("export MEMO_DIR={}", spec.run_dir));
    lines.push(format!("export PROJECT_DIR={}", spec.project_dir));
    lines.push(format!("cd {}", spec.working_dir));
    lines.push(String::new());

    if spec.record {
        lines.push(format!(
            "nohup memo watch-and-sync {} > /dev/null 2>&1 &",
            spec.run_dir
        ));
        lines.push("WATCH_PID=$!".to_string());
    }

    lines.push(spec.backend.wrap_command(spec.command));

    if spec.record {
        lines.push("kill $WATCH_PID".to_string());
        let mut on_exit = format!("memo on-exit {}", spec.run_dir);
        if spec.cleanup {
            on_exit.push_str(" --cleanup");
        }
        lines.push(on_exit);
    }
    lines
}

/// Minimal single-quote shell escaping for arguments embedded in the
/// generated command line.
pub fn sh_escape(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,".contains(c))
    {
        return arg.to_string();
    }
    let mut out = String::from("'");
    out.push_str(&arg.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Where the detached launcher sends the job's combined output.
pub fn log_path(run_dir: &str) -> String {
    format!("{run_dir}/{LOG_FILE}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::backend::{PbsOptions, SlurmOptions};

    fn spec<'a>(backend: &'a Backend, record: bool, cleanup: bool) -> ScriptSpec<'a> {
        ScriptSpec {
            backend,
            run_dir: "/tmp/run",
            project_dir: "/home/alice/project",
            working_dir: "/tmp/run",
            command: "python train.py -- --memo_id 20260830_120000",
            record,
            cleanup,
        }
    }

    fn index_of(lines: &[String], needle: &str) -> usize {
        lines
            .iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("missing line containing {needle:?}"))
    }

    #[test]
    fn line_ordering_holds_for_all_backends() {
        let backends = [
            Backend::Local,
            Backend::SshDirect {
                host: "braintree-gpu-3.mit.edu".to_string(),
            },
            Backend::Slurm(SlurmOptions {
                qos: true,
                jobname: Some("train".to_string()),
                ..SlurmOptions::default()
            }),
            Backend::Slurm(SlurmOptions::default()),
            Backend::Pbs(PbsOptions::default()),
            Backend::Pbs(PbsOptions {
                gpus: 0,
                ..PbsOptions::default()
            }),
        ];
        for backend in &backends {
            for cleanup in [false, true] {
                let lines = render(&spec(backend, true, cleanup));
                assert_eq!(lines[0], "#!/bin/sh");
                let exports = index_of(&lines, "export MEMO_DIR=");
                let cd = index_of(&lines, "cd /tmp/run");
                let watch = index_of(&lines, "watch-and-sync");
                let command = index_of(&lines, "--memo_id");
                let kill = index_of(&lines, "kill $WATCH_PID");
                let on_exit = index_of(&lines, "on-exit");
                for directive in lines.iter().filter(|l| l.starts_with('#') && **l != lines[0]) {
                    let pos = lines.iter().position(|l| l == directive).unwrap();
                    assert!(pos < exports, "directive after exports: {directive}");
                }
                assert!(exports < cd);
                assert!(cd < watch);
                assert!(watch < command);
                assert!(command < kill);
                assert!(kill < on_exit);
            }
        }
    }

    #[test]
    fn no_record_omits_watcher_and_finalizer() {
        let backend = Backend::Local;
        let lines = render(&spec(&backend, false, false));
        assert!(!lines.iter().any(|l| l.contains("watch-and-sync")));
        assert!(!lines.iter().any(|l| l.contains("kill")));
        assert!(!lines.iter().any(|l| l.contains("on-exit")));
        assert!(lines.iter().any(|l| l.contains("--memo_id")));
    }

    #[test]
    fn cleanup_flag_reaches_the_finalizer_line() {
        let backend = Backend::Local;
        let lines = render(&spec(&backend, true, true));
        assert!(
            lines
                .iter()
                .any(|l| l == "memo on-exit /tmp/run --cleanup")
        );

        let lines = render(&spec(&backend, true, false));
        assert!(lines.iter().any(|l| l == "memo on-exit /tmp/run"));
    }

    #[test]
    fn singularity_wrap_applies_to_the_command_line() {
        let backend = Backend::Slurm(SlurmOptions {
            singularity: true,
            ..SlurmOptions::default()
        });
        let lines = render(&spec(&backend, true, false));
        let command = &lines[index_of(&lines, "--memo_id")];
        assert!(command.starts_with("singularity exec"));
    }

    #[test]
    fn sh_escape_quotes_only_when_needed() {
        assert_eq!(sh_escape("--lr"), "--lr");
        assert_eq!(sh_escape("0.1"), "0.1");
        assert_eq!(sh_escape("hello world"), "'hello world'");
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
        assert_eq!(sh_escape(""), "''");
    }
}
