// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The run launcher: allocate a run directory, stage it, dispatch the job.
//!
//! Option parsing happens before any directory is allocated, so a bad
//! back-end flag aborts with nothing to clean up. Staging is local-first:
//! remote targets receive one wholesale mirror of an already-complete
//! scratch directory, never a partially staged tree.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use crate::app::archive::last_nonempty_line;
use crate::app::backend::{Backend, OptionError};
use crate::app::ports::{ClockPort, ExecError, GitPort, Login, MirrorPort, MirrorTarget, RemoteExecPort};
use crate::app::run::{self, RunRecord, RUN_SCRIPT};
use crate::app::script::{self, ScriptSpec};
use crate::app::staging::{self, StageError};
use crate::hosts::HostIdentity;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Backend(#[from] OptionError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("remote host {host} did not report a scratch directory")]
    RemoteScratch { host: String },

    #[error("failed to create local run directory: {source}")]
    Scratch {
        #[source]
        source: io::Error,
    },

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// The launch request, fully resolved by the command-line layer.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: String,
    pub script: String,
    /// Raw extra tokens; split into back-end options and script arguments
    /// by the selected back end.
    pub extras: Vec<String>,
    pub tag: String,
    pub description: String,
    pub cluster: Option<String>,
    pub node: Option<String>,
    pub keep_cwd: bool,
    pub follow: bool,
    pub dry: bool,
    /// When false, the run executes without watcher, record or finalizer.
    pub record: bool,
    /// Ask the finalizer to remove the local run directory after a verified
    /// archive sync.
    pub cleanup: bool,
    /// The launcher's own invocation, recorded verbatim for provenance.
    pub full_command: String,
    pub user: String,
    /// Active virtualenv root, used to pin `python` to the environment the
    /// launcher itself runs in.
    pub virtual_env: Option<String>,
    pub excludes: Vec<String>,
}

/// Side-effecting collaborators, injected so the planning half is testable.
pub struct LaunchDeps<'a> {
    pub clock: &'a dyn ClockPort,
    pub remote: &'a dyn RemoteExecPort,
    pub mirror: &'a dyn MirrorPort,
    pub git: &'a dyn GitPort,
}

/// Everything decided about a run before any file is written.
#[derive(Debug)]
pub struct PreparedRun {
    pub memo_id: String,
    pub backend: Backend,
    pub remote: bool,
    pub run_dir: String,
    pub working_dir: String,
    pub login: Login,
    pub script_lines: Vec<String>,
    pub record: RunRecord,
    pub project_root: PathBuf,
}

/// Final command line handed to the submission script. The run identifier
/// always rides along as a trailing flag; when the user's own arguments
/// already contain the `--` separator it is not emitted a second time.
pub fn build_command(
    executable: &str,
    virtual_env: Option<&str>,
    script: &str,
    script_args: &[String],
    memo_id: &str,
) -> String {
    let executable = match virtual_env {
        Some(venv) if Path::new(executable).file_name() == Some(OsStr::new("python")) => {
            format!("{venv}/bin/python")
        }
        _ => executable.to_string(),
    };
    let mut command = format!("{executable} {script}");
    for arg in script_args {
        command.push(' ');
        command.push_str(&script::sh_escape(arg));
    }
    let sep = if script_args.iter().any(|arg| arg == "--") {
        " "
    } else {
        " -- "
    };
    command.push_str(sep);
    command.push_str("--memo_id ");
    command.push_str(memo_id);
    command
}

/// Decide everything about the run: back end, options, run directory,
/// command line, submission script and metadata record. Only the remote
/// scratch allocation touches the outside world; a local run directory is
/// created here as well so the paths baked into the script exist.
pub fn prepare(
    spec: &LaunchSpec,
    deps: &LaunchDeps<'_>,
    identity: &HostIdentity,
) -> Result<PreparedRun, LaunchError> {
    let now = deps.clock.now();
    let memo_id = run::new_run_id(now);

    let cluster = spec.cluster.as_deref().unwrap_or(&identity.cluster);
    let node = spec
        .node
        .as_deref()
        .or(identity.node.as_deref())
        .unwrap_or("gpu3");
    let mut backend = Backend::select(cluster, node)?;
    // Options are validated before any directory is allocated.
    let script_args = backend.parse_extra_args(&spec.extras)?;

    let user = backend.default_user().unwrap_or(&spec.user).to_string();
    let login = Login::new(user.clone(), backend.host());
    let remote = identity.host != backend.host();

    // A dry run must not touch the local disk or the remote host; the
    // script is rendered against a planned path that is never created.
    let run_dir = if spec.dry {
        planned_scratch(&memo_id)
    } else if remote {
        allocate_remote_scratch(deps.remote, &login)?
    } else {
        local_scratch()?
    };

    let working_dir = if remote || !spec.keep_cwd {
        run_dir.clone()
    } else {
        current_dir_string()
    };

    let command = build_command(
        &spec.executable,
        spec.virtual_env.as_deref(),
        &spec.script,
        &script_args,
        &memo_id,
    );

    let project_root = deps
        .git
        .toplevel()
        .unwrap_or_else(|| PathBuf::from(current_dir_string()));

    let record = RunRecord {
        memo_id: memo_id.clone(),
        start_time: run::format_timestamp(now),
        end_time: None,
        full_command: spec.full_command.clone(),
        executable: spec.executable.clone(),
        script: spec.script.clone(),
        script_args: script_args.clone(),
        tag: spec.tag.clone(),
        description: spec.description.clone(),
        outcome: String::new(),
        host: identity.host.clone(),
        remote_host: backend.host().to_string(),
        working_dir: current_dir_string(),
        user,
        backend: backend.kind(),
        backend_args: backend.args_map(),
        git_commit: deps.git.commit(),
        git_remote_url: deps.git.remote_url(),
        show: true,
        extra: Default::default(),
    };

    let script_lines = script::render(&ScriptSpec {
        backend: &backend,
        run_dir: &run_dir,
        project_dir: &project_root.display().to_string(),
        working_dir: &working_dir,
        command: &command,
        record: spec.record,
        cleanup: spec.cleanup,
    });

    Ok(PreparedRun {
        memo_id,
        backend,
        remote,
        run_dir,
        working_dir,
        login,
        script_lines,
        record,
        project_root,
    })
}

/// Full launch: prepare, stage, dispatch.
pub fn launch(
    spec: &LaunchSpec,
    deps: &LaunchDeps<'_>,
    identity: &HostIdentity,
) -> Result<(), LaunchError> {
    let prepared = prepare(spec, deps, identity)?;
    println!("memo id: {}", prepared.memo_id);
    tracing::info!(
        memo_id = %prepared.memo_id,
        backend = %prepared.backend.kind(),
        run_dir = %prepared.run_dir,
        "prepared run"
    );

    if spec.dry {
        for line in &prepared.script_lines {
            println!("{line}");
        }
        return Ok(());
    }

    if prepared.remote {
        // Stage into local scratch, then mirror wholesale.
        let scratch = tempfile::tempdir().map_err(|source| LaunchError::Scratch { source })?;
        staging::stage_run(
            scratch.path(),
            &prepared.project_root,
            &prepared.script_lines,
            &prepared.record,
            &spec.excludes,
        )?;
        let target = MirrorTarget::Remote {
            login: prepared.login.clone(),
            path: prepared.run_dir.clone(),
        };
        staging::push_to_remote(deps.mirror, scratch.path(), &target)?;
        dispatch_remote(deps.remote, &prepared)?;
    } else {
        let run_dir = PathBuf::from(&prepared.run_dir);
        staging::stage_run(
            &run_dir,
            &prepared.project_root,
            &prepared.script_lines,
            &prepared.record,
            &spec.excludes,
        )?;
        if spec.follow {
            dispatch_follow(&prepared)?;
        } else {
            dispatch_detached(deps.clock, &prepared)?;
        }
    }
    Ok(())
}

fn dispatch_remote(exec: &dyn RemoteExecPort, prepared: &PreparedRun) -> Result<(), LaunchError> {
    let command = format!(
        "cd {}; {} {}",
        prepared.working_dir,
        prepared.backend.executor(),
        RUN_SCRIPT
    );
    let output = exec.exec(&prepared.login, &command)?;
    // Batch schedulers answer with the job id; pass it on.
    let output = output.trim();
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Default local mode: start the script disowned from the terminal, give it
/// a second to produce output, then show the log once.
fn dispatch_detached(clock: &dyn ClockPort, prepared: &PreparedRun) -> Result<(), LaunchError> {
    use std::os::unix::process::CommandExt;

    let log = script::log_path(&prepared.run_dir);
    let open_log = || {
        fs::File::options()
            .append(true)
            .create(true)
            .open(&log)
            .map_err(|source| LaunchError::Spawn {
                command: log.clone(),
                source,
            })
    };

    // Absolute script path: with --keep-cwd the working directory is not
    // the run directory, so a bare `run.sh` would miss the staged script.
    let script_path = Path::new(&prepared.run_dir).join(RUN_SCRIPT);
    let mut command = Command::new(prepared.backend.executor());
    command
        .arg(&script_path)
        .current_dir(&prepared.working_dir)
        .stdin(Stdio::null())
        .stdout(open_log()?)
        .stderr(open_log()?)
        .process_group(0);
    command.spawn().map_err(|source| LaunchError::Spawn {
        command: format!("{} {}", prepared.backend.executor(), script_path.display()),
        source,
    })?;

    clock.sleep(Duration::from_secs(1));
    if let Ok(contents) = fs::read_to_string(&log) {
        print!("{contents}");
    }
    Ok(())
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn note_interrupt(_signal: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Attached mode: run in the foreground and translate Ctrl-C into a
/// graceful SIGTERM to the child instead of dying underneath it.
fn dispatch_follow(prepared: &PreparedRun) -> Result<(), LaunchError> {
    let script_path = Path::new(&prepared.run_dir).join(RUN_SCRIPT);
    let mut child = Command::new(prepared.backend.executor())
        .arg(&script_path)
        .current_dir(&prepared.working_dir)
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            command: format!("{} {}", prepared.backend.executor(), script_path.display()),
            source,
        })?;

    let action = SigAction::new(
        SigHandler::Handler(note_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let previous = unsafe { signal::sigaction(Signal::SIGINT, &action) }.ok();

    let mut terminated = false;
    loop {
        if INTERRUPTED.load(Ordering::SeqCst) && !terminated {
            tracing::info!("interrupt received, terminating job");
            let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
            terminated = true;
        }
        match child.wait_timeout(Duration::from_millis(200)) {
            Ok(Some(_status)) => break,
            Ok(None) => continue,
            Err(source) => {
                return Err(LaunchError::Spawn {
                    command: RUN_SCRIPT.to_string(),
                    source,
                });
            }
        }
    }

    if let Some(previous) = previous {
        let _ = unsafe { signal::sigaction(Signal::SIGINT, &previous) };
    }
    Ok(())
}

/// Ask the execution host for a fresh scratch directory.
fn allocate_remote_scratch(
    exec: &dyn RemoteExecPort,
    login: &Login,
) -> Result<String, LaunchError> {
    let output = exec.exec(login, "mktemp -d")?;
    last_nonempty_line(&output)
        .map(str::to_string)
        .ok_or_else(|| LaunchError::RemoteScratch {
            host: login.host.clone(),
        })
}

fn local_scratch() -> Result<String, LaunchError> {
    let dir = tempfile::tempdir().map_err(|source| LaunchError::Scratch { source })?;
    Ok(dir.keep().display().to_string())
}

fn planned_scratch(memo_id: &str) -> String {
    std::env::temp_dir()
        .join(format!("memo.{memo_id}"))
        .display()
        .to_string()
}

fn current_dir_string() -> String {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}
