// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use memo::adapters::process::{GitCli, RsyncMirror, SshExec};
use memo::adapters::time::SystemClock;
use memo::app::archive;
use memo::app::finalize::{self, ArchiveSpec};
use memo::app::launch::{self, LaunchDeps, LaunchSpec};
use memo::app::ports::Login;
use memo::app::run::RunRecord;
use memo::app::watch::{FsWatchTarget, WatchLoop};
use memo::{config, hosts, logging};

#[derive(Parser)]
#[command(version, about = "Launch and track experiment runs across compute back ends")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,

    #[command(flatten)]
    launch: LaunchArgs,

    /// Debug-level diagnostics.
    #[arg(long, global = true)]
    verbose: bool,

    /// Alternative config file (default: memo/memo.toml in the user config
    /// directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Finalize a run: stamp the end time and push the run directory to the
    /// archive host. Invoked by the generated submission script.
    OnExit {
        run_dir: PathBuf,
        /// Remove the local run directory after a successful archive push.
        #[arg(long)]
        cleanup: bool,
    },
    /// Continuously mirror a run directory to the archive host until killed.
    /// Invoked by the generated submission script.
    WatchAndSync { run_dir: PathBuf },
}

#[derive(Args, Debug)]
struct LaunchArgs {
    /// Program that runs the script, e.g. `python`.
    executable: Option<String>,

    /// Script handed to the executable.
    script: Option<String>,

    /// Back-end options followed by script arguments; `--` separates the two
    /// for the batch back ends. Launcher flags must come before these.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,

    #[arg(short, long, default_value = "")]
    tag: String,

    #[arg(short, long, default_value = "")]
    description: String,

    /// Target cluster (local, braintree, om, vsc); defaults to where the
    /// launcher is running.
    #[arg(long)]
    cluster: Option<String>,

    /// Node role within the cluster, e.g. cpu or gpu3.
    #[arg(long)]
    node: Option<String>,

    /// Run from the current directory instead of the staged copy.
    #[arg(long)]
    keep_cwd: bool,

    /// Stay attached and wait for the job instead of detaching.
    #[arg(long)]
    follow: bool,

    /// Print the generated submission script without launching.
    #[arg(long)]
    dry: bool,

    /// Skip the watcher, metadata record and finalizer.
    #[arg(long)]
    no_record: bool,

    /// Remove the local run directory once it is safely archived.
    #[arg(long)]
    cleanup: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = config::load(cli.config.clone())?;

    let clock = SystemClock;
    let exec = SshExec;
    let mirror = RsyncMirror;

    let archive_login = Login::new(config.archive_user.clone(), config.archive_host.clone());

    match cli.cmd {
        Some(Cmd::OnExit { run_dir, cleanup }) => {
            let spec = ArchiveSpec {
                login: archive_login,
                env_var: config.archive_env_var.clone(),
            };
            finalize::finalize(&run_dir, &clock, &exec, &mirror, &spec, cleanup)?;
            Ok(())
        }
        Some(Cmd::WatchAndSync { run_dir }) => {
            let record = RunRecord::load(&run_dir)
                .with_context(|| format!("no run record in {}", run_dir.display()))?;
            let target = archive::resolve_archive_target(
                &exec,
                &archive_login,
                &config.archive_env_var,
                &record.memo_id,
            )?;
            let watch_target = FsWatchTarget::new(&run_dir, &mirror, target);
            WatchLoop::new().run(&clock, config.poll_interval, &watch_target)
        }
        None => {
            let args = cli.launch;
            let executable = args
                .executable
                .context("an executable is required, e.g. `memo python train.py`")?;
            let script = args.script.context("a script is required")?;

            let git = GitCli;
            let identity = hosts::resolve(&config.ip_map);
            let spec = LaunchSpec {
                executable,
                script,
                extras: args.extra,
                tag: args.tag,
                description: args.description,
                cluster: args.cluster,
                node: args.node,
                keep_cwd: args.keep_cwd,
                follow: args.follow,
                dry: args.dry,
                record: !args.no_record,
                cleanup: args.cleanup,
                full_command: env::args().collect::<Vec<_>>().join(" "),
                user: env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
                virtual_env: env::var("VIRTUAL_ENV").ok(),
                excludes: config.excludes.clone(),
            };
            let deps = LaunchDeps {
                clock: &clock,
                remote: &exec,
                mirror: &mirror,
                git: &git,
            };
            launch::launch(&spec, &deps, &identity)?;
            Ok(())
        }
    }
}
