// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Execution back ends: local shell, direct-SSH nodes, Slurm and PBS.
//!
//! A back end is a stateless template selected once per run. Dispatch is a
//! plain match over the variants; each variant knows how to split the extra
//! command-line tokens into its own options versus script arguments, and how
//! to render its scheduler directive lines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hosts::{CLUSTER_BRAINTREE, CLUSTER_LOCAL, CLUSTER_OM, CLUSTER_VSC};

const SLURM_HOST: &str = "openmind7.mit.edu";
const PBS_HOST: &str = "login1-tier2.hpc.kuleuven.be";
const PBS_USER: &str = "vsc32603";

const QOS_ACCOUNT: &str = "dicarlo";
const GPU_ALIASES: &[(&str, &str)] = &[("1080ti", "GEFORCEGTX1080TI")];

const SINGULARITY_IMAGE: &str = "docker://nvidia/cuda:9.0-cudnn7-runtime-centos7";
const SINGULARITY_BINDS: &[&str] = &["/braintree:/braintree", "/home:/home", "/om:/om"];

const PBS_PARTITION: &str = "gpu";
const PPN_PER_GPU: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    SshDirect,
    Slurm,
    Pbs,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Local => "local",
            BackendKind::SshDirect => "ssh-direct",
            BackendKind::Slurm => "slurm",
            BackendKind::Pbs => "pbs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("unknown cluster '{0}'")]
    UnknownCluster(String),

    #[error("option '{key}' is not recognized by the {backend} back end")]
    UnknownOption { key: String, backend: &'static str },

    #[error("option '{key}' requires a value")]
    MissingValue { key: String },

    #[error("option '{key}' has invalid value '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmOptions {
    pub time: String,
    pub ntasks: u32,
    pub cpus_per_task: u32,
    pub gpu: String,
    pub mem: String,
    pub qos: bool,
    pub jobname: Option<String>,
    pub singularity: bool,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        Self {
            time: "4-00:00:00".to_string(),
            ntasks: 1,
            cpus_per_task: 5,
            gpu: "1080ti:1".to_string(),
            mem: "40G".to_string(),
            qos: false,
            jobname: None,
            singularity: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbsOptions {
    pub time: String,
    pub nodes: u32,
    pub pmem: String,
    pub pvmem: Option<String>,
    pub gpus: u32,
    pub job_name: Option<String>,
    pub project_name: String,
}

impl Default for PbsOptions {
    fn default() -> Self {
        Self {
            time: "4:00:00:00".to_string(),
            nodes: 1,
            pmem: "40gb".to_string(),
            pvmem: None,
            gpus: 1,
            job_name: None,
            project_name: "default_project".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local,
    SshDirect { host: String },
    Slurm(SlurmOptions),
    Pbs(PbsOptions),
}

impl Backend {
    /// Instantiate the back-end template for a cluster name. The node role is
    /// only meaningful for the braintree family, where it selects the target
    /// node (`cpu`, `gpu1`..`gpu4`).
    pub fn select(cluster: &str, node: &str) -> Result<Backend, OptionError> {
        match cluster {
            CLUSTER_LOCAL => Ok(Backend::Local),
            CLUSTER_BRAINTREE => Ok(Backend::SshDirect {
                host: braintree_host(node),
            }),
            CLUSTER_OM => Ok(Backend::Slurm(SlurmOptions::default())),
            CLUSTER_VSC => Ok(Backend::Pbs(PbsOptions::default())),
            other => Err(OptionError::UnknownCluster(other.to_string())),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Local => BackendKind::Local,
            Backend::SshDirect { .. } => BackendKind::SshDirect,
            Backend::Slurm(_) => BackendKind::Slurm,
            Backend::Pbs(_) => BackendKind::Pbs,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Backend::Local => "localhost",
            Backend::SshDirect { host } => host,
            Backend::Slurm(_) => SLURM_HOST,
            Backend::Pbs(_) => PBS_HOST,
        }
    }

    /// Command used to invoke the generated submission script.
    pub fn executor(&self) -> &'static str {
        match self {
            Backend::Local | Backend::SshDirect { .. } => "sh",
            Backend::Slurm(_) => "sbatch",
            Backend::Pbs(_) => "qsub",
        }
    }

    /// A back end-mandated login user, when the cluster requires one.
    pub fn default_user(&self) -> Option<&'static str> {
        match self {
            Backend::Pbs(_) => Some(PBS_USER),
            _ => None,
        }
    }

    /// Split the extra command-line tokens into back-end options (consumed
    /// into `self`) and script arguments (returned).
    ///
    /// Convention: tokens before a literal `--` that look like flags must be
    /// recognized back-end options; everything after `--` belongs to the
    /// script. The local and direct-SSH back ends take no options and pass
    /// every token through untouched.
    pub fn parse_extra_args(&mut self, extras: &[String]) -> Result<Vec<String>, OptionError> {
        match self {
            Backend::Local | Backend::SshDirect { .. } => Ok(extras.to_vec()),
            Backend::Slurm(opts) => parse_options(extras, |key, mut take| match key {
                "-t" | "--time" => {
                    opts.time = take()?;
                    Ok(())
                }
                "-n" | "--ntasks" => {
                    opts.ntasks = parse_count(key, &take()?)?;
                    Ok(())
                }
                "-c" | "--cpus_per_task" => {
                    opts.cpus_per_task = parse_count(key, &take()?)?;
                    Ok(())
                }
                "--gpu" => {
                    opts.gpu = take()?;
                    Ok(())
                }
                "--mem" => {
                    opts.mem = take()?;
                    Ok(())
                }
                "--qos" => {
                    opts.qos = true;
                    Ok(())
                }
                "--jobname" => {
                    opts.jobname = Some(take()?);
                    Ok(())
                }
                "--singularity" => {
                    opts.singularity = true;
                    Ok(())
                }
                other => Err(OptionError::UnknownOption {
                    key: other.to_string(),
                    backend: "slurm",
                }),
            }),
            Backend::Pbs(opts) => parse_options(extras, |key, mut take| match key {
                "--time" => {
                    opts.time = take()?;
                    Ok(())
                }
                "--nodes" => {
                    opts.nodes = parse_count(key, &take()?)?;
                    Ok(())
                }
                "--pmem" => {
                    opts.pmem = take()?;
                    Ok(())
                }
                "--pvmem" => {
                    opts.pvmem = Some(take()?);
                    Ok(())
                }
                "--gpus" => {
                    opts.gpus = parse_count(key, &take()?)?;
                    Ok(())
                }
                "-N" | "--job_name" => {
                    opts.job_name = Some(take()?);
                    Ok(())
                }
                "-A" | "--project_name" => {
                    opts.project_name = take()?;
                    Ok(())
                }
                other => Err(OptionError::UnknownOption {
                    key: other.to_string(),
                    backend: "pbs",
                }),
            }),
        }
    }

    /// Scheduler directive lines for the submission script.
    pub fn directives(&self) -> Vec<String> {
        match self {
            Backend::Local | Backend::SshDirect { .. } => Vec::new(),
            Backend::Slurm(opts) => slurm_directives(opts),
            Backend::Pbs(opts) => vec![pbs_directive(opts)],
        }
    }

    /// Wrap the user command in a container invocation when requested.
    pub fn wrap_command(&self, command: &str) -> String {
        match self {
            Backend::Slurm(opts) if opts.singularity => {
                let binds: Vec<String> = SINGULARITY_BINDS
                    .iter()
                    .map(|bind| format!("--bind {bind}"))
                    .collect();
                format!(
                    "singularity exec {} --nv {SINGULARITY_IMAGE} {command}",
                    binds.join(" ")
                )
            }
            _ => command.to_string(),
        }
    }

    /// The parsed back-end options, as stored in the metadata record.
    pub fn args_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        match self {
            Backend::Local | Backend::SshDirect { .. } => {}
            Backend::Slurm(opts) => {
                map.insert("time".to_string(), opts.time.clone());
                map.insert("ntasks".to_string(), opts.ntasks.to_string());
                map.insert("cpus_per_task".to_string(), opts.cpus_per_task.to_string());
                map.insert("gpu".to_string(), opts.gpu.clone());
                map.insert("mem".to_string(), opts.mem.clone());
                map.insert("qos".to_string(), opts.qos.to_string());
                if let Some(jobname) = &opts.jobname {
                    map.insert("jobname".to_string(), jobname.clone());
                }
                map.insert("singularity".to_string(), opts.singularity.to_string());
            }
            Backend::Pbs(opts) => {
                map.insert("time".to_string(), opts.time.clone());
                map.insert("nodes".to_string(), opts.nodes.to_string());
                map.insert("pmem".to_string(), opts.pmem.clone());
                if let Some(pvmem) = &opts.pvmem {
                    map.insert("pvmem".to_string(), pvmem.clone());
                }
                map.insert("gpus".to_string(), opts.gpus.to_string());
                if let Some(job_name) = &opts.job_name {
                    map.insert("job_name".to_string(), job_name.clone());
                }
                map.insert("project_name".to_string(), opts.project_name.clone());
            }
        }
        map
    }
}

fn braintree_host(node: &str) -> String {
    let (role, num) = match node.strip_prefix("gpu") {
        Some(num) if !num.is_empty() => ("gpu", num),
        _ => ("cpu", "1"),
    };
    format!("braintree-{role}-{num}.mit.edu")
}

fn parse_count(key: &str, value: &str) -> Result<u32, OptionError> {
    value.parse().map_err(|_| OptionError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Walk the extra tokens, feeding recognized option keys to `on_key` and
/// collecting everything else as script arguments. A bare `--` ends option
/// parsing; the remainder goes to the script verbatim.
fn parse_options<F>(extras: &[String], mut on_key: F) -> Result<Vec<String>, OptionError>
where
    F: FnMut(&str, &mut dyn FnMut() -> Result<String, OptionError>) -> Result<(), OptionError>,
{
    let mut script_args = Vec::new();
    let mut iter = extras.iter();
    while let Some(token) = iter.next() {
        if token == "--" {
            script_args.extend(iter.cloned());
            break;
        }
        if token.starts_with('-') && token.len() > 1 {
            // Inline `--key=value` form.
            let (key, inline) = match token.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (token.clone(), None),
            };
            let mut inline = inline;
            let mut take = || -> Result<String, OptionError> {
                if let Some(value) = inline.take() {
                    return Ok(value);
                }
                match iter.next() {
                    Some(value) => Ok(value.clone()),
                    None => Err(OptionError::MissingValue { key: key.clone() }),
                }
            };
            on_key(&key, &mut take)?;
        } else {
            script_args.push(token.clone());
        }
    }
    Ok(script_args)
}

fn slurm_directives(opts: &SlurmOptions) -> Vec<String> {
    let mut lines = vec![
        format!("#SBATCH --time={}", opts.time),
        format!("#SBATCH --ntasks={}", opts.ntasks),
        format!("#SBATCH --cpus-per-task={}", opts.cpus_per_task),
        format!("#SBATCH --gres={}", gres_spec(&opts.gpu)),
        format!("#SBATCH --mem={}", opts.mem),
    ];
    if opts.qos {
        lines.push(format!("#SBATCH --qos={QOS_ACCOUNT}"));
    }
    if let Some(jobname) = &opts.jobname {
        lines.push(format!("#SBATCH --jobname={jobname}"));
    }
    lines
}

/// Translate a `<model>:<count>` GPU spec into Slurm's gres syntax, expanding
/// short model aliases to the scheduler's canonical hardware names.
fn gres_spec(gpu: &str) -> String {
    if let Some((model, count)) = gpu.split_once(':') {
        let canonical = GPU_ALIASES
            .iter()
            .find(|(alias, _)| *alias == model)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(model);
        format!("gpu:{canonical}:{count}")
    } else {
        format!("gpu:{gpu}")
    }
}

/// Render the single combined PBS directive line. The gpus/ppn clause and the
/// partition selector are omitted entirely for CPU-only requests.
fn pbs_directive(opts: &PbsOptions) -> String {
    let mut flags = Vec::new();
    if let Some(job_name) = &opts.job_name {
        flags.push(format!("-N {job_name}"));
    }
    flags.push(format!("-A {}", opts.project_name));

    let mut resources = vec![format!("walltime={}", opts.time), format!("pmem={}", opts.pmem)];
    if let Some(pvmem) = &opts.pvmem {
        resources.push(format!("pvmem={pvmem}"));
    }
    if opts.gpus > 0 {
        resources.push(format!(
            "nodes={}:ppn={}:gpus={}",
            opts.nodes,
            PPN_PER_GPU * opts.gpus,
            opts.gpus
        ));
        resources.push(format!("partition={PBS_PARTITION}"));
    } else {
        resources.push(format!("nodes={}", opts.nodes));
    }
    flags.push(format!("-l {}", resources.join(",")));

    format!("#PBS {}", flags.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn select_maps_cluster_names() {
        assert_eq!(Backend::select("local", "").unwrap().kind(), BackendKind::Local);
        assert_eq!(Backend::select("om", "").unwrap().kind(), BackendKind::Slurm);
        assert_eq!(Backend::select("vsc", "").unwrap().kind(), BackendKind::Pbs);
        assert_eq!(
            Backend::select("nonsense", "").unwrap_err(),
            OptionError::UnknownCluster("nonsense".to_string())
        );
    }

    #[test]
    fn braintree_node_roles_become_hostnames() {
        assert_eq!(
            Backend::select("braintree", "gpu3").unwrap().host(),
            "braintree-gpu-3.mit.edu"
        );
        assert_eq!(
            Backend::select("braintree", "cpu").unwrap().host(),
            "braintree-cpu-1.mit.edu"
        );
    }

    #[test]
    fn local_backend_passes_everything_through() {
        let mut backend = Backend::Local;
        let script_args = backend
            .parse_extra_args(&args(&["--lr", "0.1", "--qos"]))
            .unwrap();
        assert_eq!(script_args, args(&["--lr", "0.1", "--qos"]));
        assert!(backend.directives().is_empty());
    }

    #[test]
    fn slurm_parses_options_and_keeps_script_args() {
        let mut backend = Backend::select("om", "").unwrap();
        let script_args = backend
            .parse_extra_args(&args(&[
                "--time", "1-00:00:00", "--qos", "--gpu", "v100:2", "--", "--lr", "0.1",
            ]))
            .unwrap();
        assert_eq!(script_args, args(&["--lr", "0.1"]));

        let Backend::Slurm(opts) = &backend else {
            panic!("expected slurm");
        };
        assert_eq!(opts.time, "1-00:00:00");
        assert!(opts.qos);
        assert_eq!(opts.gpu, "v100:2");
    }

    #[test]
    fn slurm_qos_flag_controls_directive() {
        let backend = Backend::Slurm(SlurmOptions {
            qos: false,
            ..SlurmOptions::default()
        });
        assert!(!backend.directives().iter().any(|line| line.contains("--qos")));

        let backend = Backend::Slurm(SlurmOptions {
            qos: true,
            ..SlurmOptions::default()
        });
        assert!(
            backend
                .directives()
                .contains(&"#SBATCH --qos=dicarlo".to_string())
        );
    }

    #[test]
    fn slurm_jobname_omitted_when_unset() {
        let backend = Backend::Slurm(SlurmOptions::default());
        assert!(!backend.directives().iter().any(|l| l.contains("jobname")));

        let backend = Backend::Slurm(SlurmOptions {
            jobname: Some("train".to_string()),
            ..SlurmOptions::default()
        });
        assert!(
            backend
                .directives()
                .contains(&"#SBATCH --jobname=train".to_string())
        );
    }

    #[test]
    fn slurm_gpu_alias_expands_to_canonical_name() {
        let backend = Backend::Slurm(SlurmOptions::default());
        assert!(
            backend
                .directives()
                .contains(&"#SBATCH --gres=gpu:GEFORCEGTX1080TI:1".to_string())
        );

        let backend = Backend::Slurm(SlurmOptions {
            gpu: "v100:2".to_string(),
            ..SlurmOptions::default()
        });
        assert!(
            backend
                .directives()
                .contains(&"#SBATCH --gres=gpu:v100:2".to_string())
        );
    }

    #[test]
    fn singularity_wraps_command_with_fixed_binds() {
        let backend = Backend::Slurm(SlurmOptions {
            singularity: true,
            ..SlurmOptions::default()
        });
        let wrapped = backend.wrap_command("python train.py");
        assert!(wrapped.starts_with("singularity exec --bind /braintree:/braintree"));
        assert!(wrapped.contains("--nv docker://nvidia/cuda:9.0-cudnn7-runtime-centos7"));
        assert!(wrapped.ends_with("python train.py"));

        let plain = Backend::Slurm(SlurmOptions::default()).wrap_command("python train.py");
        assert_eq!(plain, "python train.py");
    }

    #[test]
    fn pbs_two_gpus_renders_full_resource_clause() {
        let backend = Backend::Pbs(PbsOptions {
            gpus: 2,
            ..PbsOptions::default()
        });
        let line = &backend.directives()[0];
        assert!(line.contains("nodes=1:ppn=18:gpus=2"));
        assert!(line.contains("partition=gpu"));
        assert!(line.contains("walltime=4:00:00:00"));
        assert!(line.contains("-A default_project"));
    }

    #[test]
    fn pbs_zero_gpus_omits_gpu_and_partition_clauses() {
        let backend = Backend::Pbs(PbsOptions {
            gpus: 0,
            ..PbsOptions::default()
        });
        let line = &backend.directives()[0];
        assert!(!line.contains("gpus="));
        assert!(!line.contains("ppn="));
        assert!(!line.contains("partition"));
        assert!(line.contains("nodes=1"));
    }

    #[test]
    fn pbs_job_name_becomes_separate_flag() {
        let backend = Backend::Pbs(PbsOptions {
            job_name: Some("train".to_string()),
            ..PbsOptions::default()
        });
        assert!(backend.directives()[0].starts_with("#PBS -N train -A default_project"));
    }

    #[test]
    fn unknown_pbs_option_is_fatal() {
        let mut backend = Backend::select("vsc", "").unwrap();
        let err = backend
            .parse_extra_args(&args(&["--bogus-option", "1"]))
            .unwrap_err();
        assert_eq!(
            err,
            OptionError::UnknownOption {
                key: "--bogus-option".to_string(),
                backend: "pbs",
            }
        );
    }

    #[test]
    fn missing_value_is_reported() {
        let mut backend = Backend::select("om", "").unwrap();
        let err = backend.parse_extra_args(&args(&["--mem"])).unwrap_err();
        assert_eq!(
            err,
            OptionError::MissingValue {
                key: "--mem".to_string(),
            }
        );
    }

    #[test]
    fn inline_key_value_form_is_accepted() {
        let mut backend = Backend::select("vsc", "").unwrap();
        backend.parse_extra_args(&args(&["--gpus=2"])).unwrap();
        let Backend::Pbs(opts) = &backend else {
            panic!("expected pbs");
        };
        assert_eq!(opts.gpus, 2);
    }

    #[test]
    fn args_map_reflects_parsed_options() {
        let mut backend = Backend::select("om", "").unwrap();
        backend
            .parse_extra_args(&args(&["--qos", "--jobname", "train"]))
            .unwrap();
        let map = backend.args_map();
        assert_eq!(map.get("qos").map(String::as_str), Some("true"));
        assert_eq!(map.get("jobname").map(String::as_str), Some("train"));
        assert_eq!(map.get("time").map(String::as_str), Some("4-00:00:00"));
    }
}
