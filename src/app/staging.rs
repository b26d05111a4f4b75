// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Staging: building a self-contained run directory.
//!
//! The run directory receives a recursive copy of the project source tree,
//! then the generated submission script, then the metadata record, in that
//! order, so the script and record exist before anything can start reading
//! them. Remote targets are staged into local scratch first and mirrored
//! wholesale; a local failure therefore aborts before any remote state is
//! created.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::app::ports::{MirrorError, MirrorPort, MirrorTarget};
use crate::app::run::{RecordError, RunRecord, RUN_SCRIPT};

/// Directories never worth shipping to a run directory.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "target", "__pycache__"];

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to stage {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// One file chosen for the source-tree copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyItem {
    pub src: PathBuf,
    pub rel: PathBuf,
}

/// Exclude-only path filter. Slash-less patterns match any path component
/// (so `.git` prunes the directory at any depth); patterns with a slash
/// match against the full relative path.
#[derive(Debug)]
struct ExcludeFilter {
    basename: Vec<globset::GlobMatcher>,
    full_path: Vec<globset::GlobMatcher>,
}

impl ExcludeFilter {
    fn new(patterns: &[String]) -> Result<Self, StageError> {
        let mut basename = Vec::new();
        let mut full_path = Vec::new();
        for raw in patterns {
            let pattern = raw.trim().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let matcher = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| StageError::Pattern {
                    pattern: raw.clone(),
                    source,
                })?
                .compile_matcher();
            if pattern.contains('/') {
                full_path.push(matcher);
            } else {
                basename.push(matcher);
            }
        }
        Ok(Self {
            basename,
            full_path,
        })
    }

    fn excludes(&self, rel: &Path) -> bool {
        let rel_str = rel.to_string_lossy();
        if self.full_path.iter().any(|m| m.is_match(rel_str.as_ref())) {
            return true;
        }
        match rel.file_name() {
            Some(name) => {
                let name = name.to_string_lossy();
                self.basename.iter().any(|m| m.is_match(name.as_ref()))
            }
            None => false,
        }
    }
}

/// Enumerate the project files to copy, pruning excluded directories.
pub fn build_copy_plan(root: &Path, excludes: &[String]) -> Result<Vec<CopyItem>, StageError> {
    let filter = ExcludeFilter::new(excludes)?;
    let mut items = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            match entry.path().strip_prefix(root) {
                Ok(rel) => !filter.excludes(rel),
                Err(_) => true,
            }
        })
    {
        let entry = entry.map_err(|source| StageError::Io {
            path: root.display().to_string(),
            source: source
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("walk error")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let src = entry.path().to_path_buf();
        let rel = match src.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        items.push(CopyItem { src, rel });
    }
    Ok(items)
}

fn copy_items(items: &[CopyItem], dest: &Path) -> Result<(), StageError> {
    let mut made_dirs = BTreeSet::new();
    for item in items {
        let target = dest.join(&item.rel);
        if let Some(parent) = target.parent()
            && made_dirs.insert(parent.to_path_buf())
        {
            fs::create_dir_all(parent).map_err(|source| StageError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        fs::copy(&item.src, &target).map_err(|source| StageError::Io {
            path: item.src.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Populate `local_dir` with the project copy, the submission script and the
/// metadata record, in that order.
pub fn stage_run(
    local_dir: &Path,
    project_root: &Path,
    script_lines: &[String],
    record: &RunRecord,
    excludes: &[String],
) -> Result<(), StageError> {
    let plan = build_copy_plan(project_root, excludes)?;
    tracing::debug!(
        files = plan.len(),
        root = %project_root.display(),
        dest = %local_dir.display(),
        "copying source tree"
    );
    copy_items(&plan, local_dir)?;

    let script_path = local_dir.join(RUN_SCRIPT);
    let mut script = script_lines.join("\n");
    script.push('\n');
    fs::write(&script_path, script).map_err(|source| StageError::Io {
        path: script_path.display().to_string(),
        source,
    })?;

    record.store(local_dir)?;
    Ok(())
}

/// Mirror a fully-staged local directory to the remote run directory. Only
/// called after `stage_run` succeeded, so a failure here leaves no partial
/// remote state beyond what one rsync attempt produced, and the run is not
/// considered launched.
pub fn push_to_remote(
    mirror: &dyn MirrorPort,
    local_dir: &Path,
    target: &MirrorTarget,
) -> Result<(), StageError> {
    mirror.mirror(local_dir, target)?;
    Ok(())
}
