// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The per-run metadata record and its on-disk form.
//!
//! Each run owns a single self-contained `meta.json`; the union of all such
//! files under the archive root is the run index, so there is no shared
//! index file to race on between concurrent runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::app::backend::BackendKind;

pub const META_FILE: &str = "meta.json";
pub const RUN_SCRIPT: &str = "run.sh";
pub const LOG_FILE: &str = "log.out";

const RUN_ID_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]_[hour][minute][second]");
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Derive a run identifier from the launch time. Sortable and unique per
/// launching host at one-second granularity.
pub fn new_run_id(now: OffsetDateTime) -> String {
    now.format(RUN_ID_FORMAT)
        .unwrap_or_else(|_| format!("{}", now.unix_timestamp()))
}

/// Human-readable timestamp used for `start_time`/`end_time`.
pub fn format_timestamp(now: OffsetDateTime) -> String {
    now.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| format!("{}", now.unix_timestamp()))
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to read record {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write record {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record {path} is not valid JSON: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The provenance record for one run. Written once by staging before the job
/// starts; mutated only by the finalizer, which sets `end_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub memo_id: String,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub full_command: String,
    pub executable: String,
    pub script: String,
    pub script_args: Vec<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub outcome: String,
    pub host: String,
    pub remote_host: String,
    pub working_dir: String,
    pub user: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub backend_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote_url: Option<String>,
    #[serde(default = "default_show")]
    pub show: bool,
    /// Fields this version does not know about survive a read-modify-write.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_show() -> bool {
    true
}

impl RunRecord {
    pub fn load(run_dir: &Path) -> Result<Self, RecordError> {
        let path = run_dir.join(META_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| RecordError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| RecordError::Malformed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn store(&self, run_dir: &Path) -> Result<(), RecordError> {
        let path = run_dir.join(META_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(|source| {
            RecordError::Malformed {
                path: path.display().to_string(),
                source,
            }
        })?;
        fs::write(&path, contents).map_err(|source| RecordError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;
    use time::macros::datetime;

    pub(crate) fn sample_record() -> RunRecord {
        RunRecord {
            memo_id: "20260830_120000".to_string(),
            start_time: "2026-08-30 12:00:00".to_string(),
            end_time: None,
            full_command: "memo python train.py --lr 0.1".to_string(),
            executable: "python".to_string(),
            script: "train.py".to_string(),
            script_args: vec!["--lr".to_string(), "0.1".to_string()],
            tag: "exp1".to_string(),
            description: String::new(),
            outcome: String::new(),
            host: "localhost".to_string(),
            remote_host: "localhost".to_string(),
            working_dir: "/tmp/run".to_string(),
            user: "alice".to_string(),
            backend: BackendKind::Local,
            backend_args: BTreeMap::new(),
            git_commit: Some("abc123".to_string()),
            git_remote_url: None,
            show: true,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn run_id_is_sortable_timestamp() {
        let id = new_run_id(datetime!(2026-08-30 12:00:05 UTC));
        assert_eq!(id, "20260830_120005");
        let later = new_run_id(datetime!(2026-08-30 12:00:06 UTC));
        assert!(later > id);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let record = sample_record();
        record.store(dir.path()).unwrap();
        let loaded = RunRecord::load(dir.path()).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn end_time_absent_until_finalized() {
        let dir = TempDir::new().unwrap();
        sample_record().store(dir.path()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(META_FILE)).unwrap();
        assert!(!raw.contains("end_time"));
    }

    #[test]
    fn rewrite_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let record = sample_record();
        let mut json: serde_json::Value =
            serde_json::to_value(&record).unwrap();
        json["dashboard_note"] = serde_json::json!("keep me");
        std::fs::write(
            dir.path().join(META_FILE),
            serde_json::to_string_pretty(&json).unwrap(),
        )
        .unwrap();

        let mut loaded = RunRecord::load(dir.path()).unwrap();
        loaded.end_time = Some("2026-08-30 13:00:00".to_string());
        loaded.store(dir.path()).unwrap();

        let reread = RunRecord::load(dir.path()).unwrap();
        assert_eq!(reread.end_time.as_deref(), Some("2026-08-30 13:00:00"));
        assert_eq!(reread.tag, "exp1");
        assert_eq!(
            reread.extra.get("dashboard_note"),
            Some(&serde_json::json!("keep me"))
        );
    }

    #[test]
    fn missing_record_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let err = RunRecord::load(dir.path()).unwrap_err();
        assert!(matches!(err, RecordError::Read { .. }));
    }
}
