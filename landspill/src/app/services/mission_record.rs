// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Local backup of a mission: its sizing and the cases it submitted, so later
//! runs can monitor, download and clean up without the submission inputs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::app::errors::{AppResult, invalid_argument, local_error};
use crate::app::types::{MissionInfo, NodeType, SubmissionState, Task, VmSize};

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub path: PathBuf,
    pub state: SubmissionState,
    #[serde(default)]
    pub downloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub version: u32,
    pub name: String,
    pub max_nodes: u32,
    pub vm_size: String,
    pub node_type: String,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    pub updated_at: String,
}

pub fn record_path(working_dir: &Path, mission_name: &str) -> PathBuf {
    working_dir.join(format!("{mission_name}_mission.json"))
}

impl MissionRecord {
    pub fn new(info: &MissionInfo, now: OffsetDateTime) -> Self {
        Self {
            version: RECORD_VERSION,
            name: info.name.clone(),
            max_nodes: info.max_nodes,
            vm_size: info.vm_size.as_str().to_string(),
            node_type: info.node_type.as_str().to_string(),
            tasks: BTreeMap::new(),
            updated_at: format_timestamp(now),
        }
    }

    /// Merge the mission's current task list into the record. Download marks
    /// of tasks already present are kept.
    pub fn update_tasks<'a>(
        &mut self,
        tasks: impl IntoIterator<Item = &'a Task>,
        downloaded: &[String],
        now: OffsetDateTime,
    ) {
        for task in tasks {
            let entry = self
                .tasks
                .entry(task.remote_identifier.clone())
                .or_insert_with(|| TaskRecord {
                    path: task.local_case_path.clone(),
                    state: task.submission_state,
                    downloaded: false,
                });
            entry.path = task.local_case_path.clone();
            entry.state = task.submission_state;
        }
        for id in downloaded {
            if let Some(entry) = self.tasks.get_mut(id) {
                entry.downloaded = true;
            }
        }
        self.updated_at = format_timestamp(now);
    }

    pub fn mission_info(&self) -> AppResult<MissionInfo> {
        let vm_size = self.vm_size.parse::<VmSize>().map_err(invalid_argument)?;
        let node_type = self.node_type.parse::<NodeType>().map_err(invalid_argument)?;
        MissionInfo::new(&self.name, self.max_nodes, vm_size, node_type)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|(id, record)| Task {
                local_case_path: record.path.clone(),
                remote_identifier: id.clone(),
                submission_state: record.state,
            })
            .collect()
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, record)| record.downloaded)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| local_error(format!("failed to read {}: {err}", path.display())))?;
        let record: Self = serde_json::from_str(&raw).map_err(|err| {
            invalid_argument(format!("malformed mission record {}: {err}", path.display()))
        })?;
        if record.version != RECORD_VERSION {
            return Err(invalid_argument(format!(
                "mission record {} has unsupported version {}",
                path.display(),
                record.version
            )));
        }
        Ok(record)
    }

    /// Write through a sibling temp file so a crash never leaves half a record.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let rendered = serde_json::to_string_pretty(self)
            .map_err(|err| local_error(format!("failed to serialize mission record: {err}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                local_error(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, rendered)
            .map_err(|err| local_error(format!("failed to write {}: {err}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|err| local_error(format!("failed to replace {}: {err}", path.display())))?;
        tracing::debug!(path = %path.display(), tasks = self.tasks.len(), "mission record saved");
        Ok(())
    }
}

fn format_timestamp(now: OffsetDateTime) -> String {
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}
