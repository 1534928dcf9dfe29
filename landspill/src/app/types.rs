// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::app::errors::{AppResult, invalid_argument};
use crate::app::services::naming;

/// Batch and storage account secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    pub batch_account_name: String,
    pub batch_account_key: String,
    pub batch_account_url: String,
    pub storage_account_name: String,
    pub storage_account_key: String,
}

impl Credential {
    /// Rejects a partially populated credential before anything talks to Azure.
    pub fn ensure_complete(&self) -> AppResult<()> {
        let fields = [
            ("batch_account_name", &self.batch_account_name),
            ("batch_account_key", &self.batch_account_key),
            ("batch_account_url", &self.batch_account_url),
            ("storage_account_name", &self.storage_account_name),
            ("storage_account_key", &self.storage_account_key),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(invalid_argument(format!(
                "credential is missing {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("batch_account_name", &self.batch_account_name)
            .field("batch_account_key", &"<redacted>")
            .field("batch_account_url", &self.batch_account_url)
            .field("storage_account_name", &self.storage_account_name)
            .field("storage_account_key", &"<redacted>")
            .finish()
    }
}

/// VM sizes a mission may request, with their core counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VmSize {
    StandardD2sV3,
    StandardD4sV3,
    StandardF4sV2,
    StandardF8sV2,
    #[default]
    StandardH8,
    StandardH8m,
    StandardH16,
    StandardH16m,
}

impl VmSize {
    pub const ALL: [VmSize; 8] = [
        VmSize::StandardD2sV3,
        VmSize::StandardD4sV3,
        VmSize::StandardF4sV2,
        VmSize::StandardF8sV2,
        VmSize::StandardH8,
        VmSize::StandardH8m,
        VmSize::StandardH16,
        VmSize::StandardH16m,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VmSize::StandardD2sV3 => "STANDARD_D2S_V3",
            VmSize::StandardD4sV3 => "STANDARD_D4S_V3",
            VmSize::StandardF4sV2 => "STANDARD_F4S_V2",
            VmSize::StandardF8sV2 => "STANDARD_F8S_V2",
            VmSize::StandardH8 => "STANDARD_H8",
            VmSize::StandardH8m => "STANDARD_H8M",
            VmSize::StandardH16 => "STANDARD_H16",
            VmSize::StandardH16m => "STANDARD_H16M",
        }
    }

    pub fn cores(self) -> u32 {
        match self {
            VmSize::StandardD2sV3 => 2,
            VmSize::StandardD4sV3 | VmSize::StandardF4sV2 => 4,
            VmSize::StandardF8sV2 | VmSize::StandardH8 | VmSize::StandardH8m => 8,
            VmSize::StandardH16 | VmSize::StandardH16m => 16,
        }
    }
}

impl fmt::Display for VmSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VmSize::ALL
            .into_iter()
            .find(|size| size.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let allowed: Vec<&str> = VmSize::ALL.iter().map(|size| size.as_str()).collect();
                format!(
                    "unsupported vm size '{wanted}' (allowed: {})",
                    allowed.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    #[default]
    Dedicated,
    LowPriority,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Dedicated => "dedicated",
            NodeType::LowPriority => "low-priority",
        }
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedicated" => Ok(NodeType::Dedicated),
            "low-priority" | "lowpriority" | "low_priority" => Ok(NodeType::LowPriority),
            other => Err(format!(
                "node type should be either dedicated or low-priority, got '{other}'"
            )),
        }
    }
}

/// Names and sizing of one mission. Remote resource names derive from the
/// mission name and form the lock domain on the batch service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionInfo {
    pub name: String,
    pub pool_name: String,
    pub job_name: String,
    pub container_name: String,
    pub max_nodes: u32,
    pub vm_size: VmSize,
    pub node_type: NodeType,
}

impl MissionInfo {
    pub fn new(
        name: &str,
        max_nodes: u32,
        vm_size: VmSize,
        node_type: NodeType,
    ) -> AppResult<Self> {
        let name = name.trim();
        naming::validate_mission_name(name)?;
        if max_nodes == 0 {
            return Err(invalid_argument("max_nodes must be at least 1"));
        }
        Ok(Self {
            name: name.to_string(),
            pool_name: naming::pool_name(name),
            job_name: naming::job_name(name),
            container_name: naming::container_name(name),
            max_nodes,
            vm_size,
            node_type,
        })
    }
}

impl fmt::Display for MissionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "VM type: {}", self.vm_size)?;
        writeln!(f, "Node type: {}", self.node_type.as_str())?;
        writeln!(f, "Pool name: {}", self.pool_name)?;
        writeln!(f, "Job (task scheduler) name: {}", self.job_name)?;
        writeln!(f, "Storage container name: {}", self.container_name)?;
        write!(f, "Max. number of nodes: {}", self.max_nodes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    Created,
    Started,
    Idle,
    Submitting,
    Completed,
}

impl MissionState {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionState::Created => "created",
            MissionState::Started => "started",
            MissionState::Idle => "idle",
            MissionState::Submitting => "submitting",
            MissionState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NotSubmitted,
    Submitted,
    SkippedLocalMissing,
    SkippedRemoteExists,
}

impl SubmissionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionState::NotSubmitted => "not_submitted",
            SubmissionState::Submitted => "submitted",
            SubmissionState::SkippedLocalMissing => "skipped_local_missing",
            SubmissionState::SkippedRemoteExists => "skipped_remote_exists",
        }
    }

    /// Whether a task in this state occupies a node on the pool.
    pub fn runs_remotely(self) -> bool {
        matches!(
            self,
            SubmissionState::Submitted | SubmissionState::SkippedRemoteExists
        )
    }
}

/// One simulation case tracked by a mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub local_case_path: PathBuf,
    pub remote_identifier: String,
    pub submission_state: SubmissionState,
}

/// Result of one `add_task` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub case_path: PathBuf,
    pub identifier: String,
    pub state: SubmissionState,
    pub message: String,
}

impl TaskOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self.state,
            SubmissionState::SkippedLocalMissing | SubmissionState::SkippedRemoteExists
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitFlags {
    pub skip_if_local_missing: bool,
    pub skip_if_remote_exists: bool,
}

impl Default for SubmitFlags {
    fn default() -> Self {
        Self {
            skip_if_local_missing: true,
            skip_if_remote_exists: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged { nodes: u32 },
    Requested { from: u32, to: u32 },
}

impl ResizeOutcome {
    pub fn nodes(self) -> u32 {
        match self {
            ResizeOutcome::Unchanged { nodes } => nodes,
            ResizeOutcome::Requested { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Active,
    Deleting,
    Unknown,
}

impl PoolState {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolState::Active => "active",
            PoolState::Deleting => "deleting",
            PoolState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    Steady,
    Resizing,
    Stopping,
    Unknown,
}

impl AllocationState {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationState::Steady => "steady",
            AllocationState::Resizing => "resizing",
            AllocationState::Stopping => "stopping",
            AllocationState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeTarget {
    pub dedicated: u32,
    pub low_priority: u32,
}

impl NodeTarget {
    pub fn for_type(node_type: NodeType, nodes: u32) -> Self {
        match node_type {
            NodeType::Dedicated => Self {
                dedicated: nodes,
                low_priority: 0,
            },
            NodeType::LowPriority => Self {
                dedicated: 0,
                low_priority: nodes,
            },
        }
    }

    pub fn nodes_of(self, node_type: NodeType) -> u32 {
        match node_type {
            NodeType::Dedicated => self.dedicated,
            NodeType::LowPriority => self.low_priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub id: String,
    pub state: PoolState,
    pub allocation_state: AllocationState,
    pub target: NodeTarget,
    pub vm_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub id: String,
    pub vm_size: VmSize,
    pub target: NodeTarget,
    pub container_images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileSpec {
    pub file_pattern: String,
    pub container_url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: String,
    pub command_line: String,
    pub image_name: String,
    pub container_run_options: String,
    pub input_container_url: String,
    pub input_blob_prefix: String,
    pub output_files: Vec<OutputFileSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskState {
    Active,
    Preparing,
    Running,
    Completed,
    Failed,
}

impl RemoteTaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteTaskState::Active => "active",
            RemoteTaskState::Preparing => "preparing",
            RemoteTaskState::Running => "running",
            RemoteTaskState::Completed => "completed",
            RemoteTaskState::Failed => "failed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, RemoteTaskState::Completed | RemoteTaskState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    pub id: String,
    pub state: RemoteTaskState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCreation {
    Created,
    AlreadyExists,
    BeingDeleted,
}
