// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Up-front checks of a submission request. Every rule is a pure function of
//! the request; nothing here touches the filesystem or the network.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::app::errors::{AppResult, invalid_argument};
use crate::app::services::naming;
use crate::app::types::{MissionInfo, NodeType, SubmitFlags, VmSize};

pub const MAX_UPLOAD_PARALLELISM: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub mission_name: String,
    pub max_nodes: u32,
    pub vm_size: String,
    pub node_type: String,
    pub credential_path: PathBuf,
    pub case_paths: Vec<PathBuf>,
    pub upload_parallelism: usize,
    pub core_quota: Option<u32>,
    pub flags: SubmitFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate(config: &SubmissionConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let Err(err) = naming::validate_mission_name(config.mission_name.trim()) {
        issues.push(ValidationIssue::error("mission_name", err.message()));
    }
    if config.max_nodes == 0 {
        issues.push(ValidationIssue::error(
            "max_nodes",
            "at least one node is required",
        ));
    }
    let vm_size = match config.vm_size.parse::<VmSize>() {
        Ok(size) => Some(size),
        Err(message) => {
            issues.push(ValidationIssue::error("vm_size", message));
            None
        }
    };
    if let Err(message) = config.node_type.parse::<NodeType>() {
        issues.push(ValidationIssue::error("node_type", message));
    }
    if config.credential_path.as_os_str().is_empty() {
        issues.push(ValidationIssue::error(
            "credential_path",
            "a credential file is required",
        ));
    }
    if config.upload_parallelism == 0 || config.upload_parallelism > MAX_UPLOAD_PARALLELISM {
        issues.push(ValidationIssue::error(
            "upload_parallelism",
            format!("must be between 1 and {MAX_UPLOAD_PARALLELISM}"),
        ));
    }
    if let (Some(quota), Some(size)) = (config.core_quota, vm_size) {
        let cores = u64::from(config.max_nodes) * u64::from(size.cores());
        if cores > u64::from(quota) {
            issues.push(ValidationIssue::warning(
                "max_nodes",
                format!(
                    "{} x {size} needs {cores} cores, above the core quota of {quota}; resizes beyond the quota will fail",
                    config.max_nodes
                ),
            ));
        }
    }

    issues.extend(validate_cases(config));
    issues
}

fn validate_cases(config: &SubmissionConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if config.case_paths.is_empty() {
        issues.push(ValidationIssue::error(
            "case_paths",
            "at least one case folder is required",
        ));
        return issues;
    }

    let mut seen: HashMap<String, &PathBuf> = HashMap::new();
    for path in &config.case_paths {
        let identifier = match naming::case_identifier(path) {
            Ok(identifier) => identifier,
            Err(err) => {
                issues.push(ValidationIssue::error("case_paths", err.message()));
                continue;
            }
        };
        if let Some(first) = seen.get(&identifier) {
            let message = format!(
                "{} and {} share the task name '{identifier}'",
                first.display(),
                path.display()
            );
            issues.push(if config.flags.skip_if_remote_exists {
                ValidationIssue::warning("case_paths", format!("{message}; the second is skipped"))
            } else {
                ValidationIssue::error("case_paths", message)
            });
        } else {
            seen.insert(identifier, path);
        }
    }
    issues
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|issue| issue.severity == Severity::Error)
}

/// Validate and build the mission description, folding every error into a
/// single invalid-argument error.
pub fn resolve_mission(config: &SubmissionConfig) -> AppResult<MissionInfo> {
    let issues = validate(config);
    for warning in issues.iter().filter(|i| i.severity == Severity::Warning) {
        tracing::warn!(field = warning.field, "{}", warning.message);
    }
    if has_errors(&issues) {
        let rendered: Vec<String> = issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
            .map(ToString::to_string)
            .collect();
        return Err(invalid_argument(format!(
            "invalid submission: {}",
            rendered.join("; ")
        )));
    }
    let vm_size = config.vm_size.parse::<VmSize>().map_err(invalid_argument)?;
    let node_type = config
        .node_type
        .parse::<NodeType>()
        .map_err(invalid_argument)?;
    MissionInfo::new(&config.mission_name, config.max_nodes, vm_size, node_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SubmissionConfig {
        SubmissionConfig {
            mission_name: "gulf-2019".to_string(),
            max_nodes: 4,
            vm_size: "STANDARD_H8".to_string(),
            node_type: "dedicated".to_string(),
            credential_path: PathBuf::from("/home/analyst/cred.bin"),
            case_paths: vec![
                PathBuf::from("/data/cases/point_01"),
                PathBuf::from("/data/cases/point_02"),
            ],
            upload_parallelism: 4,
            core_quota: None,
            flags: SubmitFlags::default(),
        }
    }

    #[test]
    fn valid_config_has_no_issues() {
        assert!(validate(&valid_config()).is_empty());
        let info = resolve_mission(&valid_config()).unwrap();
        assert_eq!(info.pool_name, "gulf-2019-pool");
    }

    #[test]
    fn every_bad_field_is_reported() {
        let mut config = valid_config();
        config.mission_name = "Gulf 2019".to_string();
        config.max_nodes = 0;
        config.vm_size = "STANDARD_NC6".to_string();
        config.node_type = "spot".to_string();
        config.credential_path = PathBuf::new();
        config.upload_parallelism = 0;
        config.case_paths.clear();

        let fields: Vec<&str> = validate(&config).iter().map(|i| i.field).collect();
        assert_eq!(
            fields,
            vec![
                "mission_name",
                "max_nodes",
                "vm_size",
                "node_type",
                "credential_path",
                "upload_parallelism",
                "case_paths",
            ]
        );
        let err = resolve_mission(&config).unwrap_err();
        assert!(err.message().contains("vm_size"));
    }

    #[test]
    fn duplicate_case_names_depend_on_skip_flag() {
        let mut config = valid_config();
        config.case_paths.push(PathBuf::from("/other/point_01"));
        let issues = validate(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);

        config.flags.skip_if_remote_exists = false;
        assert!(has_errors(&validate(&config)));
    }

    #[test]
    fn quota_overrun_is_a_warning() {
        let mut config = valid_config();
        config.core_quota = Some(16);
        let issues = validate(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        resolve_mission(&config).unwrap();
    }
}
