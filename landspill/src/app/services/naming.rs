// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::{AppResult, invalid_argument};

const POOL_SUFFIX: &str = "-pool";
const JOB_SUFFIX: &str = "-job";
const CONTAINER_SUFFIX: &str = "-container";
// Blob container names are capped at 63 characters.
const MAX_MISSION_NAME_LEN: usize = 63 - CONTAINER_SUFFIX.len();
const MAX_TASK_ID_LEN: usize = 64;

pub fn pool_name(mission: &str) -> String {
    format!("{mission}{POOL_SUFFIX}")
}

pub fn job_name(mission: &str) -> String {
    format!("{mission}{JOB_SUFFIX}")
}

pub fn container_name(mission: &str) -> String {
    format!("{mission}{CONTAINER_SUFFIX}")
}

/// Mission names must yield valid pool, job and blob container names:
/// lowercase letters, digits and single hyphens, starting and ending with a
/// letter or digit.
pub fn validate_mission_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(invalid_argument("mission name cannot be empty"));
    }
    if name.len() > MAX_MISSION_NAME_LEN {
        return Err(invalid_argument(format!(
            "mission name '{name}' is longer than {MAX_MISSION_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid_argument(format!(
            "mission name '{name}' may only contain lowercase letters, digits and hyphens"
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid_argument(format!(
            "mission name '{name}' cannot start or end with a hyphen"
        )));
    }
    if name.contains("--") {
        return Err(invalid_argument(format!(
            "mission name '{name}' cannot contain consecutive hyphens"
        )));
    }
    Ok(())
}

/// The remote identity of a case is the base name of its folder.
pub fn case_identifier(case_path: &Path) -> AppResult<String> {
    let name = case_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            invalid_argument(format!(
                "case path {} has no folder name",
                case_path.display()
            ))
        })?;
    if name.len() > MAX_TASK_ID_LEN {
        return Err(invalid_argument(format!(
            "case folder name '{name}' is longer than {MAX_TASK_ID_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid_argument(format!(
            "case folder name '{name}' may only contain letters, digits, hyphens and underscores"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_typical_mission_names() {
        validate_mission_name("gulf-coast-2019").unwrap();
        validate_mission_name("m1").unwrap();
    }

    #[test]
    fn rejects_names_azure_would_refuse() {
        for name in ["", "Upper", "under_score", "-lead", "trail-", "double--hyphen"] {
            assert!(validate_mission_name(name).is_err(), "{name} should fail");
        }
        let long = "a".repeat(MAX_MISSION_NAME_LEN + 1);
        assert!(validate_mission_name(&long).is_err());
        let limit = "a".repeat(MAX_MISSION_NAME_LEN);
        validate_mission_name(&limit).unwrap();
        assert_eq!(container_name(&limit).len(), 63);
    }

    #[test]
    fn case_identifier_is_folder_base_name() {
        let id = case_identifier(&PathBuf::from("/data/cases/point_03")).unwrap();
        assert_eq!(id, "point_03");
    }

    #[test]
    fn case_identifier_rejects_unusable_names() {
        assert!(case_identifier(&PathBuf::from("/")).is_err());
        assert!(case_identifier(&PathBuf::from("/data/case 1")).is_err());
        assert!(case_identifier(&PathBuf::from("/data/café")).is_err());
    }
}
