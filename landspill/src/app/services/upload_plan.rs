// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Upload planning for case folders.
//!
//! Enumerates the files of one case folder, applies include/exclude rules and
//! maps every file to a blob name of the form `<case>/<relative path>`. No
//! storage calls happen here.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::app::errors::{AppResult, invalid_argument, local_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Include,
    Exclude,
}

/// One glob rule. Rules are evaluated in order and the first match wins.
/// A trailing `/` restricts the rule to directories, a leading `/` anchors it
/// at the case root, and a pattern without `/` matches any base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub action: FilterAction,
    pub pattern: String,
}

impl FilterRule {
    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            action: FilterAction::Exclude,
            pattern: pattern.into(),
        }
    }

    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            action: FilterAction::Include,
            pattern: pattern.into(),
        }
    }
}

/// Rules applied when the caller supplies none.
pub fn default_upload_rules() -> Vec<FilterRule> {
    vec![FilterRule::exclude("__pycache__/")]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local_path: PathBuf,
    pub blob_name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub case_root: PathBuf,
    pub blob_prefix: String,
    /// Sorted by blob name so uploads are issued in a stable order.
    pub items: Vec<UploadItem>,
}

impl UploadPlan {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|item| item.size).sum()
    }
}

/// Walk `case_dir` and list every file to upload under `<identifier>/`.
pub fn build_upload_plan(
    case_dir: &Path,
    identifier: &str,
    rules: &[FilterRule],
) -> AppResult<UploadPlan> {
    let filter = PathFilter::new(rules)?;
    let mut items = Vec::new();

    for entry in WalkDir::new(case_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            match entry.path().strip_prefix(case_dir) {
                Ok(rel) => filter.should_include(rel, true),
                Err(_) => true,
            }
        })
    {
        let entry = entry.map_err(|err| {
            local_error(format!(
                "failed to enumerate case folder {}: {err}",
                case_dir.display()
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let local_path = entry.path().to_path_buf();
        let Ok(rel_path) = local_path.strip_prefix(case_dir) else {
            tracing::warn!(
                "failed computing relative path for {:?} from {:?}",
                local_path,
                case_dir
            );
            continue;
        };
        if !filter.should_include(rel_path, false) {
            continue;
        }
        let size = entry
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| local_error(format!("failed to stat {}: {err}", local_path.display())))?;
        items.push(UploadItem {
            blob_name: join_blob(identifier, rel_path),
            local_path,
            size,
        });
    }
    items.sort_by(|a, b| a.blob_name.cmp(&b.blob_name));

    Ok(UploadPlan {
        case_root: case_dir.to_path_buf(),
        blob_prefix: format!("{identifier}/"),
        items,
    })
}

#[derive(Debug)]
struct CompiledRule {
    action: FilterAction,
    matcher: GlobMatcher,
    only_dir: bool,
    match_basename: bool,
}

#[derive(Debug)]
pub(crate) struct PathFilter {
    rules: Vec<CompiledRule>,
}

impl PathFilter {
    pub(crate) fn new(rules: &[FilterRule]) -> AppResult<Self> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub(crate) fn should_include(&self, rel_path: &Path, is_dir: bool) -> bool {
        let rel_str = to_slash(rel_path);
        let basename = rel_path
            .file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        self.rules
            .iter()
            .find(|rule| rule.matches(&rel_str, &basename, is_dir))
            .is_none_or(|rule| rule.action == FilterAction::Include)
    }
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> AppResult<Self> {
        let mut pattern = rule.pattern.trim().to_string();
        let only_dir = pattern.ends_with('/');
        let trimmed_len = pattern.trim_end_matches('/').len();
        pattern.truncate(trimmed_len);
        if pattern.is_empty() {
            return Err(invalid_argument("filter pattern cannot be empty"));
        }

        let anchored = pattern.starts_with('/');
        if anchored {
            pattern = pattern.trim_start_matches('/').to_string();
        }
        let has_slash = pattern.contains('/');
        let match_basename = !has_slash && !anchored;
        if has_slash && !anchored && !pattern.starts_with("**/") {
            pattern = format!("**/{pattern}");
        }

        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| {
                invalid_argument(format!("invalid filter pattern '{}': {err}", rule.pattern))
            })?
            .compile_matcher();
        Ok(Self {
            action: rule.action,
            matcher,
            only_dir,
            match_basename,
        })
    }

    fn matches(&self, rel_path: &str, basename: &str, is_dir: bool) -> bool {
        if self.only_dir && !is_dir {
            return false;
        }
        if self.match_basename {
            self.matcher.is_match(basename)
        } else {
            self.matcher.is_match(rel_path)
        }
    }
}

/// Forward-slash rendering of a relative path, for matching and blob names.
pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|comp| match comp {
            Component::Normal(os) => Some(os.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn join_blob(prefix: &str, rel: &Path) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), to_slash(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn first_matching_rule_wins() {
        let filter = PathFilter::new(&[
            FilterRule::include("*.py"),
            FilterRule::exclude("*"),
        ])
        .unwrap();
        assert!(filter.should_include(Path::new("setrun.py"), false));
        assert!(!filter.should_include(Path::new("topo.asc"), false));
    }

    #[test]
    fn anchored_and_directory_rules() {
        let filter = PathFilter::new(&[FilterRule::exclude("/_output/")]).unwrap();
        assert!(!filter.should_include(Path::new("_output"), true));
        assert!(filter.should_include(Path::new("nested/_output"), true));
        assert!(filter.should_include(Path::new("_output"), false));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let err = PathFilter::new(&[FilterRule::exclude(" / ")]).unwrap_err();
        assert!(err.message().contains("empty"));
    }

    #[test]
    fn plan_prefixes_blobs_with_case_name_and_skips_pycache() {
        let tmp = tempfile::tempdir().unwrap();
        let case = tmp.path().join("point_01");
        fs::create_dir_all(case.join("__pycache__")).unwrap();
        fs::create_dir_all(case.join("hydro")).unwrap();
        fs::write(case.join("setrun.py"), "rundata").unwrap();
        fs::write(case.join("hydro/hydro_feats.dat"), "12345").unwrap();
        fs::write(case.join("__pycache__/setrun.cpython-38.pyc"), "x").unwrap();

        let plan = build_upload_plan(&case, "point_01", &default_upload_rules()).unwrap();
        let names: Vec<&str> = plan.items.iter().map(|i| i.blob_name.as_str()).collect();
        assert_eq!(names, vec!["point_01/hydro/hydro_feats.dat", "point_01/setrun.py"]);
        assert_eq!(plan.blob_prefix, "point_01/");
        assert_eq!(plan.total_bytes(), 12);
    }

    #[test]
    fn missing_folder_is_a_local_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = build_upload_plan(&tmp.path().join("absent"), "absent", &[]).unwrap_err();
        assert_eq!(err.kind(), crate::app::errors::AppErrorKind::Io);
    }
}
