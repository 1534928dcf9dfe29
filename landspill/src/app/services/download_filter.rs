// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Decides which result blobs of a finished case are worth downloading.

use std::path::{Path, PathBuf};

const RAW_OUTPUT_EXTENSION: &str = "data";
const RAW_OUTPUT_STEMS: [&str; 3] = ["fort", "claw_git_diffs", "claw_git_status"];
const RASTER_EXTENSIONS: [&str; 2] = ["asc", "prj"];
const NEVER_DOWNLOAD_DIR: &str = "__pycache__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadOptions {
    /// Keep GeoClaw raw output (`*.data`, `fort.*`, `claw_git_*`).
    pub raw_output: bool,
    /// Keep topography and hydrology rasters (`*.asc`, `*.prj`).
    pub rasters: bool,
}

impl DownloadOptions {
    pub fn wants(&self, blob_name: &str) -> bool {
        let path = Path::new(blob_name);
        let in_pycache = path
            .parent()
            .is_some_and(|dir| dir.iter().any(|part| part == NEVER_DOWNLOAD_DIR));
        if in_pycache {
            return false;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();

        if !self.raw_output
            && (extension == RAW_OUTPUT_EXTENSION || RAW_OUTPUT_STEMS.contains(&stem.as_ref()))
        {
            return false;
        }
        if !self.rasters && RASTER_EXTENSIONS.contains(&extension.as_ref()) {
            return false;
        }
        true
    }
}

/// Local destination of a blob: blob names already start with the case name,
/// so they land next to the original case folder.
pub fn local_destination(dest_root: &Path, blob_name: &str) -> PathBuf {
    blob_name
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(dest_root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_skip_raw_output_and_rasters() {
        let opts = DownloadOptions::default();
        assert!(opts.wants("point_01/point_01.nc"));
        assert!(opts.wants("point_01/hydro_feats.dat"));
        assert!(opts.wants("point_01/stdout.txt"));
        assert!(!opts.wants("point_01/_output/fort.q0001"));
        assert!(!opts.wants("point_01/_output/fort.t0001"));
        assert!(!opts.wants("point_01/_output/amr.data"));
        assert!(!opts.wants("point_01/_output/claw_git_status.txt"));
        assert!(!opts.wants("point_01/topo.asc"));
        assert!(!opts.wants("point_01/topo.prj"));
    }

    #[test]
    fn requested_categories_are_kept() {
        let opts = DownloadOptions {
            raw_output: true,
            rasters: true,
        };
        assert!(opts.wants("point_01/_output/fort.q0001"));
        assert!(opts.wants("point_01/topo.asc"));
    }

    #[test]
    fn pycache_is_never_downloaded() {
        let opts = DownloadOptions {
            raw_output: true,
            rasters: true,
        };
        assert!(!opts.wants("point_01/__pycache__/setrun.cpython-38.pyc"));
        assert!(!opts.wants("point_01/__pycache__/sub/helper.cpython-38.pyc"));
        assert!(opts.wants("point_01/pycache_notes/readme.txt"));
    }

    #[test]
    fn destination_ignores_traversal_segments() {
        let root = Path::new("/work/cases");
        assert_eq!(
            local_destination(root, "point_01/_output/fort.nc"),
            PathBuf::from("/work/cases/point_01/_output/fort.nc")
        );
        assert_eq!(
            local_destination(root, "../point_01//x.txt"),
            PathBuf::from("/work/cases/point_01/x.txt")
        );
    }
}
