// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{NodeTarget, OutputFileSpec, PoolSpec, TaskSpec, VmSize};

/// Docker image with GeoClaw and the land-spill solver scripts.
pub const SOLVER_IMAGE: &str = "barbagroup/landspill:bionic";
const SOLVER_RUN_OPTIONS: &str = "--rm --workdir /home/landspill";

pub fn pool_spec(pool_id: &str, vm_size: VmSize) -> PoolSpec {
    PoolSpec {
        id: pool_id.to_string(),
        vm_size,
        target: NodeTarget::default(),
        container_images: vec![SOLVER_IMAGE.to_string()],
    }
}

/// Remote task for one case: pull `<case>/` from the container, run the
/// solver and the NetCDF conversion, then push `<case>/**/*` and the task's
/// stdout/stderr back under `<case>` once the task completes.
pub fn case_task_spec(case: &str, container_url: &str) -> TaskSpec {
    let command_line = format!(
        "/bin/bash -c \"cp -r $AZ_BATCH_TASK_WORKING_DIR/{case} ./ && run.py {case} && createnc.py {case} && cp -r ./{case} $AZ_BATCH_TASK_WORKING_DIR\""
    );
    let output = |file_pattern: String| OutputFileSpec {
        file_pattern,
        container_url: container_url.to_string(),
        path: case.to_string(),
    };
    TaskSpec {
        id: case.to_string(),
        command_line,
        image_name: SOLVER_IMAGE.to_string(),
        container_run_options: SOLVER_RUN_OPTIONS.to_string(),
        input_container_url: container_url.to_string(),
        input_blob_prefix: format!("{case}/"),
        output_files: vec![
            output(format!("{case}/**/*")),
            output("$AZ_BATCH_TASK_DIR/std*.txt".to_string()),
        ],
    }
}
