// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Pool sizing policy used while submitting and monitoring a mission.

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::types::VmSize;

/// Pool size to request right after the task at `index` (0-based) has been
/// handled. The pool grows to `max_nodes` once that many cases are queued.
pub fn checkpoint_target(index: usize, max_nodes: u32) -> Option<u32> {
    let checkpoint = usize::try_from(max_nodes).ok()?.checked_sub(1)?;
    (index == checkpoint).then_some(max_nodes)
}

/// Pool size once every case has been handled: one node per task that will
/// actually run, capped at `max_nodes`.
pub fn final_target(tasks_running_remotely: usize, max_nodes: u32) -> u32 {
    clamp(tasks_running_remotely, max_nodes)
}

/// Pool size while waiting: one node per unfinished task, capped at `max_nodes`.
pub fn adaptive_target(unfinished_tasks: usize, max_nodes: u32) -> u32 {
    clamp(unfinished_tasks, max_nodes)
}

fn clamp(count: usize, max_nodes: u32) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX).min(max_nodes)
}

/// Rejects a pool size whose total core count exceeds the configured quota.
pub fn check_core_quota(nodes: u32, vm_size: VmSize, core_quota: Option<u32>) -> AppResult<()> {
    let Some(quota) = core_quota else {
        return Ok(());
    };
    let cores = u64::from(nodes) * u64::from(vm_size.cores());
    if cores > u64::from(quota) {
        return Err(AppError::with_message(
            AppErrorKind::Quota,
            codes::QUOTA_EXCEEDED,
            format!(
                "{nodes} x {vm_size} needs {cores} cores but the core quota is {quota}"
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_fires_once_at_max_nodes_minus_one() {
        let hits: Vec<(usize, u32)> = (0..10)
            .filter_map(|i| checkpoint_target(i, 4).map(|n| (i, n)))
            .collect();
        assert_eq!(hits, vec![(3, 4)]);
        assert_eq!(checkpoint_target(0, 1), Some(1));
        assert_eq!(checkpoint_target(0, 0), None);
    }

    #[test]
    fn fewer_tasks_than_nodes_never_reach_checkpoint() {
        // Two cases with max_nodes = 5: no checkpoint, final size 2.
        assert!((0..2).all(|i| checkpoint_target(i, 5).is_none()));
        assert_eq!(final_target(2, 5), 2);
    }

    #[test]
    fn final_target_is_clamped() {
        assert_eq!(final_target(7, 4), 4);
        assert_eq!(final_target(0, 4), 0);
        assert_eq!(adaptive_target(usize::MAX, 3), 3);
    }

    #[test]
    fn quota_counts_cores() {
        check_core_quota(4, VmSize::StandardH8, Some(32)).unwrap();
        check_core_quota(400, VmSize::StandardH16, None).unwrap();
        let err = check_core_quota(5, VmSize::StandardH8, Some(32)).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Quota);
        assert_eq!(err.code(), codes::QUOTA_EXCEEDED);
    }
}
