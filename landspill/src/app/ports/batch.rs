// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{JobInfo, NodeTarget, PoolInfo, PoolSpec, RemoteTask, TaskSpec};

#[async_trait]
/// Compute boundary: pools, the job bound to a pool, and the tasks in that job.
/// Lookups return `Ok(None)` for absent resources; creations of an existing
/// resource fail with a `Conflict` error.
/// Send+Sync because the mission holds it as Arc<dyn BatchServicePort>.
pub trait BatchServicePort: Send + Sync {
    async fn get_pool(&self, pool_id: &str) -> AppResult<Option<PoolInfo>>;
    async fn create_pool(&self, spec: &PoolSpec) -> AppResult<()>;
    /// Issues the resize and returns without waiting for nodes to be allocated.
    async fn resize_pool(&self, pool_id: &str, target: NodeTarget) -> AppResult<()>;
    async fn stop_resize(&self, pool_id: &str) -> AppResult<()>;
    async fn delete_pool(&self, pool_id: &str) -> AppResult<bool>;

    async fn get_job(&self, job_id: &str) -> AppResult<Option<JobInfo>>;
    async fn create_job(&self, job_id: &str, pool_id: &str) -> AppResult<()>;
    async fn delete_job(&self, job_id: &str) -> AppResult<bool>;

    async fn get_task(&self, job_id: &str, task_id: &str) -> AppResult<Option<RemoteTask>>;
    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> AppResult<()>;
    async fn list_tasks(&self, job_id: &str) -> AppResult<Vec<RemoteTask>>;
}
