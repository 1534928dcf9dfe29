// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-process stand-in for the Batch and Blob services.
//!
//! Backs `--dry-run` and the mission tests. Every port call is appended to a
//! call log, and failures can be scripted per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, local_error};
use crate::app::ports::{BatchServicePort, BlobStoragePort};
use crate::app::types::{
    AllocationState, BlobItem, ContainerCreation, JobInfo, NodeTarget, PoolInfo, PoolSpec,
    PoolState, RemoteTask, RemoteTaskState, TaskSpec,
};

#[derive(Default)]
struct State {
    pools: BTreeMap<String, PoolInfo>,
    jobs: BTreeMap<String, JobInfo>,
    tasks: BTreeMap<String, BTreeMap<String, (RemoteTask, TaskSpec)>>,
    containers: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    /// Containers reported as being deleted for this many more create attempts.
    deleting_containers: HashMap<String, u32>,
    failures: HashMap<&'static str, VecDeque<AppError>>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryAzure {
    state: Mutex<State>,
    /// Move tasks forward one state every time they are listed.
    auto_progress: bool,
}

impl InMemoryAzure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks advance active → running → completed across `list_tasks` calls.
    pub fn with_auto_progress() -> Self {
        Self {
            auto_progress: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, op: &'static str, subject: &str) -> AppResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{op} {subject}"));
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: AppError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        let prefix = format!("{op} ");
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn insert_pool(&self, id: &str, target: NodeTarget, allocation_state: AllocationState) {
        self.lock().pools.insert(
            id.to_string(),
            PoolInfo {
                id: id.to_string(),
                state: PoolState::Active,
                allocation_state,
                target,
                vm_size: "STANDARD_H8".to_string(),
            },
        );
    }

    pub fn insert_job(&self, id: &str) {
        self.lock().jobs.insert(
            id.to_string(),
            JobInfo {
                id: id.to_string(),
                state: "active".to_string(),
            },
        );
    }

    pub fn insert_container(&self, name: &str) {
        self.lock().containers.entry(name.to_string()).or_default();
    }

    pub fn insert_blob(&self, container: &str, name: &str, data: &[u8]) {
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), data.to_vec());
    }

    pub fn mark_container_deleting(&self, name: &str, attempts: u32) {
        self.lock()
            .deleting_containers
            .insert(name.to_string(), attempts);
    }

    pub fn set_task_state(&self, job_id: &str, task_id: &str, state: RemoteTaskState) {
        if let Some((task, _)) = self
            .lock()
            .tasks
            .get_mut(job_id)
            .and_then(|tasks| tasks.get_mut(task_id))
        {
            task.state = state;
        }
    }

    pub fn pool(&self, id: &str) -> Option<PoolInfo> {
        self.lock().pools.get(id).cloned()
    }

    pub fn task_ids(&self, job_id: &str) -> Vec<String> {
        self.lock()
            .tasks
            .get(job_id)
            .map(|tasks| tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn task_spec(&self, job_id: &str, task_id: &str) -> Option<TaskSpec> {
        self.lock()
            .tasks
            .get(job_id)
            .and_then(|tasks| tasks.get(task_id))
            .map(|(_, spec)| spec.clone())
    }

    pub fn blob_names(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn not_found(what: &str, id: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::NotFound,
        codes::NOT_FOUND,
        format!("{what} {id} does not exist"),
    )
}

fn conflict(what: &str, id: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::Conflict,
        codes::CONFLICT,
        format!("{what} {id} already exists"),
    )
}

#[async_trait]
impl BatchServicePort for InMemoryAzure {
    async fn get_pool(&self, pool_id: &str) -> AppResult<Option<PoolInfo>> {
        let state = self.enter("get_pool", pool_id)?;
        Ok(state.pools.get(pool_id).cloned())
    }

    async fn create_pool(&self, spec: &PoolSpec) -> AppResult<()> {
        let mut state = self.enter("create_pool", &spec.id)?;
        if state.pools.contains_key(&spec.id) {
            return Err(conflict("pool", &spec.id));
        }
        state.pools.insert(
            spec.id.clone(),
            PoolInfo {
                id: spec.id.clone(),
                state: PoolState::Active,
                allocation_state: AllocationState::Steady,
                target: spec.target,
                vm_size: spec.vm_size.as_str().to_string(),
            },
        );
        Ok(())
    }

    async fn resize_pool(&self, pool_id: &str, target: NodeTarget) -> AppResult<()> {
        let mut state = self.enter("resize_pool", pool_id)?;
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| not_found("pool", pool_id))?;
        if pool.allocation_state != AllocationState::Steady {
            return Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!("pool {pool_id} is already resizing"),
            ));
        }
        pool.target = target;
        Ok(())
    }

    async fn stop_resize(&self, pool_id: &str) -> AppResult<()> {
        let mut state = self.enter("stop_resize", pool_id)?;
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| not_found("pool", pool_id))?;
        pool.allocation_state = AllocationState::Steady;
        Ok(())
    }

    async fn delete_pool(&self, pool_id: &str) -> AppResult<bool> {
        let mut state = self.enter("delete_pool", pool_id)?;
        Ok(state.pools.remove(pool_id).is_some())
    }

    async fn get_job(&self, job_id: &str) -> AppResult<Option<JobInfo>> {
        let state = self.enter("get_job", job_id)?;
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn create_job(&self, job_id: &str, pool_id: &str) -> AppResult<()> {
        let mut state = self.enter("create_job", job_id)?;
        if state.jobs.contains_key(job_id) {
            return Err(conflict("job", job_id));
        }
        if !state.pools.contains_key(pool_id) {
            return Err(not_found("pool", pool_id));
        }
        state.jobs.insert(
            job_id.to_string(),
            JobInfo {
                id: job_id.to_string(),
                state: "active".to_string(),
            },
        );
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> AppResult<bool> {
        let mut state = self.enter("delete_job", job_id)?;
        state.tasks.remove(job_id);
        Ok(state.jobs.remove(job_id).is_some())
    }

    async fn get_task(&self, job_id: &str, task_id: &str) -> AppResult<Option<RemoteTask>> {
        let state = self.enter("get_task", task_id)?;
        if !state.jobs.contains_key(job_id) {
            return Err(not_found("job", job_id));
        }
        Ok(state
            .tasks
            .get(job_id)
            .and_then(|tasks| tasks.get(task_id))
            .map(|(task, _)| task.clone()))
    }

    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> AppResult<()> {
        let mut state = self.enter("add_task", &task.id)?;
        if !state.jobs.contains_key(job_id) {
            return Err(not_found("job", job_id));
        }
        let tasks = state.tasks.entry(job_id.to_string()).or_default();
        if tasks.contains_key(&task.id) {
            return Err(conflict("task", &task.id));
        }
        tasks.insert(
            task.id.clone(),
            (
                RemoteTask {
                    id: task.id.clone(),
                    state: RemoteTaskState::Active,
                },
                task.clone(),
            ),
        );
        Ok(())
    }

    async fn list_tasks(&self, job_id: &str) -> AppResult<Vec<RemoteTask>> {
        let mut state = self.enter("list_tasks", job_id)?;
        if !state.jobs.contains_key(job_id) {
            return Err(not_found("job", job_id));
        }
        let auto_progress = self.auto_progress;
        let tasks = state.tasks.entry(job_id.to_string()).or_default();
        let listed = tasks.values().map(|(task, _)| task.clone()).collect();
        if auto_progress {
            for (task, _) in tasks.values_mut() {
                task.state = match task.state {
                    RemoteTaskState::Active | RemoteTaskState::Preparing => {
                        RemoteTaskState::Running
                    }
                    RemoteTaskState::Running => RemoteTaskState::Completed,
                    finished => finished,
                };
            }
        }
        Ok(listed)
    }
}

#[async_trait]
impl BlobStoragePort for InMemoryAzure {
    async fn create_container(&self, container: &str) -> AppResult<ContainerCreation> {
        let mut state = self.enter("create_container", container)?;
        if let Some(remaining) = state.deleting_containers.get_mut(container) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(ContainerCreation::BeingDeleted);
            }
            state.deleting_containers.remove(container);
        }
        if state.containers.contains_key(container) {
            return Ok(ContainerCreation::AlreadyExists);
        }
        state.containers.insert(container.to_string(), BTreeMap::new());
        Ok(ContainerCreation::Created)
    }

    async fn container_exists(&self, container: &str) -> AppResult<bool> {
        let state = self.enter("container_exists", container)?;
        Ok(state.containers.contains_key(container))
    }

    async fn delete_container(&self, container: &str) -> AppResult<bool> {
        let mut state = self.enter("delete_container", container)?;
        Ok(state.containers.remove(container).is_some())
    }

    async fn upload_file(
        &self,
        container: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> AppResult<()> {
        // Record the call before reading so scripted failures apply first.
        drop(self.enter("upload_file", blob_name)?);
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|err| local_error(format!("failed to read {}: {err}", local_path.display())))?;
        let mut state = self.lock();
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or_else(|| not_found("container", container))?;
        blobs.insert(blob_name.to_string(), data);
        Ok(())
    }

    async fn download_file(
        &self,
        container: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> AppResult<()> {
        let data = {
            let state = self.enter("download_file", blob_name)?;
            state
                .containers
                .get(container)
                .and_then(|blobs| blobs.get(blob_name))
                .cloned()
                .ok_or_else(|| not_found("blob", blob_name))?
        };
        tokio::fs::write(local_path, data)
            .await
            .map_err(|err| local_error(format!("failed to write {}: {err}", local_path.display())))
    }

    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> AppResult<Vec<BlobItem>> {
        let state = self.enter("list_blobs", container)?;
        let blobs = state
            .containers
            .get(container)
            .ok_or_else(|| not_found("container", container))?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)))
            .map(|(name, data)| BlobItem {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn delete_blob(&self, container: &str, blob_name: &str) -> AppResult<bool> {
        let mut state = self.enter("delete_blob", blob_name)?;
        Ok(state
            .containers
            .get_mut(container)
            .is_some_and(|blobs| blobs.remove(blob_name).is_some()))
    }

    fn container_sas_url(
        &self,
        container: &str,
        _start: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> AppResult<String> {
        Ok(format!(
            "memory://{container}?se={}",
            expiry.unix_timestamp()
        ))
    }
}
