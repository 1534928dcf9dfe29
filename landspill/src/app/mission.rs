// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! One batch-compute campaign: a pool, the job bound to it and a blob
//! container, all named after the mission, plus one remote task per case.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use time::OffsetDateTime;
use tokio::time::{Duration, sleep};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, invalid_argument, invalid_state};
use crate::app::ports::{
    BatchServicePort, BlobStoragePort, ClockPort, LocalFilesystemPort, ProgressPort,
};
use crate::app::services::download_filter::{self, DownloadOptions};
use crate::app::services::upload_plan::{self, FilterRule, UploadItem};
use crate::app::services::{naming, resize, task_spec};
use crate::app::types::{
    AllocationState, ContainerCreation, JobInfo, MissionInfo, MissionState, NodeTarget, PoolInfo,
    PoolState, RemoteTask, RemoteTaskState, ResizeOutcome, SubmissionState, SubmitFlags, Task,
    TaskOutcome, TaskSpec,
};

const DEFAULT_UPLOAD_PARALLELISM: usize = 4;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RESIZE_SETTLE_ATTEMPTS: u32 = 60;
const DEFAULT_CONTAINER_RETRY_LIMIT: u32 = 120;
const DEFAULT_SAS_VALIDITY_DAYS: i64 = 30;

#[derive(Clone)]
pub struct MissionPorts {
    pub batch: Arc<dyn BatchServicePort>,
    pub storage: Arc<dyn BlobStoragePort>,
    pub local_fs: Arc<dyn LocalFilesystemPort>,
    pub clock: Arc<dyn ClockPort>,
    pub progress: Arc<dyn ProgressPort>,
}

#[derive(Debug, Clone)]
pub struct MissionOptions {
    /// Concurrent blob uploads within one case folder.
    pub upload_parallelism: usize,
    /// Total cores the account may run; `None` leaves enforcement to the service.
    pub core_quota: Option<u32>,
    pub poll_interval: Duration,
    /// Polls to wait for an interrupted resize to settle.
    pub resize_settle_attempts: u32,
    /// Create attempts while the service still deletes a same-named container.
    pub container_retry_limit: u32,
    pub sas_validity: time::Duration,
    pub upload_rules: Vec<FilterRule>,
}

impl Default for MissionOptions {
    fn default() -> Self {
        Self {
            upload_parallelism: DEFAULT_UPLOAD_PARALLELISM,
            core_quota: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            resize_settle_attempts: DEFAULT_RESIZE_SETTLE_ATTEMPTS,
            container_retry_limit: DEFAULT_CONTAINER_RETRY_LIMIT,
            sas_validity: time::Duration::days(DEFAULT_SAS_VALIDITY_DAYS),
            upload_rules: upload_plan::default_upload_rules(),
        }
    }
}

/// Outcome of one case handed to the mission, success or not.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case_path: PathBuf,
    pub result: AppResult<TaskOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { files: usize },
    AlreadyDownloaded,
    NothingToDownload,
}

#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Download finished cases; `None` only waits.
    pub download: Option<DownloadOptions>,
    /// Shrink the pool to the number of unfinished tasks every cycle.
    pub adapt_size: bool,
    /// Give up after this many polls.
    pub max_cycles: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct WaitSummary {
    pub cycles: u32,
    pub all_finished: bool,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub downloaded: Vec<String>,
    pub download_errors: Vec<(String, AppError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClearReport {
    pub container_deleted: bool,
    pub job_deleted: bool,
    pub pool_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounts {
    pub total: usize,
    pub active: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[RemoteTask]) -> Self {
        let mut counts = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            match task.state {
                RemoteTaskState::Active | RemoteTaskState::Preparing => counts.active += 1,
                RemoteTaskState::Running => counts.running += 1,
                RemoteTaskState::Completed => counts.completed += 1,
                RemoteTaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn unfinished(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Snapshot of everything the mission owns on the remote side.
#[derive(Debug, Clone)]
pub struct MissionStatus {
    pub generated_at: OffsetDateTime,
    pub info: MissionInfo,
    pub pool: Option<PoolInfo>,
    pub job: Option<JobInfo>,
    pub tasks: Vec<RemoteTask>,
    pub container_exists: bool,
    pub case_dirs: BTreeMap<String, DirUsage>,
}

impl MissionStatus {
    pub fn counts(&self) -> TaskCounts {
        TaskCounts::from_tasks(&self.tasks)
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.generated_at.replace_nanosecond(0).unwrap_or(self.generated_at);
        writeln!(f, "{stamp}")?;
        writeln!(f)?;
        writeln!(f, "Pool (cluster) name: {}", self.info.pool_name)?;
        match &self.pool {
            Some(pool) => writeln!(
                f,
                "Pool status: {} and {}, {} {} node(s) requested",
                pool.state.as_str(),
                pool.allocation_state.as_str(),
                pool.target.nodes_of(self.info.node_type),
                self.info.node_type.as_str()
            )?,
            None => writeln!(f, "Pool status: not found")?,
        }
        writeln!(f)?;
        writeln!(f, "Job (task scheduler) name: {}", self.info.job_name)?;
        match &self.job {
            Some(job) => writeln!(f, "Job status: {}", job.state)?,
            None => writeln!(f, "Job status: not found")?,
        }
        if !self.tasks.is_empty() {
            let counts = self.counts();
            writeln!(
                f,
                "Tasks: {} total, {} waiting, {} running, {} completed, {} failed",
                counts.total, counts.active, counts.running, counts.completed, counts.failed
            )?;
            writeln!(f, "Task status:")?;
            for task in &self.tasks {
                writeln!(f, "\t{}: {}", task.id, task.state.as_str())?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Storage Blob container name: {}", self.info.container_name)?;
        writeln!(
            f,
            "Container status: {}",
            if self.container_exists { "available" } else { "not found" }
        )?;
        if !self.case_dirs.is_empty() {
            writeln!(f, "Directories in the container:")?;
            for (dir, usage) in &self.case_dirs {
                writeln!(f, "\t{dir}: {} file(s), {} bytes", usage.files, usage.bytes)?;
            }
        }
        Ok(())
    }
}

pub struct Mission {
    info: MissionInfo,
    ports: MissionPorts,
    options: MissionOptions,
    state: MissionState,
    tasks: Vec<Task>,
    queued: Vec<PathBuf>,
    current_pool_size: u32,
    container_url: Option<String>,
    downloaded: BTreeSet<String>,
}

impl Mission {
    pub fn new(info: MissionInfo, ports: MissionPorts, options: MissionOptions) -> AppResult<Self> {
        if options.upload_parallelism == 0 {
            return Err(invalid_argument("upload_parallelism must be at least 1"));
        }
        Ok(Self {
            info,
            ports,
            options,
            state: MissionState::Created,
            tasks: Vec::new(),
            queued: Vec::new(),
            current_pool_size: 0,
            container_url: None,
            downloaded: BTreeSet::new(),
        })
    }

    /// Cases handed over at construction; `start` submits them in order.
    pub fn with_cases(mut self, cases: impl IntoIterator<Item = PathBuf>) -> Self {
        self.queued.extend(cases);
        self
    }

    /// Rebuild a mission that was started by an earlier run. Remote resources
    /// are not created; the pool size is read back from the service.
    pub async fn attach(
        info: MissionInfo,
        ports: MissionPorts,
        options: MissionOptions,
        tasks: Vec<Task>,
        downloaded: impl IntoIterator<Item = String>,
    ) -> AppResult<Self> {
        let mut mission = Self::new(info, ports, options)?;
        mission.tasks = tasks;
        mission.downloaded = downloaded.into_iter().collect();
        if let Some(pool) = mission.ports.batch.get_pool(&mission.info.pool_name).await? {
            mission.current_pool_size = pool
                .target
                .nodes_of(mission.info.node_type)
                .min(mission.info.max_nodes);
        }
        mission.container_url = Some(mission.issue_container_url()?);
        mission.state = MissionState::Idle;
        Ok(mission)
    }

    pub fn info(&self) -> &MissionInfo {
        &self.info
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn current_pool_size(&self) -> u32 {
        self.current_pool_size
    }

    pub fn downloaded(&self) -> impl Iterator<Item = &str> {
        self.downloaded.iter().map(String::as_str)
    }

    /// Number of tasks that occupy a node: submitted now or already remote.
    pub fn tasks_running_remotely(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.submission_state.runs_remotely())
            .count()
    }

    fn say(&self, message: impl AsRef<str>) {
        self.ports.progress.report(message.as_ref());
    }

    fn ensure_accepting(&self, operation: &str) -> AppResult<()> {
        match self.state {
            MissionState::Started | MissionState::Idle => Ok(()),
            MissionState::Created => Err(invalid_state(format!(
                "mission {} must be started before {operation}",
                self.info.name
            ))),
            MissionState::Submitting => Err(invalid_state(format!(
                "mission {} is busy submitting a case",
                self.info.name
            ))),
            MissionState::Completed => Err(invalid_state(format!(
                "mission {} is already completed",
                self.info.name
            ))),
        }
    }

    fn issue_container_url(&self) -> AppResult<String> {
        let now = self.ports.clock.now_utc();
        self.ports
            .storage
            .container_sas_url(&self.info.container_name, now, now + self.options.sas_validity)
    }

    /// Provision pool, job and container, then submit the cases queued at
    /// construction with the same flags.
    #[tracing::instrument(name = "mission.start", skip(self), fields(mission = %self.info.name))]
    pub async fn start(&mut self, flags: SubmitFlags) -> AppResult<Vec<CaseReport>> {
        if self.state != MissionState::Created {
            return Err(invalid_state(format!(
                "mission {} was already started",
                self.info.name
            )));
        }
        self.say(format!("Starting mission {}.", self.info.name));

        if !flags.skip_if_remote_exists {
            self.refuse_existing_resources().await?;
        }

        self.say("Creating/Updating the pool");
        self.ensure_pool(flags).await?;
        self.say("Creating/Updating the job");
        self.ensure_job(flags).await?;
        self.say("Creating/Updating the container");
        self.ensure_container(flags).await?;
        self.container_url = Some(self.issue_container_url()?);
        self.state = MissionState::Started;

        // Shrink a reused pool that is larger than this mission allows.
        if self.current_pool_size > self.info.max_nodes {
            self.force_resize(self.info.max_nodes).await?;
        }

        let queued = std::mem::take(&mut self.queued);
        let mut reports = Vec::with_capacity(queued.len());
        for case_path in queued {
            let result = self.add_task(&case_path, flags).await;
            if let Err(err) = &result
                && err.is_mission_fatal()
            {
                return Err(err.clone());
            }
            reports.push(CaseReport { case_path, result });
        }

        self.say(format!("Mission {} started.", self.info.name));
        Ok(reports)
    }

    async fn refuse_existing_resources(&self) -> AppResult<()> {
        let mut existing = Vec::new();
        if self.ports.batch.get_pool(&self.info.pool_name).await?.is_some() {
            existing.push(format!("pool {}", self.info.pool_name));
        }
        if self.ports.batch.get_job(&self.info.job_name).await?.is_some() {
            existing.push(format!("job {}", self.info.job_name));
        }
        if self
            .ports
            .storage
            .container_exists(&self.info.container_name)
            .await?
        {
            existing.push(format!("container {}", self.info.container_name));
        }
        if existing.is_empty() {
            return Ok(());
        }
        Err(AppError::with_message(
            AppErrorKind::Conflict,
            codes::CONFLICT,
            format!("{} already exist(s)", existing.join(", ")),
        ))
    }

    async fn ensure_pool(&mut self, flags: SubmitFlags) -> AppResult<()> {
        let pool_name = &self.info.pool_name;
        if let Some(pool) = self.ports.batch.get_pool(pool_name).await? {
            return self.reuse_pool(pool, flags);
        }
        let spec = task_spec::pool_spec(pool_name, self.info.vm_size);
        match self.ports.batch.create_pool(&spec).await {
            Ok(()) => {
                tracing::info!(pool = %pool_name, "pool created");
                self.current_pool_size = 0;
                Ok(())
            }
            Err(err) if err.kind() == AppErrorKind::Conflict && flags.skip_if_remote_exists => {
                // Created by someone else between the lookup and the create.
                let pool = self.ports.batch.get_pool(pool_name).await?.ok_or(err)?;
                self.reuse_pool(pool, flags)
            }
            Err(err) => Err(err),
        }
    }

    fn reuse_pool(&mut self, pool: PoolInfo, flags: SubmitFlags) -> AppResult<()> {
        if !flags.skip_if_remote_exists {
            return Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!("pool {} already exists", pool.id),
            ));
        }
        if pool.state == PoolState::Deleting {
            return Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!("pool {} is being deleted; try again later", pool.id),
            ));
        }
        if !pool.vm_size.eq_ignore_ascii_case(self.info.vm_size.as_str()) {
            tracing::warn!(
                pool = %pool.id,
                existing = %pool.vm_size,
                requested = %self.info.vm_size,
                "reusing pool with a different vm size"
            );
        }
        self.current_pool_size = pool.target.nodes_of(self.info.node_type);
        self.say(format!("Pool {} already exists. Reusing it.", pool.id));
        Ok(())
    }

    async fn ensure_job(&self, flags: SubmitFlags) -> AppResult<()> {
        let job_name = &self.info.job_name;
        if self.ports.batch.get_job(job_name).await?.is_some() {
            return self.reuse_existing("job", job_name, flags);
        }
        match self
            .ports
            .batch
            .create_job(job_name, &self.info.pool_name)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == AppErrorKind::Conflict => {
                self.reuse_existing("job", job_name, flags)
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_container(&self, flags: SubmitFlags) -> AppResult<()> {
        let container = &self.info.container_name;
        let mut attempts = 0;
        loop {
            match self.ports.storage.create_container(container).await? {
                ContainerCreation::Created => return Ok(()),
                ContainerCreation::AlreadyExists => {
                    return self.reuse_existing("container", container, flags);
                }
                ContainerCreation::BeingDeleted => {
                    attempts += 1;
                    if attempts > self.options.container_retry_limit {
                        return Err(AppError::with_message(
                            AppErrorKind::Network,
                            codes::TIMEOUT,
                            format!(
                                "container {container} is still being deleted after {attempts} attempts"
                            ),
                        ));
                    }
                    tracing::debug!(container = %container, attempts, "container is being deleted, retrying");
                    sleep(self.options.poll_interval).await;
                }
            }
        }
    }

    fn reuse_existing(&self, what: &str, name: &str, flags: SubmitFlags) -> AppResult<()> {
        if flags.skip_if_remote_exists {
            self.say(format!("The {what} {name} already exists. Reusing it."));
            Ok(())
        } else {
            Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!("{what} {name} already exists"),
            ))
        }
    }

    /// Upload one case folder and enqueue its remote task.
    ///
    /// The local folder is checked before anything talks to the service. A
    /// case whose identity already has a remote task is skipped or refused
    /// according to `flags`; at most one remote task exists per identity.
    #[tracing::instrument(name = "mission.add_task", skip(self, case_path, flags), fields(mission = %self.info.name, case = %case_path.display()))]
    pub async fn add_task(&mut self, case_path: &Path, flags: SubmitFlags) -> AppResult<TaskOutcome> {
        self.ensure_accepting("adding tasks")?;
        let case_path = if case_path.is_absolute() {
            case_path.to_path_buf()
        } else {
            self.ports.local_fs.current_dir().await?.join(case_path)
        };

        if !self.ports.local_fs.is_dir(&case_path).await? {
            if !flags.skip_if_local_missing {
                return Err(AppError::with_message(
                    AppErrorKind::NotFound,
                    codes::NOT_FOUND,
                    format!("case folder {} not found", case_path.display()),
                ));
            }
            let identifier = naming::case_identifier(&case_path).unwrap_or_else(|_| {
                case_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| case_path.display().to_string())
            });
            self.say(format!("Case folder {} not found. Skip.", case_path.display()));
            return Ok(self.record(
                &case_path,
                &identifier,
                SubmissionState::SkippedLocalMissing,
                "local folder not found",
            ));
        }
        let identifier = naming::case_identifier(&case_path)?;

        if self.known_remote(&identifier) {
            return self.existing_task(&case_path, &identifier, flags, "case already submitted by this mission");
        }
        let job_name = self.info.job_name.clone();
        if self
            .ports
            .batch
            .get_task(&job_name, &identifier)
            .await?
            .is_some()
        {
            return self.existing_task(&case_path, &identifier, flags, "task already exists remotely");
        }

        self.state = MissionState::Submitting;
        // Outer error: the upload failed. Inner error: the service refused the task.
        let enqueued = match self.upload_case(&case_path, &identifier).await {
            Ok(spec) => Ok(self.ports.batch.add_task(&job_name, &spec).await),
            Err(err) => Err(err),
        };
        self.state = MissionState::Idle;

        match enqueued {
            Ok(Ok(())) => {
                self.say(format!("Task {identifier} submitted."));
                Ok(self.record(&case_path, &identifier, SubmissionState::Submitted, "submitted"))
            }
            Ok(Err(err)) if err.kind() == AppErrorKind::Conflict => {
                self.existing_task(&case_path, &identifier, flags, "task already exists remotely")
            }
            Ok(Err(err)) | Err(err) => {
                self.record(&case_path, &identifier, SubmissionState::NotSubmitted, err.message());
                Err(err)
            }
        }
    }

    fn known_remote(&self, identifier: &str) -> bool {
        self.tasks.iter().any(|task| {
            task.remote_identifier == identifier && task.submission_state.runs_remotely()
        })
    }

    fn existing_task(
        &mut self,
        case_path: &Path,
        identifier: &str,
        flags: SubmitFlags,
        reason: &str,
    ) -> AppResult<TaskOutcome> {
        if !flags.skip_if_remote_exists {
            return Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!("{reason}: {identifier}"),
            ));
        }
        self.say(format!("Case {identifier} exists on the batch service. Skip."));
        if self.known_remote(identifier) {
            return Ok(TaskOutcome {
                case_path: case_path.to_path_buf(),
                identifier: identifier.to_string(),
                state: SubmissionState::SkippedRemoteExists,
                message: reason.to_string(),
            });
        }
        Ok(self.record(
            case_path,
            identifier,
            SubmissionState::SkippedRemoteExists,
            reason,
        ))
    }

    /// Track the latest state of a case, replacing an earlier entry with the
    /// same identity.
    fn record(
        &mut self,
        case_path: &Path,
        identifier: &str,
        state: SubmissionState,
        message: &str,
    ) -> TaskOutcome {
        let task = Task {
            local_case_path: case_path.to_path_buf(),
            remote_identifier: identifier.to_string(),
            submission_state: state,
        };
        match self
            .tasks
            .iter_mut()
            .find(|existing| existing.remote_identifier == identifier)
        {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        TaskOutcome {
            case_path: case_path.to_path_buf(),
            identifier: identifier.to_string(),
            state,
            message: message.to_string(),
        }
    }

    /// Upload the case folder and build the task that consumes it.
    async fn upload_case(&self, case_path: &Path, identifier: &str) -> AppResult<TaskSpec> {
        let container_url = self
            .container_url
            .clone()
            .ok_or_else(|| invalid_state("container access has not been issued"))?;
        let plan = upload_plan::build_upload_plan(case_path, identifier, &self.options.upload_rules)?;
        if plan.items.is_empty() {
            return Err(invalid_argument(format!(
                "case folder {} has no files to upload",
                case_path.display()
            )));
        }
        self.say(format!(
            "Uploading {} file(s) ({} bytes) of case {identifier}.",
            plan.items.len(),
            plan.total_bytes()
        ));
        self.upload_items(identifier, &plan.items).await?;
        Ok(task_spec::case_task_spec(identifier, &container_url))
    }

    async fn upload_items(&self, identifier: &str, items: &[UploadItem]) -> AppResult<()> {
        let storage = &self.ports.storage;
        let container = self.info.container_name.as_str();
        let results = stream::iter(items.iter().map(|item| async move {
            storage
                .upload_file(container, &item.blob_name, &item.local_path)
                .await
                .map_err(|err| err.with_context(item.blob_name.clone()))
        }))
        .buffer_unordered(self.options.upload_parallelism)
        .collect::<Vec<_>>()
        .await;

        let errs: Vec<AppError> = results.into_iter().filter_map(Result::err).collect();
        let Some(first) = errs.first() else {
            return Ok(());
        };
        use std::fmt::Write as _;
        let mut msg = String::new();
        for (i, err) in errs.iter().enumerate() {
            let _ = writeln!(&mut msg, "[{}] {}", i + 1, err);
        }
        Err(AppError::with_message(
            first.kind(),
            first.code(),
            format!(
                "uploading case {identifier} failed for {} of {} file(s):\n{}",
                errs.len(),
                items.len(),
                msg.trim_end()
            ),
        ))
    }

    /// Request a pool of `min(target, max_nodes)` nodes without waiting for
    /// the allocation. An in-flight resize is stopped first.
    #[tracing::instrument(name = "mission.force_resize", skip(self), fields(mission = %self.info.name))]
    pub async fn force_resize(&mut self, target: u32) -> AppResult<ResizeOutcome> {
        self.ensure_accepting("resizing")?;
        let effective = target.min(self.info.max_nodes);
        resize::check_core_quota(effective, self.info.vm_size, self.options.core_quota)?;

        let pool_name = self.info.pool_name.clone();
        let pool = self.ports.batch.get_pool(&pool_name).await?.ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("pool {pool_name} does not exist"),
            )
        })?;
        let current = pool.target.nodes_of(self.info.node_type);
        if current == effective {
            self.current_pool_size = effective;
            tracing::info!(nodes = effective, "pool already has the requested size");
            return Ok(ResizeOutcome::Unchanged { nodes: effective });
        }

        if pool.allocation_state != AllocationState::Steady {
            self.say(format!("Stopping the ongoing resize of pool {pool_name}."));
            self.ports.batch.stop_resize(&pool_name).await?;
            self.wait_until_steady(&pool_name).await?;
        }

        self.ports
            .batch
            .resize_pool(&pool_name, NodeTarget::for_type(self.info.node_type, effective))
            .await?;
        self.current_pool_size = effective;
        self.say(format!(
            "Resizing pool {pool_name} from {current} to {effective} node(s)."
        ));
        Ok(ResizeOutcome::Requested {
            from: current,
            to: effective,
        })
    }

    async fn wait_until_steady(&self, pool_name: &str) -> AppResult<()> {
        for _ in 0..self.options.resize_settle_attempts {
            match self.ports.batch.get_pool(pool_name).await? {
                Some(pool) if pool.allocation_state == AllocationState::Steady => return Ok(()),
                Some(_) => sleep(self.options.poll_interval).await,
                None => {
                    return Err(AppError::with_message(
                        AppErrorKind::NotFound,
                        codes::NOT_FOUND,
                        format!("pool {pool_name} disappeared while stopping a resize"),
                    ));
                }
            }
        }
        Err(AppError::with_message(
            AppErrorKind::Network,
            codes::TIMEOUT,
            format!("pool {pool_name} did not settle after stopping its resize"),
        ))
    }

    /// Resize to the number of unfinished remote tasks, capped at `max_nodes`.
    pub async fn adapt_size(&mut self) -> AppResult<ResizeOutcome> {
        let tasks = self.ports.batch.list_tasks(&self.info.job_name).await?;
        let unfinished = TaskCounts::from_tasks(&tasks).unfinished();
        self.force_resize(resize::adaptive_target(unfinished, self.info.max_nodes))
            .await
    }

    pub async fn status(&self) -> AppResult<MissionStatus> {
        let pool = self.ports.batch.get_pool(&self.info.pool_name).await?;
        let job = self.ports.batch.get_job(&self.info.job_name).await?;
        let tasks = match &job {
            Some(_) => self.ports.batch.list_tasks(&self.info.job_name).await?,
            None => Vec::new(),
        };
        let container_exists = self
            .ports
            .storage
            .container_exists(&self.info.container_name)
            .await?;
        let mut case_dirs: BTreeMap<String, DirUsage> = BTreeMap::new();
        if container_exists {
            for blob in self
                .ports
                .storage
                .list_blobs(&self.info.container_name, None)
                .await?
            {
                let Some((dir, _)) = blob.name.split_once('/') else {
                    continue;
                };
                let usage = case_dirs.entry(dir.to_string()).or_default();
                usage.files += 1;
                usage.bytes += blob.size;
            }
        }
        Ok(MissionStatus {
            generated_at: self.ports.clock.now_utc(),
            info: self.info.clone(),
            pool,
            job,
            tasks,
            container_exists,
            case_dirs,
        })
    }

    /// Fetch the results of one case next to its local folder.
    #[tracing::instrument(name = "mission.download", skip(self, options), fields(mission = %self.info.name))]
    pub async fn download_case(
        &mut self,
        identifier: &str,
        options: DownloadOptions,
    ) -> AppResult<DownloadOutcome> {
        if self.downloaded.contains(identifier) {
            tracing::info!(case = %identifier, "already downloaded, skipping");
            return Ok(DownloadOutcome::AlreadyDownloaded);
        }
        let task = self
            .tasks
            .iter()
            .find(|task| task.remote_identifier == identifier)
            .ok_or_else(|| {
                AppError::with_message(
                    AppErrorKind::NotFound,
                    codes::NOT_FOUND,
                    format!("case {identifier} is not part of mission {}", self.info.name),
                )
            })?;
        let dest_root = task
            .local_case_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                invalid_argument(format!(
                    "case {} has no parent folder",
                    task.local_case_path.display()
                ))
            })?;

        let prefix = format!("{identifier}/");
        let blobs = self
            .ports
            .storage
            .list_blobs(&self.info.container_name, Some(&prefix))
            .await?;
        let wanted: Vec<_> = blobs
            .into_iter()
            .filter(|blob| options.wants(&blob.name))
            .collect();
        if wanted.is_empty() {
            return Ok(DownloadOutcome::NothingToDownload);
        }

        self.say(format!("Downloading {} file(s) of case {identifier}.", wanted.len()));
        for blob in &wanted {
            let local_path = download_filter::local_destination(&dest_root, &blob.name);
            if let Some(parent) = local_path.parent() {
                self.ports.local_fs.create_dir_all(parent).await?;
            }
            self.ports
                .storage
                .download_file(&self.info.container_name, &blob.name, &local_path)
                .await
                .map_err(|err| err.with_context(blob.name.clone()))?;
        }
        self.downloaded.insert(identifier.to_string());
        Ok(DownloadOutcome::Downloaded { files: wanted.len() })
    }

    /// Poll the job until every task has finished, downloading finished cases
    /// and optionally shrinking the pool as tasks complete.
    #[tracing::instrument(name = "mission.wait", skip(self, options), fields(mission = %self.info.name))]
    pub async fn wait_and_download(&mut self, options: &WaitOptions) -> AppResult<WaitSummary> {
        let mut summary = WaitSummary::default();
        loop {
            summary.cycles += 1;
            let tasks = self.ports.batch.list_tasks(&self.info.job_name).await?;
            let counts = TaskCounts::from_tasks(&tasks);
            self.say(format!(
                "{} task(s): {} waiting, {} running, {} completed, {} failed",
                counts.total, counts.active, counts.running, counts.completed, counts.failed
            ));

            if let Some(download) = options.download {
                for task in tasks.iter().filter(|task| task.state.is_finished()) {
                    if self.downloaded.contains(&task.id) || !self.knows(&task.id) {
                        continue;
                    }
                    self.say(format!("Task {} {}. Downloading.", task.id, task.state.as_str()));
                    match self.download_case(&task.id, download).await {
                        Ok(DownloadOutcome::Downloaded { .. }) => {
                            summary.downloaded.push(task.id.clone());
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(case = %task.id, "download failed: {err}");
                            summary.download_errors.push((task.id.clone(), err));
                        }
                    }
                }
            }

            if counts.unfinished() == 0 {
                if options.adapt_size && self.current_pool_size != 0 {
                    self.force_resize(0).await?;
                }
                summary.all_finished = true;
                summary.completed = ids_in_state(&tasks, RemoteTaskState::Completed);
                summary.failed = ids_in_state(&tasks, RemoteTaskState::Failed);
                return Ok(summary);
            }

            if options.adapt_size {
                let target = resize::adaptive_target(counts.unfinished(), self.info.max_nodes);
                if target != self.current_pool_size {
                    self.force_resize(target).await?;
                }
            }

            if options.max_cycles.is_some_and(|max| summary.cycles >= max) {
                summary.completed = ids_in_state(&tasks, RemoteTaskState::Completed);
                summary.failed = ids_in_state(&tasks, RemoteTaskState::Failed);
                return Ok(summary);
            }
            sleep(self.options.poll_interval).await;
        }
    }

    fn knows(&self, identifier: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.remote_identifier == identifier)
    }

    /// Delete container, job and pool. Absent resources are not an error.
    #[tracing::instrument(name = "mission.clear", skip(self), fields(mission = %self.info.name))]
    pub async fn clear_resources(&mut self) -> AppResult<ClearReport> {
        self.say("Delete storage container.");
        let container_deleted = self
            .ports
            .storage
            .delete_container(&self.info.container_name)
            .await?;
        self.say("Delete job.");
        let job_deleted = self.ports.batch.delete_job(&self.info.job_name).await?;
        self.say("Delete pool.");
        let pool_deleted = self.ports.batch.delete_pool(&self.info.pool_name).await?;
        self.current_pool_size = 0;
        self.state = MissionState::Completed;
        tracing::info!("mission {} completed", self.info.name);
        Ok(ClearReport {
            container_deleted,
            job_deleted,
            pool_deleted,
        })
    }

    /// Stop accepting work; remote resources stay as they are.
    pub fn finish(&mut self) -> AppResult<()> {
        self.ensure_accepting("finishing")?;
        self.state = MissionState::Completed;
        Ok(())
    }
}

fn ids_in_state(tasks: &[RemoteTask], state: RemoteTaskState) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| task.state == state)
        .map(|task| task.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fs::LocalFilesystem;
    use crate::adapters::memory::InMemoryAzure;
    use crate::adapters::progress::RecordingProgress;
    use crate::adapters::time::FixedClock;
    use crate::app::types::{NodeType, VmSize};
    use std::fs;
    use tempfile::TempDir;
    use time::macros::datetime;

    struct Harness {
        azure: Arc<InMemoryAzure>,
        progress: Arc<RecordingProgress>,
        ports: MissionPorts,
        cases: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_azure(InMemoryAzure::new())
        }

        fn with_azure(azure: InMemoryAzure) -> Self {
            let azure = Arc::new(azure);
            let progress = Arc::new(RecordingProgress::default());
            let ports = MissionPorts {
                batch: azure.clone(),
                storage: azure.clone(),
                local_fs: Arc::new(LocalFilesystem::new()),
                clock: Arc::new(FixedClock(datetime!(2026-03-01 12:00 UTC))),
                progress: progress.clone(),
            };
            Self {
                azure,
                progress,
                ports,
                cases: tempfile::tempdir().unwrap(),
            }
        }

        fn case(&self, name: &str) -> PathBuf {
            let dir = self.cases.path().join(name);
            fs::create_dir_all(dir.join("_output")).unwrap();
            fs::write(dir.join("setrun.py"), "rundata").unwrap();
            fs::write(dir.join("hydro_feats.dat"), "feats").unwrap();
            dir
        }

        fn mission(&self, max_nodes: u32) -> Mission {
            self.mission_with(max_nodes, MissionOptions::default())
        }

        fn mission_with(&self, max_nodes: u32, options: MissionOptions) -> Mission {
            let info = MissionInfo::new("gulf", max_nodes, VmSize::StandardH8, NodeType::Dedicated)
                .unwrap();
            let options = MissionOptions {
                poll_interval: Duration::ZERO,
                ..options
            };
            Mission::new(info, self.ports.clone(), options).unwrap()
        }
    }

    fn strict() -> SubmitFlags {
        SubmitFlags {
            skip_if_local_missing: false,
            skip_if_remote_exists: false,
        }
    }

    #[tokio::test]
    async fn start_creates_empty_pool_job_and_container() {
        let h = Harness::new();
        let mut mission = h.mission(4);
        let reports = mission.start(SubmitFlags::default()).await.unwrap();
        assert!(reports.is_empty());
        assert_eq!(mission.state(), MissionState::Started);
        assert_eq!(mission.current_pool_size(), 0);
        let pool = h.azure.pool("gulf-pool").unwrap();
        assert_eq!(pool.target, NodeTarget::default());
        assert_eq!(h.azure.count_calls("create_job"), 1);
        assert_eq!(h.azure.count_calls("create_container"), 1);
        assert!(h.progress.lines().iter().any(|l| l == "Mission gulf started."));
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let err = mission.start(SubmitFlags::default()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn start_conflicts_on_existing_pool_without_skip() {
        let h = Harness::new();
        h.azure
            .insert_pool("gulf-pool", NodeTarget::default(), AllocationState::Steady);
        let mut mission = h.mission(2);
        let err = mission.start(strict()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Conflict);
        assert!(err.message().contains("gulf-pool"));
        assert_eq!(h.azure.count_calls("create_pool"), 0);
        assert_eq!(h.azure.count_calls("create_job"), 0);
        assert_eq!(mission.state(), MissionState::Created);
    }

    #[tokio::test]
    async fn start_reuses_existing_resources_with_skip() {
        let h = Harness::new();
        h.azure.insert_pool(
            "gulf-pool",
            NodeTarget::for_type(NodeType::Dedicated, 2),
            AllocationState::Steady,
        );
        h.azure.insert_job("gulf-job");
        h.azure.insert_container("gulf-container");
        let mut mission = h.mission(4);
        mission.start(SubmitFlags::default()).await.unwrap();
        assert_eq!(mission.current_pool_size(), 2);
        assert_eq!(h.azure.count_calls("create_pool"), 0);
        assert_eq!(h.azure.count_calls("create_job"), 0);
    }

    #[tokio::test]
    async fn start_shrinks_reused_pool_above_max_nodes() {
        let h = Harness::new();
        h.azure.insert_pool(
            "gulf-pool",
            NodeTarget::for_type(NodeType::Dedicated, 10),
            AllocationState::Steady,
        );
        let mut mission = h.mission(3);
        mission.start(SubmitFlags::default()).await.unwrap();
        assert_eq!(mission.current_pool_size(), 3);
        assert_eq!(h.azure.pool("gulf-pool").unwrap().target.dedicated, 3);
    }

    #[tokio::test]
    async fn start_waits_for_container_deletion() {
        let h = Harness::new();
        h.azure.mark_container_deleting("gulf-container", 2);
        let mut mission = h.mission(1);
        mission.start(SubmitFlags::default()).await.unwrap();
        assert_eq!(h.azure.count_calls("create_container"), 3);
    }

    #[tokio::test]
    async fn start_gives_up_on_container_stuck_in_deletion() {
        let h = Harness::new();
        h.azure.mark_container_deleting("gulf-container", 10);
        let mut mission = h.mission_with(
            1,
            MissionOptions {
                container_retry_limit: 3,
                ..MissionOptions::default()
            },
        );
        let err = mission.start(SubmitFlags::default()).await.unwrap_err();
        assert_eq!(err.code(), codes::TIMEOUT);
    }

    #[tokio::test]
    async fn start_submits_cases_queued_at_construction() {
        let h = Harness::new();
        let cases = vec![h.case("point_01"), h.cases.path().join("absent"), h.case("point_02")];
        let mut mission = h.mission(2).with_cases(cases);
        let reports = mission.start(SubmitFlags::default()).await.unwrap();
        let states: Vec<SubmissionState> = reports
            .iter()
            .map(|r| r.result.as_ref().unwrap().state)
            .collect();
        assert_eq!(
            states,
            vec![
                SubmissionState::Submitted,
                SubmissionState::SkippedLocalMissing,
                SubmissionState::Submitted,
            ]
        );
        assert_eq!(h.azure.task_ids("gulf-job"), vec!["point_01", "point_02"]);
    }

    #[tokio::test]
    async fn add_task_before_start_is_invalid_state() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        let err = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn add_task_uploads_case_and_enqueues_one_task() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let case = h.case("point_01");
        fs::create_dir_all(case.join("__pycache__")).unwrap();
        fs::write(case.join("__pycache__/x.pyc"), "x").unwrap();

        let outcome = mission.add_task(&case, SubmitFlags::default()).await.unwrap();
        assert_eq!(outcome.state, SubmissionState::Submitted);
        assert_eq!(outcome.identifier, "point_01");
        assert_eq!(mission.state(), MissionState::Idle);
        assert_eq!(
            h.azure.blob_names("gulf-container"),
            vec!["point_01/hydro_feats.dat", "point_01/setrun.py"]
        );
        let spec = h.azure.task_spec("gulf-job", "point_01").unwrap();
        assert_eq!(spec.input_container_url, "memory://gulf-container?se=1774958400");
        assert_eq!(spec.input_blob_prefix, "point_01/");
    }

    #[tokio::test]
    async fn add_task_twice_yields_one_remote_task() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let case = h.case("point_01");

        mission.add_task(&case, SubmitFlags::default()).await.unwrap();
        let second = mission.add_task(&case, SubmitFlags::default()).await.unwrap();
        assert_eq!(second.state, SubmissionState::SkippedRemoteExists);
        assert!(second.is_skipped());
        assert_eq!(h.azure.count_calls("add_task"), 1);
        assert_eq!(h.azure.task_ids("gulf-job").len(), 1);
        assert_eq!(mission.tasks().len(), 1);
        assert_eq!(mission.tasks()[0].submission_state, SubmissionState::Submitted);
    }

    #[tokio::test]
    async fn add_task_twice_without_skip_conflicts() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let case = h.case("point_01");
        mission.add_task(&case, strict()).await.unwrap();
        let err = mission.add_task(&case, strict()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Conflict);
        assert_eq!(h.azure.count_calls("add_task"), 1);
    }

    #[tokio::test]
    async fn task_already_on_service_is_skipped_without_upload() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let spec = task_spec::case_task_spec("point_01", "memory://gulf-container");
        h.azure.add_task("gulf-job", &spec).await.unwrap();
        h.azure.clear_calls();

        let outcome = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, SubmissionState::SkippedRemoteExists);
        assert_eq!(h.azure.count_calls("upload_file"), 0);
        assert_eq!(h.azure.count_calls("add_task"), 0);
        assert_eq!(mission.tasks_running_remotely(), 1);
    }

    #[tokio::test]
    async fn remote_add_conflict_counts_as_existing_task() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.fail_next(
            "add_task",
            AppError::with_message(AppErrorKind::Conflict, codes::CONFLICT, "TaskExists"),
        );
        let outcome = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, SubmissionState::SkippedRemoteExists);
    }

    #[tokio::test]
    async fn missing_case_without_skip_fails_before_any_network_call() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.clear_calls();

        let err = mission
            .add_task(&h.cases.path().join("nowhere"), strict())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::NotFound);
        assert!(h.azure.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_case_with_skip_is_recorded() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.clear_calls();
        let outcome = mission
            .add_task(&h.cases.path().join("nowhere"), SubmitFlags::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, SubmissionState::SkippedLocalMissing);
        assert!(h.azure.calls().is_empty());
        assert_eq!(mission.tasks_running_remotely(), 0);
    }

    #[tokio::test]
    async fn missing_case_with_unusable_name_follows_local_flags() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.clear_calls();
        let missing = h.cases.path().join("point 01");

        let outcome = mission
            .add_task(&missing, SubmitFlags::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, SubmissionState::SkippedLocalMissing);
        assert_eq!(outcome.identifier, "point 01");

        let err = mission.add_task(&missing, strict()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::NotFound);
        assert!(h.azure.calls().is_empty());
    }

    #[tokio::test]
    async fn existing_case_with_unusable_name_is_invalid_argument() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let err = mission
            .add_task(&h.case("point 01"), SubmitFlags::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_conflict_is_not_mistaken_for_existing_task() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.fail_next(
            "upload_file",
            AppError::with_message(AppErrorKind::Conflict, codes::CONFLICT, "LeaseIdMissing"),
        );
        let err = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Conflict);
        assert_eq!(h.azure.count_calls("add_task"), 0);
        assert_eq!(mission.tasks()[0].submission_state, SubmissionState::NotSubmitted);
    }

    #[tokio::test]
    async fn failed_upload_aborts_only_that_task() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.fail_next(
            "upload_file",
            AppError::with_message(AppErrorKind::Network, codes::NETWORK_ERROR, "reset"),
        );
        let err = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Network);
        assert!(err.message().contains("1 of 2"));
        assert_eq!(mission.state(), MissionState::Idle);
        assert_eq!(mission.tasks()[0].submission_state, SubmissionState::NotSubmitted);

        let retry = mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap();
        assert_eq!(retry.state, SubmissionState::Submitted);
        assert_eq!(mission.tasks().len(), 1);
    }

    #[tokio::test]
    async fn force_resize_clamps_to_max_nodes() {
        let h = Harness::new();
        let mut mission = h.mission(3);
        mission.start(SubmitFlags::default()).await.unwrap();
        for target in [10, 0, 2, 7, 3] {
            mission.force_resize(target).await.unwrap();
            assert!(mission.current_pool_size() <= 3);
        }
        assert_eq!(h.azure.pool("gulf-pool").unwrap().target.dedicated, 3);
    }

    #[tokio::test]
    async fn force_resize_to_current_size_is_a_noop() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        mission.force_resize(2).await.unwrap();
        let outcome = mission.force_resize(5).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::Unchanged { nodes: 2 });
        assert_eq!(h.azure.count_calls("resize_pool"), 1);
    }

    #[tokio::test]
    async fn force_resize_stops_inflight_resize_first() {
        let h = Harness::new();
        h.azure.insert_pool(
            "gulf-pool",
            NodeTarget::for_type(NodeType::Dedicated, 1),
            AllocationState::Resizing,
        );
        let mut mission = h.mission(4);
        mission.start(SubmitFlags::default()).await.unwrap();
        let outcome = mission.force_resize(4).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::Requested { from: 1, to: 4 });
        let calls = h.azure.calls();
        let stop = calls.iter().position(|c| c == "stop_resize gulf-pool").unwrap();
        let resize = calls.iter().position(|c| c == "resize_pool gulf-pool").unwrap();
        assert!(stop < resize);
    }

    #[tokio::test]
    async fn force_resize_beyond_core_quota_fails_without_retry() {
        let h = Harness::new();
        let mut mission = h.mission_with(
            4,
            MissionOptions {
                core_quota: Some(16),
                ..MissionOptions::default()
            },
        );
        mission.start(SubmitFlags::default()).await.unwrap();
        let err = mission.force_resize(3).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Quota);
        assert_eq!(h.azure.count_calls("resize_pool"), 0);
        assert_eq!(mission.current_pool_size(), 0);
    }

    #[tokio::test]
    async fn service_quota_failure_is_not_retried() {
        let h = Harness::new();
        let mut mission = h.mission(4);
        mission.start(SubmitFlags::default()).await.unwrap();
        h.azure.fail_next(
            "resize_pool",
            AppError::with_message(AppErrorKind::Quota, codes::QUOTA_EXCEEDED, "AccountCoreQuotaReached"),
        );
        let err = mission.force_resize(4).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Quota);
        assert_eq!(h.azure.count_calls("resize_pool"), 1);
    }

    #[tokio::test]
    async fn status_reports_pool_tasks_and_dirs() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap();
        let status = mission.status().await.unwrap();
        assert_eq!(status.counts().total, 1);
        assert_eq!(status.case_dirs["point_01"].files, 2);
        let rendered = status.to_string();
        assert!(rendered.contains("Pool (cluster) name: gulf-pool"));
        assert!(rendered.contains("\tpoint_01: active"));
        assert!(rendered.contains("\tpoint_01: 2 file(s), 12 bytes"));
    }

    #[tokio::test]
    async fn download_skips_raw_output_and_marks_case() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        let case = h.case("point_01");
        mission.add_task(&case, SubmitFlags::default()).await.unwrap();
        h.azure
            .insert_blob("gulf-container", "point_01/_output/fort.q0001", b"raw");
        h.azure
            .insert_blob("gulf-container", "point_01/point_01.nc", b"netcdf");

        let outcome = mission
            .download_case("point_01", DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded { files: 3 });
        assert_eq!(fs::read(case.join("point_01.nc")).unwrap(), b"netcdf");
        assert!(!case.join("_output/fort.q0001").exists());

        let again = mission
            .download_case("point_01", DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(again, DownloadOutcome::AlreadyDownloaded);
    }

    #[tokio::test]
    async fn wait_and_download_runs_until_all_tasks_finish() {
        let h = Harness::with_azure(InMemoryAzure::with_auto_progress());
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        for name in ["point_01", "point_02", "point_03"] {
            mission.add_task(&h.case(name), SubmitFlags::default()).await.unwrap();
        }
        mission.force_resize(2).await.unwrap();

        let summary = mission
            .wait_and_download(&WaitOptions {
                download: Some(DownloadOptions::default()),
                adapt_size: true,
                max_cycles: Some(10),
            })
            .await
            .unwrap();
        assert!(summary.all_finished);
        assert_eq!(summary.completed.len(), 3);
        assert_eq!(summary.downloaded.len(), 3);
        assert!(summary.download_errors.is_empty());
        assert_eq!(mission.current_pool_size(), 0);
    }

    #[tokio::test]
    async fn wait_stops_after_max_cycles() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        mission.start(SubmitFlags::default()).await.unwrap();
        mission
            .add_task(&h.case("point_01"), SubmitFlags::default())
            .await
            .unwrap();
        let summary = mission
            .wait_and_download(&WaitOptions {
                max_cycles: Some(2),
                ..WaitOptions::default()
            })
            .await
            .unwrap();
        assert!(!summary.all_finished);
        assert_eq!(summary.cycles, 2);
    }

    #[tokio::test]
    async fn clear_resources_tolerates_absence_and_completes() {
        let h = Harness::new();
        let mut mission = h.mission(2);
        let report = mission.clear_resources().await.unwrap();
        assert_eq!(report, ClearReport::default());
        assert_eq!(mission.state(), MissionState::Completed);

        let err = mission.force_resize(1).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn attach_restores_tasks_and_pool_size() {
        let h = Harness::new();
        h.azure.insert_pool(
            "gulf-pool",
            NodeTarget::for_type(NodeType::Dedicated, 2),
            AllocationState::Steady,
        );
        let info = MissionInfo::new("gulf", 4, VmSize::StandardH8, NodeType::Dedicated).unwrap();
        let tasks = vec![Task {
            local_case_path: h.case("point_01"),
            remote_identifier: "point_01".to_string(),
            submission_state: SubmissionState::Submitted,
        }];
        let mission = Mission::attach(
            info,
            h.ports.clone(),
            MissionOptions::default(),
            tasks,
            vec!["point_01".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(mission.state(), MissionState::Idle);
        assert_eq!(mission.current_pool_size(), 2);
        assert_eq!(mission.downloaded().collect::<Vec<_>>(), vec!["point_01"]);
    }
}
