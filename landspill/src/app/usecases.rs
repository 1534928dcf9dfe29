// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::{AppError, AppResult};
use crate::app::mission::{CaseReport, Mission, MissionOptions, MissionPorts};
use crate::app::services::mission_record::MissionRecord;
use crate::app::services::{resize, validation};
use crate::app::services::validation::SubmissionConfig;
use crate::app::types::{MissionInfo, ResizeOutcome, SubmissionState};

/// What happened during one submission run.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub mission: MissionInfo,
    pub cases: Vec<CaseReport>,
    pub resizes: Vec<ResizeOutcome>,
    /// Resize failures are reported, never retried, and do not stop submission.
    pub resize_errors: Vec<AppError>,
    pub final_pool_size: u32,
}

impl SubmissionReport {
    pub fn count(&self, state: SubmissionState) -> usize {
        self.cases
            .iter()
            .filter(|case| matches!(&case.result, Ok(outcome) if outcome.state == state))
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Path, &AppError)> {
        self.cases.iter().filter_map(|case| match &case.result {
            Err(err) => Some((case.case_path.as_path(), err)),
            Ok(_) => None,
        })
    }
}

#[derive(Clone)]
pub struct UseCases {
    pub(crate) ports: MissionPorts,
    pub(crate) options: MissionOptions,
}

impl UseCases {
    pub fn new(ports: MissionPorts, options: MissionOptions) -> Self {
        Self { ports, options }
    }

    fn options_for(&self, config: &SubmissionConfig) -> MissionOptions {
        MissionOptions {
            upload_parallelism: config.upload_parallelism,
            core_quota: config.core_quota.or(self.options.core_quota),
            ..self.options.clone()
        }
    }

    /// Start a mission and submit every case in order.
    ///
    /// The pool grows to `max_nodes` once the case at index `max_nodes - 1`
    /// has been handled, and is set to the number of tasks that will actually
    /// run after the last case. A failing case is reported and the loop moves
    /// on; only mission-level failures abort the run. When `record_path` is
    /// given the mission record is rewritten after every case.
    #[tracing::instrument(name = "submission", skip_all, fields(mission = %config.mission_name, cases = config.case_paths.len()))]
    pub async fn submit(
        &self,
        config: &SubmissionConfig,
        record_path: Option<&Path>,
    ) -> AppResult<(Mission, SubmissionReport)> {
        let info = validation::resolve_mission(config)?;
        let mut mission = Mission::new(info.clone(), self.ports.clone(), self.options_for(config))?;
        let mut record = MissionRecord::new(&info, self.ports.clock.now_utc());
        let mut report = SubmissionReport {
            mission: info.clone(),
            cases: Vec::with_capacity(config.case_paths.len()),
            resizes: Vec::new(),
            resize_errors: Vec::new(),
            final_pool_size: 0,
        };

        mission.start(config.flags).await?;
        self.save_record(&mission, &mut record, record_path)?;

        for (index, case_path) in config.case_paths.iter().enumerate() {
            let result = mission.add_task(case_path, config.flags).await;
            match &result {
                Ok(outcome) => {
                    tracing::info!(case = %outcome.identifier, state = outcome.state.as_str(), "case handled");
                }
                Err(err) if err.is_mission_fatal() => return Err(err.clone()),
                Err(err) => {
                    tracing::warn!(case = %case_path.display(), code = err.code(), "case failed: {err}");
                    self.ports
                        .progress
                        .report(&format!("Case {} failed: {err}", case_path.display()));
                }
            }
            report.cases.push(CaseReport {
                case_path: case_path.clone(),
                result,
            });
            self.save_record(&mission, &mut record, record_path)?;

            if let Some(target) = resize::checkpoint_target(index, info.max_nodes) {
                Self::resize_step(&mut mission, target, &mut report).await?;
            }
        }

        let target = resize::final_target(mission.tasks_running_remotely(), info.max_nodes);
        Self::resize_step(&mut mission, target, &mut report).await?;
        report.final_pool_size = mission.current_pool_size();
        self.save_record(&mission, &mut record, record_path)?;

        Ok((mission, report))
    }

    async fn resize_step(
        mission: &mut Mission,
        target: u32,
        report: &mut SubmissionReport,
    ) -> AppResult<()> {
        match mission.force_resize(target).await {
            Ok(outcome) => {
                report.resizes.push(outcome);
                Ok(())
            }
            Err(err) if err.is_mission_fatal() => Err(err),
            Err(err) => {
                tracing::warn!(target_nodes = target, code = err.code(), "resize failed: {err}");
                report.resize_errors.push(err);
                Ok(())
            }
        }
    }

    fn save_record(
        &self,
        mission: &Mission,
        record: &mut MissionRecord,
        path: Option<&Path>,
    ) -> AppResult<()> {
        let Some(path) = path else {
            return Ok(());
        };
        let downloaded: Vec<String> = mission.downloaded().map(str::to_string).collect();
        record.update_tasks(mission.tasks(), &downloaded, self.ports.clock.now_utc());
        record.save(path)
    }

    /// Re-open a mission from its record.
    pub async fn attach(&self, record: &MissionRecord) -> AppResult<Mission> {
        let info = record.mission_info()?;
        Mission::attach(
            info,
            self.ports.clone(),
            self.options.clone(),
            record.tasks(),
            record.downloaded(),
        )
        .await
    }

    /// Write the mission's task list and download marks back to `path`.
    pub fn persist(&self, mission: &Mission, record: &mut MissionRecord, path: &Path) -> AppResult<()> {
        self.save_record(mission, record, Some(path))
    }
}
