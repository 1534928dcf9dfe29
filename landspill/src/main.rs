// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Duration;

use landspill::adapters::azure::{AzureBatchClient, AzureBlobClient};
use landspill::adapters::cli::{self, Cmd, DownloadArgs, EncryptCredentialArgs, SubmitArgs, WaitArgs};
use landspill::adapters::fs::LocalFilesystem;
use landspill::adapters::memory::InMemoryAzure;
use landspill::adapters::progress::ConsoleProgress;
use landspill::adapters::time::SystemClock;
use landspill::app::mission::{DownloadOutcome, Mission, MissionOptions, MissionPorts, WaitOptions};
use landspill::app::ports::{BatchServicePort, BlobStoragePort};
use landspill::app::services::credential_vault::{self, CredentialStore};
use landspill::app::services::download_filter::DownloadOptions;
use landspill::app::services::mission_record::{self, MissionRecord};
use landspill::app::services::upload_plan::FilterRule;
use landspill::app::services::validation::SubmissionConfig;
use landspill::app::types::SubmissionState;
use landspill::app::usecases::UseCases;
use landspill::config::{self, Config, LoadResult};

struct Session {
    config: Config,
    passcode: Option<String>,
    dry_run: bool,
    quiet: bool,
    upload_rules: Vec<FilterRule>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;

    let mut overrides = config::Overrides {
        credential_path: opts.credential.clone(),
        working_dir: opts.working_dir.clone(),
        verbose: parsed.verbose_override,
        ..config::Overrides::default()
    };
    if let Cmd::Submit(args) = &opts.cmd {
        overrides.vm_size = args.vm_size.clone();
        overrides.node_type = args.node_type.clone();
        overrides.max_nodes = args.max_nodes;
        overrides.upload_parallelism = args.upload_parallelism;
        overrides.core_quota = args.core_quota;
    }
    let LoadResult { config, report } = config::load_with_report(opts.config.clone(), overrides)?;
    landspill::logging::init(config.verbose);
    report.log();

    let ctx = Session {
        config,
        passcode: opts.passcode,
        dry_run: opts.dry_run,
        quiet: opts.quiet,
        upload_rules: parsed.upload_rules,
    };
    match opts.cmd {
        Cmd::EncryptCredential(args) => encrypt_credential(&ctx, &args),
        Cmd::Submit(args) => submit(&ctx, args).await,
        Cmd::Resize(args) => {
            let (usecases, mut mission, mut record, path) = attach(&ctx, &args.mission).await?;
            let outcome = mission.force_resize(args.nodes).await?;
            usecases.persist(&mission, &mut record, &path)?;
            println!("Pool {}: {outcome:?}", mission.info().pool_name);
            Ok(())
        }
        Cmd::Status(args) => {
            let (_, mission, _, _) = attach(&ctx, &args.mission).await?;
            print!("{}", mission.status().await?);
            Ok(())
        }
        Cmd::Download(args) => download(&ctx, args).await,
        Cmd::Wait(args) => wait(&ctx, args).await,
        Cmd::Clear(args) => {
            let (usecases, mut mission, mut record, path) = attach(&ctx, &args.mission).await?;
            let report = mission.clear_resources().await?;
            usecases.persist(&mission, &mut record, &path)?;
            println!(
                "container deleted: {}, job deleted: {}, pool deleted: {}",
                report.container_deleted, report.job_deleted, report.pool_deleted
            );
            Ok(())
        }
    }
}

fn passcode(ctx: &Session) -> Result<&str> {
    ctx.passcode
        .as_deref()
        .filter(|passcode| !passcode.is_empty())
        .with_context(|| format!("a passcode is required; pass --passcode or set {}", cli::PASSCODE_ENV))
}

fn encrypt_credential(ctx: &Session, args: &EncryptCredentialArgs) -> Result<()> {
    let credential = credential_vault::read_plain_file(&args.plain)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| ctx.config.credential_path.clone());
    CredentialStore::default().encrypt_and_write(&credential, passcode(ctx)?, &output)?;
    println!("Encrypted credential written to {}", output.display());
    Ok(())
}

fn usecases(ctx: &Session) -> Result<UseCases> {
    let batch: Arc<dyn BatchServicePort>;
    let storage: Arc<dyn BlobStoragePort>;
    if ctx.dry_run {
        tracing::warn!("dry run: using an in-memory service, nothing is sent to Azure");
        let azure = Arc::new(InMemoryAzure::with_auto_progress());
        batch = azure.clone();
        storage = azure;
    } else {
        let credential = CredentialStore::default()
            .read_and_decrypt(&ctx.config.credential_path, passcode(ctx)?)
            .with_context(|| {
                format!(
                    "failed to open credential {}",
                    ctx.config.credential_path.display()
                )
            })?;
        batch = Arc::new(AzureBatchClient::new(&credential)?);
        storage = Arc::new(AzureBlobClient::new(&credential)?);
    }

    let ports = MissionPorts {
        batch,
        storage,
        local_fs: Arc::new(LocalFilesystem::new()),
        clock: Arc::new(SystemClock::new()),
        progress: Arc::new(ConsoleProgress::new(ctx.quiet)),
    };
    let options = MissionOptions {
        upload_parallelism: ctx.config.upload_parallelism,
        core_quota: ctx.config.core_quota,
        poll_interval: Duration::from_secs(ctx.config.poll_interval_secs),
        upload_rules: ctx.upload_rules.clone(),
        ..MissionOptions::default()
    };
    Ok(UseCases::new(ports, options))
}

async fn attach(
    ctx: &Session,
    mission_name: &str,
) -> Result<(UseCases, Mission, MissionRecord, PathBuf)> {
    let path = mission_record::record_path(&ctx.config.working_dir, mission_name);
    if !path.exists() {
        anyhow::bail!(
            "no record of mission {mission_name} at {}; start it with `landspill submit`",
            path.display()
        );
    }
    let record = MissionRecord::load(&path)?;
    let usecases = usecases(ctx)?;
    let mission = usecases.attach(&record).await?;
    Ok((usecases, mission, record, path))
}

async fn submit(ctx: &Session, args: SubmitArgs) -> Result<()> {
    let flags = args.flags();
    let submission = SubmissionConfig {
        mission_name: args.mission,
        max_nodes: ctx.config.max_nodes,
        vm_size: ctx.config.vm_size.clone(),
        node_type: ctx.config.node_type.clone(),
        credential_path: ctx.config.credential_path.clone(),
        case_paths: args.cases,
        upload_parallelism: ctx.config.upload_parallelism,
        core_quota: ctx.config.core_quota,
        flags,
    };
    // A dry run leaves no record behind for later commands to reattach to.
    let record_path = (!ctx.dry_run).then(|| {
        mission_record::record_path(&ctx.config.working_dir, submission.mission_name.trim())
    });

    let usecases = usecases(ctx)?;
    let (_, report) = usecases.submit(&submission, record_path.as_deref()).await?;

    for case in &report.cases {
        match &case.result {
            Ok(outcome) => println!("{}: {}", outcome.identifier, outcome.state.as_str()),
            Err(err) => println!("{}: failed ({}: {err})", case.case_path.display(), err.code()),
        }
    }
    for err in &report.resize_errors {
        println!("resize failed ({}): {err}", err.code());
    }
    println!(
        "{} submitted, {} skipped, {} failed; pool {} at {} node(s).",
        report.count(SubmissionState::Submitted),
        report.count(SubmissionState::SkippedLocalMissing)
            + report.count(SubmissionState::SkippedRemoteExists),
        report.failed().count(),
        report.mission.pool_name,
        report.final_pool_size,
    );
    match &record_path {
        Some(path) => println!("Record: {}", path.display()),
        None => println!("Dry run: no mission record written."),
    }
    Ok(())
}

async fn download(ctx: &Session, args: DownloadArgs) -> Result<()> {
    let (usecases, mut mission, mut record, path) = attach(ctx, &args.mission).await?;
    let options = DownloadOptions::from(args.filter);
    let cases: Vec<String> = if args.cases.is_empty() {
        mission
            .status()
            .await?
            .tasks
            .into_iter()
            .filter(|task| task.state.is_finished())
            .map(|task| task.id)
            .collect()
    } else {
        args.cases
    };

    let mut failures = 0usize;
    for case in &cases {
        match mission.download_case(case, options).await {
            Ok(DownloadOutcome::Downloaded { files }) => println!("{case}: {files} file(s)"),
            Ok(DownloadOutcome::AlreadyDownloaded) => println!("{case}: already downloaded"),
            Ok(DownloadOutcome::NothingToDownload) => println!("{case}: nothing to download"),
            Err(err) => {
                failures += 1;
                println!("{case}: failed ({}: {err})", err.code());
            }
        }
        usecases.persist(&mission, &mut record, &path)?;
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} case(s) could not be downloaded", cases.len());
    }
    Ok(())
}

async fn wait(ctx: &Session, args: WaitArgs) -> Result<()> {
    let (usecases, mut mission, mut record, path) = attach(ctx, &args.mission).await?;
    let options = WaitOptions {
        download: args.download.then(|| DownloadOptions::from(args.filter)),
        adapt_size: args.adapt_size,
        max_cycles: args.max_cycles,
    };
    let result = mission.wait_and_download(&options).await;
    usecases.persist(&mission, &mut record, &path)?;
    let summary = result?;

    println!(
        "{} poll(s); {} completed, {} failed, {} downloaded",
        summary.cycles,
        summary.completed.len(),
        summary.failed.len(),
        summary.downloaded.len()
    );
    for (case, err) in &summary.download_errors {
        println!("{case}: download failed ({}: {err})", err.code());
    }
    if !summary.all_finished {
        println!("Some tasks are still running.");
    }
    Ok(())
}
