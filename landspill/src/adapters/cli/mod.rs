// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::app::services::download_filter::DownloadOptions;
use crate::app::services::upload_plan::{FilterAction, FilterRule, default_upload_rules};
use crate::app::types::SubmitFlags;

pub const PASSCODE_ENV: &str = "LANDSPILL_PASSCODE";

#[derive(Parser)]
#[command(
    name = "landspill",
    version,
    about,
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < LANDSPILL_CONFIG_PATH < command-line flags.\n\
The passcode of the encrypted credential is read from LANDSPILL_PASSCODE when --passcode is omitted.\n\
Mission records (<mission>_mission.json) are kept in the working directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, landspill uses LANDSPILL_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Encrypted credential file. Overrides `credential_path` from the config file."
    )]
    pub credential: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Where mission records are kept. Overrides `working_dir` from the config file."
    )]
    pub working_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = PASSCODE_ENV,
        hide_env_values = true,
        value_name = "PASSCODE",
        help = "Passcode of the encrypted credential."
    )]
    pub passcode: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Run `submit` against an in-memory service instead of Azure. No credential is needed and no mission record is written."
    )]
    pub dry_run: bool,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(short, long, global = true, help = "Do not print progress lines.")]
    pub quiet: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Encrypt a five-line plain credential file with a passcode.
    EncryptCredential(EncryptCredentialArgs),
    /// Start a mission and submit one task per case folder.
    Submit(SubmitArgs),
    /// Set the pool of a running mission to a number of nodes.
    Resize(ResizeArgs),
    /// Print pool, job, task and container status.
    Status(MissionArgs),
    /// Download the results of finished cases.
    Download(DownloadArgs),
    /// Poll until every task finishes, optionally downloading results.
    Wait(WaitArgs),
    /// Delete the container, job and pool of a mission.
    Clear(MissionArgs),
}

impl Cmd {
    /// Commands that reattach to a recorded mission need the real service.
    pub fn supports_dry_run(&self) -> bool {
        matches!(self, Cmd::EncryptCredential(_) | Cmd::Submit(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Cmd::EncryptCredential(_) => "encrypt-credential",
            Cmd::Submit(_) => "submit",
            Cmd::Resize(_) => "resize",
            Cmd::Status(_) => "status",
            Cmd::Download(_) => "download",
            Cmd::Wait(_) => "wait",
            Cmd::Clear(_) => "clear",
        }
    }
}

#[derive(Args, Debug)]
pub struct EncryptCredentialArgs {
    /// Plain text file: batch account name, key, URL, storage account name, key.
    pub plain: PathBuf,
    /// Where to write the encrypted file; defaults to the configured credential path.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MissionArgs {
    pub mission: String,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    pub mission: String,
    #[arg(required = true, value_name = "CASE_DIR")]
    pub cases: Vec<PathBuf>,
    #[arg(long)]
    pub max_nodes: Option<u32>,
    #[arg(long, value_name = "SKU")]
    pub vm_size: Option<String>,
    /// `dedicated` or `low-priority`.
    #[arg(long, value_name = "TYPE")]
    pub node_type: Option<String>,
    #[arg(long, value_name = "N")]
    pub upload_parallelism: Option<usize>,
    /// Total cores the account may use.
    #[arg(long, value_name = "CORES")]
    pub core_quota: Option<u32>,
    /// Fail instead of skipping case folders that do not exist.
    #[arg(long)]
    pub no_skip_local_missing: bool,
    /// Fail instead of reusing remote resources and skipping existing tasks.
    #[arg(long)]
    pub no_skip_remote_exists: bool,
    /// Upload only paths matching PATTERN.
    /// Rules are checked in the order they appear across --include/--exclude;
    /// the first match wins, and unmatched paths are uploaded.
    /// A pattern without '/' matches the basename anywhere, a leading '/'
    /// anchors to the case root, and a trailing '/' matches directories only.
    #[arg(long, value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub include: Vec<String>,
    /// Do not upload paths matching PATTERN. See --include for the rule order.
    #[arg(long, value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,
}

impl SubmitArgs {
    pub fn flags(&self) -> SubmitFlags {
        SubmitFlags {
            skip_if_local_missing: !self.no_skip_local_missing,
            skip_if_remote_exists: !self.no_skip_remote_exists,
        }
    }
}

#[derive(Args, Debug)]
pub struct ResizeArgs {
    pub mission: String,
    pub nodes: u32,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DownloadFilterArgs {
    /// Also download GeoClaw raw output (`*.data`, `fort.*`).
    #[arg(long)]
    pub raw_output: bool,
    /// Also download topography and hydrology rasters (`*.asc`, `*.prj`).
    #[arg(long)]
    pub rasters: bool,
}

impl From<DownloadFilterArgs> for DownloadOptions {
    fn from(args: DownloadFilterArgs) -> Self {
        DownloadOptions {
            raw_output: args.raw_output,
            rasters: args.rasters,
        }
    }
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    pub mission: String,
    /// Case names to download; all finished cases when omitted.
    #[arg(value_name = "CASE")]
    pub cases: Vec<String>,
    #[command(flatten)]
    pub filter: DownloadFilterArgs,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    pub mission: String,
    /// Download each case as soon as it finishes.
    #[arg(long)]
    pub download: bool,
    #[command(flatten)]
    pub filter: DownloadFilterArgs,
    /// Shrink the pool to the number of unfinished tasks while waiting.
    #[arg(long)]
    pub adapt_size: bool,
    /// Stop after this many polls.
    #[arg(long, value_name = "N")]
    pub max_cycles: Option<u32>,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
    /// Upload rules in command-line order, followed by the defaults.
    pub upload_rules: Vec<FilterRule>,
}

const HELP_TEMPLATE: &str = r#"landspill ~ GeoClaw land-spill missions on Azure Batch

{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

/// Include/exclude rules of `submit` in the order they were given.
pub fn upload_rules_from_matches(matches: &ArgMatches) -> Vec<FilterRule> {
    let Some(("submit", sub_matches)) = matches.subcommand() else {
        return Vec::new();
    };

    let mut ordered: Vec<(usize, FilterAction, String)> = Vec::new();
    let mut push_rules = |arg: &str, action: FilterAction| {
        let values = sub_matches
            .get_many::<String>(arg)
            .into_iter()
            .flatten()
            .cloned();
        let indices = sub_matches.indices_of(arg).into_iter().flatten();
        for (idx, pattern) in indices.zip(values) {
            ordered.push((idx, action, pattern));
        }
    };
    push_rules("include", FilterAction::Include);
    push_rules("exclude", FilterAction::Exclude);

    ordered.sort_by_key(|(idx, _, _)| *idx);
    ordered
        .into_iter()
        .map(|(_, action, pattern)| FilterRule { action, pattern })
        .collect()
}

fn parsed_from_matches(matches: &ArgMatches) -> Result<ParsedOpts, clap::Error> {
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let mut upload_rules = upload_rules_from_matches(matches);
    upload_rules.extend(default_upload_rules());
    let opts = Opts::from_arg_matches(matches)?;
    if opts.dry_run && !opts.cmd.supports_dry_run() {
        return Err(cli_command().error(
            clap::error::ErrorKind::ArgumentConflict,
            format!(
                "--dry-run cannot be used with `{}`; it reattaches to a mission recorded by a real `submit`",
                opts.cmd.name()
            ),
        ));
    }
    Ok(ParsedOpts {
        opts,
        verbose_override,
        upload_rules,
    })
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    parsed_from_matches(&matches).unwrap_or_else(|err| err.exit())
}
