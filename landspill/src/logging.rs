// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "LANDSPILL_LOG";
const FORMAT_ENV: &str = "LANDSPILL_LOG_FORMAT";
const SPAN_EVENTS_ENV: &str = "LANDSPILL_LOG_SPAN_EVENTS";
const FILE_ENV: &str = "LANDSPILL_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Logs go to stderr so that progress lines
/// and reports on stdout stay readable; `LANDSPILL_LOG_FILE` adds a copy
/// without ANSI colors.
pub fn init(verbose: bool) {
    let filter = build_filter(env::var(LOG_ENV).ok().as_deref(), verbose);
    let format = parse_format(env::var(FORMAT_ENV).ok().as_deref());
    let span_events = parse_span_events(env::var(SPAN_EVENTS_ENV).ok().as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(format, span_events.clone(), None)];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, Some(writer)));
        let _ = FILE_GUARD.set(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .init();
}

fn fmt_layer(format: LogFormat, span_events: FmtSpan, file: Option<NonBlocking>) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events);
    match (format, file) {
        (LogFormat::Json, None) => base.json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Json, Some(writer)) => base.json().with_ansi(false).with_writer(writer).boxed(),
        (LogFormat::Pretty, None) => base.pretty().with_writer(std::io::stderr).boxed(),
        (LogFormat::Pretty, Some(writer)) => {
            base.pretty().with_ansi(false).with_writer(writer).boxed()
        }
        (LogFormat::Compact, None) => base.compact().with_writer(std::io::stderr).boxed(),
        (LogFormat::Compact, Some(writer)) => {
            base.compact().with_ansi(false).with_writer(writer).boxed()
        }
    }
}

fn build_filter(directive: Option<&str>, verbose: bool) -> EnvFilter {
    match directive.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::new(value),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("landspill=info,warn"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        Some("full") => FmtSpan::FULL,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(FILE_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
