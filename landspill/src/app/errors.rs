// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const WRONG_PASSCODE: &str = "wrong_passcode";
    pub const CORRUPTED_CREDENTIAL: &str = "corrupted_credential";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const QUOTA_EXCEEDED: &str = "quota_exceeded";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const TIMEOUT: &str = "timeout";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    /// Bad or missing input; the operation was never attempted.
    InvalidArgument,
    /// The mission is not in a state that allows the operation.
    FailedPrecondition,
    /// Wrong passcode, corrupted credential file or rejected account key.
    Authentication,
    NotFound,
    Conflict,
    Quota,
    Io,
    Network,
    Internal,
}

impl AppErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AppErrorKind::InvalidArgument => "invalid_argument",
            AppErrorKind::FailedPrecondition => "failed_precondition",
            AppErrorKind::Authentication => "authentication",
            AppErrorKind::NotFound => "not_found",
            AppErrorKind::Conflict => "conflict",
            AppErrorKind::Quota => "quota",
            AppErrorKind::Io => "io",
            AppErrorKind::Network => "network",
            AppErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Errors that concern the mission itself rather than a single case.
    /// A task loop stops on these instead of moving to the next case.
    pub fn is_mission_fatal(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Authentication | AppErrorKind::FailedPrecondition
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub fn invalid_argument(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::InvalidArgument,
        codes::INVALID_ARGUMENT,
        message,
    )
}

pub fn invalid_state(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::FailedPrecondition,
        codes::INVALID_STATE,
        message,
    )
}

pub fn local_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Io, codes::LOCAL_ERROR, message)
}
