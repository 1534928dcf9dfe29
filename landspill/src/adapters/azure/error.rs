// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde::Deserialize;
use thiserror::Error as ThisError;

use crate::app::errors::{AppError, AppErrorKind, codes};

/// Error codes the Batch service uses when an account limit is hit.
const QUOTA_CODES: [&str; 5] = [
    "AccountCoreQuotaReached",
    "AccountLowPriorityCoreQuotaReached",
    "AccountVMSeriesCoreQuotaReached",
    "PoolQuotaReached",
    "ActiveJobAndScheduleQuotaReached",
];

#[derive(Debug, ThisError)]
pub enum AzureError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("service returned {status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("invalid account key: {0}")]
    InvalidKey(String),
    #[error("could not sign request: {0}")]
    Signing(String),
    #[error("invalid url: {0}")]
    Url(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("local file error at {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AzureError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AzureError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn service_code(&self) -> Option<&str> {
        match self {
            AzureError::Service { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Deserialize)]
struct BatchErrorBody {
    code: Option<String>,
    message: Option<BatchErrorMessage>,
}

#[derive(Deserialize)]
struct BatchErrorMessage {
    value: Option<String>,
}

#[derive(Deserialize)]
struct BlobErrorBody {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Builds a service error from a failed response. Blob answers carry the
/// code in `x-ms-error-code` and an XML body; Batch answers carry JSON.
pub(crate) fn service_error(status: u16, header_code: Option<String>, body: &str) -> AzureError {
    let (body_code, message) = if let Ok(parsed) = serde_json::from_str::<BatchErrorBody>(body) {
        (parsed.code, parsed.message.and_then(|m| m.value))
    } else if let Ok(parsed) = quick_xml::de::from_str::<BlobErrorBody>(body) {
        (parsed.code, parsed.message)
    } else {
        (None, None)
    };
    AzureError::Service {
        status,
        code: header_code
            .or(body_code)
            .unwrap_or_else(|| "Unknown".to_string()),
        message: message
            .map(|m| m.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default(),
    }
}

/// Translates REST failures into app-level errors so the core never sees
/// HTTP details.
pub fn map_azure_error(err: AzureError) -> AppError {
    let message = err.to_string();
    let (kind, code) = match &err {
        AzureError::Transport { source, .. } if source.is_timeout() => {
            (AppErrorKind::Network, codes::TIMEOUT)
        }
        AzureError::Transport { .. } => (AppErrorKind::Network, codes::NETWORK_ERROR),
        AzureError::Service { code, .. } if QUOTA_CODES.contains(&code.as_str()) => {
            (AppErrorKind::Quota, codes::QUOTA_EXCEEDED)
        }
        AzureError::Service { status, .. } => match status {
            401 | 403 => (AppErrorKind::Authentication, codes::AUTHENTICATION_FAILURE),
            404 => (AppErrorKind::NotFound, codes::NOT_FOUND),
            409 => (AppErrorKind::Conflict, codes::CONFLICT),
            400 => (AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT),
            408 => (AppErrorKind::Network, codes::TIMEOUT),
            429 | 500..=599 => (AppErrorKind::Network, codes::REMOTE_ERROR),
            _ => (AppErrorKind::Internal, codes::REMOTE_ERROR),
        },
        AzureError::InvalidKey(_) => (AppErrorKind::Authentication, codes::AUTHENTICATION_FAILURE),
        AzureError::Signing(_) | AzureError::Url(_) => {
            (AppErrorKind::Internal, codes::INTERNAL_ERROR)
        }
        AzureError::Decode(_) => (AppErrorKind::Internal, codes::REMOTE_ERROR),
        AzureError::File { .. } => (AppErrorKind::Io, codes::LOCAL_ERROR),
    };
    AppError::with_message(kind, code, message)
}
