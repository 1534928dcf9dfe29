// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::LocalFilesystemPort;

#[derive(Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LocalFilesystemPort for LocalFilesystem {
    #[tracing::instrument(name = "fs", level = "debug", skip(self), fields(op = "current_dir"))]
    async fn current_dir(&self) -> AppResult<PathBuf> {
        std::env::current_dir().map_err(|err| {
            AppError::with_message(
                AppErrorKind::Io,
                codes::LOCAL_ERROR,
                format!("failed to resolve current directory: {err}"),
            )
        })
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "is_dir", path = %path.display()))]
    async fn is_dir(&self, path: &Path) -> AppResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::with_message(
                AppErrorKind::Io,
                codes::LOCAL_ERROR,
                format!("failed to inspect {}: {err}", path.display()),
            )),
        }
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "create_dir_all", path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|err| {
            AppError::with_message(
                AppErrorKind::Io,
                codes::LOCAL_ERROR,
                format!("failed to create {}: {err}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_path_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();
        assert!(fs.is_dir(tmp.path()).await.unwrap());
        assert!(!fs.is_dir(&tmp.path().join("absent")).await.unwrap());

        let file = tmp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(!fs.is_dir(&file).await.unwrap());
    }

    #[tokio::test]
    async fn create_dir_all_builds_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        LocalFilesystem::new().create_dir_all(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
