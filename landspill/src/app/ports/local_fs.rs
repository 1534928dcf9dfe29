// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Local filesystem boundary for the core.
/// Resolves case paths and checks for case folders with consistent errors.
pub trait LocalFilesystemPort: Send + Sync {
    async fn current_dir(&self) -> AppResult<PathBuf>;
    async fn is_dir(&self, path: &Path) -> AppResult<bool>;
    async fn create_dir_all(&self, path: &Path) -> AppResult<()>;
}
