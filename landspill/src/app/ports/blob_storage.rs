// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::AppResult;
use crate::app::types::{BlobItem, ContainerCreation};

#[async_trait]
/// Blob storage boundary used to stage case inputs and collect outputs.
pub trait BlobStoragePort: Send + Sync {
    async fn create_container(&self, container: &str) -> AppResult<ContainerCreation>;
    async fn container_exists(&self, container: &str) -> AppResult<bool>;
    async fn delete_container(&self, container: &str) -> AppResult<bool>;

    async fn upload_file(&self, container: &str, blob_name: &str, local_path: &Path)
    -> AppResult<()>;
    async fn download_file(
        &self,
        container: &str,
        blob_name: &str,
        local_path: &Path,
    ) -> AppResult<()>;
    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> AppResult<Vec<BlobItem>>;
    async fn delete_blob(&self, container: &str, blob_name: &str) -> AppResult<bool>;

    /// Container URL carrying a read/write/delete/list SAS valid between
    /// `start` and `expiry`. Batch tasks use it to pull inputs and push outputs.
    fn container_sas_url(
        &self,
        container: &str,
        start: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> AppResult<String>;
}
