// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod batch;
pub mod blob_storage;
pub mod clock;
pub mod local_fs;
pub mod progress;

pub use batch::BatchServicePort;
pub use blob_storage::BlobStoragePort;
pub use clock::ClockPort;
pub use local_fs::LocalFilesystemPort;
pub use progress::{NoopProgress, ProgressPort};
