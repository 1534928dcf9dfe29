// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod credential_vault;
pub mod download_filter;
pub mod mission_record;
pub mod naming;
pub mod resize;
pub mod task_spec;
pub mod upload_plan;
pub mod validation;
