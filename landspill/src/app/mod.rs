// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod errors;
pub mod mission;
pub mod ports;
pub mod services;
pub mod types;
pub mod usecases;
