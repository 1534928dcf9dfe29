// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Sink for the short progress lines shown to the person running a mission.
pub trait ProgressPort: Send + Sync {
    fn report(&self, message: &str);
}

#[derive(Clone, Default)]
pub struct NoopProgress;

impl ProgressPort for NoopProgress {
    fn report(&self, _message: &str) {}
}
