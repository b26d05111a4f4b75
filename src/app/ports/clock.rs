// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use time::OffsetDateTime;

/// Time source boundary for timestamps and poll sleeps.
/// Makes the watch loop and finalizer retry deterministic in tests.
pub trait ClockPort {
    fn now(&self) -> OffsetDateTime;
    fn sleep(&self, duration: Duration);
}
