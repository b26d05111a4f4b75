// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::thread;
use std::time::Duration;

use time::OffsetDateTime;

use crate::app::ports::ClockPort;

/// Wall-clock adapter. Falls back to UTC when the local offset cannot be
/// determined (e.g. multi-threaded environments on some platforms).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
