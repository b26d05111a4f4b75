// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Application core: run lifecycle logic behind the port traits.

pub mod archive;
pub mod backend;
pub mod finalize;
pub mod launch;
pub mod ports;
pub mod run;
pub mod script;
pub mod staging;
pub mod watch;
