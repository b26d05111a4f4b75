// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod git;
pub mod mirror;
pub mod remote_exec;

pub use clock::ClockPort;
pub use git::GitPort;
pub use mirror::{MirrorError, MirrorPort, MirrorTarget};
pub use remote_exec::{ExecError, Login, RemoteExecPort};
