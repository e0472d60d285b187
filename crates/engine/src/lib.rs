// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! amphora-engine: the file syncer orchestrator

pub mod periodic;
pub mod setup;
pub mod syncer;

pub use periodic::PeriodicWorker;
pub use setup::build_syncer;
pub use syncer::{FileSyncer, SyncTriple};
