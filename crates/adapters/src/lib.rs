// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! amphora-adapters: the two archive clients
//!
//! The local filesystem client and the remote object-store client both
//! implement the [`ArchiveClient`] capability set the syncer drives:
//! candidate listing, probing, source staging, target application, and a
//! change notifier.

pub mod client;
pub mod localfs;
pub mod pithos;

pub use client::{
    ArchiveClient, Candidate, CandidateMap, NotifierHandle, SourceHandle, TargetHandle,
};
pub use localfs::LocalfsFileClient;
pub use pithos::api::{HttpError, HttpObjectStore, ObjectStore, Precondition, RemoteObject};
pub use pithos::PithosFileClient;

#[cfg(any(test, feature = "test-support"))]
pub use pithos::fake::FakeObjectStore;
