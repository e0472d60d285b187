// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive tags

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Tag naming a logical side of the sync relation.
///
/// The two archive clients contribute their signatures (the remote store is
/// the master, the local filesystem the slave); `SYNC` and `DECISION` are
/// bookkeeping rows stored in the same state schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveTag(SmolStr);

impl ArchiveTag {
    /// Last reconciled state.
    pub const SYNC: ArchiveTag = ArchiveTag(SmolStr::new_inline("SYNC"));
    /// In-flight decision snapshot.
    pub const DECISION: ArchiveTag = ArchiveTag(SmolStr::new_inline("DECISION"));

    pub fn new(tag: &str) -> Self {
        Self(SmolStr::new(tag))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ArchiveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for ArchiveTag {
    fn from(s: &str) -> Self {
        ArchiveTag::new(s)
    }
}
