// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Portable object names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Separator used in object names, regardless of platform.
pub const OBJECT_DIRSEP: char = '/';

/// Name of an object in either archive.
///
/// Always non-empty and `/`-separated; conversion to and from OS paths
/// happens only at the local-filesystem boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "object names must be non-empty");
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `/`-separated segment.
    pub fn first_segment(&self) -> &str {
        self.0.split(OBJECT_DIRSEP).next().unwrap_or(&self.0)
    }

    /// Last `/`-separated segment (the "file name" part).
    pub fn final_segment(&self) -> &str {
        self.0.rsplit(OBJECT_DIRSEP).next().unwrap_or(&self.0)
    }

    /// Append a child segment, normalizing any trailing separator.
    pub fn join(&self, child: &str) -> ObjectName {
        join_objname(&self.0, child)
    }

    /// Build an object name from a path relative to the local root.
    ///
    /// Returns `None` for paths that are not valid UTF-8 or are empty.
    pub fn from_local(rel: &Path) -> Option<ObjectName> {
        let s = rel.to_str()?;
        if s.is_empty() || s == "." {
            return None;
        }
        let portable = s.replace(MAIN_SEPARATOR, "/");
        Some(ObjectName(portable))
    }

    /// Resolve this name to a path under `root`, using the OS separator.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split(OBJECT_DIRSEP) {
            path.push(segment);
        }
        path
    }

    /// Registry key for heartbeat and candidate maps.
    pub fn reg_name(&self, case_insensitive: bool) -> String {
        if case_insensitive {
            self.0.to_lowercase()
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectName {
    fn from(s: &str) -> Self {
        ObjectName::new(s)
    }
}

/// Join a (possibly empty) portable prefix with a final segment.
pub fn join_objname(prefix: &str, name: &str) -> ObjectName {
    if prefix.is_empty() {
        ObjectName::new(name)
    } else {
        let trimmed = prefix.trim_end_matches(OBJECT_DIRSEP);
        ObjectName::new(format!("{trimmed}{OBJECT_DIRSEP}{name}"))
    }
}

#[cfg(test)]
#[path = "object_tests.rs"]
mod tests;
