// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-object file state

use crate::archive::ArchiveTag;
use crate::object::ObjectName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Info type for a regular file.
pub const T_FILE: &str = "file";
/// Info type for a directory.
pub const T_DIR: &str = "dir";
/// Info type for entries a client observes but cannot transfer
/// (softlinks, devices, sockets).
pub const T_UNHANDLED: &str = "unhandled";

/// Open mapping describing the observed content of an object on one side.
///
/// The key namespace is global: clients prefix their private attributes with
/// their signature (`localfs_mtime`, `pithos_etag`). An empty mapping means
/// the object is absent on that side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileInfo(BTreeMap<String, Value>);

impl FileInfo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Merge with the target side's info; target keys win on collisions.
    pub fn merged_with(&self, target: &FileInfo) -> FileInfo {
        let mut merged = self.0.clone();
        for (k, v) in &target.0 {
            merged.insert(k.clone(), v.clone());
        }
        FileInfo(merged)
    }

    pub fn to_json(&self) -> String {
        // A BTreeMap of JSON values always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// State of one object in one archive.
///
/// `serial` is the per-object lamport-style version; `-1` means the row has
/// never observed the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub archive: ArchiveTag,
    pub objname: ObjectName,
    pub serial: i64,
    pub info: FileInfo,
}

impl FileState {
    /// Synthesized state for a row that does not exist yet.
    pub fn absent(archive: ArchiveTag, objname: ObjectName) -> Self {
        Self { archive, objname, serial: -1, info: FileInfo::empty() }
    }

    pub fn with_serial(mut self, serial: i64) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_info(mut self, info: FileInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_archive(mut self, archive: ArchiveTag) -> Self {
        self.archive = archive;
        self
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
