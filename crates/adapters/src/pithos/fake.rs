// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory object store for tests

use super::api::{HttpError, ObjectStore, Precondition, RemoteObject, DIRECTORY_CONTENT_TYPE};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct FakeObject {
    content: Vec<u8>,
    content_type: String,
    etag: String,
    last_modified: String,
}

struct FakeState {
    objects: BTreeMap<String, FakeObject>,
    container_present: bool,
    tick: u64,
}

/// In-memory container honoring the same preconditions as the wire.
///
/// Etags are hex sha256 of the content; `last_modified` stamps are a
/// zero-padded counter so they order lexically like service timestamps.
#[derive(Clone)]
pub struct FakeObjectStore {
    state: Arc<Mutex<FakeState>>,
}

fn etag_of(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn not_found(name: &str) -> HttpError {
    HttpError::Status { status: 404, message: format!("'{name}' not found") }
}

fn precondition_failed(name: &str) -> HttpError {
    HttpError::Status { status: 412, message: format!("precondition failed for '{name}'") }
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                objects: BTreeMap::new(),
                container_present: true,
                tick: 0,
            })),
        }
    }

    fn stamp(state: &mut FakeState) -> String {
        state.tick += 1;
        format!("{:020}", state.tick)
    }

    /// Seed an object directly, bypassing preconditions.
    pub fn put_raw(&self, name: &str, content: &[u8], content_type: &str) -> String {
        let mut state = self.state.lock();
        let etag = etag_of(content);
        let last_modified = Self::stamp(&mut state);
        state.objects.insert(
            name.to_string(),
            FakeObject {
                content: content.to_vec(),
                content_type: content_type.to_string(),
                etag: etag.clone(),
                last_modified,
            },
        );
        etag
    }

    /// Read an object's content, if present.
    pub fn get_raw(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(name).map(|obj| obj.content.clone())
    }

    pub fn remove_raw(&self, name: &str) -> bool {
        self.state.lock().objects.remove(name).is_some()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    pub fn set_container_present(&self, present: bool) {
        self.state.lock().container_present = present;
    }

    fn check_container(state: &FakeState) -> Result<(), HttpError> {
        if state.container_present {
            Ok(())
        } else {
            Err(HttpError::Status { status: 404, message: "container not found".to_string() })
        }
    }

    fn to_remote(name: &str, obj: &FakeObject) -> RemoteObject {
        RemoteObject {
            name: name.to_string(),
            etag: Some(obj.etag.clone()),
            content_type: obj.content_type.clone(),
            last_modified: obj.last_modified.clone(),
        }
    }
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, HttpError> {
        let state = self.state.lock();
        Self::check_container(&state)?;
        Ok(state.objects.iter().map(|(name, obj)| Self::to_remote(name, obj)).collect())
    }

    async fn object_info(&self, name: &str) -> Result<Option<RemoteObject>, HttpError> {
        let state = self.state.lock();
        Self::check_container(&state)?;
        Ok(state.objects.get(name).map(|obj| Self::to_remote(name, obj)))
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<Option<RemoteObject>, HttpError> {
        let (meta, content) = {
            let state = self.state.lock();
            Self::check_container(&state)?;
            match state.objects.get(name) {
                Some(obj) => (Self::to_remote(name, obj), obj.content.clone()),
                None => return Ok(None),
            }
        };
        std::fs::write(dest, &content)
            .map_err(|e| HttpError::Transport(format!("writing '{}': {e}", dest.display())))?;
        Ok(Some(meta))
    }

    async fn put_object(
        &self,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: Option<Precondition>,
    ) -> Result<String, HttpError> {
        let mut state = self.state.lock();
        Self::check_container(&state)?;
        let existing = state.objects.get(name).map(|obj| obj.etag.clone());
        match (&precondition, existing) {
            (Some(Precondition::IfMatch(expected)), Some(etag)) if *expected != etag => {
                return Err(precondition_failed(name));
            }
            (Some(Precondition::IfMatch(_)), None) => {
                return Err(precondition_failed(name));
            }
            (Some(Precondition::IfNoneMatchAny), Some(_)) => {
                return Err(precondition_failed(name));
            }
            _ => {}
        }
        let etag = etag_of(&body);
        let last_modified = Self::stamp(&mut state);
        state.objects.insert(
            name.to_string(),
            FakeObject {
                content: body,
                content_type: content_type.to_string(),
                etag: etag.clone(),
                last_modified,
            },
        );
        Ok(etag)
    }

    async fn move_object(&self, from: &str, to: &str, if_match: &str) -> Result<(), HttpError> {
        let mut state = self.state.lock();
        Self::check_container(&state)?;
        let Some(obj) = state.objects.get(from).cloned() else {
            return Err(not_found(from));
        };
        if obj.etag != if_match {
            return Err(precondition_failed(from));
        }
        state.objects.remove(from);
        let last_modified = Self::stamp(&mut state);
        state.objects.insert(to.to_string(), FakeObject { last_modified, ..obj });
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), HttpError> {
        let mut state = self.state.lock();
        Self::check_container(&state)?;
        if state.objects.remove(name).is_none() {
            return Err(not_found(name));
        }
        Ok(())
    }

    async fn container_exists(&self) -> Result<bool, HttpError> {
        Ok(self.state.lock().container_present)
    }

    async fn create_container(&self) -> Result<(), HttpError> {
        self.state.lock().container_present = true;
        Ok(())
    }
}

/// Seed a directory object.
pub fn put_raw_dir(store: &FakeObjectStore, name: &str) -> String {
    store.put_raw(name, b"", DIRECTORY_CONTENT_TYPE)
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
