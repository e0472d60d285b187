// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed transaction facade over the archive state schema

use crate::store::StoreError;
use amphora_core::{
    ArchiveTag, FileInfo, FileState, ObjectName, CONFIG_LOCALFS_ENABLED, CONFIG_PITHOS_ENABLED,
};
use rusqlite::{params, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;

/// One open `begin immediate` transaction.
///
/// All reads and writes of a probe, decide, or ack happen through a single
/// `StoreTx`, so the archive rows, the serial allocator, the config section,
/// and the cache-name table share one transaction boundary.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> StoreTx<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self { tx }
    }

    pub(crate) fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    /// Row for (archive, objname), synthesizing the never-seen state when
    /// the row does not exist.
    pub fn get_state(
        &self,
        archive: &ArchiveTag,
        objname: &ObjectName,
    ) -> Result<FileState, StoreError> {
        let row = self
            .tx
            .query_row(
                "select serial, info from archives where archive = ?1 and objname = ?2",
                params![archive.as_str(), objname.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((serial, raw)) => Ok(FileState {
                archive: archive.clone(),
                objname: objname.clone(),
                serial,
                info: FileInfo::from_json(&raw)?,
            }),
            None => Ok(FileState::absent(archive.clone(), objname.clone())),
        }
    }

    pub fn put_state(&self, state: &FileState) -> Result<(), StoreError> {
        self.tx.execute(
            "insert or replace into archives(archive, objname, serial, info) \
             values (?1, ?2, ?3, ?4)",
            params![
                state.archive.as_str(),
                state.objname.as_str(),
                state.serial,
                state.info.to_json()
            ],
        )?;
        Ok(())
    }

    /// Allocate the next serial for an object: read the counter (or 0),
    /// store back +1, return the old value.
    pub fn new_serial(&self, objname: &ObjectName) -> Result<i64, StoreError> {
        let current: Option<i64> = self
            .tx
            .query_row(
                "select nextserial from serials where objname = ?1",
                params![objname.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let serial = match current {
            Some(serial) => {
                self.tx.execute(
                    "update serials set nextserial = ?1 where objname = ?2",
                    params![serial + 1, objname.as_str()],
                )?;
                serial
            }
            None => {
                self.tx.execute(
                    "insert into serials(nextserial, objname) values (?1, ?2)",
                    params![1i64, objname.as_str()],
                )?;
                0
            }
        };
        Ok(serial)
    }

    /// Names whose row in any of `archives` has a serial beyond the `sync`
    /// row's serial.
    pub fn list_deciding(
        &self,
        archives: &[ArchiveTag],
        sync: &ArchiveTag,
    ) -> Result<BTreeSet<ObjectName>, StoreError> {
        let (first, second) = match archives {
            [only] => (only, only),
            [first, second, ..] => (first, second),
            [] => return Ok(BTreeSet::new()),
        };
        let mut stmt = self.tx.prepare(
            "select distinct client.objname from archives client, archives sync \
             where client.archive in (?1, ?2) and sync.archive = ?3 \
             and client.objname = sync.objname \
             and client.serial > sync.serial",
        )?;
        let rows = stmt.query_map(
            params![first.as_str(), second.as_str(), sync.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(ObjectName::new(row?));
        }
        Ok(names)
    }

    /// Names an archive currently observes (info non-empty).
    pub fn list_non_deleted(&self, archive: &ArchiveTag) -> Result<Vec<ObjectName>, StoreError> {
        let mut stmt = self.tx.prepare(
            "select objname from archives where archive = ?1 and info != '{}' order by objname",
        )?;
        let rows = stmt.query_map(params![archive.as_str()], |row| row.get::<_, String>(0))?;
        rows.map(|row| Ok(ObjectName::new(row?))).collect()
    }

    /// All names known to an archive, optionally restricted to a prefix.
    pub fn list_files(
        &self,
        archive: &ArchiveTag,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectName>, StoreError> {
        let rows = match prefix {
            Some(prefix) => {
                let mut stmt = self.tx.prepare(
                    "select objname from archives where archive = ?1 and objname like ?2 \
                     order by objname",
                )?;
                let rows = stmt.query_map(
                    params![archive.as_str(), format!("{prefix}%")],
                    |row| row.get::<_, String>(0),
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.tx.prepare(
                    "select objname from archives where archive = ?1 order by objname",
                )?;
                let rows =
                    stmt.query_map(params![archive.as_str()], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows.into_iter().map(ObjectName::new).collect())
    }

    /// Non-deleted names strictly inside the directory `objname`.
    pub fn get_dir_contents(
        &self,
        archive: &ArchiveTag,
        objname: &ObjectName,
    ) -> Result<Vec<ObjectName>, StoreError> {
        let mut stmt = self.tx.prepare(
            "select objname from archives where archive = ?1 and info != '{}' \
             and objname like ?2",
        )?;
        let pattern = format!("{}/%", objname.as_str().trim_end_matches('/'));
        let rows = stmt.query_map(params![archive.as_str(), pattern], |row| {
            row.get::<_, String>(0)
        })?;
        rows.map(|row| Ok(ObjectName::new(row?))).collect()
    }

    // -- cache-file-name table --

    pub fn get_cachename(
        &self,
        cachename: &str,
    ) -> Result<Option<(String, ObjectName)>, StoreError> {
        let row = self
            .tx
            .query_row(
                "select client, objname from cachenames where cachename = ?1",
                params![cachename],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(client, objname)| (client, ObjectName::new(objname))))
    }

    pub fn insert_cachename(
        &self,
        cachename: &str,
        client: &str,
        objname: &ObjectName,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "insert into cachenames(cachename, client, objname) values (?1, ?2, ?3)",
            params![cachename, client, objname.as_str()],
        )?;
        Ok(())
    }

    pub fn delete_cachename(&self, cachename: &str) -> Result<(), StoreError> {
        self.tx
            .execute("delete from cachenames where cachename = ?1", params![cachename])?;
        Ok(())
    }

    // -- config section --

    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .tx
            .query_row("select value from config where key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_config<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.tx.execute(
            "insert or replace into config(key, value) values (?1, ?2)",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    pub fn localfs_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.get_config(CONFIG_LOCALFS_ENABLED)?.unwrap_or(false))
    }

    pub fn set_localfs_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.set_config(CONFIG_LOCALFS_ENABLED, &enabled)
    }

    pub fn pithos_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.get_config(CONFIG_PITHOS_ENABLED)?.unwrap_or(false))
    }

    pub fn set_pithos_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.set_config(CONFIG_PITHOS_ENABLED, &enabled)
    }

    pub fn sync_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.localfs_enabled()? && self.pithos_enabled()?)
    }

    /// Wipe archive rows and serial counters; config and cache names stay.
    pub fn purge_archives(&self) -> Result<(), StoreError> {
        self.tx.execute("delete from archives", [])?;
        self.tx.execute("delete from serials", [])?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tx_tests.rs"]
mod tests;
