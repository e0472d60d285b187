// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live filesystem observation and info comparison

use amphora_core::{FileInfo, T_DIR, T_FILE, T_UNHANDLED};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

pub const LOCALFS_TYPE: &str = "localfs_type";
pub const LOCALFS_MTIME: &str = "localfs_mtime";
pub const LOCALFS_SIZE: &str = "localfs_size";

/// Shape of a path on the local filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    File,
    EmptyDir,
    NonEmptyDir,
    Missing,
    Softlink,
    Other,
}

fn is_missing_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

/// lstat that folds "not there" into `None`.
pub fn stat_path(path: &Path) -> io::Result<Option<fs::Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if is_missing_error(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

fn dir_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Classify a path without following symlinks.
pub fn local_status(path: &Path) -> io::Result<LocalStatus> {
    let Some(meta) = stat_path(path)? else {
        return Ok(LocalStatus::Missing);
    };
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        return Ok(LocalStatus::Softlink);
    }
    if file_type.is_file() {
        return Ok(LocalStatus::File);
    }
    if file_type.is_dir() {
        if dir_is_empty(path) {
            return Ok(LocalStatus::EmptyDir);
        }
        return Ok(LocalStatus::NonEmptyDir);
    }
    Ok(LocalStatus::Other)
}

/// The status an info mapping describes.
pub fn status_of_info(info: &FileInfo) -> LocalStatus {
    if info.is_empty() {
        return LocalStatus::Missing;
    }
    match info.get_str(LOCALFS_TYPE) {
        Some(T_DIR) => LocalStatus::EmptyDir,
        Some(T_UNHANDLED) => LocalStatus::Other,
        _ => LocalStatus::File,
    }
}

fn mtime_seconds(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Case-insensitive filesystems report a path as present under any casing;
/// walk the parents to check the exact spelling really exists.
pub fn is_actual_path(path: &Path) -> bool {
    let mut current = path.to_path_buf();
    loop {
        let Some(parent) = current.parent().map(Path::to_path_buf) else {
            return true;
        };
        let Some(name) = current.file_name() else {
            return true;
        };
        match fs::read_dir(&parent) {
            Ok(entries) => {
                if !entries.filter_map(|e| e.ok()).any(|e| e.file_name() == name) {
                    return false;
                }
            }
            Err(_) => return false,
        }
        if parent.parent().is_none() {
            return true;
        }
        current = parent;
    }
}

/// Observe the live info for a path.
pub fn live_info(path: &Path, case_insensitive: bool) -> io::Result<FileInfo> {
    if case_insensitive && !is_actual_path(path) {
        return Ok(FileInfo::empty());
    }
    let Some(meta) = stat_path(path)? else {
        return Ok(FileInfo::empty());
    };
    let file_type = meta.file_type();
    if file_type.is_symlink() || !(file_type.is_file() || file_type.is_dir()) {
        return Ok(FileInfo::empty().with(LOCALFS_TYPE, T_UNHANDLED));
    }
    if file_type.is_dir() {
        return Ok(FileInfo::empty().with(LOCALFS_TYPE, T_DIR));
    }
    Ok(FileInfo::empty()
        .with(LOCALFS_TYPE, T_FILE)
        .with(LOCALFS_MTIME, mtime_seconds(&meta))
        .with(LOCALFS_SIZE, meta.len() as i64))
}

pub fn info_of_regular_file(info: &FileInfo) -> bool {
    info.get_str(LOCALFS_TYPE) == Some(T_FILE)
}

/// Compare two local infos.
///
/// Regular files match on type, size, and mtime within `mtime_precision`.
/// Two `unhandled` infos compare per `unhandled_equal`: probing treats them
/// as equal, while the "did the hidden content change" check must not.
pub fn is_info_eq(
    left: &FileInfo,
    right: &FileInfo,
    mtime_precision: f64,
    unhandled_equal: bool,
) -> bool {
    if left.is_empty() || right.is_empty() {
        return left.is_empty() && right.is_empty();
    }
    let (lt, rt) = (left.get_str(LOCALFS_TYPE), right.get_str(LOCALFS_TYPE));
    if lt != rt {
        return false;
    }
    match lt {
        Some(T_UNHANDLED) => unhandled_equal,
        Some(T_DIR) => true,
        _ => {
            let lm = left.get_f64(LOCALFS_MTIME).unwrap_or(0.0);
            let rm = right.get_f64(LOCALFS_MTIME).unwrap_or(0.0);
            (lm - rm).abs() < mtime_precision
                && left.get_i64(LOCALFS_SIZE) == right.get_i64(LOCALFS_SIZE)
        }
    }
}

/// Live info when it differs from the recorded info, `None` when unchanged.
pub fn local_path_changes(
    path: &Path,
    recorded: &FileInfo,
    mtime_precision: f64,
    case_insensitive: bool,
    unhandled_equal: bool,
) -> io::Result<Option<FileInfo>> {
    let live = live_info(path, case_insensitive)?;
    if is_info_eq(&live, recorded, mtime_precision, unhandled_equal) {
        Ok(None)
    } else {
        Ok(Some(live))
    }
}

/// Byte-wise comparison; a missing side compares unequal.
pub fn files_equal(left: &Path, right: &Path) -> bool {
    let (Ok(a), Ok(b)) = (fs::File::open(left), fs::File::open(right)) else {
        return false;
    };
    match (a.metadata(), b.metadata()) {
        (Ok(ma), Ok(mb)) if ma.len() == mb.len() => {}
        _ => return false,
    }
    let mut reader_a = io::BufReader::new(a);
    let mut reader_b = io::BufReader::new(b);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let read_a = match reader_a.read(&mut buf_a) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let mut filled = 0;
        while filled < read_a {
            match reader_b.read(&mut buf_b[filled..read_a]) {
                Ok(0) => return false,
                Ok(n) => filled += n,
                Err(_) => return false,
            }
        }
        if buf_a[..read_a] != buf_b[..read_a] {
            return false;
        }
        if read_a == 0 {
            return true;
        }
    }
}

/// Best-effort check whether some process holds the file open.
///
/// Scans `/proc/<pid>/fd` on Linux; on other platforms nothing is reported
/// open, and the staging stability checks catch concurrent writers instead.
#[cfg(target_os = "linux")]
pub fn file_is_open(path: &Path) -> bool {
    let Ok(target) = fs::canonicalize(path) else {
        return false;
    };
    let Ok(procs) = fs::read_dir("/proc") else {
        return false;
    };
    for proc_entry in procs.filter_map(|e| e.ok()) {
        let name = proc_entry.file_name();
        if !name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let fd_dir = proc_entry.path().join("fd");
        let Ok(fds) = fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.filter_map(|e| e.ok()) {
            if let Ok(link) = fs::read_link(fd.path()) {
                if link == target {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(not(target_os = "linux"))]
pub fn file_is_open(_path: &Path) -> bool {
    false
}

#[cfg(test)]
#[path = "fsinfo_tests.rs"]
mod tests;
