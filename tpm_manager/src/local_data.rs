// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! Persistence of the [`LocalData`] record.
//!
//! The record is always read and written as a whole. Callers do a full
//! read-modify-write and must read again after a failed write.

use libtpmmanager::LocalData;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// The record holds TPM secrets; only the daemon's user may access it.
const LOCAL_DATA_FILE_MODE: u32 = 0o600;

/// Default location of the persisted record.
pub const DEFAULT_LOCAL_DATA_PATH: &str = "/var/lib/tpm_manager/local_tpm_data";

#[derive(Debug, Error)]
pub enum LocalDataError {
    #[error("failed to read {}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("malformed local data")]
    Parse(#[source] serde_json::Error),
    #[error("failed to serialize local data")]
    Serialize(#[source] serde_json::Error),
    #[error("local data store is unavailable")]
    Unavailable,
}

/// Whole-record storage for [`LocalData`].
pub trait LocalDataStore: Debug + Send + Sync {
    fn read(&self) -> Result<LocalData, LocalDataError>;
    fn write(&self, data: &LocalData) -> Result<(), LocalDataError>;
}

/// Stores the record as JSON in a single file. A missing file reads as an
/// empty record.
#[derive(Debug, Clone)]
pub struct FileLocalDataStore {
    path: PathBuf,
}

impl FileLocalDataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalDataStore for FileLocalDataStore {
    fn read(&self) -> Result<LocalData, LocalDataError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalData::default()),
            Err(source) => {
                return Err(LocalDataError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(LocalDataError::Parse)
    }

    fn write(&self, data: &LocalData) -> Result<(), LocalDataError> {
        let bytes = serde_json::to_vec(data).map_err(LocalDataError::Serialize)?;
        let temp_path = self.temp_path();
        let write_err = |source| LocalDataError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        // Write a sibling file and rename it over the record.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(LOCAL_DATA_FILE_MODE)
            .open(&temp_path)
            .map_err(write_err)?;
        // A stale temp file keeps its old mode.
        file.set_permissions(fs::Permissions::from_mode(LOCAL_DATA_FILE_MODE))
            .map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&temp_path, &self.path).map_err(write_err)?;

        Ok(())
    }
}

/// Keeps the record in memory. Reads and writes can be made to fail to
/// exercise error paths.
#[derive(Debug, Default)]
pub struct InMemoryLocalDataStore {
    data: Mutex<LocalData>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryLocalDataStore {
    pub fn new(data: LocalData) -> Self {
        Self {
            data: Mutex::new(data),
            ..Default::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current record, bypassing failure injection.
    pub fn snapshot(&self) -> LocalData {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LocalDataStore for InMemoryLocalDataStore {
    fn read(&self) -> Result<LocalData, LocalDataError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LocalDataError::Unavailable);
        }
        Ok(self.snapshot())
    }

    fn write(&self, data: &LocalData) -> Result<(), LocalDataError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LocalDataError::Unavailable);
        }
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = data.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
