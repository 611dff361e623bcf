// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! This module defines the capability interfaces the service drives the
//! TPM through, and the two backend families implementing them.

/// Shared policy record bookkeeping for both NVRAM backends
mod records;
/// State shared by the software simulators
mod sim;
/// TPM 1.2 backend
pub mod tpm12;
/// TPM 2.0 backend
pub mod tpm20;

use crate::local_data::{LocalDataError, LocalDataStore};
use libtpmmanager::{NvramResult, NvramSpaceAttribute, NvramSpacePolicy};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use tpm12::{Tpm12Commands, Tpm12Initializer, Tpm12Nvram, Tpm12Simulator, Tpm12Status};
use tpm20::{Tpm20Commands, Tpm20Initializer, Tpm20Nvram, Tpm20Simulator, Tpm20Status};

/// Handle to a command-level TPM shared by the status, initializer and
/// NVRAM halves of one backend.
pub type SharedTpm<C> = Arc<Mutex<C>>;

pub(crate) fn lock_tpm<C>(tpm: &Mutex<C>) -> MutexGuard<'_, C> {
    tpm.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Boot mode measured into PCR0 when firmware did not measure one:
/// developer mode off, recovery off, normal firmware.
pub const UNVERIFIED_BOOT_MODE: [u8; 3] = [0, 0, 1];

/// Length of generated owner, endorsement and lockout secrets.
pub const SECRET_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("TPM command failed, rc={code:#x}")]
    Command { code: u32 },
    #[error("local data access failed")]
    LocalData(#[from] LocalDataError),
    #[error("failed to generate a secret")]
    Random(getrandom::Error),
    #[error("TPM is owned, but the owner secret is not known")]
    OwnedElsewhere,
    #[error("no owner password is stored")]
    NoOwnerPassword,
}

impl TpmError {
    pub fn command(code: u32) -> Self {
        Self::Command { code }
    }
}

/// Failures of the NVRAM layer, one per non-success [`NvramResult`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum NvramError {
    #[error("TPM device error")]
    DeviceError,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("space does not exist")]
    SpaceDoesNotExist,
    #[error("space already exists")]
    SpaceAlreadyExists,
    #[error("operation disabled")]
    OperationDisabled,
}

impl From<NvramError> for NvramResult {
    fn from(err: NvramError) -> Self {
        match err {
            NvramError::DeviceError => Self::DeviceError,
            NvramError::AccessDenied => Self::AccessDenied,
            NvramError::InvalidParameter => Self::InvalidParameter,
            NvramError::SpaceDoesNotExist => Self::SpaceDoesNotExist,
            NvramError::SpaceAlreadyExists => Self::SpaceAlreadyExists,
            NvramError::OperationDisabled => Self::OperationDisabled,
        }
    }
}

impl From<LocalDataError> for NvramError {
    fn from(err: LocalDataError) -> Self {
        log::error!("NVRAM: local data access failed: {}", err);
        Self::DeviceError
    }
}

/// Collapses an NVRAM outcome into the wire result code.
pub fn nvram_result<T>(result: &Result<T, NvramError>) -> NvramResult {
    match result {
        Ok(_) => NvramResult::Success,
        Err(e) => (*e).into(),
    }
}

/// TPM generation a backend talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TpmVersion {
    Tpm12,
    Tpm20,
}

impl fmt::Display for TpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tpm12 => write!(f, "1.2"),
            Self::Tpm20 => write!(f, "2.0"),
        }
    }
}

impl FromStr for TpmVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.2" => Ok(Self::Tpm12),
            "2.0" | "2" => Ok(Self::Tpm20),
            _ => Err(format!("unknown TPM version {s}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipStatus {
    Unowned,
    /// Ownership was started with well-known secrets but not completed.
    PreOwned,
    Owned,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DictionaryAttackInfo {
    pub counter: u32,
    pub threshold: u32,
    pub lockout: bool,
    pub seconds_remaining: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub family: u32,
    pub spec_level: u64,
    pub manufacturer: u32,
    pub tpm_model: u32,
    pub firmware_version: u64,
    pub vendor_specific: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictionaryAttackResetStatus {
    ResetNotNecessary,
    ResetAttemptSucceeded,
    ResetAttemptFailed,
    /// A delegate exists but lacks the reset-lock permission.
    DelegateNotAllowed,
    /// Neither a delegate nor an owner password is available.
    DelegateNotAvailable,
    CounterQueryFailed,
}

/// Live state of a defined NVRAM space.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvramSpaceInfo {
    pub size: u32,
    pub is_read_locked: bool,
    pub is_write_locked: bool,
    pub attributes: Vec<NvramSpaceAttribute>,
    pub policy: NvramSpacePolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupportedFeatures {
    pub pcr0_policy: bool,
    pub extend: bool,
}

/// Read-only view of the TPM state.
pub trait TpmStatus: Debug + Send {
    /// Whether the TPM is enabled and usable. Command failures count as
    /// disabled.
    fn is_tpm_enabled(&mut self) -> bool;

    /// Query the ownership state. Once [`OwnershipStatus::Owned`] has been
    /// observed it is cached until [`TpmStatus::refresh_owner_status`].
    fn get_tpm_owned(&mut self) -> Result<OwnershipStatus, TpmError>;

    /// Read the dictionary attack counters. Never cached.
    fn get_dictionary_attack_info(&mut self) -> Result<DictionaryAttackInfo, TpmError>;

    fn is_dictionary_attack_mitigation_enabled(&mut self) -> Result<bool, TpmError>;

    fn get_version_info(&mut self) -> Result<VersionInfo, TpmError>;

    /// Drop the cached ownership state.
    fn refresh_owner_status(&mut self);
}

/// Ownership bootstrap and maintenance.
pub trait TpmInitializer: Debug + Send {
    /// Take ownership of the TPM, or finish a partially taken ownership.
    ///
    /// # Arguments
    ///
    /// * `owner_dependencies`: Tags recorded in the local data together with
    ///   the generated secrets.
    fn initialize_tpm(&mut self, owner_dependencies: &[String]) -> Result<(), TpmError>;

    /// Preparation that can run before ownership is taken.
    fn pre_initialize_tpm(&mut self) -> Result<(), TpmError>;

    /// Drop stored secrets that no longer match the TPM state.
    fn prune_stored_passwords(&mut self) -> Result<(), TpmError>;

    /// Unconditionally reset the dictionary attack counter.
    fn reset_dictionary_attack_lock(&mut self) -> DictionaryAttackResetStatus;

    /// Make sure a persistent owner delegate exists, creating it if needed.
    fn ensure_persistent_owner_delegate(&mut self) -> Result<(), TpmError>;

    /// Extend PCR0 with [`UNVERIFIED_BOOT_MODE`] if firmware left it unset.
    fn verified_boot_helper(&mut self) -> Result<(), TpmError>;
}

/// NVRAM space lifecycle.
pub trait TpmNvram: Debug + Send {
    /// Define a space and record its policy in the local data.
    ///
    /// # Arguments
    ///
    /// * `index`: NV index of the space.
    /// * `size`: Size of the space in bytes.
    /// * `attributes`: Semantic attributes, translated to permission bits.
    /// * `authorization_value`: Secret of the space for authorized access.
    /// * `policy`: Whether access is bound to the current PCR0 value.
    fn define_space(
        &mut self,
        index: u32,
        size: u32,
        attributes: &[NvramSpaceAttribute],
        authorization_value: &[u8],
        policy: NvramSpacePolicy,
    ) -> Result<(), NvramError>;

    fn destroy_space(&mut self, index: u32) -> Result<(), NvramError>;

    fn write_space(
        &mut self,
        index: u32,
        data: &[u8],
        authorization_value: &[u8],
    ) -> Result<(), NvramError>;

    fn read_space(&mut self, index: u32, authorization_value: &[u8])
        -> Result<Vec<u8>, NvramError>;

    fn lock_space(
        &mut self,
        index: u32,
        lock_read: bool,
        lock_write: bool,
        authorization_value: &[u8],
    ) -> Result<(), NvramError>;

    /// Defined indices, as reported by the TPM.
    fn list_spaces(&mut self) -> Result<Vec<u32>, NvramError>;

    fn get_space_info(&mut self, index: u32) -> Result<NvramSpaceInfo, NvramError>;

    /// Drop policy records of indices the TPM no longer defines.
    fn prune_policies(&mut self) -> Result<(), NvramError>;

    fn supported_features(&self) -> SupportedFeatures;
}

/// The three capability objects of one TPM generation.
#[derive(Debug)]
pub struct TpmBackend {
    pub version: TpmVersion,
    pub status: Box<dyn TpmStatus>,
    pub initializer: Box<dyn TpmInitializer>,
    pub nvram: Box<dyn TpmNvram>,
}

impl TpmBackend {
    pub fn tpm12<C: Tpm12Commands + 'static>(
        tpm: SharedTpm<C>,
        store: Arc<dyn LocalDataStore>,
    ) -> Self {
        Self {
            version: TpmVersion::Tpm12,
            status: Box::new(Tpm12Status::new(tpm.clone())),
            initializer: Box::new(Tpm12Initializer::new(tpm.clone(), store.clone())),
            nvram: Box::new(Tpm12Nvram::new(tpm, store)),
        }
    }

    pub fn tpm20<C: Tpm20Commands + 'static>(
        tpm: SharedTpm<C>,
        store: Arc<dyn LocalDataStore>,
    ) -> Self {
        Self {
            version: TpmVersion::Tpm20,
            status: Box::new(Tpm20Status::new(tpm.clone())),
            initializer: Box::new(Tpm20Initializer::new(tpm.clone(), store.clone())),
            nvram: Box::new(Tpm20Nvram::new(tpm, store)),
        }
    }
}

/// Backend of the given generation running on a fresh in-process simulator.
pub fn simulated_backend(version: TpmVersion, store: Arc<dyn LocalDataStore>) -> TpmBackend {
    match version {
        TpmVersion::Tpm12 => {
            TpmBackend::tpm12(Arc::new(Mutex::new(Tpm12Simulator::new())), store)
        }
        TpmVersion::Tpm20 => {
            TpmBackend::tpm20(Arc::new(Mutex::new(Tpm20Simulator::new())), store)
        }
    }
}

/// Random secret of [`SECRET_SIZE`] bytes.
pub fn generate_secret() -> Result<Vec<u8>, TpmError> {
    let mut secret = vec![0u8; SECRET_SIZE];
    getrandom::getrandom(&mut secret).map_err(TpmError::Random)?;
    Ok(secret)
}
