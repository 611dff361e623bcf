// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! TPM 1.2 backend.

mod initializer;
mod nvram;
mod simulator;
mod status;

pub use initializer::Tpm12Initializer;
pub use nvram::Tpm12Nvram;
pub use simulator::Tpm12Simulator;
pub use status::Tpm12Status;

use super::{DictionaryAttackInfo, NvramError, TpmError, VersionInfo};
use bitflags::bitflags;
use libtpmmanager::OwnerDelegate;
use sha1::{Digest, Sha1};
use std::fmt::Debug;

/// Size of a SHA-1 PCR value.
pub const PCR_SIZE: usize = 20;
pub type PcrValue = [u8; PCR_SIZE];

/// Owner secret used while ownership is only partially taken.
pub const WELL_KNOWN_SECRET: [u8; 20] = [0u8; 20];

/// Largest NV space this backend defines.
pub const MAX_NV_SPACE_SIZE: u32 = 2048;

pub const TPM_SUCCESS: u32 = 0x00;
pub const TPM_AUTHFAIL: u32 = 0x01;
pub const TPM_BADINDEX: u32 = 0x02;
pub const TPM_BAD_PARAMETER: u32 = 0x03;
pub const TPM_DISABLED: u32 = 0x07;
pub const TPM_FAIL: u32 = 0x09;
pub const TPM_NOSPACE: u32 = 0x11;
pub const TPM_OWNER_SET: u32 = 0x14;
pub const TPM_WRONGPCRVAL: u32 = 0x18;
pub const TPM_AUTH2FAIL: u32 = 0x1D;
pub const TPM_BAD_DATASIZE: u32 = 0x2B;
pub const TPM_AUTH_CONFLICT: u32 = 0x3B;
pub const TPM_AREA_LOCKED: u32 = 0x3C;
pub const TPM_NOT_FULLWRITE: u32 = 0x46;
pub const TPM_DEFEND_LOCK_RUNNING: u32 = 0x803;

bitflags! {
    /// TPM_NV_PER_* permission bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct NvPermissions: u32 {
        const READ_STCLEAR = 1 << 31;
        const AUTHREAD = 1 << 18;
        const OWNERREAD = 1 << 17;
        const PPREAD = 1 << 16;
        const GLOBALLOCK = 1 << 15;
        const WRITE_STCLEAR = 1 << 14;
        const WRITEDEFINE = 1 << 13;
        const WRITEALL = 1 << 12;
        const AUTHWRITE = 1 << 2;
        const OWNERWRITE = 1 << 1;
        const PPWRITE = 1 << 0;
    }
}

bitflags! {
    /// Delegated owner capabilities (TPM_DELEGATE_* row bits).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DelegatePermissions: u32 {
        const RESET_LOCK_VALUE = 1 << 9;
        const READ_PUBEK = 1 << 5;
    }
}

/// TPM_PCR_INFO_SHORT for a PCR selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcrInfo {
    /// Bitmap of selected PCRs, PCR0 in bit 0.
    pub selection: u32,
    pub digest_at_release: PcrValue,
}

/// TPM_NV_DATA_PUBLIC
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvDataPublic {
    pub nv_index: u32,
    pub pcr_info_read: Option<PcrInfo>,
    pub pcr_info_write: Option<PcrInfo>,
    pub permissions: NvPermissions,
    pub read_st_clear: bool,
    pub write_st_clear: bool,
    pub write_define: bool,
    pub data_size: u32,
}

/// TPM_PERMANENT_FLAGS subset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermanentFlags {
    pub disabled: bool,
    pub deactivated: bool,
    pub owned: bool,
}

/// Authorization attached to a TPM 1.2 command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tpm12Authorization {
    /// No authorization session.
    None,
    /// OIAP/OSAP session with the owner secret.
    Owner(Vec<u8>),
    /// Session with the NV space's own secret.
    Index(Vec<u8>),
    /// Session with an owner delegate.
    Delegate { blob: Vec<u8>, secret: Vec<u8> },
}

/// TPM 1.2 commands used by the backend.
pub trait Tpm12Commands: Debug + Send {
    fn permanent_flags(&mut self) -> Result<PermanentFlags, TpmError>;
    fn take_ownership(&mut self, owner_auth: &[u8]) -> Result<(), TpmError>;
    /// TPM_ChangeAuthOwner
    fn change_owner_auth(&mut self, current_auth: &[u8], new_auth: &[u8]) -> Result<(), TpmError>;
    /// Run an owner-authorized no-op to test the owner secret.
    fn check_owner_auth(&mut self, owner_auth: &[u8]) -> Result<(), TpmError>;
    fn create_owner_delegate(
        &mut self,
        owner_auth: &[u8],
        permissions: DelegatePermissions,
    ) -> Result<OwnerDelegate, TpmError>;
    fn dictionary_attack_info(&mut self) -> Result<DictionaryAttackInfo, TpmError>;
    fn reset_lock_value(&mut self, auth: &Tpm12Authorization) -> Result<(), TpmError>;
    fn version_info(&mut self) -> Result<VersionInfo, TpmError>;
    fn pcr_read(&mut self, pcr: u32) -> Result<PcrValue, TpmError>;
    fn pcr_extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<(), TpmError>;
    fn nv_index_list(&mut self) -> Result<Vec<u32>, TpmError>;
    fn nv_read_public(&mut self, index: u32) -> Result<NvDataPublic, TpmError>;
    fn nv_define_space(
        &mut self,
        owner_auth: &[u8],
        public: &NvDataPublic,
        auth_value: &[u8],
    ) -> Result<(), TpmError>;
    /// TPM_NV_DefineSpace with a zero size.
    fn nv_release_space(&mut self, owner_auth: &[u8], index: u32) -> Result<(), TpmError>;
    /// TPM_NV_WriteValue(Auth). A zero-length write at offset 0 locks the
    /// space for writing.
    fn nv_write(
        &mut self,
        auth: &Tpm12Authorization,
        index: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), TpmError>;
    /// TPM_NV_ReadValue(Auth). A zero-length read locks the space for
    /// reading.
    fn nv_read(
        &mut self,
        auth: &Tpm12Authorization,
        index: u32,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>, TpmError>;
}

/// TPM_COMPOSITE_HASH over the PCRs in `selection` with the given values.
pub fn pcr_composite_digest(selection: u32, values: &[PcrValue]) -> PcrValue {
    let select = selection.to_le_bytes();
    let value_size = u32::try_from(values.len() * PCR_SIZE).unwrap_or(u32::MAX);

    let mut hasher = Sha1::new();
    hasher.update(3u16.to_be_bytes());
    hasher.update(&select[..3]);
    hasher.update(value_size.to_be_bytes());
    for value in values {
        hasher.update(value);
    }
    hasher.finalize().into()
}

/// Map a TPM 1.2 failure to the NVRAM result taxonomy.
pub fn map_tpm_error(err: TpmError) -> NvramError {
    let code = match err {
        TpmError::Command { code } => code,
        TpmError::NoOwnerPassword => return NvramError::AccessDenied,
        other => {
            log::error!("NVRAM: {}", other);
            return NvramError::DeviceError;
        }
    };
    match code {
        TPM_BADINDEX => NvramError::SpaceDoesNotExist,
        TPM_AUTHFAIL | TPM_AUTH2FAIL | TPM_WRONGPCRVAL => NvramError::AccessDenied,
        TPM_AREA_LOCKED | TPM_DEFEND_LOCK_RUNNING | TPM_DISABLED => NvramError::OperationDisabled,
        TPM_BAD_PARAMETER | TPM_BAD_DATASIZE | TPM_NOSPACE | TPM_NOT_FULLWRITE => {
            NvramError::InvalidParameter
        }
        TPM_AUTH_CONFLICT => NvramError::SpaceAlreadyExists,
        _ => {
            log::error!("NVRAM: TPM 1.2 command failed, rc={:#x}", code);
            NvramError::DeviceError
        }
    }
}
