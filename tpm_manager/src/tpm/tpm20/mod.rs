// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! TPM 2.0 backend.
//!
//! [`Tpm20Commands`] is the command-level interface, one method per TPM
//! command the backend issues. The status, initializer and NVRAM objects
//! translate the service operations into sequences of those commands.

mod initializer;
mod nvram;
mod policy;
mod simulator;
mod status;

pub use initializer::Tpm20Initializer;
pub use nvram::Tpm20Nvram;
pub use policy::PolicySession;
pub use simulator::Tpm20Simulator;
pub use status::Tpm20Status;

use super::{DictionaryAttackInfo, NvramError, TpmError, VersionInfo};
use bitfield_struct::bitfield;
use std::fmt::Debug;

/// Size of a SHA-256 PCR value.
pub const PCR_SIZE: usize = 32;
pub type PcrValue = [u8; PCR_SIZE];

/// Largest NV index this backend defines.
pub const MAX_NV_INDEX_SIZE: u32 = 2048;

pub const TPM_CC_POLICY_AUTH_VALUE: u32 = 0x0000_016B;
pub const TPM_CC_POLICY_PCR: u32 = 0x0000_017F;
pub const TPM_ALG_SHA256: u16 = 0x000B;

/// TPM_NT values stored in [`NvAttributes::nv_type`].
pub const TPM_NT_ORDINARY: u8 = 0x0;
pub const TPM_NT_EXTEND: u8 = 0x4;

pub const TPM_RC_SUCCESS: u32 = 0x000;
pub const TPM_RC_ATTRIBUTES: u32 = 0x082;
pub const TPM_RC_VALUE: u32 = 0x084;
pub const TPM_RC_HANDLE: u32 = 0x08B;
pub const TPM_RC_AUTH_FAIL: u32 = 0x08E;
pub const TPM_RC_SIZE: u32 = 0x095;
pub const TPM_RC_POLICY_FAIL: u32 = 0x09D;
pub const TPM_RC_BAD_AUTH: u32 = 0x0A2;
pub const TPM_RC_FAILURE: u32 = 0x101;
pub const TPM_RC_AUTH_UNAVAILABLE: u32 = 0x12F;
pub const TPM_RC_NV_RANGE: u32 = 0x146;
pub const TPM_RC_NV_SIZE: u32 = 0x147;
pub const TPM_RC_NV_LOCKED: u32 = 0x148;
pub const TPM_RC_NV_AUTHORIZATION: u32 = 0x149;
pub const TPM_RC_NV_UNINITIALIZED: u32 = 0x14A;
pub const TPM_RC_NV_SPACE: u32 = 0x14B;
pub const TPM_RC_NV_DEFINED: u32 = 0x14C;
pub const TPM_RC_LOCKOUT: u32 = 0x921;

/// Strip the handle/session/parameter number from a format-one code.
pub fn base_response_code(rc: u32) -> u32 {
    if rc & 0x80 != 0 {
        rc & 0xBF
    } else {
        rc
    }
}

/// TPMA_NV
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct NvAttributes {
    pub ppwrite: bool,
    pub ownerwrite: bool,
    pub authwrite: bool,
    pub policywrite: bool,
    #[bits(4)]
    pub nv_type: u8,
    #[bits(2)]
    _reserved0: u8,
    pub policy_delete: bool,
    pub writelocked: bool,
    pub writeall: bool,
    pub writedefine: bool,
    pub write_stclear: bool,
    pub globallock: bool,
    pub ppread: bool,
    pub ownerread: bool,
    pub authread: bool,
    pub policyread: bool,
    #[bits(5)]
    _reserved1: u8,
    pub no_da: bool,
    pub orderly: bool,
    pub clear_stclear: bool,
    pub readlocked: bool,
    pub written: bool,
    pub platformcreate: bool,
    pub read_stclear: bool,
}

impl NvAttributes {
    pub fn is_extend(&self) -> bool {
        self.nv_type() == TPM_NT_EXTEND
    }
}

/// TPMS_NV_PUBLIC
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NvPublic {
    pub nv_index: u32,
    pub attributes: NvAttributes,
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hierarchy {
    Owner,
    Endorsement,
    Lockout,
}

/// Which hierarchies have a non-empty authorization value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HierarchyAuthStatus {
    pub owner: bool,
    pub endorsement: bool,
    pub lockout: bool,
}

impl HierarchyAuthStatus {
    pub fn is_set(&self, hierarchy: Hierarchy) -> bool {
        match hierarchy {
            Hierarchy::Owner => self.owner,
            Hierarchy::Endorsement => self.endorsement,
            Hierarchy::Lockout => self.lockout,
        }
    }

    pub fn all(&self) -> bool {
        self.owner && self.endorsement && self.lockout
    }

    pub fn none(&self) -> bool {
        !self.owner && !self.endorsement && !self.lockout
    }
}

/// Authorization session for an NV command.
#[derive(Clone, Debug)]
pub enum NvAuthorization {
    /// Owner hierarchy HMAC session.
    Owner(Vec<u8>),
    /// HMAC session with the index's own authorization value.
    Index(Vec<u8>),
    /// Policy session.
    Policy(PolicySession),
}

/// TPM 2.0 commands used by the backend.
pub trait Tpm20Commands: Debug + Send {
    /// TPM2_GetCapability(TPM_PT_STARTUP_CLEAR): storage hierarchy enabled.
    fn startup_enabled(&mut self) -> Result<bool, TpmError>;
    /// TPM2_GetCapability(TPM_PT_PERMANENT): which hierarchy auths are set.
    fn hierarchy_auth_status(&mut self) -> Result<HierarchyAuthStatus, TpmError>;
    fn hierarchy_change_auth(
        &mut self,
        hierarchy: Hierarchy,
        current_auth: &[u8],
        new_auth: &[u8],
    ) -> Result<(), TpmError>;
    fn storage_root_key_present(&mut self) -> Result<bool, TpmError>;
    /// TPM2_CreatePrimary + TPM2_EvictControl of the storage root key.
    fn create_storage_root_key(&mut self, owner_auth: &[u8]) -> Result<(), TpmError>;
    fn dictionary_attack_parameters(&mut self) -> Result<DictionaryAttackInfo, TpmError>;
    fn dictionary_attack_lock_reset(&mut self, lockout_auth: &[u8]) -> Result<(), TpmError>;
    fn version_info(&mut self) -> Result<VersionInfo, TpmError>;
    fn pcr_read(&mut self, pcr: u32) -> Result<PcrValue, TpmError>;
    fn pcr_extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<(), TpmError>;

    /// TPM2_PolicyPCR for a single PCR, evaluated against its current value.
    fn policy_pcr(&mut self, session: &mut PolicySession, pcr: u32) -> Result<(), TpmError> {
        let value = self.pcr_read(pcr)?;
        session.update_pcr(pcr, &value);
        Ok(())
    }

    fn nv_index_list(&mut self) -> Result<Vec<u32>, TpmError>;
    fn nv_read_public(&mut self, index: u32) -> Result<NvPublic, TpmError>;
    fn nv_define_space(
        &mut self,
        owner_auth: &[u8],
        public: &NvPublic,
        auth_value: &[u8],
    ) -> Result<(), TpmError>;
    fn nv_undefine_space(&mut self, owner_auth: &[u8], index: u32) -> Result<(), TpmError>;
    fn nv_write(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        offset: u16,
        data: &[u8],
    ) -> Result<(), TpmError>;
    fn nv_extend(&mut self, auth: &NvAuthorization, index: u32, data: &[u8])
        -> Result<(), TpmError>;
    fn nv_read(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        offset: u16,
        size: u16,
    ) -> Result<Vec<u8>, TpmError>;
    fn nv_read_lock(&mut self, auth: &NvAuthorization, index: u32) -> Result<(), TpmError>;
    fn nv_write_lock(&mut self, auth: &NvAuthorization, index: u32) -> Result<(), TpmError>;
}

/// Map a TPM 2.0 failure to the NVRAM result taxonomy.
pub fn map_tpm_error(err: TpmError) -> NvramError {
    let code = match err {
        TpmError::Command { code } => code,
        TpmError::NoOwnerPassword => return NvramError::AccessDenied,
        other => {
            log::error!("NVRAM: {}", other);
            return NvramError::DeviceError;
        }
    };
    match base_response_code(code) {
        TPM_RC_HANDLE => NvramError::SpaceDoesNotExist,
        TPM_RC_AUTH_FAIL
        | TPM_RC_BAD_AUTH
        | TPM_RC_POLICY_FAIL
        | TPM_RC_NV_AUTHORIZATION
        | TPM_RC_AUTH_UNAVAILABLE => NvramError::AccessDenied,
        TPM_RC_NV_LOCKED | TPM_RC_LOCKOUT => NvramError::OperationDisabled,
        TPM_RC_NV_RANGE | TPM_RC_NV_SIZE | TPM_RC_SIZE | TPM_RC_ATTRIBUTES | TPM_RC_VALUE => {
            NvramError::InvalidParameter
        }
        TPM_RC_NV_DEFINED => NvramError::SpaceAlreadyExists,
        _ => {
            log::error!("NVRAM: TPM 2.0 command failed, rc={:#x}", code);
            NvramError::DeviceError
        }
    }
}
