// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{
    map_tpm_error, NvAttributes, NvAuthorization, NvPublic, PolicySession, Tpm20Commands,
    MAX_NV_INDEX_SIZE, PCR_SIZE, TPM_NT_EXTEND,
};
use crate::local_data::LocalDataStore;
use crate::tpm::records::{
    owner_authorization, prune_policy_records, remove_policy_record, require_owner_password,
    save_policy_record, stored_policy,
};
use crate::tpm::{
    lock_tpm, NvramError, NvramSpaceInfo, SharedTpm, SupportedFeatures, TpmError, TpmNvram,
};
use libtpmmanager::{NvramPolicyRecord, NvramSpaceAttribute, NvramSpacePolicy};
use std::sync::Arc;

#[derive(Debug)]
pub struct Tpm20Nvram<C> {
    tpm: SharedTpm<C>,
    store: Arc<dyn LocalDataStore>,
}

/// Translate semantic attributes into TPMA_NV bits.
fn to_tpm_attributes(attributes: &[NvramSpaceAttribute], bind_to_pcr0: bool) -> NvAttributes {
    let mut bits = NvAttributes::new();
    for attribute in attributes {
        match attribute {
            NvramSpaceAttribute::PersistentWriteLock => bits.set_writedefine(true),
            NvramSpaceAttribute::BootWriteLock => bits.set_write_stclear(true),
            NvramSpaceAttribute::BootReadLock => bits.set_read_stclear(true),
            NvramSpaceAttribute::WriteAuthorization if bind_to_pcr0 => bits.set_policywrite(true),
            NvramSpaceAttribute::WriteAuthorization => bits.set_authwrite(true),
            NvramSpaceAttribute::ReadAuthorization if bind_to_pcr0 => bits.set_policyread(true),
            NvramSpaceAttribute::ReadAuthorization => bits.set_authread(true),
            NvramSpaceAttribute::OwnerWrite => bits.set_ownerwrite(true),
            NvramSpaceAttribute::OwnerRead => bits.set_ownerread(true),
            NvramSpaceAttribute::PlatformWrite => bits.set_ppwrite(true),
            NvramSpaceAttribute::PlatformRead => bits.set_ppread(true),
            NvramSpaceAttribute::GlobalLock => bits.set_globallock(true),
            NvramSpaceAttribute::Extend => bits.set_nv_type(TPM_NT_EXTEND),
        }
    }

    // Every space must be writable and readable through some authorization.
    if !(bits.ppwrite() || bits.ownerwrite() || bits.authwrite() || bits.policywrite()) {
        if bind_to_pcr0 {
            bits.set_policywrite(true);
        } else {
            bits.set_authwrite(true);
        }
    }
    if !(bits.ppread() || bits.ownerread() || bits.authread() || bits.policyread()) {
        if bind_to_pcr0 {
            bits.set_policyread(true);
        } else {
            bits.set_authread(true);
        }
    }
    bits
}

/// Translate TPMA_NV bits back into semantic attributes.
fn from_tpm_attributes(bits: NvAttributes) -> Vec<NvramSpaceAttribute> {
    let mapping = [
        (bits.writedefine(), NvramSpaceAttribute::PersistentWriteLock),
        (bits.write_stclear(), NvramSpaceAttribute::BootWriteLock),
        (bits.read_stclear(), NvramSpaceAttribute::BootReadLock),
        (
            bits.authwrite() || bits.policywrite(),
            NvramSpaceAttribute::WriteAuthorization,
        ),
        (
            bits.authread() || bits.policyread(),
            NvramSpaceAttribute::ReadAuthorization,
        ),
        (bits.ownerwrite(), NvramSpaceAttribute::OwnerWrite),
        (bits.ownerread(), NvramSpaceAttribute::OwnerRead),
        (bits.ppwrite(), NvramSpaceAttribute::PlatformWrite),
        (bits.ppread(), NvramSpaceAttribute::PlatformRead),
        (bits.globallock(), NvramSpaceAttribute::GlobalLock),
        (bits.is_extend(), NvramSpaceAttribute::Extend),
    ];
    mapping
        .into_iter()
        .filter_map(|(set, attribute)| set.then_some(attribute))
        .collect()
}

impl<C: Tpm20Commands> Tpm20Nvram<C> {
    pub fn new(tpm: SharedTpm<C>, store: Arc<dyn LocalDataStore>) -> Self {
        Self { tpm, store }
    }

    /// PolicyPCR(PCR0) followed by PolicyAuthValue.
    fn pcr0_policy_session(tpm: &mut C, auth_value: &[u8]) -> Result<PolicySession, TpmError> {
        let mut session = PolicySession::new();
        tpm.policy_pcr(&mut session, 0)?;
        session.update_auth_value();
        session.set_auth_value(auth_value);
        Ok(session)
    }

    fn read_public(tpm: &mut C, index: u32) -> Result<NvPublic, NvramError> {
        tpm.nv_read_public(index).map_err(map_tpm_error)
    }

    /// Pick the session for a write (or read) of a space from its live
    /// attributes.
    fn authorization(
        &self,
        tpm: &mut C,
        attributes: NvAttributes,
        authorization_value: &[u8],
        write: bool,
    ) -> Result<NvAuthorization, NvramError> {
        let (owner, policy) = if write {
            (attributes.ownerwrite(), attributes.policywrite())
        } else {
            (attributes.ownerread(), attributes.policyread())
        };
        if owner {
            return Ok(NvAuthorization::Owner(owner_authorization(
                self.store.as_ref(),
            )?));
        }
        if policy {
            let session =
                Self::pcr0_policy_session(tpm, authorization_value).map_err(map_tpm_error)?;
            return Ok(NvAuthorization::Policy(session));
        }
        Ok(NvAuthorization::Index(authorization_value.to_vec()))
    }
}

impl<C: Tpm20Commands> TpmNvram for Tpm20Nvram<C> {
    fn define_space(
        &mut self,
        index: u32,
        size: u32,
        attributes: &[NvramSpaceAttribute],
        authorization_value: &[u8],
        policy: NvramSpacePolicy,
    ) -> Result<(), NvramError> {
        let owner_password = require_owner_password(self.store.as_ref())?;
        if size == 0 || size > MAX_NV_INDEX_SIZE {
            log::error!("NVRAM: invalid size {} for space {:#x}", size, index);
            return Err(NvramError::InvalidParameter);
        }
        let data_size = u16::try_from(size).map_err(|_| NvramError::InvalidParameter)?;

        let bind_to_pcr0 = policy == NvramSpacePolicy::Pcr0;
        let tpm_attributes = to_tpm_attributes(attributes, bind_to_pcr0);
        if tpm_attributes.is_extend() && usize::from(data_size) != PCR_SIZE {
            log::error!(
                "NVRAM: extend space {:#x} must be {} bytes",
                index,
                PCR_SIZE
            );
            return Err(NvramError::InvalidParameter);
        }

        let mut tpm = lock_tpm(&self.tpm);
        let policy_digest = if bind_to_pcr0 {
            let session = Self::pcr0_policy_session(&mut tpm, authorization_value)
                .map_err(map_tpm_error)?;
            Some(session.digest().to_vec())
        } else {
            None
        };

        let public = NvPublic {
            nv_index: index,
            attributes: tpm_attributes,
            auth_policy: policy_digest.clone().unwrap_or_default(),
            data_size,
        };
        tpm.nv_define_space(&owner_password, &public, authorization_value)
            .map_err(map_tpm_error)?;

        let record = NvramPolicyRecord {
            index,
            policy,
            policy_digest,
        };
        if let Err(e) = save_policy_record(self.store.as_ref(), record) {
            // The space must not outlive a failed define.
            if let Err(undo) = tpm.nv_undefine_space(&owner_password, index) {
                log::error!(
                    "NVRAM: failed to undo define of space {:#x}: {}",
                    index,
                    undo
                );
            }
            return Err(e);
        }
        drop(tpm);
        log::info!("NVRAM: defined space {:#x}, size {}", index, size);
        Ok(())
    }

    fn destroy_space(&mut self, index: u32) -> Result<(), NvramError> {
        let mut tpm = lock_tpm(&self.tpm);
        Self::read_public(&mut tpm, index)?;
        let owner_password = require_owner_password(self.store.as_ref())?;
        tpm.nv_undefine_space(&owner_password, index)
            .map_err(map_tpm_error)?;
        drop(tpm);

        remove_policy_record(self.store.as_ref(), index)?;
        log::info!("NVRAM: destroyed space {:#x}", index);
        Ok(())
    }

    fn write_space(
        &mut self,
        index: u32,
        data: &[u8],
        authorization_value: &[u8],
    ) -> Result<(), NvramError> {
        let mut tpm = lock_tpm(&self.tpm);
        let public = Self::read_public(&mut tpm, index)?;
        let auth = self.authorization(&mut tpm, public.attributes, authorization_value, true)?;

        if public.attributes.is_extend() {
            return tpm.nv_extend(&auth, index, data).map_err(map_tpm_error);
        }
        if data.len() != usize::from(public.data_size) {
            log::error!(
                "NVRAM: write of {} bytes to space {:#x} of size {}",
                data.len(),
                index,
                public.data_size
            );
            return Err(NvramError::InvalidParameter);
        }
        tpm.nv_write(&auth, index, 0, data).map_err(map_tpm_error)
    }

    fn read_space(
        &mut self,
        index: u32,
        authorization_value: &[u8],
    ) -> Result<Vec<u8>, NvramError> {
        let mut tpm = lock_tpm(&self.tpm);
        let public = Self::read_public(&mut tpm, index)?;
        let auth = self.authorization(&mut tpm, public.attributes, authorization_value, false)?;
        tpm.nv_read(&auth, index, 0, public.data_size)
            .map_err(map_tpm_error)
    }

    fn lock_space(
        &mut self,
        index: u32,
        lock_read: bool,
        lock_write: bool,
        authorization_value: &[u8],
    ) -> Result<(), NvramError> {
        let mut tpm = lock_tpm(&self.tpm);
        let public = Self::read_public(&mut tpm, index)?;
        if lock_read {
            let auth =
                self.authorization(&mut tpm, public.attributes, authorization_value, false)?;
            tpm.nv_read_lock(&auth, index).map_err(map_tpm_error)?;
        }
        if lock_write {
            let auth =
                self.authorization(&mut tpm, public.attributes, authorization_value, true)?;
            tpm.nv_write_lock(&auth, index).map_err(map_tpm_error)?;
        }
        Ok(())
    }

    fn list_spaces(&mut self) -> Result<Vec<u32>, NvramError> {
        lock_tpm(&self.tpm).nv_index_list().map_err(map_tpm_error)
    }

    fn get_space_info(&mut self, index: u32) -> Result<NvramSpaceInfo, NvramError> {
        let public = Self::read_public(&mut lock_tpm(&self.tpm), index)?;
        Ok(NvramSpaceInfo {
            size: u32::from(public.data_size),
            is_read_locked: public.attributes.readlocked(),
            is_write_locked: public.attributes.writelocked(),
            attributes: from_tpm_attributes(public.attributes),
            policy: stored_policy(self.store.as_ref(), index)?,
        })
    }

    fn prune_policies(&mut self) -> Result<(), NvramError> {
        let defined = self.list_spaces()?;
        prune_policy_records(self.store.as_ref(), &defined)
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            pcr0_policy: true,
            extend: true,
        }
    }
}
