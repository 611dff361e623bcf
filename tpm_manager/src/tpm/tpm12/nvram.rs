// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{
    map_tpm_error, pcr_composite_digest, NvDataPublic, NvPermissions, PcrInfo, Tpm12Authorization,
    Tpm12Commands, MAX_NV_SPACE_SIZE,
};
use crate::local_data::LocalDataStore;
use crate::tpm::records::{
    owner_authorization, prune_policy_records, remove_policy_record, require_owner_password,
    save_policy_record, stored_policy,
};
use crate::tpm::{lock_tpm, NvramError, NvramSpaceInfo, SharedTpm, SupportedFeatures, TpmNvram};
use libtpmmanager::{NvramPolicyRecord, NvramSpaceAttribute, NvramSpacePolicy};
use std::sync::Arc;

/// Selection bitmap of PCR0 alone.
const PCR0_SELECTION: u32 = 1;

#[derive(Debug)]
pub struct Tpm12Nvram<C> {
    tpm: SharedTpm<C>,
    store: Arc<dyn LocalDataStore>,
}

/// Translate semantic attributes into TPM_NV_PER_* bits. Attributes without
/// a TPM 1.2 counterpart are rejected.
fn to_tpm_permissions(attributes: &[NvramSpaceAttribute]) -> Result<NvPermissions, NvramError> {
    let mut permissions = NvPermissions::empty();
    for attribute in attributes {
        permissions |= match attribute {
            NvramSpaceAttribute::PersistentWriteLock => NvPermissions::WRITEDEFINE,
            NvramSpaceAttribute::BootWriteLock => NvPermissions::WRITE_STCLEAR,
            NvramSpaceAttribute::BootReadLock => NvPermissions::READ_STCLEAR,
            NvramSpaceAttribute::WriteAuthorization => NvPermissions::AUTHWRITE,
            NvramSpaceAttribute::ReadAuthorization => NvPermissions::AUTHREAD,
            NvramSpaceAttribute::OwnerWrite => NvPermissions::OWNERWRITE,
            NvramSpaceAttribute::OwnerRead => NvPermissions::OWNERREAD,
            NvramSpaceAttribute::PlatformWrite => NvPermissions::PPWRITE,
            NvramSpaceAttribute::GlobalLock => NvPermissions::GLOBALLOCK,
            NvramSpaceAttribute::PlatformRead | NvramSpaceAttribute::Extend => {
                log::error!(
                    "NVRAM: attribute {:?} is not supported by TPM 1.2",
                    attribute
                );
                return Err(NvramError::InvalidParameter);
            }
        };
    }
    Ok(permissions)
}

fn from_tpm_permissions(permissions: NvPermissions) -> Vec<NvramSpaceAttribute> {
    let mapping = [
        (NvPermissions::WRITEDEFINE, NvramSpaceAttribute::PersistentWriteLock),
        (NvPermissions::WRITE_STCLEAR, NvramSpaceAttribute::BootWriteLock),
        (NvPermissions::READ_STCLEAR, NvramSpaceAttribute::BootReadLock),
        (NvPermissions::AUTHWRITE, NvramSpaceAttribute::WriteAuthorization),
        (NvPermissions::AUTHREAD, NvramSpaceAttribute::ReadAuthorization),
        (NvPermissions::OWNERWRITE, NvramSpaceAttribute::OwnerWrite),
        (NvPermissions::OWNERREAD, NvramSpaceAttribute::OwnerRead),
        (NvPermissions::PPWRITE, NvramSpaceAttribute::PlatformWrite),
        (NvPermissions::GLOBALLOCK, NvramSpaceAttribute::GlobalLock),
    ];
    mapping
        .into_iter()
        .filter_map(|(bit, attribute)| permissions.contains(bit).then_some(attribute))
        .collect()
}

impl<C: Tpm12Commands> Tpm12Nvram<C> {
    pub fn new(tpm: SharedTpm<C>, store: Arc<dyn LocalDataStore>) -> Self {
        Self { tpm, store }
    }

    fn read_public(tpm: &mut C, index: u32) -> Result<NvDataPublic, NvramError> {
        tpm.nv_read_public(index).map_err(map_tpm_error)
    }

    fn authorization(
        &self,
        permissions: NvPermissions,
        authorization_value: &[u8],
        write: bool,
    ) -> Result<Tpm12Authorization, NvramError> {
        let (owner, auth) = if write {
            (NvPermissions::OWNERWRITE, NvPermissions::AUTHWRITE)
        } else {
            (NvPermissions::OWNERREAD, NvPermissions::AUTHREAD)
        };
        if permissions.contains(owner) {
            Ok(Tpm12Authorization::Owner(owner_authorization(
                self.store.as_ref(),
            )?))
        } else if permissions.contains(auth) {
            Ok(Tpm12Authorization::Index(authorization_value.to_vec()))
        } else {
            Ok(Tpm12Authorization::None)
        }
    }
}

impl<C: Tpm12Commands> TpmNvram for Tpm12Nvram<C> {
    fn define_space(
        &mut self,
        index: u32,
        size: u32,
        attributes: &[NvramSpaceAttribute],
        authorization_value: &[u8],
        policy: NvramSpacePolicy,
    ) -> Result<(), NvramError> {
        let owner_password = require_owner_password(self.store.as_ref())?;
        if size == 0 || size > MAX_NV_SPACE_SIZE {
            log::error!("NVRAM: invalid size {} for space {:#x}", size, index);
            return Err(NvramError::InvalidParameter);
        }
        let permissions = to_tpm_permissions(attributes)?;

        let mut tpm = lock_tpm(&self.tpm);
        let pcr_info = if policy == NvramSpacePolicy::Pcr0 {
            let pcr0 = tpm.pcr_read(0).map_err(map_tpm_error)?;
            Some(PcrInfo {
                selection: PCR0_SELECTION,
                digest_at_release: pcr_composite_digest(PCR0_SELECTION, &[pcr0]),
            })
        } else {
            None
        };

        let public = NvDataPublic {
            nv_index: index,
            pcr_info_read: pcr_info,
            pcr_info_write: pcr_info,
            permissions,
            data_size: size,
            ..Default::default()
        };
        tpm.nv_define_space(&owner_password, &public, authorization_value)
            .map_err(map_tpm_error)?;

        let record = NvramPolicyRecord {
            index,
            policy,
            policy_digest: pcr_info.map(|info| info.digest_at_release.to_vec()),
        };
        if let Err(e) = save_policy_record(self.store.as_ref(), record) {
            // The space must not outlive a failed define.
            if let Err(undo) = tpm.nv_release_space(&owner_password, index) {
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
        tpm.nv_release_space(&owner_password, index)
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
        if u32::try_from(data.len()).ok() != Some(public.data_size) {
            log::error!(
                "NVRAM: write of {} bytes to space {:#x} of size {}",
                data.len(),
                index,
                public.data_size
            );
            return Err(NvramError::InvalidParameter);
        }
        let auth = self.authorization(public.permissions, authorization_value, true)?;
        tpm.nv_write(&auth, index, 0, data).map_err(map_tpm_error)
    }

    fn read_space(
        &mut self,
        index: u32,
        authorization_value: &[u8],
    ) -> Result<Vec<u8>, NvramError> {
        let mut tpm = lock_tpm(&self.tpm);
        let public = Self::read_public(&mut tpm, index)?;
        let auth = self.authorization(public.permissions, authorization_value, false)?;
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
            let auth = self.authorization(public.permissions, authorization_value, false)?;
            tpm.nv_read(&auth, index, 0, 0).map_err(map_tpm_error)?;
        }
        if lock_write {
            let auth = self.authorization(public.permissions, authorization_value, true)?;
            tpm.nv_write(&auth, index, 0, &[]).map_err(map_tpm_error)?;
        }
        Ok(())
    }

    fn list_spaces(&mut self) -> Result<Vec<u32>, NvramError> {
        lock_tpm(&self.tpm).nv_index_list().map_err(map_tpm_error)
    }

    fn get_space_info(&mut self, index: u32) -> Result<NvramSpaceInfo, NvramError> {
        let public = Self::read_public(&mut lock_tpm(&self.tpm), index)?;
        Ok(NvramSpaceInfo {
            size: public.data_size,
            is_read_locked: public.read_st_clear,
            is_write_locked: public.write_st_clear || public.write_define,
            attributes: from_tpm_permissions(public.permissions),
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
            extend: false,
        }
    }
}
