// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! In-process TPM 1.2 model covering the commands in [`Tpm12Commands`].

use super::*;
use crate::tpm::generate_secret;
use crate::tpm::sim::{CommandLog, DictionaryAttackState};
use std::collections::BTreeMap;

const PCR_COUNT: usize = 24;

/// "1.2\0"
const TPM12_FAMILY: u32 = 0x312E_3200;
/// "CROS"
const SIMULATOR_MANUFACTURER: u32 = 0x4352_4F53;

/// Unwritten NV bytes read as all ones.
const NV_ERASED: u8 = 0xFF;

#[derive(Debug)]
struct Space {
    public: NvDataPublic,
    auth_value: Vec<u8>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Delegate {
    blob: Vec<u8>,
    secret: Vec<u8>,
    permissions: DelegatePermissions,
}

#[derive(Debug)]
pub struct Tpm12Simulator {
    enabled: bool,
    owner_auth: Option<Vec<u8>>,
    pcrs: [PcrValue; PCR_COUNT],
    spaces: BTreeMap<u32, Space>,
    delegates: Vec<Delegate>,
    da: DictionaryAttackState,
    log: CommandLog,
    last_reset_authorization: Option<&'static str>,
}

impl Default for Tpm12Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Tpm12Simulator {
    /// An enabled, active TPM without an owner.
    pub fn new() -> Self {
        Self {
            enabled: true,
            owner_auth: None,
            pcrs: [[0u8; PCR_SIZE]; PCR_COUNT],
            spaces: BTreeMap::new(),
            delegates: Vec::new(),
            da: DictionaryAttackState::default(),
            log: CommandLog::default(),
            last_reset_authorization: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// TPM_OwnerClear: drop the owner, delegates and owner-defined spaces.
    pub fn clear(&mut self) {
        self.owner_auth = None;
        self.delegates.clear();
        self.spaces.clear();
        self.da.reset();
    }

    /// TPM_Startup(ST_CLEAR) after a reboot.
    pub fn restart(&mut self) {
        self.pcrs = [[0u8; PCR_SIZE]; PCR_COUNT];
        for space in self.spaces.values_mut() {
            space.public.read_st_clear = false;
            space.public.write_st_clear = false;
        }
    }

    /// Extend `pcr` with the SHA-1 of `data`.
    pub fn extend_pcr(&mut self, pcr: u32, data: &[u8]) {
        if let Some(value) = self.pcrs.get_mut(pcr as usize) {
            *value = extend(value, &Sha1::digest(data).into());
        }
    }

    pub fn set_dictionary_attack_counter(&mut self, counter: u32) {
        self.da.counter = counter;
    }

    /// A zero threshold turns DA mitigation off.
    pub fn set_dictionary_attack_threshold(&mut self, threshold: u32) {
        self.da.threshold = threshold;
    }

    /// Make the next `times` calls of `command` fail with `code`.
    pub fn fail_command(&mut self, command: &'static str, times: usize, code: u32) {
        self.log.fail(command, times, code);
    }

    /// Number of times `command` was issued.
    pub fn command_calls(&self, command: &str) -> usize {
        self.log.calls(command)
    }

    /// Kind of authorization used by the last successful TPM_ResetLockValue.
    pub fn last_reset_authorization(&self) -> Option<&'static str> {
        self.last_reset_authorization
    }

    fn check_enabled(&self) -> Result<(), TpmError> {
        if self.enabled {
            Ok(())
        } else {
            Err(TpmError::command(TPM_DISABLED))
        }
    }

    fn check_owner(&self, owner_auth: &[u8]) -> Result<(), TpmError> {
        match &self.owner_auth {
            Some(expected) if expected.as_slice() == owner_auth => Ok(()),
            _ => Err(TpmError::command(TPM_AUTHFAIL)),
        }
    }

    fn current_composite(&self, selection: u32) -> PcrValue {
        let values: Vec<PcrValue> = (0..PCR_COUNT)
            .filter(|pcr| selection & (1 << pcr) != 0)
            .map(|pcr| self.pcrs[pcr])
            .collect();
        pcr_composite_digest(selection, &values)
    }

    fn check_pcrs(&self, info: Option<&PcrInfo>) -> Result<(), TpmError> {
        match info {
            Some(info) if self.current_composite(info.selection) != info.digest_at_release => {
                Err(TpmError::command(TPM_WRONGPCRVAL))
            }
            _ => Ok(()),
        }
    }

    /// Check `auth` against the owner or index permission pair.
    fn authorize(
        &mut self,
        auth: &Tpm12Authorization,
        index: u32,
        owner_permission: NvPermissions,
        auth_permission: NvPermissions,
    ) -> Result<(), TpmError> {
        let space = self
            .spaces
            .get(&index)
            .ok_or(TpmError::command(TPM_BADINDEX))?;
        let permissions = space.public.permissions;

        if permissions.contains(owner_permission) {
            match auth {
                Tpm12Authorization::Owner(password) => self.check_owner(password),
                _ => Err(TpmError::command(TPM_AUTH_CONFLICT)),
            }
        } else if permissions.contains(auth_permission) {
            match auth {
                Tpm12Authorization::Index(_) if self.da.locked_out() => {
                    Err(TpmError::command(TPM_DEFEND_LOCK_RUNNING))
                }
                Tpm12Authorization::Index(password) if *password == space.auth_value => Ok(()),
                Tpm12Authorization::Index(_) => {
                    self.da.record_failure();
                    Err(TpmError::command(TPM_AUTHFAIL))
                }
                _ => Err(TpmError::command(TPM_AUTH_CONFLICT)),
            }
        } else {
            Ok(())
        }
    }
}

fn extend(current: &PcrValue, digest: &PcrValue) -> PcrValue {
    let mut hasher = Sha1::new();
    hasher.update(current);
    hasher.update(digest);
    hasher.finalize().into()
}

impl Tpm12Commands for Tpm12Simulator {
    fn permanent_flags(&mut self) -> Result<PermanentFlags, TpmError> {
        self.log.enter("permanent_flags")?;
        Ok(PermanentFlags {
            disabled: !self.enabled,
            deactivated: !self.enabled,
            owned: self.owner_auth.is_some(),
        })
    }

    fn take_ownership(&mut self, owner_auth: &[u8]) -> Result<(), TpmError> {
        self.log.enter("take_ownership")?;
        self.check_enabled()?;
        if self.owner_auth.is_some() {
            return Err(TpmError::command(TPM_OWNER_SET));
        }
        self.owner_auth = Some(owner_auth.to_vec());
        Ok(())
    }

    fn change_owner_auth(&mut self, current_auth: &[u8], new_auth: &[u8]) -> Result<(), TpmError> {
        self.log.enter("change_owner_auth")?;
        self.check_enabled()?;
        self.check_owner(current_auth)?;
        self.owner_auth = Some(new_auth.to_vec());
        // Delegates are bound to the owner secret they were created under.
        self.delegates.clear();
        Ok(())
    }

    fn check_owner_auth(&mut self, owner_auth: &[u8]) -> Result<(), TpmError> {
        self.log.enter("check_owner_auth")?;
        self.check_enabled()?;
        self.check_owner(owner_auth)
    }

    fn create_owner_delegate(
        &mut self,
        owner_auth: &[u8],
        permissions: DelegatePermissions,
    ) -> Result<OwnerDelegate, TpmError> {
        self.log.enter("create_owner_delegate")?;
        self.check_enabled()?;
        self.check_owner(owner_auth)?;

        let secret = generate_secret().map_err(|_| TpmError::command(TPM_FAIL))?;
        let blob = format!("delegate-{}", self.delegates.len()).into_bytes();
        self.delegates.push(Delegate {
            blob: blob.clone(),
            secret: secret.clone(),
            permissions,
        });
        Ok(OwnerDelegate {
            blob,
            secret,
            has_reset_lock_permissions: permissions.contains(DelegatePermissions::RESET_LOCK_VALUE),
        })
    }

    fn dictionary_attack_info(&mut self) -> Result<DictionaryAttackInfo, TpmError> {
        self.log.enter("dictionary_attack_info")?;
        self.check_enabled()?;
        Ok(self.da.info())
    }

    fn reset_lock_value(&mut self, auth: &Tpm12Authorization) -> Result<(), TpmError> {
        self.log.enter("reset_lock_value")?;
        self.check_enabled()?;
        let kind = match auth {
            Tpm12Authorization::Owner(password) => {
                self.check_owner(password)?;
                "owner"
            }
            Tpm12Authorization::Delegate { blob, secret } => {
                let allowed = self.delegates.iter().any(|d| {
                    d.blob == *blob
                        && d.secret == *secret
                        && d.permissions
                            .contains(DelegatePermissions::RESET_LOCK_VALUE)
                });
                if !allowed {
                    return Err(TpmError::command(TPM_AUTHFAIL));
                }
                "delegate"
            }
            _ => return Err(TpmError::command(TPM_AUTHFAIL)),
        };
        self.da.reset();
        self.last_reset_authorization = Some(kind);
        Ok(())
    }

    fn version_info(&mut self) -> Result<VersionInfo, TpmError> {
        self.log.enter("version_info")?;
        self.check_enabled()?;
        Ok(VersionInfo {
            family: TPM12_FAMILY,
            spec_level: (2 << 32) | 3,
            manufacturer: SIMULATOR_MANUFACTURER,
            tpm_model: 0xFFFF_FFFF,
            firmware_version: 0x0000_0001,
            vendor_specific: b"tpm_manager sim".to_vec(),
        })
    }

    fn pcr_read(&mut self, pcr: u32) -> Result<PcrValue, TpmError> {
        self.log.enter("pcr_read")?;
        self.check_enabled()?;
        self.pcrs
            .get(pcr as usize)
            .copied()
            .ok_or(TpmError::command(TPM_BAD_PARAMETER))
    }

    fn pcr_extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<(), TpmError> {
        self.log.enter("pcr_extend")?;
        self.check_enabled()?;
        let value = self
            .pcrs
            .get_mut(pcr as usize)
            .ok_or(TpmError::command(TPM_BAD_PARAMETER))?;
        *value = extend(value, digest);
        Ok(())
    }

    fn nv_index_list(&mut self) -> Result<Vec<u32>, TpmError> {
        self.log.enter("nv_index_list")?;
        self.check_enabled()?;
        Ok(self.spaces.keys().copied().collect())
    }

    fn nv_read_public(&mut self, index: u32) -> Result<NvDataPublic, TpmError> {
        self.log.enter("nv_read_public")?;
        self.check_enabled()?;
        self.spaces
            .get(&index)
            .map(|space| space.public.clone())
            .ok_or(TpmError::command(TPM_BADINDEX))
    }

    fn nv_define_space(
        &mut self,
        owner_auth: &[u8],
        public: &NvDataPublic,
        auth_value: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("nv_define_space")?;
        self.check_enabled()?;
        self.check_owner(owner_auth)?;
        if self.spaces.contains_key(&public.nv_index) {
            return Err(TpmError::command(TPM_AUTH_CONFLICT));
        }
        if public.data_size == 0 {
            return Err(TpmError::command(TPM_BAD_DATASIZE));
        }
        if public.data_size > MAX_NV_SPACE_SIZE {
            return Err(TpmError::command(TPM_NOSPACE));
        }

        let mut public = public.clone();
        public.read_st_clear = false;
        public.write_st_clear = false;
        public.write_define = false;
        self.spaces.insert(
            public.nv_index,
            Space {
                data: vec![NV_ERASED; public.data_size as usize],
                public,
                auth_value: auth_value.to_vec(),
            },
        );
        Ok(())
    }

    fn nv_release_space(&mut self, owner_auth: &[u8], index: u32) -> Result<(), TpmError> {
        self.log.enter("nv_release_space")?;
        self.check_enabled()?;
        self.check_owner(owner_auth)?;
        self.spaces
            .remove(&index)
            .map(|_| ())
            .ok_or(TpmError::command(TPM_BADINDEX))
    }

    fn nv_write(
        &mut self,
        auth: &Tpm12Authorization,
        index: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("nv_write")?;
        self.check_enabled()?;
        self.authorize(
            auth,
            index,
            NvPermissions::OWNERWRITE,
            NvPermissions::AUTHWRITE,
        )?;
        let write_info = self
            .spaces
            .get(&index)
            .and_then(|space| space.public.pcr_info_write);
        self.check_pcrs(write_info.as_ref())?;

        let space = self
            .spaces
            .get_mut(&index)
            .ok_or(TpmError::command(TPM_BADINDEX))?;
        if space.public.write_st_clear || space.public.write_define {
            return Err(TpmError::command(TPM_AREA_LOCKED));
        }
        let permissions = space.public.permissions;
        if data.is_empty() && offset == 0 {
            if permissions.contains(NvPermissions::WRITEDEFINE) {
                space.public.write_define = true;
            } else {
                space.public.write_st_clear = true;
            }
            return Ok(());
        }

        let start = offset as usize;
        let end = start + data.len();
        if end > space.data.len() {
            return Err(TpmError::command(TPM_NOSPACE));
        }
        if permissions.contains(NvPermissions::WRITEALL) && data.len() != space.data.len() {
            return Err(TpmError::command(TPM_NOT_FULLWRITE));
        }
        space.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn nv_read(
        &mut self,
        auth: &Tpm12Authorization,
        index: u32,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>, TpmError> {
        self.log.enter("nv_read")?;
        self.check_enabled()?;
        self.authorize(
            auth,
            index,
            NvPermissions::OWNERREAD,
            NvPermissions::AUTHREAD,
        )?;
        let read_info = self
            .spaces
            .get(&index)
            .and_then(|space| space.public.pcr_info_read);
        self.check_pcrs(read_info.as_ref())?;

        let space = self
            .spaces
            .get_mut(&index)
            .ok_or(TpmError::command(TPM_BADINDEX))?;
        if space.public.read_st_clear {
            return Err(TpmError::command(TPM_AREA_LOCKED));
        }
        if size == 0 {
            space.public.read_st_clear = true;
            return Ok(Vec::new());
        }

        let start = offset as usize;
        let end = start + size as usize;
        space
            .data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(TpmError::command(TPM_NOSPACE))
    }
}
