// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! In-process TPM 2.0 model covering the commands in [`Tpm20Commands`].

use super::*;
use crate::tpm::sim::{CommandLog, DictionaryAttackState};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const PCR_COUNT: usize = 24;

/// "CROS"
const SIMULATOR_MANUFACTURER: u32 = 0x4352_4F53;
/// "2.0\0"
const TPM2_FAMILY: u32 = 0x322E_3000;

// Response code number fields for the first handle, session and parameter.
const RC_HANDLE_1: u32 = 0x100;
const RC_SESSION_1: u32 = 0x900;
const RC_PARAMETER_1: u32 = 0x140;

#[derive(Debug)]
struct Space {
    public: NvPublic,
    auth_value: Vec<u8>,
    data: Vec<u8>,
    /// Write lock of a WRITEDEFINE space, kept across restarts.
    write_define_locked: bool,
}

#[derive(Debug)]
pub struct Tpm20Simulator {
    enabled: bool,
    owner_auth: Vec<u8>,
    endorsement_auth: Vec<u8>,
    lockout_auth: Vec<u8>,
    srk_present: bool,
    pcrs: [PcrValue; PCR_COUNT],
    spaces: BTreeMap<u32, Space>,
    da: DictionaryAttackState,
    log: CommandLog,
}

impl Default for Tpm20Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Tpm20Simulator {
    /// A freshly cleared, enabled TPM.
    pub fn new() -> Self {
        Self {
            enabled: true,
            owner_auth: Vec::new(),
            endorsement_auth: Vec::new(),
            lockout_auth: Vec::new(),
            srk_present: false,
            pcrs: [[0u8; PCR_SIZE]; PCR_COUNT],
            spaces: BTreeMap::new(),
            da: DictionaryAttackState::default(),
            log: CommandLog::default(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// TPM2_Clear: drop owner-created objects and all hierarchy auths.
    pub fn clear(&mut self) {
        self.owner_auth.clear();
        self.endorsement_auth.clear();
        self.lockout_auth.clear();
        self.srk_present = false;
        self.spaces
            .retain(|_, space| space.public.attributes.platformcreate());
        self.da.reset();
    }

    /// TPM2_Startup(CLEAR) after a reboot: PCRs and per-boot locks reset.
    pub fn restart(&mut self) {
        self.pcrs = [[0u8; PCR_SIZE]; PCR_COUNT];
        for space in self.spaces.values_mut() {
            space.public.attributes.set_readlocked(false);
            space
                .public
                .attributes
                .set_writelocked(space.write_define_locked);
        }
    }

    /// Extend `pcr` with the SHA-256 of `data`.
    pub fn extend_pcr(&mut self, pcr: u32, data: &[u8]) {
        if let Some(value) = self.pcrs.get_mut(pcr as usize) {
            *value = extend(value, &Sha256::digest(data));
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

    fn check_enabled(&self) -> Result<(), TpmError> {
        if self.enabled {
            Ok(())
        } else {
            Err(TpmError::command(TPM_RC_FAILURE))
        }
    }

    fn check_hierarchy_auth(&self, hierarchy: Hierarchy, auth: &[u8]) -> Result<(), TpmError> {
        let expected = match hierarchy {
            Hierarchy::Owner => &self.owner_auth,
            Hierarchy::Endorsement => &self.endorsement_auth,
            Hierarchy::Lockout => &self.lockout_auth,
        };
        if expected.as_slice() == auth {
            Ok(())
        } else {
            Err(TpmError::command(TPM_RC_BAD_AUTH | RC_SESSION_1))
        }
    }

    fn space(&self, index: u32) -> Result<&Space, TpmError> {
        self.spaces
            .get(&index)
            .ok_or(TpmError::command(TPM_RC_HANDLE | RC_HANDLE_1))
    }

    fn authorize(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        write: bool,
    ) -> Result<(), TpmError> {
        let da_locked_out = self.da.locked_out();
        let space = self.space(index)?;
        let attrs = space.public.attributes;
        let result = match auth {
            NvAuthorization::Owner(password) => {
                let allowed = if write {
                    attrs.ownerwrite()
                } else {
                    attrs.ownerread()
                };
                if !allowed {
                    Err(TPM_RC_NV_AUTHORIZATION)
                } else if *password != self.owner_auth {
                    Err(TPM_RC_BAD_AUTH | RC_SESSION_1)
                } else {
                    Ok(())
                }
            }
            NvAuthorization::Index(password) => {
                let allowed = if write {
                    attrs.authwrite()
                } else {
                    attrs.authread()
                };
                if !allowed {
                    Err(TPM_RC_NV_AUTHORIZATION)
                } else if da_locked_out && !attrs.no_da() {
                    Err(TPM_RC_LOCKOUT)
                } else if *password != space.auth_value {
                    Err(TPM_RC_AUTH_FAIL | RC_SESSION_1)
                } else {
                    Ok(())
                }
            }
            NvAuthorization::Policy(session) => {
                let allowed = if write {
                    attrs.policywrite()
                } else {
                    attrs.policyread()
                };
                if !allowed {
                    Err(TPM_RC_NV_AUTHORIZATION)
                } else if session.digest().as_slice() != space.public.auth_policy.as_slice() {
                    Err(TPM_RC_POLICY_FAIL | RC_SESSION_1)
                } else if da_locked_out && !attrs.no_da() {
                    Err(TPM_RC_LOCKOUT)
                } else if session.auth_value_asserted() && session.auth_value() != space.auth_value
                {
                    Err(TPM_RC_AUTH_FAIL | RC_SESSION_1)
                } else {
                    Ok(())
                }
            }
        };

        result.map_err(|code| {
            if base_response_code(code) == TPM_RC_AUTH_FAIL && !attrs.no_da() {
                self.da.record_failure();
            }
            TpmError::command(code)
        })
    }

    fn space_mut(&mut self, index: u32) -> Result<&mut Space, TpmError> {
        self.spaces
            .get_mut(&index)
            .ok_or(TpmError::command(TPM_RC_HANDLE | RC_HANDLE_1))
    }
}

fn extend(current: &PcrValue, digest: &[u8]) -> PcrValue {
    let mut hasher = Sha256::new();
    hasher.update(current);
    hasher.update(digest);
    hasher.finalize().into()
}

impl Tpm20Commands for Tpm20Simulator {
    fn startup_enabled(&mut self) -> Result<bool, TpmError> {
        self.log.enter("startup_enabled")?;
        Ok(self.enabled)
    }

    fn hierarchy_auth_status(&mut self) -> Result<HierarchyAuthStatus, TpmError> {
        self.log.enter("hierarchy_auth_status")?;
        self.check_enabled()?;
        Ok(HierarchyAuthStatus {
            owner: !self.owner_auth.is_empty(),
            endorsement: !self.endorsement_auth.is_empty(),
            lockout: !self.lockout_auth.is_empty(),
        })
    }

    fn hierarchy_change_auth(
        &mut self,
        hierarchy: Hierarchy,
        current_auth: &[u8],
        new_auth: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("hierarchy_change_auth")?;
        self.check_enabled()?;
        self.check_hierarchy_auth(hierarchy, current_auth)?;
        if new_auth.len() > PCR_SIZE {
            return Err(TpmError::command(TPM_RC_SIZE | RC_PARAMETER_1));
        }
        let target = match hierarchy {
            Hierarchy::Owner => &mut self.owner_auth,
            Hierarchy::Endorsement => &mut self.endorsement_auth,
            Hierarchy::Lockout => &mut self.lockout_auth,
        };
        *target = new_auth.to_vec();
        Ok(())
    }

    fn storage_root_key_present(&mut self) -> Result<bool, TpmError> {
        self.log.enter("storage_root_key_present")?;
        self.check_enabled()?;
        Ok(self.srk_present)
    }

    fn create_storage_root_key(&mut self, owner_auth: &[u8]) -> Result<(), TpmError> {
        self.log.enter("create_storage_root_key")?;
        self.check_enabled()?;
        self.check_hierarchy_auth(Hierarchy::Owner, owner_auth)?;
        self.srk_present = true;
        Ok(())
    }

    fn dictionary_attack_parameters(&mut self) -> Result<DictionaryAttackInfo, TpmError> {
        self.log.enter("dictionary_attack_parameters")?;
        self.check_enabled()?;
        Ok(self.da.info())
    }

    fn dictionary_attack_lock_reset(&mut self, lockout_auth: &[u8]) -> Result<(), TpmError> {
        self.log.enter("dictionary_attack_lock_reset")?;
        self.check_enabled()?;
        self.check_hierarchy_auth(Hierarchy::Lockout, lockout_auth)?;
        self.da.reset();
        Ok(())
    }

    fn version_info(&mut self) -> Result<VersionInfo, TpmError> {
        self.log.enter("version_info")?;
        self.check_enabled()?;
        Ok(VersionInfo {
            family: TPM2_FAMILY,
            spec_level: 116 << 32,
            manufacturer: SIMULATOR_MANUFACTURER,
            tpm_model: 1,
            firmware_version: 0x2025_0001,
            vendor_specific: b"tpm_manager sim".to_vec(),
        })
    }

    fn pcr_read(&mut self, pcr: u32) -> Result<PcrValue, TpmError> {
        self.log.enter("pcr_read")?;
        self.check_enabled()?;
        self.pcrs
            .get(pcr as usize)
            .copied()
            .ok_or(TpmError::command(TPM_RC_VALUE | RC_PARAMETER_1))
    }

    fn pcr_extend(&mut self, pcr: u32, digest: &PcrValue) -> Result<(), TpmError> {
        self.log.enter("pcr_extend")?;
        self.check_enabled()?;
        let value = self
            .pcrs
            .get_mut(pcr as usize)
            .ok_or(TpmError::command(TPM_RC_VALUE | RC_PARAMETER_1))?;
        *value = extend(value, digest);
        Ok(())
    }

    fn nv_index_list(&mut self) -> Result<Vec<u32>, TpmError> {
        self.log.enter("nv_index_list")?;
        self.check_enabled()?;
        Ok(self.spaces.keys().copied().collect())
    }

    fn nv_read_public(&mut self, index: u32) -> Result<NvPublic, TpmError> {
        self.log.enter("nv_read_public")?;
        self.check_enabled()?;
        Ok(self.space(index)?.public.clone())
    }

    fn nv_define_space(
        &mut self,
        owner_auth: &[u8],
        public: &NvPublic,
        auth_value: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("nv_define_space")?;
        self.check_enabled()?;
        self.check_hierarchy_auth(Hierarchy::Owner, owner_auth)?;

        let attrs = public.attributes;
        if public.data_size == 0 || u32::from(public.data_size) > MAX_NV_INDEX_SIZE {
            return Err(TpmError::command(TPM_RC_NV_SIZE));
        }
        if attrs.is_extend() && usize::from(public.data_size) != PCR_SIZE {
            return Err(TpmError::command(TPM_RC_ATTRIBUTES | RC_PARAMETER_1));
        }
        let write_auth =
            attrs.ppwrite() || attrs.ownerwrite() || attrs.authwrite() || attrs.policywrite();
        let read_auth =
            attrs.ppread() || attrs.ownerread() || attrs.authread() || attrs.policyread();
        if !write_auth || !read_auth {
            return Err(TpmError::command(TPM_RC_ATTRIBUTES | RC_PARAMETER_1));
        }

        let mut public = public.clone();
        public.attributes.set_writelocked(false);
        public.attributes.set_readlocked(false);
        public.attributes.set_written(false);
        public.attributes.set_platformcreate(false);
        if self.spaces.contains_key(&public.nv_index) {
            log::debug!("simulator: redefining NV index {:#x}", public.nv_index);
        }
        self.spaces.insert(
            public.nv_index,
            Space {
                data: vec![0u8; usize::from(public.data_size)],
                public,
                auth_value: auth_value.to_vec(),
                write_define_locked: false,
            },
        );
        Ok(())
    }

    fn nv_undefine_space(&mut self, owner_auth: &[u8], index: u32) -> Result<(), TpmError> {
        self.log.enter("nv_undefine_space")?;
        self.check_enabled()?;
        self.check_hierarchy_auth(Hierarchy::Owner, owner_auth)?;
        self.space(index)?;
        self.spaces.remove(&index);
        Ok(())
    }

    fn nv_write(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        offset: u16,
        data: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("nv_write")?;
        self.check_enabled()?;
        self.authorize(auth, index, true)?;
        let space = self.space_mut(index)?;
        let attrs = space.public.attributes;
        if attrs.writelocked() {
            return Err(TpmError::command(TPM_RC_NV_LOCKED));
        }
        if attrs.is_extend() {
            return Err(TpmError::command(TPM_RC_ATTRIBUTES));
        }
        let start = usize::from(offset);
        let end = start + data.len();
        if end > space.data.len() {
            return Err(TpmError::command(TPM_RC_NV_RANGE));
        }
        if attrs.writeall() && data.len() != space.data.len() {
            return Err(TpmError::command(TPM_RC_NV_RANGE));
        }
        space.data[start..end].copy_from_slice(data);
        space.public.attributes.set_written(true);
        Ok(())
    }

    fn nv_extend(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        data: &[u8],
    ) -> Result<(), TpmError> {
        self.log.enter("nv_extend")?;
        self.check_enabled()?;
        self.authorize(auth, index, true)?;
        let space = self.space_mut(index)?;
        let attrs = space.public.attributes;
        if attrs.writelocked() {
            return Err(TpmError::command(TPM_RC_NV_LOCKED));
        }
        if !attrs.is_extend() {
            return Err(TpmError::command(TPM_RC_ATTRIBUTES));
        }
        let mut current = [0u8; PCR_SIZE];
        current.copy_from_slice(&space.data);
        space.data = extend(&current, data).to_vec();
        space.public.attributes.set_written(true);
        Ok(())
    }

    fn nv_read(
        &mut self,
        auth: &NvAuthorization,
        index: u32,
        offset: u16,
        size: u16,
    ) -> Result<Vec<u8>, TpmError> {
        self.log.enter("nv_read")?;
        self.check_enabled()?;
        self.authorize(auth, index, false)?;
        let space = self.space(index)?;
        let attrs = space.public.attributes;
        if attrs.readlocked() {
            return Err(TpmError::command(TPM_RC_NV_LOCKED));
        }
        if !attrs.written() {
            return Err(TpmError::command(TPM_RC_NV_UNINITIALIZED));
        }
        let start = usize::from(offset);
        let end = start + usize::from(size);
        space
            .data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(TpmError::command(TPM_RC_NV_RANGE))
    }

    fn nv_read_lock(&mut self, auth: &NvAuthorization, index: u32) -> Result<(), TpmError> {
        self.log.enter("nv_read_lock")?;
        self.check_enabled()?;
        self.authorize(auth, index, false)?;
        let space = self.space_mut(index)?;
        space.public.attributes.set_readlocked(true);
        Ok(())
    }

    fn nv_write_lock(&mut self, auth: &NvAuthorization, index: u32) -> Result<(), TpmError> {
        self.log.enter("nv_write_lock")?;
        self.check_enabled()?;
        self.authorize(auth, index, true)?;
        let space = self.space_mut(index)?;
        space.public.attributes.set_writelocked(true);
        space.write_define_locked |= space.public.attributes.writedefine();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_simulator() -> Tpm20Simulator {
        let mut sim = Tpm20Simulator::new();
        sim.hierarchy_change_auth(Hierarchy::Owner, &[], b"owner")
            .expect("Failed to set owner auth");
        sim
    }

    fn public(index: u32, size: u16) -> NvPublic {
        NvPublic {
            nv_index: index,
            attributes: NvAttributes::new().with_authwrite(true).with_authread(true),
            auth_policy: Vec::new(),
            data_size: size,
        }
    }

    #[test]
    fn define_clobbers_existing_index() {
        let mut sim = owned_simulator();
        sim.nv_define_space(b"owner", &public(1, 4), b"a")
            .expect("Failed to define space");
        sim.nv_write(&NvAuthorization::Index(b"a".to_vec()), 1, 0, b"data")
            .expect("Failed to write space");

        sim.nv_define_space(b"owner", &public(1, 8), b"b")
            .expect("Failed to redefine space");
        assert_eq!(
            sim.nv_read_public(1)
                .expect("Failed to read public")
                .data_size,
            8
        );
        assert_eq!(sim.nv_index_list().expect("Failed to list"), [1]);
    }

    #[test]
    fn wrong_index_auth_counts_toward_lockout() {
        let mut sim = owned_simulator();
        sim.nv_define_space(b"owner", &public(1, 4), b"a")
            .expect("Failed to define space");

        let err = sim
            .nv_write(&NvAuthorization::Index(b"wrong".to_vec()), 1, 0, b"data")
            .expect_err("Write with a wrong auth succeeded");
        assert!(matches!(
            err,
            TpmError::Command { code } if base_response_code(code) == TPM_RC_AUTH_FAIL
        ));
        assert_eq!(sim.da.counter, 1);
    }

    #[test]
    fn write_lock_persists_across_restart_only_for_writedefine() {
        let mut sim = owned_simulator();
        let mut persistent = public(1, 4);
        persistent.attributes.set_writedefine(true);
        sim.nv_define_space(b"owner", &persistent, b"")
            .expect("Failed to define space");
        sim.nv_define_space(b"owner", &public(2, 4), b"")
            .expect("Failed to define space");

        let auth = NvAuthorization::Index(Vec::new());
        sim.nv_write_lock(&auth, 1).expect("Failed to lock");
        sim.nv_write_lock(&auth, 2).expect("Failed to lock");
        sim.restart();

        let writelocked = |sim: &mut Tpm20Simulator, index| {
            sim.nv_read_public(index)
                .expect("Failed to read public")
                .attributes
                .writelocked()
        };
        assert!(writelocked(&mut sim, 1));
        assert!(!writelocked(&mut sim, 2));
    }

    #[test]
    fn clear_drops_spaces_and_auths() {
        let mut sim = owned_simulator();
        sim.nv_define_space(b"owner", &public(1, 4), b"")
            .expect("Failed to define space");
        sim.clear();

        assert!(sim.nv_index_list().expect("Failed to list").is_empty());
        assert!(sim.hierarchy_auth_status().expect("Failed to query").none());
    }

    #[test]
    fn extend_accumulates() {
        let mut sim = owned_simulator();
        let mut extend_public = public(1, 32);
        extend_public.attributes.set_nv_type(TPM_NT_EXTEND);
        sim.nv_define_space(b"owner", &extend_public, b"")
            .expect("Failed to define space");

        let auth = NvAuthorization::Index(Vec::new());
        sim.nv_extend(&auth, 1, b"one").expect("Failed to extend");
        let first = sim.nv_read(&auth, 1, 0, 32).expect("Failed to read");
        sim.nv_extend(&auth, 1, b"one").expect("Failed to extend");
        let second = sim.nv_read(&auth, 1, 0, 32).expect("Failed to read");
        assert_ne!(first, second);
        assert_eq!(first, extend(&[0u8; 32], b"one").to_vec());
    }
}
