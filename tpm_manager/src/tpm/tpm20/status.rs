// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::Tpm20Commands;
use crate::tpm::{
    lock_tpm, DictionaryAttackInfo, OwnershipStatus, SharedTpm, TpmError, TpmStatus, VersionInfo,
};

#[derive(Debug)]
pub struct Tpm20Status<C> {
    tpm: SharedTpm<C>,
    owned: bool,
}

impl<C: Tpm20Commands> Tpm20Status<C> {
    pub fn new(tpm: SharedTpm<C>) -> Self {
        Self { tpm, owned: false }
    }
}

impl<C: Tpm20Commands> TpmStatus for Tpm20Status<C> {
    fn is_tpm_enabled(&mut self) -> bool {
        match lock_tpm(&self.tpm).startup_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                log::error!("Failed to query TPM startup state: {}", e);
                false
            }
        }
    }

    fn get_tpm_owned(&mut self) -> Result<OwnershipStatus, TpmError> {
        if self.owned {
            return Ok(OwnershipStatus::Owned);
        }

        let mut tpm = lock_tpm(&self.tpm);
        let auth = tpm.hierarchy_auth_status()?;
        if auth.none() {
            return Ok(OwnershipStatus::Unowned);
        }
        if auth.all() && tpm.storage_root_key_present()? {
            self.owned = true;
            return Ok(OwnershipStatus::Owned);
        }
        Ok(OwnershipStatus::PreOwned)
    }

    fn get_dictionary_attack_info(&mut self) -> Result<DictionaryAttackInfo, TpmError> {
        lock_tpm(&self.tpm).dictionary_attack_parameters()
    }

    fn is_dictionary_attack_mitigation_enabled(&mut self) -> Result<bool, TpmError> {
        Ok(self.get_dictionary_attack_info()?.threshold != 0)
    }

    fn get_version_info(&mut self) -> Result<VersionInfo, TpmError> {
        lock_tpm(&self.tpm).version_info()
    }

    fn refresh_owner_status(&mut self) {
        self.owned = false;
    }
}
