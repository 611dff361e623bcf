// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{Tpm12Commands, WELL_KNOWN_SECRET};
use crate::tpm::{
    lock_tpm, DictionaryAttackInfo, OwnershipStatus, SharedTpm, TpmError, TpmStatus, VersionInfo,
};

#[derive(Debug)]
pub struct Tpm12Status<C> {
    tpm: SharedTpm<C>,
    owned: bool,
}

impl<C: Tpm12Commands> Tpm12Status<C> {
    pub fn new(tpm: SharedTpm<C>) -> Self {
        Self { tpm, owned: false }
    }
}

impl<C: Tpm12Commands> TpmStatus for Tpm12Status<C> {
    fn is_tpm_enabled(&mut self) -> bool {
        match lock_tpm(&self.tpm).permanent_flags() {
            Ok(flags) => !flags.disabled && !flags.deactivated,
            Err(e) => {
                log::error!("Failed to read TPM permanent flags: {}", e);
                false
            }
        }
    }

    fn get_tpm_owned(&mut self) -> Result<OwnershipStatus, TpmError> {
        if self.owned {
            return Ok(OwnershipStatus::Owned);
        }

        let mut tpm = lock_tpm(&self.tpm);
        if !tpm.permanent_flags()?.owned {
            return Ok(OwnershipStatus::Unowned);
        }
        // Owned with the well-known secret means ownership was interrupted.
        if tpm.check_owner_auth(&WELL_KNOWN_SECRET).is_ok() {
            return Ok(OwnershipStatus::PreOwned);
        }
        self.owned = true;
        Ok(OwnershipStatus::Owned)
    }

    fn get_dictionary_attack_info(&mut self) -> Result<DictionaryAttackInfo, TpmError> {
        lock_tpm(&self.tpm).dictionary_attack_info()
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
