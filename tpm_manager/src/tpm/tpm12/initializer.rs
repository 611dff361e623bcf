// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{
    DelegatePermissions, PcrValue, Tpm12Authorization, Tpm12Commands, PCR_SIZE, WELL_KNOWN_SECRET,
};
use crate::local_data::LocalDataStore;
use crate::tpm::{
    generate_secret, lock_tpm, DictionaryAttackResetStatus, SharedTpm, TpmError, TpmInitializer,
    UNVERIFIED_BOOT_MODE,
};
use sha1::{Digest, Sha1};
use std::sync::Arc;

#[derive(Debug)]
pub struct Tpm12Initializer<C> {
    tpm: SharedTpm<C>,
    store: Arc<dyn LocalDataStore>,
}

impl<C: Tpm12Commands> Tpm12Initializer<C> {
    pub fn new(tpm: SharedTpm<C>, store: Arc<dyn LocalDataStore>) -> Self {
        Self { tpm, store }
    }
}

impl<C: Tpm12Commands> TpmInitializer for Tpm12Initializer<C> {
    fn initialize_tpm(&mut self, owner_dependencies: &[String]) -> Result<(), TpmError> {
        {
            let mut tpm = lock_tpm(&self.tpm);
            if !tpm.permanent_flags()?.owned {
                tpm.take_ownership(&WELL_KNOWN_SECRET)?;
                log::info!("TPM ownership taken with the well-known secret");
            }

            let mut local_data = self.store.read()?;
            if tpm.check_owner_auth(&WELL_KNOWN_SECRET).is_ok() {
                let owner_password = match local_data.owner_password() {
                    Some(password) => password.to_vec(),
                    None => generate_secret()?,
                };
                local_data.owner_password = Some(owner_password.clone());
                for dependency in owner_dependencies {
                    local_data.add_owner_dependency(dependency);
                }
                // Persist before the TPM starts requiring the new secret.
                self.store.write(&local_data)?;

                tpm.change_owner_auth(&WELL_KNOWN_SECRET, &owner_password)?;
                log::info!("TPM owner secret randomized");
            } else {
                let Some(owner_password) = local_data.owner_password() else {
                    log::error!("TPM is owned, but no owner password is stored");
                    return Err(TpmError::OwnedElsewhere);
                };
                if tpm.check_owner_auth(owner_password).is_err() {
                    log::error!("TPM is owned with an unknown owner secret");
                    return Err(TpmError::OwnedElsewhere);
                }
            }
        }

        if let Err(e) = self.ensure_persistent_owner_delegate() {
            log::warn!("Failed to create the owner delegate: {}", e);
        }
        Ok(())
    }

    fn pre_initialize_tpm(&mut self) -> Result<(), TpmError> {
        log::debug!("TPM 1.2 has no pre-initialization step");
        Ok(())
    }

    fn prune_stored_passwords(&mut self) -> Result<(), TpmError> {
        if lock_tpm(&self.tpm).permanent_flags()?.owned {
            return Ok(());
        }
        let mut local_data = self.store.read()?;
        let before = local_data.clone();
        local_data.owner_password = None;
        local_data.endorsement_password = None;
        local_data.lockout_password = None;
        local_data.owner_delegate = None;

        if local_data != before {
            log::info!("Pruned stale TPM secrets from local data");
            self.store.write(&local_data)?;
        }
        Ok(())
    }

    fn reset_dictionary_attack_lock(&mut self) -> DictionaryAttackResetStatus {
        let local_data = match self.store.read() {
            Ok(local_data) => local_data,
            Err(e) => {
                log::error!("Failed to read local data: {}", e);
                return DictionaryAttackResetStatus::ResetAttemptFailed;
            }
        };

        let auth = match (&local_data.owner_delegate, local_data.owner_password()) {
            (Some(delegate), _) if delegate.has_reset_lock_permissions => {
                Tpm12Authorization::Delegate {
                    blob: delegate.blob.clone(),
                    secret: delegate.secret.clone(),
                }
            }
            (_, Some(owner_password)) => Tpm12Authorization::Owner(owner_password.to_vec()),
            (Some(_), None) => return DictionaryAttackResetStatus::DelegateNotAllowed,
            (None, None) => return DictionaryAttackResetStatus::DelegateNotAvailable,
        };

        match lock_tpm(&self.tpm).reset_lock_value(&auth) {
            Ok(()) => DictionaryAttackResetStatus::ResetAttemptSucceeded,
            Err(e) => {
                log::error!("Failed to reset the DA lock: {}", e);
                DictionaryAttackResetStatus::ResetAttemptFailed
            }
        }
    }

    fn ensure_persistent_owner_delegate(&mut self) -> Result<(), TpmError> {
        let mut local_data = self.store.read()?;
        if local_data.owner_delegate.is_some() {
            return Ok(());
        }
        let owner_password = local_data
            .owner_password()
            .ok_or(TpmError::NoOwnerPassword)?
            .to_vec();

        let delegate = lock_tpm(&self.tpm)
            .create_owner_delegate(&owner_password, DelegatePermissions::RESET_LOCK_VALUE)?;
        local_data.owner_delegate = Some(delegate);
        self.store.write(&local_data)?;
        log::info!("TPM owner delegate created");
        Ok(())
    }

    fn verified_boot_helper(&mut self) -> Result<(), TpmError> {
        let mut tpm = lock_tpm(&self.tpm);
        if tpm.pcr_read(0)? != [0u8; PCR_SIZE] {
            return Ok(());
        }
        log::warn!("PCR0 is unset, extending it with the unverified boot mode");
        let digest: PcrValue = Sha1::digest(UNVERIFIED_BOOT_MODE).into();
        tpm.pcr_extend(0, &digest)
    }
}
