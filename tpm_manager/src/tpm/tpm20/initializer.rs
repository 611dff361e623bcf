// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{Hierarchy, PcrValue, Tpm20Commands, PCR_SIZE};
use crate::local_data::LocalDataStore;
use crate::tpm::{
    generate_secret, lock_tpm, DictionaryAttackResetStatus, SharedTpm, TpmError, TpmInitializer,
    UNVERIFIED_BOOT_MODE,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const HIERARCHIES: [Hierarchy; 3] = [Hierarchy::Owner, Hierarchy::Endorsement, Hierarchy::Lockout];

#[derive(Debug)]
pub struct Tpm20Initializer<C> {
    tpm: SharedTpm<C>,
    store: Arc<dyn LocalDataStore>,
}

impl<C: Tpm20Commands> Tpm20Initializer<C> {
    pub fn new(tpm: SharedTpm<C>, store: Arc<dyn LocalDataStore>) -> Self {
        Self { tpm, store }
    }
}

/// Reuse a stored secret or generate a new one.
fn stored_or_new(stored: &Option<Vec<u8>>) -> Result<Vec<u8>, TpmError> {
    match stored {
        Some(secret) if !secret.is_empty() => Ok(secret.clone()),
        _ => generate_secret(),
    }
}

impl<C: Tpm20Commands> TpmInitializer for Tpm20Initializer<C> {
    fn initialize_tpm(&mut self, owner_dependencies: &[String]) -> Result<(), TpmError> {
        let mut tpm = lock_tpm(&self.tpm);
        let auth = tpm.hierarchy_auth_status()?;
        let mut local_data = self.store.read()?;

        let secrets = [
            (Hierarchy::Owner, &mut local_data.owner_password),
            (Hierarchy::Endorsement, &mut local_data.endorsement_password),
            (Hierarchy::Lockout, &mut local_data.lockout_password),
        ];
        let mut new_secrets = Vec::new();
        for (hierarchy, stored) in secrets {
            if auth.is_set(hierarchy) && stored.as_ref().is_none_or(|s| s.is_empty()) {
                log::error!("TPM {:?} auth is set, but not by this service", hierarchy);
                return Err(TpmError::OwnedElsewhere);
            }
            let secret = stored_or_new(stored)?;
            *stored = Some(secret.clone());
            new_secrets.push((hierarchy, secret));
        }
        for dependency in owner_dependencies {
            local_data.add_owner_dependency(dependency);
        }

        // Secrets must be persisted before the TPM starts requiring them.
        self.store.write(&local_data)?;

        for (hierarchy, secret) in &new_secrets {
            if !auth.is_set(*hierarchy) {
                tpm.hierarchy_change_auth(*hierarchy, &[], secret)?;
                log::info!("TPM {:?} auth set", hierarchy);
            }
        }
        if !tpm.storage_root_key_present()? {
            tpm.create_storage_root_key(&new_secrets[0].1)?;
            log::info!("TPM storage root key created");
        }

        log::info!("TPM ownership taken");
        Ok(())
    }

    fn pre_initialize_tpm(&mut self) -> Result<(), TpmError> {
        let mut tpm = lock_tpm(&self.tpm);
        if tpm.hierarchy_auth_status()?.owner || tpm.storage_root_key_present()? {
            return Ok(());
        }
        tpm.create_storage_root_key(&[])?;
        log::info!("TPM storage root key created before ownership");
        Ok(())
    }

    fn prune_stored_passwords(&mut self) -> Result<(), TpmError> {
        let auth = lock_tpm(&self.tpm).hierarchy_auth_status()?;
        let mut local_data = self.store.read()?;
        let before = local_data.clone();

        for hierarchy in HIERARCHIES {
            if auth.is_set(hierarchy) {
                continue;
            }
            match hierarchy {
                Hierarchy::Owner => local_data.owner_password = None,
                Hierarchy::Endorsement => local_data.endorsement_password = None,
                Hierarchy::Lockout => local_data.lockout_password = None,
            }
        }
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
        let Some(lockout_password) = local_data.lockout_password.filter(|p| !p.is_empty()) else {
            log::error!("Cannot reset the DA lock without a lockout password");
            return DictionaryAttackResetStatus::ResetAttemptFailed;
        };

        match lock_tpm(&self.tpm).dictionary_attack_lock_reset(&lockout_password) {
            Ok(()) => DictionaryAttackResetStatus::ResetAttemptSucceeded,
            Err(e) => {
                log::error!("Failed to reset the DA lock: {}", e);
                DictionaryAttackResetStatus::ResetAttemptFailed
            }
        }
    }

    fn ensure_persistent_owner_delegate(&mut self) -> Result<(), TpmError> {
        // TPM 2.0 has no owner delegates.
        Ok(())
    }

    fn verified_boot_helper(&mut self) -> Result<(), TpmError> {
        let mut tpm = lock_tpm(&self.tpm);
        if tpm.pcr_read(0)? != [0u8; PCR_SIZE] {
            return Ok(());
        }
        log::warn!("PCR0 is unset, extending it with the unverified boot mode");
        let digest: PcrValue = Sha256::digest(UNVERIFIED_BOOT_MODE).into();
        tpm.pcr_extend(0, &digest)
    }
}
