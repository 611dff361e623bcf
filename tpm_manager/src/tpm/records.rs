// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::NvramError;
use crate::local_data::LocalDataStore;
use libtpmmanager::{NvramPolicyRecord, NvramSpacePolicy};

/// Stored owner password, or `OperationDisabled` when there is none.
pub(super) fn require_owner_password(store: &dyn LocalDataStore) -> Result<Vec<u8>, NvramError> {
    let local_data = store.read()?;
    match local_data.owner_password() {
        Some(password) => Ok(password.to_vec()),
        None => {
            log::error!("NVRAM: owner password is not available");
            Err(NvramError::OperationDisabled)
        }
    }
}

/// Stored owner password for owner-authorized access, or `AccessDenied`.
pub(super) fn owner_authorization(store: &dyn LocalDataStore) -> Result<Vec<u8>, NvramError> {
    let local_data = store.read()?;
    local_data
        .owner_password()
        .map(<[u8]>::to_vec)
        .ok_or(NvramError::AccessDenied)
}

pub(super) fn save_policy_record(
    store: &dyn LocalDataStore,
    record: NvramPolicyRecord,
) -> Result<(), NvramError> {
    let mut local_data = store.read()?;
    local_data.upsert_nvram_policy(record);
    store.write(&local_data)?;
    Ok(())
}

pub(super) fn remove_policy_record(
    store: &dyn LocalDataStore,
    index: u32,
) -> Result<(), NvramError> {
    let mut local_data = store.read()?;
    if local_data.remove_nvram_policy(index) {
        store.write(&local_data)?;
    }
    Ok(())
}

pub(super) fn stored_policy(
    store: &dyn LocalDataStore,
    index: u32,
) -> Result<NvramSpacePolicy, NvramError> {
    let local_data = store.read()?;
    Ok(local_data
        .nvram_policy_record(index)
        .map(|record| record.policy)
        .unwrap_or_default())
}

/// Keep only the records of indices in `defined`.
pub(super) fn prune_policy_records(
    store: &dyn LocalDataStore,
    defined: &[u32],
) -> Result<(), NvramError> {
    let mut local_data = store.read()?;
    let before = local_data.nvram_policy.len();
    local_data
        .nvram_policy
        .retain(|record| defined.contains(&record.index));
    if local_data.nvram_policy.len() != before {
        log::info!(
            "NVRAM: pruned {} stale policy records",
            before - local_data.nvram_policy.len()
        );
        store.write(&local_data)?;
    }
    Ok(())
}
