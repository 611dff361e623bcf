// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use crate::tpm::{DictionaryAttackResetStatus, VersionInfo};
use bitflags::bitflags;
use libtpmmanager::LocalData;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::time::Duration;

bitflags! {
    /// Which secrets are present in the local data store.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecretStatus: u32 {
        const OWNER_PASSWORD = 1 << 0;
        const ENDORSEMENT_PASSWORD = 1 << 1;
        const LOCKOUT_PASSWORD = 1 << 2;
        const OWNER_DELEGATE = 1 << 3;
    }
}

impl SecretStatus {
    pub fn from_local_data(local_data: &LocalData) -> Self {
        let present = |secret: &Option<Vec<u8>>| secret.as_ref().is_some_and(|s| !s.is_empty());

        let mut status = Self::empty();
        status.set(Self::OWNER_PASSWORD, present(&local_data.owner_password));
        status.set(
            Self::ENDORSEMENT_PASSWORD,
            present(&local_data.endorsement_password),
        );
        status.set(
            Self::LOCKOUT_PASSWORD,
            present(&local_data.lockout_password),
        );
        status.set(Self::OWNER_DELEGATE, local_data.owner_delegate.is_some());
        status
    }
}

/// Sink for the counters and enums the service reports.
pub trait TpmManagerMetrics: Debug + Send + Sync {
    fn report_dictionary_attack_reset_status(&self, status: DictionaryAttackResetStatus);
    fn report_dictionary_attack_counter(&self, counter: u32);
    fn report_secret_status(&self, status: SecretStatus);
    fn report_version_fingerprint(&self, fingerprint: u32);
    fn report_time_to_take_ownership(&self, duration: Duration);
}

/// Reports every metric as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl TpmManagerMetrics for LogMetrics {
    fn report_dictionary_attack_reset_status(&self, status: DictionaryAttackResetStatus) {
        log::info!("metrics: dictionary attack reset status {:?}", status);
    }

    fn report_dictionary_attack_counter(&self, counter: u32) {
        log::info!("metrics: dictionary attack counter {}", counter);
    }

    fn report_secret_status(&self, status: SecretStatus) {
        log::info!("metrics: secret status {:?}", status);
    }

    fn report_version_fingerprint(&self, fingerprint: u32) {
        log::info!("metrics: version fingerprint {:#010x}", fingerprint);
    }

    fn report_time_to_take_ownership(&self, duration: Duration) {
        log::info!("metrics: took ownership in {} ms", duration.as_millis());
    }
}

/// Condenses the version info into a 31-bit value that identifies a TPM
/// model and firmware without revealing the raw fields.
pub fn version_fingerprint(info: &VersionInfo) -> u32 {
    let encoded = format!(
        "{:08x}{:016x}{:08x}{:08x}{:016x}{:016x}",
        info.family,
        info.spec_level,
        info.manufacturer,
        info.tpm_model,
        info.firmware_version,
        info.vendor_specific.len()
    );
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hasher.update(&info.vendor_specific);
    let hash = hasher.finalize();

    u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]) & 0x7fff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;
    use libtpmmanager::OwnerDelegate;

    fn version_info() -> VersionInfo {
        VersionInfo {
            family: 0x322e_3000,
            spec_level: 116,
            manufacturer: 0x4346_5a00,
            tpm_model: 1,
            firmware_version: 0x1234,
            vendor_specific: b"xCG fTPM".to_vec(),
        }
    }

    #[test]
    fn fingerprint_is_31_bits_and_stable() {
        let fp = version_fingerprint(&version_info());
        assert_eq!(fp & 0x8000_0000, 0);
        assert_eq!(fp, version_fingerprint(&version_info()));
    }

    #[test]
    fn fingerprint_covers_firmware_version() {
        let mut other = version_info();
        other.firmware_version += 1;
        assert_ne!(
            version_fingerprint(&version_info()),
            version_fingerprint(&other)
        );
    }

    #[test]
    fn secret_status_flags() {
        let data = LocalData {
            owner_password: Some(b"owner".to_vec()),
            endorsement_password: Some(Vec::new()),
            owner_delegate: Some(OwnerDelegate {
                blob: vec![1],
                secret: vec![2],
                has_reset_lock_permissions: true,
            }),
            ..Default::default()
        };
        assert_eq!(
            SecretStatus::from_local_data(&data),
            SecretStatus::OWNER_PASSWORD | SecretStatus::OWNER_DELEGATE
        );
    }
}
