// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use libtpmmanager::{OWNER_DEPENDENCY_ATTESTATION, OWNER_DEPENDENCY_NVRAM};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval between two automatic dictionary attack counter resets.
pub const DICTIONARY_ATTACK_RESET_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Runtime options of the TPM manager service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Wait for an explicit TakeOwnership request instead of taking
    /// ownership during initialization.
    pub wait_for_ownership: bool,
    /// Run the TPM pre-initialization step while waiting for ownership.
    pub perform_preinit: bool,
    /// Drop the owner password once the last owner dependency is removed.
    pub auto_clear_stored_owner_password: bool,
    #[serde(rename = "dictionary_attack_reset_period_secs", with = "seconds")]
    pub dictionary_attack_reset_period: Duration,
    /// Owner dependencies recorded when ownership is taken.
    pub default_owner_dependencies: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            wait_for_ownership: true,
            perform_preinit: false,
            auto_clear_stored_owner_password: true,
            dictionary_attack_reset_period: DICTIONARY_ATTACK_RESET_PERIOD,
            default_owner_dependencies: vec![
                OWNER_DEPENDENCY_NVRAM.to_string(),
                OWNER_DEPENDENCY_ATTESTATION.to_string(),
            ],
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
