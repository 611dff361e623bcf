// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use crate::{serde_bytes, LocalData};
use serde::{Deserialize, Serialize};

/// Status carried by every ownership and status reply.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TpmManagerStatus {
    #[default]
    Success,
    /// No usable TPM, the hardware was not touched.
    NotAvailable,
    DeviceError,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTpmStatusRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTpmStatusReply {
    pub status: TpmManagerStatus,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub owned: bool,
    /// Stored secrets, echoed back to privileged callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_data: Option<LocalData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTpmNonsensitiveStatusRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTpmNonsensitiveStatusReply {
    pub status: TpmManagerStatus,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_owned: bool,
    #[serde(default)]
    pub is_owner_password_present: bool,
    #[serde(default)]
    pub has_reset_lock_permissions: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetVersionInfoRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetVersionInfoReply {
    pub status: TpmManagerStatus,
    #[serde(default)]
    pub family: u32,
    #[serde(default)]
    pub spec_level: u64,
    #[serde(default)]
    pub manufacturer: u32,
    #[serde(default)]
    pub tpm_model: u32,
    #[serde(default)]
    pub firmware_version: u64,
    #[serde(default, with = "serde_bytes")]
    pub vendor_specific: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSupportedFeaturesRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSupportedFeaturesReply {
    pub status: TpmManagerStatus,
    /// NVRAM spaces can be bound to PCR0.
    #[serde(default)]
    pub support_pcr0_policy: bool,
    /// NVRAM spaces can be defined with the EXTEND attribute.
    #[serde(default)]
    pub support_extend: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDictionaryAttackInfoRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDictionaryAttackInfoReply {
    pub status: TpmManagerStatus,
    #[serde(default)]
    pub dictionary_attack_counter: u32,
    #[serde(default)]
    pub dictionary_attack_threshold: u32,
    #[serde(default)]
    pub dictionary_attack_lockout_in_effect: bool,
    #[serde(default)]
    pub dictionary_attack_lockout_seconds_remaining: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetDictionaryAttackLockRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetDictionaryAttackLockReply {
    pub status: TpmManagerStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TakeOwnershipRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TakeOwnershipReply {
    pub status: TpmManagerStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOwnerDependencyRequest {
    pub owner_dependency: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOwnerDependencyReply {
    pub status: TpmManagerStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearStoredOwnerPasswordRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearStoredOwnerPasswordReply {
    pub status: TpmManagerStatus,
}
