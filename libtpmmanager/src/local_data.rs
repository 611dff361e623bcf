// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use crate::redact::{Redacted, RedactedOption};
use crate::{serde_bytes, NvramSpacePolicy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner dependency held by the NVRAM service until it no longer needs the
/// owner password.
pub const OWNER_DEPENDENCY_NVRAM: &str = "Nvram";
/// Owner dependency held by the attestation service.
pub const OWNER_DEPENDENCY_ATTESTATION: &str = "Attestation";

/// Per-space record of the policy an NVRAM space was defined with. The TPM
/// does not report this back in a uniform way, so it is persisted here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NvramPolicyRecord {
    pub index: u32,
    pub policy: NvramSpacePolicy,
    /// Policy digest the space was defined with, TPM 2.0 only.
    #[serde(
        default,
        with = "serde_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub policy_digest: Option<Vec<u8>>,
}

/// TPM 1.2 owner delegate, a reduced-privilege stand-in for the owner
/// password.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OwnerDelegate {
    #[serde(with = "serde_bytes")]
    pub blob: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub secret: Vec<u8>,
    pub has_reset_lock_permissions: bool,
}

impl fmt::Debug for OwnerDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerDelegate")
            .field("blob", &Redacted(&self.blob))
            .field("secret", &Redacted(&self.secret))
            .field(
                "has_reset_lock_permissions",
                &self.has_reset_lock_permissions,
            )
            .finish()
    }
}

/// The single persisted record of the TPM manager. Unset fields are left
/// out of the serialized form so that they stay unset after a reload.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LocalData {
    #[serde(
        default,
        with = "serde_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_password: Option<Vec<u8>>,
    #[serde(
        default,
        with = "serde_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub endorsement_password: Option<Vec<u8>>,
    #[serde(
        default,
        with = "serde_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub lockout_password: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_delegate: Option<OwnerDelegate>,
    /// Subsystems that still need the owner password.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_dependency: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nvram_policy: Vec<NvramPolicyRecord>,
}

impl fmt::Debug for LocalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalData")
            .field("owner_password", &RedactedOption(&self.owner_password))
            .field(
                "endorsement_password",
                &RedactedOption(&self.endorsement_password),
            )
            .field("lockout_password", &RedactedOption(&self.lockout_password))
            .field("owner_delegate", &self.owner_delegate)
            .field("owner_dependency", &self.owner_dependency)
            .field("nvram_policy", &self.nvram_policy)
            .finish()
    }
}

impl LocalData {
    /// Returns the owner password if one is stored and non-empty.
    pub fn owner_password(&self) -> Option<&[u8]> {
        self.owner_password
            .as_deref()
            .filter(|password| !password.is_empty())
    }

    pub fn has_owner_password(&self) -> bool {
        self.owner_password().is_some()
    }

    pub fn add_owner_dependency(&mut self, dependency: &str) {
        if !self.owner_dependency.iter().any(|d| d == dependency) {
            self.owner_dependency.push(dependency.to_string());
        }
    }

    /// Removes `dependency`, returning whether it was present.
    pub fn remove_owner_dependency(&mut self, dependency: &str) -> bool {
        let before = self.owner_dependency.len();
        self.owner_dependency.retain(|d| d != dependency);
        self.owner_dependency.len() != before
    }

    pub fn nvram_policy_record(&self, index: u32) -> Option<&NvramPolicyRecord> {
        self.nvram_policy
            .iter()
            .find(|record| record.index == index)
    }

    /// Inserts `record`, replacing any record with the same index.
    pub fn upsert_nvram_policy(&mut self, record: NvramPolicyRecord) {
        match self
            .nvram_policy
            .iter_mut()
            .find(|existing| existing.index == record.index)
        {
            Some(existing) => *existing = record,
            None => self.nvram_policy.push(record),
        }
    }

    /// Removes the record for `index`, returning whether one existed.
    pub fn remove_nvram_policy(&mut self, index: u32) -> bool {
        let before = self.nvram_policy.len();
        self.nvram_policy.retain(|record| record.index != index);
        self.nvram_policy.len() != before
    }
}
