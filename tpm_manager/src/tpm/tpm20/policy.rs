// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{PcrValue, PCR_SIZE, TPM_ALG_SHA256, TPM_CC_POLICY_AUTH_VALUE, TPM_CC_POLICY_PCR};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a TPMS_PCR_SELECTION bitmap covering PCRs 0-23.
const PCR_SELECT_SIZE: usize = 3;

/// SHA-256 policy session. The digest is extended the same way the TPM
/// extends policyDigest, so a trial session yields the authPolicy that a
/// real session must reproduce.
#[derive(Clone, PartialEq, Eq)]
pub struct PolicySession {
    digest: PcrValue,
    auth_value: Vec<u8>,
    auth_value_asserted: bool,
}

impl Default for PolicySession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySession")
            .field("digest", &self.digest)
            .field("auth_value_asserted", &self.auth_value_asserted)
            .finish_non_exhaustive()
    }
}

impl PolicySession {
    pub fn new() -> Self {
        Self {
            digest: [0u8; PCR_SIZE],
            auth_value: Vec::new(),
            auth_value_asserted: false,
        }
    }

    pub fn digest(&self) -> &PcrValue {
        &self.digest
    }

    /// Secret presented with the session when PolicyAuthValue was asserted.
    pub fn auth_value(&self) -> &[u8] {
        &self.auth_value
    }

    pub fn set_auth_value(&mut self, auth_value: &[u8]) {
        self.auth_value = auth_value.to_vec();
    }

    pub fn auth_value_asserted(&self) -> bool {
        self.auth_value_asserted
    }

    /// Extend the digest with TPM2_PolicyPCR over a single PCR.
    pub fn update_pcr(&mut self, pcr: u32, value: &PcrValue) {
        let mut select = [0u8; PCR_SELECT_SIZE];
        if let Some(byte) = select.get_mut((pcr / 8) as usize) {
            *byte |= 1 << (pcr % 8);
        }
        let pcr_digest = Sha256::digest(value);

        let mut hasher = Sha256::new();
        hasher.update(self.digest);
        hasher.update(TPM_CC_POLICY_PCR.to_be_bytes());
        // TPML_PCR_SELECTION with a single SHA-256 bank
        hasher.update(1u32.to_be_bytes());
        hasher.update(TPM_ALG_SHA256.to_be_bytes());
        hasher.update([PCR_SELECT_SIZE as u8]);
        hasher.update(select);
        hasher.update(pcr_digest);
        self.digest = hasher.finalize().into();
    }

    /// Extend the digest with TPM2_PolicyAuthValue.
    pub fn update_auth_value(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.digest);
        hasher.update(TPM_CC_POLICY_AUTH_VALUE.to_be_bytes());
        self.digest = hasher.finalize().into();
        self.auth_value_asserted = true;
    }
}
