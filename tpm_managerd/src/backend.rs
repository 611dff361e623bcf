// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use anyhow::anyhow;
use std::str::FromStr;
use tpm_manager::tpm::TpmVersion;

/// TPM backend the daemon drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// In-process TPM 1.2 simulator.
    Simulator12,
    /// In-process TPM 2.0 simulator.
    Simulator20,
}

impl Backend {
    pub fn version(self) -> TpmVersion {
        match self {
            Self::Simulator12 => TpmVersion::Tpm12,
            Self::Simulator20 => TpmVersion::Tpm20,
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "simulator-1.2" => Ok(Self::Simulator12),
            "simulator-2.0" => Ok(Self::Simulator20),
            _ => Err(anyhow!("invalid TPM backend selected")),
        }
    }
}
