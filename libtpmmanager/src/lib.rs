// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! Value types exchanged between the TPM manager daemon and its clients,
//! plus the persisted [`LocalData`] record.

mod local_data;
mod nvram;
mod ownership;
mod redact;
mod request;
mod serde_bytes;

pub use local_data::*;
pub use nvram::*;
pub use ownership::*;
pub use request::*;
