// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! TPM ownership and NVRAM management.
//!
//! [`service::TpmManagerService`] serializes every TPM-touching operation on
//! a single worker thread. The TPM itself is reached through the capability
//! traits in [`tpm`], implemented once for TPM 1.2 and once for TPM 2.0.

pub mod config;
pub mod error;
pub mod local_data;
pub mod metrics;
pub mod service;
pub mod tpm;

pub use config::ServiceConfig;
pub use error::TpmManagerError;
pub use libtpmmanager;
