// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use thiserror::Error;

// Store and TPM failures are leaf errors that end up in reply statuses.
// Only service lifecycle failures reach callers as a TpmManagerError.
#[derive(Debug, Error)]
pub enum TpmManagerError {
    // The worker thread could not be started
    #[error("failed to spawn the TPM worker thread")]
    Worker(#[source] std::io::Error),
    // initialize() was called twice
    #[error("the service is already initialized")]
    AlreadyInitialized,
}
