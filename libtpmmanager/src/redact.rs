// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! `Debug` stand-ins for secrets and NVRAM payloads, so that request and
//! record types can be logged without their contents.

use std::fmt;

/// Prints only the length of a byte string.
pub(crate) struct Redacted<'a>(pub(crate) &'a [u8]);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted, {} bytes>", self.0.len())
    }
}

/// Prints whether an optional byte string is set, and its length.
pub(crate) struct RedactedOption<'a>(pub(crate) &'a Option<Vec<u8>>);

impl fmt::Debug for RedactedOption<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(bytes) => f.debug_tuple("Some").field(&Redacted(bytes)).finish(),
            None => f.write_str("None"),
        }
    }
}
