// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use crate::redact::Redacted;
use crate::serde_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an NVRAM operation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NvramResult {
    #[default]
    Success,
    DeviceError,
    AccessDenied,
    InvalidParameter,
    SpaceDoesNotExist,
    /// Only reported by TPM 1.2, TPM 2.0 redefines the space instead.
    SpaceAlreadyExists,
    /// The operation cannot run right now, e.g. no owner password is
    /// available or the space is locked.
    OperationDisabled,
}

/// Semantic NVRAM space attributes, independent of the TPM generation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NvramSpaceAttribute {
    /// Writes can be locked until the space is redefined.
    PersistentWriteLock,
    /// Writes can be locked until the next boot.
    BootWriteLock,
    /// Reads can be locked until the next boot.
    BootReadLock,
    /// Writes require the space's authorization value.
    WriteAuthorization,
    /// Writes require platform authorization.
    PlatformWrite,
    /// Writes require owner authorization.
    OwnerWrite,
    /// Reads require the space's authorization value.
    ReadAuthorization,
    /// Reads require platform authorization.
    PlatformRead,
    /// Reads require owner authorization.
    OwnerRead,
    /// The space is write locked by a global lock.
    GlobalLock,
    /// Writes are hashed into the current contents instead of replacing them.
    Extend,
}

/// Authorization policy bound to an NVRAM space.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NvramSpacePolicy {
    /// Plain authorization value, no policy.
    #[default]
    None,
    /// Access is bound to the value PCR0 had when the space was defined.
    Pcr0,
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct DefineSpaceRequest {
    pub index: u32,
    pub size: u32,
    #[serde(default)]
    pub attributes: Vec<NvramSpaceAttribute>,
    #[serde(default, with = "serde_bytes")]
    pub authorization_value: Vec<u8>,
    #[serde(default)]
    pub policy: NvramSpacePolicy,
}

impl fmt::Debug for DefineSpaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineSpaceRequest")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("attributes", &self.attributes)
            .field("authorization_value", &Redacted(&self.authorization_value))
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineSpaceReply {
    pub result: NvramResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroySpaceRequest {
    pub index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroySpaceReply {
    pub result: NvramResult,
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WriteSpaceRequest {
    pub index: u32,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(default, with = "serde_bytes")]
    pub authorization_value: Vec<u8>,
    /// Authorize with the stored owner password instead of
    /// `authorization_value`.
    #[serde(default)]
    pub use_owner_authorization: bool,
}

impl fmt::Debug for WriteSpaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSpaceRequest")
            .field("index", &self.index)
            .field("data", &Redacted(&self.data))
            .field("authorization_value", &Redacted(&self.authorization_value))
            .field("use_owner_authorization", &self.use_owner_authorization)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSpaceReply {
    pub result: NvramResult,
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ReadSpaceRequest {
    pub index: u32,
    #[serde(default, with = "serde_bytes")]
    pub authorization_value: Vec<u8>,
    #[serde(default)]
    pub use_owner_authorization: bool,
}

impl fmt::Debug for ReadSpaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSpaceRequest")
            .field("index", &self.index)
            .field("authorization_value", &Redacted(&self.authorization_value))
            .field("use_owner_authorization", &self.use_owner_authorization)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ReadSpaceReply {
    pub result: NvramResult,
    /// Space contents, only valid on success.
    #[serde(default, with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl fmt::Debug for ReadSpaceReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSpaceReply")
            .field("result", &self.result)
            .field("data", &Redacted(&self.data))
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LockSpaceRequest {
    pub index: u32,
    #[serde(default)]
    pub lock_read: bool,
    #[serde(default)]
    pub lock_write: bool,
    #[serde(default, with = "serde_bytes")]
    pub authorization_value: Vec<u8>,
    #[serde(default)]
    pub use_owner_authorization: bool,
}

impl fmt::Debug for LockSpaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSpaceRequest")
            .field("index", &self.index)
            .field("lock_read", &self.lock_read)
            .field("lock_write", &self.lock_write)
            .field("authorization_value", &Redacted(&self.authorization_value))
            .field("use_owner_authorization", &self.use_owner_authorization)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSpaceReply {
    pub result: NvramResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSpacesRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSpacesReply {
    pub result: NvramResult,
    #[serde(default)]
    pub index_list: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSpaceInfoRequest {
    pub index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSpaceInfoReply {
    pub result: NvramResult,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub is_read_locked: bool,
    #[serde(default)]
    pub is_write_locked: bool,
    #[serde(default)]
    pub attributes: Vec<NvramSpaceAttribute>,
    #[serde(default)]
    pub policy: NvramSpacePolicy,
}
