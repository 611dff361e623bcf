// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use crate::*;
use serde::{Deserialize, Serialize};

/// A request sent to the daemon. Each frame on the daemon socket carries
/// exactly one of these, answered by the matching [`TpmManagerReply`]
/// variant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "operation", content = "request", rename_all = "snake_case")]
pub enum TpmManagerRequest {
    GetTpmStatus(GetTpmStatusRequest),
    GetTpmNonsensitiveStatus(GetTpmNonsensitiveStatusRequest),
    GetVersionInfo(GetVersionInfoRequest),
    GetSupportedFeatures(GetSupportedFeaturesRequest),
    GetDictionaryAttackInfo(GetDictionaryAttackInfoRequest),
    ResetDictionaryAttackLock(ResetDictionaryAttackLockRequest),
    TakeOwnership(TakeOwnershipRequest),
    RemoveOwnerDependency(RemoveOwnerDependencyRequest),
    ClearStoredOwnerPassword(ClearStoredOwnerPasswordRequest),
    DefineSpace(DefineSpaceRequest),
    DestroySpace(DestroySpaceRequest),
    WriteSpace(WriteSpaceRequest),
    ReadSpace(ReadSpaceRequest),
    LockSpace(LockSpaceRequest),
    ListSpaces(ListSpacesRequest),
    GetSpaceInfo(GetSpaceInfoRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "operation", content = "reply", rename_all = "snake_case")]
pub enum TpmManagerReply {
    GetTpmStatus(GetTpmStatusReply),
    GetTpmNonsensitiveStatus(GetTpmNonsensitiveStatusReply),
    GetVersionInfo(GetVersionInfoReply),
    GetSupportedFeatures(GetSupportedFeaturesReply),
    GetDictionaryAttackInfo(GetDictionaryAttackInfoReply),
    ResetDictionaryAttackLock(ResetDictionaryAttackLockReply),
    TakeOwnership(TakeOwnershipReply),
    RemoveOwnerDependency(RemoveOwnerDependencyReply),
    ClearStoredOwnerPassword(ClearStoredOwnerPasswordReply),
    DefineSpace(DefineSpaceReply),
    DestroySpace(DestroySpaceReply),
    WriteSpace(WriteSpaceReply),
    ReadSpace(ReadSpaceReply),
    LockSpace(LockSpaceReply),
    ListSpaces(ListSpacesReply),
    GetSpaceInfo(GetSpaceInfoReply),
}
