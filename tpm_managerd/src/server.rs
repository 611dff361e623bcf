// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use anyhow::{bail, Context};
use libtpmmanager::*;
use serde::Serialize;
use std::io::{self, Read, Write};
use tpm_manager::service::TpmManagerService;

/// Largest request the daemon accepts.
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Read one frame. `None` when the peer closed the connection between
/// frames.
fn read_frame<R: Read>(stream: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let len = {
        let mut bytes = [0u8; 8];
        match stream.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("failed to read frame header"),
        }
        usize::from_ne_bytes(bytes)
    };
    if len > MAX_FRAME_SIZE {
        bail!(
            "frame of {} bytes exceeds the {} byte limit",
            len,
            MAX_FRAME_SIZE
        );
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .context("failed to read frame payload")?;
    Ok(Some(buf))
}

fn write_frame<W: Write>(stream: &mut W, payload: &impl Serialize) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec(payload).context("failed to serialize reply")?;

    // 8-byte length header, then the JSON payload.
    stream
        .write_all(&bytes.len().to_ne_bytes())
        .context("failed to write frame header")?;
    stream
        .write_all(&bytes)
        .context("failed to write frame payload")?;
    stream.flush().context("failed to flush reply")?;
    Ok(())
}

/// Submit `request` to the service and wait for its reply.
pub fn dispatch(service: &TpmManagerService, request: TpmManagerRequest) -> TpmManagerReply {
    use TpmManagerReply as Reply;
    use TpmManagerRequest as Request;

    match request {
        Request::GetTpmStatus(r) => Reply::GetTpmStatus(service.get_tpm_status(r).wait()),
        Request::GetTpmNonsensitiveStatus(r) => {
            Reply::GetTpmNonsensitiveStatus(service.get_tpm_nonsensitive_status(r).wait())
        }
        Request::GetVersionInfo(r) => Reply::GetVersionInfo(service.get_version_info(r).wait()),
        Request::GetSupportedFeatures(r) => {
            Reply::GetSupportedFeatures(service.get_supported_features(r).wait())
        }
        Request::GetDictionaryAttackInfo(r) => {
            Reply::GetDictionaryAttackInfo(service.get_dictionary_attack_info(r).wait())
        }
        Request::ResetDictionaryAttackLock(r) => {
            Reply::ResetDictionaryAttackLock(service.reset_dictionary_attack_lock(r).wait())
        }
        Request::TakeOwnership(r) => Reply::TakeOwnership(service.take_ownership(r).wait()),
        Request::RemoveOwnerDependency(r) => {
            Reply::RemoveOwnerDependency(service.remove_owner_dependency(r).wait())
        }
        Request::ClearStoredOwnerPassword(r) => {
            Reply::ClearStoredOwnerPassword(service.clear_stored_owner_password(r).wait())
        }
        Request::DefineSpace(r) => Reply::DefineSpace(service.define_space(r).wait()),
        Request::DestroySpace(r) => Reply::DestroySpace(service.destroy_space(r).wait()),
        Request::WriteSpace(r) => Reply::WriteSpace(service.write_space(r).wait()),
        Request::ReadSpace(r) => Reply::ReadSpace(service.read_space(r).wait()),
        Request::LockSpace(r) => Reply::LockSpace(service.lock_space(r).wait()),
        Request::ListSpaces(r) => Reply::ListSpaces(service.list_spaces(r).wait()),
        Request::GetSpaceInfo(r) => Reply::GetSpaceInfo(service.get_space_info(r).wait()),
    }
}

/// Answer framed requests on `stream` until the client disconnects.
pub fn serve<S: Read + Write>(stream: &mut S, service: &TpmManagerService) -> anyhow::Result<()> {
    while let Some(frame) = read_frame(stream)? {
        let request: TpmManagerRequest =
            serde_json::from_slice(&frame).context("malformed request")?;
        log::debug!("Request: {:?}", request);
        let reply = dispatch(service, request);
        write_frame(stream, &reply)?;
    }
    Ok(())
}
