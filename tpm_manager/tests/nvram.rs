// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

mod common;

use common::{Harness, Simulator};
use tpm_manager::libtpmmanager::*;

const INDEX: u32 = 0x0100_0005;

fn padded(data: &[u8], size: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize(size, 0);
    padded
}

#[test]
fn define_then_destroy() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        for policy in [NvramSpacePolicy::None, NvramSpacePolicy::Pcr0] {
            assert_eq!(
                harness.define(INDEX, 16, &[], b"", policy),
                NvramResult::Success
            );
            let info = harness.space_info(INDEX);
            assert_eq!(info.result, NvramResult::Success);
            assert_eq!(info.size, 16);
            assert_eq!(info.policy, policy);
            assert!(harness.list().contains(&INDEX));

            assert_eq!(harness.destroy(INDEX), NvramResult::Success);
            assert_eq!(
                harness.space_info(INDEX).result,
                NvramResult::SpaceDoesNotExist
            );
            assert!(!harness.list().contains(&INDEX));
        }
    }
}

#[test]
fn policy_record_follows_redefinition() {
    let harness = Harness::owned(Simulator::tpm20());
    assert_eq!(
        harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::Pcr0),
        NvramResult::Success
    );
    let records = harness.store.snapshot().nvram_policy;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, INDEX);
    assert_eq!(records[0].policy, NvramSpacePolicy::Pcr0);

    // TPM 2.0 redefines in place.
    assert_eq!(
        harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
        NvramResult::Success
    );
    let records = harness.store.snapshot().nvram_policy;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].policy, NvramSpacePolicy::None);
    assert_eq!(records[0].policy_digest, None);
}

#[test]
fn tpm12_duplicate_define_keeps_record() {
    let harness = Harness::owned(Simulator::tpm12());
    assert_eq!(
        harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::Pcr0),
        NvramResult::Success
    );
    assert_eq!(
        harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
        NvramResult::SpaceAlreadyExists
    );

    let records = harness.store.snapshot().nvram_policy;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].policy, NvramSpacePolicy::Pcr0);
    assert_eq!(harness.space_info(INDEX).policy, NvramSpacePolicy::Pcr0);
}

#[test]
fn define_without_owner_password_touches_nothing() {
    for tpm in Simulator::both() {
        let harness = Harness::unowned(tpm);
        let writes = harness.store.write_count();

        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
            NvramResult::OperationDisabled
        );
        assert_eq!(harness.store.write_count(), writes);
        assert_eq!(harness.tpm.command_calls("nv_define_space"), 0);
        assert!(harness.store.snapshot().nvram_policy.is_empty());
    }
}

#[test]
fn double_destroy() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        for index in [INDEX, INDEX + 1] {
            assert_eq!(
                harness.define(index, 4, &[], b"", NvramSpacePolicy::None),
                NvramResult::Success
            );
        }
        assert_eq!(harness.store.snapshot().nvram_policy.len(), 2);

        assert_eq!(harness.destroy(INDEX), NvramResult::Success);
        assert_eq!(harness.destroy(INDEX), NvramResult::SpaceDoesNotExist);
        let records = harness.store.snapshot().nvram_policy;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, INDEX + 1);
    }
}

#[test]
fn write_size_must_match() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
            NvramResult::Success
        );
        assert_eq!(harness.write(INDEX, b"original", b""), NvramResult::Success);

        assert_eq!(
            harness.write(INDEX, b"shrt", b""),
            NvramResult::InvalidParameter
        );
        assert_eq!(
            harness.write(INDEX, b"far too long", b""),
            NvramResult::InvalidParameter
        );
        let reply = harness.read(INDEX, b"");
        assert_eq!(reply.result, NvramResult::Success);
        assert_eq!(reply.data, b"original");
    }
}

#[test]
fn define_write_read_lock() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let data = padded(b"nvram_data", 32);

        assert_eq!(
            harness.define(5, 32, &[], b"", NvramSpacePolicy::None),
            NvramResult::Success
        );
        assert_eq!(harness.write(5, &data, b""), NvramResult::Success);
        let reply = harness.read(5, b"");
        assert_eq!(reply.result, NvramResult::Success);
        assert_eq!(reply.data, data);

        let lock = harness
            .service
            .lock_space(LockSpaceRequest {
                index: 5,
                lock_read: false,
                lock_write: true,
                authorization_value: Vec::new(),
                use_owner_authorization: false,
            })
            .wait();
        assert_eq!(lock.result, NvramResult::Success);

        assert_ne!(harness.write(5, b"x", b""), NvramResult::Success);
        assert_eq!(
            harness.write(5, &padded(b"other", 32), b""),
            NvramResult::OperationDisabled
        );
        let info = harness.space_info(5);
        assert!(info.is_write_locked && !info.is_read_locked);
        assert_eq!(harness.read(5, b"").data, data);
    }
}

#[test]
fn authorization_value_is_checked() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let attributes = [
            NvramSpaceAttribute::WriteAuthorization,
            NvramSpaceAttribute::ReadAuthorization,
        ];
        assert_eq!(
            harness.define(INDEX, 4, &attributes, b"secret", NvramSpacePolicy::None),
            NvramResult::Success
        );
        assert_eq!(
            harness.write(INDEX, b"data", b"wrong"),
            NvramResult::AccessDenied
        );
        assert_eq!(
            harness.write(INDEX, b"data", b"secret"),
            NvramResult::Success
        );
        assert_eq!(
            harness.read(INDEX, b"wrong").result,
            NvramResult::AccessDenied
        );
        assert_eq!(harness.read(INDEX, b"secret").data, b"data");

        let info = harness.space_info(INDEX);
        assert!(info
            .attributes
            .contains(&NvramSpaceAttribute::WriteAuthorization));
        assert!(info
            .attributes
            .contains(&NvramSpaceAttribute::ReadAuthorization));
    }
}

#[test]
fn owner_authorization_uses_stored_password() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let attributes = [NvramSpaceAttribute::OwnerWrite];
        assert_eq!(
            harness.define(INDEX, 4, &attributes, b"", NvramSpacePolicy::None),
            NvramResult::Success
        );
        let reply = harness
            .service
            .write_space(WriteSpaceRequest {
                index: INDEX,
                data: b"data".to_vec(),
                authorization_value: Vec::new(),
                use_owner_authorization: true,
            })
            .wait();
        assert_eq!(reply.result, NvramResult::Success);
    }
}

#[test]
fn owner_authorization_without_password_is_denied() {
    for tpm in Simulator::both() {
        let harness = Harness::unowned(tpm);
        let reply = harness
            .service
            .read_space(ReadSpaceRequest {
                index: INDEX,
                authorization_value: Vec::new(),
                use_owner_authorization: true,
            })
            .wait();
        assert_eq!(reply.result, NvramResult::AccessDenied);
        assert!(reply.data.is_empty());
    }
}

#[test]
fn pcr0_policy_binds_to_boot_state() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let attributes = [
            NvramSpaceAttribute::WriteAuthorization,
            NvramSpaceAttribute::ReadAuthorization,
        ];
        assert_eq!(
            harness.define(INDEX, 4, &attributes, b"auth", NvramSpacePolicy::Pcr0),
            NvramResult::Success
        );
        assert_eq!(harness.write(INDEX, b"data", b"auth"), NvramResult::Success);
        assert_eq!(harness.read(INDEX, b"auth").data, b"data");

        harness.tpm.extend_pcr0(b"a different boot path");
        assert_eq!(
            harness.read(INDEX, b"auth").result,
            NvramResult::AccessDenied
        );
        assert_eq!(
            harness.write(INDEX, b"next", b"auth"),
            NvramResult::AccessDenied
        );
    }
}

#[test]
fn extend_spaces() {
    let harness = Harness::owned(Simulator::tpm20());
    let features = harness
        .service
        .get_supported_features(GetSupportedFeaturesRequest {})
        .wait();
    assert!(features.support_extend && features.support_pcr0_policy);

    let extend = [NvramSpaceAttribute::Extend];
    assert_eq!(
        harness.define(INDEX, 16, &extend, b"", NvramSpacePolicy::None),
        NvramResult::InvalidParameter
    );
    assert_eq!(
        harness.define(INDEX, 32, &extend, b"", NvramSpacePolicy::None),
        NvramResult::Success
    );
    assert_eq!(harness.write(INDEX, b"first", b""), NvramResult::Success);
    let once = harness.read(INDEX, b"").data;
    assert_eq!(harness.write(INDEX, b"first", b""), NvramResult::Success);
    let twice = harness.read(INDEX, b"").data;
    assert_eq!(once.len(), 32);
    assert_ne!(once, twice);
}

#[test]
fn tpm12_rejects_unsupported_attributes() {
    let harness = Harness::owned(Simulator::tpm12());
    let features = harness
        .service
        .get_supported_features(GetSupportedFeaturesRequest {})
        .wait();
    assert!(!features.support_extend && features.support_pcr0_policy);

    for attribute in [
        NvramSpaceAttribute::Extend,
        NvramSpaceAttribute::PlatformRead,
    ] {
        assert_eq!(
            harness.define(INDEX, 20, &[attribute], b"", NvramSpacePolicy::None),
            NvramResult::InvalidParameter
        );
    }
    assert_eq!(harness.tpm.command_calls("nv_define_space"), 0);
}

#[test]
fn disabled_tpm_disables_nvram() {
    for tpm in Simulator::both() {
        tpm.set_enabled(false);
        let harness = Harness::owned(tpm);
        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
            NvramResult::OperationDisabled
        );
        assert_eq!(
            harness
                .service
                .list_spaces(ListSpacesRequest {})
                .wait()
                .result,
            NvramResult::OperationDisabled
        );
    }
}

#[test]
fn failed_policy_save_undoes_define() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        harness.store.set_fail_writes(true);
        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::Pcr0),
            NvramResult::DeviceError
        );
        harness.store.set_fail_writes(false);

        assert!(!harness.list().contains(&INDEX));
        assert_eq!(
            harness.space_info(INDEX).result,
            NvramResult::SpaceDoesNotExist
        );
        assert!(harness.store.snapshot().nvram_policy.is_empty());

        // The index is free again.
        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::Pcr0),
            NvramResult::Success
        );
        assert_eq!(harness.space_info(INDEX).policy, NvramSpacePolicy::Pcr0);
    }
}

#[test]
fn destroy_reports_store_failures() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::Pcr0),
            NvramResult::Success
        );
        let before = harness.store.snapshot();

        // No owner password to be had, the space stays.
        harness.store.set_fail_reads(true);
        assert_eq!(harness.destroy(INDEX), NvramResult::DeviceError);
        harness.store.set_fail_reads(false);
        assert!(harness.list().contains(&INDEX));
        assert_eq!(harness.store.snapshot(), before);

        // The space is gone but the record could not be updated.
        harness.store.set_fail_writes(true);
        assert_eq!(harness.destroy(INDEX), NvramResult::DeviceError);
        harness.store.set_fail_writes(false);
        assert!(!harness.list().contains(&INDEX));
        assert_eq!(harness.store.snapshot(), before);

        assert_eq!(
            harness.define(INDEX, 8, &[], b"", NvramSpacePolicy::None),
            NvramResult::Success
        );
        let records = harness.store.snapshot().nvram_policy;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].policy, NvramSpacePolicy::None);
    }
}
