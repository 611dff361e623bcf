// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

mod common;

use common::{Harness, Simulator};
use std::sync::Arc;
use std::thread;
use tpm_manager::libtpmmanager::*;
use tpm_manager::local_data::InMemoryLocalDataStore;
use tpm_manager::tpm::DictionaryAttackResetStatus;
use tpm_manager::ServiceConfig;

fn status(harness: &Harness) -> GetTpmStatusReply {
    harness
        .service
        .get_tpm_status(GetTpmStatusRequest {})
        .wait()
}

fn remove_dependency(harness: &Harness, dependency: &str) -> TpmManagerStatus {
    harness
        .service
        .remove_owner_dependency(RemoveOwnerDependencyRequest {
            owner_dependency: dependency.to_string(),
        })
        .wait()
        .status
}

fn dictionary_attack_counter(harness: &Harness) -> u32 {
    let reply = harness
        .service
        .get_dictionary_attack_info(GetDictionaryAttackInfoRequest {})
        .wait();
    assert_eq!(reply.status, TpmManagerStatus::Success);
    reply.dictionary_attack_counter
}

#[test]
fn take_ownership() {
    for tpm in Simulator::both() {
        let harness = Harness::unowned(tpm);
        let reply = status(&harness);
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(reply.enabled && !reply.owned);
        let local_data = reply.local_data.expect("Missing local data");
        assert_eq!(local_data.owner_password, None);

        let reply = harness
            .service
            .take_ownership(TakeOwnershipRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);

        let reply = status(&harness);
        assert!(reply.owned);
        let local_data = reply.local_data.expect("Missing local data");
        assert!(local_data.has_owner_password());
        assert_eq!(
            local_data.owner_dependency,
            [OWNER_DEPENDENCY_NVRAM, OWNER_DEPENDENCY_ATTESTATION]
        );
        assert_eq!(
            harness
                .metrics
                .ownership_times
                .lock()
                .expect("Failed to lock metrics")
                .len(),
            1
        );

        // Taking ownership of an owned TPM is a no-op.
        let calls = harness.tpm.take_ownership_calls();
        let reply = harness
            .service
            .take_ownership(TakeOwnershipRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert_eq!(harness.tpm.take_ownership_calls(), calls);
    }
}

#[test]
fn take_ownership_resets_dictionary_attack_counter() {
    for tpm in Simulator::both() {
        let harness = Harness::unowned(tpm);
        harness.tpm.set_dictionary_attack_counter(3);

        let reply = harness
            .service
            .take_ownership(TakeOwnershipRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert_eq!(dictionary_attack_counter(&harness), 0);
        assert_eq!(
            harness.metrics.reset_statuses().last(),
            Some(&DictionaryAttackResetStatus::ResetAttemptSucceeded)
        );
    }
}

#[test]
fn owned_at_startup() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let reply = harness
            .service
            .get_tpm_nonsensitive_status(GetTpmNonsensitiveStatusRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(reply.is_enabled && reply.is_owned);
        assert!(reply.is_owner_password_present);
        assert!(reply.has_reset_lock_permissions);

        let version = harness
            .service
            .get_version_info(GetVersionInfoRequest {})
            .wait();
        assert_eq!(version.status, TpmManagerStatus::Success);
        assert_eq!(
            harness
                .metrics
                .fingerprints
                .lock()
                .expect("Failed to lock metrics")
                .len(),
            1
        );
    }
}

#[test]
fn periodic_check_skips_reset_with_zero_counter() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        assert_eq!(
            harness.metrics.reset_statuses(),
            [DictionaryAttackResetStatus::ResetNotNecessary]
        );
        assert_eq!(
            *harness
                .metrics
                .counters
                .lock()
                .expect("Failed to lock metrics"),
            [0]
        );
        assert_eq!(harness.tpm.reset_lock_calls(), 0);
    }
}

#[test]
fn manual_dictionary_attack_reset() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        harness.tpm.set_dictionary_attack_counter(4);
        assert_eq!(dictionary_attack_counter(&harness), 4);

        let reply = harness
            .service
            .reset_dictionary_attack_lock(ResetDictionaryAttackLockRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert_eq!(dictionary_attack_counter(&harness), 0);
        assert_eq!(harness.tpm.reset_lock_calls(), 1);
    }
}

#[test]
fn manual_reset_without_secrets_fails() {
    for tpm in Simulator::both() {
        let harness = Harness::unowned(tpm);
        let reply = harness
            .service
            .reset_dictionary_attack_lock(ResetDictionaryAttackLockRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::DeviceError);
        assert_eq!(harness.tpm.reset_lock_calls(), 0);
    }
}

#[test]
fn last_owner_dependency_clears_password() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);

        assert_eq!(
            remove_dependency(&harness, OWNER_DEPENDENCY_NVRAM),
            TpmManagerStatus::Success
        );
        let local_data = harness.store.snapshot();
        assert!(local_data.has_owner_password());
        assert_eq!(local_data.owner_dependency, [OWNER_DEPENDENCY_ATTESTATION]);

        assert_eq!(
            remove_dependency(&harness, OWNER_DEPENDENCY_ATTESTATION),
            TpmManagerStatus::Success
        );
        let local_data = harness.store.snapshot();
        assert!(local_data.owner_dependency.is_empty());
        assert_eq!(local_data.owner_password, None);

        let reply = harness
            .service
            .get_tpm_nonsensitive_status(GetTpmNonsensitiveStatusRequest {})
            .wait();
        assert!(!reply.is_owner_password_present);
    }
}

#[test]
fn unknown_owner_dependency_is_ignored() {
    let harness = Harness::owned(Simulator::tpm20());
    let writes = harness.store.write_count();
    assert_eq!(
        remove_dependency(&harness, "Unknown"),
        TpmManagerStatus::Success
    );
    assert_eq!(harness.store.write_count(), writes);
    assert_eq!(harness.store.snapshot().owner_dependency.len(), 2);
}

#[test]
fn clear_stored_owner_password() {
    for tpm in Simulator::both() {
        let harness = Harness::new(
            tpm,
            ServiceConfig {
                wait_for_ownership: false,
                auto_clear_stored_owner_password: false,
                ..Default::default()
            },
        );
        harness.sync();

        // Still needed by both dependencies.
        let reply = harness
            .service
            .clear_stored_owner_password(ClearStoredOwnerPasswordRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(harness.store.snapshot().has_owner_password());

        for dependency in [OWNER_DEPENDENCY_NVRAM, OWNER_DEPENDENCY_ATTESTATION] {
            assert_eq!(
                remove_dependency(&harness, dependency),
                TpmManagerStatus::Success
            );
        }
        assert!(harness.store.snapshot().has_owner_password());

        let reply = harness
            .service
            .clear_stored_owner_password(ClearStoredOwnerPasswordRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert_eq!(harness.store.snapshot().owner_password, None);
    }
}

#[test]
fn owner_dependency_store_failures() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        let before = harness.store.snapshot();

        harness.store.set_fail_reads(true);
        assert_eq!(
            remove_dependency(&harness, OWNER_DEPENDENCY_NVRAM),
            TpmManagerStatus::DeviceError
        );
        harness.store.set_fail_reads(false);
        assert_eq!(harness.store.snapshot(), before);

        harness.store.set_fail_writes(true);
        assert_eq!(
            remove_dependency(&harness, OWNER_DEPENDENCY_NVRAM),
            TpmManagerStatus::DeviceError
        );
        harness.store.set_fail_writes(false);
        assert_eq!(harness.store.snapshot(), before);

        assert_eq!(
            remove_dependency(&harness, OWNER_DEPENDENCY_NVRAM),
            TpmManagerStatus::Success
        );
        assert_eq!(
            harness.store.snapshot().owner_dependency,
            [OWNER_DEPENDENCY_ATTESTATION]
        );
    }
}

#[test]
fn clear_stored_owner_password_store_failures() {
    for tpm in Simulator::both() {
        let harness = Harness::new(
            tpm,
            ServiceConfig {
                wait_for_ownership: false,
                auto_clear_stored_owner_password: false,
                ..Default::default()
            },
        );
        harness.sync();
        for dependency in [OWNER_DEPENDENCY_NVRAM, OWNER_DEPENDENCY_ATTESTATION] {
            assert_eq!(
                remove_dependency(&harness, dependency),
                TpmManagerStatus::Success
            );
        }
        let before = harness.store.snapshot();
        assert!(before.has_owner_password());

        let clear = || {
            harness
                .service
                .clear_stored_owner_password(ClearStoredOwnerPasswordRequest {})
                .wait()
                .status
        };

        harness.store.set_fail_reads(true);
        assert_eq!(clear(), TpmManagerStatus::DeviceError);
        harness.store.set_fail_reads(false);
        assert_eq!(harness.store.snapshot(), before);

        harness.store.set_fail_writes(true);
        assert_eq!(clear(), TpmManagerStatus::DeviceError);
        harness.store.set_fail_writes(false);
        assert_eq!(harness.store.snapshot(), before);

        assert_eq!(clear(), TpmManagerStatus::Success);
        assert_eq!(harness.store.snapshot().owner_password, None);
    }
}

#[test]
fn tpm_status_store_read_failure() {
    for tpm in Simulator::both() {
        let harness = Harness::owned(tpm);
        harness.store.set_fail_reads(true);
        let reply = status(&harness);
        assert_eq!(reply.status, TpmManagerStatus::DeviceError);
        assert_eq!(reply.local_data, None);

        harness.store.set_fail_reads(false);
        let reply = status(&harness);
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(reply
            .local_data
            .is_some_and(|local_data| local_data.has_owner_password()));
    }
}

#[test]
fn disabled_mitigation_is_reported() {
    for tpm in Simulator::both() {
        tpm.set_dictionary_attack_threshold(0);
        tpm.set_dictionary_attack_counter(3);
        let harness = Harness::owned(tpm);
        assert_eq!(
            harness.metrics.reset_statuses(),
            [DictionaryAttackResetStatus::ResetNotNecessary]
        );
        assert!(harness
            .metrics
            .counters
            .lock()
            .expect("Failed to lock metrics")
            .is_empty());
        assert_eq!(harness.tpm.reset_lock_calls(), 0);
    }
}

#[test]
fn disabled_tpm_is_not_available() {
    for tpm in Simulator::both() {
        tpm.set_enabled(false);
        let harness = Harness::owned(tpm);

        let reply = status(&harness);
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(!reply.enabled && !reply.owned);

        let reply = harness
            .service
            .take_ownership(TakeOwnershipRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::NotAvailable);
        let reply = harness
            .service
            .get_dictionary_attack_info(GetDictionaryAttackInfoRequest {})
            .wait();
        assert_eq!(reply.status, TpmManagerStatus::NotAvailable);

        assert_eq!(harness.tpm.take_ownership_calls(), 0);
        assert!(harness.store.snapshot().owner_password.is_none());
    }
}

#[test]
fn failed_initialization_is_retried_on_request() {
    let tpm = Simulator::tpm20();
    tpm.fail_command("hierarchy_auth_status", 2, 0x101);
    let harness = Harness::new(tpm, ServiceConfig::default());

    let reply = status(&harness);
    assert_eq!(reply.status, TpmManagerStatus::Success);
    assert!(reply.enabled && !reply.owned);
    assert_eq!(harness.tpm.command_calls("startup_enabled"), 2);
    assert_eq!(harness.tpm.command_calls("dictionary_attack_lock_reset"), 0);
}

#[test]
fn stale_secrets_are_pruned_after_clear() {
    for tpm in Simulator::both() {
        let store = Arc::new(InMemoryLocalDataStore::default());
        let owned = ServiceConfig {
            wait_for_ownership: false,
            ..Default::default()
        };
        let harness = Harness::with_store(tpm.clone(), owned, store.clone());
        assert_eq!(
            harness.define(7, 8, &[], b"", NvramSpacePolicy::Pcr0),
            NvramResult::Success
        );
        drop(harness);
        assert!(store.snapshot().has_owner_password());
        assert_eq!(store.snapshot().nvram_policy.len(), 1);

        tpm.clear();
        let harness = Harness::with_store(tpm, ServiceConfig::default(), store.clone());
        harness.sync();

        let local_data = store.snapshot();
        assert_eq!(local_data.owner_password, None);
        assert!(local_data.owner_delegate.is_none());
        assert!(local_data.nvram_policy.is_empty());
        assert!(!status(&harness).owned);
    }
}

#[test]
fn operations_run_in_submission_order() {
    let harness = Harness::owned(Simulator::tpm20());

    // Posted back to back without waiting.
    let define = harness.service.define_space(DefineSpaceRequest {
        index: 9,
        size: 4,
        attributes: Vec::new(),
        authorization_value: Vec::new(),
        policy: NvramSpacePolicy::None,
    });
    let write = harness.service.write_space(WriteSpaceRequest {
        index: 9,
        data: b"abcd".to_vec(),
        authorization_value: Vec::new(),
        use_owner_authorization: false,
    });
    let destroy = harness
        .service
        .destroy_space(DestroySpaceRequest { index: 9 });
    assert_eq!(define.wait().result, NvramResult::Success);
    assert_eq!(write.wait().result, NvramResult::Success);
    assert_eq!(destroy.wait().result, NvramResult::Success);
    assert!(harness.store.snapshot().nvram_policy.is_empty());
}

#[test]
fn concurrent_callers_are_serialized() {
    let harness = Harness::owned(Simulator::tpm20());

    thread::scope(|scope| {
        for caller in 0..8u32 {
            let harness = &harness;
            scope.spawn(move || {
                let index = 0x100 + caller;
                let data = caller.to_le_bytes();
                for _ in 0..4 {
                    assert_eq!(
                        harness.define(index, 4, &[], b"", NvramSpacePolicy::None),
                        NvramResult::Success
                    );
                    assert_eq!(harness.write(index, &data, b""), NvramResult::Success);
                    assert_eq!(harness.read(index, b"").data, data);
                    assert_eq!(harness.destroy(index), NvramResult::Success);
                }
            });
        }
    });

    assert!(harness.list().is_empty());
    assert!(harness.store.snapshot().nvram_policy.is_empty());
}
