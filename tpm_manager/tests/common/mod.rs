// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tpm_manager::libtpmmanager::*;
use tpm_manager::local_data::InMemoryLocalDataStore;
use tpm_manager::metrics::{SecretStatus, TpmManagerMetrics};
use tpm_manager::service::TpmManagerService;
use tpm_manager::tpm::tpm12::Tpm12Simulator;
use tpm_manager::tpm::tpm20::Tpm20Simulator;
use tpm_manager::tpm::{DictionaryAttackResetStatus, SharedTpm, TpmBackend};
use tpm_manager::ServiceConfig;

/// Keeps every reported metric for later inspection.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub reset_statuses: Mutex<Vec<DictionaryAttackResetStatus>>,
    pub counters: Mutex<Vec<u32>>,
    pub secret_statuses: Mutex<Vec<SecretStatus>>,
    pub fingerprints: Mutex<Vec<u32>>,
    pub ownership_times: Mutex<Vec<Duration>>,
}

impl RecordingMetrics {
    pub fn reset_statuses(&self) -> Vec<DictionaryAttackResetStatus> {
        self.reset_statuses
            .lock()
            .expect("Failed to lock metrics")
            .clone()
    }
}

impl TpmManagerMetrics for RecordingMetrics {
    fn report_dictionary_attack_reset_status(&self, status: DictionaryAttackResetStatus) {
        self.reset_statuses
            .lock()
            .expect("Failed to lock metrics")
            .push(status);
    }

    fn report_dictionary_attack_counter(&self, counter: u32) {
        self.counters
            .lock()
            .expect("Failed to lock metrics")
            .push(counter);
    }

    fn report_secret_status(&self, status: SecretStatus) {
        self.secret_statuses
            .lock()
            .expect("Failed to lock metrics")
            .push(status);
    }

    fn report_version_fingerprint(&self, fingerprint: u32) {
        self.fingerprints
            .lock()
            .expect("Failed to lock metrics")
            .push(fingerprint);
    }

    fn report_time_to_take_ownership(&self, duration: Duration) {
        self.ownership_times
            .lock()
            .expect("Failed to lock metrics")
            .push(duration);
    }
}

/// Which simulator a test runs on, with a handle to poke at it.
#[derive(Debug, Clone)]
pub enum Simulator {
    Tpm12(SharedTpm<Tpm12Simulator>),
    Tpm20(SharedTpm<Tpm20Simulator>),
}

impl Simulator {
    pub fn tpm12() -> Self {
        Self::Tpm12(Arc::new(Mutex::new(Tpm12Simulator::new())))
    }

    pub fn tpm20() -> Self {
        Self::Tpm20(Arc::new(Mutex::new(Tpm20Simulator::new())))
    }

    pub fn both() -> [Self; 2] {
        [Self::tpm12(), Self::tpm20()]
    }

    pub fn command_calls(&self, command: &str) -> usize {
        match self {
            Self::Tpm12(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .command_calls(command),
            Self::Tpm20(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .command_calls(command),
        }
    }

    pub fn extend_pcr0(&self, data: &[u8]) {
        match self {
            Self::Tpm12(tpm) => tpm.lock().expect("Failed to lock TPM").extend_pcr(0, data),
            Self::Tpm20(tpm) => tpm.lock().expect("Failed to lock TPM").extend_pcr(0, data),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        match self {
            Self::Tpm12(tpm) => tpm.lock().expect("Failed to lock TPM").set_enabled(enabled),
            Self::Tpm20(tpm) => tpm.lock().expect("Failed to lock TPM").set_enabled(enabled),
        }
    }

    pub fn set_dictionary_attack_counter(&self, counter: u32) {
        match self {
            Self::Tpm12(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .set_dictionary_attack_counter(counter),
            Self::Tpm20(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .set_dictionary_attack_counter(counter),
        }
    }

    pub fn set_dictionary_attack_threshold(&self, threshold: u32) {
        match self {
            Self::Tpm12(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .set_dictionary_attack_threshold(threshold),
            Self::Tpm20(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .set_dictionary_attack_threshold(threshold),
        }
    }

    pub fn fail_command(&self, command: &'static str, times: usize, code: u32) {
        match self {
            Self::Tpm12(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .fail_command(command, times, code),
            Self::Tpm20(tpm) => tpm
                .lock()
                .expect("Failed to lock TPM")
                .fail_command(command, times, code),
        }
    }

    /// Calls to the command that resets the DA lock on this TPM generation.
    pub fn reset_lock_calls(&self) -> usize {
        match self {
            Self::Tpm12(_) => self.command_calls("reset_lock_value"),
            Self::Tpm20(_) => self.command_calls("dictionary_attack_lock_reset"),
        }
    }

    /// Calls to the command that installs a new owner secret.
    pub fn take_ownership_calls(&self) -> usize {
        match self {
            Self::Tpm12(_) => self.command_calls("take_ownership"),
            Self::Tpm20(_) => self.command_calls("hierarchy_change_auth"),
        }
    }

    /// External TPM clear, e.g. from firmware.
    pub fn clear(&self) {
        match self {
            Self::Tpm12(tpm) => tpm.lock().expect("Failed to lock TPM").clear(),
            Self::Tpm20(tpm) => tpm.lock().expect("Failed to lock TPM").clear(),
        }
    }

    pub fn is_tpm12(&self) -> bool {
        matches!(self, Self::Tpm12(_))
    }

    fn backend(&self, store: Arc<dyn tpm_manager::local_data::LocalDataStore>) -> TpmBackend {
        match self {
            Self::Tpm12(tpm) => TpmBackend::tpm12(tpm.clone(), store),
            Self::Tpm20(tpm) => TpmBackend::tpm20(tpm.clone(), store),
        }
    }
}

#[derive(Debug)]
pub struct Harness {
    pub service: TpmManagerService,
    pub store: Arc<InMemoryLocalDataStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub tpm: Simulator,
}

impl Harness {
    pub fn with_store(
        tpm: Simulator,
        config: ServiceConfig,
        store: Arc<InMemoryLocalDataStore>,
    ) -> Self {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut service = TpmManagerService::new(config, store.clone(), metrics.clone());
        let factory_tpm = tpm.clone();
        service
            .initialize(move |store| Ok(factory_tpm.backend(store)))
            .expect("Failed to start the service");
        Self {
            service,
            store,
            metrics,
            tpm,
        }
    }

    pub fn new(tpm: Simulator, config: ServiceConfig) -> Self {
        Self::with_store(tpm, config, Arc::new(InMemoryLocalDataStore::default()))
    }

    /// A service that takes ownership during initialization.
    pub fn owned(tpm: Simulator) -> Self {
        let harness = Self::new(
            tpm,
            ServiceConfig {
                wait_for_ownership: false,
                ..Default::default()
            },
        );
        harness.sync();
        harness
    }

    /// A service waiting for an explicit TakeOwnership.
    pub fn unowned(tpm: Simulator) -> Self {
        let harness = Self::new(tpm, ServiceConfig::default());
        harness.sync();
        harness
    }

    /// Wait until every task posted so far has run.
    pub fn sync(&self) {
        self.service
            .get_dictionary_attack_info(GetDictionaryAttackInfoRequest {})
            .wait();
    }

    pub fn define(
        &self,
        index: u32,
        size: u32,
        attributes: &[NvramSpaceAttribute],
        authorization_value: &[u8],
        policy: NvramSpacePolicy,
    ) -> NvramResult {
        self.service
            .define_space(DefineSpaceRequest {
                index,
                size,
                attributes: attributes.to_vec(),
                authorization_value: authorization_value.to_vec(),
                policy,
            })
            .wait()
            .result
    }

    pub fn write(&self, index: u32, data: &[u8], authorization_value: &[u8]) -> NvramResult {
        self.service
            .write_space(WriteSpaceRequest {
                index,
                data: data.to_vec(),
                authorization_value: authorization_value.to_vec(),
                use_owner_authorization: false,
            })
            .wait()
            .result
    }

    pub fn read(&self, index: u32, authorization_value: &[u8]) -> ReadSpaceReply {
        self.service
            .read_space(ReadSpaceRequest {
                index,
                authorization_value: authorization_value.to_vec(),
                use_owner_authorization: false,
            })
            .wait()
    }

    pub fn destroy(&self, index: u32) -> NvramResult {
        self.service
            .destroy_space(DestroySpaceRequest { index })
            .wait()
            .result
    }

    pub fn space_info(&self, index: u32) -> GetSpaceInfoReply {
        self.service
            .get_space_info(GetSpaceInfoRequest { index })
            .wait()
    }

    pub fn list(&self) -> Vec<u32> {
        let reply = self.service.list_spaces(ListSpacesRequest {}).wait();
        assert_eq!(reply.result, NvramResult::Success);
        reply.index_list
    }
}
