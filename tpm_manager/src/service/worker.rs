// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::timer::{DictionaryAttackTimer, TimerResetReason};
use super::ServiceCache;
use crate::config::ServiceConfig;
use crate::local_data::LocalDataStore;
use crate::metrics::{version_fingerprint, SecretStatus, TpmManagerMetrics};
use crate::tpm::{
    DictionaryAttackResetStatus, NvramError, NvramSpaceInfo, OwnershipStatus, TpmBackend, TpmError,
    TpmNvram, TpmVersion,
};
use libtpmmanager::*;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Builds the backend on the worker thread. Called again after a failure
/// when the next request retries initialization.
pub type BackendFactory =
    Box<dyn FnMut(Arc<dyn LocalDataStore>) -> Result<TpmBackend, TpmError> + Send>;

/// Unit of work executed on the worker thread.
pub(super) type Task = Box<dyn FnOnce(&mut Worker) + Send>;

/// Ownership bootstrap state of the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    /// Initialization failed, retried on the next request.
    InitializeFailed,
    /// The TPM is disabled or deactivated in hardware.
    Disabled,
    Unowned,
    Owned,
}

/// Owns the backend and everything that touches the TPM. Lives on the
/// worker thread only.
pub(super) struct Worker {
    config: ServiceConfig,
    store: Arc<dyn LocalDataStore>,
    metrics: Arc<dyn TpmManagerMetrics>,
    cache: Arc<Mutex<ServiceCache>>,
    factory: BackendFactory,
    backend: Option<TpmBackend>,
    state: WorkerState,
    timer: DictionaryAttackTimer,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state)
            .field("backend", &self.backend)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

/// Reset the DA lock when mitigation is active and the counter is nonzero.
fn reset_lock_if_needed(
    backend: &mut TpmBackend,
    metrics: &dyn TpmManagerMetrics,
) -> DictionaryAttackResetStatus {
    match backend.status.is_dictionary_attack_mitigation_enabled() {
        Ok(false) => {
            log::debug!("DA mitigation is disabled, nothing to reset");
            let status = DictionaryAttackResetStatus::ResetNotNecessary;
            metrics.report_dictionary_attack_reset_status(status);
            return status;
        }
        Ok(true) => {}
        Err(e) => log::warn!("Failed to query DA mitigation: {}", e),
    }

    let status = match backend.status.get_dictionary_attack_info() {
        Ok(info) => {
            metrics.report_dictionary_attack_counter(info.counter);
            if info.counter == 0 {
                DictionaryAttackResetStatus::ResetNotNecessary
            } else {
                log::info!("DA counter is {}, resetting the lock", info.counter);
                backend.initializer.reset_dictionary_attack_lock()
            }
        }
        Err(e) => {
            log::error!("Failed to query the DA counter: {}", e);
            DictionaryAttackResetStatus::CounterQueryFailed
        }
    };
    metrics.report_dictionary_attack_reset_status(status);
    status
}

fn take_ownership_now(
    backend: &mut TpmBackend,
    owner_dependencies: &[String],
    metrics: &dyn TpmManagerMetrics,
) -> Result<(), TpmError> {
    let start = Instant::now();
    backend.initializer.initialize_tpm(owner_dependencies)?;
    backend.status.refresh_owner_status();
    metrics.report_time_to_take_ownership(start.elapsed());
    Ok(())
}

fn has_reset_lock_permissions(version: TpmVersion, local_data: &LocalData) -> bool {
    match version {
        TpmVersion::Tpm20 => local_data
            .lockout_password
            .as_ref()
            .is_some_and(|password| !password.is_empty()),
        TpmVersion::Tpm12 => {
            local_data.has_owner_password()
                || local_data
                    .owner_delegate
                    .as_ref()
                    .is_some_and(|delegate| delegate.has_reset_lock_permissions)
        }
    }
}

fn status_for(state: WorkerState) -> TpmManagerStatus {
    match state {
        WorkerState::Disabled => TpmManagerStatus::NotAvailable,
        _ => TpmManagerStatus::DeviceError,
    }
}

impl Worker {
    pub(super) fn new(
        config: ServiceConfig,
        store: Arc<dyn LocalDataStore>,
        metrics: Arc<dyn TpmManagerMetrics>,
        cache: Arc<Mutex<ServiceCache>>,
        factory: BackendFactory,
    ) -> Self {
        let timer = DictionaryAttackTimer::new(config.dictionary_attack_reset_period);
        Self {
            config,
            store,
            metrics,
            cache,
            factory,
            backend: None,
            state: WorkerState::Initializing,
            timer,
        }
    }

    #[cfg(test)]
    pub(super) fn state(&self) -> WorkerState {
        self.state
    }

    #[cfg(test)]
    pub(super) fn timer(&self) -> &DictionaryAttackTimer {
        &self.timer
    }

    /// Serve tasks in FIFO order until every sender is gone, running the
    /// periodic DA check whenever its deadline passes.
    pub(super) fn run(mut self, tasks: Receiver<Task>) {
        log::info!("TPM worker started");
        loop {
            if self.timer.is_expired(Instant::now()) {
                self.periodic_dictionary_attack_reset();
                continue;
            }
            let next = match self.timer.remaining(Instant::now()) {
                Some(timeout) => tasks.recv_timeout(timeout),
                None => tasks.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(task) => task(&mut self),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("TPM worker stopped");
    }

    fn cache(&self) -> MutexGuard<'_, ServiceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_status_cache(&self) {
        self.cache().nonsensitive_status = None;
    }

    fn report_secret_status(&self) {
        match self.store.read() {
            Ok(local_data) => self
                .metrics
                .report_secret_status(SecretStatus::from_local_data(&local_data)),
            Err(e) => log::warn!("Failed to read local data for metrics: {}", e),
        }
    }

    pub(super) fn initialize(&mut self) {
        self.state = WorkerState::Initializing;
        let mut backend = match self.backend.take() {
            Some(backend) => backend,
            None => match (self.factory)(Arc::clone(&self.store)) {
                Ok(backend) => backend,
                Err(e) => {
                    log::error!("Failed to create the TPM backend: {}", e);
                    self.state = WorkerState::InitializeFailed;
                    return;
                }
            },
        };

        self.state = match self.initialize_backend(&mut backend) {
            Ok(state) => state,
            Err(e) => {
                log::error!("TPM initialization failed: {}", e);
                WorkerState::InitializeFailed
            }
        };
        log::info!("TPM {} manager state: {:?}", backend.version, self.state);
        self.backend = Some(backend);
    }

    fn initialize_backend(&mut self, backend: &mut TpmBackend) -> Result<WorkerState, TpmError> {
        if !backend.status.is_tpm_enabled() {
            log::warn!("TPM is disabled");
            return Ok(WorkerState::Disabled);
        }
        if let Err(e) = backend.initializer.verified_boot_helper() {
            log::warn!("Failed to measure the boot mode into PCR0: {}", e);
        }

        let ownership = match backend.status.get_tpm_owned() {
            Ok(ownership) => ownership,
            Err(e) => {
                log::warn!("Failed to query TPM ownership, trying a DA reset: {}", e);
                reset_lock_if_needed(backend, self.metrics.as_ref());
                backend.status.get_tpm_owned()?
            }
        };

        let state = if ownership == OwnershipStatus::Owned {
            if let Err(e) = backend.initializer.ensure_persistent_owner_delegate() {
                log::warn!("Failed to ensure the owner delegate: {}", e);
            }
            WorkerState::Owned
        } else {
            log::warn!("TPM is not fully owned ({:?})", ownership);
            if let Err(e) = backend.initializer.prune_stored_passwords() {
                log::warn!("Failed to prune stored passwords: {}", e);
            }
            if let Err(e) = backend.nvram.prune_policies() {
                log::warn!("Failed to prune NVRAM policy records: {}", e);
            }

            if !self.config.wait_for_ownership {
                match take_ownership_now(
                    backend,
                    &self.config.default_owner_dependencies,
                    self.metrics.as_ref(),
                ) {
                    Ok(()) => WorkerState::Owned,
                    Err(e) => {
                        log::error!("Failed to take ownership: {}", e);
                        self.timer.reset(TimerResetReason::OwnershipAttempt);
                        WorkerState::Unowned
                    }
                }
            } else {
                if self.config.perform_preinit {
                    if let Err(e) = backend.initializer.pre_initialize_tpm() {
                        log::warn!("TPM pre-initialization failed: {}", e);
                    }
                }
                WorkerState::Unowned
            }
        };

        self.timer.schedule_now();
        self.report_secret_status();
        match backend.status.get_version_info() {
            Ok(info) => {
                self.metrics
                    .report_version_fingerprint(version_fingerprint(&info));
                self.cache().version_info = Some(version_reply(info));
            }
            Err(e) => log::warn!("Failed to query TPM version info: {}", e),
        }
        Ok(state)
    }

    /// Current state, retrying a failed initialization first.
    fn check_ready(&mut self) -> WorkerState {
        if self.state == WorkerState::InitializeFailed {
            log::info!("Retrying TPM initialization");
            self.initialize();
        }
        self.state
    }

    /// Backend of an initialized, enabled TPM.
    fn ready_backend(&mut self) -> Result<&mut TpmBackend, TpmManagerStatus> {
        match self.check_ready() {
            WorkerState::Unowned | WorkerState::Owned => self
                .backend
                .as_mut()
                .ok_or(TpmManagerStatus::DeviceError),
            state => Err(status_for(state)),
        }
    }

    fn ownership_lost(&mut self) {
        log::warn!("TPM is no longer owned");
        self.state = WorkerState::Unowned;
        self.timer.reset(TimerResetReason::OwnershipLost);
        self.invalidate_status_cache();
    }

    fn periodic_dictionary_attack_reset(&mut self) {
        if matches!(self.state, WorkerState::Unowned | WorkerState::Owned) {
            if let Some(backend) = self.backend.as_mut() {
                let status = reset_lock_if_needed(backend, self.metrics.as_ref());
                log::debug!("Periodic DA reset: {:?}", status);
            }
        }
        self.timer.reset(TimerResetReason::Periodic);
    }

    /// (enabled, owned) as reported by the TPM.
    fn query_ownership(&mut self) -> Result<(bool, bool), TpmManagerStatus> {
        let was_owned = self.state == WorkerState::Owned;
        let owned = match self.ready_backend() {
            Ok(backend) => match backend.status.get_tpm_owned() {
                Ok(ownership) => ownership == OwnershipStatus::Owned,
                Err(e) => {
                    log::error!("Failed to query TPM ownership: {}", e);
                    return Err(TpmManagerStatus::DeviceError);
                }
            },
            Err(TpmManagerStatus::NotAvailable) => return Ok((false, false)),
            Err(status) => return Err(status),
        };
        if was_owned && !owned {
            self.ownership_lost();
        }
        Ok((true, owned))
    }

    pub(super) fn get_tpm_status(&mut self) -> GetTpmStatusReply {
        let (enabled, owned) = match self.query_ownership() {
            Ok(flags) => flags,
            Err(status) => {
                return GetTpmStatusReply {
                    status,
                    ..Default::default()
                }
            }
        };
        match self.store.read() {
            Ok(local_data) => GetTpmStatusReply {
                status: TpmManagerStatus::Success,
                enabled,
                owned,
                local_data: Some(local_data),
            },
            Err(e) => {
                log::error!("Failed to read local data: {}", e);
                GetTpmStatusReply {
                    status: TpmManagerStatus::DeviceError,
                    ..Default::default()
                }
            }
        }
    }

    pub(super) fn get_tpm_nonsensitive_status(&mut self) -> GetTpmNonsensitiveStatusReply {
        let (is_enabled, is_owned) = match self.query_ownership() {
            Ok(flags) => flags,
            Err(status) => {
                return GetTpmNonsensitiveStatusReply {
                    status,
                    ..Default::default()
                }
            }
        };
        let local_data = match self.store.read() {
            Ok(local_data) => local_data,
            Err(e) => {
                log::error!("Failed to read local data: {}", e);
                return GetTpmNonsensitiveStatusReply {
                    status: TpmManagerStatus::DeviceError,
                    ..Default::default()
                };
            }
        };

        let reply = GetTpmNonsensitiveStatusReply {
            status: TpmManagerStatus::Success,
            is_enabled,
            is_owned,
            is_owner_password_present: local_data.has_owner_password(),
            has_reset_lock_permissions: self
                .backend
                .as_ref()
                .is_some_and(|backend| has_reset_lock_permissions(backend.version, &local_data)),
        };
        if is_owned {
            self.cache().nonsensitive_status = Some(reply.clone());
        }
        reply
    }

    pub(super) fn get_version_info(&mut self) -> GetVersionInfoReply {
        if let Some(cached) = self.cache().version_info.clone() {
            return cached;
        }
        let info = match self.ready_backend() {
            Ok(backend) => backend.status.get_version_info(),
            Err(status) => {
                return GetVersionInfoReply {
                    status,
                    ..Default::default()
                }
            }
        };
        match info {
            Ok(info) => {
                let reply = version_reply(info);
                self.cache().version_info = Some(reply.clone());
                reply
            }
            Err(e) => {
                log::error!("Failed to query TPM version info: {}", e);
                GetVersionInfoReply {
                    status: TpmManagerStatus::DeviceError,
                    ..Default::default()
                }
            }
        }
    }

    pub(super) fn get_supported_features(&mut self) -> GetSupportedFeaturesReply {
        match self.ready_backend() {
            Ok(backend) => {
                let features = backend.nvram.supported_features();
                GetSupportedFeaturesReply {
                    status: TpmManagerStatus::Success,
                    support_pcr0_policy: features.pcr0_policy,
                    support_extend: features.extend,
                }
            }
            Err(status) => GetSupportedFeaturesReply {
                status,
                ..Default::default()
            },
        }
    }

    pub(super) fn get_dictionary_attack_info(&mut self) -> GetDictionaryAttackInfoReply {
        let info = match self.ready_backend() {
            Ok(backend) => backend.status.get_dictionary_attack_info(),
            Err(status) => {
                return GetDictionaryAttackInfoReply {
                    status,
                    ..Default::default()
                }
            }
        };
        match info {
            Ok(info) => GetDictionaryAttackInfoReply {
                status: TpmManagerStatus::Success,
                dictionary_attack_counter: info.counter,
                dictionary_attack_threshold: info.threshold,
                dictionary_attack_lockout_in_effect: info.lockout,
                dictionary_attack_lockout_seconds_remaining: info.seconds_remaining,
            },
            Err(e) => {
                log::error!("Failed to query DA info: {}", e);
                GetDictionaryAttackInfoReply {
                    status: TpmManagerStatus::DeviceError,
                    ..Default::default()
                }
            }
        }
    }

    pub(super) fn reset_dictionary_attack_lock(&mut self) -> ResetDictionaryAttackLockReply {
        let status = match self.ready_backend() {
            Ok(backend) => backend.initializer.reset_dictionary_attack_lock(),
            Err(status) => return ResetDictionaryAttackLockReply { status },
        };
        self.timer.reset(TimerResetReason::ManualReset);
        self.metrics.report_dictionary_attack_reset_status(status);

        let status = if status == DictionaryAttackResetStatus::ResetAttemptSucceeded {
            TpmManagerStatus::Success
        } else {
            log::error!("DA lock reset failed: {:?}", status);
            TpmManagerStatus::DeviceError
        };
        ResetDictionaryAttackLockReply { status }
    }

    pub(super) fn take_ownership(&mut self) -> TakeOwnershipReply {
        match self.check_ready() {
            WorkerState::Owned => {
                log::info!("TPM is already owned");
                return TakeOwnershipReply {
                    status: TpmManagerStatus::Success,
                };
            }
            WorkerState::Unowned => {}
            state => {
                return TakeOwnershipReply {
                    status: status_for(state),
                }
            }
        }
        let Some(backend) = self.backend.as_mut() else {
            return TakeOwnershipReply {
                status: TpmManagerStatus::DeviceError,
            };
        };

        let result = take_ownership_now(
            backend,
            &self.config.default_owner_dependencies,
            self.metrics.as_ref(),
        );
        let status = match result {
            Ok(()) => {
                reset_lock_if_needed(backend, self.metrics.as_ref());
                self.state = WorkerState::Owned;
                TpmManagerStatus::Success
            }
            Err(e) => {
                log::error!("Failed to take ownership: {}", e);
                TpmManagerStatus::DeviceError
            }
        };
        self.timer.reset(TimerResetReason::OwnershipAttempt);
        self.invalidate_status_cache();
        self.report_secret_status();
        TakeOwnershipReply { status }
    }

    pub(super) fn remove_owner_dependency(
        &self,
        request: &RemoveOwnerDependencyRequest,
    ) -> RemoveOwnerDependencyReply {
        let status = match self.update_local_data(|config, local_data| {
            if !local_data.remove_owner_dependency(&request.owner_dependency) {
                log::info!(
                    "Owner dependency {} is not present",
                    request.owner_dependency
                );
            }
            if config.auto_clear_stored_owner_password
                && local_data.owner_dependency.is_empty()
                && local_data.owner_password.is_some()
            {
                log::info!("Last owner dependency removed, clearing the owner password");
                local_data.owner_password = None;
            }
        }) {
            Ok(()) => TpmManagerStatus::Success,
            Err(e) => {
                log::error!("Failed to remove owner dependency: {}", e);
                TpmManagerStatus::DeviceError
            }
        };
        RemoveOwnerDependencyReply { status }
    }

    pub(super) fn clear_stored_owner_password(&self) -> ClearStoredOwnerPasswordReply {
        let status = match self.update_local_data(|_, local_data| {
            if !local_data.owner_dependency.is_empty() {
                log::warn!(
                    "Owner password is still needed by {:?}",
                    local_data.owner_dependency
                );
            } else if local_data.owner_password.is_some() {
                log::info!("Clearing the stored owner password");
                local_data.owner_password = None;
            }
        }) {
            Ok(()) => TpmManagerStatus::Success,
            Err(e) => {
                log::error!("Failed to clear the owner password: {}", e);
                TpmManagerStatus::DeviceError
            }
        };
        ClearStoredOwnerPasswordReply { status }
    }

    /// Read-modify-write of the local data. Nothing is written when `update`
    /// leaves the record unchanged.
    fn update_local_data<F>(&self, update: F) -> Result<(), TpmError>
    where
        F: FnOnce(&ServiceConfig, &mut LocalData),
    {
        let mut local_data = self.store.read()?;
        let before = local_data.clone();
        update(&self.config, &mut local_data);
        if local_data != before {
            self.store.write(&local_data)?;
            self.invalidate_status_cache();
        }
        Ok(())
    }

    fn nvram(&mut self) -> Result<&mut dyn TpmNvram, NvramError> {
        match self.ready_backend() {
            Ok(backend) => Ok(backend.nvram.as_mut()),
            Err(TpmManagerStatus::NotAvailable) => Err(NvramError::OperationDisabled),
            Err(_) => Err(NvramError::DeviceError),
        }
    }

    /// The caller's secret, or the stored owner password when asked to
    /// authorize as the owner.
    fn authorization_value(
        &self,
        authorization_value: &[u8],
        use_owner_authorization: bool,
    ) -> Result<Vec<u8>, NvramError> {
        if !use_owner_authorization {
            return Ok(authorization_value.to_vec());
        }
        let local_data = self.store.read()?;
        local_data
            .owner_password()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                log::error!("NVRAM: owner authorization requested without an owner password");
                NvramError::AccessDenied
            })
    }

    pub(super) fn define_space(&mut self, request: &DefineSpaceRequest) -> Result<(), NvramError> {
        self.nvram()?.define_space(
            request.index,
            request.size,
            &request.attributes,
            &request.authorization_value,
            request.policy,
        )
    }

    pub(super) fn destroy_space(
        &mut self,
        request: &DestroySpaceRequest,
    ) -> Result<(), NvramError> {
        self.nvram()?.destroy_space(request.index)
    }

    pub(super) fn write_space(
        &mut self,
        request: &WriteSpaceRequest,
    ) -> Result<(), NvramError> {
        self.nvram()?;
        let auth = self.authorization_value(
            &request.authorization_value,
            request.use_owner_authorization,
        )?;
        self.nvram()?
            .write_space(request.index, &request.data, &auth)
    }

    pub(super) fn read_space(
        &mut self,
        request: &ReadSpaceRequest,
    ) -> Result<Vec<u8>, NvramError> {
        self.nvram()?;
        let auth = self.authorization_value(
            &request.authorization_value,
            request.use_owner_authorization,
        )?;
        self.nvram()?.read_space(request.index, &auth)
    }

    pub(super) fn lock_space(
        &mut self,
        request: &LockSpaceRequest,
    ) -> Result<(), NvramError> {
        self.nvram()?;
        let auth = self.authorization_value(
            &request.authorization_value,
            request.use_owner_authorization,
        )?;
        self.nvram()?
            .lock_space(request.index, request.lock_read, request.lock_write, &auth)
    }

    pub(super) fn list_spaces(&mut self) -> Result<Vec<u32>, NvramError> {
        self.nvram()?.list_spaces()
    }

    pub(super) fn get_space_info(
        &mut self,
        request: &GetSpaceInfoRequest,
    ) -> Result<NvramSpaceInfo, NvramError> {
        self.nvram()?.get_space_info(request.index)
    }
}

fn version_reply(info: crate::tpm::VersionInfo) -> GetVersionInfoReply {
    GetVersionInfoReply {
        status: TpmManagerStatus::Success,
        family: info.family,
        spec_level: info.spec_level,
        manufacturer: info.manufacturer,
        tpm_model: info.tpm_model,
        firmware_version: info.firmware_version,
        vendor_specific: info.vendor_specific,
    }
}
