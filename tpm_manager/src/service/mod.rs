// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

//! The request-serving front of the TPM manager.
//!
//! Every operation is posted to one worker thread that owns the TPM
//! backend, so at most one TPM operation runs at a time and operations
//! execute in submission order. Posting never blocks; the caller gets a
//! [`PendingReply`] and decides when to wait for it.

mod timer;
mod worker;

pub use timer::{DictionaryAttackTimer, TimerResetReason};

use crate::config::ServiceConfig;
use crate::error::TpmManagerError;
use crate::local_data::LocalDataStore;
use crate::metrics::TpmManagerMetrics;
use crate::tpm::{nvram_result, simulated_backend, TpmBackend, TpmError, TpmVersion};
use libtpmmanager::*;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use worker::{Task, Worker};

/// Replies the calling thread may serve without a round trip to the worker.
#[derive(Debug, Default)]
struct ServiceCache {
    /// Version info never changes while the process runs.
    version_info: Option<GetVersionInfoReply>,
    /// Only filled while the TPM is owned. Cleared whenever ownership or
    /// the stored secrets change.
    nonsensitive_status: Option<GetTpmNonsensitiveStatusReply>,
}

/// A reply type the service can synthesize when the worker is gone.
pub trait ServiceReply: Sized {
    fn not_available() -> Self;
}

macro_rules! impl_service_reply {
    (only $field:ident = $value:expr => $($reply:ident),+ $(,)?) => {
        $(
            impl ServiceReply for $reply {
                fn not_available() -> Self {
                    Self { $field: $value }
                }
            }
        )+
    };
    ($field:ident = $value:expr => $($reply:ident),+ $(,)?) => {
        $(
            impl ServiceReply for $reply {
                fn not_available() -> Self {
                    Self {
                        $field: $value,
                        ..Default::default()
                    }
                }
            }
        )+
    };
}

impl_service_reply!(status = TpmManagerStatus::NotAvailable =>
    GetTpmStatusReply,
    GetTpmNonsensitiveStatusReply,
    GetVersionInfoReply,
    GetSupportedFeaturesReply,
    GetDictionaryAttackInfoReply,
);

impl_service_reply!(only status = TpmManagerStatus::NotAvailable =>
    ResetDictionaryAttackLockReply,
    TakeOwnershipReply,
    RemoveOwnerDependencyReply,
    ClearStoredOwnerPasswordReply,
);

impl_service_reply!(result = NvramResult::DeviceError =>
    ReadSpaceReply,
    ListSpacesReply,
    GetSpaceInfoReply,
);

impl_service_reply!(only result = NvramResult::DeviceError =>
    DefineSpaceReply,
    DestroySpaceReply,
    WriteSpaceReply,
    LockSpaceReply,
);

#[derive(Debug)]
enum PendingInner<T> {
    Ready(T),
    Waiting(Receiver<T>),
}

/// The eventual reply to a posted request.
#[derive(Debug)]
pub struct PendingReply<T> {
    inner: PendingInner<T>,
}

impl<T: ServiceReply> PendingReply<T> {
    /// A reply that is already known.
    pub fn ready(reply: T) -> Self {
        Self {
            inner: PendingInner::Ready(reply),
        }
    }

    fn waiting(receiver: Receiver<T>) -> Self {
        Self {
            inner: PendingInner::Waiting(receiver),
        }
    }

    /// Block until the worker has answered. A request the worker never ran
    /// is answered with [`ServiceReply::not_available`].
    pub fn wait(self) -> T {
        match self.inner {
            PendingInner::Ready(reply) => reply,
            PendingInner::Waiting(receiver) => receiver.recv().unwrap_or_else(|_| {
                log::error!("TPM worker dropped a request");
                T::not_available()
            }),
        }
    }
}

/// Serializes TPM ownership, status and NVRAM operations on a worker
/// thread.
#[derive(Debug)]
pub struct TpmManagerService {
    config: ServiceConfig,
    store: Arc<dyn LocalDataStore>,
    metrics: Arc<dyn TpmManagerMetrics>,
    cache: Arc<Mutex<ServiceCache>>,
    sender: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl TpmManagerService {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn LocalDataStore>,
        metrics: Arc<dyn TpmManagerMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            metrics,
            cache: Arc::new(Mutex::new(ServiceCache::default())),
            sender: None,
            worker: None,
        }
    }

    /// Start the worker and queue TPM initialization on it.
    ///
    /// # Arguments
    ///
    /// * `factory`: Builds the backend on the worker thread. It is called
    ///   again when a failed initialization is retried.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the worker runs. Initialization itself completes
    /// asynchronously and its failures surface in the replies.
    pub fn initialize<F>(&mut self, factory: F) -> Result<(), TpmManagerError>
    where
        F: FnMut(Arc<dyn LocalDataStore>) -> Result<TpmBackend, TpmError> + Send + 'static,
    {
        if self.sender.is_some() {
            return Err(TpmManagerError::AlreadyInitialized);
        }

        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = Worker::new(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            Arc::clone(&self.cache),
            Box::new(factory),
        );
        let handle = thread::Builder::new()
            .name("tpm_manager_worker".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(TpmManagerError::Worker)?;

        if sender
            .send(Box::new(|worker: &mut Worker| worker.initialize()))
            .is_err()
        {
            log::error!("TPM worker exited before initialization");
        }
        self.sender = Some(sender);
        self.worker = Some(handle);
        Ok(())
    }

    /// Start the worker on a fresh in-process simulator of `version`.
    pub fn initialize_simulated(&mut self, version: TpmVersion) -> Result<(), TpmManagerError> {
        self.initialize(move |store| Ok(simulated_backend(version, store)))
    }

    fn cache(&self) -> MutexGuard<'_, ServiceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post<T, W>(&self, work: W) -> PendingReply<T>
    where
        T: ServiceReply + Send + 'static,
        W: FnOnce(&mut Worker) -> T + Send + 'static,
    {
        let (reply_sender, receiver) = mpsc::channel();
        let task: Task = Box::new(move |worker| {
            if reply_sender.send(work(worker)).is_err() {
                log::debug!("Caller stopped waiting for a reply");
            }
        });
        match &self.sender {
            Some(sender) => {
                if sender.send(task).is_err() {
                    log::error!("TPM worker is not running");
                }
            }
            None => log::error!("TPM manager service is not initialized"),
        }
        PendingReply::waiting(receiver)
    }

    pub fn get_tpm_status(&self, _request: GetTpmStatusRequest) -> PendingReply<GetTpmStatusReply> {
        self.post(|worker| worker.get_tpm_status())
    }

    pub fn get_tpm_nonsensitive_status(
        &self,
        _request: GetTpmNonsensitiveStatusRequest,
    ) -> PendingReply<GetTpmNonsensitiveStatusReply> {
        if let Some(cached) = self.cache().nonsensitive_status.clone() {
            return PendingReply::ready(cached);
        }
        self.post(|worker| worker.get_tpm_nonsensitive_status())
    }

    pub fn get_version_info(
        &self,
        _request: GetVersionInfoRequest,
    ) -> PendingReply<GetVersionInfoReply> {
        if let Some(cached) = self.cache().version_info.clone() {
            return PendingReply::ready(cached);
        }
        self.post(|worker| worker.get_version_info())
    }

    pub fn get_supported_features(
        &self,
        _request: GetSupportedFeaturesRequest,
    ) -> PendingReply<GetSupportedFeaturesReply> {
        self.post(|worker| worker.get_supported_features())
    }

    pub fn get_dictionary_attack_info(
        &self,
        _request: GetDictionaryAttackInfoRequest,
    ) -> PendingReply<GetDictionaryAttackInfoReply> {
        self.post(|worker| worker.get_dictionary_attack_info())
    }

    pub fn reset_dictionary_attack_lock(
        &self,
        _request: ResetDictionaryAttackLockRequest,
    ) -> PendingReply<ResetDictionaryAttackLockReply> {
        self.post(|worker| worker.reset_dictionary_attack_lock())
    }

    pub fn take_ownership(
        &self,
        _request: TakeOwnershipRequest,
    ) -> PendingReply<TakeOwnershipReply> {
        self.post(|worker| worker.take_ownership())
    }

    pub fn remove_owner_dependency(
        &self,
        request: RemoveOwnerDependencyRequest,
    ) -> PendingReply<RemoveOwnerDependencyReply> {
        self.post(move |worker| worker.remove_owner_dependency(&request))
    }

    pub fn clear_stored_owner_password(
        &self,
        _request: ClearStoredOwnerPasswordRequest,
    ) -> PendingReply<ClearStoredOwnerPasswordReply> {
        self.post(|worker| worker.clear_stored_owner_password())
    }

    pub fn define_space(&self, request: DefineSpaceRequest) -> PendingReply<DefineSpaceReply> {
        self.post(move |worker| DefineSpaceReply {
            result: nvram_result(&worker.define_space(&request)),
        })
    }

    pub fn destroy_space(&self, request: DestroySpaceRequest) -> PendingReply<DestroySpaceReply> {
        self.post(move |worker| DestroySpaceReply {
            result: nvram_result(&worker.destroy_space(&request)),
        })
    }

    pub fn write_space(&self, request: WriteSpaceRequest) -> PendingReply<WriteSpaceReply> {
        self.post(move |worker| WriteSpaceReply {
            result: nvram_result(&worker.write_space(&request)),
        })
    }

    pub fn read_space(&self, request: ReadSpaceRequest) -> PendingReply<ReadSpaceReply> {
        self.post(move |worker| {
            let result = worker.read_space(&request);
            ReadSpaceReply {
                result: nvram_result(&result),
                data: result.unwrap_or_default(),
            }
        })
    }

    pub fn lock_space(&self, request: LockSpaceRequest) -> PendingReply<LockSpaceReply> {
        self.post(move |worker| LockSpaceReply {
            result: nvram_result(&worker.lock_space(&request)),
        })
    }

    pub fn list_spaces(&self, _request: ListSpacesRequest) -> PendingReply<ListSpacesReply> {
        self.post(|worker| {
            let result = worker.list_spaces();
            ListSpacesReply {
                result: nvram_result(&result),
                index_list: result.unwrap_or_default(),
            }
        })
    }

    pub fn get_space_info(&self, request: GetSpaceInfoRequest) -> PendingReply<GetSpaceInfoReply> {
        self.post(move |worker| match worker.get_space_info(&request) {
            Ok(info) => GetSpaceInfoReply {
                result: NvramResult::Success,
                size: info.size,
                is_read_locked: info.is_read_locked,
                is_write_locked: info.is_write_locked,
                attributes: info.attributes,
                policy: info.policy,
            },
            Err(e) => GetSpaceInfoReply {
                result: e.into(),
                ..Default::default()
            },
        })
    }
}

impl Drop for TpmManagerService {
    fn drop(&mut self) {
        // Closing the queue stops the worker after the tasks already posted.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("TPM worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_data::InMemoryLocalDataStore;
    use crate::metrics::LogMetrics;
    use crate::tpm::tpm20::Tpm20Simulator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use worker::WorkerState;

    fn service(config: ServiceConfig) -> (Arc<InMemoryLocalDataStore>, TpmManagerService) {
        let store = Arc::new(InMemoryLocalDataStore::default());
        let service = TpmManagerService::new(config, store.clone(), Arc::new(LogMetrics));
        (store, service)
    }

    #[test]
    fn uninitialized_service_is_not_available() {
        let (_store, service) = service(ServiceConfig::default());
        assert_eq!(
            service
                .take_ownership(TakeOwnershipRequest {})
                .wait()
                .status,
            TpmManagerStatus::NotAvailable
        );
        assert_eq!(
            service.list_spaces(ListSpacesRequest {}).wait().result,
            NvramResult::DeviceError
        );
    }

    #[test]
    fn initialize_twice_fails() {
        let (_store, mut service) = service(ServiceConfig::default());
        service
            .initialize_simulated(TpmVersion::Tpm20)
            .expect("Failed to initialize");
        assert!(matches!(
            service.initialize_simulated(TpmVersion::Tpm20),
            Err(TpmManagerError::AlreadyInitialized)
        ));
    }

    #[test]
    fn failed_backend_creation_is_retried() {
        let (_store, mut service) = service(ServiceConfig::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        service
            .initialize(move |store| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TpmError::command(0x101))
                } else {
                    Ok(simulated_backend(TpmVersion::Tpm20, store))
                }
            })
            .expect("Failed to initialize");

        let reply = service.get_tpm_status(GetTpmStatusRequest {}).wait();
        assert_eq!(reply.status, TpmManagerStatus::Success);
        assert!(reply.enabled && !reply.owned);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn version_info_is_cached() {
        let (_store, mut service) = service(ServiceConfig::default());
        service
            .initialize_simulated(TpmVersion::Tpm20)
            .expect("Failed to initialize");

        let first = service.get_version_info(GetVersionInfoRequest {}).wait();
        assert_eq!(first.status, TpmManagerStatus::Success);
        let second = service.get_version_info(GetVersionInfoRequest {});
        assert!(matches!(second.inner, PendingInner::Ready(_)));
        assert_eq!(second.wait(), first);
    }

    #[test]
    fn worker_initializes_unowned_tpm() {
        let store: Arc<dyn LocalDataStore> = Arc::new(InMemoryLocalDataStore::default());
        let tpm = Arc::new(Mutex::new(Tpm20Simulator::new()));
        let mut worker = Worker::new(
            ServiceConfig::default(),
            store,
            Arc::new(LogMetrics),
            Arc::new(Mutex::new(ServiceCache::default())),
            Box::new(move |store| Ok(TpmBackend::tpm20(tpm.clone(), store))),
        );
        worker.initialize();
        assert_eq!(worker.state(), WorkerState::Unowned);
        assert!(worker.timer().is_armed());
        assert_eq!(worker.timer().last_reset_reason(), None);

        assert_eq!(worker.take_ownership().status, TpmManagerStatus::Success);
        assert_eq!(worker.state(), WorkerState::Owned);
        assert_eq!(
            worker.timer().last_reset_reason(),
            Some(TimerResetReason::OwnershipAttempt)
        );
    }

    #[test]
    fn nonsensitive_status_is_cached_once_owned() {
        let (_store, mut service) = service(ServiceConfig {
            wait_for_ownership: false,
            ..Default::default()
        });
        service
            .initialize_simulated(TpmVersion::Tpm20)
            .expect("Failed to initialize");

        let reply = service
            .get_tpm_nonsensitive_status(GetTpmNonsensitiveStatusRequest {})
            .wait();
        assert!(reply.is_owned && reply.is_owner_password_present);
        assert!(reply.has_reset_lock_permissions);
        assert!(service.cache().nonsensitive_status.is_some());

        service
            .remove_owner_dependency(RemoveOwnerDependencyRequest {
                owner_dependency: OWNER_DEPENDENCY_NVRAM.to_string(),
            })
            .wait();
        assert!(service.cache().nonsensitive_status.is_none());
    }
}
