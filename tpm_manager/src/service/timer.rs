// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use std::time::{Duration, Instant};

/// Why the dictionary attack timer was last re-armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerResetReason {
    /// The periodic check ran.
    Periodic,
    /// A TakeOwnership attempt finished.
    OwnershipAttempt,
    /// The TPM stopped being owned.
    OwnershipLost,
    /// A ResetDictionaryAttackLock request was served.
    ManualReset,
}

/// Monotonic deadline of the next automatic dictionary attack lock reset.
#[derive(Clone, Copy, Debug)]
pub struct DictionaryAttackTimer {
    period: Duration,
    deadline: Option<Instant>,
    last_reset: Option<TimerResetReason>,
}

impl DictionaryAttackTimer {
    /// A disarmed timer with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
            last_reset: None,
        }
    }

    /// Arm the timer to fire immediately unless it is already armed.
    pub fn schedule_now(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now());
        }
    }

    /// Restart a full period from now.
    pub fn reset(&mut self, reason: TimerResetReason) {
        self.deadline = Some(Instant::now() + self.period);
        self.last_reset = Some(reason);
        log::debug!(
            "DA timer reset ({:?}), next check in {} s",
            reason,
            self.period.as_secs()
        );
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Time left until the deadline, `None` when disarmed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn last_reset_reason(&self) -> Option<TimerResetReason> {
        self.last_reset
    }
}
