// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

use super::{DictionaryAttackInfo, TpmError};
use std::collections::HashMap;

/// Failed authorizations tolerated before lockout.
pub(super) const DEFAULT_LOCKOUT_THRESHOLD: u32 = 10;
/// Seconds until the counter decrements by one.
pub(super) const DEFAULT_LOCKOUT_INTERVAL: u32 = 600;

/// Per-command call counts and injected failures.
#[derive(Debug, Default)]
pub(super) struct CommandLog {
    calls: HashMap<&'static str, usize>,
    faults: HashMap<&'static str, (usize, u32)>,
}

impl CommandLog {
    /// Record a call to `command`, failing it if a fault is armed.
    pub(super) fn enter(&mut self, command: &'static str) -> Result<(), TpmError> {
        *self.calls.entry(command).or_default() += 1;
        if let Some((remaining, code)) = self.faults.get_mut(command) {
            let code = *code;
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(command);
            }
            log::debug!("simulator: injected failure of {} rc={:#x}", command, code);
            return Err(TpmError::command(code));
        }
        Ok(())
    }

    pub(super) fn fail(&mut self, command: &'static str, times: usize, code: u32) {
        if times == 0 {
            self.faults.remove(command);
        } else {
            self.faults.insert(command, (times, code));
        }
    }

    pub(super) fn calls(&self, command: &str) -> usize {
        self.calls.get(command).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub(super) struct DictionaryAttackState {
    pub(super) counter: u32,
    pub(super) threshold: u32,
    pub(super) interval: u32,
}

impl Default for DictionaryAttackState {
    fn default() -> Self {
        Self {
            counter: 0,
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            interval: DEFAULT_LOCKOUT_INTERVAL,
        }
    }
}

impl DictionaryAttackState {
    pub(super) fn locked_out(&self) -> bool {
        self.threshold != 0 && self.counter >= self.threshold
    }

    pub(super) fn record_failure(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    pub(super) fn reset(&mut self) {
        self.counter = 0;
    }

    pub(super) fn info(&self) -> DictionaryAttackInfo {
        let lockout = self.locked_out();
        DictionaryAttackInfo {
            counter: self.counter,
            threshold: self.threshold,
            lockout,
            seconds_remaining: if lockout {
                (self.counter - self.threshold + 1) * self.interval
            } else {
                0
            },
        }
    }
}
