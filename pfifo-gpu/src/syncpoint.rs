// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoints: the only ordering the CPU can observe between itself and GPU
//! work.
//!
//! A syncpoint is a 32-bit counter that only moves forward by one. Semaphore
//! methods in the pushbuffer bump it; the CPU side polls it, blocks on a
//! threshold, or registers an interrupt for one.
//!
//! Reads are a single atomic load. Increments, waits and interrupt
//! registration all go through one mutex/condvar pair so a waiter can never
//! miss the increment that releases it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Syncpoint slots exposed by the host1x block.
pub const NUM_SYNCPOINTS: usize = 192;

/// Invoked as `(syncpoint_id, threshold)` when a registered interrupt fires.
/// Runs with the syncpoint lock held: it must not block or call back into
/// the manager.
pub type InterruptHandler = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Syncpoint counters plus their pending interrupt thresholds.
pub struct SyncpointManager {
    values: Box<[AtomicU32]>,
    /// Pending interrupt thresholds per syncpoint, in registration order.
    interrupts: Mutex<Vec<Vec<u32>>>,
    cond: Condvar,
    on_interrupt: InterruptHandler,
    /// Set once at teardown; releases every blocked waiter.
    shutdown: AtomicBool,
}

impl SyncpointManager {
    pub fn new() -> Self {
        Self::with_interrupt_handler(Arc::new(|_: u32, _: u32| {}))
    }

    pub fn with_interrupt_handler(on_interrupt: InterruptHandler) -> Self {
        let values: Box<[AtomicU32]> = (0..NUM_SYNCPOINTS).map(|_| AtomicU32::new(0)).collect();
        Self {
            values,
            interrupts: Mutex::new(vec![Vec::new(); NUM_SYNCPOINTS]),
            cond: Condvar::new(),
            on_interrupt,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Atomically increment a syncpoint, fire every interrupt whose threshold
    /// is now met, and wake waiters. Returns the new value.
    pub fn increment(&self, id: u32) -> u32 {
        let idx = check_id(id);

        let mut interrupts = self.interrupts.lock();
        let new_val = self.values[idx].fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        log::trace!("syncpoint[{}] incremented to {}", id, new_val);

        interrupts[idx].retain(|&threshold| {
            if syncpoint_reached(new_val, threshold) {
                log::debug!("syncpoint[{}]: interrupt at {} fired", id, threshold);
                (self.on_interrupt)(id, threshold);
                false
            } else {
                true
            }
        });

        self.cond.notify_all();
        new_val
    }

    /// Read the current value of a syncpoint without locking.
    pub fn get_value(&self, id: u32) -> u32 {
        self.values[check_id(id)].load(Ordering::Acquire)
    }

    /// Block until a syncpoint reaches `threshold`. Returns `false` if
    /// [`SyncpointManager::shutdown`] released the wait first.
    pub fn wait(&self, id: u32, threshold: u32) -> bool {
        let idx = check_id(id);
        let mut guard = self.interrupts.lock();
        loop {
            if syncpoint_reached(self.values[idx].load(Ordering::Acquire), threshold) {
                return true;
            }
            if self.is_shut_down() {
                return false;
            }
            self.cond.wait(&mut guard);
        }
    }

    /// [`SyncpointManager::wait`] with a deadline. `false` means the deadline
    /// passed first.
    pub fn wait_timeout(&self, id: u32, threshold: u32, timeout: Duration) -> bool {
        let idx = check_id(id);
        let deadline = Instant::now() + timeout;

        let mut guard = self.interrupts.lock();
        while !syncpoint_reached(self.values[idx].load(Ordering::Acquire), threshold) {
            if self.is_shut_down() {
                return false;
            }
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return syncpoint_reached(self.values[idx].load(Ordering::Acquire), threshold);
            }
        }
        true
    }

    /// Ask for an interrupt once the syncpoint reaches `threshold`. Fires
    /// immediately, on this thread, if it already has.
    pub fn register_interrupt(&self, id: u32, threshold: u32) {
        let idx = check_id(id);
        let mut interrupts = self.interrupts.lock();
        if syncpoint_reached(self.values[idx].load(Ordering::Acquire), threshold) {
            log::debug!("syncpoint[{}]: interrupt at {} already reached", id, threshold);
            (self.on_interrupt)(id, threshold);
            return;
        }
        interrupts[idx].push(threshold);
    }

    /// Withdraw one pending interrupt. Returns `false` if none matched, which
    /// includes the case where it has already fired.
    pub fn cancel_interrupt(&self, id: u32, threshold: u32) -> bool {
        let idx = check_id(id);
        let mut interrupts = self.interrupts.lock();
        match interrupts[idx].iter().position(|&t| t == threshold) {
            Some(pos) => {
                interrupts[idx].remove(pos);
                true
            }
            None => false,
        }
    }

    /// Release every current and future waiter. Counters, increments and
    /// interrupts keep working; only blocking stops.
    pub fn shutdown(&self) {
        let _guard = self.interrupts.lock();
        self.shutdown.store(true, Ordering::Release);
        self.cond.notify_all();
        log::debug!("syncpoints: shut down, waiters released");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of interrupts still pending on a syncpoint.
    pub fn pending_interrupts(&self, id: u32) -> usize {
        self.interrupts.lock()[check_id(id)].len()
    }
}

impl Default for SyncpointManager {
    fn default() -> Self {
        Self::new()
    }
}

fn check_id(id: u32) -> usize {
    let idx = id as usize;
    assert!(idx < NUM_SYNCPOINTS, "syncpoint id {} out of range", id);
    idx
}

fn syncpoint_reached(value: u32, threshold: u32) -> bool {
    value >= threshold
}
