// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Central GPU state.
//!
//! Owns the puller (registers, bindings, engines), the pushbuffer decoder, the
//! syncpoint manager and the render backend. Both execution-mode shells drive
//! the same context; they differ only in which thread calls into it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pfifo_common::settings::Settings;

use crate::backend::RenderBackend;
use crate::command_processor::{CommandProcessor, GpEntry};
use crate::engines::register_engine::RegisterEngine;
use crate::engines::{Engine, EngineClass};
use crate::memory::GuestMemory;
use crate::method::MethodCall;
use crate::puller::{gpu_ticks, MethodOutcome, Puller};
use crate::syncpoint::{InterruptHandler, SyncpointManager};

/// GPU state shared between the submitting thread and the GPU worker.
pub struct GpuContext {
    puller: Mutex<Puller>,
    command_processor: CommandProcessor,
    syncpoints: Arc<SyncpointManager>,
    backend: Mutex<Box<dyn RenderBackend>>,
    on_interrupt: InterruptHandler,
    epoch: Instant,
}

impl GpuContext {
    /// `on_interrupt` receives `(syncpoint_id, value)` for every fired
    /// syncpoint interrupt.
    pub fn new(
        settings: &Settings,
        memory: Arc<dyn GuestMemory>,
        backend: Box<dyn RenderBackend>,
        on_interrupt: InterruptHandler,
    ) -> Self {
        let epoch = Instant::now();
        let syncpoints = Arc::new(SyncpointManager::with_interrupt_handler(
            on_interrupt.clone(),
        ));

        let mut puller = Puller::new(syncpoints.clone(), memory.clone());
        puller.set_default_acquire_timeout(settings.acquire_timeout);
        puller.set_epoch(epoch);

        log::debug!("GpuContext: backend '{}'", backend.name());

        Self {
            puller: Mutex::new(puller),
            command_processor: CommandProcessor::new(memory),
            syncpoints,
            backend: Mutex::new(backend),
            on_interrupt,
            epoch,
        }
    }

    pub fn register_engine(&self, engine: Box<dyn Engine>) {
        self.puller.lock().register_engine(engine);
    }

    /// Register a [`RegisterEngine`] for every known engine class.
    pub fn register_default_engines(&self) {
        let mut puller = self.puller.lock();
        for class in EngineClass::KNOWN {
            puller.register_engine(Box::new(RegisterEngine::new(class)));
        }
    }

    pub fn syncpoints(&self) -> &Arc<SyncpointManager> {
        &self.syncpoints
    }

    /// Dispatch one method call on the calling thread.
    pub fn dispatch(&self, call: &MethodCall) -> MethodOutcome {
        self.puller.lock().call_method(call)
    }

    /// Decode and dispatch a command list on the calling thread.
    pub fn dispatch_entries(&self, entries: &[GpEntry]) {
        log::debug!("GpuContext: processing {} GPFIFO entries", entries.len());
        let mut puller = self.puller.lock();
        self.command_processor.process_entries(entries, &mut |call: &MethodCall| {
            if let MethodOutcome::AcquireFailed {
                syncpoint_id,
                value,
            } = puller.call_method(call)
            {
                log::warn!(
                    "GpuContext: acquire failed (syncpoint {}, value {}), continuing",
                    syncpoint_id,
                    value
                );
            }
        });
    }

    /// Run `f` with exclusive access to the puller, e.g. to poke registers.
    pub fn with_puller<R>(&self, f: impl FnOnce(&mut Puller) -> R) -> R {
        f(&mut self.puller.lock())
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&mut dyn RenderBackend) -> R) -> R {
        let mut backend = self.backend.lock();
        f(&mut **backend)
    }

    /// Block until the syncpoint reaches `value`.
    pub fn wait_fence(&self, syncpoint_id: u32, value: u32) {
        self.syncpoints.wait(syncpoint_id, value);
    }

    /// Block until the syncpoint reaches `value` or `timeout` elapses.
    pub fn wait_fence_timeout(&self, syncpoint_id: u32, value: u32, timeout: Duration) -> bool {
        self.syncpoints.wait_timeout(syncpoint_id, value, timeout)
    }

    pub fn increment_syncpoint(&self, syncpoint_id: u32) {
        self.syncpoints.increment(syncpoint_id);
    }

    pub fn get_syncpoint_value(&self, syncpoint_id: u32) -> u32 {
        self.syncpoints.get_value(syncpoint_id)
    }

    pub fn register_syncpt_interrupt(&self, syncpoint_id: u32, value: u32) {
        self.syncpoints.register_interrupt(syncpoint_id, value);
    }

    pub fn cancel_syncpt_interrupt(&self, syncpoint_id: u32, value: u32) -> bool {
        self.syncpoints.cancel_interrupt(syncpoint_id, value)
    }

    pub fn trigger_cpu_interrupt(&self, syncpoint_id: u32, value: u32) {
        (self.on_interrupt)(syncpoint_id, value);
    }

    /// Current GPU timestamp.
    pub fn gpu_ticks(&self) -> u64 {
        gpu_ticks(self.epoch)
    }
}
