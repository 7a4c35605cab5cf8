// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Execution-mode shells.
//!
//! A shell decides *when* dispatched work runs. [`SyncGpu`] runs everything on
//! the submitting thread before returning; [`AsyncGpu`] hands work to a GPU
//! worker thread and lets the caller continue. Either way engines observe
//! methods in program order, and the only cross-thread ordering guarantee is
//! through syncpoints.
//!
//! [`Gpu`] closes the set of shells and is chosen once, at construction.

pub mod async_gpu;
pub mod sync_gpu;

use std::sync::Arc;
use std::time::Duration;

use pfifo_common::settings::{GpuMode, Settings};
use pfifo_common::{GpuError, VAddr};

pub use async_gpu::AsyncGpu;
pub use sync_gpu::SyncGpu;

use crate::backend::{FramebufferConfig, RenderBackend};
use crate::command_processor::CommandList;
use crate::gpu_context::GpuContext;
use crate::memory::GuestMemory;
use crate::method::MethodCall;
use crate::puller::MethodOutcome;
use crate::syncpoint::InterruptHandler;

/// Operations every execution mode provides.
pub trait GpuShell {
    /// Shared GPU state.
    fn context(&self) -> &Arc<GpuContext>;

    /// Begin GPU emulation (spawns the worker in async mode).
    fn start(&mut self) -> Result<(), GpuError>;

    fn is_async(&self) -> bool;

    /// Dispatch one method. Returns the outcome when the method ran before
    /// returning, `None` when it was deferred to the worker.
    fn call_method(&self, call: MethodCall) -> Option<MethodOutcome>;

    /// Hand any buffered work to the executor without waiting for it.
    fn flush_commands(&self);

    /// Decode and dispatch a list of GPFIFO entries.
    fn push_entries(&self, entries: CommandList);

    fn swap_buffers(&self, framebuffer: Option<FramebufferConfig>);

    fn flush_region(&self, addr: VAddr, size: u64);

    fn invalidate_region(&self, addr: VAddr, size: u64);

    fn flush_and_invalidate_region(&self, addr: VAddr, size: u64);

    /// Block until all submitted work has executed.
    fn wait_idle(&self) -> Result<(), GpuError>;

    fn trigger_cpu_interrupt(&self, syncpoint_id: u32, value: u32) {
        self.context().trigger_cpu_interrupt(syncpoint_id, value);
    }

    /// Block until the syncpoint reaches `value`.
    fn wait_fence(&self, syncpoint_id: u32, value: u32) {
        self.context().wait_fence(syncpoint_id, value);
    }

    /// As [`GpuShell::wait_fence`], giving up after `timeout`.
    fn wait_fence_timeout(&self, syncpoint_id: u32, value: u32, timeout: Duration) -> bool {
        self.context().wait_fence_timeout(syncpoint_id, value, timeout)
    }

    fn increment_sync_point(&self, syncpoint_id: u32) {
        self.context().increment_syncpoint(syncpoint_id);
    }

    fn get_syncpoint_value(&self, syncpoint_id: u32) -> u32 {
        self.context().get_syncpoint_value(syncpoint_id)
    }

    fn register_syncpt_interrupt(&self, syncpoint_id: u32, value: u32) {
        self.context().register_syncpt_interrupt(syncpoint_id, value);
    }

    fn cancel_syncpt_interrupt(&self, syncpoint_id: u32, value: u32) -> bool {
        self.context().cancel_syncpt_interrupt(syncpoint_id, value)
    }
}

/// The GPU front-end in one of its execution modes.
pub enum Gpu {
    Sync(SyncGpu),
    Async(AsyncGpu),
}

impl Gpu {
    /// Build the front-end in the mode selected by `settings`. The mode cannot
    /// change afterwards.
    pub fn new(
        settings: &Settings,
        memory: Arc<dyn GuestMemory>,
        backend: Box<dyn RenderBackend>,
        on_interrupt: InterruptHandler,
    ) -> Self {
        let context = Arc::new(GpuContext::new(settings, memory, backend, on_interrupt));
        log::info!("GPU front-end in {:?} mode", settings.gpu_mode);
        match settings.gpu_mode {
            GpuMode::Sync => Self::Sync(SyncGpu::new(context)),
            GpuMode::Async => Self::Async(AsyncGpu::new(context)),
        }
    }

    fn shell(&self) -> &dyn GpuShell {
        match self {
            Self::Sync(gpu) => gpu,
            Self::Async(gpu) => gpu,
        }
    }

    fn shell_mut(&mut self) -> &mut dyn GpuShell {
        match self {
            Self::Sync(gpu) => gpu,
            Self::Async(gpu) => gpu,
        }
    }
}

impl GpuShell for Gpu {
    fn context(&self) -> &Arc<GpuContext> {
        self.shell().context()
    }

    fn start(&mut self) -> Result<(), GpuError> {
        self.shell_mut().start()
    }

    fn is_async(&self) -> bool {
        self.shell().is_async()
    }

    fn call_method(&self, call: MethodCall) -> Option<MethodOutcome> {
        self.shell().call_method(call)
    }

    fn flush_commands(&self) {
        self.shell().flush_commands()
    }

    fn push_entries(&self, entries: CommandList) {
        self.shell().push_entries(entries)
    }

    fn swap_buffers(&self, framebuffer: Option<FramebufferConfig>) {
        self.shell().swap_buffers(framebuffer)
    }

    fn flush_region(&self, addr: VAddr, size: u64) {
        self.shell().flush_region(addr, size)
    }

    fn invalidate_region(&self, addr: VAddr, size: u64) {
        self.shell().invalidate_region(addr, size)
    }

    fn flush_and_invalidate_region(&self, addr: VAddr, size: u64) {
        self.shell().flush_and_invalidate_region(addr, size)
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        self.shell().wait_idle()
    }

    fn wait_fence(&self, syncpoint_id: u32, value: u32) {
        self.shell().wait_fence(syncpoint_id, value)
    }

    fn wait_fence_timeout(&self, syncpoint_id: u32, value: u32, timeout: Duration) -> bool {
        self.shell().wait_fence_timeout(syncpoint_id, value, timeout)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::backend::null_backend::NullBackend;
    use crate::engines::EngineClass;
    use crate::memory::SparseMemory;
    use parking_lot::Mutex;

    fn gpu(mode: GpuMode) -> Gpu {
        let settings = Settings {
            gpu_mode: mode,
            ..Settings::default()
        };
        Gpu::new(
            &settings,
            Arc::new(SparseMemory::new()),
            Box::new(NullBackend::new()),
            Arc::new(|_: u32, _: u32| {}),
        )
    }

    #[test]
    fn test_mode_selected_from_settings() {
        assert!(matches!(gpu(GpuMode::Sync), Gpu::Sync(_)));
        assert!(matches!(gpu(GpuMode::Async), Gpu::Async(_)));
        assert!(!gpu(GpuMode::Sync).is_async());
        assert!(gpu(GpuMode::Async).is_async());
    }

    #[test]
    fn test_syncpoints_shared_by_both_modes() {
        for mode in [GpuMode::Sync, GpuMode::Async] {
            let mut gpu = gpu(mode);
            gpu.start().unwrap();
            gpu.increment_sync_point(3);
            assert_eq!(gpu.get_syncpoint_value(3), 1);
            gpu.wait_fence(3, 1);
            assert!(!gpu.wait_fence_timeout(3, 2, Duration::from_millis(5)));
            gpu.register_syncpt_interrupt(3, 4);
            assert!(gpu.cancel_syncpt_interrupt(3, 4));
            assert!(!gpu.cancel_syncpt_interrupt(3, 4));
            gpu.wait_idle().unwrap();
        }
    }

    #[test]
    fn test_bind_then_forward_in_both_modes() {
        for mode in [GpuMode::Sync, GpuMode::Async] {
            let mut gpu = gpu(mode);
            let log: EventLog = Arc::new(Mutex::new(Vec::new()));
            gpu.context().register_engine(Box::new(RecordingEngine {
                class: EngineClass::MAXWELL_3D,
                log: log.clone(),
            }));
            gpu.start().unwrap();

            gpu.call_method(MethodCall::new(0, EngineClass::MAXWELL_3D.0, 0, 0));
            for i in 0..8 {
                gpu.call_method(MethodCall::new(0x100 + i, i, 0, 0));
            }
            gpu.wait_idle().unwrap();

            let expected: Vec<Event> = (0..8)
                .map(|i| Event::Method(EngineClass::MAXWELL_3D, 0x100 + i, i))
                .collect();
            assert_eq!(*log.lock(), expected, "mode {:?}", mode);
        }
    }
}
