// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Synchronous shell: every submission executes on the caller's thread and is
//! complete before the call returns.
//!
//! The puller lock is held per call, not per run: callers of `call_method`
//! must submit each repeat run from a single thread.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use pfifo_common::{GpuError, VAddr};

use super::GpuShell;
use crate::backend::FramebufferConfig;
use crate::command_processor::CommandList;
use crate::gpu_context::GpuContext;
use crate::method::MethodCall;
use crate::puller::MethodOutcome;

pub struct SyncGpu {
    context: Arc<GpuContext>,
    started: bool,
}

impl SyncGpu {
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self {
            context,
            started: false,
        }
    }
}

impl GpuShell for SyncGpu {
    fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    fn start(&mut self) -> Result<(), GpuError> {
        if self.started {
            return Err(GpuError::AlreadyStarted);
        }
        self.started = true;
        log::debug!("SyncGpu: started");
        Ok(())
    }

    fn is_async(&self) -> bool {
        false
    }

    fn call_method(&self, call: MethodCall) -> Option<MethodOutcome> {
        Some(self.context.dispatch(&call))
    }

    fn flush_commands(&self) {
        self.context.with_backend(|backend| backend.flush_commands());
    }

    fn push_entries(&self, entries: CommandList) {
        self.context.dispatch_entries(&entries);
    }

    fn swap_buffers(&self, framebuffer: Option<FramebufferConfig>) {
        self.context
            .with_backend(|backend| backend.swap_buffers(framebuffer.as_ref()));
    }

    fn flush_region(&self, addr: VAddr, size: u64) {
        self.context
            .with_backend(|backend| backend.flush_region(addr, size));
    }

    fn invalidate_region(&self, addr: VAddr, size: u64) {
        self.context
            .with_backend(|backend| backend.invalidate_region(addr, size));
    }

    fn flush_and_invalidate_region(&self, addr: VAddr, size: u64) {
        self.context
            .with_backend(|backend| backend.flush_and_invalidate_region(addr, size));
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        // Everything already ran inline; only publish it.
        fence(Ordering::SeqCst);
        Ok(())
    }
}
