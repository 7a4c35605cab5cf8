// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asynchronous shell.
//!
//! Submissions are queued to a dedicated GPU worker thread and the caller
//! continues immediately. Every queued command carries a fence number; the
//! worker publishes the last fence it completed so [`AsyncGpu::wait_idle`] can
//! block until the queue has drained.
//!
//! Individual [`MethodCall`]s are buffered on the submitting side and handed
//! over in one batch by `flush_commands`, or ahead of any other submission so
//! that engines still see calls in program order.
//!
//! Dropping the shell queues `End`, shuts the syncpoints down so a worker
//! stuck in an untimed acquire fails it and drains, then joins the worker.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use pfifo_common::{GpuError, VAddr};

use super::GpuShell;
use crate::backend::FramebufferConfig;
use crate::command_processor::CommandList;
use crate::gpu_context::GpuContext;
use crate::method::MethodCall;
use crate::puller::MethodOutcome;

/// Work item executed by the GPU worker.
#[derive(Debug)]
enum CommandData {
    SubmitList(CommandList),
    CallMethods(Vec<MethodCall>),
    SwapBuffers(Option<FramebufferConfig>),
    FlushRegion(VAddr, u64),
    FlushCommands,
    End,
}

#[derive(Debug)]
struct CommandDataContainer {
    data: CommandData,
    fence: u64,
}

struct Submitter {
    tx: Sender<CommandDataContainer>,
    last_fence: u64,
}

impl Submitter {
    fn push(&mut self, data: CommandData) -> u64 {
        self.last_fence += 1;
        let fence = self.last_fence;
        if self.tx.send(CommandDataContainer { data, fence }).is_err() {
            log::error!("AsyncGpu: worker queue closed, command {} dropped", fence);
        }
        fence
    }
}

#[derive(Default)]
struct WorkerStatus {
    signaled_fence: u64,
    running: bool,
}

/// Progress published by the worker.
#[derive(Default)]
struct SynchState {
    status: Mutex<WorkerStatus>,
    idle: Condvar,
}

impl SynchState {
    fn signal(&self, fence: u64) {
        self.status.lock().signaled_fence = fence;
        self.idle.notify_all();
    }

    fn set_running(&self, running: bool) {
        self.status.lock().running = running;
        self.idle.notify_all();
    }

    /// Block until `fence` has completed. Returns `false` if the worker
    /// stops first.
    fn wait_for(&self, fence: u64) -> bool {
        let mut status = self.status.lock();
        while status.signaled_fence < fence {
            if !status.running {
                return false;
            }
            self.idle.wait(&mut status);
        }
        true
    }

    fn signaled_fence(&self) -> u64 {
        self.status.lock().signaled_fence
    }
}

/// Marks the worker stopped on every exit path, unwinding included.
struct WorkerExit(Arc<SynchState>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

pub struct AsyncGpu {
    context: Arc<GpuContext>,
    /// Lock order: `pending` before `submitter`.
    pending: Mutex<Vec<MethodCall>>,
    submitter: Mutex<Submitter>,
    rx: Option<Receiver<CommandDataContainer>>,
    state: Arc<SynchState>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncGpu {
    pub fn new(context: Arc<GpuContext>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            context,
            pending: Mutex::new(Vec::new()),
            submitter: Mutex::new(Submitter { tx, last_fence: 0 }),
            rx: Some(rx),
            state: Arc::new(SynchState::default()),
            worker: None,
        }
    }

    /// Queue `data` behind any buffered method calls. Returns its fence.
    fn submit(&self, data: CommandData) -> u64 {
        let mut pending = self.pending.lock();
        let mut submitter = self.submitter.lock();
        if !pending.is_empty() {
            submitter.push(CommandData::CallMethods(std::mem::take(&mut *pending)));
        }
        submitter.push(data)
    }

    /// Hand buffered method calls to the worker. Returns the last issued fence.
    fn flush_pending(&self) -> u64 {
        let mut pending = self.pending.lock();
        let mut submitter = self.submitter.lock();
        if !pending.is_empty() {
            submitter.push(CommandData::CallMethods(std::mem::take(&mut *pending)));
        }
        submitter.last_fence
    }

    /// Last fence the worker has completed.
    pub fn completed_fence(&self) -> u64 {
        self.state.signaled_fence()
    }
}

impl GpuShell for AsyncGpu {
    fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    fn start(&mut self) -> Result<(), GpuError> {
        let rx = self.rx.take().ok_or(GpuError::AlreadyStarted)?;
        let context = self.context.clone();
        let state = self.state.clone();

        self.state.set_running(true);
        let spawned = thread::Builder::new()
            .name("GpuThread".into())
            .spawn(move || run_worker(context, rx, state));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.state.set_running(false);
                Err(err.into())
            }
        }
    }

    fn is_async(&self) -> bool {
        true
    }

    fn call_method(&self, call: MethodCall) -> Option<MethodOutcome> {
        self.pending.lock().push(call);
        None
    }

    fn flush_commands(&self) {
        self.submit(CommandData::FlushCommands);
    }

    fn push_entries(&self, entries: CommandList) {
        self.submit(CommandData::SubmitList(entries));
    }

    fn swap_buffers(&self, framebuffer: Option<FramebufferConfig>) {
        self.submit(CommandData::SwapBuffers(framebuffer));
    }

    fn flush_region(&self, addr: VAddr, size: u64) {
        self.submit(CommandData::FlushRegion(addr, size));
    }

    fn invalidate_region(&self, addr: VAddr, size: u64) {
        self.context
            .with_backend(|backend| backend.invalidate_region(addr, size));
    }

    fn flush_and_invalidate_region(&self, addr: VAddr, size: u64) {
        // The flush half is skipped in this mode.
        self.invalidate_region(addr, size);
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        if self.worker.is_none() {
            log::warn!("AsyncGpu: wait_idle before start");
            return Err(GpuError::NotStarted);
        }
        let fence = self.flush_pending();
        if self.state.wait_for(fence) {
            Ok(())
        } else {
            log::error!(
                "AsyncGpu: worker stopped at fence {} of {}",
                self.state.signaled_fence(),
                fence
            );
            Err(GpuError::WorkerStopped)
        }
    }

    fn wait_fence(&self, syncpoint_id: u32, value: u32) {
        self.flush_pending();
        self.context.wait_fence(syncpoint_id, value);
    }

    fn wait_fence_timeout(&self, syncpoint_id: u32, value: u32, timeout: Duration) -> bool {
        self.flush_pending();
        self.context.wait_fence_timeout(syncpoint_id, value, timeout)
    }
}

impl Drop for AsyncGpu {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.submit(CommandData::End);
        // An untimed acquire on the worker would otherwise block the join.
        self.context.syncpoints().shutdown();
        if worker.join().is_err() {
            log::error!("AsyncGpu: worker thread panicked");
        }
    }
}

fn run_worker(
    context: Arc<GpuContext>,
    rx: Receiver<CommandDataContainer>,
    state: Arc<SynchState>,
) {
    let _exit = WorkerExit(state.clone());
    log::debug!("GpuThread: started");

    while let Ok(CommandDataContainer { data, fence }) = rx.recv() {
        log::trace!("GpuThread: fence {} {:?}", fence, data);
        let end = matches!(data, CommandData::End);
        execute(&context, data);
        state.signal(fence);
        if end {
            break;
        }
    }

    log::debug!("GpuThread: stopped");
}

fn execute(context: &GpuContext, data: CommandData) {
    match data {
        CommandData::SubmitList(entries) => context.dispatch_entries(&entries),
        CommandData::CallMethods(calls) => context.with_puller(|puller| {
            for call in &calls {
                if let MethodOutcome::AcquireFailed {
                    syncpoint_id,
                    value,
                } = puller.call_method(call)
                {
                    log::warn!(
                        "GpuThread: acquire failed (syncpoint {}, value {}), continuing",
                        syncpoint_id,
                        value
                    );
                }
            }
        }),
        CommandData::SwapBuffers(framebuffer) => {
            context.with_backend(|backend| backend.swap_buffers(framebuffer.as_ref()))
        }
        CommandData::FlushRegion(addr, size) => {
            context.with_backend(|backend| backend.flush_region(addr, size))
        }
        CommandData::FlushCommands => context.with_backend(|backend| backend.flush_commands()),
        CommandData::End => {}
    }
}
