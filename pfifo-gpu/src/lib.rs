// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU command front-end.
//!
//! Decodes GPFIFO command lists into method calls, runs puller methods
//! (binding, semaphores, syncpoint fences) and forwards everything else to the
//! engine bound on the call's subchannel. Work runs either inline or on a GPU
//! worker thread, depending on the selected [`Gpu`] shell.

pub mod backend;
pub mod binding;
pub mod command_processor;
pub mod engines;
pub mod gpu_context;
pub mod memory;
pub mod method;
pub mod puller;
pub mod regs;
pub mod shell;
pub mod syncpoint;

pub use command_processor::{CommandList, GpEntry};
pub use gpu_context::GpuContext;
pub use method::MethodCall;
pub use puller::MethodOutcome;
pub use shell::{AsyncGpu, Gpu, GpuShell, SyncGpu};
pub use syncpoint::SyncpointManager;
