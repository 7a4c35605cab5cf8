// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Register-file engine stub.
//!
//! Latches every method write into a flat register array. Stands in for the
//! real 2D/3D/compute/DMA engines when only command routing is exercised.

use super::{Engine, EngineClass, ENGINE_REG_COUNT};
use crate::method::MethodCall;

pub struct RegisterEngine {
    class: EngineClass,
    regs: Box<[u32; ENGINE_REG_COUNT]>,
    calls: u64,
}

impl RegisterEngine {
    pub fn new(class: EngineClass) -> Self {
        Self {
            class,
            regs: Box::new([0u32; ENGINE_REG_COUNT]),
            calls: 0,
        }
    }

    pub fn reg(&self, method: u32) -> u32 {
        self.regs.get(method as usize).copied().unwrap_or(0)
    }

    /// Number of method calls received so far.
    pub fn call_count(&self) -> u64 {
        self.calls
    }
}

impl Engine for RegisterEngine {
    fn class(&self) -> EngineClass {
        self.class
    }

    fn call_method(&mut self, call: &MethodCall) {
        let idx = call.method as usize;
        if idx < ENGINE_REG_COUNT {
            self.regs[idx] = call.argument;
        }
        self.calls += 1;
        log::trace!(
            "{}: reg[0x{:X}] = 0x{:X} (count={})",
            self.class.name(),
            call.method,
            call.argument,
            call.method_count
        );
    }
}
