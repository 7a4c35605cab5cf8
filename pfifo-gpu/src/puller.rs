// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU puller: per-method dispatch.
//!
//! Every decoded method call passes through here exactly once, in pushbuffer
//! order. Methods below [`NON_PULLER_METHODS`] are executed by the puller
//! itself (binding, semaphores); everything else is forwarded unchanged to the
//! engine bound on the call's subchannel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::binding::{EngineBindings, NUM_SUBCHANNELS};
use crate::engines::{Engine, EngineClass};
use crate::memory::GuestMemory;
use crate::method::MethodCall;
use crate::regs::{BufferMethod, PullerRegs, SemaphoreOperation, NON_PULLER_METHODS};
use crate::syncpoint::SyncpointManager;

/// Result of dispatching one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOutcome {
    Completed,
    /// A semaphore acquire gave up before the syncpoint reached `value`.
    AcquireFailed { syncpoint_id: u32, value: u32 },
}

/// GPU timestamp: nanoseconds since `epoch` scaled to the 19.2 MHz GPU clock.
pub fn gpu_ticks(epoch: Instant) -> u64 {
    const NUM: u64 = 384;
    const DEN: u64 = 625;
    let ns = epoch.elapsed().as_nanos() as u64;
    (ns / DEN) * NUM + (ns % DEN) * NUM / DEN
}

/// Method dispatcher owning the puller registers and the binding table.
pub struct Puller {
    regs: PullerRegs,
    bindings: EngineBindings,
    engines: HashMap<EngineClass, Box<dyn Engine>>,
    syncpoints: Arc<SyncpointManager>,
    memory: Arc<dyn GuestMemory>,
    default_acquire_timeout: Option<Duration>,
    epoch: Instant,
    /// Subchannel of a repeat run that has not seen its last call yet.
    open_run: Option<u32>,
}

impl Puller {
    pub fn new(syncpoints: Arc<SyncpointManager>, memory: Arc<dyn GuestMemory>) -> Self {
        Self {
            regs: PullerRegs::new(),
            bindings: EngineBindings::new(),
            engines: HashMap::new(),
            syncpoints,
            memory,
            default_acquire_timeout: None,
            epoch: Instant::now(),
            open_run: None,
        }
    }

    /// Timeout used when the guest leaves `acquire_timeout` at 0.
    pub fn set_default_acquire_timeout(&mut self, timeout: Option<Duration>) {
        self.default_acquire_timeout = timeout;
    }

    /// Reference point for semaphore timestamps.
    pub fn set_epoch(&mut self, epoch: Instant) {
        self.epoch = epoch;
    }

    /// Make an engine available for binding. Replaces any engine of the same class.
    pub fn register_engine(&mut self, engine: Box<dyn Engine>) {
        let class = engine.class();
        log::debug!("Puller: registered engine {}", class);
        self.engines.insert(class, engine);
    }

    pub fn regs(&self) -> &PullerRegs {
        &self.regs
    }

    /// Raw register access for collaborators that poke registers by offset.
    pub fn regs_mut(&mut self) -> &mut PullerRegs {
        &mut self.regs
    }

    pub fn bindings(&self) -> &EngineBindings {
        &self.bindings
    }

    /// Dispatch one method call.
    pub fn call_method(&mut self, call: &MethodCall) -> MethodOutcome {
        log::trace!(
            "Processing method {:08X} on subchannel {}",
            call.method,
            call.subchannel
        );
        assert!(
            (call.subchannel as usize) < NUM_SUBCHANNELS,
            "subchannel {} out of range",
            call.subchannel
        );
        self.track_run(call);

        if call.method >= NON_PULLER_METHODS {
            self.call_engine_method(call);
            MethodOutcome::Completed
        } else {
            self.call_puller_method(call)
        }
    }

    fn track_run(&mut self, call: &MethodCall) {
        if let Some(open) = self.open_run {
            if open != call.subchannel {
                log::warn!(
                    "Puller: subchannel {} interleaved into unfinished run on subchannel {}",
                    call.subchannel,
                    open
                );
            }
        }
        self.open_run = if call.is_last_call() {
            None
        } else {
            Some(call.subchannel)
        };
    }

    fn call_engine_method(&mut self, call: &MethodCall) {
        let class = match self.bindings.get(call.subchannel) {
            Some(class) => class,
            None => panic!(
                "method 0x{:X} sent to unbound subchannel {}",
                call.method, call.subchannel
            ),
        };
        match self.engines.get_mut(&class) {
            Some(engine) => engine.call_method(call),
            None => log::error!(
                "Puller: no engine for {} on subchannel {} (method=0x{:X})",
                class,
                call.subchannel,
                call.method
            ),
        }
    }

    fn call_puller_method(&mut self, call: &MethodCall) -> MethodOutcome {
        self.regs.write(call.method as usize, call.argument);

        let Some(method) = BufferMethod::from_raw(call.method) else {
            log::error!(
                "Special puller engine method 0x{:X} not implemented",
                call.method
            );
            return MethodOutcome::Completed;
        };

        match method {
            BufferMethod::BindObject => {
                self.process_bind_method(call);
                MethodOutcome::Completed
            }
            BufferMethod::SemaphoreTrigger => self.process_semaphore_trigger(),
            BufferMethod::SemaphoreAcquire => self.process_semaphore_acquire(),
            BufferMethod::SemaphoreRelease => {
                self.process_semaphore_release();
                MethodOutcome::Completed
            }
            BufferMethod::NotifyIntr | BufferMethod::Unk28 | BufferMethod::Yield => {
                log::error!("Special puller engine method {:?} not implemented", method);
                MethodOutcome::Completed
            }
            BufferMethod::Nop
            | BufferMethod::SemaphoreAddressHigh
            | BufferMethod::SemaphoreAddressLow
            | BufferMethod::SemaphoreSequence
            | BufferMethod::WrcacheFlush
            | BufferMethod::UnkCacheFlush
            | BufferMethod::RefCnt
            | BufferMethod::FenceValue
            | BufferMethod::FenceAction
            | BufferMethod::Unk78
            | BufferMethod::Unk7c => MethodOutcome::Completed,
        }
    }

    fn process_bind_method(&mut self, call: &MethodCall) {
        let class = EngineClass(call.argument);
        log::debug!("Binding subchannel {} to engine {}", call.subchannel, class);
        self.bindings.bind(call.subchannel, class);
    }

    fn process_semaphore_trigger(&mut self) -> MethodOutcome {
        let action = self.regs.fence_action();
        let id = action.id();
        let sequence = self.regs.semaphore_sequence();

        let Some(op) = SemaphoreOperation::from_raw(action.operation()) else {
            log::error!("Invalid semaphore operation {}", action.operation());
            return MethodOutcome::Completed;
        };

        let current = self.syncpoints.get_value(id);
        match op {
            SemaphoreOperation::Release => {
                // Layout written to guest memory: sequence, zero, 64-bit timestamp.
                let mut block = [0u8; 16];
                block[0..4].copy_from_slice(&sequence.to_le_bytes());
                block[8..16].copy_from_slice(&gpu_ticks(self.epoch).to_le_bytes());
                self.memory.write(self.regs.semaphore_address(), &block);
                self.syncpoints.increment(id);
                MethodOutcome::Completed
            }
            SemaphoreOperation::AcquireEqual if current == sequence => MethodOutcome::Completed,
            SemaphoreOperation::AcquireGequal if current >= sequence => MethodOutcome::Completed,
            SemaphoreOperation::AcquireMask if current & sequence != 0 => {
                MethodOutcome::Completed
            }
            SemaphoreOperation::AcquireMask => {
                self.regs.arm_acquire(sequence, 0, 1);
                log::error!("Semaphore operation AcquireMask cannot block, acquire failed");
                MethodOutcome::AcquireFailed {
                    syncpoint_id: id,
                    value: sequence,
                }
            }
            SemaphoreOperation::AcquireEqual if current > sequence => {
                // Already stepped past the value; it will never be equal again.
                self.regs.arm_acquire(sequence, 0, 1);
                log::warn!(
                    "Puller: AcquireEqual on syncpoint {} for {} but counter is {}",
                    id,
                    sequence,
                    current
                );
                MethodOutcome::AcquireFailed {
                    syncpoint_id: id,
                    value: sequence,
                }
            }
            SemaphoreOperation::AcquireEqual | SemaphoreOperation::AcquireGequal => {
                let mode = (op == SemaphoreOperation::AcquireGequal) as u32;
                self.regs.arm_acquire(sequence, mode, 1);
                // Counter is below `sequence` and steps by one, so the first
                // value at or above it is `sequence` itself.
                self.block_on_acquire(id, sequence)
            }
        }
    }

    fn process_semaphore_release(&mut self) {
        let id = self.regs.fence_action().id();
        let address = self.regs.semaphore_address();
        let sequence = self.regs.semaphore_sequence();
        self.memory.write_u32(address, sequence);
        self.syncpoints.increment(id);
    }

    fn process_semaphore_acquire(&mut self) -> MethodOutcome {
        let id = self.regs.fence_action().id();
        let value = self.regs.semaphore_acquire();
        if self.syncpoints.get_value(id) >= value {
            return MethodOutcome::Completed;
        }
        self.regs.arm_acquire(value, 0, 0);
        self.block_on_acquire(id, value)
    }

    fn acquire_timeout(&self) -> Option<Duration> {
        match self.regs.acquire_timeout() {
            0 => self.default_acquire_timeout,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }

    fn block_on_acquire(&mut self, id: u32, value: u32) -> MethodOutcome {
        let reached = match self.acquire_timeout() {
            Some(timeout) => self.syncpoints.wait_timeout(id, value, timeout),
            None => self.syncpoints.wait(id, value),
        };

        if reached {
            self.regs.clear_acquire();
            MethodOutcome::Completed
        } else {
            log::warn!("Puller: acquire on syncpoint {} for {} timed out", id, value);
            MethodOutcome::AcquireFailed {
                syncpoint_id: id,
                value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SparseMemory;
    use crate::regs::{reg, FenceAction};
    use parking_lot::Mutex;
    use std::thread;

    type CallLog = Arc<Mutex<Vec<(EngineClass, MethodCall)>>>;

    /// Test engine that records every call it receives into a shared log.
    struct RecordingEngine {
        class: EngineClass,
        log: CallLog,
    }

    impl Engine for RecordingEngine {
        fn class(&self) -> EngineClass {
            self.class
        }
        fn call_method(&mut self, call: &MethodCall) {
            self.log.lock().push((self.class, *call));
        }
    }

    struct Fixture {
        puller: Puller,
        syncpoints: Arc<SyncpointManager>,
        memory: Arc<SparseMemory>,
        log: CallLog,
    }

    fn fixture() -> Fixture {
        let syncpoints = Arc::new(SyncpointManager::new());
        let memory = Arc::new(SparseMemory::new());
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut puller = Puller::new(syncpoints.clone(), memory.clone());
        for class in EngineClass::KNOWN {
            puller.register_engine(Box::new(RecordingEngine {
                class,
                log: log.clone(),
            }));
        }
        Fixture {
            puller,
            syncpoints,
            memory,
            log,
        }
    }

    fn bind(puller: &mut Puller, subchannel: u32, class: EngineClass) {
        puller.call_method(&MethodCall::new(
            BufferMethod::BindObject as u32,
            class.0,
            subchannel,
            0,
        ));
    }

    fn puller_write(puller: &mut Puller, method: BufferMethod, value: u32) -> MethodOutcome {
        puller.call_method(&MethodCall::single(method as u32, value))
    }

    fn set_semaphore(puller: &mut Puller, address: u64, sequence: u32) {
        puller_write(puller, BufferMethod::SemaphoreAddressHigh, (address >> 32) as u32);
        puller_write(puller, BufferMethod::SemaphoreAddressLow, address as u32);
        puller_write(puller, BufferMethod::SemaphoreSequence, sequence);
    }

    #[test]
    fn test_bind_routes_to_engine() {
        let mut f = fixture();
        bind(&mut f.puller, 2, EngineClass::MAXWELL_DMA);
        assert_eq!(f.puller.bindings().get(2), Some(EngineClass::MAXWELL_DMA));

        let call = MethodCall::new(0x100, 0x42, 2, 0);
        assert_eq!(f.puller.call_method(&call), MethodOutcome::Completed);

        let log = f.log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (EngineClass::MAXWELL_DMA, call));
    }

    #[test]
    fn test_forwarding_preserves_order_across_rebinds() {
        let mut f = fixture();
        bind(&mut f.puller, 0, EngineClass::MAXWELL_3D);
        bind(&mut f.puller, 1, EngineClass::KEPLER_COMPUTE);

        for i in 0..4u32 {
            f.puller.call_method(&MethodCall::new(0x200 + i, i, 0, 0));
            if i == 1 {
                bind(&mut f.puller, 1, EngineClass::FERMI_2D);
            }
        }

        let log = f.log.lock();
        assert_eq!(log.len(), 4);
        for (i, (class, call)) in log.iter().enumerate() {
            assert_eq!(*class, EngineClass::MAXWELL_3D);
            assert_eq!(call.method, 0x200 + i as u32);
            assert_eq!(call.argument, i as u32);
        }
    }

    #[test]
    fn test_repeat_run_forwarded_unchanged() {
        let mut f = fixture();
        bind(&mut f.puller, 5, EngineClass::INLINE_TO_MEMORY);
        for count in (1..=3).rev() {
            f.puller.call_method(&MethodCall::new(0x6C, 0x10 + count, 5, count));
        }
        let log = f.log.lock();
        let counts: Vec<u32> = log.iter().map(|(_, c)| c.method_count).collect();
        assert_eq!(counts, vec![3, 2, 1]);
        assert!(log[2].1.is_last_call());
    }

    #[test]
    #[should_panic(expected = "unbound subchannel 3")]
    fn test_unbound_subchannel_panics() {
        let mut f = fixture();
        f.puller.call_method(&MethodCall::new(0x40, 0, 3, 0));
    }

    #[test]
    fn test_bound_class_without_engine_is_dropped() {
        let mut f = fixture();
        bind(&mut f.puller, 0, EngineClass(0x1234));
        f.puller.call_method(&MethodCall::new(0x80, 1, 0, 0));
        assert!(f.log.lock().is_empty());
    }

    #[test]
    fn test_puller_methods_store_registers() {
        let mut f = fixture();
        puller_write(&mut f.puller, BufferMethod::RefCnt, 77);
        puller_write(&mut f.puller, BufferMethod::FenceValue, 5);
        assert_eq!(f.puller.regs().read(reg::REFERENCE_COUNT), 77);
        assert_eq!(f.puller.regs().read(reg::FENCE_VALUE), 5);
        // Unnamed puller slot still latches.
        f.puller.call_method(&MethodCall::single(0x30, 9));
        assert_eq!(f.puller.regs().read(0x30), 9);
        assert!(f.log.lock().is_empty());
    }

    #[test]
    fn test_semaphore_release() {
        let mut f = fixture();
        set_semaphore(&mut f.puller, 0x1_0000_2000, 0xABCD);
        puller_write(&mut f.puller, BufferMethod::FenceAction, FenceAction::new(0, 9).0);
        puller_write(&mut f.puller, BufferMethod::SemaphoreRelease, 0);

        assert_eq!(f.memory.read_u32(0x1_0000_2000), 0xABCD);
        assert_eq!(f.syncpoints.get_value(9), 1);
    }

    #[test]
    fn test_trigger_release_writes_block() {
        let mut f = fixture();
        set_semaphore(&mut f.puller, 0x4000, 7);
        let action = FenceAction::new(SemaphoreOperation::Release as u32, 11);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);
        f.memory.write_u32(0x4004, 0xFFFF_FFFF);

        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(outcome, MethodOutcome::Completed);
        assert_eq!(f.memory.read_u32(0x4000), 7);
        assert_eq!(f.memory.read_u32(0x4004), 0);
        assert_eq!(f.syncpoints.get_value(11), 1);
    }

    #[test]
    fn test_trigger_acquire_already_satisfied() {
        let mut f = fixture();
        f.syncpoints.increment(4);
        f.syncpoints.increment(4);
        set_semaphore(&mut f.puller, 0, 2);
        let action = FenceAction::new(SemaphoreOperation::AcquireGequal as u32, 4);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);

        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(outcome, MethodOutcome::Completed);
        assert_eq!(f.puller.regs().read(reg::ACQUIRE_ACTIVE), 0);
        assert_eq!(f.syncpoints.get_value(4), 2);
    }

    #[test]
    fn test_trigger_acquire_times_out() {
        let mut f = fixture();
        f.puller.regs_mut().write(reg::ACQUIRE_TIMEOUT, 20);
        set_semaphore(&mut f.puller, 0, 3);
        let action = FenceAction::new(SemaphoreOperation::AcquireEqual as u32, 6);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);

        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(
            outcome,
            MethodOutcome::AcquireFailed {
                syncpoint_id: 6,
                value: 3
            }
        );
        let fields = f.puller.regs().fields();
        assert_eq!(fields.acquire_active, 1);
        assert_eq!(fields.acquire_value, 3);
        assert_eq!(fields.acquire_source, 1);
        assert_eq!(fields.acquire_mode, 0);
        assert_eq!(f.syncpoints.get_value(6), 0);
    }

    #[test]
    fn test_trigger_acquire_equal_counter_past_sequence() {
        let mut f = fixture();
        for _ in 0..5 {
            f.syncpoints.increment(6);
        }
        f.puller.regs_mut().write(reg::ACQUIRE_TIMEOUT, 20);
        set_semaphore(&mut f.puller, 0, 3);
        let action = FenceAction::new(SemaphoreOperation::AcquireEqual as u32, 6);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);

        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(
            outcome,
            MethodOutcome::AcquireFailed {
                syncpoint_id: 6,
                value: 3
            }
        );
        let fields = f.puller.regs().fields();
        assert_eq!(fields.acquire_active, 1);
        assert_eq!(fields.acquire_value, 3);
        assert_eq!(f.syncpoints.get_value(6), 5);

        // Gequal with the same state is satisfied.
        let action = FenceAction::new(SemaphoreOperation::AcquireGequal as u32, 6);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);
        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(outcome, MethodOutcome::Completed);
    }

    #[test]
    fn test_trigger_acquire_mask() {
        let mut f = fixture();
        f.syncpoints.increment(1);
        set_semaphore(&mut f.puller, 0, 0b11);
        let action = FenceAction::new(SemaphoreOperation::AcquireMask as u32, 1);
        puller_write(&mut f.puller, BufferMethod::FenceAction, action.0);
        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert_eq!(outcome, MethodOutcome::Completed);

        puller_write(&mut f.puller, BufferMethod::SemaphoreSequence, 0b10);
        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreTrigger, 0);
        assert!(matches!(outcome, MethodOutcome::AcquireFailed { .. }));
    }

    #[test]
    fn test_semaphore_acquire_blocks_until_increment() {
        let mut f = fixture();
        puller_write(&mut f.puller, BufferMethod::FenceAction, FenceAction::new(0, 3).0);

        let syncpoints = f.syncpoints.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            syncpoints.increment(3);
            syncpoints.increment(3);
        });

        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreAcquire, 2);
        assert_eq!(outcome, MethodOutcome::Completed);
        assert!(f.syncpoints.get_value(3) >= 2);
        assert_eq!(f.puller.regs().read(reg::ACQUIRE_ACTIVE), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_semaphore_acquire_default_timeout() {
        let mut f = fixture();
        f.puller
            .set_default_acquire_timeout(Some(Duration::from_millis(10)));
        puller_write(&mut f.puller, BufferMethod::FenceAction, FenceAction::new(0, 2).0);
        let outcome = puller_write(&mut f.puller, BufferMethod::SemaphoreAcquire, 1);
        assert_eq!(
            outcome,
            MethodOutcome::AcquireFailed {
                syncpoint_id: 2,
                value: 1
            }
        );
        let fields = f.puller.regs().fields();
        assert_eq!(fields.acquire_active, 1);
        assert_eq!(fields.acquire_source, 0);
        assert_eq!(f.syncpoints.get_value(2), 0);
    }

    #[test]
    fn test_gpu_ticks_monotonic() {
        let epoch = Instant::now();
        let a = gpu_ticks(epoch);
        thread::sleep(Duration::from_millis(2));
        let b = gpu_ticks(epoch);
        assert!(b > a);
    }
}
