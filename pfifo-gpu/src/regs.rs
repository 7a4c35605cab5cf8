// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Puller register file.
//!
//! The puller owns a small register image shared with the pushbuffer: method
//! writes with an index below [`NON_PULLER_METHODS`] land here instead of in
//! an engine. The word index of every named register is a hardware contract,
//! pinned below by compile-time offset assertions on [`PullerRegFields`].
//!
//! ## Layout (word index)
//!
//! | Index       | Register                  |
//! |-------------|---------------------------|
//! | 0x04        | Semaphore address high    |
//! | 0x05        | Semaphore address low     |
//! | 0x06        | Semaphore sequence        |
//! | 0x07        | Semaphore trigger         |
//! | 0x14        | Reference count           |
//! | 0x1A        | Semaphore acquire         |
//! | 0x1B        | Semaphore release         |
//! | 0x1C        | Fence value               |
//! | 0x1D        | Fence action (op 7:4, id 15:8) |
//! | 0x100-0x104 | Acquire mode/source/active/timeout/value |

use pfifo_common::GpuVAddr;

/// Method-addressable register window.
pub const NUM_REGS: usize = 0x100;

/// Full register image: the method window plus the acquire-state block at 0x100.
pub const REG_IMAGE_WORDS: usize = NUM_REGS + 5;

/// First method index that is forwarded to a bound engine.
pub const NON_PULLER_METHODS: u32 = 0x40;

const _: () = assert!(NON_PULLER_METHODS as usize <= NUM_REGS);

/// Word indices of the named puller registers.
pub mod reg {
    pub const SEMAPHORE_ADDRESS_HIGH: usize = 0x4;
    pub const SEMAPHORE_ADDRESS_LOW: usize = 0x5;
    pub const SEMAPHORE_SEQUENCE: usize = 0x6;
    pub const SEMAPHORE_TRIGGER: usize = 0x7;
    pub const REFERENCE_COUNT: usize = 0x14;
    pub const SEMAPHORE_ACQUIRE: usize = 0x1A;
    pub const SEMAPHORE_RELEASE: usize = 0x1B;
    pub const FENCE_VALUE: usize = 0x1C;
    pub const FENCE_ACTION: usize = 0x1D;
    pub const ACQUIRE_MODE: usize = 0x100;
    pub const ACQUIRE_SOURCE: usize = 0x101;
    pub const ACQUIRE_ACTIVE: usize = 0x102;
    pub const ACQUIRE_TIMEOUT: usize = 0x103;
    pub const ACQUIRE_VALUE: usize = 0x104;
}

/// Puller methods (method index < [`NON_PULLER_METHODS`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferMethod {
    BindObject = 0x0,
    Nop = 0x2,
    SemaphoreAddressHigh = 0x4,
    SemaphoreAddressLow = 0x5,
    SemaphoreSequence = 0x6,
    SemaphoreTrigger = 0x7,
    NotifyIntr = 0x8,
    WrcacheFlush = 0x9,
    Unk28 = 0xA,
    UnkCacheFlush = 0xB,
    RefCnt = 0x14,
    SemaphoreAcquire = 0x1A,
    SemaphoreRelease = 0x1B,
    FenceValue = 0x1C,
    FenceAction = 0x1D,
    Unk78 = 0x1E,
    Unk7c = 0x1F,
    Yield = 0x20,
}

impl BufferMethod {
    pub fn from_raw(v: u32) -> Option<Self> {
        match v {
            0x0 => Some(Self::BindObject),
            0x2 => Some(Self::Nop),
            0x4 => Some(Self::SemaphoreAddressHigh),
            0x5 => Some(Self::SemaphoreAddressLow),
            0x6 => Some(Self::SemaphoreSequence),
            0x7 => Some(Self::SemaphoreTrigger),
            0x8 => Some(Self::NotifyIntr),
            0x9 => Some(Self::WrcacheFlush),
            0xA => Some(Self::Unk28),
            0xB => Some(Self::UnkCacheFlush),
            0x14 => Some(Self::RefCnt),
            0x1A => Some(Self::SemaphoreAcquire),
            0x1B => Some(Self::SemaphoreRelease),
            0x1C => Some(Self::FenceValue),
            0x1D => Some(Self::FenceAction),
            0x1E => Some(Self::Unk78),
            0x1F => Some(Self::Unk7c),
            0x20 => Some(Self::Yield),
            _ => None,
        }
    }
}

/// Semaphore operation selected by the fence-action operation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SemaphoreOperation {
    AcquireEqual = 0x1,
    Release = 0x2,
    AcquireGequal = 0x4,
    AcquireMask = 0x8,
}

impl SemaphoreOperation {
    pub fn from_raw(v: u32) -> Option<Self> {
        match v {
            0x1 => Some(Self::AcquireEqual),
            0x2 => Some(Self::Release),
            0x4 => Some(Self::AcquireGequal),
            0x8 => Some(Self::AcquireMask),
            _ => None,
        }
    }
}

/// Fence action register: operation in bits [7:4], syncpoint id in bits [15:8].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct FenceAction(pub u32);

impl FenceAction {
    pub fn new(operation: u32, id: u32) -> Self {
        Self(((operation & 0xF) << 4) | ((id & 0xFF) << 8))
    }

    pub fn operation(self) -> u32 {
        (self.0 >> 4) & 0xF
    }

    pub fn id(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }
}

/// Field view of the register image, one `u32` per word.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullerRegFields {
    _pad0: [u32; 0x4],
    pub semaphore_address_high: u32,
    pub semaphore_address_low: u32,
    pub semaphore_sequence: u32,
    pub semaphore_trigger: u32,
    _pad1: [u32; 0xC],
    pub reference_count: u32,
    _pad2: [u32; 0x5],
    pub semaphore_acquire: u32,
    pub semaphore_release: u32,
    pub fence_value: u32,
    pub fence_action: FenceAction,
    _pad3: [u32; 0xE2],
    pub acquire_mode: u32,
    pub acquire_source: u32,
    pub acquire_active: u32,
    pub acquire_timeout: u32,
    pub acquire_value: u32,
}

macro_rules! assert_reg_position {
    ($field:ident, $index:expr, $position:expr) => {
        const _: () = assert!(
            std::mem::offset_of!(PullerRegFields, $field) == $position * 4,
            concat!("Field ", stringify!($field), " has invalid position")
        );
        const _: () = assert!($index == $position);
    };
}

assert_reg_position!(semaphore_address_high, reg::SEMAPHORE_ADDRESS_HIGH, 0x4);
assert_reg_position!(semaphore_address_low, reg::SEMAPHORE_ADDRESS_LOW, 0x5);
assert_reg_position!(semaphore_sequence, reg::SEMAPHORE_SEQUENCE, 0x6);
assert_reg_position!(semaphore_trigger, reg::SEMAPHORE_TRIGGER, 0x7);
assert_reg_position!(reference_count, reg::REFERENCE_COUNT, 0x14);
assert_reg_position!(semaphore_acquire, reg::SEMAPHORE_ACQUIRE, 0x1A);
assert_reg_position!(semaphore_release, reg::SEMAPHORE_RELEASE, 0x1B);
assert_reg_position!(fence_value, reg::FENCE_VALUE, 0x1C);
assert_reg_position!(fence_action, reg::FENCE_ACTION, 0x1D);
assert_reg_position!(acquire_mode, reg::ACQUIRE_MODE, 0x100);
assert_reg_position!(acquire_source, reg::ACQUIRE_SOURCE, 0x101);
assert_reg_position!(acquire_active, reg::ACQUIRE_ACTIVE, 0x102);
assert_reg_position!(acquire_timeout, reg::ACQUIRE_TIMEOUT, 0x103);
assert_reg_position!(acquire_value, reg::ACQUIRE_VALUE, 0x104);

const _: () = assert!(std::mem::size_of::<PullerRegFields>() == REG_IMAGE_WORDS * 4);

/// Register image addressed by absolute word index.
pub struct PullerRegs {
    words: Box<[u32; REG_IMAGE_WORDS]>,
}

impl PullerRegs {
    pub fn new() -> Self {
        Self {
            words: Box::new([0u32; REG_IMAGE_WORDS]),
        }
    }

    /// Read a word. Panics if `index` is outside the register image.
    pub fn read(&self, index: usize) -> u32 {
        assert!(
            index < REG_IMAGE_WORDS,
            "puller register index 0x{:X} out of range",
            index
        );
        self.words[index]
    }

    /// Write a word. Panics if `index` is outside the register image.
    pub fn write(&mut self, index: usize, value: u32) {
        assert!(
            index < REG_IMAGE_WORDS,
            "puller register index 0x{:X} out of range",
            index
        );
        self.words[index] = value;
    }

    /// Semaphore address: the high word shifted into bits 63:32, unmasked,
    /// over the low word.
    pub fn semaphore_address(&self) -> GpuVAddr {
        let high = self.words[reg::SEMAPHORE_ADDRESS_HIGH] as u64;
        let low = self.words[reg::SEMAPHORE_ADDRESS_LOW] as u64;
        (high << 32) | low
    }

    pub fn semaphore_sequence(&self) -> u32 {
        self.words[reg::SEMAPHORE_SEQUENCE]
    }

    pub fn semaphore_acquire(&self) -> u32 {
        self.words[reg::SEMAPHORE_ACQUIRE]
    }

    pub fn fence_action(&self) -> FenceAction {
        FenceAction(self.words[reg::FENCE_ACTION])
    }

    pub fn acquire_timeout(&self) -> u32 {
        self.words[reg::ACQUIRE_TIMEOUT]
    }

    /// Arm the acquire-state block before a blocking acquire.
    pub fn arm_acquire(&mut self, value: u32, mode: u32, source: u32) {
        self.words[reg::ACQUIRE_ACTIVE] = 1;
        self.words[reg::ACQUIRE_VALUE] = value;
        self.words[reg::ACQUIRE_MODE] = mode;
        self.words[reg::ACQUIRE_SOURCE] = source;
    }

    pub fn clear_acquire(&mut self) {
        self.words[reg::ACQUIRE_ACTIVE] = 0;
    }

    /// Decode the image into its named fields.
    pub fn fields(&self) -> PullerRegFields {
        let w = &self.words;
        PullerRegFields {
            _pad0: std::array::from_fn(|i| w[i]),
            semaphore_address_high: w[reg::SEMAPHORE_ADDRESS_HIGH],
            semaphore_address_low: w[reg::SEMAPHORE_ADDRESS_LOW],
            semaphore_sequence: w[reg::SEMAPHORE_SEQUENCE],
            semaphore_trigger: w[reg::SEMAPHORE_TRIGGER],
            _pad1: std::array::from_fn(|i| w[0x8 + i]),
            reference_count: w[reg::REFERENCE_COUNT],
            _pad2: std::array::from_fn(|i| w[0x15 + i]),
            semaphore_acquire: w[reg::SEMAPHORE_ACQUIRE],
            semaphore_release: w[reg::SEMAPHORE_RELEASE],
            fence_value: w[reg::FENCE_VALUE],
            fence_action: FenceAction(w[reg::FENCE_ACTION]),
            _pad3: std::array::from_fn(|i| w[0x1E + i]),
            acquire_mode: w[reg::ACQUIRE_MODE],
            acquire_source: w[reg::ACQUIRE_SOURCE],
            acquire_active: w[reg::ACQUIRE_ACTIVE],
            acquire_timeout: w[reg::ACQUIRE_TIMEOUT],
            acquire_value: w[reg::ACQUIRE_VALUE],
        }
    }
}

impl Default for PullerRegs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_action_fields() {
        let action = FenceAction(0x0000_0725);
        assert_eq!(action.operation(), 0x2);
        assert_eq!(action.id(), 0x07);

        let built = FenceAction::new(SemaphoreOperation::AcquireGequal as u32, 12);
        assert_eq!(built.0, 0x0C40);
        assert_eq!(built.id(), 12);
    }

    #[test]
    fn test_semaphore_address() {
        let mut regs = PullerRegs::new();
        regs.write(reg::SEMAPHORE_ADDRESS_HIGH, 0x12);
        regs.write(reg::SEMAPHORE_ADDRESS_LOW, 0x3456_7000);
        assert_eq!(regs.semaphore_address(), 0x12_3456_7000);

        // The high word is not truncated to 8 bits.
        regs.write(reg::SEMAPHORE_ADDRESS_HIGH, 0x1_0012);
        assert_eq!(regs.semaphore_address(), 0x1_0012_3456_7000);
    }

    #[test]
    fn test_acquire_block_sits_above_method_window() {
        assert_eq!(reg::ACQUIRE_MODE, NUM_REGS);
        assert_eq!(reg::ACQUIRE_VALUE, REG_IMAGE_WORDS - 1);
        let mut regs = PullerRegs::new();
        regs.write(NUM_REGS - 1, 1);
        regs.write(reg::ACQUIRE_VALUE, 2);
        assert_eq!(regs.fields().acquire_value, 2);
    }

    #[test]
    fn test_fields_match_words() {
        let mut regs = PullerRegs::new();
        regs.write(reg::SEMAPHORE_SEQUENCE, 9);
        regs.write(reg::REFERENCE_COUNT, 3);
        regs.write(reg::FENCE_ACTION, FenceAction::new(1, 5).0);
        regs.write(0x9, 0xAA);
        regs.arm_acquire(9, 1, 1);

        let f = regs.fields();
        assert_eq!(f.semaphore_sequence, 9);
        assert_eq!(f.reference_count, 3);
        assert_eq!(f.fence_action.id(), 5);
        assert_eq!(f._pad1[1], 0xAA);
        assert_eq!(f.acquire_active, 1);
        assert_eq!(f.acquire_value, 9);
        assert_eq!(f.acquire_mode, 1);
        assert_eq!(f.acquire_source, 1);

        regs.clear_acquire();
        assert_eq!(regs.read(reg::ACQUIRE_ACTIVE), 0);
    }

    #[test]
    fn test_byte_offsets() {
        assert_eq!(std::mem::offset_of!(PullerRegFields, semaphore_trigger), 0x1C);
        assert_eq!(std::mem::offset_of!(PullerRegFields, fence_action), 0x74);
        assert_eq!(std::mem::offset_of!(PullerRegFields, acquire_value), 0x410);
    }

    #[test]
    fn test_buffer_method_from_raw() {
        assert_eq!(BufferMethod::from_raw(0x0), Some(BufferMethod::BindObject));
        assert_eq!(BufferMethod::from_raw(0x1B), Some(BufferMethod::SemaphoreRelease));
        assert_eq!(BufferMethod::from_raw(0x3), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_read_out_of_range() {
        let regs = PullerRegs::new();
        regs.read(REG_IMAGE_WORDS);
    }
}
