// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pushbuffer decoding.
//!
//! A command list is a sequence of 64-bit GPFIFO entries, each pointing at a
//! run of pushbuffer words in GPU memory. The low word holds address bits
//! 31:2; the high word holds address bits 39:32 in its low byte and the
//! length in words from bit 10 upwards (bits 62:42 of the full entry).
//!
//! Pushbuffer words are compressed method headers followed by their data:
//! method in bits 12:0, subchannel 15:13, count or immediate 28:16 and the
//! secondary opcode in 31:29. Each data word of a run becomes one
//! [`MethodCall`] carrying the number of words still left in the run, so
//! consumers can tell where an array write ends.

use std::sync::Arc;

use pfifo_common::GpuVAddr;

use crate::memory::GuestMemory;
use crate::method::MethodCall;

/// A 64-bit GPFIFO entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpEntry {
    pub entry0: u32,
    pub entry1: u32,
}

/// Largest pushbuffer a single entry can describe, in words.
pub const MAX_ENTRY_WORDS: u32 = 0x1F_FFFF;

/// Ordered list of GPFIFO entries submitted together.
pub type CommandList = Vec<GpEntry>;

impl GpEntry {
    /// Build an entry for a pushbuffer of `length` words at `address`.
    pub fn new(address: GpuVAddr, length: u32) -> Self {
        Self {
            entry0: (address as u32) & !0x3,
            entry1: ((address >> 32) as u32 & 0xFF) | ((length & MAX_ENTRY_WORDS) << 10),
        }
    }

    /// GPU virtual address of the pushbuffer (byte-aligned).
    pub fn address(&self) -> GpuVAddr {
        let lo = (self.entry0 as u64 >> 2) << 2;
        let hi = (self.entry1 as u64 & 0xFF) << 32;
        hi | lo
    }

    /// Length of the pushbuffer in 32-bit words.
    pub fn length(&self) -> u32 {
        (self.entry1 >> 10) & MAX_ENTRY_WORDS
    }
}

/// Secondary operation type from compressed method header bits [31:29].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecOp {
    Grp0UseTert = 0,
    IncMethod = 1,
    Grp2UseTert = 2,
    NonIncMethod = 3,
    ImmdDataMethod = 4,
    OneInc = 5,
    Reserved6 = 6,
    EndPbSegment = 7,
}

impl SecOp {
    fn from_raw(v: u32) -> Self {
        match v & 0x7 {
            0 => Self::Grp0UseTert,
            1 => Self::IncMethod,
            2 => Self::Grp2UseTert,
            3 => Self::NonIncMethod,
            4 => Self::ImmdDataMethod,
            5 => Self::OneInc,
            6 => Self::Reserved6,
            _ => Self::EndPbSegment,
        }
    }
}

/// A parsed compressed method header.
#[derive(Debug, Clone, Copy)]
pub struct CompressedMethod(u32);

impl CompressedMethod {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Build a raw header word.
    pub fn encode(sec_op: SecOp, subchannel: u32, method: u32, count: u32) -> u32 {
        ((sec_op as u32) << 29)
            | ((count & 0x1FFF) << 16)
            | ((subchannel & 0x7) << 13)
            | (method & 0x1FFF)
    }

    /// Method register address (bits [12:0]).
    pub fn method_address(&self) -> u32 {
        self.0 & 0x1FFF
    }

    /// Subchannel index (bits [15:13]).
    pub fn subchannel(&self) -> u32 {
        (self.0 >> 13) & 0x7
    }

    /// Method count (bits [28:16]), for IncMethod, NonIncMethod and OneInc.
    pub fn method_count(&self) -> u32 {
        (self.0 >> 16) & 0x1FFF
    }

    /// Immediate data (bits [28:16]), for ImmdDataMethod.
    pub fn immd_data(&self) -> u32 {
        (self.0 >> 16) & 0x1FFF
    }

    /// Secondary operation (bits [31:29]).
    pub fn sec_op(&self) -> SecOp {
        SecOp::from_raw(self.0 >> 29)
    }
}

/// Decodes GPFIFO entries into method calls.
pub struct CommandProcessor {
    memory: Arc<dyn GuestMemory>,
}

impl CommandProcessor {
    pub fn new(memory: Arc<dyn GuestMemory>) -> Self {
        Self { memory }
    }

    /// Decode every entry, in order, handing each method call to `sink`.
    pub fn process_entries(&self, entries: &[GpEntry], sink: &mut dyn FnMut(&MethodCall)) {
        for entry in entries {
            let addr = entry.address();
            let len = entry.length() as usize;

            if len == 0 {
                continue;
            }

            let mut buf = vec![0u8; len * 4];
            self.memory.read(addr, &mut buf);

            let words: Vec<u32> = buf
                .chunks_exact(4)
                .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                .collect();

            log::trace!("CommandProcessor: entry 0x{:X} ({} words)", addr, len);
            process_pushbuffer(&words, sink);
        }
    }
}

/// Decode a pushbuffer (sequence of compressed method headers + data words).
pub fn process_pushbuffer(data: &[u32], sink: &mut dyn FnMut(&MethodCall)) {
    let mut pos = 0;

    while pos < data.len() {
        let header = CompressedMethod::new(data[pos]);
        pos += 1;

        let subchannel = header.subchannel();
        let method = header.method_address();
        let count = header.method_count();

        match header.sec_op() {
            SecOp::IncMethod | SecOp::NonIncMethod | SecOp::OneInc => {
                let sec_op = header.sec_op();
                for i in 0..count {
                    if pos >= data.len() {
                        log::warn!(
                            "CommandProcessor: pushbuffer truncated inside {:?} run",
                            sec_op
                        );
                        break;
                    }
                    let target = match sec_op {
                        SecOp::IncMethod => method + i,
                        SecOp::OneInc => method + i.min(1),
                        _ => method,
                    };
                    sink(&MethodCall::new(target, data[pos], subchannel, count - i));
                    pos += 1;
                }
            }
            SecOp::ImmdDataMethod => {
                // Immediate data is embedded in the header.
                sink(&MethodCall::new(method, header.immd_data(), subchannel, 1));
            }
            SecOp::EndPbSegment => {
                break;
            }
            SecOp::Grp0UseTert | SecOp::Grp2UseTert | SecOp::Reserved6 => {
                log::trace!(
                    "CommandProcessor: unhandled SecOp {:?} at pos {}",
                    header.sec_op(),
                    pos - 1
                );
                // Skip the data words.
                pos += count as usize;
            }
        }
    }
}
