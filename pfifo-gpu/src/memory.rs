// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Guest memory as seen through the GPU address space.
//!
//! The front-end only needs two things from memory: pushbuffer reads and
//! semaphore writes. Address translation belongs to the implementor; unmapped
//! accesses are the implementor's problem too, so the trait is infallible.

use std::collections::HashMap;

use parking_lot::RwLock;
use pfifo_common::GpuVAddr;

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_BITS;

/// Guest-memory collaborator.
pub trait GuestMemory: Send + Sync {
    /// Read `dst.len()` bytes starting at `gpu_va`.
    fn read(&self, gpu_va: GpuVAddr, dst: &mut [u8]);

    /// Write `src` starting at `gpu_va`.
    fn write(&self, gpu_va: GpuVAddr, src: &[u8]);

    fn read_u32(&self, gpu_va: GpuVAddr) -> u32 {
        let mut buf = [0u8; 4];
        self.read(gpu_va, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&self, gpu_va: GpuVAddr, value: u32) {
        self.write(gpu_va, &value.to_le_bytes());
    }
}

/// Sparse, page-granular memory. Pages are allocated on first write;
/// reads of untouched pages return zeros.
#[derive(Default)]
pub struct SparseMemory {
    pages: RwLock<HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy little-endian words into memory starting at `gpu_va`.
    pub fn write_words(&self, gpu_va: GpuVAddr, words: &[u32]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(gpu_va, &bytes);
    }

    /// Number of pages backed so far.
    pub fn resident_pages(&self) -> usize {
        self.pages.read().len()
    }
}

/// Split `[gpu_va, gpu_va + len)` into per-page chunks of
/// `(page number, offset in page, offset in buffer, length)`.
fn page_chunks(gpu_va: GpuVAddr, len: usize) -> impl Iterator<Item = (u64, usize, usize, usize)> {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        if offset >= len {
            return None;
        }
        let va = gpu_va + offset as u64;
        let page_off = (va & (PAGE_SIZE - 1)) as usize;
        let chunk_size = std::cmp::min(len - offset, PAGE_SIZE as usize - page_off);
        let chunk = (va >> PAGE_BITS, page_off, offset, chunk_size);
        offset += chunk_size;
        Some(chunk)
    })
}

impl GuestMemory for SparseMemory {
    fn read(&self, gpu_va: GpuVAddr, dst: &mut [u8]) {
        let pages = self.pages.read();
        for (page, page_off, offset, size) in page_chunks(gpu_va, dst.len()) {
            let out = &mut dst[offset..offset + size];
            match pages.get(&page) {
                Some(data) => out.copy_from_slice(&data[page_off..page_off + size]),
                None => out.fill(0),
            }
        }
    }

    fn write(&self, gpu_va: GpuVAddr, src: &[u8]) {
        let mut pages = self.pages.write();
        for (page, page_off, offset, size) in page_chunks(gpu_va, src.len()) {
            let data = pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]));
            data[page_off..page_off + size].copy_from_slice(&src[offset..offset + size]);
        }
        log::trace!("guest_mem: write 0x{:X}..0x{:X}", gpu_va, gpu_va + src.len() as u64);
    }
}
