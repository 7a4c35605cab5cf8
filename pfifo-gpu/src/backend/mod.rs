// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rendering backend abstraction.
//!
//! The front-end forwards presentation and cache-maintenance requests here
//! verbatim. All methods have default no-op implementations so that backends
//! only need to override the operations they support.

pub mod null_backend;

use pfifo_common::VAddr;

/// Pixel format of a presented framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PixelFormat {
    Abgr8 = 1,
    Rgb565 = 4,
    Bgra8 = 5,
}

/// Framebuffer handed to `swap_buffers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferConfig {
    pub address: VAddr,
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixel_format: PixelFormat,
}

/// Trait for rendering backends (presentation + rasterizer caches).
pub trait RenderBackend: Send {
    fn name(&self) -> &str;

    /// Present a frame. `None` re-presents the previous frame.
    fn swap_buffers(&mut self, _framebuffer: Option<&FramebufferConfig>) {}

    /// Write back any cached data for the region to guest memory.
    fn flush_region(&mut self, _addr: VAddr, _size: u64) {}

    /// Drop any cached data for the region.
    fn invalidate_region(&mut self, _addr: VAddr, _size: u64) {}

    fn flush_and_invalidate_region(&mut self, addr: VAddr, size: u64) {
        self.flush_region(addr, size);
        self.invalidate_region(addr, size);
    }

    /// Submit any rendering work recorded so far.
    fn flush_commands(&mut self) {}
}
