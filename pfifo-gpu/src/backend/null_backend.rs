// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Null rendering backend: presentation and cache requests are only logged.

use pfifo_common::VAddr;

use super::{FramebufferConfig, RenderBackend};

#[derive(Default)]
pub struct NullBackend {
    frames: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

impl RenderBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn swap_buffers(&mut self, framebuffer: Option<&FramebufferConfig>) {
        self.frames += 1;
        if let Some(fb) = framebuffer {
            log::trace!(
                "NullBackend: present {}x{} at 0x{:X} ({:?})",
                fb.width,
                fb.height,
                fb.address + fb.offset as u64,
                fb.pixel_format
            );
        }
    }

    fn flush_region(&mut self, addr: VAddr, size: u64) {
        log::trace!("NullBackend: flush 0x{:X}+0x{:X}", addr, size);
    }

    fn invalidate_region(&mut self, addr: VAddr, size: u64) {
        log::trace!("NullBackend: invalidate 0x{:X}+0x{:X}", addr, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PixelFormat;

    #[test]
    fn test_counts_frames() {
        let mut backend = NullBackend::new();
        let fb = FramebufferConfig {
            address: 0x1000,
            offset: 0,
            width: 1280,
            height: 720,
            stride: 1280,
            pixel_format: PixelFormat::Abgr8,
        };
        backend.swap_buffers(Some(&fb));
        backend.swap_buffers(None);
        assert_eq!(backend.frames_presented(), 2);
        assert_eq!(backend.name(), "null");
    }
}
