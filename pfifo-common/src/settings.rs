// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

/// GPU front-end settings, populated from config INI.
#[derive(Debug, Clone)]
pub struct Settings {
    // Renderer
    pub gpu_mode: GpuMode,

    // Gpu
    /// Acquire timeout applied when the guest leaves `acquire_timeout` at 0.
    /// `None` waits forever.
    pub acquire_timeout: Option<Duration>,

    // Debug
    pub use_debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpu_mode: GpuMode::Async,
            acquire_timeout: None,
            use_debug_logging: false,
        }
    }
}

/// Execution mode of the GPU front-end, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMode {
    /// Dispatch completes inline on the submitting thread.
    Sync,
    /// Dispatch is handed to a dedicated GPU worker thread.
    Async,
}

impl GpuMode {
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "0" | "false" | "sync" => Self::Sync,
            "1" | "true" | "async" => Self::Async,
            _ => Self::Async,
        }
    }

    pub fn is_async(self) -> bool {
        self == Self::Async
    }
}

/// Parse an acquire timeout in milliseconds; 0 or garbage means wait forever.
pub fn parse_timeout_ms(s: &str) -> Option<Duration> {
    match s.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
