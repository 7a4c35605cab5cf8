// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Virtual address in guest CPU memory (64-bit).
pub type VAddr = u64;

/// Virtual address in the GPU address space.
pub type GpuVAddr = u64;
