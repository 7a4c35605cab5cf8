// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU engine trait and class identifiers.
//!
//! Engines are the collaborators that interpret forwarded methods. The puller
//! never looks inside them: it only routes calls by the class bound to each
//! subchannel.

pub mod register_engine;

use crate::method::MethodCall;

/// GPU engine class (NV device class number), as written by BindObject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineClass(pub u32);

impl EngineClass {
    pub const FERMI_2D: Self = Self(0x902D);
    pub const MAXWELL_3D: Self = Self(0xB197);
    pub const KEPLER_COMPUTE: Self = Self(0xB1C0);
    pub const INLINE_TO_MEMORY: Self = Self(0xA140);
    pub const MAXWELL_DMA: Self = Self(0xB0B5);

    /// Classes the front-end ships engines for, in default subchannel order.
    pub const KNOWN: [Self; 5] = [
        Self::MAXWELL_3D,
        Self::KEPLER_COMPUTE,
        Self::INLINE_TO_MEMORY,
        Self::FERMI_2D,
        Self::MAXWELL_DMA,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FERMI_2D => "Fermi2D",
            Self::MAXWELL_3D => "Maxwell3D",
            Self::KEPLER_COMPUTE => "KeplerCompute",
            Self::INLINE_TO_MEMORY => "InlineToMemory",
            Self::MAXWELL_DMA => "MaxwellDMA",
            _ => "Unknown",
        }
    }
}

impl std::fmt::Display for EngineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(0x{:04X})", self.name(), self.0)
    }
}

/// Trait for a GPU engine that accepts forwarded method calls.
pub trait Engine: Send {
    /// The class this engine implements.
    fn class(&self) -> EngineClass;

    /// Execute one method. `call.method_count` is passed through unchanged so
    /// engines can recognise the end of an array write.
    fn call_method(&mut self, call: &MethodCall);
}

/// Number of registers per engine.
pub const ENGINE_REG_COUNT: usize = 0x4000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ids() {
        assert_eq!(EngineClass::MAXWELL_3D.0, 0xB197);
        assert_eq!(EngineClass::KEPLER_COMPUTE.0, 0xB1C0);
        assert_eq!(EngineClass::MAXWELL_DMA.0, 0xB0B5);
    }

    #[test]
    fn test_display() {
        assert_eq!(EngineClass::FERMI_2D.to_string(), "Fermi2D(0x902D)");
        assert_eq!(EngineClass(0x1234).to_string(), "Unknown(0x1234)");
    }
}
