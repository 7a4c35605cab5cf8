// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subchannel → engine class binding table.

use crate::engines::EngineClass;

/// Number of engine subchannels.
pub const NUM_SUBCHANNELS: usize = 8;

/// Which engine class each subchannel is bound to. Written only by the
/// BindObject puller method.
#[derive(Debug, Clone, Default)]
pub struct EngineBindings {
    slots: [Option<EngineClass>; NUM_SUBCHANNELS],
}

impl EngineBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, subchannel: u32, class: EngineClass) {
        self.slots[Self::index(subchannel)] = Some(class);
    }

    /// Bound class for `subchannel`, `None` if never bound.
    pub fn get(&self, subchannel: u32) -> Option<EngineClass> {
        self.slots[Self::index(subchannel)]
    }

    fn index(subchannel: u32) -> usize {
        let idx = subchannel as usize;
        assert!(
            idx < NUM_SUBCHANNELS,
            "subchannel {} out of range",
            subchannel
        );
        idx
    }
}
