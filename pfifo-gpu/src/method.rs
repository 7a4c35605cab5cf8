// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! A single decoded method invocation.

/// One method write as produced by the pushbuffer decoder.
///
/// `method_count` counts the words left in the run this call belongs to,
/// including this one; a value of 0 or 1 marks the final call of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodCall {
    pub method: u32,
    pub argument: u32,
    pub subchannel: u32,
    pub method_count: u32,
}

impl MethodCall {
    pub fn new(method: u32, argument: u32, subchannel: u32, method_count: u32) -> Self {
        Self {
            method,
            argument,
            subchannel,
            method_count,
        }
    }

    /// Single-word call on subchannel 0.
    pub fn single(method: u32, argument: u32) -> Self {
        Self::new(method, argument, 0, 0)
    }

    pub fn is_last_call(&self) -> bool {
        self.method_count <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_last_call() {
        assert!(MethodCall::single(0x40, 1).is_last_call());
        assert!(MethodCall::new(0x40, 1, 2, 1).is_last_call());
        assert!(!MethodCall::new(0x40, 1, 2, 3).is_last_call());
    }
}
