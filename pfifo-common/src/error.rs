// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Recoverable GPU front-end errors.
//!
//! Command-stream precondition violations (unbound subchannel, out-of-range
//! register or syncpoint) are not represented here: they abort.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU worker thread could not be spawned: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("GPU emulation already started")]
    AlreadyStarted,
    #[error("GPU emulation has not been started")]
    NotStarted,
    #[error("GPU worker thread has stopped")]
    WorkerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            GpuError::AlreadyStarted.to_string(),
            "GPU emulation already started"
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads");
        let err: GpuError = io.into();
        assert!(err.to_string().contains("no threads"));
        assert!(matches!(err, GpuError::WorkerSpawn(_)));
    }
}
