//! Typed errors for the few genuine fallibility boundaries in the core.
//!
//! Per spec.md §7, almost nothing in the emulator is an "error" in the
//! `Result` sense: OOB memory, undefined instructions and unintercepted
//! SWIs are in-architecture behavior surfaced through `Status`. This enum
//! covers the monitor's wire framing, which *can* be malformed if the peer
//! sends garbage or closes the pipe mid-command.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("monitor peer closed the command pipe")]
    ProtocolUnderrun,

    #[error("monitor frame truncated: expected {expected} bytes, got {got}")]
    TruncatedFrame { expected: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
