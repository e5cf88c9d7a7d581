//! Error taxonomy shared across the core and the driver crates.
//!
//! The variants track the policy table in the specification's error-handling
//! design: transient I/O and protocol violations are logged and discarded by
//! the callers that can recover from them, configuration errors are raised at
//! construction time, and `InterruptedByPoll`/`UnsupportedEvent` are control
//! signals rather than failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum X10Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("too many bad checksum responses sending {0}")]
    ChecksumExhausted(String),

    #[error("no echo confirmation received sending {0}")]
    EchoTimeout(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{event} is not an event type that can be serialized for the {driver} driver")]
    UnsupportedEvent {
        driver: &'static str,
        event: &'static str,
    },

    /// Raised internally by the CM11A driver when a poll byte interrupts an
    /// in-flight send; caught by the driver's main loop, never surfaced to
    /// callers of the facade.
    #[error("interrupted by poll byte 0x{0:02X}")]
    InterruptedByPoll(u8),

    #[error("the interface shut down while the operation was outstanding")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, X10Error>;
