//! Error type shared across the crate.

use thiserror::Error;

/// Everything that can go wrong while talking to a scan chain.
#[derive(Debug, Error)]
pub enum Error {
    /// A named signal, instruction or data register is missing from a part
    /// description.  Raised at construction time; callers should abort
    /// whatever they were building.
    #[error("{0} not found")]
    NotFound(String),

    /// Bit index past the end of a register.
    #[error("bit {index} out of range for {len}-bit register")]
    OutOfRange { index: usize, len: usize },

    /// A bit string or captured chain did not have the expected shape.
    #[error("format error: {0}")]
    Format(String),

    /// Address outside every memory area the bus driver knows about.
    /// Recoverable; bulk reads may skip the address and continue.
    #[error("address 0x{0:08x} is outside all defined bus areas")]
    OutOfBounds(u32),

    /// A device never asserted an expected status bit before its polling
    /// loop gave up.  The message carries the last observed value.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Bad parameters supplied when building a part or bus driver.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A logic bug, e.g. the state machine failed to converge.  Not meant
    /// to be handled.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
