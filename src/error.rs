//! Recoverable errors at the loader/verifier seam.
//!
//! Runtime faults (stack underflow, division by zero, allocation exhaustion)
//! remain `panic!`s per the design notes in `SPEC_FULL.md` §7 — they mirror
//! the original's `panic`/`panicf` calls, which are not meant to be caught.
//! Only chunk rejection is recoverable, so only it gets a typed error.
//!
//! Grounded in `thiserror`, used the same way by `FuelLabs-fuel-vm` and
//! `tomusdrw-wasm-pvm` for their interpreter error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("chunk does not start with the HEADER opcode")]
    HeaderNotAtZero,

    #[error("bad magic bytes in chunk header")]
    BadMagic,

    #[error("declared chunk size {declared} does not match actual length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("unknown opcode {byte:#04x} at offset {at}")]
    UnknownOpcode { byte: u8, at: usize },

    #[error("operand at offset {at} runs past the end of the chunk")]
    OffsetOutOfChunk { at: usize },

    #[error("global index {index} out of range (chunk declares {count} globals)")]
    GlobalOutOfRange { index: u32, count: u32 },

    #[error("jump target at offset {at} is misaligned")]
    Misaligned { at: usize },

    #[error("jump target {at} does not point at the start of an opcode")]
    JumpTargetNotOp { at: usize },

    #[error("PUSHFN target {at} does not point at an XFN opcode")]
    FnTargetNotXfn { at: usize },

    #[error("chunk's declared global_offset {got} does not match the VM's current global top {expected}")]
    GlobalOffsetMismatch { expected: usize, got: usize },

    #[error("MAGIC id {id} is outside the syscall catalog (size {catalog_size})")]
    MagicOutOfRange { id: u16, catalog_size: u16 },
}

/// Returned by a `MAGIC` dispatch when the id names a catalog entry that is
/// not wired up. Every entry in the catalog is a fatal, named stub; see
/// `interp::Magic`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unimplemented magic {0}: {1}")]
pub struct MagicError(pub u16, pub &'static str);
