//! Typed error taxonomy for the execution core.
//!
//! CPU exceptions are *not* represented here — they are ordinary 68k
//! control flow, modeled by [`crate::cpu::fault::CpuFault`] and caught at
//! the top of the instruction dispatcher. `CoreError` only covers conditions
//! the core itself surfaces to a caller: double faults, snapshot mismatches,
//! and configuration conflicts.

use thiserror::Error;

/// Errors surfaced across the core's external interfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A second group-0 exception occurred while entering the first one.
    /// The CPU has halted; only inspection and snapshot remain possible.
    #[error("double bus fault: CPU halted while entering vector {vector}")]
    DoubleFault {
        /// Vector number of the exception being entered when the fault hit.
        vector: u8,
    },

    /// `deserialize` rejected a snapshot stream.
    #[error("snapshot mismatch: {reason}")]
    SnapshotMismatch {
        /// Human-readable reason (too old, too new, corrupted, beta).
        reason: SnapshotMismatchReason,
    },

    /// A requested configuration combination is not cycle-accurate in this
    /// core; the affected subsystem has degraded to a non-cycle-accurate
    /// fallback rather than failing outright.
    #[error("configuration conflict: {detail}")]
    ConfigurationConflict {
        /// What was requested and why it can't be honored exactly.
        detail: String,
    },
}

/// Why a snapshot stream failed to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMismatchReason {
    /// Magic bytes did not match `VASNAP`.
    BadMagic,
    /// Major/minor/subminor version is newer than this build supports.
    TooNew,
    /// Major/minor/subminor version is older than this build supports.
    TooOld,
    /// The stream is flagged as a beta-format snapshot.
    Beta,
    /// The payload failed its integrity check after decompression.
    Corrupted,
}

impl std::fmt::Display for SnapshotMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BadMagic => "bad magic",
            Self::TooNew => "snapshot is newer than this core",
            Self::TooOld => "snapshot is older than this core",
            Self::Beta => "beta-format snapshots are not accepted",
            Self::Corrupted => "payload failed integrity check",
        };
        f.write_str(s)
    }
}

/// Result alias used across the crate's public, fallible entry points.
pub type CoreResult<T> = Result<T, CoreError>;
