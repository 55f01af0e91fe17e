//! Error types for the residency manager.
//!
//! # Design Principles
//!
//! - Every variant carries enough diagnostic context to act on without a
//!   debugger attached (byte counts, operation names, reasons).
//! - Fatal errors are sticky: once the paging worker hits an unrecoverable
//!   device out-of-memory, every subsequent submission reports it.
//! - Budget-query failures are advisory. The residency heuristics keep
//!   running on the last known figures rather than failing the submission.

use thiserror::Error;

use crate::hal::MemorySegment;

/// Error type for residency operations.
///
/// Cloneable so a fatal worker-side failure can be surfaced by every
/// subsequent submission until the manager is torn down.
#[derive(Debug, Clone, Error)]
pub enum ResidencyError {
    /// A host-side allocation inside a collaborator failed.
    #[error("Host allocation failed: {reason}")]
    OutOfMemoryHost {
        /// What was being allocated.
        reason: String,
    },

    /// The device could not make the working set resident and nothing was
    /// left to trim. The submission cannot fit in the entire video-memory
    /// budget; there is no recovery.
    #[error("Device out of memory: {requested_bytes} bytes left to page in with nothing left to trim")]
    OutOfMemoryDevice {
        /// Bytes that still needed to be made resident when paging gave up.
        requested_bytes: u64,
    },

    /// An underlying device call returned a fatal status.
    #[error("Device lost during {operation}: {reason}")]
    DeviceLost {
        /// The device call that failed (e.g. "make_resident").
        operation: String,
        /// Raw failure description from the graphics layer.
        reason: String,
    },

    /// An OS primitive (worker thread) could not be created at initialize.
    #[error("OS resource unavailable: {reason}")]
    OsResource {
        /// Description of the primitive that failed.
        reason: String,
    },

    /// The adapter rejected a video-memory budget query.
    #[error("Budget query failed for {segment} segment: {reason}")]
    BudgetQueryFailed {
        /// Which memory segment was being queried.
        segment: MemorySegment,
        /// Raw failure description from the adapter.
        reason: String,
    },

    /// Invalid configuration value, rejected at construction.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A submission was malformed (arity mismatch, shut-down manager).
    #[error("Invalid submission: {reason}")]
    InvalidSubmission {
        /// Why the submission was rejected.
        reason: String,
    },
}

impl ResidencyError {
    /// Whether this error permanently poisons the manager.
    ///
    /// Fatal errors mean the GPU can no longer be guaranteed to see a
    /// resident working set; callers should stop submitting.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemoryDevice { .. } | Self::DeviceLost { .. }
        )
    }

    /// Get the error category name for logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::OutOfMemoryHost { .. } => "HOST_MEMORY",
            Self::OutOfMemoryDevice { .. } => "DEVICE_MEMORY",
            Self::DeviceLost { .. } => "DEVICE",
            Self::OsResource { .. } => "OS",
            Self::BudgetQueryFailed { .. } => "BUDGET",
            Self::InvalidConfig { .. } => "CONFIG",
            Self::InvalidSubmission { .. } => "SUBMISSION",
        }
    }

    /// Get the structured error code for logging.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::OutOfMemoryHost { .. } => "ERR-RES-HOST-OOM",
            Self::OutOfMemoryDevice { .. } => "ERR-RES-DEVICE-OOM",
            Self::DeviceLost { .. } => "ERR-RES-DEVICE-LOST",
            Self::OsResource { .. } => "ERR-RES-OS-RESOURCE",
            Self::BudgetQueryFailed { .. } => "ERR-RES-BUDGET-QUERY",
            Self::InvalidConfig { .. } => "ERR-RES-CONFIG-INVALID",
            Self::InvalidSubmission { .. } => "ERR-RES-SUBMISSION-INVALID",
        }
    }
}

/// Result type alias for residency operations.
pub type ResidencyResult<T> = Result<T, ResidencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ResidencyError::OutOfMemoryDevice { requested_bytes: 1 }.is_fatal());
        assert!(ResidencyError::DeviceLost {
            operation: "evict".into(),
            reason: "removed".into(),
        }
        .is_fatal());
        assert!(!ResidencyError::BudgetQueryFailed {
            segment: MemorySegment::Local,
            reason: "driver busy".into(),
        }
        .is_fatal());
        assert!(!ResidencyError::InvalidConfig {
            field: "max_latency".into(),
            reason: "zero".into(),
        }
        .is_fatal());
    }

    #[test]
    fn error_codes_are_unique() {
        let codes = [
            ResidencyError::OutOfMemoryHost { reason: String::new() }.error_code(),
            ResidencyError::OutOfMemoryDevice { requested_bytes: 0 }.error_code(),
            ResidencyError::DeviceLost {
                operation: String::new(),
                reason: String::new(),
            }
            .error_code(),
            ResidencyError::OsResource { reason: String::new() }.error_code(),
            ResidencyError::BudgetQueryFailed {
                segment: MemorySegment::NonLocal,
                reason: String::new(),
            }
            .error_code(),
            ResidencyError::InvalidConfig {
                field: String::new(),
                reason: String::new(),
            }
            .error_code(),
            ResidencyError::InvalidSubmission { reason: String::new() }.error_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn display_includes_context() {
        let err = ResidencyError::OutOfMemoryDevice {
            requested_bytes: 4096,
        };
        assert!(err.to_string().contains("4096"));
    }
}
