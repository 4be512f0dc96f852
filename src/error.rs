//! Failure conditions of the execution engine.
//!
//! The engine distinguishes three classes of failure:
//!
//! - **Graph defects**: malformed operator definitions, unknown activation
//!   kinds, shape or argument mismatches, kernel source that does not
//!   compile. These indicate an authoring or bring-up error, never a
//!   transient runtime condition; the graph executor is expected to treat
//!   them as fatal.
//! - **Device failures**: a non-success status from the device when
//!   enqueueing or waiting on kernel work. The engine does not retry;
//!   within one inference pass a device failure is terminal.
//! - **Filtered conditions**: tuning candidates that exceed the device's
//!   workgroup bound or contain a zero dimension. These are *not* errors;
//!   they are silently excluded from the search set and never surface here.
//!
//! Errors are propagated as values to the executor boundary rather than
//! aborting inside the library, so embedders can choose their own policy.

use thiserror::Error;

/// Every way an engine operation can fail.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A dimension index past the tensor's rank was requested.
    #[error("dimension index {index} out of range for rank {rank}")]
    DimOutOfRange {
        /// The requested dimension index.
        index: usize,
        /// The tensor's rank.
        rank: usize,
    },

    /// Input/output shapes disagree in a way only a malformed graph can
    /// produce (e.g. batch mismatch between input and output).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A tensor's backing storage does not match what the executing
    /// backend expects (host buffer vs device buffer vs device image).
    #[error("tensor storage mismatch: expected {expected}")]
    StorageMismatch {
        /// The representation the backend required.
        expected: &'static str,
    },

    /// An activation name outside the fixed enumeration.
    #[error("unknown activation kind `{0}`")]
    UnknownActivation(String),

    /// Kernel source failed to specialize or compile. This can only
    /// happen once per unique build signature during bring-up, so it is
    /// treated as a configuration defect.
    #[error("kernel build failed for module `{module}`: {detail}")]
    KernelBuild {
        /// The kernel source module that failed.
        module: &'static str,
        /// Compiler or specializer diagnostic.
        detail: String,
    },

    /// Non-success status from the device. The numeric code is carried so
    /// the diagnostic at the executor boundary can identify the driver
    /// condition.
    #[error("device error, status code {code}")]
    Device {
        /// Backend-native status code.
        code: i64,
    },

    /// The selected backend is not usable on this host.
    #[error("backend `{0}` is not available")]
    BackendUnavailable(&'static str),

    /// Reading or writing the persisted tuning profile failed.
    #[error("tuning profile i/o failed: {0}")]
    Profile(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error indicates a graph/configuration defect (always
    /// fatal at the executor boundary) as opposed to a device condition.
    pub fn is_graph_defect(&self) -> bool {
        matches!(
            self,
            EngineError::DimOutOfRange { .. }
                | EngineError::ShapeMismatch(_)
                | EngineError::StorageMismatch { .. }
                | EngineError::UnknownActivation(_)
                | EngineError::KernelBuild { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
