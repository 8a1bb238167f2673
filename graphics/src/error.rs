//! Geometry buffer error types.

use std::fmt;

/// Errors that can occur in the geometry buffer manager.
///
/// State-machine misuse (mapping from the wrong state, binding a buffer that
/// was never allocated) is a programming bug and panics instead of returning
/// one of these — see the crate-level docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// A vertex count above the hard cap was passed to allocation.
    AllocationTooLarge {
        /// The requested vertex count.
        requested: u32,
        /// The maximum supported vertex count.
        max: u32,
    },
    /// Failed to create a device resource.
    ResourceCreationFailed(String),
    /// An internal error occurred (e.g. the worker thread failed to spawn).
    Internal(String),
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationTooLarge { requested, max } => {
                write!(f, "allocation of {requested} vertices exceeds the cap of {max}")
            }
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GeometryError {}
