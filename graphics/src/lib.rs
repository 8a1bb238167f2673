//! # Meshstream Graphics
//!
//! Device geometry buffers with background storage creation and upload.
//!
//! The crate revolves around [`GeometryBuffer`]: planar vertex attribute
//! arrays plus optional 16-bit indices, staged in host memory and pushed to
//! a [`GeometryDevice`] either inline or through the upload worker owned by
//! [`BufferSystem`]. [`BindingContext`] tracks per-thread bind and
//! attribute-enable state so redundant device calls are suppressed.
//!
//! Fallible operations return [`GeometryError`]. Misusing a buffer's
//! lifecycle (mapping from the wrong state, resizing while mapped, binding
//! before allocation) is a programming bug and panics.

pub mod attributes;
pub mod binding;
pub mod buffer;
pub mod device;
pub mod error;
pub mod handle_pool;
pub mod layout;
pub mod staging;
pub mod system;

pub use attributes::{AttributeMask, VertexAttributeType};
pub use binding::BindingContext;
pub use buffer::{BufferState, GeometryBuffer, MAX_VERTEX_COUNT};
pub use device::{
    BufferHandle, BufferUsage, GeometryDevice, MappedWrite, NumericType, PrimitiveKind,
};
pub use error::GeometryError;
pub use layout::{compute_layout, compute_vertex_stride, BufferLayout};
pub use staging::MappedVertexData;
pub use system::{BufferSystem, BufferSystemConfig, DEFAULT_IMMEDIATE_UPLOAD_THRESHOLD};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
