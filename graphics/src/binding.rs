//! Binding registry for redundant-state suppression.
//!
//! [`BindingContext`] shadows the device's bind and attribute-enable state
//! for one rendering thread. Buffers route their binds through it so a
//! rebind of the already-bound storage, or a re-enable of an already-enabled
//! attribute array, never reaches the device.
//!
//! The registry is plain data owned by the caller. Create one per rendering
//! thread and pass it down the draw path; it holds no device reference and
//! issues enable/disable calls through the device handed to
//! [`sync_enabled_arrays`](BindingContext::sync_enabled_arrays).

use crate::attributes::{AttributeMask, VertexAttributeType};
use crate::device::{BufferHandle, GeometryDevice};

/// Last-bound handles and enabled attribute arrays for one thread.
#[derive(Debug, Default)]
pub struct BindingContext {
    bound_vertex: Option<BufferHandle>,
    bound_index: Option<BufferHandle>,
    enabled: AttributeMask,
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The vertex storage currently bound, if any.
    pub fn bound_vertex(&self) -> Option<BufferHandle> {
        self.bound_vertex
    }

    /// The index storage currently bound, if any.
    pub fn bound_index(&self) -> Option<BufferHandle> {
        self.bound_index
    }

    /// The attribute arrays currently enabled.
    pub fn enabled_mask(&self) -> AttributeMask {
        self.enabled
    }

    /// Bind a vertex storage unless it is already bound.
    ///
    /// Returns `true` if the device was actually called.
    pub fn bind_vertex(&mut self, device: &dyn GeometryDevice, handle: BufferHandle) -> bool {
        if self.bound_vertex == Some(handle) {
            return false;
        }
        device.bind_vertex_storage(Some(handle));
        self.bound_vertex = Some(handle);
        true
    }

    /// Bind an index storage unless it is already bound.
    ///
    /// Returns `true` if the device was actually called.
    pub fn bind_index(&mut self, device: &dyn GeometryDevice, handle: BufferHandle) -> bool {
        if self.bound_index == Some(handle) {
            return false;
        }
        device.bind_index_storage(Some(handle));
        self.bound_index = Some(handle);
        true
    }

    /// Unbind both slots, notifying the device for each that was bound.
    pub fn unbind_all(&mut self, device: &dyn GeometryDevice) {
        if self.bound_vertex.take().is_some() {
            device.bind_vertex_storage(None);
        }
        if self.bound_index.take().is_some() {
            device.bind_index_storage(None);
        }
    }

    /// Forget a handle that is being destroyed, without touching the device.
    ///
    /// Keeps the registry from suppressing a future bind of a recycled
    /// handle value.
    pub fn forget(&mut self, handle: BufferHandle) {
        if self.bound_vertex == Some(handle) {
            self.bound_vertex = None;
        }
        if self.bound_index == Some(handle) {
            self.bound_index = None;
        }
    }

    /// Enable/disable attribute arrays so exactly `wanted` is enabled.
    ///
    /// Diffs against the registry: arrays already in the right state produce
    /// no device calls. Returns `true` if anything changed.
    pub fn sync_enabled_arrays(
        &mut self,
        device: &dyn GeometryDevice,
        wanted: AttributeMask,
    ) -> bool {
        if wanted == self.enabled {
            return false;
        }
        for ty in VertexAttributeType::ALL {
            let want = wanted.has(ty);
            if want != self.enabled.has(ty) {
                if want {
                    device.enable_attribute(ty.index() as u32);
                } else {
                    device.disable_attribute(ty.index() as u32);
                }
            }
        }
        self.enabled = wanted;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    #[test]
    fn test_redundant_vertex_bind_is_suppressed() {
        let device = SoftwareDevice::new();
        let mut ctx = BindingContext::new();

        assert!(ctx.bind_vertex(&device, BufferHandle(1)));
        assert!(!ctx.bind_vertex(&device, BufferHandle(1)));
        assert!(ctx.bind_vertex(&device, BufferHandle(2)));
        assert_eq!(device.stats().vertex_binds, 2);
        assert_eq!(ctx.bound_vertex(), Some(BufferHandle(2)));
    }

    #[test]
    fn test_vertex_and_index_slots_are_independent() {
        let device = SoftwareDevice::new();
        let mut ctx = BindingContext::new();

        assert!(ctx.bind_vertex(&device, BufferHandle(1)));
        assert!(ctx.bind_index(&device, BufferHandle(1)));
        assert_eq!(device.stats().vertex_binds, 1);
        assert_eq!(device.stats().index_binds, 1);
    }

    #[test]
    fn test_unbind_all_clears_both_slots() {
        let device = SoftwareDevice::new();
        let mut ctx = BindingContext::new();

        ctx.bind_vertex(&device, BufferHandle(1));
        ctx.bind_index(&device, BufferHandle(2));
        ctx.unbind_all(&device);
        assert_eq!(ctx.bound_vertex(), None);
        assert_eq!(ctx.bound_index(), None);

        // Unbinding again is a no-op on the device.
        let binds_before = device.stats();
        ctx.unbind_all(&device);
        assert_eq!(device.stats(), binds_before);
    }

    #[test]
    fn test_sync_enabled_arrays_diffs() {
        let device = SoftwareDevice::new();
        let mut ctx = BindingContext::new();

        let first = AttributeMask::POSITION | AttributeMask::NORMAL;
        assert!(ctx.sync_enabled_arrays(&device, first));
        assert_eq!(device.stats().attributes_enabled, 2);
        assert_eq!(device.stats().attributes_disabled, 0);

        // Same mask: nothing happens.
        assert!(!ctx.sync_enabled_arrays(&device, first));
        assert_eq!(device.stats().attributes_enabled, 2);

        // Swap normal for color: one disable, one enable.
        let second = AttributeMask::POSITION | AttributeMask::COLOR;
        assert!(ctx.sync_enabled_arrays(&device, second));
        assert_eq!(device.stats().attributes_enabled, 3);
        assert_eq!(device.stats().attributes_disabled, 1);
        assert_eq!(ctx.enabled_mask(), second);
    }

    #[test]
    fn test_forget_allows_rebind_of_recycled_handle() {
        let device = SoftwareDevice::new();
        let mut ctx = BindingContext::new();

        ctx.bind_vertex(&device, BufferHandle(5));
        ctx.forget(BufferHandle(5));
        assert!(ctx.bind_vertex(&device, BufferHandle(5)));
    }
}
