//! In-memory device used for tests and headless runs.
//!
//! Keeps every storage as a plain byte vector and counts each operation so
//! tests can assert on device traffic. `read_storage` returns what was
//! uploaded, which makes end-to-end round trips checkable without a GPU.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{BufferHandle, BufferUsage, GeometryDevice, MappedWrite, NumericType, PrimitiveKind};

/// Operation counters accumulated by a [`SoftwareDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub handles_generated: usize,
    pub storages_created: usize,
    pub storages_destroyed: usize,
    pub vertex_binds: usize,
    pub index_binds: usize,
    pub uploads: usize,
    pub maps: usize,
    pub unmaps: usize,
    pub attributes_described: usize,
    pub attributes_enabled: usize,
    pub attributes_disabled: usize,
    pub draws: usize,
}

#[derive(Default)]
struct DeviceState {
    next_handle: u32,
    storages: HashMap<u32, Vec<u8>>,
    stats: DeviceStats,
}

/// [`GeometryDevice`] backed by host memory.
pub struct SoftwareDevice {
    state: Mutex<DeviceState>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats
    }

    /// Number of live storages.
    pub fn storage_count(&self) -> usize {
        self.state.lock().storages.len()
    }

    /// Size of the storage behind a handle, if it exists.
    pub fn storage_size(&self, handle: BufferHandle) -> Option<usize> {
        self.state.lock().storages.get(&handle.0).map(Vec::len)
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryDevice for SoftwareDevice {
    fn name(&self) -> &'static str {
        "software"
    }

    fn gen_handles(&self, count: usize) -> Vec<BufferHandle> {
        let mut state = self.state.lock();
        state.stats.handles_generated += count;
        let first = state.next_handle;
        state.next_handle += count as u32;
        (first..first + count as u32).map(BufferHandle).collect()
    }

    fn create_storage(&self, handle: BufferHandle, size: usize, usage: BufferUsage) {
        log::trace!("software device: create storage {handle:?} size {size} usage {usage:?}");
        let mut state = self.state.lock();
        state.stats.storages_created += 1;
        state.storages.insert(handle.0, vec![0u8; size]);
    }

    fn destroy_storage(&self, handle: BufferHandle) {
        log::trace!("software device: destroy storage {handle:?}");
        let mut state = self.state.lock();
        state.stats.storages_destroyed += 1;
        state.storages.remove(&handle.0);
    }

    fn bind_vertex_storage(&self, handle: Option<BufferHandle>) {
        log::trace!("software device: bind vertex storage {handle:?}");
        self.state.lock().stats.vertex_binds += 1;
    }

    fn bind_index_storage(&self, handle: Option<BufferHandle>) {
        log::trace!("software device: bind index storage {handle:?}");
        self.state.lock().stats.index_binds += 1;
    }

    fn upload(&self, handle: BufferHandle, offset: usize, data: &[u8]) {
        log::trace!(
            "software device: upload {} bytes to {handle:?} at {offset}",
            data.len()
        );
        let mut state = self.state.lock();
        state.stats.uploads += 1;
        let storage = state
            .storages
            .get_mut(&handle.0)
            .unwrap_or_else(|| panic!("upload to unknown storage {handle:?}"));
        storage[offset..offset + data.len()].copy_from_slice(data);
    }

    fn map_for_write(&self, handle: BufferHandle, offset: usize, size: usize) -> MappedWrite {
        log::trace!("software device: map {size} bytes of {handle:?} at {offset}");
        let mut state = self.state.lock();
        state.stats.maps += 1;
        assert!(
            state.storages.contains_key(&handle.0),
            "map of unknown storage {handle:?}"
        );
        MappedWrite::new(handle, offset, size)
    }

    fn flush_and_unmap(&self, mapped: MappedWrite) {
        log::trace!(
            "software device: flush and unmap {} bytes of {:?}",
            mapped.len(),
            mapped.handle()
        );
        let handle = mapped.handle();
        let offset = mapped.offset();
        let mut state = self.state.lock();
        state.stats.unmaps += 1;
        let storage = state
            .storages
            .get_mut(&handle.0)
            .unwrap_or_else(|| panic!("unmap of unknown storage {handle:?}"));
        storage[offset..offset + mapped.len()].copy_from_slice(mapped.bytes());
    }

    fn describe_attribute(
        &self,
        location: u32,
        components: u32,
        ty: NumericType,
        normalized: bool,
        stride: usize,
        offset: usize,
    ) {
        log::trace!(
            "software device: attribute {location}: {components} x {ty:?} \
             normalized {normalized} stride {stride} offset {offset}"
        );
        self.state.lock().stats.attributes_described += 1;
    }

    fn enable_attribute(&self, location: u32) {
        log::trace!("software device: enable attribute {location}");
        self.state.lock().stats.attributes_enabled += 1;
    }

    fn disable_attribute(&self, location: u32) {
        log::trace!("software device: disable attribute {location}");
        self.state.lock().stats.attributes_disabled += 1;
    }

    fn draw_indexed(&self, kind: PrimitiveKind, count: u32, index_offset: u32) {
        log::trace!("software device: draw {count} indices as {kind:?} from {index_offset}");
        self.state.lock().stats.draws += 1;
    }

    fn draw_range_indexed(
        &self,
        kind: PrimitiveKind,
        start: u32,
        end: u32,
        count: u32,
        index_offset: u32,
    ) {
        log::trace!(
            "software device: draw {count} indices as {kind:?} from {index_offset} \
             over vertices {start}..={end}"
        );
        self.state.lock().stats.draws += 1;
    }

    fn draw_arrays(&self, kind: PrimitiveKind, first: u32, count: u32) {
        log::trace!("software device: draw {count} vertices as {kind:?} from {first}");
        self.state.lock().stats.draws += 1;
    }

    fn read_storage(&self, handle: BufferHandle, offset: usize, size: usize) -> Vec<u8> {
        let state = self.state.lock();
        let storage = state
            .storages
            .get(&handle.0)
            .unwrap_or_else(|| panic!("read of unknown storage {handle:?}"));
        storage[offset..offset + size].to_vec()
    }
}

static_assertions::assert_impl_all!(SoftwareDevice: Send, Sync);
