//! Geometry buffers with asynchronous storage creation and upload.
//!
//! A [`GeometryBuffer`] owns one vertex storage and one optional index
//! storage on a [`GeometryDevice`]. Each storage half runs its own little
//! state machine:
//!
//! ```text
//! Init -> Empty -> Mapped -> Unmapped -> Ready
//! ```
//!
//! `Init -> Empty` happens at allocation. For a mappable buffer above the
//! immediate-upload threshold, allocation also posts a background task that
//! creates the storage and opens a device write mapping; the caller fills a
//! host staging arena in the meantime. Unmapping posts a second task that
//! waits for the mapping, copies the arena into it, flushes, and flips the
//! half to `Ready`. Small buffers skip the queue and upload inline at unmap.
//! Non-mappable buffers create storage inline at allocation and are filled
//! through the direct `set_*_data` calls.
//!
//! Rendering entry points (`bind_*`, `set_buffer`) block until the half they
//! need reports `Ready`, so a draw can be issued immediately after unmap
//! without caring whether the upload went through the queue.
//!
//! Halves synchronize through a mutex/condvar pair shared with the queued
//! tasks. Staging arenas are shared with in-flight tasks via `Arc`; an
//! upload task drops its reference before signaling `Ready`, so the arena is
//! exclusively owned again by the time the buffer can be remapped.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use meshstream_core::WorkQueue;

use crate::attributes::{AttributeMask, VertexAttributeType};
use crate::binding::BindingContext;
use crate::device::{BufferHandle, BufferUsage, GeometryDevice, MappedWrite, PrimitiveKind};
use crate::error::GeometryError;
use crate::handle_pool;
use crate::layout::{compute_layout, BufferLayout};
use crate::staging::{map_views, MappedVertexData, StagingBuffer};

/// Hard cap on vertices per buffer (16-bit indices must reach every vertex).
pub const MAX_VERTEX_COUNT: u32 = 65536;

/// Pad appended to index storage so aligned wide copies may overrun.
const INDEX_PAD: usize = 16;

/// Lifecycle state of one storage half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BufferState {
    /// No storage requested yet.
    Init,
    /// Storage requested, not yet filled.
    Empty,
    /// Host staging handed out to the caller.
    Mapped,
    /// Unmapped by the caller, upload in flight.
    Unmapped,
    /// Storage filled and usable for rendering.
    Ready,
}

struct HalfInner {
    state: BufferState,
    handle: Option<BufferHandle>,
    pending_map: Option<MappedWrite>,
    map_requested: bool,
}

impl HalfInner {
    fn new() -> Self {
        Self {
            state: BufferState::Init,
            handle: None,
            pending_map: None,
            map_requested: false,
        }
    }
}

/// Shared synchronization state for one storage half.
///
/// One condvar serves both events a half can wait on: the background task
/// publishing its write mapping, and the half reaching `Ready`.
struct HalfSync {
    inner: Mutex<HalfInner>,
    cond: Condvar,
}

impl HalfSync {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HalfInner::new()),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> BufferState {
        self.inner.lock().state
    }

    fn handle(&self) -> Option<BufferHandle> {
        self.inner.lock().handle
    }

    fn set_handle(&self, handle: BufferHandle) {
        self.inner.lock().handle = Some(handle);
    }

    fn take_handle(&self) -> Option<BufferHandle> {
        self.inner.lock().handle.take()
    }

    fn map_requested(&self) -> bool {
        self.inner.lock().map_requested
    }

    fn mark_map_requested(&self) {
        self.inner.lock().map_requested = true;
    }

    /// Move `from -> to`, panicking on any other current state.
    fn transition(&self, from: BufferState, to: BufferState) {
        let mut inner = self.inner.lock();
        if inner.state != from {
            panic!(
                "illegal geometry buffer transition {:?} -> {:?} (current state {:?})",
                from, to, inner.state
            );
        }
        inner.state = to;
    }

    /// As [`transition`](Self::transition), waking every waiter.
    fn transition_notify(&self, from: BufferState, to: BufferState) {
        self.transition(from, to);
        self.cond.notify_all();
    }

    /// Block until the half reaches `Ready`.
    fn wait_until_ready(&self) {
        let mut inner = self.inner.lock();
        while inner.state != BufferState::Ready {
            self.cond.wait(&mut inner);
        }
    }

    /// Record the storage handle and its open write mapping, waking waiters.
    fn publish_mapping(&self, mapped: MappedWrite) {
        {
            let mut inner = self.inner.lock();
            inner.handle = Some(mapped.handle());
            inner.pending_map = Some(mapped);
        }
        self.cond.notify_all();
    }

    /// Block until a mapping is published, then take it.
    fn take_mapping(&self) -> MappedWrite {
        let mut inner = self.inner.lock();
        while inner.pending_map.is_none() {
            self.cond.wait(&mut inner);
        }
        inner.map_requested = false;
        inner
            .pending_map
            .take()
            .expect("pending mapping vanished under lock")
    }

    /// Return to `Init` with no handle and no pending mapping.
    fn reset(&self) {
        *self.inner.lock() = HalfInner::new();
    }
}

/// A device geometry buffer: planar vertex arrays plus optional `u16`
/// indices, filled through staging memory or direct uploads.
///
/// Created by [`BufferSystem::create_buffer`](crate::system::BufferSystem::create_buffer).
pub struct GeometryBuffer {
    device: Arc<dyn GeometryDevice>,
    queue: Arc<WorkQueue>,
    immediate_threshold: usize,
    mask: AttributeMask,
    usage: BufferUsage,
    mappable: bool,
    num_verts: u32,
    num_indices: u32,
    layout: BufferLayout,
    size: usize,
    indices_size: usize,
    vertex_half: Arc<HalfSync>,
    index_half: Arc<HalfSync>,
    vertex_staging: Option<Arc<StagingBuffer>>,
    index_staging: Option<Arc<StagingBuffer>>,
}

impl GeometryBuffer {
    pub(crate) fn new(
        device: Arc<dyn GeometryDevice>,
        queue: Arc<WorkQueue>,
        immediate_threshold: usize,
        mask: AttributeMask,
        usage: BufferUsage,
    ) -> Self {
        Self {
            device,
            queue,
            immediate_threshold,
            mask,
            usage,
            mappable: true,
            num_verts: 0,
            num_indices: 0,
            layout: BufferLayout::empty(),
            size: 0,
            indices_size: 0,
            vertex_half: Arc::new(HalfSync::new()),
            index_half: Arc::new(HalfSync::new()),
            vertex_staging: None,
            index_staging: None,
        }
    }

    /// Size both halves for the given counts.
    ///
    /// `mappable` selects the fill path for vertex data: staging map/unmap
    /// when `true`, direct `set_*_data` uploads when `false`. Index data
    /// always goes through map/unmap.
    pub fn allocate(
        &mut self,
        nverts: u32,
        nindices: u32,
        mappable: bool,
    ) -> Result<(), GeometryError> {
        if nverts > MAX_VERTEX_COUNT {
            return Err(GeometryError::AllocationTooLarge {
                requested: nverts,
                max: MAX_VERTEX_COUNT,
            });
        }
        self.mappable = mappable;
        self.update_vertex_count(nverts);
        self.update_index_count(nindices);
        Ok(())
    }

    /// Resize the vertex half for `nverts` vertices.
    ///
    /// Keeps the existing storage while the needed size stays within
    /// (50%, 100%] of the current one; otherwise the storage is recreated.
    /// Counts above [`MAX_VERTEX_COUNT`] are clamped with a warning.
    pub fn update_vertex_count(&mut self, nverts: u32) {
        assert!(
            self.vertex_half.state() != BufferState::Mapped,
            "geometry buffer resized while vertex data is mapped"
        );

        let nverts = if nverts > MAX_VERTEX_COUNT {
            log::warn!("vertex buffer overflow, clamping {nverts} to {MAX_VERTEX_COUNT}");
            MAX_VERTEX_COUNT
        } else {
            nverts
        };

        let layout = compute_layout(self.mask, nverts);
        let needed = layout.size();
        if needed > self.size || needed <= self.size / 2 {
            self.recreate_vertex_storage(needed);
        }
        self.layout = layout;
        self.num_verts = nverts;
    }

    /// Resize the index half for `nindices` 16-bit indices.
    ///
    /// The index storage is always recreated; index buffers are small and
    /// resizing them is rare.
    pub fn update_index_count(&mut self, nindices: u32) {
        assert!(
            self.index_half.state() != BufferState::Mapped,
            "geometry buffer resized while index data is mapped"
        );

        self.quiesce_index();
        if let Some(handle) = self.index_half.take_handle() {
            handle_pool::release(&self.device, handle);
        }
        self.index_half.reset();
        self.index_staging = None;
        self.indices_size = 0;

        let needed = nindices as usize * std::mem::size_of::<u16>();
        if needed > 0 {
            self.gen_index_storage(needed + INDEX_PAD);
        }
        self.num_indices = nindices;
    }

    fn recreate_vertex_storage(&mut self, needed: usize) {
        self.quiesce_vertex();
        if let Some(handle) = self.vertex_half.take_handle() {
            handle_pool::release(&self.device, handle);
        }
        self.vertex_half.reset();
        self.vertex_staging = None;
        self.size = 0;
        self.gen_vertex_storage(needed);
    }

    /// Settle a half so its storage can be released: drain a published but
    /// untaken mapping, or wait out an in-flight upload.
    fn quiesce_vertex(&mut self) {
        match self.vertex_half.state() {
            BufferState::Init | BufferState::Ready => {}
            BufferState::Empty | BufferState::Mapped => {
                if self.vertex_half.map_requested() {
                    let mapped = self.vertex_half.take_mapping();
                    self.device.flush_and_unmap(mapped);
                }
            }
            BufferState::Unmapped => self.vertex_half.wait_until_ready(),
        }
    }

    fn quiesce_index(&mut self) {
        match self.index_half.state() {
            BufferState::Init | BufferState::Ready => {}
            BufferState::Empty | BufferState::Mapped => {
                if self.index_half.map_requested() {
                    let mapped = self.index_half.take_mapping();
                    self.device.flush_and_unmap(mapped);
                }
            }
            BufferState::Unmapped => self.index_half.wait_until_ready(),
        }
    }

    fn gen_vertex_storage(&mut self, size: usize) {
        self.size = size;
        self.vertex_half
            .transition(BufferState::Init, BufferState::Empty);

        if !self.mappable {
            let handle = handle_pool::acquire(&self.device);
            self.vertex_half.set_handle(handle);
            self.device.bind_vertex_storage(Some(handle));
            self.device.create_storage(handle, size, self.usage);
            self.device.bind_vertex_storage(None);
        } else if size > self.immediate_threshold {
            // Create and map on the worker so the caller can start filling
            // staging right away.
            self.vertex_half.mark_map_requested();
            let device = Arc::clone(&self.device);
            let half = Arc::clone(&self.vertex_half);
            let usage = self.usage;
            self.queue.post(Box::new(move || {
                let handle = handle_pool::acquire(&device);
                device.bind_vertex_storage(Some(handle));
                device.create_storage(handle, size, usage);
                let mapped = device.map_for_write(handle, 0, size);
                device.bind_vertex_storage(None);
                half.publish_mapping(mapped);
            }));
        }
        // Small mappable storage is created at unmap time, data in hand.
    }

    fn gen_index_storage(&mut self, size: usize) {
        self.indices_size = size;
        self.index_half
            .transition(BufferState::Init, BufferState::Empty);

        if size > self.immediate_threshold {
            self.index_half.mark_map_requested();
            let device = Arc::clone(&self.device);
            let half = Arc::clone(&self.index_half);
            let usage = self.usage;
            self.queue.post(Box::new(move || {
                let handle = handle_pool::acquire(&device);
                device.bind_index_storage(Some(handle));
                device.create_storage(handle, size, usage);
                let mapped = device.map_for_write(handle, 0, size);
                device.bind_index_storage(None);
                half.publish_mapping(mapped);
            }));
        }
    }

    /// Hand out writable typed views over the vertex staging arena.
    ///
    /// Panics if the buffer is not mappable or the vertex half is not
    /// `Empty` (freshly allocated).
    pub fn map_vertex_buffer(&mut self) -> MappedVertexData<'_> {
        assert!(
            self.mappable,
            "mapping a geometry buffer created for direct updates"
        );
        self.vertex_half
            .transition(BufferState::Empty, BufferState::Mapped);

        let mask = self.mask;
        let layout = self.layout;
        let num_verts = self.num_verts;
        let size = self.size;

        let staging = self
            .vertex_staging
            .get_or_insert_with(|| Arc::new(StagingBuffer::new(size)));
        let staging = Arc::get_mut(staging)
            .expect("vertex staging still referenced by an in-flight upload");
        map_views(staging.as_bytes_mut(), mask, &layout, num_verts)
    }

    /// Push the staged vertex data to the device.
    ///
    /// Above the immediate-upload threshold this posts a copy task to the
    /// work queue; the half flips to `Ready` when the task finishes. Below
    /// it the storage is created and filled inline before returning.
    pub fn unmap_vertex_buffer(&mut self) {
        let staging = Arc::clone(
            self.vertex_staging
                .as_ref()
                .expect("unmapping vertex data that was never mapped"),
        );
        self.vertex_half
            .transition(BufferState::Mapped, BufferState::Unmapped);

        if self.size > self.immediate_threshold {
            let device = Arc::clone(&self.device);
            let half = Arc::clone(&self.vertex_half);
            self.queue.post(Box::new(move || {
                let mut mapped = half.take_mapping();
                mapped.bytes_mut().copy_from_slice(staging.as_bytes());
                // Give up the staging reference before waking waiters, so
                // the arena is remappable as soon as the half is Ready.
                drop(staging);
                let handle = mapped.handle();
                device.bind_vertex_storage(Some(handle));
                device.flush_and_unmap(mapped);
                device.bind_vertex_storage(None);
                half.transition_notify(BufferState::Unmapped, BufferState::Ready);
            }));
        } else {
            let handle = handle_pool::acquire(&self.device);
            self.vertex_half.set_handle(handle);
            self.device.bind_vertex_storage(Some(handle));
            self.device.create_storage(handle, self.size, self.usage);
            self.device.upload(handle, 0, staging.as_bytes());
            self.device.bind_vertex_storage(None);
            self.vertex_half
                .transition_notify(BufferState::Unmapped, BufferState::Ready);
        }
    }

    /// Hand out the writable index staging slice (`num_indices` entries).
    pub fn map_index_buffer(&mut self) -> &mut [u16] {
        self.index_half
            .transition(BufferState::Empty, BufferState::Mapped);

        let indices_size = self.indices_size;
        let num_indices = self.num_indices as usize;
        let staging = self
            .index_staging
            .get_or_insert_with(|| Arc::new(StagingBuffer::new(indices_size)));
        let staging = Arc::get_mut(staging)
            .expect("index staging still referenced by an in-flight upload");
        &mut bytemuck::cast_slice_mut(staging.as_bytes_mut())[..num_indices]
    }

    /// Push the staged index data to the device. Mirrors
    /// [`unmap_vertex_buffer`](Self::unmap_vertex_buffer).
    pub fn unmap_index_buffer(&mut self) {
        let staging = Arc::clone(
            self.index_staging
                .as_ref()
                .expect("unmapping index data that was never mapped"),
        );
        self.index_half
            .transition(BufferState::Mapped, BufferState::Unmapped);

        if self.indices_size > self.immediate_threshold {
            let device = Arc::clone(&self.device);
            let half = Arc::clone(&self.index_half);
            self.queue.post(Box::new(move || {
                let mut mapped = half.take_mapping();
                mapped.bytes_mut().copy_from_slice(staging.as_bytes());
                drop(staging);
                let handle = mapped.handle();
                device.bind_index_storage(Some(handle));
                device.flush_and_unmap(mapped);
                device.bind_index_storage(None);
                half.transition_notify(BufferState::Unmapped, BufferState::Ready);
            }));
        } else {
            let handle = handle_pool::acquire(&self.device);
            self.index_half.set_handle(handle);
            self.device.bind_index_storage(Some(handle));
            self.device.create_storage(handle, self.indices_size, self.usage);
            self.device.upload(handle, 0, staging.as_bytes());
            self.device.bind_index_storage(None);
            self.index_half
                .transition_notify(BufferState::Unmapped, BufferState::Ready);
        }
    }

    /// Bind the vertex storage, waiting for a pending upload to land first.
    ///
    /// Returns `true` if the device was actually called (the storage was not
    /// already bound).
    pub fn bind_vertex(&self, ctx: &mut BindingContext) -> bool {
        if self.mappable && self.vertex_half.state() != BufferState::Ready {
            self.vertex_half.wait_until_ready();
        }
        let handle = self
            .vertex_half
            .handle()
            .expect("binding a geometry buffer with no vertex storage");
        ctx.bind_vertex(self.device.as_ref(), handle)
    }

    /// Bind the index storage, waiting for a pending upload to land first.
    pub fn bind_index(&self, ctx: &mut BindingContext) -> bool {
        if self.index_half.state() != BufferState::Ready {
            self.index_half.wait_until_ready();
        }
        let handle = self
            .index_half
            .handle()
            .expect("binding a geometry buffer with no index storage");
        ctx.bind_index(self.device.as_ref(), handle)
    }

    /// Prepare the buffer for rendering with the attribute set `mask`.
    ///
    /// Binds both halves (waiting for pending uploads) and, when the bound
    /// storage or enabled attribute set changed, re-describes the attribute
    /// pointers on the device.
    pub fn set_buffer(&self, ctx: &mut BindingContext, mask: AttributeMask) {
        if self.mappable && self.vertex_half.state() != BufferState::Ready {
            self.vertex_half.wait_until_ready();
        }
        let handle = self
            .vertex_half
            .handle()
            .expect("binding a geometry buffer with no vertex storage");

        let setup = mask != ctx.enabled_mask() || ctx.bound_vertex() != Some(handle);
        ctx.bind_vertex(self.device.as_ref(), handle);

        // Only bind indices if storage was requested for this buffer.
        if self.index_half.state() != BufferState::Init {
            self.bind_index(ctx);
        }

        if !mask.is_empty() && setup {
            ctx.sync_enabled_arrays(self.device.as_ref(), mask);
            self.describe_attributes(mask);
        }
    }

    fn describe_attributes(&self, mask: AttributeMask) {
        for ty in VertexAttributeType::STORAGE {
            if mask.has(ty) && self.mask.has(ty) {
                self.device.describe_attribute(
                    ty.index() as u32,
                    ty.component_count(),
                    ty.numeric_type(),
                    ty.is_normalized(),
                    ty.size(),
                    self.layout.offset(ty),
                );
            }
        }

        // With no color array of its own, the emissive array feeds the
        // color attribute slot.
        let emissive = VertexAttributeType::Emissive;
        if mask.has(emissive) && self.mask.has(emissive) && !mask.has(VertexAttributeType::Color) {
            self.device.describe_attribute(
                VertexAttributeType::Color.index() as u32,
                emissive.component_count(),
                emissive.numeric_type(),
                emissive.is_normalized(),
                emissive.size(),
                self.layout.offset(emissive),
            );
        }

        // Texture indices ride in position.w: integer attribute over the
        // position array at +12, with the position stride.
        let tex_index = VertexAttributeType::TextureIndex;
        if mask.has(tex_index) {
            self.device.describe_attribute(
                tex_index.index() as u32,
                tex_index.component_count(),
                tex_index.numeric_type(),
                tex_index.is_normalized(),
                VertexAttributeType::Position.size(),
                self.layout.offset(tex_index),
            );
        }
    }

    fn upload_attribute(&self, ctx: &mut BindingContext, ty: VertexAttributeType, bytes: &[u8]) {
        assert!(
            !self.mappable,
            "direct update on a mappable geometry buffer"
        );
        let handle = self
            .vertex_half
            .handle()
            .expect("direct update on a geometry buffer with no vertex storage");
        ctx.bind_vertex(self.device.as_ref(), handle);
        self.device.upload(handle, self.layout.offset(ty), bytes);
    }

    /// Upload position data directly (non-mappable buffers only).
    pub fn set_position_data(&self, ctx: &mut BindingContext, data: &[[f32; 4]]) {
        let count = self.num_verts as usize;
        self.upload_attribute(
            ctx,
            VertexAttributeType::Position,
            bytemuck::cast_slice(&data[..count]),
        );
    }

    /// Upload texcoord0 data directly (non-mappable buffers only).
    pub fn set_texcoord0_data(&self, ctx: &mut BindingContext, data: &[[f32; 2]]) {
        let count = self.num_verts as usize;
        self.upload_attribute(
            ctx,
            VertexAttributeType::TexCoord0,
            bytemuck::cast_slice(&data[..count]),
        );
    }

    /// Upload color data directly (non-mappable buffers only).
    pub fn set_color_data(&self, ctx: &mut BindingContext, data: &[[u8; 4]]) {
        let count = self.num_verts as usize;
        self.upload_attribute(
            ctx,
            VertexAttributeType::Color,
            bytemuck::cast_slice(&data[..count]),
        );
    }

    /// Draw `count` indices starting at `index_offset`.
    pub fn draw(&self, kind: PrimitiveKind, count: u32, index_offset: u32) {
        self.device.draw_indexed(kind, count, index_offset);
    }

    /// Draw with an explicit vertex range hint.
    pub fn draw_range(
        &self,
        kind: PrimitiveKind,
        start: u32,
        end: u32,
        count: u32,
        index_offset: u32,
    ) {
        self.device
            .draw_range_indexed(kind, start, end, count, index_offset);
    }

    /// Draw `count` unindexed vertices starting at `first`.
    pub fn draw_arrays(&self, kind: PrimitiveKind, first: u32, count: u32) {
        self.device.draw_arrays(kind, first, count);
    }

    /// Whether any vertex storage exists.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether vertex data goes through the staging map/unmap path.
    pub fn is_mappable(&self) -> bool {
        self.mappable
    }

    pub fn vertex_count(&self) -> u32 {
        self.num_verts
    }

    pub fn index_count(&self) -> u32 {
        self.num_indices
    }

    /// The attribute set this buffer stores.
    pub fn type_mask(&self) -> AttributeMask {
        self.mask
    }

    pub fn has_attribute(&self, ty: VertexAttributeType) -> bool {
        self.mask.has(ty)
    }

    /// Vertex storage size in bytes, including the alignment trailer.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Index storage size in bytes, including the alignment pad.
    pub fn indices_size(&self) -> usize {
        self.indices_size
    }

    /// Byte offset of an attribute's region within the vertex storage.
    pub fn offset(&self, ty: VertexAttributeType) -> usize {
        self.layout.offset(ty)
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn vertex_state(&self) -> BufferState {
        self.vertex_half.state()
    }

    pub fn index_state(&self) -> BufferState {
        self.index_half.state()
    }

    /// The vertex storage handle, once one exists.
    pub fn vertex_handle(&self) -> Option<BufferHandle> {
        self.vertex_half.handle()
    }

    /// The index storage handle, once one exists.
    pub fn index_handle(&self) -> Option<BufferHandle> {
        self.index_half.handle()
    }
}

impl Drop for GeometryBuffer {
    fn drop(&mut self) {
        // Settle in-flight work so released handles are never touched by a
        // task after release.
        self.quiesce_vertex();
        self.quiesce_index();
        if let Some(handle) = self.vertex_half.take_handle() {
            handle_pool::release(&self.device, handle);
        }
        if let Some(handle) = self.index_half.take_handle() {
            handle_pool::release(&self.device, handle);
        }
    }
}

static_assertions::assert_impl_all!(GeometryBuffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    const LARGE: usize = 0; // everything goes through the queue
    const SMALL: usize = usize::MAX; // everything uploads inline

    fn make_buffer(
        mask: AttributeMask,
        threshold: usize,
    ) -> (Arc<SoftwareDevice>, Arc<WorkQueue>, GeometryBuffer) {
        let device = Arc::new(SoftwareDevice::new());
        let queue = Arc::new(WorkQueue::new());
        let buffer = GeometryBuffer::new(
            Arc::clone(&device) as Arc<dyn GeometryDevice>,
            Arc::clone(&queue),
            threshold,
            mask,
            BufferUsage::Static,
        );
        (device, queue, buffer)
    }

    #[test]
    fn test_allocate_rejects_oversized_request() {
        let (_, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        let err = buffer.allocate(MAX_VERTEX_COUNT + 1, 0, true).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::AllocationTooLarge { requested, max }
                if requested == MAX_VERTEX_COUNT + 1 && max == MAX_VERTEX_COUNT
        ));

        // The cap itself is fine.
        buffer.allocate(MAX_VERTEX_COUNT, 0, true).unwrap();
        assert_eq!(buffer.vertex_count(), MAX_VERTEX_COUNT);
    }

    #[test]
    fn test_non_mappable_allocation_creates_storage_inline() {
        let (device, queue, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(4, 0, false).unwrap();

        assert!(queue.is_empty());
        assert_eq!(buffer.vertex_state(), BufferState::Empty);
        let handle = buffer.vertex_handle().unwrap();
        // 4 positions * 16 bytes + trailer.
        assert_eq!(device.storage_size(handle), Some(80));
    }

    #[test]
    fn test_small_mappable_uploads_inline_at_unmap() {
        let (device, queue, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(2, 0, true).unwrap();

        // Nothing on the device until unmap.
        assert!(queue.is_empty());
        assert_eq!(buffer.vertex_handle(), None);

        {
            let views = buffer.map_vertex_buffer();
            let position = views.position.unwrap();
            position[0] = [1.0, 2.0, 3.0, 4.0];
            position[1] = [5.0, 6.0, 7.0, 8.0];
        }
        buffer.unmap_vertex_buffer();

        assert_eq!(buffer.vertex_state(), BufferState::Ready);
        let handle = buffer.vertex_handle().unwrap();
        let bytes = device.read_storage(handle, 0, 32);
        let values: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_large_mappable_uploads_through_queue() {
        let (device, queue, mut buffer) = make_buffer(AttributeMask::POSITION, LARGE);
        buffer.allocate(2, 0, true).unwrap();

        // Allocation posted the create-and-map task.
        assert_eq!(queue.len(), 1);

        {
            let views = buffer.map_vertex_buffer();
            views.position.unwrap()[1] = [9.0, 9.0, 9.0, 9.0];
        }
        buffer.unmap_vertex_buffer();
        assert_eq!(buffer.vertex_state(), BufferState::Unmapped);
        assert_eq!(queue.len(), 2);

        // Drive both tasks on this thread; FIFO order publishes the mapping
        // before the copy task waits on it.
        assert!(queue.run_pending());
        assert_eq!(buffer.vertex_state(), BufferState::Ready);

        let handle = buffer.vertex_handle().unwrap();
        let bytes = device.read_storage(handle, 16, 16);
        let values: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, &[9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn test_index_roundtrip() {
        let (device, queue, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(3, 3, true).unwrap();
        // 3 indices * 2 bytes + pad.
        assert_eq!(buffer.indices_size(), 22);

        {
            let indices = buffer.map_index_buffer();
            indices.copy_from_slice(&[2, 0, 1]);
        }
        buffer.unmap_index_buffer();
        assert_eq!(buffer.index_state(), BufferState::Ready);
        assert!(queue.is_empty());

        let handle = buffer.index_handle().unwrap();
        let bytes = device.read_storage(handle, 0, 6);
        let values: &[u16] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, &[2, 0, 1]);
    }

    #[test]
    fn test_zero_index_allocation_requests_no_storage() {
        let (_, queue, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(4, 0, true).unwrap();
        assert_eq!(buffer.index_state(), BufferState::Init);
        assert_eq!(buffer.indices_size(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_vertex_resize_hysteresis() {
        let (_, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(100, 0, false).unwrap();
        let first = buffer.vertex_handle().unwrap();

        // Within (50%, 100%] of the current size: storage is kept.
        buffer.update_vertex_count(60);
        assert_eq!(buffer.vertex_handle().unwrap(), first);
        assert_eq!(buffer.vertex_count(), 60);

        // Growing past the current size recreates.
        buffer.update_vertex_count(200);
        let second = buffer.vertex_handle().unwrap();
        assert_ne!(second, first);

        // Shrinking to half or less recreates.
        buffer.update_vertex_count(10);
        assert_ne!(buffer.vertex_handle().unwrap(), second);
    }

    #[test]
    #[should_panic(expected = "illegal geometry buffer transition")]
    fn test_double_map_panics() {
        let (_, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(4, 0, true).unwrap();
        let _ = buffer.map_vertex_buffer();
        let _ = buffer.map_vertex_buffer();
    }

    #[test]
    #[should_panic(expected = "mapping a geometry buffer created for direct updates")]
    fn test_mapping_non_mappable_panics() {
        let (_, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(4, 0, false).unwrap();
        let _ = buffer.map_vertex_buffer();
    }

    #[test]
    fn test_direct_setters_upload_in_place() {
        let mask = AttributeMask::POSITION | AttributeMask::TEXCOORD0;
        let (device, _, mut buffer) = make_buffer(mask, SMALL);
        buffer.allocate(2, 0, false).unwrap();
        let mut ctx = BindingContext::new();

        buffer.set_position_data(
            &mut ctx,
            &[[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
        );
        buffer.set_texcoord0_data(&mut ctx, &[[0.5, 0.5], [0.25, 0.75]]);

        let handle = buffer.vertex_handle().unwrap();
        let tc_offset = buffer.offset(VertexAttributeType::TexCoord0);
        let bytes = device.read_storage(handle, tc_offset, 16);
        let values: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, &[0.5, 0.5, 0.25, 0.75]);
    }

    #[test]
    fn test_set_buffer_skips_setup_when_state_matches() {
        let (device, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(3, 3, true).unwrap();
        {
            let _ = buffer.map_vertex_buffer();
        }
        buffer.unmap_vertex_buffer();
        {
            let indices = buffer.map_index_buffer();
            indices.copy_from_slice(&[0, 1, 2]);
        }
        buffer.unmap_index_buffer();

        let mut ctx = BindingContext::new();
        buffer.set_buffer(&mut ctx, AttributeMask::POSITION);
        let described = device.stats().attributes_described;
        assert_eq!(described, 1);

        // Same buffer, same mask: no re-description.
        buffer.set_buffer(&mut ctx, AttributeMask::POSITION);
        assert_eq!(device.stats().attributes_described, described);
    }

    #[test]
    fn test_emissive_feeds_color_slot() {
        let mask = AttributeMask::POSITION | AttributeMask::EMISSIVE;
        let (device, _, mut buffer) = make_buffer(mask, SMALL);
        buffer.allocate(3, 0, true).unwrap();
        {
            let _ = buffer.map_vertex_buffer();
        }
        buffer.unmap_vertex_buffer();

        let mut ctx = BindingContext::new();
        buffer.set_buffer(&mut ctx, mask);
        // Position, emissive, and the extra emissive-as-color description.
        assert_eq!(device.stats().attributes_described, 3);
    }

    #[test]
    fn test_drop_releases_storages() {
        let (device, _, mut buffer) = make_buffer(AttributeMask::POSITION, SMALL);
        buffer.allocate(4, 6, true).unwrap();
        {
            let _ = buffer.map_vertex_buffer();
        }
        buffer.unmap_vertex_buffer();
        {
            let indices = buffer.map_index_buffer();
            indices.copy_from_slice(&[0, 1, 2, 2, 1, 0]);
        }
        buffer.unmap_index_buffer();
        assert_eq!(device.storage_count(), 2);

        drop(buffer);
        assert_eq!(device.storage_count(), 0);
    }
}
