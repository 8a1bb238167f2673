//! Geometry device abstraction layer.
//!
//! [`GeometryDevice`] is the small contract the buffer manager consumes:
//! handle generation, storage creation and upload, write mapping, attribute
//! description, and draw submission. A real backend (GL, Vulkan, wgpu) sits
//! behind this trait; the crate ships [`SoftwareDevice`](software::SoftwareDevice),
//! an in-memory readback-capable implementation used for testing and
//! development.
//!
//! Storage operations are addressed by [`BufferHandle`]; the bind calls
//! exist to mirror device APIs that require bound state and are advisory
//! from this trait's point of view. All GPU bind/draw calls are expected to
//! originate on the rendering thread — the upload worker only creates, maps,
//! fills, and unmaps storage.

pub mod software;

/// Opaque handle to one GPU buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Component numeric type for attribute description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    /// 32-bit float components.
    Float,
    /// 8-bit unsigned integer components.
    UnsignedByte,
    /// 32-bit unsigned integer components (read as integers, never normalized).
    UnsignedInt,
}

/// Primitive topology for draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Usage hint for storage creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    #[default]
    Static,
    /// Rewritten occasionally.
    Dynamic,
    /// Rewritten every frame.
    Stream,
}

/// A write mapping of a storage range, obtained from
/// [`GeometryDevice::map_for_write`].
///
/// The contents become visible in the storage only once the mapping is
/// handed back through [`GeometryDevice::flush_and_unmap`]. Dropping a
/// `MappedWrite` without unmapping discards the written bytes.
pub struct MappedWrite {
    handle: BufferHandle,
    offset: usize,
    bytes: Box<[u8]>,
}

impl MappedWrite {
    /// Create a zero-filled mapping (called by device implementations).
    pub fn new(handle: BufferHandle, offset: usize, size: usize) -> Self {
        Self {
            handle,
            offset,
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// The storage this mapping writes into.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Byte offset of the mapped range within the storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the mapped range in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the mapped range is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The writable bytes of the mapped range.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The bytes of the mapped range (used by devices on unmap).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MappedWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWrite")
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Device contract consumed by the geometry buffer manager.
pub trait GeometryDevice: Send + Sync + 'static {
    /// Get the device name.
    fn name(&self) -> &'static str;

    /// Generate `count` fresh buffer handles in one call.
    ///
    /// Batched so the handle pool can amortize the per-call overhead.
    fn gen_handles(&self, count: usize) -> Vec<BufferHandle>;

    /// Size (or resize) the storage behind a handle. Contents are undefined.
    fn create_storage(&self, handle: BufferHandle, size: usize, usage: BufferUsage);

    /// Destroy the storage and retire the handle.
    fn destroy_storage(&self, handle: BufferHandle);

    /// Bind (`Some`) or unbind (`None`) a handle to the vertex slot.
    fn bind_vertex_storage(&self, handle: Option<BufferHandle>);

    /// Bind (`Some`) or unbind (`None`) a handle to the index slot.
    fn bind_index_storage(&self, handle: Option<BufferHandle>);

    /// Write `data` into the storage at `offset`.
    fn upload(&self, handle: BufferHandle, offset: usize, data: &[u8]);

    /// Obtain an explicit-flush write mapping of a storage range.
    fn map_for_write(&self, handle: BufferHandle, offset: usize, size: usize) -> MappedWrite;

    /// Flush a write mapping into its storage and release it.
    fn flush_and_unmap(&self, mapped: MappedWrite);

    /// Describe one vertex attribute of the currently bound vertex storage.
    fn describe_attribute(
        &self,
        location: u32,
        components: u32,
        ty: NumericType,
        normalized: bool,
        stride: usize,
        offset: usize,
    );

    /// Enable an attribute-array slot.
    fn enable_attribute(&self, location: u32);

    /// Disable an attribute-array slot.
    fn disable_attribute(&self, location: u32);

    /// Draw `count` indices of the bound buffers starting at `index_offset`.
    fn draw_indexed(&self, kind: PrimitiveKind, count: u32, index_offset: u32);

    /// Draw with an explicit vertex range hint.
    fn draw_range_indexed(
        &self,
        kind: PrimitiveKind,
        start: u32,
        end: u32,
        count: u32,
        index_offset: u32,
    );

    /// Draw `count` unindexed vertices starting at `first`.
    fn draw_arrays(&self, kind: PrimitiveKind, first: u32, count: u32);

    /// Read a storage range back.
    ///
    /// A real backend would block until the GPU is done; the buffer manager
    /// only uses this for diagnostics and tests.
    fn read_storage(&self, handle: BufferHandle, offset: usize, size: usize) -> Vec<u8>;
}
