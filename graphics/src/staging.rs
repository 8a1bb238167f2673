//! Host-side staging memory and typed mapped views.
//!
//! Mapping a geometry buffer hands the caller writable slices over a
//! [`StagingBuffer`], a 16-byte-aligned byte arena laid out exactly like the
//! GPU storage. The upload worker later copies the whole arena into the
//! device mapping in one pass.
//!
//! Staging memory is shared with in-flight uploads through `Arc`; the arena
//! stays alive until the last upload referencing it finishes, then frees on
//! the thread that drops the final reference.

use crate::attributes::{AttributeMask, VertexAttributeType};
use crate::layout::BufferLayout;

/// One aligned chunk of staging memory. Plain bytes.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Block([u8; 16]);

/// 16-byte-aligned byte arena mirroring a GPU storage.
pub struct StagingBuffer {
    blocks: Vec<Block>,
    len: usize,
}

impl StagingBuffer {
    /// Allocate a zeroed arena of at least `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            blocks: vec![Block([0u8; 16]); len.div_ceil(16)],
            len,
        }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The arena contents.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: Block is repr(C) over [u8; 16] with no padding, and len
        // never exceeds blocks.len() * 16.
        unsafe { std::slice::from_raw_parts(self.blocks.as_ptr().cast::<u8>(), self.len) }
    }

    /// The arena contents, writable.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for as_bytes; the mutable borrow of self is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.blocks.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// Writable per-attribute views over a mapped vertex region.
///
/// Each present attribute gets a typed slice of `vertex_count` elements.
/// There is no texture-index view; texture indices live in the fourth
/// component of `position`.
#[derive(Default)]
pub struct MappedVertexData<'a> {
    pub position: Option<&'a mut [[f32; 4]]>,
    pub normal: Option<&'a mut [[f32; 4]]>,
    pub texcoord0: Option<&'a mut [[f32; 2]]>,
    pub texcoord1: Option<&'a mut [[f32; 2]]>,
    pub texcoord2: Option<&'a mut [[f32; 2]]>,
    pub texcoord3: Option<&'a mut [[f32; 2]]>,
    pub color: Option<&'a mut [[u8; 4]]>,
    pub emissive: Option<&'a mut [[u8; 4]]>,
    pub tangent: Option<&'a mut [[f32; 4]]>,
    pub weight: Option<&'a mut [f32]>,
    pub weight4: Option<&'a mut [[f32; 4]]>,
}

/// Split a staging arena into typed attribute views per the layout.
///
/// Offsets are 16-byte aligned and region lengths are exact multiples of the
/// element size, so the casts cannot fail.
pub(crate) fn map_views<'a>(
    bytes: &'a mut [u8],
    mask: AttributeMask,
    layout: &BufferLayout,
    vertex_count: u32,
) -> MappedVertexData<'a> {
    let mut views = MappedVertexData::default();
    let mut rest = bytes;
    let mut consumed = 0usize;

    for ty in VertexAttributeType::STORAGE {
        if !mask.has(ty) {
            continue;
        }
        let offset = layout.offset(ty);
        let region_len = ty.size() * vertex_count as usize;

        let tail = std::mem::take(&mut rest);
        let (_gap, tail) = tail.split_at_mut(offset - consumed);
        let (region, tail) = tail.split_at_mut(region_len);
        rest = tail;
        consumed = offset + region_len;

        match ty {
            VertexAttributeType::Position => views.position = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::Normal => views.normal = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::TexCoord0 => {
                views.texcoord0 = Some(bytemuck::cast_slice_mut(region))
            }
            VertexAttributeType::TexCoord1 => {
                views.texcoord1 = Some(bytemuck::cast_slice_mut(region))
            }
            VertexAttributeType::TexCoord2 => {
                views.texcoord2 = Some(bytemuck::cast_slice_mut(region))
            }
            VertexAttributeType::TexCoord3 => {
                views.texcoord3 = Some(bytemuck::cast_slice_mut(region))
            }
            VertexAttributeType::Color => views.color = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::Emissive => {
                views.emissive = Some(bytemuck::cast_slice_mut(region))
            }
            VertexAttributeType::Tangent => views.tangent = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::Weight => views.weight = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::Weight4 => views.weight4 = Some(bytemuck::cast_slice_mut(region)),
            VertexAttributeType::TextureIndex => {}
        }
    }

    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::compute_layout;

    #[test]
    fn test_staging_buffer_is_aligned_and_zeroed() {
        let staging = StagingBuffer::new(100);
        assert_eq!(staging.len(), 100);
        assert_eq!(staging.as_bytes().as_ptr() as usize % 16, 0);
        assert!(staging.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_staging_buffer_writes_persist() {
        let mut staging = StagingBuffer::new(20);
        staging.as_bytes_mut()[19] = 0x7F;
        assert_eq!(staging.as_bytes()[19], 0x7F);
    }

    #[test]
    fn test_map_views_matches_mask() {
        let mask = AttributeMask::POSITION | AttributeMask::TEXCOORD0 | AttributeMask::COLOR;
        let layout = compute_layout(mask, 5);
        let mut staging = StagingBuffer::new(layout.size());

        let views = map_views(staging.as_bytes_mut(), mask, &layout, 5);
        assert_eq!(views.position.map(|p| p.len()), Some(5));
        assert_eq!(views.texcoord0.map(|t| t.len()), Some(5));
        assert_eq!(views.color.map(|c| c.len()), Some(5));
        assert!(views.normal.is_none());
        assert!(views.weight.is_none());
    }

    #[test]
    fn test_map_views_land_at_layout_offsets() {
        let mask = AttributeMask::POSITION | AttributeMask::NORMAL;
        let layout = compute_layout(mask, 3);
        let mut staging = StagingBuffer::new(layout.size());

        {
            let views = map_views(staging.as_bytes_mut(), mask, &layout, 3);
            views.position.unwrap()[0] = [1.0, 2.0, 3.0, 4.0];
            views.normal.unwrap()[2] = [0.0, 1.0, 0.0, 0.0];
        }

        let bytes = staging.as_bytes();
        let pos_off = layout.offset(VertexAttributeType::Position);
        let norm_off = layout.offset(VertexAttributeType::Normal);
        let first_pos: [f32; 4] = *bytemuck::from_bytes(&bytes[pos_off..pos_off + 16]);
        assert_eq!(first_pos, [1.0, 2.0, 3.0, 4.0]);
        let last_norm: [f32; 4] = *bytemuck::from_bytes(&bytes[norm_off + 32..norm_off + 48]);
        assert_eq!(last_norm, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_map_views_zero_vertices() {
        let mask = AttributeMask::POSITION;
        let layout = compute_layout(mask, 0);
        let mut staging = StagingBuffer::new(layout.size());

        let views = map_views(staging.as_bytes_mut(), mask, &layout, 0);
        assert_eq!(views.position.map(|p| p.len()), Some(0));
    }
}
