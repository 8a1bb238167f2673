//! Buffer layout computation.
//!
//! A geometry buffer stores each present attribute as its own planar array;
//! the layout assigns every array a byte offset in attribute-type order.
//! Offsets are 16-byte aligned so the staging copy and the GPU upload can use
//! aligned wide moves, and the total size carries a 16-byte trailer so those
//! moves may overrun the logical end of the last array.

use crate::attributes::{AttributeMask, VertexAttributeType};

fn align16(value: usize) -> usize {
    (value + 0xF) & !0xF
}

/// Byte offsets and total size for one attribute mask / vertex count pair.
///
/// Computed once per allocation by [`compute_layout`]; pure and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    offsets: [usize; VertexAttributeType::COUNT],
    size: usize,
}

impl BufferLayout {
    /// A layout with no storage (all offsets zero).
    pub fn empty() -> Self {
        Self {
            offsets: [0; VertexAttributeType::COUNT],
            size: 0,
        }
    }

    /// Byte offset of the given attribute's region.
    ///
    /// For [`VertexAttributeType::TextureIndex`] this is the position
    /// offset + 12, whether or not the mask carried the texture index.
    pub fn offset(&self, ty: VertexAttributeType) -> usize {
        self.offsets[ty.index()]
    }

    /// Total byte size of the vertex region, including the 16-byte trailer.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Compute the per-attribute offsets and total byte size for a buffer.
///
/// Each present storage attribute gets the next offset; the running offset
/// advances by `per_vertex_size * vertex_count` and is then rounded up to a
/// multiple of 16. The texture-index attribute aliases the last 4 bytes of
/// the position slot and contributes no storage.
pub fn compute_layout(mask: AttributeMask, vertex_count: u32) -> BufferLayout {
    let mut offsets = [0usize; VertexAttributeType::COUNT];
    let mut offset = 0usize;

    for ty in VertexAttributeType::STORAGE {
        if mask.has(ty) {
            offsets[ty.index()] = offset;
            offset = align16(offset + ty.size() * vertex_count as usize);
        }
    }

    offsets[VertexAttributeType::TextureIndex.index()] =
        offsets[VertexAttributeType::Position.index()] + 12;

    BufferLayout {
        offsets,
        size: offset + 16,
    }
}

/// Sum of the fixed per-attribute sizes for every storage type in the mask.
pub fn compute_vertex_stride(mask: AttributeMask) -> usize {
    VertexAttributeType::STORAGE
        .iter()
        .filter(|ty| mask.has(**ty))
        .map(|ty| ty.size())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_storage_masks() -> impl Iterator<Item = AttributeMask> {
        // Every combination over a representative subset plus the full mask.
        let interesting = [
            AttributeMask::POSITION,
            AttributeMask::POSITION | AttributeMask::TEXCOORD0,
            AttributeMask::POSITION | AttributeMask::NORMAL | AttributeMask::TEXCOORD0,
            AttributeMask::POSITION | AttributeMask::COLOR,
            AttributeMask::POSITION | AttributeMask::EMISSIVE,
            AttributeMask::POSITION | AttributeMask::WEIGHT,
            AttributeMask::all(),
        ];
        interesting.into_iter()
    }

    #[test]
    fn test_offsets_are_sixteen_byte_aligned_and_increasing() {
        for mask in all_storage_masks() {
            for count in [0u32, 1, 3, 4, 255, 65536] {
                let layout = compute_layout(mask, count);
                let mut last = None;
                for ty in VertexAttributeType::STORAGE {
                    if !mask.has(ty) {
                        continue;
                    }
                    let offset = layout.offset(ty);
                    assert_eq!(offset % 16, 0, "{ty:?} offset {offset} not aligned");
                    if count > 0 {
                        if let Some(prev) = last {
                            assert!(offset > prev, "{ty:?} offset not increasing");
                        }
                    }
                    last = Some(offset);
                }
            }
        }
    }

    #[test]
    fn test_texture_index_aliases_position() {
        for mask in all_storage_masks() {
            let layout = compute_layout(mask, 100);
            assert_eq!(
                layout.offset(VertexAttributeType::TextureIndex),
                layout.offset(VertexAttributeType::Position) + 12
            );
        }
        // Holds whether or not the mask carries the texture index itself.
        let without = compute_layout(AttributeMask::POSITION, 8);
        let with = compute_layout(
            AttributeMask::POSITION | AttributeMask::TEXTURE_INDEX,
            8,
        );
        assert_eq!(
            without.offset(VertexAttributeType::TextureIndex),
            with.offset(VertexAttributeType::TextureIndex)
        );
    }

    #[test]
    fn test_layout_is_idempotent() {
        let mask = AttributeMask::POSITION | AttributeMask::NORMAL | AttributeMask::COLOR;
        assert_eq!(compute_layout(mask, 77), compute_layout(mask, 77));
    }

    #[test]
    fn test_total_size_has_trailer() {
        let layout = compute_layout(AttributeMask::POSITION, 4);
        // 4 positions * 16 bytes, already aligned, plus the 16-byte trailer.
        assert_eq!(layout.size(), 64 + 16);

        // Empty mask still reports the trailer.
        let layout = compute_layout(AttributeMask::empty(), 0);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn test_texture_index_contributes_no_storage() {
        let base = compute_layout(AttributeMask::POSITION | AttributeMask::NORMAL, 16);
        let with_index = compute_layout(
            AttributeMask::POSITION | AttributeMask::NORMAL | AttributeMask::TEXTURE_INDEX,
            16,
        );
        assert_eq!(base.size(), with_index.size());
    }

    #[test]
    fn test_vertex_stride() {
        assert_eq!(compute_vertex_stride(AttributeMask::POSITION), 16);
        assert_eq!(
            compute_vertex_stride(AttributeMask::POSITION | AttributeMask::TEXCOORD0),
            24
        );
        assert_eq!(
            compute_vertex_stride(
                AttributeMask::POSITION | AttributeMask::COLOR | AttributeMask::WEIGHT
            ),
            24
        );
        // The texture index adds nothing to the stride.
        assert_eq!(
            compute_vertex_stride(AttributeMask::POSITION | AttributeMask::TEXTURE_INDEX),
            16
        );
    }
}
