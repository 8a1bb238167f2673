//! Vertex attribute types and attribute masks.
//!
//! A [`GeometryBuffer`](crate::buffer::GeometryBuffer) stores its vertex
//! components as planar arrays, one region per attribute type, selected by an
//! [`AttributeMask`]. The set of types mirrors what the rendering pipeline's
//! shaders consume.
//!
//! [`VertexAttributeType::TextureIndex`] is special: it contributes no
//! storage of its own. It aliases the fourth component of the position
//! attribute (positions are stored as 16-byte vectors with `w` unused by the
//! position itself).

use crate::device::NumericType;

/// Semantic type of a vertex attribute.
///
/// The discriminant doubles as the shader attribute location and as the
/// index into a layout's offset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum VertexAttributeType {
    /// Vertex position (float3 in a 16-byte slot; `w` carries the texture index).
    Position = 0,
    /// Vertex normal (float3 in a 16-byte slot).
    Normal = 1,
    /// Texture coordinates set 0 (float2).
    TexCoord0 = 2,
    /// Texture coordinates set 1 (float2).
    TexCoord1 = 3,
    /// Texture coordinates set 2 (float2).
    TexCoord2 = 4,
    /// Texture coordinates set 3 (float2).
    TexCoord3 = 5,
    /// Vertex color (unorm8x4).
    Color = 6,
    /// Emissive color (unorm8x4; only alpha is used currently).
    Emissive = 7,
    /// Tangent (float4).
    Tangent = 8,
    /// Single skinning weight (float).
    Weight = 9,
    /// Four skinning weights (float4).
    Weight4 = 10,
    /// Texture index; aliases position.w and contributes no storage.
    TextureIndex = 11,
}

impl VertexAttributeType {
    /// Total number of attribute types.
    pub const COUNT: usize = 12;

    /// All attribute types, in location order.
    pub const ALL: [VertexAttributeType; Self::COUNT] = [
        Self::Position,
        Self::Normal,
        Self::TexCoord0,
        Self::TexCoord1,
        Self::TexCoord2,
        Self::TexCoord3,
        Self::Color,
        Self::Emissive,
        Self::Tangent,
        Self::Weight,
        Self::Weight4,
        Self::TextureIndex,
    ];

    /// The types that occupy their own storage region, in layout order.
    ///
    /// Everything below the texture-index marker.
    pub const STORAGE: [VertexAttributeType; Self::COUNT - 1] = [
        Self::Position,
        Self::Normal,
        Self::TexCoord0,
        Self::TexCoord1,
        Self::TexCoord2,
        Self::TexCoord3,
        Self::Color,
        Self::Emissive,
        Self::Tangent,
        Self::Weight,
        Self::Weight4,
    ];

    /// Attribute location / offset-table index for this type.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Per-vertex size in bytes.
    ///
    /// NOTE: each component must be AT LEAST 4 bytes in size to avoid a
    /// performance penalty on AMD hardware. `TextureIndex` reports the
    /// position slot's size since it reads from that slot.
    pub fn size(self) -> usize {
        match self {
            Self::Position | Self::Normal | Self::Tangent | Self::Weight4 => 16,
            Self::TexCoord0 | Self::TexCoord1 | Self::TexCoord2 | Self::TexCoord3 => 8,
            Self::Color | Self::Emissive => 4,
            Self::Weight => 4,
            Self::TextureIndex => 16,
        }
    }

    /// Number of components handed to the device when describing this type.
    pub fn component_count(self) -> u32 {
        match self {
            Self::Position | Self::Normal => 3,
            Self::TexCoord0 | Self::TexCoord1 | Self::TexCoord2 | Self::TexCoord3 => 2,
            Self::Color | Self::Emissive | Self::Tangent | Self::Weight4 => 4,
            Self::Weight | Self::TextureIndex => 1,
        }
    }

    /// Component numeric type for device attribute description.
    pub fn numeric_type(self) -> NumericType {
        match self {
            Self::Color | Self::Emissive => NumericType::UnsignedByte,
            Self::TextureIndex => NumericType::UnsignedInt,
            _ => NumericType::Float,
        }
    }

    /// Whether integer components are normalized to `[0, 1]` on read.
    pub fn is_normalized(self) -> bool {
        matches!(self, Self::Color | Self::Emissive)
    }

    /// The single-bit mask for this type.
    pub fn mask(self) -> AttributeMask {
        AttributeMask::from_bits_truncate(1 << self.index())
    }
}

bitflags::bitflags! {
    /// Bitset selecting which vertex components a buffer carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttributeMask: u32 {
        const POSITION = 1 << 0;
        const NORMAL = 1 << 1;
        const TEXCOORD0 = 1 << 2;
        const TEXCOORD1 = 1 << 3;
        const TEXCOORD2 = 1 << 4;
        const TEXCOORD3 = 1 << 5;
        const COLOR = 1 << 6;
        const EMISSIVE = 1 << 7;
        const TANGENT = 1 << 8;
        const WEIGHT = 1 << 9;
        const WEIGHT4 = 1 << 10;
        const TEXTURE_INDEX = 1 << 11;
    }
}

impl AttributeMask {
    /// Whether the mask selects the given attribute type.
    pub fn has(self, ty: VertexAttributeType) -> bool {
        self.contains(ty.mask())
    }
}
