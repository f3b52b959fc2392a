//! Vertex formats and the growable stream buffer the compositor writes into.

use bytemuck::{Pod, Zeroable};
use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

/// Vertex of a textured quad, position in surface pixels.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Premultiplied tint.
    pub color: [f32; 4],
}

impl QuadVertex {
    pub fn desc() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: 8,
                    shader_location: 1,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: 16,
                    shader_location: 2,
                    format: VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Vertex of a flat-colored primitive, position in surface pixels.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PrimitiveVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

impl PrimitiveVertex {
    pub fn desc() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<PrimitiveVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: 8,
                    shader_location: 1,
                    format: VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// A flat vertex buffer that doubles its capacity when full.
///
/// Storage is allocated up front to `capacity` vertices; growing keeps
/// everything already written. `reset` only rewinds the write cursor.
pub struct VertexStream<V: Pod> {
    data: Vec<V>,
    len: usize,
}

impl<V: Pod> VertexStream<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![V::zeroed(); capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whether `count` more vertices fit without growing.
    pub fn has_room(&self, count: usize) -> bool {
        self.len + count <= self.data.len()
    }

    fn grow(&mut self) {
        let capacity = self.data.len() * 2;
        log::debug!("Vertex stream grows to {} vertices", capacity);
        self.data.resize(capacity, V::zeroed());
    }

    pub fn push(&mut self, vertex: V) {
        while !self.has_room(1) {
            self.grow();
        }
        self.data[self.len] = vertex;
        self.len += 1;
    }

    /// The written prefix.
    pub fn vertices(&self) -> &[V] {
        &self.data[..self.len]
    }

    /// The written prefix as raw bytes, ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.vertices())
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }
}

/// Largest quad count whose vertices a `u16` index can address.
pub const MAX_INDEXED_QUADS: usize = (u16::MAX as usize + 1) / 4;

/// Index list for `quads` quads: `[0, 1, 2, 2, 1, 3]` offset by 4 per quad.
///
/// Counts past [`MAX_INDEXED_QUADS`] are cut off there instead of wrapping.
pub fn build_quad_indices(quads: usize) -> Vec<u16> {
    (0..quads.min(MAX_INDEXED_QUADS))
        .flat_map(|quad| {
            let base = (quad * 4) as u16;
            [base, base + 1, base + 2, base + 2, base + 1, base + 3]
        })
        .collect()
}
