// Vertex formats and in-memory meshes
//
// Meshes are plain vertex + u32 index vectors; upload packs them into one
// GeometryBuffer (vertices first, indices right after).

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use std::mem::{offset_of, size_of};

use super::buffer::{self, GeometryBuffer};
use super::VulkanDevice;

/// Vertex layout described to the input assembler
pub trait Vertex: Pod {
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    }
}

/// Position + texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub pos: Vec3,
    pub uv: Vec2,
}

impl TexturedVertex {
    /// From Y-up model space with a top-left texture origin: Y and Z swap, V flips
    pub fn from_model(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            pos: Vec3::new(position[0], position[2], position[1]),
            uv: Vec2::new(uv[0], 1.0 - uv[1]),
        }
    }
}

impl Vertex for TexturedVertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(TexturedVertex, pos)),
            attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(TexturedVertex, uv)),
        ]
    }
}

/// Position, normal and texture coordinate, each padded to a vec4 so the
/// same buffer can be read as an SSBO
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PbrVertex {
    pub pos: Vec4,
    pub normal: Vec4,
    pub uv: Vec4,
}

impl PbrVertex {
    pub fn from_model(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            pos: Vec3::from(position).extend(1.0),
            normal: Vec3::from(normal).extend(0.0),
            uv: Vec4::new(uv[0], 1.0 - uv[1], 0.0, 0.0),
        }
    }
}

impl Vertex for PbrVertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32A32_SFLOAT, offset_of!(PbrVertex, pos)),
            attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(PbrVertex, normal)),
            attribute(2, vk::Format::R32G32B32A32_SFLOAT, offset_of!(PbrVertex, uv)),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData<V> {
    pub vertices: Vec<V>,
    pub indices: Vec<u32>,
}

impl<V: Vertex> MeshData<V> {
    pub fn new(vertices: Vec<V>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Flatten triangle faces into the index list
    pub fn from_triangles(vertices: Vec<V>, faces: &[[u32; 3]]) -> Self {
        Self {
            vertices,
            indices: faces.iter().flatten().copied().collect(),
        }
    }

    pub fn vertex_bytes(&self) -> usize {
        self.vertices.len() * size_of::<V>()
    }

    pub fn index_bytes(&self) -> usize {
        self.indices.len() * size_of::<u32>()
    }

    /// Indices that point past the vertex list
    pub fn validate(&self) -> Result<()> {
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            anyhow::bail!(
                "Index {} out of range for a mesh with {} vertices",
                bad,
                self.vertices.len()
            );
        }
        Ok(())
    }

    pub fn upload(&self, device: &VulkanDevice) -> Result<GeometryBuffer> {
        self.validate()?;
        buffer::allocate_vertex_buffer(
            device,
            bytemuck::cast_slice(&self.vertices),
            bytemuck::cast_slice(&self.indices),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textured_vertex_swaps_y_and_z() {
        let v = TexturedVertex::from_model([1.0, 2.0, 3.0], [0.25, 0.75]);
        assert_eq!(v.pos, Vec3::new(1.0, 3.0, 2.0));
        assert_eq!(v.uv, Vec2::new(0.25, 0.25));
    }

    #[test]
    fn pbr_vertex_keeps_position_and_sets_w() {
        let v = PbrVertex::from_model([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.0]);
        assert_eq!(v.pos, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(v.normal, Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(v.uv, Vec4::new(0.5, 1.0, 0.0, 0.0));
    }

    #[test]
    fn vertex_layouts() {
        assert_eq!(size_of::<TexturedVertex>(), 20);
        assert_eq!(TexturedVertex::binding_description().stride, 20);
        let attrs = TexturedVertex::attribute_descriptions();
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[1].format, vk::Format::R32G32_SFLOAT);

        assert_eq!(size_of::<PbrVertex>(), 48);
        let attrs = PbrVertex::attribute_descriptions();
        let offsets: Vec<_> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32]);
    }

    #[test]
    fn triangles_flatten_in_order() {
        let vertices = vec![TexturedVertex::zeroed(); 4];
        let mesh = MeshData::from_triangles(vertices, &[[0, 1, 2], [2, 3, 0]]);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(mesh.vertex_bytes(), 80);
        assert_eq!(mesh.index_bytes(), 24);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mesh = MeshData::new(vec![PbrVertex::zeroed(); 3], vec![0, 1, 3]);
        assert!(mesh.validate().is_err());
    }
}
