use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{RenderError, Result};
use crate::gpu::{BufferUsage, CopyPass, GpuBackend};
use crate::ids::{MaterialId, MeshId, TextureId};
use crate::renderer::item_buffer::{ItemBuffer, ItemUpdate};

pub const MESH_MAX_LOD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshLod {
    /// Camera distance up to which this LOD is chosen.
    pub render_distance: f32,
    pub vertex_offset: u32,
    pub first_index: u32,
    pub num_indices: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// LOD 0 first; at most [`MESH_MAX_LOD`] entries are used.
    pub lods: Vec<MeshLod>,
    pub cull_volume: Option<Aabb>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshLodPayload {
    pub is_valid: u32,
    pub render_distance: f32,
    pub vertex_offset: u32,
    pub num_indices: u32,
    pub first_index: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshPayload {
    pub cull_volume_min: [f32; 4],
    pub cull_volume_max: [f32; 4],
    pub has_cull_volume: u32,
    pub num_lods: u32,
    pub _pad0: [u32; 2],
    pub lods: [MeshLodPayload; MESH_MAX_LOD],
    pub _pad1: u32,
}

impl Mesh {
    fn payload(&self) -> MeshPayload {
        let mut payload = MeshPayload::default();

        if let Some(volume) = self.cull_volume {
            payload.has_cull_volume = 1;
            payload.cull_volume_min = volume.min.extend(1.0).to_array();
            payload.cull_volume_max = volume.max.extend(1.0).to_array();
        }

        for (slot, lod) in payload.lods.iter_mut().zip(self.lods.iter()) {
            *slot = MeshLodPayload {
                is_valid: 1,
                render_distance: lod.render_distance,
                vertex_offset: lod.vertex_offset,
                num_indices: lod.num_indices,
                first_index: lod.first_index,
            };
            payload.num_lods += 1;
        }

        payload
    }

    /// Unit quad centred on the origin in the XY plane.
    pub fn sprite_quad() -> Self {
        Self {
            lods: vec![MeshLod {
                render_distance: f32::MAX,
                vertex_offset: 0,
                first_index: 0,
                num_indices: 6,
            }],
            cull_volume: Some(Aabb {
                min: Vec3::new(-0.5, -0.5, 0.0),
                max: Vec3::new(0.5, 0.5, 0.0),
            }),
        }
    }
}

/// Mesh registry mirrored into the `i_meshPayloads` buffer the cull and draw programs read.
#[derive(Debug)]
pub struct Meshes {
    meshes: HashMap<MeshId, Mesh>,
    payloads: ItemBuffer<MeshPayload>,
    sprite_mesh_id: MeshId,
}

impl Meshes {
    pub fn create(gpu: &mut dyn GpuBackend) -> Result<Self> {
        let payloads = ItemBuffer::create(gpu, BufferUsage::STORAGE, 64, "MeshPayloads")?;
        Ok(Self {
            meshes: HashMap::new(),
            payloads,
            sprite_mesh_id: MeshId::INVALID,
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.meshes.clear();
        self.payloads.destroy(gpu);
    }

    pub fn add_mesh(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        id: MeshId,
        mesh: Mesh,
    ) -> Result<()> {
        if mesh.lods.is_empty() {
            log::error!("Meshes::add_mesh: mesh {} must provide at least LOD 0", id);
            return Err(RenderError::MissingMesh(id.0));
        }
        if mesh.lods.len() > MESH_MAX_LOD {
            log::warn!(
                "Meshes::add_mesh: mesh {} has {} LODs, only the first {} are used",
                id,
                mesh.lods.len(),
                MESH_MAX_LOD
            );
        }

        self.payloads
            .resize_at_least(gpu, Some(copy_pass), id.index() + 1)?;
        self.payloads
            .update(gpu, copy_pass, &[ItemUpdate::new(id.index(), mesh.payload())])?;

        self.meshes.insert(id, mesh);
        Ok(())
    }

    pub fn remove_mesh(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        id: MeshId,
    ) -> Result<()> {
        if self.meshes.remove(&id).is_none() {
            log::warn!("Meshes::remove_mesh: no such mesh {}", id);
            return Ok(());
        }

        self.payloads
            .update(gpu, copy_pass, &[ItemUpdate::new(id.index(), MeshPayload::default())])
    }

    pub fn set_sprite_mesh(&mut self, id: MeshId) {
        self.sprite_mesh_id = id;
    }

    pub fn sprite_mesh_id(&self) -> MeshId {
        self.sprite_mesh_id
    }

    pub fn get(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn payloads_buffer(&self) -> &ItemBuffer<MeshPayload> {
        &self.payloads
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialType {
    Pbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Material {
    pub material_type: MaterialType,
    pub alpha_mode: Option<AlphaMode>,
}

impl Material {
    pub fn pbr(alpha_mode: Option<AlphaMode>) -> Self {
        Self {
            material_type: MaterialType::Pbr,
            alpha_mode,
        }
    }

    /// Unset alpha mode renders as opaque.
    pub fn is_opaque(&self) -> bool {
        !matches!(self.alpha_mode, Some(AlphaMode::Blend))
    }
}

#[derive(Debug, Default)]
pub struct Materials {
    materials: HashMap<MaterialId, Material>,
}

impl Materials {
    pub fn insert(&mut self, id: MaterialId, material: Material) {
        self.materials.insert(id, material);
    }

    pub fn remove(&mut self, id: MaterialId) -> Option<Material> {
        self.materials.remove(&id)
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct Textures {
    textures: HashMap<TextureId, TextureInfo>,
}

impl Textures {
    pub fn insert(&mut self, id: TextureId, info: TextureInfo) {
        self.textures.insert(id, info);
    }

    pub fn remove(&mut self, id: TextureId) -> Option<TextureInfo> {
        self.textures.remove(&id)
    }

    pub fn get(&self, id: TextureId) -> Option<&TextureInfo> {
        self.textures.get(&id)
    }
}

#[derive(Debug)]
pub struct Resources {
    pub meshes: Meshes,
    pub materials: Materials,
    pub textures: Textures,
}

impl Resources {
    pub fn create(gpu: &mut dyn GpuBackend) -> Result<Self> {
        Ok(Self {
            meshes: Meshes::create(gpu)?,
            materials: Materials::default(),
            textures: Textures::default(),
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.meshes.destroy(gpu);
        self.materials = Materials::default();
        self.textures = Textures::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;

    #[test]
    fn mesh_payload_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<MeshLodPayload>(), 20);
        assert_eq!(std::mem::size_of::<MeshPayload>(), 112);
    }

    #[test]
    fn meshes_are_written_at_their_id() {
        let mut gpu = RecordingBackend::new();
        let mut meshes = Meshes::create(&mut gpu).unwrap();

        let cmd = gpu.acquire_command_buffer("test").unwrap();
        let pass = gpu.begin_copy_pass(cmd).unwrap();
        meshes
            .add_mesh(&mut gpu, &pass, MeshId(3), Mesh::sprite_quad())
            .unwrap();
        gpu.end_copy_pass(pass);

        let payload: MeshPayload = gpu.read_item(meshes.payloads_buffer().handle(), 3).unwrap();
        assert_eq!(payload.has_cull_volume, 1);
        assert_eq!(payload.num_lods, 1);
        assert_eq!(payload.lods[0].num_indices, 6);
        assert_eq!(payload.lods[1].is_valid, 0);
        assert_eq!(meshes.payloads_buffer().size(), 4);
    }

    #[test]
    fn mesh_without_lods_is_rejected() {
        let mut gpu = RecordingBackend::new();
        let mut meshes = Meshes::create(&mut gpu).unwrap();
        let cmd = gpu.acquire_command_buffer("test").unwrap();
        let pass = gpu.begin_copy_pass(cmd).unwrap();

        let empty = Mesh {
            lods: Vec::new(),
            cull_volume: None,
        };
        assert!(meshes.add_mesh(&mut gpu, &pass, MeshId(1), empty).is_err());
        assert!(meshes.get(MeshId(1)).is_none());
    }

    #[test]
    fn unset_alpha_mode_is_opaque() {
        assert!(Material::pbr(None).is_opaque());
        assert!(Material::pbr(Some(AlphaMode::Mask)).is_opaque());
        assert!(!Material::pbr(Some(AlphaMode::Blend)).is_opaque());
    }
}
