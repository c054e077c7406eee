use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, Result};
use crate::gpu::{bind, ComputeProgram};
use crate::ids::{MaterialId, MeshId, ObjectId};
use crate::renderer::batch::Batch;
use crate::renderer::batches::BatchBinding;
use crate::renderer::draw_pass::{BatchLayout, DrawPass};
use crate::renderer::renderables::{ObjectRenderable, StateUpdate};
use crate::renderer::resources::{Resources, MESH_MAX_LOD};
use crate::settings::RenderSettings;

/// Which objects an object draw pass accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectDrawPassType {
    Opaque,      // Alpha mode unset, opaque or masked
    Translucent, // Alpha blended
    ShadowCaster,
}

impl ObjectDrawPassType {
    fn tag_suffix(self) -> &'static str {
        match self {
            Self::Opaque => "ObjectOpaque",
            Self::Translucent => "ObjectTranslucent",
            Self::ShadowCaster => "ObjectShadowCaster",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ObjectBatchPayload {
    pub is_valid: u32,
    pub mesh_id: u32,
    pub num_members: u32,
    pub draw_data_offset: u32,
    pub lod_instance_counts: [u32; MESH_MAX_LOD],
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectBatching {
    pub pass_type: ObjectDrawPassType,
}

impl BatchLayout for ObjectBatching {
    type Instance = ObjectRenderable;
    type Key = (MaterialId, MeshId);
    type BatchPayload = ObjectBatchPayload;

    const SLOTS_PER_MEMBER: u32 = MESH_MAX_LOD as u32;
    const DRAWS_PER_BATCH: u32 = MESH_MAX_LOD as u32;
    const CULL_PROGRAM: ComputeProgram = ComputeProgram::ObjectCull;
    const DRAW_PROGRAM: ComputeProgram = ComputeProgram::ObjectDraw;
    const INSTANCES_BIND_POINT: &'static str = bind::OBJECT_INSTANCES;

    fn tag_suffix(&self) -> &'static str {
        self.pass_type.tag_suffix()
    }

    fn passes_filter(&self, instance: &ObjectRenderable, resources: &Resources) -> Result<bool> {
        let material = resources
            .materials
            .get(instance.material_id)
            .ok_or(RenderError::MissingMaterial(instance.material_id.0))?;

        Ok(match self.pass_type {
            ObjectDrawPassType::Opaque => material.is_opaque(),
            ObjectDrawPassType::Translucent => !material.is_opaque(),
            ObjectDrawPassType::ShadowCaster => instance.casts_shadows,
        })
    }

    fn batch_key(&self, instance: &ObjectRenderable, _resources: &Resources) -> (MaterialId, MeshId) {
        (instance.material_id, instance.mesh_id)
    }

    fn batch_payload(batch: &Batch<(MaterialId, MeshId)>) -> ObjectBatchPayload {
        ObjectBatchPayload {
            is_valid: u32::from(batch.is_valid),
            mesh_id: batch.key.1 .0,
            num_members: batch.num_members(),
            draw_data_offset: batch.draw_data_offset,
            lod_instance_counts: [0; MESH_MAX_LOD],
        }
    }

    fn render_binding(key: &(MaterialId, MeshId)) -> (BatchBinding, MeshId) {
        (BatchBinding::Material(key.0), key.1)
    }

    fn cull_far_plane(&self, settings: &RenderSettings) -> Option<f32> {
        Some(
            settings
                .max_render_distance
                .min(settings.objects_max_render_distance),
        )
    }

    fn changes(update: &StateUpdate) -> (&[ObjectRenderable], &[ObjectRenderable], Vec<ObjectId>) {
        (
            &update.to_add_objects,
            &update.to_update_objects,
            update.to_delete_objects.iter().copied().collect(),
        )
    }
}

pub type ObjectDrawPass = DrawPass<ObjectBatching>;

impl ObjectDrawPass {
    pub fn pass_type(&self) -> ObjectDrawPassType {
        self.layout().pass_type
    }
}
