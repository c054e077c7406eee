use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::gpu::{bind, ComputeProgram};
use crate::ids::{MeshId, SpriteId, TextureId};
use crate::renderer::batch::Batch;
use crate::renderer::batches::BatchBinding;
use crate::renderer::draw_pass::{BatchLayout, DrawPass};
use crate::renderer::renderables::{SpriteRenderable, StateUpdate};
use crate::renderer::resources::Resources;
use crate::settings::RenderSettings;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpriteBatchPayload {
    pub is_valid: u32,
    pub mesh_id: u32,
    pub num_members: u32,
    pub draw_data_offset: u32,
    pub lod_instance_count: u32,
}

/// Sprites all share the quad mesh, so they batch by texture alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpriteBatching;

impl BatchLayout for SpriteBatching {
    type Instance = SpriteRenderable;
    type Key = (TextureId, MeshId);
    type BatchPayload = SpriteBatchPayload;

    const SLOTS_PER_MEMBER: u32 = 1;
    const DRAWS_PER_BATCH: u32 = 1;
    const CULL_PROGRAM: ComputeProgram = ComputeProgram::SpriteCull;
    const DRAW_PROGRAM: ComputeProgram = ComputeProgram::SpriteDraw;
    const INSTANCES_BIND_POINT: &'static str = bind::SPRITE_INSTANCES;

    fn tag_suffix(&self) -> &'static str {
        "Sprite"
    }

    fn passes_filter(&self, _instance: &SpriteRenderable, _resources: &Resources) -> Result<bool> {
        Ok(true)
    }

    fn batch_key(&self, instance: &SpriteRenderable, resources: &Resources) -> (TextureId, MeshId) {
        (instance.texture_id, resources.meshes.sprite_mesh_id())
    }

    fn batch_payload(batch: &Batch<(TextureId, MeshId)>) -> SpriteBatchPayload {
        SpriteBatchPayload {
            is_valid: u32::from(batch.is_valid),
            mesh_id: batch.key.1 .0,
            num_members: batch.num_members(),
            draw_data_offset: batch.draw_data_offset,
            lod_instance_count: 0,
        }
    }

    fn render_binding(key: &(TextureId, MeshId)) -> (BatchBinding, MeshId) {
        (BatchBinding::Texture(key.0), key.1)
    }

    fn cull_far_plane(&self, _settings: &RenderSettings) -> Option<f32> {
        None
    }

    fn changes(update: &StateUpdate) -> (&[SpriteRenderable], &[SpriteRenderable], Vec<SpriteId>) {
        (
            &update.to_add_sprites,
            &update.to_update_sprites,
            update.to_delete_sprites.iter().copied().collect(),
        )
    }
}

pub type SpriteDrawPass = DrawPass<SpriteBatching>;
