use std::collections::BTreeSet;

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::ids::{LightId, MaterialId, MeshId, ObjectId, SpriteId, TextureId};
use crate::renderer::lights::Light;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectRenderable {
    pub id: ObjectId,
    pub mesh_id: MeshId,
    pub material_id: MaterialId,
    pub casts_shadows: bool,
    pub model_transform: Mat4,
}

impl ObjectRenderable {
    pub fn new(id: ObjectId, mesh_id: MeshId, material_id: MaterialId) -> Self {
        Self {
            id,
            mesh_id,
            material_id,
            casts_shadows: true,
            model_transform: Mat4::IDENTITY,
        }
    }
}

/// Pixel-space rectangle within a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteRenderable {
    pub id: SpriteId,
    pub texture_id: TextureId,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
    /// Portion of the texture to draw; the whole texture when unset.
    pub src_pixel_rect: Option<PixelRect>,
    /// Drawn size in pixels; the source rect's size when unset.
    pub dst_size: Option<Vec2>,
}

impl SpriteRenderable {
    pub fn new(id: SpriteId, texture_id: TextureId) -> Self {
        Self {
            id,
            texture_id,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            src_pixel_rect: None,
            dst_size: None,
        }
    }
}

/// One frame's worth of renderable changes for a single group.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub group_name: String,

    pub to_add_objects: Vec<ObjectRenderable>,
    pub to_add_sprites: Vec<SpriteRenderable>,
    pub to_add_lights: Vec<Light>,

    pub to_update_objects: Vec<ObjectRenderable>,
    pub to_update_sprites: Vec<SpriteRenderable>,
    pub to_update_lights: Vec<Light>,

    pub to_delete_objects: BTreeSet<ObjectId>,
    pub to_delete_sprites: BTreeSet<SpriteId>,
    pub to_delete_lights: BTreeSet<LightId>,
}

impl StateUpdate {
    pub fn for_group(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add_objects.is_empty()
            && self.to_add_sprites.is_empty()
            && self.to_add_lights.is_empty()
            && self.to_update_objects.is_empty()
            && self.to_update_sprites.is_empty()
            && self.to_update_lights.is_empty()
            && self.to_delete_objects.is_empty()
            && self.to_delete_sprites.is_empty()
            && self.to_delete_lights.is_empty()
    }
}
