use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::gpu::TextureKind;
use crate::ids::LightId;
use crate::settings::RenderSettings;

pub const SHADOW_CASCADE_COUNT: usize = 4;
pub const POINT_SHADOW_FACE_COUNT: usize = 6;

/// Stride of the per-group shadow payload array; every light owns this many slots.
pub const MAX_PER_LIGHT_SHADOW_RENDER_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightType {
    Point,
    Spotlight,
    Directional,
}

impl LightType {
    pub fn shadow_render_count(self) -> usize {
        match self {
            LightType::Point => POINT_SHADOW_FACE_COUNT,
            LightType::Spotlight => 1,
            LightType::Directional => SHADOW_CASCADE_COUNT,
        }
    }

    pub fn shadow_texture_kind(self) -> TextureKind {
        match self {
            LightType::Point => TextureKind::Cube,
            LightType::Spotlight => TextureKind::D2,
            LightType::Directional => TextureKind::D2Array,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            LightType::Point => 0,
            LightType::Spotlight => 1,
            LightType::Directional => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttenuationMode {
    None,
    Linear,
    #[default]
    Exponential,
}

impl AttenuationMode {
    fn as_raw(self) -> u32 {
        match self {
            AttenuationMode::None => 0,
            AttenuationMode::Linear => 1,
            AttenuationMode::Exponential => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub id: LightId,
    pub light_type: LightType,
    pub casts_shadows: bool,
    pub world_pos: Vec3,
    pub color: Vec3,
    pub attenuation: AttenuationMode,
    pub direction_unit: Vec3,
    /// Cone angle in degrees; only meaningful for spotlights.
    pub area_of_effect: f32,
}

impl Light {
    pub fn new(id: LightId, light_type: LightType) -> Self {
        Self {
            id,
            light_type,
            casts_shadows: false,
            world_pos: Vec3::ZERO,
            color: Vec3::ONE,
            attenuation: AttenuationMode::default(),
            direction_unit: Vec3::NEG_Y,
            area_of_effect: 360.0,
        }
    }

    /// Distance past which the light contributes nothing.
    pub fn max_affect_range(&self, settings: &RenderSettings) -> f32 {
        match self.attenuation {
            AttenuationMode::None => settings.max_render_distance,
            AttenuationMode::Linear => 500.0,
            // Distance at which 1/d^2 falloff drops under 0.001
            AttenuationMode::Exponential => 31.46,
        }
    }

    pub fn payload(&self, settings: &RenderSettings) -> LightPayload {
        LightPayload {
            is_valid: 1,
            id: self.id.0,
            casts_shadows: u32::from(self.casts_shadows),
            _pad0: 0,
            world_pos: self.world_pos.to_array(),
            light_type: self.light_type.as_raw(),
            attenuation_mode: self.attenuation.as_raw(),
            max_affect_range: self.max_affect_range(settings),
            _pad1: [0; 2],
            color: self.color.to_array(),
            _pad2: 0,
            direction_unit: self.direction_unit.to_array(),
            area_of_effect: self.area_of_effect,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightPayload {
    pub is_valid: u32,
    pub id: u32,
    pub casts_shadows: u32,
    pub _pad0: u32,
    pub world_pos: [f32; 3],
    pub light_type: u32,
    pub attenuation_mode: u32,
    pub max_affect_range: f32,
    pub _pad1: [u32; 2],
    pub color: [f32; 3],
    pub _pad2: u32,
    pub direction_unit: [f32; 3],
    pub area_of_effect: f32,
}
