use glam::{Mat4, Vec3};

use crate::renderer::projection::{up_vector_for, PERSPECTIVE_CLIP_NEAR};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub look_unit: Vec3,
    pub up_unit: Vec3,
    pub right_unit: Vec3,
    pub scale: f32,
    pub fov_y_degrees: f32,
    pub aspect_ratio: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            look_unit: Vec3::NEG_Z,
            up_unit: Vec3::Y,
            right_unit: Vec3::X,
            scale: 1.0,
            fov_y_degrees: 45.0,
            aspect_ratio: 1.0,
        }
    }
}

impl Camera {
    pub fn looking_at(position: Vec3, target: Vec3, aspect_ratio: f32) -> Self {
        let look_unit = (target - position).normalize_or(Vec3::NEG_Z);
        let up_unit = up_vector_for(look_unit, Vec3::Y);
        let right_unit = look_unit.cross(up_unit).normalize_or(Vec3::X);
        Self {
            position,
            look_unit,
            up_unit: right_unit.cross(look_unit),
            right_unit,
            aspect_ratio,
            ..Self::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        let up = up_vector_for(self.look_unit, self.up_unit);
        Mat4::look_at_rh(self.position, self.position + self.look_unit, up)
    }

    pub fn near_plane(&self) -> f32 {
        PERSPECTIVE_CLIP_NEAR
    }
}
