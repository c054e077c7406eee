use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::error::{RenderError, Result};
use crate::renderer::camera::Camera;

pub const PERSPECTIVE_CLIP_NEAR: f32 = 0.1;

// Maps [0, 1] depth to [1, 0] so near is 1 and far is 0.
const REVERSE_Z: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, -1.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 1.0),
);

/// `preferred`, unless it is parallel to `look`, in which case +Z.
pub fn up_vector_for(look: Vec3, preferred: Vec3) -> Vec3 {
    if look.cross(preferred).length_squared() < 1e-8 {
        Vec3::Z
    } else {
        preferred
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumProjection {
    fov_y_degrees: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
}

impl FrustumProjection {
    pub fn new(fov_y_degrees: f32, aspect_ratio: f32, near: f32, far: f32) -> Result<Self> {
        if !(aspect_ratio > 0.0) {
            return Err(RenderError::InvalidProjection("aspect ratio must be positive"));
        }
        if !(fov_y_degrees > 0.0 && fov_y_degrees <= 180.0) {
            return Err(RenderError::InvalidProjection("fov must be in (0, 180]"));
        }
        if !(near > 0.0) {
            return Err(RenderError::InvalidProjection("near plane must be positive"));
        }
        if !(far > near) {
            return Err(RenderError::InvalidProjection("far plane must be beyond near plane"));
        }

        Ok(Self {
            fov_y_degrees,
            aspect_ratio,
            near,
            far,
        })
    }

    pub fn from_camera(camera: &Camera, near: f32, far: f32) -> Result<Self> {
        Self::new(camera.fov_y_degrees, camera.aspect_ratio, near, far)
    }

    pub fn matrix(&self) -> Mat4 {
        // A 180 degree fov has an infinite tangent; clamp just below it
        let fov = self.fov_y_degrees.min(179.9).to_radians();
        REVERSE_Z * Mat4::perspective_rh(fov, self.aspect_ratio, self.near, self.far)
    }

    fn half_extents_at(&self, distance: f32) -> (f32, f32) {
        let half_height = distance * (self.fov_y_degrees.min(179.9).to_radians() * 0.5).tan();
        (half_height * self.aspect_ratio, half_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoProjection {
    half_width: f32,
    half_height: f32,
    near: f32,
    far: f32,
}

impl OrthoProjection {
    /// A near plane of zero is allowed.
    pub fn new(width: f32, height: f32, near: f32, far: f32) -> Result<Self> {
        if !(width > 0.0 && height > 0.0) {
            return Err(RenderError::InvalidProjection("ortho extent must be positive"));
        }
        if !(near >= 0.0) {
            return Err(RenderError::InvalidProjection("near plane must not be negative"));
        }
        if !(far > near) {
            return Err(RenderError::InvalidProjection("far plane must be beyond near plane"));
        }

        Ok(Self {
            half_width: width * 0.5,
            half_height: height * 0.5,
            near,
            far,
        })
    }

    pub fn matrix(&self) -> Mat4 {
        REVERSE_Z
            * Mat4::orthographic_rh(
                -self.half_width,
                self.half_width,
                -self.half_height,
                self.half_height,
                self.near,
                self.far,
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Frustum(FrustumProjection),
    Ortho(OrthoProjection),
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        match self {
            Projection::Frustum(frustum) => frustum.matrix(),
            Projection::Ortho(ortho) => ortho.matrix(),
        }
    }

    pub fn near_plane_distance(&self) -> f32 {
        match self {
            Projection::Frustum(frustum) => frustum.near,
            Projection::Ortho(ortho) => ortho.near,
        }
    }

    pub fn far_plane_distance(&self) -> f32 {
        match self {
            Projection::Frustum(frustum) => frustum.far,
            Projection::Ortho(ortho) => ortho.far,
        }
    }

    pub fn set_near_plane_distance(&mut self, distance: f32) -> Result<()> {
        if !(distance > 0.0) || distance > self.far_plane_distance() {
            return Err(RenderError::InvalidProjection("near plane out of range"));
        }
        match self {
            Projection::Frustum(frustum) => frustum.near = distance,
            Projection::Ortho(ortho) => ortho.near = distance,
        }
        Ok(())
    }

    pub fn set_far_plane_distance(&mut self, distance: f32) -> Result<()> {
        if !(distance > 0.0) || distance < self.near_plane_distance() {
            return Err(RenderError::InvalidProjection("far plane out of range"));
        }
        match self {
            Projection::Frustum(frustum) => frustum.far = distance,
            Projection::Ortho(ortho) => ortho.far = distance,
        }
        Ok(())
    }

    /// Brings the far plane in to at most `distance`, never in front of the near plane.
    pub fn reduce_far_plane_to(&mut self, distance: f32) -> Result<()> {
        let far = distance
            .min(self.far_plane_distance())
            .max(self.near_plane_distance());
        self.set_far_plane_distance(far)
    }

    /// The eight corners of the projection volume in view space, near plane first.
    pub fn bounding_points(&self) -> [Vec3; 8] {
        let (near, far) = (self.near_plane_distance(), self.far_plane_distance());
        let ((nw, nh), (fw, fh)) = match self {
            Projection::Frustum(frustum) => {
                (frustum.half_extents_at(near), frustum.half_extents_at(far))
            }
            Projection::Ortho(ortho) => (
                (ortho.half_width, ortho.half_height),
                (ortho.half_width, ortho.half_height),
            ),
        };

        [
            Vec3::new(-nw, -nh, -near),
            Vec3::new(nw, -nh, -near),
            Vec3::new(nw, nh, -near),
            Vec3::new(-nw, nh, -near),
            Vec3::new(-fw, -fh, -far),
            Vec3::new(fw, -fh, -far),
            Vec3::new(fw, fh, -far),
            Vec3::new(-fw, fh, -far),
        ]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjectionUniform {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Projection,
}

impl ViewProjection {
    pub fn new(view: Mat4, projection: Projection) -> Self {
        Self { view, projection }
    }

    pub fn matrix(&self) -> Mat4 {
        self.projection.matrix() * self.view
    }

    pub fn world_space_bounding_points(&self) -> [Vec3; 8] {
        let inverse_view = self.view.inverse();
        self.projection
            .bounding_points()
            .map(|point| inverse_view.transform_point3(point))
    }

    pub fn uniform(&self) -> ViewProjectionUniform {
        ViewProjectionUniform {
            view: self.view.to_cols_array_2d(),
            projection: self.projection.matrix().to_cols_array_2d(),
        }
    }
}

/// The world camera's view-projection, reaching out to `max_render_distance`.
pub fn world_camera_view_projection(
    camera: &Camera,
    max_render_distance: f32,
) -> Result<ViewProjection> {
    let projection = FrustumProjection::from_camera(camera, PERSPECTIVE_CLIP_NEAR, max_render_distance)?;
    Ok(ViewProjection::new(
        camera.view_matrix(),
        Projection::Frustum(projection),
    ))
}

/// Pixel-space ortho view for sprites. Only x/y are scaled by the camera.
pub fn screen_camera_view_projection(
    camera: &Camera,
    width: u32,
    height: u32,
) -> Result<ViewProjection> {
    let view = Mat4::look_at_rh(camera.position, camera.position + camera.look_unit, camera.up_unit)
        * Mat4::from_scale(Vec3::new(camera.scale, camera.scale, 1.0));
    let projection = OrthoProjection::new(width as f32, height as f32, 0.0, 100.0)?;
    Ok(ViewProjection::new(view, Projection::Ortho(projection)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn ndc(matrix: Mat4, point: Vec3) -> Vec3 {
        let clip = matrix * point.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn frustum_validation() {
        assert!(FrustumProjection::new(60.0, 0.0, 0.1, 10.0).is_err());
        assert!(FrustumProjection::new(0.0, 1.0, 0.1, 10.0).is_err());
        assert!(FrustumProjection::new(181.0, 1.0, 0.1, 10.0).is_err());
        assert!(FrustumProjection::new(60.0, 1.0, 0.0, 10.0).is_err());
        assert!(FrustumProjection::new(60.0, 1.0, 5.0, 5.0).is_err());
        assert!(FrustumProjection::new(180.0, 1.0, 0.1, 10.0).is_ok());
    }

    #[test]
    fn frustum_depth_is_reversed() {
        let projection = FrustumProjection::new(90.0, 1.0, 1.0, 100.0).unwrap().matrix();
        assert!((ndc(projection, Vec3::new(0.0, 0.0, -1.0)).z - 1.0).abs() < EPSILON);
        assert!(ndc(projection, Vec3::new(0.0, 0.0, -100.0)).z.abs() < EPSILON);
    }

    #[test]
    fn ortho_depth_is_reversed_and_allows_zero_near() {
        let projection = OrthoProjection::new(10.0, 10.0, 0.0, 50.0).unwrap().matrix();
        assert!((ndc(projection, Vec3::new(0.0, 0.0, 0.0)).z - 1.0).abs() < EPSILON);
        assert!(ndc(projection, Vec3::new(0.0, 0.0, -50.0)).z.abs() < EPSILON);
        let edge = ndc(projection, Vec3::new(5.0, -5.0, -10.0));
        assert!((edge.x - 1.0).abs() < EPSILON && (edge.y + 1.0).abs() < EPSILON);
    }

    #[test]
    fn reduce_far_plane_never_crosses_near() {
        let mut projection =
            Projection::Frustum(FrustumProjection::new(60.0, 1.0, 10.0, 100.0).unwrap());
        projection.reduce_far_plane_to(50.0).unwrap();
        assert_eq!(projection.far_plane_distance(), 50.0);
        projection.reduce_far_plane_to(80.0).unwrap();
        assert_eq!(projection.far_plane_distance(), 50.0);
        projection.reduce_far_plane_to(1.0).unwrap();
        assert_eq!(projection.far_plane_distance(), 10.0);
    }

    #[test]
    fn bounding_points_project_to_clip_corners() {
        let camera = Camera::looking_at(Vec3::new(3.0, 2.0, 8.0), Vec3::ZERO, 1.5);
        let view_projection = world_camera_view_projection(&camera, 40.0).unwrap();
        let matrix = view_projection.matrix();

        for point in view_projection.world_space_bounding_points() {
            let p = ndc(matrix, point);
            assert!((p.x.abs() - 1.0).abs() < 1e-3, "{p:?}");
            assert!((p.y.abs() - 1.0).abs() < 1e-3, "{p:?}");
        }
    }

    #[test]
    fn screen_camera_maps_pixels_to_clip_space() {
        let camera = Camera {
            position: Vec3::new(0.0, 0.0, 1.0),
            ..Camera::default()
        };
        let vp = screen_camera_view_projection(&camera, 800, 600).unwrap();
        let p = ndc(vp.matrix(), Vec3::new(400.0, -300.0, 0.0));
        assert!((p.x - 1.0).abs() < EPSILON && (p.y + 1.0).abs() < EPSILON);
        assert!(screen_camera_view_projection(&camera, 0, 600).is_err());
    }

    #[test]
    fn up_vector_switches_when_parallel() {
        assert_eq!(up_vector_for(Vec3::Y, Vec3::Y), Vec3::Z);
        assert_eq!(up_vector_for(Vec3::NEG_Y, Vec3::Y), Vec3::Z);
        assert_eq!(up_vector_for(Vec3::X, Vec3::Y), Vec3::Y);
    }
}
