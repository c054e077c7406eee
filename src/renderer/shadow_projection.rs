//! View-projections for every kind of shadow render: cube faces for point lights, a single cone
//! for spotlights, and texel-snapped ortho volumes for directional cascades.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::error::{RenderError, Result};
use crate::renderer::camera::Camera;
use crate::renderer::lights::{Light, LightType, SHADOW_CASCADE_COUNT};
use crate::renderer::projection::{
    up_vector_for, world_camera_view_projection, FrustumProjection, OrthoProjection, Projection,
    ViewProjection, PERSPECTIVE_CLIP_NEAR,
};
use crate::settings::RenderSettings;

const CASCADE_SPLIT_LAMBDA: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    Right,
    Left,
    Up,
    Down,
    Back,
    Forward,
}

impl CubeFace {
    /// Cubemap layer order.
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Right,
        CubeFace::Left,
        CubeFace::Up,
        CubeFace::Down,
        CubeFace::Back,
        CubeFace::Forward,
    ];

    pub fn look_unit(self) -> Vec3 {
        match self {
            CubeFace::Right => Vec3::X,
            CubeFace::Left => Vec3::NEG_X,
            CubeFace::Up => Vec3::Y,
            CubeFace::Down => Vec3::NEG_Y,
            // z is flipped to match the left-handed cubemap convention
            CubeFace::Back => Vec3::NEG_Z,
            CubeFace::Forward => Vec3::Z,
        }
    }
}

/// Depth sub-range of the camera frustum covered by one directional cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeCut {
    pub start: f32,
    pub end: f32,
}

impl CascadeCut {
    pub fn as_array(self) -> [f32; 2] {
        [self.start, self.end]
    }
}

/// Everything needed to render and later sample one shadow render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowRenderParams {
    pub world_pos: Vec3,
    pub view_projection: ViewProjection,
    pub cascade_index: Option<u32>,
    pub cut: Option<CascadeCut>,
    /// The world camera a directional cascade was fitted to.
    pub camera: Option<Camera>,
}

impl ShadowRenderParams {
    fn from_light(light: &Light, view_projection: ViewProjection) -> Self {
        Self {
            world_pos: light.world_pos,
            view_projection,
            cascade_index: None,
            cut: None,
            camera: None,
        }
    }

    pub fn payload(&self) -> ShadowMapPayload {
        ShadowMapPayload {
            world_pos: self.world_pos.to_array(),
            _pad0: 0,
            view_projection: self.view_projection.matrix().to_cols_array_2d(),
            cut: self.cut.map(CascadeCut::as_array).unwrap_or_default(),
            cascade_index: self.cascade_index.unwrap_or(0),
            _pad1: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadowMapPayload {
    pub world_pos: [f32; 3],
    pub _pad0: u32,
    pub view_projection: [[f32; 4]; 4],
    pub cut: [f32; 2],
    pub cascade_index: u32,
    pub _pad1: u32,
}

pub fn point_light_view_projection(
    settings: &RenderSettings,
    light: &Light,
    face: CubeFace,
) -> Result<ViewProjection> {
    let look = face.look_unit();
    let view = Mat4::look_at_rh(light.world_pos, light.world_pos + look, up_vector_for(look, Vec3::Y));
    let projection = FrustumProjection::new(
        90.0,
        1.0,
        PERSPECTIVE_CLIP_NEAR,
        light.max_affect_range(settings),
    )?;

    Ok(ViewProjection::new(view, Projection::Frustum(projection)))
}

/// The spotlight cone is its field of view, so a cone wider than 180 degrees has no projection.
pub fn spotlight_view_projection(settings: &RenderSettings, light: &Light) -> Result<ViewProjection> {
    let dir = light.direction_unit;
    let view = Mat4::look_at_rh(light.world_pos, light.world_pos + dir, up_vector_for(dir, Vec3::Y));
    let projection = FrustumProjection::new(
        light.area_of_effect,
        1.0,
        PERSPECTIVE_CLIP_NEAR,
        light.max_affect_range(settings),
    )?;

    Ok(ViewProjection::new(view, Projection::Frustum(projection)))
}

/// Splits the shadowed depth range into cascades with a practical log/uniform blend, then pulls
/// each cut's start back into its predecessor by the configured overlap.
pub fn directional_cascade_cuts(settings: &RenderSettings) -> [CascadeCut; SHADOW_CASCADE_COUNT] {
    let mut shadow_distance = settings
        .objects_max_render_distance
        .min(settings.max_render_distance);
    if let Some(distance) = settings.shadow_render_distance {
        shadow_distance = shadow_distance.min(distance);
    }

    let near_clip = PERSPECTIVE_CLIP_NEAR;
    let clip_range = shadow_distance - near_clip;
    let min_z = near_clip;
    let max_z = near_clip + clip_range;
    let range = max_z - min_z;
    let ratio = max_z / min_z;

    let mut cuts = [CascadeCut { start: 0.0, end: 0.0 }; SHADOW_CASCADE_COUNT];
    let mut last_end = min_z;

    for index in 0..SHADOW_CASCADE_COUNT {
        let p = (index as f32 + 1.0) / SHADOW_CASCADE_COUNT as f32;
        let log = min_z * ratio.powf(p);
        let uniform = min_z + range * p;
        let d = CASCADE_SPLIT_LAMBDA * (log - uniform) + uniform;
        let percentage = (d - near_clip) / clip_range;

        let mut start = last_end;
        if index > 0 {
            let prev = cuts[index - 1];
            start -= (prev.end - prev.start) * settings.shadow_cascade_overlap_ratio;
        }

        let end = clip_range * percentage;
        cuts[index] = CascadeCut { start, end };
        last_end = end;
    }

    cuts
}

/// Fits a texel-snapped ortho volume around the slice of the world camera's frustum covered by
/// `cut`, looking down the light's direction.
pub fn directional_cascade_render(
    settings: &RenderSettings,
    light: &Light,
    camera: &Camera,
    cut: CascadeCut,
) -> Result<ShadowRenderParams> {
    let mut camera_view_projection =
        world_camera_view_projection(camera, settings.max_render_distance)?;
    camera_view_projection
        .projection
        .set_near_plane_distance(PERSPECTIVE_CLIP_NEAR.max(cut.start))?;
    camera_view_projection
        .projection
        .set_far_plane_distance(cut.end)?;

    let bounds = camera_view_projection.world_space_bounding_points();
    let center = bounds.iter().copied().sum::<Vec3>() / bounds.len() as f32;
    let radius = bounds
        .iter()
        .map(|point| point.distance(center))
        .fold(0.0_f32, f32::max);

    let pullback = settings.shadow_cascade_out_of_view_pullback;
    let ortho_width = radius * 2.0;
    let ortho_height = radius * 2.0;
    let ortho_depth = radius * 2.0 + pullback;
    let units_per_texel = ortho_width / settings.shadow_map_resolution() as f32;

    if !(units_per_texel > 0.0) {
        return Err(RenderError::InvalidProjection("cascade cut has no extent"));
    }

    // Snapping only works in a light space anchored at the origin
    let dir = light.direction_unit;
    let up = up_vector_for(dir, Vec3::Y);
    let light_space = Mat4::look_at_rh(Vec3::ZERO, dir, up);

    let mut snapped = light_space.transform_point3(center);
    snapped.x = (snapped.x / units_per_texel + 0.5).floor() * units_per_texel;
    snapped.y = (snapped.y / units_per_texel + 0.5).floor() * units_per_texel;
    snapped.z += radius + pullback;

    let world_pos = light_space.inverse().transform_point3(snapped);
    let view = Mat4::look_at_rh(world_pos, world_pos + dir, up);
    let projection = OrthoProjection::new(ortho_width, ortho_height, 0.0, ortho_depth)?;

    Ok(ShadowRenderParams {
        world_pos,
        view_projection: ViewProjection::new(view, Projection::Ortho(projection)),
        cascade_index: None,
        cut: Some(cut),
        camera: Some(*camera),
    })
}

/// Parameters for every shadow render a light owns, in render-index order.
pub fn light_shadow_renders(
    settings: &RenderSettings,
    light: &Light,
    camera: Option<&Camera>,
) -> Result<Vec<ShadowRenderParams>> {
    match light.light_type {
        LightType::Point => CubeFace::ALL
            .iter()
            .map(|face| {
                point_light_view_projection(settings, light, *face)
                    .map(|vp| ShadowRenderParams::from_light(light, vp))
            })
            .collect(),
        LightType::Spotlight => Ok(vec![ShadowRenderParams::from_light(
            light,
            spotlight_view_projection(settings, light)?,
        )]),
        LightType::Directional => {
            // Until a world camera arrives the cascades fit the default camera
            let camera = camera.copied().unwrap_or_default();
            directional_cascade_cuts(settings)
                .into_iter()
                .enumerate()
                .map(|(index, cut)| {
                    let mut params = directional_cascade_render(settings, light, &camera, cut)?;
                    params.cascade_index = Some(index as u32);
                    Ok(params)
                })
                .collect()
        }
    }
}
