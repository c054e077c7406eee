use crate::error::Result;
use crate::renderer::batches::DrawList;
use crate::renderer::camera::Camera;
use crate::renderer::group::{
    Group, DRAW_PASS_CAMERA_OBJECT_OPAQUE, DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT,
    DRAW_PASS_CAMERA_SPRITE,
};
use crate::renderer::group_lights::ShadowRenderTarget;
use crate::renderer::projection::{
    screen_camera_view_projection, world_camera_view_projection, ViewProjection,
};
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::StateUpdate;

/// Camera passes in the order they are recorded.
pub const CAMERA_DRAW_PASSES: [&str; 3] = [
    DRAW_PASS_CAMERA_OBJECT_OPAQUE,
    DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT,
    DRAW_PASS_CAMERA_SPRITE,
];

/// Renders one group from a world camera, with sprites placed by a screen camera.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderGroupTask {
    pub group_name: String,
    pub world_camera: Camera,
    pub sprite_camera: Camera,
}

impl RenderGroupTask {
    pub fn new(group_name: &str, world_camera: Camera) -> Self {
        Self {
            group_name: group_name.to_string(),
            world_camera,
            sprite_camera: Camera::default(),
        }
    }
}

/// Everything one frame consumes: deltas first, then render tasks in order.
#[derive(Debug, Clone, Default)]
pub struct RenderFrameParams {
    pub state_updates: Vec<StateUpdate>,
    pub render_tasks: Vec<RenderGroupTask>,
}

/// Implemented by the rendering layer that turns draw lists into render passes.
pub trait FrameRecorder {
    /// Records one shadow map layer. Returning `false` keeps the render pending so it is
    /// attempted again next frame.
    fn record_shadow_render(
        &mut self,
        group: &str,
        target: &ShadowRenderTarget,
        view_projection: &ViewProjection,
        draw_list: &DrawList,
    ) -> bool;

    fn record_camera_pass(
        &mut self,
        group: &str,
        pass_name: &str,
        view_projection: &ViewProjection,
        draw_list: &DrawList,
    );
}

/// A recorder that draws nothing and accepts every shadow render.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl FrameRecorder for NullRecorder {
    fn record_shadow_render(
        &mut self,
        _group: &str,
        _target: &ShadowRenderTarget,
        _view_projection: &ViewProjection,
        _draw_list: &DrawList,
    ) -> bool {
        true
    }

    fn record_camera_pass(
        &mut self,
        _group: &str,
        _pass_name: &str,
        _view_projection: &ViewProjection,
        _draw_list: &DrawList,
    ) {
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub groups_rendered: usize,
    pub draw_passes_computed: usize,
    pub shadow_renders_refreshed: usize,
    pub shadow_renders_recorded: usize,
    pub camera_passes_recorded: usize,
}

impl FrameStats {
    pub fn accumulate(&mut self, other: FrameStats) {
        self.groups_rendered += other.groups_rendered;
        self.draw_passes_computed += other.draw_passes_computed;
        self.shadow_renders_refreshed += other.shadow_renders_refreshed;
        self.shadow_renders_recorded += other.shadow_renders_recorded;
        self.camera_passes_recorded += other.camera_passes_recorded;
    }
}

/// Runs one group through the frame: camera view-projections, shadow sync, draw-call
/// compute, shadow recording and finally the camera passes.
pub fn render_group(
    ctx: &mut RenderContext<'_>,
    group: &mut Group,
    task: &RenderGroupTask,
    recorder: &mut dyn FrameRecorder,
) -> Result<FrameStats> {
    let mut stats = FrameStats {
        groups_rendered: 1,
        ..FrameStats::default()
    };

    let world_view_projection =
        world_camera_view_projection(&task.world_camera, ctx.settings.max_render_distance)?;
    let sprite_view_projection = screen_camera_view_projection(
        &task.sprite_camera,
        ctx.settings.resolution.width,
        ctx.settings.resolution.height,
    )?;

    let group_name = group.name().to_string();
    let (data_stores, draw_passes, lights) = group.parts_mut();

    draw_passes.set_view_projection(DRAW_PASS_CAMERA_OBJECT_OPAQUE, world_view_projection)?;
    draw_passes.set_view_projection(DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT, world_view_projection)?;
    draw_passes.set_view_projection(DRAW_PASS_CAMERA_SPRITE, sprite_view_projection)?;

    // Only refits cascade params; GPU state is untouched until the sync below
    lights.process_latest_world_camera(ctx, &task.world_camera);

    if let Some(copy_pass) = ctx.begin_copy_pass("render_group: shadow sync") {
        stats.shadow_renders_refreshed = lights.sync_shadow_renders(ctx, &copy_pass, draw_passes);
        ctx.end_copy_pass(copy_pass);
    }

    // Must follow the shadow sync, which can invalidate shadow passes
    stats.draw_passes_computed = draw_passes.compute_draw_calls_if_needed(ctx, data_stores);

    for target in lights.pending_shadow_renders() {
        let Some(pass) = draw_passes.get(&target.draw_pass_name) else {
            log::error!(
                "render_group: light {} has no shadow pass {}",
                target.light_id,
                target.draw_pass_name
            );
            continue;
        };
        let Some(view_projection) = pass.view_projection() else {
            continue;
        };

        if recorder.record_shadow_render(&group_name, &target, view_projection, &pass.draw_list()) {
            lights.mark_shadow_render_synced(target.light_id, target.layer);
            stats.shadow_renders_recorded += 1;
        }
    }

    for pass_name in CAMERA_DRAW_PASSES {
        let Some(pass) = draw_passes.get(pass_name) else {
            continue;
        };
        let Some(view_projection) = pass.view_projection() else {
            continue;
        };
        recorder.record_camera_pass(&group_name, pass_name, view_projection, &pass.draw_list());
        stats.camera_passes_recorded += 1;
    }

    log::debug!(
        "render_group {}: {} passes computed, {} shadow renders recorded",
        group_name,
        stats.draw_passes_computed,
        stats.shadow_renders_recorded
    );
    Ok(stats)
}
