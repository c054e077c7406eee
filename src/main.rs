use std::env;

use glam::{Mat4, Quat, Vec2, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use wgpu_drawpass::gpu::{GpuBackend, RecordingBackend, WgpuBackend};
use wgpu_drawpass::renderer::{
    Aabb, AlphaMode, Camera, DrawList, FrameRecorder, FrameStats, Light, LightType, Material, Mesh,
    MeshLod, ObjectRenderable, RenderFrameParams, RenderGroupTask, RenderThread, Renderer,
    ShadowRenderTarget, SpriteRenderable, StateUpdate, TextureInfo, ViewProjection,
};
use wgpu_drawpass::{init_logging, RenderSettings, Result};

const WORLD_GROUP: &str = "World";
const DEFAULT_FRAMES: u32 = 120;
const OBJECT_COUNT: u32 = 500;
const SPRITE_COUNT: u32 = 64;

/// Logs what a rendering layer would draw instead of drawing it.
#[derive(Default)]
struct LoggingRecorder {
    shadow_batches: usize,
    camera_batches: usize,
}

impl FrameRecorder for LoggingRecorder {
    fn record_shadow_render(
        &mut self,
        group: &str,
        target: &ShadowRenderTarget,
        _view_projection: &ViewProjection,
        draw_list: &DrawList,
    ) -> bool {
        log::debug!(
            "{}: shadow light {} layer {} with {} batches",
            group,
            target.light_id,
            target.layer,
            draw_list.len()
        );
        self.shadow_batches += draw_list.len();
        true
    }

    fn record_camera_pass(
        &mut self,
        group: &str,
        pass_name: &str,
        _view_projection: &ViewProjection,
        draw_list: &DrawList,
    ) {
        for (binding, run) in draw_list.by_binding() {
            log::trace!("{}:{} bind {:?} for {} batches", group, pass_name, binding, run.len());
        }
        self.camera_batches += draw_list.len();
    }
}

struct Options {
    frames: u32,
    recording: bool,
}

fn parse_options() -> Options {
    let mut options = Options {
        frames: DEFAULT_FRAMES,
        recording: false,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--recording" => options.recording = true,
            "--frames" => match args.next().and_then(|value| value.parse().ok()) {
                Some(frames) => options.frames = frames,
                None => log::warn!("--frames expects a number, keeping {}", options.frames),
            },
            other => log::warn!("Ignoring unknown argument {}", other),
        }
    }
    options
}

fn cube_mesh() -> Mesh {
    let lod = |render_distance: f32, num_indices: u32| MeshLod {
        render_distance,
        vertex_offset: 0,
        first_index: 0,
        num_indices,
    };
    Mesh {
        lods: vec![lod(50.0, 36), lod(200.0, 24), lod(1000.0, 12)],
        cull_volume: Some(Aabb {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        }),
    }
}

/// Registers resources and returns the deltas that populate the demo scene.
fn build_scene<B: GpuBackend>(renderer: &mut Renderer<B>) -> Result<StateUpdate> {
    let mut rng = SmallRng::seed_from_u64(7);

    let mesh = renderer.create_mesh(cube_mesh())?;
    let opaque = renderer.create_material(Material::pbr(Some(AlphaMode::Opaque)));
    let glass = renderer.create_material(Material::pbr(Some(AlphaMode::Blend)));
    let atlas = renderer.create_texture(TextureInfo {
        width: 256,
        height: 256,
    });

    let mut update = StateUpdate::for_group(WORLD_GROUP);

    for _ in 0..OBJECT_COUNT {
        let material = if rng.gen_bool(0.2) { glass } else { opaque };
        let mut object = ObjectRenderable::new(renderer.create_object_id(), mesh, material);
        let position = Vec3::new(
            rng.gen_range(-100.0..100.0),
            rng.gen_range(0.0..5.0),
            rng.gen_range(-100.0..100.0),
        );
        object.model_transform = Mat4::from_rotation_translation(
            Quat::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU)),
            position,
        );
        update.to_add_objects.push(object);
    }

    for index in 0..SPRITE_COUNT {
        let mut sprite = SpriteRenderable::new(renderer.create_sprite_id(), atlas);
        sprite.position = Vec3::new((index % 8) as f32 * 40.0, (index / 8) as f32 * 40.0, 0.0);
        sprite.dst_size = Some(Vec2::splat(32.0));
        update.to_add_sprites.push(sprite);
    }

    let mut sun = Light::new(renderer.create_light_id(), LightType::Directional);
    sun.casts_shadows = true;
    sun.direction_unit = Vec3::new(-0.3, -1.0, -0.2).normalize();
    update.to_add_lights.push(sun);

    let mut lamp = Light::new(renderer.create_light_id(), LightType::Point);
    lamp.casts_shadows = true;
    lamp.world_pos = Vec3::new(0.0, 10.0, 0.0);
    update.to_add_lights.push(lamp);

    Ok(update)
}

fn camera_at(frame: u32) -> Camera {
    let angle = frame as f32 * 0.02;
    let position = Vec3::new(angle.cos() * 60.0, 25.0, angle.sin() * 60.0);
    Camera::looking_at(position, Vec3::ZERO, 16.0 / 9.0)
}

fn run<B: GpuBackend + 'static>(thread: RenderThread<B>, frames: u32) -> Result<()> {
    let scene = thread.dispatch_for_result(build_scene)??;

    let mut totals = FrameStats::default();
    let mut state_updates = vec![scene];
    for frame in 0..frames {
        let params = RenderFrameParams {
            state_updates: std::mem::take(&mut state_updates),
            render_tasks: vec![RenderGroupTask::new(WORLD_GROUP, camera_at(frame))],
        };

        let (stats, recorder) = thread.dispatch_for_result(move |renderer| {
            let mut recorder = LoggingRecorder::default();
            renderer
                .render_frame(&params, &mut recorder)
                .map(|stats| (stats, recorder))
        })??;

        log::debug!(
            "frame {}: {} shadow batches, {} camera batches",
            frame,
            recorder.shadow_batches,
            recorder.camera_batches
        );
        totals.accumulate(stats);
    }

    log::info!(
        "Rendered {} frames: {} draw pass computes, {} shadow refreshes, {} shadow renders",
        frames,
        totals.draw_passes_computed,
        totals.shadow_renders_refreshed,
        totals.shadow_renders_recorded
    );

    thread.shut_down();
    Ok(())
}

fn main() {
    init_logging();
    let options = parse_options();
    let settings = RenderSettings::load();

    let result = if options.recording {
        log::info!("Using the recording backend");
        RenderThread::spawn(move || Renderer::start_up(RecordingBackend::new(), settings))
            .and_then(|thread| run(thread, options.frames))
    } else {
        RenderThread::spawn(move || Renderer::start_up(WgpuBackend::new_headless()?, settings))
            .and_then(|thread| run(thread, options.frames))
    };

    if let Err(err) = result {
        log::error!("Demo failed: {}", err);
        std::process::exit(1);
    }
}
