use std::sync::mpsc;

use glam::{Mat4, Vec3};

use wgpu_drawpass::gpu::{BufferHandle, BufferUsage, BufferWrite, GpuBackend, WgpuBackend};
use wgpu_drawpass::ids::{MaterialId, MeshId};
use wgpu_drawpass::renderer::data_store::ObjectPayload;
use wgpu_drawpass::renderer::gpu_buffer::GpuBuffer;
use wgpu_drawpass::renderer::{
    AlphaMode, Camera, Light, LightType, Material, Mesh, MeshLod, NullRecorder, ObjectRenderable,
    RenderFrameParams, RenderGroupTask, Renderer, StateUpdate,
};
use wgpu_drawpass::settings::ShadowQuality;
use wgpu_drawpass::RenderSettings;

/// Machines without an adapter skip these tests.
fn headless() -> Option<WgpuBackend> {
    match WgpuBackend::new_headless() {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("no wgpu adapter, skipping: {}", err);
            None
        }
    }
}

fn read_back(gpu: &WgpuBackend, buffer: BufferHandle, size: u64) -> Vec<u8> {
    let device = gpu.device();
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback"),
    });
    encoder.copy_buffer_to_buffer(gpu.buffer(buffer).unwrap(), 0, &readback, 0, size);
    gpu.queue().submit(Some(encoder.finish()));

    let slice = readback.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    let _ = device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    });
    rx.recv().unwrap().unwrap();

    let bytes = slice.get_mapped_range().to_vec();
    bytes
}

fn add_objects(
    renderer: &mut Renderer<WgpuBackend>,
    mesh: MeshId,
    material: MaterialId,
    count: u32,
) -> StateUpdate {
    let mut update = StateUpdate::for_group("World");
    for _ in 0..count {
        let mut object = ObjectRenderable::new(renderer.create_object_id(), mesh, material);
        object.model_transform = Mat4::from_translation(Vec3::new(object.id.0 as f32, 0.0, 0.0));
        update.to_add_objects.push(object);
    }
    update
}

#[test]
fn retaining_resize_survives_submission() {
    let Some(mut gpu) = headless() else {
        return;
    };

    let mut buffer = GpuBuffer::create(&mut gpu, BufferUsage::STORAGE, 16, "Grow").unwrap();
    let cmd = gpu.acquire_command_buffer("Grow").unwrap();
    let pass = gpu.begin_copy_pass(cmd).unwrap();

    let data: Vec<u8> = (1..=16).collect();
    buffer
        .update(&mut gpu, &pass, &[BufferWrite { offset: 0, data: &data }])
        .unwrap();
    // The old buffer is the copy source and is released before the encoder is submitted
    buffer.resize_retaining(&mut gpu, &pass, 32).unwrap();
    gpu.end_copy_pass(pass);
    gpu.submit_command_buffer(cmd).unwrap();

    let bytes = read_back(&gpu, buffer.handle(), 32);
    assert_eq!(&bytes[..16], data.as_slice());
    assert_eq!(&bytes[16..], &[0u8; 16]);

    buffer.destroy(&mut gpu);
}

#[test]
fn frames_with_growth_and_shadows_render_on_a_device() {
    let Some(gpu) = headless() else {
        return;
    };

    let settings = RenderSettings {
        shadow_quality: ShadowQuality::Low,
        ..RenderSettings::default()
    };
    let mut renderer = Renderer::start_up(gpu, settings).unwrap();
    let mesh = renderer
        .create_mesh(Mesh {
            lods: vec![MeshLod {
                render_distance: 500.0,
                vertex_offset: 0,
                first_index: 0,
                num_indices: 36,
            }],
            cull_volume: None,
        })
        .unwrap();
    let material = renderer.create_material(Material::pbr(Some(AlphaMode::Opaque)));
    let camera = Camera::looking_at(Vec3::new(0.0, 10.0, 40.0), Vec3::ZERO, 16.0 / 9.0);

    let mut first = add_objects(&mut renderer, mesh, material, 10);
    let first_object = first.to_add_objects[0];
    let mut spot = Light::new(renderer.create_light_id(), LightType::Spotlight);
    spot.casts_shadows = true;
    spot.area_of_effect = 60.0;
    spot.world_pos = Vec3::new(0.0, 20.0, 0.0);
    first.to_add_lights.push(spot);

    let params = RenderFrameParams {
        state_updates: vec![first],
        render_tasks: vec![RenderGroupTask::new("World", camera)],
    };
    let stats = renderer.render_frame(&params, &mut NullRecorder).unwrap();
    assert_eq!(stats.groups_rendered, 1);
    assert_eq!(stats.shadow_renders_recorded, 1);
    assert!(stats.draw_passes_computed >= 2);

    // Past the initial capacity, so every per-instance buffer grows while keeping its contents
    let second = add_objects(&mut renderer, mesh, material, 200);
    let params = RenderFrameParams {
        state_updates: vec![second],
        render_tasks: vec![RenderGroupTask::new("World", camera)],
    };
    let stats = renderer.render_frame(&params, &mut NullRecorder).unwrap();
    assert!(stats.draw_passes_computed >= 2);
    let objects = &renderer.groups().get("World").unwrap().data_stores().objects;
    assert_eq!(objects.instance_count(), 210);

    let stride = std::mem::size_of::<ObjectPayload>();
    let offset = first_object.id.0 as usize * stride;
    let bytes = read_back(renderer.gpu(), objects.payloads_buffer(), (offset + stride) as u64);
    let payload: ObjectPayload = bytemuck::pod_read_unaligned(&bytes[offset..]);
    assert_eq!(payload.is_valid, 1);
    assert_eq!(payload.id, first_object.id.0);

    renderer.shut_down();
    let _ = renderer.gpu().device().poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    });
}
