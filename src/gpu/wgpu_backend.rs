use std::borrow::Cow;
use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::error::{RenderError, Result};
use crate::gpu::{
    bind, BufferDescriptor, BufferHandle, BufferUsage, BufferWrite, CommandBufferHandle,
    ComputeDispatch, ComputeProgram, CopyPass, GpuBackend, ImageHandle, TextureDescriptor,
    TextureKind,
};

const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Clone, Copy)]
enum BindKind {
    Uniform,
    StorageRead,
    StorageReadWrite,
}

struct BindPoint {
    name: &'static str,
    binding: u32,
    kind: BindKind,
}

const fn bp(name: &'static str, binding: u32, kind: BindKind) -> BindPoint {
    BindPoint {
        name,
        binding,
        kind,
    }
}

const OBJECT_CULL_BINDINGS: &[BindPoint] = &[
    bp(bind::VIEW_PROJECTION, 0, BindKind::Uniform),
    bp(bind::INPUT_PARAMS, 1, BindKind::Uniform),
    bp(bind::OBJECT_INSTANCES, 2, BindKind::StorageRead),
    bp(bind::MEMBERSHIP, 3, BindKind::StorageRead),
    bp(bind::MESH_PAYLOADS, 4, BindKind::StorageRead),
    bp(bind::BATCH_DATA, 5, BindKind::StorageReadWrite),
    bp(bind::DRAW_DATAS, 6, BindKind::StorageReadWrite),
];

const SPRITE_CULL_BINDINGS: &[BindPoint] = &[
    bp(bind::VIEW_PROJECTION, 0, BindKind::Uniform),
    bp(bind::INPUT_PARAMS, 1, BindKind::Uniform),
    bp(bind::SPRITE_INSTANCES, 2, BindKind::StorageRead),
    bp(bind::MEMBERSHIP, 3, BindKind::StorageRead),
    bp(bind::MESH_PAYLOADS, 4, BindKind::StorageRead),
    bp(bind::BATCH_DATA, 5, BindKind::StorageReadWrite),
    bp(bind::DRAW_DATAS, 6, BindKind::StorageReadWrite),
];

const DRAW_BINDINGS: &[BindPoint] = &[
    bp(bind::INPUT_PARAMS, 0, BindKind::Uniform),
    bp(bind::MESH_PAYLOADS, 1, BindKind::StorageRead),
    bp(bind::BATCH_DATA, 2, BindKind::StorageReadWrite),
    bp(bind::DRAW_COMMANDS, 3, BindKind::StorageReadWrite),
    bp(bind::DRAW_COUNTS, 4, BindKind::StorageReadWrite),
];

fn program_source(program: ComputeProgram) -> String {
    let (common, body) = match program {
        ComputeProgram::ObjectCull => (
            include_str!("../shader/common_cull.wgsl"),
            include_str!("../shader/object_cull.wgsl"),
        ),
        ComputeProgram::SpriteCull => (
            include_str!("../shader/common_cull.wgsl"),
            include_str!("../shader/sprite_cull.wgsl"),
        ),
        ComputeProgram::ObjectDraw => (
            include_str!("../shader/common_draw.wgsl"),
            include_str!("../shader/object_draw.wgsl"),
        ),
        ComputeProgram::SpriteDraw => (
            include_str!("../shader/common_draw.wgsl"),
            include_str!("../shader/sprite_draw.wgsl"),
        ),
    };
    format!("{common}\n{body}")
}

fn program_bindings(program: ComputeProgram) -> &'static [BindPoint] {
    match program {
        ComputeProgram::ObjectCull => OBJECT_CULL_BINDINGS,
        ComputeProgram::SpriteCull => SPRITE_CULL_BINDINGS,
        ComputeProgram::ObjectDraw | ComputeProgram::SpriteDraw => DRAW_BINDINGS,
    }
}

fn to_wgpu_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        out |= wgpu::BufferUsages::INDIRECT;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn align_to_copy(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

struct ComputeProgramResources {
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    bindings: &'static [BindPoint],
}

impl ComputeProgramResources {
    fn new(device: &wgpu::Device, program: ComputeProgram) -> Self {
        let bindings = program_bindings(program);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(program_source(program))),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
            .iter()
            .map(|point| wgpu::BindGroupLayoutEntry {
                binding: point.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match point.kind {
                        BindKind::Uniform => wgpu::BufferBindingType::Uniform,
                        BindKind::StorageRead => {
                            wgpu::BufferBindingType::Storage { read_only: true }
                        }
                        BindKind::StorageReadWrite => {
                            wgpu::BufferBindingType::Storage { read_only: false }
                        }
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout_label = format!("{}BindLayout", program.label());
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&layout_label),
            entries: &entries,
        });

        let pipeline_layout_label = format!("{}PipelineLayout", program.label());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&pipeline_layout_label),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(program.label()),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            bind_layout,
            bindings,
        }
    }
}

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// [`GpuBackend`] on top of a wgpu device.
///
/// Command buffers map to `wgpu::CommandEncoder`s; uploads are staged into a mapped buffer and
/// copied inside the encoder so they stay ordered with resize copies.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_handle: u64,
    buffers: HashMap<BufferHandle, WgpuBuffer>,
    textures: HashMap<ImageHandle, wgpu::Texture>,
    encoders: HashMap<CommandBufferHandle, wgpu::CommandEncoder>,
    programs: HashMap<ComputeProgram, ComputeProgramResources>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let programs = ComputeProgram::ALL
            .iter()
            .map(|&program| (program, ComputeProgramResources::new(&device, program)))
            .collect();

        log::info!("Created {} compute programs", ComputeProgram::ALL.len());

        Self {
            device,
            queue,
            next_handle: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            encoders: HashMap::new(),
            programs,
        }
    }

    /// Creates a device without a surface, for offline use and tools.
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(Self::request_headless())
    }

    async fn request_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::NoAdapter)?;

        log::info!("Using adapter: {:?}", adapter.get_info());

        let adapter_features = adapter.features();
        let mut required_features = wgpu::Features::empty();
        if adapter_features.contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT) {
            required_features |= wgpu::Features::MULTI_DRAW_INDIRECT_COUNT;
        } else {
            log::warn!("Indirect draw count not supported by adapter");
        }
        if adapter_features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            required_features |= wgpu::Features::INDIRECT_FIRST_INSTANCE;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|_| RenderError::NoAdapter)?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Raw buffer access for the rendering layer (indirect draws, vertex pulling).
    pub fn buffer(&self, buffer: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer).map(|b| &b.buffer)
    }

    pub fn texture(&self, texture: ImageHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&texture)
    }

    /// Single-layer depth view for rendering into one face/cascade of a shadow map.
    pub fn texture_layer_view(
        &self,
        texture: ImageHandle,
        layer: u32,
    ) -> Option<wgpu::TextureView> {
        let texture = self.textures.get(&texture)?;
        Some(texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("ShadowMapLayer"),
            format: Some(SHADOW_MAP_FORMAT),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        }))
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn lookup(&self, buffer: BufferHandle) -> Result<&WgpuBuffer> {
        self.buffers
            .get(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(RenderError::ZeroSizedBuffer(desc.label.to_string()));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: align_to_copy(desc.size),
            usage: to_wgpu_usage(desc.usage),
            mapped_at_creation: false,
        });

        let handle = BufferHandle(self.allocate_handle());
        self.buffers.insert(
            handle,
            WgpuBuffer {
                buffer,
                size: align_to_copy(desc.size),
            },
        );
        Ok(handle)
    }

    /// Drops the handle only. Encoders that still reference the buffer keep it alive until
    /// their submission completes, so a resize can copy out of it and free it in one pass.
    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("WgpuBackend::destroy_buffer: unknown buffer {:?}", buffer);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<ImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::TextureCreation {
                tag: desc.label.clone(),
                reason: "zero extent".to_string(),
            });
        }

        let layers = match desc.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
            TextureKind::D2Array => desc.layers.max(1),
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_MAP_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let handle = ImageHandle(self.allocate_handle());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: ImageHandle) {
        if self.textures.remove(&texture).is_none() {
            log::warn!("WgpuBackend::destroy_texture: unknown texture {:?}", texture);
        }
    }

    fn acquire_command_buffer(&mut self, label: &str) -> Result<CommandBufferHandle> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        let handle = CommandBufferHandle(self.allocate_handle());
        self.encoders.insert(handle, encoder);
        Ok(handle)
    }

    fn submit_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<()> {
        let encoder = self
            .encoders
            .remove(&command_buffer)
            .ok_or(RenderError::CommandBuffer(command_buffer))?;
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn begin_copy_pass(&mut self, command_buffer: CommandBufferHandle) -> Result<CopyPass> {
        if !self.encoders.contains_key(&command_buffer) {
            return Err(RenderError::CommandBuffer(command_buffer));
        }
        Ok(CopyPass { command_buffer })
    }

    fn end_copy_pass(&mut self, _copy_pass: CopyPass) {}

    fn upload_to_buffer(
        &mut self,
        copy_pass: &CopyPass,
        buffer: BufferHandle,
        writes: &[BufferWrite<'_>],
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let target_size = self.lookup(buffer)?.size;
        let mut staging = Vec::new();
        let mut regions = Vec::with_capacity(writes.len());

        for write in writes {
            let len = write.data.len() as u64;
            if write.offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
                || len % wgpu::COPY_BUFFER_ALIGNMENT != 0
            {
                return Err(RenderError::UnalignedCopy {
                    offset: write.offset,
                    len,
                });
            }
            if write.offset + len > target_size {
                return Err(RenderError::UpdateOutOfBounds {
                    tag: format!("{:?}", buffer),
                    offset: write.offset,
                    len,
                    size: target_size,
                });
            }

            regions.push((staging.len() as u64, write.offset, len));
            staging.extend_from_slice(write.data);
        }

        let staging_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("TransferBuffer"),
                contents: &staging,
                usage: wgpu::BufferUsages::COPY_SRC,
            });

        let target = &self
            .buffers
            .get(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))?
            .buffer;
        let encoder = self
            .encoders
            .get_mut(&copy_pass.command_buffer)
            .ok_or(RenderError::CommandBuffer(copy_pass.command_buffer))?;

        for (src_offset, dst_offset, len) in regions {
            encoder.copy_buffer_to_buffer(&staging_buffer, src_offset, target, dst_offset, len);
        }

        Ok(())
    }

    fn copy_buffer(
        &mut self,
        copy_pass: &CopyPass,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let source = self.buffers.get(&src).ok_or(RenderError::UnknownBuffer(src))?;
        let destination = self.buffers.get(&dst).ok_or(RenderError::UnknownBuffer(dst))?;

        let size = align_to_copy(size)
            .min(source.size - src_offset.min(source.size))
            .min(destination.size - dst_offset.min(destination.size));
        if size == 0 {
            return Ok(());
        }

        let encoder = self
            .encoders
            .get_mut(&copy_pass.command_buffer)
            .ok_or(RenderError::CommandBuffer(copy_pass.command_buffer))?;
        encoder.copy_buffer_to_buffer(
            &source.buffer,
            src_offset,
            &destination.buffer,
            dst_offset,
            size,
        );
        Ok(())
    }

    fn dispatch_compute(
        &mut self,
        command_buffer: CommandBufferHandle,
        dispatch: &ComputeDispatch<'_>,
    ) -> Result<()> {
        let program = self
            .programs
            .get(&dispatch.program)
            .ok_or_else(|| RenderError::PipelineCreation(dispatch.program.label().to_string()))?;

        let mut uniform_buffers = Vec::new();
        for (name, data) in &dispatch.uniforms {
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(*name),
                    contents: *data,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            uniform_buffers.push((*name, buffer));
        }

        let mut entries = Vec::with_capacity(program.bindings.len());
        for point in program.bindings {
            let resource = match point.kind {
                BindKind::Uniform => uniform_buffers
                    .iter()
                    .find(|(name, _)| *name == point.name)
                    .map(|(_, buffer)| buffer.as_entire_binding()),
                BindKind::StorageRead | BindKind::StorageReadWrite => dispatch
                    .storage
                    .iter()
                    .find(|(name, _)| *name == point.name)
                    .and_then(|(_, handle)| self.buffers.get(handle))
                    .map(|entry| entry.buffer.as_entire_binding()),
            };

            let resource = resource.ok_or(RenderError::MissingBinding {
                program: dispatch.program.label(),
                bind_point: point.name,
            })?;

            entries.push(wgpu::BindGroupEntry {
                binding: point.binding,
                resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.program.label()),
            layout: &program.bind_layout,
            entries: &entries,
        });

        let encoder = self
            .encoders
            .get_mut(&command_buffer)
            .ok_or(RenderError::CommandBuffer(command_buffer))?;

        let [x, y, z] = dispatch.workgroups;
        if x == 0 || y == 0 || z == 0 {
            return Ok(());
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.program.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, z);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_translation_keeps_transfer_bits() {
        let usage = to_wgpu_usage(
            BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
        );
        assert!(usage.contains(wgpu::BufferUsages::STORAGE));
        assert!(usage.contains(wgpu::BufferUsages::COPY_SRC));
        assert!(usage.contains(wgpu::BufferUsages::COPY_DST));
        assert!(!usage.contains(wgpu::BufferUsages::INDIRECT));
    }

    #[test]
    fn copy_sizes_round_up_to_alignment() {
        assert_eq!(align_to_copy(1), 4);
        assert_eq!(align_to_copy(4), 4);
        assert_eq!(align_to_copy(13), 16);
    }

    #[test]
    fn every_program_binds_its_outputs() {
        for program in ComputeProgram::ALL {
            let names: Vec<_> = program_bindings(program).iter().map(|b| b.name).collect();
            assert!(names.contains(&bind::BATCH_DATA));
            assert!(names.contains(&bind::INPUT_PARAMS));
            assert!(names.contains(&bind::MESH_PAYLOADS));
        }
    }
}
