//! Capability interface over the graphics API.
//!
//! Everything above this module talks to the GPU through [`GpuBackend`] using plain handles, so the
//! batching and shadow bookkeeping can run against [`WgpuBackend`] or the headless
//! [`RecordingBackend`].

pub mod recording;
pub mod wgpu_backend;

use bitflags::bitflags;

use crate::error::Result;

pub use recording::{GpuStats, RecordedDispatch, RecordingBackend};
pub use wgpu_backend::WgpuBackend;

/// Local work-group size shared by every cull/draw compute shader.
pub const COMPUTE_WORKGROUP_SIZE: u32 = 256;

/// Shader bind-point names shared by the cull and draw programs.
pub mod bind {
    pub const VIEW_PROJECTION: &str = "u_viewProjectionData";
    pub const INPUT_PARAMS: &str = "u_inputParams";
    pub const OBJECT_INSTANCES: &str = "i_objectInstances";
    pub const SPRITE_INSTANCES: &str = "i_spriteInstances";
    pub const MEMBERSHIP: &str = "i_membership";
    pub const MESH_PAYLOADS: &str = "i_meshPayloads";
    pub const BATCH_DATA: &str = "o_batchData";
    pub const DRAW_DATAS: &str = "o_drawDatas";
    pub const DRAW_COMMANDS: &str = "o_drawCommands";
    pub const DRAW_COUNTS: &str = "o_drawCounts";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferHandle(pub u64);

/// Scope for transfer work recorded into a command buffer. Copies inside one pass execute in
/// the order they were recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPass {
    pub command_buffer: CommandBufferHandle,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STORAGE = 1 << 0;
        const VERTEX = 1 << 1;
        const INDEX = 1 << 2;
        const INDIRECT = 1 << 3;
        const UNIFORM = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    D2Array,
    Cube,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: String,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeProgram {
    ObjectCull,
    ObjectDraw,
    SpriteCull,
    SpriteDraw,
}

impl ComputeProgram {
    pub const ALL: [ComputeProgram; 4] = [
        ComputeProgram::ObjectCull,
        ComputeProgram::ObjectDraw,
        ComputeProgram::SpriteCull,
        ComputeProgram::SpriteDraw,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ComputeProgram::ObjectCull => "ObjectCull",
            ComputeProgram::ObjectDraw => "ObjectDraw",
            ComputeProgram::SpriteCull => "SpriteCull",
            ComputeProgram::SpriteDraw => "SpriteDraw",
        }
    }
}

/// One region of a buffer upload.
#[derive(Debug, Clone, Copy)]
pub struct BufferWrite<'a> {
    pub offset: u64,
    pub data: &'a [u8],
}

/// A compute dispatch with its resources addressed by shader bind-point name.
#[derive(Debug, Clone)]
pub struct ComputeDispatch<'a> {
    pub program: ComputeProgram,
    pub storage: Vec<(&'static str, BufferHandle)>,
    pub uniforms: Vec<(&'static str, &'a [u8])>,
    pub workgroups: [u32; 3],
}

impl<'a> ComputeDispatch<'a> {
    pub fn new(program: ComputeProgram) -> Self {
        Self {
            program,
            storage: Vec::new(),
            uniforms: Vec::new(),
            workgroups: [1, 1, 1],
        }
    }

    pub fn storage(mut self, bind_point: &'static str, buffer: BufferHandle) -> Self {
        self.storage.push((bind_point, buffer));
        self
    }

    pub fn uniform(mut self, bind_point: &'static str, data: &'a [u8]) -> Self {
        self.uniforms.push((bind_point, data));
        self
    }

    /// Covers `invocations` threads with groups of [`COMPUTE_WORKGROUP_SIZE`].
    pub fn covering(mut self, invocations: u32) -> Self {
        self.workgroups = [invocations.div_ceil(COMPUTE_WORKGROUP_SIZE), 1, 1];
        self
    }
}

pub trait GpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<ImageHandle>;
    fn destroy_texture(&mut self, texture: ImageHandle);

    fn acquire_command_buffer(&mut self, label: &str) -> Result<CommandBufferHandle>;
    fn submit_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<()>;

    fn begin_copy_pass(&mut self, command_buffer: CommandBufferHandle) -> Result<CopyPass>;
    fn end_copy_pass(&mut self, copy_pass: CopyPass);

    /// Stages every region through one transfer allocation and copies each into `buffer`.
    fn upload_to_buffer(
        &mut self,
        copy_pass: &CopyPass,
        buffer: BufferHandle,
        writes: &[BufferWrite<'_>],
    ) -> Result<()>;

    fn copy_buffer(
        &mut self,
        copy_pass: &CopyPass,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    fn dispatch_compute(
        &mut self,
        command_buffer: CommandBufferHandle,
        dispatch: &ComputeDispatch<'_>,
    ) -> Result<()>;
}
