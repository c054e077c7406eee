use std::collections::{HashMap, HashSet};

use bytemuck::Pod;

use crate::error::{RenderError, Result};
use crate::gpu::{
    BufferDescriptor, BufferHandle, BufferUsage, BufferWrite, CommandBufferHandle, ComputeDispatch,
    ComputeProgram, CopyPass, GpuBackend, ImageHandle, TextureDescriptor,
};

/// Counters for the work a [`RecordingBackend`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub copy_passes: usize,
    /// Number of `upload_to_buffer` calls.
    pub uploads: usize,
    /// Number of regions written across all uploads.
    pub upload_regions: usize,
    pub upload_bytes: u64,
    pub buffer_copies: usize,
    pub dispatches: usize,
    pub submits: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    pub program: ComputeProgram,
    pub workgroups: [u32; 3],
    pub storage: Vec<(&'static str, BufferHandle)>,
    pub uniforms: Vec<(&'static str, Vec<u8>)>,
}

impl RecordedDispatch {
    pub fn storage_buffer(&self, bind_point: &str) -> Option<BufferHandle> {
        self.storage
            .iter()
            .find(|(name, _)| *name == bind_point)
            .map(|(_, handle)| *handle)
    }

    pub fn uniform<T: Pod>(&self, bind_point: &str) -> Option<T> {
        self.uniforms
            .iter()
            .find(|(name, _)| *name == bind_point)
            .and_then(|(_, bytes)| bytemuck::try_pod_read_unaligned(bytes).ok())
    }
}

#[derive(Debug)]
struct RecordedBuffer {
    label: String,
    usage: BufferUsage,
    bytes: Vec<u8>,
}

/// Headless backend that keeps buffer contents in host memory.
///
/// Uploads and copies are applied immediately, so recording order inside a copy pass is also
/// execution order. Compute dispatches are only recorded.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_handle: u64,
    buffers: HashMap<BufferHandle, RecordedBuffer>,
    textures: HashMap<ImageHandle, TextureDescriptor>,
    open_command_buffers: HashSet<CommandBufferHandle>,
    dispatches: Vec<RecordedDispatch>,
    stats: GpuStats,
    pub fail_buffer_creation: bool,
    pub fail_texture_creation: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &GpuStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = GpuStats::default();
        self.dispatches.clear();
    }

    pub fn dispatches(&self) -> &[RecordedDispatch] {
        &self.dispatches
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture(&self, texture: ImageHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture)
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.bytes.as_slice())
    }

    pub fn buffer_label(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffers.get(&buffer).map(|b| b.label.as_str())
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&buffer).map(|b| b.usage)
    }

    /// Reads element `index` of a buffer viewed as an array of `T`.
    pub fn read_item<T: Pod>(&self, buffer: BufferHandle, index: usize) -> Option<T> {
        let bytes = self.buffer_bytes(buffer)?;
        let stride = std::mem::size_of::<T>();
        let start = index * stride;
        bytes
            .get(start..start + stride)
            .and_then(|slice| bytemuck::try_pod_read_unaligned(slice).ok())
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> Result<&mut RecordedBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))
    }

    fn ensure_open(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        if self.open_command_buffers.contains(&command_buffer) {
            Ok(())
        } else {
            Err(RenderError::CommandBuffer(command_buffer))
        }
    }
}

impl GpuBackend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        if self.fail_buffer_creation {
            return Err(RenderError::BufferCreation {
                tag: desc.label.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let handle = BufferHandle(self.allocate_handle());
        self.buffers.insert(
            handle,
            RecordedBuffer {
                label: desc.label.to_string(),
                usage: desc.usage,
                bytes: vec![0; desc.size as usize],
            },
        );
        self.stats.buffers_created += 1;
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<ImageHandle> {
        if self.fail_texture_creation {
            return Err(RenderError::TextureCreation {
                tag: desc.label.clone(),
                reason: "injected failure".to_string(),
            });
        }

        let handle = ImageHandle(self.allocate_handle());
        self.textures.insert(handle, desc.clone());
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: ImageHandle) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures_destroyed += 1;
        }
    }

    fn acquire_command_buffer(&mut self, _label: &str) -> Result<CommandBufferHandle> {
        let handle = CommandBufferHandle(self.allocate_handle());
        self.open_command_buffers.insert(handle);
        Ok(handle)
    }

    fn submit_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<()> {
        if !self.open_command_buffers.remove(&command_buffer) {
            return Err(RenderError::CommandBuffer(command_buffer));
        }
        self.stats.submits += 1;
        Ok(())
    }

    fn begin_copy_pass(&mut self, command_buffer: CommandBufferHandle) -> Result<CopyPass> {
        self.ensure_open(command_buffer)?;
        self.stats.copy_passes += 1;
        Ok(CopyPass { command_buffer })
    }

    fn end_copy_pass(&mut self, _copy_pass: CopyPass) {}

    fn upload_to_buffer(
        &mut self,
        copy_pass: &CopyPass,
        buffer: BufferHandle,
        writes: &[BufferWrite<'_>],
    ) -> Result<()> {
        self.ensure_open(copy_pass.command_buffer)?;

        let target = self.buffer_mut(buffer)?;
        let size = target.bytes.len() as u64;
        for write in writes {
            let end = write.offset + write.data.len() as u64;
            if end > size {
                return Err(RenderError::UpdateOutOfBounds {
                    tag: target.label.clone(),
                    offset: write.offset,
                    len: write.data.len() as u64,
                    size,
                });
            }
        }

        let mut written = 0u64;
        for write in writes {
            let start = write.offset as usize;
            target.bytes[start..start + write.data.len()].copy_from_slice(write.data);
            written += write.data.len() as u64;
        }

        self.stats.uploads += 1;
        self.stats.upload_regions += writes.len();
        self.stats.upload_bytes += written;
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
        self.ensure_open(copy_pass.command_buffer)?;

        let source = self
            .buffers
            .get(&src)
            .ok_or(RenderError::UnknownBuffer(src))?;
        let start = src_offset as usize;
        let end = start + size as usize;
        let chunk = source
            .bytes
            .get(start..end)
            .ok_or_else(|| RenderError::UpdateOutOfBounds {
                tag: source.label.clone(),
                offset: src_offset,
                len: size,
                size: source.bytes.len() as u64,
            })?
            .to_vec();

        let target = self.buffer_mut(dst)?;
        let dst_start = dst_offset as usize;
        let dst_end = dst_start + chunk.len();
        if dst_end > target.bytes.len() {
            return Err(RenderError::UpdateOutOfBounds {
                tag: target.label.clone(),
                offset: dst_offset,
                len: size,
                size: target.bytes.len() as u64,
            });
        }
        target.bytes[dst_start..dst_end].copy_from_slice(&chunk);

        self.stats.buffer_copies += 1;
        Ok(())
    }

    fn dispatch_compute(
        &mut self,
        command_buffer: CommandBufferHandle,
        dispatch: &ComputeDispatch<'_>,
    ) -> Result<()> {
        self.ensure_open(command_buffer)?;

        for (_, buffer) in &dispatch.storage {
            if !self.buffers.contains_key(buffer) {
                return Err(RenderError::UnknownBuffer(*buffer));
            }
        }

        self.dispatches.push(RecordedDispatch {
            program: dispatch.program,
            workgroups: dispatch.workgroups,
            storage: dispatch.storage.clone(),
            uniforms: dispatch
                .uniforms
                .iter()
                .map(|(name, bytes)| (*name, bytes.to_vec()))
                .collect(),
        });
        self.stats.dispatches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_and_copies_apply_in_order() {
        let mut gpu = RecordingBackend::new();
        let a = gpu
            .create_buffer(&BufferDescriptor {
                label: "A",
                usage: BufferUsage::STORAGE,
                size: 8,
            })
            .unwrap();
        let b = gpu
            .create_buffer(&BufferDescriptor {
                label: "B",
                usage: BufferUsage::STORAGE,
                size: 8,
            })
            .unwrap();

        let cmd = gpu.acquire_command_buffer("Test").unwrap();
        let pass = gpu.begin_copy_pass(cmd).unwrap();
        gpu.upload_to_buffer(
            &pass,
            a,
            &[BufferWrite {
                offset: 0,
                data: &[1, 2, 3, 4],
            }],
        )
        .unwrap();
        gpu.copy_buffer(&pass, a, 0, b, 4, 4).unwrap();
        gpu.end_copy_pass(pass);
        gpu.submit_command_buffer(cmd).unwrap();

        assert_eq!(gpu.buffer_bytes(b).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(gpu.stats().uploads, 1);
        assert_eq!(gpu.stats().buffer_copies, 1);
        assert_eq!(gpu.stats().submits, 1);
    }

    #[test]
    fn out_of_bounds_upload_is_rejected_without_partial_write() {
        let mut gpu = RecordingBackend::new();
        let a = gpu
            .create_buffer(&BufferDescriptor {
                label: "A",
                usage: BufferUsage::STORAGE,
                size: 4,
            })
            .unwrap();
        let cmd = gpu.acquire_command_buffer("Test").unwrap();
        let pass = gpu.begin_copy_pass(cmd).unwrap();

        let result = gpu.upload_to_buffer(
            &pass,
            a,
            &[
                BufferWrite {
                    offset: 0,
                    data: &[9, 9],
                },
                BufferWrite {
                    offset: 3,
                    data: &[9, 9],
                },
            ],
        );

        assert!(result.is_err());
        assert_eq!(gpu.buffer_bytes(a).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn copy_pass_requires_open_command_buffer() {
        let mut gpu = RecordingBackend::new();
        assert!(gpu.begin_copy_pass(CommandBufferHandle(42)).is_err());
    }
}
