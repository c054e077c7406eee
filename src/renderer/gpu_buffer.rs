use crate::error::{RenderError, Result};
use crate::gpu::{BufferDescriptor, BufferHandle, BufferUsage, BufferWrite, CopyPass, GpuBackend};

/// A linear GPU buffer that is always updatable and resizable.
#[derive(Debug)]
pub struct GpuBuffer {
    handle: BufferHandle,
    usage: BufferUsage,
    byte_size: u64,
    tag: String,
}

impl GpuBuffer {
    pub fn create(
        gpu: &mut dyn GpuBackend,
        usage: BufferUsage,
        byte_size: u64,
        tag: &str,
    ) -> Result<Self> {
        if byte_size == 0 {
            log::error!("GpuBuffer::create: buffer {} requested with zero size", tag);
            return Err(RenderError::ZeroSizedBuffer(tag.to_string()));
        }

        let usage = usage | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST;
        let handle = gpu.create_buffer(&BufferDescriptor {
            label: tag,
            usage,
            size: byte_size,
        })?;

        Ok(Self {
            handle,
            usage,
            byte_size,
            tag: tag.to_string(),
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        gpu.destroy_buffer(self.handle);
        self.byte_size = 0;
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Writes every region or none of them.
    pub fn update(
        &self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        writes: &[BufferWrite<'_>],
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        for write in writes {
            let len = write.data.len() as u64;
            if write.offset + len > self.byte_size {
                log::error!(
                    "GpuBuffer::update: write of {} bytes at {} overflows buffer {} ({} bytes)",
                    len,
                    write.offset,
                    self.tag,
                    self.byte_size
                );
                return Err(RenderError::UpdateOutOfBounds {
                    tag: self.tag.clone(),
                    offset: write.offset,
                    len,
                    size: self.byte_size,
                });
            }
        }

        gpu.upload_to_buffer(copy_pass, self.handle, writes)
    }

    /// Reallocates to `byte_size`, copying `min(old, new)` bytes forward.
    pub fn resize_retaining(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        byte_size: u64,
    ) -> Result<()> {
        self.resize(gpu, Some(copy_pass), byte_size)
    }

    /// Reallocates to `byte_size`; previous contents are dropped.
    pub fn resize_discarding(&mut self, gpu: &mut dyn GpuBackend, byte_size: u64) -> Result<()> {
        self.resize(gpu, None, byte_size)
    }

    fn resize(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: Option<&CopyPass>,
        byte_size: u64,
    ) -> Result<()> {
        if byte_size == 0 {
            return Err(RenderError::ZeroSizedBuffer(self.tag.clone()));
        }

        if byte_size == self.byte_size {
            return Ok(());
        }

        let new_handle = gpu.create_buffer(&BufferDescriptor {
            label: &self.tag,
            usage: self.usage,
            size: byte_size,
        })?;

        if let Some(copy_pass) = copy_pass {
            if self.byte_size > 0 {
                let copy_size = self.byte_size.min(byte_size);
                if let Err(err) =
                    gpu.copy_buffer(copy_pass, self.handle, 0, new_handle, 0, copy_size)
                {
                    log::error!("GpuBuffer::resize: failed to copy {} forward: {}", self.tag, err);
                    gpu.destroy_buffer(new_handle);
                    return Err(err);
                }
            }
        }

        log::debug!(
            "Resized buffer {}: {} -> {} bytes",
            self.tag,
            self.byte_size,
            byte_size
        );

        gpu.destroy_buffer(self.handle);
        self.handle = new_handle;
        self.byte_size = byte_size;

        Ok(())
    }
}
