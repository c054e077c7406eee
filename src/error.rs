use thiserror::Error;

use crate::gpu::{BufferHandle, CommandBufferHandle, ImageHandle};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create buffer '{tag}': {reason}")]
    BufferCreation { tag: String, reason: String },

    #[error("failed to create texture '{tag}': {reason}")]
    TextureCreation { tag: String, reason: String },

    #[error("buffer '{0}' cannot be zero-sized")]
    ZeroSizedBuffer(String),

    #[error("update of {len} bytes at offset {offset} exceeds buffer '{tag}' size of {size}")]
    UpdateOutOfBounds {
        tag: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("unknown texture {0:?}")]
    UnknownTexture(ImageHandle),

    #[error("command buffer {0:?} is not open")]
    CommandBuffer(CommandBufferHandle),

    #[error("copy of {len} bytes at offset {offset} is not 4-byte aligned")]
    UnalignedCopy { offset: u64, len: u64 },

    #[error("dispatch of '{program}' is missing binding '{bind_point}'")]
    MissingBinding {
        program: &'static str,
        bind_point: &'static str,
    },

    #[error("failed to create compute pipeline '{0}'")]
    PipelineCreation(String),

    #[error("missing material {0}")]
    MissingMaterial(u32),

    #[error("missing texture {0}")]
    MissingTexture(u32),

    #[error("missing mesh {0}")]
    MissingMesh(u32),

    #[error("invalid projection: {0}")]
    InvalidProjection(&'static str),

    #[error("draw pass '{0}' already exists")]
    DuplicateDrawPass(String),

    #[error("no such draw pass '{0}'")]
    UnknownDrawPass(String),

    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("render thread is no longer running")]
    RenderThreadGone,
}

pub type Result<T> = std::result::Result<T, RenderError>;
