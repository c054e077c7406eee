// src/renderer/render_context.rs

use crate::gpu::{CommandBufferHandle, CopyPass, GpuBackend};
use crate::ids::RendererIds;
use crate::renderer::resources::Resources;
use crate::settings::RenderSettings;

/// Context handed to every group-level operation
///
/// This bundles the backend, the id allocators and the shared registries for the duration of
/// one call, together with the command buffer the operation records into.
pub struct RenderContext<'a> {
    pub gpu: &'a mut dyn GpuBackend,
    pub command_buffer: CommandBufferHandle,
    pub settings: &'a RenderSettings,
    pub resources: &'a Resources,
    pub ids: &'a mut RendererIds,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        gpu: &'a mut dyn GpuBackend,
        command_buffer: CommandBufferHandle,
        settings: &'a RenderSettings,
        resources: &'a Resources,
        ids: &'a mut RendererIds,
    ) -> Self {
        Self {
            gpu,
            command_buffer,
            settings,
            resources,
            ids,
        }
    }

    /// Begin a copy pass on the context's command buffer
    ///
    /// Failure is logged with `what` and reported as `None`; callers skip their uploads for
    /// this frame.
    pub fn begin_copy_pass(&mut self, what: &str) -> Option<CopyPass> {
        match self.gpu.begin_copy_pass(self.command_buffer) {
            Ok(pass) => Some(pass),
            Err(err) => {
                log::error!("{}: failed to begin copy pass: {}", what, err);
                None
            }
        }
    }

    pub fn end_copy_pass(&mut self, copy_pass: CopyPass) {
        self.gpu.end_copy_pass(copy_pass);
    }
}
