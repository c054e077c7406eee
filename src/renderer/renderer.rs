// renderer/renderer.rs
use crate::error::{RenderError, Result};
use crate::gpu::{CommandBufferHandle, GpuBackend};
use crate::ids::{LightId, MaterialId, MeshId, ObjectId, RendererIds, SpriteId, TextureId};
use crate::renderer::camera::Camera;
use crate::renderer::frame::{render_group, FrameRecorder, FrameStats, RenderFrameParams};
use crate::renderer::groups::Groups;
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::StateUpdate;
use crate::renderer::resources::{Material, Mesh, Resources, TextureInfo};
use crate::settings::RenderSettings;

/// Owns the backend and every group; all work funnels through here on one thread.
pub struct Renderer<B: GpuBackend> {
    gpu: B,
    settings: RenderSettings,
    ids: RendererIds,
    resources: Resources,
    groups: Groups,
    world_camera: Option<Camera>,
}

impl<B: GpuBackend> Renderer<B> {
    /// Creates the shared registries and registers the sprite quad mesh.
    pub fn start_up(mut gpu: B, settings: RenderSettings) -> Result<Self> {
        let settings = settings.validate();
        let mut resources = Resources::create(&mut gpu)?;
        let mut ids = RendererIds::default();

        let sprite_mesh_id = ids.meshes.acquire();
        let registered = upload(&mut gpu, "SpriteMesh", |gpu, cmd| {
            let copy_pass = gpu.begin_copy_pass(cmd)?;
            let added = resources
                .meshes
                .add_mesh(gpu, &copy_pass, sprite_mesh_id, Mesh::sprite_quad());
            gpu.end_copy_pass(copy_pass);
            added
        });
        if let Err(err) = registered {
            log::error!("Renderer::start_up: failed to register the sprite mesh: {}", err);
            resources.destroy(&mut gpu);
            return Err(err);
        }
        resources.meshes.set_sprite_mesh(sprite_mesh_id);

        log::info!(
            "Renderer started: max render distance {}, {}px shadow maps",
            settings.max_render_distance,
            settings.shadow_map_resolution()
        );

        Ok(Self {
            gpu,
            settings,
            ids,
            resources,
            groups: Groups::new(),
            world_camera: None,
        })
    }

    pub fn shut_down(&mut self) {
        log::info!("Renderer shutting down");
        match self.gpu.acquire_command_buffer("ShutDown") {
            Ok(cmd) => {
                let mut ctx = RenderContext::new(
                    &mut self.gpu,
                    cmd,
                    &self.settings,
                    &self.resources,
                    &mut self.ids,
                );
                self.groups.shut_down(&mut ctx);
                if let Err(err) = self.gpu.submit_command_buffer(cmd) {
                    log::warn!("Renderer::shut_down: {}", err);
                }
            }
            Err(err) => log::error!("Renderer::shut_down: failed to acquire command buffer: {}", err),
        }
        self.resources.destroy(&mut self.gpu);
        self.ids.reset();
        self.world_camera = None;
    }

    pub fn gpu(&self) -> &B {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut B {
        &mut self.gpu
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    /// The world camera of the most recent render task.
    pub fn latest_world_camera(&self) -> Option<&Camera> {
        self.world_camera.as_ref()
    }

    pub fn create_object_id(&mut self) -> ObjectId {
        self.ids.objects.acquire()
    }

    pub fn create_sprite_id(&mut self) -> SpriteId {
        self.ids.sprites.acquire()
    }

    pub fn create_light_id(&mut self) -> LightId {
        self.ids.lights.acquire()
    }

    pub fn create_mesh(&mut self, mesh: Mesh) -> Result<MeshId> {
        let id = self.ids.meshes.acquire();
        let meshes = &mut self.resources.meshes;
        let added = upload(&mut self.gpu, "CreateMesh", |gpu, cmd| {
            let copy_pass = gpu.begin_copy_pass(cmd)?;
            let added = meshes.add_mesh(gpu, &copy_pass, id, mesh);
            gpu.end_copy_pass(copy_pass);
            added
        });

        match added {
            Ok(()) => Ok(id),
            Err(err) => {
                log::error!("Renderer::create_mesh: {}", err);
                self.ids.meshes.release(id);
                Err(err)
            }
        }
    }

    pub fn destroy_mesh(&mut self, id: MeshId) -> Result<()> {
        if id == self.resources.meshes.sprite_mesh_id() {
            log::warn!("Renderer::destroy_mesh: refusing to destroy the sprite mesh");
            return Ok(());
        }

        let meshes = &mut self.resources.meshes;
        upload(&mut self.gpu, "DestroyMesh", |gpu, cmd| {
            let copy_pass = gpu.begin_copy_pass(cmd)?;
            let removed = meshes.remove_mesh(gpu, &copy_pass, id);
            gpu.end_copy_pass(copy_pass);
            removed
        })?;
        self.ids.meshes.release(id);
        Ok(())
    }

    pub fn create_material(&mut self, material: Material) -> MaterialId {
        let id = self.ids.materials.acquire();
        self.resources.materials.insert(id, material);
        id
    }

    /// Replaces a material. Passes filter on alpha mode, so every group recomputes its draws.
    pub fn update_material(&mut self, id: MaterialId, material: Material) -> Result<()> {
        if self.resources.materials.get(id).is_none() {
            return Err(RenderError::MissingMaterial(id.0));
        }
        self.resources.materials.insert(id, material);
        for group in self.groups.iter_mut() {
            group.draw_passes_mut().mark_all_draw_calls_invalidated();
        }
        Ok(())
    }

    pub fn destroy_material(&mut self, id: MaterialId) {
        if self.resources.materials.remove(id).is_some() {
            self.ids.materials.release(id);
        } else {
            log::warn!("Renderer::destroy_material: no such material {}", id);
        }
    }

    pub fn create_texture(&mut self, info: TextureInfo) -> TextureId {
        let id = self.ids.textures.acquire();
        self.resources.textures.insert(id, info);
        id
    }

    pub fn destroy_texture(&mut self, id: TextureId) {
        if self.resources.textures.remove(id).is_some() {
            self.ids.textures.release(id);
        } else {
            log::warn!("Renderer::destroy_texture: no such texture {}", id);
        }
    }

    /// Applies one delta in its own command buffer.
    pub fn apply_state_update(&mut self, update: &StateUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let cmd = self.gpu.acquire_command_buffer("StateUpdate")?;
        self.apply_state_update_into(cmd, update);
        self.gpu.submit_command_buffer(cmd)
    }

    fn apply_state_update_into(&mut self, cmd: CommandBufferHandle, update: &StateUpdate) {
        if update.is_empty() {
            return;
        }

        let mut ctx =
            RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
        match self.groups.get_or_create_group(&mut ctx, &update.group_name) {
            Ok(group) => group.apply_state_update(&mut ctx, update),
            Err(err) => log::error!(
                "Renderer::apply_state_update: failed to get or create group {}: {}",
                update.group_name,
                err
            ),
        }
    }

    /// Swaps in new settings and lets every group rebuild what depends on them.
    pub fn set_render_settings(&mut self, settings: RenderSettings) -> Result<()> {
        let settings = settings.validate();
        if settings == self.settings {
            return Ok(());
        }
        self.settings = settings;

        let cmd = self.gpu.acquire_command_buffer("RenderSettingsChanged")?;
        let mut ctx =
            RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
        self.groups.on_render_settings_changed(&mut ctx);
        self.gpu.submit_command_buffer(cmd)
    }

    /// Applies the frame's deltas, then renders each task's group in order.
    pub fn render_frame(
        &mut self,
        params: &RenderFrameParams,
        recorder: &mut dyn FrameRecorder,
    ) -> Result<FrameStats> {
        if params.state_updates.iter().any(|update| !update.is_empty()) {
            let cmd = self.gpu.acquire_command_buffer("StateUpdates")?;
            for update in &params.state_updates {
                self.apply_state_update_into(cmd, update);
            }
            self.gpu.submit_command_buffer(cmd)?;
        }

        let mut stats = FrameStats::default();
        let cmd = self.gpu.acquire_command_buffer("Render")?;

        for task in &params.render_tasks {
            self.world_camera = Some(task.world_camera);

            let mut ctx = RenderContext::new(
                &mut self.gpu,
                cmd,
                &self.settings,
                &self.resources,
                &mut self.ids,
            );
            let group = match self.groups.get_or_create_group(&mut ctx, &task.group_name) {
                Ok(group) => group,
                Err(err) => {
                    log::error!(
                        "Renderer::render_frame: failed to get or create group {}: {}",
                        task.group_name,
                        err
                    );
                    continue;
                }
            };

            match render_group(&mut ctx, group, task, recorder) {
                Ok(group_stats) => stats.accumulate(group_stats),
                Err(err) => log::error!(
                    "Renderer::render_frame: failed to render group {}: {}",
                    task.group_name,
                    err
                ),
            }
        }

        self.gpu.submit_command_buffer(cmd)?;
        Ok(stats)
    }
}

/// Runs `record` in a fresh command buffer and submits it.
fn upload<B: GpuBackend>(
    gpu: &mut B,
    label: &str,
    record: impl FnOnce(&mut B, CommandBufferHandle) -> Result<()>,
) -> Result<()> {
    let cmd = gpu.acquire_command_buffer(label)?;
    let recorded = record(gpu, cmd);
    let submitted = gpu.submit_command_buffer(cmd);
    recorded.and(submitted)
}
