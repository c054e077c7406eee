use crate::error::Result;
use crate::gpu::CopyPass;
use crate::renderer::data_store::DataStores;
use crate::renderer::draw_passes::DrawPasses;
use crate::renderer::group_lights::GroupLights;
use crate::renderer::object_draw_pass::ObjectDrawPassType;
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::StateUpdate;

pub const DRAW_PASS_CAMERA_OBJECT_OPAQUE: &str = "Camera-Opaque";
pub const DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT: &str = "Camera-Translucent";
pub const DRAW_PASS_CAMERA_SPRITE: &str = "Camera-Sprite";

/// A named set of objects, sprites and lights rendered together.
#[derive(Debug)]
pub struct Group {
    name: String,
    data_stores: DataStores,
    draw_passes: DrawPasses,
    lights: GroupLights,
}

impl Group {
    /// Creates the group's mirrors and its three camera passes.
    pub fn create(ctx: &mut RenderContext<'_>, name: &str) -> Result<Self> {
        let copy_pass = ctx.gpu.begin_copy_pass(ctx.command_buffer)?;
        let created = Self::create_parts(ctx, name, &copy_pass);
        ctx.end_copy_pass(copy_pass);
        created
    }

    fn create_parts(ctx: &mut RenderContext<'_>, name: &str, copy_pass: &CopyPass) -> Result<Self> {
        let mut data_stores = DataStores::create(ctx.gpu, name)?;
        let mut draw_passes = DrawPasses::new(name);

        let mut lights = match GroupLights::create(ctx, name) {
            Ok(lights) => lights,
            Err(err) => {
                data_stores.destroy(ctx.gpu);
                return Err(err);
            }
        };

        if let Err(err) = Self::add_camera_passes(ctx, copy_pass, &mut draw_passes, &data_stores) {
            log::error!("Group::create: failed to create camera passes for {}: {}", name, err);
            lights.destroy(ctx, &mut draw_passes);
            draw_passes.destroy(ctx);
            data_stores.destroy(ctx.gpu);
            return Err(err);
        }

        Ok(Self {
            name: name.to_string(),
            data_stores,
            draw_passes,
            lights,
        })
    }

    fn add_camera_passes(
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) -> Result<()> {
        draw_passes.add_object_pass(
            ctx,
            copy_pass,
            DRAW_PASS_CAMERA_OBJECT_OPAQUE,
            ObjectDrawPassType::Opaque,
            data_stores,
        )?;
        draw_passes.add_object_pass(
            ctx,
            copy_pass,
            DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT,
            ObjectDrawPassType::Translucent,
            data_stores,
        )?;
        draw_passes.add_sprite_pass(ctx, copy_pass, DRAW_PASS_CAMERA_SPRITE, data_stores)
    }

    pub fn destroy(&mut self, ctx: &mut RenderContext<'_>) {
        self.lights.destroy(ctx, &mut self.draw_passes);
        self.draw_passes.destroy(ctx);
        self.data_stores.destroy(ctx.gpu);
    }

    /// Mirrors first, then draw passes, then lights, so passes and shadow passes see the
    /// freshest payloads.
    pub fn apply_state_update(&mut self, ctx: &mut RenderContext<'_>, update: &StateUpdate) {
        if update.is_empty() {
            return;
        }

        let Some(copy_pass) = ctx.begin_copy_pass("Group::apply_state_update") else {
            return;
        };

        let rejected = self.data_stores.apply_state_update(ctx, &copy_pass, update);
        // Passes only batch what the stores hold
        let update = rejected.apply_to(update);
        self.draw_passes.apply_state_update(ctx, &copy_pass, &update);
        self.lights.apply_state_update(
            ctx,
            &copy_pass,
            &update,
            &mut self.draw_passes,
            &self.data_stores,
        );

        ctx.end_copy_pass(copy_pass);
    }

    pub fn on_render_settings_changed(&mut self, ctx: &mut RenderContext<'_>) {
        self.draw_passes.on_render_settings_changed();
        self.lights.on_render_settings_changed(ctx, &mut self.draw_passes);

        if let Some(copy_pass) = ctx.begin_copy_pass("Group::on_render_settings_changed") {
            self.data_stores.on_render_settings_changed(ctx, &copy_pass);
            ctx.end_copy_pass(copy_pass);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_stores(&self) -> &DataStores {
        &self.data_stores
    }

    pub fn draw_passes(&self) -> &DrawPasses {
        &self.draw_passes
    }

    pub fn draw_passes_mut(&mut self) -> &mut DrawPasses {
        &mut self.draw_passes
    }

    pub fn lights(&self) -> &GroupLights {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut GroupLights {
        &mut self.lights
    }

    /// Split borrow for the frame flow, which drives lights and passes together.
    pub fn parts_mut(&mut self) -> (&DataStores, &mut DrawPasses, &mut GroupLights) {
        (&self.data_stores, &mut self.draw_passes, &mut self.lights)
    }
}
