use std::collections::BTreeMap;

use crate::error::{RenderError, Result};
use crate::gpu::CopyPass;
use crate::renderer::batches::DrawList;
use crate::renderer::data_store::DataStores;
use crate::renderer::object_draw_pass::{ObjectBatching, ObjectDrawPass, ObjectDrawPassType};
use crate::renderer::projection::ViewProjection;
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::{ObjectRenderable, SpriteRenderable, StateUpdate};
use crate::renderer::sprite_draw_pass::{SpriteBatching, SpriteDrawPass};

#[derive(Debug)]
pub enum AnyDrawPass {
    Object(ObjectDrawPass),
    Sprite(SpriteDrawPass),
}

impl AnyDrawPass {
    pub fn name(&self) -> &str {
        match self {
            Self::Object(pass) => pass.name(),
            Self::Sprite(pass) => pass.name(),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Object(pass) => pass.tag(),
            Self::Sprite(pass) => pass.tag(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectDrawPass> {
        match self {
            Self::Object(pass) => Some(pass),
            Self::Sprite(_) => None,
        }
    }

    pub fn as_sprite(&self) -> Option<&SpriteDrawPass> {
        match self {
            Self::Sprite(pass) => Some(pass),
            Self::Object(_) => None,
        }
    }

    fn destroy(&mut self, ctx: &mut RenderContext<'_>) {
        match self {
            Self::Object(pass) => pass.destroy(ctx),
            Self::Sprite(pass) => pass.destroy(ctx),
        }
    }

    fn apply_state_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        update: &StateUpdate,
    ) -> Result<()> {
        match self {
            Self::Object(pass) => pass.apply_state_update(ctx, copy_pass, update),
            Self::Sprite(pass) => pass.apply_state_update(ctx, copy_pass, update),
        }
    }

    pub fn set_view_projection(&mut self, view_projection: ViewProjection) {
        match self {
            Self::Object(pass) => pass.set_view_projection(view_projection),
            Self::Sprite(pass) => pass.set_view_projection(view_projection),
        }
    }

    pub fn view_projection(&self) -> Option<&ViewProjection> {
        match self {
            Self::Object(pass) => pass.view_projection(),
            Self::Sprite(pass) => pass.view_projection(),
        }
    }

    pub fn are_draw_calls_invalidated(&self) -> bool {
        match self {
            Self::Object(pass) => pass.are_draw_calls_invalidated(),
            Self::Sprite(pass) => pass.are_draw_calls_invalidated(),
        }
    }

    pub fn mark_draw_calls_invalidated(&mut self) {
        match self {
            Self::Object(pass) => pass.mark_draw_calls_invalidated(),
            Self::Sprite(pass) => pass.mark_draw_calls_invalidated(),
        }
    }

    fn on_render_settings_changed(&mut self) {
        match self {
            Self::Object(pass) => pass.on_render_settings_changed(),
            Self::Sprite(pass) => pass.on_render_settings_changed(),
        }
    }

    fn compute_draw_calls_if_needed(
        &mut self,
        ctx: &mut RenderContext<'_>,
        data_stores: &DataStores,
    ) -> Result<bool> {
        match self {
            Self::Object(pass) => pass.compute_draw_calls_if_needed(ctx, &data_stores.objects),
            Self::Sprite(pass) => pass.compute_draw_calls_if_needed(ctx, &data_stores.sprites),
        }
    }

    pub fn draw_list(&self) -> DrawList {
        match self {
            Self::Object(pass) => pass.draw_list(),
            Self::Sprite(pass) => pass.draw_list(),
        }
    }
}

/// Named draw passes of one group, all fed from the group's data stores.
#[derive(Debug)]
pub struct DrawPasses {
    group_name: String,
    passes: BTreeMap<String, AnyDrawPass>,
}

impl DrawPasses {
    pub fn new(group_name: &str) -> Self {
        Self {
            group_name: group_name.to_string(),
            passes: BTreeMap::new(),
        }
    }

    /// Creates an object pass and seeds it with the objects already in the group.
    pub fn add_object_pass(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        name: &str,
        pass_type: ObjectDrawPassType,
        data_stores: &DataStores,
    ) -> Result<()> {
        self.ensure_unused(name)?;

        let mut pass = ObjectDrawPass::create(ctx, ObjectBatching { pass_type }, &self.group_name, name)?;
        let existing: Vec<ObjectRenderable> = data_stores.objects.instances().copied().collect();
        if let Err(err) = pass.add(ctx, copy_pass, &existing) {
            pass.destroy(ctx);
            return Err(err);
        }

        log::debug!("DrawPasses: added {}", pass.tag());
        self.passes.insert(name.to_string(), AnyDrawPass::Object(pass));
        Ok(())
    }

    pub fn add_sprite_pass(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        name: &str,
        data_stores: &DataStores,
    ) -> Result<()> {
        self.ensure_unused(name)?;

        let mut pass = SpriteDrawPass::create(ctx, SpriteBatching, &self.group_name, name)?;
        let existing: Vec<SpriteRenderable> = data_stores.sprites.instances().copied().collect();
        if let Err(err) = pass.add(ctx, copy_pass, &existing) {
            pass.destroy(ctx);
            return Err(err);
        }

        log::debug!("DrawPasses: added {}", pass.tag());
        self.passes.insert(name.to_string(), AnyDrawPass::Sprite(pass));
        Ok(())
    }

    fn ensure_unused(&self, name: &str) -> Result<()> {
        if self.passes.contains_key(name) {
            log::error!(
                "DrawPasses: group {} already has a draw pass named {}",
                self.group_name,
                name
            );
            return Err(RenderError::DuplicateDrawPass(name.to_string()));
        }
        Ok(())
    }

    pub fn destroy_pass(&mut self, ctx: &mut RenderContext<'_>, name: &str) -> Result<()> {
        let mut pass = self
            .passes
            .remove(name)
            .ok_or_else(|| RenderError::UnknownDrawPass(name.to_string()))?;
        pass.destroy(ctx);
        Ok(())
    }

    pub fn destroy(&mut self, ctx: &mut RenderContext<'_>) {
        for pass in self.passes.values_mut() {
            pass.destroy(ctx);
        }
        self.passes.clear();
    }

    /// Fans the update out to every pass; a failing pass is logged and the rest still run.
    pub fn apply_state_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        update: &StateUpdate,
    ) {
        for pass in self.passes.values_mut() {
            if let Err(err) = pass.apply_state_update(ctx, copy_pass, update) {
                log::error!(
                    "DrawPasses::apply_state_update: {} failed: {}",
                    pass.tag(),
                    err
                );
            }
        }
    }

    /// Returns how many passes recomputed their draw calls.
    pub fn compute_draw_calls_if_needed(
        &mut self,
        ctx: &mut RenderContext<'_>,
        data_stores: &DataStores,
    ) -> usize {
        let mut computed = 0;
        for pass in self.passes.values_mut() {
            match pass.compute_draw_calls_if_needed(ctx, data_stores) {
                Ok(true) => computed += 1,
                Ok(false) => {}
                Err(err) => log::error!(
                    "DrawPasses::compute_draw_calls_if_needed: {} failed: {}",
                    pass.tag(),
                    err
                ),
            }
        }
        computed
    }

    pub fn on_render_settings_changed(&mut self) {
        for pass in self.passes.values_mut() {
            pass.on_render_settings_changed();
        }
    }

    pub fn mark_all_draw_calls_invalidated(&mut self) {
        for pass in self.passes.values_mut() {
            pass.mark_draw_calls_invalidated();
        }
    }

    pub fn set_view_projection(&mut self, name: &str, view_projection: ViewProjection) -> Result<()> {
        self.get_mut(name)
            .ok_or_else(|| RenderError::UnknownDrawPass(name.to_string()))?
            .set_view_projection(view_projection);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AnyDrawPass> {
        self.passes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AnyDrawPass> {
        self.passes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnyDrawPass)> {
        self.passes.iter().map(|(name, pass)| (name.as_str(), pass))
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBackend, RecordingBackend};
    use crate::ids::{MaterialId, MeshId, ObjectId, RendererIds};
    use crate::renderer::resources::{AlphaMode, Material, Mesh, MeshLod, Resources};
    use crate::settings::RenderSettings;

    struct Fixture {
        gpu: RecordingBackend,
        settings: RenderSettings,
        resources: Resources,
        ids: RendererIds,
        stores: DataStores,
        passes: DrawPasses,
    }

    impl Fixture {
        fn new() -> Self {
            let mut gpu = RecordingBackend::new();
            let mut resources = Resources::create(&mut gpu).unwrap();
            let cmd = gpu.acquire_command_buffer("setup").unwrap();
            let copy_pass = gpu.begin_copy_pass(cmd).unwrap();
            let mesh = Mesh {
                lods: vec![MeshLod {
                    render_distance: 100.0,
                    vertex_offset: 0,
                    first_index: 0,
                    num_indices: 36,
                }],
                cull_volume: None,
            };
            resources.meshes.add_mesh(&mut gpu, &copy_pass, MeshId(1), mesh).unwrap();
            gpu.end_copy_pass(copy_pass);
            resources.materials.insert(MaterialId(1), Material::pbr(Some(AlphaMode::Opaque)));
            resources.materials.insert(MaterialId(2), Material::pbr(Some(AlphaMode::Blend)));

            let stores = DataStores::create(&mut gpu, "World").unwrap();
            Self {
                gpu,
                settings: RenderSettings::default(),
                resources,
                ids: RendererIds::default(),
                stores,
                passes: DrawPasses::new("World"),
            }
        }

        fn add_object_pass(&mut self, name: &str, pass_type: ObjectDrawPassType) -> Result<()> {
            let cmd = self.gpu.acquire_command_buffer("add").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            let copy_pass = ctx.begin_copy_pass("add").unwrap();
            let added = self
                .passes
                .add_object_pass(&mut ctx, &copy_pass, name, pass_type, &self.stores);
            ctx.end_copy_pass(copy_pass);
            added
        }

        fn apply(&mut self, update: &StateUpdate) {
            let cmd = self.gpu.acquire_command_buffer("apply").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            let copy_pass = ctx.begin_copy_pass("apply").unwrap();
            let rejected = self.stores.apply_state_update(&mut ctx, &copy_pass, update);
            let update = rejected.apply_to(update);
            self.passes.apply_state_update(&mut ctx, &copy_pass, &update);
            ctx.end_copy_pass(copy_pass);
        }

        fn compute(&mut self) -> usize {
            let cmd = self.gpu.acquire_command_buffer("compute").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            self.passes.compute_draw_calls_if_needed(&mut ctx, &self.stores)
        }

        fn members(&self, name: &str) -> usize {
            self.passes
                .get(name)
                .and_then(AnyDrawPass::as_object)
                .unwrap()
                .batches()
                .member_count()
        }
    }

    fn objects(update: &mut StateUpdate, materials: &[u32]) {
        for (index, material) in materials.iter().enumerate() {
            update.to_add_objects.push(ObjectRenderable::new(
                ObjectId(index as u32 + 1),
                MeshId(1),
                MaterialId(*material),
            ));
        }
    }

    #[test]
    fn updates_fan_out_to_every_pass() {
        let mut fx = Fixture::new();
        fx.add_object_pass("Opaque", ObjectDrawPassType::Opaque).unwrap();
        fx.add_object_pass("Translucent", ObjectDrawPassType::Translucent).unwrap();

        let mut update = StateUpdate::for_group("World");
        objects(&mut update, &[1, 1, 2]);
        fx.apply(&update);

        assert_eq!(fx.members("Opaque"), 2);
        assert_eq!(fx.members("Translucent"), 1);
    }

    #[test]
    fn late_passes_are_seeded_from_the_data_stores() {
        let mut fx = Fixture::new();
        let mut update = StateUpdate::for_group("World");
        objects(&mut update, &[1, 2, 1]);
        fx.apply(&update);

        fx.add_object_pass("Shadow", ObjectDrawPassType::ShadowCaster).unwrap();
        assert_eq!(fx.members("Shadow"), 3);
    }

    #[test]
    fn duplicate_and_unknown_names_are_rejected() {
        let mut fx = Fixture::new();
        fx.add_object_pass("Opaque", ObjectDrawPassType::Opaque).unwrap();
        assert!(matches!(
            fx.add_object_pass("Opaque", ObjectDrawPassType::Opaque),
            Err(RenderError::DuplicateDrawPass(_))
        ));

        let cmd = fx.gpu.acquire_command_buffer("destroy").unwrap();
        let mut ctx = RenderContext::new(&mut fx.gpu, cmd, &fx.settings, &fx.resources, &mut fx.ids);
        assert!(matches!(
            fx.passes.destroy_pass(&mut ctx, "Missing"),
            Err(RenderError::UnknownDrawPass(_))
        ));
        fx.passes.destroy_pass(&mut ctx, "Opaque").unwrap();
        assert!(fx.passes.is_empty());
    }

    #[test]
    fn only_passes_with_a_view_and_stale_draws_are_computed() {
        let mut fx = Fixture::new();
        fx.add_object_pass("Opaque", ObjectDrawPassType::Opaque).unwrap();
        fx.add_object_pass("Translucent", ObjectDrawPassType::Translucent).unwrap();

        let camera = crate::renderer::camera::Camera::default();
        let view_projection =
            crate::renderer::projection::world_camera_view_projection(&camera, 100.0).unwrap();
        fx.passes.set_view_projection("Opaque", view_projection).unwrap();

        assert_eq!(fx.compute(), 1);
        assert_eq!(fx.compute(), 0);

        fx.passes.mark_all_draw_calls_invalidated();
        assert_eq!(fx.compute(), 1);
        assert!(fx.passes.get("Translucent").unwrap().are_draw_calls_invalidated());
    }
}
