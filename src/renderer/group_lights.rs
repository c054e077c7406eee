use std::collections::BTreeMap;

use crate::error::Result;
use crate::gpu::{BufferUsage, CopyPass, ImageHandle, TextureDescriptor};
use crate::ids::LightId;
use crate::renderer::camera::Camera;
use crate::renderer::data_store::DataStores;
use crate::renderer::draw_passes::DrawPasses;
use crate::renderer::item_buffer::{ItemBuffer, ItemUpdate};
use crate::renderer::lights::{Light, LightType, MAX_PER_LIGHT_SHADOW_RENDER_COUNT};
use crate::renderer::object_draw_pass::ObjectDrawPassType;
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::StateUpdate;
use crate::renderer::shadow_projection::{light_shadow_renders, ShadowMapPayload, ShadowRenderParams};

/// Where a shadow render is in its refresh cycle.
///
/// `Synced -> Invalidated -> PendingRefresh -> PendingRender -> Synced`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowRenderState {
    /// The shadow map layer matches the scene.
    Synced,
    /// Something the layer depends on changed.
    Invalidated,
    /// Waiting for its view-projection and payload to be pushed.
    PendingRefresh,
    /// Refreshed; waiting to be rendered into its layer.
    PendingRender,
}

#[derive(Debug, Clone)]
pub struct ShadowRender {
    pub state: ShadowRenderState,
    pub params: ShadowRenderParams,
    pub draw_pass_name: String,
}

#[derive(Debug, Clone)]
pub struct LightState {
    pub light: Light,
    pub shadow_map: Option<ImageHandle>,
    pub shadow_renders: Vec<ShadowRender>,
}

impl LightState {
    fn mark_all(&mut self, state: ShadowRenderState) {
        for render in &mut self.shadow_renders {
            render.state = state;
        }
    }
}

/// One shadow render the frame should record: its target layer and the pass that draws it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRenderTarget {
    pub light_id: LightId,
    pub light_type: LightType,
    pub shadow_map: ImageHandle,
    /// Cube face or array layer, equal to the render index.
    pub layer: u32,
    pub draw_pass_name: String,
}

fn shadow_draw_pass_name(light_id: LightId, index: usize) -> String {
    format!("Light:{}:{}", light_id, index)
}

fn shadow_payload_index(light_id: LightId, index: usize) -> usize {
    light_id.index() * MAX_PER_LIGHT_SHADOW_RENDER_COUNT + index
}

/// The lights of one group and the shadow maps of those that cast shadows.
#[derive(Debug)]
pub struct GroupLights {
    group_name: String,
    lights: BTreeMap<LightId, LightState>,
    shadow_payloads: ItemBuffer<ShadowMapPayload>,
    world_camera: Option<Camera>,
}

impl GroupLights {
    pub fn create(ctx: &mut RenderContext<'_>, group_name: &str) -> Result<Self> {
        let shadow_payloads = ItemBuffer::create(
            ctx.gpu,
            BufferUsage::STORAGE,
            MAX_PER_LIGHT_SHADOW_RENDER_COUNT * 8,
            &format!("{}:ShadowMapPayloads", group_name),
        )?;

        Ok(Self {
            group_name: group_name.to_string(),
            lights: BTreeMap::new(),
            shadow_payloads,
            world_camera: None,
        })
    }

    pub fn destroy(&mut self, ctx: &mut RenderContext<'_>, draw_passes: &mut DrawPasses) {
        let lights = std::mem::take(&mut self.lights);
        for (_, mut state) in lights {
            self.destroy_shadow(ctx, &mut state, draw_passes);
        }
        self.shadow_payloads.destroy(ctx.gpu);
    }

    pub fn get(&self, light_id: LightId) -> Option<&LightState> {
        self.lights.get(&light_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LightState> {
        self.lights.values()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn shadow_payloads_buffer(&self) -> &ItemBuffer<ShadowMapPayload> {
        &self.shadow_payloads
    }

    pub fn apply_state_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        update: &StateUpdate,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) {
        for light in &update.to_add_lights {
            self.add_light(ctx, copy_pass, *light, draw_passes, data_stores);
        }
        for light in &update.to_update_lights {
            self.update_light(ctx, copy_pass, *light, draw_passes, data_stores);
        }
        for light_id in &update.to_delete_lights {
            self.remove_light(ctx, *light_id, draw_passes);
        }
    }

    fn add_light(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        light: Light,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) {
        if self.lights.contains_key(&light.id) {
            log::warn!("GroupLights::add_light: light {} already exists, updating it", light.id);
            self.update_light(ctx, copy_pass, light, draw_passes, data_stores);
            return;
        }

        let mut state = LightState {
            light,
            shadow_map: None,
            shadow_renders: Vec::new(),
        };

        if light.casts_shadows {
            self.init_shadow_or_disable(ctx, copy_pass, &mut state, draw_passes, data_stores);
        }

        self.lights.insert(light.id, state);
    }

    fn update_light(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        light: Light,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) {
        let Some(mut state) = self.lights.remove(&light.id) else {
            log::warn!("GroupLights::update_light: no such light {}", light.id);
            return;
        };

        let previous = state.light;
        state.light = light;
        let had_shadow = state.shadow_map.is_some();

        match (had_shadow, light.casts_shadows) {
            (false, true) => {
                log::info!("GroupLights: light {} started casting shadows", light.id);
                self.init_shadow_or_disable(ctx, copy_pass, &mut state, draw_passes, data_stores);
            }
            (true, false) => {
                log::info!("GroupLights: light {} stopped casting shadows", light.id);
                self.destroy_shadow(ctx, &mut state, draw_passes);
            }
            (true, true) if previous.light_type != light.light_type => {
                // Render count and texture shape both follow the light type
                self.destroy_shadow(ctx, &mut state, draw_passes);
                self.init_shadow_or_disable(ctx, copy_pass, &mut state, draw_passes, data_stores);
            }
            (true, true) => match self.shadow_params(ctx, &state.light) {
                Ok(params) => {
                    for (render, params) in state.shadow_renders.iter_mut().zip(params) {
                        render.params = params;
                        render.state = ShadowRenderState::Invalidated;
                    }
                }
                Err(err) => log::error!(
                    "GroupLights::update_light: failed to recompute shadow params for light {}: {}",
                    light.id,
                    err
                ),
            },
            (false, false) => {}
        }

        self.lights.insert(light.id, state);
    }

    fn remove_light(
        &mut self,
        ctx: &mut RenderContext<'_>,
        light_id: LightId,
        draw_passes: &mut DrawPasses,
    ) {
        let Some(mut state) = self.lights.remove(&light_id) else {
            log::warn!("GroupLights::remove_light: no such light {}", light_id);
            return;
        };
        self.destroy_shadow(ctx, &mut state, draw_passes);
    }

    fn shadow_params(
        &self,
        ctx: &RenderContext<'_>,
        light: &Light,
    ) -> Result<Vec<ShadowRenderParams>> {
        light_shadow_renders(ctx.settings, light, self.world_camera.as_ref())
    }

    fn create_shadow_map(&self, ctx: &mut RenderContext<'_>, light: &Light) -> Result<ImageHandle> {
        let resolution = ctx.settings.shadow_map_resolution();
        ctx.gpu.create_texture(&TextureDescriptor {
            label: format!("ShadowMap:{}:{}", self.group_name, light.id),
            kind: light.light_type.shadow_texture_kind(),
            width: resolution,
            height: resolution,
            layers: light.light_type.shadow_render_count() as u32,
        })
    }

    /// Initialises shadow resources, or clears the light's shadow flag if that fails.
    fn init_shadow_or_disable(
        &self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        state: &mut LightState,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) {
        if let Err(err) = self.init_shadow(ctx, copy_pass, state, draw_passes, data_stores) {
            log::error!(
                "GroupLights: failed to initialise shadows for light {}, disabling them: {}",
                state.light.id,
                err
            );
            state.light.casts_shadows = false;
        }
    }

    fn init_shadow(
        &self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        state: &mut LightState,
        draw_passes: &mut DrawPasses,
        data_stores: &DataStores,
    ) -> Result<()> {
        let params = self.shadow_params(ctx, &state.light)?;
        let shadow_map = self.create_shadow_map(ctx, &state.light)?;

        let mut renders: Vec<ShadowRender> = Vec::with_capacity(params.len());
        for (index, params) in params.into_iter().enumerate() {
            let name = shadow_draw_pass_name(state.light.id, index);
            let created = draw_passes.add_object_pass(
                ctx,
                copy_pass,
                &name,
                ObjectDrawPassType::ShadowCaster,
                data_stores,
            );

            if let Err(err) = created {
                for render in &renders {
                    if let Err(cleanup) = draw_passes.destroy_pass(ctx, &render.draw_pass_name) {
                        log::warn!("GroupLights::init_shadow: {}", cleanup);
                    }
                }
                ctx.gpu.destroy_texture(shadow_map);
                return Err(err);
            }

            renders.push(ShadowRender {
                state: ShadowRenderState::PendingRefresh,
                params,
                draw_pass_name: name,
            });
        }

        state.shadow_map = Some(shadow_map);
        state.shadow_renders = renders;
        Ok(())
    }

    fn destroy_shadow(
        &self,
        ctx: &mut RenderContext<'_>,
        state: &mut LightState,
        draw_passes: &mut DrawPasses,
    ) {
        if let Some(shadow_map) = state.shadow_map.take() {
            ctx.gpu.destroy_texture(shadow_map);
        }

        for render in state.shadow_renders.drain(..) {
            if let Err(err) = draw_passes.destroy_pass(ctx, &render.draw_pass_name) {
                log::warn!("GroupLights::destroy_shadow: {}", err);
            }
        }
    }

    /// Recreates every shadow map at the new resolution and queues a full refresh.
    pub fn on_render_settings_changed(&mut self, ctx: &mut RenderContext<'_>, draw_passes: &mut DrawPasses) {
        let light_ids: Vec<LightId> = self.lights.keys().copied().collect();

        for light_id in light_ids {
            let Some(mut state) = self.lights.remove(&light_id) else {
                continue;
            };

            if let Some(shadow_map) = state.shadow_map.take() {
                ctx.gpu.destroy_texture(shadow_map);

                match self.create_shadow_map(ctx, &state.light) {
                    Ok(shadow_map) => {
                        state.shadow_map = Some(shadow_map);
                        match self.shadow_params(ctx, &state.light) {
                            Ok(params) => {
                                for (render, params) in state.shadow_renders.iter_mut().zip(params) {
                                    render.params = params;
                                }
                            }
                            Err(err) => log::error!(
                                "GroupLights::on_render_settings_changed: shadow params for light {}: {}",
                                light_id,
                                err
                            ),
                        }
                        state.mark_all(ShadowRenderState::PendingRefresh);
                    }
                    Err(err) => {
                        log::error!(
                            "GroupLights::on_render_settings_changed: failed to recreate shadow map for light {}, disabling shadows: {}",
                            light_id,
                            err
                        );
                        self.destroy_shadow(ctx, &mut state, draw_passes);
                        state.light.casts_shadows = false;
                    }
                }
            }

            self.lights.insert(light_id, state);
        }
    }

    /// Refits directional cascades to a moved world camera.
    pub fn process_latest_world_camera(&mut self, ctx: &RenderContext<'_>, camera: &Camera) {
        self.world_camera = Some(*camera);

        for state in self.lights.values_mut() {
            if state.light.light_type != LightType::Directional || state.shadow_map.is_none() {
                continue;
            }

            let up_to_date = state
                .shadow_renders
                .iter()
                .all(|render| render.params.camera.as_ref() == Some(camera));
            if up_to_date {
                continue;
            }

            match light_shadow_renders(ctx.settings, &state.light, Some(camera)) {
                Ok(params) => {
                    for (render, params) in state.shadow_renders.iter_mut().zip(params) {
                        render.params = params;
                        render.state = ShadowRenderState::Invalidated;
                    }
                }
                Err(err) => log::error!(
                    "GroupLights::process_latest_world_camera: light {}: {}",
                    state.light.id,
                    err
                ),
            }
        }
    }

    /// Advances every shadow render toward `PendingRender`, pushing view-projections into the
    /// shadow draw passes and payloads into the shadow payload buffer. Returns how many renders
    /// were refreshed.
    pub fn sync_shadow_renders(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        draw_passes: &mut DrawPasses,
    ) -> usize {
        for state in self.lights.values_mut() {
            for render in &mut state.shadow_renders {
                if render.state == ShadowRenderState::Synced
                    && draw_passes
                        .get(&render.draw_pass_name)
                        .is_some_and(|pass| pass.are_draw_calls_invalidated())
                {
                    render.state = ShadowRenderState::Invalidated;
                }
                if render.state == ShadowRenderState::Invalidated {
                    render.state = ShadowRenderState::PendingRefresh;
                }
            }
        }

        let mut budget = ctx
            .settings
            .max_shadow_refreshes_per_frame
            .map(|max| max as usize)
            .unwrap_or(usize::MAX);

        let mut refreshed = 0;
        for (light_id, state) in self.lights.iter_mut() {
            let mut payloads: Vec<ItemUpdate<ShadowMapPayload>> = Vec::new();
            let mut refreshing: Vec<usize> = Vec::new();

            for (index, render) in state.shadow_renders.iter().enumerate() {
                if render.state != ShadowRenderState::PendingRefresh || budget == 0 {
                    continue;
                }
                budget -= 1;

                if let Err(err) =
                    draw_passes.set_view_projection(&render.draw_pass_name, render.params.view_projection)
                {
                    log::error!("GroupLights::sync_shadow_renders: {}", err);
                    continue;
                }
                payloads.push(ItemUpdate::new(
                    shadow_payload_index(*light_id, index),
                    render.params.payload(),
                ));
                refreshing.push(index);
            }

            if payloads.is_empty() {
                continue;
            }

            let highest = shadow_payload_index(*light_id, MAX_PER_LIGHT_SHADOW_RENDER_COUNT - 1);
            let written = self
                .shadow_payloads
                .resize_at_least(ctx.gpu, Some(copy_pass), highest + 1)
                .and_then(|_| self.shadow_payloads.update(ctx.gpu, copy_pass, &payloads));
            if let Err(err) = written {
                log::error!(
                    "GroupLights::sync_shadow_renders: failed to write shadow payloads for light {}: {}",
                    light_id,
                    err
                );
                continue;
            }

            for index in refreshing {
                state.shadow_renders[index].state = ShadowRenderState::PendingRender;
            }
            refreshed += payloads.len();
        }

        if refreshed > 0 {
            log::debug!("{}: refreshed {} shadow renders", self.group_name, refreshed);
        }
        refreshed
    }

    /// Shadow renders ready to be drawn, in light id then render index order.
    pub fn pending_shadow_renders(&self) -> Vec<ShadowRenderTarget> {
        let mut targets = Vec::new();
        for state in self.lights.values() {
            let Some(shadow_map) = state.shadow_map else {
                continue;
            };

            for (index, render) in state.shadow_renders.iter().enumerate() {
                if render.state == ShadowRenderState::PendingRender {
                    targets.push(ShadowRenderTarget {
                        light_id: state.light.id,
                        light_type: state.light.light_type,
                        shadow_map,
                        layer: index as u32,
                        draw_pass_name: render.draw_pass_name.clone(),
                    });
                }
            }
        }
        targets
    }

    pub fn mark_shadow_render_synced(&mut self, light_id: LightId, layer: u32) {
        let render = self
            .lights
            .get_mut(&light_id)
            .and_then(|state| state.shadow_renders.get_mut(layer as usize));

        match render {
            Some(render) if render.state == ShadowRenderState::PendingRender => {
                render.state = ShadowRenderState::Synced;
            }
            Some(render) => log::warn!(
                "GroupLights::mark_shadow_render_synced: light {} render {} is {:?}, not pending render",
                light_id,
                layer,
                render.state
            ),
            None => log::warn!(
                "GroupLights::mark_shadow_render_synced: no shadow render {} for light {}",
                layer,
                light_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBackend, RecordingBackend, TextureKind};
    use crate::ids::{MaterialId, MeshId, ObjectId, RendererIds};
    use crate::renderer::renderables::ObjectRenderable;
    use crate::renderer::resources::{Material, Mesh, MeshLod, Resources};
    use crate::settings::{RenderSettings, ShadowQuality};

    struct Fixture {
        gpu: RecordingBackend,
        settings: RenderSettings,
        resources: Resources,
        ids: RendererIds,
        stores: DataStores,
        passes: DrawPasses,
        lights: GroupLights,
    }

    impl Fixture {
        fn new(settings: RenderSettings) -> Self {
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
            resources.materials.insert(MaterialId(1), Material::pbr(None));

            let mut ids = RendererIds::default();
            let stores = DataStores::create(&mut gpu, "World").unwrap();
            let lights = {
                let mut ctx = RenderContext::new(&mut gpu, cmd, &settings, &resources, &mut ids);
                GroupLights::create(&mut ctx, "World").unwrap()
            };

            Self {
                gpu,
                settings,
                resources,
                ids,
                stores,
                passes: DrawPasses::new("World"),
                lights,
            }
        }

        fn apply(&mut self, update: &StateUpdate) {
            let cmd = self.gpu.acquire_command_buffer("apply").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            let copy_pass = ctx.begin_copy_pass("apply").unwrap();
            let rejected = self.stores.apply_state_update(&mut ctx, &copy_pass, update);
            let update = rejected.apply_to(update);
            self.passes.apply_state_update(&mut ctx, &copy_pass, &update);
            self.lights
                .apply_state_update(&mut ctx, &copy_pass, &update, &mut self.passes, &self.stores);
            ctx.end_copy_pass(copy_pass);
        }

        fn add_light(&mut self, light: Light) {
            let mut update = StateUpdate::for_group("World");
            update.to_add_lights = vec![light];
            self.apply(&update);
        }

        fn sync(&mut self) -> usize {
            let cmd = self.gpu.acquire_command_buffer("sync").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            let copy_pass = ctx.begin_copy_pass("sync").unwrap();
            let refreshed = self.lights.sync_shadow_renders(&mut ctx, &copy_pass, &mut self.passes);
            ctx.end_copy_pass(copy_pass);
            refreshed
        }

        fn compute(&mut self) -> usize {
            let cmd = self.gpu.acquire_command_buffer("compute").unwrap();
            let mut ctx =
                RenderContext::new(&mut self.gpu, cmd, &self.settings, &self.resources, &mut self.ids);
            self.passes.compute_draw_calls_if_needed(&mut ctx, &self.stores)
        }

        fn render_all_pending(&mut self) -> usize {
            let targets = self.lights.pending_shadow_renders();
            for target in &targets {
                self.lights.mark_shadow_render_synced(target.light_id, target.layer);
            }
            targets.len()
        }

        fn states(&self, light_id: u32) -> Vec<ShadowRenderState> {
            self.lights
                .get(LightId(light_id))
                .unwrap()
                .shadow_renders
                .iter()
                .map(|render| render.state)
                .collect()
        }
    }

    fn shadow_light(id: u32, light_type: LightType) -> Light {
        let mut light = Light::new(LightId(id), light_type);
        light.casts_shadows = true;
        light.area_of_effect = 45.0;
        light
    }

    #[test]
    fn point_light_gets_a_cube_map_and_six_passes() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(2, LightType::Point));

        let state = fx.lights.get(LightId(2)).unwrap();
        let texture = fx.gpu.texture(state.shadow_map.unwrap()).unwrap();
        assert_eq!(texture.kind, TextureKind::Cube);
        assert_eq!(texture.layers, 6);
        assert_eq!(texture.width, ShadowQuality::High.resolution());
        assert_eq!(texture.label, "ShadowMap:World:2");

        for index in 0..6 {
            let pass = fx.passes.get(&format!("Light:2:{}", index)).unwrap();
            assert!(pass.as_object().is_some());
        }
        assert_eq!(fx.states(2), vec![ShadowRenderState::PendingRefresh; 6]);
    }

    #[test]
    fn sync_pushes_view_projections_and_payloads() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Spotlight));

        assert_eq!(fx.sync(), 1);
        assert_eq!(fx.states(1), vec![ShadowRenderState::PendingRender]);

        let params = fx.lights.get(LightId(1)).unwrap().shadow_renders[0].params;
        let pass = fx.passes.get("Light:1:0").unwrap();
        assert_eq!(pass.view_projection(), Some(&params.view_projection));

        let payload: ShadowMapPayload = fx
            .gpu
            .read_item(fx.lights.shadow_payloads_buffer().handle(), 6)
            .unwrap();
        assert_eq!(payload, params.payload());

        let targets = fx.lights.pending_shadow_renders();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].draw_pass_name, "Light:1:0");
        assert_eq!(fx.render_all_pending(), 1);
        assert_eq!(fx.states(1), vec![ShadowRenderState::Synced]);
    }

    #[test]
    fn refresh_budget_spreads_renders_over_frames() {
        let settings = RenderSettings {
            max_shadow_refreshes_per_frame: Some(4),
            ..RenderSettings::default()
        };
        let mut fx = Fixture::new(settings);
        fx.add_light(shadow_light(1, LightType::Point));

        assert_eq!(fx.sync(), 4);
        let states = fx.states(1);
        assert_eq!(&states[..4], &[ShadowRenderState::PendingRender; 4]);
        assert_eq!(&states[4..], &[ShadowRenderState::PendingRefresh; 2]);

        assert_eq!(fx.render_all_pending(), 4);
        fx.compute();
        assert_eq!(fx.sync(), 2);
        assert_eq!(fx.render_all_pending(), 2);
        assert_eq!(fx.states(1), vec![ShadowRenderState::Synced; 6]);
    }

    #[test]
    fn object_changes_send_synced_renders_back_through_the_cycle() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Spotlight));
        fx.sync();
        fx.compute();
        fx.render_all_pending();
        assert_eq!(fx.states(1), vec![ShadowRenderState::Synced]);

        // Nothing changed, nothing to refresh or upload
        let uploads = fx.gpu.stats().uploads;
        assert_eq!(fx.sync(), 0);
        assert_eq!(fx.gpu.stats().uploads, uploads);

        let mut update = StateUpdate::for_group("World");
        update.to_add_objects = vec![ObjectRenderable::new(ObjectId(1), MeshId(1), MaterialId(1))];
        fx.apply(&update);

        assert_eq!(fx.sync(), 1);
        assert_eq!(fx.states(1), vec![ShadowRenderState::PendingRender]);
    }

    #[test]
    fn moving_the_world_camera_refits_directional_cascades() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Directional));
        fx.sync();
        fx.render_all_pending();

        let camera = Camera::looking_at(glam::Vec3::new(0.0, 10.0, 30.0), glam::Vec3::ZERO, 1.5);
        {
            let cmd = fx.gpu.acquire_command_buffer("camera").unwrap();
            let ctx = RenderContext::new(&mut fx.gpu, cmd, &fx.settings, &fx.resources, &mut fx.ids);
            fx.lights.process_latest_world_camera(&ctx, &camera);
        }
        assert_eq!(fx.states(1), vec![ShadowRenderState::Invalidated; 4]);

        fx.sync();
        fx.render_all_pending();
        {
            let cmd = fx.gpu.acquire_command_buffer("camera").unwrap();
            let ctx = RenderContext::new(&mut fx.gpu, cmd, &fx.settings, &fx.resources, &mut fx.ids);
            fx.lights.process_latest_world_camera(&ctx, &camera);
        }
        assert_eq!(fx.states(1), vec![ShadowRenderState::Synced; 4]);
    }

    #[test]
    fn turning_shadows_off_releases_the_map_and_passes() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Spotlight));
        assert_eq!(fx.gpu.live_textures(), 1);

        let mut light = shadow_light(1, LightType::Spotlight);
        light.casts_shadows = false;
        let mut update = StateUpdate::for_group("World");
        update.to_update_lights = vec![light];
        fx.apply(&update);

        assert_eq!(fx.gpu.live_textures(), 0);
        assert!(fx.passes.is_empty());
        assert!(fx.lights.get(LightId(1)).unwrap().shadow_renders.is_empty());
    }

    #[test]
    fn failed_shadow_map_disables_shadows() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.gpu.fail_texture_creation = true;
        fx.add_light(shadow_light(1, LightType::Point));

        let state = fx.lights.get(LightId(1)).unwrap();
        assert!(!state.light.casts_shadows);
        assert!(state.shadow_map.is_none());
        assert!(fx.passes.is_empty());
    }

    #[test]
    fn settings_change_recreates_maps_at_the_new_resolution() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Spotlight));
        fx.sync();
        fx.render_all_pending();

        fx.settings.shadow_quality = ShadowQuality::Low;
        {
            let cmd = fx.gpu.acquire_command_buffer("settings").unwrap();
            let mut ctx =
                RenderContext::new(&mut fx.gpu, cmd, &fx.settings, &fx.resources, &mut fx.ids);
            fx.lights.on_render_settings_changed(&mut ctx, &mut fx.passes);
        }

        let state = fx.lights.get(LightId(1)).unwrap();
        let texture = fx.gpu.texture(state.shadow_map.unwrap()).unwrap();
        assert_eq!(texture.width, 1024);
        assert_eq!(fx.gpu.live_textures(), 1);
        assert_eq!(fx.states(1), vec![ShadowRenderState::PendingRefresh]);
    }

    #[test]
    fn removing_a_light_frees_its_shadow_resources() {
        let mut fx = Fixture::new(RenderSettings::default());
        fx.add_light(shadow_light(1, LightType::Point));

        let mut update = StateUpdate::for_group("World");
        update.to_delete_lights.insert(LightId(1));
        fx.apply(&update);

        assert!(fx.lights.is_empty());
        assert!(fx.passes.is_empty());
        assert_eq!(fx.gpu.live_textures(), 0);
    }
}
