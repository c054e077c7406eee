use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::error::{RenderError, Result};
use crate::gpu::{BufferHandle, BufferUsage, CopyPass, GpuBackend};
use crate::ids::{IdSource, LightId, ObjectId, RendererIds, SpriteId};
use crate::renderer::item_buffer::{ItemBuffer, ItemUpdate};
use crate::renderer::lights::{Light, LightPayload};
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::{ObjectRenderable, SpriteRenderable, StateUpdate};
use crate::renderer::resources::Resources;
use crate::settings::RenderSettings;

const INITIAL_INSTANCE_CAPACITY: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ObjectPayload {
    pub is_valid: u32,
    pub id: u32,
    pub mesh_id: u32,
    pub material_id: u32,
    pub model: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpritePayload {
    pub is_valid: u32,
    pub id: u32,
    pub mesh_id: u32,
    pub _pad0: u32,
    pub model: [[f32; 4]; 4],
    pub uv_translation: [f32; 2],
    pub uv_size: [f32; 2],
}

/// A kind of renderable that can be mirrored into a GPU payload array indexed by its id.
pub trait Renderable: Clone {
    type Id: Copy + Ord + Display + Into<u32> + From<u32>;
    type Payload: Pod + Debug;

    const TAG: &'static str;

    fn id(&self) -> Self::Id;

    fn payload(&self, settings: &RenderSettings, resources: &Resources) -> Result<Self::Payload>;

    /// Payload stored at a slot whose instance was removed.
    fn removed_payload(id: Self::Id) -> Self::Payload;

    fn id_source(ids: &mut RendererIds) -> &mut IdSource<Self::Id>;
}

impl Renderable for ObjectRenderable {
    type Id = ObjectId;
    type Payload = ObjectPayload;

    const TAG: &'static str = "Objects";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn payload(&self, _settings: &RenderSettings, resources: &Resources) -> Result<ObjectPayload> {
        if resources.meshes.get(self.mesh_id).is_none() {
            return Err(RenderError::MissingMesh(self.mesh_id.0));
        }

        Ok(ObjectPayload {
            is_valid: 1,
            id: self.id.0,
            mesh_id: self.mesh_id.0,
            material_id: self.material_id.0,
            model: self.model_transform.to_cols_array_2d(),
        })
    }

    fn removed_payload(id: ObjectId) -> ObjectPayload {
        ObjectPayload {
            id: id.0,
            ..ObjectPayload::default()
        }
    }

    fn id_source(ids: &mut RendererIds) -> &mut IdSource<ObjectId> {
        &mut ids.objects
    }
}

impl Renderable for SpriteRenderable {
    type Id = SpriteId;
    type Payload = SpritePayload;

    const TAG: &'static str = "Sprites";

    fn id(&self) -> SpriteId {
        self.id
    }

    fn payload(&self, _settings: &RenderSettings, resources: &Resources) -> Result<SpritePayload> {
        let texture = resources
            .textures
            .get(self.texture_id)
            .ok_or(RenderError::MissingTexture(self.texture_id.0))?;

        let mesh_id = resources.meshes.sprite_mesh_id();
        if !mesh_id.is_valid() {
            return Err(RenderError::MissingMesh(mesh_id.0));
        }

        let texture_size = Vec2::new(texture.width as f32, texture.height as f32);
        let (src_pos, src_size) = match self.src_pixel_rect {
            Some(rect) => (Vec2::new(rect.x, rect.y), Vec2::new(rect.w, rect.h)),
            None => (Vec2::ZERO, texture_size),
        };
        let dst_size = self.dst_size.unwrap_or(src_size);

        let model = Mat4::from_translation(self.position)
            * Mat4::from_quat(self.orientation)
            * Mat4::from_scale(Vec3::new(dst_size.x, dst_size.y, 1.0))
            * Mat4::from_scale(self.scale);

        Ok(SpritePayload {
            is_valid: 1,
            id: self.id.0,
            mesh_id: mesh_id.0,
            _pad0: 0,
            model: model.to_cols_array_2d(),
            uv_translation: (src_pos / texture_size).to_array(),
            uv_size: (src_size / texture_size).to_array(),
        })
    }

    fn removed_payload(id: SpriteId) -> SpritePayload {
        SpritePayload {
            id: id.0,
            ..SpritePayload::default()
        }
    }

    fn id_source(ids: &mut RendererIds) -> &mut IdSource<SpriteId> {
        &mut ids.sprites
    }
}

impl Renderable for Light {
    type Id = LightId;
    type Payload = LightPayload;

    const TAG: &'static str = "Lights";

    fn id(&self) -> LightId {
        self.id
    }

    fn payload(&self, settings: &RenderSettings, _resources: &Resources) -> Result<LightPayload> {
        Ok(Light::payload(self, settings))
    }

    fn removed_payload(id: LightId) -> LightPayload {
        LightPayload {
            id: id.0,
            ..LightPayload::default()
        }
    }

    fn id_source(ids: &mut RendererIds) -> &mut IdSource<LightId> {
        &mut ids.lights
    }
}

/// CPU copies and GPU payloads of one renderable kind, both indexed by instance id.
///
/// Slot 0 is never a live instance, so the GPU array always carries one leading invalid entry.
#[derive(Debug)]
pub struct InstanceDataStore<R: Renderable> {
    instances: Vec<Option<R>>,
    payloads: ItemBuffer<R::Payload>,
}

impl<R: Renderable> InstanceDataStore<R> {
    pub fn create(gpu: &mut dyn GpuBackend, group_name: &str) -> Result<Self> {
        let payloads = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE,
            INITIAL_INSTANCE_CAPACITY,
            &format!("{}:{}", group_name, R::TAG),
        )?;

        Ok(Self {
            instances: Vec::new(),
            payloads,
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.instances.clear();
        self.payloads.destroy(gpu);
    }

    /// Writes payloads for every instance that converts and returns the ids of those that did
    /// not. A rejected instance is dropped from the store: its slot is written invalid and its
    /// CPU copy forgotten, so nothing downstream keeps batching a stale payload.
    pub fn add_or_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        instances: &[R],
    ) -> Result<Vec<R::Id>> {
        let mut converted: Vec<(R::Id, R::Payload, &R)> = Vec::with_capacity(instances.len());
        let mut rejected: Vec<R::Id> = Vec::new();
        for instance in instances {
            match instance.payload(ctx.settings, ctx.resources) {
                Ok(payload) => converted.push((instance.id(), payload, instance)),
                Err(err) => {
                    log::error!(
                        "InstanceDataStore::add_or_update: rejecting {} instance {}: {}",
                        R::TAG,
                        instance.id(),
                        err
                    );
                    rejected.push(instance.id());
                }
            }
        }

        let highest = converted
            .iter()
            .map(|(id, _, _)| *id)
            .chain(rejected.iter().copied())
            .max();
        let Some(highest) = highest else {
            return Ok(rejected);
        };

        let highest_index = Into::<u32>::into(highest) as usize;
        self.payloads
            .resize_at_least(ctx.gpu, Some(copy_pass), highest_index + 1)?;

        let mut updates: Vec<ItemUpdate<R::Payload>> = converted
            .iter()
            .map(|(id, payload, _)| ItemUpdate::new(Into::<u32>::into(*id) as usize, *payload))
            .chain(
                rejected
                    .iter()
                    .map(|id| ItemUpdate::new(Into::<u32>::into(*id) as usize, R::removed_payload(*id))),
            )
            .collect();
        updates.sort_by_key(|u| u.index);
        self.payloads.update(ctx.gpu, copy_pass, &updates)?;

        if self.instances.len() < highest_index + 1 {
            self.instances.resize(highest_index + 1, None);
        }
        for (id, _, instance) in converted {
            self.instances[Into::<u32>::into(id) as usize] = Some(instance.clone());
        }
        self.forget(&rejected);

        Ok(rejected)
    }

    /// Drops CPU copies without touching the GPU slots or the id allocator.
    fn forget(&mut self, ids: &[R::Id]) {
        for id in ids {
            if let Some(slot) = self.instances.get_mut(Into::<u32>::into(*id) as usize) {
                *slot = None;
            }
        }
    }

    /// Invalidates the slots of `ids` and hands the ids back to their allocator.
    pub fn remove(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        ids: &[R::Id],
    ) -> Result<()> {
        let mut updates: Vec<ItemUpdate<R::Payload>> = ids
            .iter()
            .map(|id| (Into::<u32>::into(*id) as usize, *id))
            .filter(|(index, _)| *index < self.payloads.size())
            .map(|(index, id)| ItemUpdate::new(index, R::removed_payload(id)))
            .collect();
        updates.sort_by_key(|u| u.index);
        updates.dedup_by_key(|u| u.index);

        self.payloads.update(ctx.gpu, copy_pass, &updates)?;

        for id in ids {
            if let Some(slot) = self.instances.get_mut(Into::<u32>::into(*id) as usize) {
                *slot = None;
            }
            R::id_source(ctx.ids).release(*id);
        }

        Ok(())
    }

    /// Number of payload slots past the reserved slot 0.
    pub fn instance_count(&self) -> usize {
        self.payloads.size().saturating_sub(1)
    }

    pub fn get(&self, id: R::Id) -> Option<&R> {
        self.instances
            .get(Into::<u32>::into(id) as usize)
            .and_then(Option::as_ref)
    }

    pub fn instances(&self) -> impl Iterator<Item = &R> {
        self.instances.iter().flatten()
    }

    pub fn payloads_buffer(&self) -> BufferHandle {
        self.payloads.handle()
    }
}

/// Ids a [`DataStores`] refused to store while applying one update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RejectedInstances {
    pub objects: BTreeSet<ObjectId>,
    pub sprites: BTreeSet<SpriteId>,
    pub lights: BTreeSet<LightId>,
}

impl RejectedInstances {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.sprites.is_empty() && self.lights.is_empty()
    }

    /// The update as the draw passes and lights must see it: rejected adds and updates turn into
    /// removals, so no pass batches an instance the store does not hold.
    pub fn apply_to<'a>(&self, update: &'a StateUpdate) -> Cow<'a, StateUpdate> {
        if self.is_empty() {
            return Cow::Borrowed(update);
        }

        let mut accepted = update.clone();
        reject(
            &self.objects,
            &mut accepted.to_add_objects,
            &mut accepted.to_update_objects,
            &mut accepted.to_delete_objects,
        );
        reject(
            &self.sprites,
            &mut accepted.to_add_sprites,
            &mut accepted.to_update_sprites,
            &mut accepted.to_delete_sprites,
        );
        reject(
            &self.lights,
            &mut accepted.to_add_lights,
            &mut accepted.to_update_lights,
            &mut accepted.to_delete_lights,
        );
        Cow::Owned(accepted)
    }
}

fn reject<R: Renderable>(
    rejected: &BTreeSet<R::Id>,
    to_add: &mut Vec<R>,
    to_update: &mut Vec<R>,
    to_delete: &mut BTreeSet<R::Id>,
) {
    to_add.retain(|instance| !rejected.contains(&instance.id()));
    to_update.retain(|instance| !rejected.contains(&instance.id()));
    to_delete.extend(rejected.iter().copied());
}

/// The instance mirrors of one group.
#[derive(Debug)]
pub struct DataStores {
    pub objects: InstanceDataStore<ObjectRenderable>,
    pub sprites: InstanceDataStore<SpriteRenderable>,
    pub lights: InstanceDataStore<Light>,
}

impl DataStores {
    pub fn create(gpu: &mut dyn GpuBackend, group_name: &str) -> Result<Self> {
        Ok(Self {
            objects: InstanceDataStore::create(gpu, group_name)?,
            sprites: InstanceDataStore::create(gpu, group_name)?,
            lights: InstanceDataStore::create(gpu, group_name)?,
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.objects.destroy(gpu);
        self.sprites.destroy(gpu);
        self.lights.destroy(gpu);
    }

    /// Applies adds, updates and removals to every store. Failures are logged; the returned ids
    /// are the instances that did not make it into a store.
    pub fn apply_state_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        update: &StateUpdate,
    ) -> RejectedInstances {
        let mut rejected = RejectedInstances::default();

        apply_to_store(
            &mut self.objects,
            ctx,
            copy_pass,
            [&update.to_add_objects, &update.to_update_objects],
            &update.to_delete_objects,
            &mut rejected.objects,
        );
        apply_to_store(
            &mut self.sprites,
            ctx,
            copy_pass,
            [&update.to_add_sprites, &update.to_update_sprites],
            &update.to_delete_sprites,
            &mut rejected.sprites,
        );
        apply_to_store(
            &mut self.lights,
            ctx,
            copy_pass,
            [&update.to_add_lights, &update.to_update_lights],
            &update.to_delete_lights,
            &mut rejected.lights,
        );

        rejected
    }

    /// Light payloads carry settings-derived ranges, so they are rewritten.
    pub fn on_render_settings_changed(&mut self, ctx: &mut RenderContext<'_>, copy_pass: &CopyPass) {
        let lights: Vec<Light> = self.lights.instances().copied().collect();
        if let Err(err) = self.lights.add_or_update(ctx, copy_pass, &lights) {
            log::error!("DataStores::on_render_settings_changed: failed to rewrite lights: {}", err);
        }
    }
}

fn apply_to_store<R: Renderable>(
    store: &mut InstanceDataStore<R>,
    ctx: &mut RenderContext<'_>,
    copy_pass: &CopyPass,
    writes: [&Vec<R>; 2],
    to_delete: &BTreeSet<R::Id>,
    rejected: &mut BTreeSet<R::Id>,
) {
    for instances in writes {
        match store.add_or_update(ctx, copy_pass, instances) {
            Ok(ids) => rejected.extend(ids),
            Err(err) => {
                log::error!(
                    "DataStores::apply_state_update: failed to write {}: {}",
                    R::TAG,
                    err
                );
                let ids: Vec<R::Id> = instances.iter().map(|instance| instance.id()).collect();
                store.forget(&ids);
                rejected.extend(ids);
            }
        }
    }

    if to_delete.is_empty() {
        return;
    }
    let ids: Vec<R::Id> = to_delete.iter().copied().collect();
    if let Err(err) = store.remove(ctx, copy_pass, &ids) {
        log::error!(
            "DataStores::apply_state_update: failed to remove {}: {}",
            R::TAG,
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;
    use crate::ids::{MaterialId, MeshId, TextureId};
    use crate::renderer::renderables::PixelRect;
    use crate::renderer::resources::{Mesh, TextureInfo};

    struct Fixture {
        gpu: RecordingBackend,
        settings: RenderSettings,
        resources: Resources,
        ids: RendererIds,
    }

    impl Fixture {
        fn new() -> Self {
            let mut gpu = RecordingBackend::new();
            let mut resources = Resources::create(&mut gpu).unwrap();
            let cmd = gpu.acquire_command_buffer("setup").unwrap();
            let pass = gpu.begin_copy_pass(cmd).unwrap();
            resources
                .meshes
                .add_mesh(&mut gpu, &pass, MeshId(1), Mesh::sprite_quad())
                .unwrap();
            resources.meshes.set_sprite_mesh(MeshId(1));
            gpu.end_copy_pass(pass);
            resources.textures.insert(
                TextureId(1),
                TextureInfo {
                    width: 256,
                    height: 128,
                },
            );

            Self {
                gpu,
                settings: RenderSettings::default(),
                resources,
                ids: RendererIds::default(),
            }
        }

        fn with_context<T>(&mut self, f: impl FnOnce(&mut RenderContext<'_>, &CopyPass) -> T) -> T {
            let cmd = self.gpu.acquire_command_buffer("test").unwrap();
            let mut ctx = RenderContext::new(
                &mut self.gpu,
                cmd,
                &self.settings,
                &self.resources,
                &mut self.ids,
            );
            let pass = ctx.begin_copy_pass("test").unwrap();
            let result = f(&mut ctx, &pass);
            ctx.end_copy_pass(pass);
            result
        }
    }

    fn object(id: u32) -> ObjectRenderable {
        ObjectRenderable::new(ObjectId(id), MeshId(1), MaterialId(1))
    }

    #[test]
    fn payloads_land_at_their_id() {
        let mut fx = Fixture::new();
        let mut store = InstanceDataStore::<ObjectRenderable>::create(&mut fx.gpu, "World").unwrap();

        fx.with_context(|ctx, pass| store.add_or_update(ctx, pass, &[object(5), object(2)]))
            .unwrap();

        assert_eq!(store.instance_count(), 5);
        let payload: ObjectPayload = fx.gpu.read_item(store.payloads_buffer(), 5).unwrap();
        assert_eq!(payload.is_valid, 1);
        assert_eq!(payload.id, 5);
        let untouched: ObjectPayload = fx.gpu.read_item(store.payloads_buffer(), 3).unwrap();
        assert_eq!(untouched.is_valid, 0);
        assert!(store.get(ObjectId(2)).is_some());
    }

    #[test]
    fn failed_conversions_are_rejected_and_left_invalid() {
        let mut fx = Fixture::new();
        let mut store = InstanceDataStore::<ObjectRenderable>::create(&mut fx.gpu, "World").unwrap();

        let mut broken = object(4);
        broken.mesh_id = MeshId(9);
        let rejected = fx
            .with_context(|ctx, pass| store.add_or_update(ctx, pass, &[object(1), broken]))
            .unwrap();

        assert_eq!(rejected, vec![ObjectId(4)]);
        assert!(store.get(ObjectId(4)).is_none());
        let payload: ObjectPayload = fx.gpu.read_item(store.payloads_buffer(), 4).unwrap();
        assert_eq!(payload.is_valid, 0);
    }

    #[test]
    fn rejected_update_invalidates_the_previous_payload() {
        let mut fx = Fixture::new();
        let mut store = InstanceDataStore::<ObjectRenderable>::create(&mut fx.gpu, "World").unwrap();
        fx.with_context(|ctx, pass| store.add_or_update(ctx, pass, &[object(2)]))
            .unwrap();

        let mut moved = object(2);
        moved.mesh_id = MeshId(999);
        moved.model_transform = Mat4::from_translation(Vec3::X);
        let rejected = fx
            .with_context(|ctx, pass| store.add_or_update(ctx, pass, &[moved]))
            .unwrap();

        assert_eq!(rejected, vec![ObjectId(2)]);
        assert!(store.get(ObjectId(2)).is_none());
        let payload: ObjectPayload = fx.gpu.read_item(store.payloads_buffer(), 2).unwrap();
        assert_eq!(payload.is_valid, 0);
    }

    #[test]
    fn rejected_instances_become_removals() {
        let mut rejected = RejectedInstances::default();
        let mut update = StateUpdate::for_group("World");
        update.to_add_objects.push(object(1));
        update.to_update_objects.push(object(3));
        assert!(matches!(rejected.apply_to(&update), Cow::Borrowed(_)));

        rejected.objects.insert(ObjectId(3));
        let accepted = rejected.apply_to(&update);
        assert_eq!(accepted.to_add_objects.len(), 1);
        assert!(accepted.to_update_objects.is_empty());
        assert!(accepted.to_delete_objects.contains(&ObjectId(3)));
    }

    #[test]
    fn remove_invalidates_slot_and_releases_id() {
        let mut fx = Fixture::new();
        let mut store = InstanceDataStore::<ObjectRenderable>::create(&mut fx.gpu, "World").unwrap();
        let a = fx.ids.objects.acquire();
        let b = fx.ids.objects.acquire();

        fx.with_context(|ctx, pass| store.add_or_update(ctx, pass, &[object(a.0), object(b.0)]))
            .unwrap();
        fx.with_context(|ctx, pass| store.remove(ctx, pass, &[a])).unwrap();

        let payload: ObjectPayload = fx.gpu.read_item(store.payloads_buffer(), a.index()).unwrap();
        assert_eq!(payload.is_valid, 0);
        assert!(store.get(a).is_none());
        assert_eq!(store.instance_count(), 2);
        assert_eq!(fx.ids.objects.acquire(), a);
    }

    #[test]
    fn empty_store_counts_zero_instances() {
        let mut fx = Fixture::new();
        let store = InstanceDataStore::<Light>::create(&mut fx.gpu, "World").unwrap();
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn sprite_payload_defaults_to_whole_texture() {
        let fx = Fixture::new();
        let sprite = SpriteRenderable::new(SpriteId(1), TextureId(1));

        let payload = sprite.payload(&fx.settings, &fx.resources).unwrap();
        assert_eq!(payload.uv_translation, [0.0, 0.0]);
        assert_eq!(payload.uv_size, [1.0, 1.0]);
        assert_eq!(payload.mesh_id, 1);
        // Quad scaled to the texture's pixel size
        assert_eq!(payload.model[0][0], 256.0);
        assert_eq!(payload.model[1][1], 128.0);
    }

    #[test]
    fn sprite_payload_uses_source_rect() {
        let fx = Fixture::new();
        let mut sprite = SpriteRenderable::new(SpriteId(1), TextureId(1));
        sprite.src_pixel_rect = Some(PixelRect {
            x: 64.0,
            y: 32.0,
            w: 128.0,
            h: 64.0,
        });
        sprite.dst_size = Some(Vec2::new(10.0, 20.0));

        let payload = sprite.payload(&fx.settings, &fx.resources).unwrap();
        assert_eq!(payload.uv_translation, [0.25, 0.25]);
        assert_eq!(payload.uv_size, [0.5, 0.5]);
        assert_eq!(payload.model[0][0], 10.0);
        assert_eq!(payload.model[1][1], 20.0);
    }

    #[test]
    fn sprite_without_texture_fails() {
        let fx = Fixture::new();
        let sprite = SpriteRenderable::new(SpriteId(1), TextureId(7));
        assert!(matches!(
            sprite.payload(&fx.settings, &fx.resources),
            Err(RenderError::MissingTexture(7))
        ));
    }

    #[test]
    fn payload_layouts_match_shaders() {
        assert_eq!(std::mem::size_of::<ObjectPayload>(), 80);
        assert_eq!(std::mem::size_of::<SpritePayload>(), 96);
    }
}
