use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::gpu::{bind, BufferUsage, ComputeDispatch, ComputeProgram, CopyPass};
use crate::ids::MeshId;
use crate::renderer::batch::{Batch, Batches};
use crate::renderer::batches::{BatchBinding, DrawList, RenderBatch};
use crate::renderer::data_store::{InstanceDataStore, Renderable};
use crate::renderer::item_buffer::{ItemBuffer, ItemUpdate};
use crate::renderer::projection::ViewProjection;
use crate::renderer::render_context::RenderContext;
use crate::renderer::renderables::StateUpdate;
use crate::renderer::resources::Resources;
use crate::settings::RenderSettings;

const INITIAL_MEMBERSHIP_CAPACITY: usize = 64;
const INITIAL_BATCH_CAPACITY: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MembershipPayload {
    pub is_valid: u32,
    pub batch_id: u32,
}

impl MembershipPayload {
    pub fn member_of(batch_id: u32) -> Self {
        Self {
            is_valid: 1,
            batch_id,
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CullInputParams {
    pub num_group_instances: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawInputParams {
    pub num_batches: u32,
    pub _pad: [u32; 3],
}

/// What distinguishes one kind of draw pass from another: which instances it accepts, how they
/// are grouped, and how a batch looks to the cull and draw programs.
pub trait BatchLayout {
    type Instance: Renderable;
    type Key: Copy + Eq + Hash + Debug;
    type BatchPayload: Pod + Debug;

    /// Draw-data slots each member reserves.
    const SLOTS_PER_MEMBER: u32;
    /// Indirect draw commands each batch owns.
    const DRAWS_PER_BATCH: u32;
    const CULL_PROGRAM: ComputeProgram;
    const DRAW_PROGRAM: ComputeProgram;
    const INSTANCES_BIND_POINT: &'static str;

    fn tag_suffix(&self) -> &'static str;

    fn passes_filter(&self, instance: &Self::Instance, resources: &Resources) -> Result<bool>;

    fn batch_key(&self, instance: &Self::Instance, resources: &Resources) -> Self::Key;

    fn batch_payload(batch: &Batch<Self::Key>) -> Self::BatchPayload;

    fn render_binding(key: &Self::Key) -> (BatchBinding, MeshId);

    /// Far plane the cull pass clamps to, if any.
    fn cull_far_plane(&self, settings: &RenderSettings) -> Option<f32>;

    #[allow(clippy::type_complexity)]
    fn changes(
        update: &StateUpdate,
    ) -> (
        &[Self::Instance],
        &[Self::Instance],
        Vec<<Self::Instance as Renderable>::Id>,
    );
}

/// Batches one renderable kind and produces the indirect draws for one view.
///
/// Membership and batch payloads are kept current on every change; the cull and draw
/// programs only run when a view-projection is set and something invalidated the draws.
#[derive(Debug)]
pub struct DrawPass<L: BatchLayout> {
    layout: L,
    name: String,
    tag: String,
    batches: Batches<L::Key>,
    membership: ItemBuffer<MembershipPayload>,
    batch_payloads: ItemBuffer<L::BatchPayload>,
    draw_data: ItemBuffer<u32>,
    draw_commands: ItemBuffer<DrawIndexedIndirect>,
    draw_counts: ItemBuffer<u32>,
    view_projection: Option<ViewProjection>,
    draw_calls_invalidated: bool,
}

impl<L: BatchLayout> DrawPass<L> {
    pub fn create(
        ctx: &mut RenderContext<'_>,
        layout: L,
        group_name: &str,
        name: &str,
    ) -> Result<Self> {
        let tag = format!("{}:{}:{}", group_name, name, layout.tag_suffix());
        let gpu = &mut *ctx.gpu;

        let membership = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE,
            INITIAL_MEMBERSHIP_CAPACITY,
            &format!("{tag}:Membership"),
        )?;
        let batch_payloads = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE,
            INITIAL_BATCH_CAPACITY,
            &format!("{tag}:Batches"),
        )?;
        let draw_data = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE | BufferUsage::VERTEX,
            INITIAL_MEMBERSHIP_CAPACITY,
            &format!("{tag}:DrawData"),
        )?;
        let draw_commands = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE | BufferUsage::INDIRECT,
            INITIAL_BATCH_CAPACITY * L::DRAWS_PER_BATCH as usize,
            &format!("{tag}:DrawCommands"),
        )?;
        let draw_counts = ItemBuffer::create(
            gpu,
            BufferUsage::STORAGE | BufferUsage::INDIRECT,
            INITIAL_BATCH_CAPACITY,
            &format!("{tag}:DrawCounts"),
        )?;

        Ok(Self {
            layout,
            name: name.to_string(),
            tag,
            batches: Batches::new(),
            membership,
            batch_payloads,
            draw_data,
            draw_commands,
            draw_counts,
            view_projection: None,
            draw_calls_invalidated: true,
        })
    }

    pub fn destroy(&mut self, ctx: &mut RenderContext<'_>) {
        self.membership.destroy(ctx.gpu);
        self.batch_payloads.destroy(ctx.gpu);
        self.draw_data.destroy(ctx.gpu);
        self.draw_commands.destroy(ctx.gpu);
        self.draw_counts.destroy(ctx.gpu);
        self.batches = Batches::new();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn batches(&self) -> &Batches<L::Key> {
        &self.batches
    }

    pub fn membership_buffer(&self) -> &ItemBuffer<MembershipPayload> {
        &self.membership
    }

    pub fn batch_payloads_buffer(&self) -> &ItemBuffer<L::BatchPayload> {
        &self.batch_payloads
    }

    pub fn draw_data_buffer(&self) -> &ItemBuffer<u32> {
        &self.draw_data
    }

    pub fn draw_commands_buffer(&self) -> &ItemBuffer<DrawIndexedIndirect> {
        &self.draw_commands
    }

    pub fn draw_counts_buffer(&self) -> &ItemBuffer<u32> {
        &self.draw_counts
    }

    pub fn add(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        instances: &[L::Instance],
    ) -> Result<()> {
        self.apply(ctx, copy_pass, instances, &[], &[])
    }

    pub fn update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        instances: &[L::Instance],
    ) -> Result<()> {
        self.apply(ctx, copy_pass, &[], instances, &[])
    }

    pub fn remove(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        ids: &[<L::Instance as Renderable>::Id],
    ) -> Result<()> {
        self.apply(ctx, copy_pass, &[], &[], ids)
    }

    pub fn apply_state_update(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        update: &StateUpdate,
    ) -> Result<()> {
        let (added, updated, removed) = L::changes(update);
        self.apply(ctx, copy_pass, added, updated, &removed)
    }

    /// Applies adds, then updates, then removals, and resynchronises the GPU side once.
    fn apply(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        added: &[L::Instance],
        updated: &[L::Instance],
        removed: &[<L::Instance as Renderable>::Id],
    ) -> Result<()> {
        let mut membership: BTreeMap<u32, MembershipPayload> = BTreeMap::new();

        for instance in added.iter().chain(updated) {
            self.place_instance(instance, ctx.resources, &mut membership);
        }

        for id in removed {
            let index: u32 = (*id).into();
            if self.batches.remove(index).is_some() {
                self.draw_calls_invalidated = true;
            }
            membership.insert(index, MembershipPayload::invalid());
        }

        self.sync(ctx, copy_pass, &membership)
    }

    fn place_instance(
        &mut self,
        instance: &L::Instance,
        resources: &Resources,
        membership: &mut BTreeMap<u32, MembershipPayload>,
    ) {
        let index: u32 = instance.id().into();

        let passes = match self.layout.passes_filter(instance, resources) {
            Ok(passes) => passes,
            Err(err) => {
                log::error!(
                    "DrawPass::place_instance: {} rejects instance {}: {}",
                    self.tag,
                    instance.id(),
                    err
                );
                false
            }
        };

        if !passes {
            if self.batches.remove(index).is_some() {
                self.draw_calls_invalidated = true;
            }
            membership.insert(index, MembershipPayload::invalid());
            return;
        }

        let key = self.layout.batch_key(instance, resources);
        let previous = self.batches.batch_of(index);
        let batch_id = self.batches.insert(index, key);
        if previous != Some(batch_id) {
            membership.insert(index, MembershipPayload::member_of(batch_id));
        }

        // A moved transform changes what the cull pass sees even when the batch stays put
        self.draw_calls_invalidated = true;
    }

    /// Grows every buffer first, then writes membership and the batch payloads from the lowest
    /// modified batch onwards.
    fn sync(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        membership: &BTreeMap<u32, MembershipPayload>,
    ) -> Result<()> {
        let lowest_modified = self.batches.take_lowest_modified();
        if membership.is_empty() && lowest_modified.is_none() {
            return Ok(());
        }

        let result = self.write_changes(ctx, copy_pass, membership, lowest_modified);
        if result.is_err() {
            // Rewrite the same batches on the next change
            if let Some(lowest) = lowest_modified {
                self.batches.restore_lowest_modified(lowest);
            }
        }
        result
    }

    fn write_changes(
        &mut self,
        ctx: &mut RenderContext<'_>,
        copy_pass: &CopyPass,
        membership: &BTreeMap<u32, MembershipPayload>,
        lowest_modified: Option<u32>,
    ) -> Result<()> {
        let gpu = &mut *ctx.gpu;

        if let Some(highest) = membership.keys().next_back() {
            self.membership
                .resize_at_least(gpu, Some(copy_pass), *highest as usize + 1)?;
        }

        let total_slots = self.batches.update_draw_data_offsets(L::SLOTS_PER_MEMBER);
        let num_batches = self.batches.len();
        if lowest_modified.is_some() {
            self.batch_payloads
                .resize_at_least(gpu, Some(copy_pass), num_batches)?;
            self.draw_data
                .resize_at_least(gpu, None, (total_slots as usize).max(1))?;
            self.draw_commands.resize_at_least(
                gpu,
                None,
                num_batches * L::DRAWS_PER_BATCH as usize,
            )?;
            self.draw_counts.resize_at_least(gpu, None, num_batches)?;
        }

        let membership_updates: Vec<ItemUpdate<MembershipPayload>> = membership
            .iter()
            .map(|(index, payload)| ItemUpdate::new(*index as usize, *payload))
            .collect();
        self.membership.update(gpu, copy_pass, &membership_updates)?;

        if let Some(lowest) = lowest_modified {
            let batch_updates: Vec<ItemUpdate<L::BatchPayload>> = self
                .batches
                .iter()
                .skip(lowest as usize)
                .map(|batch| ItemUpdate::new(batch.id as usize, L::batch_payload(batch)))
                .collect();
            self.batch_payloads.update(gpu, copy_pass, &batch_updates)?;

            log::debug!(
                "{}: synced {} batch payloads from batch {} ({} draw slots)",
                self.tag,
                batch_updates.len(),
                lowest,
                total_slots
            );
        }

        Ok(())
    }

    /// Sets the view the cull pass tests against; draws are invalidated only by a real change.
    pub fn set_view_projection(&mut self, view_projection: ViewProjection) {
        if self.view_projection.as_ref() != Some(&view_projection) {
            self.view_projection = Some(view_projection);
            self.draw_calls_invalidated = true;
        }
    }

    pub fn view_projection(&self) -> Option<&ViewProjection> {
        self.view_projection.as_ref()
    }

    pub fn are_draw_calls_invalidated(&self) -> bool {
        self.draw_calls_invalidated
    }

    pub fn mark_draw_calls_invalidated(&mut self) {
        self.draw_calls_invalidated = true;
    }

    pub fn on_render_settings_changed(&mut self) {
        self.draw_calls_invalidated = true;
    }

    /// Runs the cull and draw programs when draws are invalidated and a view is set.
    /// Returns whether anything was recomputed.
    pub fn compute_draw_calls_if_needed(
        &mut self,
        ctx: &mut RenderContext<'_>,
        instances: &InstanceDataStore<L::Instance>,
    ) -> Result<bool> {
        if !self.draw_calls_invalidated || self.view_projection.is_none() {
            return Ok(false);
        }

        self.compute_draw_calls(ctx, instances)?;
        self.draw_calls_invalidated = false;
        Ok(true)
    }

    fn compute_draw_calls(
        &mut self,
        ctx: &mut RenderContext<'_>,
        instances: &InstanceDataStore<L::Instance>,
    ) -> Result<()> {
        let Some(view_projection) = self.view_projection else {
            return Ok(());
        };

        if self.batches.member_count() == 0 {
            log::debug!("{}: no members, skipping draw call compute", self.tag);
            return Ok(());
        }

        let mut projection = view_projection.projection;
        if let Some(far) = self.layout.cull_far_plane(ctx.settings) {
            projection.reduce_far_plane_to(far)?;
        }
        let view_projection = ViewProjection::new(view_projection.view, projection).uniform();

        let num_group_instances = instances.instance_count() as u32;
        let cull_params = CullInputParams {
            num_group_instances,
            ..CullInputParams::default()
        };
        let mesh_payloads = ctx.resources.meshes.payloads_buffer().handle();

        let cull = ComputeDispatch::new(L::CULL_PROGRAM)
            .uniform(bind::VIEW_PROJECTION, bytemuck::bytes_of(&view_projection))
            .uniform(bind::INPUT_PARAMS, bytemuck::bytes_of(&cull_params))
            .storage(L::INSTANCES_BIND_POINT, instances.payloads_buffer())
            .storage(bind::MEMBERSHIP, self.membership.handle())
            .storage(bind::MESH_PAYLOADS, mesh_payloads)
            .storage(bind::BATCH_DATA, self.batch_payloads.handle())
            .storage(bind::DRAW_DATAS, self.draw_data.handle())
            .covering(num_group_instances);
        ctx.gpu.dispatch_compute(ctx.command_buffer, &cull)?;

        let num_batches = self.batches.len() as u32;
        let draw_params = DrawInputParams {
            num_batches,
            ..DrawInputParams::default()
        };

        let draw = ComputeDispatch::new(L::DRAW_PROGRAM)
            .uniform(bind::INPUT_PARAMS, bytemuck::bytes_of(&draw_params))
            .storage(bind::MESH_PAYLOADS, mesh_payloads)
            .storage(bind::BATCH_DATA, self.batch_payloads.handle())
            .storage(bind::DRAW_COMMANDS, self.draw_commands.handle())
            .storage(bind::DRAW_COUNTS, self.draw_counts.handle())
            .covering(num_batches);
        ctx.gpu.dispatch_compute(ctx.command_buffer, &draw)?;

        log::debug!(
            "{}: computed draw calls for {} instances in {} batches",
            self.tag,
            num_group_instances,
            num_batches
        );
        Ok(())
    }

    /// Valid batches ordered by binding then mesh, each with its indirect draw window.
    pub fn draw_list(&self) -> DrawList {
        let stride = std::mem::size_of::<DrawIndexedIndirect>() as u64;
        let count_stride = std::mem::size_of::<u32>() as u64;

        let mut batches: Vec<RenderBatch> = self
            .batches
            .valid()
            .map(|batch| {
                let (binding, mesh_id) = L::render_binding(&batch.key);
                RenderBatch {
                    batch_id: batch.id,
                    binding,
                    mesh_id,
                    num_members: batch.num_members(),
                    commands_offset: batch.id as u64 * L::DRAWS_PER_BATCH as u64 * stride,
                    counts_offset: batch.id as u64 * count_stride,
                    max_draw_count: L::DRAWS_PER_BATCH,
                }
            })
            .collect();
        batches.sort_by_key(|b| (b.binding, b.mesh_id, b.batch_id));

        DrawList {
            draw_data: self.draw_data.handle(),
            draw_commands: self.draw_commands.handle(),
            draw_counts: self.draw_counts.handle(),
            stride: stride as u32,
            batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_structs_match_shader_layouts() {
        assert_eq!(std::mem::size_of::<MembershipPayload>(), 8);
        assert_eq!(std::mem::size_of::<DrawIndexedIndirect>(), 20);
        assert_eq!(std::mem::size_of::<CullInputParams>(), 16);
        assert_eq!(std::mem::size_of::<DrawInputParams>(), 16);
    }
}
