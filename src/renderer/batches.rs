// renderer/batches.rs
use crate::gpu::BufferHandle;
use crate::ids::{MaterialId, MeshId, TextureId};

/// State a batch needs bound before its draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BatchBinding {
    Material(MaterialId),
    Texture(TextureId),
}

/// One batch as the rendering layer consumes it: one draw-indexed-indirect-with-count call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBatch {
    pub batch_id: u32,
    pub binding: BatchBinding,
    pub mesh_id: MeshId,
    pub num_members: u32,
    /// Byte offset of the batch's first command in the draw-commands buffer.
    pub commands_offset: u64,
    /// Byte offset of the batch's count in the draw-counts buffer.
    pub counts_offset: u64,
    pub max_draw_count: u32,
}

/// A draw pass's output, ordered to minimise rebinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawList {
    /// Per-drawn-instance renderable ids, read as instance data.
    pub draw_data: BufferHandle,
    pub draw_commands: BufferHandle,
    pub draw_counts: BufferHandle,
    pub stride: u32,
    pub batches: Vec<RenderBatch>,
}

impl DrawList {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Consecutive runs of batches sharing a binding.
    pub fn by_binding(&self) -> impl Iterator<Item = (BatchBinding, &[RenderBatch])> {
        self.batches
            .chunk_by(|a, b| a.binding == b.binding)
            .map(|run| (run[0].binding, run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(batch_id: u32, material: u32, mesh: u32) -> RenderBatch {
        RenderBatch {
            batch_id,
            binding: BatchBinding::Material(MaterialId(material)),
            mesh_id: MeshId(mesh),
            num_members: 1,
            commands_offset: 0,
            counts_offset: 0,
            max_draw_count: 3,
        }
    }

    #[test]
    fn runs_group_batches_by_binding() {
        let list = DrawList {
            draw_data: BufferHandle(1),
            draw_commands: BufferHandle(2),
            draw_counts: BufferHandle(3),
            stride: 20,
            batches: vec![batch(2, 1, 1), batch(0, 1, 2), batch(1, 4, 1)],
        };

        let runs: Vec<(BatchBinding, usize)> =
            list.by_binding().map(|(binding, run)| (binding, run.len())).collect();
        assert_eq!(
            runs,
            vec![
                (BatchBinding::Material(MaterialId(1)), 2),
                (BatchBinding::Material(MaterialId(4)), 1)
            ]
        );
    }
}
