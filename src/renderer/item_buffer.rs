use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;

use crate::error::{RenderError, Result};
use crate::gpu::{BufferHandle, BufferUsage, BufferWrite, CopyPass, GpuBackend};
use crate::renderer::gpu_buffer::GpuBuffer;

const MIN_BYTE_CAPACITY: u64 = 64;

#[derive(Debug, Clone, Copy)]
pub struct ItemUpdate<T> {
    pub index: usize,
    pub item: T,
}

impl<T> ItemUpdate<T> {
    pub fn new(index: usize, item: T) -> Self {
        Self { index, item }
    }
}

/// Vector-like array of `T` living in a GPU buffer.
///
/// `size` is the logical item count; the physical capacity grows geometrically and only shrinks
/// once the size drops below a quarter of it.
#[derive(Debug)]
pub struct ItemBuffer<T: Pod> {
    buffer: GpuBuffer,
    size: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> ItemBuffer<T> {
    pub fn create(
        gpu: &mut dyn GpuBackend,
        usage: BufferUsage,
        capacity: usize,
        tag: &str,
    ) -> Result<Self> {
        let capacity = capacity.max(1);
        let byte_size = (capacity * mem::size_of::<T>()) as u64;
        let buffer = GpuBuffer::create(gpu, usage, byte_size, &format!("Item:{tag}"))?;

        Ok(Self {
            buffer,
            size: 0,
            _marker: PhantomData,
        })
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.buffer.destroy(gpu);
        self.size = 0;
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.byte_size() as usize / mem::size_of::<T>()
    }

    pub fn push_back(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        items: &[T],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let new_size = self.size + items.len();
        if new_size > self.capacity() {
            self.change_capacity(gpu, Some(copy_pass), new_size * 2)?;
        }

        self.buffer.update(
            gpu,
            copy_pass,
            &[BufferWrite {
                offset: (self.size * mem::size_of::<T>()) as u64,
                data: bytemuck::cast_slice(items),
            }],
        )?;

        self.size = new_size;
        Ok(())
    }

    /// Writes items at their indices. Updates are expected sorted by index; contiguous runs
    /// become one region each.
    pub fn update(
        &self,
        gpu: &mut dyn GpuBackend,
        copy_pass: &CopyPass,
        updates: &[ItemUpdate<T>],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        if let Some(bad) = updates.iter().find(|u| u.index >= self.size) {
            log::error!(
                "ItemBuffer::update: index {} beyond size {} of {}",
                bad.index,
                self.size,
                self.buffer.tag()
            );
            return Err(RenderError::UpdateOutOfBounds {
                tag: self.buffer.tag().to_string(),
                offset: (bad.index * mem::size_of::<T>()) as u64,
                len: mem::size_of::<T>() as u64,
                size: (self.size * mem::size_of::<T>()) as u64,
            });
        }

        let runs = contiguous_runs(updates);
        let writes: Vec<BufferWrite<'_>> = runs
            .iter()
            .map(|(index, items)| BufferWrite {
                offset: (*index * mem::size_of::<T>()) as u64,
                data: bytemuck::cast_slice(items),
            })
            .collect();

        self.buffer.update(gpu, copy_pass, &writes)
    }

    /// Sets the logical size. Growth reallocates to twice the requested size when the capacity
    /// is exceeded; shrinking only gives memory back below a quarter of capacity.
    pub fn resize(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: Option<&CopyPass>,
        item_count: usize,
    ) -> Result<()> {
        if item_count == self.size {
            return Ok(());
        }

        if item_count < self.size {
            self.size = item_count;

            if self.size < self.capacity() / 4 {
                let half = self.capacity() / 2;
                if let Err(err) = self.change_capacity(gpu, copy_pass, half) {
                    log::warn!(
                        "ItemBuffer::resize: failed to shrink {}: {}",
                        self.buffer.tag(),
                        err
                    );
                }
            }

            return Ok(());
        }

        if item_count > self.capacity() {
            self.change_capacity(gpu, copy_pass, item_count * 2)?;
        }

        self.size = item_count;
        Ok(())
    }

    pub fn resize_at_least(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: Option<&CopyPass>,
        item_count: usize,
    ) -> Result<()> {
        if self.size < item_count {
            return self.resize(gpu, copy_pass, item_count);
        }
        Ok(())
    }

    /// Grows capacity without touching the logical size.
    pub fn reserve(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: Option<&CopyPass>,
        item_count: usize,
    ) -> Result<()> {
        if self.capacity() >= item_count {
            return Ok(());
        }
        self.change_capacity(gpu, copy_pass, item_count)
    }

    fn change_capacity(
        &mut self,
        gpu: &mut dyn GpuBackend,
        copy_pass: Option<&CopyPass>,
        item_count: usize,
    ) -> Result<()> {
        let byte_size = ((item_count * mem::size_of::<T>()) as u64).max(MIN_BYTE_CAPACITY);

        log::info!(
            "Resizing {}: {} -> {} items",
            self.buffer.tag(),
            self.capacity(),
            byte_size as usize / mem::size_of::<T>()
        );

        match copy_pass {
            Some(copy_pass) => self.buffer.resize_retaining(gpu, copy_pass, byte_size),
            None => self.buffer.resize_discarding(gpu, byte_size),
        }
    }
}

fn contiguous_runs<T: Copy>(updates: &[ItemUpdate<T>]) -> Vec<(usize, Vec<T>)> {
    let mut runs: Vec<(usize, Vec<T>)> = Vec::new();
    let mut last_index: Option<usize> = None;

    for update in updates {
        match (last_index, runs.last_mut()) {
            (Some(last), Some((_, items))) if update.index == last + 1 => {
                items.push(update.item);
            }
            _ => runs.push((update.index, vec![update.item])),
        }
        last_index = Some(update.index);
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;

    fn setup(capacity: usize) -> (RecordingBackend, ItemBuffer<u32>, CopyPass) {
        let mut gpu = RecordingBackend::new();
        let buffer = ItemBuffer::<u32>::create(&mut gpu, BufferUsage::STORAGE, capacity, "Test")
            .unwrap();
        let cmd = gpu.acquire_command_buffer("Test").unwrap();
        let pass = gpu.begin_copy_pass(cmd).unwrap();
        (gpu, buffer, pass)
    }

    #[test]
    fn runs_group_consecutive_indices() {
        let updates = [
            ItemUpdate::new(1, 10u32),
            ItemUpdate::new(2, 20),
            ItemUpdate::new(3, 30),
            ItemUpdate::new(7, 70),
            ItemUpdate::new(8, 80),
            ItemUpdate::new(10, 100),
        ];

        let runs = contiguous_runs(&updates);

        assert_eq!(
            runs,
            vec![(1, vec![10, 20, 30]), (7, vec![70, 80]), (10, vec![100])]
        );
    }

    #[test]
    fn update_issues_one_region_per_run() {
        let (mut gpu, mut buffer, pass) = setup(16);
        buffer.resize(&mut gpu, Some(&pass), 12).unwrap();
        gpu.reset_stats();

        buffer
            .update(
                &mut gpu,
                &pass,
                &[
                    ItemUpdate::new(0, 1),
                    ItemUpdate::new(1, 2),
                    ItemUpdate::new(5, 3),
                ],
            )
            .unwrap();

        assert_eq!(gpu.stats().uploads, 1);
        assert_eq!(gpu.stats().upload_regions, 2);
        assert_eq!(gpu.read_item::<u32>(buffer.handle(), 5), Some(3));
    }

    #[test]
    fn update_beyond_size_is_rejected() {
        let (mut gpu, buffer, pass) = setup(16);
        assert!(buffer
            .update(&mut gpu, &pass, &[ItemUpdate::new(0, 1)])
            .is_err());
    }

    #[test]
    fn push_back_doubles_when_capacity_exceeded() {
        let (mut gpu, mut buffer, pass) = setup(16);
        assert_eq!(buffer.capacity(), 16);

        buffer.push_back(&mut gpu, &pass, &[1; 10]).unwrap();
        assert_eq!(buffer.capacity(), 16);

        buffer.push_back(&mut gpu, &pass, &[2; 10]).unwrap();
        assert_eq!(buffer.size(), 20);
        assert_eq!(buffer.capacity(), 40);
        assert_eq!(gpu.read_item::<u32>(buffer.handle(), 9), Some(1));
        assert_eq!(gpu.read_item::<u32>(buffer.handle(), 10), Some(2));
    }

    #[test]
    fn shrink_has_hysteresis() {
        let (mut gpu, mut buffer, pass) = setup(16);
        buffer.resize(&mut gpu, Some(&pass), 100).unwrap();
        assert_eq!(buffer.capacity(), 200);

        buffer.resize(&mut gpu, Some(&pass), 60).unwrap();
        assert_eq!(buffer.size(), 60);
        assert_eq!(buffer.capacity(), 200);

        buffer.resize(&mut gpu, Some(&pass), 49).unwrap();
        assert_eq!(buffer.size(), 49);
        assert_eq!(buffer.capacity(), 100);
    }

    #[test]
    fn capacity_never_drops_below_minimum_bytes() {
        let (mut gpu, mut buffer, pass) = setup(1);
        buffer.resize(&mut gpu, Some(&pass), 2).unwrap();
        buffer.resize(&mut gpu, Some(&pass), 0).unwrap();
        assert!(buffer.capacity() * mem::size_of::<u32>() >= MIN_BYTE_CAPACITY as usize);
    }

    #[test]
    fn resize_at_least_never_shrinks() {
        let (mut gpu, mut buffer, pass) = setup(4);
        buffer.resize(&mut gpu, Some(&pass), 10).unwrap();
        buffer.resize_at_least(&mut gpu, Some(&pass), 3).unwrap();
        assert_eq!(buffer.size(), 10);
        buffer.resize_at_least(&mut gpu, Some(&pass), 11).unwrap();
        assert_eq!(buffer.size(), 11);
    }

    #[test]
    fn reserve_keeps_size() {
        let (mut gpu, mut buffer, pass) = setup(4);
        buffer.reserve(&mut gpu, Some(&pass), 300).unwrap();
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 300);
    }
}
