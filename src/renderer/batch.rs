// renderer/batch.rs
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Instances sharing one batching key, drawn by a single indirect draw.
#[derive(Debug, Clone)]
pub struct Batch<K> {
    pub id: u32,
    pub key: K,
    pub is_valid: bool,
    pub members: BTreeSet<u32>,
    /// First draw-data slot owned by this batch.
    pub draw_data_offset: u32,
}

impl<K> Batch<K> {
    pub fn num_members(&self) -> u32 {
        self.members.len() as u32
    }
}

/// Dense batch table with free-list id reuse.
///
/// Every instance belongs to at most one batch and every valid batch has at least one member;
/// a batch that loses its last member is invalidated and its id becomes reusable.
#[derive(Debug)]
pub struct Batches<K> {
    batches: Vec<Batch<K>>,
    free_ids: BTreeSet<u32>,
    key_to_batch: HashMap<K, u32>,
    instance_to_batch: HashMap<u32, u32>,
    lowest_modified: Option<u32>,
}

impl<K: Copy + Eq + Hash> Default for Batches<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> Batches<K> {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            free_ids: BTreeSet::new(),
            key_to_batch: HashMap::new(),
            instance_to_batch: HashMap::new(),
            lowest_modified: None,
        }
    }

    /// Places `instance` in the batch for `key`, moving it out of any batch with another key.
    /// Returns the batch id it ends up in.
    pub fn insert(&mut self, instance: u32, key: K) -> u32 {
        if let Some(&current) = self.instance_to_batch.get(&instance) {
            if self.batches[current as usize].key == key {
                return current;
            }
            self.remove(instance);
        }

        let batch_id = match self.key_to_batch.get(&key) {
            Some(&batch_id) => batch_id,
            None => self.open_batch(key),
        };

        self.batches[batch_id as usize].members.insert(instance);
        self.instance_to_batch.insert(instance, batch_id);
        self.mark_modified(batch_id);
        batch_id
    }

    /// Takes `instance` out of its batch. Returns the batch it was in, if any.
    pub fn remove(&mut self, instance: u32) -> Option<u32> {
        let batch_id = self.instance_to_batch.remove(&instance)?;

        let batch = &mut self.batches[batch_id as usize];
        batch.members.remove(&instance);
        if batch.members.is_empty() {
            batch.is_valid = false;
            self.key_to_batch.remove(&batch.key);
            self.free_ids.insert(batch_id);
        }

        self.mark_modified(batch_id);
        Some(batch_id)
    }

    fn open_batch(&mut self, key: K) -> u32 {
        let batch_id = match self.free_ids.pop_first() {
            Some(batch_id) => {
                let batch = &mut self.batches[batch_id as usize];
                batch.key = key;
                batch.is_valid = true;
                batch.members.clear();
                batch_id
            }
            None => {
                let batch_id = self.batches.len() as u32;
                self.batches.push(Batch {
                    id: batch_id,
                    key,
                    is_valid: true,
                    members: BTreeSet::new(),
                    draw_data_offset: 0,
                });
                batch_id
            }
        };

        self.key_to_batch.insert(key, batch_id);
        batch_id
    }

    fn mark_modified(&mut self, batch_id: u32) {
        self.lowest_modified = Some(match self.lowest_modified {
            Some(lowest) => lowest.min(batch_id),
            None => batch_id,
        });
    }

    pub fn batch_of(&self, instance: u32) -> Option<u32> {
        self.instance_to_batch.get(&instance).copied()
    }

    pub fn get(&self, batch_id: u32) -> Option<&Batch<K>> {
        self.batches.get(batch_id as usize)
    }

    /// All batch slots, including invalidated ones awaiting reuse.
    pub fn iter(&self) -> impl Iterator<Item = &Batch<K>> {
        self.batches.iter()
    }

    pub fn valid(&self) -> impl Iterator<Item = &Batch<K>> {
        self.batches.iter().filter(|b| b.is_valid)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.instance_to_batch.len()
    }

    /// Lowest batch id touched since the last call.
    pub fn take_lowest_modified(&mut self) -> Option<u32> {
        self.lowest_modified.take()
    }

    /// Puts back a lowest-modified id taken by a sync that failed.
    pub fn restore_lowest_modified(&mut self, batch_id: u32) {
        self.mark_modified(batch_id);
    }

    /// Recomputes every batch's draw-data offset as a running sum over the valid batches before
    /// it and returns the total number of slots.
    pub fn update_draw_data_offsets(&mut self, slots_per_member: u32) -> u32 {
        let mut offset = 0u32;
        for batch in &mut self.batches {
            batch.draw_data_offset = offset;
            if batch.is_valid {
                offset += batch.num_members() * slots_per_member;
            }
        }
        offset
    }
}
