use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::error::Result;
use crate::renderer::group::Group;
use crate::renderer::render_context::RenderContext;

/// Every render group, created on first use.
#[derive(Debug, Default)]
pub struct Groups {
    groups: BTreeMap<String, Group>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_group(&mut self, ctx: &mut RenderContext<'_>, name: &str) -> Result<&mut Group> {
        match self.groups.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                log::info!("Groups: creating group {}", name);
                let group = Group::create(ctx, name)?;
                Ok(entry.insert(group))
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.values_mut()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn on_render_settings_changed(&mut self, ctx: &mut RenderContext<'_>) {
        for group in self.groups.values_mut() {
            group.on_render_settings_changed(ctx);
        }
    }

    pub fn destroy_group(&mut self, ctx: &mut RenderContext<'_>, name: &str) -> bool {
        match self.groups.remove(name) {
            Some(mut group) => {
                log::info!("Groups: destroying group {}", name);
                group.destroy(ctx);
                true
            }
            None => false,
        }
    }

    pub fn shut_down(&mut self, ctx: &mut RenderContext<'_>) {
        for (_, mut group) in std::mem::take(&mut self.groups) {
            group.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBackend, RecordingBackend};
    use crate::ids::RendererIds;
    use crate::renderer::resources::Resources;
    use crate::settings::RenderSettings;

    #[test]
    fn groups_are_created_once_and_destroyed_on_shut_down() {
        let mut gpu = RecordingBackend::new();
        let resources = Resources::create(&mut gpu).unwrap();
        let settings = RenderSettings::default();
        let mut ids = RendererIds::default();
        let baseline = gpu.live_buffers();

        let cmd = gpu.acquire_command_buffer("test").unwrap();
        let mut ctx = RenderContext::new(&mut gpu, cmd, &settings, &resources, &mut ids);
        let mut groups = Groups::new();

        groups.get_or_create_group(&mut ctx, "World").unwrap();
        drop(ctx);
        let created = gpu.stats().buffers_created;

        let cmd = gpu.acquire_command_buffer("test").unwrap();
        let mut ctx = RenderContext::new(&mut gpu, cmd, &settings, &resources, &mut ids);
        groups.get_or_create_group(&mut ctx, "World").unwrap();
        drop(ctx);
        assert_eq!(gpu.stats().buffers_created, created);

        let cmd = gpu.acquire_command_buffer("test").unwrap();
        let mut ctx = RenderContext::new(&mut gpu, cmd, &settings, &resources, &mut ids);
        groups.get_or_create_group(&mut ctx, "Screen").unwrap();
        assert_eq!(groups.len(), 2);

        groups.shut_down(&mut ctx);
        assert!(groups.is_empty());
        drop(ctx);
        assert_eq!(gpu.live_buffers(), baseline);
    }
}
