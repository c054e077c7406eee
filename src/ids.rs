use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

macro_rules! dense_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: Self = Self(0);

            pub fn is_valid(self) -> bool {
                self.0 != 0
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

dense_id!(ObjectId);
dense_id!(SpriteId);
dense_id!(LightId);
dense_id!(MeshId);
dense_id!(MaterialId);
dense_id!(TextureId);

/// Free-list id allocator. Id 0 is never handed out; returned ids are reused lowest first.
#[derive(Debug, Clone)]
pub struct IdSource<T> {
    next: u32,
    free: BTreeSet<u32>,
    _marker: PhantomData<T>,
}

impl<T: From<u32> + Into<u32>> IdSource<T> {
    pub fn new() -> Self {
        Self {
            next: 1,
            free: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    pub fn acquire(&mut self) -> T {
        if let Some(id) = self.free.pop_first() {
            return T::from(id);
        }

        let id = self.next;
        self.next += 1;
        T::from(id)
    }

    pub fn release(&mut self, id: T) {
        let raw: u32 = id.into();
        if raw == 0 || raw >= self.next {
            log::warn!("IdSource: ignoring release of unallocated id {}", raw);
            return;
        }

        if !self.free.insert(raw) {
            log::warn!("IdSource: id {} released twice", raw);
        }
    }

    pub fn in_use(&self) -> usize {
        (self.next - 1) as usize - self.free.len()
    }

    pub fn reset(&mut self) {
        self.next = 1;
        self.free.clear();
    }
}

impl<T: From<u32> + Into<u32>> Default for IdSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct RendererIds {
    pub objects: IdSource<ObjectId>,
    pub sprites: IdSource<SpriteId>,
    pub lights: IdSource<LightId>,
    pub meshes: IdSource<MeshId>,
    pub materials: IdSource<MaterialId>,
    pub textures: IdSource<TextureId>,
}

impl RendererIds {
    pub fn reset(&mut self) {
        self.objects.reset();
        self.sprites.reset();
        self.lights.reset();
        self.meshes.reset();
        self.materials.reset();
        self.textures.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_hands_out_zero() {
        let mut ids = IdSource::<ObjectId>::new();
        assert_eq!(ids.acquire(), ObjectId(1));
        assert_eq!(ids.acquire(), ObjectId(2));
    }

    #[test]
    fn released_ids_are_reused_lowest_first() {
        let mut ids = IdSource::<LightId>::new();
        let a = ids.acquire();
        let b = ids.acquire();
        let _c = ids.acquire();

        ids.release(b);
        ids.release(a);

        assert_eq!(ids.acquire(), a);
        assert_eq!(ids.acquire(), b);
        assert_eq!(ids.acquire(), LightId(4));
        assert_eq!(ids.in_use(), 4);
    }

    #[test]
    fn releasing_unknown_ids_is_ignored() {
        let mut ids = IdSource::<SpriteId>::new();
        ids.release(SpriteId(0));
        ids.release(SpriteId(7));
        assert_eq!(ids.acquire(), SpriteId(1));
    }
}
