// src/scene/registry.rs

//! The scene: one composition entry per imported image.
//!
//! All mutation and every snapshot happen under one lock, held only for the
//! map operation itself. No GPU call is made while it is held.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::lock_or_recover;
use crate::gpu::{ImageId, TextureId};
use crate::scene::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneEntry {
    /// Offscreen composition texture, owned by the entry.
    pub texture: TextureId,
    pub transform: Transform,
    /// Back-to-front ordering key; larger is farther back.
    pub z_key: u32,
    /// Size of the image when it was staged.
    pub width: u32,
    pub height: u32,
    /// Insertion order, used to keep equal z keys in a stable order.
    sequence: u64,
}

/// Outcome of `SceneRegistry::stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staged {
    /// First sight of the image; the given texture now belongs to the entry.
    Inserted,
    /// The entry existed; its transform was refreshed and its own texture
    /// kept. The offered texture was not taken.
    Updated { texture: TextureId },
}

#[derive(Default)]
struct SceneState {
    entries: HashMap<ImageId, SceneEntry>,
    next_sequence: u64,
}

#[derive(Default)]
pub struct SceneRegistry {
    state: Mutex<SceneState>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texture already staged for `image`, if any.
    pub fn texture_for(&self, image: ImageId) -> Option<TextureId> {
        let state = lock_or_recover(&self.state, "SceneRegistry");
        state.entries.get(&image).map(|e| e.texture)
    }

    /// Inserts or updates the entry for `image`. Idempotent for the same
    /// image: an existing entry keeps its texture and insertion order.
    pub fn stage(
        &self,
        image: ImageId,
        texture: TextureId,
        transform: Transform,
        z_key: u32,
        width: u32,
        height: u32,
    ) -> Staged {
        let mut state = lock_or_recover(&self.state, "SceneRegistry");
        if let Some(entry) = state.entries.get_mut(&image) {
            entry.transform = transform;
            entry.z_key = z_key;
            return Staged::Updated {
                texture: entry.texture,
            };
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.insert(
            image,
            SceneEntry {
                texture,
                transform,
                z_key,
                width,
                height,
                sequence,
            },
        );
        Staged::Inserted
    }

    /// Point-in-time copy of all entries, farthest first. Equal keys keep
    /// insertion order.
    pub fn snapshot(&self) -> Vec<(ImageId, SceneEntry)> {
        let mut entries: Vec<(ImageId, SceneEntry)> = {
            let state = lock_or_recover(&self.state, "SceneRegistry");
            state.entries.iter().map(|(k, v)| (*k, *v)).collect()
        };
        entries.sort_by(|(_, a), (_, b)| back_to_front(a, b));
        entries
    }

    pub fn remove(&self, image: ImageId) -> Option<SceneEntry> {
        lock_or_recover(&self.state, "SceneRegistry")
            .entries
            .remove(&image)
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> Vec<SceneEntry> {
        lock_or_recover(&self.state, "SceneRegistry")
            .entries
            .drain()
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn contains(&self, image: ImageId) -> bool {
        lock_or_recover(&self.state, "SceneRegistry")
            .entries
            .contains_key(&image)
    }

    pub fn images(&self) -> Vec<ImageId> {
        lock_or_recover(&self.state, "SceneRegistry")
            .entries
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.state, "SceneRegistry").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn back_to_front(a: &SceneEntry, b: &SceneEntry) -> Ordering {
    b.z_key
        .cmp(&a.z_key)
        .then_with(|| a.sequence.cmp(&b.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn stage(registry: &SceneRegistry, image: u64, z_key: u32) -> Staged {
        registry.stage(
            ImageId(image),
            TextureId(image as u32 + 100),
            Transform::default(),
            z_key,
            16,
            16,
        )
    }

    #[test]
    fn it_should_order_the_snapshot_farthest_first() {
        let registry = SceneRegistry::new();
        stage(&registry, 1, 3);
        stage(&registry, 2, 1);
        stage(&registry, 3, 2);

        let order: Vec<u32> = registry.snapshot().iter().map(|(_, e)| e.z_key).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn it_should_keep_insertion_order_for_equal_keys() {
        let registry = SceneRegistry::new();
        for image in [5, 2, 9, 1] {
            stage(&registry, image, 7);
        }
        let order: Vec<ImageId> = registry.snapshot().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![ImageId(5), ImageId(2), ImageId(9), ImageId(1)]);
    }

    #[test]
    fn it_should_reuse_the_texture_when_staging_the_same_image_again() {
        let registry = SceneRegistry::new();
        assert_eq!(stage(&registry, 1, 0), Staged::Inserted);

        let mut moved = Transform::default();
        assert!(moved.set_opacity(0.25).is_ok());
        let second = registry.stage(ImageId(1), TextureId(999), moved, 4, 16, 16);

        assert_eq!(second, Staged::Updated { texture: TextureId(101) });
        assert_eq!(registry.len(), 1);
        let (_, entry) = registry.snapshot()[0];
        assert_eq!(entry.texture, TextureId(101));
        assert_eq!(entry.transform.opacity(), 0.25);
        assert_eq!(entry.z_key, 4);
    }

    #[test]
    fn it_should_not_show_removed_entries_in_later_snapshots() {
        let registry = SceneRegistry::new();
        stage(&registry, 1, 0);
        stage(&registry, 2, 0);
        let before = registry.snapshot();

        assert!(registry.remove(ImageId(1)).is_some());
        assert!(registry.remove(ImageId(1)).is_none());

        assert_eq!(before.len(), 2);
        assert_eq!(registry.images(), vec![ImageId(2)]);
    }
}
