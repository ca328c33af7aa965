//! Master table of resident animation clips
//!
//! Every logged-in animation is registered here under
//! `(skeleton, hierarchy, name)`. The streaming system resolves the
//! permanently embedded `-chunk-0` and `-chunk-last` clips through this
//! table; it never owns the entries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::animation::clip::ArtItemAnim;
use crate::core::types::{AnimId, HierarchyId, SkeletonId};

#[derive(Default)]
pub struct AnimMasterTable {
    anims: HashMap<(SkeletonId, HierarchyId, AnimId), Arc<ArtItemAnim>>,
}

impl AnimMasterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item under its own identity. Replaces any previous entry.
    pub fn insert(&mut self, item: Arc<ArtItemAnim>) {
        self.anims
            .insert((item.skel_id, item.clip.hierarchy_id, item.name_id), item);
    }

    pub fn lookup(
        &self,
        skel_id: SkeletonId,
        hierarchy_id: HierarchyId,
        anim_id: AnimId,
    ) -> Option<&Arc<ArtItemAnim>> {
        self.anims.get(&(skel_id, hierarchy_id, anim_id))
    }

    pub fn remove(
        &mut self,
        skel_id: SkeletonId,
        hierarchy_id: HierarchyId,
        anim_id: AnimId,
    ) -> Option<Arc<ArtItemAnim>> {
        self.anims.remove(&(skel_id, hierarchy_id, anim_id))
    }

    pub fn len(&self) -> usize {
        self.anims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::clip::ClipData;

    fn item(name: &str, skel: u32, hierarchy: u32) -> Arc<ArtItemAnim> {
        Arc::new(ArtItemAnim::new(
            name,
            SkeletonId(skel),
            ClipData {
                hierarchy_id: HierarchyId(hierarchy),
                total_frames: 60,
                frames_per_second: 30.0,
            },
        ))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = AnimMasterTable::new();
        table.insert(item("run", 1, 2));

        let found = table.lookup(SkeletonId(1), HierarchyId(2), AnimId::of("run"));
        assert!(found.is_some());
        assert_eq!(found.unwrap().name(), "run");

        assert!(table.lookup(SkeletonId(1), HierarchyId(3), AnimId::of("run")).is_none());
        assert!(table.lookup(SkeletonId(1), HierarchyId(2), AnimId::of("walk")).is_none());
    }

    #[test]
    fn test_chunk_zero_lookup_via_concat() {
        let mut table = AnimMasterTable::new();
        table.insert(item("cin-hero-chunk-0", 1, 2));

        let id = AnimId::of("cin-hero").concat("-chunk-0");
        assert!(table.lookup(SkeletonId(1), HierarchyId(2), id).is_some());
    }

    #[test]
    fn test_remove() {
        let mut table = AnimMasterTable::new();
        table.insert(item("run", 1, 2));
        assert_eq!(table.len(), 1);

        let removed = table.remove(SkeletonId(1), HierarchyId(2), AnimId::of("run"));
        assert!(removed.is_some());
        assert!(table.is_empty());
    }
}
