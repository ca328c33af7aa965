//! Animation clip items
//!
//! An [`ArtItemAnim`] is the unit the rest of the engine samples from: a
//! named clip bound to a skeleton, carrying its [`ClipData`]. For streaming
//! clips the *header* item knows the full frame range while each chunk item
//! only covers the frames of its own block; the two are required to agree on
//! everything else.

use crate::core::types::{AnimId, HierarchyId, SkeletonId};
use crate::io::package::AnimResourceDesc;

/// Frame-range and hierarchy info for one clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipData {
    pub hierarchy_id: HierarchyId,
    pub total_frames: u32,
    pub frames_per_second: f32,
}

impl ClipData {
    /// Clip-local frame at a normalized phase, `phase * total_frames`.
    pub fn frame_at_phase(&self, phase: f32) -> f32 {
        phase * self.total_frames as f32
    }
}

/// A loaded animation clip.
#[derive(Clone, Debug)]
pub struct ArtItemAnim {
    pub name: String,
    pub name_id: AnimId,
    pub skel_id: SkeletonId,
    pub clip: ClipData,
}

impl ArtItemAnim {
    pub fn new(name: &str, skel_id: SkeletonId, clip: ClipData) -> Self {
        Self {
            name: name.to_owned(),
            name_id: AnimId::of(name),
            skel_id,
            clip,
        }
    }

    /// Build an item from a resource decoded out of a streamed package.
    pub fn from_resource(desc: &AnimResourceDesc) -> Self {
        Self {
            name: desc.name().to_owned(),
            name_id: AnimId::from_raw(desc.name_id),
            skel_id: SkeletonId(desc.skel_id),
            clip: ClipData {
                hierarchy_id: HierarchyId(desc.hierarchy_id),
                total_frames: desc.total_frames,
                frames_per_second: desc.frames_per_second,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_at_phase() {
        let clip = ClipData {
            hierarchy_id: HierarchyId(0),
            total_frames: 90,
            frames_per_second: 30.0,
        };
        assert_eq!(clip.frame_at_phase(0.0), 0.0);
        assert_eq!(clip.frame_at_phase(1.0), 90.0);
        assert_eq!(clip.frame_at_phase(0.5), 45.0);
    }

    #[test]
    fn test_from_resource_preserves_identity() {
        let desc = AnimResourceDesc::new(
            "walk-chunk-2",
            AnimId::of("walk-chunk-2"),
            SkeletonId(3),
            HierarchyId(9),
            30,
            30.0,
        );
        let item = ArtItemAnim::from_resource(&desc);
        assert_eq!(item.name(), "walk-chunk-2");
        assert_eq!(item.name_id, AnimId::of("walk-chunk-2"));
        assert_eq!(item.skel_id, SkeletonId(3));
        assert_eq!(item.clip.hierarchy_id, HierarchyId(9));
        assert_eq!(item.clip.total_frames, 30);
    }
}
