//! Stream definitions
//!
//! An [`AnimStreamDef`] is authored by the build tools and logged in with
//! the package that owns it. It declares which clips share one `.stm` file
//! and how that file is carved into interleaved blocks. Don't change the
//! layout without changing the tools too.

use crate::core::types::{AnimId, SkeletonId};

/// Authored description of one animation stream.
///
/// The `.stm` file holds `num_blocks` interleaved blocks back to back; row
/// `r` of `block_sizes` gives the per-slot byte sizes inside file block `r`,
/// which backs runtime chunk `r + 1`. Chunk 0 is embedded in the clip's own
/// package and never read from the stream file.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AnimStreamDef {
    pub stream_name: String,
    pub num_anims: u32,
    pub frames_per_block: u32,
    pub max_block_size: u32,
    pub num_blocks: u32,
    /// Per-slot skeleton ids, length `num_anims`.
    pub skel_ids: Vec<SkeletonId>,
    /// Per-slot clip name ids, length `num_anims`.
    pub anim_name_ids: Vec<AnimId>,
    /// Slot-major block size table, length `num_blocks * num_anims`.
    pub block_sizes: Vec<u32>,
}

impl AnimStreamDef {
    /// Validate the table lengths against the declared counts.
    pub fn validate(&self) -> bool {
        self.num_anims > 0
            && self.skel_ids.len() == self.num_anims as usize
            && self.anim_name_ids.len() == self.num_anims as usize
            && self.block_sizes.len() == (self.num_blocks * self.num_anims) as usize
            && self.frames_per_block > 0
    }

    /// Slot holding `(skel_id, anim_id)`, if this stream carries it.
    pub fn lookup_slot_index(&self, skel_id: SkeletonId, anim_id: AnimId) -> Option<usize> {
        (0..self.num_anims as usize)
            .find(|&slot| self.skel_ids[slot] == skel_id && self.anim_name_ids[slot] == anim_id)
    }

    /// Byte size of slot `slot` inside file block `block`.
    pub fn slot_size(&self, block: usize, slot: usize) -> u32 {
        self.block_sizes[block * self.num_anims as usize + slot]
    }

    /// Total size of interleaved file block `block`.
    pub fn interleaved_block_size(&self, block: usize) -> u32 {
        (0..self.num_anims as usize)
            .map(|slot| self.slot_size(block, slot))
            .sum()
    }

    /// File offset of interleaved file block `block`.
    pub fn interleaved_block_offset(&self, block: usize) -> u64 {
        (0..block)
            .map(|b| self.interleaved_block_size(b) as u64)
            .sum()
    }

    /// Expected size of the whole `.stm` file.
    pub fn expected_file_size(&self) -> u64 {
        self.interleaved_block_offset(self.num_blocks as usize)
    }

    /// Index of the last streamable chunk. Chunks run `0..=last`; chunk 0 is
    /// embedded, chunks `1..=last` come from file blocks `0..last`.
    pub fn last_chunk_index(&self) -> i32 {
        self.num_blocks as i32
    }
}
