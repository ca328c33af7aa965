//! Per-stream chunk residency and request logic
//!
//! An [`AnimStream`] keeps up to three chunks of one stream file resident:
//! the permanently embedded chunk 0 plus up to two streamed chunks around
//! the phases being played. Each frame it evicts chunks the playheads have
//! left behind, polls the in-flight read, and requests the next wanted
//! block, one read at a time.

use std::sync::Arc;

use crate::animation::clip::ArtItemAnim;
use crate::animation::table::AnimMasterTable;
use crate::core::config::StreamingSettings;
use crate::core::frame::{FrameClock, MAX_FRAMES_IN_FLIGHT};
use crate::core::types::{AnimId, SkeletonId};
use crate::io::file_system::FileSystem;
use crate::io::package::{parse_anim_resource, prepare_package, CHUNK_HEADER_SIZE, RES_TYPE_ANIM};
use crate::streaming::buffer::{BlockBuffer, StreamingBufferPool};
use crate::streaming::def::AnimStreamDef;
use crate::streaming::loader::StreamLoaderPool;
use crate::streaming::prefetch::PrefetchTable;

/// Resident chunks per stream: the embedded first chunk plus two streamed.
pub const MAX_STREAMING_CHUNKS: usize = 3;

/// Frames a stream may go unused before it retires its loader and buffers.
pub const MAX_INACTIVE_FRAMES: i64 = 5;

/// One resident block of a stream file.
///
/// `phase_start`/`phase_end` bound the clip phases this chunk covers; the
/// final chunk's end is widened past 1.0 so a playhead sampling exactly at
/// the end still resolves. Streamed slots keep their pooled buffer across
/// evictions; only the binding is cleared.
#[derive(Debug)]
pub struct StreamingChunk {
    chunk_index: i32,
    phase_start: f32,
    phase_end: f32,
    buffer: Option<BlockBuffer>,
    art_items: Vec<Option<Arc<ArtItemAnim>>>,
}

impl StreamingChunk {
    fn new(num_anims: usize) -> Self {
        Self {
            chunk_index: -1,
            phase_start: 0.0,
            phase_end: 0.0,
            buffer: None,
            art_items: vec![None; num_anims],
        }
    }

    fn clear_binding(&mut self) {
        self.chunk_index = -1;
        self.phase_start = 0.0;
        self.phase_end = 0.0;
        for item in &mut self.art_items {
            *item = None;
        }
    }

    fn contains(&self, phase: f32) -> bool {
        self.phase_start <= phase && phase < self.phase_end
    }

    pub fn chunk_index(&self) -> i32 {
        self.chunk_index
    }

    pub fn phase_range(&self) -> (f32, f32) {
        (self.phase_start, self.phase_end)
    }
}

/// Engine services a stream needs while updating. Everything is owned by
/// the manager and borrowed for the duration of one call.
pub(crate) struct StreamContext<'a> {
    pub fs: &'a FileSystem,
    pub clock: &'a FrameClock,
    pub settings: &'a StreamingSettings,
    pub loaders: &'a mut StreamLoaderPool,
    pub buffers: &'a mut StreamingBufferPool,
    pub prefetch: &'a mut PrefetchTable,
    pub anim_table: &'a AnimMasterTable,
}

/// Runtime state for one registered stream definition.
pub struct AnimStream {
    id: u64,
    def: Arc<AnimStreamDef>,
    header_anims: Vec<Option<Arc<ArtItemAnim>>>,
    chunks: Vec<StreamingChunk>,
    num_used_chunks: usize,
    loader: Option<usize>,
    requested_block_index: i32,
    last_used_on_frame: i64,
    /// Streamed data must not be written until this frame's render work has
    /// completed; deferred anim commands may still read evicted chunk memory.
    wait_render_frame_complete: i64,
    fell_behind: bool,
    work_data_size: usize,
}

impl AnimStream {
    pub(crate) fn new(id: u64, def: Arc<AnimStreamDef>, work_data_size: usize) -> Self {
        let num_anims = def.num_anims as usize;
        Self {
            id,
            header_anims: vec![None; num_anims],
            chunks: (0..MAX_STREAMING_CHUNKS).map(|_| StreamingChunk::new(num_anims)).collect(),
            num_used_chunks: 1,
            loader: None,
            requested_block_index: -1,
            last_used_on_frame: 0,
            wait_render_frame_complete: -1,
            fell_behind: false,
            work_data_size,
            def,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn def(&self) -> &Arc<AnimStreamDef> {
        &self.def
    }

    pub fn stream_name(&self) -> &str {
        &self.def.stream_name
    }

    pub(crate) fn work_data_size(&self) -> usize {
        self.work_data_size
    }

    pub(crate) fn mark_used(&mut self, frame: i64) {
        self.last_used_on_frame = frame;
    }

    pub fn holds_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn num_used_chunks(&self) -> usize {
        self.num_used_chunks
    }

    /// The currently resident chunks, permanent chunk first.
    pub fn resident_chunks(&self) -> &[StreamingChunk] {
        &self.chunks[..self.num_used_chunks]
    }

    /// Resident chunk indices, permanent chunk first.
    pub fn loaded_chunks(&self) -> Vec<i32> {
        self.chunks[..self.num_used_chunks]
            .iter()
            .map(|c| c.chunk_index)
            .collect()
    }

    /// Any streamed (non-permanent) chunk resident?
    pub fn first_chunk_loaded(&self) -> bool {
        self.chunks[1..self.num_used_chunks]
            .iter()
            .any(|c| c.chunk_index >= 1)
    }

    pub fn lookup_slot_index(&self, skel_id: SkeletonId, anim_id: AnimId) -> Option<usize> {
        self.def.lookup_slot_index(skel_id, anim_id)
    }

    pub fn is_anim_attached(&self, skel_id: SkeletonId, anim_id: AnimId) -> bool {
        match self.def.lookup_slot_index(skel_id, anim_id) {
            Some(slot) => self.header_anims[slot].is_some() && self.chunks[0].art_items[slot].is_some(),
            None => false,
        }
    }

    /// Bind a header clip into its slot and resolve the embedded first
    /// chunk. Registers the slot as attached.
    ///
    /// The header only has to be *a* header of the bundle sharing this
    /// stream; frame ranges are required to match across the bundle.
    ///
    /// # Panics
    /// When the `-chunk-0` clip is missing from the master table. The first
    /// chunk ships inside the clip's own package and must always be
    /// resident.
    pub(crate) fn attach(
        &mut self,
        skel_id: SkeletonId,
        anim_id: AnimId,
        header: &Arc<ArtItemAnim>,
        anim_table: &AnimMasterTable,
        clock: &FrameClock,
    ) -> bool {
        let Some(slot) = self.def.lookup_slot_index(skel_id, anim_id) else {
            debug_assert!(false, "attach for a clip this stream does not carry");
            return false;
        };

        self.last_used_on_frame = clock.current_frame();
        self.wait_render_frame_complete = clock.current_frame();

        let chunk0_id = self.def.anim_name_ids[slot].concat("-chunk-0");
        let first_chunk = anim_table
            .lookup(header.skel_id, header.clip.hierarchy_id, chunk0_id)
            .unwrap_or_else(|| {
                panic!(
                    "Anim stream '{}': embedded first chunk for '{}' is not resident",
                    self.def.stream_name,
                    header.name()
                )
            });

        let chunk = &mut self.chunks[0];
        chunk.chunk_index = 0;
        chunk.phase_start = 0.0;
        chunk.phase_end =
            (first_chunk.clip.total_frames as f32 / header.clip.total_frames as f32).min(1.0);
        if chunk.phase_end == 1.0 {
            chunk.phase_end = 1.0001;
        }
        chunk.art_items[slot] = Some(Arc::clone(first_chunk));

        self.header_anims[slot] = Some(Arc::clone(header));
        true
    }

    /// Resolve the art item covering `phase` for an attached slot.
    ///
    /// Falls back to the permanently resident first chunk when no streamed
    /// chunk covers the phase, so a stalled stream degrades to wrong-but-
    /// valid clip data instead of a dangling handle. `None` only when the
    /// slot is not attached.
    pub fn get_art_item(
        &self,
        skel_id: SkeletonId,
        anim_id: AnimId,
        phase: f32,
    ) -> Option<Arc<ArtItemAnim>> {
        let slot = self.def.lookup_slot_index(skel_id, anim_id)?;
        self.header_anims[slot].as_ref()?;

        for chunk in &self.chunks[..self.num_used_chunks] {
            if chunk.contains(phase)
                && let Some(item) = &chunk.art_items[slot]
            {
                return Some(Arc::clone(item));
            }
        }

        self.chunks[0].art_items[slot].clone()
    }

    /// Phase within the chunk containing `phase`, normalized to `[0, 1)`.
    pub fn chunk_phase(&self, phase: f32) -> f32 {
        for chunk in &self.chunks[..self.num_used_chunks] {
            if chunk.contains(phase) {
                let range = chunk.phase_end - chunk.phase_start;
                return (phase - chunk.phase_start) / range;
            }
        }
        0.0
    }

    /// Every phase is covered by some resident chunk.
    pub fn validate_phase(&self, phases: &[f32]) -> bool {
        phases
            .iter()
            .all(|&phase| self.chunks[..self.num_used_chunks].iter().any(|c| c.contains(phase)))
    }

    pub fn owns_chunk_art_item(&self, chunk_item: &Arc<ArtItemAnim>) -> bool {
        self.chunks[..self.num_used_chunks].iter().any(|chunk| {
            chunk
                .art_items
                .iter()
                .any(|item| item.as_ref().is_some_and(|i| Arc::ptr_eq(i, chunk_item)))
        })
    }

    /// Map a chunk art item back to the real (header) clip it belongs to.
    pub fn art_item_for_chunk(
        &self,
        chunk_item: &Arc<ArtItemAnim>,
        anim_table: &AnimMasterTable,
    ) -> Option<Arc<ArtItemAnim>> {
        for chunk in &self.chunks[..self.num_used_chunks] {
            for (slot, item) in chunk.art_items.iter().enumerate() {
                if item.as_ref().is_some_and(|i| Arc::ptr_eq(i, chunk_item)) {
                    return anim_table
                        .lookup(
                            chunk_item.skel_id,
                            chunk_item.clip.hierarchy_id,
                            self.def.anim_name_ids[slot],
                        )
                        .cloned();
                }
            }
        }
        None
    }

    /// The anim table was rebuilt; every cached header is stale.
    pub(crate) fn notify_anim_table_updated(&mut self) {
        for header in &mut self.header_anims {
            *header = None;
        }
    }

    fn any_valid_header(&self) -> Option<&Arc<ArtItemAnim>> {
        self.header_anims.iter().flatten().next()
    }

    /// Chunk index a phase falls in. Every clip in the stream is required
    /// to have the same length, so any header works for the math.
    fn chunk_index_for_phase(&self, phase: f32, header: &ArtItemAnim) -> i32 {
        let frame = header.clip.frame_at_phase(phase) as u32;
        (frame / self.def.frames_per_block) as i32
    }

    fn free_loader(&mut self, loaders: &mut StreamLoaderPool) {
        if let Some(index) = self.loader.take() {
            loaders.release(index);
        }
    }

    /// Per-frame driver. See the module docs for the shape of a frame.
    pub(crate) fn update(&mut self, ctx: &mut StreamContext<'_>, phases: &[f32]) {
        // The animation may have just been unloaded while the stream object
        // survives; skip until a fresh header attaches.
        let Some(header) = self.any_valid_header().cloned() else {
            return;
        };

        let reading = self
            .loader
            .is_some_and(|index| ctx.loaders.loader(index).is_reading());
        if ctx.clock.is_paused() {
            self.last_used_on_frame = ctx.clock.current_frame();
        } else if !reading
            && ctx.clock.has_frame_retired(self.last_used_on_frame + MAX_INACTIVE_FRAMES)
            && ctx.clock.last_prepared_frame() > self.last_used_on_frame + MAX_INACTIVE_FRAMES + 1
        {
            self.reset(ctx);
            return;
        }

        if phases.is_empty() {
            return;
        }

        self.unload_unwanted_chunks(ctx, phases, &header);
        self.request_next_chunk(ctx, phases, &header);

        if !self.validate_phase(phases) {
            if !self.fell_behind {
                log::warn!(
                    "Anim stream {} fell behind! (desired phase {:.3} [chunk {}]) [chunks: {:?}]",
                    header.name(),
                    phases[0],
                    self.chunk_index_for_phase(phases[0], &header),
                    self.loaded_chunks()
                );
                self.fell_behind = true;
            }
        } else {
            self.fell_behind = false;
        }
    }

    /// Evict streamed chunks no requested phase needs anymore. A chunk is
    /// kept while it is the chunk of some phase or the one right after it.
    fn unload_unwanted_chunks(&mut self, ctx: &StreamContext<'_>, phases: &[f32], header: &ArtItemAnim) {
        // Don't rearrange chunks while a read is filling one of them.
        if self
            .loader
            .is_some_and(|index| ctx.loaders.loader(index).is_reading())
        {
            return;
        }

        let mut i = 1;
        while i < self.num_used_chunks {
            let chunk_index = self.chunks[i].chunk_index;
            let wanted = phases.iter().any(|&phase| {
                let used = self.chunk_index_for_phase(phase, header);
                chunk_index == used || chunk_index == used + 1
            });
            if wanted {
                i += 1;
                continue;
            }

            log::debug!(
                "[{}] Unloading chunk slot {} [phase {:.3} -> {:.3}] [chunk {}]",
                self.def.stream_name,
                i,
                self.chunks[i].phase_start,
                self.chunks[i].phase_end,
                chunk_index,
            );

            let last = self.num_used_chunks - 1;
            self.chunks.swap(i, last);
            // The pooled buffer stays with the slot; deferred render work
            // may still be reading it, so only the binding is cleared.
            self.chunks[last].clear_binding();
            self.num_used_chunks -= 1;
            self.wait_render_frame_complete = ctx.clock.current_frame();
        }
    }

    fn request_next_chunk(&mut self, ctx: &mut StreamContext<'_>, phases: &[f32], header: &Arc<ArtItemAnim>) {
        let last_chunk_index = self.def.last_chunk_index();

        // A clip that fits in the embedded chunk has no stream file worth
        // opening.
        if last_chunk_index < 1 {
            return;
        }

        let reading = self
            .loader
            .is_some_and(|index| ctx.loaders.loader(index).is_reading());
        if reading {
            let loader = ctx.loaders.loader_mut(self.loader.expect("reading without a loader"));
            let Some((bytes, outcome)) = loader.wait_for_read() else {
                return;
            };

            self.chunks[self.num_used_chunks]
                .buffer
                .as_mut()
                .expect("in-flight read without a chunk buffer")
                .restore_bytes(bytes);

            match outcome {
                Err(e) => {
                    assert!(
                        !ctx.settings.on_disc,
                        "Anim stream '{}' read failed on a disc build: {e}",
                        self.def.stream_name
                    );
                    log::warn!("[{}] chunk read failed: {e}", self.def.stream_name);
                    self.requested_block_index = -1;
                }
                Ok(()) => self.publish_loaded_chunk(header),
            }
            return;
        }

        // Once the playheads sit in the final chunk and it is resident there
        // is nothing left to stream.
        let final_chunk_resident = self.chunks[1..self.num_used_chunks]
            .iter()
            .any(|c| c.chunk_index == last_chunk_index);
        if final_chunk_resident
            && phases
                .iter()
                .all(|&p| self.chunk_index_for_phase(p, header) == last_chunk_index)
        {
            self.free_loader(ctx.loaders);
            return;
        }

        // Hold off new writes until the render frame that last saw the old
        // chunk layout has finished.
        let frame_diff = ctx.clock.current_frame() - self.wait_render_frame_complete;
        if frame_diff < MAX_FRAMES_IN_FLIGHT
            && !ctx.clock.is_render_frame_complete(self.wait_render_frame_complete)
        {
            return;
        }

        let loader_index = match self.loader {
            Some(index) => index,
            None => match ctx.loaders.acquire() {
                Some(index) => {
                    log::trace!("[{}] Acquired Stream Loader [{index}]", self.def.stream_name);
                    self.loader = Some(index);
                    index
                }
                None => {
                    log::warn!(
                        "[{}] Could not acquire a new stream loader. Too many streams are playing at once.",
                        self.def.stream_name
                    );
                    return;
                }
            },
        };

        if !ctx.loaders.loader(loader_index).is_open() {
            if ctx
                .loaders
                .loader_mut(loader_index)
                .request_open(ctx.fs, ctx.settings, &self.def.stream_name)
                .is_err()
            {
                self.free_loader(ctx.loaders);
            }
            return;
        }

        // The two streamable slots share pooled buffers for the stream's
        // lifetime; allocate them on first need.
        for i in 1..MAX_STREAMING_CHUNKS {
            if self.chunks[i].buffer.is_none() {
                self.chunks[i].buffer = Some(ctx.buffers.allocate(self.def.max_block_size as usize));
            }
        }

        if self.num_used_chunks >= MAX_STREAMING_CHUNKS {
            return;
        }

        // Wanted block: the chunk some phase sits in but is not resident,
        // else the chunk following one.
        let mut wanted = -1;
        for &phase in phases {
            let used = self.chunk_index_for_phase(phase, header);
            let resident = |index: i32| {
                self.chunks[..self.num_used_chunks]
                    .iter()
                    .any(|c| c.chunk_index == index)
            };
            if !resident(used) {
                wanted = used;
                break;
            }
            if !resident(used + 1) {
                wanted = used + 1;
                break;
            }
        }
        if wanted <= 0 || wanted > last_chunk_index {
            return;
        }

        let block_row = (wanted - 1) as usize;
        let size = self.def.interleaved_block_size(block_row) as usize;
        let offset = self.def.interleaved_block_offset(block_row);
        let bytes = self.chunks[self.num_used_chunks]
            .buffer
            .as_mut()
            .expect("chunk buffer was not allocated")
            .take_bytes();

        ctx.loaders.loader_mut(loader_index).read(
            ctx.fs,
            ctx.prefetch,
            bytes,
            offset,
            size,
            &self.def.stream_name,
        );
        self.requested_block_index = wanted - 1;
    }

    /// Bind a completed block read into the next chunk slot: parse each
    /// per-slot payload, take its animation resource, and compute the phase
    /// interval. The chunk becomes visible to `get_art_item` here.
    fn publish_loaded_chunk(&mut self, header: &Arc<ArtItemAnim>) {
        let def = Arc::clone(&self.def);
        let block_row = self.requested_block_index as usize;
        let read_chunk_index = self.requested_block_index + 1;
        let slot_index = self.num_used_chunks;
        debug_assert!(slot_index >= 1);
        debug_assert!(
            !self.chunks[..self.num_used_chunks]
                .iter()
                .any(|c| c.chunk_index == read_chunk_index),
            "chunk {read_chunk_index} already resident"
        );

        let mut frames_in_chunk = 0u32;
        {
            let chunk = &mut self.chunks[slot_index];
            let buffer = chunk.buffer.as_ref().expect("published chunk without a buffer");

            let mut offset = 0usize;
            for slot in 0..def.num_anims as usize {
                let slot_size = def.slot_size(block_row, slot) as usize;
                let payload = &buffer.bytes()[offset + CHUNK_HEADER_SIZE..offset + slot_size];

                let items = prepare_package(payload).unwrap_or_else(|e| {
                    panic!("Anim stream '{}': bad chunk payload: {e}", def.stream_name)
                });
                let anim = items
                    .iter()
                    .find(|item| item.type_id == RES_TYPE_ANIM)
                    .unwrap_or_else(|| {
                        panic!("Anim stream '{}': chunk payload has no ANIM resource", def.stream_name)
                    });
                let desc = parse_anim_resource(anim.bytes).unwrap_or_else(|e| {
                    panic!("Anim stream '{}': bad ANIM resource: {e}", def.stream_name)
                });

                let item = Arc::new(ArtItemAnim::from_resource(&desc));
                frames_in_chunk = item.clip.total_frames;
                chunk.art_items[slot] = Some(item);
                offset += slot_size;
            }

            // The numerators are integral frame counts; dividing both by the
            // clip length makes this chunk's end bitwise equal to the next
            // chunk's start.
            let total_frames = header.clip.total_frames as f32;
            let start_frames = read_chunk_index as u32 * def.frames_per_block;
            chunk.chunk_index = read_chunk_index;
            chunk.phase_start = start_frames as f32 / total_frames;
            chunk.phase_end = (((start_frames + frames_in_chunk) as f32) / total_frames).min(1.0);
            if chunk.phase_end == 1.0 {
                chunk.phase_end = 1.0001;
            }

            log::debug!(
                "[{}] Read completed into chunk slot {} (chunk {}) [phase {:.3} - {:.3}]",
                def.stream_name,
                slot_index,
                read_chunk_index,
                chunk.phase_start,
                chunk.phase_end,
            );
        }

        self.num_used_chunks += 1;
        self.requested_block_index = -1;
    }

    /// Forcefully stop streaming, return every pooled buffer, and detach
    /// all slots. The stream re-attaches on its next reported usage.
    pub(crate) fn reset(&mut self, ctx: &mut StreamContext<'_>) {
        if let Some(index) = self.loader.take() {
            ctx.loaders.force_release(ctx.fs, index);
        }

        for chunk in &mut self.chunks {
            if let Some(buffer) = chunk.buffer.take() {
                ctx.buffers.free(buffer);
            }
            chunk.clear_binding();
        }
        for header in &mut self.header_anims {
            *header = None;
        }

        self.num_used_chunks = 1;
        self.requested_block_index = -1;
        self.last_used_on_frame = ctx.clock.current_frame();
        self.wait_render_frame_complete = ctx.clock.current_frame();
        self.fell_behind = false;
    }

    /// Engine teardown: stop i/o and return buffers without re-initializing.
    pub(crate) fn shutdown(&mut self, ctx: &mut StreamContext<'_>) {
        if let Some(index) = self.loader.take() {
            ctx.loaders.force_release(ctx.fs, index);
        }
        for chunk in &mut self.chunks {
            if let Some(buffer) = chunk.buffer.take() {
                ctx.buffers.free(buffer);
            }
        }
        for header in &mut self.header_anims {
            *header = None;
        }
    }
}
