//! Process-wide stream registry and per-frame driver
//!
//! The manager owns every registered stream, the loader pool, the streaming
//! buffer pool and the usage window. Gameplay reports which clip phases it
//! is sampling; once per frame `update_all` replays the distinct phases of
//! the last few retired frames into each stream. Everything runs on the
//! game thread, which is what makes the publish step in the streams safe
//! without fences.

use std::sync::Arc;

use crate::animation::clip::ArtItemAnim;
use crate::animation::table::AnimMasterTable;
use crate::core::config::StreamingSettings;
use crate::core::error::{Result, StreamError};
use crate::core::frame::FrameClock;
use crate::core::types::{AnimId, SkeletonId};
use crate::io::file_system::FileSystem;
use crate::streaming::buffer::StreamingBufferPool;
use crate::streaming::def::AnimStreamDef;
use crate::streaming::loader::StreamLoaderPool;
use crate::streaming::prefetch::PrefetchTable;
use crate::streaming::stream::{AnimStream, StreamContext, MAX_INACTIVE_FRAMES, MAX_STREAMING_CHUNKS};

/// Upper bound on simultaneously registered streams.
pub const MAX_ANIM_STREAMS: usize = 350;

const USAGE_WINDOW: usize = MAX_INACTIVE_FRAMES as usize;

/// One phase reported by gameplay for one clip on one frame.
struct ActiveUsage {
    frame: i64,
    stream_id: u64,
    anim_id: AnimId,
    phase: f32,
    header: Arc<ArtItemAnim>,
}

/// Registry and per-frame driver for every animation stream.
pub struct AnimStreamManager {
    settings: StreamingSettings,
    streams: Vec<AnimStream>,
    next_stream_id: u64,
    total_work_data_size: usize,
    usage: [Vec<ActiveUsage>; USAGE_WINDOW],
    last_divergence_warn_frame: i64,
    clock: FrameClock,
    anim_table: AnimMasterTable,
    loaders: StreamLoaderPool,
    buffers: StreamingBufferPool,
    prefetch: PrefetchTable,
    // Dropped last so pending operations resolve before the runtime goes.
    fs: FileSystem,
}

impl AnimStreamManager {
    pub fn new(settings: StreamingSettings) -> Self {
        let buffers = StreamingBufferPool::new(settings.streaming_buffer_size);
        Self {
            settings,
            streams: Vec::new(),
            next_stream_id: 1,
            total_work_data_size: 0,
            usage: std::array::from_fn(|_| Vec::new()),
            last_divergence_warn_frame: -1,
            clock: FrameClock::new(),
            anim_table: AnimMasterTable::new(),
            loaders: StreamLoaderPool::new(),
            buffers,
            prefetch: PrefetchTable::new(),
            fs: FileSystem::new(),
        }
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut FrameClock {
        &mut self.clock
    }

    pub fn anim_table(&self) -> &AnimMasterTable {
        &self.anim_table
    }

    pub fn anim_table_mut(&mut self) -> &mut AnimMasterTable {
        &mut self.anim_table
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn total_work_data_size(&self) -> usize {
        self.total_work_data_size
    }

    pub fn streaming_buffer_allocated(&self) -> usize {
        self.buffers.allocated()
    }

    pub fn streaming_buffer_high_water(&self) -> usize {
        self.buffers.high_water()
    }

    /// Any loader mid-read across all streams.
    pub fn is_busy(&self) -> bool {
        self.loaders.any_reading()
    }

    /// Loaders currently checked out by streams.
    pub fn used_loader_count(&self) -> usize {
        self.loaders.iter().filter(|l| l.is_used()).count()
    }

    fn stream_index_for(&self, skel_id: SkeletonId, anim_id: AnimId) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.lookup_slot_index(skel_id, anim_id).is_some())
    }

    /// The stream carrying `(header.skel_id, anim_id)`, if registered.
    pub fn get_stream(&self, header: &ArtItemAnim, anim_id: AnimId) -> Option<&AnimStream> {
        self.stream_index_for(header.skel_id, anim_id)
            .map(|i| &self.streams[i])
    }

    /// The stream owning a chunk art item handed out earlier.
    pub fn get_stream_from_chunk(&self, chunk_item: &Arc<ArtItemAnim>) -> Option<&AnimStream> {
        self.streams.iter().find(|s| s.owns_chunk_art_item(chunk_item))
    }

    /// Register an authored stream definition. The stream starts empty and
    /// attaches lazily on first reported usage.
    pub fn register_stream_def(&mut self, def: Arc<AnimStreamDef>) -> Result<u64> {
        debug_assert!(def.validate(), "malformed stream definition '{}'", def.stream_name);

        if self.streams.len() >= MAX_ANIM_STREAMS {
            log::error!("Anim stream registry is full ({MAX_ANIM_STREAMS} streams)");
            debug_assert!(false, "anim stream registry is full");
            return Err(StreamError::RegistryFull);
        }

        let work_data_size = stream_work_data_size(&def);
        let id = self.next_stream_id;
        self.next_stream_id += 1;

        self.streams.push(AnimStream::new(id, def, work_data_size));
        self.total_work_data_size += work_data_size;
        Ok(id)
    }

    /// Remove a stream on package logout, resetting it first.
    ///
    /// # Panics
    /// When the definition was never registered.
    pub fn unregister_stream_def(&mut self, def: &Arc<AnimStreamDef>) {
        let Some(index) = self.streams.iter().position(|s| Arc::ptr_eq(s.def(), def)) else {
            panic!("Tried to unregister a stream that was never registered");
        };

        self.total_work_data_size -= self.streams[index].work_data_size();
        {
            let mut ctx = StreamContext {
                fs: &self.fs,
                clock: &self.clock,
                settings: &self.settings,
                loaders: &mut self.loaders,
                buffers: &mut self.buffers,
                prefetch: &mut self.prefetch,
                anim_table: &self.anim_table,
            };
            self.streams[index].reset(&mut ctx);
        }
        self.streams.swap_remove(index);
    }

    /// Record that gameplay is sampling `(header, anim_id)` at `phase` this
    /// frame. Attaches the stream on first use; repeated notifications for
    /// the same phase in one frame collapse to a single record.
    pub fn notify_usage(&mut self, header: &Arc<ArtItemAnim>, anim_id: AnimId, phase: f32, frame: i64) {
        // At the very end the embedded last chunk serves the pose; no need
        // to involve the stream at all.
        if phase == 1.0
            && self
                .anim_table
                .lookup(header.skel_id, header.clip.hierarchy_id, anim_id.concat("-chunk-last"))
                .is_some()
        {
            return;
        }

        let Some(index) = self.stream_index_for(header.skel_id, anim_id) else {
            log::warn!("Usage reported for '{}' but no stream carries it", header.name());
            return;
        };

        let stream = &mut self.streams[index];
        if !stream.is_anim_attached(header.skel_id, anim_id) {
            stream.attach(header.skel_id, anim_id, header, &self.anim_table, &self.clock);
        }
        stream.mark_used(frame);
        let stream_id = stream.id();

        if !self.clock.is_paused() {
            log::trace!(
                "Notify Anim Usage: gameframe {frame}, anim '{}' @ phase {phase:.3}",
                header.name()
            );
        }

        let bucket = &mut self.usage[(frame.rem_euclid(MAX_INACTIVE_FRAMES)) as usize];

        let already_registered = bucket
            .iter()
            .any(|u| u.anim_id == anim_id && u.phase == phase && u.frame == frame);

        // Two different phases hitting the same stream in one frame means
        // the consumers have drifted apart; every phase still streams, but
        // flag it once per frame.
        if cfg!(debug_assertions) && self.last_divergence_warn_frame != frame {
            if let Some(other) = bucket
                .iter()
                .find(|u| u.stream_id == stream_id && u.frame == frame && (u.phase - phase).abs() > 0.001)
            {
                log::warn!(
                    "Out-of-sync phases in streaming animation: anim '{}' @ phase {:.3} and '{}' @ phase {:.3}",
                    header.name(),
                    phase,
                    other.header.name(),
                    other.phase
                );
                self.last_divergence_warn_frame = frame;
            }
        }

        if !already_registered {
            debug_assert!(bucket.len() < MAX_ANIM_STREAMS, "Too many active streaming animations");
            if bucket.len() < MAX_ANIM_STREAMS {
                bucket.push(ActiveUsage {
                    frame,
                    stream_id,
                    anim_id,
                    phase,
                    header: Arc::clone(header),
                });
            }
        }
    }

    /// Distinct phases reported for one stream across the usage window,
    /// newest frame first. Decaying phases keep their chunks pinned a few
    /// frames after the playhead moves on.
    fn used_phases_for_stream(&self, stream_id: u64) -> Vec<f32> {
        let mut frame = self.clock.current_frame() - 1;
        if frame < MAX_INACTIVE_FRAMES {
            return Vec::new();
        }

        let mut phases = Vec::new();
        for _ in 0..USAGE_WINDOW {
            let bucket = &self.usage[(frame.rem_euclid(MAX_INACTIVE_FRAMES)) as usize];
            for usage in bucket {
                if usage.stream_id == stream_id
                    && usage.frame == frame
                    && !phases.contains(&usage.phase)
                {
                    phases.push(usage.phase);
                }
            }
            frame -= 1;
        }
        phases
    }

    /// Per-frame driver: wind down idle loaders, reap prefetch probes, and
    /// update every stream with its recently used phases. Call once per
    /// frame after the frame clock has advanced.
    pub fn update_all(&mut self) {
        let frame = self.clock.current_frame() - 1;

        if log::log_enabled!(log::Level::Debug) {
            let active = self.usage[(frame.rem_euclid(MAX_INACTIVE_FRAMES)) as usize].len();
            log::debug!("Num Registered Streaming Anims: {}", self.streams.len());
            log::debug!("Num Active Streaming Anims: {active}");
            log::debug!("Total Work Buffer Size: {} KiB", self.total_work_data_size / 1024);
            log::debug!(
                "Stream Buffer Mem Used: {} / {} KiB (Max: {} KiB)",
                self.buffers.allocated() / 1024,
                self.buffers.capacity() / 1024,
                self.buffers.high_water() / 1024
            );
            for stream in &self.streams {
                log::debug!(
                    "[{}] loaded chunks {:?}{}",
                    stream.stream_name(),
                    stream.loaded_chunks(),
                    if stream.holds_loader() { " (loader held)" } else { "" }
                );
            }
            for loader in self.loaders.iter() {
                if let Some(path) = loader.file_name().filter(|_| loader.is_used()) {
                    log::debug!("Active Loader '{}'", path.display());
                }
            }
        }

        self.prefetch.poll_completed();
        self.loaders.update(&self.fs);

        let phase_sets: Vec<Vec<f32>> = self
            .streams
            .iter()
            .map(|s| self.used_phases_for_stream(s.id()))
            .collect();

        let mut ctx = StreamContext {
            fs: &self.fs,
            clock: &self.clock,
            settings: &self.settings,
            loaders: &mut self.loaders,
            buffers: &mut self.buffers,
            prefetch: &mut self.prefetch,
            anim_table: &self.anim_table,
        };
        for (stream, phases) in self.streams.iter_mut().zip(&phase_sets) {
            stream.update(&mut ctx, phases);
        }

        self.usage[((frame + 1).rem_euclid(MAX_INACTIVE_FRAMES)) as usize].clear();
    }

    /// Resolve the art item for `(header, anim_id)` at `phase`.
    ///
    /// A phase of exactly 1.0 is served from the embedded `-chunk-last`
    /// clip when one exists, bypassing the streaming system. Clips with no
    /// registered stream fall back to their embedded `-chunk-0`.
    pub fn get_art_item(
        &self,
        header: &Arc<ArtItemAnim>,
        anim_id: AnimId,
        phase: f32,
    ) -> Option<Arc<ArtItemAnim>> {
        if phase == 1.0
            && let Some(last) = self
                .anim_table
                .lookup(header.skel_id, header.clip.hierarchy_id, anim_id.concat("-chunk-last"))
        {
            return Some(Arc::clone(last));
        }

        if let Some(stream) = self.get_stream(header, anim_id) {
            return stream.get_art_item(header.skel_id, anim_id, phase);
        }

        self.anim_table
            .lookup(header.skel_id, header.clip.hierarchy_id, anim_id.concat("-chunk-0"))
            .cloned()
    }

    /// Most recently reported phase for `(header, anim_id)`.
    ///
    /// Falls back to any record of the same stream so that switching
    /// between clips of one bundle keeps a sensible start phase.
    pub fn get_stream_phase(&self, header: &Arc<ArtItemAnim>, anim_id: AnimId) -> f32 {
        let newest = self.clock.current_frame() - 1;
        if newest < MAX_INACTIVE_FRAMES {
            return 0.0;
        }

        let mut frame = newest;
        for _ in 0..USAGE_WINDOW {
            let bucket = &self.usage[(frame.rem_euclid(MAX_INACTIVE_FRAMES)) as usize];
            for usage in bucket {
                if usage.anim_id == anim_id && Arc::ptr_eq(&usage.header, header) {
                    return usage.phase;
                }
            }
            frame -= 1;
        }

        if let Some(stream) = self.get_stream(header, anim_id) {
            let stream_id = stream.id();
            let mut frame = newest;
            for _ in 0..USAGE_WINDOW {
                let bucket = &self.usage[(frame.rem_euclid(MAX_INACTIVE_FRAMES)) as usize];
                for usage in bucket {
                    if usage.stream_id == stream_id {
                        return usage.phase;
                    }
                }
                frame -= 1;
            }
        }

        0.0
    }

    /// Phase within the containing chunk, for consumers that sample
    /// chunk-local time. Phase 1.0 is the embedded last chunk's business.
    pub fn get_chunk_phase(&self, header: &Arc<ArtItemAnim>, anim_id: AnimId, phase: f32) -> f32 {
        if phase == 1.0 {
            return phase;
        }
        self.get_stream(header, anim_id)
            .map_or(0.0, |s| s.chunk_phase(phase))
    }

    /// Whether a resident chunk covers `phase` right now.
    pub fn is_loaded(&self, header: &Arc<ArtItemAnim>, anim_id: AnimId, phase: f32) -> bool {
        self.get_stream(header, anim_id)
            .is_some_and(|s| s.validate_phase(&[phase]))
    }

    /// Map a chunk art item back to the real header clip.
    pub fn get_art_item_for_chunk(&self, chunk_item: &Arc<ArtItemAnim>) -> Option<Arc<ArtItemAnim>> {
        self.get_stream_from_chunk(chunk_item)?
            .art_item_for_chunk(chunk_item, &self.anim_table)
    }

    /// Forcefully reset one stream.
    pub fn reset(&mut self, header: &Arc<ArtItemAnim>, anim_id: AnimId) {
        if let Some(index) = self.stream_index_for(header.skel_id, anim_id) {
            let mut ctx = StreamContext {
                fs: &self.fs,
                clock: &self.clock,
                settings: &self.settings,
                loaders: &mut self.loaders,
                buffers: &mut self.buffers,
                prefetch: &mut self.prefetch,
                anim_table: &self.anim_table,
            };
            self.streams[index].reset(&mut ctx);
        }
    }

    /// Forcefully reset every stream.
    pub fn reset_all(&mut self) {
        let mut ctx = StreamContext {
            fs: &self.fs,
            clock: &self.clock,
            settings: &self.settings,
            loaders: &mut self.loaders,
            buffers: &mut self.buffers,
            prefetch: &mut self.prefetch,
            anim_table: &self.anim_table,
        };
        for stream in &mut self.streams {
            stream.reset(&mut ctx);
        }
    }

    /// Engine teardown.
    pub fn shutdown(&mut self) {
        let mut ctx = StreamContext {
            fs: &self.fs,
            clock: &self.clock,
            settings: &self.settings,
            loaders: &mut self.loaders,
            buffers: &mut self.buffers,
            prefetch: &mut self.prefetch,
            anim_table: &self.anim_table,
        };
        for stream in &mut self.streams {
            stream.shutdown(&mut ctx);
        }
    }

    /// The master table was rebuilt; cached headers in every stream are
    /// stale and re-resolve on next use.
    pub fn notify_anim_table_updated(&mut self) {
        for stream in &mut self.streams {
            stream.notify_anim_table_updated();
        }
    }
}

fn align16(size: usize) -> usize {
    size.next_multiple_of(16)
}

/// Bytes of work data a stream occupies: the stream itself, the header
/// array, the chunk array, and one art-item array per chunk.
fn stream_work_data_size(def: &AnimStreamDef) -> usize {
    let num_anims = def.num_anims as usize;
    let ptr = size_of::<usize>();
    align16(size_of::<AnimStream>())
        + align16(ptr * num_anims)
        + align16(size_of::<crate::streaming::stream::StreamingChunk>() * MAX_STREAMING_CHUNKS)
        + align16(ptr * num_anims) * MAX_STREAMING_CHUNKS
}
