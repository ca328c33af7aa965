//! Demand-paged animation streaming
//!
//! Large cinematic and facial clips stay on disk; only the blocks around
//! the phases currently being played are resident. Gameplay reports usage
//! through the [`AnimStreamManager`], which drives every registered
//! [`AnimStream`] once per frame, and resolves clip handles that are always
//! valid even while the stream catches up.

pub mod buffer;
pub mod def;
pub mod loader;
pub mod manager;
pub mod prefetch;
pub mod stream;

pub use buffer::{BlockBuffer, StreamingBufferPool, STREAMING_BUFFER_RESERVE};
pub use def::AnimStreamDef;
pub use loader::{AnimStreamLoader, StreamLoaderPool, MAX_ANIM_STREAM_LOADERS};
pub use manager::{AnimStreamManager, MAX_ANIM_STREAMS};
pub use prefetch::{PrefetchTable, MAX_PREFETCH_OPS};
pub use stream::{AnimStream, StreamingChunk, MAX_INACTIVE_FRAMES, MAX_STREAMING_CHUNKS};
