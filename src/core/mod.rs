//! Core engine services: errors, logging, configuration, frame timing, ids

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod types;

pub use config::StreamingSettings;
pub use error::{Result, StreamError};
pub use frame::{FrameClock, MAX_FRAMES_IN_FLIGHT};
pub use types::{AnimId, HierarchyId, SkeletonId};
