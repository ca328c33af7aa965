//! Animation clip data and the master lookup table

pub mod clip;
pub mod table;

pub use clip::{ArtItemAnim, ClipData};
pub use table::AnimMasterTable;
