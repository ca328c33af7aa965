//! Asynchronous file i/o and package parsing

pub mod file_system;
pub mod package;

pub use file_system::{FileHandle, FileSystem, IoOperation, IoPriority, ReadDone};
pub use package::{ChunkHeader, ResourceItem, CHUNK_HEADER_SIZE, RES_TYPE_ANIM};
