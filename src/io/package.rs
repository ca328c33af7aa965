//! In-memory package parsing
//!
//! Streamed chunk payloads arrive as *packages*: a small item table in front
//! of back-to-back resource payloads. The layout is written by the build
//! tools and must not change without a matching tool update. All structs are
//! plain-old-data and read with unaligned loads, so a package can be parsed
//! in place anywhere inside a streaming block buffer.

use bytemuck::{Pod, Zeroable};

use crate::core::error::{Result, StreamError};
use crate::core::types::{AnimId, HierarchyId, SkeletonId};

/// Fixed header in front of every per-slot chunk payload. The tools assume
/// it is exactly 16 bytes.
pub const CHUNK_HEADER_SIZE: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ChunkHeader {
    pub crc32: u32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PackageHeader {
    pub item_count: u32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ItemHeader {
    /// Resource type fourcc.
    pub type_id: u32,
    /// Payload size in bytes, excluding this header and padding.
    pub size: u32,
    pub pad: [u32; 2],
}

/// Resource type of an animation clip.
pub const RES_TYPE_ANIM: u32 = u32::from_le_bytes(*b"ANIM");

/// Serialized animation resource as the tools write it into a package.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AnimResourceDesc {
    pub name: [u8; 64],
    pub name_id: u64,
    pub skel_id: u32,
    pub hierarchy_id: u32,
    pub total_frames: u32,
    pub frames_per_second: f32,
}

impl AnimResourceDesc {
    pub fn new(
        name: &str,
        name_id: AnimId,
        skel_id: SkeletonId,
        hierarchy_id: HierarchyId,
        total_frames: u32,
        frames_per_second: f32,
    ) -> Self {
        let mut name_bytes = [0u8; 64];
        let copied = name.len().min(63);
        name_bytes[..copied].copy_from_slice(&name.as_bytes()[..copied]);
        Self {
            name: name_bytes,
            name_id: name_id.raw(),
            skel_id: skel_id.0,
            hierarchy_id: hierarchy_id.0,
            total_frames,
            frames_per_second,
        }
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(64);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

/// One resource inside a parsed package.
#[derive(Clone, Copy, Debug)]
pub struct ResourceItem<'a> {
    pub type_id: u32,
    pub bytes: &'a [u8],
}

fn bad_data(message: &str) -> StreamError {
    StreamError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

/// Parse a package and return its flat resource list.
pub fn prepare_package(bytes: &[u8]) -> Result<Vec<ResourceItem<'_>>> {
    let header_size = size_of::<PackageHeader>();
    if bytes.len() < header_size {
        return Err(bad_data("package shorter than its header"));
    }
    let header: PackageHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);

    let mut items = Vec::with_capacity(header.item_count as usize);
    let mut cursor = header_size;
    for _ in 0..header.item_count {
        let item_header_size = size_of::<ItemHeader>();
        if bytes.len() < cursor + item_header_size {
            return Err(bad_data("package item table truncated"));
        }
        let item: ItemHeader = bytemuck::pod_read_unaligned(&bytes[cursor..cursor + item_header_size]);
        cursor += item_header_size;

        let payload_end = cursor + item.size as usize;
        if bytes.len() < payload_end {
            return Err(bad_data("package item payload truncated"));
        }
        items.push(ResourceItem {
            type_id: item.type_id,
            bytes: &bytes[cursor..payload_end],
        });

        // Payloads are padded so every item header is 16-byte aligned.
        cursor = payload_end.next_multiple_of(16);
    }

    Ok(items)
}

/// Decode an `ANIM` resource payload.
pub fn parse_anim_resource(bytes: &[u8]) -> Result<AnimResourceDesc> {
    let size = size_of::<AnimResourceDesc>();
    if bytes.len() < size {
        return Err(bad_data("ANIM resource payload truncated"));
    }
    Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
}

/// Tool-side encoder: assemble a package from `(type_id, payload)` pairs.
/// The runtime never writes packages; this exists for the build tools and
/// the test fixtures.
pub fn write_package(items: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    let header = PackageHeader {
        item_count: items.len() as u32,
        pad: [0; 3],
    };
    out.extend_from_slice(bytemuck::bytes_of(&header));

    for (type_id, payload) in items {
        let item = ItemHeader {
            type_id: *type_id,
            size: payload.len() as u32,
            pad: [0; 2],
        };
        out.extend_from_slice(bytemuck::bytes_of(&item));
        out.extend_from_slice(payload);
        while out.len() % 16 != 0 {
            out.push(0);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const _: () = assert!(size_of::<ChunkHeader>() == CHUNK_HEADER_SIZE);
    const _: () = assert!(size_of::<PackageHeader>() == 16);
    const _: () = assert!(size_of::<ItemHeader>() == 16);

    fn anim_payload(name: &str, frames: u32) -> Vec<u8> {
        let desc = AnimResourceDesc::new(
            name,
            AnimId::of(name),
            SkeletonId(7),
            HierarchyId(1),
            frames,
            30.0,
        );
        bytemuck::bytes_of(&desc).to_vec()
    }

    #[test]
    fn test_package_roundtrip() {
        let bytes = write_package(&[
            (RES_TYPE_ANIM, anim_payload("clip-a-chunk-1", 30)),
            (u32::from_le_bytes(*b"SKEL"), vec![1, 2, 3]),
        ]);

        let items = prepare_package(&bytes).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].type_id, RES_TYPE_ANIM);

        let desc = parse_anim_resource(items[0].bytes).unwrap();
        assert_eq!(desc.name(), "clip-a-chunk-1");
        assert_eq!(desc.total_frames, 30);
        assert_eq!(desc.name_id, AnimId::of("clip-a-chunk-1").raw());
    }

    #[test]
    fn test_package_parses_at_any_offset() {
        // Shift the package by one byte to force unaligned reads.
        let package = write_package(&[(RES_TYPE_ANIM, anim_payload("x", 12))]);
        let mut shifted = vec![0u8; 1];
        shifted.extend_from_slice(&package);

        let items = prepare_package(&shifted[1..]).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(parse_anim_resource(items[0].bytes).unwrap().total_frames, 12);
    }

    #[test]
    fn test_truncated_package_rejected() {
        let bytes = write_package(&[(RES_TYPE_ANIM, anim_payload("x", 12))]);
        assert!(prepare_package(&bytes[..8]).is_err());
        assert!(prepare_package(&bytes[..bytes.len() - 40]).is_err());
    }

    #[test]
    fn test_long_names_truncate() {
        let long = "n".repeat(100);
        let desc = AnimResourceDesc::new(&long, AnimId::of(&long), SkeletonId(0), HierarchyId(0), 1, 30.0);
        assert_eq!(desc.name().len(), 63);
    }
}
