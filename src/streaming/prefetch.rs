//! Read-ahead probes
//!
//! One-byte reads issued ahead of the real stream reads, purely to warm the
//! OS/device cache before the blocks are actually wanted. Probe completion
//! is polled and discarded once per frame; a probe that fails or is dropped
//! never affects correctness.

use crate::io::file_system::{FileHandle, FileSystem, IoOperation, IoPriority, ReadDone};

/// Granularity the underlying cache works in.
pub const PREFETCH_CHUNK_SIZE: u64 = 512 * 1024;

/// How many cache-sized chunks to probe ahead of the current read.
pub const PREFETCH_LOOK_AHEAD: u64 = 8;

/// Upper bound on probes in flight across all streams.
pub const MAX_PREFETCH_OPS: usize = 32;

/// Align up to the cache granularity.
pub fn align_up_512k(offset: u64) -> u64 {
    offset.next_multiple_of(PREFETCH_CHUNK_SIZE)
}

/// Fixed-size table of in-flight probe reads, shared by every loader.
pub struct PrefetchTable {
    ops: Vec<Option<IoOperation<ReadDone>>>,
}

impl PrefetchTable {
    pub fn new() -> Self {
        Self {
            ops: (0..MAX_PREFETCH_OPS).map(|_| None).collect(),
        }
    }

    /// Probe the first few cache chunks of a freshly opened stream file.
    pub fn issue_initial_probes(&mut self, fs: &FileSystem, handle: &FileHandle) {
        for chunk in 1..PREFETCH_LOOK_AHEAD {
            self.issue(fs, handle, align_up_512k(chunk * PREFETCH_CHUNK_SIZE));
        }
    }

    /// Probe one cache chunk ahead of a mid-file read at `offset`.
    pub fn issue_look_ahead(&mut self, fs: &FileSystem, handle: &FileHandle, offset: u64) {
        self.issue(
            fs,
            handle,
            align_up_512k(offset + PREFETCH_LOOK_AHEAD * PREFETCH_CHUNK_SIZE),
        );
    }

    /// Issue a single probe; silently dropped when the table is full.
    pub fn issue(&mut self, fs: &FileSystem, handle: &FileHandle, offset: u64) {
        let Some(slot) = self.ops.iter().position(Option::is_none) else {
            return;
        };
        log::trace!("Preload Read : offset {}, opIndex {}", offset, slot);
        self.ops[slot] = Some(fs.pread_async(handle, vec![0u8; 1], offset, 1, IoPriority::AnimStream));
    }

    /// Release every completed probe. Results are irrelevant.
    pub fn poll_completed(&mut self) {
        for op in &mut self.ops {
            if let Some(pending) = op
                && pending.poll().is_some()
            {
                *op = None;
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.ops.iter().filter(|op| op.is_some()).count()
    }
}

impl Default for PrefetchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_align_up_512k() {
        const K512: u64 = 512 * 1024;
        assert_eq!(align_up_512k(0), 0);
        assert_eq!(align_up_512k(1), K512);
        assert_eq!(align_up_512k(K512), K512);
        assert_eq!(align_up_512k(K512 + 1), 2 * K512);
    }

    #[test]
    fn test_probe_lifecycle_and_saturation() {
        let fs = FileSystem::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let mut open = fs.open_async(file.path().to_path_buf(), IoPriority::AnimStream);
        let handle = open.wait().unwrap().unwrap();

        let mut table = PrefetchTable::new();
        for i in 0..MAX_PREFETCH_OPS + 5 {
            table.issue(&fs, &handle, i as u64);
        }
        // Extra probes past the table size were dropped, not queued.
        assert_eq!(table.outstanding(), MAX_PREFETCH_OPS);

        // All probes eventually drain.
        for _ in 0..1000 {
            table.poll_completed();
            if table.outstanding() == 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(table.outstanding(), 0);
    }
}
