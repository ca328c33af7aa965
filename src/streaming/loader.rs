//! Stream loaders and the loader pool
//!
//! A loader is a disposable holder for one stream file: the handle plus at
//! most one open, one read and one close operation. Streams borrow loaders
//! from the fixed-size pool while they are actively pulling blocks and give
//! them back as soon as the tail chunk is resident; the pool lazily closes
//! whatever was left open.

use std::time::Instant;

use crate::core::config::StreamingSettings;
use crate::core::error::{Result, StreamError};
use crate::io::file_system::{FileHandle, FileSystem, IoOperation, IoPriority, ReadDone};
use crate::streaming::prefetch::PrefetchTable;

/// Upper bound on concurrently streaming files.
pub const MAX_ANIM_STREAM_LOADERS: usize = 10;

/// One borrowed slot in the loader pool.
pub struct AnimStreamLoader {
    file: Option<FileHandle>,
    open_op: Option<IoOperation<std::io::Result<FileHandle>>>,
    close_op: Option<IoOperation<std::io::Result<()>>>,
    read_op: Option<IoOperation<ReadDone>>,
    issued_read_at: Option<Instant>,
    last_read_size: Option<usize>,
    used: bool,
}

impl AnimStreamLoader {
    fn new() -> Self {
        Self {
            file: None,
            open_op: None,
            close_op: None,
            read_op: None,
            issued_read_at: None,
            last_read_size: None,
            used: false,
        }
    }

    fn reset(&mut self) {
        self.used = false;
        self.issued_read_at = None;
        self.last_read_size = None;
    }

    /// A stream has this loader checked out.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// The file handle or any operation is still live.
    pub fn is_active(&self) -> bool {
        self.file.is_some() || self.open_op.is_some() || self.close_op.is_some() || self.read_op.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some() && self.open_op.is_none() && self.close_op.is_none()
    }

    pub fn is_reading(&self) -> bool {
        self.read_op.is_some()
    }

    pub fn file_name(&self) -> Option<&std::path::Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Drive the asynchronous open. Starts the open on the first call and
    /// polls it on subsequent ones; returns an error only when the open has
    /// finished and failed, at which point internal state is cleared and the
    /// loader should be released.
    pub fn request_open(
        &mut self,
        fs: &FileSystem,
        settings: &StreamingSettings,
        stream_name: &str,
    ) -> Result<()> {
        debug_assert!(self.close_op.is_none());
        debug_assert!(self.read_op.is_none());

        if let Some(op) = &mut self.open_op {
            match op.poll() {
                Some(Ok(handle)) => {
                    log::trace!("Open Completed : {}", handle.path().display());
                    self.open_op = None;
                    self.file = Some(handle);
                }
                Some(Err(source)) => {
                    log::error!("Anim stream error: {source} ({stream_name})");
                    self.open_op = None;
                    return Err(StreamError::OpenFailed {
                        stream: stream_name.to_owned(),
                        source,
                    });
                }
                None => {
                    log::trace!("Waiting to open {stream_name}");
                }
            }
        }

        if self.open_op.is_none() && self.file.is_none() {
            let path = settings.stream_file_path(stream_name);
            self.open_op = Some(fs.open_async(path, IoPriority::AnimStream));
        }

        Ok(())
    }

    /// Issue one positioned read of `size` bytes at `offset` into `buffer`.
    ///
    /// The buffer travels through the operation and is recovered by
    /// [`wait_for_read`](Self::wait_for_read). Reads at offset 0 also probe
    /// the first few cache chunks of the file; later reads probe one chunk
    /// past the current look-ahead window.
    pub fn read(
        &mut self,
        fs: &FileSystem,
        prefetch: &mut PrefetchTable,
        buffer: Vec<u8>,
        offset: u64,
        size: usize,
        stream_name: &str,
    ) {
        debug_assert!(self.used);
        debug_assert!(!self.is_reading());
        let file = self.file.as_ref().expect("read requires an open stream file");

        self.read_op = Some(fs.pread_async(file, buffer, offset, size, IoPriority::AnimStream));
        self.issued_read_at = Some(Instant::now());
        self.last_read_size = Some(size);
        log::trace!("[{stream_name}] read {size} bytes @ {offset}");

        if offset == 0 {
            prefetch.issue_initial_probes(fs, file);
        } else {
            prefetch.issue_look_ahead(fs, file, offset);
        }
    }

    /// Non-blocking poll of the in-flight read.
    ///
    /// `None` while still reading. On completion returns the buffer together
    /// with the outcome: an i/o failure, a truncated-read mismatch against
    /// the requested size, or success.
    pub fn wait_for_read(&mut self) -> Option<(Vec<u8>, Result<()>)> {
        let op = self.read_op.as_mut()?;
        let done = op.poll()?;
        self.read_op = None;

        let expected = self.last_read_size.take().unwrap_or(0);
        if let Some(issued) = self.issued_read_at.take() {
            log::trace!(
                "Finished Read : asked {} bytes -> got {:?} in {:.2} ms",
                expected,
                done.result,
                issued.elapsed().as_secs_f64() * 1000.0
            );
        }

        let outcome = match done.result {
            Err(e) => Err(StreamError::Io(e)),
            Ok(actual) if actual != expected => Err(StreamError::TruncatedRead { expected, actual }),
            Ok(_) => Ok(()),
        };
        Some((done.buffer, outcome))
    }

    fn release_completed_ops(&mut self) {
        if let Some(op) = &mut self.open_op {
            if let Some(result) = op.poll() {
                self.open_op = None;
                // Keep a successfully opened handle so the close below can
                // release it.
                if let Ok(handle) = result {
                    self.file = Some(handle);
                }
            }
        }

        if let Some(op) = &mut self.read_op
            && op.poll().is_some()
        {
            self.read_op = None;
            self.last_read_size = None;
        }

        if let Some(op) = &mut self.close_op
            && op.poll().is_some()
        {
            self.close_op = None;
        }
    }

    /// Release whatever has completed and, once nothing is outstanding,
    /// start closing the file. Safe to call every frame; idempotent on an
    /// idle loader.
    pub fn graceful_shutdown(&mut self, fs: &FileSystem) {
        self.release_completed_ops();

        if self.open_op.is_none() && self.read_op.is_none() && self.close_op.is_none() {
            if let Some(file) = self.file.take() {
                self.close_op = Some(fs.close_async(file));
            }
        }
    }

    /// Wait out every outstanding operation, then close synchronously. The
    /// only blocking path; reserved for teardown and error recovery.
    pub fn forceful_shutdown(&mut self, _fs: &FileSystem) {
        if let Some(mut op) = self.open_op.take()
            && let Some(Ok(handle)) = op.wait()
        {
            self.file = Some(handle);
        }
        if let Some(mut op) = self.read_op.take() {
            op.wait();
        }
        if let Some(mut op) = self.close_op.take() {
            op.wait();
        }

        // Close sync.
        self.file = None;
        self.last_read_size = None;
        self.issued_read_at = None;
    }
}

/// Fixed pool of stream loaders. Streams check loaders out while streaming
/// and the pool gracefully closes whatever is returned still open.
pub struct StreamLoaderPool {
    loaders: Vec<AnimStreamLoader>,
}

impl StreamLoaderPool {
    pub fn new() -> Self {
        Self {
            loaders: (0..MAX_ANIM_STREAM_LOADERS).map(|_| AnimStreamLoader::new()).collect(),
        }
    }

    /// Check out the first loader that is neither in use nor winding down.
    /// `None` when every slot is taken.
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self
            .loaders
            .iter()
            .position(|l| !l.is_used() && !l.is_active())?;
        self.loaders[index].reset();
        self.loaders[index].used = true;
        Some(index)
    }

    /// Return a loader. It stays active until its close completes.
    pub fn release(&mut self, index: usize) {
        log::trace!("FreeStreamLoader [{index}]");
        self.loaders[index].used = false;
    }

    /// Shut a loader down hard and return it.
    pub fn force_release(&mut self, fs: &FileSystem, index: usize) {
        log::trace!("ForceCloseStreamLoader [{index}]");
        self.loaders[index].forceful_shutdown(fs);
        self.loaders[index].used = false;
    }

    /// Wind down released loaders. Called once per frame.
    pub fn update(&mut self, fs: &FileSystem) {
        for loader in &mut self.loaders {
            if !loader.is_used() && loader.is_active() {
                loader.graceful_shutdown(fs);
            }
        }
    }

    pub fn loader(&self, index: usize) -> &AnimStreamLoader {
        &self.loaders[index]
    }

    pub fn loader_mut(&mut self, index: usize) -> &mut AnimStreamLoader {
        &mut self.loaders[index]
    }

    /// Any loader mid-read, across all streams.
    pub fn any_reading(&self) -> bool {
        self.loaders.iter().any(|l| l.is_reading())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimStreamLoader> {
        self.loaders.iter()
    }
}

impl Default for StreamLoaderPool {
    fn default() -> Self {
        Self::new()
    }
}
