//! Asynchronous positioned file i/o with completion polling
//!
//! Real i/o happens on the runtime's worker threads; callers on the game
//! thread hold [`IoOperation`] handles and poll them non-blocking once per
//! frame. Nothing here blocks the game thread except [`IoOperation::wait`],
//! which is reserved for teardown and error recovery.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::oneshot;

/// Scheduling hint for issued operations.
///
/// Streaming reads run below blocking loads so a late cinematic chunk never
/// starves a level load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoPriority {
    Now,
    AnimStream,
}

/// An open stream file.
///
/// Cloning is cheap; the underlying descriptor closes when the last clone
/// is dropped (the close paths below move the handle onto a worker so the
/// drop never stalls the game thread).
#[derive(Clone, Debug)]
pub struct FileHandle {
    file: Arc<File>,
    path: PathBuf,
}

impl FileHandle {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Completion of a positioned read: the destination buffer travels through
/// the operation and always comes back, even on failure.
#[derive(Debug)]
pub struct ReadDone {
    pub buffer: Vec<u8>,
    pub result: io::Result<usize>,
}

/// A pending asynchronous operation, polled from the game thread.
#[derive(Debug)]
pub struct IoOperation<T> {
    rx: Option<oneshot::Receiver<T>>,
}

impl<T> IoOperation<T> {
    /// Non-blocking poll. Returns the result exactly once; `None` while the
    /// operation is still in flight.
    pub fn poll(&mut self) -> Option<T> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(value) => {
                self.rx = None;
                Some(value)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                panic!("i/o worker dropped an operation without completing it");
            }
        }
    }

    /// Block until the operation finishes, polling at 1 ms intervals. Only
    /// legal on teardown and error paths.
    pub fn wait(&mut self) -> Option<T> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(value) => {
                    self.rx = None;
                    return Some(value);
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }
}

/// Owner of the i/o worker runtime.
pub struct FileSystem {
    runtime: Runtime,
}

impl FileSystem {
    pub fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        Self { runtime }
    }

    /// Begin opening a file. The handle is delivered through the operation.
    pub fn open_async(&self, path: PathBuf, priority: IoPriority) -> IoOperation<io::Result<FileHandle>> {
        log::trace!("Open Started : {} ({:?})", path.display(), priority);
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            let result = File::open(&path).map(|file| FileHandle {
                file: Arc::new(file),
                path,
            });
            let _ = tx.send(result);
        });
        IoOperation { rx: Some(rx) }
    }

    /// Begin a positioned read of `size` bytes at `offset` into `buffer`.
    ///
    /// `buffer` must be at least `size` bytes long; it is moved into the
    /// operation and handed back on completion together with the byte count
    /// actually read.
    pub fn pread_async(
        &self,
        handle: &FileHandle,
        mut buffer: Vec<u8>,
        offset: u64,
        size: usize,
        priority: IoPriority,
    ) -> IoOperation<ReadDone> {
        debug_assert!(buffer.len() >= size);
        log::trace!(
            "Issued Read : {} bytes @ offset {} of {} ({:?})",
            size,
            offset,
            handle.path.display(),
            priority
        );
        let file = Arc::clone(&handle.file);
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            let result = read_at_exact(&file, &mut buffer[..size], offset);
            let _ = tx.send(ReadDone { buffer, result });
        });
        IoOperation { rx: Some(rx) }
    }

    /// Close a file off-thread. Completion only signals that the descriptor
    /// has been released.
    pub fn close_async(&self, handle: FileHandle) -> IoOperation<io::Result<()>> {
        log::trace!("Close Started : {}", handle.path.display());
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            drop(handle);
            let _ = tx.send(Ok(()));
        });
        IoOperation { rx: Some(rx) }
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Read up to `buf.len()` bytes starting at `offset`, retrying on
/// interruption. A short count means end-of-file.
fn read_at_exact(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match pread(file, &mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
