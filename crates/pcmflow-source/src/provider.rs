//! The byte-source contract consumed by every decoder.

use std::sync::Arc;

/// Reported by [`DataProvider::size`] when the total length is not knowable
/// (e.g. the in-memory FIFO).
pub const UNKNOWN_SIZE: i64 = -1;

/// Seek origin, mirroring `SEEK_SET`/`SEEK_CUR`/`SEEK_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// One-shot completion callback for asynchronous `load` operations.
pub type LoadCallback = Box<dyn FnOnce(bool) + Send>;

/// Error callback carrying `(domain, code)`.
///
/// Domains are strings of the form `com.nativeformat.<subsystem>.<kind>`;
/// codes are small subsystem-local integers. Errors are always paired with a
/// `LoadCallback(false)` invocation.
pub type ErrorCallback = Arc<dyn Fn(&str, i32) + Send + Sync>;

/// A random-access, read-only byte stream with a monotonic logical position.
///
/// Contract:
/// - `load` must complete (invoke its callback) before the first `read`.
/// - After a successful `seek`, `tell` reflects the new position; `read`
///   advances `tell` by the returned byte count.
/// - `read(buf, size, count)` fills up to `size * count` bytes and returns
///   the number of bytes read. Implementations serialize concurrent access
///   internally; callers must still treat random access as sequential.
pub trait DataProvider: Send + Sync {
    /// Asynchronously prepare the provider. Reports success through
    /// `on_done`; failures additionally fire `on_error` first.
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback);

    /// Read up to `size * count` bytes into `buf`, returning bytes read.
    fn read(&self, buf: &mut [u8], size: usize, count: usize) -> usize;

    /// Reposition the stream. Returns 0 on success, a negative value on
    /// failure (including seeking past the end of a sized stream).
    fn seek(&self, offset: i64, whence: Whence) -> i32;

    /// Current logical position.
    fn tell(&self) -> i64;

    /// Whether the stream is exhausted.
    fn eof(&self) -> bool;

    /// Total size in bytes, or [`UNKNOWN_SIZE`].
    fn size(&self) -> i64;

    /// The resource identifier this provider was opened with.
    fn path(&self) -> String;

    /// Provider kind tag (also the error domain for this provider).
    fn name(&self) -> &'static str;
}

/// Resolve a `Whence`-relative offset against a current position and total
/// size. Returns `None` when the target is negative or past `size`.
pub(crate) fn resolve_offset(
    offset: i64,
    whence: Whence,
    position: i64,
    size: i64,
) -> Option<i64> {
    let target = match whence {
        Whence::Set => offset,
        Whence::Cur => position + offset,
        Whence::End => size + offset,
    };
    if target < 0 || target > size {
        return None;
    }
    Some(target)
}
