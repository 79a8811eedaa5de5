//! Promise / Future Pairs
//!
//! The render thread communicates results through one-shot
//! promise/handle pairs. A [`Promise`] is resolved exactly once on the
//! producing thread; the consumer blocks on [`AsyncHandle::wait`] or
//! awaits [`AsyncHandle::resolved`]. Dropping the handle cancels nothing:
//! the producing side completes its work regardless so resources can be
//! reclaimed safely.

use crate::errors::{MixerError, Result};

/// Producing half of a one-shot value.
pub struct Promise<T>(flume::Sender<T>);

/// Consuming half of a one-shot value.
#[derive(Debug)]
pub struct AsyncHandle<T>(flume::Receiver<T>);

/// Create a connected promise/handle pair.
#[must_use]
pub fn promise<T>() -> (Promise<T>, AsyncHandle<T>) {
    let (tx, rx) = flume::bounded(1);
    (Promise(tx), AsyncHandle(rx))
}

impl<T> Promise<T> {
    /// Resolve the pair. A dropped consumer is not an error.
    pub fn resolve(self, value: T) {
        let _ = self.0.send(value);
    }
}

impl<T> AsyncHandle<T> {
    /// Block until the value arrives. `None` when the promise was
    /// dropped unresolved.
    #[must_use]
    pub fn wait(self) -> Option<T> {
        self.0.recv().ok()
    }

    /// Non-blocking probe.
    #[must_use]
    pub fn try_take(&self) -> Option<T> {
        self.0.try_recv().ok()
    }

    /// Await the value without blocking a thread.
    pub async fn resolved(self) -> Option<T> {
        self.0.into_recv_async().await.ok()
    }
}

/// Future resolving to one composited output raster.
///
/// The payload is a contiguous premultiplied BGRA byte array of
/// `width · height · 4` bytes at 8-bit depth, or `· 8` at higher depths;
/// row stride equals width × bytes-per-pixel.
#[derive(Debug)]
pub struct FrameFuture(AsyncHandle<Result<Vec<u8>>>);

/// Resolving half of a [`FrameFuture`].
pub type FramePromise = Promise<Result<Vec<u8>>>;

impl FrameFuture {
    #[must_use]
    pub(crate) fn pair() -> (FramePromise, Self) {
        let (promise, handle) = promise();
        (promise, Self(handle))
    }

    /// An already-resolved future.
    #[must_use]
    pub(crate) fn ready(value: Result<Vec<u8>>) -> Self {
        let (promise, future) = Self::pair();
        promise.resolve(value);
        future
    }

    /// Block until the frame is composited.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.0
            .wait()
            .unwrap_or_else(|| Err(MixerError::OperationFailed("render task was dropped".into())))
    }

    /// Await the frame without blocking a thread.
    pub async fn resolved(self) -> Result<Vec<u8>> {
        self.0
            .resolved()
            .await
            .unwrap_or_else(|| Err(MixerError::OperationFailed("render task was dropped".into())))
    }
}
