//! Change detection by polling file metadata.
//!
//! The watcher does not use OS change notification. A background task stats
//! the file every few milliseconds and signals the consumer whenever size or
//! modification time differ from the last snapshot a signal was delivered for.

use crate::error::{Error, Result};
use crate::fs::{FileMetadata, FileSystem, OsFs};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
pub use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How long the watcher sleeps between polls when nothing changed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a signal may wait for the consumer before the watcher re-polls.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Timing settings for [`PollingWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl WatcherConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }
}

/// Signal that the watched file changed. Carries no details; re-read the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateSignal;

/// Something that watches a single file for changes.
pub trait FileWatcher {
    /// Starts watching.
    ///
    /// The returned [`Updates`] yields a signal per change and ends when
    /// watching stops, either because of an error (see [`error`](Self::error))
    /// or because the [`CancelHandle`] was used or dropped.
    fn start(&self) -> Result<(Updates, CancelHandle)>;

    /// The error that ended the watch session, if any.
    fn error(&self) -> Option<Arc<Error>>;
}

/// A [`FileWatcher`] that polls file metadata.
///
/// Each instance supports a single watch session. Once its updates channel
/// has closed, create a new watcher to watch again.
#[derive(Debug)]
pub struct PollingWatcher<F: FileSystem = OsFs> {
    path: PathBuf,
    fs: Arc<F>,
    config: WatcherConfig,
    started: AtomicBool,
    error: Arc<OnceLock<Arc<Error>>>,
}

impl PollingWatcher<OsFs> {
    /// Creates a watcher for a file on the local filesystem.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_fs(path, OsFs)
    }
}

impl<F: FileSystem> PollingWatcher<F> {
    pub fn with_fs<P: AsRef<Path>>(path: P, fs: F) -> Self {
        Self::with_shared_fs(path, Arc::new(fs))
    }

    pub fn with_shared_fs<P: AsRef<Path>>(path: P, fs: Arc<F>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fs,
            config: WatcherConfig::default(),
            started: AtomicBool::new(false),
            error: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }
}

impl<F: FileSystem> FileWatcher for PollingWatcher<F> {
    /// Spawns the polling task.
    ///
    /// Signals go through a single-slot queue. A signal counts as delivered
    /// once it is in the slot, so at most one signal waits for the consumer
    /// while the task keeps polling. Further changes wait in a pending send
    /// that gives up after `refresh_interval` and is retried with fresh
    /// metadata, which folds them into one later signal. A signal already in
    /// the slot when the session is cancelled is still received before the
    /// channel reports its end. It stands for a change that really happened.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    fn start(&self) -> Result<(Updates, CancelHandle)> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let task = PollTask {
            path: self.path.clone(),
            fs: Arc::clone(&self.fs),
            config: self.config,
            error: Arc::clone(&self.error),
            updates: tx,
            cancel: token.clone(),
        };
        tokio::spawn(task.run());

        Ok((Updates { receiver: rx }, CancelHandle { token }))
    }

    fn error(&self) -> Option<Arc<Error>> {
        self.error.get().cloned()
    }
}

/// Receiving end of a watch session.
#[derive(Debug)]
pub struct Updates {
    receiver: mpsc::Receiver<UpdateSignal>,
}

impl Updates {
    /// Waits for the next change. `None` means the watch session is over.
    pub async fn recv(&mut self) -> Option<UpdateSignal> {
        self.receiver.recv().await
    }

    /// Returns a pending signal without waiting.
    ///
    /// Fails with [`TryRecvError::Empty`] when nothing changed yet and with
    /// [`TryRecvError::Disconnected`] once the watch session is over.
    pub fn try_recv(&mut self) -> std::result::Result<UpdateSignal, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Stream for Updates {
    type Item = UpdateSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Stops a watch session. Dropping the handle stops it as well.
#[derive(Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Requests the watcher to stop. Calling it again has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct PollTask<F> {
    path: PathBuf,
    fs: Arc<F>,
    config: WatcherConfig,
    error: Arc<OnceLock<Arc<Error>>>,
    updates: mpsc::Sender<UpdateSignal>,
    cancel: CancellationToken,
}

impl<F: FileSystem> PollTask<F> {
    /// Polls until cancelled, the receiver goes away, or metadata can't be read.
    ///
    /// The sender is dropped when this returns, which closes the channel. Any
    /// terminal error is stored before that happens.
    async fn run(self) {
        let PollTask {
            path,
            fs,
            config,
            error,
            updates,
            cancel,
        } = self;

        debug!(path = %path.display(), "Polling watcher started");

        // Last snapshot the consumer received a signal for.
        let mut acknowledged: Option<FileMetadata> = None;

        loop {
            let query = {
                let fs = Arc::clone(&fs);
                let path = path.clone();
                tokio::task::spawn_blocking(move || fs.metadata(&path))
            };

            let queried = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                queried = query => queried,
            };

            let current = match queried {
                Ok(Ok(metadata)) => metadata,
                Ok(Err(source)) => {
                    warn!(path = %path.display(), error = %source, "Metadata query failed, stopping watcher");
                    let _ = error.set(Arc::new(Error::Metadata {
                        path: path.clone(),
                        source,
                    }));
                    return;
                }
                Err(join_error) => {
                    warn!(path = %path.display(), error = %join_error, "Metadata query did not complete, stopping watcher");
                    let _ = error.set(Arc::new(Error::TaskJoin(join_error)));
                    return;
                }
            };

            if acknowledged != Some(current) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = updates.send(UpdateSignal) => {
                        if sent.is_err() {
                            debug!(path = %path.display(), "Update receiver dropped");
                            break;
                        }
                        trace!(path = %path.display(), len = current.len, "Change signalled");
                        acknowledged = Some(current);
                    }
                    _ = tokio::time::sleep(config.refresh_interval) => {
                        // Keep the old snapshot so the next poll retries with fresh metadata.
                        trace!(path = %path.display(), "Consumer is slow, re-polling");
                        continue;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = updates.closed() => {
                    debug!(path = %path.display(), "Update receiver dropped");
                    break;
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        debug!(path = %path.display(), "Polling watcher stopped");
    }
}
