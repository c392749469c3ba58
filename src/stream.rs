//! Stream of lines from a file that keeps being appended to.

use crate::error::{Error, Result};
use crate::fs::{FileSystem, OsFs};
use crate::reader::{Line, LineReader};
use crate::watcher::{CancelHandle, FileWatcher, PollingWatcher, Updates, WatcherConfig};
use futures::Stream;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where to start reading and how to watch for changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowOptions {
    /// Byte offset to start at, usually a [`Line::next_position`] saved earlier.
    pub start_position: u64,
    pub watcher: WatcherConfig,
}

impl FollowOptions {
    pub fn with_start_position(mut self, start_position: u64) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_watcher_config(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }
}

/// A stream of complete lines from a followed file.
///
/// Every change reported by the watcher triggers a pass that reads all lines
/// completed so far. The stream ends after yielding an error, either from
/// reading the file or from the watcher (for example when the file is
/// removed).
pub struct LineStream {
    receiver: mpsc::UnboundedReceiver<Result<Line>>,
    shutdown: CancellationToken,
    _task_handle: JoinHandle<()>,
}

impl LineStream {
    /// Follows a file on the local filesystem.
    pub async fn new<P: AsRef<Path>>(path: P, options: FollowOptions) -> Result<Self> {
        Self::with_fs(path, OsFs, options).await
    }

    /// Follows a file through the given filesystem.
    pub async fn with_fs<P: AsRef<Path>, F: FileSystem>(
        path: P,
        fs: F,
        options: FollowOptions,
    ) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        let fs = Arc::new(fs);

        let open_fs = Arc::clone(&fs);
        let open_path = file_path.clone();
        let reader = tokio::task::spawn_blocking(move || -> Result<LineReader<_>> {
            let file = open_fs.open(&open_path)?;
            LineReader::at_position(file, options.start_position)
        })
        .await??;

        let watcher =
            PollingWatcher::with_shared_fs(&file_path, fs).with_config(options.watcher);
        let (updates, cancel) = watcher.start()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        debug!(
            path = %file_path.display(),
            start_position = options.start_position,
            "Following file"
        );

        let task = FollowTask {
            file_path,
            watcher,
            updates,
            cancel,
            tx,
            shutdown: shutdown.clone(),
        };
        let task_handle = tokio::spawn(task.run(reader));

        Ok(LineStream {
            receiver: rx,
            shutdown,
            _task_handle: task_handle,
        })
    }

    /// Check if the stream has been closed/dropped
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Stream for LineStream {
    type Item = Result<Line>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

struct FollowTask<F: FileSystem> {
    file_path: PathBuf,
    watcher: PollingWatcher<F>,
    updates: Updates,
    cancel: CancelHandle,
    tx: mpsc::UnboundedSender<Result<Line>>,
    shutdown: CancellationToken,
}

impl<F: FileSystem> FollowTask<F> {
    /// Alternates between waiting for a change and reading every complete line.
    async fn run<R: BufRead + Send + 'static>(mut self, mut reader: LineReader<R>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                update = self.updates.recv() => {
                    if update.is_none() {
                        // Lines written right before the watcher stopped may not have been
                        // signalled yet; an open handle can still read them.
                        match drain_lines(reader).await {
                            Ok((_, lines)) => {
                                if !self.forward(lines) {
                                    self.cancel.cancel();
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!(path = %self.file_path.display(), error = %e, "Final read failed");
                            }
                        }

                        if let Some(error) = self.watcher.error() {
                            warn!(path = %self.file_path.display(), %error, "Watcher stopped");
                            let _ = self.tx.send(Err(Error::Watcher(error)));
                        }
                        break;
                    }

                    match drain_lines(reader).await {
                        Ok((drained, lines)) => {
                            reader = drained;
                            if !self.forward(lines) {
                                // Receiver dropped
                                self.cancel.cancel();
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(path = %self.file_path.display(), error = %e, "Reading lines failed");
                            let _ = self.tx.send(Err(e));
                            break;
                        }
                    }
                }
            }
        }

        self.cancel.cancel();
        debug!(path = %self.file_path.display(), "Stopped following file");
    }

    /// Sends lines to the consumer. Returns false once the receiver is gone.
    fn forward(&self, lines: Vec<Line>) -> bool {
        lines.into_iter().all(|line| self.tx.send(Ok(line)).is_ok())
    }
}

/// Reads all currently complete lines on the blocking pool.
async fn drain_lines<R: BufRead + Send + 'static>(
    mut reader: LineReader<R>,
) -> Result<(LineReader<R>, Vec<Line>)> {
    tokio::task::spawn_blocking(move || -> Result<(LineReader<R>, Vec<Line>)> {
        let mut lines = Vec::new();
        while let Some(line) = reader.read_line()? {
            lines.push(line);
        }
        Ok((reader, lines))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use crate::test_helpers::TempLogFile;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    const FILE: &str = "followed.log";

    fn fast_options() -> FollowOptions {
        FollowOptions::default().with_watcher_config(
            WatcherConfig::default()
                .with_poll_interval(Duration::from_millis(5))
                .with_refresh_interval(Duration::from_millis(100)),
        )
    }

    // Helper function to collect stream items with timeout
    async fn collect_lines(
        stream: &mut LineStream,
        max_items: usize,
        timeout: Duration,
    ) -> Vec<(String, u64)> {
        let mut items = Vec::new();
        let start = tokio::time::Instant::now();

        while items.len() < max_items && start.elapsed() < timeout {
            match tokio::time::timeout(Duration::from_millis(50), stream.next()).await {
                Ok(Some(Ok(line))) => {
                    items.push((line.to_string_lossy().into_owned(), line.next_position()))
                }
                Ok(Some(Err(e))) => panic!("Unexpected error: {e}"),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        items
    }

    #[tokio::test]
    async fn test_line_stream_creation() {
        let fs = MemFs::new();
        fs.create(FILE);

        let stream = LineStream::with_fs(FILE, fs, fast_options()).await.unwrap();
        assert!(!stream.is_closed());
    }

    #[tokio::test]
    async fn test_line_stream_pending_without_lines() {
        let fs = MemFs::new();
        fs.create(FILE);

        let mut stream = LineStream::with_fs(FILE, fs, fast_options()).await.unwrap();
        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_line_stream_nonexistent_file() {
        let result = LineStream::with_fs("missing.log", MemFs::new(), fast_options()).await;
        match result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            Err(other) => panic!("Expected Error::Io, got {other:?}"),
            Ok(_) => panic!("Expected opening a missing file to fail"),
        }
    }

    #[tokio::test]
    async fn test_line_stream_reads_existing_then_appended_lines() {
        let fs = MemFs::new();
        fs.append(FILE, "first\nsecond\n");

        let mut stream = LineStream::with_fs(FILE, fs.clone(), fast_options())
            .await
            .unwrap();
        let existing = collect_lines(&mut stream, 2, Duration::from_secs(2)).await;
        assert_eq!(
            existing,
            vec![("first".to_string(), 6), ("second".to_string(), 13)]
        );

        fs.append(FILE, "thi");
        fs.append(FILE, "rd\r\n");
        let appended = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(appended, vec![("third".to_string(), 20)]);
    }

    #[tokio::test]
    async fn test_line_stream_waits_for_terminator() {
        let fs = MemFs::new();
        fs.append(FILE, "partial");

        let mut stream = LineStream::with_fs(FILE, fs.clone(), fast_options())
            .await
            .unwrap();
        let nothing = collect_lines(&mut stream, 1, Duration::from_millis(200)).await;
        assert!(nothing.is_empty());

        fs.append(FILE, " line\n");
        let lines = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(lines, vec![("partial line".to_string(), 13)]);
    }

    #[tokio::test]
    async fn test_line_stream_resumes_from_position() {
        let fs = MemFs::new();
        fs.append(FILE, "line1\nline2\nline3\n");

        let options = fast_options().with_start_position(6);
        let mut stream = LineStream::with_fs(FILE, fs, options).await.unwrap();
        let lines = collect_lines(&mut stream, 2, Duration::from_secs(2)).await;

        assert_eq!(
            lines,
            vec![("line2".to_string(), 12), ("line3".to_string(), 18)]
        );
    }

    #[tokio::test]
    async fn test_line_stream_reports_removed_file() {
        let fs = MemFs::new();
        fs.append(FILE, "only line\n");

        let mut stream = LineStream::with_fs(FILE, fs.clone(), fast_options())
            .await
            .unwrap();
        let lines = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(lines.len(), 1);

        fs.remove(FILE).unwrap();

        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should report the removal");
        match item {
            Some(Err(Error::Watcher(inner))) => {
                assert!(matches!(inner.as_ref(), Error::Metadata { .. }))
            }
            other => panic!("Expected a watcher error, got {other:?}"),
        }

        let end = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should end after the error");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_line_stream_yields_lines_written_before_removal() {
        let temp_file = TempLogFile::with_content("first").unwrap();

        let mut stream = LineStream::new(temp_file.path(), fast_options())
            .await
            .unwrap();
        let first = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(first, vec![("first".to_string(), 6)]);

        temp_file.append_line("last words").unwrap();
        temp_file.remove().unwrap();

        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should yield the last line");
        match item {
            Some(Ok(line)) => {
                assert_eq!(line.content(), b"last words");
                assert_eq!(line.next_position(), 17);
            }
            other => panic!("Expected the last line, got {other:?}"),
        }

        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should report the removal");
        assert!(matches!(item, Some(Err(Error::Watcher(_)))));
    }

    #[tokio::test]
    async fn test_line_stream_graceful_shutdown_on_drop() {
        let fs = MemFs::new();
        fs.append(FILE, "line\n");

        let mut stream = LineStream::with_fs(FILE, fs, fast_options()).await.unwrap();
        let first = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(first.len(), 1);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_line_stream_multiple_streams_independence() {
        let fs = MemFs::new();
        fs.append(FILE, "shared\n");

        let stream1 = LineStream::with_fs(FILE, fs.clone(), fast_options())
            .await
            .unwrap();
        let mut stream2 = LineStream::with_fs(FILE, fs.clone(), fast_options())
            .await
            .unwrap();

        drop(stream1);

        assert!(!stream2.is_closed());
        let lines = collect_lines(&mut stream2, 1, Duration::from_secs(2)).await;
        assert_eq!(lines, vec![("shared".to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_line_stream_on_real_file() {
        let temp_file = TempLogFile::with_content("existing").unwrap();

        let mut stream = LineStream::new(temp_file.path(), fast_options())
            .await
            .unwrap();
        let existing = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(existing, vec![("existing".to_string(), 9)]);

        temp_file.append_line("appended").unwrap();
        let appended = collect_lines(&mut stream, 1, Duration::from_secs(2)).await;
        assert_eq!(appended, vec![("appended".to_string(), 18)]);
    }

    #[tokio::test]
    async fn test_drain_lines_keeps_partial_line() {
        let reader = LineReader::new(std::io::Cursor::new("a\nb\nc"));
        let (reader, lines) = drain_lines(reader).await.unwrap();

        let contents: Vec<&[u8]> = lines.iter().map(Line::content).collect();
        assert_eq!(contents, vec![b"a".as_slice(), b"b".as_slice()]);
        assert_eq!(reader.pending_len(), 1);
        assert_eq!(reader.position(), 5);
    }
}
