//! Follow log files while they are being written, like `tail -f`.
//!
//! Two pieces do the work. [`LineReader`] pulls complete lines out of a byte
//! stream whose last line may still be half written, and remembers the offset
//! each line ends at so reading can be resumed later. [`PollingWatcher`]
//! polls the file's size and modification time and signals a consumer once
//! per change, without relying on OS change notification.
//!
//! [`follow`] combines both into an async stream of lines.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_follower::{FollowOptions, follow};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut lines = follow("app.log", FollowOptions::default()).await?;
//!
//!     while let Some(line) = lines.next().await {
//!         let line = line?;
//!         println!("{:>10}: {}", line.next_position(), line.to_string_lossy());
//!     }
//!
//!     Ok(())
//! }
//! ```

mod error;
pub mod fs;
mod reader;
mod stream;
mod watcher;

#[cfg(test)]
mod test_helpers;

pub use error::{Error, Result};
pub use fs::{FileMetadata, FileSystem, MemFs, OsFs};
pub use reader::{DEFAULT_BUFFER_SIZE, Line, LineReader};
pub use stream::{FollowOptions, LineStream};
pub use watcher::{
    CancelHandle, DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_INTERVAL, FileWatcher, PollingWatcher,
    TryRecvError, UpdateSignal, Updates, WatcherConfig,
};

use std::path::Path;
use tokio_stream::Stream;

/// Creates a stream of the lines of a file, including lines appended later.
///
/// # Arguments
///
/// * `path` - File path to follow
/// * `options` - Start offset and polling intervals
///
/// # Example
///
/// ```rust,no_run
/// use log_follower::{FollowOptions, follow};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = FollowOptions::default().with_start_position(1024);
///     let mut lines = follow("app.log", options).await?;
///
///     while let Some(line) = lines.next().await {
///         println!("{}", line?.to_string_lossy());
///     }
///
///     Ok(())
/// }
/// ```
pub async fn follow<P: AsRef<Path>>(
    path: P,
    options: FollowOptions,
) -> Result<impl Stream<Item = Result<Line>>> {
    LineStream::new(path, options).await
}
