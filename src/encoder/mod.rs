//! External encoder subprocesses that write segment files.

mod ffmpeg;

#[cfg(test)]
mod tests;

pub use ffmpeg::{FfmpegEncoder, FfmpegLauncher};

use crate::error::EncoderError;
use crate::frame::FrameGeometry;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// What a recorder asks the launcher for
#[derive(Debug, Clone)]
pub struct EncoderRequest {
    /// Source the encoder reads directly
    pub source_url: String,
    /// Container file to write
    pub output: PathBuf,
    /// Where encoder diagnostics go; `None` discards them
    pub log_path: Option<PathBuf>,
    /// Probed (or fallback) geometry of the source
    pub geometry: FrameGeometry,
}

/// How a `finish` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited
    AlreadyExited,
    /// It exited after the quit token within the timeout
    Graceful,
    /// It ignored the quit token and was killed
    Killed,
}

type ControlInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Asks an encoder to end its stream from outside the loop that owns it.
///
/// Holds the encoder's control input. The first `send` takes it, writes the
/// quit token and closes it; later sends do nothing. Clones share the input.
#[derive(Clone, Default)]
pub struct QuitSignal {
    input: Arc<parking_lot::Mutex<Option<ControlInput>>>,
    sent: Arc<AtomicBool>,
}

impl QuitSignal {
    pub fn new<W>(input: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            input: Arc::new(parking_lot::Mutex::new(Some(Box::new(input)))),
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write `q` and close the input, giving up after `timeout`. Returns
    /// whether this call delivered the token.
    pub async fn send(&self, timeout: Duration) -> bool {
        let Some(mut input) = self.input.lock().take() else {
            return false;
        };
        self.sent.store(true, Ordering::SeqCst);

        let quit = async {
            input.write_all(b"q").await?;
            input.flush().await
        };
        matches!(tokio::time::timeout(timeout, quit).await, Ok(Ok(())))
    }

    /// Whether the quit token has been sent by anyone
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for QuitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuitSignal")
            .field("sent", &self.is_sent())
            .finish()
    }
}

/// One running encoder. Owned exclusively by the recorder loop that
/// launched it.
#[async_trait]
pub trait EncoderProcess: Send {
    /// Resolve when the process exits by itself, with its exit code.
    /// Cancel safe.
    async fn wait_exit(&mut self) -> Result<Option<i32>, EncoderError>;

    /// Ask the encoder to end its stream, wait up to `timeout`, and kill it
    /// only if it is still running afterwards
    async fn finish(&mut self, timeout: Duration) -> Result<StopOutcome, EncoderError>;

    /// Handle for asking this encoder to quit without owning it. Encoders
    /// with no control input hand out a signal that never sends.
    fn quit_signal(&self) -> QuitSignal {
        QuitSignal::default()
    }
}

#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self, request: &EncoderRequest)
        -> Result<Box<dyn EncoderProcess>, EncoderError>;
}
