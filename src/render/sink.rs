//! Print sinks: the single place where dashboard text reaches the terminal.
//!
//! [`ConsoleSink`] writes in the caller's context. [`QueuedSink`] hands
//! every message to one background task through an unbounded FIFO, so the
//! scan loop never waits on the terminal and concurrent producers can never
//! interleave partial lines.

use super::grid::Position;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reset the terminal and drop its scrollback.
pub const CLEAR_SCREEN: &str = "\x1bc\x1b[3J";
/// Erase from the cursor to the end of the line.
pub const CLEAR_LINE: &str = "\x1b[K";

/// Errors returned by print sinks.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("terminal write failed: {0}")]
    Io(#[from] io::Error),
    /// The sink has been closed; nothing more will be written.
    #[error("print sink is closed")]
    Closed,
    /// The background print task ended abnormally.
    #[error("print worker failed: {0}")]
    Worker(String),
}

/// Boxed future returned by [`PrintSink::close`].
pub type CloseFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Prefix `text` with a cursor-addressing sequence when a position is given.
///
/// Positions are 0-based; the escape sequence is 1-based, so `(0, 0)` maps
/// to `ESC[1;1H`.
pub fn format_text(text: &str, position: Option<Position>) -> String {
    match position {
        Some(pos) => format!(
            "\x1b[{};{}H{}",
            u32::from(pos.y) + 1,
            u32::from(pos.x) + 1,
            text
        ),
        None => text.to_string(),
    }
}

/// Destination for dashboard output.
pub trait PrintSink: Send + Sync {
    /// Emit one fully formatted message as a line.
    fn write_raw(&self, message: String) -> Result<(), SinkError>;

    /// Stop accepting output and make sure everything accepted so far has
    /// been written. Safe to call more than once.
    fn close(&self) -> CloseFuture<'_>;

    /// Write `text`, at `position` when one is given.
    fn write(&self, text: &str, position: Option<Position>) -> Result<(), SinkError> {
        self.write_raw(format_text(text, position))
    }

    fn clear_screen(&self) -> Result<(), SinkError> {
        self.write_raw(CLEAR_SCREEN.to_string())
    }

    fn clear_lines(&self, lines: usize) -> Result<(), SinkError> {
        for _ in 0..lines {
            self.write_raw(CLEAR_LINE.to_string())?;
        }
        Ok(())
    }
}

fn write_line(writer: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(writer, "{message}")?;
    writer.flush()
}

/// Synchronous sink writing directly to `W`.
#[derive(Debug)]
pub struct ConsoleSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> PrintSink for ConsoleSink<W> {
    fn write_raw(&self, message: String) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_line(&mut *writer, &message)?;
        Ok(())
    }

    fn close(&self) -> CloseFuture<'_> {
        let result = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .map_err(SinkError::from);
        Box::pin(std::future::ready(result))
    }
}

/// Messages understood by the print worker.
#[derive(Debug)]
enum PrintCommand {
    Text(String),
    /// Sentinel: everything queued before it has been written.
    Shutdown,
}

/// Asynchronous sink backed by an unbounded FIFO and one worker task.
#[derive(Debug)]
pub struct QueuedSink {
    tx: mpsc::UnboundedSender<PrintCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    failed_writes: Arc<AtomicU64>,
}

impl QueuedSink {
    /// Spawn the print worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn spawn<W: Write + Send + 'static>(writer: W) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let failed_writes = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(print_worker(rx, writer, Arc::clone(&failed_writes)));

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            failed_writes,
        }
    }

    pub fn stdout() -> Self {
        Self::spawn(io::stdout())
    }

    /// Number of messages the worker failed to write.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }
}

async fn print_worker<W: Write>(
    mut rx: mpsc::UnboundedReceiver<PrintCommand>,
    mut writer: W,
    failed_writes: Arc<AtomicU64>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            PrintCommand::Text(message) => {
                if let Err(e) = write_line(&mut writer, &message) {
                    failed_writes.fetch_add(1, Ordering::Relaxed);
                    log::warn!("dropping dashboard output: {e}");
                }
            }
            PrintCommand::Shutdown => break,
        }
    }
    log::debug!("print worker stopped");
}

impl PrintSink for QueuedSink {
    fn write_raw(&self, message: String) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        self.tx
            .send(PrintCommand::Text(message))
            .map_err(|_| SinkError::Closed)
    }

    fn close(&self) -> CloseFuture<'_> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let worker = self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(worker) = worker else {
                return Ok(());
            };

            // The worker may already have exited if it panicked; its join
            // result reports that below.
            let _ = self.tx.send(PrintCommand::Shutdown);
            worker
                .await
                .map_err(|e| SinkError::Worker(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SharedBuffer;

    #[test]
    fn test_format_text_positions_are_one_based() {
        assert_eq!(format_text("hi", Some(Position::new(0, 0))), "\x1b[1;1Hhi");
        assert_eq!(format_text("hi", Some(Position::new(30, 4))), "\x1b[5;31Hhi");
        assert_eq!(format_text("hi", None), "hi");
    }

    #[test]
    fn test_console_sink_writes_immediately() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::new(buffer.clone());

        sink.write("temp:", Some(Position::new(2, 1))).unwrap();
        assert_eq!(buffer.contents(), "\x1b[2;3Htemp:\n");
    }

    #[test]
    fn test_console_sink_clear_sequences() {
        let sink = ConsoleSink::new(Vec::new());
        sink.clear_screen().unwrap();
        sink.clear_lines(2).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "\x1bc\x1b[3J\n\x1b[K\n\x1b[K\n");
    }

    #[test]
    fn test_console_sink_close_is_idempotent() {
        let sink = ConsoleSink::new(Vec::new());
        tokio_test::assert_ok!(tokio_test::block_on(sink.close()));
        tokio_test::assert_ok!(tokio_test::block_on(sink.close()));
    }

    #[tokio::test]
    async fn test_queued_sink_preserves_fifo_order() {
        let buffer = SharedBuffer::default();
        let sink = Arc::new(QueuedSink::spawn(buffer.clone()));
        let other = Arc::clone(&sink);

        sink.write("a", None).unwrap();
        other.write("b", None).unwrap();
        sink.write("c", None).unwrap();
        sink.close().await.unwrap();

        assert_eq!(buffer.lines(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_queued_sink_preserves_order_across_tasks() {
        let buffer = SharedBuffer::default();
        let sink = Arc::new(QueuedSink::spawn(buffer.clone()));

        // Each producer enqueues its whole batch before yielding, so the
        // producers' batches arrive one after the other.
        let mut producers = Vec::new();
        for p in 0..4 {
            let sink = Arc::clone(&sink);
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    sink.write(&format!("{p}-{i}"), None).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        sink.close().await.unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 100);
        for p in 0..4 {
            let own: Vec<&String> = lines.iter().filter(|l| l.starts_with(&format!("{p}-"))).collect();
            let expected: Vec<String> = (0..25).map(|i| format!("{p}-{i}")).collect();
            assert_eq!(own.into_iter().cloned().collect::<Vec<_>>(), expected);
        }
    }

    #[tokio::test]
    async fn test_queued_sink_close_flushes_everything() {
        let buffer = SharedBuffer::default();
        let sink = QueuedSink::spawn(buffer.clone());

        for i in 0..500 {
            sink.write(&format!("line {i}"), Some(Position::new(0, 0))).unwrap();
        }
        sink.close().await.unwrap();

        assert_eq!(buffer.lines().len(), 500);
        assert_eq!(sink.failed_writes(), 0);
    }

    #[tokio::test]
    async fn test_queued_sink_rejects_writes_after_close() {
        let sink = QueuedSink::spawn(Vec::new());
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.write("late", None), Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_queued_sink_clear_lines_are_queued_in_order() {
        let buffer = SharedBuffer::default();
        let sink = QueuedSink::spawn(buffer.clone());
        sink.clear_screen().unwrap();
        sink.clear_lines(3).unwrap();
        sink.write("x", None).unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            buffer.lines(),
            vec![CLEAR_SCREEN, CLEAR_LINE, CLEAR_LINE, CLEAR_LINE, "x"]
        );
    }
}
