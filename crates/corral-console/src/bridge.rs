//! Bridge between a running child process's stdio and its console cache.
//!
//! Each managed server owns one bridge for its whole lifetime. While a
//! process is attached, exactly one reader task drains stdout and stderr
//! line by line into the [`ConsoleCache`], and exactly one writer task
//! serializes queued commands onto stdin. Having a single task per
//! direction keeps output and input ordered without locking the streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::ConsoleCache;
use crate::sink::BroadcastSink;

/// Prefix marking lines written by the supervisor rather than the process.
pub const MANAGER_PREFIX: &str = "[corral] ";

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The stdio handles of one process, as consumed by [`ConsoleBridge::process_start`].
#[derive(Default)]
pub struct ProcessStreams {
    pub input: Option<BoxWriter>,
    pub output: Option<BoxReader>,
    pub errors: Option<BoxReader>,
}

impl ProcessStreams {
    /// Take the piped stdio handles out of a freshly spawned child.
    pub fn from_child(child: &mut Child) -> Self {
        Self {
            input: child.stdin.take().map(|s| Box::new(s) as BoxWriter),
            output: child.stdout.take().map(|s| Box::new(s) as BoxReader),
            errors: child.stderr.take().map(|s| Box::new(s) as BoxReader),
        }
    }
}

/// Messages consumed by the writer task, in enqueue order.
enum WriterMessage {
    Attach(BoxWriter),
    Detach,
    Line(String),
}

/// Console I/O for one managed server.
pub struct ConsoleBridge {
    server: String,
    cache: Arc<ConsoleCache>,
    writer_tx: mpsc::UnboundedSender<WriterMessage>,
    writer_task: JoinHandle<()>,
    /// The current reader plus any still draining an exited process.
    reader_tasks: Mutex<Vec<JoinHandle<()>>>,
    attached: AtomicBool,
}

impl ConsoleBridge {
    /// Create the bridge and its writer task. Must be called inside a tokio runtime.
    pub fn new(server: &str, cache_size: usize, sink: Arc<dyn BroadcastSink>) -> Self {
        let cache = Arc::new(ConsoleCache::new(server, cache_size, sink));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_console(
            server.to_string(),
            Arc::clone(&cache),
            writer_rx,
        ));

        Self {
            server: server.to_string(),
            cache,
            writer_tx,
            writer_task,
            reader_tasks: Mutex::new(Vec::new()),
            attached: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// The replay cache behind this console.
    pub fn cache(&self) -> &Arc<ConsoleCache> {
        &self.cache
    }

    /// Snapshot of the retained console lines, oldest first.
    pub fn cached_lines(&self) -> Vec<String> {
        self.cache.cached_lines()
    }

    /// Whether a process is currently attached.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Attach a newly started process: hand stdin to the writer task and
    /// start the reader task on stdout/stderr.
    ///
    /// The reader of a previous process is left to run until its pipes hit
    /// EOF, so output buffered before an exit still reaches the cache.
    pub fn process_start(&self, streams: ProcessStreams) {
        let ProcessStreams {
            input,
            output,
            errors,
        } = streams;

        if let Some(input) = input {
            self.send_to_writer(WriterMessage::Attach(input));
        }

        let reader = tokio::spawn(read_console(
            self.server.clone(),
            Arc::clone(&self.cache),
            output,
            errors,
        ));

        let mut readers = self.reader_tasks.lock().unwrap_or_else(|e| e.into_inner());
        readers.retain(|task| !task.is_finished());
        if !readers.is_empty() {
            debug!(server = %self.server, draining = readers.len(), "previous reader still draining");
        }
        readers.push(reader);
        self.attached.store(true, Ordering::Release);
    }

    /// Detach the exited process and close its stdin.
    ///
    /// Commands already queued are still attempted before the stream closes.
    pub fn process_stop(&self) {
        self.attached.store(false, Ordering::Release);
        self.send_to_writer(WriterMessage::Detach);
    }

    /// Record `text` in the console and queue it for the process's stdin.
    ///
    /// The line shows up in the replay cache immediately. If no process is
    /// attached when the writer task reaches it, the write is dropped.
    pub fn write_message(&self, text: &str) {
        self.cache.add_line(text);
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.send_to_writer(WriterMessage::Line(text));
    }

    /// Add a supervisor message to the console without touching the process.
    pub fn log_manager_message(&self, message: &str) {
        info!(server = %self.server, "{message}");
        self.cache.add_line(format!("{MANAGER_PREFIX}{message}"));
    }

    /// Abort the reader and writer tasks. Used only at daemon teardown.
    pub fn shutdown(&self) {
        self.writer_task.abort();
        let mut readers = self.reader_tasks.lock().unwrap_or_else(|e| e.into_inner());
        for reader in readers.drain(..) {
            reader.abort();
        }
        self.attached.store(false, Ordering::Release);
    }

    fn send_to_writer(&self, message: WriterMessage) {
        if self.writer_tx.send(message).is_err() {
            debug!(server = %self.server, "console writer has shut down, dropping message");
        }
    }
}

impl Drop for ConsoleBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Line reader over one output pipe.
///
/// Bytes that are not valid UTF-8 are replaced rather than treated as a read
/// error. A partial line survives a cancelled read in `buf`.
struct LineStream {
    reader: BufReader<BoxReader>,
    buf: Vec<u8>,
}

impl LineStream {
    fn new(reader: BoxReader) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Next line from an optional stream; pending forever once the stream is gone.
async fn next_line(stream: &mut Option<LineStream>) -> std::io::Result<Option<String>> {
    match stream {
        Some(stream) => stream.next_line().await,
        None => std::future::pending().await,
    }
}

/// Reader task body: merge stdout and stderr lines into the cache until
/// both streams reach EOF or fail.
async fn read_console(
    server: String,
    cache: Arc<ConsoleCache>,
    output: Option<BoxReader>,
    errors: Option<BoxReader>,
) {
    info!(server = %server, "began reading console");
    let mut output = output.map(LineStream::new);
    let mut errors = errors.map(LineStream::new);

    loop {
        let (result, stream) = tokio::select! {
            r = next_line(&mut output), if output.is_some() => (r, &mut output),
            r = next_line(&mut errors), if errors.is_some() => (r, &mut errors),
            else => break,
        };

        match result {
            Ok(Some(line)) => cache.add_line(line),
            Ok(None) => *stream = None,
            Err(e) => {
                error!(server = %server, error = %e, "failed to read console");
                cache.add_line(format!(
                    "{MANAGER_PREFIX}The manager has encountered an exception while reading from this console."
                ));
                *stream = None;
            }
        }
    }
    info!(server = %server, "stopped reading console");
}

/// Writer task body: apply attach/detach/line messages strictly in order.
async fn write_console(
    server: String,
    cache: Arc<ConsoleCache>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
) {
    let mut input: Option<BoxWriter> = None;

    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Attach(writer) => input = Some(writer),
            WriterMessage::Detach => {
                if let Some(mut writer) = input.take() {
                    if let Err(e) = writer.shutdown().await {
                        warn!(server = %server, error = %e, "failed to close console input");
                    }
                }
            }
            WriterMessage::Line(text) => {
                let Some(writer) = input.as_mut() else {
                    debug!(server = %server, "no process attached, dropping console input");
                    continue;
                };
                let result = async {
                    writer.write_all(text.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    error!(server = %server, error = %e, "failed to write console input");
                    cache.add_line(format!(
                        "{MANAGER_PREFIX}The manager has encountered an exception while writing to this console."
                    ));
                }
            }
        }
    }
}
