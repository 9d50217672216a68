//! I/O relay between a process's stdio and caller-supplied streams.
//!
//! ## Architecture
//!
//! - [`ConsoleSocket`]: rendezvous endpoint receiving a PTY master
//! - [`Console`]: the PTY master (terminal mode, resizable)
//! - [`PipeSet`]: three stdio pipes (pipe mode)
//! - [`Relay`]: one copy task per stream direction, plus a join point
//!
//! Output directions (stdout, and stderr in pipe mode) are tracked: [`Relay::wait`]
//! returns only once each has hit end-of-stream or failed. The stdin direction is
//! not tracked; `wait` aborts it instead, since a caller may keep its stdin open
//! forever.

mod console;
mod console_socket;
mod pipes;

pub use console::Console;
pub use console_socket::ConsoleSocket;
pub use pipes::PipeSet;

use execshim_shared::errors::{ShimError, ShimResult};
use execshim_shared::ExecRequest;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::OwnedFd;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// The process side of the relay. Chosen once at creation.
#[derive(Debug)]
pub enum ProcessIo {
    Console(Console),
    Pipes(PipeSet),
}

impl ProcessIo {
    pub fn kind(&self) -> IoKind {
        match self {
            ProcessIo::Console(_) => IoKind::Console,
            ProcessIo::Pipes(_) => IoKind::Pipes,
        }
    }

    pub fn console(&self) -> Option<&Console> {
        match self {
            ProcessIo::Console(console) => Some(console),
            ProcessIo::Pipes(_) => None,
        }
    }

    /// Release whatever descriptors the relay did not take.
    pub fn close(self) -> ShimResult<()> {
        match self {
            ProcessIo::Console(console) => console.close(),
            ProcessIo::Pipes(mut pipes) => pipes.close(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    Console,
    Pipes,
}

/// Caller-side stream paths. An empty path means "not connected".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamPaths {
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
}

impl StreamPaths {
    pub fn from_request(req: &ExecRequest) -> Self {
        Self {
            stdin: req.stdin.clone(),
            stdout: req.stdout.clone(),
            stderr: req.stderr.clone(),
        }
    }

    /// Open the output paths.
    ///
    /// Done before the runtime launches anything, so a bad path fails
    /// creation while nothing is running. In terminal mode output is
    /// combined on stdout and the stderr path is never touched.
    pub fn open(&self, terminal: bool) -> ShimResult<RelayStreams> {
        let stderr = if terminal {
            Output::Discard
        } else {
            open_output(&self.stderr)?
        };
        Ok(RelayStreams {
            stdin: self.stdin.clone(),
            stdout: open_output(&self.stdout)?,
            stderr,
        })
    }
}

/// Caller streams with their outputs already open.
pub struct RelayStreams {
    stdin: String,
    stdout: Output,
    stderr: Output,
}

/// Concurrent byte copying with a single completion point.
#[derive(Debug, Default)]
pub struct Relay {
    outputs: TaskTracker,
    stdin: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start copying between `io` and the caller's streams.
    ///
    /// Runs after launch, so every error here is a `Relay` error: the
    /// process exists but its I/O is not wired up.
    pub fn start(&self, io: &mut ProcessIo, streams: RelayStreams) -> ShimResult<()> {
        match io {
            ProcessIo::Console(console) => self.start_console(console, streams),
            ProcessIo::Pipes(pipes) => {
                self.start_pipes(pipes, streams);
                Ok(())
            }
        }
    }

    /// Terminal mode: one duplex stream, output combined on stdout.
    fn start_console(&self, console: &Console, streams: RelayStreams) -> ShimResult<()> {
        let reader = tokio::fs::File::from_std(console.duplicate()?);
        let writer = if streams.stdin.is_empty() {
            None
        } else {
            Some(tokio::fs::File::from_std(console.duplicate()?))
        };

        self.spawn_output("stdout", reader, streams.stdout);
        if let Some(writer) = writer {
            self.spawn_stdin(streams.stdin.clone(), writer);
        }

        tracing::debug!(stdin = %streams.stdin, "Console relay started");
        Ok(())
    }

    /// Pipe mode: three independent streams.
    fn start_pipes(&self, pipes: &mut PipeSet, streams: RelayStreams) {
        if let Some(fd) = pipes.take_stdout() {
            self.spawn_output("stdout", fd_to_async(fd), streams.stdout);
        }
        if let Some(fd) = pipes.take_stderr() {
            self.spawn_output("stderr", fd_to_async(fd), streams.stderr);
        }

        // Without a stdin source the process gets EOF right away.
        let stdin = pipes.take_stdin();
        if let Some(fd) = stdin {
            if streams.stdin.is_empty() {
                drop(fd);
            } else {
                self.spawn_stdin(streams.stdin.clone(), fd_to_async(fd));
            }
        }

        tracing::debug!(stdin = %streams.stdin, "Pipe relay started");
    }

    fn spawn_output<R>(&self, name: &'static str, reader: R, output: Output)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.outputs.spawn(async move {
            match output {
                Output::File(writer) => copy_stream(name, reader, writer).await,
                Output::Discard => copy_stream(name, reader, tokio::io::sink()).await,
            }
        });
    }

    fn spawn_stdin<W>(&self, path: String, writer: W)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let task = tokio::spawn(async move {
            match open_input(&path).await {
                Ok(Input::Fifo(reader)) => copy_stream("stdin", reader, writer).await,
                Ok(Input::File(reader)) => copy_stream("stdin", reader, writer).await,
                Err(e) => tracing::warn!(path = %path, error = %e, "Failed to open stdin"),
            }
        });
        *self.stdin.lock() = Some(task);
    }

    /// Wait for every output direction to finish.
    ///
    /// Stops the stdin direction first. Safe to call more than once.
    pub async fn wait(&self) {
        if let Some(task) = self.stdin.lock().take() {
            task.abort();
        }
        self.outputs.close();
        self.outputs.wait().await;
    }

    /// Number of output directions still copying.
    pub fn pending(&self) -> usize {
        self.outputs.len()
    }
}

enum Output {
    File(tokio::fs::File),
    Discard,
}

/// Open a caller output path for writing.
///
/// Read access is requested too so that opening a FIFO never blocks waiting
/// for a reader.
fn open_output(path: &str) -> ShimResult<Output> {
    if path.is_empty() {
        return Ok(Output::Discard);
    }

    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(Path::new(path))
        .map_err(|e| ShimError::Setup(format!("Failed to open output {}: {}", path, e)))?;

    Ok(Output::File(tokio::fs::File::from_std(file)))
}

enum Input {
    File(tokio::fs::File),
    Fifo(pipe::Receiver),
}

/// Open a caller stdin path without parking a thread in `open(2)`.
async fn open_input(path: &str) -> std::io::Result<Input> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.file_type().is_fifo() {
        Ok(Input::Fifo(open_fifo(path).await?))
    } else {
        Ok(Input::File(tokio::fs::File::open(path).await?))
    }
}

/// Wait for a FIFO writer on the runtime instead of in a blocking open.
///
/// A read-only end with no writer reads as EOF, so the first writer is
/// awaited on a read-write end, which turns readable only once data
/// arrives. The read-only end opened next still sees that data, and sees
/// EOF when the writer closes.
async fn open_fifo(path: &str) -> std::io::Result<pipe::Receiver> {
    let waiting = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)?;
    waiting.readable().await?;
    let receiver = pipe::OpenOptions::new().open_receiver(path)?;
    drop(waiting);
    Ok(receiver)
}

fn fd_to_async(fd: OwnedFd) -> tokio::fs::File {
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

/// Copy until either side closes. Errors end this direction only.
async fn copy_stream<R, W>(name: &'static str, mut reader: R, mut writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => tracing::debug!(stream = name, bytes, "Relay finished"),
        // A PTY master reports EIO once the last slave closes.
        Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => {
            tracing::debug!(stream = name, "Relay finished (terminal closed)")
        }
        Err(e) => tracing::warn!(stream = name, error = %e, "Relay stopped on error"),
    }

    if let Err(e) = writer.flush().await {
        tracing::warn!(stream = name, error = %e, "Relay flush failed");
    }
}
