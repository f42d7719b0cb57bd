//! I/O seams for the guider client
//!
//! The request channel, the event listener, and the process manager all
//! reach the outside world through the traits here, so tests can swap in
//! scripted connections and mock processes. The default implementations
//! speak TCP and spawn tokio child processes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{GuiderError, Result};

/// Read and write halves of one protocol connection
pub struct ConnectionPair {
    pub reader: Box<dyn LineReader>,
    pub writer: Box<dyn MessageWriter>,
}

/// Reads protocol lines from a connection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait LineReader: Send {
    /// Read one line. `Ok(Some(line))` on success with the terminator
    /// trimmed, `Ok(None)` on EOF, `Err` on a read fault.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Writes protocol messages to a connection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MessageWriter: Send {
    /// Write a message with a CRLF terminator and flush
    async fn write_message(&mut self, message: &str) -> Result<()>;

    /// Shutdown the writer
    async fn shutdown(&mut self) -> Result<()>;
}

/// Creates connections to the guider service. Every request-channel call
/// and the event listener each open their own connection here; the
/// process manager uses [`ConnectionFactory::can_connect`] as its
/// readiness probe.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionFactory: Send + Sync {
    /// Connect to the address, bounded by `timeout`
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair>;

    /// Quick connectivity probe
    async fn can_connect(&self, addr: &str) -> bool;
}

/// Buffered line reader over the read half of a TCP stream
pub struct TcpLineReader {
    reader: BufReader<OwnedReadHalf>,
    buffer: String,
}

#[async_trait]
impl LineReader for TcpLineReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        let n = self
            .reader
            .read_line(&mut self.buffer)
            .await
            .map_err(GuiderError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buffer.trim().to_string()))
    }
}

/// CRLF-terminated message writer over the write half of a TCP stream
pub struct TcpMessageWriter {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl MessageWriter for TcpMessageWriter {
    async fn write_message(&mut self, message: &str) -> Result<()> {
        let frame = format!("{}\r\n", message);
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| GuiderError::SendError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| GuiderError::SendError(e.to_string()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(GuiderError::Io)
    }
}

/// TCP implementation of [`ConnectionFactory`]
#[derive(Default, Clone)]
pub struct TcpConnectionFactory;

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair> {
        debug!("Connecting to {} with timeout {:?}", addr, timeout);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GuiderError::Timeout(format!("Connection to {} timed out", addr)))?
            .map_err(|e| {
                GuiderError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        let (read, write) = stream.into_split();
        Ok(ConnectionPair {
            reader: Box::new(TcpLineReader {
                reader: BufReader::new(read),
                buffer: String::new(),
            }),
            writer: Box::new(TcpMessageWriter { writer: write }),
        })
    }

    async fn can_connect(&self, addr: &str) -> bool {
        TcpStream::connect(addr).await.is_ok()
    }
}

/// Handle to a spawned guider process
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ProcessHandle: Send {
    /// `Ok(Some(code))` if the process has exited, `Ok(None)` if running
    async fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Kill the process
    async fn kill(&mut self) -> Result<()>;

    /// Wait for the process to exit and return its exit code
    async fn wait(&mut self) -> Result<i32>;

    /// Process id, if available
    fn id(&self) -> Option<u32>;
}

/// Spawns the external guider process
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn the executable with the given arguments
    async fn spawn(&self, executable: &Path, args: &[String]) -> Result<Box<dyn ProcessHandle>>;
}

/// [`ProcessHandle`] over a tokio child process
pub struct TokioProcessHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    async fn try_wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.try_wait().map_err(GuiderError::Io)?;
        Ok(status.map(|s| s.code().unwrap_or(-1)))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(GuiderError::Io)
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(GuiderError::Io)?;
        Ok(status.code().unwrap_or(-1))
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// [`ProcessSpawner`] that launches detached tokio child processes
#[derive(Default, Clone)]
pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, executable: &Path, args: &[String]) -> Result<Box<dyn ProcessHandle>> {
        debug!("Spawning process: {} {:?}", executable.display(), args);
        let child = Command::new(executable)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| {
                GuiderError::ProcessStartFailed(format!(
                    "Failed to start {}: {}",
                    executable.display(),
                    e
                ))
            })?;
        debug!("Process started with PID: {:?}", child.id());
        Ok(Box::new(TokioProcessHandle { child }))
    }
}
