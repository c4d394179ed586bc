//! Line-oriented transport to the engine process

use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::spawn;
use tracing::{debug, error, warn};

use crate::error::Result;

/// How to start an engine process
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Path of the engine executable
    pub command: String,
    /// Arguments passed to the engine
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the engine
    #[serde(default)]
    pub pwd: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl From<&str> for EngineConfig {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

/// Something the transport observed on the engine's stdout
#[derive(Debug)]
pub(crate) enum Event {
    /// One complete line, without the terminator
    Line(String),
    /// Stdout closed and the process is gone; carries the exit code,
    /// `None` when killed by a signal
    Exited(Option<i32>),
}

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Owns the engine process and its pipes. Writes whole lines, reads whole
/// lines, and reports process exit; it never interprets content.
pub(crate) struct Transport {
    writer: Writer,
    reader: BufReader<Reader>,
    /// Bytes of a line still waiting for its terminator
    buffer: Vec<u8>,
    child: Option<Child>,
    exit_override: Option<i32>,
}

impl Transport {
    /// Spawns the engine with piped stdio. The child is killed when the
    /// transport is dropped. Stderr is drained by a background task and
    /// logged at warning level.
    pub(crate) fn spawn(config: &EngineConfig) -> Result<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(pwd) = &config.pwd {
            command.current_dir(pwd);
        }

        let mut child = command.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| crate::EngineError::Io("cannot open engine stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| crate::EngineError::Io("cannot open engine stdout".into()))?;

        match child.stderr.take() {
            Some(stderr) => {
                spawn(async move {
                    let mut stderr = BufReader::new(stderr).lines();
                    loop {
                        match stderr.next_line().await {
                            Err(err) => {
                                error!("while reading from engine stderr: {err}");
                                break;
                            }
                            Ok(None) => break,
                            Ok(Some(line)) => warn!(err = line, "engine stderr"),
                        }
                    }
                });
            }
            None => warn!("cannot open engine stderr"),
        }

        debug!(pid = child.id(), command = %config.command, "engine started");

        Ok(Self {
            writer: Box::new(stdin),
            reader: BufReader::new(Box::new(stdout) as Reader),
            buffer: Vec::new(),
            child: Some(child),
            exit_override: None,
        })
    }

    /// A transport over arbitrary I/O halves, reporting `exit_code` once
    /// the reader is exhausted. Lets tests drive the protocol machinery
    /// against a scripted peer.
    #[cfg(test)]
    pub(crate) fn mock(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader) as Reader),
            buffer: Vec::new(),
            child: None,
            exit_override: exit_code,
        }
    }

    /// Sends one line, appending the terminator
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("<< {line}");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Waits for the next stdout line, or for process exit once stdout is
    /// exhausted.
    ///
    /// Lines are split on `\n` alone, so a carriage return preceding the
    /// terminator stays part of the line. An unterminated trailing
    /// fragment is never delivered.
    pub(crate) async fn recv(&mut self) -> Result<Event> {
        let read = self.reader.read_until(b'\n', &mut self.buffer).await?;
        if read == 0 || self.buffer.last() != Some(&b'\n') {
            let code = match &mut self.child {
                Some(child) => child.wait().await?.code(),
                None => self.exit_override,
            };
            debug!(?code, "engine exited");
            return Ok(Event::Exited(code));
        }

        self.buffer.pop();
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        debug!(">> {line}");
        Ok(Event::Line(line))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, split, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn carriage_returns_survive_line_splitting() {
        let (client, server) = duplex(256);
        let (read, write) = split(client);
        let mut transport = Transport::mock(read, write, Some(0));

        let (server_read, mut server_write) = split(server);
        server_write
            .write_all(b"id name Mock\r\nuciok\nbest")
            .await
            .unwrap();
        drop(server_write);
        drop(server_read);

        let Event::Line(line) = transport.recv().await.unwrap() else {
            panic!("expected a line");
        };
        assert_eq!(line, "id name Mock\r");

        let Event::Line(line) = transport.recv().await.unwrap() else {
            panic!("expected a line");
        };
        assert_eq!(line, "uciok");

        // The unterminated fragment is not a line
        let event = transport.recv().await.unwrap();
        assert!(matches!(event, Event::Exited(Some(0))));
    }

    #[tokio::test]
    async fn write_line_appends_the_terminator() {
        let (client, server) = duplex(256);
        let (read, write) = split(client);
        let mut transport = Transport::mock(read, write, None);

        transport.write_line("isready").await.unwrap();
        drop(transport);

        let (mut server_read, _server_write) = split(server);
        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server_read, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"isready\n");
    }
}
