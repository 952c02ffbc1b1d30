//! Command/reply exchange over a byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::Reply;

/// Longest reply line accepted, without its line ending.
pub const MAX_LINE_LEN: usize = 4096;

/// Most lines accepted in one multi-line reply.
pub const MAX_REPLY_LINES: usize = 512;

/// Buffered SMTP line transport over any async stream.
#[derive(Debug)]
pub struct Transport<S> {
    reader: BufReader<S>,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Returns the underlying stream, discarding buffered input.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    /// Writes one command line.
    ///
    /// The line is logged with its credential part masked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_command(&mut self, cmd: &Command) -> Result<()> {
        debug!(command = %cmd.display_redacted(), "C:");
        let data = cmd.serialize();
        let stream = self.reader.get_mut();
        stream.write_all(&data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads one line without its line ending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the stream ends before a
    /// line ending, a protocol error for a line over [`MAX_LINE_LEN`], or an
    /// I/O error.
    pub async fn read_line(&mut self) -> Result<String> {
        let limit = (MAX_LINE_LEN + 2) as u64;
        let mut line = String::new();
        let read = (&mut self.reader).take(limit).read_line(&mut line).await?;
        if !line.ends_with('\n') {
            return Err(if read as u64 == limit {
                Error::Protocol(format!("Reply line longer than {MAX_LINE_LEN} bytes"))
            } else {
                Error::ConnectionClosed
            });
        }

        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(line)
    }

    /// Reads a complete, possibly multi-line, reply.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the reply is malformed.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                continue;
            }
            trace!(%line, "S:");

            let is_last = is_last_reply_line(&line);
            lines.push(line);
            if !is_last && lines.len() >= MAX_REPLY_LINES {
                return Err(Error::Protocol(format!(
                    "Reply longer than {MAX_REPLY_LINES} lines"
                )));
            }

            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    /// Sends a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails at the transport level. A
    /// negative reply is returned as `Ok`.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        self.write_command(cmd).await?;
        self.read_reply().await
    }
}
