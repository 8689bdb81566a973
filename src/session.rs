//! Line-buffered TCP session with deterministic synchronization.
//!
//! A [`Session`] wraps one socket to a simulated client or a peer under test.
//! All IO is sequential awaits on the owning test task; there is no internal
//! concurrency, so a test reads exactly the traffic it asked for. There is
//! also no timeout here: a permanently silent peer blocks until the
//! test-runner-level wall-clock timeout kills the run.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{HarnessError, Result};
use crate::message::Message;

/// One TCP connection with IRC's CRLF line discipline.
pub struct Session {
    name: String,
    show_io: bool,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Source for PING synchronization tokens, unique per connection.
    sync_counter: u64,
}

impl Session {
    /// Connect to a server under test.
    pub async fn connect(addr: impl ToSocketAddrs, name: &str, show_io: bool) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, name, show_io))
    }

    /// Wrap an already-accepted connection (client under test).
    pub fn from_stream(stream: TcpStream, name: &str, show_io: bool) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            name: name.to_string(),
            show_io,
            reader: BufReader::new(reader),
            writer,
            sync_counter: 0,
        }
    }

    fn next_token(&mut self, prefix: &str) -> String {
        self.sync_counter += 1;
        format!("{prefix}{}", self.sync_counter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one line, appending CRLF unless the caller already did.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        if self.show_io {
            tracing::debug!(session = %self.name, "S: {}", line.trim_end());
        }
        Ok(())
    }

    /// Read one complete line, terminator stripped. CRLF is the wire norm;
    /// a bare LF is tolerated. EOF maps to [`HarnessError::Connection`].
    pub async fn get_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(HarnessError::Connection(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            )));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        if self.show_io {
            tracing::debug!(session = %self.name, "C: {line}");
        }
        Ok(line)
    }

    /// Read and parse the next message, whatever it is.
    pub async fn get_message(&mut self) -> Result<Message> {
        let line = self.get_line().await?;
        Ok(Message::parse(&line)?)
    }

    /// Read messages until `keep` returns true, and return that message.
    ///
    /// This is the core synchronization primitive: servers interleave
    /// keepalives and relayed traffic with the replies a test expects, so
    /// "read exactly N lines" would be fragile. The predicate sees every
    /// message exactly once (including ones it discards) and may record
    /// state or fail the test itself.
    pub async fn get_message_filtered<F>(&mut self, mut keep: F) -> Result<Message>
    where
        F: FnMut(&Message) -> Result<bool>,
    {
        loop {
            let msg = self.get_message().await?;
            if keep(&msg)? {
                return Ok(msg);
            }
        }
    }

    /// Drain everything the peer has to say right now, deterministically:
    /// send a `PING` with a unique token and collect every message up to the
    /// matching `PONG`, which is consumed and not returned.
    pub async fn get_messages(&mut self) -> Result<Vec<Message>> {
        let token = self.next_token("sync");
        self.send_line(&format!("PING {token}")).await?;
        let mut messages = Vec::new();
        loop {
            let msg = self.get_message().await?;
            if msg.command == "PONG" && msg.params.last().map(String::as_str) == Some(token.as_str()) {
                return Ok(messages);
            }
            messages.push(msg);
        }
    }

    /// Assert that the peer has disconnected (or is about to).
    ///
    /// Sends a uniquely-tagged `PING` probe and reads until the connection
    /// errors out. A `PONG` answering the probe proves the peer is alive and
    /// fails the assertion; traffic the peer queued before dropping the
    /// connection — including a `PONG` to an earlier ping — is drained and
    /// discarded, since the probe's token cannot have been echoed before the
    /// probe was sent. A peer that neither answers nor closes blocks until
    /// the external test timeout.
    pub async fn assert_disconnected(&mut self) -> Result<()> {
        match self.probe_disconnect().await {
            Err(HarnessError::Connection(_)) => Ok(()),
            Err(other) => Err(other),
            Ok(()) => unreachable!("probe loop only exits by error"),
        }
    }

    async fn probe_disconnect(&mut self) -> Result<()> {
        let token = self.next_token("probe");
        self.send_line(&format!("PING {token}")).await?;
        loop {
            let msg = self.get_message().await?;
            if msg.command == "PONG" && msg.params.last().map(String::as_str) == Some(token.as_str())
            {
                return Err(HarnessError::assertion(
                    "command",
                    "PONG",
                    "connection closed",
                    Some("Client not disconnected."),
                ));
            }
        }
    }
}
