//! A single established SMTP session.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::handshake::{Established, establish};
use super::stream::Connector;
use super::transport::Transport;
use super::ServerInfo;
use crate::auth::AuthOutcome;
use crate::command::Command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Upper bound on waiting for the server's `QUIT` reply.
const QUIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier of a connection, unique within one pool.
pub type ConnectionId = u64;

/// Lifecycle status of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Lent to a caller.
    InUse,
    /// Parked in the pool.
    Idle,
    /// The transport failed; the connection will not be reused.
    Broken,
    /// `QUIT` was sent or the transport was dropped.
    Closed,
}

/// Receives the one close notification of every pooled connection.
pub(crate) trait Lifecycle: Send + Sync {
    /// `id` is `None` for an attempt that never became a connection.
    fn connection_closed(&self, id: Option<ConnectionId>);
}

/// An authenticated SMTP session.
///
/// Dropping a connection closes its socket without `QUIT`; use
/// [`close`](Self::close) for an orderly shutdown.
pub struct Connection<S> {
    id: ConnectionId,
    transport: Transport<S>,
    server_info: ServerInfo,
    auth: AuthOutcome,
    status: Status,
    listener: Option<Weak<dyn Lifecycle>>,
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server", &self.server_info.hostname)
            .field("auth", &self.auth)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an established session.
    #[must_use]
    pub fn new(id: ConnectionId, session: Established<S>) -> Self {
        Self {
            id,
            transport: session.transport,
            server_info: session.server_info,
            auth: session.auth,
            status: Status::InUse,
            listener: None,
        }
    }

    /// Opens a standalone, unpooled connection.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting or the handshake fails.
    pub async fn open<C>(connector: &C, config: &Config) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        let session = establish(connector, config).await?;
        Ok(Self::new(0, session))
    }

    pub(crate) fn with_listener(mut self, listener: Weak<dyn Lifecycle>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Returns true if the connection must not be reused.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        matches!(self.status, Status::Broken | Status::Closed)
    }

    /// Marks the connection as unusable, e.g. after a failed transaction.
    pub fn set_broken(&mut self) {
        if self.status != Status::Closed {
            self.status = Status::Broken;
        }
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Returns the server capabilities.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns how the AUTH phase ended.
    #[must_use]
    pub const fn auth(&self) -> AuthOutcome {
        self.auth
    }

    /// Sends a command and returns the server reply.
    ///
    /// A transport failure or a `421` reply marks the connection broken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] on a broken connection, or the
    /// transport error.
    pub async fn command(&mut self, cmd: &Command) -> Result<Reply> {
        if self.is_broken() {
            return Err(Error::InvalidState(format!(
                "connection {} is {:?}",
                self.id, self.status
            )));
        }

        match self.transport.send_command(cmd).await {
            Ok(reply) => {
                if reply.code == ReplyCode::SERVICE_UNAVAILABLE {
                    self.set_broken();
                }
                Ok(reply)
            }
            Err(e) => {
                self.set_broken();
                Err(e)
            }
        }
    }

    /// Checks that the session still works with an `RSET` round trip.
    ///
    /// # Errors
    ///
    /// Returns an error and marks the connection broken if the server does
    /// not answer positively.
    pub async fn probe(&mut self) -> Result<()> {
        let reply = self.command(&Command::Rset).await?;
        if reply.is_success() {
            Ok(())
        } else {
            self.set_broken();
            Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
        }
    }

    /// Sends `QUIT` (unless broken) and closes the connection.
    pub async fn close(mut self) {
        if !self.is_broken() {
            match tokio::time::timeout(QUIT_TIMEOUT, self.transport.send_command(&Command::Quit))
                .await
            {
                Ok(Ok(reply)) => debug!(id = self.id, %reply, "QUIT"),
                Ok(Err(e)) => debug!(id = self.id, error = %e, "QUIT failed"),
                Err(_) => debug!(id = self.id, "QUIT timed out"),
            }
        }
        self.status = Status::Closed;
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.status = Status::Closed;
        if let Some(listener) = self.listener.take().and_then(|weak| weak.upgrade()) {
            listener.connection_closed(Some(self.id));
        }
    }
}
