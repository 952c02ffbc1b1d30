//! Session setup: greeting, EHLO, STARTTLS and AUTH.

use tracing::debug;

use super::stream::Connector;
use super::transport::Transport;
use super::ServerInfo;
use crate::auth::{AuthOutcome, authenticate};
use crate::command::Command;
use crate::config::{Config, Security};
use crate::error::{Error, Result};
use crate::types::{Extension, Reply, ReplyCode};

/// A session that is ready for mail transactions.
#[derive(Debug)]
pub struct Established<S> {
    /// Line transport to the server.
    pub transport: Transport<S>,
    /// Capabilities from the last EHLO.
    pub server_info: ServerInfo,
    /// Result of the AUTH phase.
    pub auth: AuthOutcome,
}

/// Connects and runs the handshake up to and including AUTH.
///
/// # Errors
///
/// Returns the first transport, protocol or configuration error. The
/// stream is dropped without `QUIT` on failure.
pub async fn establish<C: Connector>(
    connector: &C,
    config: &Config,
) -> Result<Established<C::Stream>> {
    let stream = connector.connect().await?;
    let mut transport = Transport::new(stream);

    let greeting = transport.read_reply().await?;
    let greeting = expect_code(greeting, ReplyCode::SERVICE_READY)?;

    // Hostname is the first word of the greeting text
    let mut server_info = ServerInfo {
        hostname: greeting
            .message
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default()
            .to_string(),
        ..ServerInfo::default()
    };
    hello(&mut transport, &mut server_info, &config.ehlo_hostname).await?;

    if config.security == Security::StartTls {
        if !server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        let reply = transport.send_command(&Command::StartTls).await?;
        expect_code(reply, ReplyCode::SERVICE_READY)?;

        let stream = connector.upgrade(transport.into_inner()).await?;
        transport = Transport::new(stream);
        debug!("STARTTLS complete, repeating EHLO");

        server_info.extensions.clear();
        hello(&mut transport, &mut server_info, &config.ehlo_hostname).await?;
    }

    let advertised = server_info.auth_mechanisms();
    let auth = authenticate(&mut transport, advertised.as_slice(), config).await?;

    Ok(Established {
        transport,
        server_info,
        auth,
    })
}

/// EHLO, or HELO if the server rejects EHLO.
async fn hello<S>(transport: &mut Transport<S>, info: &mut ServerInfo, hostname: &str) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let reply = transport
        .send_command(&Command::Ehlo {
            hostname: hostname.to_string(),
        })
        .await?;

    if reply.is_success() {
        // First line echoes the server name
        info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(String::as_str)
            .map(Extension::parse)
            .collect();
        debug!(extensions = ?info.extensions, "EHLO accepted");
        return Ok(());
    }

    debug!(%reply, "EHLO rejected, falling back to HELO");
    let reply = transport
        .send_command(&Command::Helo {
            hostname: hostname.to_string(),
        })
        .await?;
    expect_success(reply)?;
    info.extensions.clear();
    Ok(())
}

fn expect_success(reply: Reply) -> Result<Reply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

/// Greeting and STARTTLS must answer exactly `code`.
fn expect_code(reply: Reply, code: ReplyCode) -> Result<Reply> {
    if reply.code == code {
        Ok(reply)
    } else if reply.is_success() {
        Err(Error::Protocol(format!("expected {code}, got {reply}")))
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}
