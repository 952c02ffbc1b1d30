//! SMTP sessions: transport, handshake and the pooled connection type.

mod conn;
mod handshake;
mod stream;
mod transport;

pub(crate) use conn::Lifecycle;
pub use conn::{Connection, ConnectionId, Status};
pub use handshake::{Established, establish};
pub use stream::{Connector, SmtpStream, TcpConnector, create_tls_connector, tls_connector_for};
pub use transport::Transport;

use crate::types::Extension;
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns the advertised authentication mechanism names.
    ///
    /// Servers that send both `AUTH` and `AUTH=` lines get the union.
    /// Names this crate cannot run are included.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        let mut mechanisms: Vec<String> = Vec::new();
        for ext in &self.extensions {
            if let Extension::Auth(list) = ext {
                for mechanism in list {
                    if !mechanisms.contains(mechanism) {
                        mechanisms.push(mechanism.clone());
                    }
                }
            }
        }
        mechanisms
    }
}
