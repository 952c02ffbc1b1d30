//! Error types for SMTP operations.

use std::io;

use crate::types::AuthMechanism;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
///
/// Protocol rejections are plain values: they carry the server text but no
/// backtrace.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The peer closed the connection.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Connecting to the server took too long.
    #[error("Timed out connecting to {0}")]
    Timeout(String),

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected an AUTH exchange.
    #[error("AUTH {mechanism} failed: {reply}")]
    Auth {
        /// Mechanism that was being negotiated.
        mechanism: AuthMechanism,
        /// Server reply line, code included.
        reply: String,
    },

    /// Login is required but no username/password were configured.
    #[error("Login is required, but no credentials supplied")]
    MissingCredentials,

    /// Login is required but nothing in the allow-list is advertised.
    #[error("Login is required, but no allowed AUTH methods available. You may need to do STARTTLS")]
    NoUsableMechanism,

    /// None of the usable mechanisms could be instantiated.
    #[error("Cannot find supported AUTH method")]
    NoSupportedMechanism,

    /// Credentials cannot be encoded for the chosen mechanism.
    #[error("Invalid credentials for mechanism: {0}")]
    InvalidCredentials(String),

    /// The pool is closed or closing.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true if the underlying session can no longer carry traffic.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::ConnectionClosed | Self::Timeout(_)
        )
    }

    /// Returns true if the error comes from client configuration rather than
    /// the server.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::NoUsableMechanism
                | Self::NoSupportedMechanism
                | Self::InvalidCredentials(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_smtp_errors() {
        assert!(Error::smtp_error(550, "no").is_permanent());
        assert!(Error::smtp_error(421, "busy").is_transient());
        assert!(!Error::smtp_error(421, "busy").is_permanent());
    }

    #[test]
    fn classifies_transport_errors() {
        assert!(Error::ConnectionClosed.is_transport());
        assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transport());
        assert!(!Error::PoolClosed.is_transport());
    }

    #[test]
    fn classifies_configuration_errors() {
        assert!(Error::MissingCredentials.is_configuration());
        assert!(Error::NoUsableMechanism.is_configuration());
        assert!(!Error::ConnectionClosed.is_configuration());
    }

    #[test]
    fn auth_error_names_mechanism_and_reply() {
        let err = Error::Auth {
            mechanism: AuthMechanism::CramMd5,
            reply: "535 5.7.8 Bad credentials".into(),
        };
        assert_eq!(
            err.to_string(),
            "AUTH CRAM-MD5 failed: 535 5.7.8 Bad credentials"
        );
    }
}
