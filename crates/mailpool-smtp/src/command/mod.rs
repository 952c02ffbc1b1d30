//! SMTP command builder.

use std::borrow::Cow;

use crate::types::AuthMechanism;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Base64 initial response (SASL-IR)
        initial_response: Option<String>,
    },
    /// Base64 answer to a `334` challenge, sent without a keyword
    AuthResponse(String),
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

/// Which part of a command line may be written to logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redaction {
    /// Nothing sensitive on the line.
    Clear,
    /// Bytes from this offset on carry credentials. `From(0)` masks the
    /// whole line.
    From(usize),
}

impl Redaction {
    /// Returns the line with the sensitive part masked.
    #[must_use]
    pub fn apply(self, line: &str) -> Cow<'_, str> {
        match self {
            Self::Clear => Cow::Borrowed(line),
            Self::From(offset) => {
                let visible = line.get(..offset).unwrap_or("");
                Cow::Owned(format!("{visible}<redacted>"))
            }
        }
    }
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.line().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command line without the trailing CRLF.
    #[must_use]
    pub fn line(&self) -> String {
        match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".into(),
            Self::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {mechanism} {response}"),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {mechanism}"),
            Self::AuthResponse(response) => response.clone(),
            Self::Rset => "RSET".into(),
            Self::Noop => "NOOP".into(),
            Self::Quit => "QUIT".into(),
        }
    }

    /// Returns how this command must be masked before logging.
    #[must_use]
    pub const fn redaction(&self) -> Redaction {
        match self {
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => Redaction::From("AUTH ".len() + mechanism.as_str().len() + 1),
            Self::AuthResponse(_) => Redaction::From(0),
            _ => Redaction::Clear,
        }
    }

    /// Returns the line as it may appear in logs.
    #[must_use]
    pub fn display_redacted(&self) -> String {
        self.redaction().apply(&self.line()).into_owned()
    }
}
