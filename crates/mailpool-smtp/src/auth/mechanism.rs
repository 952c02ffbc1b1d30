//! SASL client mechanisms.
//!
//! Implements:
//! - PLAIN (RFC 4616) and LOGIN - plaintext-equivalent credentials
//! - CRAM-MD5 (RFC 2195), CRAM-SHA1 and CRAM-SHA256 - keyed digest of a
//!   server challenge
//! - XOAUTH2 and OAUTHBEARER (RFC 7628) - bearer tokens, the configured
//!   password is the access token
//!
//! Every instance owns its state, so two connections authenticating at the
//! same time never share a mechanism.

use std::fmt::Write;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::types::AuthMechanism;

/// One side of a SASL exchange.
pub trait Mechanism: Send {
    /// Returns the mechanism this instance implements.
    fn kind(&self) -> AuthMechanism;

    /// Produces the next client response.
    ///
    /// `challenge` is `None` for the initial response and the decoded
    /// server challenge afterwards. An empty response on the first step
    /// means the client waits for a challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge cannot be answered.
    fn next_step(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>>;
}

/// Creates a mechanism instance for the given credentials.
///
/// # Errors
///
/// Returns [`Error::InvalidCredentials`] if the credentials cannot be
/// encoded by this mechanism.
pub fn instantiate(
    kind: AuthMechanism,
    username: &str,
    password: &str,
) -> Result<Box<dyn Mechanism>> {
    Ok(match kind {
        AuthMechanism::Plain => Box::new(Plain::new(username, password)?),
        AuthMechanism::Login => Box::new(Login::new(username, password)),
        AuthMechanism::CramMd5 | AuthMechanism::CramSha1 | AuthMechanism::CramSha256 => {
            Box::new(Cram::new(kind, username, password))
        }
        AuthMechanism::XOAuth2 | AuthMechanism::OAuthBearer => {
            Box::new(Bearer::new(kind, username, password)?)
        }
    })
}

/// PLAIN: `\0username\0password` in the initial response.
pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    /// Creates a PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if either credential contains a NUL byte.
    pub fn new(username: &str, password: &str) -> Result<Self> {
        if username.contains('\0') || password.contains('\0') {
            return Err(Error::InvalidCredentials(
                "PLAIN credentials must not contain NUL".into(),
            ));
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl Mechanism for Plain {
    fn kind(&self) -> AuthMechanism {
        AuthMechanism::Plain
    }

    fn next_step(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        if challenge.is_some() {
            return Ok(Vec::new());
        }
        Ok(format!("\0{}\0{}", self.username, self.password).into_bytes())
    }
}

/// LOGIN: username and password sent as answers to two challenges.
pub struct Login {
    username: String,
    password: String,
    answered: usize,
}

impl Login {
    /// Creates a LOGIN mechanism.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            answered: 0,
        }
    }
}

impl Mechanism for Login {
    fn kind(&self) -> AuthMechanism {
        AuthMechanism::Login
    }

    fn next_step(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        if challenge.is_none() {
            return Ok(Vec::new());
        }
        let response = match self.answered {
            0 => self.username.as_bytes().to_vec(),
            1 => self.password.as_bytes().to_vec(),
            _ => Vec::new(),
        };
        self.answered += 1;
        Ok(response)
    }
}

/// CRAM-*: `username SP hex(HMAC(password, challenge))`.
pub struct Cram {
    kind: AuthMechanism,
    username: String,
    password: String,
}

impl Cram {
    /// Creates a CRAM mechanism; `kind` selects the digest.
    #[must_use]
    pub fn new(kind: AuthMechanism, username: &str, password: &str) -> Self {
        Self {
            kind,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn digest(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let key = self.password.as_bytes();
        match self.kind {
            AuthMechanism::CramSha1 => keyed_digest::<Hmac<Sha1>>(key, challenge),
            AuthMechanism::CramSha256 => keyed_digest::<Hmac<Sha256>>(key, challenge),
            _ => keyed_digest::<Hmac<Md5>>(key, challenge),
        }
    }
}

impl Mechanism for Cram {
    fn kind(&self) -> AuthMechanism {
        self.kind
    }

    fn next_step(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        let Some(challenge) = challenge else {
            return Ok(Vec::new());
        };
        let digest = self.digest(challenge)?;

        let mut response = String::with_capacity(self.username.len() + 1 + digest.len() * 2);
        response.push_str(&self.username);
        response.push(' ');
        for byte in digest {
            let _ = write!(response, "{byte:02x}");
        }
        Ok(response.into_bytes())
    }
}

fn keyed_digest<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::InvalidCredentials("unusable CRAM key".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// XOAUTH2 / OAUTHBEARER: the password is an `OAuth2` access token.
pub struct Bearer {
    kind: AuthMechanism,
    username: String,
    token: String,
}

impl Bearer {
    /// Creates a bearer-token mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the username or token contains `\x01`, the
    /// field separator of both formats.
    pub fn new(kind: AuthMechanism, username: &str, token: &str) -> Result<Self> {
        if username.contains('\x01') || token.contains('\x01') {
            return Err(Error::InvalidCredentials(format!(
                "{kind} credentials must not contain \\x01"
            )));
        }
        Ok(Self {
            kind,
            username: username.to_string(),
            token: token.to_string(),
        })
    }
}

impl Mechanism for Bearer {
    fn kind(&self) -> AuthMechanism {
        self.kind
    }

    fn next_step(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        // A challenge here is the server's JSON error; an empty line makes
        // it send the final failure reply.
        if challenge.is_some() {
            return Ok(Vec::new());
        }
        let response = if self.kind == AuthMechanism::OAuthBearer {
            // RFC 5801 saslname escaping
            let user = self.username.replace('=', "=3D").replace(',', "=2C");
            format!("n,a={user},\x01auth=Bearer {}\x01\x01", self.token)
        } else {
            format!("user={}\x01auth=Bearer {}\x01\x01", self.username, self.token)
        };
        Ok(response.into_bytes())
    }
}
