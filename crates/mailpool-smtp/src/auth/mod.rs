//! SMTP AUTH (RFC 4954).
//!
//! [`Authenticator`] is the exchange as a state machine: it never touches
//! the network, it only says which line to send next and consumes the
//! replies it is given. [`authenticate`] drives it over a [`Transport`].
//!
//! ```text
//! Init ── start() ──→ Selecting ──→ Exchanging(0) ── 334 ──→ Exchanging(n+1)
//!   │                     │               │
//!   └──→ Success          └──→ Failure    ├── 2xx ──→ Success
//!       (AUTH skipped)                    └── other ─→ Failure
//! ```

mod mechanism;
mod select;

pub use mechanism::{Bearer, Cram, Login, Mechanism, Plain, instantiate};
pub use select::{PRIORITY, choose, selectable};

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::{Config, LoginPolicy};
use crate::connection::Transport;
use crate::error::{Error, Result};
use crate::parser::parse_reply;
use crate::types::{AuthMechanism, Reply, ReplyClass};

/// Where an [`Authenticator`] is in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing sent yet.
    Init,
    /// Picking a mechanism.
    Selecting,
    /// Waiting for the reply to the line sent in this round.
    Exchanging {
        /// Zero for the `AUTH` line, then one per continuation.
        round: u32,
    },
    /// Logged in, or login skipped.
    Success,
    /// Gave up; the error was returned to the caller.
    Failure,
}

/// How a successful session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Login was not attempted.
    Skipped,
    /// The server accepted this mechanism.
    Authenticated(AuthMechanism),
}

/// What the caller must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this line and feed the reply to [`Authenticator::advance`].
    Send(Command),
    /// The session is over.
    Done(AuthOutcome),
}

/// AUTH exchange for one connection.
pub struct Authenticator {
    login: LoginPolicy,
    username: Option<String>,
    password: Option<String>,
    allowed: BTreeSet<String>,
    mechanism: Option<Box<dyn Mechanism>>,
    state: AuthState,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("login", &self.login)
            .field("allowed", &self.allowed)
            .field("mechanism", &self.mechanism.as_ref().map(|m| m.kind()))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates a session for a server advertising the mechanism names
    /// `advertised`.
    #[must_use]
    pub fn new<A: AsRef<str>>(config: &Config, advertised: &[A]) -> Self {
        Self {
            login: config.login,
            username: config.username.clone(),
            password: config.password.clone(),
            allowed: selectable(advertised, &config.auth_methods),
            mechanism: None,
            state: AuthState::Init,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Mechanism names usable with this server, including ones this crate
    /// cannot run.
    #[must_use]
    pub const fn allowed(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    /// Decides whether to log in and, if so, produces the `AUTH` line.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when login is required but impossible,
    /// or [`Error::InvalidState`] if the session already started.
    pub fn start(&mut self) -> Result<Action> {
        if self.state != AuthState::Init {
            return Err(Error::InvalidState(format!(
                "AUTH already started ({:?})",
                self.state
            )));
        }

        if self.login == LoginPolicy::Disabled {
            return Ok(self.succeed(AuthOutcome::Skipped));
        }
        let required = self.login == LoginPolicy::Required;

        let (Some(username), Some(password)) = (self.username.take(), self.password.take())
        else {
            return if required {
                self.fail(Error::MissingCredentials)
            } else {
                Ok(self.succeed(AuthOutcome::Skipped))
            };
        };

        if self.allowed.is_empty() {
            return if required {
                self.fail(Error::NoUsableMechanism)
            } else {
                debug!("no usable AUTH mechanism, continuing without login");
                Ok(self.succeed(AuthOutcome::Skipped))
            };
        }

        self.state = AuthState::Selecting;
        let mut mechanism = match choose(&username, &password, &self.allowed) {
            Ok(Some(mechanism)) => mechanism,
            Ok(None) => {
                warn!(allowed = ?self.allowed, "cannot find supported AUTH method");
                return self.fail(Error::NoSupportedMechanism);
            }
            Err(e) => {
                warn!(error = %e, "AUTH mechanism rejected the credentials");
                return self.fail(e);
            }
        };

        let initial = match mechanism.next_step(None) {
            Ok(initial) => initial,
            Err(e) => return self.fail(e),
        };
        let command = Command::Auth {
            mechanism: mechanism.kind(),
            initial_response: (!initial.is_empty()).then(|| STANDARD.encode(initial)),
        };

        self.mechanism = Some(mechanism);
        self.state = AuthState::Exchanging { round: 0 };
        Ok(Action::Send(command))
    }

    /// Consumes the server reply to the last line sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the server rejects the exchange, a
    /// protocol error for an undecodable challenge, or
    /// [`Error::InvalidState`] outside the exchanging state.
    pub fn advance(&mut self, reply: &Reply) -> Result<Action> {
        let AuthState::Exchanging { round } = self.state else {
            return Err(Error::InvalidState(format!(
                "no AUTH reply expected ({:?})",
                self.state
            )));
        };
        let Some(kind) = self.mechanism.as_ref().map(|m| m.kind()) else {
            return Err(Error::InvalidState("AUTH mechanism missing".into()));
        };

        match reply.class() {
            ReplyClass::Success => {
                self.mechanism = None;
                Ok(self.succeed(AuthOutcome::Authenticated(kind)))
            }
            ReplyClass::Failure => self.fail(Error::Auth {
                mechanism: kind,
                reply: format!("{} {}", reply.code, reply.message_text()),
            }),
            ReplyClass::Continue => match self.respond(reply) {
                Ok(response) => {
                    self.state = AuthState::Exchanging { round: round + 1 };
                    Ok(Action::Send(Command::AuthResponse(STANDARD.encode(response))))
                }
                Err(e) => self.fail(e),
            },
        }
    }

    /// Like [`advance`](Self::advance), for a single raw status line.
    ///
    /// # Errors
    ///
    /// See [`advance`](Self::advance); an unparseable line fails the session.
    pub fn advance_line(&mut self, line: &str) -> Result<Action> {
        match parse_reply(&[line.to_string()]) {
            Ok(reply) => self.advance(&reply),
            Err(e) => self.fail(e),
        }
    }

    fn respond(&mut self, reply: &Reply) -> Result<Vec<u8>> {
        let encoded = reply.message.last().map_or("", |text| text.trim());
        let challenge = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Protocol(format!("Invalid AUTH challenge {encoded:?}: {e}")))?;
        let mechanism = self
            .mechanism
            .as_mut()
            .ok_or_else(|| Error::InvalidState("AUTH mechanism missing".into()))?;
        mechanism.next_step(Some(&challenge))
    }

    fn succeed(&mut self, outcome: AuthOutcome) -> Action {
        self.state = AuthState::Success;
        Action::Done(outcome)
    }

    fn fail<T>(&mut self, error: Error) -> Result<T> {
        self.state = AuthState::Failure;
        self.mechanism = None;
        Err(error)
    }
}

/// Runs the AUTH exchange on an established transport.
///
/// # Errors
///
/// Returns the first configuration, protocol or transport error.
pub async fn authenticate<S, A>(
    transport: &mut Transport<S>,
    advertised: &[A],
    config: &Config,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
    A: AsRef<str>,
{
    let mut session = Authenticator::new(config, advertised);
    let mut action = session.start()?;
    loop {
        match action {
            Action::Done(outcome) => {
                debug!(?outcome, "AUTH finished");
                return Ok(outcome);
            }
            Action::Send(command) => {
                let reply = transport.send_command(&command).await?;
                debug!(%reply, "AUTH command result");
                action = session.advance(&reply)?;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::AuthMechanism::{CramMd5, Login, Plain};

    fn config(login: LoginPolicy) -> Config {
        Config::builder("smtp.example.com")
            .login(login)
            .credentials("user", "secret")
            .build()
    }

    fn no_credentials(login: LoginPolicy) -> Config {
        Config::builder("smtp.example.com").login(login).build()
    }

    #[test]
    fn disabled_always_skips() {
        for cfg in [config(LoginPolicy::Disabled), no_credentials(LoginPolicy::Disabled)] {
            let mut auth = Authenticator::new(&cfg, &[] as &[&str]);
            assert_eq!(auth.start().unwrap(), Action::Done(AuthOutcome::Skipped));
            assert_eq!(auth.state(), AuthState::Success);
        }
    }

    #[test]
    fn optional_without_credentials_skips() {
        let mut auth = Authenticator::new(&no_credentials(LoginPolicy::Optional), &[Plain]);
        assert_eq!(auth.start().unwrap(), Action::Done(AuthOutcome::Skipped));
    }

    #[test]
    fn required_without_credentials_fails() {
        let mut auth = Authenticator::new(&no_credentials(LoginPolicy::Required), &[Plain]);
        assert!(matches!(auth.start(), Err(Error::MissingCredentials)));
        assert_eq!(auth.state(), AuthState::Failure);
    }

    #[test]
    fn allow_list_mismatch() {
        let required = Config::builder("smtp.example.com")
            .login(LoginPolicy::Required)
            .credentials("user", "secret")
            .auth_methods("CRAM-MD5")
            .build();
        let mut auth = Authenticator::new(&required, &[Login]);
        assert!(auth.allowed().is_empty());
        assert!(matches!(auth.start(), Err(Error::NoUsableMechanism)));

        let optional = Config {
            login: LoginPolicy::Optional,
            ..required
        };
        let mut auth = Authenticator::new(&optional, &[Login]);
        assert_eq!(auth.start().unwrap(), Action::Done(AuthOutcome::Skipped));
    }

    #[test]
    fn unimplemented_allow_list_sends_nothing() {
        let required = Config::builder("smtp.example.com")
            .login(LoginPolicy::Required)
            .credentials("user", "secret")
            .auth_methods("DIGEST-MD5")
            .build();
        let mut auth = Authenticator::new(&required, &[Plain, Login]);
        assert!(auth.allowed().is_empty());
        assert!(matches!(auth.start(), Err(Error::NoUsableMechanism)));

        let optional = Config {
            login: LoginPolicy::Optional,
            ..required
        };
        let mut auth = Authenticator::new(&optional, &[Plain, Login]);
        assert_eq!(auth.start().unwrap(), Action::Done(AuthOutcome::Skipped));
    }

    #[test]
    fn only_unimplemented_mechanisms_advertised() {
        for login in [LoginPolicy::Optional, LoginPolicy::Required] {
            let mut auth = Authenticator::new(&config(login), &["GSSAPI", "NTLM"]);
            assert_eq!(auth.allowed().len(), 2);
            assert!(matches!(auth.start(), Err(Error::NoSupportedMechanism)));
            assert_eq!(auth.state(), AuthState::Failure);
        }
    }

    #[test]
    fn multi_line_rejection_keeps_all_text() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Plain]);
        auth.start().unwrap();
        let reply = parse_reply(&[
            "535-5.7.8 Username and Password not accepted.".to_string(),
            "535 5.7.8 https://support.example.com/auth".to_string(),
        ])
        .unwrap();
        let Err(Error::Auth { reply, .. }) = auth.advance(&reply) else {
            panic!("expected AUTH rejection");
        };
        assert_eq!(
            reply,
            "535 5.7.8 Username and Password not accepted.\n5.7.8 https://support.example.com/auth"
        );
    }

    #[test]
    fn invalid_credentials_fail_selection() {
        let cfg = Config::builder("smtp.example.com")
            .credentials("user", "sec\0ret")
            .build();
        let mut auth = Authenticator::new(&cfg, &[Plain]);
        assert!(matches!(auth.start(), Err(Error::InvalidCredentials(_))));
        assert_eq!(auth.state(), AuthState::Failure);
    }

    #[test]
    fn plain_sends_initial_response_inline() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Plain]);
        let Action::Send(command) = auth.start().unwrap() else {
            panic!("expected AUTH line");
        };
        assert_eq!(command.line(), "AUTH PLAIN AHVzZXIAc2VjcmV0");
        assert_eq!(command.display_redacted(), "AUTH PLAIN <redacted>");

        let done = auth.advance_line("235 2.7.0 Accepted").unwrap();
        assert_eq!(done, Action::Done(AuthOutcome::Authenticated(Plain)));
    }

    #[test]
    fn two_round_exchange() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[CramMd5]);
        let Action::Send(first) = auth.start().unwrap() else {
            panic!("expected AUTH line");
        };
        assert_eq!(first, Command::Auth {
            mechanism: CramMd5,
            initial_response: None
        });

        // "abcd" from the fourth character on
        let Action::Send(second) = auth.advance_line("334 YWJjZA==").unwrap() else {
            panic!("expected continuation");
        };
        assert!(matches!(second, Command::AuthResponse(_)));
        assert_eq!(auth.state(), AuthState::Exchanging { round: 1 });

        let done = auth.advance_line("235 ok").unwrap();
        assert_eq!(done, Action::Done(AuthOutcome::Authenticated(CramMd5)));
    }

    #[test]
    fn rejection_names_mechanism_and_line() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Plain]);
        auth.start().unwrap();
        let err = auth
            .advance_line("535 5.7.8 Authentication credentials invalid")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "AUTH PLAIN failed: 535 5.7.8 Authentication credentials invalid"
        );
    }

    #[test]
    fn undecodable_challenge_fails() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Login]);
        auth.start().unwrap();
        assert!(matches!(
            auth.advance_line("334 not base64!"),
            Err(Error::Protocol(_))
        ));
        assert_eq!(auth.state(), AuthState::Failure);
    }

    #[test]
    fn terminal_states_reject_input() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Plain]);
        auth.start().unwrap();
        auth.advance_line("235 ok").unwrap();

        assert!(matches!(auth.advance_line("235 ok"), Err(Error::InvalidState(_))));
        assert!(matches!(auth.start(), Err(Error::InvalidState(_))));

        let mut failed = Authenticator::new(&no_credentials(LoginPolicy::Required), &[Plain]);
        assert!(failed.start().is_err());
        assert!(matches!(failed.advance_line("235 ok"), Err(Error::InvalidState(_))));
    }

    #[test]
    fn advance_before_start_is_rejected() {
        let mut auth = Authenticator::new(&config(LoginPolicy::Required), &[Plain]);
        assert!(matches!(auth.advance_line("334 "), Err(Error::InvalidState(_))));
        assert_eq!(auth.state(), AuthState::Init);
    }
}
