//! # mailpool-smtp
//!
//! Pooled SMTP submission client with SASL authentication (RFC 5321,
//! RFC 4954).
//!
//! ## Features
//!
//! - **Connection pool**: bounded size, strict FIFO waiting, `RSET` probe
//!   before every reuse, idle expiry and graceful drain on close
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5, CRAM-SHA1, CRAM-SHA256,
//!   XOAUTH2, OAUTHBEARER, picked by a fixed preference order
//! - **TLS support**: Both implicit TLS (port 465) and STARTTLS
//! - **Credential hygiene**: AUTH lines are logged with the secret masked
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpool_smtp::{Config, Pool, Security};
//! use mailpool_smtp::command::Command;
//!
//! #[tokio::main]
//! async fn main() -> mailpool_smtp::Result<()> {
//!     let config = Config::builder("smtp.example.com")
//!         .security(Security::StartTls)
//!         .credentials("user@example.com", "password")
//!         .max_pool_size(4)
//!         .build();
//!     let pool = Pool::with_config(config);
//!
//!     let mut conn = pool.acquire().await?;
//!     let reply = conn.command(&Command::Noop).await?;
//!     println!("{reply}");
//!     pool.release(conn);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Authentication States
//!
//! ```text
//! ┌──────┐  start()  ┌───────────┐     ┌───────────────┐  2xx  ┌─────────┐
//! │ Init │ ────────→ │ Selecting │ ──→ │ Exchanging(n) │ ────→ │ Success │
//! └──────┘           └───────────┘     └───────────────┘       └─────────┘
//!                          │              │   ↑ 334
//!                          │              └───┘
//!                          └──────────────→ Failure ←── 4xx/5xx
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: SASL mechanisms and the AUTH state machine
//! - [`command`]: SMTP command lines and log redaction
//! - [`config`]: Pool and session configuration
//! - [`connection`]: Transport, handshake and pooled connections
//! - [`parser`]: Reply parser and classifier
//! - [`pool`]: The connection pool
//! - [`types`]: Core SMTP types (extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod parser;
pub mod pool;
pub mod types;

pub use auth::{AuthOutcome, AuthState, Authenticator, authenticate};
pub use config::{Config, ConfigBuilder, LoginPolicy, Security};
pub use connection::{
    Connection, ConnectionId, Connector, ServerInfo, SmtpStream, Status, TcpConnector, Transport,
};
pub use error::{Error, Result};
pub use pool::{DrainCallback, Pool, PooledConnection};
pub use types::{AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};
