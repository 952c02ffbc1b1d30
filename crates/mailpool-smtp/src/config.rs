//! Client and pool configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};

use crate::types::AuthMechanism;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 25). **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// Whether the client logs in after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPolicy {
    /// Never send AUTH.
    Disabled,
    /// Log in when credentials and a usable mechanism exist, otherwise
    /// continue unauthenticated.
    #[default]
    Optional,
    /// Fail the connection unless login succeeds.
    Required,
}

/// SMTP client configuration.
#[derive(Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Login policy.
    pub login: LoginPolicy,
    /// Username for AUTH.
    pub username: Option<String>,
    /// Password (or access token for the `OAuth2` mechanisms).
    pub password: Option<String>,
    /// Upper-cased names of the mechanisms the client is willing to use.
    /// Empty means any the server advertises.
    pub auth_methods: Vec<String>,
    /// Name sent with EHLO/HELO.
    pub ehlo_hostname: String,
    /// Maximum number of concurrent connections in a pool.
    pub max_pool_size: usize,
    /// Whether released connections are kept for reuse.
    pub keep_alive: bool,
    /// How long an unused connection stays open.
    pub idle_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// TLS client settings for implicit TLS and STARTTLS. `None` verifies
    /// servers against the webpki roots.
    pub tls: Option<Arc<ClientConfig>>,
    /// Accept any server certificate. Ignored when `tls` is set.
    pub trust_all: bool,
}

impl Config {
    /// Default pool capacity.
    pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

    /// Creates a new configuration with STARTTLS on port 587.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Returns true if both username and password are set.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("login", &self.login)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth_methods", &self.auth_methods)
            .field("ehlo_hostname", &self.ehlo_hostname)
            .field("max_pool_size", &self.max_pool_size)
            .field("keep_alive", &self.keep_alive)
            .field("idle_timeout", &self.idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.as_ref().map(|_| "<custom>"))
            .field("trust_all", &self.trust_all)
            .finish()
    }
}

/// Builder for [`Config`].
#[derive(Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    login: LoginPolicy,
    username: Option<String>,
    password: Option<String>,
    auth_methods: Vec<String>,
    ehlo_hostname: String,
    max_pool_size: usize,
    keep_alive: bool,
    idle_timeout: Duration,
    connect_timeout: Duration,
    tls: Option<Arc<ClientConfig>>,
    trust_all: bool,
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("host", &self.host)
            .field("security", &self.security)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::default(),
            login: LoginPolicy::default(),
            username: None,
            password: None,
            auth_methods: Vec::new(),
            ehlo_hostname: "localhost".to_string(),
            max_pool_size: Config::DEFAULT_MAX_POOL_SIZE,
            keep_alive: true,
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            tls: None,
            trust_all: false,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the login policy.
    #[must_use]
    pub const fn login(mut self, login: LoginPolicy) -> Self {
        self.login = login;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Restricts AUTH to the given space separated mechanism names,
    /// e.g. `"CRAM-SHA256 CRAM-MD5"`.
    ///
    /// Names this crate does not implement still count: a list made only
    /// of them allows nothing.
    #[must_use]
    pub fn auth_methods(mut self, methods: &str) -> Self {
        self.auth_methods = AuthMechanism::parse_names(methods);
        self
    }

    /// Sets the name sent with EHLO.
    #[must_use]
    pub fn ehlo_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.ehlo_hostname = hostname.into();
        self
    }

    /// Sets the pool capacity. Values below one are raised to one.
    #[must_use]
    pub const fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = if size == 0 { 1 } else { size };
        self
    }

    /// Enables or disables connection reuse.
    #[must_use]
    pub const fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Sets how long idle connections are kept.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Uses these TLS client settings instead of the webpki roots.
    #[must_use]
    pub fn tls_config(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Verifies servers against `roots` only.
    #[must_use]
    pub fn root_certificates(self, roots: RootCertStore) -> Self {
        let tls = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        self.tls_config(Arc::new(tls))
    }

    /// Accepts any server certificate. **Only for test servers.**
    #[must_use]
    pub const fn trust_all(mut self, enabled: bool) -> Self {
        self.trust_all = enabled;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            login: self.login,
            username: self.username,
            password: self.password,
            auth_methods: self.auth_methods,
            ehlo_hostname: self.ehlo_hostname,
            max_pool_size: self.max_pool_size,
            keep_alive: self.keep_alive,
            idle_timeout: self.idle_timeout,
            connect_timeout: self.connect_timeout,
            tls: self.tls,
            trust_all: self.trust_all,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::StartTls.default_port(), 587);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn defaults() {
        let config = Config::new("smtp.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.login, LoginPolicy::Optional);
        assert_eq!(config.max_pool_size, 10);
        assert!(config.keep_alive);
        assert!(!config.has_credentials());
        assert!(config.auth_methods.is_empty());
        assert!(config.tls.is_none());
        assert!(!config.trust_all);
    }

    #[test]
    fn builder_sets_everything() {
        let config = Config::builder("smtp.example.com")
            .security(Security::Implicit)
            .login(LoginPolicy::Required)
            .credentials("user", "secret")
            .auth_methods("CRAM-SHA256 cram-md5 NTLM")
            .ehlo_hostname("client.example.com")
            .max_pool_size(2)
            .keep_alive(false)
            .idle_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.port, 465);
        assert!(config.has_credentials());
        assert_eq!(config.auth_methods, vec!["CRAM-SHA256", "CRAM-MD5", "NTLM"]);
        assert_eq!(config.ehlo_hostname, "client.example.com");
        assert_eq!(config.max_pool_size, 2);
        assert!(!config.keep_alive);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn explicit_port_wins() {
        let config = Config::builder("smtp.example.com")
            .security(Security::None)
            .port(2525)
            .build();
        assert_eq!(config.port, 2525);
    }

    #[test]
    fn zero_pool_size_is_raised() {
        let config = Config::builder("smtp.example.com").max_pool_size(0).build();
        assert_eq!(config.max_pool_size, 1);
    }

    #[test]
    fn unknown_only_allow_list_is_not_empty() {
        let config = Config::builder("smtp.example.com")
            .auth_methods("DIGEST-MD5")
            .build();
        assert_eq!(config.auth_methods, vec!["DIGEST-MD5"]);
    }

    #[test]
    fn trust_settings() {
        let config = Config::builder("smtp.example.com")
            .root_certificates(RootCertStore::empty())
            .trust_all(true)
            .build();
        assert!(config.tls.is_some());
        assert!(config.trust_all);
        assert!(format!("{config:?}").contains("<custom>"));
    }

    #[test]
    fn debug_hides_password() {
        let config = Config::builder("smtp.example.com")
            .credentials("user", "hunter2")
            .build();
        let shown = format!("{config:?}");
        assert!(shown.contains("user"));
        assert!(!shown.contains("hunter2"));
    }
}
