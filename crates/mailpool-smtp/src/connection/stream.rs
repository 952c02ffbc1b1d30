//! Low-level SMTP streams and the transport factory used by the pool.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::warn;

use crate::config::{Config, Security};
use crate::error::{Error, Result};

/// Opens transport sessions to one SMTP endpoint.
///
/// The pool calls [`connect`](Self::connect) for every new connection and
/// [`shutdown`](Self::shutdown) once after its last connection closed.
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new stream to the server.
    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Upgrades a plaintext stream after a successful `STARTTLS`.
    ///
    /// The default refuses the upgrade.
    fn upgrade(&self, _stream: Self::Stream) -> impl Future<Output = Result<Self::Stream>> + Send {
        std::future::ready(Err(Error::NotSupported("STARTTLS".into())))
    }

    /// Releases connector resources once the pool has drained.
    fn shutdown(&self) {}
}

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS-encrypted connection.
    Tls(Box<TlsStream<TcpStream>>),
}

impl SmtpStream {
    /// Upgrades a TCP stream to TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already TLS or the handshake fails.
    pub async fn upgrade_to_tls(self, connector: &TlsConnector, hostname: &str) -> Result<Self> {
        let tcp_stream = match self {
            Self::Tcp(stream) => stream,
            Self::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let tls_stream = connector.connect(server_name(hostname)?, tcp_stream).await?;
        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connector for a real server over TCP, optionally with implicit TLS.
#[derive(Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    security: Security,
    connect_timeout: Duration,
    tls: TlsConnector,
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl TcpConnector {
    /// Creates a connector for the endpoint in `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            security: config.security,
            connect_timeout: config.connect_timeout,
            tls: tls_connector_for(config),
        }
    }

    async fn open(&self) -> Result<SmtpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp_stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(addr))??;

        match self.security {
            Security::Implicit => {
                let tls_stream = self
                    .tls
                    .connect(server_name(&self.host)?, tcp_stream)
                    .await?;
                Ok(SmtpStream::Tls(Box::new(tls_stream)))
            }
            Security::None | Security::StartTls => Ok(SmtpStream::Tcp(tcp_stream)),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = SmtpStream;

    fn connect(&self) -> impl Future<Output = Result<SmtpStream>> + Send {
        self.open()
    }

    fn upgrade(&self, stream: SmtpStream) -> impl Future<Output = Result<SmtpStream>> + Send {
        async move { stream.upgrade_to_tls(&self.tls, &self.host).await }
    }
}

fn server_name(hostname: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))
}

/// Creates a TLS connector with the webpki root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Creates the TLS connector `config` asks for: its own client settings,
/// a verifier that accepts any certificate, or the webpki roots.
#[must_use]
pub fn tls_connector_for(config: &Config) -> TlsConnector {
    if let Some(tls) = &config.tls {
        return TlsConnector::from(Arc::clone(tls));
    }
    if !config.trust_all {
        return create_tls_connector();
    }

    warn!(host = %config.host, "TLS certificate verification is disabled");
    let builder = ClientConfig::builder();
    let verifier = danger::AcceptAnyCertificate::new(Arc::clone(builder.crypto_provider()));
    let tls = builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(tls))
}

mod danger {
    use std::sync::Arc;

    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::crypto::{
        CryptoProvider, verify_tls12_signature, verify_tls13_signature,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Skips certificate validation but still checks handshake signatures.
    #[derive(Debug)]
    pub struct AcceptAnyCertificate {
        provider: Arc<CryptoProvider>,
    }

    impl AcceptAnyCertificate {
        pub const fn new(provider: Arc<CryptoProvider>) -> Self {
            Self { provider }
        }
    }

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
