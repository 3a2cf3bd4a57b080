//! Transport seam for TAK sessions.
//!
//! [`TakConnector`] produces a fresh byte stream per session. Production uses
//! [`TlsTakConnector`] (TCP + rustls with a client certificate); tests plug in
//! an in-memory connector.

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use takbridge_core::config::TakConfig;
use takbridge_core::ConnectionError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Byte stream carrying one TAK session
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

pub type BoxedStream = Box<dyn SessionStream>;

/// Opens the transport for a new session.
#[async_trait]
pub trait TakConnector: Send + Sync {
    async fn connect(&self) -> Result<BoxedStream, ConnectionError>;

    /// Endpoint description for logs
    fn endpoint(&self) -> String;
}

/// Settings for one TAK connection
#[derive(Debug, Clone)]
pub struct TakConnectionConfig {
    /// Announced during session setup
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: Option<PathBuf>,
    pub verify_server: bool,
    pub keepalive_interval: Duration,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl TakConnectionConfig {
    pub fn from_tak(tak: &TakConfig) -> Result<Self, ConnectionError> {
        let (host, port) = tak
            .endpoint_addr()
            .map_err(|e| ConnectionError::InvalidEndpoint {
                endpoint: tak.endpoint.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            connection_id: tak.connection_id.clone(),
            host,
            port,
            cert_file: tak.cert_file.clone(),
            key_file: tak.key_file.clone(),
            ca_file: tak.ca_file.clone(),
            verify_server: tak.verify_server,
            keepalive_interval: tak.keepalive_interval(),
            read_timeout: tak.read_timeout(),
            connect_timeout: tak.connect_timeout(),
            reconnect_base: tak.reconnect_base(),
            reconnect_max: tak.reconnect_max(),
        })
    }

    /// Same endpoint and credentials under another connection id.
    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = connection_id.into();
        self
    }

    /// Settings for tests and in-memory transports.
    pub fn local(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            host: "localhost".to_string(),
            port: 8089,
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            ca_file: None,
            verify_server: true,
            keepalive_interval: Duration::from_secs(15),
            read_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// TCP + rustls connector using the client certificate identity.
pub struct TlsTakConnector {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connect_timeout: Duration,
    connector: TlsConnector,
}

impl TlsTakConnector {
    /// Loads the credentials and builds the TLS configuration once; every
    /// session reuses it.
    pub fn new(config: &TakConnectionConfig) -> Result<Self, ConnectionError> {
        let tls_config = build_tls_config(config)?;
        let server_name = ServerName::try_from(config.host.clone()).map_err(|e| {
            ConnectionError::InvalidEndpoint {
                endpoint: config.host.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            server_name,
            connect_timeout: config.connect_timeout,
            connector: TlsConnector::from(Arc::new(tls_config)),
        })
    }
}

#[async_trait]
impl TakConnector for TlsTakConnector {
    async fn connect(&self) -> Result<BoxedStream, ConnectionError> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let addr = (self.host.as_str(), self.port);

        let tcp = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout { timeout_ms })?
            .map_err(|e| ConnectionError::failed(&self.host, self.port, e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| ConnectionError::failed(&self.host, self.port, e.to_string()))?;

        let tls = timeout(
            self.connect_timeout,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout { timeout_ms })?
        .map_err(|e| ConnectionError::tls_handshake_failed(e.to_string()))?;

        debug!(host = %self.host, port = self.port, "TLS handshake successful");
        Ok(Box::new(tls))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn build_tls_config(config: &TakConnectionConfig) -> Result<RustlsConfig, ConnectionError> {
    let certs = load_certs(&config.cert_file)?;
    let key = load_private_key(&config.key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = RustlsConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::tls_handshake_failed(e.to_string()))?;

    let builder = if config.verify_server {
        let mut root_store = RootCertStore::empty();
        match &config.ca_file {
            Some(ca_file) => {
                for cert in load_certs(ca_file)? {
                    root_store.add(cert).map_err(|e| {
                        ConnectionError::credentials(ca_file.display().to_string(), e.to_string())
                    })?;
                }
                info!(count = root_store.len(), "Loaded custom CA certificate(s)");
            }
            None => {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
        builder.with_root_certificates(root_store)
    } else {
        warn!("Server certificate verification is DISABLED");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
    };

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| ConnectionError::credentials(config.cert_file.display().to_string(), e.to_string()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectionError> {
    let file = File::open(path)
        .map_err(|e| ConnectionError::credentials(path.display().to_string(), e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectionError::credentials(path.display().to_string(), e.to_string()))?;

    if certs.is_empty() {
        return Err(ConnectionError::credentials(
            path.display().to_string(),
            "no certificates found",
        ));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectionError> {
    let file = File::open(path)
        .map_err(|e| ConnectionError::credentials(path.display().to_string(), e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ConnectionError::credentials(path.display().to_string(), e.to_string()))?
        .ok_or_else(|| ConnectionError::credentials(path.display().to_string(), "no private key found"))
}

/// Accepts any server certificate; signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
