//! Trust-on-first-use acceptance of server certificates.

use crate::error::{Error, Result};
use crate::tls::CertificateCollectingVerifier;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

struct TrustState {
    delegate: Arc<WebPkiServerVerifier>,
    roots: RootCertStore,
    trusted_hosts_and_ports: HashSet<(String, u16)>,
}

/// Accepts self-signed or otherwise untrusted certificate chains on demand.
///
/// [`trust`](Self::trust) opens a throwaway TLS connection to a host,
/// collects the certificate chain it presents and, if the chain is not
/// already trusted, rebuilds the trust store to include it. Hosts that have
/// been trusted once are remembered; later connections through a transport
/// configured with [`client_config`](Self::client_config) verify against the
/// augmented store automatically.
///
/// All shared state (the effective verifier delegate, its backing roots and
/// the set of trusted host:port pairs) lives behind a single mutex, so
/// concurrent `trust` calls are individually safe. The network probe itself
/// runs outside the critical section.
pub struct SslCertificateTruster {
    provider: Arc<CryptoProvider>,
    state: Mutex<TrustState>,
}

impl SslCertificateTruster {
    /// Create a truster seeded with the platform's native root certificates.
    pub fn new() -> Result<Self> {
        let native = rustls_native_certs::load_native_certs();
        if !native.errors.is_empty() {
            tracing::debug!(errors = ?native.errors, "some native root certificates failed to load");
        }

        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(native.certs);
        Self::with_root_store(roots)
    }

    /// Create a truster seeded with the bundled Mozilla root certificates.
    pub fn with_webpki_roots() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_root_store(roots)
    }

    /// Create a truster seeded with an explicit root store.
    pub fn with_root_store(roots: RootCertStore) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let delegate = Self::build_delegate(&provider, roots.clone())?;

        Ok(SslCertificateTruster {
            provider,
            state: Mutex::new(TrustState {
                delegate,
                roots,
                trusted_hosts_and_ports: HashSet::new(),
            }),
        })
    }

    /// Accept whatever certificate chain `host:port` presents.
    ///
    /// Idempotent: a pair that has already been trusted returns immediately
    /// with no network activity. Otherwise a throwaway TLS handshake bounded
    /// by `timeout` collects the presented chain. A chain the current
    /// delegate already accepts leaves the trust store untouched; an
    /// untrusted chain is merged with the existing roots and the verifier
    /// delegate is swapped atomically. Either way the pair is then remembered
    /// as trusted.
    ///
    /// Fails with [`Error::TrustTimeout`] when the probe exceeds `timeout`
    /// and with [`Error::CertificateChainUnavailable`] when no chain could be
    /// observed at all (e.g. the connection was refused); in both cases the
    /// trust state is unchanged.
    pub async fn trust(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        if self.is_trusted(host, port) {
            return Ok(());
        }

        tracing::warn!("trusting TLS certificate for {}:{}", host, port);

        let delegate = self.state.lock().delegate.clone();
        let collector = Arc::new(CertificateCollectingVerifier::new(delegate));
        self.probe(host, port, timeout, collector.clone()).await?;

        let chain = collector.collected_certificate_chain().ok_or_else(|| {
            Error::CertificateChainUnavailable {
                host: host.to_string(),
                port,
            }
        })?;

        if !collector.is_trusted() {
            let mut state = self.state.lock();

            let mut roots = RootCertStore::empty();
            let (added, ignored) = roots.add_parsable_certificates(chain);
            if ignored > 0 {
                tracing::debug!(added, ignored, "some collected certificates were not parsable");
            }
            roots.extend(state.roots.roots.iter().cloned());

            let delegate = Self::build_delegate(&self.provider, roots.clone())?;
            state.roots = roots;
            state.delegate = delegate;
        }

        self.state
            .lock()
            .trusted_hosts_and_ports
            .insert((host.to_string(), port));
        tracing::debug!("trusted TLS certificate for {}:{}", host, port);

        Ok(())
    }

    /// Whether `host:port` has already been trusted by this truster.
    pub fn is_trusted(&self, host: &str, port: u16) -> bool {
        self.state
            .lock()
            .trusted_hosts_and_ports
            .contains(&(host.to_string(), port))
    }

    /// Number of root certificates currently accepted by the delegate.
    pub fn accepted_certificate_count(&self) -> usize {
        self.state.lock().roots.len()
    }

    /// A TLS client configuration that verifies servers through this truster,
    /// suitable for installing into the shared transport.
    pub fn client_config(self: Arc<Self>) -> Result<ClientConfig> {
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TrustStore(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(self.clone())
            .with_no_client_auth();
        Ok(config)
    }

    async fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        collector: Arc<CertificateCollectingVerifier>,
    ) -> Result<()> {
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TrustStore(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(collector)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let handshake = async {
            let stream = TcpStream::connect((host, port)).await?;
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            connector.connect(server_name, stream).await?;
            Ok::<(), io::Error>(())
        };

        match tokio::time::timeout(timeout, handshake).await {
            Err(_) => Err(Error::TrustTimeout {
                host: host.to_string(),
                port,
            }),
            Ok(Err(reason)) => {
                // Expected for untrusted servers: the delegate's rejection
                // aborts the handshake after the chain has been recorded.
                tracing::debug!(%host, port, %reason, "certificate collection handshake did not complete");
                Ok(())
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    fn build_delegate(
        provider: &Arc<CryptoProvider>,
        roots: RootCertStore,
    ) -> Result<Arc<WebPkiServerVerifier>> {
        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| Error::TrustStore(e.to_string()))
    }

    fn delegate(&self) -> Arc<WebPkiServerVerifier> {
        self.state.lock().delegate.clone()
    }
}

impl ServerCertVerifier for SslCertificateTruster {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.delegate()
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate().verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate().verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.delegate().supported_verify_schemes()
    }
}

impl fmt::Debug for SslCertificateTruster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SslCertificateTruster")
            .field("accepted_roots", &state.roots.len())
            .field("trusted_hosts", &state.trusted_hosts_and_ports.len())
            .finish()
    }
}
