//! Certificate-collecting verifier used by the trust probe.

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Collected {
    chain: Vec<CertificateDer<'static>>,
    trusted: bool,
}

/// A server-certificate verifier that records the chain a server presents.
///
/// Verification verdicts are taken entirely from the wrapped delegate — the
/// handshake proceeds or fails exactly as it would have without the wrapper.
/// Independently of the verdict, the presented chain and whether the
/// delegate accepted it are captured for later inspection.
///
/// A collector is meant to observe exactly one handshake. Recording a second
/// chain into the same instance panics rather than silently replacing the
/// first, which would hide accidental reuse across concurrent handshakes.
pub struct CertificateCollectingVerifier {
    delegate: Arc<dyn ServerCertVerifier>,
    collected: Mutex<Option<Collected>>,
}

impl CertificateCollectingVerifier {
    /// Wrap a delegate verifier.
    pub fn new(delegate: Arc<dyn ServerCertVerifier>) -> Self {
        CertificateCollectingVerifier {
            delegate,
            collected: Mutex::new(None),
        }
    }

    /// The chain presented by the server, if a handshake has been observed.
    ///
    /// Returns a copy; mutating it does not affect the stored chain.
    pub fn collected_certificate_chain(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.collected.lock().as_ref().map(|c| c.chain.clone())
    }

    /// Whether the delegate accepted the observed chain.
    pub fn is_trusted(&self) -> bool {
        self.collected.lock().as_ref().is_some_and(|c| c.trusted)
    }

    fn record(&self, chain: Vec<CertificateDer<'static>>, trusted: bool) {
        let mut slot = self.collected.lock();
        assert!(
            slot.is_none(),
            "certificate chain has already been collected"
        );
        *slot = Some(Collected { chain, trusted });
    }
}

impl ServerCertVerifier for CertificateCollectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone().into_owned());
        chain.extend(intermediates.iter().map(|c| c.clone().into_owned()));

        let result = self
            .delegate
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        self.record(chain, result.is_ok());

        result
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.delegate.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.delegate.supported_verify_schemes()
    }
}

impl fmt::Debug for CertificateCollectingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCollectingVerifier")
            .field("collected", &self.collected.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AcceptAll;

    impl ServerCertVerifier for AcceptAll {
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
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![SignatureScheme::ED25519]
        }
    }

    fn certificate(bytes: &[u8]) -> CertificateDer<'static> {
        CertificateDer::from(bytes.to_vec())
    }

    #[test]
    fn test_nothing_collected_initially() {
        let collector = CertificateCollectingVerifier::new(Arc::new(AcceptAll));
        assert!(collector.collected_certificate_chain().is_none());
        assert!(!collector.is_trusted());
    }

    #[test]
    fn test_records_chain_and_verdict() {
        let collector = CertificateCollectingVerifier::new(Arc::new(AcceptAll));
        collector.record(vec![certificate(b"leaf"), certificate(b"intermediate")], false);

        let chain = collector.collected_certificate_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert!(!collector.is_trusted());
    }

    #[test]
    #[should_panic(expected = "already been collected")]
    fn test_second_collection_fails_fast() {
        let collector = CertificateCollectingVerifier::new(Arc::new(AcceptAll));
        collector.record(vec![certificate(b"leaf")], true);
        collector.record(vec![certificate(b"other")], true);
    }

    #[test]
    fn test_returned_chain_is_a_defensive_copy() {
        let collector = CertificateCollectingVerifier::new(Arc::new(AcceptAll));
        collector.record(vec![certificate(b"leaf")], true);

        let mut chain = collector.collected_certificate_chain().unwrap();
        chain.push(certificate(b"injected"));

        assert_eq!(collector.collected_certificate_chain().unwrap().len(), 1);
    }
}
