//! Trust-on-first-use TLS support.
//!
//! Cloud Foundry installations are frequently deployed with self-signed
//! certificates. Rather than disabling verification wholesale, the
//! [`SslCertificateTruster`] lets a caller explicitly accept the certificate
//! chain a specific `host:port` presents: a throwaway handshake collects the
//! chain through a [`CertificateCollectingVerifier`], the trust store is
//! rebuilt to include it, and the pair is remembered so later calls are
//! no-ops. The truster plugs into the shared transport via
//! [`SslCertificateTruster::client_config`].
//!
//! This sits entirely outside the per-request hot path; it only runs during
//! connection setup.

mod collector;
mod truster;

pub use collector::CertificateCollectingVerifier;
pub use truster::SslCertificateTruster;
