//! Node identity and TLS configuration.
//!
//! Both directions of the link use mutual TLS 1.3: the node presents the
//! same certificate as a server and as a client, and only accepts peers
//! whose certificate chains to the configured peer CA.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// The only protocol version either side will negotiate.
pub static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to read {origin}: {source}")]
    Read {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PEM in {origin}: {source}")]
    Pem {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),

    #[error("Unusable trust anchor in {origin}: {source}")]
    TrustAnchor {
        origin: String,
        #[source]
        source: rustls::Error,
    },

    #[error("Failed to build client certificate verifier: {0}")]
    Verifier(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// How the dialing side checks the listening peer's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVerification {
    /// Chain must lead to the peer CA and match the dialed host
    Verified,
    /// Accept any server certificate (self-signed deployments). The client
    /// still authenticates itself, and the peer still verifies it.
    Insecure,
}

impl ServerVerification {
    pub fn from_insecure_flag(insecure: bool) -> Self {
        if insecure {
            ServerVerification::Insecure
        } else {
            ServerVerification::Verified
        }
    }
}

/// Certificate chain, private key and trusted peer CA for one node.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    trusted: Arc<RootCertStore>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("cert_chain_len", &self.cert_chain.len())
            .field("trusted_roots", &self.trusted.len())
            .finish()
    }
}

impl Identity {
    /// Load PEM files from disk.
    pub fn load(cert: &Path, key: &Path, peer_ca: &Path) -> Result<Self, IdentityError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| IdentityError::Read {
                origin: path.display().to_string(),
                source,
            })
        };

        let cert_pem = read(cert)?;
        let key_pem = read(key)?;
        let ca_pem = read(peer_ca)?;

        Self::parse(
            (&cert_pem, &cert.display().to_string()),
            (&key_pem, &key.display().to_string()),
            (&ca_pem, &peer_ca.display().to_string()),
        )
    }

    /// Build from in-memory PEM data.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<Self, IdentityError> {
        Self::parse(
            (cert_pem, "certificate"),
            (key_pem, "private key"),
            (ca_pem, "peer CA"),
        )
    }

    fn parse(
        (cert_pem, cert_origin): (&[u8], &str),
        (key_pem, key_origin): (&[u8], &str),
        (ca_pem, ca_origin): (&[u8], &str),
    ) -> Result<Self, IdentityError> {
        let cert_chain = load_certs(cert_pem, cert_origin)?;
        let key = load_private_key(key_pem, key_origin)?;

        let mut roots = RootCertStore::empty();
        for ca in load_certs(ca_pem, ca_origin)? {
            roots.add(ca).map_err(|source| IdentityError::TrustAnchor {
                origin: ca_origin.to_string(),
                source,
            })?;
        }

        Ok(Self {
            cert_chain,
            key,
            trusted: Arc::new(roots),
        })
    }

    /// Server side: require a client certificate signed by the peer CA.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, IdentityError> {
        let provider = crypto_provider();
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::clone(&self.trusted), Arc::clone(&provider))
                .build()
                .map_err(|e| IdentityError::Verifier(e.to_string()))?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }

    /// Client side: present our certificate, check the server per `verification`.
    pub fn client_config(
        &self,
        verification: ServerVerification,
    ) -> Result<Arc<ClientConfig>, IdentityError> {
        let provider = crypto_provider();
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(PROTOCOL_VERSIONS)?;

        let builder = match verification {
            ServerVerification::Verified => builder.with_root_certificates(Arc::clone(&self.trusted)),
            ServerVerification::Insecure => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider))),
        };

        let mut config = builder.with_client_auth_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Loads certificates from PEM-encoded data.
pub fn load_certs(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityError::Pem {
            origin: origin.to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(IdentityError::NoCertificates(origin.to_string()));
    }
    Ok(certs)
}

/// Loads the first private key (PKCS#8, PKCS#1 or SEC1) from PEM-encoded data.
pub fn load_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>, IdentityError> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|source| IdentityError::Pem {
            origin: origin.to_string(),
            source,
        })?
        .ok_or_else(|| IdentityError::NoPrivateKey(origin.to_string()))
}

/// Skips server certificate checks but still validates handshake signatures.
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
