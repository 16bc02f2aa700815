//! TLS setup for both ends of the protocol.
//!
//! The server loads a PEM certificate chain and private key into a
//! [`TlsAcceptor`]. The client builds a [`TlsConnector`] that validates the
//! server against the webpki roots (plus an optional CA bundle), or, when
//! validation is explicitly disabled, accepts any certificate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::WireError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_error(e: impl std::fmt::Display) -> WireError {
    WireError::Tls {
        message: e.to_string(),
    }
}

/// Read every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, WireError> {
    let file = File::open(path).map_err(|e| WireError::Tls {
        message: format!("Failed to open certificate file {}: {}", path.display(), e),
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| WireError::Tls {
            message: format!("Failed to parse certificates in {}: {}", path.display(), e),
        })?;

    if certs.is_empty() {
        return Err(WireError::Tls {
            message: format!("No certificates found in {}", path.display()),
        });
    }

    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, WireError> {
    let file = File::open(path).map_err(|e| WireError::Tls {
        message: format!("Failed to open key file {}: {}", path.display(), e),
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| WireError::Tls {
            message: format!("Failed to parse private key in {}: {}", path.display(), e),
        })?
        .ok_or_else(|| WireError::Tls {
            message: format!("No private key found in {}", path.display()),
        })
}

/// Build the server-side acceptor from a certificate and key pair.
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, WireError> {
    let certs = load_certs(&config.cert_file)?;
    let key = load_private_key(&config.key_file)?;

    let server_config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Build the client-side connector.
///
/// `validate_cert = false` installs a verifier that accepts any server
/// certificate. Handshake signatures are still checked, so the session is
/// encrypted, but the server is not authenticated.
pub fn connector(validate_cert: bool, ca_file: Option<&Path>) -> Result<TlsConnector, WireError> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?;

    let client_config = if validate_cert {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = ca_file {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(tls_error)?;
            }
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Server name presented in the TLS handshake (DNS name or IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>, WireError> {
    ServerName::try_from(host.to_string()).map_err(|e| WireError::Tls {
        message: format!("Invalid server name '{}': {}", host, e),
    })
}

/// Certificate verifier for self-signed deployments.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
