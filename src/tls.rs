//! Ephemeral TLS identity
//!
//! Generates a throwaway RSA-2048 self-signed certificate at startup and
//! builds a `rustls::ServerConfig` from it. There is no certificate
//! persistence and no client authentication: this gateway terminates TLS
//! purely to keep remote-desktop credentials off the wire between the
//! client and this process, not to establish trust in either direction.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::EncodePrivateKey;
use std::fmt;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

#[derive(Debug)]
pub enum TlsError {
    KeyGeneration(rsa::Error),
    KeyEncoding(rsa::pkcs8::Error),
    CertGeneration(rcgen::Error),
    ServerConfig(tokio_rustls::rustls::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::KeyGeneration(e) => write!(f, "failed to generate RSA key: {}", e),
            TlsError::KeyEncoding(e) => write!(f, "failed to encode RSA key as PKCS8: {}", e),
            TlsError::CertGeneration(e) => write!(f, "failed to generate self-signed certificate: {}", e),
            TlsError::ServerConfig(e) => write!(f, "failed to build TLS server config: {}", e),
        }
    }
}

impl std::error::Error for TlsError {}

pub type Result<T> = std::result::Result<T, TlsError>;

/// Build a `TlsAcceptor` wrapping a freshly generated RSA-2048 self-signed
/// certificate. `subject_alt_names` should include the bind address the
/// listener will accept connections on.
pub fn ephemeral_acceptor(subject_alt_names: Vec<String>) -> Result<TlsAcceptor> {
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    let mut rng = rand::rngs::OsRng;
    let rsa_key = rsa::RsaPrivateKey::new(&mut rng, 2048).map_err(TlsError::KeyGeneration)?;
    let pkcs8_der = rsa_key.to_pkcs8_der().map_err(TlsError::KeyEncoding)?;

    let key_pair = KeyPair::from_der(pkcs8_der.as_bytes()).map_err(TlsError::CertGeneration)?;

    let mut params = CertificateParams::new(subject_alt_names).map_err(TlsError::CertGeneration)?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "session-gateway");
    name.push(DnType::OrganizationName, "session-gateway");
    name.push(DnType::CountryName, "FI");
    name.push(DnType::LocalityName, "Helsinki");
    params.distinguished_name = name;

    let cert = params.self_signed(&key_pair).map_err(TlsError::CertGeneration)?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der()).map_err(|e| {
        TlsError::ServerConfig(tokio_rustls::rustls::Error::General(e.to_string()))
    })?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(TlsError::ServerConfig)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_acceptor_succeeds_with_ip_san() {
        ephemeral_acceptor(vec!["127.0.0.1".into()]).unwrap();
    }

    #[test]
    fn ephemeral_acceptor_succeeds_with_dns_san() {
        ephemeral_acceptor(vec!["localhost".into()]).unwrap();
    }
}
