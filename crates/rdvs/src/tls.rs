use crate::error::RdvsError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from PEM files.
///
/// `cert_path` holds the certificate chain, leaf first. The private key is
/// read from `key_path`, or from `cert_path` when no separate key file is
/// given.
///
/// # Errors
///
/// Returns an error if a file cannot be read, holds no certificate or key,
/// or the key does not match the certificate.
pub fn load_acceptor(cert_path: &Path, key_path: Option<&Path>) -> Result<TlsAcceptor, RdvsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path.unwrap_or(cert_path))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RdvsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(RdvsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, RdvsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| RdvsError::NoPrivateKey(path.to_path_buf()))
}
