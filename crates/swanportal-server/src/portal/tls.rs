//! TLS certificate holder with hot reload.
//!
//! Handshakes resolve the certificate through a read lock; a periodic
//! refresh re-reads the PEM files from disk and swaps the parsed pair in
//! under the write lock, so renewed certificates are picked up without a
//! restart.

use std::io::BufReader;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::error::ServerError;

/// Reloadable certificate source for the TLS listener.
pub struct CertificateStore {
    certificate_path: String,
    private_key_path: String,
    current: RwLock<Option<Arc<CertifiedKey>>>,
}

impl CertificateStore {
    /// Create a store; call [`load`](Self::load) before serving.
    pub fn new(certificate_path: impl Into<String>, private_key_path: impl Into<String>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
            current: RwLock::new(None),
        }
    }

    /// Re-read certificate and key from disk and swap them in.
    pub fn load(&self) -> Result<(), ServerError> {
        let certs = load_certs(&self.certificate_path)?;
        let key = load_private_key(&self.private_key_path)?;
        let signing_key =
            any_supported_type(&key).map_err(|_| ServerError::Config("unsupported key type".into()))?;
        let certified = Arc::new(CertifiedKey::new(certs, signing_key));

        *self.current.write() = Some(certified);
        Ok(())
    }

    /// Whether a certificate has been loaded.
    pub fn has_certificate(&self) -> bool {
        self.current.read().is_some()
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("certificate_path", &self.certificate_path)
            .field("loaded", &self.has_certificate())
            .finish()
    }
}

impl ResolvesServerCert for CertificateStore {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.current.read().clone()
    }
}

/// Build a rustls server configuration around the store.
pub fn server_config(store: Arc<CertificateStore>) -> rustls::ServerConfig {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(store);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    config
}

/// Load certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect::<Vec<_>>();
    if certs.is_empty() {
        return Err(ServerError::Config(format!("no certificates in {path}")));
    }
    Ok(certs)
}

/// Load a private key from a PEM file.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Some(rustls_pemfile::Item::Sec1Key(key)) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Some(_) => continue,
            None => break,
        }
    }
    Err(ServerError::Config(format!("no private key in {path}")))
}
