//! Server-side TLS for listeners that answer SSLRequest with `S`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::ProxyError;

/// Build a TLS acceptor from a PEM certificate chain and private key.
pub fn build_acceptor(certificate: &Path, key: &Path) -> Result<TlsAcceptor, ProxyError> {
    let certs = load_certs(certificate)?;
    let key = load_key(key)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ProxyError::TlsFile {
            path: path.to_path_buf(),
            source,
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ProxyError::TlsFile {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ProxyError::TlsKeyMissing {
            path: path.to_path_buf(),
        })
}

fn open(path: &Path) -> Result<BufReader<File>, ProxyError> {
    let file = File::open(path).map_err(|source| ProxyError::TlsFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_certificate_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.crt");
        let err = match build_acceptor(&missing, &missing) {
            Err(err) => err,
            Ok(_) => panic!("expected acceptor building to fail"),
        };
        assert!(matches!(err, ProxyError::TlsFile { .. }));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        // Valid PEM framing, no usable key material.
        std::fs::write(&cert, "").unwrap();
        let mut f = File::create(&key).unwrap();
        writeln!(f, "-----BEGIN CERTIFICATE-----").unwrap();
        writeln!(f, "AAAA").unwrap();
        writeln!(f, "-----END CERTIFICATE-----").unwrap();
        drop(f);

        let err = match load_key(&key) {
            Err(err) => err,
            Ok(_) => panic!("expected key loading to fail"),
        };
        assert!(matches!(err, ProxyError::TlsKeyMissing { .. }));
    }
}
