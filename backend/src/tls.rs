// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Mutual TLS plumbing: server configurations that demand a peer
//! certificate from the broker CA, and identity extraction from the
//! certificate the peer presented.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::FromDer;

use crate::settings::TlsSettings;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("invalid certificate material: {0}")]
    BadCertificate(String),
    #[error("client verifier: {0}")]
    Verifier(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
    #[error("peer certificate carries no common name")]
    MissingCommonName,
}

/// Identity attributes of a connected peer, extracted from its certificate.
/// The common name doubles as the client id; the fingerprint is the SHA-256
/// of the DER encoding, matching the registry's `cert_fingerprint` column.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub common_name: String,
    pub fingerprint: String,
}

/// Build a server configuration that requires a client certificate signed
/// by the configured CA, honoring the CRL when one is present.
pub fn server_config(settings: &TlsSettings) -> Result<ServerConfig, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&settings.ca_cert)? {
        roots.add(cert)?;
    }

    let mut verifier_builder = WebPkiClientVerifier::builder(Arc::new(roots));
    if let Some(crl_path) = &settings.crl {
        let mut reader = BufReader::new(File::open(crl_path)?);
        let crls = rustls_pemfile::crls(&mut reader).collect::<Result<Vec<_>, _>>()?;
        verifier_builder = verifier_builder.with_crls(crls);
    }
    let verifier = verifier_builder
        .build()
        .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            load_certs(&settings.server_cert)?,
            load_private_key(&settings.server_key)?,
        )?;
    Ok(config)
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::BadCertificate(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

/// Extract the peer identity from a presented certificate.
pub fn peer_identity(cert: &CertificateDer<'_>) -> Result<PeerIdentity, TlsError> {
    let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref())
        .map_err(|e| TlsError::BadCertificate(e.to_string()))?;
    let common_name = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or(TlsError::MissingCommonName)?
        .to_owned();
    Ok(PeerIdentity {
        common_name,
        fingerprint: fingerprint(cert.as_ref()),
    })
}

/// Hex SHA-256 over the DER encoding.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_hex_sha256() {
        let digest = fingerprint(b"not a real certificate");
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(digest, fingerprint(b"not a real certificate"));
        assert_ne!(digest, fingerprint(b"a different blob"));
    }

    #[test]
    fn garbage_der_is_rejected() {
        let der = CertificateDer::from(b"garbage".to_vec());
        assert!(matches!(
            peer_identity(&der),
            Err(TlsError::BadCertificate(_))
        ));
    }

    #[test]
    fn missing_key_file_is_an_io_error() {
        let err = load_private_key(Path::new("/nonexistent/server.key")).unwrap_err();
        assert!(matches!(err, TlsError::Io(_)));
    }
}
