//! TLS certificate handling for the rustls-backed transport.
//!
//! Grounded on the lineage's `tls.rs`: PEM client certificate/key plus an optional PEM root
//! certificate, parsed into the `rustls` types needed to build a `ClientConfig`. Falls back to
//! the platform trust store (`rustls-native-certs`) when no root certificate is supplied.

use std::io::BufRead;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// Client certificate and key, in PEM format, for mutual TLS.
#[derive(Clone)]
pub struct ClientTlsConfig {
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

/// TLS material supplied by the embedder. `None` fields fall back to platform defaults.
#[derive(Clone, Default)]
pub struct TlsCertificates {
    pub client_tls: Option<ClientTlsConfig>,
    pub root_cert: Option<Vec<u8>>,
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem as &mut dyn BufRead;
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::from((ErrorKind::Io, "failed to parse PEM certificate", e.to_string())))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem as &mut dyn BufRead;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::from((ErrorKind::Io, "failed to parse PEM private key", e.to_string())))?
        .ok_or_else(|| Error::from((ErrorKind::Io, "no private key found in PEM data")))
}

/// Builds a `rustls::ClientConfig` from the supplied certificates, defaulting to the platform
/// trust store when no root certificate is given and to no client authentication when no client
/// certificate is given.
pub fn build_client_config(certificates: Option<TlsCertificates>) -> Result<Arc<rustls::ClientConfig>> {
    let certificates = certificates.unwrap_or_default();

    let mut root_store = RootCertStore::empty();
    match certificates.root_cert {
        Some(pem) => {
            for cert in parse_cert_chain(&pem)? {
                root_store
                    .add(cert)
                    .map_err(|e| Error::from((ErrorKind::Io, "invalid root certificate", e.to_string())))?;
            }
            debug!(count = root_store.len(), "loaded custom TLS root certificates");
        }
        None => {
            let result = rustls_native_certs::load_native_certs();
            for err in &result.errors {
                debug!(%err, "skipping unreadable native certificate");
            }
            for cert in result.certs {
                let _ = root_store.add(cert);
            }
            debug!(count = root_store.len(), "loaded native TLS root certificates");
        }
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let config = match certificates.client_tls {
        Some(ClientTlsConfig {
            client_cert,
            client_key,
        }) => {
            let chain = parse_cert_chain(&client_cert)?;
            let key = parse_private_key(&client_key)?;
            debug!(chain_len = chain.len(), "configuring mutual TLS client certificate");
            builder
                .with_client_auth_cert(chain, key)
                .map_err(Error::from)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}
