//! Mutual TLS for the query listener: the server presents its certificate
//! and only accepts clients whose certificate chains to the configured CA.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use rustls::RootCertStore;
use rustls::ServerConfig;
use rustls::server::WebPkiClientVerifier;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

pub const SERVER_CERT: &str = "server-cert.pem";
pub const SERVER_KEY: &str = "server-key.pem";
pub const CA_CERT: &str = "ca-cert.pem";

pub fn load_server_config(authority: &Path) -> Result<ServerConfig> {
    let cert_path = authority.join(SERVER_CERT);
    let certs = CertificateDer::pem_file_iter(&cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .with_context(|| format!("failed to read {}", cert_path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate in {}", cert_path.display()));
    }

    let key_path = authority.join(SERVER_KEY);
    let key = PrivateKeyDer::from_pem_file(&key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;

    let ca_path = authority.join(CA_CERT);
    let mut roots = RootCertStore::empty();
    for ca in CertificateDer::pem_file_iter(&ca_path).with_context(|| format!("failed to read {}", ca_path.display()))? {
        let ca = ca.with_context(|| format!("failed to parse {}", ca_path.display()))?;
        roots
            .add(ca)
            .with_context(|| format!("rejected CA certificate in {}", ca_path.display()))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .context("failed to build client certificate verifier")?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .context("server certificate and key do not match")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
