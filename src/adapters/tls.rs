use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use eyre::{Result, WrapErr, eyre};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from PEM certificate chain and private key files.
/// ALPN offers HTTP/2 first, then HTTP/1.1.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    // another component may already have installed a provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cert_file = &mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open cert file {}", cert_path.display()))?,
    );
    let key_file = &mut BufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open key file {}", key_path.display()))?,
    );

    let cert_chain = certs(cert_file)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificates in {}", cert_path.display()))?;
    if cert_chain.is_empty() {
        return Err(eyre!("no certificates found in {}", cert_path.display()));
    }

    let key = private_key(key_file)
        .with_context(|| format!("failed to parse private key in {}", key_path.display()))?
        .ok_or_else(|| eyre!("no private key found in {}", key_path.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("invalid certificate / key pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
