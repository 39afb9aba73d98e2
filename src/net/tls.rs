//! TLS material for peering connections.
//!
//! The configuration layer (paths, validation, mutual-auth requirement) is
//! always available; building actual acceptors and connectors requires the
//! `tls` cargo feature.

use crate::core::config::OpensslConfig;
use anyhow::Result;
use std::path::Path;

/// Validated TLS settings for an endpoint.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Certificate chain path (PEM).
    pub certificate: Option<String>,
    /// Private key path (PEM).
    pub key: Option<String>,
    /// CA bundle used to verify peers (PEM).
    pub cafile: Option<String>,
}

impl TlsSettings {
    /// Extract and validate settings from the configuration.
    pub fn from_config(config: &OpensslConfig) -> Result<Self> {
        let settings = Self {
            certificate: config.certificate.clone(),
            key: config.key.clone(),
            cafile: config.cafile.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Whether TLS material was supplied at all.
    pub fn configured(&self) -> bool {
        self.certificate.is_some() || self.key.is_some() || self.cafile.is_some()
    }

    /// Check that all referenced files exist.
    pub fn validate(&self) -> Result<()> {
        for (what, path) in [
            ("certificate", &self.certificate),
            ("key", &self.key),
            ("cafile", &self.cafile),
        ] {
            if let Some(path) = path {
                if !Path::new(path).exists() {
                    anyhow::bail!("TLS {} not found: {}", what, path);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_are_valid_and_unconfigured() {
        let settings = TlsSettings::default();
        assert!(!settings.configured());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_files_fail_validation() {
        let settings = TlsSettings {
            certificate: Some("/nonexistent/cert.pem".to_string()),
            key: Some("/nonexistent/key.pem".to_string()),
            cafile: None,
        };
        assert!(settings.configured());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_existing_files_pass_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, b"not really a cert").unwrap();

        let settings = TlsSettings {
            certificate: Some(cert.to_string_lossy().into_owned()),
            key: None,
            cafile: None,
        };
        assert!(settings.validate().is_ok());
    }
}

#[cfg(feature = "tls")]
pub use rustls_impl::TlsContext;

#[cfg(feature = "tls")]
mod rustls_impl {
    use super::TlsSettings;
    use anyhow::{Context, Result};
    use std::io::BufReader;
    use std::sync::Arc;
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use tokio_rustls::rustls::server::WebPkiClientVerifier;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    /// Acceptor/connector pair built from one set of TLS settings.
    ///
    /// Both sides authenticate: listeners require client certificates and
    /// outbound connections present the same identity.
    #[derive(Clone)]
    pub struct TlsContext {
        pub acceptor: TlsAcceptor,
        pub connector: TlsConnector,
    }

    impl TlsContext {
        pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
            let cert_path = settings
                .certificate
                .as_ref()
                .context("TLS requires a certificate")?;
            let key_path = settings.key.as_ref().context("TLS requires a key")?;
            let ca_path = settings
                .cafile
                .as_ref()
                .context("mutual TLS requires a CA bundle")?;

            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            let roots = load_roots(ca_path)?;
            let roots = Arc::new(roots);

            let verifier = WebPkiClientVerifier::builder(Arc::clone(&roots))
                .build()
                .context("failed to build client verifier")?;
            let server_config = ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs.clone(), key.clone_key())
                .context("failed to build TLS server config")?;

            let client_config = ClientConfig::builder()
                .with_root_certificates(Arc::clone(&roots))
                .with_client_auth_cert(certs, key)
                .context("failed to build TLS client config")?;

            Ok(Self {
                acceptor: TlsAcceptor::from(Arc::new(server_config)),
                connector: TlsConnector::from(Arc::new(client_config)),
            })
        }
    }

    fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open certificate {}", path))?;
        let mut reader = BufReader::new(file);
        let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
        certs.with_context(|| format!("failed to parse certificate {}", path))
    }

    fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
        let file =
            std::fs::File::open(path).with_context(|| format!("failed to open key {}", path))?;
        let mut reader = BufReader::new(file);
        rustls_pemfile::private_key(&mut reader)
            .with_context(|| format!("failed to parse key {}", path))?
            .with_context(|| format!("no private key found in {}", path))
    }

    fn load_roots(path: &str) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(path)? {
            roots
                .add(cert)
                .context("failed to add CA certificate to trust store")?;
        }
        Ok(roots)
    }
}
