use super::TlsError;
use rustls::{
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::{NoServerSessionStorage, ServerSessionMemoryCache},
    ServerConfig, SupportedProtocolVersion,
};
use serde::Deserialize;
use std::{fmt, fs, path::PathBuf, sync::Arc};

/// Lowest TLS version the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12_AND_UP: &[&SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match self {
            TlsVersion::Tls12 => TLS12_AND_UP,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

/// Server certificate and protocol settings (the `[tls]` config table).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM file with the server certificate, optionally followed by its chain.
    pub cert_file: PathBuf,
    /// PEM file with the private key (PKCS#8, PKCS#1 or SEC1).
    pub key_file: PathBuf,
    /// Extra PEM file with intermediate certificates.
    #[serde(default)]
    pub chain_file: Option<PathBuf>,
    /// Default: `"1.2"`.
    #[serde(default)]
    pub min_version: TlsVersion,
    /// ALPN protocols in preference order (default: `["http/1.1"]`).
    #[serde(default = "default_alpn")]
    pub alpn: Vec<String>,
    /// Number of resumable sessions kept in memory (default: `256`, 0 disables resumption).
    #[serde(default = "default_session_cache_size")]
    pub session_cache_size: usize,
}

fn default_alpn() -> Vec<String> {
    vec!["http/1.1".to_string()]
}

fn default_session_cache_size() -> usize {
    256
}

impl TlsConfig {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            chain_file: None,
            min_version: TlsVersion::default(),
            alpn: default_alpn(),
            session_cache_size: default_session_cache_size(),
        }
    }
}

/// Immutable server-side TLS settings shared by every connection.
///
/// Built once at startup; any problem with the certificate or key is a
/// startup error.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    /// Loads the certificate, chain and key files named in `config`.
    pub fn from_config(config: &TlsConfig) -> Result<Self, TlsError> {
        let mut certs = parse_certs(&read_file(&config.cert_file)?)?;
        if let Some(chain) = &config.chain_file {
            certs.extend(parse_certs(&read_file(chain)?)?);
        }
        let key = parse_key(&read_file(&config.key_file)?)?;

        Self::build(certs, key, config)
    }

    /// Builds a context from in-memory PEM data with default settings.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let defaults = TlsConfig::new("", "");
        Self::build(parse_certs(cert_pem)?, parse_key(key_pem)?, &defaults)
    }

    fn build(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        options: &TlsConfig,
    ) -> Result<Self, TlsError> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_protocol_versions(options.min_version.protocol_versions())?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        config.alpn_protocols = options
            .alpn
            .iter()
            .map(|protocol| protocol.as_bytes().to_vec())
            .collect();

        if options.session_cache_size > 0 {
            config.session_storage = ServerSessionMemoryCache::new(options.session_cache_size);
        } else {
            config.session_storage = Arc::new(NoServerSessionStorage {});
        }

        Ok(Self {
            config: Arc::new(config),
        })
    }

    #[inline]
    pub(crate) fn server_config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("alpn_protocols", &self.config.alpn_protocols)
            .finish_non_exhaustive()
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::File {
        path: path.clone(),
        source,
    })
}

fn parse_certs(mut pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;

    match certs.is_empty() {
        true => Err(TlsError::NoCertificates),
        false => Ok(certs),
    }
}

fn parse_key(mut pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut pem)
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)
}
