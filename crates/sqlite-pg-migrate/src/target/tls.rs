//! TLS negotiation for the destination connection.
//!
//! The mode comes from an explicit override when configured, otherwise from
//! the `sslmode` parameter of the connection URL.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_postgres::config::SslMode as WireSslMode;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// SSL modes for the destination, following libpq's `sslmode` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// Try TLS without certificate checks, fall back to plain TCP.
    #[default]
    Prefer,
    /// TLS without certificate checks.
    Require,
    /// TLS with certificate chain verification.
    VerifyCa,
    /// TLS with chain and hostname verification.
    VerifyFull,
}

impl SslMode {
    /// Parse a libpq-style mode name.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" | "" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, prefer, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    /// Pick the effective mode: explicit override first, then the URL.
    pub fn resolve(override_mode: Option<&str>, pg_config: &tokio_postgres::Config) -> Result<Self> {
        if let Some(mode) = override_mode {
            return Self::parse(mode);
        }
        Ok(match pg_config.get_ssl_mode() {
            WireSslMode::Disable => SslMode::Disable,
            WireSslMode::Require => SslMode::Require,
            _ => SslMode::Prefer,
        })
    }

    /// The mode the driver negotiates with; certificate checks live in the
    /// rustls config instead.
    pub fn wire_mode(self) -> WireSslMode {
        match self {
            SslMode::Disable => WireSslMode::Disable,
            SslMode::Prefer => WireSslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => WireSslMode::Require,
        }
    }

    /// Whether a TLS connector is needed at all.
    pub fn uses_tls(self) -> bool {
        self != SslMode::Disable
    }
}

/// Build the rustls connector for a mode, or `None` for plain TCP.
pub fn make_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    let config = match mode {
        SslMode::Disable => return Ok(None),
        SslMode::Prefer => unverified_config(),
        SslMode::Require => {
            warn!(
                "ssl_mode=require encrypts the connection but does not verify the server \
                 certificate; use verify-full to rule out interception"
            );
            unverified_config()
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            info!("ssl_mode={:?}: verifying server certificate against webpki roots", mode);
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    };
    Ok(Some(MakeRustlsConnect::new(config)))
}

fn unverified_config() -> ClientConfig {
    let builder = ClientConfig::builder();
    let provider = builder.crypto_provider().clone();
    builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth()
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
