//! TLS context construction for the Client (mTLS dial) and Server (mTLS
//! accept) sides of the supervisor (C5), grounded in
//! `rama-cli/src/cmd/http/tls.rs` and `examples/mtls_tunnel_and_service.rs`'s
//! `rustls::{ClientConfig, ServerConfig, RootCertStore,
//! server::WebPkiClientVerifier}` construction, re-exported by the `rama`
//! facade under `rama::tls::rustls::dep::rustls`.
//!
//! The Client builds and caches its `ClientConfig` once per process, per
//! §4.5's "Build a TLS configuration once (cached)".

use crate::config::{ClientTlsConfig, ServerTlsConfig};
use crate::error::{CloudPinError, ConfigError};
use rama::tls::rustls::dep::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rama::tls::rustls::dep::rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    client::WebPkiServerVerifier,
    server::WebPkiClientVerifier,
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CloudPinError> {
    let file = File::open(path).map_err(|e| config_err(format!("open cert file {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| config_err(format!("parse PEM certs in {path:?}: {e}")))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CloudPinError> {
    let file = File::open(path).map_err(|e| config_err(format!("open key file {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| config_err(format!("parse PEM private key in {path:?}: {e}")))?
        .ok_or_else(|| config_err(format!("no private key found in {path:?}")))
}

fn config_err(message: impl Into<String>) -> CloudPinError {
    CloudPinError::Config(ConfigError::new(message))
}

fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore, CloudPinError> {
    let mut store = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                store
                    .add(cert)
                    .map_err(|e| config_err(format!("add CA cert from {path:?} to store: {e}")))?;
            }
        }
        None => {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }
    Ok(store)
}

/// A [`ServerCertVerifier`] that delegates chain verification to the normal
/// webpki verifier but does not require the presented name to match the URL
/// -- the `check_hostname: false` escape hatch described in §4.5.
#[derive(Debug)]
struct NoHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rama::tls::rustls::dep::rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(rama::tls::rustls::dep::rustls::Error::InvalidCertificate(
                rama::tls::rustls::dep::rustls::CertificateError::NotValidForName,
            )) => Ok(ServerCertVerified::assertion()),
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rama::tls::rustls::dep::rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rama::tls::rustls::dep::rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build the Client's cached `rustls::ClientConfig`.
///
/// `insecure` is handled by the caller before this is reached (an insecure
/// dial uses `ws://` and never builds a TLS config at all, per §4.5); this
/// function only deals with `check_hostname` and optional mTLS client auth.
pub fn build_client_tls_config(cfg: &ClientTlsConfig) -> Result<Arc<ClientConfig>, CloudPinError> {
    let roots = root_store(cfg.ca_file.as_deref())?;

    let builder = ClientConfig::builder();
    let builder = if cfg.check_hostname {
        builder.with_root_certificates(roots)
    } else {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| config_err(format!("build webpki server verifier: {e}")))?;
        builder.dangerous().with_custom_certificate_verifier(Arc::new(NoHostnameVerifier { inner }))
    };

    let config = match &cfg.client_identity {
        Some(identity) => {
            let certs = load_certs(&identity.cert_file)?;
            let key = load_private_key(&identity.key_file)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| config_err(format!("build mTLS client config: {e}")))?
        }
        None => {
            tracing::warn!(
                "no client certificate configured; continuing without client certificate authentication"
            );
            builder.with_no_client_auth()
        }
    };

    Ok(Arc::new(config))
}

/// Build the Server's `rustls::ServerConfig`, optionally requiring and
/// verifying a client certificate against `ca_file`.
pub fn build_server_tls_config(cfg: &ServerTlsConfig) -> Result<Arc<ServerConfig>, CloudPinError> {
    let certs = load_certs(&cfg.identity.cert_file)?;
    let key = load_private_key(&cfg.identity.key_file)?;

    let builder = ServerConfig::builder();
    let builder = if cfg.client_cert_required {
        let roots = root_store(cfg.ca_file.as_deref())?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| config_err(format!("build webpki client verifier: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        tracing::warn!("client_cert_required is false; accepting unauthenticated TLS clients");
        builder.with_no_client_auth()
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| config_err(format!("build TLS server config: {e}")))?;
    Ok(Arc::new(config))
}
