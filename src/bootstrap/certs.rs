//! Self-signed X.509 certificate generation.
//!
//! The bootstrapper only decides *where* the certificate and key go and
//! which names they carry; producing them is delegated to a
//! [`CertificateGenerator`]. [`RcgenCertificateGenerator`] is the default.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, Ia5String, KeyPair, SanType};
use rsa::{RsaPrivateKey, pkcs1::LineEnding, pkcs8::EncodePrivateKey};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{
    config::{CertificateConfig, KeyAlgorithm},
    error::AppError,
};

const RSA_KEY_BITS: usize = 2048;

/// Which `KeyDescriptor` the certificate ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    Signing,
    Encryption,
}

/// One certificate/key pair to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfSignedRequest {
    pub usage: CertificateUsage,
    pub host_name: String,
    pub certificate_file: PathBuf,
    pub private_key_file: PathBuf,
    pub uri_subject_alt_names: Vec<String>,
}

/// Produces a self-signed certificate file and its private key file.
///
/// Implementations must fail rather than overwrite existing output files.
pub trait CertificateGenerator {
    fn generate(&self, request: &SelfSignedRequest) -> Result<(), AppError>;
}

/// `rcgen`-backed generator.
///
/// Subject CN and a DNS SAN are set to the host name; the request's URI SANs
/// are appended. The key is written as PKCS#8 PEM.
#[derive(Debug, Clone, Default)]
pub struct RcgenCertificateGenerator {
    config: CertificateConfig,
}

impl RcgenCertificateGenerator {
    pub fn new(config: CertificateConfig) -> Self {
        Self { config }
    }

    fn algorithm_for(&self, usage: CertificateUsage) -> Result<KeyAlgorithm, AppError> {
        match usage {
            CertificateUsage::Signing => Ok(self.config.key_algorithm),
            CertificateUsage::Encryption => {
                let alg = self.config.encryption_key_algorithm;
                if alg.can_encrypt() {
                    Ok(alg)
                } else {
                    Err(AppError::Config(format!(
                        "{alg:?} keys cannot be used for the encryption certificate"
                    )))
                }
            }
        }
    }

    fn key_pair(&self, algorithm: KeyAlgorithm) -> Result<KeyPair, AppError> {
        let alg = match algorithm {
            // ring signs with RSA but cannot generate RSA keys.
            KeyAlgorithm::Rsa2048 => return rsa_key_pair(),
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
        };
        KeyPair::generate_for(alg)
            .map_err(|e| AppError::Generation(format!("failed to generate key pair: {e}")))
    }

    fn params(&self, request: &SelfSignedRequest) -> Result<CertificateParams, AppError> {
        let mut params = CertificateParams::new(vec![request.host_name.clone()]).map_err(|e| {
            AppError::Generation(format!("invalid host name '{}': {e}", request.host_name))
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(request.host_name.clone()));
        params.distinguished_name = dn;

        for uri in &request.uri_subject_alt_names {
            let value = Ia5String::try_from(uri.as_str())
                .map_err(|e| AppError::Generation(format!("invalid URI SAN '{uri}': {e}")))?;
            params.subject_alt_names.push(SanType::URI(value));
        }

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now
            .checked_add(Duration::days(365 * i64::from(self.config.validity_years)))
            .ok_or_else(|| {
                AppError::Generation(format!(
                    "validity of {} years is past the last representable date",
                    self.config.validity_years
                ))
            })?;

        Ok(params)
    }
}

impl CertificateGenerator for RcgenCertificateGenerator {
    fn generate(&self, request: &SelfSignedRequest) -> Result<(), AppError> {
        for path in [&request.certificate_file, &request.private_key_file] {
            if path.exists() {
                return Err(AppError::Generation(format!(
                    "refusing to overwrite existing file {}",
                    path.display()
                )));
            }
        }

        let algorithm = self.algorithm_for(request.usage)?;
        let key_pair = self.key_pair(algorithm)?;
        let cert = self
            .params(request)?
            .self_signed(&key_pair)
            .map_err(|e| AppError::Generation(format!("failed to self-sign certificate: {e}")))?;

        write_new(&request.private_key_file, key_pair.serialize_pem().as_bytes(), 0o600)?;
        write_new(&request.certificate_file, cert.pem().as_bytes(), 0o644)?;

        debug!(
            usage = ?request.usage,
            algorithm = ?algorithm,
            host = %request.host_name,
            cert = %request.certificate_file.display(),
            sha256 = %fingerprint(cert.der()),
            "self-signed certificate written"
        );
        Ok(())
    }
}

/// RSA-2048 key generated with the `rsa` crate and handed to rcgen as PKCS#8.
fn rsa_key_pair() -> Result<KeyPair, AppError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| AppError::Generation(format!("failed to generate RSA key: {e}")))?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Generation(format!("failed to encode RSA key: {e}")))?;
    KeyPair::from_pkcs8_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| AppError::Generation(format!("rcgen rejected RSA key: {e}")))
}

/// Hex SHA-256 over DER bytes, as shown by `openssl x509 -fingerprint -sha256`
/// without the colons.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Fingerprint of a base64 certificate body as left by
/// [`strip_pem_armor`](super::template::strip_pem_armor). `None` when the
/// body is not valid base64.
pub fn body_fingerprint(body: &str) -> Option<String> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).ok().map(|der| fingerprint(&der))
}

/// Create `path` (which must not exist) and write `contents` to it.
fn write_new(path: &Path, contents: &[u8], mode: u32) -> Result<(), AppError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| AppError::Generation(format!("cannot create {}: {e}", path.display())))?;
    file.write_all(contents)
        .map_err(|e| AppError::Generation(format!("cannot write {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            AppError::Generation(format!("cannot set permissions on {}: {e}", path.display()))
        })?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
