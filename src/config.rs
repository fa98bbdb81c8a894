//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the file given with `-f`), then applies `IDP_METADATA_LOCATION`,
//! `IDP_SERVER_PREFIX`, `IDP_ENTITY_ID` and `IDP_LOG_LEVEL` overrides.
//!
//! Artifact file names that are not absolute are resolved under the
//! metadata location.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{error::AppError, logger};

/// Key algorithm used for freshly generated self-signed certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

/// Everything the metadata bootstrapper needs, as plain fields.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// CAS server URL prefix, e.g. `https://sso.example.org/cas`.
    pub server_prefix: String,
    pub entity_id: String,
    pub scope: String,
    /// Metadata storage directory (already expanded, no `~`).
    pub location: PathBuf,
    pub signing_cert_file: PathBuf,
    pub signing_key_file: PathBuf,
    pub encryption_cert_file: PathBuf,
    pub encryption_key_file: PathBuf,
    pub metadata_file: PathBuf,
    /// Directory searched for the metadata template before the bundled copy.
    pub template_dir: Option<PathBuf>,
}

impl KeyAlgorithm {
    /// Whether a certificate with this key can sit in an encryption
    /// `KeyDescriptor`. Ed25519 is signature-only.
    pub fn can_encrypt(self) -> bool {
        !matches!(self, KeyAlgorithm::Ed25519)
    }
}

/// Upper bound on certificate lifetime; keeps `not_after` well inside the
/// representable date range.
pub const MAX_VALIDITY_YEARS: u32 = 100;

/// Parameters handed to the self-signed certificate generator.
#[derive(Debug, Clone)]
pub struct CertificateConfig {
    /// Key algorithm of the signing pair.
    pub key_algorithm: KeyAlgorithm,
    /// Key algorithm of the encryption pair.
    pub encryption_key_algorithm: KeyAlgorithm,
    pub validity_years: u32,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub metadata: MetadataConfig,
    pub certificates: CertificateConfig,
}

/// Values that take precedence over the TOML file.
/// `load` fills this from the environment; tests build it directly.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub location: Option<String>,
    pub server_prefix: Option<String>,
    pub entity_id: Option<String>,
    pub log_level: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            location: env::var("IDP_METADATA_LOCATION").ok(),
            server_prefix: env::var("IDP_SERVER_PREFIX").ok(),
            entity_id: env::var("IDP_ENTITY_ID").ok(),
            log_level: env::var("IDP_LOG_LEVEL").ok(),
        }
    }
}

/// Raw TOML shape: `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    idp: RawIdp,
}

#[derive(Deserialize, Default)]
struct RawServer {
    /// No default: the IdP host name is derived from it.
    prefix: Option<String>,
}

#[derive(Deserialize)]
struct RawIdp {
    #[serde(default = "default_entity_id")]
    entity_id: String,
    #[serde(default = "default_scope")]
    scope: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    certificates: RawCertificates,
}

impl Default for RawIdp {
    fn default() -> Self {
        Self {
            entity_id: default_entity_id(),
            scope: default_scope(),
            log_level: default_log_level(),
            metadata: RawMetadata::default(),
            certificates: RawCertificates::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default = "default_location")]
    location: String,
    #[serde(default = "default_signing_cert")]
    signing_cert: String,
    #[serde(default = "default_signing_key")]
    signing_key: String,
    #[serde(default = "default_encryption_cert")]
    encryption_cert: String,
    #[serde(default = "default_encryption_key")]
    encryption_key: String,
    #[serde(default = "default_metadata_file")]
    metadata_file: String,
    #[serde(default)]
    template_dir: Option<String>,
}

impl Default for RawMetadata {
    fn default() -> Self {
        Self {
            location: default_location(),
            signing_cert: default_signing_cert(),
            signing_key: default_signing_key(),
            encryption_cert: default_encryption_cert(),
            encryption_key: default_encryption_key(),
            metadata_file: default_metadata_file(),
            template_dir: None,
        }
    }
}

#[derive(Deserialize)]
struct RawCertificates {
    #[serde(default = "default_key_algorithm")]
    key_algorithm: KeyAlgorithm,
    /// Falls back to `key_algorithm` when unset.
    #[serde(default)]
    encryption_key_algorithm: Option<KeyAlgorithm>,
    #[serde(default = "default_validity_years")]
    validity_years: u32,
}

impl Default for RawCertificates {
    fn default() -> Self {
        Self {
            key_algorithm: default_key_algorithm(),
            encryption_key_algorithm: None,
            validity_years: default_validity_years(),
        }
    }
}

fn default_entity_id() -> String { "https://cas.example.org/idp".to_string() }
fn default_scope() -> String { "example.org".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_location() -> String { "/etc/cas/saml".to_string() }
fn default_signing_cert() -> String { "idp-signing.crt".to_string() }
fn default_signing_key() -> String { "idp-signing.key".to_string() }
fn default_encryption_cert() -> String { "idp-encryption.crt".to_string() }
fn default_encryption_key() -> String { "idp-encryption.key".to_string() }
fn default_metadata_file() -> String { "idp-metadata.xml".to_string() }
fn default_key_algorithm() -> KeyAlgorithm { KeyAlgorithm::Rsa2048 }
fn default_validity_years() -> u32 { 20 }

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, built-in defaults are used
/// and the server prefix must come from `IDP_SERVER_PREFIX`.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve(RawConfig::default(), &overrides)
    }
}

/// Internal loader: accepts an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let idp = parsed.idp;
    let m = idp.metadata;

    let server_prefix = overrides
        .server_prefix
        .clone()
        .or(parsed.server.prefix)
        .ok_or_else(|| {
            AppError::Config("server prefix is not set ([server].prefix or IDP_SERVER_PREFIX)".into())
        })?;

    let log_level = overrides.log_level.clone().unwrap_or(idp.log_level);
    logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;

    let certs = idp.certificates;
    if !(1..=MAX_VALIDITY_YEARS).contains(&certs.validity_years) {
        return Err(AppError::Config(format!(
            "certificates.validity_years must be between 1 and {MAX_VALIDITY_YEARS}, got {}",
            certs.validity_years
        )));
    }
    let encryption_key_algorithm = certs.encryption_key_algorithm.unwrap_or(certs.key_algorithm);
    if !encryption_key_algorithm.can_encrypt() {
        return Err(AppError::Config(format!(
            "{encryption_key_algorithm:?} keys cannot be used for encryption; \
             set certificates.encryption_key_algorithm to rsa-2048"
        )));
    }

    let location_str = overrides.location.as_deref().unwrap_or(&m.location);
    let location = expand_home(location_str);
    let under_location = |name: &str| {
        let path = expand_home(name);
        if path.is_absolute() { path } else { location.join(path) }
    };

    Ok(Config {
        log_level,
        metadata: MetadataConfig {
            server_prefix,
            entity_id: overrides.entity_id.clone().unwrap_or(idp.entity_id),
            scope: idp.scope,
            signing_cert_file: under_location(&m.signing_cert),
            signing_key_file: under_location(&m.signing_key),
            encryption_cert_file: under_location(&m.encryption_cert),
            encryption_key_file: under_location(&m.encryption_key),
            metadata_file: under_location(&m.metadata_file),
            template_dir: m.template_dir.as_deref().map(expand_home),
            location,
        },
        certificates: CertificateConfig {
            key_algorithm: certs.key_algorithm,
            encryption_key_algorithm,
            validity_years: certs.validity_years,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── constructors ──────────────────────────────────────────────────────────────

impl MetadataConfig {
    /// Config rooted at `location` with the default artifact file names.
    pub fn with_location(location: &Path, server_prefix: &str) -> Self {
        Self {
            server_prefix: server_prefix.to_string(),
            entity_id: default_entity_id(),
            scope: default_scope(),
            location: location.to_path_buf(),
            signing_cert_file: location.join(default_signing_cert()),
            signing_key_file: location.join(default_signing_key()),
            encryption_cert_file: location.join(default_encryption_cert()),
            encryption_key_file: location.join(default_encryption_key()),
            metadata_file: location.join(default_metadata_file()),
            template_dir: None,
        }
    }
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            key_algorithm: default_key_algorithm(),
            encryption_key_algorithm: default_key_algorithm(),
            validity_years: default_validity_years(),
        }
    }
}
