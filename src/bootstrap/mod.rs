//! IdP metadata bootstrap.
//!
//! Layout under the metadata location (names are configurable):
//! ```text
//! /etc/cas/saml/
//! ├── idp-signing.crt      (PEM certificate)
//! ├── idp-signing.key      (PKCS#8 private key, mode 0600)
//! ├── idp-encryption.crt
//! ├── idp-encryption.key
//! └── idp-metadata.xml     (rendered from template-idp-metadata.xml)
//! ```
//!
//! The metadata file is the only state marker. While it is absent every
//! run regenerates both certificate pairs; once present, nothing here
//! touches the directory again.

pub mod certs;
pub mod template;

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use url::{Host, Url};

use crate::{
    config::{Config, MetadataConfig},
    error::AppError,
};

use certs::{CertificateGenerator, CertificateUsage, RcgenCertificateGenerator, SelfSignedRequest};
use template::{METADATA_TEMPLATE_NAME, MetadataParams, ResourceLoader, TemplateLoader};

const URI_SUBJECT_ALTNAME_POSTFIX: &str = "/idp/metadata";
const IDP_ENDPOINT_POSTFIX: &str = "/idp";

/// Generates signing/encryption certificates and the IdP metadata document
/// when the metadata file does not exist yet.
pub struct MetadataBootstrapper {
    config: MetadataConfig,
    generator: Box<dyn CertificateGenerator>,
    templates: Box<dyn TemplateLoader>,
}

impl MetadataBootstrapper {
    pub fn new(
        config: MetadataConfig,
        generator: Box<dyn CertificateGenerator>,
        templates: Box<dyn TemplateLoader>,
    ) -> Self {
        Self { config, generator, templates }
    }

    /// Bootstrapper wired with the `rcgen` generator and the bundled templates.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.metadata.clone(),
            Box::new(RcgenCertificateGenerator::new(config.certificates.clone())),
            Box::new(ResourceLoader::new(config.metadata.template_dir.clone())),
        )
    }

    /// Ensure the metadata directory exists, then run the generation steps.
    pub fn initialize(&self) -> Result<PathBuf, AppError> {
        let location = &self.config.location;
        if !location.exists() {
            debug!(dir = %location.display(), "metadata directory does not exist, creating");
            fs::create_dir_all(location).map_err(|e| {
                AppError::Config(format!(
                    "metadata directory {} cannot be located/created: {e}",
                    location.display()
                ))
            })?;
        }
        info!(
            dir = %location.display(),
            entity_id = %self.config.entity_id,
            "metadata directory ready"
        );

        self.perform_generation_steps()
    }

    pub fn is_metadata_missing(&self) -> bool {
        !self.config.metadata_file.exists()
    }

    /// Generate certificates and metadata if the metadata file is missing.
    /// Returns the metadata file path either way.
    pub fn perform_generation_steps(&self) -> Result<PathBuf, AppError> {
        debug!(entity_id = %self.config.entity_id, "preparing to generate metadata");
        let metadata_file = &self.config.metadata_file;

        if self.is_metadata_missing() {
            info!(path = %metadata_file.display(), "metadata does not exist, creating");

            info!("creating self-signed certificate for signing");
            self.build_self_signed_signing_cert()?;

            info!("creating self-signed certificate for encryption");
            self.build_self_signed_encryption_cert()?;

            info!("creating metadata");
            self.build_metadata_generator_parameters()?;
        }

        info!(path = %metadata_file.display(), "metadata is available");
        Ok(metadata_file.clone())
    }

    pub fn build_self_signed_signing_cert(&self) -> Result<(), AppError> {
        self.build_self_signed_cert(
            CertificateUsage::Signing,
            &self.config.signing_cert_file,
            &self.config.signing_key_file,
        )
    }

    pub fn build_self_signed_encryption_cert(&self) -> Result<(), AppError> {
        self.build_self_signed_cert(
            CertificateUsage::Encryption,
            &self.config.encryption_cert_file,
            &self.config.encryption_key_file,
        )
    }

    /// Render the metadata template with both certificate bodies and write it
    /// to the metadata file.
    pub fn build_metadata_generator_parameters(&self) -> Result<(), AppError> {
        let template = self.templates.load(METADATA_TEMPLATE_NAME)?;

        let signing_key = read_certificate_body(&self.config.signing_cert_file)?;
        let encryption_key = read_certificate_body(&self.config.encryption_cert_file)?;
        for (usage, body) in [("signing", &signing_key), ("encryption", &encryption_key)] {
            if let Some(sha256) = certs::body_fingerprint(body) {
                debug!(usage, %sha256, "embedding certificate in metadata");
            }
        }

        let endpoint = self.idp_endpoint_url();
        let metadata = template::render_metadata(
            &template,
            &MetadataParams {
                entity_id: &self.config.entity_id,
                scope: &self.config.scope,
                idp_endpoint_url: &endpoint,
                signing_key: &signing_key,
                encryption_key: &encryption_key,
            },
        );

        let path = &self.config.metadata_file;
        fs::write(path, metadata)
            .map_err(|e| AppError::Io(format!("cannot write metadata {}: {e}", path.display())))
    }

    /// `<server prefix>/idp`, concatenated as-is.
    pub fn idp_endpoint_url(&self) -> String {
        format!("{}{IDP_ENDPOINT_POSTFIX}", self.config.server_prefix)
    }

    /// Host component of the server prefix.
    pub fn idp_host_name(&self) -> Result<String, AppError> {
        host_name(&self.config.server_prefix)
    }

    fn build_self_signed_cert(
        &self,
        usage: CertificateUsage,
        cert_file: &Path,
        key_file: &Path,
    ) -> Result<(), AppError> {
        let host = self.idp_host_name()?;
        remove_stale(cert_file)?;
        remove_stale(key_file)?;

        self.generator.generate(&SelfSignedRequest {
            usage,
            uri_subject_alt_names: vec![subject_alt_name(&host)],
            host_name: host,
            certificate_file: cert_file.to_path_buf(),
            private_key_file: key_file.to_path_buf(),
        })
    }
}

/// Extract the host from a URL prefix such as `https://sso.example.org:8443/cas`.
/// IPv6 hosts come back without brackets so they end up as IP SANs.
pub fn host_name(server_prefix: &str) -> Result<String, AppError> {
    let url = Url::parse(server_prefix)
        .map_err(|e| AppError::Config(format!("server prefix '{server_prefix}' is not a URL: {e}")))?;
    match url.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        None => Err(AppError::Config(format!("server prefix '{server_prefix}' has no host"))),
    }
}

/// URI subject alternative name: host immediately followed by `/idp/metadata`.
pub fn subject_alt_name(host: &str) -> String {
    format!("{host}{URI_SUBJECT_ALTNAME_POSTFIX}")
}

// ── internals ────────────────────────────────────────────────────────────────

fn remove_stale(path: &Path) -> Result<(), AppError> {
    if path.exists() {
        debug!(path = %path.display(), "removing previous artifact");
        fs::remove_file(path)
            .map_err(|e| AppError::Io(format!("cannot delete {}: {e}", path.display())))?;
    }
    Ok(())
}

fn read_certificate_body(path: &Path) -> Result<String, AppError> {
    let pem = fs::read_to_string(path)
        .map_err(|e| AppError::Io(format!("cannot read certificate {}: {e}", path.display())))?;
    Ok(template::strip_pem_armor(&pem))
}
