//! Metadata template resolution and rendering.
//!
//! Rendering is plain literal replacement of `${...}` tokens; there is no
//! escaping and unknown tokens are left as they are.

use std::{fs, path::PathBuf};

use tracing::debug;

use crate::error::AppError;

/// Logical name of the IdP metadata template.
pub const METADATA_TEMPLATE_NAME: &str = "template-idp-metadata.xml";

const BUNDLED_METADATA_TEMPLATE: &str = include_str!("../../resources/template-idp-metadata.xml");

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Resolves a template body by logical name.
pub trait TemplateLoader {
    fn load(&self, name: &str) -> Result<String, AppError>;
}

/// Looks in an optional override directory first, then falls back to the
/// templates compiled into the binary.
#[derive(Debug, Clone, Default)]
pub struct ResourceLoader {
    override_dir: Option<PathBuf>,
}

impl ResourceLoader {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    fn bundled(name: &str) -> Option<&'static str> {
        match name {
            METADATA_TEMPLATE_NAME => Some(BUNDLED_METADATA_TEMPLATE),
            _ => None,
        }
    }
}

impl TemplateLoader for ResourceLoader {
    fn load(&self, name: &str) -> Result<String, AppError> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(name);
            if path.exists() {
                debug!(template = %path.display(), "loading template from override dir");
                return fs::read_to_string(&path)
                    .map_err(|e| AppError::Io(format!("cannot read template {}: {e}", path.display())));
            }
        }
        Self::bundled(name)
            .map(str::to_string)
            .ok_or_else(|| AppError::Io(format!("template resource '{name}' not found")))
    }
}

/// Values substituted into the metadata template.
#[derive(Debug, Clone)]
pub struct MetadataParams<'a> {
    pub entity_id: &'a str,
    pub scope: &'a str,
    pub idp_endpoint_url: &'a str,
    pub signing_key: &'a str,
    pub encryption_key: &'a str,
}

/// Replace the five metadata tokens. Order matters when a value itself
/// contains a later token; it is entityId, scope, idpEndpointUrl,
/// encryptionKey, signingKey.
pub fn render_metadata(template: &str, params: &MetadataParams<'_>) -> String {
    template
        .replace("${entityId}", params.entity_id)
        .replace("${scope}", params.scope)
        .replace("${idpEndpointUrl}", params.idp_endpoint_url)
        .replace("${encryptionKey}", params.encryption_key)
        .replace("${signingKey}", params.signing_key)
}

/// Remove PEM certificate armour lines and surrounding whitespace,
/// leaving the base64 body (inner line breaks are kept).
pub fn strip_pem_armor(pem: &str) -> String {
    pem.replace(BEGIN_CERTIFICATE, "")
        .replace(END_CERTIFICATE, "")
        .trim()
        .to_string()
}
