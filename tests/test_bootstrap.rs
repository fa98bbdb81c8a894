//! End-to-end bootstrap behaviour against a temporary metadata directory.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use idp_bootstrap::bootstrap::certs::{
    CertificateGenerator, CertificateUsage, RcgenCertificateGenerator, SelfSignedRequest,
};
use idp_bootstrap::bootstrap::template::{METADATA_TEMPLATE_NAME, ResourceLoader, TemplateLoader};
use idp_bootstrap::config::MetadataConfig;
use idp_bootstrap::{AppError, MetadataBootstrapper};
use tempfile::TempDir;

const PREFIX: &str = "https://idp.example.org/cas";

/// Writes `-----BEGIN CERTIFICATE-----\n<STEM>\n-----END CERTIFICATE-----`
/// where STEM is the upper-cased certificate file stem, and records requests.
#[derive(Clone, Default)]
struct FakeGenerator {
    requests: Arc<Mutex<Vec<SelfSignedRequest>>>,
    fail_on_call: Option<usize>,
}

impl FakeGenerator {
    fn failing_on(call: usize) -> Self {
        Self { fail_on_call: Some(call), ..Self::default() }
    }

    fn requests(&self) -> Vec<SelfSignedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CertificateGenerator for FakeGenerator {
    fn generate(&self, request: &SelfSignedRequest) -> Result<(), AppError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.fail_on_call == Some(requests.len()) {
            return Err(AppError::Generation("simulated failure".into()));
        }
        let stem = request
            .certificate_file
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .to_uppercase();
        fs::write(
            &request.certificate_file,
            format!("-----BEGIN CERTIFICATE-----\n{stem}\n-----END CERTIFICATE-----\n"),
        )
        .map_err(|e| AppError::Generation(e.to_string()))?;
        fs::write(&request.private_key_file, format!("key for {stem}"))
            .map_err(|e| AppError::Generation(e.to_string()))?;
        Ok(())
    }
}

struct BrokenTemplates;

impl TemplateLoader for BrokenTemplates {
    fn load(&self, name: &str) -> Result<String, AppError> {
        Err(AppError::Io(format!("template {name} unavailable")))
    }
}

fn metadata_config(location: &Path) -> MetadataConfig {
    MetadataConfig::with_location(location, PREFIX)
}

fn with_fake(cfg: MetadataConfig, generator: &FakeGenerator) -> MetadataBootstrapper {
    let loader = ResourceLoader::new(cfg.template_dir.clone());
    MetadataBootstrapper::new(cfg, Box::new(generator.clone()), Box::new(loader))
}

fn with_rcgen(cfg: MetadataConfig) -> MetadataBootstrapper {
    MetadataBootstrapper::new(
        cfg,
        Box::new(RcgenCertificateGenerator::default()),
        Box::new(ResourceLoader::default()),
    )
}

#[test]
fn initialize_creates_directory_and_all_artifacts() {
    let tmp = TempDir::new().unwrap();
    let location = tmp.path().join("saml");
    let cfg = metadata_config(&location);
    let b = with_rcgen(cfg.clone());

    assert!(b.is_metadata_missing());
    let path = b.initialize().unwrap();

    assert_eq!(path, cfg.metadata_file);
    assert!(location.is_dir());
    for file in [
        &cfg.signing_cert_file,
        &cfg.signing_key_file,
        &cfg.encryption_cert_file,
        &cfg.encryption_key_file,
        &cfg.metadata_file,
    ] {
        assert!(file.exists(), "{} was not created", file.display());
    }
    assert!(!b.is_metadata_missing());

    let metadata = fs::read_to_string(&cfg.metadata_file).unwrap();
    assert!(metadata.contains(r#"entityID="https://cas.example.org/idp""#));
    assert!(metadata.contains("https://idp.example.org/cas/idp/profile/SAML2/POST/SSO"));
    assert!(!metadata.contains("BEGIN CERTIFICATE"));
    assert!(!metadata.contains("${"));
}

#[test]
fn metadata_embeds_stripped_certificate_bodies() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());
    with_rcgen(cfg.clone()).initialize().unwrap();

    let metadata = fs::read_to_string(&cfg.metadata_file).unwrap();
    for cert in [&cfg.signing_cert_file, &cfg.encryption_cert_file] {
        let pem = fs::read_to_string(cert).unwrap();
        let body = pem
            .replace("-----BEGIN CERTIFICATE-----", "")
            .replace("-----END CERTIFICATE-----", "");
        assert!(metadata.contains(body.trim()));
    }
}

#[test]
fn existing_metadata_skips_generation() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());
    fs::write(&cfg.metadata_file, "<EntityDescriptor/>").unwrap();
    fs::write(&cfg.signing_cert_file, "old signing cert").unwrap();

    let generator = FakeGenerator::default();
    let path = with_fake(cfg.clone(), &generator).initialize().unwrap();

    assert_eq!(path, cfg.metadata_file);
    assert!(generator.requests().is_empty());
    assert_eq!(fs::read_to_string(&cfg.metadata_file).unwrap(), "<EntityDescriptor/>");
    assert_eq!(fs::read_to_string(&cfg.signing_cert_file).unwrap(), "old signing cert");
    assert!(!cfg.encryption_cert_file.exists());
}

#[test]
fn second_run_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());
    let b = with_rcgen(cfg.clone());

    b.initialize().unwrap();
    let cert_before = fs::read_to_string(&cfg.signing_cert_file).unwrap();
    let metadata_before = fs::read_to_string(&cfg.metadata_file).unwrap();

    b.perform_generation_steps().unwrap();
    assert_eq!(fs::read_to_string(&cfg.signing_cert_file).unwrap(), cert_before);
    assert_eq!(fs::read_to_string(&cfg.metadata_file).unwrap(), metadata_before);
}

#[test]
fn uncreatable_directory_is_config_error() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, "plain file").unwrap();

    let err = with_rcgen(metadata_config(&blocker.join("saml"))).initialize().unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}

#[test]
fn stale_certificates_are_replaced() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());
    for file in [
        &cfg.signing_cert_file,
        &cfg.signing_key_file,
        &cfg.encryption_cert_file,
        &cfg.encryption_key_file,
    ] {
        fs::write(file, "stale").unwrap();
    }

    with_rcgen(cfg.clone()).perform_generation_steps().unwrap();

    for file in [&cfg.signing_cert_file, &cfg.encryption_cert_file] {
        let pem = fs::read_to_string(file).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }
    for file in [&cfg.signing_key_file, &cfg.encryption_key_file] {
        assert_ne!(fs::read_to_string(file).unwrap(), "stale");
    }
}

#[test]
fn template_tokens_are_substituted_literally() {
    let tmp = TempDir::new().unwrap();
    let templates = tmp.path().join("templates");
    fs::create_dir(&templates).unwrap();
    fs::write(
        templates.join(METADATA_TEMPLATE_NAME),
        "entity=${entityId} scope=${scope} url=${idpEndpointUrl} sign=${signingKey} enc=${encryptionKey}",
    )
    .unwrap();

    let mut cfg = metadata_config(&tmp.path().join("saml"));
    cfg.entity_id = "https://sp.example.org".into();
    cfg.scope = "example.org".into();
    cfg.template_dir = Some(templates);

    let generator = FakeGenerator::default();
    let path = with_fake(cfg, &generator).initialize().unwrap();

    assert_eq!(
        fs::read_to_string(path).unwrap(),
        "entity=https://sp.example.org scope=example.org url=https://idp.example.org/cas/idp \
         sign=IDP-SIGNING enc=IDP-ENCRYPTION"
    );
}

#[test]
fn generator_receives_host_and_uri_san() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = metadata_config(tmp.path());
    cfg.server_prefix = "https://sso.example.org:8443/cas".into();

    let generator = FakeGenerator::default();
    with_fake(cfg.clone(), &generator).perform_generation_steps().unwrap();

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].usage, CertificateUsage::Signing);
    assert_eq!(requests[1].usage, CertificateUsage::Encryption);
    assert_eq!(requests[0].certificate_file, cfg.signing_cert_file);
    assert_eq!(requests[0].private_key_file, cfg.signing_key_file);
    assert_eq!(requests[1].certificate_file, cfg.encryption_cert_file);
    assert_eq!(requests[1].private_key_file, cfg.encryption_key_file);
    for request in &requests {
        assert_eq!(request.host_name, "sso.example.org");
        assert_eq!(request.uri_subject_alt_names, vec!["sso.example.org/idp/metadata".to_string()]);
    }
}

#[test]
fn malformed_prefix_aborts_before_touching_files() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = metadata_config(tmp.path());
    cfg.server_prefix = "idp.example.org/cas".into();
    fs::write(&cfg.signing_cert_file, "keep me").unwrap();

    let generator = FakeGenerator::default();
    let err = with_fake(cfg.clone(), &generator).perform_generation_steps().unwrap_err();

    assert!(matches!(err, AppError::Config(_)), "got {err}");
    assert!(generator.requests().is_empty());
    assert_eq!(fs::read_to_string(&cfg.signing_cert_file).unwrap(), "keep me");
}

#[test]
fn generation_failure_leaves_metadata_missing() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());

    let generator = FakeGenerator::failing_on(2);
    let b = with_fake(cfg.clone(), &generator);
    let err = b.perform_generation_steps().unwrap_err();

    assert!(matches!(err, AppError::Generation(_)), "got {err}");
    assert!(cfg.signing_cert_file.exists());
    assert!(!cfg.encryption_cert_file.exists());
    assert!(b.is_metadata_missing());
}

#[test]
fn template_failure_keeps_certs_and_next_run_regenerates() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());

    let broken = MetadataBootstrapper::new(
        cfg.clone(),
        Box::new(FakeGenerator::default()),
        Box::new(BrokenTemplates),
    );
    let err = broken.perform_generation_steps().unwrap_err();
    assert!(matches!(err, AppError::Io(_)), "got {err}");
    assert!(cfg.signing_cert_file.exists());
    assert!(cfg.encryption_cert_file.exists());
    assert!(broken.is_metadata_missing());

    let generator = FakeGenerator::default();
    with_fake(cfg.clone(), &generator).perform_generation_steps().unwrap();
    assert_eq!(generator.requests().len(), 2);
    assert!(cfg.metadata_file.exists());
}

#[test]
fn unwritable_metadata_path_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = metadata_config(tmp.path());
    cfg.metadata_file = tmp.path().join("missing-dir").join("idp-metadata.xml");

    let err = with_fake(cfg, &FakeGenerator::default()).perform_generation_steps().unwrap_err();
    assert!(matches!(err, AppError::Io(_)), "got {err}");
}

#[test]
fn ipv6_prefix_yields_ip_subject_alt_name() {
    use x509_parser::extensions::GeneralName;

    let tmp = TempDir::new().unwrap();
    let mut cfg = metadata_config(tmp.path());
    cfg.server_prefix = "https://[::1]:8443/cas".into();

    let generator = FakeGenerator::default();
    with_fake(cfg.clone(), &generator).perform_generation_steps().unwrap();
    assert_eq!(generator.requests()[0].host_name, "::1");
    assert_eq!(
        generator.requests()[0].uri_subject_alt_names,
        vec!["::1/idp/metadata".to_string()]
    );

    let tmp = TempDir::new().unwrap();
    let mut cfg = metadata_config(tmp.path());
    cfg.server_prefix = "https://[::1]:8443/cas".into();
    with_rcgen(cfg.clone()).perform_generation_steps().unwrap();

    let pem = fs::read(&cfg.signing_cert_file).unwrap();
    let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
    let cert = pem.parse_x509().unwrap();
    let san = cert.subject_alternative_name().unwrap().unwrap();
    let loopback = std::net::Ipv6Addr::LOCALHOST.octets();
    assert!(
        san.value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::IPAddress(ip) if *ip == loopback.as_slice())),
        "no IP SAN for ::1 in {:?}",
        san.value.general_names
    );
}

#[test]
fn default_encryption_certificate_carries_rsa_key() {
    let tmp = TempDir::new().unwrap();
    let cfg = metadata_config(tmp.path());
    with_rcgen(cfg.clone()).perform_generation_steps().unwrap();

    let pem = fs::read(&cfg.encryption_cert_file).unwrap();
    let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
    let cert = pem.parse_x509().unwrap();
    assert_eq!(
        cert.public_key().algorithm.algorithm,
        x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION
    );
}
