#![allow(dead_code)]

use std::sync::Arc;

use cades_signer::adapters::memory::{MemoryCertificate, MemoryProvider};
use cades_signer::adapters::openssl::{SoftwareCertificate, generate_certificate, generate_rsa_key};
use cades_signer::domain::{CertificateRepository, CertificateSource, RepositoryConfig, SigningService};
use cades_signer::telemetry::init_tracing;

/// Base64 of `hello`.
pub const PAYLOAD: &str = "aGVsbG8=";

/// Provider whose container store holds the given certificates.
pub fn provider_with(certificates: impl IntoIterator<Item = MemoryCertificate>) -> MemoryProvider {
    MemoryProvider::new().with_certificates(CertificateSource::Container, certificates)
}

/// Container store with one valid signing certificate, thumbprint `AA11`.
pub fn single_certificate_provider() -> MemoryProvider {
    provider_with([MemoryCertificate::new("AA11")])
}

pub fn repository(
    provider: MemoryProvider,
    config: RepositoryConfig,
) -> (Arc<MemoryProvider>, CertificateRepository<MemoryProvider>) {
    init_tracing();
    let provider = Arc::new(provider);
    let repository = CertificateRepository::new(Arc::clone(&provider), config);
    (provider, repository)
}

pub fn service(provider: MemoryProvider) -> (Arc<MemoryProvider>, SigningService<MemoryProvider>) {
    init_tracing();
    let provider = Arc::new(provider);
    let service = SigningService::new(Arc::clone(&provider), RepositoryConfig::default());
    (provider, service)
}

/// Every store opened so far was closed exactly once.
pub fn assert_stores_released(provider: &MemoryProvider) {
    assert_eq!(provider.open_store_count(), 0, "a store was left open");
    assert_eq!(provider.opened_stores(), provider.closed_stores());
}

/// Self-signed RSA certificate with its key, valid from `days_from` to `days_to` days from now.
pub fn software_certificate(common_name: &str, days_from: u32, days_to: u32) -> SoftwareCertificate {
    let key = generate_rsa_key().unwrap();
    let certificate = generate_certificate(common_name, &key, None, days_from, days_to).unwrap();
    SoftwareCertificate::new(certificate, Some(key)).unwrap()
}
