use std::sync::Arc;

use tracing::instrument;

use super::cades::{CadesRequest, CadesSigner};
use super::certificate::CertificateDescriptor;
use super::errors::SigningResult;
use super::ports::{CertificateSource, CryptoProvider, ProviderInfo};
use super::repository::{CertificateRepository, RepositoryConfig};
use super::xml::{XmlSigner, XmlSigningRequest};
use crate::config::SigningConfig;

/// Entry point bundling certificate lookup and both signers over one provider.
pub struct SigningService<P: CryptoProvider> {
    repository: CertificateRepository<P>,
    cades: CadesSigner<P>,
    xml: XmlSigner<P>,
    default_source: CertificateSource,
}

impl<P: CryptoProvider> SigningService<P> {
    pub fn new(provider: Arc<P>, config: RepositoryConfig) -> Self {
        let repository = CertificateRepository::new(provider, config);
        Self {
            cades: CadesSigner::new(repository.clone()),
            xml: XmlSigner::new(repository.clone()),
            repository,
            default_source: CertificateSource::default(),
        }
    }

    pub fn from_config(provider: Arc<P>, config: &SigningConfig) -> Self {
        let mut service = Self::new(provider, RepositoryConfig::from(config));
        service.default_source = config.source.clone();
        service
    }

    pub fn repository(&self) -> &CertificateRepository<P> {
        &self.repository
    }

    /// The store used by the `*_default` helpers.
    pub fn default_source(&self) -> &CertificateSource {
        &self.default_source
    }

    #[instrument(skip(self))]
    pub async fn about(&self) -> SigningResult<ProviderInfo> {
        self.repository
            .call("about", self.repository.provider().about())
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_certificates(
        &self,
        source: &CertificateSource,
    ) -> SigningResult<Vec<CertificateDescriptor<P::Certificate>>> {
        self.repository.list_certificates(source).await
    }

    pub async fn list_default_certificates(
        &self,
    ) -> SigningResult<Vec<CertificateDescriptor<P::Certificate>>> {
        self.list_certificates(&self.default_source).await
    }

    #[instrument(skip(self))]
    pub async fn find_by_thumbprint(
        &self,
        thumbprint: &str,
        source: &CertificateSource,
    ) -> SigningResult<P::Certificate> {
        self.repository.find_by_thumbprint(thumbprint, source).await
    }

    #[instrument(skip(self))]
    pub async fn get_adjusted_certificate(
        &self,
        thumbprint: &str,
        source: &CertificateSource,
    ) -> SigningResult<CertificateDescriptor<P::Certificate>> {
        self.repository
            .get_adjusted_certificate(thumbprint, source)
            .await
    }

    #[instrument(skip_all, fields(thumbprint = %request.thumbprint, detached = request.detached))]
    pub async fn sign_cades(&self, request: &CadesRequest) -> SigningResult<String> {
        self.cades.sign(request).await
    }

    #[instrument(skip_all, fields(thumbprint = %request.thumbprint, code = request.signature_type_code))]
    pub async fn sign_xml(&self, request: &XmlSigningRequest) -> SigningResult<String> {
        self.xml.sign(request).await
    }
}
