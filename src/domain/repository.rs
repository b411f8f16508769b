//! Certificate enumeration and lookup by thumbprint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use super::certificate::{CertificateDescriptor, CertificateInfo, ValidPeriod};
use super::errors::{ProviderResult, SigningError, SigningResult};
use super::ports::{CertificateSource, CryptoProvider, FindCriterion, PropertyId};
use super::store::StoreGuard;
use super::thumbprint::Thumbprint;
use crate::config::SigningConfig;

/// Configuration for the certificate repository
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Deadline applied to every single provider call, if any.
    pub provider_timeout: Option<Duration>,
    /// Upper bound on concurrent per-certificate attribute reads.
    pub max_concurrent_reads: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            provider_timeout: None,
            max_concurrent_reads: 8,
        }
    }
}

impl From<&SigningConfig> for RepositoryConfig {
    fn from(config: &SigningConfig) -> Self {
        Self {
            provider_timeout: config.provider_timeout_secs.map(Duration::from_secs),
            max_concurrent_reads: config.max_concurrent_reads,
        }
    }
}

/// Lists and resolves certificates held by a cryptographic provider.
///
/// Every public operation opens its own store and closes it before returning,
/// whatever the outcome. Stores are never shared between calls.
pub struct CertificateRepository<P: CryptoProvider> {
    provider: Arc<P>,
    config: RepositoryConfig,
}

impl<P: CryptoProvider> Clone for CertificateRepository<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
        }
    }
}

impl<P: CryptoProvider> CertificateRepository<P> {
    pub fn new(provider: Arc<P>, config: RepositoryConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Lists the time-valid certificates that have a private key.
    ///
    /// Descriptors come back in the provider's order. A failure while reading
    /// any certificate fails the whole call.
    pub async fn list_certificates(
        &self,
        source: &CertificateSource,
    ) -> SigningResult<Vec<CertificateDescriptor<P::Certificate>>> {
        let store = self.open(source).await?;
        let descriptors = self.enumerate(&store).await?;
        store.close()?;

        info!("Enumerated {} signing certificates", descriptors.len());
        Ok(descriptors)
    }

    /// Resolves the provider handle of the certificate with the given thumbprint.
    pub async fn find_by_thumbprint(
        &self,
        thumbprint: &str,
        source: &CertificateSource,
    ) -> SigningResult<P::Certificate> {
        let thumbprint = Thumbprint::parse(thumbprint)?;
        self.resolve(&thumbprint, source).await
    }

    /// Finds the descriptor of a signing certificate by thumbprint.
    ///
    /// Only certificates returned by [`list_certificates`](Self::list_certificates)
    /// are considered, so the result is always time-valid and has a private key.
    pub async fn get_adjusted_certificate(
        &self,
        thumbprint: &str,
        source: &CertificateSource,
    ) -> SigningResult<CertificateDescriptor<P::Certificate>> {
        let thumbprint = Thumbprint::parse(thumbprint)?;
        self.list_certificates(source)
            .await?
            .into_iter()
            .find(|certificate| certificate.thumbprint() == thumbprint.as_str())
            .ok_or_else(|| SigningError::CertificateNotFound(thumbprint.to_string()))
    }

    pub(crate) async fn resolve(
        &self,
        thumbprint: &Thumbprint,
        source: &CertificateSource,
    ) -> SigningResult<P::Certificate> {
        let store = self.open(source).await?;
        let certificate = self.lookup(&store, thumbprint).await?;
        store.close()?;

        debug!("Resolved certificate {thumbprint}");
        Ok(certificate)
    }

    /// Awaits a provider call, applying the configured deadline.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, call: F) -> SigningResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        let result = match self.config.provider_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SigningError::Timeout { operation })?,
            None => call.await,
        };
        result.map_err(SigningError::from)
    }

    async fn open(&self, source: &CertificateSource) -> SigningResult<StoreGuard<'_, P>> {
        let store = self
            .call("open_store", self.provider.open_store(source))
            .await?;
        debug!("Opened certificate store {source:?}");
        Ok(StoreGuard::new(self.provider.as_ref(), store))
    }

    async fn enumerate(
        &self,
        store: &StoreGuard<'_, P>,
    ) -> SigningResult<Vec<CertificateDescriptor<P::Certificate>>> {
        let provider = self.provider.as_ref();

        let certificates = self
            .call("certificates", provider.certificates(store.store()))
            .await?
            .ok_or(SigningError::NoCertificatesAvailable)?;
        if self.call("count", provider.count(&certificates)).await? == 0 {
            return Err(SigningError::NoCertificatesAvailable);
        }

        let valid = self
            .call("find", provider.find(&certificates, FindCriterion::TimeValid))
            .await?;
        let signable = self
            .call(
                "find",
                provider.find(
                    &valid,
                    FindCriterion::ExtendedProperty(PropertyId::KeyProvInfo),
                ),
            )
            .await?;

        let count = self.call("count", provider.count(&signable)).await?;
        if count == 0 {
            return Err(SigningError::NoSignableCertificates);
        }

        let signable = &signable;
        stream::iter(1..=count)
            .map(|ordinal| async move {
                self.describe(signable, ordinal)
                    .await
                    .map_err(|error| SigningError::enumeration(ordinal, error))
            })
            .buffered(self.config.max_concurrent_reads.max(1))
            .try_collect()
            .await
    }

    async fn describe(
        &self,
        collection: &P::Collection,
        ordinal: usize,
    ) -> SigningResult<CertificateDescriptor<P::Certificate>> {
        let provider = self.provider.as_ref();
        let certificate = self.call("item", provider.item(collection, ordinal)).await?;

        let info = CertificateInfo {
            issuer_info: self
                .call("issuer_name", provider.issuer_name(&certificate))
                .await?,
            private_key: self
                .call("private_key", provider.private_key(&certificate))
                .await?,
            serial_number: self
                .call("serial_number", provider.serial_number(&certificate))
                .await?,
            subject_info: self
                .call("subject_name", provider.subject_name(&certificate))
                .await?,
            thumbprint: self
                .call("thumbprint", provider.thumbprint(&certificate))
                .await?,
            valid_period: ValidPeriod {
                from: self
                    .call("valid_from", provider.valid_from(&certificate))
                    .await?,
                to: self
                    .call("valid_to", provider.valid_to(&certificate))
                    .await?,
            },
        };

        Ok(CertificateDescriptor::new(info, certificate))
    }

    async fn lookup(
        &self,
        store: &StoreGuard<'_, P>,
        thumbprint: &Thumbprint,
    ) -> SigningResult<P::Certificate> {
        let provider = self.provider.as_ref();
        let not_found = || SigningError::CertificateNotFound(thumbprint.to_string());

        let certificates = self
            .call("certificates", provider.certificates(store.store()))
            .await?
            .ok_or_else(not_found)?;
        if self.call("count", provider.count(&certificates)).await? == 0 {
            return Err(not_found());
        }

        let matches = self
            .call(
                "find",
                provider.find(&certificates, FindCriterion::Sha1Hash(thumbprint.as_str())),
            )
            .await?;
        if self.call("count", provider.count(&matches)).await? == 0 {
            return Err(not_found());
        }

        let certificate = self.call("item", provider.item(&matches, 1)).await?;
        let actual = self
            .call("thumbprint", provider.thumbprint(&certificate))
            .await?;
        if actual != thumbprint.as_str() {
            warn!("Provider matched {actual} when looking up {thumbprint}");
            return Err(not_found());
        }

        Ok(certificate)
    }
}
