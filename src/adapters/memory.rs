//! An in-memory cryptographic provider.
//!
//! Useful for testing and development: certificates are plain records and
//! signatures are synthetic, readable tokens instead of real CMS or XML-DSig
//! structures. The provider counts calls and store lifecycle events and can
//! be told to slow down or fail specific reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::algorithm::{XmlSignatureType, oid};
use crate::domain::certificate::PrivateKeyRef;
use crate::domain::errors::{ProviderError, ProviderResult};
use crate::domain::ports::{
    CadesType, CertificateSource, ContentEncoding, CryptoProvider, FindCriterion, PropertyId,
    ProviderInfo, SignedContent, SignerParams, XmlSignatureParams, decode_base64_payload,
};

const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

/// A certificate record held by [`MemoryProvider`].
#[derive(Debug, Clone)]
pub struct MemoryCertificate {
    pub thumbprint: String,
    pub issuer: String,
    pub subject: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub private_key: Option<PrivateKeyRef>,
    pub public_key_algorithm: String,
    read_delay: Option<Duration>,
    read_failure: Option<String>,
}

impl MemoryCertificate {
    /// A currently valid RSA certificate with a private key.
    pub fn new(thumbprint: impl Into<String>) -> Self {
        let thumbprint = thumbprint.into();
        let now = Utc::now();
        Self {
            issuer: "CN=Memory CA, O=Memory Provider".to_string(),
            subject: format!("CN=Holder {thumbprint}, O=Memory Provider"),
            serial_number: format!("00{thumbprint}"),
            valid_from: now - chrono::Duration::days(1),
            valid_to: now + chrono::Duration::days(365),
            private_key: Some(PrivateKeyRef {
                container_name: format!("container-{thumbprint}"),
                provider_name: MemoryProvider::NAME.to_string(),
            }),
            public_key_algorithm: oid::RSA_ENCRYPTION.to_string(),
            thumbprint,
            read_delay: None,
            read_failure: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn without_private_key(mut self) -> Self {
        self.private_key = None;
        self
    }

    pub fn expired(mut self) -> Self {
        let now = Utc::now();
        self.valid_from = now - chrono::Duration::days(730);
        self.valid_to = now - chrono::Duration::days(365);
        self
    }

    pub fn with_public_key_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.public_key_algorithm = algorithm.into();
        self
    }

    /// Every attribute read of this certificate sleeps for `delay` first.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Every attribute read of this certificate fails with `message`.
    pub fn with_read_failure(mut self, message: impl Into<String>) -> Self {
        self.read_failure = Some(message.into());
        self
    }

    fn is_time_valid(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

/// Handle of a store opened on a [`MemoryProvider`].
#[derive(Debug)]
pub struct MemoryStoreHandle {
    id: Uuid,
    source: CertificateSource,
}

#[derive(Debug, Default)]
struct CallStats {
    calls: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory [`CryptoProvider`].
#[derive(Debug, Default)]
pub struct MemoryProvider {
    stores: DashMap<CertificateSource, Vec<Arc<MemoryCertificate>>>,
    open_stores: DashMap<Uuid, CertificateSource>,
    stats: CallStats,
    lenient_hash_match: bool,
    open_failure: Option<String>,
    close_failure: Option<String>,
}

impl MemoryProvider {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds certificates to the store behind `source`, after any existing ones.
    pub fn with_certificates(
        self,
        source: CertificateSource,
        certificates: impl IntoIterator<Item = MemoryCertificate>,
    ) -> Self {
        self.stores
            .entry(source)
            .or_default()
            .extend(certificates.into_iter().map(Arc::new));
        self
    }

    /// Makes `source` exist with no certificates in it.
    pub fn with_empty_store(self, source: CertificateSource) -> Self {
        self.stores.entry(source).or_default();
        self
    }

    /// Thumbprint search ignores ASCII case, like some hardware providers do.
    pub fn with_lenient_hash_match(mut self) -> Self {
        self.lenient_hash_match = true;
        self
    }

    pub fn with_open_failure(mut self, message: impl Into<String>) -> Self {
        self.open_failure = Some(message.into());
        self
    }

    pub fn with_close_failure(mut self, message: impl Into<String>) -> Self {
        self.close_failure = Some(message.into());
        self
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    pub fn opened_stores(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn closed_stores(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Stores currently open.
    pub fn open_store_count(&self) -> usize {
        self.open_stores.len()
    }

    fn record_call(&self) {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn read<T>(
        &self,
        certificate: &MemoryCertificate,
        read: impl FnOnce(&MemoryCertificate) -> T,
    ) -> ProviderResult<T> {
        self.record_call();
        if let Some(delay) = certificate.read_delay {
            tokio::time::sleep(delay).await;
        }
        match &certificate.read_failure {
            Some(message) => Err(ProviderError::msg(message.clone())),
            None => Ok(read(certificate)),
        }
    }

    fn signer_certificate<'a>(
        &self,
        signer: &'a SignerParams<'_, Arc<MemoryCertificate>>,
    ) -> ProviderResult<&'a MemoryCertificate> {
        let certificate: &MemoryCertificate = signer.certificate;
        if certificate.private_key.is_none() {
            return Err(ProviderError::msg(format!(
                "certificate {} has no private key",
                certificate.thumbprint
            )));
        }
        Ok(certificate)
    }
}

#[async_trait]
impl CryptoProvider for MemoryProvider {
    type Store = MemoryStoreHandle;
    type Collection = Vec<Arc<MemoryCertificate>>;
    type Certificate = Arc<MemoryCertificate>;

    async fn open_store(&self, source: &CertificateSource) -> ProviderResult<Self::Store> {
        self.record_call();
        if let Some(message) = &self.open_failure {
            return Err(ProviderError::msg(message.clone()));
        }
        let id = Uuid::new_v4();
        self.open_stores.insert(id, source.clone());
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryStoreHandle {
            id,
            source: source.clone(),
        })
    }

    fn close_store(&self, store: Self::Store) -> ProviderResult<()> {
        self.record_call();
        if self.open_stores.remove(&store.id).is_none() {
            return Err(ProviderError::msg(format!(
                "store {} is already closed",
                store.id
            )));
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        match &self.close_failure {
            Some(message) => Err(ProviderError::msg(message.clone())),
            None => Ok(()),
        }
    }

    async fn certificates(&self, store: &Self::Store) -> ProviderResult<Option<Self::Collection>> {
        self.record_call();
        if !self.open_stores.contains_key(&store.id) {
            return Err(ProviderError::msg(format!("store {} is not open", store.id)));
        }
        Ok(self
            .stores
            .get(&store.source)
            .map(|certificates| certificates.value().clone()))
    }

    async fn find(
        &self,
        collection: &Self::Collection,
        criterion: FindCriterion<'_>,
    ) -> ProviderResult<Self::Collection> {
        self.record_call();
        let now = Utc::now();
        let found = collection
            .iter()
            .filter(|certificate| match criterion {
                FindCriterion::TimeValid => certificate.is_time_valid(now),
                FindCriterion::ExtendedProperty(PropertyId::KeyProvInfo) => {
                    certificate.private_key.is_some()
                }
                FindCriterion::Sha1Hash(hash) if self.lenient_hash_match => {
                    certificate.thumbprint.eq_ignore_ascii_case(hash)
                }
                FindCriterion::Sha1Hash(hash) => certificate.thumbprint == hash,
            })
            .cloned()
            .collect();
        Ok(found)
    }

    async fn count(&self, collection: &Self::Collection) -> ProviderResult<usize> {
        self.record_call();
        Ok(collection.len())
    }

    async fn item(
        &self,
        collection: &Self::Collection,
        ordinal: usize,
    ) -> ProviderResult<Self::Certificate> {
        self.record_call();
        ordinal
            .checked_sub(1)
            .and_then(|index| collection.get(index))
            .cloned()
            .ok_or_else(|| ProviderError::msg(format!("no certificate at position {ordinal}")))
    }

    async fn issuer_name(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        self.read(certificate, |c| c.issuer.clone()).await
    }

    async fn subject_name(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        self.read(certificate, |c| c.subject.clone()).await
    }

    async fn serial_number(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        self.read(certificate, |c| c.serial_number.clone()).await
    }

    async fn thumbprint(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        self.read(certificate, |c| c.thumbprint.clone()).await
    }

    async fn valid_from(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>> {
        self.read(certificate, |c| c.valid_from).await
    }

    async fn valid_to(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>> {
        self.read(certificate, |c| c.valid_to).await
    }

    async fn private_key(&self, certificate: &Self::Certificate) -> ProviderResult<PrivateKeyRef> {
        self.read(certificate, |c| c.private_key.clone())
            .await?
            .ok_or_else(|| {
                ProviderError::msg(format!(
                    "certificate {} has no private key",
                    certificate.thumbprint
                ))
            })
    }

    async fn public_key_algorithm(
        &self,
        certificate: &Self::Certificate,
    ) -> ProviderResult<String> {
        self.read(certificate, |c| c.public_key_algorithm.clone())
            .await
    }

    async fn sign_cades(
        &self,
        content: &SignedContent<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
        cades_type: CadesType,
        detached: bool,
    ) -> ProviderResult<String> {
        self.record_call();
        let certificate = self.signer_certificate(signer)?;
        let data = match content.encoding {
            ContentEncoding::Base64ToBinary => decode_base64_payload(content.content)?,
            ContentEncoding::String => content.content.as_bytes().to_vec(),
        };

        let profile = match cades_type {
            CadesType::Bes => "cades-bes",
        };
        let signing_time = signer
            .signing_time()
            .map(|time| time.to_rfc3339())
            .unwrap_or_default();
        let mut token = format!(
            "{profile};detached={detached};signer={};signing-time={signing_time};inclusion={:?}",
            certificate.thumbprint, signer.inclusion
        )
        .into_bytes();
        if !detached {
            token.extend_from_slice(b";content=");
            token.extend_from_slice(&data);
        }
        Ok(BASE64.encode(token))
    }

    async fn sign_xml(
        &self,
        params: &XmlSignatureParams<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
    ) -> ProviderResult<String> {
        self.record_call();
        let certificate = self.signer_certificate(signer)?;
        let signature_value = BASE64.encode(format!("xmldsig;signer={}", certificate.thumbprint));
        let signed_info = format!(
            r#"<SignedInfo><SignatureMethod Algorithm="{}"/><DigestMethod Algorithm="{}"/></SignedInfo>"#,
            params.signature_method, params.digest_method
        );

        match params.signature_type {
            XmlSignatureType::Enveloped => {
                let position = params.content.rfind("</").ok_or_else(|| {
                    ProviderError::msg("document has no closing root element")
                })?;
                let signature = format!(
                    r#"<Signature xmlns="{XMLDSIG_NAMESPACE}">{signed_info}<SignatureValue>{signature_value}</SignatureValue></Signature>"#
                );
                let mut signed = params.content.to_string();
                signed.insert_str(position, &signature);
                Ok(signed)
            }
            XmlSignatureType::Enveloping => {
                let body = strip_declaration(params.content);
                Ok(format!(
                    r#"<Signature xmlns="{XMLDSIG_NAMESPACE}">{signed_info}<SignatureValue>{signature_value}</SignatureValue><Object>{body}</Object></Signature>"#
                ))
            }
            XmlSignatureType::Template => {
                const PLACEHOLDER: &str = "<SignatureValue/>";
                if !params.content.contains(PLACEHOLDER) {
                    return Err(ProviderError::msg("document has no signature template"));
                }
                Ok(params.content.replacen(
                    PLACEHOLDER,
                    &format!("<SignatureValue>{signature_value}</SignatureValue>"),
                    1,
                ))
            }
        }
    }

    async fn about(&self) -> ProviderResult<ProviderInfo> {
        self.record_call();
        Ok(ProviderInfo {
            name: Self::NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) => rest
            .find("?>")
            .map(|end| rest[end + 2..].trim_start())
            .unwrap_or(trimmed),
        None => trimmed,
    }
}
