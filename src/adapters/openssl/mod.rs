//! Software cryptographic provider backed by OpenSSL.
//!
//! Certificates and private keys are loaded from PEM files and grouped into a
//! container store and any number of named registered stores. Signatures are
//! computed by OpenSSL: CMS for CAdES-BES, RSA or ECDSA over SHA-256 for
//! XML-DSig.

mod cert_utils;
mod cms;
mod xml_signature;

pub use cert_utils::*;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::{KeyEntryConfig, SoftwareStoreConfig};
use crate::domain::certificate::PrivateKeyRef;
use crate::domain::errors::{ProviderError, ProviderResult};
use crate::domain::ports::{
    CadesType, CertificateSource, CryptoProvider, FindCriterion, PropertyId, ProviderInfo,
    SignedContent, SignerParams, XmlSignatureParams,
};

const PROVIDER_NAME: &str = "OpenSSL software store";

/// A certificate, its attributes and the matching private key, if any.
pub struct SoftwareCertificate {
    certificate: X509,
    private_key: Option<PKey<Private>>,
    key_label: Option<String>,
    thumbprint: String,
    issuer: String,
    subject: String,
    serial_number: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key_algorithm: String,
}

impl SoftwareCertificate {
    pub fn new(certificate: X509, private_key: Option<PKey<Private>>) -> ProviderResult<Self> {
        let der = certificate.to_der()?;
        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| ProviderError::msg(format!("DER parsing failed: {e}")))?;

        if let Some(key) = &private_key {
            if !certificate.public_key()?.public_eq(&**key) {
                return Err(ProviderError::msg(
                    "private key does not match the certificate public key",
                ));
            }
        }

        let timestamp = |seconds: i64| {
            DateTime::<Utc>::from_timestamp(seconds, 0)
                .ok_or_else(|| ProviderError::msg(format!("invalid certificate time {seconds}")))
        };

        Ok(Self {
            thumbprint: hex::encode_upper(openssl::sha::sha1(&der)),
            issuer: parsed.issuer().to_string(),
            subject: parsed.subject().to_string(),
            serial_number: hex::encode_upper(parsed.raw_serial()),
            not_before: timestamp(parsed.validity().not_before.timestamp())?,
            not_after: timestamp(parsed.validity().not_after.timestamp())?,
            public_key_algorithm: parsed.public_key().algorithm.algorithm.to_id_string(),
            certificate,
            private_key,
            key_label: None,
        })
    }

    /// Loads a PEM certificate and an optional PEM private key.
    pub fn from_pem(certificate_pem: &[u8], private_key_pem: Option<&[u8]>) -> ProviderResult<Self> {
        let certificate = X509::from_pem(certificate_pem)?;
        let private_key = private_key_pem
            .map(PKey::private_key_from_pem)
            .transpose()?;
        Self::new(certificate, private_key)
    }

    /// Names the key container reported for this certificate's private key.
    pub fn with_key_label(mut self, label: impl Into<String>) -> Self {
        self.key_label = Some(label.into());
        self
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    fn is_time_valid(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    fn signing_key(&self) -> ProviderResult<&PKey<Private>> {
        self.private_key.as_ref().ok_or_else(|| {
            ProviderError::msg(format!("certificate {} has no private key", self.thumbprint))
        })
    }
}

impl fmt::Debug for SoftwareCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareCertificate")
            .field("thumbprint", &self.thumbprint)
            .field("subject", &self.subject)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

/// Handle of a store opened on an [`OpenSslProvider`].
#[derive(Debug)]
pub struct SoftwareStore {
    certificates: Option<Vec<Arc<SoftwareCertificate>>>,
}

/// [`CryptoProvider`] over PEM material held in memory.
///
/// Registered stores are looked up by name only; scope and open mode do not
/// apply to software stores.
#[derive(Debug, Default)]
pub struct OpenSslProvider {
    container: Vec<Arc<SoftwareCertificate>>,
    registered: HashMap<String, Vec<Arc<SoftwareCertificate>>>,
}

impl OpenSslProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every configured certificate and key from disk.
    pub fn from_config(config: &SoftwareStoreConfig) -> ProviderResult<Self> {
        let mut provider = Self::new();
        for entry in &config.container {
            provider = provider.with_container(load_entry(entry)?);
        }
        for (name, entries) in &config.registered {
            for entry in entries {
                provider = provider.with_registered(name.clone(), load_entry(entry)?);
            }
        }

        info!(
            "Loaded software store with {} container and {} registered certificates",
            provider.container.len(),
            provider.registered.values().map(Vec::len).sum::<usize>()
        );
        Ok(provider)
    }

    pub fn with_container(mut self, certificate: SoftwareCertificate) -> Self {
        self.container.push(Arc::new(certificate));
        self
    }

    pub fn with_registered(
        mut self,
        store: impl Into<String>,
        certificate: SoftwareCertificate,
    ) -> Self {
        self.registered
            .entry(store.into())
            .or_default()
            .push(Arc::new(certificate));
        self
    }

    fn all_certificates(&self) -> impl Iterator<Item = &Arc<SoftwareCertificate>> {
        self.container
            .iter()
            .chain(self.registered.values().flatten())
    }

    /// Issuer certificates of `certificate` known to this provider, nearest first.
    fn chain_of(&self, certificate: &SoftwareCertificate) -> Vec<X509> {
        let mut chain: Vec<&SoftwareCertificate> = Vec::new();
        let mut current = certificate;

        while current.issuer != current.subject {
            let Some(issuer) = self
                .all_certificates()
                .find(|candidate| candidate.subject == current.issuer)
            else {
                break;
            };
            if chain.iter().any(|c| c.thumbprint == issuer.thumbprint) {
                break;
            }
            chain.push(issuer);
            current = issuer;
        }
        chain.into_iter().map(|c| c.certificate.clone()).collect()
    }
}

fn load_entry(entry: &KeyEntryConfig) -> ProviderResult<SoftwareCertificate> {
    let certificate_pem = fs::read(&entry.certificate)?;
    let private_key_pem = entry.private_key.as_ref().map(fs::read).transpose()?;
    let certificate = SoftwareCertificate::from_pem(&certificate_pem, private_key_pem.as_deref())?;

    debug!(
        "Loaded certificate {} from {}",
        certificate.thumbprint,
        entry.certificate.display()
    );
    Ok(match &entry.private_key {
        Some(path) => {
            let label = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| certificate.thumbprint.clone());
            certificate.with_key_label(label)
        }
        None => certificate,
    })
}

#[async_trait]
impl CryptoProvider for OpenSslProvider {
    type Store = SoftwareStore;
    type Collection = Vec<Arc<SoftwareCertificate>>;
    type Certificate = Arc<SoftwareCertificate>;

    async fn open_store(&self, source: &CertificateSource) -> ProviderResult<Self::Store> {
        let certificates = match source {
            CertificateSource::Container => Some(self.container.clone()),
            CertificateSource::Registered(store) => self.registered.get(&store.name).cloned(),
        };
        Ok(SoftwareStore { certificates })
    }

    fn close_store(&self, _store: Self::Store) -> ProviderResult<()> {
        Ok(())
    }

    async fn certificates(&self, store: &Self::Store) -> ProviderResult<Option<Self::Collection>> {
        Ok(store.certificates.clone())
    }

    async fn find(
        &self,
        collection: &Self::Collection,
        criterion: FindCriterion<'_>,
    ) -> ProviderResult<Self::Collection> {
        let now = Utc::now();
        Ok(collection
            .iter()
            .filter(|certificate| match criterion {
                FindCriterion::TimeValid => certificate.is_time_valid(now),
                FindCriterion::ExtendedProperty(PropertyId::KeyProvInfo) => {
                    certificate.private_key.is_some()
                }
                FindCriterion::Sha1Hash(hash) => certificate.thumbprint.eq_ignore_ascii_case(hash),
            })
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &Self::Collection) -> ProviderResult<usize> {
        Ok(collection.len())
    }

    async fn item(
        &self,
        collection: &Self::Collection,
        ordinal: usize,
    ) -> ProviderResult<Self::Certificate> {
        ordinal
            .checked_sub(1)
            .and_then(|index| collection.get(index))
            .cloned()
            .ok_or_else(|| ProviderError::msg(format!("no certificate at position {ordinal}")))
    }

    async fn issuer_name(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        Ok(certificate.issuer.clone())
    }

    async fn subject_name(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        Ok(certificate.subject.clone())
    }

    async fn serial_number(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        Ok(certificate.serial_number.clone())
    }

    async fn thumbprint(&self, certificate: &Self::Certificate) -> ProviderResult<String> {
        Ok(certificate.thumbprint.clone())
    }

    async fn valid_from(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>> {
        Ok(certificate.not_before)
    }

    async fn valid_to(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>> {
        Ok(certificate.not_after)
    }

    async fn private_key(&self, certificate: &Self::Certificate) -> ProviderResult<PrivateKeyRef> {
        certificate.signing_key()?;
        Ok(PrivateKeyRef {
            container_name: certificate
                .key_label
                .clone()
                .unwrap_or_else(|| certificate.thumbprint.clone()),
            provider_name: PROVIDER_NAME.to_string(),
        })
    }

    async fn public_key_algorithm(
        &self,
        certificate: &Self::Certificate,
    ) -> ProviderResult<String> {
        Ok(certificate.public_key_algorithm.clone())
    }

    async fn sign_cades(
        &self,
        content: &SignedContent<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
        cades_type: CadesType,
        detached: bool,
    ) -> ProviderResult<String> {
        let certificate: &SoftwareCertificate = signer.certificate;
        let chain = self.chain_of(certificate);
        cms::sign(content, signer, &chain, cades_type, detached)
    }

    async fn sign_xml(
        &self,
        params: &XmlSignatureParams<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
    ) -> ProviderResult<String> {
        xml_signature::sign(params, signer.certificate)
    }

    async fn about(&self) -> ProviderResult<ProviderInfo> {
        Ok(ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            version: openssl::version::version().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::oid;

    #[test]
    fn test_attributes_are_read_from_the_certificate() {
        let key = generate_rsa_key().unwrap();
        let cert = generate_certificate("Jane Doe", &key, None, 0, 365).unwrap();
        let software = SoftwareCertificate::new(cert.clone(), Some(key)).unwrap();

        let expected =
            hex::encode_upper(&*cert.digest(openssl::hash::MessageDigest::sha1()).unwrap());
        assert_eq!(software.thumbprint(), expected);
        assert!(software.subject.contains("CN=Jane Doe"));
        assert_eq!(software.issuer, software.subject);
        assert_eq!(software.public_key_algorithm, oid::RSA_ENCRYPTION);
        assert!(software.is_time_valid(Utc::now()));
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let key = generate_rsa_key().unwrap();
        let cert = generate_certificate("Jane Doe", &key, None, 0, 365).unwrap();
        let other_key = generate_rsa_key().unwrap();
        assert!(SoftwareCertificate::new(cert, Some(other_key)).is_err());
    }

    #[test]
    fn test_ec_certificate_algorithm() {
        let key = generate_ec_key().unwrap();
        let cert = generate_certificate("EC Holder", &key, None, 0, 30).unwrap();
        let software = SoftwareCertificate::new(cert, Some(key)).unwrap();
        assert_eq!(software.public_key_algorithm, oid::EC_PUBLIC_KEY);
    }

    #[test]
    fn test_chain_is_built_from_known_issuers() {
        let ca_key = generate_rsa_key().unwrap();
        let ca = generate_certificate("Test Root CA", &ca_key, None, 0, 3650).unwrap();
        let leaf_key = generate_rsa_key().unwrap();
        let leaf =
            generate_certificate("Leaf", &leaf_key, Some((&ca, &ca_key)), 0, 365).unwrap();

        let provider = OpenSslProvider::new()
            .with_container(SoftwareCertificate::new(leaf, Some(leaf_key)).unwrap())
            .with_registered("Root", SoftwareCertificate::new(ca.clone(), None).unwrap());

        let chain = provider.chain_of(&provider.container[0]);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].to_der().unwrap(), ca.to_der().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_registered_store_has_no_collection() {
        let provider = OpenSslProvider::new();
        let store = provider
            .open_store(&CertificateSource::personal())
            .await
            .unwrap();
        assert!(provider.certificates(&store).await.unwrap().is_none());
        provider.close_store(store).unwrap();
    }

    #[test]
    fn test_from_config_loads_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_rsa_key().unwrap();
        let cert = generate_certificate("Jane Doe", &key, None, 0, 365).unwrap();
        let cert_path = dir.path().join("jane.crt");
        let key_path = dir.path().join("jane.key");
        fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
        fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let config = SoftwareStoreConfig {
            container: vec![KeyEntryConfig {
                certificate: cert_path.clone(),
                private_key: Some(key_path),
            }],
            registered: HashMap::from([(
                "My".to_string(),
                vec![KeyEntryConfig {
                    certificate: cert_path,
                    private_key: None,
                }],
            )]),
        };

        let provider = OpenSslProvider::from_config(&config).unwrap();
        assert_eq!(provider.container.len(), 1);
        assert_eq!(provider.container[0].key_label.as_deref(), Some("jane"));
        assert!(provider.registered["My"][0].private_key.is_none());
    }
}
