//! Contract between the signing core and a cryptographic service provider.
//!
//! The provider owns certificate storage, key material and all signature
//! math. The core only drives it through the operations below and never
//! inspects the handles it gets back.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::algorithm::XmlSignatureType;
use super::certificate::PrivateKeyRef;
use super::errors::ProviderResult;

/// Where certificates are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    /// Key containers on hardware tokens.
    #[default]
    Container,
    /// A named logical certificate store.
    Registered(RegisteredStore),
}

impl CertificateSource {
    pub fn personal() -> Self {
        Self::Registered(RegisteredStore::personal())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisteredStore {
    #[serde(default)]
    pub scope: StoreScope,
    #[serde(default = "default_store_name")]
    pub name: String,
    #[serde(default)]
    pub open_mode: StoreOpenMode,
}

fn default_store_name() -> String {
    RegisteredStore::PERSONAL.to_string()
}

impl RegisteredStore {
    pub const PERSONAL: &'static str = "My";

    /// The current user's personal store, opened with maximum allowed access.
    pub fn personal() -> Self {
        Self {
            scope: StoreScope::CurrentUser,
            name: Self::PERSONAL.to_string(),
            open_mode: StoreOpenMode::MaximumAllowed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScope {
    #[default]
    CurrentUser,
    LocalMachine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOpenMode {
    ReadOnly,
    #[default]
    MaximumAllowed,
}

/// Extended certificate properties that can be searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyId {
    /// Key provider information: present when a private key container is bound.
    KeyProvInfo,
}

/// Search criteria applied to a certificate collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindCriterion<'a> {
    /// Certificates whose validity window contains the current time.
    TimeValid,
    /// Certificates carrying the given extended property.
    ExtendedProperty(PropertyId),
    /// Certificates with the given SHA-1 thumbprint.
    Sha1Hash(&'a str),
}

/// How the content handed to the provider is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Content is base64 and is decoded to binary before signing.
    Base64ToBinary,
    /// Content is signed as UTF-16LE text.
    String,
}

/// Content to be wrapped in a signed-data structure.
#[derive(Debug, Clone, Copy)]
pub struct SignedContent<'a> {
    pub encoding: ContentEncoding,
    pub content: &'a str,
}

/// Decodes standard base64, skipping ASCII whitespace such as MIME line breaks.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    BASE64.decode(compact)
}

/// Signed attributes added to the signer info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticatedAttribute {
    SigningTime(DateTime<Utc>),
}

/// Which certificates are embedded in the signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CertificateInclusion {
    /// Only the signer's own certificate.
    #[default]
    EndEntityOnly,
    /// The signer's certificate plus every chain certificate the provider knows.
    WholeChain,
}

/// Signer bound to a certificate handle.
#[derive(Debug, Clone)]
pub struct SignerParams<'a, C> {
    pub certificate: &'a C,
    pub authenticated_attributes: Vec<AuthenticatedAttribute>,
    pub inclusion: CertificateInclusion,
}

impl<'a, C> SignerParams<'a, C> {
    pub fn new(certificate: &'a C) -> Self {
        Self {
            certificate,
            authenticated_attributes: Vec::new(),
            inclusion: CertificateInclusion::default(),
        }
    }

    pub fn with_attribute(mut self, attribute: AuthenticatedAttribute) -> Self {
        self.authenticated_attributes.push(attribute);
        self
    }

    pub fn with_inclusion(mut self, inclusion: CertificateInclusion) -> Self {
        self.inclusion = inclusion;
        self
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.authenticated_attributes.iter().find_map(|a| match a {
            AuthenticatedAttribute::SigningTime(time) => Some(*time),
        })
    }
}

/// CMS signature profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadesType {
    /// CAdES Basic Electronic Signature.
    Bes,
}

/// Parameters of an XML-DSig operation.
#[derive(Debug, Clone, Copy)]
pub struct XmlSignatureParams<'a> {
    pub content: &'a str,
    pub signature_type: XmlSignatureType,
    pub signature_method: &'a str,
    pub digest_method: &'a str,
}

/// Provider identification returned by [`CryptoProvider::about`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: String,
}

/// Capabilities the signing core requires from a cryptographic provider.
///
/// Store handles are owned by the caller that opened them and must be passed
/// back to [`close_store`](Self::close_store) exactly once. Collection
/// ordinals are 1-based.
#[async_trait]
pub trait CryptoProvider: Send + Sync + 'static {
    type Store: Send + Sync;
    type Collection: Send + Sync;
    type Certificate: Clone + Send + Sync;

    async fn open_store(&self, source: &CertificateSource) -> ProviderResult<Self::Store>;

    /// Releases a store. Synchronous so it can run while unwinding or on drop.
    fn close_store(&self, store: Self::Store) -> ProviderResult<()>;

    /// Certificates of an open store, `None` if the store exposes no collection.
    async fn certificates(&self, store: &Self::Store) -> ProviderResult<Option<Self::Collection>>;

    async fn find(
        &self,
        collection: &Self::Collection,
        criterion: FindCriterion<'_>,
    ) -> ProviderResult<Self::Collection>;

    async fn count(&self, collection: &Self::Collection) -> ProviderResult<usize>;

    async fn item(
        &self,
        collection: &Self::Collection,
        ordinal: usize,
    ) -> ProviderResult<Self::Certificate>;

    async fn issuer_name(&self, certificate: &Self::Certificate) -> ProviderResult<String>;

    async fn subject_name(&self, certificate: &Self::Certificate) -> ProviderResult<String>;

    async fn serial_number(&self, certificate: &Self::Certificate) -> ProviderResult<String>;

    async fn thumbprint(&self, certificate: &Self::Certificate) -> ProviderResult<String>;

    async fn valid_from(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>>;

    async fn valid_to(&self, certificate: &Self::Certificate) -> ProviderResult<DateTime<Utc>>;

    async fn private_key(&self, certificate: &Self::Certificate) -> ProviderResult<PrivateKeyRef>;

    /// Object identifier of the certificate's public key algorithm.
    async fn public_key_algorithm(&self, certificate: &Self::Certificate)
    -> ProviderResult<String>;

    /// Produces a base64 encoded CMS signature.
    async fn sign_cades(
        &self,
        content: &SignedContent<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
        cades_type: CadesType,
        detached: bool,
    ) -> ProviderResult<String>;

    /// Produces the signed XML document.
    async fn sign_xml(
        &self,
        params: &XmlSignatureParams<'_>,
        signer: &SignerParams<'_, Self::Certificate>,
    ) -> ProviderResult<String>;

    async fn about(&self) -> ProviderResult<ProviderInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_payload_ignores_line_breaks() {
        assert_eq!(decode_base64_payload("aGVs\r\nbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64_payload(" aGVsbG8=\n").unwrap(), b"hello");
        assert!(decode_base64_payload("not base64!").is_err());
    }
}
