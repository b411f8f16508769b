//! XML-DSig signing with algorithm negotiation.

use tracing::{debug, info};

use super::algorithm::{XmlSignatureType, resolve_signature_type, resolve_xml_algorithm};
use super::errors::SigningResult;
use super::ports::{CertificateSource, CryptoProvider, SignerParams, XmlSignatureParams};
use super::repository::CertificateRepository;
use super::thumbprint::Thumbprint;

/// A request to sign an XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSigningRequest {
    pub thumbprint: String,
    pub document: String,
    /// `0` enveloped, `1` enveloping, `2` template.
    pub signature_type_code: i32,
    pub source: CertificateSource,
}

impl XmlSigningRequest {
    /// Enveloped signature with a certificate from a key container.
    pub fn new(thumbprint: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            thumbprint: thumbprint.into(),
            document: document.into(),
            signature_type_code: XmlSignatureType::Enveloped.code(),
            source: CertificateSource::default(),
        }
    }

    pub fn with_signature_type(mut self, code: i32) -> Self {
        self.signature_type_code = code;
        self
    }

    pub fn with_source(mut self, source: CertificateSource) -> Self {
        self.source = source;
        self
    }
}

/// Signs XML documents, picking the signature and digest methods from the
/// signing certificate's public key algorithm.
pub struct XmlSigner<P: CryptoProvider> {
    repository: CertificateRepository<P>,
}

impl<P: CryptoProvider> XmlSigner<P> {
    pub fn new(repository: CertificateRepository<P>) -> Self {
        Self { repository }
    }

    /// Signs the document and returns the signed XML.
    pub async fn sign(&self, request: &XmlSigningRequest) -> SigningResult<String> {
        let thumbprint = Thumbprint::parse(request.thumbprint.as_str())?;
        let signature_type = resolve_signature_type(request.signature_type_code)?;

        let certificate = self.repository.resolve(&thumbprint, &request.source).await?;

        let provider = self.repository.provider();
        let public_key_algorithm = self
            .repository
            .call(
                "public_key_algorithm",
                provider.public_key_algorithm(&certificate),
            )
            .await?;
        let algorithms = resolve_xml_algorithm(&public_key_algorithm)?;
        debug!(
            "Certificate {thumbprint} uses {public_key_algorithm}, signing with {}",
            algorithms.signature_method
        );

        let signer = SignerParams::new(&certificate);
        let params = XmlSignatureParams {
            content: &request.document,
            signature_type,
            signature_method: algorithms.signature_method,
            digest_method: algorithms.digest_method,
        };
        let signed = self
            .repository
            .call("sign_xml", provider.sign_xml(&params, &signer))
            .await?;

        info!("Created {signature_type} XML signature with certificate {thumbprint}");
        Ok(signed)
    }
}
