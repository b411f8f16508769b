//! CAdES-BES signing of base64 payloads.

use chrono::Utc;
use tracing::info;

use super::errors::{SigningError, SigningResult};
use super::ports::{
    AuthenticatedAttribute, CadesType, CertificateInclusion, CertificateSource, ContentEncoding,
    CryptoProvider, SignedContent, SignerParams, decode_base64_payload,
};
use super::repository::CertificateRepository;
use super::thumbprint::Thumbprint;

/// A request to sign a base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadesRequest {
    pub thumbprint: String,
    /// Base64 encoded bytes to sign.
    pub payload: String,
    /// Detached signatures do not embed the payload.
    pub detached: bool,
    pub source: CertificateSource,
}

impl CadesRequest {
    /// Detached signature with a certificate from a key container.
    pub fn new(thumbprint: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            thumbprint: thumbprint.into(),
            payload: payload.into(),
            detached: true,
            source: CertificateSource::default(),
        }
    }

    pub fn attached(mut self) -> Self {
        self.detached = false;
        self
    }

    pub fn with_source(mut self, source: CertificateSource) -> Self {
        self.source = source;
        self
    }
}

/// Produces CAdES-BES signatures.
///
/// Each signature carries an authenticated signing-time attribute and embeds
/// the signer certificate only, without its chain.
pub struct CadesSigner<P: CryptoProvider> {
    repository: CertificateRepository<P>,
}

impl<P: CryptoProvider> CadesSigner<P> {
    pub fn new(repository: CertificateRepository<P>) -> Self {
        Self { repository }
    }

    /// Signs the payload and returns the base64 encoded signature.
    pub async fn sign(&self, request: &CadesRequest) -> SigningResult<String> {
        let thumbprint = Thumbprint::parse(request.thumbprint.as_str())?;
        if let Err(error) = decode_base64_payload(&request.payload) {
            return Err(SigningError::InvalidArgument(format!(
                "payload is not valid base64: {error}"
            )));
        }

        let certificate = self.repository.resolve(&thumbprint, &request.source).await?;

        let content = SignedContent {
            encoding: ContentEncoding::Base64ToBinary,
            content: &request.payload,
        };
        let signer = SignerParams::new(&certificate)
            .with_attribute(AuthenticatedAttribute::SigningTime(Utc::now()))
            .with_inclusion(CertificateInclusion::EndEntityOnly);

        let provider = self.repository.provider();
        let signature = self
            .repository
            .call(
                "sign_cades",
                provider.sign_cades(&content, &signer, CadesType::Bes, request.detached),
            )
            .await?;

        info!(
            "Created {} CAdES-BES signature with certificate {thumbprint}",
            if request.detached { "detached" } else { "attached" }
        );
        Ok(signature)
    }
}
