use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use openssl::x509::X509;
use tracing::debug;

use super::SoftwareCertificate;
use crate::domain::errors::ProviderResult;
use crate::domain::ports::{
    CadesType, CertificateInclusion, ContentEncoding, SignedContent, SignerParams,
    decode_base64_payload,
};

/// Produces a base64 DER CMS SignedData over `content`.
///
/// OpenSSL stamps the signing-time attribute itself when it builds the
/// signed attributes, so the requested time is only logged.
pub(super) fn sign(
    content: &SignedContent<'_>,
    signer: &SignerParams<'_, std::sync::Arc<SoftwareCertificate>>,
    chain: &[X509],
    cades_type: CadesType,
    detached: bool,
) -> ProviderResult<String> {
    let certificate: &SoftwareCertificate = signer.certificate;
    let key = certificate.signing_key()?;
    let data = match content.encoding {
        ContentEncoding::Base64ToBinary => decode_base64_payload(content.content)?,
        ContentEncoding::String => content
            .content
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect(),
    };

    let mut flags = CMSOptions::BINARY;
    if detached {
        flags |= CMSOptions::DETACHED;
    }

    let extra_certs = match signer.inclusion {
        CertificateInclusion::EndEntityOnly => None,
        CertificateInclusion::WholeChain => {
            let mut stack = Stack::new()?;
            for issuer in chain {
                stack.push(issuer.clone())?;
            }
            Some(stack)
        }
    };

    let CadesType::Bes = cades_type;
    debug!(
        "Creating CMS signature with {} for {} bytes, detached: {detached}, requested signing time: {:?}",
        certificate.thumbprint,
        data.len(),
        signer.signing_time()
    );

    let signed = CmsContentInfo::sign(
        Some(&*certificate.certificate),
        Some(&**key),
        extra_certs.as_deref(),
        Some(&data),
        flags,
    )?;
    Ok(BASE64.encode(signed.to_der()?))
}
