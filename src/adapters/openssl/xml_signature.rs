//! XML-DSig signing with OpenSSL keys.
//!
//! The referenced content is canonicalized with inclusive C14N 1.0 and
//! `SignedInfo` with exclusive C14N before hashing. Earlier XML-DSig
//! `Signature` elements are removed from enveloped documents; elements that
//! merely share the local name in another namespace are kept.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use openssl::bn::BigNumRef;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;
use quick_xml::NsReader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use tracing::debug;
use uuid::Uuid;
use xml_c14n::{CanonicalizationMode, CanonicalizationOptions};

use super::SoftwareCertificate;
use crate::domain::algorithm::{XmlSignatureType, digest_method, signature_method};
use crate::domain::errors::{ProviderError, ProviderResult};
use crate::domain::ports::XmlSignatureParams;

const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
const XMLDSIG_ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const INCLUSIVE_C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const SIGNATURE_ELEMENT: &[u8] = b"Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Rsa,
    Ec,
}

struct Reference<'a> {
    uri: String,
    transforms: &'a [&'a str],
    digest_value: String,
}

pub(super) fn sign(
    params: &XmlSignatureParams<'_>,
    certificate: &SoftwareCertificate,
) -> ProviderResult<String> {
    let key = certificate.signing_key()?;
    let kind = key_kind(params)?;
    let key_matches = match kind {
        KeyKind::Rsa => key.id() == Id::RSA,
        KeyKind::Ec => key.id() == Id::EC,
    };
    if !key_matches {
        return Err(ProviderError::msg(format!(
            "signature method {} does not match the key of certificate {}",
            params.signature_method, certificate.thumbprint
        )));
    }

    debug!(
        "Creating {} XML signature with {}",
        params.signature_type, certificate.thumbprint
    );

    match params.signature_type {
        XmlSignatureType::Enveloped => enveloped(params, certificate, key, kind),
        XmlSignatureType::Enveloping => enveloping(params, certificate, key, kind),
        XmlSignatureType::Template => Err(ProviderError::msg(
            "signature templates are not supported by the software provider",
        )),
    }
}

fn key_kind(params: &XmlSignatureParams<'_>) -> ProviderResult<KeyKind> {
    if params.digest_method != digest_method::SHA256 {
        return Err(ProviderError::msg(format!(
            "digest method {} is not supported by the software provider",
            params.digest_method
        )));
    }
    match params.signature_method {
        signature_method::RSA_SHA256 => Ok(KeyKind::Rsa),
        signature_method::ECDSA_SHA256 => Ok(KeyKind::Ec),
        other => Err(ProviderError::msg(format!(
            "signature method {other} is not supported by the software provider"
        ))),
    }
}

/// Canonicalizes `xml` with the xml_c14n crate, dropping comments.
fn canonicalize(xml: &str, mode: CanonicalizationMode) -> ProviderResult<String> {
    let options = CanonicalizationOptions {
        mode,
        ..CanonicalizationOptions::default()
    };
    xml_c14n::canonicalize_xml(xml, options)
        .map_err(|e| ProviderError::msg(format!("failed to canonicalize XML: {e}")))
}

fn enveloped(
    params: &XmlSignatureParams<'_>,
    certificate: &SoftwareCertificate,
    key: &PKey<Private>,
    kind: KeyKind,
) -> ProviderResult<String> {
    let document = canonicalize(
        &strip_signatures(params.content)?,
        CanonicalizationMode::Canonical1_0,
    )?;
    // The canonical form ends with the root end tag.
    let root_close = document
        .rfind("</")
        .ok_or_else(|| ProviderError::msg("canonical document has no root end tag"))?;

    let reference = Reference {
        uri: String::new(),
        transforms: &[XMLDSIG_ENVELOPED_SIGNATURE, INCLUSIVE_C14N],
        digest_value: BASE64.encode(openssl::sha::sha256(document.as_bytes())),
    };

    let signature = signature_element(params, certificate, key, kind, &reference, "")?;
    let mut signed = document;
    signed.insert_str(root_close, &signature);
    Ok(signed)
}

fn enveloping(
    params: &XmlSignatureParams<'_>,
    certificate: &SoftwareCertificate,
    key: &PKey<Private>,
    kind: KeyKind,
) -> ProviderResult<String> {
    let document = strip_signatures(params.content)?;
    let object_id = format!("object-{}", Uuid::new_v4());
    // Inside the signature the object inherits only the ds prefix, so its
    // standalone canonical form is also its canonical form in place.
    let object = canonicalize(
        &format!(
            r#"<ds:Object xmlns:ds="{XMLDSIG_NAMESPACE}" Id="{object_id}">{document}</ds:Object>"#
        ),
        CanonicalizationMode::Canonical1_0,
    )?;
    let reference = Reference {
        uri: format!("#{object_id}"),
        transforms: &[INCLUSIVE_C14N],
        digest_value: BASE64.encode(openssl::sha::sha256(object.as_bytes())),
    };

    signature_element(params, certificate, key, kind, &reference, &object)
}

fn signature_element(
    params: &XmlSignatureParams<'_>,
    certificate: &SoftwareCertificate,
    key: &PKey<Private>,
    kind: KeyKind,
    reference: &Reference<'_>,
    object: &str,
) -> ProviderResult<String> {
    let signed_info = canonicalize(
        &signed_info(params, reference)?,
        CanonicalizationMode::ExclusiveCanonical1_0,
    )?;
    let signature_value = BASE64.encode(sign_bytes(key, kind, signed_info.as_bytes())?);
    let certificate_b64 = BASE64.encode(certificate.certificate.to_der()?);

    Ok(format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ns}">{signed_info}"#,
            "<ds:SignatureValue>{value}</ds:SignatureValue>",
            "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
            "{object}</ds:Signature>"
        ),
        ns = XMLDSIG_NAMESPACE,
        signed_info = signed_info,
        value = signature_value,
        cert = certificate_b64,
        object = object,
    ))
}

fn signed_info(params: &XmlSignatureParams<'_>, reference: &Reference<'_>) -> ProviderResult<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut root = BytesStart::new("ds:SignedInfo");
    root.push_attribute(("xmlns:ds", XMLDSIG_NAMESPACE));
    writer.write_event(Event::Start(root))?;
    write_algorithm(&mut writer, "ds:CanonicalizationMethod", EXCLUSIVE_C14N)?;
    write_algorithm(&mut writer, "ds:SignatureMethod", params.signature_method)?;

    let mut reference_start = BytesStart::new("ds:Reference");
    reference_start.push_attribute(("URI", reference.uri.as_str()));
    writer.write_event(Event::Start(reference_start))?;
    writer.write_event(Event::Start(BytesStart::new("ds:Transforms")))?;
    for transform in reference.transforms {
        write_algorithm(&mut writer, "ds:Transform", transform)?;
    }
    writer.write_event(Event::End(BytesEnd::new("ds:Transforms")))?;
    write_algorithm(&mut writer, "ds:DigestMethod", params.digest_method)?;
    writer.write_event(Event::Start(BytesStart::new("ds:DigestValue")))?;
    writer.write_event(Event::Text(BytesText::new(&reference.digest_value)))?;
    writer.write_event(Event::End(BytesEnd::new("ds:DigestValue")))?;
    writer.write_event(Event::End(BytesEnd::new("ds:Reference")))?;
    writer.write_event(Event::End(BytesEnd::new("ds:SignedInfo")))?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(ProviderError::new)
}

fn write_algorithm(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &str,
    algorithm: &str,
) -> ProviderResult<()> {
    let mut start = BytesStart::new(element);
    start.push_attribute(("Algorithm", algorithm));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::End(BytesEnd::new(element)))?;
    Ok(())
}

/// Root element of `xml` without XML-DSig `Signature` elements.
///
/// Only content inside the single root element is kept.
fn strip_signatures(xml: &str) -> ProviderResult<String> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().expand_empty_elements = true;
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut depth = 0usize;
    let mut skipped_from: Option<usize> = None;
    let mut root_closed = false;

    loop {
        let (namespace, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(start) => {
                depth += 1;
                if skipped_from.is_some() {
                    continue;
                }
                let in_dsig = matches!(
                    namespace,
                    ResolveResult::Bound(Namespace(ns)) if ns == XMLDSIG_NAMESPACE.as_bytes()
                );
                if in_dsig && start.local_name().as_ref() == SIGNATURE_ELEMENT {
                    skipped_from = Some(depth);
                    continue;
                }
                if depth == 1 && root_closed {
                    return Err(ProviderError::msg("document has more than one root element"));
                }
                writer.write_event(Event::Start(start))?;
            }
            Event::End(end) => {
                let closing = depth;
                depth = depth.saturating_sub(1);
                match skipped_from {
                    Some(level) if level == closing => skipped_from = None,
                    Some(_) => {}
                    None => {
                        if closing == 1 {
                            root_closed = true;
                        }
                        writer.write_event(Event::End(end))?;
                    }
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) => {}
            other if depth > 0 && skipped_from.is_none() => writer.write_event(other)?,
            _ => {}
        }
    }

    if !root_closed {
        return Err(ProviderError::msg("document has no root element"));
    }
    String::from_utf8(writer.into_inner().into_inner()).map_err(ProviderError::new)
}

fn sign_bytes(key: &PKey<Private>, kind: KeyKind, data: &[u8]) -> ProviderResult<Vec<u8>> {
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(data)?;
    let signature = signer.sign_to_vec()?;

    match kind {
        KeyKind::Rsa => Ok(signature),
        KeyKind::Ec => {
            // XML-DSig carries r || s, each padded to the field size.
            let ecdsa = EcdsaSig::from_der(&signature)?;
            let size = key.bits().div_ceil(8) as i32;
            let mut raw = padded(ecdsa.r(), size)?;
            raw.extend(padded(ecdsa.s(), size)?);
            Ok(raw)
        }
    }
}

fn padded(value: &BigNumRef, size: i32) -> ProviderResult<Vec<u8>> {
    Ok(value.to_vec_padded(size)?)
}

#[cfg(test)]
mod tests {
    use openssl::sign::Verifier;

    use super::*;
    use crate::adapters::openssl::{generate_certificate, generate_ec_key, generate_rsa_key};

    fn holder(key: PKey<Private>) -> SoftwareCertificate {
        let cert = generate_certificate("XML Signer", &key, None, 0, 365).unwrap();
        SoftwareCertificate::new(cert, Some(key)).unwrap()
    }

    fn params<'a>(content: &'a str, signature_type: XmlSignatureType) -> XmlSignatureParams<'a> {
        XmlSignatureParams {
            content,
            signature_type,
            signature_method: signature_method::RSA_SHA256,
            digest_method: digest_method::SHA256,
        }
    }

    fn element<'a>(xml: &'a str, name: &str) -> &'a str {
        let open = format!("<ds:{name}>");
        let close = format!("</ds:{name}>");
        let start = xml.find(&open).unwrap() + open.len();
        let end = xml[start..].find(&close).unwrap() + start;
        &xml[start..end]
    }

    /// The `SignedInfo` element as embedded, start tag through end tag.
    fn signed_info_of(xml: &str) -> &str {
        let close = "</ds:SignedInfo>";
        let start = xml.find("<ds:SignedInfo").unwrap();
        let end = xml.find(close).unwrap() + close.len();
        &xml[start..end]
    }

    fn verify_rsa(signed: &str, public_key: &PKey<openssl::pkey::Public>) -> bool {
        let canonical = canonicalize(
            signed_info_of(signed),
            CanonicalizationMode::ExclusiveCanonical1_0,
        )
        .unwrap();
        let value = BASE64.decode(element(signed, "SignatureValue")).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), public_key).unwrap();
        verifier.update(canonical.as_bytes()).unwrap();
        verifier.verify(&value).unwrap()
    }

    #[test]
    fn test_strip_drops_declaration_and_dsig_signatures() {
        let stripped = strip_signatures(concat!(
            r#"<?xml version="1.0"?><doc a="1"><item/>"#,
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignatureValue>old</ds:SignatureValue></ds:Signature>"#,
            r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">older</Signature></doc>"#,
        ))
        .unwrap();
        assert_eq!(stripped, r#"<doc a="1"><item></item></doc>"#);
    }

    #[test]
    fn test_strip_keeps_signature_elements_of_other_namespaces() {
        let document = concat!(
            r#"<doc xmlns:app="urn:app"><app:Signature>Ivanov I.I.</app:Signature>"#,
            "<Signature>unqualified</Signature></doc>",
        );
        assert_eq!(strip_signatures(document).unwrap(), document);
    }

    #[test]
    fn test_strip_rejects_documents_without_root() {
        assert!(strip_signatures("just text").is_err());
        assert!(strip_signatures("<a></a><b></b>").is_err());
    }

    #[test]
    fn test_enveloped_digest_covers_canonical_form() {
        let holder = holder(generate_rsa_key().unwrap());

        let signed = sign(
            &params(r#"<doc b="2" a='1'/>"#, XmlSignatureType::Enveloped),
            &holder,
        )
        .unwrap();

        assert!(signed.starts_with(r#"<doc a="1" b="2"><ds:Signature"#));
        let expected_digest = BASE64.encode(openssl::sha::sha256(br#"<doc a="1" b="2"></doc>"#));
        assert_eq!(element(&signed, "DigestValue"), expected_digest);
    }

    #[test]
    fn test_enveloped_keeps_foreign_signature_elements() {
        let holder = holder(generate_rsa_key().unwrap());
        let document = r#"<doc xmlns:app="urn:app"><app:Signature>Ivanov I.I.</app:Signature></doc>"#;

        let signed = sign(&params(document, XmlSignatureType::Enveloped), &holder).unwrap();

        assert!(signed.contains("<app:Signature>Ivanov I.I.</app:Signature><ds:Signature"));
        let expected_digest = BASE64.encode(openssl::sha::sha256(document.as_bytes()));
        assert_eq!(element(&signed, "DigestValue"), expected_digest);
    }

    #[test]
    fn test_enveloped_rsa_signature_verifies() {
        let key = generate_rsa_key().unwrap();
        let public_key = PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap();
        let holder = holder(key);

        let signed = sign(
            &params("<doc><item>1</item></doc>", XmlSignatureType::Enveloped),
            &holder,
        )
        .unwrap();
        assert!(signed.starts_with("<doc><item>1</item><ds:Signature"));
        assert!(signed.ends_with("</ds:Signature></doc>"));

        let expected_digest = BASE64.encode(openssl::sha::sha256(b"<doc><item>1</item></doc>"));
        assert_eq!(element(&signed, "DigestValue"), expected_digest);
        assert!(verify_rsa(&signed, &public_key));
    }

    #[test]
    fn test_enveloping_ecdsa_signature_verifies() {
        let key = generate_ec_key().unwrap();
        let public_key = PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap();
        let holder = holder(key);
        let mut request = params(r#"<?xml version="1.0"?><doc/>"#, XmlSignatureType::Enveloping);
        request.signature_method = signature_method::ECDSA_SHA256;

        let signed = sign(&request, &holder).unwrap();
        assert!(signed.starts_with("<ds:Signature"));
        assert!(signed.contains("<doc></doc></ds:Object></ds:Signature>"));

        let canonical = canonicalize(
            signed_info_of(&signed),
            CanonicalizationMode::ExclusiveCanonical1_0,
        )
        .unwrap();
        let raw = BASE64.decode(element(&signed, "SignatureValue")).unwrap();
        assert_eq!(raw.len(), 64);

        let r = openssl::bn::BigNum::from_slice(&raw[..32]).unwrap();
        let s = openssl::bn::BigNum::from_slice(&raw[32..]).unwrap();
        let der = EcdsaSig::from_private_components(r, s).unwrap().to_der().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key).unwrap();
        verifier.update(canonical.as_bytes()).unwrap();
        assert!(verifier.verify(&der).unwrap());
    }

    #[test]
    fn test_template_is_rejected() {
        let holder = holder(generate_rsa_key().unwrap());
        let error = sign(
            &params("<doc><SignatureValue/></doc>", XmlSignatureType::Template),
            &holder,
        )
        .unwrap_err();
        assert!(error.to_string().contains("templates are not supported"));
    }

    #[test]
    fn test_gost_method_is_rejected() {
        let holder = holder(generate_rsa_key().unwrap());
        let mut request = params("<doc/>", XmlSignatureType::Enveloped);
        request.signature_method = signature_method::GOST_R3410_2012_256;
        request.digest_method = digest_method::GOST_R3411_2012_256;
        assert!(sign(&request, &holder).is_err());
    }

    #[test]
    fn test_method_must_match_key_type() {
        let holder = holder(generate_rsa_key().unwrap());
        let mut request = params("<doc/>", XmlSignatureType::Enveloped);
        request.signature_method = signature_method::ECDSA_SHA256;
        assert!(sign(&request, &holder).is_err());
    }
}
