mod common;

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cades_signer::adapters::openssl::OpenSslProvider;
use cades_signer::config::{KeyEntryConfig, SoftwareStoreConfig};
use cades_signer::domain::{
    CadesRequest, CertificateSource, RepositoryConfig, SigningError, SigningService,
    XmlSigningRequest,
};
use common::*;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;

fn service(provider: OpenSslProvider) -> SigningService<OpenSslProvider> {
    cades_signer::telemetry::init_tracing();
    SigningService::new(Arc::new(provider), RepositoryConfig::default())
}

fn verified_content(signature: &str, detached_content: Option<&[u8]>) -> Vec<u8> {
    let der = BASE64.decode(signature).unwrap();
    let pkcs7 = Pkcs7::from_der(&der).unwrap();
    let store = X509StoreBuilder::new().unwrap().build();
    let certs: Stack<X509> = Stack::new().unwrap();
    let mut out = Vec::new();
    pkcs7
        .verify(
            &certs,
            &store,
            detached_content,
            Some(&mut out),
            Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
        )
        .unwrap();
    out
}

#[tokio::test]
async fn test_lists_software_certificates() {
    let holder = software_certificate("Jane Doe", 0, 365);
    let expected = hex::encode_upper(&*holder.certificate().digest(MessageDigest::sha1()).unwrap());
    let service = service(OpenSslProvider::new().with_container(holder));

    let certificates = service
        .list_certificates(&CertificateSource::Container)
        .await
        .unwrap();

    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].thumbprint(), expected);
    assert_eq!(certificates[0].subject().common_name(), Some("Jane Doe"));
    assert_eq!(certificates[0].issuer().get("O"), Some("Test Organization"));
}

#[tokio::test]
async fn test_not_yet_valid_certificate_is_not_signable() {
    let service = service(OpenSslProvider::new().with_container(software_certificate("Future", 10, 365)));

    let error = service
        .list_certificates(&CertificateSource::Container)
        .await
        .unwrap_err();

    assert!(matches!(error, SigningError::NoSignableCertificates));
}

#[tokio::test]
async fn test_cades_signatures_verify() {
    let holder = software_certificate("Jane Doe", 0, 365);
    let thumbprint = holder.thumbprint().to_string();
    let service = service(OpenSslProvider::new().with_container(holder));

    let detached = service
        .sign_cades(&CadesRequest::new(thumbprint.as_str(), PAYLOAD))
        .await
        .unwrap();
    let attached = service
        .sign_cades(&CadesRequest::new(thumbprint.as_str(), PAYLOAD).attached())
        .await
        .unwrap();

    assert_eq!(verified_content(&detached, Some(&b"hello"[..])), b"hello");
    assert_eq!(verified_content(&attached, None), b"hello");
    assert!(attached.len() > detached.len());
}

#[tokio::test]
async fn test_line_wrapped_payload_signs_decoded_bytes() {
    let holder = software_certificate("Jane Doe", 0, 365);
    let thumbprint = holder.thumbprint().to_string();
    let service = service(OpenSslProvider::new().with_container(holder));

    let attached = service
        .sign_cades(&CadesRequest::new(thumbprint.as_str(), "aGVs\r\nbG8=").attached())
        .await
        .unwrap();

    assert_eq!(verified_content(&attached, None), b"hello");
}

#[tokio::test]
async fn test_lowercase_thumbprint_is_not_found() {
    let holder = software_certificate("Jane Doe", 0, 365);
    let thumbprint = holder.thumbprint().to_lowercase();
    let service = service(OpenSslProvider::new().with_container(holder));

    let error = service
        .sign_cades(&CadesRequest::new(thumbprint.as_str(), PAYLOAD))
        .await
        .unwrap_err();

    assert!(matches!(error, SigningError::CertificateNotFound(_)));
}

#[tokio::test]
async fn test_xml_signature_types() {
    let holder = software_certificate("Jane Doe", 0, 365);
    let thumbprint = holder.thumbprint().to_string();
    let service = service(OpenSslProvider::new().with_container(holder));

    let enveloped = service
        .sign_xml(&XmlSigningRequest::new(thumbprint.as_str(), "<doc><a/></doc>"))
        .await
        .unwrap();
    assert!(enveloped.starts_with("<doc><a></a><ds:Signature"));
    assert!(enveloped.contains("<ds:X509Certificate>"));

    let enveloping = service
        .sign_xml(&XmlSigningRequest::new(thumbprint.as_str(), "<doc/>").with_signature_type(1))
        .await
        .unwrap();
    assert!(enveloping.starts_with("<ds:Signature"));
    assert!(enveloping.contains(r##"<ds:Reference URI="#object-"##));

    let error = service
        .sign_xml(&XmlSigningRequest::new(thumbprint.as_str(), "<doc/>").with_signature_type(2))
        .await
        .unwrap_err();
    assert!(matches!(error, SigningError::Provider(_)));
}

#[tokio::test]
async fn test_registered_store_from_pem_files() {
    let dir = tempfile::tempdir().unwrap();
    let holder = software_certificate("Registered Holder", 0, 365);
    let cert_path = dir.path().join("holder.pem");
    fs::write(&cert_path, holder.certificate().to_pem().unwrap()).unwrap();

    let config = SoftwareStoreConfig {
        container: Vec::new(),
        registered: HashMap::from([(
            "My".to_string(),
            vec![KeyEntryConfig {
                certificate: cert_path,
                private_key: None,
            }],
        )]),
    };
    let service = service(OpenSslProvider::from_config(&config).unwrap());

    let error = service
        .list_certificates(&CertificateSource::personal())
        .await
        .unwrap_err();
    assert!(matches!(error, SigningError::NoSignableCertificates));

    let handle = service
        .find_by_thumbprint(holder.thumbprint(), &CertificateSource::personal())
        .await
        .unwrap();
    assert_eq!(handle.thumbprint(), holder.thumbprint());
}

#[tokio::test]
async fn test_about_reports_openssl() {
    let service = service(OpenSslProvider::new());
    let info = service.about().await.unwrap();
    assert!(info.version.contains("OpenSSL"));
}
