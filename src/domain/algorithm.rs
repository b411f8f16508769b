//! Public-key algorithm to XML-DSig algorithm mapping and XML signature types.
//!
//! Both lookups are pure: the tables are built once and never mutated, so the
//! same input always resolves to the same output.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::errors::{SigningError, SigningResult};

/// Public key algorithm object identifiers
pub mod oid {
    pub const GOST_R3410_2001: &str = "1.2.643.2.2.19";
    pub const GOST_R3410_2012_256: &str = "1.2.643.7.1.1.1.1";
    pub const GOST_R3410_2012_512: &str = "1.2.643.7.1.1.1.2";
    pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
    pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
}

/// XML-DSig signature method URIs
pub mod signature_method {
    pub const GOST_R3410_2001: &str =
        "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr34102001-gostr3411";
    pub const GOST_R3410_2012_256: &str =
        "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr34102012-gostr34112012-256";
    pub const GOST_R3410_2012_512: &str =
        "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr34102012-gostr34112012-512";
    pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
}

/// XML-DSig digest method URIs
pub mod digest_method {
    pub const GOST_R3411_94: &str = "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr3411";
    pub const GOST_R3411_2012_256: &str =
        "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr34112012-256";
    pub const GOST_R3411_2012_512: &str =
        "urn:ietf:params:xml:ns:cpxmlsec:algorithms:gostr34112012-512";
    pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
}

/// Signature and digest method pair used to sign an XML document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct XmlAlgorithms {
    pub signature_method: &'static str,
    pub digest_method: &'static str,
}

static XML_ALGORITHMS: Lazy<HashMap<&'static str, XmlAlgorithms>> = Lazy::new(|| {
    HashMap::from([
        (
            oid::GOST_R3410_2001,
            XmlAlgorithms {
                signature_method: signature_method::GOST_R3410_2001,
                digest_method: digest_method::GOST_R3411_94,
            },
        ),
        (
            oid::GOST_R3410_2012_256,
            XmlAlgorithms {
                signature_method: signature_method::GOST_R3410_2012_256,
                digest_method: digest_method::GOST_R3411_2012_256,
            },
        ),
        (
            oid::GOST_R3410_2012_512,
            XmlAlgorithms {
                signature_method: signature_method::GOST_R3410_2012_512,
                digest_method: digest_method::GOST_R3411_2012_512,
            },
        ),
        (
            oid::RSA_ENCRYPTION,
            XmlAlgorithms {
                signature_method: signature_method::RSA_SHA256,
                digest_method: digest_method::SHA256,
            },
        ),
        (
            oid::EC_PUBLIC_KEY,
            XmlAlgorithms {
                signature_method: signature_method::ECDSA_SHA256,
                digest_method: digest_method::SHA256,
            },
        ),
    ])
});

/// Resolves the XML signature and digest methods for a public key algorithm OID.
pub fn resolve_xml_algorithm(public_key_algorithm: &str) -> SigningResult<XmlAlgorithms> {
    XML_ALGORITHMS
        .get(public_key_algorithm)
        .copied()
        .ok_or_else(|| SigningError::UnsupportedAlgorithm(public_key_algorithm.to_string()))
}

/// How the signature relates to the signed document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XmlSignatureType {
    /// The signature is placed inside the signed document.
    #[default]
    Enveloped,
    /// The signed document is placed inside the signature.
    Enveloping,
    /// The document carries a signature template to be filled in.
    Template,
}

impl XmlSignatureType {
    pub fn code(self) -> i32 {
        match self {
            Self::Enveloped => 0,
            Self::Enveloping => 1,
            Self::Template => 2,
        }
    }
}

impl TryFrom<i32> for XmlSignatureType {
    type Error = SigningError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Enveloped),
            1 => Ok(Self::Enveloping),
            2 => Ok(Self::Template),
            other => Err(SigningError::UnsupportedSignatureType(other)),
        }
    }
}

impl fmt::Display for XmlSignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enveloped => "enveloped",
            Self::Enveloping => "enveloping",
            Self::Template => "template",
        };
        write!(f, "{name}")
    }
}

/// Resolves a numeric XML signature type code.
pub fn resolve_signature_type(code: i32) -> SigningResult<XmlSignatureType> {
    XmlSignatureType::try_from(code)
}
