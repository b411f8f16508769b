//! Read-only view of an enumerated certificate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validity window as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Reference to the key container holding the certificate's private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyRef {
    pub container_name: String,
    pub provider_name: String,
}

/// Plain certificate attributes read from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub issuer_info: String,
    pub subject_info: String,
    pub serial_number: String,
    pub thumbprint: String,
    pub valid_period: ValidPeriod,
    pub private_key: PrivateKeyRef,
}

/// A certificate attributes snapshot paired with the provider handle it was read from.
///
/// The handle is only ever passed back to the provider, so signing operations
/// target exactly the object that was enumerated.
#[derive(Debug, Clone)]
pub struct CertificateDescriptor<H> {
    info: CertificateInfo,
    handle: H,
}

impl<H> CertificateDescriptor<H> {
    pub fn new(info: CertificateInfo, handle: H) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn into_parts(self) -> (CertificateInfo, H) {
        (self.info, self.handle)
    }

    pub fn thumbprint(&self) -> &str {
        &self.info.thumbprint
    }

    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    pub fn valid_period(&self) -> ValidPeriod {
        self.info.valid_period
    }

    pub fn private_key(&self) -> &PrivateKeyRef {
        &self.info.private_key
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::parse(&self.info.subject_info)
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName::parse(&self.info.issuer_info)
    }

    /// Whether `at` falls inside the validity window, bounds included.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.info.valid_period.from <= at && at <= self.info.valid_period.to
    }

    /// Validity window rendered as `dd.mm.yyyy - dd.mm.yyyy`.
    pub fn friendly_valid_period(&self) -> String {
        format!(
            "{} - {}",
            self.info.valid_period.from.format("%d.%m.%Y"),
            self.info.valid_period.to.format("%d.%m.%Y")
        )
    }
}

impl<H> fmt::Display for CertificateDescriptor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self.subject();
        write!(
            f,
            "{} (thumbprint {}, serial {}, valid {})",
            subject.common_name().unwrap_or(&self.info.subject_info),
            self.info.thumbprint,
            self.info.serial_number,
            self.friendly_valid_period()
        )
    }
}

/// Distinguished name split into its `key=value` components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistinguishedName {
    attributes: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Parses a comma separated DN such as `CN=Ivanov, O="Acme, Inc", C=RU`.
    ///
    /// Values may be double-quoted to carry commas; fragments without `=` are skipped.
    pub fn parse(dn: &str) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in dn.chars() {
            match c {
                '"' => {
                    quoted = !quoted;
                    current.push(c);
                }
                ',' if !quoted => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);

        let attributes = parts
            .iter()
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value)
                    .replace("\"\"", "\"");
                Some((key.to_string(), value))
            })
            .collect();

        Self { attributes }
    }

    /// First value stored under `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get("CN")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
