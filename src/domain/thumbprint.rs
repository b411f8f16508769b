use std::fmt;

use serde::Serialize;

use super::errors::SigningError;

/// A validated certificate thumbprint used to select a signing certificate.
///
/// Only the shape is checked: the value must be a non-blank string without
/// control characters. Its case and formatting are kept exactly as given because
/// thumbprints are compared byte-for-byte against what the provider reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Thumbprint(String);

impl Thumbprint {
    pub fn parse(value: impl Into<String>) -> Result<Self, SigningError> {
        let value = value.into();
        if value.is_empty() {
            return Err(SigningError::InvalidArgument(
                "certificate thumbprint is not specified".to_string(),
            ));
        }
        if value.trim().is_empty() || value.chars().any(char::is_control) {
            return Err(SigningError::InvalidArgument(
                "certificate thumbprint is not a valid value".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Thumbprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Thumbprint {
    type Error = SigningError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Thumbprint {
    type Error = SigningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Accepts thumbprints coming from loosely typed host input such as JSON.
impl TryFrom<&serde_json::Value> for Thumbprint {
    type Error = SigningError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Err(SigningError::InvalidArgument(
                "certificate thumbprint is not specified".to_string(),
            )),
            serde_json::Value::String(s) => Self::parse(s.as_str()),
            _ => Err(SigningError::InvalidArgument(
                "certificate thumbprint is not a valid value".to_string(),
            )),
        }
    }
}
