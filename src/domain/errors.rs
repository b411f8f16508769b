use color_eyre::Report;
use std::error::Error as StdError;
use std::fmt;

pub type SigningResult<T> = Result<T, SigningError>;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by the public signing and lookup operations.
#[derive(thiserror::Error, Debug)]
pub enum SigningError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No certificates available")]
    NoCertificatesAvailable,

    #[error("No certificates with a private key")]
    NoSignableCertificates,

    #[error("Certificate not found by thumbprint: {0}")]
    CertificateNotFound(String),

    #[error("Unsupported public key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported XML signature type: {0}")]
    UnsupportedSignatureType(i32),

    #[error("Failed to read certificate #{ordinal}: {source}")]
    Enumeration {
        ordinal: usize,
        #[source]
        source: Box<SigningError>,
    },

    #[error("Provider call timed out: {operation}")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl SigningError {
    pub(crate) fn enumeration(ordinal: usize, source: SigningError) -> Self {
        Self::Enumeration {
            ordinal,
            source: Box::new(source),
        }
    }
}

/// Error reported by a cryptographic provider.
///
/// The original cause is kept as-is so its message reaches the caller unchanged.
#[derive(Debug)]
pub struct ProviderError {
    error: Report,
}

impl ProviderError {
    pub fn new<T>(error: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            error: Report::new(error),
        }
    }

    pub fn msg<T>(message: T) -> Self
    where
        T: fmt::Debug + fmt::Display + Send + Sync + 'static,
    {
        Self {
            error: Report::msg(message),
        }
    }
}

impl StdError for ProviderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl From<openssl::error::ErrorStack> for ProviderError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        Self::new(error)
    }
}

impl From<base64::DecodeError> for ProviderError {
    fn from(error: base64::DecodeError) -> Self {
        Self::new(error)
    }
}

impl From<quick_xml::Error> for ProviderError {
    fn from(error: quick_xml::Error) -> Self {
        Self::new(error)
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error)
    }
}
