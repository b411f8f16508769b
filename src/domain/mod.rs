pub mod algorithm;
pub mod cades;
pub mod certificate;
pub mod errors;
pub mod ports;
pub mod repository;
pub mod service;
mod store;
pub mod thumbprint;
pub mod xml;

pub use cades::{CadesRequest, CadesSigner};
pub use certificate::{CertificateDescriptor, CertificateInfo, DistinguishedName};
pub use errors::{ProviderError, ProviderResult, SigningError, SigningResult};
pub use ports::{CertificateSource, CryptoProvider};
pub use repository::{CertificateRepository, RepositoryConfig};
pub use service::SigningService;
pub use xml::{XmlSigner, XmlSigningRequest};
