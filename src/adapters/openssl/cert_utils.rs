use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509Builder, X509Name, X509NameBuilder};

use crate::domain::errors::ProviderResult;

/// Generates a 2048-bit RSA key.
pub fn generate_rsa_key() -> ProviderResult<PKey<Private>> {
    Ok(PKey::from_rsa(Rsa::generate(2048)?)?)
}

/// Generates a P-256 EC key.
pub fn generate_ec_key() -> ProviderResult<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

/// Certificate for `common_name` over `key`, signed by `issuer` or self-signed.
///
/// Validity runs from `days_from` to `days_to` days from now.
pub fn generate_certificate(
    common_name: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    days_from: u32,
    days_to: u32,
) -> ProviderResult<X509> {
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = generate_serial_number()?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let subject = create_x509_name(common_name)?;
    builder.set_subject_name(&subject)?;
    match issuer {
        Some((issuer_cert, _)) => builder.set_issuer_name(issuer_cert.subject_name())?,
        None => builder.set_issuer_name(&subject)?,
    }
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::days_from_now(days_from)?;
    let not_after = Asn1Time::days_from_now(days_to)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let signing_key = issuer.map(|(_, key)| key).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

fn create_x509_name(common_name: &str) -> ProviderResult<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_text("C", "CM")?;
    builder.append_entry_by_text("O", "Test Organization")?;
    builder.append_entry_by_text("CN", common_name)?;
    Ok(builder.build())
}

fn generate_serial_number() -> ProviderResult<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_certificate_names_its_issuer() {
        let ca_key = generate_rsa_key().unwrap();
        let ca = generate_certificate("Test Root CA", &ca_key, None, 0, 3650).unwrap();
        let leaf_key = generate_ec_key().unwrap();
        let leaf =
            generate_certificate("Leaf", &leaf_key, Some((&ca, &ca_key)), 0, 365).unwrap();

        assert_eq!(
            leaf.issuer_name().to_der().unwrap(),
            ca.subject_name().to_der().unwrap()
        );
        assert!(leaf.verify(&ca_key).unwrap());
    }
}
